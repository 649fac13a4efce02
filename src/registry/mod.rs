// Collection registry: read-only lookup plus the minimal in-memory
// implementation needed to run and test the gateway standalone. A real
// deployment swaps this trait for one backed by the admin CRUD surface and
// its database, which sit entirely outside this crate.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// How request components contribute to the cache key for a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKeyStrategy {
    /// Only the query string participates.
    Params,
    /// Only the request body participates.
    Body,
    /// Both query string and body participate.
    All,
}

impl CacheKeyStrategy {
    pub fn includes_query(self) -> bool {
        matches!(self, CacheKeyStrategy::Params | CacheKeyStrategy::All)
    }

    pub fn includes_body(self) -> bool {
        matches!(self, CacheKeyStrategy::Body | CacheKeyStrategy::All)
    }
}

/// A registered upstream, reachable under `prefix`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub prefix: String,
    pub base_url: String,
    pub active: bool,
    #[serde(default)]
    pub health_path: String,
    #[serde(default)]
    pub health_interval_secs: u64,
    #[serde(default)]
    pub log_enabled: bool,
    #[serde(default)]
    pub log_rolling: bool,
    #[serde(default = "Collection::default_log_max_entries")]
    pub log_max_entries: i64,
    #[serde(default)]
    pub cache_enabled: bool,
    #[serde(default)]
    pub cache_ttl_secs: u64,
    #[serde(default = "Collection::default_cache_key_strategy")]
    pub cache_key_strategy: CacheKeyStrategy,
    /// Carried for parity with the persisted schema; not read by the data
    /// plane.
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Collection {
    fn default_log_max_entries() -> i64 {
        1000
    }

    fn default_cache_key_strategy() -> CacheKeyStrategy {
        CacheKeyStrategy::Params
    }

    pub fn new(prefix: impl Into<String>, base_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            prefix: prefix.into(),
            base_url: base_url.into(),
            active: true,
            health_path: String::new(),
            health_interval_secs: 0,
            log_enabled: false,
            log_rolling: false,
            log_max_entries: Self::default_log_max_entries(),
            cache_enabled: false,
            cache_ttl_secs: 0,
            cache_key_strategy: Self::default_cache_key_strategy(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_health_check(&self) -> bool {
        !self.health_path.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("collection not found")]
    NotFound,
    /// More than one active collection claims the same routing prefix. The
    /// registry has no well-defined answer for which one should serve the
    /// request, so the caller must refuse to dispatch rather than guess.
    #[error("invalid registry state: multiple active collections share a prefix")]
    InvalidRegistryState,
}

/// Read-only lookup contract consumed by the proxy dispatcher and health
/// supervisor. The gateway never mutates collections through this trait;
/// mutation is the admin surface's job.
#[async_trait::async_trait]
pub trait Registry: Send + Sync {
    /// Looks up an **active** collection by routing prefix.
    async fn get_by_prefix(&self, prefix: &str) -> Result<Collection, RegistryError>;
    /// Looks up a collection by id regardless of active state.
    async fn get_by_id(&self, id: &str) -> Result<Collection, RegistryError>;
    /// Snapshot of every registered collection, used at startup to seed the
    /// health supervisor.
    async fn list_all(&self) -> Vec<Collection>;
}

/// `parking_lot::RwLock`-guarded in-memory registry: many concurrent
/// readers, exclusive writers, no persistence. Used by the standalone binary
/// and by tests; a production deployment is expected to back `Registry` with
/// the database the admin CRUD surface owns.
#[derive(Default)]
pub struct InMemoryRegistry {
    by_id: RwLock<HashMap<String, Collection>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: Collection) {
        let mut by_id = self.by_id.write();
        if collection.active
            && by_id
                .values()
                .any(|c| c.active && c.id != collection.id && c.prefix == collection.prefix)
        {
            tracing::warn!(
                component = "registry",
                event = "prefix_collision",
                prefix = %collection.prefix,
                collection_id = %collection.id,
                "inserting active collection sharing a prefix with another active collection"
            );
        }
        by_id.insert(collection.id.clone(), collection);
    }

    pub fn remove(&self, id: &str) -> Option<Collection> {
        self.by_id.write().remove(id)
    }

    pub fn set_active(&self, id: &str, active: bool) -> bool {
        if let Some(c) = self.by_id.write().get_mut(id) {
            c.active = active;
            c.updated_at = Utc::now();
            true
        } else {
            false
        }
    }
}

#[async_trait::async_trait]
impl Registry for InMemoryRegistry {
    async fn get_by_prefix(&self, prefix: &str) -> Result<Collection, RegistryError> {
        let by_id = self.by_id.read();
        let mut matches = by_id.values().filter(|c| c.active && c.prefix == prefix);

        let first = matches.next().cloned().ok_or(RegistryError::NotFound)?;
        if matches.next().is_some() {
            return Err(RegistryError::InvalidRegistryState);
        }
        Ok(first)
    }

    async fn get_by_id(&self, id: &str) -> Result<Collection, RegistryError> {
        self.by_id
            .read()
            .get(id)
            .cloned()
            .ok_or(RegistryError::NotFound)
    }

    async fn list_all(&self) -> Vec<Collection> {
        self.by_id.read().values().cloned().collect()
    }
}

pub type SharedRegistry = Arc<dyn Registry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inactive_collection_is_not_found_by_prefix() {
        let registry = InMemoryRegistry::new();
        let mut c = Collection::new("orders", "http://upstream.local");
        c.active = false;
        let id = c.id.clone();
        registry.insert(c);

        assert!(matches!(
            registry.get_by_prefix("orders").await,
            Err(RegistryError::NotFound)
        ));
        assert!(registry.get_by_id(&id).await.is_ok());
    }

    #[tokio::test]
    async fn set_active_flips_prefix_lookup() {
        let registry = InMemoryRegistry::new();
        let c = Collection::new("orders", "http://upstream.local");
        let id = c.id.clone();
        registry.insert(c);

        registry.set_active(&id, false);
        assert!(registry.get_by_prefix("orders").await.is_err());

        registry.set_active(&id, true);
        assert!(registry.get_by_prefix("orders").await.is_ok());
    }

    #[tokio::test]
    async fn two_active_collections_sharing_a_prefix_is_invalid_registry_state() {
        let registry = InMemoryRegistry::new();
        registry.insert(Collection::new("orders", "http://upstream-a.local"));
        registry.insert(Collection::new("orders", "http://upstream-b.local"));

        assert!(matches!(
            registry.get_by_prefix("orders").await,
            Err(RegistryError::InvalidRegistryState)
        ));
    }

    #[test]
    fn cache_key_strategy_component_inclusion() {
        assert!(CacheKeyStrategy::Params.includes_query());
        assert!(!CacheKeyStrategy::Params.includes_body());
        assert!(CacheKeyStrategy::Body.includes_body());
        assert!(!CacheKeyStrategy::Body.includes_query());
        assert!(CacheKeyStrategy::All.includes_query() && CacheKeyStrategy::All.includes_body());
    }
}
