// Configuration loading and management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const PROD: &str = "prod";
#[allow(dead_code)]
pub const DEV: &str = "dev";
#[allow(dead_code)]
pub const TEST: &str = "test";

/// Top-level configuration, loaded from YAML with an environment-variable
/// overlay applied on top.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub env: String,
    pub server: Server,
    pub database: Database,
    pub redis: Redis,
    pub logs: Logs,
    #[serde(default)]
    pub proxy: Proxy,
    /// Gates the optional admin/web-UI front end. That surface is out of
    /// scope for this binary; the flag is carried for config-shape parity
    /// with the system this gateway's config is modeled on.
    #[serde(default)]
    pub enable_frontend: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Server {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Database {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

impl Database {
    /// Builds a `postgres://` connection string from the discrete fields.
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.dbname
        )
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Redis {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: i64,
}

impl Redis {
    /// Builds a `redis://` connection string from the discrete fields.
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                self.password, self.host, self.port, self.db
            )
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logs {
    pub level: Option<String>,
}

/// Proxy-wide knobs that are not per-collection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Proxy {
    /// Max inbound/outbound body size buffered per request, in bytes.
    #[serde(default = "Proxy::default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Upstream forward timeout.
    #[serde(with = "humantime_serde", default = "Proxy::default_forward_timeout")]
    pub forward_timeout: Duration,
    /// Total timeout applied to a single health probe request.
    #[serde(with = "humantime_serde", default = "Proxy::default_health_timeout")]
    pub health_timeout: Duration,
}

impl Proxy {
    fn default_max_body_bytes() -> usize {
        10 << 20
    }

    fn default_forward_timeout() -> Duration {
        Duration::from_secs(30)
    }

    fn default_health_timeout() -> Duration {
        Duration::from_secs(5)
    }
}

impl Default for Proxy {
    fn default() -> Self {
        Self {
            max_body_bytes: Self::default_max_body_bytes(),
            forward_timeout: Self::default_forward_timeout(),
            health_timeout: Self::default_health_timeout(),
        }
    }
}

impl Config {
    /// Loads configuration from a YAML file, then overlays matching
    /// environment variables on top (`SERVER_PORT`, `DATABASE_HOST`, ...).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config yaml file {:?}", path))?;

        let mut cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("unmarshal yaml from {:?}", path))?;

        cfg.apply_env_overlay();

        Ok(cfg)
    }

    /// Returns a minimal, self-contained default configuration, used when no
    /// config file is found.
    pub fn defaults() -> Self {
        let mut cfg = Self {
            env: DEV.to_string(),
            server: Server { port: 8080 },
            database: Database {
                host: "localhost".to_string(),
                port: 5432,
                user: "midgate".to_string(),
                password: "midgate".to_string(),
                dbname: "midgate".to_string(),
            },
            redis: Redis {
                host: "localhost".to_string(),
                port: 6379,
                password: String::new(),
                db: 0,
            },
            logs: Logs {
                level: Some("info".to_string()),
            },
            proxy: Proxy::default(),
            enable_frontend: false,
        };
        cfg.apply_env_overlay();
        cfg
    }

    pub fn is_prod(&self) -> bool {
        self.env == PROD
    }

    /// Overlays environment variables onto already-loaded values. Mirrors the
    /// dots/dashes-to-underscores, uppercase convention of the system this
    /// gateway's config shape is modeled on.
    fn apply_env_overlay(&mut self) {
        if let Ok(v) = std::env::var("ENV") {
            self.env = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            self.logs.level = Some(v);
        }
        if let Ok(v) = std::env::var("SERVER_PORT").or_else(|_| std::env::var("PORT")) {
            if let Ok(port) = v.parse() {
                self.server.port = port;
            }
        }
        if let Ok(v) = std::env::var("DATABASE_HOST") {
            self.database.host = v;
        }
        if let Ok(v) = std::env::var("DATABASE_PORT") {
            if let Ok(port) = v.parse() {
                self.database.port = port;
            }
        }
        if let Ok(v) = std::env::var("DATABASE_USER") {
            self.database.user = v;
        }
        if let Ok(v) = std::env::var("DATABASE_PASSWORD") {
            self.database.password = v;
        }
        if let Ok(v) = std::env::var("DATABASE_DBNAME") {
            self.database.dbname = v;
        }
        if let Ok(v) = std::env::var("REDIS_HOST") {
            self.redis.host = v;
        }
        if let Ok(v) = std::env::var("REDIS_PORT") {
            if let Ok(port) = v.parse() {
                self.redis.port = port;
            }
        }
        if let Ok(v) = std::env::var("REDIS_PASSWORD") {
            self.redis.password = v;
        }
        if let Ok(v) = std::env::var("REDIS_DB") {
            if let Ok(db) = v.parse() {
                self.redis.db = db;
            }
        }
        if let Ok(v) = std::env::var("ENABLE_FRONTEND") {
            if let Ok(enabled) = v.parse() {
                self.enable_frontend = enabled;
            }
        }
    }
}

/// Builds a config suitable for integration tests: ephemeral port, in-memory
/// collaborators assumed by the caller (no real database/redis dial here).
#[cfg(any(test, feature = "test-support"))]
pub fn new_test_config() -> Config {
    let mut cfg = Config::defaults();
    cfg.env = TEST.to_string();
    cfg.server.port = 0;
    cfg
}
