// Cache key derivation. Must be byte-identical whether computed before the
// forward (cache probe) or after it (cache populate) for the same request.

use md5::{Digest, Md5};

use crate::registry::CacheKeyStrategy;

/// `collection_id:METHOD:path[:raw_query][:hex(md5(body))]`.
///
/// The `raw_query` segment is appended whenever the strategy includes the
/// query, even if the query string itself is empty -- only the body-hash
/// segment is gated on non-emptiness.
///
/// md5 is used for speed and key length, not for security.
pub fn cache_key(
    collection_id: &str,
    method: &str,
    path: &str,
    raw_query: &str,
    body: &[u8],
    strategy: CacheKeyStrategy,
) -> String {
    let mut key = format!("{}:{}:{}", collection_id, method, path);

    if strategy.includes_query() {
        key.push(':');
        key.push_str(raw_query);
    }

    if strategy.includes_body() && !body.is_empty() {
        let digest = Md5::digest(body);
        key.push(':');
        key.push_str(&hex::encode(digest));
    }

    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_identical_inputs() {
        let a = cache_key("c1", "GET", "/orders", "limit=10", b"", CacheKeyStrategy::Params);
        let b = cache_key("c1", "GET", "/orders", "limit=10", b"", CacheKeyStrategy::Params);
        assert_eq!(a, b);
    }

    #[test]
    fn params_strategy_ignores_body() {
        let with_body = cache_key("c1", "POST", "/x", "", b"payload", CacheKeyStrategy::Params);
        let without_body = cache_key("c1", "POST", "/x", "", b"", CacheKeyStrategy::Params);
        assert_eq!(with_body, without_body);
    }

    #[test]
    fn body_strategy_ignores_query() {
        let a = cache_key("c1", "POST", "/x", "a=1", b"payload", CacheKeyStrategy::Body);
        let b = cache_key("c1", "POST", "/x", "a=2", b"payload", CacheKeyStrategy::Body);
        assert_eq!(a, b);
    }

    #[test]
    fn query_segment_is_appended_even_when_empty() {
        let key = cache_key("c1", "GET", "/orders", "", b"", CacheKeyStrategy::Params);
        assert_eq!(key, "c1:GET:/orders:");
    }

    #[test]
    fn empty_body_does_not_append_hash_segment() {
        let key = cache_key("c1", "POST", "/x", "", b"", CacheKeyStrategy::Body);
        assert_eq!(key, "c1:POST:/x");
    }

    #[test]
    fn all_strategy_varies_with_both_query_and_body() {
        let base = cache_key("c1", "POST", "/x", "a=1", b"one", CacheKeyStrategy::All);
        let diff_query = cache_key("c1", "POST", "/x", "a=2", b"one", CacheKeyStrategy::All);
        let diff_body = cache_key("c1", "POST", "/x", "a=1", b"two", CacheKeyStrategy::All);
        assert_ne!(base, diff_query);
        assert_ne!(base, diff_body);
    }
}
