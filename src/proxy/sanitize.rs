// Hop-by-hop header filtering for both the outbound (to-upstream) and
// inbound (to-client) legs of a proxied request.

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Filters a header list down to the ones safe to replay on the other leg of
/// the proxy.
pub fn sanitize(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(k, _)| !is_hop_by_hop(k))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_hop_by_hop_headers() {
        let headers = vec![
            ("Connection".to_string(), "keep-alive".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Host".to_string(), "example.com".to_string()),
        ];
        let sanitized = sanitize(&headers);
        assert_eq!(sanitized.len(), 1);
        assert_eq!(sanitized[0].0, "Content-Type");
    }

    #[test]
    fn case_insensitive_match() {
        assert!(is_hop_by_hop("Transfer-Encoding"));
        assert!(is_hop_by_hop("CONNECTION"));
        assert!(!is_hop_by_hop("X-Custom"));
    }
}
