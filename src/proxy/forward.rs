// Reverse-proxy forwarding: builds the outbound request, sends it through
// the pooled hyper client, and captures the full response so it can both be
// returned to the client and considered for caching.

use bytes::Bytes as BytesBuf;
use http_body_util::{BodyExt, Full};
use std::time::Duration;

use crate::http::client::HyperClient;
use crate::proxy::sanitize::sanitize;

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("failed to build upstream request: {0}")]
    BuildRequest(String),
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream request timed out")]
    Timeout,
    #[error("failed to read upstream response body: {0}")]
    ReadBody(String),
}

/// A captured upstream response: status, headers and the fully-buffered
/// body, ready either to be replayed to the client or written to the cache.
pub struct ForwardedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Sends `method path+query` with `headers`/`body` to `target_url` and
/// captures the response in full (no streaming passthrough, matching the
/// bounded-in-memory scope of this gateway).
pub async fn forward(
    client: &HyperClient,
    method: &str,
    target_url: &str,
    headers: &[(String, String)],
    body: BytesBuf,
    timeout: Duration,
) -> Result<ForwardedResponse, ForwardError> {
    let method = hyper::Method::from_bytes(method.as_bytes())
        .map_err(|e| ForwardError::BuildRequest(e.to_string()))?;

    let mut builder = hyper::Request::builder().method(method).uri(target_url);

    for (k, v) in sanitize(headers) {
        builder = builder.header(k, v);
    }

    let req = builder
        .body(Full::new(body).map_err(|never| match never {}).boxed())
        .map_err(|e| ForwardError::BuildRequest(e.to_string()))?;

    let resp = tokio::time::timeout(timeout, client.request(req))
        .await
        .map_err(|_| ForwardError::Timeout)?
        .map_err(|e| ForwardError::Transport(e.to_string()))?;

    let status = resp.status().as_u16();
    let raw_resp_headers: Vec<(String, String)> = resp
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect();
    let resp_headers = sanitize(&raw_resp_headers);

    let body_bytes = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| ForwardError::ReadBody(e.to_string()))?
        .to_bytes();

    Ok(ForwardedResponse {
        status,
        headers: resp_headers,
        body: body_bytes.to_vec(),
    })
}

/// Composes the outbound URL: `trim_trailing_slash(base_url) + "/" + path`,
/// with `?raw_query` appended when non-empty.
pub fn target_url(base_url: &str, path: &str, raw_query: &str) -> String {
    let mut url = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    if !raw_query.is_empty() {
        url.push('?');
        url.push_str(raw_query);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_url_trims_trailing_slash_and_joins() {
        assert_eq!(
            target_url("http://upstream.local/", "orders/1", ""),
            "http://upstream.local/orders/1"
        );
    }

    #[test]
    fn target_url_appends_raw_query() {
        assert_eq!(
            target_url("http://upstream.local", "orders", "limit=10"),
            "http://upstream.local/orders?limit=10"
        );
    }

    #[test]
    fn target_url_without_query_has_no_trailing_question_mark() {
        assert_eq!(target_url("http://upstream.local", "orders", ""), "http://upstream.local/orders");
    }

    #[tokio::test]
    async fn response_hop_by_hop_headers_are_stripped() {
        use axum::response::IntoResponse;
        use axum::routing::get;
        use std::net::SocketAddr;
        use tokio::net::TcpListener;

        async fn handler() -> impl IntoResponse {
            (
                [
                    ("transfer-encoding", "chunked"),
                    ("connection", "keep-alive"),
                    ("x-upstream", "yes"),
                ],
                "body",
            )
        }

        let app = axum::Router::new().route("/echo", get(handler));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = crate::http::client::create_client();
        let result = forward(
            &client,
            "GET",
            &format!("http://{}/echo", addr),
            &[],
            BytesBuf::new(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert!(result
            .headers
            .iter()
            .all(|(k, _)| !crate::proxy::sanitize::is_hop_by_hop(k)));
        assert!(result.headers.iter().any(|(k, v)| k.eq_ignore_ascii_case("x-upstream") && v == "yes"));
    }
}
