// The proxy data plane: resolves a request's collection, enforces
// admission, probes the cache, forwards to the upstream, then logs and
// (conditionally) populates the cache from the captured response.

pub mod cache_key;
pub mod dispatcher;
pub mod forward;
pub mod sanitize;

pub use dispatcher::{Dispatcher, Inbound};
