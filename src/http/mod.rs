// HTTP module: pooled upstream client and the axum-backed server.

pub mod client;
pub mod server;

pub use server::{HttpServer, Server};
