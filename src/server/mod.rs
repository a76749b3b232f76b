//! HTTP server module
//!
//! Webhook ingestion surface plus health endpoint.

pub mod http;
pub mod startup;

pub use http::{build_http_config, create_router, HttpConfig};
pub use startup::{run_server_with_config, ServerConfig, ServerHandle};
