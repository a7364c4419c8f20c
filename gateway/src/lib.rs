//! HTTP gateway that fetches an upstream JSON API through a [`tripwire`] circuit breaker

pub mod config;
pub mod error;
pub mod routes;
pub mod upstream;

pub use config::Settings;
pub use error::{GatewayError, UpstreamError};
pub use routes::{AppState, router};
pub use upstream::{HttpUpstream, Upstream};
