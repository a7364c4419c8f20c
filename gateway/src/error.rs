//! Gateway error types

use thiserror::Error;
use tripwire::ConfigError;

/// Failure of a single upstream fetch
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connection, TLS or timeout failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Upstream answered with a non-2xx status
    #[error("upstream returned HTTP {status}")]
    Status { status: u16 },

    /// Upstream answered 2xx with a body that is not JSON
    #[error("invalid JSON from upstream: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// 4xx responses: the request was wrong, the upstream is not down
    pub fn is_client_error(&self) -> bool {
        matches!(self, UpstreamError::Status { status } if (400..500).contains(status))
    }
}

/// Startup failures
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid breaker configuration: {0}")]
    Breaker(#[from] ConfigError),

    #[error("invalid request timeout: {0}s")]
    RequestTimeout(f64),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_detection() {
        assert!(UpstreamError::Status { status: 404 }.is_client_error());
        assert!(UpstreamError::Status { status: 429 }.is_client_error());
        assert!(!UpstreamError::Status { status: 503 }.is_client_error());
        assert!(!UpstreamError::Decode("eof".to_string()).is_client_error());
    }
}
