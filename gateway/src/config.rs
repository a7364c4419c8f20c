//! Command-line and environment configuration

use crate::error::{GatewayError, UpstreamError};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tripwire::{CircuitBreaker, FailureClassifier, TypedClassifier};

/// Gateway settings; every flag can also come from the environment
#[derive(Debug, Clone, Parser)]
#[command(name = "tripwire-gateway")]
#[command(about = "Fetch an upstream JSON API through a circuit breaker", long_about = None)]
pub struct Settings {
    /// Address to listen on
    #[arg(long, env = "TRIPWIRE_BIND", default_value = "127.0.0.1:8000")]
    pub bind: SocketAddr,

    /// URL fetched for every request to `/`
    #[arg(
        long,
        env = "TRIPWIRE_UPSTREAM_URL",
        default_value = "https://swapi.dev/api/planets/1/"
    )]
    pub upstream_url: String,

    /// Consecutive upstream failures that open the circuit
    #[arg(long, env = "TRIPWIRE_FAILURE_THRESHOLD", default_value_t = 5)]
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before probing the upstream
    #[arg(long, env = "TRIPWIRE_RECOVERY_TIMEOUT_SECS", default_value_t = 60.0)]
    pub recovery_timeout_secs: f64,

    /// Per-request timeout for upstream calls, in seconds
    #[arg(long, env = "TRIPWIRE_REQUEST_TIMEOUT_SECS", default_value_t = 10.0)]
    pub request_timeout_secs: f64,

    /// Count 4xx responses toward opening the circuit
    #[arg(long, env = "TRIPWIRE_COUNT_CLIENT_ERRORS")]
    pub count_client_errors: bool,
}

impl Settings {
    /// Breaker guarding the upstream
    pub fn breaker(&self) -> Result<CircuitBreaker, GatewayError> {
        let breaker = CircuitBreaker::builder("upstream")
            .failure_threshold(self.failure_threshold)
            .recovery_timeout_secs(self.recovery_timeout_secs)
            .failure_classifier(upstream_classifier(self.count_client_errors))
            .build()?;
        Ok(breaker)
    }

    pub fn request_timeout(&self) -> Result<Duration, GatewayError> {
        match Duration::try_from_secs_f64(self.request_timeout_secs) {
            Ok(timeout) if !timeout.is_zero() => Ok(timeout),
            _ => Err(GatewayError::RequestTimeout(self.request_timeout_secs)),
        }
    }
}

/// Which upstream failures count toward tripping
pub fn upstream_classifier(count_client_errors: bool) -> Arc<dyn FailureClassifier> {
    Arc::new(TypedClassifier::new(move |e: &UpstreamError| {
        count_client_errors || !e.is_client_error()
    }))
}
