//! Error types for circuit breaker operations

use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Outcome of a guarded call that did not produce a value
///
/// `Open` and `ProbeInFlight` mean the operation was never invoked.
/// `Execution` carries the operation's own error, untouched.
///
/// Match on [`is_rejection`](Self::is_rejection) rather than on `Open` alone
/// to treat both rejection kinds alike.
#[derive(Debug)]
pub enum CircuitError<E = Box<dyn Error + Send + Sync>> {
    /// Circuit is open, calls are being rejected
    Open {
        circuit: String,
        /// Clock reading of the failure that opened the circuit
        opened_at: Duration,
        /// Time left before a probe will be admitted
        retry_after: Duration,
    },
    /// Recovery window has passed but another call is already probing
    ProbeInFlight { circuit: String },
    /// The wrapped operation failed
    Execution(E),
}

impl<E> CircuitError<E> {
    /// True when the breaker refused the call without running it
    pub fn is_rejection(&self) -> bool {
        !matches!(self, CircuitError::Execution(_))
    }

    /// Borrow the operation's error, if the operation ran
    pub fn execution(&self) -> Option<&E> {
        match self {
            CircuitError::Execution(e) => Some(e),
            _ => None,
        }
    }

    /// Take the operation's error, if the operation ran
    pub fn into_execution(self) -> Option<E> {
        match self {
            CircuitError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for CircuitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitError::Open {
                circuit,
                retry_after,
                ..
            } => {
                write!(
                    f,
                    "Circuit '{}' is open (retry in {:.3}s)",
                    circuit,
                    retry_after.as_secs_f64()
                )
            }
            CircuitError::ProbeInFlight { circuit } => {
                write!(f, "Circuit '{}' is half-open, probe in flight", circuit)
            }
            CircuitError::Execution(e) => write!(f, "Circuit execution failed: {}", e),
        }
    }
}

impl<E: Error + 'static> Error for CircuitError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CircuitError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

/// Invalid breaker configuration
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("failure threshold must be at least 1")]
    ZeroFailureThreshold,

    #[error("recovery timeout must be greater than zero")]
    ZeroRecoveryTimeout,

    #[error("jitter factor must be within 0.0..=1.0, got {0}")]
    InvalidJitter(f64),

    #[error("event log capacity must be at least 1")]
    ZeroEventLogCapacity,
}
