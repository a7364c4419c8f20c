//! Tripwire - consecutive-failure circuit breaker
//!
//! This crate guards calls to one unreliable dependency:
//! - Counts consecutive failures and opens once a threshold is reached
//! - Rejects calls without running them while open
//! - Admits exactly one probe after the recovery timeout (Closed → Open → HalfOpen)
//! - Reads time through an injectable [`Clock`], so recovery is testable without sleeping
//! - Safe to share between threads; the guarded operation runs outside the lock
//!
//! # Example
//!
//! ```rust
//! use tripwire::{CircuitBreaker, CircuitError};
//! use std::time::Duration;
//!
//! let circuit = CircuitBreaker::builder("planets_api")
//!     .failure_threshold(3)
//!     .recovery_timeout(Duration::from_secs(5))
//!     .on_open(|name| eprintln!("circuit {} opened", name))
//!     .build()
//!     .expect("valid configuration");
//!
//! match circuit.call(|| Ok::<_, String>("Tatooine")) {
//!     Ok(planet) => println!("fetched {}", planet),
//!     Err(CircuitError::Execution(e)) => println!("dependency failed: {}", e),
//!     Err(rejected) => println!("not attempted: {}", rejected),
//! }
//! ```

pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod clock;
pub mod errors;
mod permit;
pub mod storage;

pub use builder::CircuitBuilder;
pub use circuit::{BreakerSnapshot, CircuitBreaker, CircuitState, Config, FallbackContext};
pub use classifier::{
    DefaultClassifier, FailureClassifier, FailureContext, PredicateClassifier, TypedClassifier,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use errors::{CircuitError, ConfigError};
pub use storage::FailureLedger;

use std::time::Duration;

/// Outcome recorded in the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Success,
    /// Failure that counted toward tripping
    Failure,
    /// Failure the classifier chose not to count
    Ignored,
    /// Call turned away without running
    Rejected,
}

/// A single event recorded by the circuit breaker
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    /// Clock reading when the outcome was recorded
    pub timestamp: Duration,
    /// How long the operation ran (zero for rejections)
    pub duration: Duration,
}
