//! Deciding which operation failures count toward tripping
//!
//! Every failure is propagated to the caller unchanged. The classifier only
//! decides whether it is *counted*: an ignored failure neither increments the
//! consecutive-failure count nor refreshes the last-failure timestamp.

use crate::CircuitState;
use std::any::Any;
use std::marker::PhantomData;
use std::time::Duration;

/// What a classifier sees about a failed call
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Circuit name
    pub circuit_name: &'a str,
    /// The operation's error, downcastable to its concrete type
    pub error: &'a dyn Any,
    /// How long the operation ran before failing
    pub duration: Duration,
    /// State the breaker was in when the outcome arrived
    pub state: CircuitState,
}

/// Decides whether a failure counts toward opening the circuit
///
/// # Examples
///
/// ```rust
/// use tripwire::{FailureClassifier, FailureContext};
///
/// #[derive(Debug)]
/// struct SlowOnly;
///
/// impl FailureClassifier for SlowOnly {
///     fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
///         ctx.duration.as_secs_f64() > 2.0
///     }
/// }
/// ```
pub trait FailureClassifier: Send + Sync + std::fmt::Debug {
    /// `true` to count the failure, `false` to let it pass uncounted
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Counts every failure
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn should_trip(&self, _ctx: &FailureContext<'_>) -> bool {
        true
    }
}

/// Classifier backed by a closure over the whole [`FailureContext`]
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}

/// Classifier that inspects errors of one concrete type
///
/// Errors of any other type are counted.
///
/// ```rust
/// use tripwire::{CircuitBreaker, TypedClassifier};
/// use std::sync::Arc;
///
/// #[derive(Debug)]
/// enum ApiError {
///     BadRequest,
///     Unavailable,
/// }
///
/// let circuit = CircuitBreaker::builder("api")
///     .failure_threshold(1)
///     .failure_classifier(Arc::new(TypedClassifier::new(|e: &ApiError| {
///         matches!(e, ApiError::Unavailable)
///     })))
///     .build()
///     .unwrap();
///
/// let _ = circuit.call(|| Err::<(), _>(ApiError::BadRequest));
/// assert!(circuit.is_closed());
///
/// let _ = circuit.call(|| Err::<(), _>(ApiError::Unavailable));
/// assert!(circuit.is_open());
/// ```
pub struct TypedClassifier<E, F> {
    predicate: F,
    _error: PhantomData<fn(&E)>,
}

impl<E, F> TypedClassifier<E, F>
where
    E: 'static,
    F: Fn(&E) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            _error: PhantomData,
        }
    }
}

impl<E, F> FailureClassifier for TypedClassifier<E, F>
where
    E: 'static,
    F: Fn(&E) -> bool + Send + Sync,
{
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
        ctx.error
            .downcast_ref::<E>()
            .map(|e| (self.predicate)(e))
            .unwrap_or(true)
    }
}

impl<E, F> std::fmt::Debug for TypedClassifier<E, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedClassifier")
            .field("error", &std::any::type_name::<E>())
            .finish()
    }
}
