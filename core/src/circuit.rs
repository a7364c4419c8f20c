//! Circuit breaker implementation using state machines
//!
//! Admission and outcome accounting are two short critical sections around a
//! single state lock. The guarded operation itself runs between them with the
//! lock released, so a slow dependency never blocks other callers' checks.

use crate::{
    Event,
    callbacks::Callbacks,
    classifier::{FailureClassifier, FailureContext},
    clock::{Clock, MonotonicClock},
    errors::{CircuitError, ConfigError},
    permit::CallPermit,
    storage::FailureLedger,
};
use parking_lot::Mutex;
use state_machines::state_machine;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Minimum time the circuit stays open before a probe is admitted
    pub recovery_timeout: Duration,

    /// Extra random delay added to the recovery timeout, as a fraction of it
    /// (0.0 = none, 1.0 = up to double). Never shortens the timeout.
    pub jitter_factor: f64,

    /// Number of recent call outcomes kept for inspection
    pub event_log_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            jitter_factor: 0.0,
            event_log_capacity: 100,
        }
    }
}

impl Config {
    /// Check the configuration can drive a breaker
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if self.recovery_timeout.is_zero() {
            return Err(ConfigError::ZeroRecoveryTimeout);
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidJitter(self.jitter_factor));
        }
        if self.event_log_capacity == 0 {
            return Err(ConfigError::ZeroEventLogCapacity);
        }
        Ok(())
    }
}

/// Public view of the breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
        }
    }

    fn from_machine(name: &str) -> Self {
        match name {
            "Open" => CircuitState::Open,
            "HalfOpen" => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context provided to fallback closures when a call is rejected
#[derive(Debug, Clone)]
pub struct FallbackContext {
    pub circuit_name: String,
    /// Clock reading of the failure that opened the circuit
    pub opened_at: Duration,
    pub state: CircuitState,
}

/// Point-in-time view of a breaker, for status endpoints and logs
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub last_failure_at: Option<Duration>,
    /// Time left before a probe is admitted, while open
    pub retry_after: Option<Duration>,
}

/// Circuit breaker context - shared data across all states
#[derive(Clone)]
pub struct CircuitContext {
    pub name: String,
    pub config: Config,
    pub ledger: Arc<FailureLedger>,
    pub clock: Arc<dyn Clock>,
    pub failure_classifier: Option<Arc<dyn FailureClassifier>>,
}

impl Default for CircuitContext {
    fn default() -> Self {
        Self {
            name: String::new(),
            config: Config::default(),
            ledger: Arc::new(FailureLedger::new()),
            clock: Arc::new(MonotonicClock::new()),
            failure_classifier: None,
        }
    }
}

impl std::fmt::Debug for CircuitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitContext")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("ledger", &self.ledger)
            .field("clock", &self.clock)
            .field(
                "failure_classifier",
                &self
                    .failure_classifier
                    .as_ref()
                    .map(|_| "<dyn FailureClassifier>"),
            )
            .finish()
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    /// Clock reading of the failure that opened the circuit
    pub opened_at: Duration,
    /// Recovery timeout for this open window, jitter included
    pub recovery_timeout: Duration,
}

/// Data specific to the HalfOpen state
#[derive(Debug, Clone, Default)]
pub struct HalfOpenData {
    /// Sequence number of the probe currently in flight
    pub probe: u64,
}

state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen(HalfOpenData),
    ],
    events {
        trip {
            guards: [should_trip],
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        attempt_reset {
            guards: [recovery_elapsed],
            transition: { from: Open, to: HalfOpen }
        }
        close {
            guards: [should_close],
            transition: { from: [Open, HalfOpen], to: Closed }
        }
    }
}

impl Circuit<Closed> {
    /// Consecutive failures reached the threshold
    fn should_trip(&self, ctx: &CircuitContext) -> bool {
        ctx.ledger.failure_count() >= ctx.config.failure_threshold
    }
}

impl Circuit<HalfOpen> {
    /// Any counted failure while probing reopens the circuit
    fn should_trip(&self, _ctx: &CircuitContext) -> bool {
        true
    }

    fn should_close(&self, ctx: &CircuitContext) -> bool {
        ctx.ledger.failure_count() == 0
    }
}

impl Circuit<Open> {
    /// Strictly more than the recovery timeout has passed since the last failure
    fn recovery_elapsed(&self, ctx: &CircuitContext) -> bool {
        let timeout = self
            .state_data_open()
            .map(|data| data.recovery_timeout)
            .unwrap_or_default()
            .max(ctx.config.recovery_timeout);

        match ctx.ledger.last_failure_at() {
            Some(failed_at) => ctx.clock.now().saturating_sub(failed_at) > timeout,
            None => true,
        }
    }

    fn should_close(&self, ctx: &CircuitContext) -> bool {
        ctx.ledger.failure_count() == 0
    }
}

/// Why a call was turned away
#[derive(Debug, Clone, Copy)]
enum Rejection {
    Open {
        opened_at: Duration,
        retry_after: Duration,
    },
    ProbeInFlight {
        opened_at: Duration,
    },
}

impl Rejection {
    fn into_error<E>(self, circuit: &str) -> CircuitError<E> {
        match self {
            Rejection::Open {
                opened_at,
                retry_after,
            } => CircuitError::Open {
                circuit: circuit.to_string(),
                opened_at,
                retry_after,
            },
            Rejection::ProbeInFlight { .. } => CircuitError::ProbeInFlight {
                circuit: circuit.to_string(),
            },
        }
    }

    fn fallback_context(self, circuit: &str) -> FallbackContext {
        let (opened_at, state) = match self {
            Rejection::Open { opened_at, .. } => (opened_at, CircuitState::Open),
            Rejection::ProbeInFlight { opened_at } => (opened_at, CircuitState::HalfOpen),
        };
        FallbackContext {
            circuit_name: circuit.to_string(),
            opened_at,
            state,
        }
    }
}

/// State guarded by the breaker lock
struct Guarded {
    machine: DynamicCircuit,
    /// Last probe sequence number handed out
    probe_seq: u64,
}

impl Guarded {
    fn state(&self) -> CircuitState {
        CircuitState::from_machine(self.machine.current_state())
    }
}

/// Circuit breaker public API
///
/// Share one instance per guarded dependency, by reference or through an
/// `Arc`; every method takes `&self`.
pub struct CircuitBreaker {
    context: CircuitContext,
    guarded: Mutex<Guarded>,
    callbacks: Callbacks,
}

impl CircuitBreaker {
    /// Create a circuit breaker with the default clock and no hooks
    pub fn new(name: impl Into<String>, config: Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let context = CircuitContext {
            name: name.into(),
            ledger: Arc::new(FailureLedger::with_max_events(config.event_log_capacity)),
            config,
            clock: Arc::new(MonotonicClock::new()),
            failure_classifier: None,
        };

        Ok(Self::with_context_and_callbacks(context, Callbacks::new()))
    }

    /// Create a circuit breaker with custom context and callbacks (used by builder)
    pub(crate) fn with_context_and_callbacks(
        context: CircuitContext,
        callbacks: Callbacks,
    ) -> Self {
        let machine = DynamicCircuit::new(context.clone());

        info!(
            circuit = %context.name,
            failure_threshold = context.config.failure_threshold,
            recovery_timeout = ?context.config.recovery_timeout,
            "circuit breaker initialized"
        );

        Self {
            context,
            guarded: Mutex::new(Guarded {
                machine,
                probe_seq: 0,
            }),
            callbacks,
        }
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder {
        crate::builder::CircuitBuilder::new(name)
    }

    /// Execute a fallible operation with circuit breaker protection
    ///
    /// The operation runs at most once. When the circuit is open the
    /// operation is not invoked and a rejection is returned instead.
    pub fn call<T, E, F>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: 'static,
    {
        let permit = self
            .admit()
            .map_err(|rejection| rejection.into_error(&self.context.name))?;
        self.run(permit, f)
    }

    /// Like [`call`](Self::call), but a rejected call is answered by `fallback`
    ///
    /// The fallback's own error is reported as [`CircuitError::Execution`].
    pub fn call_or_else<T, E, F, G>(&self, f: F, fallback: G) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        G: FnOnce(&FallbackContext) -> Result<T, E>,
        E: 'static,
    {
        match self.admit() {
            Ok(permit) => self.run(permit, f),
            Err(rejection) => {
                let ctx = rejection.fallback_context(&self.context.name);
                fallback(&ctx).map_err(CircuitError::Execution)
            }
        }
    }

    /// Execute an async operation with circuit breaker protection
    ///
    /// Dropping the returned future while it is the half-open probe hands the
    /// probe slot back; the circuit returns to open and the next call probes.
    pub async fn call_async<T, E, F, Fut>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: 'static,
    {
        let permit = self
            .admit()
            .map_err(|rejection| rejection.into_error(&self.context.name))?;

        let start = self.context.clock.now();
        let result = f().await;
        let duration = self.context.clock.now().saturating_sub(start);

        self.settle(permit, result, duration)
    }

    fn run<T, E, F>(&self, permit: CallPermit<'_>, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: 'static,
    {
        let start = self.context.clock.now();
        let result = f();
        let duration = self.context.clock.now().saturating_sub(start);

        self.settle(permit, result, duration)
    }

    fn settle<T, E: 'static>(
        &self,
        permit: CallPermit<'_>,
        result: Result<T, E>,
        duration: Duration,
    ) -> Result<T, CircuitError<E>> {
        match result {
            Ok(value) => {
                self.on_success(permit, duration);
                Ok(value)
            }
            Err(e) => {
                self.on_failure(permit, &e, duration);
                Err(CircuitError::Execution(e))
            }
        }
    }

    /// Decide whether a call may run; Open -> HalfOpen happens here
    fn admit(&self) -> Result<CallPermit<'_>, Rejection> {
        let mut guarded = self.guarded.lock();
        let now = self.context.clock.now();

        let admitted = match guarded.state() {
            CircuitState::Closed => Ok(None),
            CircuitState::Open => {
                if guarded.machine.handle(CircuitEvent::AttemptReset).is_ok() {
                    guarded.probe_seq += 1;
                    let seq = guarded.probe_seq;
                    if let Some(data) = guarded.machine.half_open_data_mut() {
                        data.probe = seq;
                    }
                    Ok(Some(seq))
                } else {
                    Err(self.open_rejection(&guarded.machine, now))
                }
            }
            CircuitState::HalfOpen => Err(Rejection::ProbeInFlight {
                opened_at: self.context.ledger.last_failure_at().unwrap_or_default(),
            }),
        };

        if admitted.is_err() {
            self.context.ledger.record_rejected(now);
        }
        drop(guarded);

        match admitted {
            Ok(Some(seq)) => {
                info!(circuit = %self.context.name, probe = seq, "circuit half-open, probing");
                self.callbacks.trigger(&self.context.name, CircuitState::HalfOpen);
                Ok(CallPermit::new(self, Some(seq)))
            }
            Ok(None) => Ok(CallPermit::new(self, None)),
            Err(rejection) => {
                debug!(circuit = %self.context.name, ?rejection, "call rejected");
                Err(rejection)
            }
        }
    }

    fn on_success(&self, permit: CallPermit<'_>, duration: Duration) {
        permit.settle();

        let closed = {
            let mut guarded = self.guarded.lock();
            // Timestamps are taken under the lock so the ledger sees them in order
            let now = self.context.clock.now();
            self.context.ledger.record_success(now, duration);
            guarded.state() != CircuitState::Closed
                && guarded.machine.handle(CircuitEvent::Close).is_ok()
        };

        if closed {
            info!(circuit = %self.context.name, "circuit closed");
            self.callbacks.trigger(&self.context.name, CircuitState::Closed);
        }
    }

    fn on_failure<E: 'static>(&self, permit: CallPermit<'_>, error: &E, duration: Duration) {
        // Classify before locking; the classifier is caller code
        let counted = match &self.context.failure_classifier {
            Some(classifier) => classifier.should_trip(&FailureContext {
                circuit_name: &self.context.name,
                error: error as &dyn std::any::Any,
                duration,
                state: self.state(),
            }),
            None => true,
        };

        let probe = permit.settle();

        let (opened, failures) = {
            let mut guarded = self.guarded.lock();
            let now = self.context.clock.now();

            if counted {
                let failures = self.context.ledger.record_failure(now, duration);
                // While already open the refreshed timestamp extends the window
                let opened = guarded.state() != CircuitState::Open
                    && guarded.machine.handle(CircuitEvent::Trip).is_ok();
                if opened {
                    self.mark_open(&mut guarded.machine);
                }
                (opened, failures)
            } else {
                self.context.ledger.record_ignored(now, duration);
                let released = probe.is_some_and(|seq| self.release_probe(&mut guarded, seq));
                (released, self.context.ledger.failure_count())
            }
        };

        if !counted {
            debug!(circuit = %self.context.name, "failure ignored by classifier");
        }
        if opened {
            warn!(
                circuit = %self.context.name,
                failures,
                threshold = self.context.config.failure_threshold,
                "circuit opened"
            );
            self.callbacks.trigger(&self.context.name, CircuitState::Open);
        }
    }

    /// Give up a probe that ended without a counted outcome
    pub(crate) fn abandon_probe(&self, seq: u64) {
        let released = {
            let mut guarded = self.guarded.lock();
            self.release_probe(&mut guarded, seq)
        };

        if released {
            warn!(circuit = %self.context.name, probe = seq, "probe abandoned, circuit reopened");
            self.callbacks.trigger(&self.context.name, CircuitState::Open);
        }
    }

    /// HalfOpen -> Open for probe `seq`, keeping the last failure timestamp
    fn release_probe(&self, guarded: &mut Guarded, seq: u64) -> bool {
        let current = guarded.state() == CircuitState::HalfOpen
            && guarded
                .machine
                .half_open_data()
                .is_some_and(|data| data.probe == seq);

        if current && guarded.machine.handle(CircuitEvent::Trip).is_ok() {
            self.mark_open(&mut guarded.machine);
            return true;
        }
        false
    }

    /// Apply Open-state bookkeeping (timestamp + jittered timeout)
    fn mark_open(&self, machine: &mut DynamicCircuit) {
        let opened_at = self
            .context
            .ledger
            .last_failure_at()
            .unwrap_or_else(|| self.context.clock.now());
        let recovery_timeout = self.jittered_recovery_timeout();

        if let Some(data) = machine.open_data_mut() {
            data.opened_at = opened_at;
            data.recovery_timeout = recovery_timeout;
        }
    }

    /// Recovery timeout for a new open window
    ///
    /// chrono-machines draws a delay from `timeout * (1 - jitter .. 1)`; the
    /// distance below `timeout` is added on top instead, so the result lies in
    /// `timeout ..= timeout * (1 + jitter)`.
    fn jittered_recovery_timeout(&self) -> Duration {
        let base = self.context.config.recovery_timeout;
        let jitter = self.context.config.jitter_factor;
        if jitter <= 0.0 {
            return base;
        }

        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let policy = chrono_machines::Policy {
            max_attempts: 1,
            base_delay_ms: base_ms,
            multiplier: 1.0,
            max_delay_ms: base_ms,
        };
        let drawn_ms = policy.calculate_delay(1, jitter);

        base.saturating_add(Duration::from_millis(base_ms.saturating_sub(drawn_ms)))
    }

    fn open_rejection(&self, machine: &DynamicCircuit, now: Duration) -> Rejection {
        let (opened_at, window) = machine
            .open_data()
            .map(|data| (data.opened_at, data.recovery_timeout))
            .unwrap_or_default();
        let window = window.max(self.context.config.recovery_timeout);
        let last_failure = self.context.ledger.last_failure_at().unwrap_or(opened_at);

        Rejection::Open {
            opened_at,
            retry_after: last_failure.saturating_add(window).saturating_sub(now),
        }
    }

    /// Current state; reading never performs a transition
    pub fn state(&self) -> CircuitState {
        self.guarded.lock().state()
    }

    /// Get current state name
    pub fn state_name(&self) -> &'static str {
        self.state().as_str()
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    /// Consecutive counted failures
    pub fn failure_count(&self) -> u32 {
        self.context.ledger.failure_count()
    }

    /// Clock reading of the most recent counted failure
    pub fn last_failure_at(&self) -> Option<Duration> {
        self.context.ledger.last_failure_at()
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    /// Most recent call outcomes, oldest first
    pub fn event_log(&self, limit: usize) -> Vec<Event> {
        self.context.ledger.event_log(limit)
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let guarded = self.guarded.lock();
        let now = self.context.clock.now();
        let state = guarded.state();

        let retry_after = match state {
            CircuitState::Open => match self.open_rejection(&guarded.machine, now) {
                Rejection::Open { retry_after, .. } => Some(retry_after),
                Rejection::ProbeInFlight { .. } => None,
            },
            _ => None,
        };

        BreakerSnapshot {
            name: self.context.name.clone(),
            state,
            failure_count: self.context.ledger.failure_count(),
            failure_threshold: self.context.config.failure_threshold,
            recovery_timeout: self.context.config.recovery_timeout,
            last_failure_at: self.context.ledger.last_failure_at(),
            retry_after,
        }
    }

    /// Clear all bookkeeping and force the circuit Closed
    ///
    /// A probe still in flight from before the reset settles against the new
    /// state like any other call.
    pub fn reset(&self) {
        let was = {
            let mut guarded = self.guarded.lock();
            let was = guarded.state();
            self.context.ledger.clear();
            guarded.machine = DynamicCircuit::new(self.context.clone());
            was
        };

        info!(circuit = %self.context.name, previous = %was, "circuit reset");
        if was != CircuitState::Closed {
            self.callbacks.trigger(&self.context.name, CircuitState::Closed);
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.context.name)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count())
            .field("callbacks", &self.callbacks)
            .finish()
    }
}
