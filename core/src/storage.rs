//! Failure bookkeeping for a single circuit
//!
//! The ledger owns the consecutive-failure counter, the timestamp of the most
//! recent counted failure, and a bounded log of recent call outcomes. It is
//! only mutated while the breaker's state lock is held, so counter updates and
//! state transitions are observed together.

use crate::{Event, EventKind};
use parking_lot::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
struct LedgerState {
    consecutive_failures: u32,
    last_failure_at: Option<Duration>,
    events: Vec<Event>,
}

/// In-memory failure ledger with a bounded event log
#[derive(Debug)]
pub struct FailureLedger {
    state: Mutex<LedgerState>,
    /// Maximum events kept in the log
    max_events: usize,
}

impl FailureLedger {
    /// Create a ledger keeping the default number of events
    pub fn new() -> Self {
        Self::with_max_events(100)
    }

    /// Create a ledger keeping at most `max_events` log entries
    pub fn with_max_events(max_events: usize) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            max_events: max_events.max(1),
        }
    }

    /// Record a success; clears the consecutive-failure count
    pub fn record_success(&self, at: Duration, duration: Duration) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        self.push_event(&mut state, EventKind::Success, at, duration);
    }

    /// Record a counted failure and return the new consecutive count
    pub fn record_failure(&self, at: Duration, duration: Duration) -> u32 {
        let mut state = self.state.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure_at = Some(at);
        self.push_event(&mut state, EventKind::Failure, at, duration);
        state.consecutive_failures
    }

    /// Record a failure the classifier chose not to count
    pub fn record_ignored(&self, at: Duration, duration: Duration) {
        let mut state = self.state.lock();
        self.push_event(&mut state, EventKind::Ignored, at, duration);
    }

    /// Record a call rejected without running the operation
    pub fn record_rejected(&self, at: Duration) {
        let mut state = self.state.lock();
        self.push_event(&mut state, EventKind::Rejected, at, Duration::ZERO);
    }

    /// Consecutive counted failures since the last success or reset
    pub fn failure_count(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    /// Timestamp of the most recent counted failure
    pub fn last_failure_at(&self) -> Option<Duration> {
        self.state.lock().last_failure_at
    }

    /// Forget all failures and events
    pub fn clear(&self) {
        *self.state.lock() = LedgerState::default();
    }

    /// Most recent events, oldest first, at most `limit` of them
    pub fn event_log(&self, limit: usize) -> Vec<Event> {
        let state = self.state.lock();
        let start = state.events.len().saturating_sub(limit);
        state.events[start..].to_vec()
    }

    fn push_event(
        &self,
        state: &mut LedgerState,
        kind: EventKind,
        timestamp: Duration,
        duration: Duration,
    ) {
        state.events.push(Event {
            kind,
            timestamp,
            duration,
        });

        // Drop the oldest 10% at once so trimming is not paid on every event
        if state.events.len() > self.max_events {
            let remove_count = (self.max_events / 10).max(1);
            state.events.drain(0..remove_count);
        }
    }
}

impl Default for FailureLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_failures_accumulate_and_success_resets() {
        let ledger = FailureLedger::new();

        assert_eq!(ledger.record_failure(secs(1), Duration::ZERO), 1);
        assert_eq!(ledger.record_failure(secs(2), Duration::ZERO), 2);
        assert_eq!(ledger.failure_count(), 2);
        assert_eq!(ledger.last_failure_at(), Some(secs(2)));

        ledger.record_success(secs(3), Duration::ZERO);
        assert_eq!(ledger.failure_count(), 0);
        // The last failure timestamp survives a success
        assert_eq!(ledger.last_failure_at(), Some(secs(2)));
    }

    #[test]
    fn test_ignored_and_rejected_do_not_count() {
        let ledger = FailureLedger::new();

        ledger.record_failure(secs(1), Duration::ZERO);
        ledger.record_ignored(secs(2), Duration::ZERO);
        ledger.record_rejected(secs(3));

        assert_eq!(ledger.failure_count(), 1);
        assert_eq!(ledger.last_failure_at(), Some(secs(1)));
    }

    #[test]
    fn test_clear() {
        let ledger = FailureLedger::new();

        ledger.record_failure(secs(1), Duration::ZERO);
        ledger.clear();

        assert_eq!(ledger.failure_count(), 0);
        assert_eq!(ledger.last_failure_at(), None);
        assert!(ledger.event_log(10).is_empty());
    }

    #[test]
    fn test_event_log_order_and_limit() {
        let ledger = FailureLedger::new();

        ledger.record_success(secs(1), Duration::from_millis(100));
        ledger.record_failure(secs(2), Duration::from_millis(200));
        ledger.record_rejected(secs(3));

        let log = ledger.event_log(10);
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].kind, EventKind::Success);
        assert_eq!(log[1].kind, EventKind::Failure);
        assert_eq!(log[1].duration, Duration::from_millis(200));
        assert_eq!(log[2].kind, EventKind::Rejected);

        let tail = ledger.event_log(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].kind, EventKind::Failure);
    }

    #[test]
    fn test_event_log_is_bounded() {
        let ledger = FailureLedger::with_max_events(5);

        for i in 0..20 {
            ledger.record_success(secs(i), Duration::ZERO);
        }

        let log = ledger.event_log(usize::MAX);
        assert!(log.len() <= 5, "Expected <= 5 events, got {}", log.len());
        assert_eq!(log.last().map(|e| e.timestamp), Some(secs(19)));
    }
}
