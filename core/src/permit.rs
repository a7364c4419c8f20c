//! Admission tickets for guarded calls
//!
//! A [`CallPermit`] is handed out when the breaker admits a call and is
//! consumed when the call's outcome is recorded. If it is dropped without an
//! outcome (the operation panicked, or an async call was cancelled) and it was
//! the half-open probe, the drop hands the probe slot back so the breaker can
//! never get stuck half-open.

use crate::circuit::CircuitBreaker;

/// Proof that a call was admitted
#[derive(Debug)]
pub(crate) struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    /// Sequence number of the probe this permit holds, if it is the probe
    probe: Option<u64>,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    pub(crate) fn new(breaker: &'a CircuitBreaker, probe: Option<u64>) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    /// Mark the outcome as recorded; the drop becomes a no-op
    pub(crate) fn settle(mut self) -> Option<u64> {
        self.settled = true;
        self.probe
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(seq) = self.probe {
            self.breaker.abandon_probe(seq);
        }
    }
}
