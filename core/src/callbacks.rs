//! Hooks fired on circuit state transitions
//!
//! Hooks run after the breaker has released its state lock, so they may call
//! back into the breaker (for example to read a snapshot).

use crate::CircuitState;
use std::sync::Arc;

pub type Hook = Arc<dyn Fn(&str) + Send + Sync>;

/// Transition hooks, keyed by the state entered
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_open: Option<Hook>,
    pub on_close: Option<Hook>,
    pub on_half_open: Option<Hook>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the hook registered for `entered`, if any
    pub fn trigger(&self, circuit: &str, entered: CircuitState) {
        let hook = match entered {
            CircuitState::Open => &self.on_open,
            CircuitState::Closed => &self.on_close,
            CircuitState::HalfOpen => &self.on_half_open,
        };
        if let Some(callback) = hook {
            callback(circuit);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .finish()
    }
}
