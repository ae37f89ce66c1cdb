use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::EngineError;
use crate::metrics_const::ENGINE_STATE_GAUGE;

/// Engine lifecycle. Only moves forward:
/// `Created → Running → Draining → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EngineState {
    Created = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Created => "created",
            EngineState::Running => "running",
            EngineState::Draining => "draining",
            EngineState::Stopped => "stopped",
        }
    }

    /// Whether `self → next` is a legal step
    pub fn can_transition_to(&self, next: EngineState) -> bool {
        matches!(
            (self, next),
            (EngineState::Created, EngineState::Running)
                | (EngineState::Running, EngineState::Draining)
                | (EngineState::Draining, EngineState::Stopped)
        )
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => EngineState::Created,
            1 => EngineState::Running,
            2 => EngineState::Draining,
            _ => EngineState::Stopped,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free holder for the current [`EngineState`].
#[derive(Debug)]
pub struct AtomicEngineState {
    inner: AtomicU8,
}

impl Default for AtomicEngineState {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicEngineState {
    pub fn new() -> Self {
        Self {
            inner: AtomicU8::new(EngineState::Created as u8),
        }
    }

    pub fn get(&self) -> EngineState {
        EngineState::from_u8(self.inner.load(Ordering::SeqCst))
    }

    /// Move from `from` to `to`. Fails if the step is illegal or if another
    /// caller moved the state first.
    pub fn transition(&self, from: EngineState, to: EngineState) -> Result<(), EngineError> {
        if !from.can_transition_to(to) {
            return Err(EngineError::InvalidTransition { from, to });
        }

        self.inner
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|actual| EngineError::InvalidTransition {
                from: EngineState::from_u8(actual),
                to,
            })?;

        metrics::gauge!(ENGINE_STATE_GAUGE).set(f64::from(to as u8));
        Ok(())
    }
}
