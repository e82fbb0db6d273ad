//! Pipeline lifecycle state
//!
//! ```text
//! INITIALIZED ──start──► RUNNING ──stop──► STOPPING ──► STOPPED
//!                           │
//!                           └── sink or source fails to start ──► FAILED
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PipelineState {
    Initialized = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
    Failed = 4,
}

impl PipelineState {
    #[inline]
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initialized,
            1 => Self::Running,
            2 => Self::Stopping,
            3 => Self::Stopped,
            _ => Self::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "INITIALIZED",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
        }
    }

    /// Whether the pipeline has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomically updated state cell
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(PipelineState::Initialized as u8))
    }

    #[inline]
    pub(crate) fn get(&self) -> PipelineState {
        PipelineState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`; on mismatch returns the actual state
    pub(crate) fn transition(
        &self,
        from: PipelineState,
        to: PipelineState,
    ) -> Result<(), PipelineState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(PipelineState::from_u8)
    }

    pub(crate) fn set(&self, state: PipelineState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), PipelineState::Initialized);

        cell.transition(PipelineState::Initialized, PipelineState::Running)
            .unwrap();
        assert_eq!(
            cell.transition(PipelineState::Initialized, PipelineState::Running),
            Err(PipelineState::Running)
        );

        cell.set(PipelineState::Failed);
        assert_eq!(cell.get(), PipelineState::Failed);
        assert!(cell.get().is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(PipelineState::Stopping.to_string(), "STOPPING");
        assert!(!PipelineState::Running.is_terminal());
    }
}
