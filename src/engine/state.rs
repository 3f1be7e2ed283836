//! Engine lifecycle state machine as seen by the frame loop.

use super::EngineStatus;

/// State of the active engine instance after a frame submission.
///
/// `Uninitialized -> Running -> {Running, Lost, ResetPending}`.
/// `ResetPending` is resolved by replacing the instance with a fresh
/// `Uninitialized` one; `Lost` ends the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// No frame has bootstrapped the engine yet.
    #[default]
    Uninitialized,
    /// Tracking.
    Running,
    /// Tracking cannot continue; terminal for the session.
    Lost,
    /// Initialization failed or a reset was requested.
    ResetPending,
}

impl EngineState {
    /// Classify the engine flags read after a submission.
    ///
    /// A pending reset wins over loss: the replacement engine starts clean.
    pub fn observe(status: EngineStatus, reset_requested: bool) -> Self {
        if status.init_failed || reset_requested {
            Self::ResetPending
        } else if status.lost {
            Self::Lost
        } else if status.initialized {
            Self::Running
        } else {
            Self::Uninitialized
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Lost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(initialized: bool, lost: bool, init_failed: bool) -> EngineStatus {
        EngineStatus {
            initialized,
            lost,
            init_failed,
        }
    }

    #[test]
    fn test_observe_transitions() {
        assert_eq!(
            EngineState::observe(status(false, false, false), false),
            EngineState::Uninitialized
        );
        assert_eq!(
            EngineState::observe(status(true, false, false), false),
            EngineState::Running
        );
        assert_eq!(
            EngineState::observe(status(true, true, false), false),
            EngineState::Lost
        );
        assert_eq!(
            EngineState::observe(status(false, false, true), false),
            EngineState::ResetPending
        );
        assert_eq!(
            EngineState::observe(status(true, false, false), true),
            EngineState::ResetPending
        );
    }

    #[test]
    fn test_reset_takes_precedence_over_loss() {
        let state = EngineState::observe(status(true, true, true), false);
        assert_eq!(state, EngineState::ResetPending);
        assert!(!state.is_terminal());
        assert!(EngineState::Lost.is_terminal());
    }
}
