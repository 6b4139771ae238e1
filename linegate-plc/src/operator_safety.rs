//! Operator-safety isolation debounce

use linegate_core::ReleasePolicy;
use serde::Serialize;

/// Isolation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SafetyPhase {
    /// Not isolated
    Safe,
    /// Isolated, operator currently in frame
    IsolatedActive,
    /// Isolated, operator gone, counting clear frames
    IsolatedCooling { clear_frames: u32 },
}

impl SafetyPhase {
    pub fn is_isolated(&self) -> bool {
        !matches!(self, SafetyPhase::Safe)
    }
}

/// Side effect the caller must apply to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SafetyAction {
    Isolate,
    Release,
}

/// Pure transition for one processed frame
pub fn transition(
    phase: SafetyPhase,
    operator_seen: bool,
    line_operative: bool,
    required: u32,
    policy: ReleasePolicy,
) -> (SafetyPhase, Option<SafetyAction>) {
    let required = required.max(1);

    if operator_seen {
        return match phase {
            SafetyPhase::Safe => (SafetyPhase::IsolatedActive, Some(SafetyAction::Isolate)),
            SafetyPhase::IsolatedActive | SafetyPhase::IsolatedCooling { .. } => {
                (SafetyPhase::IsolatedActive, None)
            }
        };
    }

    let clear_frames = match phase {
        SafetyPhase::Safe => return (SafetyPhase::Safe, None),
        SafetyPhase::IsolatedActive => 1,
        SafetyPhase::IsolatedCooling { clear_frames } => clear_frames.saturating_add(1),
    };

    if clear_frames < required {
        return (SafetyPhase::IsolatedCooling { clear_frames }, None);
    }

    match policy {
        ReleasePolicy::Unconditional => (SafetyPhase::Safe, Some(SafetyAction::Release)),
        ReleasePolicy::RequireOperativeLine if line_operative => {
            (SafetyPhase::Safe, Some(SafetyAction::Release))
        }
        // Hold at the threshold until the line comes back
        ReleasePolicy::RequireOperativeLine => (
            SafetyPhase::IsolatedCooling {
                clear_frames: required,
            },
            None,
        ),
    }
}

/// Operator-safety machine, advanced once per control tick that saw a frame
#[derive(Debug, Clone)]
pub struct OperatorSafetyMachine {
    phase: SafetyPhase,
    required_safe_frames: u32,
    policy: ReleasePolicy,
}

impl OperatorSafetyMachine {
    pub fn new(required_safe_frames: u32, policy: ReleasePolicy) -> Self {
        Self {
            phase: SafetyPhase::Safe,
            required_safe_frames: required_safe_frames.max(1),
            policy,
        }
    }

    pub fn on_frame(&mut self, operator_seen: bool, line_operative: bool) -> Option<SafetyAction> {
        let (phase, action) = transition(
            self.phase,
            operator_seen,
            line_operative,
            self.required_safe_frames,
            self.policy,
        );
        self.phase = phase;
        action
    }

    pub fn phase(&self) -> SafetyPhase {
        self.phase
    }

    pub fn is_isolated(&self) -> bool {
        self.phase.is_isolated()
    }

    pub fn clear_frames(&self) -> u32 {
        match self.phase {
            SafetyPhase::IsolatedCooling { clear_frames } => clear_frames,
            _ => 0,
        }
    }

    pub fn required_safe_frames(&self) -> u32 {
        self.required_safe_frames
    }

    /// Apply new parameters without dropping an active isolation
    pub fn reconfigure(&mut self, required_safe_frames: u32, policy: ReleasePolicy) {
        self.required_safe_frames = required_safe_frames.max(1);
        self.policy = policy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_is_edge_triggered() {
        let mut machine = OperatorSafetyMachine::new(3, ReleasePolicy::Unconditional);
        assert_eq!(machine.on_frame(true, true), Some(SafetyAction::Isolate));
        assert_eq!(machine.on_frame(true, true), None);
        assert_eq!(machine.on_frame(true, true), None);
        assert_eq!(machine.phase(), SafetyPhase::IsolatedActive);
    }

    #[test]
    fn test_release_after_exact_window() {
        let mut machine = OperatorSafetyMachine::new(3, ReleasePolicy::Unconditional);
        machine.on_frame(true, true);
        assert_eq!(machine.on_frame(false, true), None);
        assert_eq!(machine.on_frame(false, true), None);
        assert_eq!(machine.clear_frames(), 2);
        assert_eq!(machine.on_frame(false, true), Some(SafetyAction::Release));
        assert_eq!(machine.phase(), SafetyPhase::Safe);
        assert_eq!(machine.on_frame(false, true), None);
    }

    #[test]
    fn test_reappearance_restarts_countdown() {
        let mut machine = OperatorSafetyMachine::new(3, ReleasePolicy::Unconditional);
        machine.on_frame(true, true);
        machine.on_frame(false, true);
        machine.on_frame(false, true);
        assert_eq!(machine.on_frame(true, true), None);
        assert_eq!(machine.phase(), SafetyPhase::IsolatedActive);
        assert!(machine.is_isolated());

        machine.on_frame(false, true);
        machine.on_frame(false, true);
        assert_eq!(machine.on_frame(false, true), Some(SafetyAction::Release));
    }

    #[test]
    fn test_unconditional_release_ignores_line() {
        let mut machine = OperatorSafetyMachine::new(1, ReleasePolicy::Unconditional);
        machine.on_frame(true, false);
        assert_eq!(machine.on_frame(false, false), Some(SafetyAction::Release));
    }

    #[test]
    fn test_release_waits_for_operative_line() {
        let mut machine = OperatorSafetyMachine::new(2, ReleasePolicy::RequireOperativeLine);
        machine.on_frame(true, false);
        machine.on_frame(false, false);
        assert_eq!(machine.on_frame(false, false), None);
        assert_eq!(machine.on_frame(false, false), None);
        assert_eq!(machine.clear_frames(), 2);
        assert_eq!(machine.on_frame(false, true), Some(SafetyAction::Release));
    }

    #[test]
    fn test_safe_without_operator_is_noop() {
        let mut machine = OperatorSafetyMachine::new(30, ReleasePolicy::Unconditional);
        for _ in 0..100 {
            assert_eq!(machine.on_frame(false, true), None);
        }
        assert!(!machine.is_isolated());
    }

    #[test]
    fn test_reconfigure_keeps_isolation() {
        let mut machine = OperatorSafetyMachine::new(30, ReleasePolicy::Unconditional);
        machine.on_frame(true, true);
        machine.reconfigure(1, ReleasePolicy::Unconditional);
        assert!(machine.is_isolated());
        assert_eq!(machine.on_frame(false, true), Some(SafetyAction::Release));
    }
}
