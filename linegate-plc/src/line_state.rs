//! Line-state re-engage debounce
//!
//! Output is cut on the first poll that does not report the chain as
//! operative, and restored only after `required_good_polls` consecutive
//! operative polls. Any bad poll during the countdown restarts it.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinePhase {
    /// Chain operative, signals enabled
    ConnectedOk,
    /// Chain down, signals disabled, nothing counted
    AwaitingGoodChain,
    /// Chain back, counting consecutive operative polls
    Reconnecting { good_polls: u32 },
}

/// Side effect the caller must apply to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LineAction {
    DisableSignals,
    EnableSignals,
}

/// Pure transition for one poll. `required` is treated as at least 1.
pub fn transition(phase: LinePhase, operative: bool, required: u32) -> (LinePhase, Option<LineAction>) {
    let required = required.max(1);

    if !operative {
        return match phase {
            LinePhase::ConnectedOk => (LinePhase::AwaitingGoodChain, Some(LineAction::DisableSignals)),
            LinePhase::AwaitingGoodChain | LinePhase::Reconnecting { .. } => (LinePhase::AwaitingGoodChain, None),
        };
    }

    let good_polls = match phase {
        LinePhase::ConnectedOk => return (LinePhase::ConnectedOk, None),
        LinePhase::AwaitingGoodChain => 1,
        LinePhase::Reconnecting { good_polls } => good_polls.saturating_add(1),
    };

    if good_polls >= required {
        (LinePhase::ConnectedOk, Some(LineAction::EnableSignals))
    } else {
        (LinePhase::Reconnecting { good_polls }, None)
    }
}

/// Line-state machine driven by the status register poll
#[derive(Debug, Clone)]
pub struct LineStateMachine {
    phase: LinePhase,
    required_good_polls: u32,
    chain_operative: bool,
}

impl LineStateMachine {
    /// Starts in [`LinePhase::AwaitingGoodChain`]: signals start disabled, so
    /// the first enable needs the full debounce window too.
    pub fn new(required_good_polls: u32) -> Self {
        Self {
            phase: LinePhase::AwaitingGoodChain,
            required_good_polls: required_good_polls.max(1),
            chain_operative: false,
        }
    }

    /// Feed one poll. An unreadable register counts as not operative.
    pub fn on_poll(&mut self, operative: bool) -> Option<LineAction> {
        self.chain_operative = operative;
        let (phase, action) = transition(self.phase, operative, self.required_good_polls);
        self.phase = phase;
        action
    }

    /// Feed a raw register reading
    pub fn on_reading(&mut self, reading: Option<u16>, operative_value: u16) -> Option<LineAction> {
        self.on_poll(reading == Some(operative_value))
    }

    pub fn phase(&self) -> LinePhase {
        self.phase
    }

    /// Result of the latest poll
    pub fn is_chain_operative(&self) -> bool {
        self.chain_operative
    }

    pub fn good_poll_count(&self) -> u32 {
        match self.phase {
            LinePhase::Reconnecting { good_polls } => good_polls,
            _ => 0,
        }
    }

    pub fn required_good_polls(&self) -> u32 {
        self.required_good_polls
    }

    /// Back to the initial phase (used when the gateway is recreated)
    pub fn reset(&mut self, required_good_polls: u32) {
        *self = Self::new(required_good_polls);
    }
}
