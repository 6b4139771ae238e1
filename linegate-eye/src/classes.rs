//! Detector label to PLC signal mapping

use linegate_core::{LineConfig, PlcConfig, SignalClass};
use serde::Serialize;
use std::time::Duration;

/// Floor for the operator's relaxed confidence threshold
const OPERATOR_MIN_CONFIDENCE: f64 = 0.2;
const OPERATOR_CONFIDENCE_FACTOR: f64 = 0.6;

/// Resolved signal parameters for one class
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassSignal {
    pub address: Option<u16>,
    pub enabled: bool,
    pub pulse: Duration,
    pub value: u16,
    pub cooldown: Duration,
}

impl ClassSignal {
    /// Enabled and wired to a register
    pub fn is_armed(&self) -> bool {
        self.enabled && self.address.is_some()
    }
}

/// Immutable class table built from one configuration snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMap {
    plc_enabled: bool,
    signals: [ClassSignal; 7],
}

/// Negative or NaN is no cooldown; anything past the cap is clamped to it
fn cooldown(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds.min(PlcConfig::MAX_COOLDOWN_S)).unwrap_or(Duration::ZERO)
}

fn index(class: SignalClass) -> usize {
    match class {
        SignalClass::Crossing => 0,
        SignalClass::CrossingMounted => 1,
        SignalClass::Mounted => 2,
        SignalClass::Operator => 3,
        SignalClass::Broken => 4,
        SignalClass::Warp => 5,
        SignalClass::Piece => 6,
    }
}

impl ClassMap {
    pub fn from_config(config: &LineConfig) -> Self {
        let plc = &config.plc;
        let signals = SignalClass::ALL.map(|class| {
            let signal = config.signals.get(class);
            ClassSignal {
                address: signal.address,
                enabled: signal.enabled,
                pulse: Duration::from_millis(signal.pulse_ms.unwrap_or(plc.pulse_ms)),
                value: signal.pulse_value.unwrap_or(plc.pulse_value),
                cooldown: cooldown(signal.cooldown_s.unwrap_or(plc.cooldown_s)),
            }
        });

        Self {
            plc_enabled: plc.enabled,
            signals,
        }
    }

    pub fn get(&self, class: SignalClass) -> &ClassSignal {
        &self.signals[index(class)]
    }

    /// Class and signal parameters for a detector label, if the label maps to a class
    pub fn resolve(&self, label: &str) -> Option<(SignalClass, &ClassSignal)> {
        SignalClass::resolve(label).map(|class| (class, self.get(class)))
    }

    /// Signal to pulse for `class`, if the PLC and the class are both armed
    pub fn trigger_for(&self, class: SignalClass) -> Option<&ClassSignal> {
        let signal = self.get(class);
        (self.plc_enabled && signal.is_armed()).then_some(signal)
    }
}

/// Confidence threshold for a class. Operator recall matters more than its
/// precision, so it gets a relaxed threshold.
pub fn min_confidence_for(class: Option<SignalClass>, base: f64) -> f64 {
    match class {
        Some(SignalClass::Operator) => (base * OPERATOR_CONFIDENCE_FACTOR).max(OPERATOR_MIN_CONFIDENCE),
        _ => base,
    }
}
