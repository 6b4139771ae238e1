//! Status events published by the control loop

use chrono::{DateTime, Utc};
use linegate_core::{CameraId, SignalClass};
use linegate_eye::CameraStatus;
use linegate_plc::PulseOutcome;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControlEvent {
    Started {
        session: Uuid,
        at: DateTime<Utc>,
        cameras: usize,
    },
    Camera(CameraStatus),
    PlcConnected {
        endpoint: String,
    },
    PlcDisconnected {
        endpoint: String,
    },
    SignalsEnabled,
    SignalsDisabled,
    IsolationEngaged,
    IsolationReleased,
    Pulse {
        class: SignalClass,
        camera: CameraId,
        address: u16,
        outcome: PulseOutcome,
    },
    BrokenPieces {
        camera: CameraId,
        count: usize,
    },
    ConfigReloaded,
    Stopped {
        session: Uuid,
    },
}

/// Lossy fan-out of [`ControlEvent`]s. Slow subscribers miss events,
/// the control loop never waits for them.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ControlEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers; returns how many received it
    pub fn emit(&self, event: ControlEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}
