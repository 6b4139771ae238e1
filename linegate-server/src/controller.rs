//! The control loop
//!
//! One task owns the [`PlcGateway`], the detector and both debounce
//! machines. Every tick it takes the newest frame of each camera, maps its
//! detections to pulses, advances operator safety and, on its own interval,
//! polls the line-status register.

use crate::events::{ControlEvent, EventBus};
use chrono::Utc;
use linegate_core::{CameraId, LineConfig, PlcConfig, SignalClass};
use linegate_eye::{
    CameraManager, CameraStatus, Detector, DetectionHistory, DetectionMapper, FrameAnalysis, HistoryStats,
    LatestFrame, TriggerRequest,
};
use linegate_plc::{
    CooldownKey, GatewayStatus, LineAction, LinePhase, LineStateMachine, ModbusTcpTransport, OperatorSafetyMachine,
    PlcGateway, PulseOutcome, PulseRequest, RegisterTransport, SafetyAction, SafetyPhase,
};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Builds the register transport for a PLC configuration. Called again on
/// every configuration reload.
pub type TransportFactory = Box<dyn Fn(&PlcConfig) -> Box<dyn RegisterTransport> + Send>;

/// Modbus TCP transports, the production default
pub fn modbus_transports() -> TransportFactory {
    Box::new(|config: &PlcConfig| Box::new(ModbusTcpTransport::from_config(config)) as Box<dyn RegisterTransport>)
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub frames: usize,
    pub detections: usize,
    pub operator_seen: bool,
    pub pulses: Vec<(SignalClass, PulseOutcome)>,
    pub line_polled: bool,
}

/// Running totals since start
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub ticks: u64,
    pub frames: u64,
    pub detections: u64,
    pub pulses_sent: u64,
    pub pulses_refused: u64,
    pub pulses_failed: u64,
}

pub struct ControlLoop {
    config: LineConfig,
    session: Uuid,
    detector: Box<dyn Detector>,
    mapper: DetectionMapper,
    history: DetectionHistory,
    gateway: PlcGateway,
    transports: TransportFactory,
    line: LineStateMachine,
    safety: OperatorSafetyMachine,
    cameras: Vec<(CameraId, LatestFrame)>,
    camera_manager: Option<CameraManager>,
    camera_status: Option<broadcast::Receiver<CameraStatus>>,
    events: EventBus,
    was_connected: bool,
    last_poll: Option<Instant>,
    last_reconnect: Option<Instant>,
    stats: LoopStats,
}

impl ControlLoop {
    pub fn new(config: LineConfig, detector: Box<dyn Detector>, transports: TransportFactory, events: EventBus) -> Self {
        let gateway = PlcGateway::with_transport(transports(&config.plc), &config.plc);
        Self {
            mapper: DetectionMapper::from_config(&config),
            history: DetectionHistory::new(config.detection.history_capacity),
            line: LineStateMachine::new(config.line.required_good_polls),
            safety: OperatorSafetyMachine::new(
                config.operator.required_safe_frames,
                config.operator.release_policy,
            ),
            session: Uuid::new_v4(),
            detector,
            gateway,
            transports,
            cameras: Vec::new(),
            camera_manager: None,
            camera_status: None,
            events,
            was_connected: false,
            last_poll: None,
            last_reconnect: None,
            stats: LoopStats::default(),
            config,
        }
    }

    /// Take over running camera producers; they are stopped on shutdown
    pub fn attach_cameras(&mut self, manager: CameraManager) {
        self.cameras.extend(manager.slots());
        self.camera_status = Some(manager.subscribe());
        self.camera_manager = Some(manager);
    }

    /// Read frames from a slot fed by someone else
    pub fn add_frame_slot(&mut self, camera: CameraId, slot: LatestFrame) {
        self.cameras.push((camera, slot));
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    pub fn config(&self) -> &LineConfig {
        &self.config
    }

    pub fn gateway_status(&self) -> GatewayStatus {
        self.gateway.status()
    }

    pub fn line_phase(&self) -> LinePhase {
        self.line.phase()
    }

    pub fn safety_phase(&self) -> SafetyPhase {
        self.safety.phase()
    }

    pub fn history_stats(&self) -> HistoryStats {
        self.history.stats()
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub async fn tick(&mut self) -> TickReport {
        self.forward_camera_status();
        self.stats.ticks += 1;

        let mut report = TickReport::default();
        let frames: Vec<_> = self.cameras.iter().filter_map(|(_, slot)| slot.take()).collect();

        for frame in frames {
            let raw = match self.detector.detect(&frame) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("{} detector {} failed on frame {}: {}", frame.camera, self.detector.name(), frame.sequence, e);
                    Vec::new()
                }
            };

            let analysis = self.mapper.analyze(&frame, raw);
            report.frames += 1;
            report.detections += analysis.detections.len();
            report.operator_seen |= analysis.operator_detected;
            self.record(&analysis);

            for trigger in &analysis.triggers {
                let outcome = self.gateway.pulse(&pulse_request(trigger)).await;
                self.count_pulse(trigger, outcome);
                report.pulses.push((trigger.class, outcome));
            }
        }

        if report.frames > 0 {
            self.stats.frames += report.frames as u64;
            self.stats.detections += report.detections as u64;
            let action = self.safety.on_frame(report.operator_seen, self.line.is_chain_operative());
            self.apply_safety(action);
        }

        report.line_polled = self.poll_line().await;
        report
    }

    fn record(&mut self, analysis: &FrameAnalysis) {
        for detection in analysis.countable() {
            self.history.record(detection);
        }
        if analysis.broken_count > 0 {
            self.events.emit(ControlEvent::BrokenPieces {
                camera: analysis.camera,
                count: analysis.broken_count,
            });
        }
    }

    fn count_pulse(&mut self, trigger: &TriggerRequest, outcome: PulseOutcome) {
        match outcome {
            PulseOutcome::Sent => self.stats.pulses_sent += 1,
            PulseOutcome::SentReleaseFailed | PulseOutcome::WriteFailed => self.stats.pulses_failed += 1,
            _ => self.stats.pulses_refused += 1,
        }
        self.events.emit(ControlEvent::Pulse {
            class: trigger.class,
            camera: trigger.camera,
            address: trigger.address,
            outcome,
        });
    }

    fn apply_safety(&mut self, action: Option<SafetyAction>) {
        match action {
            Some(SafetyAction::Isolate) => {
                if self.gateway.set_isolation(true) {
                    self.events.emit(ControlEvent::IsolationEngaged);
                }
            }
            Some(SafetyAction::Release) => {
                if self.gateway.set_isolation(false) {
                    self.events.emit(ControlEvent::IsolationReleased);
                }
            }
            None => {}
        }
    }

    /// Poll the line-status register if the poll interval has elapsed.
    /// A disconnected PLC counts as a bad poll.
    async fn poll_line(&mut self) -> bool {
        if !self.config.plc.enabled {
            return false;
        }

        let now = Instant::now();
        if let Some(last) = self.last_poll {
            if now.duration_since(last) < self.config.line.poll_interval() {
                return false;
            }
        }
        self.last_poll = Some(now);

        if !self.gateway.is_connected() {
            self.try_reconnect(now).await;
        }

        let reading = self.gateway.read_status_register(self.config.line.status_register).await;
        self.note_connection();

        match self.line.on_reading(reading, self.config.line.operative_value) {
            Some(LineAction::DisableSignals) => {
                self.gateway.disconnect_signal().await;
                self.events.emit(ControlEvent::SignalsDisabled);
            }
            Some(LineAction::EnableSignals) => {
                self.gateway.reconnect_signal().await;
                self.events.emit(ControlEvent::SignalsEnabled);
            }
            None => {}
        }
        true
    }

    async fn try_reconnect(&mut self, now: Instant) {
        if let Some(last) = self.last_reconnect {
            if now.duration_since(last) < self.config.plc.reconnect_interval() {
                return;
            }
        }
        self.last_reconnect = Some(now);
        debug!("Connecting to PLC at {}", self.config.plc.endpoint());
        self.gateway.connect().await;
    }

    fn note_connection(&mut self) {
        let connected = self.gateway.is_connected();
        if connected == self.was_connected {
            return;
        }
        self.was_connected = connected;
        let endpoint = self.gateway.status().endpoint;
        self.events.emit(if connected {
            ControlEvent::PlcConnected { endpoint }
        } else {
            ControlEvent::PlcDisconnected { endpoint }
        });
    }

    fn forward_camera_status(&mut self) {
        let Some(rx) = self.camera_status.as_mut() else {
            return;
        };
        loop {
            match rx.try_recv() {
                Ok(status) => {
                    self.events.emit(ControlEvent::Camera(status));
                }
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    debug!("Missed {} camera status updates", missed);
                }
                Err(_) => break,
            }
        }
    }

    /// Replace the configuration wholesale.
    ///
    /// The gateway is rebuilt (signals disabled until the line proves
    /// operative again), operator isolation carries over, and the mapper,
    /// history size and machine parameters follow the new values. Camera
    /// sources keep running as they are.
    pub async fn apply_config(&mut self, config: LineConfig) {
        let isolated = self.gateway.is_isolated();
        self.gateway.close().await;
        self.note_connection();

        self.gateway = PlcGateway::with_transport((self.transports)(&config.plc), &config.plc);
        self.gateway.set_isolation(isolated);

        self.mapper = DetectionMapper::from_config(&config);
        if config.detection.history_capacity != self.history.capacity() {
            self.history = DetectionHistory::new(config.detection.history_capacity);
        }
        self.line.reset(config.line.required_good_polls);
        self.safety
            .reconfigure(config.operator.required_safe_frames, config.operator.release_policy);
        self.last_poll = None;
        self.last_reconnect = None;
        self.config = config;

        info!("Configuration applied");
        self.events.emit(ControlEvent::ConfigReloaded);
    }

    /// Tick until `shutdown` flips to true (or its sender goes away), then
    /// stop the cameras and close the PLC session.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>, mut reloads: mpsc::Receiver<LineConfig>) -> LoopStats {
        let mut ticker = tokio::time::interval(self.config.control.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reload_open = true;

        info!(
            "🚀 Control loop {} started: {} camera(s), tick {:?}, detector {}",
            self.session,
            self.cameras.len(),
            self.config.control.tick_interval(),
            self.detector.name()
        );
        self.events.emit(ControlEvent::Started {
            session: self.session,
            at: Utc::now(),
            cameras: self.cameras.len(),
        });

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                reload = reloads.recv(), if reload_open => match reload {
                    Some(config) => self.apply_config(config).await,
                    None => reload_open = false,
                },
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        self.shutdown().await;
        self.stats
    }

    async fn shutdown(&mut self) {
        info!("Stopping control loop {}", self.session);
        if let Some(mut manager) = self.camera_manager.take() {
            let aborted = manager.stop(self.config.control.shutdown_timeout()).await;
            if aborted > 0 {
                warn!("{} camera producer(s) aborted at shutdown", aborted);
            }
        }
        self.forward_camera_status();
        self.gateway.close().await;
        self.note_connection();
        info!(
            "Control loop stopped after {} ticks: {} frames, {} pulses sent, {} refused, {} failed",
            self.stats.ticks, self.stats.frames, self.stats.pulses_sent, self.stats.pulses_refused, self.stats.pulses_failed
        );
        self.events.emit(ControlEvent::Stopped { session: self.session });
    }
}

fn pulse_request(trigger: &TriggerRequest) -> PulseRequest {
    PulseRequest {
        address: trigger.address,
        value: trigger.value,
        duration: trigger.duration,
        cooldown: trigger.cooldown,
        key: CooldownKey::new(trigger.camera, &trigger.cooldown_label),
    }
}
