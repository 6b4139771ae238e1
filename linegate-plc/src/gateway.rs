//! PLC signaling gateway
//!
//! The gateway owns the register transport and is the only path by which
//! anything reaches the wire. Every failure is absorbed here and turned into
//! a boolean, an `Option` or a [`PulseOutcome`]; nothing propagates to the
//! control loop.
//!
//! # Concurrency
//!
//! Single writer. Every operation takes `&mut self`, and the gateway is owned
//! by exactly one task (the control loop). Diagnostic tools must open their
//! own transport instead of sharing this one. Wrapping a gateway in a lock to
//! call it from several tasks would interleave pulses on the same register
//! and is not supported.

use crate::error::PlcError;
use crate::transport::{ModbusTcpTransport, RegisterTransport};
use linegate_core::{CameraId, PlcConfig};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Cooldown bucket: one per (camera, lower-cased label)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CooldownKey {
    pub camera: CameraId,
    pub label: String,
}

impl CooldownKey {
    pub fn new(camera: CameraId, label: &str) -> Self {
        Self {
            camera,
            label: label.to_lowercase(),
        }
    }
}

/// A request to pulse one register
#[derive(Debug, Clone, PartialEq)]
pub struct PulseRequest {
    pub address: u16,
    pub value: u16,
    /// How long the register is held at `value` before being reset to 0
    pub duration: Duration,
    pub cooldown: Duration,
    pub key: CooldownKey,
}

/// Result of a pulse attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PulseOutcome {
    /// Value written, held and reset
    Sent,
    /// Value written and held, but the reset write failed (register may still be high)
    SentReleaseFailed,
    /// First write failed; nothing recorded against the cooldown
    WriteFailed,
    NotConnected,
    SignalsDisabled,
    Isolated,
    CoolingDown,
}

impl PulseOutcome {
    /// Whether the value reached the device
    pub fn is_sent(&self) -> bool {
        matches!(self, PulseOutcome::Sent | PulseOutcome::SentReleaseFailed)
    }
}

/// Snapshot of gateway state for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    pub endpoint: String,
    pub connected: bool,
    pub isolated: bool,
    pub signals_enabled: bool,
    pub cooldown_keys: usize,
}

/// Sole owner of the PLC session
pub struct PlcGateway {
    transport: Box<dyn RegisterTransport>,
    probe_register: u16,
    enable_register: Option<u16>,
    connected: bool,
    isolated: bool,
    signals_enabled: bool,
    cooldowns: HashMap<CooldownKey, Instant>,
}

impl PlcGateway {
    /// Gateway over Modbus TCP as described by the config
    pub fn from_config(config: &PlcConfig) -> Self {
        Self::with_transport(Box::new(ModbusTcpTransport::from_config(config)), config)
    }

    pub fn with_transport(transport: Box<dyn RegisterTransport>, config: &PlcConfig) -> Self {
        Self::new(transport, config.probe_register, config.enable_register)
    }

    pub fn new(
        transport: Box<dyn RegisterTransport>,
        probe_register: u16,
        enable_register: Option<u16>,
    ) -> Self {
        Self {
            transport,
            probe_register,
            enable_register,
            connected: false,
            isolated: false,
            // No emission until the line confirms it is running
            signals_enabled: false,
            cooldowns: HashMap::new(),
        }
    }

    /// Open the session and validate it with a probe read.
    ///
    /// Returns false (and stays disconnected) on any failure; safe to retry.
    pub async fn connect(&mut self) -> bool {
        let endpoint = self.transport.endpoint();
        self.connected = false;

        if let Err(e) = self.transport.connect().await {
            warn!("PLC connect to {} failed: {}", endpoint, e);
            return false;
        }

        match self.transport.read_holding_register(self.probe_register).await {
            Ok(_) => {
                self.connected = true;
                info!("✅ PLC connected at {}", endpoint);
                true
            }
            Err(e) => {
                warn!(
                    "PLC at {} accepted the connection but probe read of register {} failed: {}",
                    endpoint, self.probe_register, e
                );
                if let Err(e) = self.transport.disconnect().await {
                    debug!("Disconnect after failed probe: {}", e);
                }
                false
            }
        }
    }

    /// Internal flag AND live transport state
    pub fn is_connected(&self) -> bool {
        self.connected && self.transport.is_connected()
    }

    pub async fn close(&mut self) {
        if let Err(e) = self.transport.disconnect().await {
            warn!("Error closing PLC session: {}", e);
        }
        if self.connected {
            info!("PLC connection closed");
        }
        self.connected = false;
    }

    /// Read a register; `None` on any failure
    pub async fn read_status_register(&mut self, address: u16) -> Option<u16> {
        if !self.is_connected() {
            return None;
        }
        match self.transport.read_holding_register(address).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Read of register {} failed: {}", address, e);
                self.reconcile_session(&e);
                None
            }
        }
    }

    /// Engage or lift operator isolation. Returns whether the state changed.
    pub fn set_isolation(&mut self, isolated: bool) -> bool {
        if self.isolated == isolated {
            return false;
        }
        self.isolated = isolated;
        if isolated {
            warn!("⚠️ Operator isolation engaged: PLC pulses blocked");
        } else {
            info!("Operator isolation lifted");
        }
        true
    }

    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    pub fn signals_enabled(&self) -> bool {
        self.signals_enabled
    }

    /// Stop all signal emission (line not operative)
    pub async fn disconnect_signal(&mut self) {
        self.signals_enabled = false;
        warn!("PLC signals disabled");
        self.write_enable_register(0).await;
    }

    /// Resume signal emission (line confirmed operative)
    pub async fn reconnect_signal(&mut self) {
        self.signals_enabled = true;
        info!("PLC signals re-enabled");
        self.write_enable_register(1).await;
    }

    async fn write_enable_register(&mut self, value: u16) {
        let Some(address) = self.enable_register else {
            return;
        };
        if !self.is_connected() {
            return;
        }
        if let Err(e) = self.transport.write_register(address, value).await {
            warn!("Failed to write {} to enable register {}: {}", value, address, e);
            self.reconcile_session(&e);
        }
    }

    /// Write `value`, hold it for the request's duration, then reset to 0.
    ///
    /// Refused without any wire I/O when disconnected, when signals are
    /// disabled, while isolated, or while the request's key is cooling down.
    /// The cooldown instant is taken before the first write and is recorded
    /// even when the reset write fails.
    pub async fn pulse(&mut self, request: &PulseRequest) -> PulseOutcome {
        if !self.is_connected() {
            debug!("Pulse to {} refused: PLC not connected", request.address);
            return PulseOutcome::NotConnected;
        }
        if !self.signals_enabled {
            debug!("Pulse to {} refused: signals disabled", request.address);
            return PulseOutcome::SignalsDisabled;
        }
        if self.isolated {
            debug!("Pulse to {} refused: operator isolation active", request.address);
            return PulseOutcome::Isolated;
        }

        let now = Instant::now();
        if let Some(last) = self.cooldowns.get(&request.key) {
            if now.duration_since(*last) < request.cooldown {
                debug!("Pulse to {} refused: {:?} cooling down", request.address, request.key);
                return PulseOutcome::CoolingDown;
            }
        }

        if let Err(e) = self.transport.write_register(request.address, request.value).await {
            error!("Pulse write {} -> register {} failed: {}", request.value, request.address, e);
            self.reconcile_session(&e);
            return PulseOutcome::WriteFailed;
        }

        tokio::time::sleep(request.duration).await;

        let released = match self.transport.write_register(request.address, 0).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Pulse reset of register {} failed, register may still read {}: {}",
                    request.address, request.value, e
                );
                self.reconcile_session(&e);
                false
            }
        };

        self.cooldowns.insert(request.key.clone(), now);

        if released {
            info!(
                "📤 Pulse {} on register {} for {} ms ({} {})",
                request.value,
                request.address,
                request.duration.as_millis(),
                request.key.camera,
                request.key.label
            );
            PulseOutcome::Sent
        } else {
            PulseOutcome::SentReleaseFailed
        }
    }

    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            endpoint: self.transport.endpoint(),
            connected: self.is_connected(),
            isolated: self.isolated,
            signals_enabled: self.signals_enabled,
            cooldown_keys: self.cooldowns.len(),
        }
    }

    /// Drop the session on errors that leave it unusable. Device exceptions keep it.
    fn reconcile_session(&mut self, err: &PlcError) {
        if self.connected && (err.is_fatal_to_session() || !self.transport.is_connected()) {
            warn!("PLC session lost");
            self.connected = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedPlc;

    fn request(address: u16) -> PulseRequest {
        PulseRequest {
            address,
            value: 1,
            duration: Duration::from_millis(300),
            cooldown: Duration::from_secs(1),
            key: CooldownKey::new(CameraId(1), "Pieza"),
        }
    }

    async fn ready_gateway(plc: &SimulatedPlc) -> PlcGateway {
        let mut gateway = PlcGateway::new(Box::new(plc.transport()), 0, None);
        assert!(gateway.connect().await);
        gateway.reconnect_signal().await;
        gateway
    }

    #[test]
    fn test_cooldown_key_lowercases() {
        assert_eq!(
            CooldownKey::new(CameraId(1), "Pieza"),
            CooldownKey::new(CameraId(1), "pieza")
        );
        assert_ne!(
            CooldownKey::new(CameraId(1), "pieza"),
            CooldownKey::new(CameraId(2), "pieza")
        );
    }

    #[tokio::test]
    async fn test_starts_fail_safe() {
        let plc = SimulatedPlc::new();
        let gateway = PlcGateway::new(Box::new(plc.transport()), 0, None);
        assert!(!gateway.is_connected());
        assert!(!gateway.signals_enabled());
        assert!(!gateway.is_isolated());
    }

    #[tokio::test]
    async fn test_connect_requires_probe() {
        let plc = SimulatedPlc::new();
        plc.fail_reads(0, true);
        let mut gateway = PlcGateway::new(Box::new(plc.transport()), 0, None);
        assert!(!gateway.connect().await);
        assert!(!gateway.is_connected());

        plc.fail_reads(0, false);
        assert!(gateway.connect().await);
        assert!(gateway.is_connected());
    }

    #[tokio::test]
    async fn test_connect_unreachable() {
        let plc = SimulatedPlc::new();
        plc.set_reachable(false);
        let mut gateway = PlcGateway::new(Box::new(plc.transport()), 0, None);
        assert!(!gateway.connect().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulse_writes_value_then_zero() {
        let plc = SimulatedPlc::new();
        let mut gateway = ready_gateway(&plc).await;

        assert_eq!(gateway.pulse(&request(22007)).await, PulseOutcome::Sent);

        let writes = plc.writes_to(22007);
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].value, 1);
        assert_eq!(writes[1].value, 0);
        assert!(writes[1].at - writes[0].at >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_pulse_refusals_do_no_io() {
        let plc = SimulatedPlc::new();
        let mut gateway = PlcGateway::new(Box::new(plc.transport()), 0, None);
        assert_eq!(gateway.pulse(&request(22001)).await, PulseOutcome::NotConnected);

        assert!(gateway.connect().await);
        assert_eq!(gateway.pulse(&request(22001)).await, PulseOutcome::SignalsDisabled);

        gateway.reconnect_signal().await;
        gateway.set_isolation(true);
        assert_eq!(gateway.pulse(&request(22001)).await, PulseOutcome::Isolated);

        assert!(plc.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_per_key() {
        let plc = SimulatedPlc::new();
        let mut gateway = ready_gateway(&plc).await;

        assert!(gateway.pulse(&request(22007)).await.is_sent());
        assert_eq!(gateway.pulse(&request(22007)).await, PulseOutcome::CoolingDown);

        let mut other_camera = request(22007);
        other_camera.key = CooldownKey::new(CameraId(2), "Pieza");
        assert!(gateway.pulse(&other_camera).await.is_sent());
        assert_eq!(gateway.status().cooldown_keys, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_failure_still_records_cooldown() {
        let plc = SimulatedPlc::new();
        let mut gateway = ready_gateway(&plc).await;
        plc.fail_resets(22005, true);

        let req = request(22005);
        let outcome = gateway.pulse(&req).await;
        assert_eq!(outcome, PulseOutcome::SentReleaseFailed);
        assert!(outcome.is_sent());
        assert_eq!(plc.register(22005), 1);
        assert!(gateway.is_connected());

        plc.fail_resets(22005, false);
        assert_eq!(gateway.pulse(&req).await, PulseOutcome::CoolingDown);
    }

    #[tokio::test]
    async fn test_write_failure_records_no_cooldown() {
        let plc = SimulatedPlc::new();
        let mut gateway = ready_gateway(&plc).await;
        plc.fail_writes(22001, true);

        let mut req = request(22001);
        req.duration = Duration::ZERO;
        assert_eq!(gateway.pulse(&req).await, PulseOutcome::WriteFailed);
        assert_eq!(gateway.status().cooldown_keys, 0);

        plc.fail_writes(22001, false);
        assert_eq!(gateway.pulse(&req).await, PulseOutcome::Sent);
    }

    #[tokio::test]
    async fn test_lost_session_is_detected() {
        let plc = SimulatedPlc::new();
        let mut gateway = ready_gateway(&plc).await;
        plc.set_reachable(false);

        assert_eq!(gateway.read_status_register(10204).await, None);
        assert!(!gateway.is_connected());
        assert_eq!(gateway.pulse(&request(22001)).await, PulseOutcome::NotConnected);
    }

    #[tokio::test]
    async fn test_device_exception_keeps_session() {
        let plc = SimulatedPlc::new();
        let mut gateway = ready_gateway(&plc).await;
        plc.fail_reads(10204, true);

        assert_eq!(gateway.read_status_register(10204).await, None);
        assert!(gateway.is_connected());

        plc.fail_reads(10204, false);
        plc.set_register(10204, 1);
        assert_eq!(gateway.read_status_register(10204).await, Some(1));
    }

    #[tokio::test]
    async fn test_isolation_reports_changes_only() {
        let plc = SimulatedPlc::new();
        let mut gateway = PlcGateway::new(Box::new(plc.transport()), 0, None);
        assert!(gateway.set_isolation(true));
        assert!(!gateway.set_isolation(true));
        assert!(gateway.set_isolation(false));
        assert!(!gateway.set_isolation(false));
    }

    #[tokio::test]
    async fn test_enable_register_mirrors_signals() {
        let plc = SimulatedPlc::new();
        let mut gateway = PlcGateway::new(Box::new(plc.transport()), 0, Some(30000));

        // Not connected: flag flips, nothing is written
        gateway.reconnect_signal().await;
        assert!(gateway.signals_enabled());
        assert!(plc.writes().is_empty());

        assert!(gateway.connect().await);
        gateway.disconnect_signal().await;
        assert_eq!(plc.register(30000), 0);
        gateway.reconnect_signal().await;
        assert_eq!(plc.register(30000), 1);
        assert_eq!(plc.writes_to(30000).len(), 2);
    }

    #[tokio::test]
    async fn test_read_status_register() {
        let plc = SimulatedPlc::new();
        plc.set_register(10204, 1);
        let mut gateway = PlcGateway::new(Box::new(plc.transport()), 0, None);
        assert_eq!(gateway.read_status_register(10204).await, None);

        assert!(gateway.connect().await);
        assert_eq!(gateway.read_status_register(10204).await, Some(1));

        plc.fail_reads(10204, true);
        assert_eq!(gateway.read_status_register(10204).await, None);
        assert!(gateway.is_connected());
    }

    #[tokio::test]
    async fn test_close() {
        let plc = SimulatedPlc::new();
        let mut gateway = ready_gateway(&plc).await;
        gateway.close().await;
        assert!(!gateway.is_connected());
        assert!(!gateway.status().connected);
    }
}
