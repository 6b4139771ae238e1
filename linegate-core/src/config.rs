// Typed configuration for the line controller

use crate::error::{Error, Result};
use crate::types::{CameraId, LengthUnit, SignalClass};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// PLC connection and pulse defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlcConfig {
    /// Master switch; when false no pulse is ever requested
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub connect_timeout_ms: u64,
    /// Timeout applied to every register read/write
    pub io_timeout_ms: u64,
    /// Register read right after connecting to prove the device answers
    pub probe_register: u16,
    /// Optional register mirroring the global signal enable (1 = enabled)
    pub enable_register: Option<u16>,
    pub pulse_ms: u64,
    pub pulse_value: u16,
    pub cooldown_s: f64,
    /// Minimum spacing between reconnect attempts while disconnected
    pub reconnect_interval_ms: u64,
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "192.168.10.50".to_string(),
            port: 502,
            unit_id: 1,
            connect_timeout_ms: 2500,
            io_timeout_ms: 1000,
            probe_register: 0,
            enable_register: None,
            pulse_ms: 300,
            pulse_value: 1,
            cooldown_s: 1.0,
            reconnect_interval_ms: 5000,
        }
    }
}

impl PlcConfig {
    /// Longest accepted cooldown, global or per class
    pub const MAX_COOLDOWN_S: f64 = 3600.0;

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

/// Register wiring for one signal class. Unset overrides use the PLC defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SignalConfig {
    pub address: Option<u16>,
    pub enabled: bool,
    pub pulse_ms: Option<u64>,
    pub pulse_value: Option<u16>,
    pub cooldown_s: Option<f64>,
}

impl SignalConfig {
    pub fn wired(address: u16, enabled: bool) -> Self {
        Self {
            address: Some(address),
            enabled,
            ..Self::default()
        }
    }
}

/// One entry per signal class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalsConfig {
    pub crossing: SignalConfig,
    pub crossing_mounted: SignalConfig,
    pub mounted: SignalConfig,
    pub operator: SignalConfig,
    pub broken: SignalConfig,
    pub warp: SignalConfig,
    pub piece: SignalConfig,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            crossing: SignalConfig::wired(22001, true),
            crossing_mounted: SignalConfig::wired(22002, true),
            mounted: SignalConfig::wired(22003, false),
            operator: SignalConfig::wired(22004, true),
            broken: SignalConfig::wired(22005, true),
            warp: SignalConfig::wired(22006, false),
            piece: SignalConfig::wired(22007, false),
        }
    }
}

impl SignalsConfig {
    pub fn get(&self, class: SignalClass) -> &SignalConfig {
        match class {
            SignalClass::Crossing => &self.crossing,
            SignalClass::CrossingMounted => &self.crossing_mounted,
            SignalClass::Mounted => &self.mounted,
            SignalClass::Operator => &self.operator,
            SignalClass::Broken => &self.broken,
            SignalClass::Warp => &self.warp,
            SignalClass::Piece => &self.piece,
        }
    }

    fn get_mut(&mut self, class: SignalClass) -> &mut SignalConfig {
        match class {
            SignalClass::Crossing => &mut self.crossing,
            SignalClass::CrossingMounted => &mut self.crossing_mounted,
            SignalClass::Mounted => &mut self.mounted,
            SignalClass::Operator => &mut self.operator,
            SignalClass::Broken => &mut self.broken,
            SignalClass::Warp => &mut self.warp,
            SignalClass::Piece => &mut self.piece,
        }
    }
}

/// Detection filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Base confidence threshold (0, 1]
    pub min_confidence: f64,
    /// Detection history ring buffer size
    pub history_capacity: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.70,
            history_capacity: 100,
        }
    }
}

/// Physical measurement of pieces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    pub enabled: bool,
    pub units: LengthUnit,
    /// Expected piece length, used to tell the length axis from the width axis
    pub reference_length_mm: f64,
    pub min_piece_length_mm: f64,
    pub detect_broken: bool,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            units: LengthUnit::Mm,
            reference_length_mm: 4000.0,
            min_piece_length_mm: 50.0,
            detect_broken: true,
        }
    }
}

/// Line-status register polling and re-enable debounce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineStatusConfig {
    pub status_register: u16,
    /// Register value meaning "chain operative"
    pub operative_value: u16,
    pub required_good_polls: u32,
    pub poll_interval_ms: u64,
}

impl Default for LineStatusConfig {
    fn default() -> Self {
        Self {
            status_register: 10204,
            operative_value: 1,
            required_good_polls: 10,
            poll_interval_ms: 1000,
        }
    }
}

impl LineStatusConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// What must hold before operator isolation is lifted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePolicy {
    /// Release after the clear-frame window regardless of line state
    #[default]
    Unconditional,
    /// Additionally wait until the chain is reported operative
    RequireOperativeLine,
}

/// Operator isolation debounce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub required_safe_frames: u32,
    pub release_policy: ReleasePolicy,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            required_safe_frames: 30,
            release_policy: ReleasePolicy::Unconditional,
        }
    }
}

/// Control loop timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub tick_interval_ms: u64,
    /// Bound on joining camera producers at shutdown
    pub shutdown_timeout_ms: u64,
    pub event_capacity: usize,
    /// How often the config file is checked for changes
    pub reload_check_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 33,
            shutdown_timeout_ms: 2000,
            event_capacity: 256,
            reload_check_ms: 2000,
        }
    }
}

impl ControlConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn reload_check(&self) -> Duration {
        Duration::from_millis(self.reload_check_ms)
    }
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn valid_cooldown(seconds: f64) -> bool {
    seconds.is_finite() && (0.0..=PlcConfig::MAX_COOLDOWN_S).contains(&seconds)
}

fn default_fps() -> f64 {
    30.0
}

fn default_http_timeout_ms() -> u64 {
    2000
}

/// Where a camera's frames come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Blank frames at a fixed cadence, for dry runs against recorded detections
    Replay {
        #[serde(default = "default_width")]
        width: u32,
        #[serde(default = "default_height")]
        height: u32,
        #[serde(default = "default_fps")]
        fps: f64,
    },
    /// JPEG snapshots fetched over HTTP (IP cameras)
    HttpSnapshot {
        url: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
        #[serde(default = "default_fps")]
        fps: f64,
        #[serde(default = "default_http_timeout_ms")]
        timeout_ms: u64,
    },
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Replay {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
        }
    }
}

impl SourceConfig {
    /// Slowest accepted frame rate (one frame every 100 s)
    pub const MIN_FPS: f64 = 0.01;

    pub fn fps(&self) -> f64 {
        match self {
            SourceConfig::Replay { fps, .. } | SourceConfig::HttpSnapshot { fps, .. } => *fps,
        }
    }

    fn fps_mut(&mut self) -> &mut f64 {
        match self {
            SourceConfig::Replay { fps, .. } | SourceConfig::HttpSnapshot { fps, .. } => fps,
        }
    }
}

/// Region of interest. A polygon with at least three points wins over the band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiConfig {
    /// Band width as a fraction of frame width
    pub scale: f64,
    /// Band center offset from the frame center, as a fraction of frame width
    pub offset: f64,
    /// Optional polygon in frame pixels
    pub polygon: Vec<[f64; 2]>,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            scale: 0.40,
            offset: 0.0,
            polygon: Vec::new(),
        }
    }
}

impl RoiConfig {
    pub const MIN_SCALE: f64 = 0.10;
    pub const MAX_SCALE: f64 = 0.90;
    pub const MAX_OFFSET: f64 = 0.45;
}

/// One camera on the line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub id: CameraId,
    #[serde(default)]
    pub source: SourceConfig,
    /// Calibration factor in pixels per millimetre; non-positive disables conversion
    #[serde(default = "default_scale")]
    pub scale_px_per_mm: f64,
    #[serde(default)]
    pub roi: RoiConfig,
    /// Whether detections on this camera may pulse the PLC (default: primary only)
    #[serde(default)]
    pub trigger_plc: Option<bool>,
    /// Whether pieces on this camera are measured (default: primary only)
    #[serde(default)]
    pub measure: Option<bool>,
    /// Whether detections on this camera go to the history (default: primary only)
    #[serde(default)]
    pub count_history: Option<bool>,
}

fn default_scale() -> f64 {
    1.0
}

impl CameraConfig {
    pub fn new(id: CameraId) -> Self {
        Self {
            id,
            source: SourceConfig::default(),
            scale_px_per_mm: default_scale(),
            roi: RoiConfig::default(),
            trigger_plc: None,
            measure: None,
            count_history: None,
        }
    }

    pub fn triggers_plc(&self) -> bool {
        self.trigger_plc.unwrap_or(self.id.is_primary())
    }

    pub fn measures(&self) -> bool {
        self.measure.unwrap_or(self.id.is_primary())
    }

    pub fn counts_history(&self) -> bool {
        self.count_history.unwrap_or(self.id.is_primary())
    }
}

/// Complete line configuration. Replaced wholesale on reload, never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineConfig {
    pub plc: PlcConfig,
    pub signals: SignalsConfig,
    pub detection: DetectionConfig,
    pub measurement: MeasurementConfig,
    pub line: LineStatusConfig,
    pub operator: OperatorConfig,
    pub control: ControlConfig,
    pub cameras: Vec<CameraConfig>,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            plc: PlcConfig::default(),
            signals: SignalsConfig::default(),
            detection: DetectionConfig::default(),
            measurement: MeasurementConfig::default(),
            line: LineStatusConfig::default(),
            operator: OperatorConfig::default(),
            control: ControlConfig::default(),
            cameras: vec![CameraConfig::new(CameraId::PRIMARY)],
        }
    }
}

impl LineConfig {
    /// Default config file location (`<config dir>/linegate/linegate.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("linegate").join("linegate.toml"))
    }

    /// Load configuration from a JSON or TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_str(&content)
    }

    /// Parse configuration, trying JSON first and TOML second
    pub fn from_str(content: &str) -> Result<Self> {
        let json_err = match serde_json::from_str::<LineConfig>(content) {
            Ok(config) => return Ok(config),
            Err(e) => e,
        };

        match toml::from_str::<LineConfig>(content) {
            Ok(config) => Ok(config),
            Err(toml_err) => Err(Error::Parse(format!(
                "not valid JSON ({}) nor TOML ({})",
                json_err,
                toml_err.to_string().trim()
            ))),
        }
    }

    /// Load, override from the environment and sanitize. Never fails: an
    /// unreadable or unparsable file yields the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let resolved = path.map(Path::to_path_buf).or_else(Self::default_path);

        let mut config = match resolved {
            Some(ref path) if path.exists() => match Self::from_file(path) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Failed to load {}: {}; using defaults", path.display(), e);
                    Self::default()
                }
            },
            Some(ref path) => {
                info!("No configuration at {}; using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        for issue in config.sanitize() {
            warn!("Configuration: {}", issue);
        }
        config
    }

    /// Apply `LINEGATE_*` overrides through the given lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("LINEGATE_PLC_HOST") {
            self.plc.host = host;
        }
        if let Some(port) = lookup("LINEGATE_PLC_PORT").and_then(|p| p.parse().ok()) {
            self.plc.port = port;
        }
        if let Some(unit) = lookup("LINEGATE_PLC_UNIT_ID").and_then(|u| u.parse().ok()) {
            self.plc.unit_id = unit;
        }
        if let Some(enabled) = lookup("LINEGATE_PLC_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.plc.enabled = true,
                "0" | "false" | "no" | "off" => self.plc.enabled = false,
                _ => {}
            }
        }
    }

    /// Reset invalid fields to their defaults, returning a description of each fix
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut issues = Vec::new();
        let plc_defaults = PlcConfig::default();

        if self.plc.host.trim().is_empty() {
            issues.push("plc.host is empty".to_string());
            self.plc.host = plc_defaults.host.clone();
        }
        if self.plc.port == 0 {
            issues.push("plc.port must be non-zero".to_string());
            self.plc.port = plc_defaults.port;
        }
        if self.plc.connect_timeout_ms == 0 {
            issues.push("plc.connect_timeout_ms must be positive".to_string());
            self.plc.connect_timeout_ms = plc_defaults.connect_timeout_ms;
        }
        if self.plc.io_timeout_ms == 0 {
            issues.push("plc.io_timeout_ms must be positive".to_string());
            self.plc.io_timeout_ms = plc_defaults.io_timeout_ms;
        }
        if !valid_cooldown(self.plc.cooldown_s) {
            issues.push(format!("plc.cooldown_s {} is invalid", self.plc.cooldown_s));
            self.plc.cooldown_s = plc_defaults.cooldown_s;
        }

        for class in SignalClass::ALL {
            let signal = self.signals.get_mut(class);
            if let Some(cooldown) = signal.cooldown_s {
                if !valid_cooldown(cooldown) {
                    issues.push(format!("cooldown override for {} is invalid", class));
                    signal.cooldown_s = None;
                }
            }
            if signal.enabled && signal.address.is_none() {
                issues.push(format!("{} is enabled but has no address", class));
            }
        }

        let detection_defaults = DetectionConfig::default();
        let confidence = self.detection.min_confidence;
        if !(confidence.is_finite() && confidence > 0.0 && confidence <= 1.0) {
            issues.push(format!("detection.min_confidence {} outside (0, 1]", confidence));
            self.detection.min_confidence = detection_defaults.min_confidence;
        }
        if self.detection.history_capacity == 0 {
            issues.push("detection.history_capacity must be at least 1".to_string());
            self.detection.history_capacity = detection_defaults.history_capacity;
        }

        let measurement_defaults = MeasurementConfig::default();
        if !(self.measurement.reference_length_mm.is_finite() && self.measurement.reference_length_mm > 0.0) {
            issues.push("measurement.reference_length_mm must be positive".to_string());
            self.measurement.reference_length_mm = measurement_defaults.reference_length_mm;
        }
        if !(self.measurement.min_piece_length_mm.is_finite() && self.measurement.min_piece_length_mm >= 0.0) {
            issues.push("measurement.min_piece_length_mm must be non-negative".to_string());
            self.measurement.min_piece_length_mm = measurement_defaults.min_piece_length_mm;
        }

        if self.line.required_good_polls == 0 {
            issues.push("line.required_good_polls must be at least 1".to_string());
            self.line.required_good_polls = 1;
        }
        if self.line.poll_interval_ms == 0 {
            issues.push("line.poll_interval_ms must be positive".to_string());
            self.line.poll_interval_ms = LineStatusConfig::default().poll_interval_ms;
        }
        if self.operator.required_safe_frames == 0 {
            issues.push("operator.required_safe_frames must be at least 1".to_string());
            self.operator.required_safe_frames = 1;
        }

        let control_defaults = ControlConfig::default();
        if self.control.tick_interval_ms == 0 {
            issues.push("control.tick_interval_ms must be positive".to_string());
            self.control.tick_interval_ms = control_defaults.tick_interval_ms;
        }
        if self.control.event_capacity == 0 {
            issues.push("control.event_capacity must be at least 1".to_string());
            self.control.event_capacity = control_defaults.event_capacity;
        }
        if self.control.reload_check_ms == 0 {
            issues.push("control.reload_check_ms must be positive".to_string());
            self.control.reload_check_ms = control_defaults.reload_check_ms;
        }

        let mut seen = Vec::new();
        self.cameras.retain(|camera| {
            if seen.contains(&camera.id) {
                issues.push(format!("duplicate camera {} ignored", camera.id));
                false
            } else {
                seen.push(camera.id);
                true
            }
        });
        if self.cameras.is_empty() {
            issues.push("no cameras configured; using the default camera".to_string());
            self.cameras.push(CameraConfig::new(CameraId::PRIMARY));
        }

        for camera in &mut self.cameras {
            if !camera.scale_px_per_mm.is_finite() {
                issues.push(format!("{} scale_px_per_mm is not finite", camera.id));
                camera.scale_px_per_mm = default_scale();
            }
            let fps = camera.source.fps_mut();
            if !(fps.is_finite() && *fps >= SourceConfig::MIN_FPS) {
                issues.push(format!("{} source fps {} below {}", camera.id, fps, SourceConfig::MIN_FPS));
                *fps = default_fps();
            }

            let roi = &mut camera.roi;
            if !roi.scale.is_finite() {
                roi.scale = RoiConfig::default().scale;
            }
            if !roi.offset.is_finite() {
                roi.offset = 0.0;
            }
            let scale = roi.scale.clamp(RoiConfig::MIN_SCALE, RoiConfig::MAX_SCALE);
            let offset = roi.offset.clamp(-RoiConfig::MAX_OFFSET, RoiConfig::MAX_OFFSET);
            if scale != roi.scale || offset != roi.offset {
                issues.push(format!("{} ROI band clamped to scale {} offset {}", camera.id, scale, offset));
                roi.scale = scale;
                roi.offset = offset;
            }
            if !roi.polygon.is_empty() && roi.polygon.len() < 3 {
                issues.push(format!("{} ROI polygon needs at least 3 points; using band", camera.id));
                roi.polygon.clear();
            }
        }

        issues
    }

    /// Sanitized copy plus the list of fixes applied
    pub fn sanitized(mut self) -> (Self, Vec<String>) {
        let issues = self.sanitize();
        (self, issues)
    }
}
