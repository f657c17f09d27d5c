use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Stopped,
    WaitingForTare,
    Running,
    Paused,
}

/// One decoded notification frame from the scale. The wire carries magnitude
/// and sign separately; they stay separate here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleReading {
    pub timestamp_ms: i64,
    pub weight_tenths: i16,
    pub is_negative: bool,
}

impl ScaleReading {
    pub fn weight_g(&self) -> f32 {
        let magnitude = self.weight_tenths as f32 / 10.0;
        if self.is_negative {
            -magnitude
        } else {
            magnitude
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilteredTelemetry {
    pub weight_g: f32,
    pub flow_rate_g_per_s: f32,
    pub measured_at_ms: i64,
}

/// Semantic commands the session layer may issue to the scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleCommand {
    Zero,
    SwitchToGrams,
    SyncTime,
}

/// Commands from whatever surface sits on top of the core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UserCommand {
    Find,
    Dose,
    Start,
    Pause,
    Resume,
    Reset,
    SetAutoStart(bool),
}

/// One chart point. Ids are v4 UUIDs so consumers can key points without
/// caring about insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub id: Uuid,
    pub t_s: f32,
    pub value_g: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemState {
    pub connection_state: ConnectionState,
    pub session_state: SessionState,
    pub weight_g: f32,
    pub flow_rate_g_per_s: f32,
    pub dose_g: f32,
    pub brew_ratio: Option<f32>,
    pub elapsed_s: f32,
    pub auto_start: bool,
    pub weight_series: Vec<Sample>,
    pub flow_series: Vec<Sample>,
    pub last_error: Option<String>,
    pub log_messages: heapless::Vec<String, 100>,
}

impl Default for SystemState {
    fn default() -> Self {
        Self {
            connection_state: ConnectionState::Disconnected,
            session_state: SessionState::Stopped,
            weight_g: 0.0,
            flow_rate_g_per_s: 0.0,
            dose_g: 0.0,
            brew_ratio: None,
            elapsed_s: 0.0,
            auto_start: false,
            weight_series: Vec::new(),
            flow_series: Vec::new(),
            last_error: None,
            log_messages: heapless::Vec::new(),
        }
    }
}

/// Residuals below this are noise, not a dose; also the wait-for-tare and
/// series-coalescing threshold.
pub const MIN_DOSE_WEIGHT_G: f32 = 0.2;
pub const SPIN_DROP_THRESHOLD_G: f32 = 1.0;
pub const SPIN_PATIENCE_SAMPLES: u8 = 5;
pub const WEIGHT_SAMPLE_INTERVAL_MS: u64 = 300;
pub const FLOW_SAMPLE_INTERVAL_MS: u64 = 1000;
pub const TARE_POLL_INTERVAL_MS: u64 = 250;
pub const MAX_COALESCED_RUN: u32 = 12;
pub const TICK_INTERVAL_MS: u64 = 100;
