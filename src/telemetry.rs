use crate::types::{
    FilteredTelemetry, ScaleReading, SPIN_DROP_THRESHOLD_G, SPIN_PATIENCE_SAMPLES,
};
use log::debug;

/// Tuning for the spurious-reset guard. Count-based patience: a sharp drop
/// is held for up to `spin_patience_samples` consecutive readings, then
/// accepted so the engine can never go permanently stale.
#[derive(Debug, Clone, Copy)]
pub struct TelemetryConfig {
    pub spin_drop_threshold_g: f32,
    pub spin_patience_samples: u8,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            spin_drop_threshold_g: SPIN_DROP_THRESHOLD_G,
            spin_patience_samples: SPIN_PATIENCE_SAMPLES,
        }
    }
}

/// Turns the raw reading stream into stable weight and flow-rate values.
///
/// Some scales momentarily report a lower or garbage value while their
/// internals re-settle ("spin"); the guard holds the last accepted weight
/// through such dips so charts never jump backward mid-pour.
pub struct TelemetryEngine {
    config: TelemetryConfig,
    last_weight_g: Option<f32>,
    last_timestamp_ms: Option<i64>,
    held_samples: u8,
    expect_tare_remaining: u8,
}

impl TelemetryEngine {
    pub fn new() -> Self {
        Self::with_config(TelemetryConfig::default())
    }

    pub fn with_config(config: TelemetryConfig) -> Self {
        Self {
            config,
            last_weight_g: None,
            last_timestamp_ms: None,
            held_samples: 0,
            expect_tare_remaining: 0,
        }
    }

    /// A zero command is in flight: the next big drop is commanded, not scale
    /// spin, and must pass the guard. The expectation expires after the
    /// patience-window worth of samples.
    pub fn expect_tare(&mut self) {
        self.expect_tare_remaining = self.config.spin_patience_samples;
    }

    /// Process one valid reading. Always produces a telemetry value; the
    /// held/accepted decision only affects which weight it carries.
    pub fn process(&mut self, reading: &ScaleReading) -> FilteredTelemetry {
        let raw_g = reading.weight_g();
        let expecting_tare = self.expect_tare_remaining > 0;
        if expecting_tare {
            self.expect_tare_remaining -= 1;
        }

        let weight_g = match self.last_weight_g {
            Some(last) if raw_g < last - self.config.spin_drop_threshold_g => {
                if expecting_tare {
                    self.expect_tare_remaining = 0;
                    self.held_samples = 0;
                    raw_g
                } else if self.held_samples < self.config.spin_patience_samples {
                    self.held_samples += 1;
                    debug!(
                        "Holding weight {:.1}g through dip to {:.1}g ({}/{})",
                        last, raw_g, self.held_samples, self.config.spin_patience_samples
                    );
                    last
                } else {
                    self.held_samples = 0;
                    raw_g
                }
            }
            _ => {
                self.held_samples = 0;
                raw_g
            }
        };

        let flow_rate_g_per_s = match (self.last_weight_g, self.last_timestamp_ms) {
            (Some(last_w), Some(last_ts)) if reading.timestamp_ms > last_ts => {
                let dt_ms = (reading.timestamp_ms - last_ts) as f32;
                let flow = 1000.0 * (weight_g - last_w) / dt_ms;
                // A negative instantaneous delta is noise, not a pour.
                flow.max(0.0)
            }
            _ => 0.0,
        };

        self.last_weight_g = Some(weight_g);
        self.last_timestamp_ms = Some(reading.timestamp_ms);

        FilteredTelemetry {
            weight_g,
            flow_rate_g_per_s,
            measured_at_ms: reading.timestamp_ms,
        }
    }

    pub fn reset(&mut self) {
        self.last_weight_g = None;
        self.last_timestamp_ms = None;
        self.held_samples = 0;
        self.expect_tare_remaining = 0;
    }
}

impl Default for TelemetryEngine {
    fn default() -> Self {
        Self::new()
    }
}
