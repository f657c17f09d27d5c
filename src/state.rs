use crate::types::{ConnectionState, Sample, SessionState, SystemState};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use log::{debug, info};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Guards the published snapshot. Every mutation happens through a typed
/// updater and holds the lock for that single update only, so observers
/// always see monotonically fresher state.
pub struct StateManager {
    state: Arc<Mutex<CriticalSectionRawMutex, SystemState>>,
    log_seq: AtomicU32,
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SystemState::default())),
            log_seq: AtomicU32::new(0),
        }
    }

    pub fn get_state_handle(&self) -> Arc<Mutex<CriticalSectionRawMutex, SystemState>> {
        Arc::clone(&self.state)
    }

    pub async fn snapshot(&self) -> SystemState {
        self.state.lock().await.clone()
    }

    pub async fn update_connection_state(&self, connection_state: ConnectionState) {
        let mut state = self.state.lock().await;
        if state.connection_state != connection_state {
            info!(
                "Connection state changed: {:?} -> {:?}",
                state.connection_state, connection_state
            );
            state.connection_state = connection_state;
            self.add_log_message(&mut state, format!("Scale: {:?}", connection_state));
        }
    }

    pub async fn update_session_state(&self, session_state: SessionState) {
        let mut state = self.state.lock().await;
        if state.session_state != session_state {
            info!(
                "Session state changed: {:?} -> {:?}",
                state.session_state, session_state
            );
            state.session_state = session_state;
            self.add_log_message(&mut state, format!("Session: {:?}", session_state));
        }
    }

    pub async fn update_telemetry(&self, weight_g: f32, flow_rate_g_per_s: f32) {
        let mut state = self.state.lock().await;
        state.weight_g = weight_g;
        state.flow_rate_g_per_s = flow_rate_g_per_s;
    }

    pub async fn update_dose(&self, dose_g: f32) {
        let mut state = self.state.lock().await;
        if state.dose_g != dose_g {
            state.dose_g = dose_g;
            self.add_log_message(&mut state, format!("Dose: {:.1}g", dose_g));
        }
    }

    pub async fn update_timer(&self, elapsed_s: f32, brew_ratio: Option<f32>) {
        let mut state = self.state.lock().await;
        state.elapsed_s = elapsed_s;
        state.brew_ratio = brew_ratio;
    }

    pub async fn set_auto_start(&self, enabled: bool) {
        let mut state = self.state.lock().await;
        if state.auto_start != enabled {
            state.auto_start = enabled;
            self.add_log_message(
                &mut state,
                format!("Auto-start: {}", if enabled { "on" } else { "off" }),
            );
        }
    }

    pub async fn push_weight_sample(&self, sample: Sample) {
        let mut state = self.state.lock().await;
        state.weight_series.push(sample);
    }

    pub async fn push_flow_sample(&self, sample: Sample) {
        let mut state = self.state.lock().await;
        state.flow_series.push(sample);
    }

    pub async fn clear_series(&self) {
        let mut state = self.state.lock().await;
        state.weight_series.clear();
        state.flow_series.clear();
        debug!("Chart series cleared");
    }

    pub async fn set_error(&self, error: Option<String>) {
        let mut state = self.state.lock().await;
        state.last_error = error.clone();
        if let Some(err) = error {
            self.add_log_message(&mut state, format!("ERROR: {}", err));
        }
    }

    pub async fn add_log(&self, message: String) {
        let mut state = self.state.lock().await;
        self.add_log_message(&mut state, message);
    }

    fn add_log_message(&self, state: &mut SystemState, message: String) {
        let seq = self.log_seq.fetch_add(1, Ordering::Relaxed);
        let entry = format!("[{}] {}", seq, message);

        if state.log_messages.len() >= state.log_messages.capacity() {
            state.log_messages.remove(0);
        }
        let _ = state.log_messages.push(entry);
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}
