use crate::{
    ble::{ConnectionManager, LinkAction, LinkEffects, LinkEvent},
    protocol,
    series::{FlowSeries, WeightSeries},
    session::{SessionEffect, SessionEffects, SessionMachine},
    state::StateManager,
    telemetry::TelemetryEngine,
    types::{
        ConnectionState, FilteredTelemetry, ScaleCommand, ScaleReading, SessionState, UserCommand,
        FLOW_SAMPLE_INTERVAL_MS, TICK_INTERVAL_MS, WEIGHT_SAMPLE_INTERVAL_MS,
    },
};
use embassy_futures::select::{select3, Either3};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::{Duration, Instant, Timer};
use log::{debug, info, warn};
use std::sync::Arc;

pub type LinkEventChannel = Channel<CriticalSectionRawMutex, LinkEvent, 32>;
pub type LinkActionChannel = Channel<CriticalSectionRawMutex, LinkAction, 16>;
pub type UserCommandChannel = Channel<CriticalSectionRawMutex, UserCommand, 8>;

/// Wires the components together and runs the single logical event sequence:
/// link events, user commands and the periodic tick all serialize through
/// one select loop, so no two handlers ever race on session or telemetry
/// state.
pub struct BrewController {
    state_manager: Arc<StateManager>,
    connection: ConnectionManager,
    telemetry: TelemetryEngine,
    session: SessionMachine,
    weight_series: WeightSeries,
    flow_series: FlowSeries,

    link_event_channel: Arc<LinkEventChannel>,
    link_action_channel: Arc<LinkActionChannel>,
    user_command_channel: Arc<UserCommandChannel>,

    last_telemetry: Option<FilteredTelemetry>,
    last_weight_sample_at: Option<Instant>,
    last_flow_sample_at: Option<Instant>,
}

impl BrewController {
    pub fn new(
        link_event_channel: Arc<LinkEventChannel>,
        link_action_channel: Arc<LinkActionChannel>,
        user_command_channel: Arc<UserCommandChannel>,
        state_manager: Arc<StateManager>,
    ) -> Self {
        Self {
            state_manager,
            connection: ConnectionManager::new(),
            telemetry: TelemetryEngine::new(),
            session: SessionMachine::new(),
            weight_series: WeightSeries::new(),
            flow_series: FlowSeries::new(),

            link_event_channel,
            link_action_channel,
            user_command_channel,

            last_telemetry: None,
            last_weight_sample_at: None,
            last_flow_sample_at: None,
        }
    }

    pub async fn run(&mut self) {
        info!("Starting brew controller loop");

        let link_events = Arc::clone(&self.link_event_channel);
        let user_commands = Arc::clone(&self.user_command_channel);

        loop {
            let link_event_fut = link_events.receive();
            let user_command_fut = user_commands.receive();
            let tick = Timer::after(Duration::from_millis(TICK_INTERVAL_MS));

            match select3(link_event_fut, user_command_fut, tick).await {
                Either3::First(event) => self.handle_link_event(event).await,
                Either3::Second(command) => self.handle_user_command(command).await,
                Either3::Third(_) => self.periodic_tick().await,
            }
        }
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        let effects = self.connection.handle_event(event);
        self.apply_link_effects(effects).await;
    }

    async fn apply_link_effects(&mut self, effects: LinkEffects) {
        for action in &effects.actions {
            self.link_action_channel.send(*action).await;
        }

        if let Some(state) = effects.state_change {
            self.state_manager.update_connection_state(state).await;
            match state {
                ConnectionState::Connected => self.state_manager.set_error(None).await,
                ConnectionState::Disconnected => {
                    // The platform may change while the link is down; a fresh
                    // link gets a fresh filter baseline.
                    self.telemetry.reset();
                    self.last_telemetry = None;
                }
                _ => {}
            }
        }

        if let Some(error) = effects.error {
            self.state_manager.set_error(Some(error.to_string())).await;
        }

        if let Some(reading) = effects.reading {
            self.handle_reading(reading).await;
        }
    }

    async fn handle_reading(&mut self, reading: ScaleReading) {
        let telemetry = self.telemetry.process(&reading);
        debug!(
            "Telemetry: {:.1}g, {:.2}g/s",
            telemetry.weight_g, telemetry.flow_rate_g_per_s
        );
        self.last_telemetry = Some(telemetry);
        self.state_manager
            .update_telemetry(telemetry.weight_g, telemetry.flow_rate_g_per_s)
            .await;

        let now = Instant::now();
        let effects = self.session.maybe_auto_start(telemetry.weight_g, now);
        self.apply_session_effects(effects).await;
        self.publish_session(now).await;
    }

    async fn handle_user_command(&mut self, command: UserCommand) {
        debug!("User command: {:?}", command);
        let now = Instant::now();
        let weight = self.current_weight();

        let effects = match command {
            UserCommand::Find => {
                let effects = self.connection.find();
                self.apply_link_effects(effects).await;
                SessionEffects::new()
            }
            UserCommand::Dose => self.session.dose(weight),
            UserCommand::Start => self.session.start(weight, now),
            UserCommand::Pause => self.session.pause(now),
            UserCommand::Resume => self.session.resume(now),
            UserCommand::Reset => self.session.reset(),
            UserCommand::SetAutoStart(enabled) => {
                self.session.set_auto_start(enabled);
                SessionEffects::new()
            }
        };

        self.apply_session_effects(effects).await;
        self.publish_session(now).await;
    }

    async fn apply_session_effects(&mut self, effects: SessionEffects) {
        for effect in &effects {
            match effect {
                SessionEffect::SendCommand(command) => {
                    let frame = protocol::encode_command(*command);
                    match self.connection.send_command(frame) {
                        Ok(action) => {
                            if matches!(command, ScaleCommand::Zero | ScaleCommand::SyncTime) {
                                // The resulting drop is commanded, not spin.
                                self.telemetry.expect_tare();
                            }
                            self.link_action_channel.send(action).await;
                        }
                        Err(rejected) => {
                            // Best-effort contract: callers gate on connection
                            // state, so a rejection is logged and dropped.
                            warn!("{:?} not sent: {}", command, rejected);
                            self.state_manager
                                .add_log(format!("Command dropped: {}", rejected))
                                .await;
                        }
                    }
                }
                SessionEffect::ClearSeries => {
                    self.weight_series.clear();
                    self.flow_series.clear();
                    self.last_weight_sample_at = None;
                    self.last_flow_sample_at = None;
                    self.state_manager.clear_series().await;
                }
            }
        }
    }

    async fn periodic_tick(&mut self) {
        let now = Instant::now();
        let weight = self.current_weight();

        if self.session.poll_due(now) {
            let effects = self.session.on_tare_poll(weight, now);
            self.apply_session_effects(effects).await;
        }

        if self.session.state() == SessionState::Running {
            self.sample_series(now, weight).await;
        }

        self.publish_session(now).await;
    }

    /// The two chart producers run on their own intervals off the shared
    /// tick: weight sub-second, flow slower.
    async fn sample_series(&mut self, now: Instant, weight: f32) {
        let weight_due = self.last_weight_sample_at.map_or(true, |at| {
            now.saturating_duration_since(at) >= Duration::from_millis(WEIGHT_SAMPLE_INTERVAL_MS)
        });
        if weight_due {
            self.last_weight_sample_at = Some(now);
            let t_s = self.session.elapsed_s(now);
            if let Some(sample) = self.weight_series.record(t_s, weight) {
                self.state_manager.push_weight_sample(sample).await;
            }
        }

        let flow_due = self.last_flow_sample_at.map_or(true, |at| {
            now.saturating_duration_since(at) >= Duration::from_millis(FLOW_SAMPLE_INTERVAL_MS)
        });
        if flow_due {
            self.last_flow_sample_at = Some(now);
            let t_s = self.session.elapsed_s(now);
            let sample = self.flow_series.record(t_s, self.current_flow());
            self.state_manager.push_flow_sample(sample).await;
        }
    }

    async fn publish_session(&mut self, now: Instant) {
        self.state_manager
            .update_session_state(self.session.state())
            .await;
        self.state_manager.update_dose(self.session.dose_g()).await;
        self.state_manager
            .set_auto_start(self.session.auto_start())
            .await;
        self.state_manager
            .update_timer(
                self.session.elapsed_s(now),
                self.session.brew_ratio(self.current_weight()),
            )
            .await;
    }

    fn current_weight(&self) -> f32 {
        self.last_telemetry.map(|t| t.weight_g).unwrap_or(0.0)
    }

    fn current_flow(&self) -> f32 {
        self.last_telemetry
            .map(|t| t.flow_rate_g_per_s)
            .unwrap_or(0.0)
    }
}
