use crate::types::{ScaleCommand, SessionState, MIN_DOSE_WEIGHT_G, TARE_POLL_INTERVAL_MS};
use embassy_time::{Duration, Instant};
use log::{debug, info};

/// Side effects a session transition asks the controller to perform. The
/// machine itself never touches the link or the series buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEffect {
    SendCommand(ScaleCommand),
    ClearSeries,
}

pub type SessionEffects = heapless::Vec<SessionEffect, 4>;

/// A pending wait-for-tare re-check. Owned by the machine; dropping it (on
/// pause/reset) is the cancellation, so a stale poll can never fire into a
/// newer session state.
#[derive(Debug, Clone, Copy)]
struct ScheduledPoll {
    due_at: Instant,
}

/// The one brewing session of an app run. Elapsed time is accumulated across
/// pause/resume; `run_anchor` marks the live span while Running.
#[derive(Debug, Clone)]
pub struct BrewSession {
    pub state: SessionState,
    pub dose_g: f32,
    pub auto_start: bool,
    accumulated: Duration,
    run_anchor: Option<Instant>,
}

impl BrewSession {
    fn new() -> Self {
        Self {
            state: SessionState::Stopped,
            dose_g: 0.0,
            auto_start: false,
            accumulated: Duration::from_ticks(0),
            run_anchor: None,
        }
    }

    pub fn elapsed_s(&self, now: Instant) -> f32 {
        let mut total = self.accumulated;
        if let Some(anchor) = self.run_anchor {
            total += now.saturating_duration_since(anchor);
        }
        total.as_millis() as f32 / 1000.0
    }
}

/// The brewing workflow: Stopped → (WaitingForTare →) Running → Paused.
/// Works the same in manual and auto-start mode; auto-start only changes who
/// pulls the start trigger.
pub struct SessionMachine {
    session: BrewSession,
    tare_poll: Option<ScheduledPoll>,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            session: BrewSession::new(),
            tare_poll: None,
        }
    }

    pub fn session(&self) -> &BrewSession {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn dose_g(&self) -> f32 {
        self.session.dose_g
    }

    pub fn auto_start(&self) -> bool {
        self.session.auto_start
    }

    pub fn set_auto_start(&mut self, enabled: bool) {
        info!(
            "Auto-start {}",
            if enabled { "enabled" } else { "disabled" }
        );
        self.session.auto_start = enabled;
    }

    pub fn elapsed_s(&self, now: Instant) -> f32 {
        self.session.elapsed_s(now)
    }

    /// Brew ratio "1:N" as N, once a real dose is on record.
    pub fn brew_ratio(&self, weight_g: f32) -> Option<f32> {
        if self.session.dose_g > MIN_DOSE_WEIGHT_G {
            Some(weight_g / self.session.dose_g)
        } else {
            None
        }
    }

    /// Record the dry-coffee weight and zero the scale. Only meaningful
    /// before the timer runs.
    pub fn dose(&mut self, weight_g: f32) -> SessionEffects {
        let mut effects = SessionEffects::new();
        match self.session.state {
            SessionState::Stopped | SessionState::WaitingForTare => {
                self.session.dose_g = weight_g;
                info!("Dose recorded: {:.1}g", weight_g);
                let _ = effects.push(SessionEffect::SendCommand(ScaleCommand::Zero));
            }
            state => debug!("Dose ignored in {:?}", state),
        }
        effects
    }

    /// Begin a session. Clears both chart series and re-zeroes the scale;
    /// when residual weight from the dose step is still on the platform the
    /// timer waits (WaitingForTare) until the tare takes effect.
    pub fn start(&mut self, weight_g: f32, now: Instant) -> SessionEffects {
        let mut effects = SessionEffects::new();
        if self.session.state != SessionState::Stopped {
            debug!("Start ignored in {:?}", self.session.state);
            return effects;
        }

        let _ = effects.push(SessionEffect::ClearSeries);
        let _ = effects.push(SessionEffect::SendCommand(ScaleCommand::SwitchToGrams));
        let _ = effects.push(SessionEffect::SendCommand(ScaleCommand::Zero));

        self.session.accumulated = Duration::from_ticks(0);
        self.session.run_anchor = None;

        if weight_g > MIN_DOSE_WEIGHT_G {
            info!(
                "Start with {:.1}g on the platform, waiting for tare",
                weight_g
            );
            self.session.state = SessionState::WaitingForTare;
            self.schedule_tare_poll(now);
        } else {
            self.begin_run(now);
        }
        effects
    }

    /// Valid only from Running; elapsed time freezes where it is.
    pub fn pause(&mut self, now: Instant) -> SessionEffects {
        if self.session.state == SessionState::Running {
            if let Some(anchor) = self.session.run_anchor.take() {
                self.session.accumulated += now.saturating_duration_since(anchor);
            }
            self.session.state = SessionState::Paused;
            self.tare_poll = None;
            info!("Session paused at {:.1}s", self.elapsed_s(now));
        } else {
            debug!("Pause ignored in {:?}", self.session.state);
        }
        SessionEffects::new()
    }

    /// Valid only from Paused; the timer continues where it left off.
    pub fn resume(&mut self, now: Instant) -> SessionEffects {
        if self.session.state == SessionState::Paused {
            self.session.run_anchor = Some(now);
            self.session.state = SessionState::Running;
            info!("Session resumed at {:.1}s", self.elapsed_s(now));
        } else {
            debug!("Resume ignored in {:?}", self.session.state);
        }
        SessionEffects::new()
    }

    /// Back to a clean slate from any state: dose and elapsed time zeroed,
    /// series cleared, scale re-zeroed, pending polls cancelled.
    pub fn reset(&mut self) -> SessionEffects {
        let mut effects = SessionEffects::new();
        info!("Session reset");
        self.session.state = SessionState::Stopped;
        self.session.dose_g = 0.0;
        self.session.accumulated = Duration::from_ticks(0);
        self.session.run_anchor = None;
        self.tare_poll = None;
        let _ = effects.push(SessionEffect::ClearSeries);
        let _ = effects.push(SessionEffect::SendCommand(ScaleCommand::Zero));
        effects
    }

    /// In auto-start mode the session begins on its own once a dose is on
    /// record and poured weight crosses the threshold.
    pub fn maybe_auto_start(&mut self, weight_g: f32, now: Instant) -> SessionEffects {
        if self.session.auto_start
            && self.session.state == SessionState::Stopped
            && self.session.dose_g > MIN_DOSE_WEIGHT_G
            && weight_g > MIN_DOSE_WEIGHT_G
        {
            info!("Auto-start triggered at {:.1}g", weight_g);
            return self.start(weight_g, now);
        }
        SessionEffects::new()
    }

    /// True when the wait-for-tare re-check is due.
    pub fn poll_due(&self, now: Instant) -> bool {
        matches!(self.tare_poll, Some(poll) if now >= poll.due_at)
    }

    /// One wait-for-tare re-check: stay put until the tare has taken effect,
    /// then start the timer.
    pub fn on_tare_poll(&mut self, weight_g: f32, now: Instant) -> SessionEffects {
        if self.session.state != SessionState::WaitingForTare {
            // A poll that survived a state change is stale; drop it.
            self.tare_poll = None;
            return SessionEffects::new();
        }

        if weight_g < MIN_DOSE_WEIGHT_G {
            self.tare_poll = None;
            info!("Scale settled at {:.1}g, timer starting", weight_g);
            self.begin_run(now);
        } else {
            debug!("Still {:.1}g on the platform, re-checking", weight_g);
            self.schedule_tare_poll(now);
        }
        SessionEffects::new()
    }

    fn begin_run(&mut self, now: Instant) {
        self.session.state = SessionState::Running;
        self.session.run_anchor = Some(now);
        info!("Session running");
    }

    fn schedule_tare_poll(&mut self, now: Instant) {
        self.tare_poll = Some(ScheduledPoll {
            due_at: now + Duration::from_millis(TARE_POLL_INTERVAL_MS),
        });
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserCommand;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn apply(machine: &mut SessionMachine, command: UserCommand, weight: f32, now: Instant) {
        match command {
            UserCommand::Dose => drop(machine.dose(weight)),
            UserCommand::Start => drop(machine.start(weight, now)),
            UserCommand::Pause => drop(machine.pause(now)),
            UserCommand::Resume => drop(machine.resume(now)),
            UserCommand::Reset => drop(machine.reset()),
            UserCommand::SetAutoStart(on) => machine.set_auto_start(on),
            UserCommand::Find => {}
        }
    }

    fn snapshot(machine: &SessionMachine) -> (SessionState, f32, bool) {
        (
            machine.state(),
            machine.dose_g(),
            machine.auto_start(),
        )
    }

    #[test]
    fn manual_start_at_zero_goes_straight_to_running() {
        let mut machine = SessionMachine::new();
        let effects = machine.start(0.0, at(0));
        assert_eq!(machine.state(), SessionState::Running);
        assert!(effects.contains(&SessionEffect::ClearSeries));
        assert!(effects.contains(&SessionEffect::SendCommand(ScaleCommand::SwitchToGrams)));
        assert!(effects.contains(&SessionEffect::SendCommand(ScaleCommand::Zero)));
    }

    #[test]
    fn start_with_residual_weight_waits_for_tare() {
        let mut machine = SessionMachine::new();
        machine.start(2.0, at(0));
        assert_eq!(machine.state(), SessionState::WaitingForTare);
        assert!(!machine.poll_due(at(100)));
        assert!(machine.poll_due(at(TARE_POLL_INTERVAL_MS)));

        // Weight still up: keep waiting on a fresh poll.
        machine.on_tare_poll(1.5, at(TARE_POLL_INTERVAL_MS));
        assert_eq!(machine.state(), SessionState::WaitingForTare);
        assert!(machine.poll_due(at(2 * TARE_POLL_INTERVAL_MS)));

        // Tare took effect: timer starts now, not at Start time.
        machine.on_tare_poll(0.0, at(2 * TARE_POLL_INTERVAL_MS));
        assert_eq!(machine.state(), SessionState::Running);
        assert!((machine.elapsed_s(at(2 * TARE_POLL_INTERVAL_MS + 1500)) - 1.5).abs() < 1e-3);
    }

    #[test]
    fn auto_start_needs_dose_and_weight() {
        let mut machine = SessionMachine::new();
        machine.set_auto_start(true);

        // No dose recorded yet: pouring must not start the session.
        machine.maybe_auto_start(2.0, at(0));
        assert_eq!(machine.state(), SessionState::Stopped);

        machine.dose(18.0);
        // Below threshold: still waiting for the pour.
        machine.maybe_auto_start(0.1, at(100));
        assert_eq!(machine.state(), SessionState::Stopped);

        machine.maybe_auto_start(2.0, at(200));
        assert_eq!(machine.state(), SessionState::WaitingForTare);
    }

    #[test]
    fn pause_and_resume_keep_elapsed_time() {
        let mut machine = SessionMachine::new();
        machine.start(0.0, at(0));
        machine.pause(at(4_000));
        assert_eq!(machine.state(), SessionState::Paused);
        // Paused time does not count.
        assert!((machine.elapsed_s(at(60_000)) - 4.0).abs() < 1e-3);
        machine.resume(at(60_000));
        assert!((machine.elapsed_s(at(61_000)) - 5.0).abs() < 1e-3);
    }

    #[test]
    fn disabled_commands_leave_the_session_unchanged() {
        use SessionState::*;
        use UserCommand::*;

        // Every (state, command) pair outside the enabled set must be a no-op.
        let disabled: &[(SessionState, UserCommand)] = &[
            (Stopped, Pause),
            (Stopped, Resume),
            (WaitingForTare, Start),
            (WaitingForTare, Pause),
            (WaitingForTare, Resume),
            (Running, Dose),
            (Running, Start),
            (Running, Resume),
            (Paused, Dose),
            (Paused, Start),
            (Paused, Pause),
        ];

        for &(state, command) in disabled {
            let mut machine = machine_in(state);
            let before = snapshot(&machine);
            apply(&mut machine, command, 5.0, at(10_000));
            assert_eq!(
                snapshot(&machine),
                before,
                "{:?} in {:?} must not change the session",
                command,
                state
            );
        }
    }

    fn machine_in(state: SessionState) -> SessionMachine {
        let mut machine = SessionMachine::new();
        match state {
            SessionState::Stopped => {}
            SessionState::WaitingForTare => {
                machine.start(2.0, at(0));
            }
            SessionState::Running => {
                machine.start(0.0, at(0));
            }
            SessionState::Paused => {
                machine.start(0.0, at(0));
                machine.pause(at(1_000));
            }
        }
        assert_eq!(machine.state(), state);
        machine
    }

    #[test]
    fn reset_is_idempotent_from_any_state() {
        for state in [
            SessionState::Stopped,
            SessionState::WaitingForTare,
            SessionState::Running,
            SessionState::Paused,
        ] {
            let mut machine = machine_in(state);
            let _ = machine.dose(12.0);
            let once = machine.reset();
            let after_once = snapshot(&machine);
            let twice = machine.reset();
            assert_eq!(once, twice);
            assert_eq!(snapshot(&machine), after_once);
            assert_eq!(machine.state(), SessionState::Stopped);
            assert_eq!(machine.dose_g(), 0.0);
            assert_eq!(machine.elapsed_s(at(99_000)), 0.0);
            assert!(!machine.poll_due(at(99_000)));
        }
    }

    #[test]
    fn reset_cancels_a_pending_tare_poll() {
        let mut machine = SessionMachine::new();
        machine.start(2.0, at(0));
        assert!(machine.poll_due(at(TARE_POLL_INTERVAL_MS)));
        machine.reset();
        assert!(!machine.poll_due(at(10 * TARE_POLL_INTERVAL_MS)));
        // A stale poll arriving anyway must not revive the session.
        machine.on_tare_poll(0.0, at(10 * TARE_POLL_INTERVAL_MS));
        assert_eq!(machine.state(), SessionState::Stopped);
    }

    #[test]
    fn brew_ratio_needs_a_real_dose() {
        let mut machine = SessionMachine::new();
        assert_eq!(machine.brew_ratio(30.0), None);
        machine.dose(15.0);
        assert_eq!(machine.brew_ratio(30.0), Some(2.0));
    }
}
