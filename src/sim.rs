//! Scripted stand-in for a real BLE binding. Plays the scale's side of the
//! link protocol so the demo binary and integration runs exercise the full
//! event path without hardware.

use crate::ble::{AdapterState, LinkAction, LinkEvent};
use crate::controller::{LinkActionChannel, LinkEventChannel};
use crate::protocol::{
    encode_notification, GRAMS_COMMAND, NOTIFY_CHAR_UUID, WRITE_CHAR_UUID, ZERO_COMMAND,
};
use embassy_futures::select::{select, Either};
use embassy_sync::channel::TrySendError;
use embassy_time::{Duration, Instant, Timer};
use log::{debug, info, warn};
use std::sync::Arc;

const NOTIFY_INTERVAL_MS: u64 = 100;

// Scripted pour: the dose lands on the platform early and holds; a single
// drip then crosses the auto-start threshold (and settles, so the
// wait-for-tare poll can complete) before the continuous pour begins. One
// deliberate garbage dip mid-pour exercises the telemetry spin guard end to
// end.
const DOSE_PLACED_AT_S: f32 = 2.0;
const DOSE_G: f32 = 18.0;
const DRIP_AT_S: f32 = 10.0;
const DRIP_G: f32 = 0.3;
const POUR_START_S: f32 = 12.0;
const POUR_RATE_G_PER_S: f32 = 3.5;
const POUR_TOTAL_G: f32 = 180.0;
const SPIN_DIP_AT_S: f32 = 20.0;
const SPIN_DIP_LEN_S: f32 = 0.3;

pub struct ScaleSimulator {
    events: Arc<LinkEventChannel>,
    actions: Arc<LinkActionChannel>,
    subscribed: bool,
    tare_offset_g: f32,
    started_at: Option<Instant>,
}

impl ScaleSimulator {
    pub fn new(events: Arc<LinkEventChannel>, actions: Arc<LinkActionChannel>) -> Self {
        Self {
            events,
            actions,
            subscribed: false,
            tare_offset_g: 0.0,
            started_at: None,
        }
    }

    pub async fn run(mut self) {
        info!("Simulated scale starting");
        Timer::after(Duration::from_millis(50)).await;
        self.send(LinkEvent::AdapterChanged(AdapterState::PoweredOn))
            .await;

        loop {
            let action_fut = self.actions.receive();
            let tick = Timer::after(Duration::from_millis(NOTIFY_INTERVAL_MS));

            match select(action_fut, tick).await {
                Either::First(action) => self.handle_action(action).await,
                Either::Second(_) => self.notify_tick().await,
            }
        }
    }

    async fn handle_action(&mut self, action: LinkAction) {
        debug!("Sim link action: {:?}", action);
        match action {
            LinkAction::StartScan => {
                self.send(LinkEvent::DeviceDiscovered {
                    name: "LFSmart Scale 1.2".into(),
                })
                .await;
            }
            LinkAction::StopScan => {}
            LinkAction::Connect => {
                self.send(LinkEvent::Connected).await;
            }
            LinkAction::CancelConnect => {
                self.subscribed = false;
                self.started_at = None;
            }
            LinkAction::DiscoverServices => {
                self.send(LinkEvent::CharacteristicDiscovered {
                    uuid: WRITE_CHAR_UUID,
                    write: true,
                    notify: false,
                })
                .await;
                self.send(LinkEvent::CharacteristicDiscovered {
                    uuid: NOTIFY_CHAR_UUID,
                    write: false,
                    notify: true,
                })
                .await;
            }
            LinkAction::Subscribe => {
                self.subscribed = true;
                self.started_at = Some(Instant::now());
                self.send(LinkEvent::SubscriptionConfirmed).await;
            }
            LinkAction::Write(frame) => {
                if frame == ZERO_COMMAND {
                    let elapsed = self.elapsed_s();
                    self.tare_offset_g = self.platform_weight_g(elapsed);
                    info!("Sim scale tared at {:.1}g", self.tare_offset_g);
                } else if frame == GRAMS_COMMAND {
                    debug!("Sim scale switched to grams");
                } else {
                    warn!("Sim scale ignoring unknown command frame");
                }
                self.send(LinkEvent::WriteCompleted).await;
            }
        }
    }

    async fn notify_tick(&mut self) {
        if !self.subscribed {
            return;
        }

        let elapsed = self.elapsed_s();

        // A powered-but-idle scale sends two-byte heartbeats; the first
        // second after subscribing mimics that.
        if elapsed < 1.0 {
            self.send(LinkEvent::Notification {
                bytes: vec![0x00, 0x00],
                at: Instant::now(),
            })
            .await;
            return;
        }

        let displayed = self.displayed_weight_g(elapsed);
        let tenths = (displayed.abs() * 10.0).round() as u16;
        self.send(LinkEvent::Notification {
            bytes: encode_notification(tenths, displayed < 0.0).to_vec(),
            at: Instant::now(),
        })
        .await;
    }

    fn elapsed_s(&self) -> f32 {
        self.started_at
            .map(|at| Instant::now().saturating_duration_since(at).as_millis() as f32 / 1000.0)
            .unwrap_or(0.0)
    }

    fn displayed_weight_g(&self, elapsed_s: f32) -> f32 {
        let weight = self.platform_weight_g(elapsed_s) - self.tare_offset_g;
        // Mid-pour garbage dip, as some scales emit while re-settling.
        if (SPIN_DIP_AT_S..SPIN_DIP_AT_S + SPIN_DIP_LEN_S).contains(&elapsed_s) {
            weight * 0.1
        } else {
            weight
        }
    }

    /// Physical weight on the platform, before taring.
    fn platform_weight_g(&self, elapsed_s: f32) -> f32 {
        let mut weight = 0.0;
        if elapsed_s >= DOSE_PLACED_AT_S {
            weight += DOSE_G;
        }
        if elapsed_s >= DRIP_AT_S {
            weight += DRIP_G;
        }
        if elapsed_s >= POUR_START_S {
            let poured = (elapsed_s - POUR_START_S) * POUR_RATE_G_PER_S;
            weight += poured.min(POUR_TOTAL_G);
        }
        weight
    }

    async fn send(&self, event: LinkEvent) {
        // The controller drains quickly; a full channel here means it is
        // wedged, which the demo should surface rather than hide.
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            warn!("Link event channel full, waiting");
            self.events.send(event).await;
        }
    }
}
