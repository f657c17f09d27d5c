use crate::error::{CommandRejected, ProtocolError, TransportError};
use crate::protocol::{self, COMMAND_FRAME_LEN, PERIPHERAL_NAME};
use crate::types::{ConnectionState, ScaleReading};
use embassy_time::Instant;
use log::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    PoweredOn,
    PoweredOff,
    Unauthorized,
    Unsupported,
    Resetting,
    Unknown,
}

/// Tagged events from whichever BLE binding drives the link. The manager is
/// a pure transition function over these, so bindings stay swappable and
/// tests can replay whole connection lifecycles.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    AdapterChanged(AdapterState),
    DeviceDiscovered { name: String },
    Connected,
    ConnectFailed { reason: String },
    Disconnected,
    CharacteristicDiscovered { uuid: Uuid, write: bool, notify: bool },
    SubscriptionConfirmed,
    Notification { bytes: Vec<u8>, at: Instant },
    WriteCompleted,
}

/// Side effects for the binding to carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    StartScan,
    StopScan,
    Connect,
    CancelConnect,
    DiscoverServices,
    Subscribe,
    Write([u8; COMMAND_FRAME_LEN]),
}

/// What one event produced: actions back to the binding, plus anything the
/// controller should see.
#[derive(Debug, Default)]
pub struct LinkEffects {
    pub actions: heapless::Vec<LinkAction, 4>,
    pub reading: Option<ScaleReading>,
    pub state_change: Option<ConnectionState>,
    pub error: Option<TransportError>,
}

impl LinkEffects {
    fn action(mut self, action: LinkAction) -> Self {
        let _ = self.actions.push(action);
        self
    }
}

/// Owns the connection lifecycle: Disconnected → Scanning → Connecting →
/// Connected, and back to Disconnected on any failure. No automatic
/// reconnect: after a drop, a fresh find request is required.
pub struct ConnectionManager {
    state: ConnectionState,
    write_bound: bool,
    notify_bound: bool,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            write_bound: false,
            notify_bound: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Explicit find/scan request from the user surface.
    pub fn find(&mut self) -> LinkEffects {
        match self.state {
            ConnectionState::Disconnected => {
                info!("Scanning for \"{}\"", PERIPHERAL_NAME);
                self.transition(ConnectionState::Scanning)
                    .action(LinkAction::StartScan)
            }
            state => {
                debug!("Find ignored in {:?}", state);
                LinkEffects::default()
            }
        }
    }

    /// Gate a command write on the link being ready. Callers are expected to
    /// check connection state first; this is the backstop.
    pub fn send_command(
        &self,
        frame: [u8; COMMAND_FRAME_LEN],
    ) -> Result<LinkAction, CommandRejected> {
        if self.state != ConnectionState::Connected {
            return Err(CommandRejected::NotConnected);
        }
        if !self.write_bound {
            return Err(CommandRejected::CharacteristicUnbound);
        }
        Ok(LinkAction::Write(frame))
    }

    pub fn handle_event(&mut self, event: LinkEvent) -> LinkEffects {
        match event {
            LinkEvent::AdapterChanged(adapter) => self.on_adapter_changed(adapter),
            LinkEvent::DeviceDiscovered { name } => self.on_device_discovered(&name),
            LinkEvent::Connected => self.on_connected(),
            LinkEvent::ConnectFailed { reason } => self.on_connect_failed(reason),
            LinkEvent::Disconnected => self.on_disconnected(),
            LinkEvent::CharacteristicDiscovered { uuid, write, notify } => {
                self.on_characteristic(uuid, write, notify)
            }
            LinkEvent::SubscriptionConfirmed => {
                // We report Connected on the subscribe request already; the
                // confirmation is only logged.
                debug!("Notification subscription confirmed");
                LinkEffects::default()
            }
            LinkEvent::Notification { bytes, at } => self.on_notification(&bytes, at),
            LinkEvent::WriteCompleted => {
                debug!("Command write acknowledged");
                LinkEffects::default()
            }
        }
    }

    fn on_adapter_changed(&mut self, adapter: AdapterState) -> LinkEffects {
        match adapter {
            AdapterState::PoweredOn => {
                info!("Bluetooth powered on");
                if self.state == ConnectionState::Disconnected {
                    self.find()
                } else {
                    LinkEffects::default()
                }
            }
            AdapterState::Resetting => {
                debug!("Bluetooth adapter resetting");
                LinkEffects::default()
            }
            AdapterState::PoweredOff | AdapterState::Unauthorized | AdapterState::Unsupported
            | AdapterState::Unknown => {
                warn!("Bluetooth adapter unusable: {:?}", adapter);
                let mut effects = self.drop_link();
                effects.error = Some(match adapter {
                    AdapterState::Unauthorized => TransportError::AdapterUnauthorized,
                    AdapterState::Unsupported => TransportError::AdapterUnsupported,
                    _ => TransportError::AdapterUnavailable,
                });
                effects
            }
        }
    }

    fn on_device_discovered(&mut self, name: &str) -> LinkEffects {
        if self.state != ConnectionState::Scanning {
            return LinkEffects::default();
        }
        if !name.contains(PERIPHERAL_NAME) {
            debug!("Ignoring peripheral \"{}\"", name);
            return LinkEffects::default();
        }
        info!("Discovered \"{}\", connecting", name);
        self.transition(ConnectionState::Connecting)
            .action(LinkAction::StopScan)
            .action(LinkAction::Connect)
    }

    fn on_connected(&mut self) -> LinkEffects {
        if self.state != ConnectionState::Connecting {
            debug!("Connect event in {:?} ignored", self.state);
            return LinkEffects::default();
        }
        // Stay in Connecting until the notify characteristic is bound; the
        // link is not usable before then.
        info!("Peripheral connected, discovering services");
        LinkEffects::default().action(LinkAction::DiscoverServices)
    }

    fn on_characteristic(&mut self, uuid: Uuid, write: bool, notify: bool) -> LinkEffects {
        if self.state != ConnectionState::Connecting {
            return LinkEffects::default();
        }
        let mut effects = LinkEffects::default();
        if write {
            debug!("{}: write characteristic bound", uuid);
            self.write_bound = true;
        }
        if notify {
            debug!("{}: notify characteristic bound, subscribing", uuid);
            self.notify_bound = true;
            effects = effects.action(LinkAction::Subscribe);
            // Connected is reported once the subscription is requested, not
            // once it is confirmed.
            effects.state_change = self.transition(ConnectionState::Connected).state_change;
        }
        effects
    }

    fn on_connect_failed(&mut self, reason: String) -> LinkEffects {
        warn!("Connect failed: {}", reason);
        let mut effects = self.drop_link();
        effects.error = Some(TransportError::ConnectFailed(reason));
        effects
    }

    fn on_disconnected(&mut self) -> LinkEffects {
        if self.state == ConnectionState::Disconnected {
            return LinkEffects::default();
        }
        warn!("Peripheral disconnected");
        let mut effects = self.drop_link();
        effects.error = Some(TransportError::UnexpectedDisconnect);
        effects
    }

    fn on_notification(&mut self, bytes: &[u8], at: Instant) -> LinkEffects {
        if self.state != ConnectionState::Connected || !self.notify_bound {
            return LinkEffects::default();
        }
        let mut effects = LinkEffects::default();
        match protocol::decode_notification(bytes, at.as_millis() as i64) {
            Ok(reading) => effects.reading = Some(reading),
            // Idle heartbeats and malformed frames are dropped; prior
            // telemetry stays untouched.
            Err(ProtocolError::TooShort { len }) => {
                debug!("Dropping {}-byte idle frame", len);
            }
        }
        effects
    }

    /// Tear down to Disconnected, cancelling any pending connection.
    fn drop_link(&mut self) -> LinkEffects {
        let was = self.state;
        self.write_bound = false;
        self.notify_bound = false;
        let mut effects = self.transition(ConnectionState::Disconnected);
        if was == ConnectionState::Connecting || was == ConnectionState::Connected {
            effects = effects.action(LinkAction::CancelConnect);
        }
        if was == ConnectionState::Scanning {
            effects = effects.action(LinkAction::StopScan);
        }
        effects
    }

    fn transition(&mut self, to: ConnectionState) -> LinkEffects {
        let mut effects = LinkEffects::default();
        if self.state != to {
            info!("Connection state: {:?} -> {:?}", self.state, to);
            self.state = to;
            effects.state_change = Some(to);
        }
        effects
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
