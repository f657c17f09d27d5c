use thiserror::Error;

/// Failures of the BLE link itself. These are surfaced as a transition to
/// `ConnectionState::Disconnected` plus `last_error` in the published state,
/// never as a panic or an exception the session layer must catch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("bluetooth adapter powered off")]
    AdapterUnavailable,
    #[error("bluetooth access unauthorized")]
    AdapterUnauthorized,
    #[error("bluetooth unsupported on this host")]
    AdapterUnsupported,
    #[error("device discovery failed: {0}")]
    DiscoveryFailed(String),
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("unexpected disconnect")]
    UnexpectedDisconnect,
}

/// Per-frame decode failures. Local to the offending frame: drop it, keep
/// prior telemetry unchanged.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("notification frame too short: {len} bytes")]
    TooShort { len: usize },
}

/// A command write was attempted while the link cannot take one.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CommandRejected {
    #[error("not connected to the scale")]
    NotConnected,
    #[error("write characteristic not bound")]
    CharacteristicUnbound,
}
