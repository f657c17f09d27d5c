use crate::error::ProtocolError;
use crate::types::{ScaleCommand, ScaleReading};
use uuid::Uuid;

/// Advertised-name substring the scanner filters on (case-sensitive).
pub const PERIPHERAL_NAME: &str = "LFSmart Scale";

// The scale exposes one vendor service with a write characteristic for
// commands and a notify characteristic for weight frames.
pub const SCALE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000fff0_0000_1000_8000_00805f9b34fb);
pub const WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x0000fff1_0000_1000_8000_00805f9b34fb);
pub const NOTIFY_CHAR_UUID: Uuid = Uuid::from_u128(0x0000fff4_0000_1000_8000_00805f9b34fb);

pub const COMMAND_FRAME_LEN: usize = 11;

pub const ZERO_COMMAND: [u8; COMMAND_FRAME_LEN] =
    [0xFD, 0x32, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xCF];
pub const GRAMS_COMMAND: [u8; COMMAND_FRAME_LEN] =
    [0xFD, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xF9];

/// Live frames are 11 bytes; a powered-but-idle scale sends 2-byte
/// heartbeats that carry no reading.
const MIN_NOTIFICATION_LEN: usize = 11;

pub fn encode_command(command: ScaleCommand) -> [u8; COMMAND_FRAME_LEN] {
    match command {
        ScaleCommand::Zero => ZERO_COMMAND,
        ScaleCommand::SwitchToGrams => GRAMS_COMMAND,
        // Observed device traffic shows the time-sync write byte-identical
        // to zeroing; kept as its own arm so callers state their intent.
        ScaleCommand::SyncTime => ZERO_COMMAND,
    }
}

/// Decode one notification frame. `at_ms` is the receive timestamp the
/// transport stamped on the frame; the scale itself sends no clock.
///
/// Weight magnitude is `(byte[4] << 8) | byte[3]` in tenths of a gram,
/// byte[5] == 1 flags a negative value. Short frames fail with `TooShort`
/// and must be treated as "no reading", never as zero weight.
pub fn decode_notification(data: &[u8], at_ms: i64) -> Result<ScaleReading, ProtocolError> {
    if data.len() < MIN_NOTIFICATION_LEN {
        return Err(ProtocolError::TooShort { len: data.len() });
    }

    let magnitude = ((data[4] as u16) << 8) | data[3] as u16;

    Ok(ScaleReading {
        timestamp_ms: at_ms,
        weight_tenths: magnitude as i16,
        is_negative: data[5] == 1,
    })
}

/// Build a notification frame as the scale would send it. The real device
/// fills the remaining bytes with model-specific data we never read.
pub fn encode_notification(weight_tenths: u16, is_negative: bool) -> [u8; 11] {
    let mut frame = [0u8; 11];
    frame[3] = (weight_tenths & 0xFF) as u8;
    frame[4] = (weight_tenths >> 8) as u8;
    frame[5] = if is_negative { 1 } else { 0 };
    frame
}
