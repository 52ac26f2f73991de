//! Centronic wire protocol
//!
//! Implements the Becker Centronic frame format used by the USB stick:
//! a fixed-width hex body carrying a per-unit rolling counter, wrapped in
//! STX/ETX markers with an additive checksum.

pub mod codec;
pub mod commands;
mod error;

pub use codec::{scan_frames, ReceivedFrame};
pub use commands::{Action, Command};
pub use error::CentronicError;

/// Frame start marker.
pub const STX: u8 = 0x02;

/// Frame end marker.
pub const ETX: u8 = 0x03;

/// Constant body prefix preceding the rolling counter (14 hex chars).
pub const CODE_PREFIX: &str = "0000000002010B";

/// Constant filler between the counter and the unit code.
pub const CODE_SUFFIX: &str = "000000";

/// Constant marker following the unit code.
pub const CODE_21: &str = "021";

/// Source marker for a hand-held remote.
pub const SOURCE_REMOTE: &str = "01";

/// Source marker for a wall-mounted sender (channel 0 only).
pub const SOURCE_WALL: &str = "00";

/// Body length in hex characters, without markers and checksum.
pub const BODY_LEN: usize = 40;

/// Complete frame length in bytes: STX + body + checksum + ETX.
pub const FRAME_LEN: usize = 1 + BODY_LEN + 2 + 1;

/// Broadcast channel value accepted by all receivers of a unit.
pub const BROADCAST_CHANNEL: u8 = 15;

/// Default device path of the Becker Centronic USB stick.
pub const DEFAULT_DEVICE: &str =
    "/dev/serial/by-id/usb-BECKER-ANTRIEBE_GmbH_CDC_RS232_v125_Centronic-if00";

/// Default TCP port for network-bridged gateways.
pub const DEFAULT_SOCKET_PORT: u16 = 5000;
