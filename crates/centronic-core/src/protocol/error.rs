//! Protocol and engine errors

use thiserror::Error;

/// Errors surfaced by the Centronic engine and its layers
#[derive(Error, Debug)]
pub enum CentronicError {
    /// Bad device descriptor at construction time
    #[error("configuration error: {0}")]
    Configuration(String),

    /// I/O failure on the gateway link
    #[error("connection error: {0}")]
    Connection(String),

    /// Code body with the wrong length on encode
    #[error("code body must be {expected} hex characters, got {actual}")]
    BodyLength { expected: usize, actual: usize },

    /// Malformed frame content on encode
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Outbound queue saturated; the communicator has been stopped
    #[error("send queue full, communicator thread not responding")]
    QueueFull,

    /// Communicator thread already exited
    #[error("communicator thread not running")]
    NotRunning,

    /// Channel value outside 1-7 and not the broadcast channel 15
    #[error("channel must be in range 1-7 or 15, got {0}")]
    InvalidChannel(i64),

    /// Channel address string that does not parse as "<unit>:<channel>"
    #[error("invalid channel address {0:?}")]
    InvalidChannelAddress(String),

    /// No unit row for the given code or index
    #[error("unknown unit {0}")]
    UnknownUnit(String),

    /// Non-pairing command addressed to a unit that has not been paired
    #[error("unit {0} is not configured")]
    UnitNotConfigured(String),

    /// Persistence failure in the unit store
    #[error("store error: {0}")]
    Store(#[from] std::io::Error),
}
