//! # Centronic Core Library
//!
//! Control engine for Becker roller shutters driven through the Centronic
//! USB stick (or a TCP-bridged one).
//!
//! This library provides:
//! - The Centronic frame codec with its rolling-counter scheme
//! - A reconnecting serial/socket transport to the gateway
//! - A communicator thread serializing all gateway I/O
//! - A persisted store of transmitter units and their counters
//! - The [`engine::Centronic`] command surface on top of it all
//!
//! ## Example
//!
//! ```rust,ignore
//! use centronic_core::prelude::*;
//!
//! let mut engine = Centronic::open("/dev/ttyUSB0", "centronic-stick.json", None)?;
//! engine.pair("1:1")?;
//! engine.move_down("1:1")?;
//! engine.close();
//! ```

pub mod communicator;
pub mod engine;
pub mod protocol;
pub mod store;
pub mod transport;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::communicator::{Communicator, CommunicatorConfig, FrameCallback};
    pub use crate::engine::{Centronic, EngineConfig};
    pub use crate::protocol::{Action, CentronicError, Command, ReceivedFrame};
    pub use crate::store::{Unit, UnitKey, UnitStore};
    pub use crate::transport::{DeviceKind, Transport};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
