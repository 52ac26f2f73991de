//! Control engine
//!
//! Ties the codec, unit store and communicator together into the public
//! command surface. Every operation addresses a channel as
//! `"<unit>:<channel>"` or a bare `"<channel>"` on the first unit; unit 0
//! repeats the command for every configured unit.
//!
//! Counters are committed to the store before the matching frames are
//! enqueued. A crash in between skips counter values, which receivers
//! tolerate; the opposite order could replay a counter and desynchronize the
//! pairing.

use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::{error, info, warn};

use crate::communicator::{Communicator, CommunicatorConfig, FrameCallback};
use crate::protocol::codec::{build_body, envelope, with_checksum};
use crate::protocol::{Action, CentronicError, Command, BROADCAST_CHANNEL};
use crate::store::{Unit, UnitKey, UnitStore};
use crate::transport::Transport;

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub communicator: CommunicatorConfig,
    /// HALT presses sent while a receiver is in pairing mode
    pub registration_calls: u32,
    /// Delay range between registration presses, in milliseconds
    pub registration_delay_ms: (u64, u64),
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            communicator: CommunicatorConfig::default(),
            registration_calls: 5,
            registration_delay_ms: (500, 900),
        }
    }
}

/// Becker Centronic shutter control engine
pub struct Centronic {
    communicator: Communicator,
    store: UnitStore,
    config: EngineConfig,
}

impl Centronic {
    /// Open the gateway device and the unit store with default settings.
    pub fn open(
        device: &str,
        store_path: &str,
        callback: Option<FrameCallback>,
    ) -> Result<Self, CentronicError> {
        Self::with_config(device, store_path, callback, EngineConfig::default())
    }

    pub fn with_config(
        device: &str,
        store_path: &str,
        callback: Option<FrameCallback>,
        config: EngineConfig,
    ) -> Result<Self, CentronicError> {
        let transport = Transport::new(device)?;
        Self::from_transport(transport, store_path, callback, config)
    }

    /// Build the engine on an already opened transport.
    pub fn from_transport(
        transport: Transport,
        store_path: &str,
        callback: Option<FrameCallback>,
        config: EngineConfig,
    ) -> Result<Self, CentronicError> {
        let store = UnitStore::open(store_path)?;
        let communicator = Communicator::spawn(transport, callback, config.communicator.clone())?;
        Ok(Self {
            communicator,
            store,
            config,
        })
    }

    pub fn move_up(&mut self, channel: &str) -> Result<(), CentronicError> {
        self.send(channel, Action::Up, false)
    }

    pub fn move_up_intermediate(&mut self, channel: &str) -> Result<(), CentronicError> {
        self.send(channel, Action::UpIntermediate, false)
    }

    pub fn move_down(&mut self, channel: &str) -> Result<(), CentronicError> {
        self.send(channel, Action::Down, false)
    }

    pub fn move_down_intermediate(&mut self, channel: &str) -> Result<(), CentronicError> {
        self.send(channel, Action::DownIntermediate, false)
    }

    pub fn stop(&mut self, channel: &str) -> Result<(), CentronicError> {
        self.send(channel, Action::Halt, false)
    }

    /// Pair the addressed unit with a receiver in pairing mode.
    pub fn pair(&mut self, channel: &str) -> Result<(), CentronicError> {
        self.send(channel, Action::Pair, false)
    }

    /// Clear the receiver's stored intermediate positions.
    pub fn clear_position(&mut self, channel: &str) -> Result<(), CentronicError> {
        self.send(channel, Action::ClearPosition, false)
    }

    /// Unpair the addressed unit; it becomes unconfigured afterwards.
    pub fn unpair(&mut self, channel: &str) -> Result<(), CentronicError> {
        self.send(channel, Action::Remove, false)
    }

    /// All configured units, ordered by code.
    pub fn list_units(&self) -> Vec<Unit> {
        self.store.get_configured()
    }

    pub fn format_listing(&self) -> String {
        self.store.format_listing()
    }

    pub fn add_unit(&mut self, code: &str) -> Result<(), CentronicError> {
        self.store.add_unit(code)
    }

    pub fn remove_unit(&mut self, key: &UnitKey) -> Result<(), CentronicError> {
        self.store.remove_unit(key)
    }

    /// Register a factory-fresh receiver on a never-used unit.
    ///
    /// Seeds the unit's counter with a random offset, marks it configured and
    /// then presses HALT a few times while the receiver listens for its new
    /// transmitter. The receiver latches onto the counter it hears first.
    pub fn init_unconfigured_unit(&mut self, channel: &str) -> Result<(), CentronicError> {
        let (unit_index, _) = split_channel(channel)?;
        if unit_index == 0 {
            return Err(CentronicError::InvalidChannelAddress(channel.to_string()));
        }
        let mut unit = self.store.get(&UnitKey::Index(unit_index))?;
        if unit.configured {
            warn!(unit = %unit.code, "unit already configured, skipping registration");
            return Ok(());
        }

        let (lo, hi) = self.config.registration_delay_ms;
        unit.increment = rand::thread_rng().gen_range(10..40);
        unit.configured = true;
        self.store.save(&unit, false)?;
        info!(unit = %unit.code, counter = unit.increment, "registering fresh unit");

        // Registration presses always go out on channel 1.
        let address = format!("{unit_index}:1");
        for _ in 0..self.config.registration_calls {
            let delay = rand::thread_rng().gen_range(lo..=hi);
            thread::sleep(Duration::from_millis(delay));
            self.stop(&address)?;
        }
        Ok(())
    }

    /// Execute an action on a channel address.
    ///
    /// A dry run transmits the frames as usual but rolls the counter commit
    /// back, leaving the persisted state untouched.
    pub fn send(
        &mut self,
        channel: &str,
        action: Action,
        dry_run: bool,
    ) -> Result<(), CentronicError> {
        let (unit_index, unit_channel) = split_channel(channel)?;

        if unit_index == 0 {
            let targets = self.store.get_configured();
            if targets.is_empty() {
                warn!("no configured units, nothing to send");
                return Ok(());
            }
            for unit in targets {
                self.send_to_unit(unit, unit_channel, action, dry_run)?;
            }
            return Ok(());
        }

        let unit = self.store.get(&UnitKey::Index(unit_index))?;
        self.send_to_unit(unit, unit_channel, action, dry_run)
    }

    fn send_to_unit(
        &mut self,
        mut unit: Unit,
        channel: u8,
        action: Action,
        dry_run: bool,
    ) -> Result<(), CentronicError> {
        if !unit.configured && !action.is_pairing() {
            error!(unit = %unit.code, %action, "unit not configured");
            return Err(CentronicError::UnitNotConfigured(unit.code));
        }

        let packets = self.encode_sequence(&mut unit, channel, &action.sequence())?;
        if let Some(configured) = action.configures_unit() {
            unit.configured = configured;
        }
        self.store.save(&unit, dry_run)?;
        for packet in packets {
            self.communicator.send(packet)?;
        }

        // A timed move holds the counter pen: send the move, wait, then halt.
        if let Some(secs) = action.hold_seconds() {
            thread::sleep(Duration::from_secs(secs));
            let halt = self.encode_sequence(&mut unit, channel, &[Command::Halt])?;
            self.store.save(&unit, dry_run)?;
            for packet in halt {
                self.communicator.send(packet)?;
            }
        }
        Ok(())
    }

    /// Encode one frame per opcode, advancing the unit's counter in step.
    fn encode_sequence(
        &self,
        unit: &mut Unit,
        channel: u8,
        sequence: &[Command],
    ) -> Result<Vec<Vec<u8>>, CentronicError> {
        let mut packets = Vec::with_capacity(sequence.len());
        for &command in sequence {
            let body = build_body(channel, &unit.code, unit.increment, command);
            packets.push(envelope(&with_checksum(&body)?));
            unit.increment = unit.increment.wrapping_add(1);
        }
        Ok(packets)
    }

    /// Stop the communicator and wait for queued frames to go out.
    pub fn close(mut self) {
        self.communicator.close();
    }
}

/// Parse `"<unit>:<channel>"` or a bare `"<channel>"` addressing unit 1.
fn split_channel(address: &str) -> Result<(usize, u8), CentronicError> {
    let (unit_raw, channel_raw) = match address.split_once(':') {
        Some((unit, channel)) => (unit, channel),
        None => ("1", address),
    };

    let unit: usize = unit_raw
        .trim()
        .parse()
        .map_err(|_| CentronicError::InvalidChannelAddress(address.to_string()))?;
    let channel: i64 = channel_raw
        .trim()
        .parse()
        .map_err(|_| CentronicError::InvalidChannelAddress(address.to_string()))?;

    if !(1..=7).contains(&channel) && channel != i64::from(BROADCAST_CHANNEL) {
        error!(channel, "channel out of range");
        return Err(CentronicError::InvalidChannel(channel));
    }
    Ok((unit, channel as u8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_channel_with_unit() {
        assert_eq!(split_channel("2:5").unwrap(), (2, 5));
        assert_eq!(split_channel("0:15").unwrap(), (0, 15));
    }

    #[test]
    fn test_split_channel_bare_defaults_to_unit_one() {
        assert_eq!(split_channel("3").unwrap(), (1, 3));
        assert_eq!(split_channel("15").unwrap(), (1, 15));
    }

    #[test]
    fn test_split_channel_rejects_out_of_range() {
        assert!(matches!(
            split_channel("0"),
            Err(CentronicError::InvalidChannel(0))
        ));
        assert!(matches!(
            split_channel("8"),
            Err(CentronicError::InvalidChannel(8))
        ));
        assert!(matches!(
            split_channel("1:14"),
            Err(CentronicError::InvalidChannel(14))
        ));
    }

    #[test]
    fn test_split_channel_rejects_garbage() {
        assert!(matches!(
            split_channel("-1:3"),
            Err(CentronicError::InvalidChannelAddress(_))
        ));
        assert!(matches!(
            split_channel("a:b"),
            Err(CentronicError::InvalidChannelAddress(_))
        ));
        assert!(matches!(
            split_channel(""),
            Err(CentronicError::InvalidChannelAddress(_))
        ));
    }
}
