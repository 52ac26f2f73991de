//! Protocol commands
//!
//! Defines the Centronic opcodes and the user-level actions built from them.
//! Graduated variants simulate a button held through its press stages.

use std::fmt;
use std::str::FromStr;

use super::CentronicError;

/// Centronic command opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Stop movement
    Halt,
    /// Move up
    Up,
    /// Move up (graduated press stages)
    Up2,
    Up3,
    Up4,
    /// Intermediate position "up"
    UpIntermediate,
    /// Move down
    Down,
    /// Move down (graduated press stages)
    Down2,
    Down3,
    Down4,
    /// Intermediate position "down" (sun protection)
    DownIntermediate,
    /// Pair button press
    Pair,
    /// Pair button held for 3 seconds
    Pair2,
    /// Pair button held for 6 seconds
    Pair3,
    /// Pair button held for 10 seconds
    Pair4,
    /// Clear stored intermediate positions
    ClearPos,
    ClearPos2,
    ClearPos3,
    ClearPos4,
    /// Button release
    Release,
}

impl Command {
    /// Wire opcode embedded in the frame body
    pub fn opcode(self) -> u8 {
        match self {
            Command::Halt => 0x10,
            Command::Up => 0x20,
            Command::Up2 => 0x21,
            Command::Up3 => 0x22,
            Command::Up4 => 0x23,
            Command::UpIntermediate => 0x24,
            Command::Down => 0x40,
            Command::Down2 => 0x41,
            Command::Down3 => 0x42,
            Command::Down4 => 0x43,
            Command::DownIntermediate => 0x44,
            Command::Pair => 0x80,
            Command::Pair2 => 0x81,
            Command::Pair3 => 0x82,
            Command::Pair4 => 0x83,
            Command::ClearPos => 0x90,
            Command::ClearPos2 => 0x91,
            Command::ClearPos3 => 0x92,
            Command::ClearPos4 => 0x93,
            Command::Release => 0x00,
        }
    }
}

/// A user-level action addressed to a channel
///
/// Each action expands to an ordered opcode sequence; every opcode in the
/// sequence consumes one increment of the target unit's rolling counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Move up
    Up,
    /// Move to the intermediate "up" position
    UpIntermediate,
    /// Move down
    Down,
    /// Move to the intermediate "down" position
    DownIntermediate,
    /// Stop movement
    Halt,
    /// Pair the stick with a receiver listening on the channel
    Pair,
    /// Clear the stored intermediate positions
    ClearPosition,
    /// Unpair the stick from the receiver; the unit becomes unconfigured
    Remove,
    /// Move up for the given number of seconds, then halt
    UpFor(u64),
    /// Move down for the given number of seconds, then halt
    DownFor(u64),
}

impl Action {
    /// Opcode sequence for this action
    ///
    /// Timed moves return only the initial move opcode; the trailing HALT is
    /// issued by the engine after the hold interval.
    pub fn sequence(&self) -> Vec<Command> {
        match self {
            Action::Up => vec![Command::Up],
            Action::UpIntermediate => vec![Command::UpIntermediate],
            Action::Down => vec![Command::Down],
            Action::DownIntermediate => vec![Command::DownIntermediate],
            Action::Halt => vec![Command::Halt],
            Action::Pair => vec![Command::Pair2, Command::Pair2],
            Action::ClearPosition => vec![
                Command::Pair,
                Command::ClearPos,
                Command::ClearPos2,
                Command::ClearPos3,
                Command::ClearPos4,
            ],
            Action::Remove => vec![
                Command::Pair2,
                Command::Pair2,
                Command::Pair3,
                Command::Pair4,
            ],
            Action::UpFor(_) => vec![Command::Up],
            Action::DownFor(_) => vec![Command::Down],
        }
    }

    /// Whether this action is a pairing request, which may address a unit
    /// that is not yet configured
    pub fn is_pairing(&self) -> bool {
        matches!(self, Action::Pair)
    }

    /// Configured-flag transition performed by this action, if any
    pub fn configures_unit(&self) -> Option<bool> {
        match self {
            Action::Pair => Some(true),
            Action::Remove => Some(false),
            _ => None,
        }
    }

    /// Hold interval of a timed move
    pub fn hold_seconds(&self) -> Option<u64> {
        match self {
            Action::UpFor(secs) | Action::DownFor(secs) => Some(*secs),
            _ => None,
        }
    }
}

impl FromStr for Action {
    type Err = CentronicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Timed moves: "UP:<seconds>" / "DOWN:<seconds>"
        if let Some((dir, secs)) = s.split_once(':') {
            let secs: u64 = secs
                .parse()
                .map_err(|_| CentronicError::Protocol(format!("unknown action {s:?}")))?;
            return match dir.to_ascii_uppercase().as_str() {
                "UP" => Ok(Action::UpFor(secs)),
                "DOWN" => Ok(Action::DownFor(secs)),
                _ => Err(CentronicError::Protocol(format!("unknown action {s:?}"))),
            };
        }

        match s.to_ascii_uppercase().as_str() {
            "UP" => Ok(Action::Up),
            "UP2" => Ok(Action::UpIntermediate),
            "DOWN" => Ok(Action::Down),
            "DOWN2" => Ok(Action::DownIntermediate),
            "HALT" => Ok(Action::Halt),
            "PAIR" | "TRAIN" => Ok(Action::Pair),
            "CLEARPOS" => Ok(Action::ClearPosition),
            "REMOVE" => Ok(Action::Remove),
            _ => Err(CentronicError::Protocol(format!("unknown action {s:?}"))),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Up => write!(f, "UP"),
            Action::UpIntermediate => write!(f, "UP2"),
            Action::Down => write!(f, "DOWN"),
            Action::DownIntermediate => write!(f, "DOWN2"),
            Action::Halt => write!(f, "HALT"),
            Action::Pair => write!(f, "PAIR"),
            Action::ClearPosition => write!(f, "CLEARPOS"),
            Action::Remove => write!(f, "REMOVE"),
            Action::UpFor(secs) => write!(f, "UP:{secs}"),
            Action::DownFor(secs) => write!(f, "DOWN:{secs}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcodes() {
        assert_eq!(Command::Halt.opcode(), 0x10);
        assert_eq!(Command::Up.opcode(), 0x20);
        assert_eq!(Command::UpIntermediate.opcode(), 0x24);
        assert_eq!(Command::Down.opcode(), 0x40);
        assert_eq!(Command::DownIntermediate.opcode(), 0x44);
        assert_eq!(Command::Pair4.opcode(), 0x83);
        assert_eq!(Command::ClearPos4.opcode(), 0x93);
        assert_eq!(Command::Release.opcode(), 0x00);
    }

    #[test]
    fn test_pair_sequence() {
        assert_eq!(
            Action::Pair.sequence(),
            vec![Command::Pair2, Command::Pair2]
        );
        assert_eq!(Action::Pair.configures_unit(), Some(true));
    }

    #[test]
    fn test_clearpos_sequence() {
        assert_eq!(
            Action::ClearPosition.sequence(),
            vec![
                Command::Pair,
                Command::ClearPos,
                Command::ClearPos2,
                Command::ClearPos3,
                Command::ClearPos4,
            ]
        );
    }

    #[test]
    fn test_remove_sequence_unconfigures() {
        assert_eq!(
            Action::Remove.sequence(),
            vec![
                Command::Pair2,
                Command::Pair2,
                Command::Pair3,
                Command::Pair4,
            ]
        );
        assert_eq!(Action::Remove.configures_unit(), Some(false));
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("UP".parse::<Action>().unwrap(), Action::Up);
        assert_eq!("up2".parse::<Action>().unwrap(), Action::UpIntermediate);
        assert_eq!("HALT".parse::<Action>().unwrap(), Action::Halt);
        assert_eq!("PAIR".parse::<Action>().unwrap(), Action::Pair);
        assert_eq!("UP:30".parse::<Action>().unwrap(), Action::UpFor(30));
        assert_eq!("DOWN:5".parse::<Action>().unwrap(), Action::DownFor(5));
        assert!("LEFT".parse::<Action>().is_err());
        assert!("UP:abc".parse::<Action>().is_err());
    }
}
