//! Frame encoding and scanning
//!
//! Builds outbound code bodies and recognizes complete inbound frames in a
//! growing byte buffer. A frame is STX, 40 hex characters of body, 2 hex
//! characters of checksum, ETX. The checksum byte makes the sum of the 20
//! body byte values plus the checksum equal 0x03 modulo 256.

use std::fmt;

use super::{
    Command, CentronicError, BODY_LEN, CODE_21, CODE_PREFIX, CODE_SUFFIX, ETX, FRAME_LEN,
    SOURCE_REMOTE, SOURCE_WALL, STX,
};

// Byte offsets of the body fields within a complete frame.
const COUNTER_AT: usize = 15;
const SUFFIX_AT: usize = 19;
const UNIT_AT: usize = 25;
const MARKER_AT: usize = 30;
const CHANNEL_AT: usize = 35;
const RESERVED_AT: usize = 37;
const COMMAND_AT: usize = 39;
const ARGUMENT_AT: usize = 40;
const CHECKSUM_AT: usize = 41;

/// Build the 40-hex-character body for one command frame.
///
/// Channel 0 is reserved for wall-mounted senders and uses the wall source
/// marker; every other channel uses the remote marker.
pub fn build_body(channel: u8, unit_code: &str, increment: u16, command: Command) -> String {
    let source = if channel == 0 { SOURCE_WALL } else { SOURCE_REMOTE };
    format!(
        "{CODE_PREFIX}{increment:04X}{CODE_SUFFIX}{unit_code}{CODE_21}{source}{channel:02X}00{opcode:02X}",
        opcode = command.opcode(),
    )
}

/// Append the checksum to a body, upper-casing the result.
///
/// Fails with a protocol error unless `body` is exactly 40 hex characters.
pub fn with_checksum(body: &str) -> Result<String, CentronicError> {
    if body.len() != BODY_LEN {
        return Err(CentronicError::BodyLength {
            expected: BODY_LEN,
            actual: body.len(),
        });
    }
    if !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CentronicError::Protocol(format!(
            "code body contains non-hex characters: {body:?}"
        )));
    }

    let mut sum: u32 = 0;
    for i in (0..BODY_LEN).step_by(2) {
        // The body is validated hex, the pairwise parse cannot fail.
        sum += u32::from_str_radix(&body[i..i + 2], 16).unwrap_or(0);
    }
    let check = 0x03u8.wrapping_sub(sum as u8);
    Ok(format!("{}{check:02X}", body.to_ascii_uppercase()))
}

/// Wrap a finished code in its STX/ETX envelope.
pub fn envelope(code: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(code.len() + 2);
    packet.push(STX);
    packet.extend_from_slice(code.as_bytes());
    packet.push(ETX);
    packet
}

/// One parsed inbound frame, as delivered to the frame callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    /// 5-hex-digit unit code of the sending remote, upper-case
    pub unit_id: String,
    /// Rolling counter embedded in the frame
    pub counter: u16,
    /// Channel the command was addressed to
    pub channel: u8,
    /// High nibble of the opcode (1 = HALT, 2 = UP, 4 = DOWN)
    pub command: u8,
    /// Low nibble of the opcode
    pub argument: u8,
}

impl ReceivedFrame {
    /// Full opcode byte
    pub fn opcode(&self) -> u8 {
        (self.command << 4) | self.argument
    }

    /// Human-readable name of the command nibble, where known
    pub fn command_name(&self) -> Option<&'static str> {
        match self.command {
            0x1 => Some("HALT"),
            0x2 => Some("UP"),
            0x4 => Some("DOWN"),
            _ => None,
        }
    }
}

impl fmt::Display for ReceivedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let command = match self.command_name() {
            Some(name) => name.to_string(),
            None => format!("{:X}", self.command),
        };
        write!(
            f,
            "unit_id: {}, channel: {}, command: {}, argument: {:X}",
            self.unit_id, self.channel, command, self.argument
        )
    }
}

/// Scan a receive buffer for complete, checksum-valid frames.
///
/// Returns the frames in stream order together with the number of leading
/// bytes that are fully consumed: garbage before a start marker, frames that
/// failed validation, and every matched frame. Trailing bytes that may still
/// become a complete frame are not counted, so the caller can drain the
/// consumed prefix and retain the rest.
pub fn scan_frames(buffer: &[u8]) -> (Vec<ReceivedFrame>, usize) {
    let mut frames = Vec::new();
    let mut pos = 0;

    loop {
        match buffer[pos..].iter().position(|&b| b == STX) {
            None => {
                // No start marker left, the whole buffer is garbage.
                pos = buffer.len();
                break;
            }
            Some(offset) => {
                let start = pos + offset;
                if buffer.len() - start < FRAME_LEN {
                    // Possibly a partial frame, keep it for the next scan.
                    pos = start;
                    break;
                }
                match parse_frame(&buffer[start..start + FRAME_LEN]) {
                    Some(frame) => {
                        frames.push(frame);
                        pos = start + FRAME_LEN;
                    }
                    None => {
                        // Invalid frame at this marker, resync one byte on.
                        pos = start + 1;
                    }
                }
            }
        }
    }

    (frames, pos)
}

/// Validate one frame-sized window and extract its fields.
///
/// Hex comparison is case-insensitive; a checksum mismatch rejects the frame.
fn parse_frame(window: &[u8]) -> Option<ReceivedFrame> {
    debug_assert_eq!(window.len(), FRAME_LEN);

    if window[0] != STX || window[FRAME_LEN - 1] != ETX {
        return None;
    }
    if !window[1..FRAME_LEN - 1].iter().all(u8::is_ascii_hexdigit) {
        return None;
    }

    let hex: Vec<u8> = window[1..FRAME_LEN - 1]
        .iter()
        .map(u8::to_ascii_uppercase)
        .collect();
    let field = |at: usize, len: usize| &hex[at - 1..at - 1 + len];

    if field(1, CODE_PREFIX.len()) != CODE_PREFIX.as_bytes()
        || field(SUFFIX_AT, CODE_SUFFIX.len()) != CODE_SUFFIX.as_bytes()
        || field(MARKER_AT, CODE_21.len()) != CODE_21.as_bytes()
        || field(RESERVED_AT, 2) != b"00"
    {
        return None;
    }

    // Sum of the 20 body bytes plus the checksum byte must be 0x03 mod 256.
    let byte_at = |at: usize| {
        let pair = std::str::from_utf8(field(at, 2)).ok()?;
        u8::from_str_radix(pair, 16).ok()
    };
    let mut sum = 0u8;
    for i in (1..=CHECKSUM_AT).step_by(2) {
        sum = sum.wrapping_add(byte_at(i)?);
    }
    if sum != 0x03 {
        return None;
    }

    let nibble = |at: usize| (hex[at - 1] as char).to_digit(16).map(|n| n as u8);
    let counter = std::str::from_utf8(field(COUNTER_AT, 4))
        .ok()
        .and_then(|hex| u16::from_str_radix(hex, 16).ok())?;

    Some(ReceivedFrame {
        unit_id: String::from_utf8_lossy(field(UNIT_AT, 5)).into_owned(),
        counter,
        channel: byte_at(CHANNEL_AT)?,
        command: nibble(COMMAND_AT)?,
        argument: nibble(ARGUMENT_AT)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_for(channel: u8, unit_code: &str, increment: u16, command: Command) -> Vec<u8> {
        let body = build_body(channel, unit_code, increment, command);
        envelope(&with_checksum(&body).unwrap())
    }

    #[test]
    fn test_body_layout() {
        let body = build_body(3, "1737b", 10, Command::Up);
        assert_eq!(body.len(), BODY_LEN);
        assert_eq!(&body[..14], CODE_PREFIX);
        assert_eq!(&body[14..18], "000A");
        assert_eq!(&body[18..24], CODE_SUFFIX);
        assert_eq!(&body[24..29], "1737b");
        assert_eq!(&body[29..32], CODE_21);
        assert_eq!(&body[32..34], SOURCE_REMOTE);
        assert_eq!(&body[34..36], "03");
        assert_eq!(&body[36..38], "00");
        assert_eq!(&body[38..40], "20");
    }

    #[test]
    fn test_wall_sender_marker_on_channel_zero() {
        let body = build_body(0, "1737b", 0, Command::Halt);
        assert_eq!(&body[32..34], SOURCE_WALL);
        assert_eq!(&body[34..36], "00");
    }

    #[test]
    fn test_checksum_closes_sum_to_three() {
        let body = build_body(1, "1737b", 42, Command::Down);
        let code = with_checksum(&body).unwrap();
        assert_eq!(code.len(), BODY_LEN + 2);

        let mut sum = 0u8;
        for i in (0..code.len()).step_by(2) {
            sum = sum.wrapping_add(u8::from_str_radix(&code[i..i + 2], 16).unwrap());
        }
        assert_eq!(sum, 0x03);
    }

    #[test]
    fn test_checksum_rejects_wrong_length() {
        assert!(matches!(
            with_checksum("ABCDEF"),
            Err(CentronicError::BodyLength { actual: 6, .. })
        ));
        assert!(with_checksum(&"0".repeat(41)).is_err());
    }

    #[test]
    fn test_checksum_rejects_non_hex() {
        let body = "G".repeat(BODY_LEN);
        assert!(matches!(
            with_checksum(&body),
            Err(CentronicError::Protocol(_))
        ));
    }

    #[test]
    fn test_envelope_markers() {
        let packet = envelope("AB");
        assert_eq!(packet, vec![STX, b'A', b'B', ETX]);
    }

    #[test]
    fn test_roundtrip_recovers_fields() {
        let packet = frame_for(3, "1737b", 10, Command::Up);
        let (frames, consumed) = scan_frames(&packet);
        assert_eq!(consumed, packet.len());
        assert_eq!(frames.len(), 1);

        let frame = &frames[0];
        assert_eq!(frame.unit_id, "1737B");
        assert_eq!(frame.counter, 10);
        assert_eq!(frame.channel, 3);
        assert_eq!(frame.command, 0x2);
        assert_eq!(frame.argument, 0x0);
        assert_eq!(frame.opcode(), Command::Up.opcode());
        assert_eq!(frame.command_name(), Some("UP"));
    }

    #[test]
    fn test_scan_tolerates_leading_garbage() {
        let mut buffer = b"noise\x02junk".to_vec();
        buffer.extend_from_slice(&frame_for(1, "abcde", 7, Command::Halt));
        let (frames, consumed) = scan_frames(&buffer);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].unit_id, "ABCDE");
        assert_eq!(frames[0].command_name(), Some("HALT"));
        assert_eq!(consumed, buffer.len());
    }

    #[test]
    fn test_scan_retains_trailing_partial() {
        let complete = frame_for(2, "1737c", 1, Command::Down);
        let mut buffer = complete.clone();
        buffer.extend_from_slice(&complete[..10]);

        let (frames, consumed) = scan_frames(&buffer);
        assert_eq!(frames.len(), 1);
        assert_eq!(consumed, complete.len());

        // Completing the partial frame yields the second match.
        let mut rest = buffer[consumed..].to_vec();
        rest.extend_from_slice(&complete[10..]);
        let (frames, consumed) = scan_frames(&rest);
        assert_eq!(frames.len(), 1);
        assert_eq!(consumed, rest.len());
    }

    #[test]
    fn test_scan_skips_corrupted_frame() {
        let mut bad = frame_for(1, "1737b", 5, Command::Up);
        bad[16] = b'F'; // corrupts the counter, breaking the checksum
        let good = frame_for(1, "1737b", 6, Command::Up);

        let mut buffer = bad;
        buffer.extend_from_slice(&good);
        let (frames, consumed) = scan_frames(&buffer);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opcode(), Command::Up.opcode());
        assert_eq!(consumed, buffer.len());
    }

    #[test]
    fn test_scan_is_case_insensitive() {
        let packet = frame_for(1, "1737b", 3, Command::Up);
        let lowered: Vec<u8> = packet.iter().map(u8::to_ascii_lowercase).collect();
        let (frames, _) = scan_frames(&lowered);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].unit_id, "1737B");
    }

    #[test]
    fn test_scan_consumes_markerless_garbage() {
        let (frames, consumed) = scan_frames(b"no start marker here");
        assert!(frames.is_empty());
        assert_eq!(consumed, b"no start marker here".len());
    }
}
