use crate::bitstream::CodecError;

pub const MAX_PACKET_SIZE: usize = 1200;
pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PORT: u16 = 27015;
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Leading four bytes of every out-of-band datagram. Never used as a channel sequence.
pub const CONNECTIONLESS_MARKER: u32 = u32::MAX;

pub const MAX_RELIABLE_COMMANDS: usize = 64;
/// The pending count travels as a `u8`.
pub const MAX_RELIABLE_WINDOW: usize = u8::MAX as usize;
pub const MAX_COMMAND_LENGTH: usize = 256;

/// Snapshots remembered per client, and baselines remembered by the client.
pub const PACKET_BACKUP: usize = 32;

pub const ENTITY_BITS: u8 = 10;
pub const MAX_ENTITIES: u16 = 1 << ENTITY_BITS;
/// Terminates the entity list of a snapshot.
pub const ENTITY_SENTINEL: u16 = MAX_ENTITIES - 1;

/// User commands carried per client packet.
pub const MAX_PACKET_USERCMDS: usize = 32;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

/// Next outgoing sequence, skipping the connectionless marker.
#[inline]
pub fn next_sequence(sequence: u32) -> u32 {
    match sequence.wrapping_add(1) {
        CONNECTIONLESS_MARKER => 0,
        next => next,
    }
}

pub fn is_connectionless(datagram: &[u8]) -> bool {
    datagram.len() >= 4
        && u32::from_le_bytes([datagram[0], datagram[1], datagram[2], datagram[3]])
            == CONNECTIONLESS_MARKER
}

/// Opcodes of server-to-client payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerOp {
    Nop = 0,
    Snapshot = 1,
    Disconnect = 2,
    Eof = 0xFF,
}

impl TryFrom<u8> for ServerOp {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Nop),
            1 => Ok(Self::Snapshot),
            2 => Ok(Self::Disconnect),
            0xFF => Ok(Self::Eof),
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }
}

/// Opcodes of client-to-server payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientOp {
    Nop = 0,
    Move = 1,
    /// Like `Move`, but asks for a snapshot against the empty baseline.
    MoveNoDelta = 2,
    Disconnect = 3,
    Eof = 0xFF,
}

impl TryFrom<u8> for ClientOp {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Nop),
            1 => Ok(Self::Move),
            2 => Ok(Self::MoveNoDelta),
            3 => Ok(Self::Disconnect),
            0xFF => Ok(Self::Eof),
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_comparison() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(!sequence_greater_than(7, 7));
        assert!(sequence_greater_than(0, u32::MAX - 1));
        assert!(!sequence_greater_than(u32::MAX - 1, 0));
    }

    #[test]
    fn test_next_sequence_skips_marker() {
        assert_eq!(next_sequence(5), 6);
        assert_eq!(next_sequence(u32::MAX - 1), 0);
    }

    #[test]
    fn test_connectionless_detection() {
        assert!(is_connectionless(&[0xFF, 0xFF, 0xFF, 0xFF, 1]));
        assert!(!is_connectionless(&[0xFF, 0xFF, 0xFF]));
        assert!(!is_connectionless(&[1, 0, 0, 0, 0]));
    }

    #[test]
    fn test_unknown_ops_rejected() {
        assert_eq!(ServerOp::try_from(1), Ok(ServerOp::Snapshot));
        assert_eq!(
            ServerOp::try_from(9),
            Err(CodecError::UnknownMessageType(9))
        );
        assert_eq!(
            ClientOp::try_from(77),
            Err(CodecError::UnknownMessageType(77))
        );
    }
}
