use crate::bitstream::{BitReader, BitWriter, CodecError};

use super::protocol::{ClientOp, ServerOp, MAX_COMMAND_LENGTH};
use super::usercmd::{read_usercmds, write_usercmds, UserCmd};

/// One op of a client-to-server payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `ack` is the last snapshot the client applied; `None` asks for a full snapshot.
    Move {
        ack: Option<u32>,
        commands: Vec<UserCmd>,
    },
    Disconnect,
}

impl ClientMessage {
    pub fn write(&self, writer: &mut BitWriter) -> Result<(), CodecError> {
        match self {
            Self::Move { ack, commands } => {
                match ack {
                    Some(ack) => {
                        writer.write_u8(ClientOp::Move as u8);
                        writer.write_u32(*ack);
                    }
                    None => writer.write_u8(ClientOp::MoveNoDelta as u8),
                }
                write_usercmds(writer, commands)?;
                writer.align();
            }
            Self::Disconnect => writer.write_u8(ClientOp::Disconnect as u8),
        }
        Ok(())
    }
}

/// Encodes `messages` followed by `Eof`.
pub fn encode_client_payload(messages: &[ClientMessage]) -> Result<Vec<u8>, CodecError> {
    let mut writer = BitWriter::new();
    for message in messages {
        message.write(&mut writer)?;
    }
    writer.write_u8(ClientOp::Eof as u8);
    writer.finish()
}

/// Parses a client payload up to `Eof` or the end of the data.
pub fn decode_client_payload(payload: &[u8]) -> Result<Vec<ClientMessage>, CodecError> {
    let mut reader = BitReader::new(payload);
    let mut messages = Vec::new();

    while reader.remaining_bits() >= 8 {
        match ClientOp::try_from(reader.read_u8()?)? {
            ClientOp::Nop => {}
            ClientOp::Eof => break,
            op @ (ClientOp::Move | ClientOp::MoveNoDelta) => {
                let ack = match op {
                    ClientOp::Move => Some(reader.read_u32()?),
                    _ => None,
                };
                let commands = read_usercmds(&mut reader)?;
                reader.align();
                messages.push(ClientMessage::Move { ack, commands });
            }
            ClientOp::Disconnect => messages.push(ClientMessage::Disconnect),
        }
    }

    Ok(messages)
}

/// A payload that tells the client it has been dropped.
pub fn encode_server_disconnect(reason: &str) -> Result<Vec<u8>, CodecError> {
    let mut writer = BitWriter::new();
    writer.write_u8(ServerOp::Disconnect as u8);
    writer.write_string(reason, MAX_COMMAND_LENGTH)?;
    writer.write_u8(ServerOp::Eof as u8);
    writer.finish()
}

/// Wraps encoded snapshot bytes into a server payload.
pub fn encode_server_snapshot(snapshot: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut writer = BitWriter::new();
    writer.write_u8(ServerOp::Snapshot as u8);
    writer.write_bytes(snapshot);
    writer.write_u8(ServerOp::Eof as u8);
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_and_disconnect_roundtrip() {
        let mut cmd = UserCmd::new(1000);
        cmd.forward = 127;
        let messages = vec![
            ClientMessage::Move {
                ack: Some(41),
                commands: vec![UserCmd::new(984), cmd],
            },
            ClientMessage::Move {
                ack: None,
                commands: vec![],
            },
            ClientMessage::Disconnect,
        ];

        let payload = encode_client_payload(&messages).unwrap();
        assert_eq!(decode_client_payload(&payload).unwrap(), messages);
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        assert_eq!(
            decode_client_payload(&[0x42]),
            Err(CodecError::UnknownMessageType(0x42))
        );
    }

    #[test]
    fn test_server_disconnect_layout() {
        let payload = encode_server_disconnect("kicked").unwrap();
        let mut reader = BitReader::new(&payload);
        assert_eq!(reader.read_u8().unwrap(), ServerOp::Disconnect as u8);
        assert_eq!(reader.read_string(MAX_COMMAND_LENGTH).unwrap(), "kicked");
        assert_eq!(reader.read_u8().unwrap(), ServerOp::Eof as u8);
    }
}
