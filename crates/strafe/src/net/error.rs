use std::io;

use rkyv::rancor;
use thiserror::Error;

use crate::bitstream::CodecError;
use crate::snapshot::SnapshotError;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol mismatch: local {local}, remote {remote}")]
    ProtocolMismatch { local: u32, remote: u32 },

    #[error("reliable command window of {window} exhausted")]
    ReliableOverflow { window: usize },

    #[error("connection timed out")]
    ConnectionTimedOut,

    #[error("channel is closed")]
    ChannelClosed,

    #[error("channel is not established")]
    NotEstablished,

    #[error("payload of {size} bytes exceeds the fragment limit of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),

    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
}

impl NetError {
    /// Errors after which the channel cannot be used again.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ReliableOverflow { .. } | Self::ConnectionTimedOut | Self::ChannelClosed
        )
    }
}
