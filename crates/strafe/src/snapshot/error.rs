use thiserror::Error;

use crate::bitstream::CodecError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Recoverable: the client asks for a full snapshot and keeps going.
    #[error("snapshot {sequence} references missing baseline {baseline}")]
    MissingBaseline { sequence: u32, baseline: u32 },

    #[error("snapshot {sequence} is not newer than {last}")]
    Stale { sequence: u32, last: u32 },

    #[error("entity {number} is out of order after {previous}")]
    EntityOrder { number: u16, previous: u16 },

    #[error("entity number {0} is reserved or out of range")]
    EntityOutOfRange(u32),

    #[error("baseline distance {0} does not fit the wire format")]
    DeltaTooFar(u32),
}
