//! Bit-packed message codec and descriptor-driven delta compression.

mod delta;
mod error;
mod field;
mod reader;
mod writer;

pub use delta::{changed_fields, quantize, read_delta, write_delta, NetState};
pub use error::CodecError;
pub use field::{FieldDescriptor, FieldKind, FieldRepr, FieldValue};
pub use reader::BitReader;
pub use writer::{BitWriter, MAX_MESSAGE_SIZE};
