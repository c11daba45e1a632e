#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("message truncated: needed {needed} bits, {available} available")]
    TruncatedMessage { needed: usize, available: usize },
    #[error("field `{field}` does not fit in {bits} bits")]
    FieldOutOfRange { field: &'static str, bits: u8 },
    #[error("string of {len} bytes exceeds limit of {max}")]
    StringTooLong { len: usize, max: usize },
    #[error("string is not valid utf-8")]
    InvalidString,
    #[error("message of {size} bytes exceeds limit of {max}")]
    MessageOverflow { size: usize, max: usize },
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
}
