use super::error::CodecError;
use super::field::{FieldDescriptor, FieldValue};

pub const MAX_MESSAGE_SIZE: usize = 16384;

/// Appends values to a byte buffer at bit granularity, least significant bit first.
///
/// Writes never fail on size; a message that grows past its limit is rejected by
/// [`BitWriter::finish`] so an encode attempt either yields a whole message or nothing.
#[derive(Debug, Clone)]
pub struct BitWriter {
    buffer: Vec<u8>,
    bit_len: usize,
    max_bytes: usize,
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BitWriter {
    pub fn new() -> Self {
        Self::with_limit(MAX_MESSAGE_SIZE)
    }

    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_bytes.min(1400)),
            bit_len: 0,
            max_bytes,
        }
    }

    #[inline]
    pub fn write_bit(&mut self, bit: bool) {
        self.write_bits(bit as u32, 1);
    }

    /// Writes the low `bits` bits of `value`. Higher bits are ignored.
    pub fn write_bits(&mut self, value: u32, bits: u8) {
        debug_assert!((1..=32).contains(&bits), "bit width {bits} out of range");

        let mut value = value & mask(bits);
        let mut remaining = bits as usize;

        while remaining > 0 {
            let offset = self.bit_len % 8;
            if offset == 0 {
                self.buffer.push(0);
            }

            let take = remaining.min(8 - offset);
            let last = self.buffer.len() - 1;
            self.buffer[last] |= ((value & ((1 << take) - 1)) as u8) << offset;

            value = value.checked_shr(take as u32).unwrap_or(0);
            remaining -= take;
            self.bit_len += take;
        }
    }

    pub fn write_signed(&mut self, value: i32, bits: u8) {
        self.write_bits(value as u32, bits);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_bits(value as u32, 8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bits(value as u32, 16);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bits(value, 32);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_bits(value.to_bits(), 32);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.bit_len % 8 == 0 {
            self.buffer.extend_from_slice(bytes);
            self.bit_len += bytes.len() * 8;
        } else {
            for &byte in bytes {
                self.write_u8(byte);
            }
        }
    }

    /// Length-prefixed (16 bit) byte string. Overlong input is an error, never truncated.
    pub fn write_string(&mut self, text: &str, max_len: usize) -> Result<(), CodecError> {
        let bytes = text.as_bytes();
        if bytes.len() > max_len || bytes.len() > u16::MAX as usize {
            return Err(CodecError::StringTooLong {
                len: bytes.len(),
                max: max_len,
            });
        }

        self.write_u16(bytes.len() as u16);
        self.write_bytes(bytes);
        Ok(())
    }

    /// Range-checks `value` against the descriptor, then writes it.
    pub fn write_field<T>(
        &mut self,
        descriptor: &FieldDescriptor<T>,
        value: FieldValue,
    ) -> Result<(), CodecError> {
        let raw = descriptor.encode(value)?;
        self.write_bits(raw, descriptor.kind.bits());
        Ok(())
    }

    /// Pads with zero bits up to the next byte boundary.
    pub fn align(&mut self) {
        self.bit_len = self.buffer.len() * 8;
    }

    pub fn bits_written(&self) -> usize {
        self.bit_len
    }

    pub fn byte_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bit_len == 0
    }

    pub fn finish(self) -> Result<Vec<u8>, CodecError> {
        if self.buffer.len() > self.max_bytes {
            return Err(CodecError::MessageOverflow {
                size: self.buffer.len(),
                max: self.max_bytes,
            });
        }
        Ok(self.buffer)
    }
}

#[inline]
pub(crate) fn mask(bits: u8) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    }
}
