use super::error::CodecError;
use super::field::{FieldDescriptor, FieldValue};
use super::writer::mask;

/// Consumes a message written by [`super::BitWriter`].
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
    bit_len: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            bit_pos: 0,
            bit_len: data.len() * 8,
        }
    }

    fn ensure(&self, bits: usize) -> Result<(), CodecError> {
        if self.bit_pos + bits > self.bit_len {
            return Err(CodecError::TruncatedMessage {
                needed: bits,
                available: self.bit_len - self.bit_pos,
            });
        }
        Ok(())
    }

    pub fn read_bit(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_bits(1)? != 0)
    }

    pub fn read_bits(&mut self, bits: u8) -> Result<u32, CodecError> {
        debug_assert!((1..=32).contains(&bits), "bit width {bits} out of range");
        self.ensure(bits as usize)?;

        let mut value = 0u32;
        let mut filled = 0usize;

        while filled < bits as usize {
            let offset = self.bit_pos % 8;
            let take = (bits as usize - filled).min(8 - offset);
            let chunk = (self.data[self.bit_pos / 8] >> offset) as u32 & ((1 << take) - 1);

            value |= chunk << filled;
            filled += take;
            self.bit_pos += take;
        }

        Ok(value & mask(bits))
    }

    /// Reads a two's complement value and sign-extends it to 32 bits.
    pub fn read_signed(&mut self, bits: u8) -> Result<i32, CodecError> {
        let raw = self.read_bits(bits)?;
        Ok(sign_extend(raw, bits))
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(self.read_bits(16)? as u16)
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.read_bits(32)
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_bits(self.read_bits(32)?))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, CodecError> {
        self.ensure(len * 8)?;

        if self.bit_pos % 8 == 0 {
            let start = self.bit_pos / 8;
            self.bit_pos += len * 8;
            return Ok(self.data[start..start + len].to_vec());
        }

        (0..len).map(|_| self.read_u8()).collect()
    }

    pub fn read_string(&mut self, max_len: usize) -> Result<String, CodecError> {
        let len = self.read_u16()? as usize;
        if len > max_len {
            return Err(CodecError::StringTooLong { len, max: max_len });
        }

        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| CodecError::InvalidString)
    }

    pub fn read_field<T>(
        &mut self,
        descriptor: &FieldDescriptor<T>,
    ) -> Result<FieldValue, CodecError> {
        let raw = self.read_bits(descriptor.kind.bits())?;
        Ok(descriptor.kind.decode(raw))
    }

    /// Skips to the next byte boundary.
    pub fn align(&mut self) {
        self.bit_pos = self.bit_pos.div_ceil(8) * 8;
        self.bit_pos = self.bit_pos.min(self.bit_len);
    }

    /// Bytes after the cursor, which must be byte aligned.
    pub fn remaining_bytes(&self) -> &'a [u8] {
        debug_assert!(self.bit_pos % 8 == 0, "cursor is not byte aligned");
        &self.data[self.bit_pos / 8..]
    }

    pub fn bits_read(&self) -> usize {
        self.bit_pos
    }

    pub fn remaining_bits(&self) -> usize {
        self.bit_len - self.bit_pos
    }
}

#[inline]
pub(crate) fn sign_extend(raw: u32, bits: u8) -> i32 {
    let shift = 32 - bits as u32;
    ((raw << shift) as i32) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::BitWriter;

    #[test]
    fn test_primitive_roundtrip() {
        let mut writer = BitWriter::new();
        writer.write_bits(5, 3);
        writer.write_signed(-3, 4);
        writer.write_u16(0xBEEF);
        writer.write_f32(-1.5);
        writer.write_u32(u32::MAX);
        writer.write_string("say hello", 64).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read_bits(3).unwrap(), 5);
        assert_eq!(reader.read_signed(4).unwrap(), -3);
        assert_eq!(reader.read_u16().unwrap(), 0xBEEF);
        assert_eq!(reader.read_f32().unwrap(), -1.5);
        assert_eq!(reader.read_u32().unwrap(), u32::MAX);
        assert_eq!(reader.read_string(64).unwrap(), "say hello");
    }

    #[test]
    fn test_reading_past_end_is_truncated() {
        let bytes = [0xFFu8];
        let mut reader = BitReader::new(&bytes);
        reader.read_bits(6).unwrap();

        assert_eq!(
            reader.read_bits(3),
            Err(CodecError::TruncatedMessage {
                needed: 3,
                available: 2
            })
        );
    }

    #[test]
    fn test_sign_extension() {
        assert_eq!(sign_extend(0b1111, 4), -1);
        assert_eq!(sign_extend(0b0111, 4), 7);
        assert_eq!(sign_extend(0x8000_0000, 32), i32::MIN);
    }

    #[test]
    fn test_declared_string_length_is_checked() {
        let mut writer = BitWriter::new();
        writer.write_string("abcdef", 16).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = BitReader::new(&bytes);
        assert_eq!(
            reader.read_string(4),
            Err(CodecError::StringTooLong { len: 6, max: 4 })
        );
    }

    #[test]
    fn test_remaining_bytes_after_align() {
        let mut writer = BitWriter::new();
        writer.write_bits(1, 2);
        writer.align();
        writer.write_bytes(&[9, 8, 7]);
        let bytes = writer.finish().unwrap();

        let mut reader = BitReader::new(&bytes);
        reader.read_bits(2).unwrap();
        reader.align();
        assert_eq!(reader.remaining_bytes(), &[9, 8, 7]);
    }
}
