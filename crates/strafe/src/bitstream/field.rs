use std::fmt;

use super::error::CodecError;
use super::reader::sign_extend;
use super::writer::mask;

/// A field value as it travels through the codec.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Unsigned(u32),
    Signed(i32),
    Float(f32),
}

impl FieldValue {
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Unsigned(v) => v,
            Self::Signed(v) => v as u32,
            Self::Float(v) => v as u32,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            Self::Unsigned(v) => v as i32,
            Self::Signed(v) => v,
            Self::Float(v) => v as i32,
        }
    }

    pub fn as_f32(self) -> f32 {
        match self {
            Self::Unsigned(v) => v as f32,
            Self::Signed(v) => v as f32,
            Self::Float(v) => v,
        }
    }

    fn as_i64(self) -> Option<i64> {
        match self {
            Self::Unsigned(v) => Some(v as i64),
            Self::Signed(v) => Some(v as i64),
            Self::Float(_) => None,
        }
    }

    /// Bit-for-bit equality; distinguishes `0.0` from `-0.0` and treats equal NaNs as equal.
    pub fn same_bits(self, other: Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Self::Unsigned(v) => v == 0,
            Self::Signed(v) => v == 0,
            Self::Float(v) => v.to_bits() == 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    /// Unsigned integer of 1-32 bits.
    Unsigned(u8),
    /// Two's complement integer of 1-32 bits.
    Signed(u8),
    /// IEEE f32, sent verbatim.
    Float,
    /// f32 quantized to `round(v * scale)` in a signed `bits` budget.
    NetFloat { bits: u8, scale: f32 },
}

impl FieldKind {
    pub const fn bits(&self) -> u8 {
        match *self {
            Self::Unsigned(bits) | Self::Signed(bits) => bits,
            Self::Float => 32,
            Self::NetFloat { bits, .. } => bits,
        }
    }

    pub fn zero(&self) -> FieldValue {
        match self {
            Self::Unsigned(_) => FieldValue::Unsigned(0),
            Self::Signed(_) => FieldValue::Signed(0),
            Self::Float | Self::NetFloat { .. } => FieldValue::Float(0.0),
        }
    }

    /// Raw wire bits for `value`, or `None` when it does not fit.
    pub fn encode(&self, value: FieldValue) -> Option<u32> {
        match *self {
            Self::Unsigned(bits) => {
                let v = value.as_i64()?;
                (0..=mask(bits) as i64).contains(&v).then_some(v as u32)
            }
            Self::Signed(bits) => {
                let v = value.as_i64()?;
                let (min, max) = signed_range(bits);
                (min..=max)
                    .contains(&v)
                    .then_some(v as i32 as u32 & mask(bits))
            }
            Self::Float => Some(value.as_f32().to_bits()),
            Self::NetFloat { bits, scale } => {
                let v = value.as_f32();
                if !v.is_finite() {
                    return None;
                }
                let quantized = (v as f64 * scale as f64).round();
                let (min, max) = signed_range(bits);
                (min as f64..=max as f64)
                    .contains(&quantized)
                    .then_some(quantized as i64 as i32 as u32 & mask(bits))
            }
        }
    }

    pub fn decode(&self, raw: u32) -> FieldValue {
        match *self {
            Self::Unsigned(bits) => FieldValue::Unsigned(raw & mask(bits)),
            Self::Signed(bits) => FieldValue::Signed(sign_extend(raw, bits)),
            Self::Float => FieldValue::Float(f32::from_bits(raw)),
            Self::NetFloat { bits, scale } => {
                FieldValue::Float(sign_extend(raw, bits) as f32 / scale)
            }
        }
    }

    /// The value the receiver will reconstruct, or `value` unchanged when it is not encodable.
    pub fn quantize(&self, value: FieldValue) -> FieldValue {
        match self {
            Self::NetFloat { .. } => self.encode(value).map_or(value, |raw| self.decode(raw)),
            _ => value,
        }
    }
}

fn signed_range(bits: u8) -> (i64, i64) {
    let half = 1i64 << (bits as u32 - 1);
    (-half, half - 1)
}

/// Static description of one transmitted struct member.
///
/// Tables of these are built once per struct type (see [`field_table!`]) and shared by
/// every instance; the accessors replace runtime offset tables.
pub struct FieldDescriptor<T> {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Zero is the common value, so a changed field spends one extra bit to skip the payload.
    pub zero_common: bool,
    get: fn(&T) -> FieldValue,
    set: fn(&mut T, FieldValue),
}

impl<T> FieldDescriptor<T> {
    pub const fn new(
        name: &'static str,
        kind: FieldKind,
        zero_common: bool,
        get: fn(&T) -> FieldValue,
        set: fn(&mut T, FieldValue),
    ) -> Self {
        Self {
            name,
            kind,
            zero_common,
            get,
            set,
        }
    }

    #[inline]
    pub fn get(&self, target: &T) -> FieldValue {
        (self.get)(target)
    }

    #[inline]
    pub fn set(&self, target: &mut T, value: FieldValue) {
        (self.set)(target, value)
    }

    pub fn encode(&self, value: FieldValue) -> Result<u32, CodecError> {
        self.kind
            .encode(value)
            .ok_or(CodecError::FieldOutOfRange {
                field: self.name,
                bits: self.kind.bits(),
            })
    }
}

impl<T> fmt::Debug for FieldDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("zero_common", &self.zero_common)
            .finish()
    }
}

/// Conversion between a struct member type and [`FieldValue`].
pub trait FieldRepr: Copy {
    fn into_field(self) -> FieldValue;
    fn from_field(value: FieldValue) -> Self;
}

macro_rules! impl_field_repr {
    ($variant:ident, $getter:ident: $($ty:ty),+) => {
        $(
            impl FieldRepr for $ty {
                #[inline]
                fn into_field(self) -> FieldValue {
                    FieldValue::$variant(self as _)
                }

                #[inline]
                fn from_field(value: FieldValue) -> Self {
                    value.$getter() as $ty
                }
            }
        )+
    };
}

impl_field_repr!(Unsigned, as_u32: u8, u16, u32);
impl_field_repr!(Signed, as_i32: i8, i16, i32);
impl_field_repr!(Float, as_f32: f32);

impl FieldRepr for bool {
    fn into_field(self) -> FieldValue {
        FieldValue::Unsigned(self as u32)
    }

    fn from_field(value: FieldValue) -> Self {
        value.as_u32() != 0
    }
}

/// Builds a static `[FieldDescriptor<T>; N]` from `(name, kind, zero_common, member.path)` rows.
#[macro_export]
macro_rules! field_table {
    ($ty:ty; $(($name:literal, $kind:expr, $zero:literal, $($member:ident).+)),+ $(,)?) => {
        [
            $(
                $crate::bitstream::FieldDescriptor::<$ty>::new(
                    $name,
                    $kind,
                    $zero,
                    |s: &$ty| $crate::bitstream::FieldRepr::into_field(s.$($member).+),
                    |s: &mut $ty, v: $crate::bitstream::FieldValue| {
                        s.$($member).+ = $crate::bitstream::FieldRepr::from_field(v)
                    },
                )
            ),+
        ]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsigned_range() {
        let kind = FieldKind::Unsigned(4);
        assert_eq!(kind.encode(FieldValue::Unsigned(15)), Some(15));
        assert_eq!(kind.encode(FieldValue::Unsigned(16)), None);
        assert_eq!(kind.encode(FieldValue::Signed(-1)), None);
    }

    #[test]
    fn test_signed_range_and_decode() {
        let kind = FieldKind::Signed(8);
        assert_eq!(kind.encode(FieldValue::Signed(128)), None);
        assert_eq!(kind.encode(FieldValue::Signed(-129)), None);

        let raw = kind.encode(FieldValue::Signed(-128)).unwrap();
        assert_eq!(kind.decode(raw), FieldValue::Signed(-128));
    }

    #[test]
    fn test_net_float_precision_is_bounded() {
        let kind = FieldKind::NetFloat {
            bits: 16,
            scale: 8.0,
        };
        let raw = kind.encode(FieldValue::Float(12.34)).unwrap();
        let decoded = kind.decode(raw).as_f32();
        assert!((decoded - 12.34).abs() <= 0.5 / 8.0);
    }

    #[test]
    fn test_net_float_overflow_and_nan_rejected() {
        let kind = FieldKind::NetFloat {
            bits: 8,
            scale: 1.0,
        };
        assert!(kind.encode(FieldValue::Float(127.0)).is_some());
        assert!(kind.encode(FieldValue::Float(128.0)).is_none());
        assert!(kind.encode(FieldValue::Float(f32::NAN)).is_none());
        assert!(kind.encode(FieldValue::Float(f32::INFINITY)).is_none());
    }

    #[test]
    fn test_quantize_matches_decode() {
        let kind = FieldKind::NetFloat {
            bits: 20,
            scale: 16.0,
        };
        let value = FieldValue::Float(3.14159);
        let quantized = kind.quantize(value);
        assert!(kind.decode(kind.encode(quantized).unwrap()).same_bits(quantized));
    }

    #[test]
    fn test_same_bits_distinguishes_negative_zero() {
        assert!(!FieldValue::Float(0.0).same_bits(FieldValue::Float(-0.0)));
        assert!(FieldValue::Float(f32::NAN).same_bits(FieldValue::Float(f32::NAN)));
    }
}
