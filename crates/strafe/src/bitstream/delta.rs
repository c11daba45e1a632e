use super::error::CodecError;
use super::field::{FieldDescriptor, FieldValue};
use super::reader::BitReader;
use super::writer::BitWriter;

/// A struct that is delta-compressed through a static field table.
pub trait NetState: Clone + Default + PartialEq + 'static {
    fn fields() -> &'static [FieldDescriptor<Self>];
}

/// Writes `new` relative to `old`.
///
/// An unchanged struct costs a single bit. Otherwise every descriptor gets a presence
/// bit, followed by the value when present. All changed values are range-checked before
/// anything is written, so a failed encode leaves the writer untouched.
///
/// Returns whether any field changed.
pub fn write_delta<T: NetState>(
    writer: &mut BitWriter,
    old: &T,
    new: &T,
) -> Result<bool, CodecError> {
    let fields = T::fields();

    let mut changes: Vec<(usize, FieldValue, u32)> = Vec::new();
    for (index, field) in fields.iter().enumerate() {
        let value = field.get(new);
        if !value.same_bits(field.get(old)) {
            changes.push((index, value, field.encode(value)?));
        }
    }

    if changes.is_empty() {
        writer.write_bit(false);
        return Ok(false);
    }

    writer.write_bit(true);

    let mut pending = changes.into_iter().peekable();
    for (index, field) in fields.iter().enumerate() {
        let Some((_, value, raw)) = pending.next_if(|(i, _, _)| *i == index) else {
            writer.write_bit(false);
            continue;
        };

        writer.write_bit(true);
        if field.zero_common {
            writer.write_bit(!value.is_zero());
            if value.is_zero() {
                continue;
            }
        }
        writer.write_bits(raw, field.kind.bits());
    }

    Ok(true)
}

/// Reconstructs a struct from `old` and a delta written by [`write_delta`].
///
/// Fields without a presence bit keep the baseline value.
pub fn read_delta<T: NetState>(reader: &mut BitReader<'_>, old: &T) -> Result<T, CodecError> {
    let mut value = old.clone();

    if !reader.read_bit()? {
        return Ok(value);
    }

    for field in T::fields() {
        if !reader.read_bit()? {
            continue;
        }

        let decoded = if field.zero_common && !reader.read_bit()? {
            field.kind.zero()
        } else {
            reader.read_field(field)?
        };
        field.set(&mut value, decoded);
    }

    Ok(value)
}

/// Rounds every network-float member to the value a receiver reconstructs, so a stored
/// baseline matches the peer's copy bit for bit.
pub fn quantize<T: NetState>(value: &T) -> T {
    let mut quantized = value.clone();
    for field in T::fields() {
        let current = field.get(&quantized);
        field.set(&mut quantized, field.kind.quantize(current));
    }
    quantized
}

/// Names of the members that differ between two values.
pub fn changed_fields<T: NetState>(old: &T, new: &T) -> Vec<&'static str> {
    T::fields()
        .iter()
        .filter(|field| !field.get(old).same_bits(field.get(new)))
        .map(|field| field.name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::FieldKind;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Probe {
        kind: u8,
        health: i16,
        speed: f32,
        height: f32,
        event: u16,
    }

    static PROBE_FIELDS: [FieldDescriptor<Probe>; 5] = crate::field_table!(Probe;
        ("kind", FieldKind::Unsigned(4), false, kind),
        ("health", FieldKind::Signed(10), false, health),
        ("speed", FieldKind::Float, false, speed),
        ("height", FieldKind::NetFloat { bits: 12, scale: 4.0 }, true, height),
        ("event", FieldKind::Unsigned(8), true, event),
    );

    impl NetState for Probe {
        fn fields() -> &'static [FieldDescriptor<Self>] {
            &PROBE_FIELDS
        }
    }

    fn encode(old: &Probe, new: &Probe) -> (Vec<u8>, usize) {
        let mut writer = BitWriter::new();
        write_delta(&mut writer, old, new).unwrap();
        let bits = writer.bits_written();
        (writer.finish().unwrap(), bits)
    }

    #[test]
    fn test_unchanged_struct_is_one_bit() {
        let probe = Probe {
            kind: 3,
            health: -20,
            speed: 1.5,
            height: 2.25,
            event: 7,
        };
        let (_, bits) = encode(&probe, &probe);
        assert_eq!(bits, 1);
    }

    #[test]
    fn test_delta_applies_onto_baseline() {
        let old = Probe {
            kind: 1,
            health: 100,
            speed: 3.0,
            height: 1.0,
            event: 0,
        };
        let new = Probe {
            health: -5,
            height: 0.0,
            ..old.clone()
        };

        let (bytes, bits) = encode(&old, &new);
        // changed flag + 5 presence bits + 10 health bits + 1 zero flag
        assert_eq!(bits, 1 + 5 + 10 + 1);

        let mut reader = BitReader::new(&bytes);
        assert_eq!(read_delta(&mut reader, &old).unwrap(), new);
    }

    #[test]
    fn test_out_of_range_field_writes_nothing() {
        let old = Probe::default();
        let new = Probe {
            kind: 2,
            health: 600,
            ..Probe::default()
        };

        let mut writer = BitWriter::new();
        let result = write_delta(&mut writer, &old, &new);
        assert_eq!(
            result,
            Err(CodecError::FieldOutOfRange {
                field: "health",
                bits: 10
            })
        );
        assert!(writer.is_empty());
    }

    #[test]
    fn test_quantized_target_roundtrips_exactly() {
        let old = Probe::default();
        let new = quantize(&Probe {
            height: 10.13,
            ..Probe::default()
        });
        assert_eq!(new.height, 10.25);

        let (bytes, _) = encode(&old, &new);
        let mut reader = BitReader::new(&bytes);
        assert_eq!(read_delta(&mut reader, &old).unwrap(), new);
    }

    #[test]
    fn test_changed_fields_lists_names() {
        let old = Probe::default();
        let new = Probe {
            speed: 2.0,
            event: 1,
            ..Probe::default()
        };
        assert_eq!(changed_fields(&old, &new), vec!["speed", "event"]);
    }
}
