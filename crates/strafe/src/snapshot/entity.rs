use bitflags::bitflags;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::bitstream::{FieldDescriptor, FieldKind, FieldRepr, FieldValue, NetState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum EntityType {
    #[default]
    General = 0,
    Player = 1,
    Item = 2,
    Missile = 3,
    Mover = 4,
    Beam = 5,
    Portal = 6,
    Speaker = 7,
    Trigger = 8,
    Event = 9,
}

impl From<u8> for EntityType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Player,
            2 => Self::Item,
            3 => Self::Missile,
            4 => Self::Mover,
            5 => Self::Beam,
            6 => Self::Portal,
            7 => Self::Speaker,
            8 => Self::Trigger,
            9 => Self::Event,
            _ => Self::General,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct EntityFlags: u16 {
        const DEAD = 1 << 0;
        const TELEPORTED = 1 << 1;
        const FIRING = 1 << 2;
        const CROUCHED = 1 << 3;
        const INVISIBLE = 1 << 4;
        const NO_DRAW = 1 << 5;
        const BOUNCE = 1 << 6;
        const TALKING = 1 << 7;
    }
}

impl FieldRepr for EntityFlags {
    fn into_field(self) -> FieldValue {
        FieldValue::Unsigned(self.bits() as u32)
    }

    fn from_field(value: FieldValue) -> Self {
        Self::from_bits_retain(value.as_u32() as u16)
    }
}

/// Networked state of one world entity. `number` is the key on the wire and is not
/// part of the delta.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EntityState {
    pub number: u16,
    pub entity_type: u8,
    pub flags: EntityFlags,
    pub origin: Vec3,
    pub velocity: Vec3,
    /// Pitch, yaw, roll in degrees.
    pub angles: Vec3,
    pub model_index: u16,
    pub animation_state: u8,
    pub animation_frame: u8,
    pub event: u16,
    pub event_param: u8,
    pub ground_entity: u16,
    pub owner: u16,
}

const ORIGIN: FieldKind = FieldKind::NetFloat {
    bits: 24,
    scale: 8.0,
};
const VELOCITY: FieldKind = FieldKind::NetFloat {
    bits: 18,
    scale: 4.0,
};
const ANGLE: FieldKind = FieldKind::NetFloat {
    bits: 17,
    scale: 65536.0 / 360.0,
};

static ENTITY_FIELDS: [FieldDescriptor<EntityState>; 18] = crate::field_table!(EntityState;
    ("origin.x", ORIGIN, false, origin.x),
    ("origin.y", ORIGIN, false, origin.y),
    ("origin.z", ORIGIN, false, origin.z),
    ("velocity.x", VELOCITY, true, velocity.x),
    ("velocity.y", VELOCITY, true, velocity.y),
    ("velocity.z", VELOCITY, true, velocity.z),
    ("angles.x", ANGLE, true, angles.x),
    ("angles.y", ANGLE, true, angles.y),
    ("angles.z", ANGLE, true, angles.z),
    ("entity_type", FieldKind::Unsigned(8), false, entity_type),
    ("flags", FieldKind::Unsigned(16), true, flags),
    ("model_index", FieldKind::Unsigned(10), false, model_index),
    ("animation_state", FieldKind::Unsigned(8), true, animation_state),
    ("animation_frame", FieldKind::Unsigned(8), true, animation_frame),
    ("event", FieldKind::Unsigned(10), true, event),
    ("event_param", FieldKind::Unsigned(8), true, event_param),
    ("ground_entity", FieldKind::Unsigned(10), false, ground_entity),
    ("owner", FieldKind::Unsigned(10), true, owner),
);

impl NetState for EntityState {
    fn fields() -> &'static [FieldDescriptor<Self>] {
        &ENTITY_FIELDS
    }
}

impl EntityState {
    pub fn new(number: u16, entity_type: EntityType) -> Self {
        Self {
            number,
            entity_type: entity_type as u8,
            ..Default::default()
        }
    }

    /// The all-zero state a newly spawned entity is delta-encoded against.
    pub fn baseline(number: u16) -> Self {
        Self {
            number,
            ..Default::default()
        }
    }

    pub fn kind(&self) -> EntityType {
        EntityType::from(self.entity_type)
    }

    pub fn with_origin(mut self, origin: Vec3) -> Self {
        self.origin = origin;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::{changed_fields, quantize, read_delta, write_delta, BitReader, BitWriter};

    #[test]
    fn test_moved_entity_sends_only_origin_x() {
        let old = EntityState::baseline(7);
        let new = old.with_origin(Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(changed_fields(&old, &new), vec!["origin.x"]);

        let mut writer = BitWriter::new();
        write_delta(&mut writer, &old, &new).unwrap();
        // changed flag, one presence bit per field, 24 bits of origin.x
        assert_eq!(writer.bits_written(), 1 + ENTITY_FIELDS.len() + 24);

        let bytes = writer.finish().unwrap();
        let decoded = read_delta(&mut BitReader::new(&bytes), &old).unwrap();
        assert_eq!(decoded.origin, Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(decoded.number, 7);
    }

    #[test]
    fn test_angles_cover_full_turn() {
        let state = EntityState {
            angles: Vec3::new(-90.0, 359.9, 180.0),
            ..EntityState::baseline(1)
        };
        let quantized = quantize(&state);
        assert!((quantized.angles.y - 359.9).abs() < 0.01);

        let mut writer = BitWriter::new();
        assert!(write_delta(&mut writer, &EntityState::baseline(1), &quantized).unwrap());
    }

    #[test]
    fn test_origin_out_of_range_is_rejected() {
        let state = EntityState::baseline(1).with_origin(Vec3::new(2.0e6, 0.0, 0.0));
        let mut writer = BitWriter::new();
        assert!(write_delta(&mut writer, &EntityState::baseline(1), &state).is_err());
        assert!(writer.is_empty());
    }

    #[test]
    fn test_entity_type_fallback() {
        assert_eq!(EntityType::from(3), EntityType::Missile);
        assert_eq!(EntityType::from(200), EntityType::General);
        assert_eq!(EntityState::new(4, EntityType::Item).kind(), EntityType::Item);
    }
}
