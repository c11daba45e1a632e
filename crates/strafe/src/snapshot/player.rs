use glam::Vec3;

use crate::bitstream::{FieldDescriptor, FieldKind, NetState};

/// The receiving client's own state. Sent every snapshot, delta-compressed like an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayerState {
    /// Server time of the last user command applied to this state.
    pub command_time: i32,
    pub pm_type: u8,
    pub pm_flags: u16,
    pub pm_time: u16,
    /// Sent verbatim; prediction needs the exact position.
    pub origin: Vec3,
    pub velocity: Vec3,
    pub view_angles: Vec3,
    pub view_height: i8,
    pub gravity: i16,
    pub speed: i16,
    pub ground_entity: u16,
    pub weapon: u8,
    pub weapon_state: u8,
    pub health: i16,
    pub armor: i16,
    pub client_num: u8,
    pub event_sequence: u16,
}

const VELOCITY: FieldKind = FieldKind::NetFloat {
    bits: 20,
    scale: 16.0,
};
const VIEW_ANGLE: FieldKind = FieldKind::NetFloat {
    bits: 17,
    scale: 65536.0 / 360.0,
};

static PLAYER_FIELDS: [FieldDescriptor<PlayerState>; 23] = crate::field_table!(PlayerState;
    ("command_time", FieldKind::Signed(32), false, command_time),
    ("origin.x", FieldKind::Float, false, origin.x),
    ("origin.y", FieldKind::Float, false, origin.y),
    ("origin.z", FieldKind::Float, false, origin.z),
    ("velocity.x", VELOCITY, true, velocity.x),
    ("velocity.y", VELOCITY, true, velocity.y),
    ("velocity.z", VELOCITY, true, velocity.z),
    ("view_angles.x", VIEW_ANGLE, false, view_angles.x),
    ("view_angles.y", VIEW_ANGLE, false, view_angles.y),
    ("view_angles.z", VIEW_ANGLE, true, view_angles.z),
    ("pm_type", FieldKind::Unsigned(8), false, pm_type),
    ("pm_flags", FieldKind::Unsigned(16), true, pm_flags),
    ("pm_time", FieldKind::Unsigned(16), true, pm_time),
    ("view_height", FieldKind::Signed(8), false, view_height),
    ("gravity", FieldKind::Signed(16), false, gravity),
    ("speed", FieldKind::Signed(16), false, speed),
    ("ground_entity", FieldKind::Unsigned(10), false, ground_entity),
    ("weapon", FieldKind::Unsigned(5), false, weapon),
    ("weapon_state", FieldKind::Unsigned(4), true, weapon_state),
    ("health", FieldKind::Signed(16), false, health),
    ("armor", FieldKind::Signed(16), true, armor),
    ("client_num", FieldKind::Unsigned(8), false, client_num),
    ("event_sequence", FieldKind::Unsigned(16), true, event_sequence),
);

impl NetState for PlayerState {
    fn fields() -> &'static [FieldDescriptor<Self>] {
        &PLAYER_FIELDS
    }
}

impl PlayerState {
    pub fn new(client_num: u8) -> Self {
        Self {
            client_num,
            gravity: 800,
            speed: 320,
            view_height: 26,
            health: 100,
            ..Default::default()
        }
    }

    pub fn is_dead(&self) -> bool {
        self.health <= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::{quantize, read_delta, write_delta, BitReader, BitWriter};

    #[test]
    fn test_origin_is_exact() {
        let old = PlayerState::new(0);
        let new = PlayerState {
            origin: Vec3::new(123.456, -7.0001, 0.125),
            ..old
        };

        let mut writer = BitWriter::new();
        write_delta(&mut writer, &old, &new).unwrap();
        let bytes = writer.finish().unwrap();

        let decoded = read_delta(&mut BitReader::new(&bytes), &old).unwrap();
        assert_eq!(decoded.origin, new.origin);
    }

    #[test]
    fn test_quantized_velocity_roundtrips() {
        let old = PlayerState::default();
        let new = quantize(&PlayerState {
            velocity: Vec3::new(320.3, -0.01, 270.0),
            health: -40,
            ..PlayerState::new(3)
        });

        let mut writer = BitWriter::new();
        write_delta(&mut writer, &old, &new).unwrap();
        let bytes = writer.finish().unwrap();

        assert_eq!(read_delta(&mut BitReader::new(&bytes), &old).unwrap(), new);
        assert!(new.is_dead());
    }

    #[test]
    fn test_weapon_is_five_bits() {
        let mut writer = BitWriter::new();
        let armed = PlayerState {
            weapon: 32,
            ..Default::default()
        };
        assert!(write_delta(&mut writer, &PlayerState::default(), &armed).is_err());
    }
}
