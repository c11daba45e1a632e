use bitflags::bitflags;
use glam::Vec3;

use super::protocol::MAX_PACKET_USERCMDS;
use crate::bitstream::{
    read_delta, write_delta, BitReader, BitWriter, CodecError, FieldDescriptor, FieldKind,
    FieldRepr, FieldValue, NetState,
};

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Buttons: u16 {
        const ATTACK = 1 << 0;
        const JUMP = 1 << 1;
        const CROUCH = 1 << 2;
        const USE = 1 << 3;
        const WALK = 1 << 4;
        const RELOAD = 1 << 5;
        const ALT_ATTACK = 1 << 6;
        const TALK = 1 << 7;
    }
}

impl FieldRepr for Buttons {
    fn into_field(self) -> FieldValue {
        FieldValue::Unsigned(self.bits() as u32)
    }

    fn from_field(value: FieldValue) -> Self {
        Self::from_bits_retain(value.as_u32() as u16)
    }
}

/// One frame of player input.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UserCmd {
    pub server_time: i32,
    /// View angles as 16-bit fractions of a full turn.
    pub pitch: u16,
    pub yaw: u16,
    pub roll: u16,
    pub forward: i8,
    pub right: i8,
    pub up: i8,
    pub buttons: Buttons,
    pub weapon: u8,
}

static USERCMD_FIELDS: [FieldDescriptor<UserCmd>; 9] = crate::field_table!(UserCmd;
    ("server_time", FieldKind::Signed(32), false, server_time),
    ("pitch", FieldKind::Unsigned(16), false, pitch),
    ("yaw", FieldKind::Unsigned(16), false, yaw),
    ("roll", FieldKind::Unsigned(16), true, roll),
    ("forward", FieldKind::Signed(8), true, forward),
    ("right", FieldKind::Signed(8), true, right),
    ("up", FieldKind::Signed(8), true, up),
    ("buttons", FieldKind::Unsigned(16), true, buttons),
    ("weapon", FieldKind::Unsigned(8), false, weapon),
);

impl NetState for UserCmd {
    fn fields() -> &'static [FieldDescriptor<Self>] {
        &USERCMD_FIELDS
    }
}

#[inline]
pub fn angle_to_short(degrees: f32) -> u16 {
    ((degrees * 65536.0 / 360.0).round() as i32 & 0xFFFF) as u16
}

#[inline]
pub fn short_to_angle(short: u16) -> f32 {
    short as f32 * (360.0 / 65536.0)
}

fn normalize_degrees(angle: f32) -> f32 {
    let mut normalized = angle % 360.0;
    if normalized > 180.0 {
        normalized -= 360.0;
    } else if normalized < -180.0 {
        normalized += 360.0;
    }
    normalized
}

impl UserCmd {
    pub fn new(server_time: i32) -> Self {
        Self {
            server_time,
            ..Default::default()
        }
    }

    /// Movement axes in `-1.0..=1.0` (forward, right, up).
    pub fn move_direction(&self) -> Vec3 {
        Vec3::new(
            self.forward as f32 / 127.0,
            self.right as f32 / 127.0,
            self.up as f32 / 127.0,
        )
    }

    pub fn set_move_direction(&mut self, dir: Vec3) {
        let dir = dir.clamp(Vec3::splat(-1.0), Vec3::splat(1.0)) * 127.0;
        self.forward = dir.x as i8;
        self.right = dir.y as i8;
        self.up = dir.z as i8;
    }

    /// Pitch, yaw, roll in degrees, each in `-180.0..180.0`.
    pub fn view_angles(&self) -> Vec3 {
        Vec3::new(
            normalize_degrees(short_to_angle(self.pitch)),
            normalize_degrees(short_to_angle(self.yaw)),
            normalize_degrees(short_to_angle(self.roll)),
        )
    }

    pub fn set_view_angles(&mut self, degrees: Vec3) {
        self.pitch = angle_to_short(degrees.x);
        self.yaw = angle_to_short(degrees.y);
        self.roll = angle_to_short(degrees.z);
    }

    #[inline]
    pub fn has_button(&self, button: Buttons) -> bool {
        self.buttons.contains(button)
    }
}

/// Writes a run of commands, oldest first, each delta-compressed against the one before.
pub fn write_usercmds(writer: &mut BitWriter, commands: &[UserCmd]) -> Result<(), CodecError> {
    if commands.len() > MAX_PACKET_USERCMDS {
        return Err(CodecError::FieldOutOfRange {
            field: "usercmd_count",
            bits: 5,
        });
    }

    writer.write_u8(commands.len() as u8);
    let mut previous = UserCmd::default();
    for command in commands {
        write_delta(writer, &previous, command)?;
        previous = *command;
    }
    Ok(())
}

pub fn read_usercmds(reader: &mut BitReader<'_>) -> Result<Vec<UserCmd>, CodecError> {
    let count = reader.read_u8()? as usize;
    if count > MAX_PACKET_USERCMDS {
        return Err(CodecError::FieldOutOfRange {
            field: "usercmd_count",
            bits: 5,
        });
    }

    let mut commands = Vec::with_capacity(count);
    let mut previous = UserCmd::default();
    for _ in 0..count {
        let command = read_delta(reader, &previous)?;
        commands.push(command);
        previous = command;
    }
    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_direction_encoding() {
        let mut cmd = UserCmd::new(100);
        cmd.set_move_direction(Vec3::new(1.0, -0.5, 3.0));
        assert_eq!(cmd.forward, 127);
        assert_eq!(cmd.right, -63);
        assert_eq!(cmd.up, 127);
        assert!((cmd.move_direction().x - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_view_angles_wrap() {
        let mut cmd = UserCmd::default();
        cmd.set_view_angles(Vec3::new(-45.0, 270.0, 0.0));
        let angles = cmd.view_angles();
        assert!((angles.x + 45.0).abs() < 0.01);
        assert!((angles.y + 90.0).abs() < 0.01);
    }

    #[test]
    fn test_command_run_roundtrip() {
        let mut commands = Vec::new();
        for i in 0..3 {
            let mut cmd = UserCmd::new(1000 + i * 16);
            cmd.forward = 127;
            cmd.buttons = if i == 1 { Buttons::JUMP } else { Buttons::empty() };
            cmd.set_view_angles(Vec3::new(0.0, i as f32 * 10.0, 0.0));
            commands.push(cmd);
        }

        let mut writer = BitWriter::new();
        write_usercmds(&mut writer, &commands).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = BitReader::new(&bytes);
        assert_eq!(read_usercmds(&mut reader).unwrap(), commands);
    }

    #[test]
    fn test_repeated_command_is_cheap() {
        let cmd = UserCmd::new(5);
        let mut writer = BitWriter::new();
        write_usercmds(&mut writer, &[cmd, cmd]).unwrap();
        let first = writer.bits_written();

        // count byte, then a full delta, then one unchanged bit
        let mut single = BitWriter::new();
        write_usercmds(&mut single, &[cmd]).unwrap();
        assert_eq!(first, single.bits_written() + 1);
    }
}
