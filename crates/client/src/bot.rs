use glam::Vec3;

use strafe::net::Buttons;
use strafe::UserCmd;

/// Scripted input: runs in a circle and jumps now and then.
pub struct Bot {
    yaw: f32,
    turn_rate: f32,
    jump_every_ms: i32,
    last_jump: i32,
}

impl Bot {
    pub fn new(turn_rate: f32) -> Self {
        Self {
            yaw: 0.0,
            turn_rate,
            jump_every_ms: 1500,
            last_jump: 0,
        }
    }

    /// Input for the frame ending at `server_time`, `frame_ms` after the previous one.
    pub fn next_command(&mut self, server_time: i32, frame_ms: i32) -> UserCmd {
        self.yaw = (self.yaw + self.turn_rate * frame_ms as f32 / 1000.0) % 360.0;

        let mut cmd = UserCmd::new(server_time);
        cmd.set_view_angles(Vec3::new(0.0, self.yaw, 0.0));
        cmd.set_move_direction(Vec3::new(1.0, 0.0, 0.0));

        if server_time - self.last_jump >= self.jump_every_ms {
            self.last_jump = server_time;
            cmd.buttons |= Buttons::JUMP;
        }
        cmd
    }
}
