use glam::Vec3;

use strafe::net::Buttons;
use strafe::{EntityState, EntityType, EntityWorld, PlayerState, UserCmd};

const RUN_SPEED: f32 = 320.0;
const WALK_SPEED: f32 = 160.0;
const JUMP_VELOCITY: f32 = 270.0;
const ARENA_RADIUS: f32 = 2048.0;

/// Moves one player by a single command. The command's own frame time drives the step.
pub fn apply_usercmd(player: &mut PlayerState, entity: &mut EntityState, cmd: &UserCmd) {
    let msec = (cmd.server_time - player.command_time).clamp(0, 200);
    player.command_time = cmd.server_time;
    if msec == 0 {
        return;
    }
    let dt = msec as f32 / 1000.0;

    let angles = cmd.view_angles();
    player.view_angles = angles;

    let speed = if cmd.has_button(Buttons::WALK) {
        WALK_SPEED
    } else {
        RUN_SPEED
    };

    let wish = cmd.move_direction();
    let (sin_yaw, cos_yaw) = angles.y.to_radians().sin_cos();
    let forward = Vec3::new(cos_yaw, sin_yaw, 0.0);
    let right = Vec3::new(sin_yaw, -cos_yaw, 0.0);
    let planar = (forward * wish.x + right * wish.y).clamp_length_max(1.0) * speed;

    player.velocity.x = planar.x;
    player.velocity.y = planar.y;

    let grounded = player.origin.z <= 0.0;
    if grounded && cmd.has_button(Buttons::JUMP) {
        player.velocity.z = JUMP_VELOCITY;
    }
    if !grounded || player.velocity.z > 0.0 {
        player.velocity.z -= player.gravity as f32 * dt;
    }

    player.origin += player.velocity * dt;
    if player.origin.z < 0.0 {
        player.origin.z = 0.0;
        player.velocity.z = 0.0;
    }
    player.origin = player
        .origin
        .clamp(Vec3::splat(-ARENA_RADIUS), Vec3::splat(ARENA_RADIUS));

    entity.origin = player.origin;
    entity.velocity = player.velocity;
    entity.angles = angles;
}

/// Advances everything the game owns rather than a client.
pub fn simulate_world(world: &mut EntityWorld, dt: f32) {
    for entity in world.iter_mut() {
        match entity.kind() {
            EntityType::Missile => simulate_missile(entity, dt),
            EntityType::Mover => simulate_mover(entity, dt),
            _ => {}
        }
    }
}

fn simulate_missile(entity: &mut EntityState, dt: f32) {
    entity.velocity.z -= 800.0 * dt;
    entity.origin += entity.velocity * dt;

    if entity.origin.z < 0.0 {
        entity.origin.z = 0.0;
        entity.velocity = Vec3::ZERO;
    }
}

fn simulate_mover(entity: &mut EntityState, dt: f32) {
    entity.angles.y = (entity.angles.y + 45.0 * dt) % 360.0;
    let (sin, cos) = entity.angles.y.to_radians().sin_cos();
    entity.origin = Vec3::new(cos * 256.0, sin * 256.0, entity.origin.z);
}

/// Props the demo arena starts with.
pub fn populate(world: &mut EntityWorld) {
    world.spawn_at(EntityType::Mover, Vec3::new(256.0, 0.0, 64.0));
    world.spawn_at(EntityType::Item, Vec3::new(-128.0, 128.0, 0.0));
    world.spawn_at(EntityType::Speaker, Vec3::new(0.0, -512.0, 96.0));
}
