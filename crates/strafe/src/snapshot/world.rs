use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use glam::Vec3;

use crate::net::ENTITY_SENTINEL;

use super::entity::{EntityState, EntityType};
use super::player::PlayerState;

/// What the game rules hand the snapshot builder each tick.
pub trait WorldSource {
    /// Milliseconds since the world started.
    fn server_time(&self) -> u32;

    fn entities(&self) -> Vec<&EntityState>;

    fn player_state(&self, client_num: u8) -> PlayerState;

    /// Entities relevant to one client. Everything by default.
    fn visible_entities(&self, client_num: u8) -> Vec<&EntityState> {
        let _ = client_num;
        self.entities()
    }
}

/// Minimal entity store for hosts and tests that have no game rules of their own.
#[derive(Debug)]
pub struct EntityWorld {
    tick: u32,
    started: Instant,
    entities: BTreeMap<u16, EntityState>,
    players: HashMap<u8, PlayerState>,
    next_entity_id: u16,
}

impl Default for EntityWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityWorld {
    pub fn new() -> Self {
        Self {
            tick: 0,
            started: Instant::now(),
            entities: BTreeMap::new(),
            players: HashMap::new(),
            next_entity_id: 1,
        }
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn advance_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    /// Returns `None` when every entity number is taken.
    pub fn spawn(&mut self, entity_type: EntityType) -> Option<u16> {
        let number = self.allocate_id()?;
        self.entities
            .insert(number, EntityState::new(number, entity_type));
        Some(number)
    }

    pub fn spawn_at(&mut self, entity_type: EntityType, origin: Vec3) -> Option<u16> {
        let number = self.spawn(entity_type)?;
        if let Some(entity) = self.entities.get_mut(&number) {
            entity.origin = origin;
        }
        Some(number)
    }

    /// Inserts or replaces the entity stored under `state.number`.
    pub fn insert(&mut self, state: EntityState) {
        self.entities.insert(state.number, state);
    }

    pub fn despawn(&mut self, number: u16) -> Option<EntityState> {
        self.entities.remove(&number)
    }

    pub fn get(&self, number: u16) -> Option<&EntityState> {
        self.entities.get(&number)
    }

    pub fn get_mut(&mut self, number: u16) -> Option<&mut EntityState> {
        self.entities.get_mut(&number)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut EntityState> {
        self.entities.values_mut()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn set_player(&mut self, state: PlayerState) {
        self.players.insert(state.client_num, state);
    }

    pub fn player(&self, client_num: u8) -> Option<&PlayerState> {
        self.players.get(&client_num)
    }

    pub fn player_mut(&mut self, client_num: u8) -> Option<&mut PlayerState> {
        self.players.get_mut(&client_num)
    }

    pub fn remove_player(&mut self, client_num: u8) -> Option<PlayerState> {
        self.players.remove(&client_num)
    }

    fn allocate_id(&mut self) -> Option<u16> {
        if self.entities.len() >= ENTITY_SENTINEL as usize {
            return None;
        }
        let mut candidate = self.next_entity_id;
        while self.entities.contains_key(&candidate) {
            candidate = (candidate + 1) % ENTITY_SENTINEL;
        }
        self.next_entity_id = (candidate + 1) % ENTITY_SENTINEL;
        Some(candidate)
    }
}

impl WorldSource for EntityWorld {
    fn server_time(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    fn entities(&self) -> Vec<&EntityState> {
        self.entities.values().collect()
    }

    fn player_state(&self, client_num: u8) -> PlayerState {
        self.players
            .get(&client_num)
            .copied()
            .unwrap_or_else(|| PlayerState::new(client_num))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_assigns_ascending_numbers() {
        let mut world = EntityWorld::new();
        let a = world.spawn(EntityType::Player).unwrap();
        let b = world.spawn_at(EntityType::Item, Vec3::Y).unwrap();

        assert_eq!((a, b), (1, 2));
        assert_eq!(world.get(b).unwrap().origin, Vec3::Y);
        assert_eq!(world.entities().len(), 2);
    }

    #[test]
    fn test_numbers_are_reused_after_wrap() {
        let mut world = EntityWorld::new();
        for _ in 0..(ENTITY_SENTINEL - 1) {
            world.spawn(EntityType::General).unwrap();
        }
        assert_eq!(world.spawn(EntityType::General), Some(0));
        assert_eq!(world.spawn(EntityType::General), None);

        world.despawn(7);
        assert_eq!(world.spawn(EntityType::General), Some(7));
    }

    #[test]
    fn test_missing_player_gets_defaults() {
        let mut world = EntityWorld::new();
        assert_eq!(world.player_state(3), PlayerState::new(3));

        let mut state = PlayerState::new(3);
        state.health = 5;
        world.set_player(state);
        assert_eq!(world.player_state(3).health, 5);
    }
}
