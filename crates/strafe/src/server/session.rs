use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use crate::net::{Channel, UserCmd};
use crate::snapshot::{ConnectionState, SnapshotConfig};

/// One connected client.
#[derive(Debug)]
pub struct ClientSession {
    pub client_num: u32,
    pub userinfo: String,
    pub channel: Channel,
    pub snapshots: ConnectionState,
    /// Newest user command received, used to filter the repeats in later packets.
    pub last_usercmd: Option<UserCmd>,
    pub connected_at: Instant,
}

impl ClientSession {
    pub fn new(
        client_num: u32,
        channel: Channel,
        userinfo: String,
        snapshot_config: SnapshotConfig,
    ) -> Self {
        Self {
            client_num,
            userinfo,
            channel,
            snapshots: ConnectionState::new(snapshot_config),
            last_usercmd: None,
            connected_at: Instant::now(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.channel.remote()
    }

    pub fn name(&self) -> &str {
        userinfo_value(&self.userinfo, "name").unwrap_or("unnamed")
    }

    pub fn ping_ms(&self) -> u32 {
        self.snapshots.rtt().ping_ms()
    }

    /// Drops commands already seen and remembers the newest one.
    pub fn accept_usercmds(&mut self, commands: Vec<UserCmd>) -> Vec<UserCmd> {
        let fresh: Vec<UserCmd> = commands
            .into_iter()
            .filter(|cmd| {
                self.last_usercmd
                    .is_none_or(|last| cmd.server_time > last.server_time)
            })
            .collect();
        if let Some(newest) = fresh.last() {
            self.last_usercmd = Some(*newest);
        }
        fresh
    }
}

/// Value of `key` in a `key=value;key=value` userinfo string.
pub fn userinfo_value<'a>(userinfo: &'a str, key: &str) -> Option<&'a str> {
    userinfo
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| k.trim() == key)
        .map(|(_, v)| v.trim())
}

/// Fixed set of client slots, addressable by slot number and by remote address.
/// Client numbers index the world's per-player state by `u8`.
pub const MAX_CLIENTS: usize = u8::MAX as usize + 1;

#[derive(Debug)]
pub struct SessionTable {
    slots: Vec<Option<ClientSession>>,
    by_addr: HashMap<SocketAddr, u32>,
}

impl SessionTable {
    pub fn new(max_clients: usize) -> Self {
        Self {
            slots: (0..max_clients.clamp(1, MAX_CLIENTS)).map(|_| None).collect(),
            by_addr: HashMap::new(),
        }
    }

    pub fn max_clients(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }

    pub fn free_slot(&self) -> Option<u32> {
        self.slots
            .iter()
            .position(Option::is_none)
            .map(|slot| slot as u32)
    }

    pub fn slot_of(&self, addr: SocketAddr) -> Option<u32> {
        self.by_addr.get(&addr).copied()
    }

    /// Stores `session` in its slot, returning whatever occupied it.
    pub fn insert(&mut self, session: ClientSession) -> Option<ClientSession> {
        let slot = session.client_num as usize;
        if slot >= self.slots.len() {
            self.slots.resize_with(slot + 1, || None);
        }

        let previous = self.remove(session.client_num);
        self.by_addr.insert(session.addr(), session.client_num);
        self.slots[slot] = Some(session);
        previous
    }

    pub fn get(&self, client_num: u32) -> Option<&ClientSession> {
        self.slots.get(client_num as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, client_num: u32) -> Option<&mut ClientSession> {
        self.slots.get_mut(client_num as usize)?.as_mut()
    }

    pub fn get_by_addr_mut(&mut self, addr: SocketAddr) -> Option<&mut ClientSession> {
        let client_num = self.slot_of(addr)?;
        self.get_mut(client_num)
    }

    pub fn remove(&mut self, client_num: u32) -> Option<ClientSession> {
        let session = self.slots.get_mut(client_num as usize)?.take()?;
        self.by_addr.remove(&session.addr());
        Some(session)
    }

    pub fn remove_by_addr(&mut self, addr: SocketAddr) -> Option<ClientSession> {
        let client_num = self.slot_of(addr)?;
        self.remove(client_num)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientSession> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientSession> {
        self.slots.iter_mut().flatten()
    }

    pub fn client_nums(&self) -> Vec<u32> {
        self.iter().map(|s| s.client_num).collect()
    }
}
