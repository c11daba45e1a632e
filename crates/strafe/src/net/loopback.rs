use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};

use super::protocol::MAX_PACKET_SIZE;
use super::transport::Transport;

type Mailboxes = HashMap<SocketAddr, VecDeque<(Vec<u8>, SocketAddr)>>;

/// In-memory datagram network. Every bound [`LoopbackTransport`] gets a mailbox;
/// datagrams to unbound addresses vanish like UDP to a closed port.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    mailboxes: Arc<Mutex<Mailboxes>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, addr: SocketAddr) -> io::Result<LoopbackTransport> {
        let mut mailboxes = self.lock();
        if mailboxes.contains_key(&addr) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{} already bound", addr),
            ));
        }
        mailboxes.insert(addr, VecDeque::new());

        Ok(LoopbackTransport {
            network: self.clone(),
            local_addr: addr,
        })
    }

    /// Binds `127.0.0.1:port`.
    pub fn bind_port(&self, port: u16) -> io::Result<LoopbackTransport> {
        self.bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
    }

    pub fn queued(&self, addr: SocketAddr) -> usize {
        self.lock().get(&addr).map_or(0, VecDeque::len)
    }

    fn lock(&self) -> MutexGuard<'_, Mailboxes> {
        // a panicking test thread must not wedge every other transport
        self.mailboxes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug)]
pub struct LoopbackTransport {
    network: LoopbackNetwork,
    local_addr: SocketAddr,
}

impl Transport for LoopbackTransport {
    fn send(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<()> {
        if data.len() > MAX_PACKET_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Packet exceeds MTU",
            ));
        }
        if let Some(mailbox) = self.network.lock().get_mut(&addr) {
            mailbox.push_back((data.to_vec(), self.local_addr));
        }
        Ok(())
    }

    fn poll_receive(&mut self) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        Ok(self
            .network
            .lock()
            .get_mut(&self.local_addr)
            .and_then(VecDeque::pop_front))
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.network.lock().remove(&self.local_addr);
    }
}
