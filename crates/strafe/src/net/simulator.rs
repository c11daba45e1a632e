use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::stats::PacketLossSimulation;
use super::transport::Transport;

#[derive(Debug)]
struct DelayedPacket {
    release_time: Instant,
    order: u64,
    data: Vec<u8>,
    addr: SocketAddr,
}

impl PartialEq for DelayedPacket {
    fn eq(&self, other: &Self) -> bool {
        self.release_time == other.release_time && self.order == other.order
    }
}

impl Eq for DelayedPacket {}

impl PartialOrd for DelayedPacket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedPacket {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        other
            .release_time
            .cmp(&self.release_time)
            .then_with(|| other.order.cmp(&self.order))
    }
}

#[derive(Debug, Default)]
struct DelayQueue {
    heap: BinaryHeap<DelayedPacket>,
    next_order: u64,
}

impl DelayQueue {
    fn push(&mut self, data: Vec<u8>, addr: SocketAddr, delay: Duration) {
        self.heap.push(DelayedPacket {
            release_time: Instant::now() + delay,
            order: self.next_order,
            data,
            addr,
        });
        self.next_order += 1;
    }

    fn pop_ready(&mut self, now: Instant) -> Option<(Vec<u8>, SocketAddr)> {
        if self.heap.peek()?.release_time > now {
            return None;
        }
        self.heap.pop().map(|delayed| (delayed.data, delayed.addr))
    }
}

/// Wraps a transport with simulated loss, latency, jitter and duplication in both
/// directions.
#[derive(Debug)]
pub struct NetworkSimulator<T> {
    inner: T,
    outbound_config: PacketLossSimulation,
    inbound_config: PacketLossSimulation,
    outbound: DelayQueue,
    inbound: DelayQueue,
}

impl<T: Transport> NetworkSimulator<T> {
    pub fn new(inner: T, config: PacketLossSimulation) -> Self {
        Self {
            inner,
            outbound_config: config.clone(),
            inbound_config: config,
            outbound: DelayQueue::default(),
            inbound: DelayQueue::default(),
        }
    }

    pub fn set_outbound(&mut self, config: PacketLossSimulation) {
        self.outbound_config = config;
    }

    pub fn set_inbound(&mut self, config: PacketLossSimulation) {
        self.inbound_config = config;
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Releases delayed outbound datagrams whose time has come.
    pub fn flush(&mut self) -> io::Result<()> {
        let now = Instant::now();
        while let Some((data, addr)) = self.outbound.pop_ready(now) {
            self.inner.send(&data, addr)?;
        }
        Ok(())
    }
}

impl<T: Transport> Transport for NetworkSimulator<T> {
    fn send(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<()> {
        if !self.outbound_config.should_drop() {
            let copies = 1 + self.outbound_config.should_duplicate() as usize;
            for _ in 0..copies {
                let delay = Duration::from_millis(self.outbound_config.delay_ms() as u64);
                self.outbound.push(data.to_vec(), addr, delay);
            }
        }
        self.flush()
    }

    fn poll_receive(&mut self) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        self.flush()?;

        while let Some((data, addr)) = self.inner.poll_receive()? {
            if self.inbound_config.should_drop() {
                continue;
            }
            let copies = 1 + self.inbound_config.should_duplicate() as usize;
            for _ in 0..copies {
                let delay = Duration::from_millis(self.inbound_config.delay_ms() as u64);
                self.inbound.push(data.clone(), addr, delay);
            }
        }

        Ok(self.inbound.pop_ready(Instant::now()))
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }
}
