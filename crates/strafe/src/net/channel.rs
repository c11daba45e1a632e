use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

use super::error::NetError;
use super::fragment::{FragmentArena, MAX_FRAGMENTED_SIZE};
use super::protocol::{
    sequence_greater_than, next_sequence, MAX_COMMAND_LENGTH, MAX_PACKET_SIZE,
    MAX_RELIABLE_COMMANDS, MAX_RELIABLE_WINDOW,
};
use super::reliable::{ReliableInbox, ReliableQueue};
use super::stats::NetworkStats;
use super::transport::Transport;
use crate::bitstream::{BitReader, BitWriter, CodecError};

/// `sequence: u32` + `flags: u8`.
pub const PACKET_HEADER_SIZE: usize = 5;
/// Header of a start fragment: `offset: u16` and `total_size: u16` follow the packet header.
pub const FRAGMENT_HEADER_SIZE: usize = PACKET_HEADER_SIZE + 4;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PacketFlags: u8 {
        const FRAGMENT = 0b0000_0001;
        const FRAGMENT_START = 0b0000_0010;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub max_packet_size: usize,
    pub reliable_window: usize,
    pub timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
            reliable_window: MAX_RELIABLE_COMMANDS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl ChannelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Clamps the packet size to what endpoints can carry and the reliable window to
    /// what the packet format can count.
    pub fn normalized(mut self) -> Self {
        self.max_packet_size = self
            .max_packet_size
            .clamp(FRAGMENT_HEADER_SIZE + 1, MAX_PACKET_SIZE);
        self.reliable_window = self.reliable_window.clamp(1, MAX_RELIABLE_WINDOW);
        self
    }

    fn fragment_payload(&self) -> usize {
        self.max_packet_size - FRAGMENT_HEADER_SIZE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unbound,
    Connecting,
    Established,
    Closed,
}

/// Sequenced, fragmenting, partially reliable link to one peer.
///
/// Every payload is unreliable and newest-wins: a datagram whose sequence is not newer
/// than the last delivered one is dropped. Small text commands ride along reliably in
/// every packet until the peer acknowledges them.
#[derive(Debug)]
pub struct Channel {
    remote: SocketAddr,
    state: ChannelState,
    config: ChannelConfig,
    outgoing_sequence: u32,
    incoming_sequence: Option<u32>,
    fragments: FragmentArena,
    reliable_out: ReliableQueue,
    reliable_in: ReliableInbox,
    last_receive_time: Instant,
    stats: NetworkStats,
}

impl Channel {
    pub fn new(remote: SocketAddr, config: ChannelConfig) -> Self {
        let config = config.normalized();
        Self {
            remote,
            state: ChannelState::Unbound,
            reliable_out: ReliableQueue::new(config.reliable_window),
            reliable_in: ReliableInbox::new(),
            config,
            outgoing_sequence: 0,
            incoming_sequence: None,
            fragments: FragmentArena::new(),
            last_receive_time: Instant::now(),
            stats: NetworkStats::default(),
        }
    }

    /// A channel that skips the handshake, as handed out by the server after `Connect`.
    pub fn established(remote: SocketAddr, config: ChannelConfig) -> Self {
        let mut channel = Self::new(remote, config);
        channel.state = ChannelState::Established;
        channel
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == ChannelState::Established
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    /// Sequence the next outgoing message will carry.
    pub fn outgoing_sequence(&self) -> u32 {
        self.outgoing_sequence
    }

    /// Sequence of the last delivered incoming message.
    pub fn incoming_sequence(&self) -> Option<u32> {
        self.incoming_sequence
    }

    pub fn pending_reliable(&self) -> usize {
        self.reliable_out.len()
    }

    pub fn begin_connect(&mut self) {
        if self.state == ChannelState::Unbound {
            self.state = ChannelState::Connecting;
            self.touch();
        }
    }

    pub fn establish(&mut self) {
        if self.state != ChannelState::Closed {
            self.state = ChannelState::Established;
            self.touch();
        }
    }

    pub fn touch(&mut self) {
        self.last_receive_time = Instant::now();
    }

    pub fn time_since_receive(&self) -> Duration {
        self.last_receive_time.elapsed()
    }

    /// Queues a reliable command for the peer.
    ///
    /// Exhausting the window closes the channel; that call reports `ReliableOverflow` and
    /// every later call `ChannelClosed`.
    pub fn queue_command(&mut self, command: &str) -> Result<u32, NetError> {
        if self.state == ChannelState::Closed {
            return Err(NetError::ChannelClosed);
        }
        if command.len() > MAX_COMMAND_LENGTH {
            return Err(CodecError::StringTooLong {
                len: command.len(),
                max: MAX_COMMAND_LENGTH,
            }
            .into());
        }

        match self.reliable_out.push(command.to_owned()) {
            Ok(index) => Ok(index),
            Err(e) => {
                warn!(
                    "{}: {} unacknowledged reliable commands, closing",
                    self.remote,
                    self.reliable_out.len()
                );
                self.close();
                Err(e)
            }
        }
    }

    /// Commands received from the peer, in index order.
    pub fn drain_commands(&mut self) -> impl Iterator<Item = String> + '_ {
        self.reliable_in.drain()
    }

    /// Wraps `payload` into one or more datagrams under a fresh sequence number.
    pub fn packetize(&mut self, payload: &[u8]) -> Result<Vec<Vec<u8>>, NetError> {
        match self.state {
            ChannelState::Established => {}
            ChannelState::Closed => return Err(NetError::ChannelClosed),
            _ => return Err(NetError::NotEstablished),
        }

        let message = self.write_message(payload)?;
        let sequence = self.outgoing_sequence;

        let datagrams = if PACKET_HEADER_SIZE + message.len() <= self.config.max_packet_size {
            let mut datagram = Vec::with_capacity(PACKET_HEADER_SIZE + message.len());
            datagram.extend_from_slice(&sequence.to_le_bytes());
            datagram.push(PacketFlags::empty().bits());
            datagram.extend_from_slice(&message);
            vec![datagram]
        } else {
            self.fragment(sequence, &message)?
        };

        self.outgoing_sequence = next_sequence(sequence);
        Ok(datagrams)
    }

    fn write_message(&self, payload: &[u8]) -> Result<Vec<u8>, NetError> {
        let mut writer = BitWriter::with_limit(MAX_FRAGMENTED_SIZE);
        writer.write_u32(self.reliable_in.acknowledged());

        let pending = self.reliable_out.len();
        writer.write_u8(pending as u8);
        if pending > 0 {
            writer.write_u32(self.reliable_out.first_index());
            for command in self.reliable_out.unacknowledged() {
                writer.write_string(command, MAX_COMMAND_LENGTH)?;
            }
        }

        writer.align();
        writer.write_bytes(payload);

        writer.finish().map_err(|e| match e {
            CodecError::MessageOverflow { size, max } => NetError::PayloadTooLarge { size, max },
            other => other.into(),
        })
    }

    fn fragment(&self, sequence: u32, message: &[u8]) -> Result<Vec<Vec<u8>>, NetError> {
        if message.len() > MAX_FRAGMENTED_SIZE {
            return Err(NetError::PayloadTooLarge {
                size: message.len(),
                max: MAX_FRAGMENTED_SIZE,
            });
        }

        let chunk_size = self.config.fragment_payload();
        let datagrams = message
            .chunks(chunk_size)
            .enumerate()
            .map(|(i, chunk)| {
                let offset = i * chunk_size;
                let mut flags = PacketFlags::FRAGMENT;
                if offset == 0 {
                    flags |= PacketFlags::FRAGMENT_START;
                }

                let mut datagram = Vec::with_capacity(FRAGMENT_HEADER_SIZE + chunk.len());
                datagram.extend_from_slice(&sequence.to_le_bytes());
                datagram.push(flags.bits());
                datagram.extend_from_slice(&(offset as u16).to_le_bytes());
                if offset == 0 {
                    datagram.extend_from_slice(&(message.len() as u16).to_le_bytes());
                }
                datagram.extend_from_slice(chunk);
                datagram
            })
            .collect();

        Ok(datagrams)
    }

    /// Packetizes and sends `payload`. Returns the sequence it went out under.
    pub fn send<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        payload: &[u8],
    ) -> Result<u32, NetError> {
        let sequence = self.outgoing_sequence;
        let datagrams = self.packetize(payload)?;

        if datagrams.len() > 1 {
            trace!(
                "{}: sequence {} split into {} fragments",
                self.remote,
                sequence,
                datagrams.len()
            );
            self.stats.fragments_sent += datagrams.len() as u64;
        }

        for datagram in &datagrams {
            transport.send(datagram, self.remote)?;
            self.stats.packets_sent += 1;
            self.stats.bytes_sent += datagram.len() as u64;
        }

        Ok(sequence)
    }

    /// Feeds one sequenced datagram from the peer.
    ///
    /// Returns the payload of a newly completed message. Stale, duplicate, partial and
    /// malformed datagrams yield `None`; they are never errors.
    pub fn process(&mut self, datagram: &[u8]) -> Result<Option<Vec<u8>>, NetError> {
        match self.state {
            ChannelState::Established => {}
            ChannelState::Closed => return Err(NetError::ChannelClosed),
            _ => return Err(NetError::NotEstablished),
        }

        self.touch();
        self.stats.packets_received += 1;
        self.stats.bytes_received += datagram.len() as u64;

        let Some((sequence, flags, body)) = split_header(datagram) else {
            debug!("{}: malformed packet header", self.remote);
            self.stats.packets_malformed += 1;
            return Ok(None);
        };

        if self.is_stale(sequence) {
            trace!("{}: stale sequence {}", self.remote, sequence);
            self.stats.packets_duplicated += 1;
            return Ok(None);
        }

        let message = if flags.contains(PacketFlags::FRAGMENT) {
            self.stats.fragments_received += 1;
            match self.reassemble(sequence, flags, body) {
                Some(message) => message,
                None => return Ok(None),
            }
        } else {
            body.to_vec()
        };

        match self.read_message(&message) {
            Ok(payload) => {
                self.accept(sequence);
                Ok(Some(payload))
            }
            Err(e) => {
                debug!("{}: dropping message {}: {}", self.remote, sequence, e);
                self.stats.packets_malformed += 1;
                Ok(None)
            }
        }
    }

    fn is_stale(&self, sequence: u32) -> bool {
        self.incoming_sequence
            .is_some_and(|last| !sequence_greater_than(sequence, last))
    }

    fn reassemble(&mut self, sequence: u32, flags: PacketFlags, body: &[u8]) -> Option<Vec<u8>> {
        let header = if flags.contains(PacketFlags::FRAGMENT_START) { 4 } else { 2 };
        if body.len() < header {
            debug!("{}: truncated fragment header", self.remote);
            self.stats.packets_malformed += 1;
            return None;
        }

        let offset = u16::from_le_bytes([body[0], body[1]]);
        let total = flags
            .contains(PacketFlags::FRAGMENT_START)
            .then(|| u16::from_le_bytes([body[2], body[3]]));

        self.fragments
            .insert(sequence, offset, total, &body[header..])
    }

    fn read_message(&mut self, message: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut reader = BitReader::new(message);
        let ack = reader.read_u32()?;

        let count = reader.read_u8()? as usize;
        let mut commands = Vec::with_capacity(count);
        let mut first_index = 0;
        if count > 0 {
            first_index = reader.read_u32()?;
            for _ in 0..count {
                commands.push(reader.read_string(MAX_COMMAND_LENGTH)?);
            }
        }

        reader.align();
        let payload = reader.remaining_bytes().to_vec();

        self.reliable_out.acknowledge(ack);
        if count > 0 {
            self.reliable_in.receive(first_index, commands);
        }

        Ok(payload)
    }

    fn accept(&mut self, sequence: u32) {
        if let Some(last) = self.incoming_sequence {
            let skipped = sequence.wrapping_sub(last).wrapping_sub(1) as u64;
            if skipped > 0 {
                debug!(
                    "{}: {} packets dropped before {}",
                    self.remote, skipped, sequence
                );
                self.stats.packets_dropped += skipped;
            }
        }
        self.incoming_sequence = Some(sequence);
        self.fragments.discard_through(sequence);
    }

    /// Closes the channel if nothing arrived for the configured timeout. Reports
    /// `ConnectionTimedOut` once; a closed channel reports nothing.
    pub fn check_timeout(&mut self, now: Instant) -> Result<(), NetError> {
        if matches!(self.state, ChannelState::Unbound | ChannelState::Closed) {
            return Ok(());
        }

        if now.saturating_duration_since(self.last_receive_time) > self.config.timeout() {
            info!("{}: connection timed out", self.remote);
            self.close();
            return Err(NetError::ConnectionTimedOut);
        }
        Ok(())
    }

    /// Discards the fragment arena and both reliable queues.
    pub fn close(&mut self) {
        if self.state == ChannelState::Closed {
            return;
        }
        self.state = ChannelState::Closed;
        self.fragments.clear();
        self.reliable_out.clear();
        self.reliable_in.clear();
    }
}

/// Splits the packet header from the body. `None` for short datagrams and unknown flags.
pub fn split_header(datagram: &[u8]) -> Option<(u32, PacketFlags, &[u8])> {
    if datagram.len() < PACKET_HEADER_SIZE {
        return None;
    }
    let sequence = u32::from_le_bytes([datagram[0], datagram[1], datagram[2], datagram[3]]);
    let flags = PacketFlags::from_bits(datagram[4])?;
    if flags.contains(PacketFlags::FRAGMENT_START) && !flags.contains(PacketFlags::FRAGMENT) {
        return None;
    }
    Some((sequence, flags, &datagram[PACKET_HEADER_SIZE..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, port))
    }

    fn pair() -> (Channel, Channel) {
        (
            Channel::established(addr(2), ChannelConfig::default()),
            Channel::established(addr(1), ChannelConfig::default()),
        )
    }

    fn deliver(to: &mut Channel, datagrams: &[Vec<u8>]) -> Vec<Vec<u8>> {
        datagrams
            .iter()
            .filter_map(|d| to.process(d).unwrap())
            .collect()
    }

    #[test]
    fn test_small_payload_single_datagram() {
        let (mut a, mut b) = pair();
        let datagrams = a.packetize(b"hello").unwrap();
        assert_eq!(datagrams.len(), 1);
        assert_eq!(deliver(&mut b, &datagrams), vec![b"hello".to_vec()]);
        assert_eq!(b.incoming_sequence(), Some(0));
    }

    #[test]
    fn test_stale_and_duplicate_dropped() {
        let (mut a, mut b) = pair();
        let first = a.packetize(b"one").unwrap();
        let second = a.packetize(b"two").unwrap();

        assert_eq!(deliver(&mut b, &second).len(), 1);
        assert!(deliver(&mut b, &first).is_empty());
        assert!(deliver(&mut b, &second).is_empty());
        assert_eq!(b.stats().packets_duplicated, 2);
    }

    #[test]
    fn test_gaps_are_counted() {
        let (mut a, mut b) = pair();
        deliver(&mut b, &a.packetize(b"0").unwrap());
        a.packetize(b"1").unwrap();
        a.packetize(b"2").unwrap();
        deliver(&mut b, &a.packetize(b"3").unwrap());
        assert_eq!(b.stats().packets_dropped, 2);
    }

    #[test]
    fn test_large_payload_fragments_and_reassembles_out_of_order() {
        let (mut a, mut b) = pair();
        let payload: Vec<u8> = (0..4000u32).map(|i| (i * 7) as u8).collect();

        let mut datagrams = a.packetize(&payload).unwrap();
        assert_eq!(datagrams.len(), 4);
        assert!(datagrams.iter().all(|d| d.len() <= MAX_PACKET_SIZE));

        datagrams.swap(0, 3);
        datagrams.swap(1, 2);
        assert_eq!(deliver(&mut b, &datagrams), vec![payload]);
    }

    #[test]
    fn test_withheld_fragment_delivers_nothing() {
        let (mut a, mut b) = pair();
        let payload = vec![3u8; 3000];
        let datagrams = a.packetize(&payload).unwrap();
        assert!(deliver(&mut b, &datagrams[1..]).is_empty());
        assert_eq!(b.incoming_sequence(), None);
    }

    #[test]
    fn test_reliable_commands_ride_until_acked() {
        let (mut a, mut b) = pair();
        a.queue_command("say one").unwrap();
        a.queue_command("say two").unwrap();

        // lost
        a.packetize(b"").unwrap();
        deliver(&mut b, &a.packetize(b"").unwrap());
        assert_eq!(
            b.drain_commands().collect::<Vec<_>>(),
            vec!["say one", "say two"]
        );

        // a retransmission is not delivered twice
        deliver(&mut b, &a.packetize(b"").unwrap());
        assert_eq!(b.drain_commands().count(), 0);

        deliver(&mut a, &b.packetize(b"").unwrap());
        assert_eq!(a.pending_reliable(), 0);
    }

    #[test]
    fn test_reliable_overflow_reported_once() {
        let config = ChannelConfig {
            reliable_window: 4,
            ..Default::default()
        };
        let mut channel = Channel::established(addr(9), config);
        for i in 0..4 {
            channel.queue_command(&format!("cmd {i}")).unwrap();
            let datagrams = channel.packetize(b"").unwrap();
            let (_, _, body) = split_header(&datagrams[0]).unwrap();
            assert_eq!(body[4] as usize, i + 1);
        }

        assert!(matches!(
            channel.queue_command("one too many"),
            Err(NetError::ReliableOverflow { window: 4 })
        ));
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(matches!(
            channel.queue_command("again"),
            Err(NetError::ChannelClosed)
        ));
    }

    #[test]
    fn test_reliable_window_capped_to_counter_width() {
        let config = ChannelConfig {
            reliable_window: 300,
            ..Default::default()
        };
        let mut a = Channel::established(addr(2), config.clone());
        let mut b = Channel::established(addr(1), config);
        assert_eq!(a.config().reliable_window, MAX_RELIABLE_WINDOW);

        for i in 0..MAX_RELIABLE_WINDOW {
            a.queue_command(&format!("c{i}")).unwrap();
        }
        deliver(&mut b, &a.packetize(b"").unwrap());
        assert_eq!(b.drain_commands().count(), MAX_RELIABLE_WINDOW);

        assert!(matches!(
            a.queue_command("overflow"),
            Err(NetError::ReliableOverflow { window: MAX_RELIABLE_WINDOW })
        ));
    }

    #[test]
    fn test_oversized_packet_config_clamped_to_endpoint_limit() {
        let config = ChannelConfig {
            max_packet_size: 9000,
            ..Default::default()
        };
        let (mut a, mut b) = (
            Channel::established(addr(2), config.clone()),
            Channel::established(addr(1), config),
        );
        assert_eq!(a.config().max_packet_size, MAX_PACKET_SIZE);

        let payload = vec![1u8; 5000];
        let datagrams = a.packetize(&payload).unwrap();
        assert!(datagrams.iter().all(|d| d.len() <= MAX_PACKET_SIZE));
        assert_eq!(deliver(&mut b, &datagrams), vec![payload]);
    }

    #[test]
    fn test_timeout_closes_once() {
        let mut channel = Channel::established(addr(9), ChannelConfig::default());
        let later = Instant::now() + Duration::from_secs(60);

        assert!(channel.check_timeout(Instant::now()).is_ok());
        assert!(matches!(
            channel.check_timeout(later),
            Err(NetError::ConnectionTimedOut)
        ));
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(channel.check_timeout(later).is_ok());
    }

    #[test]
    fn test_malformed_message_is_dropped() {
        let (_, mut b) = pair();
        assert_eq!(b.process(&[1, 0, 0]).unwrap(), None);
        // valid header, body too short for the reliable section
        assert_eq!(b.process(&[1, 0, 0, 0, 0, 9]).unwrap(), None);
        assert_eq!(b.stats().packets_malformed, 2);
        assert_eq!(b.incoming_sequence(), None);
    }

    #[test]
    fn test_unestablished_channel_refuses_traffic() {
        let mut channel = Channel::new(addr(3), ChannelConfig::default());
        assert!(matches!(
            channel.packetize(b"x"),
            Err(NetError::NotEstablished)
        ));
        channel.begin_connect();
        assert_eq!(channel.state(), ChannelState::Connecting);
        channel.establish();
        assert!(channel.packetize(b"x").is_ok());
    }
}
