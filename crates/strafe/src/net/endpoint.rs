use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use tokio::sync::mpsc;

use super::protocol::MAX_PACKET_SIZE;
use super::transport::Transport;

const RECEIVE_QUEUE_DEPTH: usize = 1024;

/// Non-blocking UDP socket polled from the tick loop.
pub struct UdpEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    recv_buffer: [u8; MAX_PACKET_SIZE],
}

impl UdpEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            recv_buffer: [0u8; MAX_PACKET_SIZE],
        })
    }
}

impl Transport for UdpEndpoint {
    fn send(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<()> {
        if data.len() > MAX_PACKET_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Packet exceeds MTU",
            ));
        }
        self.socket.send_to(data, addr)?;
        Ok(())
    }

    fn poll_receive(&mut self) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => return Ok(Some((self.recv_buffer[..size].to_vec(), addr))),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                // ICMP port unreachable from an earlier send surfaces here on some platforms
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// UDP socket whose reads happen on a dedicated I/O thread.
///
/// The thread runs a current-thread tokio runtime and pushes every datagram into a
/// bounded queue; [`Transport::poll_receive`] only drains that queue. Sends go straight
/// out through a cloned std socket.
pub struct QueuedUdpEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    incoming: mpsc::Receiver<(Vec<u8>, SocketAddr)>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl QueuedUdpEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        let reader_socket = socket.try_clone()?;
        let (sender, incoming) = mpsc::channel(RECEIVE_QUEUE_DEPTH);
        let running = Arc::new(AtomicBool::new(true));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()?;

        let flag = Arc::clone(&running);
        let reader = thread::Builder::new()
            .name(format!("udp-reader-{}", local_addr.port()))
            .spawn(move || runtime.block_on(read_loop(reader_socket, sender, flag)))?;

        Ok(Self {
            socket,
            local_addr,
            incoming,
            running,
            reader: Some(reader),
        })
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.incoming.close();
        // wake the reader out of recv_from
        let _ = self.socket.send_to(&[], self.local_addr);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

async fn read_loop(
    socket: UdpSocket,
    sender: mpsc::Sender<(Vec<u8>, SocketAddr)>,
    running: Arc<AtomicBool>,
) {
    let socket = match tokio::net::UdpSocket::from_std(socket) {
        Ok(socket) => socket,
        Err(e) => {
            warn!("udp reader failed to start: {}", e);
            return;
        }
    };

    let mut buffer = [0u8; MAX_PACKET_SIZE];
    while running.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buffer).await {
            Ok((0, _)) => continue,
            Ok((size, addr)) => {
                if sender.send((buffer[..size].to_vec(), addr)).await.is_err() {
                    break;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
            Err(e) => {
                warn!("udp reader stopped: {}", e);
                break;
            }
        }
    }
    debug!("udp reader exiting");
}

impl Transport for QueuedUdpEndpoint {
    fn send(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<()> {
        if data.len() > MAX_PACKET_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Packet exceeds MTU",
            ));
        }
        self.socket.send_to(data, addr)?;
        Ok(())
    }

    fn poll_receive(&mut self) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        match self.incoming.try_recv() {
            Ok(datagram) => Ok(Some(datagram)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "udp reader thread stopped",
            )),
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for QueuedUdpEndpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}
