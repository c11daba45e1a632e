use std::io;
use std::net::SocketAddr;

/// An unreliable datagram socket. Implementations never block.
pub trait Transport {
    fn send(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<()>;

    /// Next queued datagram, or `None` when nothing is waiting.
    fn poll_receive(&mut self) -> io::Result<Option<(Vec<u8>, SocketAddr)>>;

    fn local_addr(&self) -> SocketAddr;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<()> {
        (**self).send(data, addr)
    }

    fn poll_receive(&mut self) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        (**self).poll_receive()
    }

    fn local_addr(&self) -> SocketAddr {
        (**self).local_addr()
    }
}
