//! The shared datagram socket and its transient remote-peer binding.
//!
//! Every session shares one bound local endpoint. Sends pin the binding to a
//! peer for exactly one datagram through a [`RemoteBinding`] guard; the guard
//! puts the binding back to wildcard when it goes out of scope, whether or not
//! the send succeeded.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

/// Non-blocking datagram I/O
pub trait DatagramSocket {
    /// Send one datagram to `target`; `WouldBlock` means no buffer space now
    fn send_to(&self, data: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Receive one datagram; `WouldBlock` means nothing is pending
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Bound local address
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl DatagramSocket for tokio::net::UdpSocket {
    fn send_to(&self, data: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.try_send_to(data, target)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.try_recv_from(buf)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        tokio::net::UdpSocket::local_addr(self)
    }
}

impl<T: DatagramSocket + ?Sized> DatagramSocket for Arc<T> {
    fn send_to(&self, data: &[u8], target: SocketAddr) -> io::Result<usize> {
        (**self).send_to(data, target)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        (**self).recv_from(buf)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }
}

/// The single local endpoint plus its remote-peer field.
///
/// `remote` is `None` (accept from anyone) at all times except while a
/// [`RemoteBinding`] is alive.
#[derive(Debug)]
pub struct SocketBinding<S> {
    socket: S,
    remote: Option<SocketAddr>,
}

impl<S: DatagramSocket> SocketBinding<S> {
    /// Wrap a bound socket
    pub fn new(socket: S) -> Self {
        Self {
            socket,
            remote: None,
        }
    }

    /// The underlying socket
    pub fn socket(&self) -> &S {
        &self.socket
    }

    /// Current remote-peer field; `None` is the wildcard
    pub fn remote_peer(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Pin the binding to `peer` until the returned guard is dropped
    pub fn bind_remote(&mut self, peer: SocketAddr) -> RemoteBinding<'_, S> {
        self.remote = Some(peer);
        RemoteBinding {
            binding: self,
            peer,
        }
    }

    /// Bind, send one datagram, and reset to wildcard
    pub fn send_once(&mut self, peer: SocketAddr, data: &[u8]) -> io::Result<usize> {
        self.bind_remote(peer).send(data)
    }

    /// Receive one pending datagram.
    ///
    /// `Ok(None)` when nothing is pending.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Scoped remote-peer pin; resets the binding to wildcard on drop
#[derive(Debug)]
pub struct RemoteBinding<'a, S> {
    binding: &'a mut SocketBinding<S>,
    peer: SocketAddr,
}

impl<S: DatagramSocket> RemoteBinding<'_, S> {
    /// Peer the binding is pinned to
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send one datagram to the pinned peer
    pub fn send(&self, data: &[u8]) -> io::Result<usize> {
        self.binding.socket.send_to(data, self.peer)
    }
}

impl<S> Drop for RemoteBinding<'_, S> {
    fn drop(&mut self) {
        self.binding.remote = None;
    }
}
