//! In-process datagram fabric for tests and simulations.

use crate::socket::DatagramSocket;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

/// One datagram seen by the fabric
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Sender
    pub from: SocketAddr,
    /// Receiver
    pub to: SocketAddr,
    /// Bytes on the wire
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
struct Fabric {
    queues: HashMap<SocketAddr, VecDeque<Datagram>>,
    failing: HashSet<SocketAddr>,
    sent: Vec<Datagram>,
}

/// Shared handle to a set of in-memory endpoints.
///
/// Delivery is immediate and ordered. Datagrams for an address nobody bound
/// are logged and discarded, like UDP to a closed port.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    fabric: Rc<RefCell<Fabric>>,
}

impl MemoryNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an endpoint at `addr`
    pub fn bind(&self, addr: SocketAddr) -> MemorySocket {
        self.fabric.borrow_mut().queues.entry(addr).or_default();
        MemorySocket {
            addr,
            network: self.clone(),
        }
    }

    /// Deliver a datagram as if `from` had sent it
    pub fn inject(&self, from: SocketAddr, to: SocketAddr, data: &[u8]) {
        self.fabric.borrow_mut().deliver(Datagram {
            from,
            to,
            data: data.to_vec(),
        });
    }

    /// Make sends from `addr` fail (or succeed again)
    pub fn fail_sends_from(&self, addr: SocketAddr, fail: bool) {
        let mut fabric = self.fabric.borrow_mut();
        if fail {
            fabric.failing.insert(addr);
        } else {
            fabric.failing.remove(&addr);
        }
    }

    /// Every datagram sent through a socket so far, in order
    pub fn sent(&self) -> Vec<Datagram> {
        self.fabric.borrow().sent.clone()
    }

    /// Datagrams sent from `addr` so far
    pub fn sent_from(&self, addr: SocketAddr) -> usize {
        self.fabric.borrow().sent.iter().filter(|d| d.from == addr).count()
    }

    /// Datagrams waiting at `addr`
    pub fn pending(&self, addr: SocketAddr) -> usize {
        self.fabric.borrow().queues.get(&addr).map_or(0, VecDeque::len)
    }

    /// Discard everything waiting at `addr`
    pub fn drop_pending(&self, addr: SocketAddr) -> usize {
        self.fabric
            .borrow_mut()
            .queues
            .get_mut(&addr)
            .map_or(0, |queue| queue.drain(..).count())
    }
}

impl Fabric {
    fn deliver(&mut self, datagram: Datagram) {
        if let Some(queue) = self.queues.get_mut(&datagram.to) {
            queue.push_back(datagram);
        }
    }
}

/// Endpoint on a [`MemoryNetwork`]
#[derive(Debug, Clone)]
pub struct MemorySocket {
    addr: SocketAddr,
    network: MemoryNetwork,
}

impl DatagramSocket for MemorySocket {
    fn send_to(&self, data: &[u8], target: SocketAddr) -> io::Result<usize> {
        let mut fabric = self.network.fabric.borrow_mut();
        if fabric.failing.contains(&self.addr) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected send failure"));
        }
        let datagram = Datagram {
            from: self.addr,
            to: target,
            data: data.to_vec(),
        };
        fabric.sent.push(datagram.clone());
        fabric.deliver(datagram);
        Ok(data.len())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut fabric = self.network.fabric.borrow_mut();
        let datagram = fabric
            .queues
            .get_mut(&self.addr)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;
        let len = datagram.data.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram.data[..len]);
        Ok((len, datagram.from))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}
