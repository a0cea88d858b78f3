//! Connection registry.
//!
//! Owns every live (inbound, outbound) pair of one listener. Pairs sit in a
//! slab so a removal hands the pair back by value: dropping it closes both
//! sockets exactly once. A descriptor index gives lookup by either side.

use std::collections::HashMap;
use std::net::TcpStream;
use std::os::fd::{AsFd, AsRawFd, RawFd};

use slab::Slab;

use super::pipeline::SplicePipe;
use crate::error::{RegistryError, RelayError};

/// Stable handle of a registered pair.
///
/// Handles are reused after removal, like descriptor numbers; only trust one
/// while its pair is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairId(usize);

/// Which way bytes flow in a relay attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to destination.
    Upstream,
    /// Destination to client.
    Downstream,
}

/// One accepted client bound to one dialed destination.
#[derive(Debug)]
pub struct ConnectionPair {
    inbound: TcpStream,
    outbound: TcpStream,
    bytes_upstream: u64,
    bytes_downstream: u64,
}

impl ConnectionPair {
    pub fn new(inbound: TcpStream, outbound: TcpStream) -> Self {
        Self {
            inbound,
            outbound,
            bytes_upstream: 0,
            bytes_downstream: 0,
        }
    }

    pub fn inbound(&self) -> &TcpStream {
        &self.inbound
    }

    pub fn outbound(&self) -> &TcpStream {
        &self.outbound
    }

    pub fn inbound_fd(&self) -> RawFd {
        self.inbound.as_raw_fd()
    }

    pub fn outbound_fd(&self) -> RawFd {
        self.outbound.as_raw_fd()
    }

    /// Direction implied by `fd` becoming ready.
    pub fn direction_from(&self, fd: RawFd) -> Option<Direction> {
        if fd == self.inbound_fd() {
            Some(Direction::Upstream)
        } else if fd == self.outbound_fd() {
            Some(Direction::Downstream)
        } else {
            None
        }
    }

    /// Total bytes relayed (upstream, downstream).
    pub fn bytes_relayed(&self) -> (u64, u64) {
        (self.bytes_upstream, self.bytes_downstream)
    }

    /// Relay what is pending on `fd` to the other half of the pair.
    pub fn relay_from(&mut self, fd: RawFd, pipe: &mut SplicePipe) -> Result<usize, RelayError> {
        let direction = self
            .direction_from(fd)
            .ok_or(RelayError::UnknownDescriptor(fd))?;

        let moved = match direction {
            Direction::Upstream => pipe.relay(self.inbound.as_fd(), self.outbound.as_fd())?,
            Direction::Downstream => pipe.relay(self.outbound.as_fd(), self.inbound.as_fd())?,
        };

        let counter = match direction {
            Direction::Upstream => &mut self.bytes_upstream,
            Direction::Downstream => &mut self.bytes_downstream,
        };
        *counter += moved as u64;

        Ok(moved)
    }
}

/// The live pairs of one listener.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    pairs: Slab<ConnectionPair>,
    index: HashMap<RawFd, PairId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pair.
    ///
    /// A pair whose descriptor is already registered is rejected and dropped,
    /// closing both of its sockets.
    pub fn insert(&mut self, pair: ConnectionPair) -> Result<PairId, RegistryError> {
        for fd in [pair.inbound_fd(), pair.outbound_fd()] {
            if self.index.contains_key(&fd) {
                return Err(RegistryError::DuplicateDescriptor(fd));
            }
        }

        let (inbound_fd, outbound_fd) = (pair.inbound_fd(), pair.outbound_fd());
        let id = PairId(self.pairs.insert(pair));
        self.index.insert(inbound_fd, id);
        self.index.insert(outbound_fd, id);
        Ok(id)
    }

    /// Detach a pair and hand it back. The sockets stay open until the
    /// returned pair is dropped.
    pub fn remove(&mut self, id: PairId) -> Option<ConnectionPair> {
        let pair = self.pairs.try_remove(id.0)?;
        self.index.remove(&pair.inbound_fd());
        self.index.remove(&pair.outbound_fd());
        Some(pair)
    }

    /// The pair that owns `fd` on either side.
    pub fn find(&self, fd: RawFd) -> Option<PairId> {
        self.index.get(&fd).copied()
    }

    pub fn get(&self, id: PairId) -> Option<&ConnectionPair> {
        self.pairs.get(id.0)
    }

    pub fn get_mut(&mut self, id: PairId) -> Option<&mut ConnectionPair> {
        self.pairs.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterate over registered pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (PairId, &ConnectionPair)> {
        self.pairs.iter().map(|(key, pair)| (PairId(key), pair))
    }
}
