//! Listener reactor.
//!
//! One reactor owns one listening socket, its epoll instance, the splice
//! pipe and the registry of live pairs. It waits for exactly one ready
//! descriptor at a time and handles it to completion before waiting again:
//!
//! ```text
//! Initializing --ok--> Listening --listener ready--> Accepting --> Listening
//!      |                   |    \--pair fd ready---> Relaying ---> Listening
//!      v                   v
//!    Failed <---- wait error (not EINTR)
//! ```
//!
//! Failures while accepting, dialing or relaying only drop the connection
//! involved. Nothing is retried.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use nix::sys::socket::{
    bind, listen, setsockopt, socket, sockopt, AddressFamily, Backlog, SockFlag, SockProtocol,
    SockType, SockaddrStorage,
};
use tracing::{debug, info, warn};

use super::dialer;
use super::pipeline::SplicePipe;
use super::registry::{ConnectionPair, ConnectionRegistry, PairId};
use crate::config::{Domain, ListenerConfig, Protocol, Service};
use crate::error::{ReactorError, RelayError};

/// Pending-connection queue length of the listening socket.
pub const LISTEN_BACKLOG: i32 = 128;

/// Logged in place of a descriptor that could not be opened.
pub const NO_FD: RawFd = -1;

/// What a single reactor turn did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The wait returned without an event (timeout or EINTR).
    Idle,
    /// A client was accepted, its destination dialed and the pair registered.
    Accepted(PairId),
    /// Accept, dial or registration failed; whatever was opened is closed.
    Discarded,
    /// Bytes moved between the two halves of a pair.
    Relayed { pair: PairId, bytes: usize },
    /// A relay attempt failed and the pair was closed.
    TornDown(PairId),
    /// The ready descriptor belongs to no registered pair.
    Ignored,
}

/// The event loop of one listener.
#[derive(Debug)]
pub struct Reactor {
    config: ListenerConfig,
    listener: TcpListener,
    epoll: Epoll,
    pipe: SplicePipe,
    registry: ConnectionRegistry,
}

impl Reactor {
    /// Initialize the listener.
    ///
    /// Anything acquired before a failing step is released on return.
    pub fn bind(config: ListenerConfig) -> Result<Self, ReactorError> {
        let epoll =
            Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(ReactorError::Multiplexer)?;
        let pipe = SplicePipe::new().map_err(ReactorError::Pipe)?;
        let listener = open_listener(&config)?;

        epoll
            .add(&listener, readable(listener.as_raw_fd()))
            .map_err(ReactorError::Register)?;

        Ok(Self {
            config,
            listener,
            epoll,
            pipe,
            registry: ConnectionRegistry::new(),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Serve until the multiplexer fails.
    pub fn run(mut self) -> Result<(), ReactorError> {
        info!(listener = %self.config, "listener started");

        loop {
            self.turn(None)?;
        }
    }

    /// Wait for one ready descriptor and handle it.
    ///
    /// `None` waits indefinitely.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<Outcome, ReactorError> {
        let timeout = match timeout {
            None => EpollTimeout::NONE,
            Some(timeout) => {
                EpollTimeout::from(u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX))
            }
        };

        let mut events = [EpollEvent::empty()];
        let ready = match self.epoll.wait(&mut events, timeout) {
            Ok(ready) => ready,
            Err(Errno::EINTR) => return Ok(Outcome::Idle),
            Err(errno) => return Err(ReactorError::Wait(errno)),
        };
        if ready == 0 {
            return Ok(Outcome::Idle);
        }

        let fd = events[0].data() as RawFd;
        if fd == self.listener.as_raw_fd() {
            Ok(self.accept())
        } else {
            self.relay(fd)
        }
    }

    fn accept(&mut self) -> Outcome {
        let port = self.config.port;

        let client = match self.listener.accept() {
            Ok((client, _)) => client,
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                debug!("spurious accept wakeup, ignoring");
                return Outcome::Ignored;
            }
            Err(err) => {
                info!(port, client_fd = NO_FD, destination_fd = NO_FD, "connection accepted");
                warn!(error = %err, "accept failed");
                return Outcome::Discarded;
            }
        };

        let destination = dialer::dial(&self.config);
        info!(
            port,
            client_fd = client.as_raw_fd(),
            destination_fd = destination.as_ref().map_or(NO_FD, |s| s.as_raw_fd()),
            "connection accepted"
        );

        let destination = match destination {
            Ok(destination) => destination,
            Err(err) => {
                warn!(error = %err, reason = err.reason_code(), "dial failed");
                return Outcome::Discarded;
            }
        };

        match self.open_pair(client, destination) {
            Ok(id) => Outcome::Accepted(id),
            Err(err) => {
                warn!(error = %err, "could not register connection");
                Outcome::Discarded
            }
        }
    }

    fn open_pair(&mut self, client: TcpStream, destination: TcpStream) -> io::Result<PairId> {
        client.set_nonblocking(true)?;
        destination.set_nonblocking(true)?;

        let id = self
            .registry
            .insert(ConnectionPair::new(client, destination))
            .map_err(io::Error::other)?;

        if let Err(errno) = self.watch(id) {
            if let Some(pair) = self.registry.remove(id) {
                self.unwatch(&pair);
            }
            return Err(errno.into());
        }

        Ok(id)
    }

    fn watch(&self, id: PairId) -> nix::Result<()> {
        let Some(pair) = self.registry.get(id) else {
            return Ok(());
        };

        self.epoll
            .add(pair.inbound(), readable(pair.inbound_fd()))?;
        if let Err(errno) = self
            .epoll
            .add(pair.outbound(), readable(pair.outbound_fd()))
        {
            let _ = self.epoll.delete(pair.inbound());
            return Err(errno);
        }
        Ok(())
    }

    fn unwatch(&self, pair: &ConnectionPair) {
        for (side, stream) in [("client", pair.inbound()), ("destination", pair.outbound())] {
            if let Err(errno) = self.epoll.delete(stream) {
                debug!(side, error = %errno, "deregister failed");
            }
        }
    }

    fn relay(&mut self, fd: RawFd) -> Result<Outcome, ReactorError> {
        let Some(id) = self.registry.find(fd) else {
            debug!(fd, "event for unregistered descriptor, ignoring");
            return Ok(Outcome::Ignored);
        };
        let Some(pair) = self.registry.get_mut(id) else {
            return Ok(Outcome::Ignored);
        };

        match pair.relay_from(fd, &mut self.pipe) {
            Ok(bytes) => Ok(Outcome::Relayed { pair: id, bytes }),
            Err(RelayError::PipeReset(errno)) => {
                self.tear_down(id, &RelayError::PipeReset(errno));
                Err(ReactorError::Pipe(errno))
            }
            Err(err) => {
                self.tear_down(id, &err);
                Ok(Outcome::TornDown(id))
            }
        }
    }

    /// Deregister and close both halves of a pair in one step.
    fn tear_down(&mut self, id: PairId, reason: &RelayError) {
        let Some(pair) = self.registry.remove(id) else {
            return;
        };
        self.unwatch(&pair);

        let (bytes_upstream, bytes_downstream) = pair.bytes_relayed();
        debug!(
            client_fd = pair.inbound_fd(),
            destination_fd = pair.outbound_fd(),
            bytes_upstream,
            bytes_downstream,
            reason = %reason,
            "connection closed"
        );
    }
}

fn readable(fd: RawFd) -> EpollEvent {
    EpollEvent::new(EpollFlags::EPOLLIN, fd as u64)
}

fn open_listener(config: &ListenerConfig) -> Result<TcpListener, ReactorError> {
    let family = match config.domain {
        Domain::Ipv4 => AddressFamily::Inet,
        Domain::Ipv6 => AddressFamily::Inet6,
    };
    let socket_type = match config.service {
        Service::Stream => SockType::Stream,
        Service::Datagram => SockType::Datagram,
    };
    let protocol = match config.protocol {
        Protocol::Tcp => SockProtocol::Tcp,
        Protocol::Udp => SockProtocol::Udp,
    };

    let fd: OwnedFd = socket(
        family,
        socket_type,
        SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
        protocol,
    )
    .map_err(ReactorError::Socket)?;

    setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(ReactorError::ReuseAddr)?;

    let addr = config.bind_addr();
    bind(fd.as_raw_fd(), &SockaddrStorage::from(addr))
        .map_err(|source| ReactorError::Bind { addr, source })?;

    if !config.is_connection_oriented() {
        return Err(ReactorError::UnsupportedTransport {
            service: config.service.as_str(),
            protocol: config.protocol.as_str(),
        });
    }

    let backlog = Backlog::new(LISTEN_BACKLOG).map_err(ReactorError::Listen)?;
    listen(&fd, backlog).map_err(ReactorError::Listen)?;

    Ok(TcpListener::from(fd))
}
