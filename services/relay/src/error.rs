//! Error types for the relay.

use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;

use nix::errno::Errno;
use thiserror::Error;

/// Errors that stop a listener reactor.
///
/// Every variant except [`ReactorError::Wait`], [`ReactorError::Panicked`]
/// and a [`ReactorError::Pipe`] raised by a failed pipe reset can only happen
/// while the listener is initializing.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// Could not create the epoll instance.
    #[error("multiplexer_failed: {0}")]
    Multiplexer(#[source] Errno),

    /// Could not create the intermediate splice pipe.
    #[error("pipe_failed: {0}")]
    Pipe(#[source] Errno),

    /// Could not create the listening socket.
    #[error("socket_failed: {0}")]
    Socket(#[source] Errno),

    /// Could not set SO_REUSEADDR on the listening socket.
    #[error("reuse_addr_failed: {0}")]
    ReuseAddr(#[source] Errno),

    /// Could not bind the listening socket.
    #[error("bind_failed: {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: Errno,
    },

    /// Could not mark the socket as listening.
    #[error("listen_failed: {0}")]
    Listen(#[source] Errno),

    /// The configured transport cannot accept connections.
    #[error("unsupported_transport: {service}/{protocol} is not connection-oriented")]
    UnsupportedTransport {
        service: &'static str,
        protocol: &'static str,
    },

    /// Could not register the listening socket for readiness.
    #[error("register_failed: {0}")]
    Register(#[source] Errno),

    /// Waiting on the multiplexer failed for a reason other than EINTR.
    #[error("wait_failed: {0}")]
    Wait(#[source] Errno),

    /// The reactor thread panicked.
    #[error("listener thread panicked")]
    Panicked,
}

impl ReactorError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ReactorError::Multiplexer(_) => "multiplexer_failed",
            ReactorError::Pipe(_) => "pipe_failed",
            ReactorError::Socket(_) => "socket_failed",
            ReactorError::ReuseAddr(_) => "reuse_addr_failed",
            ReactorError::Bind { .. } => "bind_failed",
            ReactorError::Listen(_) => "listen_failed",
            ReactorError::UnsupportedTransport { .. } => "unsupported_transport",
            ReactorError::Register(_) => "register_failed",
            ReactorError::Wait(_) => "wait_failed",
            ReactorError::Panicked => "panicked",
        }
    }
}

/// Errors opening the outbound connection for an accepted client.
#[derive(Debug, Error)]
pub enum DialError {
    /// Name resolution failed.
    #[error("resolve_failed: {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    /// Resolution succeeded but returned no address of the configured family.
    #[error("no_address: {host} has no {family} address")]
    NoAddress { host: String, family: &'static str },

    /// The TCP handshake failed.
    #[error("connect_failed: {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

impl DialError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            DialError::Resolve { .. } => "resolve_failed",
            DialError::NoAddress { .. } => "no_address",
            DialError::Connect { .. } => "connect_failed",
        }
    }
}

/// Reasons a single relay attempt failed. Any of them tears the pair down;
/// [`RelayError::PipeReset`] also stops the listener.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    /// A splice moved zero bytes: the source reached end-of-stream or the
    /// destination stopped accepting data.
    #[error("end of stream")]
    Closed,

    /// A splice could not proceed without blocking.
    #[error("would block")]
    WouldBlock,

    /// A splice failed outright.
    #[error("splice failed: {0}")]
    Io(#[source] Errno),

    /// The pipe holding undelivered bytes could not be replaced. The listener
    /// cannot relay safely after this.
    #[error("pipe reset failed: {0}")]
    PipeReset(#[source] Errno),

    /// The descriptor does not belong to the pair it was routed to.
    #[error("descriptor {0} is not part of this pair")]
    UnknownDescriptor(RawFd),
}

impl From<Errno> for RelayError {
    fn from(errno: Errno) -> Self {
        match errno {
            Errno::EAGAIN => RelayError::WouldBlock,
            other => RelayError::Io(other),
        }
    }
}

/// Connection registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// One of the pair's descriptors is already registered.
    #[error("descriptor {0} is already registered")]
    DuplicateDescriptor(RawFd),
}
