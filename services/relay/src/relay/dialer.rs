//! Destination dialer.
//!
//! Opens the outbound half of a pair. Resolution and the TCP handshake both
//! block the calling reactor thread; nothing else on that listener runs
//! meanwhile.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use tracing::debug;

use crate::config::ListenerConfig;
use crate::error::DialError;

/// Resolve the destination to the first address of the configured family.
///
/// The configured destination port always wins over whatever the resolver
/// returns. Later addresses are never tried.
pub fn resolve(config: &ListenerConfig) -> Result<SocketAddr, DialError> {
    let destination = &config.destination;
    let host = destination.address.as_str();

    let mut addrs = (host, destination.port)
        .to_socket_addrs()
        .map_err(|source| DialError::Resolve {
            host: host.to_string(),
            source,
        })?;

    addrs
        .find(|addr| config.domain.contains(&addr.ip()))
        .ok_or_else(|| DialError::NoAddress {
            host: host.to_string(),
            family: config.domain.as_str(),
        })
}

/// Open a connected outbound socket for one accepted client.
///
/// On failure no descriptor is left open.
pub fn dial(config: &ListenerConfig) -> Result<TcpStream, DialError> {
    let addr = resolve(config)?;
    debug!(destination = %addr, "dialing destination");
    TcpStream::connect(addr).map_err(|source| DialError::Connect { addr, source })
}
