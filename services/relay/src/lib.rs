//! splice-relay
//!
//! Multi-listener TCP relay. Every configured listener runs its own reactor
//! thread that accepts clients, dials a fixed destination and forwards bytes
//! between the two sockets with splice(2), never copying payload into
//! process memory.

pub mod config;
pub mod error;
pub mod relay;

pub use config::{Config, Destination, Domain, ListenerConfig, LogFormat, Protocol, Service};
pub use error::{DialError, ReactorError, RegistryError, RelayError};
pub use relay::{
    ConnectionPair, ConnectionRegistry, ListenerHandle, ListenerSet, Outcome, PairId, Reactor,
    SplicePipe,
};
