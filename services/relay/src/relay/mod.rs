//! TCP relay core.
//!
//! This module provides:
//! - The per-listener reactor (accept, dial, multiplex)
//! - Zero-copy relaying through a kernel pipe
//! - The registry of live connection pairs
//! - One thread per listener
//!
//! ## Architecture
//!
//! ```text
//! ListenerSet -> thread -> Reactor --accept--> Dialer
//!                             |                  |
//!                             +--- Registry <----+
//!                             |
//!                  ready fd --+--> SplicePipe: fd -> pipe -> peer fd
//! ```

mod dialer;
mod listener_set;
mod pipeline;
mod reactor;
mod registry;

pub use dialer::{dial, resolve};
pub use listener_set::{ListenerHandle, ListenerSet};
pub use pipeline::{SplicePipe, MAX_CHUNK};
pub use reactor::{Outcome, Reactor, LISTEN_BACKLOG, NO_FD};
pub use registry::{ConnectionPair, ConnectionRegistry, Direction, PairId};
