//! Listener set: one reactor thread per configured listener.
//!
//! Threads share nothing. Each one builds its reactor, serves until the
//! reactor fails, and reports how it ended through its join handle.

use std::io;
use std::thread::{self, JoinHandle};

use tracing::{error, info_span};

use super::reactor::Reactor;
use crate::config::ListenerConfig;
use crate::error::ReactorError;

/// A running listener thread.
#[derive(Debug)]
pub struct ListenerHandle {
    port: u16,
    thread: JoinHandle<Result<(), ReactorError>>,
}

impl ListenerHandle {
    /// Configured bind port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the reactor has stopped (it only stops on failure).
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the reactor to stop.
    pub fn join(self) -> Result<(), ReactorError> {
        self.thread.join().unwrap_or(Err(ReactorError::Panicked))
    }
}

/// All listener threads of the process, in configuration order.
#[derive(Debug, Default)]
pub struct ListenerSet {
    listeners: Vec<ListenerHandle>,
}

impl ListenerSet {
    /// Spawn one reactor thread per entry.
    pub fn spawn(configs: Vec<ListenerConfig>) -> io::Result<Self> {
        let mut listeners = Vec::with_capacity(configs.len());

        for config in configs {
            let port = config.port;
            let thread = thread::Builder::new()
                .name(format!("listener-{}", port))
                .spawn(move || serve(config))?;
            listeners.push(ListenerHandle { port, thread });
        }

        Ok(Self { listeners })
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn listeners(&self) -> &[ListenerHandle] {
        &self.listeners
    }

    pub fn into_listeners(self) -> Vec<ListenerHandle> {
        self.listeners
    }

    /// Wait for every listener thread, returning each port with how its
    /// reactor ended.
    pub fn join(self) -> Vec<(u16, Result<(), ReactorError>)> {
        self.listeners
            .into_iter()
            .map(|listener| (listener.port, listener.join()))
            .collect()
    }
}

fn serve(config: ListenerConfig) -> Result<(), ReactorError> {
    let port = config.port;
    let span = info_span!("listener");
    let _entered = span.enter();

    let result = Reactor::bind(config).and_then(Reactor::run);
    if let Err(err) = &result {
        error!(port, error = %err, reason = err.reason_code(), "listener failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_empty_set() {
        let set = ListenerSet::spawn(Vec::new()).unwrap();
        assert!(set.is_empty());
        assert!(set.join().is_empty());
    }

    #[test]
    fn test_failed_listener_reports_error() {
        let occupied = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let set = ListenerSet::spawn(vec![ListenerConfig::new(port, "127.0.0.1", 9)]).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.listeners()[0].port(), port);

        let results = set.join();
        assert_eq!(results.len(), 1);
        let (failed_port, result) = &results[0];
        assert_eq!(*failed_port, port);
        assert_eq!(result.as_ref().unwrap_err().reason_code(), "bind_failed");
    }
}
