//! Zero-copy relay through an intermediate kernel pipe.
//!
//! Sockets cannot be spliced into each other directly, so every transfer goes
//! socket -> pipe -> socket. One pipe serves every pair of a listener: the
//! reactor handles a single event at a time, so at most one transfer owns it.

use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::ptr;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use tracing::debug;

use crate::error::RelayError;

/// Maximum bytes moved per readiness notification.
pub const MAX_CHUNK: usize = 1024 * 1024;

const SPLICE_FLAGS: libc::c_uint = libc::SPLICE_F_MOVE | libc::SPLICE_F_NONBLOCK;

/// The intermediate pipe shared by all pairs of one listener.
#[derive(Debug)]
pub struct SplicePipe {
    reader: File,
    writer: File,
}

impl SplicePipe {
    /// Create a non-blocking close-on-exec pipe.
    pub fn new() -> nix::Result<Self> {
        let (reader, writer) = pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)?;
        Ok(Self {
            reader: File::from(reader),
            writer: File::from(writer),
        })
    }

    /// Move the bytes currently readable on `from` into `to`.
    ///
    /// The first move fills the pipe from `from`; the second drains it into
    /// `to` for as long as `to` accepts data. A move that transfers nothing
    /// fails the whole attempt, even when the first one succeeded. A failed
    /// attempt that leaves bytes in the pipe swaps in a fresh pipe, so they
    /// can never reach another pair.
    pub fn relay(&mut self, from: BorrowedFd<'_>, to: BorrowedFd<'_>) -> Result<usize, RelayError> {
        let filled = splice_once(from, self.writer.as_fd(), MAX_CHUNK)?;

        let mut pending = filled;
        while pending > 0 {
            match splice_once(self.reader.as_fd(), to, pending) {
                Ok(moved) => pending -= moved,
                Err(err) => {
                    self.reset(pending)?;
                    return Err(err);
                }
            }
        }

        Ok(filled)
    }

    /// Replace the pipe, dropping whatever it still holds.
    fn reset(&mut self, pending: usize) -> Result<(), RelayError> {
        *self = SplicePipe::new().map_err(RelayError::PipeReset)?;
        debug!(pending, "dropped undelivered bytes with the old pipe");
        Ok(())
    }
}

/// One non-blocking splice. Zero bytes moved is reported as `Closed`.
fn splice_once(from: BorrowedFd<'_>, to: BorrowedFd<'_>, len: usize) -> Result<usize, RelayError> {
    // SAFETY: both descriptors are borrowed for the duration of the call and
    // null offsets are valid for pipes and sockets.
    let moved = Errno::result(unsafe {
        libc::splice(
            from.as_raw_fd(),
            ptr::null_mut(),
            to.as_raw_fd(),
            ptr::null_mut(),
            len,
            SPLICE_FLAGS,
        )
    })?;

    match moved {
        0 => Err(RelayError::Closed),
        n => Ok(n as usize),
    }
}
