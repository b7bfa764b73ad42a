//! Echo session state machine.
//!
//! A session owns one accepted connection and a fixed-size receive buffer.
//! Reads and writes strictly alternate:
//!
//! ```text
//! Reading --(read n > 0)--> Writing --(all n bytes written)--> Reading
//!    |                         |
//!    +--(EOF / error)--> Closed <--(error)
//! ```
//!
//! The next read is only issued once the previous chunk is fully written
//! back, so the buffer is never shared between a pending read and write.

use std::io::{self, Read, Write};
use thiserror::Error;
use tracing::debug;

/// Current state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for bytes from the peer.
    Reading,
    /// Echoing `buf[written..len]` back to the peer.
    Writing {
        /// Bytes received in the last read.
        len: usize,
        /// Bytes already written back.
        written: usize,
    },
    /// Peer closed or an I/O error occurred. Terminal.
    Closed,
}

/// Readiness the session needs before it can make progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Readable,
    Writable,
}

/// Outcome of driving a session as far as the socket allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The socket would block; resume on the given readiness.
    Blocked(Wait),
    /// The peer shut down gracefully.
    Closed,
}

/// I/O failure that terminates a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Error reading from client: {0}")]
    Read(#[source] io::Error),
    #[error("Error writing to client: {0}")]
    Write(#[source] io::Error),
}

/// One accepted connection and its echo state.
pub struct Session<S> {
    stream: S,
    buf: Box<[u8]>,
    state: SessionState,
}

impl<S: Read + Write> Session<S> {
    /// Create a session in the initial reading state.
    pub fn new(stream: S, buffer_size: usize) -> Self {
        Self {
            stream,
            buf: vec![0u8; buffer_size].into_boxed_slice(),
            state: SessionState::Reading,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The underlying stream, for readiness registration.
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Run read/write transitions until the stream would block or the
    /// session ends.
    ///
    /// `S` is expected to be non-blocking. On error the session is left in
    /// `Closed`.
    pub fn advance(&mut self) -> Result<Progress, SessionError> {
        let result = self.run();
        if !matches!(result, Ok(Progress::Blocked(_))) {
            self.state = SessionState::Closed;
        }
        result
    }

    fn run(&mut self) -> Result<Progress, SessionError> {
        loop {
            match self.state {
                SessionState::Reading => match self.stream.read(&mut self.buf) {
                    Ok(0) => return Ok(Progress::Closed),
                    Ok(n) => {
                        debug!("Received {n} bytes. Echoing back...");
                        self.state = SessionState::Writing { len: n, written: 0 };
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return Ok(Progress::Blocked(Wait::Readable));
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(SessionError::Read(e)),
                },
                SessionState::Writing { len, written } => {
                    match self.stream.write(&self.buf[written..len]) {
                        Ok(0) => {
                            return Err(SessionError::Write(io::Error::new(
                                io::ErrorKind::WriteZero,
                                "write returned 0",
                            )));
                        }
                        Ok(n) if written + n >= len => self.state = SessionState::Reading,
                        Ok(n) => {
                            self.state = SessionState::Writing {
                                len,
                                written: written + n,
                            };
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                            return Ok(Progress::Blocked(Wait::Writable));
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(SessionError::Write(e)),
                    }
                }
                SessionState::Closed => return Ok(Progress::Closed),
            }
        }
    }
}
