//! Serialized output for result records.
//!
//! Many workers finish concurrently; each record must land on the output as
//! one complete line. The sink formats the whole line first and writes it
//! under a single lock.

use serde::Serialize;
use std::io::{self, Stdout, Write};
use std::sync::{Mutex, PoisonError};

/// Mutex-guarded JSON-lines writer.
pub struct RecordSink<W> {
    out: Mutex<W>,
}

impl RecordSink<Stdout> {
    /// Sink writing to the process's standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> RecordSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Write `record` as one JSON object followed by a newline, then flush.
    pub fn emit<T: Serialize>(&self, record: &T) -> io::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        // Poisoning is ignored: only whole lines are ever written under the lock.
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(&line)?;
        out.flush()
    }

    /// Consume the sink, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}
