//! Server runtimes.
//!
//! Two backends drive the same echo semantics:
//! - `mio`: readiness-based event loops over an explicit per-session state
//!   machine stored in a slab connection table
//! - `tokio_impl`: one task per connection on a multi-threaded tokio runtime
//!
//! Both share:
//! - `Session`: read/write alternation state machine
//! - `SessionError`: terminal I/O failures, logged and never sent to the peer

pub mod connection;
pub mod mio;
pub mod session;
pub mod tokio_impl;

pub use session::{Progress, Session, SessionError, SessionState, Wait};
