//! echo-bench: a TCP echo server and a concurrent latency client
//!
//! The server mirrors every byte it receives back to the sender. It runs a
//! pool of reactor threads, either mio event loops or a tokio runtime.
//!
//! The client opens many connections at once, sends a fixed number of
//! messages over each one, times every round trip, and emits one JSON
//! record per connection.
//!
//! Features:
//! - Configuration via CLI arguments, environment variables or a TOML file
//! - Structured diagnostics on stderr via `tracing`
//! - Optional connect and I/O timeouts on the client
//! - Optional session limit on the server

pub mod client;
pub mod config;
pub mod logging;
pub mod runtime;
pub mod server;
pub mod sink;
