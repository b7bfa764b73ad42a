//! One client connection: connect, then send N messages sequentially and
//! time each echo.
//!
//! The worker blocks its own thread for the whole send/receive cycle of a
//! message; at most one message is in flight per connection.

use super::record::{LatencyRecorder, ResultRecord};
use crate::config::ClientConfig;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

/// Everything a single worker needs to run.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub client_full_id: String,
    pub server_ip: String,
    pub server_port: u16,
    pub messages: usize,
    pub connect_timeout: Option<Duration>,
    pub io_timeout: Option<Duration>,
}

impl WorkerSpec {
    /// Settings for the worker at `index` in a fleet built from `config`.
    pub fn from_config(config: &ClientConfig, index: usize) -> Self {
        Self {
            client_full_id: format!("{}-{}", config.client_id, index),
            server_ip: config.server_ip.clone(),
            server_port: config.server_port,
            messages: config.messages_per_client,
            connect_timeout: config.connect_timeout,
            io_timeout: config.io_timeout,
        }
    }
}

/// Failure of one message exchange. Aborts the rest of the worker's run.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Error sending message: {0}")]
    Send(#[source] io::Error),
    #[error("Error receiving response: {0}")]
    Receive(#[source] io::Error),
    #[error("Error receiving response: echo did not match message {index}")]
    Mismatch { index: usize },
}

/// Payload of the `index`-th message (1-based) from `client_full_id`.
pub fn payload(index: usize, client_full_id: &str) -> Vec<u8> {
    format!("msg {index} from {client_full_id}").into_bytes()
}

/// Run one worker to completion and return its finalized record.
///
/// Never fails: connection and exchange errors are captured in the record.
pub fn run_worker(spec: &WorkerSpec) -> ResultRecord {
    let mut recorder =
        LatencyRecorder::new(&spec.client_full_id, &spec.server_ip, spec.server_port);

    let mut stream = match connect(spec) {
        Ok(stream) => stream,
        Err(e) => {
            debug!(client = %spec.client_full_id, error = %e, "Connection failed");
            recorder.record_error(format!("Connection failed: {e}"));
            return recorder.finish();
        }
    };
    recorder.mark_connected();

    if let Err(e) = exchange_messages(&mut stream, spec, &mut recorder) {
        debug!(client = %spec.client_full_id, error = %e, "Exchange aborted");
        recorder.record_error(e);
    }

    recorder.finish()
}

/// Send `spec.messages` payloads over `stream`, one round trip at a time.
fn exchange_messages<S: Read + Write>(
    stream: &mut S,
    spec: &WorkerSpec,
    recorder: &mut LatencyRecorder,
) -> Result<(), ExchangeError> {
    let mut reply = Vec::new();

    for index in 1..=spec.messages {
        let message = payload(index, &spec.client_full_id);

        let start = Instant::now();
        stream.write_all(&message).map_err(ExchangeError::Send)?;
        recorder.record_sent();

        read_echo(stream, &mut reply, message.len()).map_err(ExchangeError::Receive)?;
        let elapsed = start.elapsed();

        if reply != message {
            return Err(ExchangeError::Mismatch { index });
        }
        recorder.record_round_trip(elapsed);
        trace!(client = %spec.client_full_id, index, ?elapsed, "Echo received");
    }

    Ok(())
}

/// Read exactly `len` bytes into `reply`, accumulating short reads.
///
/// The echo carries no framing, so the expected length is the length that
/// was just sent. A peer close before `len` bytes is `UnexpectedEof`.
fn read_echo<R: Read>(stream: &mut R, reply: &mut Vec<u8>, len: usize) -> io::Result<()> {
    reply.clear();
    reply.resize(len, 0);

    let mut filled = 0;
    while filled < len {
        match stream.read(&mut reply[filled..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("connection closed after {filled} of {len} bytes"),
                ));
            }
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Open the connection, trying IPv4 addresses before IPv6 ones.
fn connect(spec: &WorkerSpec) -> io::Result<TcpStream> {
    let mut addrs: Vec<SocketAddr> = (spec.server_ip.as_str(), spec.server_port)
        .to_socket_addrs()?
        .collect();
    addrs.sort_by_key(|addr| addr.is_ipv6());

    let mut last_error = None;
    for addr in addrs {
        let attempt = match spec.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => {
                stream.set_read_timeout(spec.io_timeout)?;
                stream.set_write_timeout(spec.io_timeout)?;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "Failed to set TCP_NODELAY");
                }
                return Ok(stream);
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses found for {}", spec.server_ip),
        )
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::net::TcpListener;
    use std::thread;

    /// Echoes writes back, delivering them in chunks of at most `chunk` bytes.
    struct ChunkedEcho {
        pending: VecDeque<u8>,
        chunk: usize,
        writes_allowed: usize,
    }

    impl ChunkedEcho {
        fn new(chunk: usize, writes_allowed: usize) -> Self {
            Self {
                pending: VecDeque::new(),
                chunk,
                writes_allowed,
            }
        }
    }

    impl Read for ChunkedEcho {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.chunk).min(self.pending.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.pending.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for ChunkedEcho {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.writes_allowed == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
            }
            self.writes_allowed -= 1;
            self.pending.extend(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn spec(messages: usize) -> WorkerSpec {
        WorkerSpec {
            client_full_id: "pod-7".to_string(),
            server_ip: "127.0.0.1".to_string(),
            server_port: 0,
            messages,
            connect_timeout: None,
            io_timeout: None,
        }
    }

    #[test]
    fn test_payload_is_deterministic() {
        assert_eq!(payload(1, "pod-0"), b"msg 1 from pod-0".to_vec());
        assert_eq!(payload(12, "pod-0"), payload(12, "pod-0"));
        assert_ne!(payload(1, "pod-0"), payload(1, "pod-1"));
    }

    #[test]
    fn test_short_reads_are_accumulated() {
        let mut stream = ChunkedEcho::new(3, usize::MAX);
        let mut recorder = LatencyRecorder::new("pod-7", "127.0.0.1", 0);

        exchange_messages(&mut stream, &spec(4), &mut recorder).unwrap();

        let record = recorder.finish();
        assert_eq!(record.messages_sent, 4);
        assert_eq!(record.messages_received, 4);
        assert!(record.errors.is_empty());
    }

    #[test]
    fn test_eof_mid_echo() {
        let mut reader: &[u8] = b"msg";
        let mut reply = Vec::new();
        let err = read_echo(&mut reader, &mut reply, 10).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_send_failure_keeps_partial_progress() {
        let mut stream = ChunkedEcho::new(64, 2);
        let mut recorder = LatencyRecorder::new("pod-7", "127.0.0.1", 0);

        let err = exchange_messages(&mut stream, &spec(5), &mut recorder).unwrap_err();
        assert!(matches!(err, ExchangeError::Send(_)));
        assert!(err.to_string().starts_with("Error sending message: "));

        let record = recorder.finish();
        assert_eq!(record.messages_sent, 2);
        assert_eq!(record.messages_received, 2);
    }

    /// Accept one connection on a loopback port and hand it to `peer`.
    fn serve_once<F>(peer: F) -> (u16, thread::JoinHandle<()>)
    where
        F: FnOnce(TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            peer(stream);
        });
        (port, handle)
    }

    #[test]
    fn test_altered_echo_aborts_worker() {
        let (port, peer) = serve_once(|mut stream| {
            let mut buf = vec![0u8; payload(1, "pod-7").len()];
            stream.read_exact(&mut buf).unwrap();
            buf.fill(b'Z');
            stream.write_all(&buf).unwrap();
        });
        let spec = WorkerSpec {
            server_port: port,
            io_timeout: Some(Duration::from_secs(5)),
            ..spec(3)
        };

        let record = run_worker(&spec);
        peer.join().unwrap();

        assert!(record.connection_success);
        assert_eq!(record.messages_sent, 1);
        assert_eq!(record.messages_received, 0);
        assert_eq!(record.average_latency_ms, 0.0);
        assert_eq!(
            record.errors,
            vec!["Error receiving response: echo did not match message 1".to_string()]
        );
    }

    #[test]
    fn test_io_timeout_on_stalled_peer() {
        let (port, peer) = serve_once(|mut stream| {
            let mut buf = vec![0u8; payload(1, "pod-7").len()];
            stream.read_exact(&mut buf).unwrap();
            // Hold the connection open without echoing
            thread::sleep(Duration::from_millis(800));
        });
        let spec = WorkerSpec {
            server_port: port,
            connect_timeout: Some(Duration::from_secs(5)),
            io_timeout: Some(Duration::from_millis(200)),
            ..spec(3)
        };

        let start = Instant::now();
        let record = run_worker(&spec);
        assert!(start.elapsed() < Duration::from_millis(800));
        peer.join().unwrap();

        assert!(record.connection_success);
        assert_eq!(record.messages_sent, 1);
        assert_eq!(record.messages_received, 0);
        assert_eq!(record.errors.len(), 1);
        assert!(
            record.errors[0].starts_with("Error receiving response: "),
            "{:?}",
            record.errors
        );
    }

    #[test]
    fn test_connection_refused() {
        // Grab a free port, then release it so nothing is listening.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let spec = WorkerSpec {
            server_port: port,
            ..spec(3)
        };

        let record = run_worker(&spec);
        assert!(!record.connection_success);
        assert_eq!(record.messages_sent, 0);
        assert_eq!(record.errors.len(), 1);
        assert!(record.errors[0].starts_with("Connection failed: "));
    }

    #[test]
    fn test_unresolvable_host() {
        let spec = WorkerSpec {
            server_ip: "host.invalid".to_string(),
            ..spec(1)
        };

        let record = run_worker(&spec);
        assert!(!record.connection_success);
        assert!(record.errors[0].starts_with("Connection failed: "));
    }
}
