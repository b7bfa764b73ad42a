//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready, then the
//! session state machine performs non-blocking read/write syscalls until
//! the socket would block again. Uses epoll on Linux, kqueue on macOS.
//!
//! Every worker thread owns a `Poll`, a listener bound with `SO_REUSEPORT`
//! on the shared address, and the table of sessions it accepted. The kernel
//! spreads incoming connections across the listeners.

use crate::runtime::connection::{Connection, ConnectionLimit, ConnectionTable};
use crate::runtime::session::{Progress, Wait};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

const EVENTS_CAPACITY: usize = 1024;
const LISTEN_BACKLOG: i32 = 1024;

/// Settings shared by every worker.
#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    pub workers: usize,
    pub buffer_size: usize,
    /// Session limit across all workers; `None` is unbounded.
    pub max_connections: Option<usize>,
}

/// Running pool of mio workers.
pub struct MioServer {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    wakers: Vec<Arc<Waker>>,
    handles: Vec<JoinHandle<()>>,
}

impl MioServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Block until every worker exits.
    pub fn wait(self) -> io::Result<()> {
        for handle in self.handles {
            if handle.join().is_err() {
                error!("Worker panicked");
            }
        }
        Ok(())
    }

    /// Stop all workers and close every live session.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Release);
        for waker in &self.wakers {
            if let Err(e) = waker.wake() {
                warn!(error = %e, "Failed to wake worker");
            }
        }
        let _ = self.wait();
    }
}

/// Bind one listener per worker and start the worker threads.
///
/// All listeners are bound before any thread starts, so a bind failure is
/// returned to the caller. Binding port 0 picks a port once and reuses it
/// for the remaining listeners.
pub fn start(addr: SocketAddr, config: LoopConfig) -> io::Result<MioServer> {
    let first = create_listener_with_reuseport(addr)?;
    let local_addr = first.local_addr()?;

    let mut listeners = Vec::with_capacity(config.workers);
    listeners.push(first);
    for _ in 1..config.workers {
        listeners.push(create_listener_with_reuseport(local_addr)?);
    }

    info!(
        workers = config.workers,
        addr = %local_addr,
        buffer_size = config.buffer_size,
        "Starting mio runtime"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let limit = config
        .max_connections
        .map(|max| Arc::new(ConnectionLimit::new(max)));
    let mut wakers = Vec::with_capacity(config.workers);
    let mut handles = Vec::with_capacity(config.workers);

    for (worker_id, listener) in listeners.into_iter().enumerate() {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let mut worker = Worker {
            id: worker_id,
            poll,
            listener: TcpListener::from_std(listener),
            connections: ConnectionTable::new(limit.clone()),
            buffer_size: config.buffer_size,
            shutdown: Arc::clone(&shutdown),
        };

        let handle = thread::Builder::new()
            .name(format!("worker-{worker_id}"))
            .spawn(move || {
                if let Err(e) = worker.run() {
                    error!(worker = worker_id, error = %e, "Worker failed");
                }
            })?;

        wakers.push(waker);
        handles.push(handle);
    }

    Ok(MioServer {
        local_addr,
        shutdown,
        wakers,
        handles,
    })
}

struct Worker {
    id: usize,
    poll: Poll,
    listener: TcpListener,
    connections: ConnectionTable<TcpStream>,
    buffer_size: usize,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        self.poll
            .registry()
            .register(&mut self.listener, LISTENER_TOKEN, Interest::READABLE)?;

        debug!(worker = self.id, "Worker started");

        loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }

            for event in events.iter() {
                match event.token() {
                    WAKER_TOKEN => {}
                    LISTENER_TOKEN => self.accept_connections(),
                    Token(conn_id) => self.drive(conn_id),
                }
            }

            if self.shutdown.load(Ordering::Acquire) {
                debug!(
                    worker = self.id,
                    open = self.connections.len(),
                    "Worker shutting down"
                );
                return Ok(());
            }
        }
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    let Ok(conn_id) = self
                        .connections
                        .insert(Connection::new(stream, self.buffer_size))
                    else {
                        warn!(worker = self.id, peer = %peer_addr, "Connection limit reached");
                        continue;
                    };

                    if let Some(conn) = self.connections.get_mut(conn_id) {
                        if let Err(e) = self.poll.registry().register(
                            conn.session.stream_mut(),
                            Token(conn_id),
                            Interest::READABLE,
                        ) {
                            error!(error = %e, "Failed to register connection");
                            self.connections.remove(conn_id);
                            continue;
                        }
                    }

                    debug!(worker = self.id, conn_id, peer = %peer_addr, "Accepted connection");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    break;
                }
            }
        }
    }

    /// Advance one session after a readiness event.
    fn drive(&mut self, conn_id: usize) {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return;
        };

        match conn.session.advance() {
            Ok(Progress::Blocked(wait)) => {
                if wait == conn.waiting {
                    return;
                }
                let interest = match wait {
                    Wait::Readable => Interest::READABLE,
                    Wait::Writable => Interest::WRITABLE,
                };
                match self
                    .poll
                    .registry()
                    .reregister(conn.session.stream_mut(), Token(conn_id), interest)
                {
                    Ok(()) => conn.waiting = wait,
                    Err(e) => {
                        warn!(conn_id, error = %e, "Failed to reregister connection");
                        self.close(conn_id);
                    }
                }
            }
            Ok(Progress::Closed) => {
                trace!(conn_id, "Connection closed by client");
                self.close(conn_id);
            }
            Err(e) => {
                warn!(conn_id, "{}", e);
                self.close(conn_id);
            }
        }
    }

    fn close(&mut self, conn_id: usize) {
        if let Some(mut conn) = self.connections.remove(conn_id) {
            let _ = self.poll.registry().deregister(conn.session.stream_mut());
            debug!(conn_id, "Connection closed");
        }
    }
}

/// Create a TCP listener with SO_REUSEPORT for kernel load balancing.
fn create_listener_with_reuseport(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream as StdTcpStream;
    use std::time::Duration;

    fn start_local(workers: usize, max_connections: Option<usize>) -> MioServer {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        start(
            addr,
            LoopConfig {
                workers,
                buffer_size: 1024,
                max_connections,
            },
        )
        .unwrap()
    }

    fn connect(server: &MioServer) -> StdTcpStream {
        let stream = StdTcpStream::connect(server.local_addr()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream
    }

    #[test]
    fn test_echo_larger_than_buffer() {
        let server = start_local(2, None);
        let mut stream = connect(&server);

        let payload: Vec<u8> = (0..=255u8).cycle().take(64 * 1024).collect();
        let mut writer = stream.try_clone().unwrap();
        let sender = {
            let payload = payload.clone();
            thread::spawn(move || writer.write_all(&payload).unwrap())
        };

        let mut echoed = vec![0u8; payload.len()];
        stream.read_exact(&mut echoed).unwrap();
        sender.join().unwrap();
        assert_eq!(echoed, payload);

        server.shutdown();
    }

    #[test]
    fn test_many_sessions_across_workers() {
        let server = start_local(4, None);

        let mut streams: Vec<StdTcpStream> = (0..32).map(|_| connect(&server)).collect();
        for (i, stream) in streams.iter_mut().enumerate() {
            let message = format!("session {i}");
            stream.write_all(message.as_bytes()).unwrap();
            let mut buf = vec![0u8; message.len()];
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(buf, message.as_bytes());
        }

        server.shutdown();
    }

    #[test]
    fn test_shutdown_closes_sessions() {
        let server = start_local(2, None);
        let mut stream = connect(&server);
        stream.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();

        server.shutdown();

        let mut rest = [0u8; 16];
        assert!(matches!(stream.read(&mut rest), Ok(0) | Err(_)));
    }

    #[test]
    fn test_connection_limit_drops_excess() {
        // Two workers share one slot: the second session is dropped whichever
        // listener the kernel hands it to.
        let server = start_local(2, Some(1));

        let mut first = connect(&server);
        first.write_all(b"one").unwrap();
        let mut buf = [0u8; 3];
        first.read_exact(&mut buf).unwrap();

        let mut second = connect(&server);
        let _ = second.write_all(b"two");
        let mut rest = [0u8; 3];
        assert!(matches!(second.read(&mut rest), Ok(0) | Err(_)));

        server.shutdown();
    }
}
