//! Tokio backend.
//!
//! A multi-threaded runtime whose worker threads all drive the same reactor.
//! Each accepted connection becomes one spawned task that owns the socket
//! and its buffer; the task ends, and the session with it, when the peer
//! closes or an I/O call fails.

use crate::runtime::session::SessionError;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Running tokio server.
pub struct TokioServer {
    local_addr: SocketAddr,
    runtime: Runtime,
    acceptor: JoinHandle<()>,
}

impl TokioServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Block on the accept loop. It only ends if the runtime is torn down.
    pub fn wait(self) -> io::Result<()> {
        self.runtime
            .block_on(self.acceptor)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    /// Cancel every task, dropping the listener and all live sessions.
    pub fn shutdown(self) {
        self.acceptor.abort();
        self.runtime.shutdown_timeout(SHUTDOWN_GRACE);
    }
}

/// Build the runtime, bind the listener and spawn the accept loop.
pub fn start(
    addr: SocketAddr,
    workers: usize,
    buffer_size: usize,
    max_connections: Option<usize>,
) -> io::Result<TokioServer> {
    let runtime = Builder::new_multi_thread()
        .worker_threads(workers)
        .thread_name("reactor")
        .enable_all()
        .build()?;

    let listener = runtime.block_on(TcpListener::bind(addr))?;
    let local_addr = listener.local_addr()?;
    info!(workers, addr = %local_addr, buffer_size, "Starting tokio runtime");

    let limit = max_connections.map(|max| Arc::new(Semaphore::new(max)));
    let acceptor = runtime.spawn(accept_loop(listener, buffer_size, limit));

    Ok(TokioServer {
        local_addr,
        runtime,
        acceptor,
    })
}

async fn accept_loop(listener: TcpListener, buffer_size: usize, limit: Option<Arc<Semaphore>>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let permit = match &limit {
                    Some(limit) => match Arc::clone(limit).try_acquire_owned() {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            warn!(peer = %peer, "Connection limit reached");
                            continue;
                        }
                    },
                    None => None,
                };

                debug!(peer = %peer, "Accepted connection");
                tokio::spawn(async move {
                    match echo(stream, buffer_size).await {
                        Ok(()) => trace!(peer = %peer, "Connection closed by client"),
                        Err(e) => warn!(peer = %peer, "{}", e),
                    }
                    drop(permit);
                });
            }
            Err(e) => accept_failed(e).await,
        }
    }
}

/// Log a failed accept and pause before the next one, so a persistent
/// error such as `EMFILE` does not spin the loop.
async fn accept_failed(e: io::Error) {
    error!("Error accepting connection: {}", e);
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

/// Echo every chunk back until the peer shuts down.
///
/// Each write completes before the next read is issued.
pub async fn echo<S>(mut stream: S, buffer_size: usize) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];

    loop {
        let n = stream.read(&mut buf).await.map_err(SessionError::Read)?;
        if n == 0 {
            return Ok(());
        }
        debug!("Received {n} bytes. Echoing back...");
        stream
            .write_all(&buf[..n])
            .await
            .map_err(SessionError::Write)?;
    }
}
