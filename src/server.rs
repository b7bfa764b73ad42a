//! Echo server entry point.
//!
//! Resolves the listen address, sizes the reactor pool and starts the
//! configured backend.

use crate::config::{ConfigError, RuntimeType, ServerConfig};
use crate::runtime::mio::{self as mio_runtime, LoopConfig, MioServer};
use crate::runtime::tokio_impl::{self, TokioServer};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use thiserror::Error;

/// Startup failures. Everything after startup is logged, not returned.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Invalid listen address '{0}': {1}")]
    Address(String, #[source] io::Error),
    #[error("Failed to listen on {0}: {1}")]
    Bind(SocketAddr, #[source] io::Error),
}

enum Backend {
    Mio(MioServer),
    Tokio(TokioServer),
}

/// A running server.
pub struct ServerHandle {
    backend: Backend,
}

impl ServerHandle {
    /// Address actually bound; differs from the configured one for port 0.
    pub fn local_addr(&self) -> SocketAddr {
        match &self.backend {
            Backend::Mio(server) => server.local_addr(),
            Backend::Tokio(server) => server.local_addr(),
        }
    }

    /// Startup line printed to stdout once the listener is bound.
    pub fn banner(&self) -> String {
        format!("[*] Serving on {}", self.local_addr())
    }

    /// Block for the lifetime of the server.
    pub fn wait(self) -> io::Result<()> {
        match self.backend {
            Backend::Mio(server) => server.wait(),
            Backend::Tokio(server) => server.wait(),
        }
    }

    /// Stop accepting and close every live session.
    pub fn shutdown(self) {
        match self.backend {
            Backend::Mio(server) => server.shutdown(),
            Backend::Tokio(server) => server.shutdown(),
        }
    }
}

/// Bind the listener(s) and start the reactor pool.
pub fn start(config: &ServerConfig) -> Result<ServerHandle, ServerError> {
    let addr = resolve(&config.host, config.port)?;
    let workers = config.worker_count()?;

    let backend = match config.runtime {
        RuntimeType::Mio => {
            let loop_config = LoopConfig {
                workers,
                buffer_size: config.buffer_size,
                max_connections: config.max_connections,
            };
            Backend::Mio(
                mio_runtime::start(addr, loop_config).map_err(|e| ServerError::Bind(addr, e))?,
            )
        }
        RuntimeType::Tokio => Backend::Tokio(
            tokio_impl::start(addr, workers, config.buffer_size, config.max_connections)
                .map_err(|e| ServerError::Bind(addr, e))?,
        ),
    };

    Ok(ServerHandle { backend })
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, ServerError> {
    let address_error = |e| ServerError::Address(format!("{host}:{port}"), e);
    (host, port)
        .to_socket_addrs()
        .map_err(address_error)?
        .next()
        .ok_or_else(|| address_error(io::Error::new(io::ErrorKind::NotFound, "no addresses found")))
}
