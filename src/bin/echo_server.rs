//! echo-server: accept TCP connections and echo every byte back.

use clap::Parser;
use echo_bench::config::{self, ConfigFile, ServerArgs, ServerConfig};
use echo_bench::{logging, server};
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ServerArgs::parse();
    let file = ConfigFile::load(args.config.as_deref())?;

    // Initialize logging before resolving, so port fallbacks are reported
    logging::init(&config::log_level(args.log_level.as_deref(), &file));

    let config = ServerConfig::resolve(args, file);
    info!(
        host = %config.host,
        port = config.port,
        runtime = ?config.runtime,
        workers = ?config.workers,
        buffer_size = config.buffer_size,
        max_connections = ?config.max_connections,
        "Starting echo server"
    );

    let server = server::start(&config)?;
    println!("{}", server.banner());

    server.wait()?;
    Ok(())
}
