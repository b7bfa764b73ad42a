//! echo-client: run a fleet of concurrent echo clients and print one JSON
//! result record per client on stdout.

use clap::Parser;
use echo_bench::client::run_fleet;
use echo_bench::config::{self, ClientArgs, ClientConfig, ConfigFile};
use echo_bench::logging;
use echo_bench::sink::RecordSink;
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ClientArgs::parse();
    let file = ConfigFile::load(args.config.as_deref())?;
    logging::init(&config::log_level(args.log_level.as_deref(), &file));

    let config = ClientConfig::resolve(args, file);
    info!(
        server = %config.server_ip,
        port = config.server_port,
        client_id = %config.client_id,
        clients = config.concurrent_clients,
        messages = config.messages_per_client,
        "Starting client fleet"
    );

    let sink = RecordSink::stdout();
    let summary = run_fleet(&config, &sink);

    info!(
        connections = summary.connections_attempted,
        successful = summary.successful_connections,
        sent = summary.messages_sent,
        received = summary.messages_received,
        errors = summary.total_errors,
        success_rate = summary.success_rate(),
        min_latency_ms = ?summary.min_latency_ms,
        mean_latency_ms = ?summary.mean_latency_ms,
        max_latency_ms = ?summary.max_latency_ms,
        "Fleet finished"
    );
    Ok(())
}
