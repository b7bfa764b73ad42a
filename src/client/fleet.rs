//! Fleet driver: start K workers concurrently and wait for all of them.

use super::record::{LatencyRecorder, ResultRecord};
use super::summary::FleetSummary;
use super::worker::{run_worker, WorkerSpec};
use crate::config::ClientConfig;
use crate::sink::RecordSink;
use std::io::Write;
use std::thread;
use tracing::{debug, error};

/// Run `config.concurrent_clients` workers and emit one record per worker.
///
/// Each worker writes its own record to `sink` as soon as it finishes, so
/// records appear in completion order. Worker failures only show up in the
/// records; this function itself never fails.
pub fn run_fleet<W: Write + Send>(config: &ClientConfig, sink: &RecordSink<W>) -> FleetSummary {
    let records: Vec<ResultRecord> = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(config.concurrent_clients);
        let mut records = Vec::with_capacity(config.concurrent_clients);

        for index in 0..config.concurrent_clients {
            let spec = WorkerSpec::from_config(config, index);

            let spawned = thread::Builder::new()
                .name(format!("client-{index}"))
                .spawn_scoped(scope, move || {
                    let record = run_worker(&spec);
                    emit(sink, &record);
                    record
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!(worker = index, error = %e, "Failed to spawn client worker");
                    let spec = WorkerSpec::from_config(config, index);
                    let mut recorder =
                        LatencyRecorder::new(spec.client_full_id, spec.server_ip, spec.server_port);
                    recorder.record_error(format!("Connection failed: worker not started: {e}"));
                    let record = recorder.finish();
                    emit(sink, &record);
                    records.push(record);
                }
            }
        }

        for handle in handles {
            match handle.join() {
                Ok(record) => records.push(record),
                Err(_) => error!("Client worker panicked"),
            }
        }
        records
    });

    debug!(workers = records.len(), "All client workers finished");
    FleetSummary::from_records(&records)
}

fn emit<W: Write>(sink: &RecordSink<W>, record: &ResultRecord) {
    if let Err(e) = sink.emit(record) {
        error!(client = %record.client_full_id, error = %e, "Failed to write result record");
    }
}
