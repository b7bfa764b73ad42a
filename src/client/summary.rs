//! Aggregate view of a finished fleet.

use super::record::ResultRecord;

/// Totals across every record of one benchmark run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FleetSummary {
    pub connections_attempted: usize,
    pub successful_connections: usize,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub total_errors: usize,
    /// Min/mean/max of per-worker averages, over workers that received
    /// at least one echo. `None` when no worker did.
    pub min_latency_ms: Option<f64>,
    pub mean_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
}

impl FleetSummary {
    pub fn from_records(records: &[ResultRecord]) -> Self {
        let mut summary = FleetSummary {
            connections_attempted: records.len(),
            ..Default::default()
        };

        let mut latency_sum = 0.0;
        let mut latency_count = 0usize;

        for record in records {
            if record.connection_success {
                summary.successful_connections += 1;
            }
            summary.messages_sent += record.messages_sent;
            summary.messages_received += record.messages_received;
            summary.total_errors += record.errors.len();

            if record.messages_received > 0 {
                let avg = record.average_latency_ms;
                latency_sum += avg;
                latency_count += 1;
                summary.min_latency_ms = Some(summary.min_latency_ms.map_or(avg, |m| m.min(avg)));
                summary.max_latency_ms = Some(summary.max_latency_ms.map_or(avg, |m| m.max(avg)));
            }
        }

        if latency_count > 0 {
            summary.mean_latency_ms = Some(latency_sum / latency_count as f64);
        }
        summary
    }

    /// Received / sent across the fleet; 0 when nothing was sent.
    pub fn success_rate(&self) -> f64 {
        if self.messages_sent == 0 {
            0.0
        } else {
            self.messages_received as f64 / self.messages_sent as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sent: u64, received: u64, avg: f64, errors: usize) -> ResultRecord {
        ResultRecord {
            client_full_id: "pod-0".into(),
            server_ip: "localhost".into(),
            server_port: 8080,
            messages_sent: sent,
            messages_received: received,
            connection_success: sent > 0,
            total_latency_ms: avg * received as f64,
            errors: vec!["e".to_string(); errors],
            average_latency_ms: avg,
        }
    }

    #[test]
    fn test_aggregates() {
        let records = vec![record(10, 10, 1.0, 0), record(5, 4, 3.0, 1), record(0, 0, 0.0, 1)];
        let summary = FleetSummary::from_records(&records);

        assert_eq!(summary.connections_attempted, 3);
        assert_eq!(summary.successful_connections, 2);
        assert_eq!(summary.messages_sent, 15);
        assert_eq!(summary.messages_received, 14);
        assert_eq!(summary.total_errors, 2);
        assert_eq!(summary.min_latency_ms, Some(1.0));
        assert_eq!(summary.max_latency_ms, Some(3.0));
        assert_eq!(summary.mean_latency_ms, Some(2.0));
        assert!((summary.success_rate() - 14.0 / 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_fleet() {
        let summary = FleetSummary::from_records(&[]);
        assert_eq!(summary.connections_attempted, 0);
        assert_eq!(summary.mean_latency_ms, None);
        assert_eq!(summary.success_rate(), 0.0);
    }
}
