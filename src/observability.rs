use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "shelterbed_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "shelterbed_query_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: occupancies created. Labels: kind (request, walk_in).
pub const ALLOCATIONS_TOTAL: &str = "shelterbed_allocations_total";

/// Counter: occupancies released by check-out.
pub const RELEASES_TOTAL: &str = "shelterbed_releases_total";

/// Counter: mutations refused because state moved. Labels: kind.
pub const CONFLICTS_TOTAL: &str = "shelterbed_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "shelterbed_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "shelterbed_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "shelterbed_connections_rejected_total";

/// Gauge: networks with a loaded engine.
pub const NETWORKS_ACTIVE: &str = "shelterbed_networks_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "shelterbed_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "shelterbed_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertAgency { .. } => "insert_agency",
        Command::InsertSite { .. } => "insert_site",
        Command::InsertBed { .. } => "insert_bed",
        Command::InsertCase { .. } => "insert_case",
        Command::InsertRequest { .. } => "create_request",
        Command::SelectRequest { .. } => "describe_request",
        Command::SelectRequests { .. } => "list_requests",
        Command::InsertOccupancy { .. } => "allocate",
        Command::InsertWalkIn { .. } => "walk_in",
        Command::DeleteOccupancy { .. } => "release",
        Command::InsertDenial { .. } => "deny",
        Command::DeleteRequest { .. } => "remove",
        Command::SelectConflicts { .. } => "detect_conflict",
        Command::SelectAvailableBeds { .. } => "available_beds",
    }
}
