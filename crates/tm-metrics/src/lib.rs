use std::env;
use std::sync::OnceLock;

use metrics::{Unit, describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize a Prometheus exporter listening on `0.0.0.0:<port>`.
///
/// The port is resolved from the provided environment variable name or the
/// supplied `default_port`. Must be called from inside a tokio runtime; the
/// exporter is spawned onto it. Returns the handle once a recorder is installed.
pub fn init_metrics(port_env: &str, default_port: u16) -> Option<&'static PrometheusHandle> {
    if let Some(existing) = PROMETHEUS_HANDLE.get() {
        return Some(existing);
    }

    let port = env::var(port_env)
        .ok()
        .and_then(|raw| raw.parse::<u16>().ok())
        .unwrap_or(default_port);

    let (recorder, exporter) = match PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .build()
    {
        Ok(parts) => parts,
        Err(err) => {
            warn!(error = %err, metrics_port = port, "failed to build prometheus exporter");
            return None;
        }
    };

    let handle = recorder.handle();
    if let Err(err) = metrics::set_global_recorder(recorder) {
        warn!(error = %err, "metrics recorder already installed");
        return None;
    }

    tokio::spawn(async move {
        if let Err(err) = exporter.await {
            warn!(error = ?err, "prometheus exporter stopped");
        }
    });

    describe_metrics();
    let _ = PROMETHEUS_HANDLE.set(handle);
    info!(metrics_port = port, "started prometheus exporter");
    PROMETHEUS_HANDLE.get()
}

/// Registers help text for every metric the engine and worker emit.
pub fn describe_metrics() {
    describe_counter!(
        "tm_match_requests_total",
        Unit::Count,
        "Ranking requests served, by strategy"
    );
    describe_histogram!(
        "tm_match_duration_seconds",
        Unit::Seconds,
        "Wall time of a ranking request"
    );
    describe_counter!(
        "tm_gate_excluded_total",
        Unit::Count,
        "Candidates excluded by a gate, by gate and reason"
    );
    describe_counter!(
        "tm_embedding_population_total",
        Unit::Count,
        "Embedding population task outcomes"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describing_without_recorder_is_a_noop() {
        describe_metrics();
    }
}
