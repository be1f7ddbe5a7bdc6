//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use helpline_agent::{ConsumerSummary, TurnOutcome};

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub fn record_call_started() {
    metrics::counter!("calls_started_total").increment(1);
    metrics::gauge!("calls_active").increment(1.0);
}

pub fn record_call_ended() {
    metrics::counter!("calls_ended_total").increment(1);
    metrics::gauge!("calls_active").decrement(1.0);
}

/// One background intake step and how its script was delivered.
pub fn record_intake_step(stage: &str, delivery: &str) {
    let labels = [("stage", stage.to_string()), ("delivery", delivery.to_string())];
    metrics::counter!("intake_steps_total", &labels).increment(1);
}

/// Turn outcomes of one finished media stream.
pub fn record_stream(summary: &ConsumerSummary) {
    metrics::counter!("finals_dropped_total").increment(summary.dropped as u64);
    for turn in &summary.turns {
        let outcome = match turn.outcome {
            TurnOutcome::Answered { degraded, .. } => {
                if degraded {
                    metrics::counter!("degraded_responses_total").increment(1);
                }
                "answered"
            }
            TurnOutcome::RateLimited { .. } => "rate_limited",
            TurnOutcome::CallInactive => "call_inactive",
        };
        let labels = [("outcome", outcome.to_string())];
        metrics::counter!("turns_total", &labels).increment(1);
    }
}
