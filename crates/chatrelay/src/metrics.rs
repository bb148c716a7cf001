use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared readiness state.
#[derive(Clone, Default)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl HealthState {
    /// Create a new health state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Mark the service as ready.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Connection count gauges.
pub mod gauges {
    /// Increment the active connections gauge.
    pub fn inc_connections_active() {
        metrics::gauge!("chat_connections_active").increment(1.0);
    }

    /// Decrement the active connections gauge.
    pub fn dec_connections_active() {
        metrics::gauge!("chat_connections_active").decrement(1.0);
    }
}

/// Event counters.
pub mod counters {
    /// Record an admission attempt with the given status label.
    pub fn admissions_total(status: &'static str) {
        metrics::counter!("chat_admissions_total", "status" => status).increment(1);
    }

    /// Increment the relayed-messages counter by the number of recipients.
    pub fn messages_relayed_total(recipients: u64) {
        metrics::counter!("chat_messages_relayed_total").increment(recipients);
    }

    /// Record a recipient evicted during fan-out, labelled by reason.
    pub fn recipients_evicted_total(reason: &'static str) {
        metrics::counter!("chat_recipients_evicted_total", "reason" => reason).increment(1);
    }

    /// Record a recipient that could not be reached during fan-out.
    pub fn recipients_unreachable_total(reason: &'static str) {
        metrics::counter!("chat_recipients_unreachable_total", "reason" => reason).increment(1);
    }

    /// Record a token issuance attempt on the HTTP side service.
    pub fn tokens_issued_total(status: &'static str) {
        metrics::counter!("chat_tokens_issued_total", "status" => status).increment(1);
    }
}

/// Latency histograms.
pub mod histograms {
    /// Record the duration of one fan-out pass in seconds.
    pub fn fanout_seconds(value: f64) {
        metrics::histogram!("chat_fanout_seconds").record(value);
    }
}
