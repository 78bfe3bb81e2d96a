use metrics::{describe_counter, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initializes the metrics system and returns the Prometheus handle.
pub fn init_metrics() -> PrometheusHandle {
    let handle = METRICS_HANDLE.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("Failed to install Prometheus recorder");
        describe_metrics();
        handle
    });
    handle.clone()
}

fn describe_metrics() {
    describe_counter!(
        "registrations_total",
        Unit::Count,
        "Registration lifecycle events by action"
    );
    describe_counter!(
        "transfers_total",
        Unit::Count,
        "Transfer request lifecycle events by action"
    );
    describe_counter!(
        "bills_total",
        Unit::Count,
        "Utility bill lifecycle events by action"
    );
    describe_counter!(
        "payments_total",
        Unit::Count,
        "Payment lifecycle events by action"
    );
    describe_counter!(
        "ipn_callbacks_total",
        Unit::Count,
        "Gateway IPN deliveries by response code"
    );
}
