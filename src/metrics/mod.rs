//! Prometheus metrics: recorder installation, metric names and the request
//! tracking helper. Rendered by the `/metrics` route in `main`.

use std::sync::Once;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

// Metric names as constants to avoid typos
pub const INVOICES_CREATED_TOTAL: &str = "spayd_invoices_created_total";
pub const INVOICES_PAID_TOTAL: &str = "spayd_invoices_paid_total";
pub const INVOICES_EXPIRED_TOTAL: &str = "spayd_invoices_expired_total";
pub const INVOICES_DECLINED_TOTAL: &str = "spayd_invoices_declined_total";

pub const WEBHOOK_EVENTS_TOTAL: &str = "spayd_webhook_events_total";
pub const VERIFICATION_CHECKS_TOTAL: &str = "spayd_verification_checks_total";
pub const EVENT_BUS_EVENTS_TOTAL: &str = "spayd_event_bus_events_total";

pub const ACTIVE_STATUS_STREAMS: &str = "spayd_active_status_streams";

pub const API_REQUESTS_TOTAL: &str = "spayd_api_requests_total";
pub const API_REQUEST_DURATION_SECONDS: &str = "spayd_api_request_duration_seconds";

static METRICS_DESCRIBED: Once = Once::new();

/// Install the Prometheus recorder and describe all metrics
pub fn init_prometheus_metrics() -> anyhow::Result<PrometheusHandle> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(API_REQUEST_DURATION_SECONDS.to_string()),
            EXPONENTIAL_SECONDS,
        )?
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    METRICS_DESCRIBED.call_once(|| {
        describe_counter!(INVOICES_CREATED_TOTAL, "Total invoices created");
        describe_counter!(INVOICES_PAID_TOTAL, "Total invoices settled as paid");
        describe_counter!(INVOICES_EXPIRED_TOTAL, "Total invoices expired unpaid");
        describe_counter!(INVOICES_DECLINED_TOTAL, "Total invoices declined");

        describe_counter!(
            WEBHOOK_EVENTS_TOTAL,
            "Provider webhook events processed, by outcome"
        );
        describe_counter!(
            VERIFICATION_CHECKS_TOTAL,
            "On-demand and sweep verification passes, by result"
        );
        describe_counter!(
            EVENT_BUS_EVENTS_TOTAL,
            "Events published on the invoice event bus, by type"
        );

        describe_gauge!(ACTIVE_STATUS_STREAMS, "Live status streams currently open");

        describe_counter!(API_REQUESTS_TOTAL, "Total API requests");
        describe_histogram!(
            API_REQUEST_DURATION_SECONDS,
            "API request duration in seconds"
        );
    });

    Ok(handle)
}

pub mod api_metrics {
    use super::*;

    pub fn record_api_request(method: &str, path: &str, status_code: u16, duration: Duration) {
        counter!(
            API_REQUESTS_TOTAL,
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status" => status_code.to_string(),
        )
        .increment(1);
        histogram!(API_REQUEST_DURATION_SECONDS).record(duration.as_secs_f64());
    }
}

pub fn record_webhook_event(outcome: &'static str) {
    counter!(WEBHOOK_EVENTS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_verification_check(paid: bool) {
    let result = if paid { "paid" } else { "pending" };
    counter!(VERIFICATION_CHECKS_TOTAL, "result" => result).increment(1);
}

pub fn stream_opened() {
    gauge!(ACTIVE_STATUS_STREAMS).increment(1.0);
}

pub fn stream_closed() {
    gauge!(ACTIVE_STATUS_STREAMS).decrement(1.0);
}
