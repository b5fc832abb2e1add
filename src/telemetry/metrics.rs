//! Prometheus metrics

use crate::risk::DenyReason;
use std::net::SocketAddr;
use std::time::Duration;

/// Latency metric types
#[derive(Debug, Clone, Copy)]
pub enum LatencyMetric {
    /// Broker submission round trip, retries included
    OrderSubmission,
    /// Submission to full fill
    FillConfirmation,
    /// Advisory collaborator call
    AdvisorCall,
}

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    Equity,
    Cash,
    Committed,
    OpenPositions,
    DailyRealizedPnl,
    /// 1 while the circuit breaker is halted
    BreakerHalted,
}

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    DecisionsEvaluated,
    OrdersSubmitted,
    OrdersRejected,
    Fills,
    BracketsAttached,
    TrailingUpdates,
    ReconciliationFlags,
    BreakerTrips,
    SymbolErrors,
}

/// Record a latency measurement
pub fn record_latency(metric: LatencyMetric, duration: Duration) {
    let metric_name = match metric {
        LatencyMetric::OrderSubmission => "tradegate_order_submission_latency_ms",
        LatencyMetric::FillConfirmation => "tradegate_fill_confirmation_latency_ms",
        LatencyMetric::AdvisorCall => "tradegate_advisor_latency_ms",
    };
    metrics::histogram!(metric_name).record(duration.as_secs_f64() * 1000.0);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    let metric_name = match metric {
        GaugeMetric::Equity => "tradegate_equity",
        GaugeMetric::Cash => "tradegate_cash",
        GaugeMetric::Committed => "tradegate_committed",
        GaugeMetric::OpenPositions => "tradegate_open_positions",
        GaugeMetric::DailyRealizedPnl => "tradegate_daily_realized_pnl",
        GaugeMetric::BreakerHalted => "tradegate_breaker_halted",
    };
    metrics::gauge!(metric_name).set(value);
}

/// Increment a counter by one
pub fn increment_counter(metric: CounterMetric) {
    let metric_name = match metric {
        CounterMetric::DecisionsEvaluated => "tradegate_decisions_total",
        CounterMetric::OrdersSubmitted => "tradegate_orders_submitted_total",
        CounterMetric::OrdersRejected => "tradegate_orders_rejected_total",
        CounterMetric::Fills => "tradegate_fills_total",
        CounterMetric::BracketsAttached => "tradegate_brackets_attached_total",
        CounterMetric::TrailingUpdates => "tradegate_trailing_updates_total",
        CounterMetric::ReconciliationFlags => "tradegate_reconciliation_flags_total",
        CounterMetric::BreakerTrips => "tradegate_breaker_trips_total",
        CounterMetric::SymbolErrors => "tradegate_symbol_errors_total",
    };
    metrics::counter!(metric_name).increment(1);
}

/// Count a risk denial by reason
pub fn record_denial(reason: DenyReason) {
    metrics::counter!("tradegate_risk_denials_total", "reason" => reason.as_str()).increment(1);
}

/// Install the Prometheus exporter with an HTTP scrape endpoint
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics exporter: {}", e))?;
    tracing::info!(%addr, "Prometheus metrics listening");
    Ok(())
}
