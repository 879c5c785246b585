use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref EVENTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "event_log_events_total",
        "Total events received over HTTP"
    ))
    .expect("valid metric opts");
    pub static ref ACCEPTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "event_log_accepted_total",
        "Total events validated and appended"
    ))
    .expect("valid metric opts");
    pub static ref REJECTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "event_log_rejected_total",
        "Total events rejected by validation"
    ))
    .expect("valid metric opts");
    pub static ref STORAGE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "event_log_storage_failures_total",
        "Total appends that failed in storage"
    ))
    .expect("valid metric opts");
    pub static ref APPEND_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "event_log_append_latency_seconds",
            "Time taken to append one record"
        )
        .buckets(vec![
            0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0
        ])
    )
    .expect("valid metric opts");
    pub static ref WRITER_QUEUE_DEPTH: Gauge = Gauge::with_opts(Opts::new(
        "event_log_writer_queue_depth",
        "Appends waiting for the writer task"
    ))
    .expect("valid metric opts");
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(EVENTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ACCEPTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REJECTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORAGE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(APPEND_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(WRITER_QUEUE_DEPTH.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
