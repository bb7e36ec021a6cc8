//! Prometheus metrics for the faucet

use crate::error::{FaucetError, FaucetResult};
use prometheus::{Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::time::Duration;

pub struct FaucetMetrics {
    registry: Registry,
    requests: IntCounterVec,
    submit_duration: Histogram,
    destination_locks: IntGauge,
}

impl FaucetMetrics {
    pub fn new() -> FaucetResult<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("faucet_requests_total", "Transfer requests by terminal state"),
            &["outcome"],
        )
        .map_err(metrics_error)?;
        let submit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "faucet_submit_duration_seconds",
                "Time spent submitting a transfer to the ledger",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )
        .map_err(metrics_error)?;
        let destination_locks = IntGauge::new(
            "faucet_destination_locks",
            "Destination accounts with a transfer in progress or queued",
        )
        .map_err(metrics_error)?;

        registry.register(Box::new(requests.clone())).map_err(metrics_error)?;
        registry.register(Box::new(submit_duration.clone())).map_err(metrics_error)?;
        registry.register(Box::new(destination_locks.clone())).map_err(metrics_error)?;

        Ok(Self {
            registry,
            requests,
            submit_duration,
            destination_locks,
        })
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.requests.with_label_values(&[outcome]).inc();
    }

    pub fn observe_submit(&self, elapsed: Duration) {
        self.submit_duration.observe(elapsed.as_secs_f64());
    }

    pub fn set_destination_locks(&self, count: usize) {
        self.destination_locks.set(count as i64);
    }

    pub fn requests_with_outcome(&self, outcome: &str) -> u64 {
        self.requests.with_label_values(&[outcome]).get()
    }

    /// Gather metrics as Prometheus text format
    pub fn gather(&self) -> FaucetResult<String> {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .map_err(metrics_error)
    }
}

fn metrics_error(err: prometheus::Error) -> FaucetError {
    FaucetError::Internal(format!("metrics: {err}"))
}
