//! # Prometheus Metrics
//!
//! Counts what the builder does, fed from the wallet's [`TxEvent`] stream.
//! Metrics live in a dedicated [`prometheus::Registry`] with the `nova_mw`
//! prefix and are rendered in the text exposition format on demand.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use nova_mw::transaction::TxEvent;

/// Metric handles for one wallet process.
#[derive(Clone)]
pub struct WalletMetrics {
    registry: Registry,
    /// Stages that finished, labeled by stage name.
    pub stages_completed_total: IntCounterVec,
    /// Stage failures, labeled by stage name and `fatal`.
    pub stage_failures_total: IntCounterVec,
    /// Key keeper calls currently running.
    pub async_in_flight: IntGauge,
    /// Key keeper calls that returned an error.
    pub async_failures_total: IntCounter,
    /// Transactions that ended, labeled by outcome.
    pub transactions_total: IntCounterVec,
}

impl WalletMetrics {
    /// Create and register every metric.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("nova_mw".into()), None)?;

        let stages_completed_total = IntCounterVec::new(
            Opts::new("stages_completed_total", "Builder stages that completed"),
            &["stage"],
        )?;
        registry.register(Box::new(stages_completed_total.clone()))?;

        let stage_failures_total = IntCounterVec::new(
            Opts::new("stage_failures_total", "Builder stages that failed"),
            &["stage", "fatal"],
        )?;
        registry.register(Box::new(stage_failures_total.clone()))?;

        let async_in_flight = IntGauge::new("async_in_flight", "Key keeper requests in flight")?;
        registry.register(Box::new(async_in_flight.clone()))?;

        let async_failures_total =
            IntCounter::new("async_failures_total", "Key keeper requests that failed")?;
        registry.register(Box::new(async_failures_total.clone()))?;

        let transactions_total = IntCounterVec::new(
            Opts::new("transactions_total", "Transactions that reached a terminal state"),
            &["outcome"],
        )?;
        registry.register(Box::new(transactions_total.clone()))?;

        Ok(Self {
            registry,
            stages_completed_total,
            stage_failures_total,
            async_in_flight,
            async_failures_total,
            transactions_total,
        })
    }

    /// Fold one event into the counters.
    pub fn record(&self, event: &TxEvent) {
        match event {
            TxEvent::StageCompleted { stage, .. } => {
                self.stages_completed_total.with_label_values(&[stage.name()]).inc();
            }
            TxEvent::StageFailed { stage, fatal, .. } => {
                let fatal = if *fatal { "true" } else { "false" };
                self.stage_failures_total.with_label_values(&[stage.name(), fatal]).inc();
            }
            TxEvent::AsyncStarted { .. } => self.async_in_flight.inc(),
            TxEvent::AsyncFinished { success, .. } => {
                self.async_in_flight.dec();
                if !success {
                    self.async_failures_total.inc();
                }
            }
            TxEvent::AwaitingPeer { .. } => {}
            TxEvent::Completed { .. } => self.transactions_total.with_label_values(&["completed"]).inc(),
            TxEvent::Failed { .. } => self.transactions_total.with_label_values(&["failed"]).inc(),
            TxEvent::Canceled { .. } => self.transactions_total.with_label_values(&["canceled"]).inc(),
        }
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
