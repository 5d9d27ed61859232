// Prometheus metrics for the pipeline, scraped by the external monitoring
// stack.

use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

pub struct PipelineMetrics {
    registry: Registry,
    pub signals_consumed: IntCounter,
    pub signal_validations: IntCounterVec,
    pub order_submissions: IntCounterVec,
    pub dead_letters: IntCounter,
    pub processing_duration: Histogram,
    pub queue_depth: IntGauge,
}

impl PipelineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let signals_consumed = IntCounter::with_opts(Opts::new(
            "signal_generation_total",
            "Signals consumed from the inbound queue",
        ))?;
        let signal_validations = IntCounterVec::new(
            Opts::new(
                "signal_validation_total",
                "Validation outcomes by status (accepted or rejection reason)",
            ),
            &["status"],
        )?;
        let order_submissions = IntCounterVec::new(
            Opts::new(
                "order_router_submissions_total",
                "Order records by final routing state",
            ),
            &["state"],
        )?;
        let dead_letters = IntCounter::with_opts(Opts::new(
            "dead_letter_total",
            "Messages moved to the dead-letter path",
        ))?;
        let processing_duration = Histogram::with_opts(HistogramOpts::new(
            "pipeline_processing_duration_seconds",
            "End-to-end processing time per signal",
        ))?;
        let queue_depth = IntGauge::with_opts(Opts::new(
            "signal_queue_depth",
            "Messages waiting in the inbound queue",
        ))?;

        registry.register(Box::new(signals_consumed.clone()))?;
        registry.register(Box::new(signal_validations.clone()))?;
        registry.register(Box::new(order_submissions.clone()))?;
        registry.register(Box::new(dead_letters.clone()))?;
        registry.register(Box::new(processing_duration.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            registry,
            signals_consumed,
            signal_validations,
            order_submissions,
            dead_letters,
            processing_duration,
            queue_depth,
        })
    }

    /// Render the registry in the Prometheus text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }
}
