//! Pipeline coordinator: consumes inbound signals, drives validation and
//! routing, publishes outcome events and exposes metrics.

pub mod config;
pub mod coordinator;
pub mod metrics;
pub mod queue;
pub mod snapshot;

pub use config::PipelineConfig;
pub use coordinator::{CoordinatorConfig, PipelineCoordinator};
pub use metrics::PipelineMetrics;
pub use queue::{
    signal_channel, ChannelSink, ChannelSource, EventSink, InboundMessage, LogSink,
    PipelineEvent, SignalSender, SignalSource,
};
pub use snapshot::{SnapshotProvider, StaticSnapshotProvider};
