// Queue boundaries
// The inbound contract is at-least-once: a message may be redelivered, and
// the pipeline stays correct because the cache offer and the ledger
// create-if-absent are idempotent. The in-process channel implementation
// backs tests and paper trading; a broker-backed source implements the
// same trait.

use std::sync::Arc;

use async_trait::async_trait;
use common::{Decision, OrderRecord, Signal};
use prometheus::IntGauge;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

/// One delivery from the inbound queue
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub signal: Signal,
    /// How many times this message has been delivered, starting at 1
    pub delivery_attempts: u32,
}

/// Inbound signal queue with acknowledgment/redelivery semantics
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Next message; None once the queue is closed and drained
    async fn recv(&self) -> Option<InboundMessage>;

    /// Mark a message as processed; it will not be redelivered
    async fn ack(&self, message: &InboundMessage);

    /// Return a message to the queue with its delivery counter bumped
    async fn nack(&self, message: InboundMessage);
}

/// Outcome events published downstream
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    DecisionMade { decision: Decision },
    OrderResolved { record: OrderRecord },
    DeadLettered { signal: Signal, attempts: u32, reason: String },
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: PipelineEvent) -> anyhow::Result<()>;
}

/// Producer handle for the in-process queue
#[derive(Clone)]
pub struct SignalSender {
    sender: mpsc::Sender<InboundMessage>,
    depth: Option<IntGauge>,
}

impl SignalSender {
    pub fn with_depth_gauge(mut self, gauge: IntGauge) -> Self {
        self.depth = Some(gauge);
        self
    }

    pub async fn send(&self, signal: Signal) -> anyhow::Result<()> {
        self.sender
            .send(InboundMessage {
                signal,
                delivery_attempts: 1,
            })
            .await
            .map_err(|e| anyhow::anyhow!("inbound queue closed: {}", e))?;
        if let Some(depth) = &self.depth {
            depth.inc();
        }
        Ok(())
    }
}

/// Bounded in-process queue. The receiver is shared behind a mutex so
/// several coordinator workers can consume from the same queue. The requeue
/// handle is weak, so dropping every producer closes the queue and `recv`
/// returns None once it drains.
pub struct ChannelSource {
    receiver: Arc<Mutex<mpsc::Receiver<InboundMessage>>>,
    requeue: mpsc::WeakSender<InboundMessage>,
    depth: Option<IntGauge>,
}

impl Clone for ChannelSource {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
            requeue: self.requeue.clone(),
            depth: self.depth.clone(),
        }
    }
}

impl ChannelSource {
    pub fn with_depth_gauge(mut self, gauge: IntGauge) -> Self {
        self.depth = Some(gauge);
        self
    }
}

/// Create a bounded in-process signal queue
pub fn signal_channel(buffer: usize) -> (SignalSender, ChannelSource) {
    let (sender, receiver) = mpsc::channel(buffer);
    let source = ChannelSource {
        receiver: Arc::new(Mutex::new(receiver)),
        requeue: sender.downgrade(),
        depth: None,
    };
    (
        SignalSender {
            sender,
            depth: None,
        },
        source,
    )
}

#[async_trait]
impl SignalSource for ChannelSource {
    async fn recv(&self) -> Option<InboundMessage> {
        let message = self.receiver.lock().await.recv().await;
        if message.is_some() {
            if let Some(depth) = &self.depth {
                depth.dec();
            }
        }
        message
    }

    async fn ack(&self, _message: &InboundMessage) {
        // Channels drop the message on recv; nothing to confirm.
    }

    async fn nack(&self, mut message: InboundMessage) {
        message.delivery_attempts += 1;

        // Redelivery needs a live producer; during shutdown the message is
        // dropped with the queue.
        let Some(requeue) = self.requeue.upgrade() else {
            warn!(
                "Queue closed, dropping nacked message for signal {}",
                message.signal.id
            );
            return;
        };
        if let Some(depth) = &self.depth {
            depth.inc();
        }
        if let Err(e) = requeue.send(message).await {
            warn!("Failed to requeue message: {}", e);
        }
    }
}

/// Sink that publishes events onto an in-process channel
pub struct ChannelSink {
    sender: mpsc::Sender<PipelineEvent>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<PipelineEvent>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn publish(&self, event: PipelineEvent) -> anyhow::Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|e| anyhow::anyhow!("event channel closed: {}", e))
    }
}

/// Sink that logs events as JSON, used when no downstream consumer is wired
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn publish(&self, event: PipelineEvent) -> anyhow::Result<()> {
        info!("Pipeline event: {}", serde_json::to_string(&event)?);
        Ok(())
    }
}
