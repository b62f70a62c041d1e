//! Reliable-enough publisher: JSON-encodes the envelope and publishes it to
//! a durable direct exchange, routed by `type`. No broker confirms are
//! required by the spec; publish failures surface as `PUBLISH_FAILED` and
//! the caller (the plan service) decides whether that's fatal to the
//! request.

pub mod amqp;

use async_trait::async_trait;

use crate::error::Result;

use super::envelope::BaseMessage;

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: BaseMessage) -> Result<()>;
}

/// In-memory publisher for tests: records every envelope it receives in
/// order, so assertions can check routing keys and per-call iteration order.
#[derive(Default)]
pub struct RecordingPublisher {
    sent: tokio::sync::Mutex<Vec<BaseMessage>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn drain(&self) -> Vec<BaseMessage> {
        std::mem::take(&mut *self.sent.lock().await)
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, message: BaseMessage) -> Result<()> {
        self.sent.lock().await.push(message);
        Ok(())
    }
}
