//! Consumer and index writer (§4.6): a single queue bound to the three
//! `plan.node.*` routing keys, dispatched by message type to a handler
//! registry, with the plan-node handler re-deriving the search index's
//! parent/child join shape per node.

pub mod amqp;
pub mod elasticsearch;
pub mod index_writer;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::bus::envelope::BaseMessage;
use crate::error::Result;

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, body: serde_json::Value) -> Result<()>;
}

/// Maps a `BaseMessage::type` to the handler that processes its body.
/// Unknown types are logged and dropped, per §4.6 — a message isn't
/// nack'd or dead-lettered; there's simply nothing registered to do with it.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, message_type: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(message_type.into(), handler);
    }

    pub async fn dispatch(&self, message: BaseMessage) -> Result<()> {
        match self.handlers.get(&message.message_type) {
            Some(handler) => handler.handle(message.body).await,
            None => {
                warn!(message_type = %message.message_type, "dropping message with no registered handler");
                Ok(())
            }
        }
    }
}
