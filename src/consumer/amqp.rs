//! The long-lived consumer task: drains the queue bound to the three
//! `plan.node.*` routing keys and dispatches each delivery to the handler
//! registry. Messages are auto-acknowledged on delivery (at-most-once);
//! re-sync relies on subsequent successful writes, per §4.6.

use std::sync::Arc;

use futures_util::StreamExt;
use lapin::options::{BasicConsumeOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::Channel;
use tracing::{error, warn};

use crate::bus::envelope::BaseMessage;
use crate::error::{Error, Result};

use super::HandlerRegistry;

pub struct AmqpConsumer {
    channel: Channel,
    queue: String,
    prefetch: u16,
}

impl AmqpConsumer {
    pub fn new(channel: Channel, queue: impl Into<String>, prefetch: u16) -> Self {
        Self {
            channel,
            queue: queue.into(),
            prefetch,
        }
    }

    /// Runs until the channel closes or the process is asked to shut down.
    /// Deliveries up to `prefetch` may be in flight concurrently; the spec
    /// recommends 1 to preserve per-key ordering.
    pub async fn run(self, registry: Arc<HandlerRegistry>) -> Result<()> {
        self.channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| Error::RabbitmqError {
                message: format!("setting prefetch: {e}"),
            })?;

        let mut consumer = self
            .channel
            .basic_consume(
                &self.queue,
                "plan-index-writer",
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::RabbitmqError {
                message: format!("consuming from {}: {e}", self.queue),
            })?;

        while let Some(delivery) = consumer.next().await {
            let delivery = match delivery {
                Ok(d) => d,
                Err(e) => {
                    error!(error = %e, "consumer delivery error");
                    continue;
                }
            };

            match serde_json::from_slice::<BaseMessage>(&delivery.data) {
                Ok(message) => {
                    if let Err(e) = registry.dispatch(message).await {
                        error!(error = %e, "handler failed for delivery");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "dropping undecodable message");
                }
            }
        }

        Ok(())
    }
}
