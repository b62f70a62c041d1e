//! AMQP-backed publisher over a durable direct exchange.

use async_trait::async_trait;
use lapin::options::BasicPublishOptions;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel};

use crate::error::{Error, Result};

use super::super::envelope::BaseMessage;
use super::Publisher;

pub struct AmqpPublisher {
    channel: Channel,
    exchange: String,
}

impl AmqpPublisher {
    pub fn new(channel: Channel, exchange: impl Into<String>) -> Self {
        Self {
            channel,
            exchange: exchange.into(),
        }
    }
}

#[async_trait]
impl Publisher for AmqpPublisher {
    async fn publish(&self, message: BaseMessage) -> Result<()> {
        let routing_key = message.message_type.clone();
        let payload = serde_json::to_vec(&message).map_err(|e| Error::PublishFailed {
            message: format!("encoding envelope: {e}"),
        })?;

        self.channel
            .basic_publish(
                &self.exchange,
                &routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| Error::PublishFailed {
                message: format!("publishing to {routing_key}: {e}"),
            })?
            .await
            .map_err(|e| Error::PublishFailed {
                message: format!("awaiting broker ack for {routing_key}: {e}"),
            })?;

        Ok(())
    }
}

/// Declares the durable direct exchange this service publishes plan-node
/// events to, and the routing-key bindings the index writer's queue needs.
pub async fn declare_topology(channel: &Channel, exchange: &str, queue: &str) -> Result<()> {
    use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
    use lapin::ExchangeKind;

    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| Error::RabbitmqError {
            message: format!("declaring exchange {exchange}: {e}"),
        })?;

    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| Error::RabbitmqError {
            message: format!("declaring queue {queue}: {e}"),
        })?;

    for routing_key in ["plan.node.create", "plan.node.update", "plan.node.delete"] {
        channel
            .queue_bind(queue, exchange, routing_key, QueueBindOptions::default(), FieldTable::default())
            .await
            .map_err(|e| Error::RabbitmqError {
                message: format!("binding {queue} to {routing_key}: {e}"),
            })?;
    }

    Ok(())
}
