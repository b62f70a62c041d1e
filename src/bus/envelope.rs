//! The two-level message envelope used on the bus: a typed `BaseMessage`
//! wrapper around an action-specific payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::Node;

/// Outer envelope. `type` doubles as the routing key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub body: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

/// Plan-node event payload, carried inside `BaseMessage::body`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNodeMessage {
    pub action: Action,
    pub index: String,
    pub key: String,
    pub data: Node,
}

impl PlanNodeMessage {
    pub fn new(action: Action, key: impl Into<String>, data: Node) -> Self {
        Self {
            action,
            index: "plans".to_owned(),
            key: key.into(),
            data,
        }
    }

    /// `type` is `"plan.node." + action`; routing key equals `type`.
    pub fn routing_key(&self) -> String {
        format!("plan.node.{}", self.action.as_str())
    }

    pub fn into_envelope(self) -> crate::error::Result<BaseMessage> {
        let message_type = self.routing_key();
        let body = serde_json::to_value(self).map_err(|e| crate::error::Error::PublishFailed {
            message: format!("encoding plan node message: {e}"),
        })?;
        Ok(BaseMessage { message_type, body })
    }
}
