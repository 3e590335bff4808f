use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events sent over the WebSocket gateway.
///
/// Events are notifications only: they carry ids, and clients refetch the
/// affected rows over REST instead of trusting the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid },

    /// A message addressed to the subscriber was stored
    MessageCreated {
        conversation_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        created_at: DateTime<Utc>,
    },

    /// The other participant read messages the subscriber sent
    MessagesRead {
        conversation_id: Option<Uuid>,
        reader_id: Uuid,
        count: usize,
    },

    /// Reply to a client heartbeat
    HeartbeatAck,
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    Heartbeat,
}
