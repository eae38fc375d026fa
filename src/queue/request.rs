//! Queued request records and their UI-facing metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of AI request kinds the host app can defer.
///
/// Opaque to the queue itself; only the injected executor interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Suggest a reply to the partner's last message.
    ReplySuggestion,
    /// Analyze an image attached to the conversation.
    ImageAnalysis,
    /// Propose an opener for a new conversation.
    ConversationStarter,
}

impl RequestKind {
    /// Human-readable label used to build the UI preview string.
    pub fn label(&self) -> &'static str {
        match self {
            RequestKind::ReplySuggestion => "Reply suggestion",
            RequestKind::ImageAnalysis => "Image analysis",
            RequestKind::ConversationStarter => "Conversation starter",
        }
    }
}

/// A deferred AI request awaiting replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedRequest {
    /// Unique id, generated at enqueue time.
    pub id: String,
    /// Which kind of AI request this is.
    pub kind: RequestKind,
    /// Opaque request payload, passed to the executor verbatim.
    pub params: Value,
    /// Unix timestamp of enqueue.
    pub timestamp: i64,
    /// Attempts so far.
    pub retry_count: u32,
    /// Optional partner id; never inspected by queue logic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<String>,
    /// Optional partner display name; never inspected by queue logic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_name: Option<String>,
    /// Generated display string, e.g. "Reply suggestion for Ana".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl QueuedRequest {
    /// Build a fresh request with a generated id, current timestamp,
    /// zero retries, and a preview derived from the kind and partner name.
    pub fn new(
        kind: RequestKind,
        params: Value,
        partner_id: Option<String>,
        partner_name: Option<String>,
    ) -> Self {
        let preview = match partner_name.as_deref() {
            Some(name) => format!("{} for {}", kind.label(), name),
            None => kind.label().to_string(),
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            params,
            timestamp: chrono::Utc::now().timestamp(),
            retry_count: 0,
            partner_id,
            partner_name,
            preview: Some(preview),
        }
    }
}
