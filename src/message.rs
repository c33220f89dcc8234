//! # Agent Message Model
//!
//! The typed envelope agents exchange over the communication bus, plus the
//! conversation lineage that lets a sub-agent's follow-up question be traced
//! back to the caller turn that started it.
//!
//! A message is immutable once sent: the sender creates it, the bus owns it
//! until delivery, and the recipient owns it afterwards. Causally linked
//! messages share a `thread_id`; a new thread is minted per top-level caller
//! turn.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Speech-act classification of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    /// One-way statement of fact, no response expected
    Inform,
    /// A question that expects an answer
    Query,
    /// A task request that expects a [`crate::task::TaskResult`]
    Request,
    /// Acknowledgement of a prior message
    Confirm,
    /// A request for missing information
    Clarify,
}

/// Lineage carried by every message so multi-hop exchanges stay causally
/// connected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Stable id for one causally linked exchange
    pub thread_id: String,
    /// The message this one replies to, if any
    pub parent_message_id: Option<String>,
    /// The caller session this exchange belongs to
    pub session_id: Option<String>,
    /// Free-form metadata (recent history digest, caller attributes, trace headers)
    pub metadata: HashMap<String, serde_json::Value>,
    /// Optional recent conversation turns, newest last
    pub history: Option<Vec<String>>,
}

impl ConversationContext {
    /// Start a fresh thread for a top-level caller turn.
    pub fn new_thread() -> Self {
        Self {
            thread_id: Uuid::new_v4().to_string(),
            ..Default::default()
        }
    }

    /// Derive a child context replying to `parent`: same thread, new parent link.
    pub fn reply_to(parent: &AgentMessage) -> Self {
        Self {
            thread_id: parent.context.thread_id.clone(),
            parent_message_id: Some(parent.id.clone()),
            session_id: parent.context.session_id.clone(),
            metadata: HashMap::new(),
            history: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_history(mut self, history: Vec<String>) -> Self {
        self.history = Some(history);
        self
    }
}

/// The typed envelope delivered over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Unique message id
    pub id: String,
    /// Sender agent id
    pub from: String,
    /// Recipient agent id
    pub to: String,
    /// Speech-act kind
    pub kind: MessageKind,
    /// Payload; for `Request` messages this is `{task, parameters}`
    pub content: serde_json::Value,
    /// Conversation lineage
    pub context: ConversationContext,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Whether the sender is blocked waiting on a response
    pub requires_response: bool,
    /// Correlates a response to the request it answers
    pub correlation_id: Option<String>,
    /// Optional delivery priority hint; the bus carries it but does not reorder
    pub priority: Option<u8>,
    /// Optional expiry; the bus refuses delivery past this instant
    pub expires_at: Option<DateTime<Utc>>,
}

impl AgentMessage {
    /// Create a message with a fresh id and the current timestamp.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: MessageKind,
        content: serde_json::Value,
        context: ConversationContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            kind,
            content,
            context,
            timestamp: Utc::now(),
            requires_response: matches!(kind, MessageKind::Request | MessageKind::Query),
            correlation_id: None,
            priority: None,
            expires_at: None,
        }
    }

    /// Build a task request message addressed to a sub-agent.
    pub fn request(
        from: impl Into<String>,
        to: impl Into<String>,
        task: &str,
        parameters: serde_json::Value,
        context: ConversationContext,
    ) -> Self {
        Self::new(
            from,
            to,
            MessageKind::Request,
            serde_json::json!({ "task": task, "parameters": parameters }),
            context,
        )
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the message's own expiry has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| now >= t).unwrap_or(false)
    }

    /// The task name, if this is a `{task, parameters}` request payload.
    pub fn task_name(&self) -> Option<&str> {
        self.content.get("task").and_then(|t| t.as_str())
    }

    /// The task parameters, defaulting to an empty object.
    pub fn task_parameters(&self) -> serde_json::Value {
        self.content
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}))
    }
}

/// Lifecycle of a conversation thread. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Completed,
    Failed,
    TimedOut,
}

impl ThreadStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ThreadStatus::Active)
    }
}

/// Aggregates the messages of one causally linked exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationThread {
    pub thread_id: String,
    pub status: ThreadStatus,
    pub participants: Vec<String>,
    pub message_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ConversationThread {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            status: ThreadStatus::Active,
            participants: Vec::new(),
            message_ids: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Record a message on the thread, tracking both endpoints as participants.
    pub fn record(&mut self, message: &AgentMessage) {
        for agent in [&message.from, &message.to] {
            if !self.participants.contains(agent) {
                self.participants.push(agent.clone());
            }
        }
        self.message_ids.push(message.id.clone());
    }

    /// Transition to a terminal status. Once terminal, further transitions
    /// are ignored.
    pub fn finish(&mut self, status: ThreadStatus) {
        if self.status.is_terminal() || !status.is_terminal() {
            return;
        }
        self.status = status;
        self.ended_at = Some(Utc::now());
    }
}
