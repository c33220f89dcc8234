//! # Communication Bus
//!
//! The only channel through which agents exchange messages. The bus binds
//! agent ids to handlers, delivers addressed messages, and correlates
//! requests with responses under explicit deadlines.
//!
//! Delivery guarantees:
//! - at-most-one delivery attempt per call; retries belong to callers (see
//!   [`crate::retry`]), never to the bus;
//! - [`CommunicationManager::send_and_wait`] resolves exactly once, with one
//!   of {response, timeout, unavailable}; a handler result arriving after the
//!   deadline has fired is discarded, not applied;
//! - handler errors are not swallowed; they propagate to the waiting caller
//!   with their original error code.
//!
//! Deadlines are explicit objects owned by the bus: the timer is dropped the
//! moment a response resolves, and the response channel is dropped the moment
//! the timer fires, so neither side can resolve a call twice.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::message::{AgentMessage, ConversationThread, ThreadStatus};
use crate::task::TaskResponse;

/// The receiving side of the bus: one handler per registered agent.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn handle(&self, message: AgentMessage) -> Result<TaskResponse>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> AgentHandler for FnHandler<F>
where
    F: Fn(AgentMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskResponse>> + Send,
{
    async fn handle(&self, message: AgentMessage) -> Result<TaskResponse> {
        (self.f)(message).await
    }
}

/// Wrap an async closure as an [`AgentHandler`]; convenient for tests and
/// thin adapter agents.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn AgentHandler>
where
    F: Fn(AgentMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskResponse>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Point-in-time bus health for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStatistics {
    pub registered_agents: usize,
    pub pending_requests: usize,
}

/// Decrements the pending counter on every exit path.
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Registry plus delivery: the message-passing core.
pub struct CommunicationManager {
    handlers: RwLock<HashMap<String, Arc<dyn AgentHandler>>>,
    threads: std::sync::Mutex<HashMap<String, ConversationThread>>,
    registered: AtomicUsize,
    pending: Arc<AtomicUsize>,
}

impl Default for CommunicationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CommunicationManager {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            threads: std::sync::Mutex::new(HashMap::new()),
            registered: AtomicUsize::new(0),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bind an agent id to a handler. Binding an id twice is fatal to
    /// startup and fails with `DUPLICATE_AGENT`.
    pub async fn register_agent(
        &self,
        agent_id: impl Into<String>,
        handler: Arc<dyn AgentHandler>,
    ) -> Result<()> {
        let agent_id = agent_id.into();
        let mut handlers = self.handlers.write().await;
        if handlers.contains_key(&agent_id) {
            return Err(OrchestratorError::DuplicateAgent { agent_id });
        }
        info!(agent_id = %agent_id, "agent registered");
        handlers.insert(agent_id, handler);
        self.registered.store(handlers.len(), Ordering::SeqCst);
        Ok(())
    }

    /// Unbind an agent id. Removing an unknown id is a no-op.
    pub async fn unregister_agent(&self, agent_id: &str) {
        let mut handlers = self.handlers.write().await;
        if handlers.remove(agent_id).is_some() {
            self.registered.store(handlers.len(), Ordering::SeqCst);
            info!(agent_id = %agent_id, "agent unregistered");
        }
    }

    pub async fn is_registered(&self, agent_id: &str) -> bool {
        self.handlers.read().await.contains_key(agent_id)
    }

    /// Fire-and-forget delivery. Resolves once the handler has accepted the
    /// message; the handler's eventual result (or error) is logged, not
    /// returned.
    pub async fn send_message(&self, message: AgentMessage) -> Result<()> {
        if message.is_expired(Utc::now()) {
            self.finish_thread(&message.context.thread_id, ThreadStatus::TimedOut);
            return Err(OrchestratorError::Timeout { timeout_ms: 0 });
        }
        let handler = self.handlers.read().await.get(&message.to).cloned();
        let Some(handler) = handler else {
            return Err(OrchestratorError::AgentUnavailable {
                agent_id: message.to,
            });
        };
        self.note_thread(&message);
        let to = message.to.clone();
        let id = message.id.clone();
        tokio::spawn(async move {
            if let Err(e) = handler.handle(message).await {
                warn!(agent_id = %to, message_id = %id, error = %e, "fire-and-forget handler failed");
            }
        });
        Ok(())
    }

    /// Deliver the message and suspend the caller until exactly one of:
    /// the handler resolves, the deadline elapses (`TIMEOUT_ERROR`), or the
    /// target is unregistered (`AGENT_UNAVAILABLE`).
    pub async fn send_and_wait(
        &self,
        message: AgentMessage,
        timeout: Duration,
    ) -> Result<TaskResponse> {
        if message.is_expired(Utc::now()) {
            self.finish_thread(&message.context.thread_id, ThreadStatus::TimedOut);
            return Err(OrchestratorError::Timeout { timeout_ms: 0 });
        }

        let handler = self.handlers.read().await.get(&message.to).cloned();
        let Some(handler) = handler else {
            self.finish_thread(&message.context.thread_id, ThreadStatus::Failed);
            return Err(OrchestratorError::AgentUnavailable {
                agent_id: message.to,
            });
        };

        self.note_thread(&message);
        let thread_id = message.context.thread_id.clone();
        let agent_id = message.to.clone();

        self.pending.fetch_add(1, Ordering::SeqCst);
        let _guard = PendingGuard(Arc::clone(&self.pending));

        // The handler runs detached and reports through a oneshot. If the
        // deadline fires first the receiver is dropped, so a late result has
        // nowhere to land and is discarded.
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = handler.handle(message).await;
            if tx.send(result).is_err() {
                debug!(agent_id = %agent_id, "late handler result discarded");
            }
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(response))) => {
                self.finish_thread(&thread_id, ThreadStatus::Completed);
                Ok(response)
            }
            Ok(Ok(Err(error))) => {
                self.finish_thread(&thread_id, ThreadStatus::Failed);
                Err(error)
            }
            Ok(Err(_dropped)) => {
                // Handler task died without reporting (e.g. panic)
                self.finish_thread(&thread_id, ThreadStatus::Failed);
                Err(OrchestratorError::agent(
                    crate::error::ErrorCode::NetworkError,
                    "agent handler dropped without responding",
                ))
            }
            Err(_elapsed) => {
                self.finish_thread(&thread_id, ThreadStatus::TimedOut);
                Err(OrchestratorError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    pub fn statistics(&self) -> BusStatistics {
        BusStatistics {
            registered_agents: self.registered.load(Ordering::SeqCst),
            pending_requests: self.pending.load(Ordering::SeqCst),
        }
    }

    /// The thread record for one exchange, if the bus has seen it.
    pub fn thread(&self, thread_id: &str) -> Option<ConversationThread> {
        self.threads.lock().unwrap().get(thread_id).cloned()
    }

    fn note_thread(&self, message: &AgentMessage) {
        let mut threads = self.threads.lock().unwrap();
        threads
            .entry(message.context.thread_id.clone())
            .or_insert_with(|| ConversationThread::new(message.context.thread_id.clone()))
            .record(message);
    }

    fn finish_thread(&self, thread_id: &str, status: ThreadStatus) {
        if let Some(thread) = self.threads.lock().unwrap().get_mut(thread_id) {
            thread.finish(status);
        }
    }
}
