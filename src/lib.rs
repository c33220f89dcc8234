//! # Switchboard
//!
//! A runtime for fronting a fleet of specialist sub-agents with a single
//! master conversational agent. The hard part is not any one agent's
//! business logic but the orchestration core: a typed message-passing bus
//! with request/response correlation and deadlines, session state with
//! memory reuse, and a resilience layer that keeps the system answering
//! callers while downstream dependencies misbehave.
//!
//! ## Core Concepts
//!
//! - **Master agent**: the one agent a caller interacts with. It extracts an
//!   intent, consults admission control and system health, answers from
//!   session memory when it already knows the answer, and otherwise routes a
//!   structured request to a specialist.
//! - **Sub-agent contract**: every specialist implements [`SubAgent`] once
//!   and is wrapped by [`TaskPipeline`], which validates inputs, times the
//!   work, validates outputs, and never forwards a malformed success.
//! - **Communication bus**: [`CommunicationManager`] is the only channel
//!   agents use to reach each other: addressed delivery, at-most-one
//!   delivery attempt, and `send_and_wait` with an owned, cancelable
//!   deadline.
//! - **Resilience**: caller-driven retry with backoff ([`with_retry`]), a
//!   per-caller token-bucket [`RateLimiter`], component-health-driven
//!   [`DegradationManager`], incident-based [`ReliabilityTracker`], and a
//!   baseline-relative anomaly [`CommunicationMonitor`].
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use switchboard::{
//!     AgentRegistry, CommunicationManager, CommunicationMonitor, ConfigBuilder,
//!     DegradationManager, MasterAgentBuilder, RateLimiter, ReliabilityTracker,
//!     SessionManager, SubAgentConfig, TaskPipeline, Tracer,
//! };
//!
//! # async fn example(my_agent: Arc<dyn switchboard::SubAgent>) -> switchboard::Result<()> {
//! let config = ConfigBuilder::new()
//!     .greeting("Welcome to Acme Hotels.")
//!     .build();
//!
//! let bus = Arc::new(CommunicationManager::new());
//! let registry = Arc::new(AgentRegistry::new(Arc::clone(&bus)));
//! registry
//!     .register(
//!         SubAgentConfig::new("reservations", "hotel reservations")
//!             .with_tasks(vec!["confirm_reservation".into()]),
//!         Arc::new(TaskPipeline::new(my_agent)),
//!     )
//!     .await?;
//!
//! let master = MasterAgentBuilder::new(
//!     config.master.clone(),
//!     config.session.clone(),
//!     Arc::clone(&bus),
//!     Arc::clone(&registry),
//!     Arc::new(SessionManager::in_memory(config.session.clone())),
//!     Arc::new(RateLimiter::new(config.rate_limit.clone())),
//!     Arc::new(DegradationManager::new()),
//!     Arc::new(ReliabilityTracker::new()),
//!     Arc::new(CommunicationMonitor::new(config.monitor.clone())),
//!     Arc::new(Tracer::new()),
//! )
//! .route("reservation", "reservations")
//! .build();
//!
//! let reply = master
//!     .process_caller_input("confirm reservation ABC123", "session-1", None)
//!     .await?;
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod degradation;
pub mod error;
pub mod guardrail;
pub mod intent;
pub mod master;
pub mod message;
pub mod monitor;
pub mod ratelimit;
pub mod registry;
pub mod reliability;
pub mod retry;
pub mod schema;
pub mod session;
pub mod subagent;
pub mod task;
pub mod trace;

// Public re-exports for convenience
pub use bus::{handler_fn, AgentHandler, BusStatistics, CommunicationManager};
pub use config::{
    ConfigBuilder, MasterConfig, MonitorConfig, RateLimitConfig, RetryConfig, RuntimeConfig,
    SessionConfig,
};
pub use degradation::{Component, DegradationLevel, DegradationManager};
pub use error::{ErrorCode, OrchestratorError, Result};
pub use guardrail::{
    GuardrailResult, GuardrailRunner, InputGuardrail, MaxLengthGuardrail, OutputGuardrail,
    PatternBlockGuardrail,
};
pub use intent::{Intent, IntentRecognizer, IntentRule, PatternIntentRecognizer};
pub use master::{MasterAgent, MasterAgentBuilder};
pub use message::{
    AgentMessage, ConversationContext, ConversationThread, MessageKind, ThreadStatus,
};
pub use monitor::{Anomaly, AnomalyKind, CommunicationEvent, CommunicationMonitor, WindowMetrics};
pub use ratelimit::{RateDecision, RateLimiter};
pub use registry::{AgentRegistry, RegistryStatistics, SubAgentConfig};
pub use reliability::{Incident, ReliabilityMetrics, ReliabilityTracker, Severity, Trend};
pub use retry::{with_retry, with_retry_if, RecoveryAction, RecoveryPlanner, RetryPolicy};
pub use session::{
    HistoryEntry, InMemorySessionStore, MemoryEntry, Role, Session, SessionManager, SessionStore,
    StorageKind,
};
pub use subagent::{SubAgent, TaskPipeline, TaskSchema, TaskSchemas};
pub use task::{TaskError, TaskResponse, TaskResult};
pub use trace::{SpanContext, TraceSpan, Tracer};
