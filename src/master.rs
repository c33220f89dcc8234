//! # Master Agent
//!
//! The single agent a caller talks to. Each caller turn runs a fixed
//! pipeline, short-circuiting on the first definitive outcome:
//!
//! 1. admission and degradation checks (synchronous, no I/O);
//! 2. load or create the session, holding its lock for the whole turn so
//!    concurrent turns for the same caller serialize;
//! 3. intent extraction, with parameter backfill from recent history;
//! 4. session-memory short-circuit: a prior successful result for the same
//!    intent and entity answers directly, with no sub-agent call;
//! 5. guardrails: banned input gets the configured fallback before routing;
//! 6. route resolution via the intent→agent table; unmapped intents get a
//!    clarification, and on a session's first turn the greeting and the
//!    clarification combine into one reply;
//! 7. dispatch over the bus under a trace span, with the configured deadline;
//! 8. translation of the task result into a caller-safe utterance; internal
//!    error codes never reach the caller;
//! 9. on success only, the payload is cached in session memory; then both
//!    sides of the exchange land in history.
//!
//! The master is the only layer allowed to turn internal error codes into
//! user-facing language.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bus::CommunicationManager;
use crate::config::{MasterConfig, SessionConfig};
use crate::degradation::{Component, DegradationLevel, DegradationManager};
use crate::error::{ErrorCode, OrchestratorError, Result};
use crate::guardrail::{GuardrailRunner, InputGuardrail, OutputGuardrail, PatternBlockGuardrail};
use crate::intent::{Intent, IntentRecognizer, PatternIntentRecognizer};
use crate::message::{AgentMessage, ConversationContext, MessageKind};
use crate::monitor::{CommunicationEvent, CommunicationMonitor};
use crate::ratelimit::RateLimiter;
use crate::registry::AgentRegistry;
use crate::reliability::{ReliabilityTracker, Severity};
use crate::session::{HistoryEntry, MemoryEntry, SessionManager};
use crate::task::{TaskResult, TaskResponse};
use crate::trace::Tracer;

/// The caller-facing orchestrator.
pub struct MasterAgent {
    config: MasterConfig,
    session_config: SessionConfig,
    bus: Arc<CommunicationManager>,
    registry: Arc<AgentRegistry>,
    sessions: Arc<SessionManager>,
    recognizer: Arc<dyn IntentRecognizer>,
    rate_limiter: Arc<RateLimiter>,
    degradation: Arc<DegradationManager>,
    reliability: Arc<ReliabilityTracker>,
    monitor: Arc<CommunicationMonitor>,
    tracer: Arc<Tracer>,
    routes: HashMap<String, String>,
    input_guards: Vec<Arc<dyn InputGuardrail>>,
    output_guards: Vec<Arc<dyn OutputGuardrail>>,
}

/// Builder wiring the master agent's collaborators; everything is injected,
/// nothing is global.
pub struct MasterAgentBuilder {
    config: MasterConfig,
    session_config: SessionConfig,
    bus: Arc<CommunicationManager>,
    registry: Arc<AgentRegistry>,
    sessions: Arc<SessionManager>,
    recognizer: Option<Arc<dyn IntentRecognizer>>,
    rate_limiter: Arc<RateLimiter>,
    degradation: Arc<DegradationManager>,
    reliability: Arc<ReliabilityTracker>,
    monitor: Arc<CommunicationMonitor>,
    tracer: Arc<Tracer>,
    routes: HashMap<String, String>,
    input_guards: Vec<Arc<dyn InputGuardrail>>,
    output_guards: Vec<Arc<dyn OutputGuardrail>>,
}

impl MasterAgentBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MasterConfig,
        session_config: SessionConfig,
        bus: Arc<CommunicationManager>,
        registry: Arc<AgentRegistry>,
        sessions: Arc<SessionManager>,
        rate_limiter: Arc<RateLimiter>,
        degradation: Arc<DegradationManager>,
        reliability: Arc<ReliabilityTracker>,
        monitor: Arc<CommunicationMonitor>,
        tracer: Arc<Tracer>,
    ) -> Self {
        Self {
            config,
            session_config,
            bus,
            registry,
            sessions,
            recognizer: None,
            rate_limiter,
            degradation,
            reliability,
            monitor,
            tracer,
            routes: HashMap::new(),
            input_guards: Vec::new(),
            output_guards: Vec::new(),
        }
    }

    /// Map an intent name to the sub-agent that serves it.
    pub fn route(mut self, intent: impl Into<String>, agent_id: impl Into<String>) -> Self {
        self.routes.insert(intent.into(), agent_id.into());
        self
    }

    pub fn recognizer(mut self, recognizer: Arc<dyn IntentRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn input_guardrail(mut self, guard: Arc<dyn InputGuardrail>) -> Self {
        self.input_guards.push(guard);
        self
    }

    pub fn output_guardrail(mut self, guard: Arc<dyn OutputGuardrail>) -> Self {
        self.output_guards.push(guard);
        self
    }

    pub fn build(self) -> MasterAgent {
        let mut input_guards = self.input_guards;
        if !self.config.banned_phrases.is_empty() {
            input_guards.push(Arc::new(PatternBlockGuardrail::new(
                "configured-banned-phrases",
                self.config.banned_phrases.clone(),
            )));
        }
        let recognizer = self.recognizer.unwrap_or_else(|| {
            Arc::new(PatternIntentRecognizer::new(crate::intent::default_rules()))
        });
        MasterAgent {
            config: self.config,
            session_config: self.session_config,
            bus: self.bus,
            registry: self.registry,
            sessions: self.sessions,
            recognizer,
            rate_limiter: self.rate_limiter,
            degradation: self.degradation,
            reliability: self.reliability,
            monitor: self.monitor,
            tracer: self.tracer,
            routes: self.routes,
            input_guards,
            output_guards: self.output_guards,
        }
    }
}

impl MasterAgent {
    /// Process one caller turn and produce the reply to speak back.
    ///
    /// This is the voice/telephony boundary: everything upstream of this
    /// function (audio, transcription) is external.
    pub async fn process_caller_input(
        &self,
        text: &str,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<String> {
        let started = Instant::now();
        let turn_span = self.tracer.start_span(
            "caller_turn",
            None,
            HashMap::from([("session_id".to_string(), session_id.to_string())]),
        );

        let reply = self
            .run_turn(text, session_id, user_id, &turn_span)
            .await;

        let (reply, success, error_code) = match reply {
            Ok(reply) => (reply, true, None),
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "turn failed internally");
                (self.safe_message(err.code()), false, Some(err.code()))
            }
        };

        // The reply itself must pass output guardrails; a blocked reply
        // degrades to the configured fallback.
        let reply = match GuardrailRunner::check_output(&self.output_guards, &reply).await {
            Ok(()) => reply,
            Err(_) => self.config.fallback_message.clone(),
        };

        let mut event = CommunicationEvent {
            id: uuid::Uuid::new_v4().to_string(),
            from: "caller".to_string(),
            to: "master".to_string(),
            kind: MessageKind::Query,
            timestamp: chrono::Utc::now(),
            duration_ms: Some(started.elapsed().as_millis() as u64),
            success,
            error: None,
            error_code,
            thread_id: None,
        };
        if let Some(code) = error_code {
            event.error = Some(code.as_str().to_string());
        }
        self.monitor.record(event);

        self.tracer.end_span(
            &turn_span.span_id,
            HashMap::from([(
                "outcome".to_string(),
                if success { "ok" } else { "error" }.to_string(),
            )]),
        );

        Ok(reply)
    }

    async fn run_turn(
        &self,
        text: &str,
        session_id: &str,
        user_id: Option<&str>,
        turn_span: &crate::trace::SpanContext,
    ) -> Result<String> {
        // Admission and capability checks run before any session I/O.
        let limit_key = user_id.unwrap_or(session_id);
        let decision = self.rate_limiter.check(limit_key);
        if !decision.allowed {
            let wait_secs = decision
                .retry_after
                .map(|d| d.as_secs().max(1))
                .unwrap_or(1);
            return Ok(format!(
                "You're sending requests a little quickly. Please wait about {wait_secs} seconds and try again."
            ));
        }

        let level = self.degradation.current_level();
        if level == DegradationLevel::Emergency {
            return Ok(
                "We're experiencing technical difficulties right now. Please call back shortly."
                    .to_string(),
            );
        }

        // The session lock is held for the whole turn: same-session turns
        // serialize, other sessions are untouched.
        let mut session = self.sessions.lock_session(session_id).await;
        let first_turn = session.history.is_empty();
        if session.caller_id.is_none() {
            session.caller_id = user_id.map(str::to_string);
        }

        let intent = self
            .recognizer
            .extract(text, session.recent_history(self.config.context_window))
            .await;

        let reply = match intent {
            None => self.clarification_reply(first_turn),
            Some(intent) => {
                debug!(intent = %intent.name, task = %intent.task, confidence = intent.confidence, "intent extracted");

                // Memory short-circuit: never re-query a sub-agent for data
                // already known this session.
                let cached = session
                    .session_memory
                    .get(&intent.name)
                    .filter(|entry| memory_satisfies(&intent, entry))
                    .map(|entry| entry.value.clone());
                if let Some(value) = cached {
                    info!(intent = %intent.name, "answered from session memory");
                    let reply = self.format_success(&intent.name, &value);
                    session.push_history(
                        HistoryEntry::caller(text),
                        self.session_config.history_cap,
                    );
                    session.push_history(
                        HistoryEntry::agent(&reply),
                        self.session_config.history_cap,
                    );
                    drop(session);
                    self.persist(session_id).await;
                    return Ok(reply);
                }

                if let Err(err) = GuardrailRunner::check_input(&self.input_guards, text).await {
                    debug!(reason = %err, "input guardrail refused the turn");
                    self.config.fallback_message.clone()
                } else {
                    match self.routes.get(&intent.name) {
                        None => self.clarification_reply(first_turn),
                        Some(agent_id) => {
                            let agent_id = agent_id.clone();
                            let outcome = self
                                .dispatch(&intent, &agent_id, session_id, &session, turn_span)
                                .await;
                            self.translate(&intent, outcome, &mut session)
                        }
                    }
                }
            }
        };

        session.push_history(HistoryEntry::caller(text), self.session_config.history_cap);
        session.push_history(HistoryEntry::agent(&reply), self.session_config.history_cap);
        drop(session);
        self.persist(session_id).await;

        Ok(reply)
    }

    /// Build and send the structured request, under its own span.
    async fn dispatch(
        &self,
        intent: &Intent,
        agent_id: &str,
        session_id: &str,
        session: &crate::session::Session,
        turn_span: &crate::trace::SpanContext,
    ) -> Result<TaskResponse> {
        // Cheap structural check before the wire; the sub-agent pipeline
        // applies the full task schema.
        if !intent.parameters.is_object() {
            return Err(OrchestratorError::agent(
                ErrorCode::InvalidInput,
                "task parameters must be an object",
            ));
        }

        let span = self.tracer.start_span(
            "dispatch",
            Some(turn_span),
            HashMap::from([
                ("agent_id".to_string(), agent_id.to_string()),
                ("task".to_string(), intent.task.clone()),
            ]),
        );

        let recent: Vec<String> = session
            .recent_history(self.config.context_window)
            .iter()
            .map(|h| h.content.clone())
            .collect();
        let mut context = ConversationContext::new_thread()
            .with_session(session_id)
            .with_history(recent);
        for (key, value) in Tracer::inject(&span) {
            context = context.with_metadata(key, Value::String(value));
        }
        for (key, value) in &session.metadata {
            context = context.with_metadata(key.clone(), value.clone());
        }

        let message = AgentMessage::request(
            "master",
            agent_id,
            &intent.task,
            intent.parameters.clone(),
            context,
        );
        let thread_id = message.context.thread_id.clone();

        let timeout = self
            .registry
            .config(agent_id)
            .await
            .and_then(|c| c.communication_timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(self.config.request_timeout);

        let dispatch_started = Instant::now();
        let outcome = self.bus.send_and_wait(message, timeout).await;

        let mut event = match &outcome {
            Ok(_) => CommunicationEvent::success(
                "master",
                agent_id,
                MessageKind::Request,
                dispatch_started.elapsed().as_millis() as u64,
            ),
            Err(err) => CommunicationEvent::failure(
                "master",
                agent_id,
                MessageKind::Request,
                err.code(),
                err.to_string(),
            ),
        };
        event = event.with_thread(thread_id);
        self.monitor.record(event);

        self.tracer.end_span(
            &span.span_id,
            HashMap::from([(
                "outcome".to_string(),
                match &outcome {
                    Ok(_) => "ok".to_string(),
                    Err(e) => e.code().as_str().to_string(),
                },
            )]),
        );

        outcome
    }

    /// Map a task outcome to a caller-facing utterance and apply the
    /// success-only memory write.
    fn translate(
        &self,
        intent: &Intent,
        outcome: Result<TaskResponse>,
        session: &mut crate::session::Session,
    ) -> String {
        match outcome {
            Ok(response) => match response.result {
                TaskResult::Success { data } => {
                    let reply = self.format_success(&intent.name, &data);
                    // Memory is written only here: never for needs_info,
                    // error, or partial outcomes.
                    session.session_memory.insert(
                        intent.name.clone(),
                        MemoryEntry {
                            value: data,
                            stored_at: chrono::Utc::now(),
                        },
                    );
                    reply
                }
                TaskResult::NeedsInfo {
                    required,
                    clarification,
                } => {
                    if clarification.is_empty() {
                        format!("Could you provide: {}?", required.join(", "))
                    } else {
                        clarification
                    }
                }
                TaskResult::Error { error } => {
                    if error.code.environmental() {
                        self.note_environment_failure(error.code);
                    }
                    self.safe_message(error.code)
                }
                TaskResult::Partial { data, .. } => {
                    format!(
                        "I could only retrieve part of that right now. {}",
                        self.format_success(&intent.name, &data)
                    )
                }
            },
            Err(err) => {
                let code = err.code();
                if code.environmental() {
                    self.note_environment_failure(code);
                }
                self.safe_message(code)
            }
        }
    }

    fn note_environment_failure(&self, code: ErrorCode) {
        let component = match code {
            ErrorCode::DatabaseError => Component::Database,
            _ => Component::Integration,
        };
        self.degradation
            .report_failure(component, code.as_str().to_string());
        self.reliability.record_incident(code, Severity::High);
    }

    /// Caller-safe wording per error code. Internal codes, agent ids, and
    /// stack traces never appear here.
    fn safe_message(&self, code: ErrorCode) -> String {
        match code {
            ErrorCode::TimeoutError | ErrorCode::AgentUnavailable | ErrorCode::NetworkError => {
                "I'm having trouble reaching that service right now. Please try again in a moment."
                    .to_string()
            }
            ErrorCode::RateLimited => {
                "You're sending requests a little quickly. Please wait a moment and try again."
                    .to_string()
            }
            ErrorCode::PermissionDenied => {
                "I'm not able to do that for this account.".to_string()
            }
            ErrorCode::BusinessRuleViolation => {
                "I wasn't able to complete that request as asked.".to_string()
            }
            ErrorCode::InvalidInput | ErrorCode::UnknownTask => {
                "I didn't quite catch that. Could you rephrase your request?".to_string()
            }
            _ => "Something went wrong on our side. Please try again shortly.".to_string(),
        }
    }

    fn clarification_reply(&self, first_turn: bool) -> String {
        let clarification = "What can I help you with today? I can look after reservations, billing, support, and appointments.";
        if first_turn {
            format!("{} {}", self.config.greeting, clarification)
        } else {
            clarification.to_string()
        }
    }

    /// Domain-keyed reply formatting for successful payloads.
    fn format_success(&self, domain: &str, data: &Value) -> String {
        match domain {
            "reservation" => {
                let id = data
                    .get("reservation_id")
                    .and_then(Value::as_str)
                    .unwrap_or("your reservation");
                let mut reply = format!("Your reservation {id} is confirmed.");
                if let Some(room) = data.get("room").and_then(Value::as_str) {
                    reply.push_str(&format!(" You're in room {room}."));
                }
                if let Some(date) = data.get("check_in").and_then(Value::as_str) {
                    reply.push_str(&format!(" Check-in is {date}."));
                }
                reply
            }
            "billing" => {
                let mut reply = String::from("Here are your billing details.");
                if let Some(amount) = data.get("amount_due") {
                    reply = format!("Your current balance is {amount}.");
                }
                if let Some(due) = data.get("due_date").and_then(Value::as_str) {
                    reply.push_str(&format!(" Payment is due {due}."));
                }
                reply
            }
            "support" => {
                if let Some(ticket) = data.get("ticket_id").and_then(Value::as_str) {
                    format!("I've opened ticket {ticket} for you. Our team will follow up.")
                } else {
                    "I've logged your issue and our team will follow up.".to_string()
                }
            }
            "appointment" => {
                if let Some(when) = data.get("scheduled_for").and_then(Value::as_str) {
                    format!("Your appointment is set for {when}.")
                } else {
                    "Your appointment has been scheduled.".to_string()
                }
            }
            _ => match data.as_object() {
                Some(fields) if !fields.is_empty() => {
                    let rendered = fields
                        .iter()
                        .map(|(k, v)| format!("{}: {}", k.replace('_', " "), render(v)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("Here's what I found: {rendered}.")
                }
                _ => "Done.".to_string(),
            },
        }
    }

    async fn persist(&self, session_id: &str) {
        if let Err(err) = self.sessions.persist(session_id).await {
            warn!(session_id = %session_id, error = %err, "session persistence failed");
        }
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A cached result satisfies an intent when every entity parameter the
/// intent carries matches the cached payload. An intent with no entity
/// parameters is satisfied by any cached result for its domain.
fn memory_satisfies(intent: &Intent, entry: &MemoryEntry) -> bool {
    let Some(params) = intent.parameters.as_object() else {
        return true;
    };
    params.iter().all(|(key, wanted)| {
        match entry.value.get(key) {
            // The cached payload carries the same entity field: it must match
            Some(cached) => cached == wanted,
            // Entity not present in the payload: cannot contradict
            None => true,
        }
    })
}
