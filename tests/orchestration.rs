//! End-to-end orchestration scenarios: a master agent, a registry of
//! specialists behind task pipelines, and the full resilience stack wired
//! together the way a deployment would.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use switchboard::{
    AgentRegistry, CommunicationManager, CommunicationMonitor, ConfigBuilder, ConversationContext,
    DegradationLevel, DegradationManager, ErrorCode, MasterAgent, MasterAgentBuilder, RateLimiter,
    ReliabilityTracker, Result, RuntimeConfig, SessionManager, Severity, SubAgent, SubAgentConfig,
    TaskPipeline, TaskResult, TaskSchemas, ThreadStatus, Tracer,
};

/// Scriptable reservation specialist: counts invocations and answers with a
/// fixed room, or misbehaves on demand.
struct ReservationAgent {
    calls: Arc<AtomicUsize>,
    behavior: Behavior,
}

#[derive(Clone, Copy)]
enum Behavior {
    Confirm,
    NeedsInfo,
    Fail(ErrorCode),
    Partial,
    Slow(u64),
}

#[async_trait]
impl SubAgent for ReservationAgent {
    fn tasks(&self) -> Vec<String> {
        vec!["confirm_reservation".to_string()]
    }

    fn schemas(&self) -> TaskSchemas {
        TaskSchemas::new().input(
            "confirm_reservation",
            json!({
                "type": "object",
                "required": ["reservation_id"],
                "properties": {"reservation_id": {"type": "string"}}
            }),
        )
    }

    async fn process_task(
        &self,
        _task: &str,
        parameters: Value,
        _context: &ConversationContext,
    ) -> Result<TaskResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let id = parameters["reservation_id"].as_str().unwrap_or_default();
        match self.behavior {
            Behavior::Confirm => Ok(TaskResult::success(
                json!({"reservation_id": id, "room": "204"}),
            )),
            Behavior::NeedsInfo => Ok(TaskResult::needs_info(
                vec!["check_in".to_string()],
                "Which check-in date is this for?",
            )),
            Behavior::Fail(code) => Ok(TaskResult::error(code, "downstream refused")),
            Behavior::Partial => Ok(TaskResult::partial(
                json!({"reservation_id": id}),
                json!({"stale": true}),
            )),
            Behavior::Slow(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(TaskResult::success(
                    json!({"reservation_id": id, "room": "204"}),
                ))
            }
        }
    }
}

struct World {
    master: MasterAgent,
    bus: Arc<CommunicationManager>,
    sessions: Arc<SessionManager>,
    degradation: Arc<DegradationManager>,
    reliability: Arc<ReliabilityTracker>,
    monitor: Arc<CommunicationMonitor>,
    tracer: Arc<Tracer>,
    calls: Arc<AtomicUsize>,
}

async fn world_with(behavior: Behavior, config: RuntimeConfig) -> World {
    let calls = Arc::new(AtomicUsize::new(0));
    let bus = Arc::new(CommunicationManager::new());
    let registry = Arc::new(AgentRegistry::new(Arc::clone(&bus)));
    registry
        .register(
            SubAgentConfig::new("reservations", "hotel reservations")
                .with_tasks(vec!["confirm_reservation".to_string()]),
            Arc::new(TaskPipeline::new(Arc::new(ReservationAgent {
                calls: Arc::clone(&calls),
                behavior,
            }))),
        )
        .await
        .unwrap();

    let sessions = Arc::new(SessionManager::in_memory(config.session.clone()));
    let degradation = Arc::new(DegradationManager::new());
    let reliability = Arc::new(ReliabilityTracker::new());
    let monitor = Arc::new(CommunicationMonitor::new(config.monitor.clone()));
    let tracer = Arc::new(Tracer::new());

    let master = MasterAgentBuilder::new(
        config.master.clone(),
        config.session.clone(),
        Arc::clone(&bus),
        Arc::clone(&registry),
        Arc::clone(&sessions),
        Arc::new(RateLimiter::new(config.rate_limit.clone())),
        Arc::clone(&degradation),
        Arc::clone(&reliability),
        Arc::clone(&monitor),
        Arc::clone(&tracer),
    )
    .route("reservation", "reservations")
    .build();

    World {
        master,
        bus,
        sessions,
        degradation,
        reliability,
        monitor,
        tracer,
        calls,
    }
}

async fn world(behavior: Behavior) -> World {
    world_with(behavior, RuntimeConfig::default()).await
}

#[tokio::test]
async fn reservation_flow_then_memory_short_circuit() {
    let w = world(Behavior::Confirm).await;

    let reply = w
        .master
        .process_caller_input("confirm reservation ABC123", "sess-1", None)
        .await
        .unwrap();
    assert!(reply.contains("ABC123"), "reply was: {reply}");
    assert_eq!(w.calls.load(Ordering::SeqCst), 1);

    // Cached under the domain key with a retrieval timestamp
    let cached = w
        .sessions
        .get_from_memory("sess-1", "reservation")
        .await
        .expect("memory entry stored");
    assert_eq!(cached.value["room"], "204");

    // Second turn answers from memory: no second sub-agent call
    let reply = w
        .master
        .process_caller_input("what room did my booking get?", "sess-1", None)
        .await
        .unwrap();
    assert!(reply.contains("204"), "reply was: {reply}");
    assert_eq!(w.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn memory_is_never_written_on_non_success() {
    for behavior in [
        Behavior::NeedsInfo,
        Behavior::Fail(ErrorCode::BusinessRuleViolation),
        Behavior::Partial,
    ] {
        let w = world(behavior).await;
        let _ = w
            .master
            .process_caller_input("confirm reservation ABC123", "sess-1", None)
            .await
            .unwrap();
        assert!(
            !w.sessions.has_in_memory("sess-1", "reservation").await,
            "memory must stay empty for non-success outcomes"
        );
    }
}

#[tokio::test]
async fn needs_info_surfaces_the_clarification() {
    let w = world(Behavior::NeedsInfo).await;
    let reply = w
        .master
        .process_caller_input("confirm reservation ABC123", "sess-1", None)
        .await
        .unwrap();
    assert!(reply.contains("Which check-in date"), "reply was: {reply}");
}

#[tokio::test]
async fn partial_results_carry_a_caveat() {
    let w = world(Behavior::Partial).await;
    let reply = w
        .master
        .process_caller_input("confirm reservation ABC123", "sess-1", None)
        .await
        .unwrap();
    assert!(reply.contains("part of that"), "reply was: {reply}");
    assert!(reply.contains("ABC123"));
}

#[tokio::test]
async fn slow_specialist_times_out_politely_and_late_result_is_discarded() {
    let config = ConfigBuilder::new()
        .request_timeout(Duration::from_millis(100))
        .build();
    let w = world_with(Behavior::Slow(500), config).await;

    let reply = w
        .master
        .process_caller_input("confirm reservation ABC123", "sess-1", None)
        .await
        .unwrap();
    assert!(reply.contains("try again"), "reply was: {reply}");
    assert!(!reply.contains("TIMEOUT"), "leaked internals: {reply}");

    // The handler eventually finishes but its result lands nowhere
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(w.calls.load(Ordering::SeqCst), 1);
    assert!(!w.sessions.has_in_memory("sess-1", "reservation").await);

    // The exchange's thread ended in timeout, visible via the monitor's
    // recorded dispatch event
    let failures = w.monitor.events(Some("reservations"), None, true);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].error_code, Some(ErrorCode::TimeoutError));
    let thread_id = failures[0].thread_id.clone().unwrap();
    assert_eq!(
        w.bus.thread(&thread_id).unwrap().status,
        ThreadStatus::TimedOut
    );
}

#[tokio::test]
async fn environment_failures_feed_degradation_and_reliability() {
    let w = world(Behavior::Fail(ErrorCode::ExternalApiFailure)).await;

    let reply = w
        .master
        .process_caller_input("confirm reservation ABC123", "sess-1", None)
        .await
        .unwrap();
    assert!(!reply.contains("EXTERNAL_API_FAILURE"), "leaked: {reply}");

    assert_eq!(w.degradation.current_level(), DegradationLevel::Reduced);
    assert_eq!(w.reliability.unresolved_incidents().len(), 1);
}

#[tokio::test]
async fn incident_record_and_resolve_accounting() {
    let w = world(Behavior::Confirm).await;
    let id = w
        .reliability
        .record_incident(ErrorCode::NetworkError, Severity::Critical);
    assert!(w.reliability.resolve_incident(&id, None));
    assert!(w.reliability.unresolved_incidents().is_empty());

    let metrics = w.reliability.calculate_metrics(None);
    assert_eq!(metrics.total_incidents, 1);
    assert_eq!(metrics.resolved_incidents, 1);
}

#[tokio::test]
async fn a_turn_produces_a_connected_trace() {
    let w = world(Behavior::Confirm).await;
    let _ = w
        .master
        .process_caller_input("confirm reservation ABC123", "sess-1", None)
        .await
        .unwrap();

    let spans = w.tracer.spans();
    let turn = spans
        .iter()
        .find(|s| s.operation == "caller_turn")
        .expect("turn span");
    let dispatch = spans
        .iter()
        .find(|s| s.operation == "dispatch")
        .expect("dispatch span");

    assert_eq!(dispatch.trace_id, turn.trace_id);
    assert_eq!(dispatch.parent_span_id.as_deref(), Some(turn.span_id.as_str()));
    assert!(turn.end_time.is_some());
    assert!(dispatch.end_time.is_some());
    assert_eq!(dispatch.tags["agent_id"], "reservations");
}

#[tokio::test]
async fn monitor_logs_every_turn_and_exports_ordered_json() {
    let w = world(Behavior::Confirm).await;
    for i in 0..3 {
        let _ = w
            .master
            .process_caller_input(&format!("confirm reservation ABC12{i}"), "sess-1", None)
            .await
            .unwrap();
    }

    // 3 caller turns; the first dispatches, later ones may answer from
    // memory depending on entity match — every turn still logs one event.
    let turns = w.monitor.events(Some("master"), None, false);
    assert!(turns.len() >= 3);

    let dump = w.monitor.export();
    let events = dump.as_array().unwrap();
    for pair in events.windows(2) {
        assert!(pair[0]["timestamp"].as_str() <= pair[1]["timestamp"].as_str());
    }
}

#[tokio::test]
async fn different_entity_bypasses_memory_and_requeries() {
    let w = world(Behavior::Confirm).await;
    let _ = w
        .master
        .process_caller_input("confirm reservation ABC123", "sess-1", None)
        .await
        .unwrap();
    assert_eq!(w.calls.load(Ordering::SeqCst), 1);

    // A different reservation code must not be answered from the cache
    let reply = w
        .master
        .process_caller_input("confirm reservation XYZ789", "sess-1", None)
        .await
        .unwrap();
    assert!(reply.contains("XYZ789"), "reply was: {reply}");
    assert_eq!(w.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn sessions_are_isolated_from_each_other() {
    let w = world(Behavior::Confirm).await;
    let _ = w
        .master
        .process_caller_input("confirm reservation ABC123", "sess-1", None)
        .await
        .unwrap();

    // A different session has no memory of the first caller's reservation;
    // with no code in its own history the input schema stops the task and
    // asks for the field before any business logic runs.
    let reply = w
        .master
        .process_caller_input("confirm my booking", "sess-2", None)
        .await
        .unwrap();
    assert!(
        !reply.contains("ABC123"),
        "cross-session leak, reply was: {reply}"
    );
    assert!(reply.contains("reservation_id"), "reply was: {reply}");
    assert_eq!(w.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_turns_across_sessions_proceed_independently() {
    let w = Arc::new(world(Behavior::Slow(50)).await);
    let mut handles = Vec::new();
    for i in 0..8 {
        let w = Arc::clone(&w);
        handles.push(tokio::spawn(async move {
            w.master
                .process_caller_input(
                    &format!("confirm reservation COD{i}{i}"),
                    &format!("sess-{i}"),
                    None,
                )
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        let reply = handle.await.unwrap();
        assert!(reply.contains("confirmed"), "reply was: {reply}");
    }
    assert_eq!(w.calls.load(Ordering::SeqCst), 8);
}
