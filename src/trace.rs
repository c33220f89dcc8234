//! # Tracing Across Agent Hops
//!
//! Structured spans for observing a caller turn's full fan-out. A **trace**
//! covers one end-to-end turn; a **span** is a single timed operation inside
//! it (routing, a sub-agent dispatch, a store lookup). Spans nest through
//! `parent_span_id`, forming a tree rooted at the turn's first span.
//!
//! Trace identity crosses process boundaries through header-style string
//! maps: [`Tracer::inject`] writes `x-trace-id` / `x-span-id` /
//! `x-parent-span-id` / `x-baggage`, and [`Tracer::extract`] reads them back
//! into a [`SpanContext`], so a deployment split over several processes can
//! still reconstruct a single turn.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Header key carrying the trace id across process boundaries.
pub const TRACE_ID_HEADER: &str = "x-trace-id";
/// Header key carrying the current span id.
pub const SPAN_ID_HEADER: &str = "x-span-id";
/// Header key carrying the parent span id.
pub const PARENT_SPAN_ID_HEADER: &str = "x-parent-span-id";
/// Header key carrying opaque baggage entries (`k1=v1,k2=v2`).
pub const BAGGAGE_HEADER: &str = "x-baggage";

/// Generates a new, unique trace id.
pub fn gen_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a new, unique span id.
pub fn gen_span_id() -> String {
    Uuid::new_v4().to_string()
}

/// A timestamped log line attached to a span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanLog {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// A single timed operation within a trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSpan {
    pub span_id: String,
    pub trace_id: String,
    pub parent_span_id: Option<String>,
    pub operation: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub tags: HashMap<String, String>,
    pub logs: Vec<SpanLog>,
}

impl TraceSpan {
    fn new(
        trace_id: String,
        parent_span_id: Option<String>,
        operation: String,
        tags: HashMap<String, String>,
    ) -> Self {
        Self {
            span_id: gen_span_id(),
            trace_id,
            parent_span_id,
            operation,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            tags,
            logs: Vec::new(),
        }
    }

    fn complete(&mut self) {
        let end = Utc::now();
        self.duration_ms = Some((end - self.start_time).num_milliseconds());
        self.end_time = Some(end);
    }
}

/// The portable identity of an active span, handed to whatever work runs
/// under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub baggage: HashMap<String, String>,
}

/// Collects spans for every trace passing through this process.
///
/// Explicitly constructed and dependency-injected; concurrent turns share one
/// tracer through cheap interior locking.
#[derive(Default)]
pub struct Tracer {
    spans: Mutex<Vec<TraceSpan>>,
}

impl Tracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a span. Without a parent context this roots a new trace.
    pub fn start_span(
        &self,
        operation: impl Into<String>,
        parent: Option<&SpanContext>,
        tags: HashMap<String, String>,
    ) -> SpanContext {
        let operation = operation.into();
        let (trace_id, parent_span_id, baggage) = match parent {
            Some(ctx) => (
                ctx.trace_id.clone(),
                Some(ctx.span_id.clone()),
                ctx.baggage.clone(),
            ),
            None => (gen_trace_id(), None, HashMap::new()),
        };
        let span = TraceSpan::new(
            trace_id.clone(),
            parent_span_id.clone(),
            operation.clone(),
            tags,
        );
        let span_id = span.span_id.clone();
        debug!(trace_id = %trace_id, span_id = %span_id, operation = %operation, "span started");
        self.spans.lock().unwrap().push(span);
        SpanContext {
            trace_id,
            span_id,
            parent_span_id,
            baggage,
        }
    }

    /// End a span, merging any final tags. Ending an unknown or already
    /// finished span is a no-op.
    pub fn end_span(&self, span_id: &str, tags: HashMap<String, String>) {
        let mut spans = self.spans.lock().unwrap();
        if let Some(span) = spans
            .iter_mut()
            .find(|s| s.span_id == span_id && s.end_time.is_none())
        {
            span.tags.extend(tags);
            span.complete();
            debug!(span_id = %span_id, duration_ms = span.duration_ms, "span completed");
        }
    }

    /// Attach a log line to an active span.
    pub fn span_log(&self, span_id: &str, message: impl Into<String>) {
        let mut spans = self.spans.lock().unwrap();
        if let Some(span) = spans.iter_mut().find(|s| s.span_id == span_id) {
            span.logs.push(SpanLog {
                timestamp: Utc::now(),
                message: message.into(),
            });
        }
    }

    /// Snapshot of every span recorded so far.
    pub fn spans(&self) -> Vec<TraceSpan> {
        self.spans.lock().unwrap().clone()
    }

    /// All spans of one trace, in start order.
    pub fn trace(&self, trace_id: &str) -> Vec<TraceSpan> {
        self.spans
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.trace_id == trace_id)
            .cloned()
            .collect()
    }

    /// Serialize a span context into header-style key/value pairs.
    pub fn inject(ctx: &SpanContext) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(TRACE_ID_HEADER.to_string(), ctx.trace_id.clone());
        headers.insert(SPAN_ID_HEADER.to_string(), ctx.span_id.clone());
        if let Some(parent) = &ctx.parent_span_id {
            headers.insert(PARENT_SPAN_ID_HEADER.to_string(), parent.clone());
        }
        if !ctx.baggage.is_empty() {
            let baggage = ctx
                .baggage
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(",");
            headers.insert(BAGGAGE_HEADER.to_string(), baggage);
        }
        headers
    }

    /// Rebuild a span context from injected headers, if a trace id is present.
    pub fn extract(headers: &HashMap<String, String>) -> Option<SpanContext> {
        let trace_id = headers.get(TRACE_ID_HEADER)?.clone();
        let span_id = headers.get(SPAN_ID_HEADER).cloned().unwrap_or_default();
        let parent_span_id = headers.get(PARENT_SPAN_ID_HEADER).cloned();
        let baggage = headers
            .get(BAGGAGE_HEADER)
            .map(|raw| {
                raw.split(',')
                    .filter_map(|pair| {
                        pair.split_once('=')
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(SpanContext {
            trace_id,
            span_id,
            parent_span_id,
            baggage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_nest_under_parents() {
        let tracer = Tracer::new();
        let root = tracer.start_span("turn", None, HashMap::new());
        let child = tracer.start_span("dispatch", Some(&root), HashMap::new());
        assert_eq!(child.trace_id, root.trace_id);

        tracer.end_span(&child.span_id, HashMap::new());
        tracer.end_span(&root.span_id, HashMap::new());

        let spans = tracer.trace(&root.trace_id);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].parent_span_id, None);
        assert_eq!(spans[1].parent_span_id, Some(root.span_id.clone()));
        assert!(spans.iter().all(|s| s.end_time.is_some()));
    }

    #[test]
    fn end_span_is_idempotent() {
        let tracer = Tracer::new();
        let ctx = tracer.start_span("op", None, HashMap::new());
        tracer.end_span(&ctx.span_id, HashMap::new());
        let first_end = tracer.spans()[0].end_time;
        tracer.end_span(&ctx.span_id, HashMap::new());
        assert_eq!(tracer.spans()[0].end_time, first_end);
    }

    #[test]
    fn inject_extract_round_trip() {
        let mut baggage = HashMap::new();
        baggage.insert("caller".to_string(), "c-17".to_string());
        let ctx = SpanContext {
            trace_id: gen_trace_id(),
            span_id: gen_span_id(),
            parent_span_id: Some(gen_span_id()),
            baggage,
        };
        let headers = Tracer::inject(&ctx);
        assert!(headers.contains_key(TRACE_ID_HEADER));
        assert!(headers.contains_key(PARENT_SPAN_ID_HEADER));
        let back = Tracer::extract(&headers).unwrap();
        assert_eq!(back, ctx);
    }

    #[test]
    fn extract_without_trace_header_is_none() {
        assert!(Tracer::extract(&HashMap::new()).is_none());
    }

    #[test]
    fn span_logs_are_recorded() {
        let tracer = Tracer::new();
        let ctx = tracer.start_span("op", None, HashMap::new());
        tracer.span_log(&ctx.span_id, "looked up route");
        let spans = tracer.spans();
        assert_eq!(spans[0].logs.len(), 1);
        assert_eq!(spans[0].logs[0].message, "looked up route");
    }

    #[test]
    fn tags_merge_on_end() {
        let tracer = Tracer::new();
        let mut start_tags = HashMap::new();
        start_tags.insert("agent".to_string(), "billing".to_string());
        let ctx = tracer.start_span("dispatch", None, start_tags);
        let mut end_tags = HashMap::new();
        end_tags.insert("outcome".to_string(), "success".to_string());
        tracer.end_span(&ctx.span_id, end_tags);
        let span = &tracer.spans()[0];
        assert_eq!(span.tags["agent"], "billing");
        assert_eq!(span.tags["outcome"], "success");
    }
}
