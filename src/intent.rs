//! Intent extraction
//!
//! Turns a caller utterance into a routable intent: a name, a task, and the
//! parameters the task needs. The default recognizer is a declarative
//! keyword-rule table (a deliberate lookup heuristic, not semantic
//! understanding) and the [`IntentRecognizer`] trait keeps model-backed
//! recognizers pluggable behind the same seam.
//!
//! Parameters the utterance itself doesn't carry can be backfilled from
//! recent session history: a caller who gave their reservation code two
//! turns ago shouldn't be asked for it again.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::session::HistoryEntry;

/// A routable interpretation of one caller utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    /// Stable intent name used for route resolution and memory keys
    pub name: String,
    /// Task to request from the routed sub-agent
    pub task: String,
    /// Parameters extracted from the utterance (and history backfill)
    pub parameters: Value,
    /// Recognizer confidence in [0, 1]
    pub confidence: f32,
}

/// Seam for intent extraction strategies.
#[async_trait]
pub trait IntentRecognizer: Send + Sync {
    /// Extract an intent, or `None` when the utterance matches nothing.
    async fn extract(&self, input: &str, history: &[HistoryEntry]) -> Option<Intent>;
}

/// What a rule captures out of the utterance into a named parameter.
#[derive(Debug, Clone)]
pub enum Capture {
    /// A booking-style code: uppercase letters and digits mixed, e.g. ABC123
    Code(String),
    /// A bare integer, e.g. an invoice number
    Number(String),
}

/// One row of the keyword-rule table.
#[derive(Debug, Clone)]
pub struct IntentRule {
    pub name: String,
    pub task: String,
    keywords: Vec<String>,
    captures: Vec<Capture>,
}

impl IntentRule {
    pub fn new(name: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task: task.into(),
            keywords: Vec::new(),
            captures: Vec::new(),
        }
    }

    /// Keywords whose presence votes for this rule; matching is
    /// case-insensitive on whole words.
    pub fn keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_lowercase()).collect();
        self
    }

    /// Capture a code-shaped token into the named parameter.
    pub fn capture_code(mut self, parameter: impl Into<String>) -> Self {
        self.captures.push(Capture::Code(parameter.into()));
        self
    }

    /// Capture a numeric token into the named parameter.
    pub fn capture_number(mut self, parameter: impl Into<String>) -> Self {
        self.captures.push(Capture::Number(parameter.into()));
        self
    }
}

/// Keyword-table recognizer: the rule with the largest fraction of matched
/// keywords wins, and that fraction is the confidence.
pub struct PatternIntentRecognizer {
    rules: Vec<IntentRule>,
}

impl PatternIntentRecognizer {
    pub fn new(rules: Vec<IntentRule>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl IntentRecognizer for PatternIntentRecognizer {
    async fn extract(&self, input: &str, history: &[HistoryEntry]) -> Option<Intent> {
        let words: Vec<String> = input
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();

        let mut best: Option<(&IntentRule, f32)> = None;
        for rule in &self.rules {
            if rule.keywords.is_empty() {
                continue;
            }
            let matched = rule
                .keywords
                .iter()
                .filter(|k| words.iter().any(|w| w == *k))
                .count();
            if matched == 0 {
                continue;
            }
            let confidence = matched as f32 / rule.keywords.len() as f32;
            if best.map(|(_, c)| confidence > c).unwrap_or(true) {
                best = Some((rule, confidence));
            }
        }

        let (rule, confidence) = best?;
        let mut parameters = Map::new();
        for capture in &rule.captures {
            match capture {
                Capture::Code(param) => {
                    let found = find_code(input)
                        .or_else(|| backfill(history, find_code));
                    if let Some(code) = found {
                        parameters.insert(param.clone(), Value::String(code));
                    }
                }
                Capture::Number(param) => {
                    let found = find_number(input)
                        .or_else(|| backfill(history, find_number));
                    if let Some(number) = found {
                        parameters.insert(param.clone(), Value::String(number));
                    }
                }
            }
        }

        Some(Intent {
            name: rule.name.clone(),
            task: rule.task.clone(),
            parameters: Value::Object(parameters),
            confidence,
        })
    }
}

/// Scan recent history, newest first, for a token the utterance lacked.
fn backfill(history: &[HistoryEntry], finder: fn(&str) -> Option<String>) -> Option<String> {
    history.iter().rev().find_map(|entry| finder(&entry.content))
}

/// First code-shaped token: at least 4 chars, uppercase letters and digits
/// only, containing both a letter and a digit.
pub fn find_code(text: &str) -> Option<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .find(|token| {
            token.len() >= 4
                && token
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
                && token.chars().any(|c| c.is_ascii_uppercase())
                && token.chars().any(|c| c.is_ascii_digit())
        })
        .map(str::to_string)
}

/// First all-digit token.
fn find_number(text: &str) -> Option<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .find(|token| !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
}

/// The rule table for the reference caller-facing deployment: reservations,
/// billing, support, appointments.
pub fn default_rules() -> Vec<IntentRule> {
    vec![
        IntentRule::new("reservation", "confirm_reservation")
            .keywords(&["reservation", "booking", "confirm", "room"])
            .capture_code("reservation_id"),
        IntentRule::new("billing", "lookup_invoice")
            .keywords(&["bill", "invoice", "charge", "payment", "refund"])
            .capture_number("invoice_number"),
        IntentRule::new("support", "open_ticket")
            .keywords(&["help", "problem", "broken", "issue", "complaint"]),
        IntentRule::new("appointment", "schedule_appointment")
            .keywords(&["appointment", "schedule", "reschedule", "available"]),
    ]
}
