//! # Guardrails (orientation)
//!
//! Input and output guardrails provide lightweight, pluggable validation for
//! the master agent's conversational surface. They are defined as traits and
//! executed by the `GuardrailRunner` in priority order: input guardrails
//! refuse banned caller input before any routing happens, and output
//! guardrails keep internals (error codes, stack traces) out of replies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{OrchestratorError, Result};

/// Represents the outcome of a guardrail check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailResult {
    pub passed: bool,
    pub reason: Option<String>,
}

impl GuardrailResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Trait for input guardrails that validate caller input before routing.
#[async_trait]
pub trait InputGuardrail: Send + Sync {
    fn name(&self) -> &str;
    fn priority(&self) -> i32 {
        0
    }
    async fn check(&self, input: &str) -> Result<GuardrailResult>;
}

/// Trait for output guardrails that validate replies before they reach the
/// caller.
#[async_trait]
pub trait OutputGuardrail: Send + Sync {
    fn name(&self) -> &str;
    fn priority(&self) -> i32 {
        0
    }
    async fn check(&self, output: &str) -> Result<GuardrailResult>;
}

/// Executes guardrails in descending priority order.
pub struct GuardrailRunner;

impl GuardrailRunner {
    pub async fn check_input(guards: &[Arc<dyn InputGuardrail>], input: &str) -> Result<()> {
        let mut guards = guards.to_vec();
        guards.sort_by_key(|g| -g.priority());
        for g in guards {
            let res = g.check(input).await?;
            if !res.passed {
                return Err(OrchestratorError::GuardrailTriggered {
                    message: res.reason.unwrap_or_else(|| g.name().to_string()),
                });
            }
        }
        Ok(())
    }

    pub async fn check_output(guards: &[Arc<dyn OutputGuardrail>], output: &str) -> Result<()> {
        let mut guards = guards.to_vec();
        guards.sort_by_key(|g| -g.priority());
        for g in guards {
            let res = g.check(output).await?;
            if !res.passed {
                return Err(OrchestratorError::GuardrailTriggered {
                    message: res.reason.unwrap_or_else(|| g.name().to_string()),
                });
            }
        }
        Ok(())
    }
}

/// An [`InputGuardrail`] that checks if the input length exceeds a maximum.
#[derive(Debug, Clone)]
pub struct MaxLengthGuardrail {
    name: String,
    max_length: usize,
}

impl MaxLengthGuardrail {
    pub fn new(max_length: usize) -> Self {
        Self {
            name: format!("MaxLength_{}", max_length),
            max_length,
        }
    }
}

#[async_trait]
impl InputGuardrail for MaxLengthGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, input: &str) -> Result<GuardrailResult> {
        if input.len() > self.max_length {
            Ok(GuardrailResult::block(format!(
                "Input exceeds maximum length of {} characters",
                self.max_length
            )))
        } else {
            Ok(GuardrailResult::pass())
        }
    }
}

/// Blocks content containing any of a list of phrases, case-insensitively.
/// Usable on both the input and output side.
#[derive(Debug, Clone)]
pub struct PatternBlockGuardrail {
    name: String,
    patterns: Vec<String>,
}

impl PatternBlockGuardrail {
    pub fn new(name: impl Into<String>, patterns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            patterns,
        }
    }
}

#[async_trait]
impl InputGuardrail for PatternBlockGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, input: &str) -> Result<GuardrailResult> {
        let input_lower = input.to_lowercase();
        for pattern in &self.patterns {
            if input_lower.contains(&pattern.to_lowercase()) {
                return Ok(GuardrailResult::block(format!(
                    "Input contains blocked pattern: {}",
                    pattern
                )));
            }
        }
        Ok(GuardrailResult::pass())
    }
}

#[async_trait]
impl OutputGuardrail for PatternBlockGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, output: &str) -> Result<GuardrailResult> {
        let output_lower = output.to_lowercase();
        for pattern in &self.patterns {
            if output_lower.contains(&pattern.to_lowercase()) {
                return Ok(GuardrailResult::block(format!(
                    "Output contains blocked pattern: {}",
                    pattern
                )));
            }
        }
        Ok(GuardrailResult::pass())
    }
}
