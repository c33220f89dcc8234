//! Graceful degradation
//!
//! Tracks the health of named system components and derives a single ordered
//! capability level from a fixed rule table. Callers consult the level and
//! per-feature gates at turn start so the system keeps answering callers in
//! reduced form instead of failing outright.
//!
//! The level is never set directly except through [`DegradationManager::override_level`];
//! it is recomputed on every failure or recovery report. Checks are
//! synchronous and never block on I/O.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Components whose health feeds the degradation rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Llm,
    Voice,
    Integration,
    Database,
    Cache,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::Llm,
        Component::Voice,
        Component::Integration,
        Component::Database,
        Component::Cache,
    ];
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Component::Llm => "llm",
            Component::Voice => "voice",
            Component::Integration => "integration",
            Component::Database => "database",
            Component::Cache => "cache",
        };
        f.write_str(name)
    }
}

/// System capability tier, ordered from fully operational to barely alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DegradationLevel {
    Full,
    Reduced,
    Minimal,
    Emergency,
}

#[derive(Debug, Clone)]
struct ComponentState {
    healthy: bool,
    reason: Option<String>,
    since: DateTime<Utc>,
}

struct Inner {
    components: HashMap<Component, ComponentState>,
    level: DegradationLevel,
    override_level: Option<DegradationLevel>,
}

/// Derives the global capability level from component health.
///
/// Constructed once at process start and injected into the master agent;
/// each instance is independent, so tests never leak state into each other.
pub struct DegradationManager {
    inner: Mutex<Inner>,
}

impl Default for DegradationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DegradationManager {
    pub fn new() -> Self {
        let components = Component::ALL
            .iter()
            .map(|c| {
                (
                    *c,
                    ComponentState {
                        healthy: true,
                        reason: None,
                        since: Utc::now(),
                    },
                )
            })
            .collect();
        Self {
            inner: Mutex::new(Inner {
                components,
                level: DegradationLevel::Full,
                override_level: None,
            }),
        }
    }

    /// Record a component failure and recompute the level.
    pub fn report_failure(&self, component: Component, reason: impl Into<String>) -> DegradationLevel {
        let mut inner = self.inner.lock().unwrap();
        let reason = reason.into();
        if let Some(state) = inner.components.get_mut(&component) {
            state.healthy = false;
            state.reason = Some(reason.clone());
            state.since = Utc::now();
        }
        let level = Self::recompute(&mut inner);
        warn!(component = %component, reason = %reason, level = ?level, "component failure reported");
        level
    }

    /// Record a component recovery and recompute the level.
    pub fn report_recovery(&self, component: Component) -> DegradationLevel {
        let mut inner = self.inner.lock().unwrap();
        if let Some(state) = inner.components.get_mut(&component) {
            state.healthy = true;
            state.reason = None;
            state.since = Utc::now();
        }
        let level = Self::recompute(&mut inner);
        info!(component = %component, level = ?level, "component recovery reported");
        level
    }

    /// Pin the level regardless of component health; `None` restores the
    /// derived level.
    pub fn override_level(&self, level: Option<DegradationLevel>) {
        let mut inner = self.inner.lock().unwrap();
        inner.override_level = level;
        Self::recompute(&mut inner);
    }

    pub fn current_level(&self) -> DegradationLevel {
        self.inner.lock().unwrap().level
    }

    pub fn is_healthy(&self, component: Component) -> bool {
        self.inner
            .lock()
            .unwrap()
            .components
            .get(&component)
            .map(|s| s.healthy)
            .unwrap_or(false)
    }

    /// Whether a named feature is usable at the current level.
    ///
    /// Feature gates, most capable first: everything at `Full`;
    /// `personalization` and `proactive_suggestions` drop out at `Reduced`;
    /// only `basic_routing` and `canned_responses` survive `Minimal`; at
    /// `Emergency` only `canned_responses` remains.
    pub fn is_feature_available(&self, feature: &str) -> bool {
        match self.current_level() {
            DegradationLevel::Full => true,
            DegradationLevel::Reduced => {
                !matches!(feature, "personalization" | "proactive_suggestions")
            }
            DegradationLevel::Minimal => matches!(feature, "basic_routing" | "canned_responses"),
            DegradationLevel::Emergency => feature == "canned_responses",
        }
    }

    /// The documented fallback for a degraded component.
    pub fn fallback_strategy(&self, component: Component) -> &'static str {
        match component {
            Component::Llm => "route by keyword patterns instead of model-based intent",
            Component::Voice => "respond over text channels only",
            Component::Integration => "serve cached data with a staleness caveat",
            Component::Database => "keep sessions in memory, skip persistence",
            Component::Cache => "read through to the source on every request",
        }
    }

    /// Snapshot of per-component health for diagnostics.
    pub fn component_report(&self) -> HashMap<Component, (bool, Option<String>)> {
        self.inner
            .lock()
            .unwrap()
            .components
            .iter()
            .map(|(c, s)| (*c, (s.healthy, s.reason.clone())))
            .collect()
    }

    /// The fixed rule table.
    ///
    /// | down | level |
    /// |---|---|
    /// | nothing | `Full` |
    /// | llm + voice + database | `Emergency` |
    /// | llm + voice | `Minimal` |
    /// | (llm or voice) + database | `Minimal` |
    /// | any single component | `Reduced` |
    fn recompute(inner: &mut Inner) -> DegradationLevel {
        let down = |c: Component| !inner.components.get(&c).map(|s| s.healthy).unwrap_or(true);
        let llm = down(Component::Llm);
        let voice = down(Component::Voice);
        let database = down(Component::Database);
        let any = Component::ALL.iter().any(|c| down(*c));

        let derived = if llm && voice && database {
            DegradationLevel::Emergency
        } else if llm && voice {
            DegradationLevel::Minimal
        } else if (llm || voice) && database {
            DegradationLevel::Minimal
        } else if any {
            DegradationLevel::Reduced
        } else {
            DegradationLevel::Full
        };

        inner.level = inner.override_level.unwrap_or(derived);
        inner.level
    }
}
