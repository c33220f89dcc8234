//! # Agent Registry
//!
//! Dynamic registration and discovery of specialist sub-agents, layered on
//! the communication bus. The registry owns the static [`SubAgentConfig`]
//! descriptors; the bus owns the live handler bindings. Removing an agent
//! unbinds it from both.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bus::{AgentHandler, CommunicationManager};
use crate::error::{OrchestratorError, Result};

/// Static descriptor for one specialist agent. Immutable after registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentConfig {
    pub agent_id: String,
    /// Human-readable domain, e.g. "hotel reservations"
    pub specialty: String,
    /// Instructions for a model-backed agent; carried verbatim
    pub system_prompt: String,
    /// Task names this agent implements
    pub tasks: Vec<String>,
    /// Tool names this agent can invoke
    pub tools: Vec<String>,
    /// Whether this agent may call back into other agents
    pub bidirectional_enabled: bool,
    /// Depth cap for nested agent-to-agent calls
    pub max_conversation_depth: Option<usize>,
    /// Per-agent override of the request deadline, in milliseconds
    pub communication_timeout_ms: Option<u64>,
    /// Free-form business-rule configuration for the agent's own logic
    pub business_rules: Option<serde_json::Value>,
}

impl SubAgentConfig {
    pub fn new(agent_id: impl Into<String>, specialty: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            specialty: specialty.into(),
            system_prompt: String::new(),
            tasks: Vec::new(),
            tools: Vec::new(),
            bidirectional_enabled: false,
            max_conversation_depth: None,
            communication_timeout_ms: None,
            business_rules: None,
        }
    }

    pub fn with_tasks(mut self, tasks: Vec<String>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

/// Per-specialty counts for health checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryStatistics {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub by_specialty: HashMap<String, usize>,
}

/// Registry of specialist agents and their capability descriptors.
pub struct AgentRegistry {
    bus: Arc<CommunicationManager>,
    configs: tokio::sync::RwLock<HashMap<String, SubAgentConfig>>,
}

impl AgentRegistry {
    pub fn new(bus: Arc<CommunicationManager>) -> Self {
        Self {
            bus,
            configs: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    /// Register a specialist: stores the descriptor and binds the handler on
    /// the bus. Fails with `DUPLICATE_AGENT` if the id already exists.
    pub async fn register(
        &self,
        config: SubAgentConfig,
        handler: Arc<dyn AgentHandler>,
    ) -> Result<()> {
        let mut configs = self.configs.write().await;
        if configs.contains_key(&config.agent_id) {
            return Err(OrchestratorError::DuplicateAgent {
                agent_id: config.agent_id,
            });
        }
        self.bus.register_agent(&config.agent_id, handler).await?;
        info!(agent_id = %config.agent_id, specialty = %config.specialty, "sub-agent registered");
        configs.insert(config.agent_id.clone(), config);
        Ok(())
    }

    /// Remove a specialist from the registry and the bus. Unknown ids are a
    /// no-op.
    pub async fn remove(&self, agent_id: &str) {
        self.configs.write().await.remove(agent_id);
        self.bus.unregister_agent(agent_id).await;
    }

    pub async fn config(&self, agent_id: &str) -> Option<SubAgentConfig> {
        self.configs.read().await.get(agent_id).cloned()
    }

    /// Agents able to serve `task`, by declared tasks/tools or by
    /// case-insensitive substring match against the specialty.
    ///
    /// This is a simple lookup heuristic, not semantic search: an agent whose
    /// specialty merely mentions the word will match.
    pub async fn discover_agents_for_task(&self, task: &str) -> Vec<String> {
        let needle = task.to_lowercase();
        let configs = self.configs.read().await;
        let mut matches: Vec<String> = configs
            .values()
            .filter(|c| {
                c.tasks.iter().any(|t| t == task)
                    || c.tools.iter().any(|t| t == task)
                    || c.specialty.to_lowercase().contains(&needle)
            })
            .map(|c| c.agent_id.clone())
            .collect();
        matches.sort();
        matches
    }

    pub async fn statistics(&self) -> RegistryStatistics {
        let configs = self.configs.read().await;
        let mut stats = RegistryStatistics {
            total: configs.len(),
            ..Default::default()
        };
        for config in configs.values() {
            *stats
                .by_specialty
                .entry(config.specialty.clone())
                .or_default() += 1;
            if self.bus.is_registered(&config.agent_id).await {
                stats.active += 1;
            } else {
                stats.inactive += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::handler_fn;
    use crate::message::AgentMessage;
    use crate::task::{TaskResponse, TaskResult};

    fn noop_handler() -> Arc<dyn AgentHandler> {
        handler_fn(|msg: AgentMessage| async move {
            Ok(TaskResponse::new(
                msg.id,
                TaskResult::success(serde_json::json!({})),
                1,
            ))
        })
    }

    fn registry() -> AgentRegistry {
        AgentRegistry::new(Arc::new(CommunicationManager::new()))
    }

    #[tokio::test]
    async fn register_binds_bus_and_descriptor() {
        let bus = Arc::new(CommunicationManager::new());
        let registry = AgentRegistry::new(Arc::clone(&bus));
        let config = SubAgentConfig::new("reservations", "hotel reservations")
            .with_tasks(vec!["confirm_reservation".to_string()]);
        registry.register(config, noop_handler()).await.unwrap();

        assert!(bus.is_registered("reservations").await);
        assert!(registry.config("reservations").await.is_some());
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let registry = registry();
        registry
            .register(SubAgentConfig::new("billing", "billing"), noop_handler())
            .await
            .unwrap();
        let err = registry
            .register(SubAgentConfig::new("billing", "billing"), noop_handler())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateAgent { .. }));
    }

    #[tokio::test]
    async fn discovery_matches_tasks_tools_and_specialty() {
        let registry = registry();
        registry
            .register(
                SubAgentConfig::new("reservations", "hotel reservations")
                    .with_tasks(vec!["confirm_reservation".to_string()]),
                noop_handler(),
            )
            .await
            .unwrap();
        registry
            .register(
                SubAgentConfig::new("billing", "invoices and payments")
                    .with_tools(vec!["charge_card".to_string()]),
                noop_handler(),
            )
            .await
            .unwrap();

        assert_eq!(
            registry.discover_agents_for_task("confirm_reservation").await,
            vec!["reservations".to_string()]
        );
        assert_eq!(
            registry.discover_agents_for_task("charge_card").await,
            vec!["billing".to_string()]
        );
        // Substring match against specialty
        assert_eq!(
            registry.discover_agents_for_task("payments").await,
            vec!["billing".to_string()]
        );
        assert!(registry.discover_agents_for_task("weather").await.is_empty());
    }

    #[tokio::test]
    async fn remove_unbinds_both_sides() {
        let bus = Arc::new(CommunicationManager::new());
        let registry = AgentRegistry::new(Arc::clone(&bus));
        registry
            .register(SubAgentConfig::new("support", "support"), noop_handler())
            .await
            .unwrap();
        registry.remove("support").await;
        registry.remove("support").await; // idempotent
        assert!(!bus.is_registered("support").await);
        assert!(registry.config("support").await.is_none());
    }

    #[tokio::test]
    async fn statistics_count_by_specialty() {
        let bus = Arc::new(CommunicationManager::new());
        let registry = AgentRegistry::new(Arc::clone(&bus));
        registry
            .register(SubAgentConfig::new("billing-1", "billing"), noop_handler())
            .await
            .unwrap();
        registry
            .register(SubAgentConfig::new("billing-2", "billing"), noop_handler())
            .await
            .unwrap();
        registry
            .register(SubAgentConfig::new("support", "support"), noop_handler())
            .await
            .unwrap();

        // One handler drops off the bus but keeps its descriptor
        bus.unregister_agent("billing-2").await;

        let stats = registry.statistics().await;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.inactive, 1);
        assert_eq!(stats.by_specialty["billing"], 2);
        assert_eq!(stats.by_specialty["support"], 1);
    }
}
