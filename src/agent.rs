//! Agent declarations: the per-agent unit of a crew definition.
//!
//! An `AgentSpec` describes one unit of work — its implementation class,
//! model configuration, tools, and prompt. Execution itself is delegated to
//! an [`AgentExecutor`](crate::executor::AgentExecutor); the engine never
//! inspects the inside of an agent call.

use serde::{Deserialize, Serialize};

/// Closed set of agent implementation strategies.
///
/// The class is resolved once when the owning crew is validated; dispatch is
/// never repeated per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentClass {
    /// A plain LLM completion agent.
    Llm,
    /// An agent specialized for gathering and citing information.
    Research,
    /// An agent that condenses multiple upstream outputs into one.
    Synthesis,
    /// An agent that works primarily through tool invocations.
    Tool,
}

impl Default for AgentClass {
    fn default() -> Self {
        AgentClass::Llm
    }
}

/// Model configuration for a single agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Provider identifier (e.g. "openai", "anthropic").
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model identifier within the provider.
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature, when the provider supports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum completion tokens, when the provider supports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Per-dispatch deadline in milliseconds; overrides the job default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: None,
            max_tokens: None,
            timeout_ms: None,
        }
    }
}

/// One agent within a crew. Immutable once the owning crew is registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Unique identifier within the crew.
    pub agent_id: String,
    /// Human-readable name.
    pub name: String,
    /// Implementation strategy tag.
    #[serde(default)]
    pub agent_class: AgentClass,
    /// Model configuration.
    #[serde(default)]
    pub config: AgentConfig,
    /// Tool names this agent may call.
    #[serde(default)]
    pub tools: Vec<String>,
    /// System prompt prepended to every call, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl AgentSpec {
    /// Create an agent spec with default class and configuration.
    pub fn new(agent_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
            agent_class: AgentClass::default(),
            config: AgentConfig::default(),
            tools: Vec::new(),
            system_prompt: None,
        }
    }

    /// Builder: set the agent class.
    pub fn with_class(mut self, agent_class: AgentClass) -> Self {
        self.agent_class = agent_class;
        self
    }

    /// Builder: set the model configuration.
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Builder: set the tool list.
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }
}
