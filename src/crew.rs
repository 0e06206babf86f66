//! Crew definitions and the in-memory crew registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agent::AgentSpec;
use crate::errors::EngineError;
use crate::graph::WavePlan;
use crate::process::ExecutionMode;

/// A declared dependency edge between agents, meaningful in `flow` mode.
///
/// A side with multiple members fans out (sources) or in (targets) to every
/// member: `{a} -> {b, c}` declares both `a -> b` and `a -> c`. Each side
/// deserializes from either a bare string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRelation {
    /// Upstream agent ids.
    #[serde(alias = "source", deserialize_with = "one_or_many")]
    pub sources: Vec<String>,
    /// Downstream agent ids.
    #[serde(alias = "target", deserialize_with = "one_or_many")]
    pub targets: Vec<String>,
}

impl FlowRelation {
    /// Declare an edge from one agent to another.
    pub fn edge(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            sources: vec![source.into()],
            targets: vec![target.into()],
        }
    }

    /// Declare edges from every source to every target.
    pub fn fan(sources: Vec<String>, targets: Vec<String>) -> Self {
        Self { sources, targets }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// A validated collection of agents plus an execution strategy.
///
/// Immutable once registered; the registry hands out `Arc`s and running jobs
/// hold their own reference, so deleting a crew never affects a live run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrewDefinition {
    /// Unique identifier for the crew.
    #[serde(default = "Uuid::new_v4")]
    pub crew_id: Uuid,
    /// Optional human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// How the agents are ordered at execution time.
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    /// Declared agents, in order.
    pub agents: Vec<AgentSpec>,
    /// Dependency edges, used only in `flow` mode.
    #[serde(default)]
    pub flow_relations: Vec<FlowRelation>,
    /// Tools available to every agent in the crew.
    #[serde(default)]
    pub shared_tools: Vec<String>,
    /// Concurrency admission bound for one run of this crew; unlimited if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel_tasks: Option<usize>,
    /// Prompt for the optional final synthesis call over all agent outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis_prompt: Option<String>,
    /// Free-form crew metadata, carried into results.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Registration timestamp.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl CrewDefinition {
    /// Create a crew definition with the given mode and agents.
    pub fn new(execution_mode: ExecutionMode, agents: Vec<AgentSpec>) -> Self {
        Self {
            crew_id: Uuid::new_v4(),
            name: None,
            execution_mode,
            agents,
            flow_relations: Vec::new(),
            shared_tools: Vec::new(),
            max_parallel_tasks: None,
            synthesis_prompt: None,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Builder: set the flow relations.
    pub fn with_flow_relations(mut self, relations: Vec<FlowRelation>) -> Self {
        self.flow_relations = relations;
        self
    }

    /// Builder: bound the crew's fan-out.
    pub fn with_max_parallel_tasks(mut self, max: usize) -> Self {
        self.max_parallel_tasks = Some(max);
        self
    }

    /// Builder: set the synthesis prompt.
    pub fn with_synthesis_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.synthesis_prompt = Some(prompt.into());
        self
    }

    /// Look up an agent by id.
    pub fn agent(&self, agent_id: &str) -> Option<&AgentSpec> {
        self.agents.iter().find(|a| a.agent_id == agent_id)
    }

    /// Declared agent ids, in order.
    pub fn agent_ids(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.agent_id.as_str()).collect()
    }
}

impl fmt::Display for CrewDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CrewDefinition(id={}, mode={}, agents={})",
            self.crew_id,
            self.execution_mode,
            self.agents.len()
        )
    }
}

/// In-memory store of validated crew definitions.
///
/// Registration delegates to the graph builder, so a crew that would fail at
/// execution time is rejected before any job can reference it.
#[derive(Debug, Default)]
pub struct CrewRegistry {
    crews: DashMap<Uuid, Arc<CrewDefinition>>,
}

impl CrewRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a crew definition, returning its id.
    pub fn create(&self, definition: CrewDefinition) -> Result<Uuid, EngineError> {
        WavePlan::build(&definition)?;
        let crew_id = definition.crew_id;
        log::info!(
            "registered crew {} ({} agents, mode={})",
            crew_id,
            definition.agents.len(),
            definition.execution_mode
        );
        self.crews.insert(crew_id, Arc::new(definition));
        Ok(crew_id)
    }

    /// Fetch a crew definition by id.
    pub fn get(&self, crew_id: Uuid) -> Result<Arc<CrewDefinition>, EngineError> {
        self.crews
            .get(&crew_id)
            .map(|entry| entry.value().clone())
            .ok_or(EngineError::CrewNotFound(crew_id))
    }

    /// Remove a crew definition. Jobs already running against it keep their
    /// own reference and are unaffected.
    pub fn delete(&self, crew_id: Uuid) -> Result<(), EngineError> {
        self.crews
            .remove(&crew_id)
            .map(|_| ())
            .ok_or(EngineError::CrewNotFound(crew_id))
    }

    /// Number of registered crews.
    pub fn len(&self) -> usize {
        self.crews.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.crews.is_empty()
    }
}
