//! Execution log entries and the crew-level result envelope.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::executor::ToolCall;

/// Terminal state of a single agent within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// The agent produced an output.
    Completed,
    /// The agent call failed or timed out.
    Failed,
    /// The agent was never dispatched because a required predecessor failed.
    Skipped,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Completed => write!(f, "completed"),
            AgentStatus::Failed => write!(f, "failed"),
            AgentStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// One agent's completion record, appended by the scheduler as results land.
/// Read-only once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// The agent this entry describes.
    pub agent_id: String,
    /// Dispatch time (after admission, before the executor call).
    pub start_time: DateTime<Utc>,
    /// Completion time.
    pub end_time: DateTime<Utc>,
    /// How the agent finished.
    pub status: AgentStatus,
    /// The agent's raw output; empty unless `status` is `completed`.
    #[serde(default)]
    pub output: String,
    /// Tool invocations surfaced by the executor.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Failure or skip reason, when not completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-agent runtime metadata included in the crew result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRuntime {
    /// The agent this entry describes.
    pub agent_id: String,
    /// Provider from the agent's configuration.
    pub provider: String,
    /// Model from the agent's configuration.
    pub model: String,
    /// How the agent finished.
    pub status: AgentStatus,
    /// Wall-clock execution time in milliseconds.
    pub execution_ms: i64,
    /// Number of tool calls the agent made.
    pub tool_calls: usize,
}

/// Crew-level terminal status carried inside the result envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    /// At least one agent produced output.
    Completed,
    /// Every agent errored or was skipped.
    Failed,
}

/// The merged result of one crew run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrewResult {
    /// Final output: the synthesis result when a synthesis prompt was given,
    /// otherwise the mode-specific fallback.
    pub output: String,
    /// Successful per-agent outputs in dispatch order.
    pub results: Vec<String>,
    /// Agent ids in dispatch order (all agents, regardless of outcome).
    pub agent_ids: Vec<String>,
    /// Per-agent runtime detail in dispatch order.
    pub agents: Vec<AgentRuntime>,
    /// Full execution log in completion order.
    pub execution_log: Vec<ExecutionLogEntry>,
    /// Failed agents and their error strings. Ordered so that terminal
    /// snapshots serialize identically on every poll.
    pub errors: BTreeMap<String, String>,
    /// Total wall-clock time for the run in milliseconds.
    pub total_time_ms: i64,
    /// Crew-level outcome.
    pub status: ResultStatus,
    /// Metadata copied from the crew definition.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl fmt::Display for CrewResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.output)
    }
}
