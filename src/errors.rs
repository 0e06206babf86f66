//! Error types for the crew execution engine.
//!
//! Validation errors surface synchronously when a crew is registered, never
//! at execution time. Agent-level failures are captured per agent and do not
//! abort the surrounding job; scheduling errors are fatal to the affected
//! job only.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A crew definition failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No crew registered under the given id.
    #[error("crew not found: {0}")]
    CrewNotFound(Uuid),

    /// No job registered under the given id (never created, or evicted).
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    /// Internal scheduling invariant violation, fatal to the job.
    #[error("scheduling error: {message}")]
    Scheduling { message: String },
}

/// Errors raised while validating a crew definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A crew must declare at least one agent.
    #[error("crew has no agents")]
    EmptyCrew,

    /// Agent ids must be unique within a crew.
    #[error("duplicate agent id: {agent_id}")]
    DuplicateAgentId { agent_id: String },

    /// A flow relation references an agent id that is not declared.
    #[error("flow relation references unknown agent id: {agent_id}")]
    UnknownAgentId { agent_id: String },

    /// The flow relations induce a cycle; the named agents never become ready.
    #[error("flow graph contains a cycle; unresolved agents: {}", unresolved.join(", "))]
    CyclicGraph { unresolved: Vec<String> },

    /// `max_parallel_tasks` must be a positive integer when set.
    #[error("max_parallel_tasks must be positive")]
    InvalidParallelism,
}

/// A single agent call's failure, recorded per agent in the execution log.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AgentExecutionError {
    /// The agent executor returned an error.
    #[error("agent execution failed: {message}")]
    Failed { message: String },

    /// The agent exceeded its per-dispatch deadline.
    #[error("agent timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}
