//! # Crew Engine
//!
//! An async execution engine for multi-agent crews. A crew is a named set of
//! agents plus an execution mode (sequential chain, parallel fan-out, or an
//! explicit flow graph). The engine validates the dependency graph, plans it
//! into waves, runs the agents through a pluggable executor with bounded
//! concurrency, and merges the outputs into a single result. Runs are
//! submitted as polled jobs with cooperative cancellation and TTL eviction.

pub mod agent;
pub mod aggregator;
pub mod crew;
pub mod errors;
pub mod executor;
pub mod graph;
pub mod jobs;
pub mod process;
pub mod result;
pub mod scheduler;

pub use agent::{AgentClass, AgentConfig, AgentSpec};
pub use aggregator::Aggregator;
pub use crew::{CrewDefinition, CrewRegistry, FlowRelation};
pub use errors::{AgentExecutionError, EngineError, ValidationError};
pub use executor::{
    AgentCompletion, AgentExecutor, AgentInput, LocalExecutor, ToolCall, UpstreamOutput,
};
pub use graph::WavePlan;
pub use jobs::{ExecuteOptions, Job, JobManager, JobManagerConfig, JobQuery, JobStatus};
pub use process::ExecutionMode;
pub use result::{AgentRuntime, AgentStatus, CrewResult, ExecutionLogEntry, ResultStatus};
pub use scheduler::{Scheduler, SchedulerOptions, SkipPolicy, WaveOutcome};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
