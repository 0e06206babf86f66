//! Execution strategies for crew runs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the different strategies a crew can use to order its agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Agents run one after another in declared order.
    Sequential,
    /// All agents run concurrently in a single wave.
    Parallel,
    /// Agents run according to declared flow relations (a DAG).
    Flow,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Parallel => write!(f, "parallel"),
            ExecutionMode::Flow => write!(f, "flow"),
        }
    }
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Sequential
    }
}
