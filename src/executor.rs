//! The agent execution seam.
//!
//! The engine treats "run agent X with input Y" as an opaque asynchronous
//! operation: latency and failure modes belong to the implementor. The
//! [`LocalExecutor`] is a deterministic in-process implementation used by
//! tests and demos; production deployments plug in their own.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::{AgentClass, AgentSpec};
use crate::errors::AgentExecutionError;

/// Input handed to a single agent dispatch.
///
/// First-wave agents (and agents with a single predecessor) receive plain
/// text; fan-in agents receive their predecessors' outputs as an ordered
/// collection, in predecessor declaration order. The scheduler performs no
/// summarization of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentInput {
    /// The job query, or a single predecessor's raw output.
    Query(String),
    /// Ordered outputs from multiple predecessors.
    Upstream(Vec<UpstreamOutput>),
}

/// One predecessor's contribution to a fan-in input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamOutput {
    /// The predecessor agent.
    pub agent_id: String,
    /// Its raw output.
    pub output: String,
}

impl AgentInput {
    /// Flatten the input to plain text, joining fan-in outputs with blank
    /// lines. Executors that want structure should match on the enum instead.
    pub fn as_text(&self) -> String {
        match self {
            AgentInput::Query(text) => text.clone(),
            AgentInput::Upstream(upstream) => upstream
                .iter()
                .map(|u| u.output.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

/// A tool invocation surfaced by an executor during an agent call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name.
    pub name: String,
    /// Arguments the agent passed.
    pub arguments: Value,
    /// Tool output, when the call returned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Successful outcome of one agent call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCompletion {
    /// The agent's raw output text.
    pub output: String,
    /// Tool invocations made along the way.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl AgentCompletion {
    /// A completion with output text and no tool calls.
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// Executes a single agent against an input payload.
///
/// Implementations must be safe to call concurrently; the scheduler issues
/// every member of a wave at once, bounded only by the admission limiter.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Run one agent call to completion or failure. Retries, if desired,
    /// are the implementor's responsibility.
    async fn execute(
        &self,
        agent: &AgentSpec,
        input: &AgentInput,
    ) -> Result<AgentCompletion, AgentExecutionError>;
}

/// A dispatch recorded by [`LocalExecutor`], for assertions in tests.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// The agent that was dispatched.
    pub agent_id: String,
    /// The input it received.
    pub input: AgentInput,
}

/// Deterministic in-process executor.
///
/// Output derives from the agent's resolved class, so runs are reproducible;
/// latency and failures are injectable per agent.
#[derive(Default)]
pub struct LocalExecutor {
    latency: Option<Duration>,
    delays: HashMap<String, Duration>,
    failures: HashSet<String>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl LocalExecutor {
    /// Create an executor with no latency and no injected failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: sleep this long on every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Builder: sleep this long when dispatching the named agent.
    pub fn delay_for(mut self, agent_id: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(agent_id.into(), delay);
        self
    }

    /// Builder: fail every call for the named agent.
    pub fn fail_for(mut self, agent_id: impl Into<String>) -> Self {
        self.failures.insert(agent_id.into());
        self
    }

    /// All dispatches seen so far, in call order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    fn render(agent: &AgentSpec, input: &AgentInput) -> AgentCompletion {
        let text = input.as_text();
        match agent.agent_class {
            AgentClass::Llm => AgentCompletion::text(format!("{}: {}", agent.agent_id, text)),
            AgentClass::Research => {
                AgentCompletion::text(format!("findings[{}]: {}", agent.agent_id, text))
            }
            AgentClass::Synthesis => {
                let count = match input {
                    AgentInput::Upstream(upstream) => upstream.len(),
                    AgentInput::Query(_) => 1,
                };
                AgentCompletion::text(format!(
                    "synthesis[{}] of {} inputs: {}",
                    agent.agent_id, count, text
                ))
            }
            AgentClass::Tool => {
                let tool = agent
                    .tools
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "noop".to_string());
                AgentCompletion {
                    output: format!("tool[{}] via {}: {}", agent.agent_id, tool, text),
                    tool_calls: vec![ToolCall {
                        name: tool,
                        arguments: serde_json::json!({ "input": text }),
                        output: Some("ok".to_string()),
                    }],
                }
            }
        }
    }
}

#[async_trait]
impl AgentExecutor for LocalExecutor {
    async fn execute(
        &self,
        agent: &AgentSpec,
        input: &AgentInput,
    ) -> Result<AgentCompletion, AgentExecutionError> {
        self.calls.lock().push(RecordedCall {
            agent_id: agent.agent_id.clone(),
            input: input.clone(),
        });

        if let Some(delay) = self.delays.get(&agent.agent_id).copied().or(self.latency) {
            tokio::time::sleep(delay).await;
        }

        if self.failures.contains(&agent.agent_id) {
            return Err(AgentExecutionError::Failed {
                message: format!("injected failure for {}", agent.agent_id),
            });
        }

        Ok(Self::render(agent, input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_executor_is_deterministic() {
        let executor = LocalExecutor::new();
        let agent = AgentSpec::new("r1", "Researcher").with_class(AgentClass::Research);
        let input = AgentInput::Query("topic".to_string());
        let first = executor.execute(&agent, &input).await.unwrap();
        let second = executor.execute(&agent, &input).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.output, "findings[r1]: topic");
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let executor = LocalExecutor::new().fail_for("bad");
        let agent = AgentSpec::new("bad", "Bad");
        let err = executor
            .execute(&agent, &AgentInput::Query("x".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentExecutionError::Failed { .. }));
    }

    #[tokio::test]
    async fn test_tool_agent_records_tool_call() {
        let executor = LocalExecutor::new();
        let agent = AgentSpec::new("t1", "Tooler")
            .with_class(AgentClass::Tool)
            .with_tools(vec!["calculator".into()]);
        let completion = executor
            .execute(&agent, &AgentInput::Query("2+2".into()))
            .await
            .unwrap();
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].name, "calculator");
    }

    #[test]
    fn test_upstream_as_text_joins_in_order() {
        let input = AgentInput::Upstream(vec![
            UpstreamOutput {
                agent_id: "a".into(),
                output: "one".into(),
            },
            UpstreamOutput {
                agent_id: "b".into(),
                output: "two".into(),
            },
        ]);
        assert_eq!(input.as_text(), "one\n\ntwo");
    }

    #[tokio::test]
    async fn test_calls_are_recorded() {
        let executor = LocalExecutor::new();
        let agent = AgentSpec::new("a", "A");
        executor
            .execute(&agent, &AgentInput::Query("hello".into()))
            .await
            .unwrap();
        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].agent_id, "a");
    }
}
