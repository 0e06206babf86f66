//! Result aggregation: merges per-agent outputs into a crew-level result.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::agent::{AgentClass, AgentSpec};
use crate::crew::CrewDefinition;
use crate::executor::{AgentExecutor, AgentInput, UpstreamOutput};
use crate::process::ExecutionMode;
use crate::result::{AgentRuntime, AgentStatus, CrewResult, ResultStatus};
use crate::scheduler::WaveOutcome;

/// Reserved error key for a failed synthesis call; the run itself still
/// completes with the fallback output.
pub const SYNTHESIS_ERROR_KEY: &str = "__synthesis__";

/// Builds the final [`CrewResult`] from a scheduler outcome, optionally
/// applying one synthesis call over all successful outputs.
pub struct Aggregator {
    executor: Arc<dyn AgentExecutor>,
}

impl Aggregator {
    /// Create an aggregator issuing synthesis calls through the given executor.
    pub fn new(executor: Arc<dyn AgentExecutor>) -> Self {
        Self { executor }
    }

    /// Merge the outcome into a crew result.
    ///
    /// `results` and `agents` follow dispatch order; `output` is the
    /// synthesis result when a prompt is supplied, otherwise the last
    /// successful output (sequential/flow) or the successful outputs joined
    /// (parallel). An empty `output` marks the result failed.
    pub async fn aggregate(
        &self,
        crew: &CrewDefinition,
        outcome: WaveOutcome,
        synthesis_prompt: Option<&str>,
        started: DateTime<Utc>,
    ) -> CrewResult {
        let successes: Vec<(&str, &str)> = outcome
            .log
            .iter()
            .filter(|e| e.status == AgentStatus::Completed)
            .map(|e| (e.agent_id.as_str(), e.output.as_str()))
            .collect();

        let agents: Vec<AgentRuntime> = outcome
            .log
            .iter()
            .map(|entry| {
                let config = crew
                    .agent(&entry.agent_id)
                    .map(|spec| spec.config.clone())
                    .unwrap_or_default();
                AgentRuntime {
                    agent_id: entry.agent_id.clone(),
                    provider: config.provider,
                    model: config.model,
                    status: entry.status,
                    execution_ms: (entry.end_time - entry.start_time).num_milliseconds(),
                    tool_calls: entry.tool_calls.len(),
                }
            })
            .collect();

        let mut errors = outcome.errors;
        let fallback = match crew.execution_mode {
            ExecutionMode::Parallel => successes
                .iter()
                .map(|(_, output)| *output)
                .collect::<Vec<_>>()
                .join("\n\n"),
            ExecutionMode::Sequential | ExecutionMode::Flow => successes
                .last()
                .map(|(_, output)| output.to_string())
                .unwrap_or_default(),
        };

        let output = match synthesis_prompt {
            Some(prompt) if !successes.is_empty() => {
                match self.synthesize(prompt, &successes).await {
                    Ok(output) => output,
                    Err(error) => {
                        log::warn!("synthesis call failed, using fallback: {}", error);
                        errors.insert(SYNTHESIS_ERROR_KEY.to_string(), error);
                        fallback
                    }
                }
            }
            _ => fallback,
        };

        let status = if output.is_empty() {
            ResultStatus::Failed
        } else {
            ResultStatus::Completed
        };

        CrewResult {
            output,
            results: successes
                .iter()
                .map(|(_, output)| output.to_string())
                .collect(),
            agent_ids: outcome.log.iter().map(|e| e.agent_id.clone()).collect(),
            agents,
            execution_log: outcome.log,
            errors,
            total_time_ms: (Utc::now() - started).num_milliseconds(),
            status,
            metadata: crew.metadata.clone(),
        }
    }

    /// One extra executor call combining all successful outputs under the
    /// synthesis prompt.
    async fn synthesize(
        &self,
        prompt: &str,
        successes: &[(&str, &str)],
    ) -> Result<String, String> {
        let spec = AgentSpec {
            agent_id: "synthesizer".to_string(),
            name: "Synthesizer".to_string(),
            agent_class: AgentClass::Synthesis,
            config: Default::default(),
            tools: Vec::new(),
            system_prompt: Some(prompt.to_string()),
        };
        let input = AgentInput::Upstream(
            successes
                .iter()
                .map(|(agent_id, output)| UpstreamOutput {
                    agent_id: agent_id.to_string(),
                    output: output.to_string(),
                })
                .collect(),
        );
        self.executor
            .execute(&spec, &input)
            .await
            .map(|completion| completion.output)
            .map_err(|error| error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::LocalExecutor;
    use crate::result::ExecutionLogEntry;

    fn crew(mode: ExecutionMode, ids: &[&str]) -> CrewDefinition {
        CrewDefinition::new(mode, ids.iter().map(|id| AgentSpec::new(*id, *id)).collect())
    }

    fn completed(agent_id: &str, output: &str) -> ExecutionLogEntry {
        let now = Utc::now();
        ExecutionLogEntry {
            agent_id: agent_id.to_string(),
            start_time: now,
            end_time: now,
            status: AgentStatus::Completed,
            output: output.to_string(),
            tool_calls: Vec::new(),
            error: None,
        }
    }

    fn outcome_with(entries: Vec<ExecutionLogEntry>) -> WaveOutcome {
        let outputs = entries
            .iter()
            .filter(|e| e.status == AgentStatus::Completed)
            .map(|e| (e.agent_id.clone(), e.output.clone()))
            .collect();
        WaveOutcome {
            log: entries,
            outputs,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sequential_fallback_is_last_success() {
        let crew = crew(ExecutionMode::Sequential, &["a", "b"]);
        let aggregator = Aggregator::new(Arc::new(LocalExecutor::new()));
        let outcome = outcome_with(vec![completed("a", "draft"), completed("b", "final")]);
        let result = aggregator.aggregate(&crew, outcome, None, Utc::now()).await;
        assert_eq!(result.output, "final");
        assert_eq!(result.results, vec!["draft".to_string(), "final".to_string()]);
        assert_eq!(result.status, ResultStatus::Completed);
    }

    #[tokio::test]
    async fn test_parallel_fallback_joins_successes() {
        let crew = crew(ExecutionMode::Parallel, &["a", "b"]);
        let aggregator = Aggregator::new(Arc::new(LocalExecutor::new()));
        let outcome = outcome_with(vec![completed("a", "one"), completed("b", "two")]);
        let result = aggregator.aggregate(&crew, outcome, None, Utc::now()).await;
        assert_eq!(result.output, "one\n\ntwo");
    }

    #[tokio::test]
    async fn test_synthesis_output_replaces_fallback() {
        let crew = crew(ExecutionMode::Parallel, &["a", "b"]);
        let aggregator = Aggregator::new(Arc::new(LocalExecutor::new()));
        let outcome = outcome_with(vec![completed("a", "one"), completed("b", "two")]);
        let result = aggregator
            .aggregate(&crew, outcome, Some("combine the findings"), Utc::now())
            .await;
        assert!(result.output.starts_with("synthesis[synthesizer] of 2 inputs"));
    }

    #[tokio::test]
    async fn test_synthesis_failure_falls_back_and_records_error() {
        let crew = crew(ExecutionMode::Sequential, &["a"]);
        let aggregator = Aggregator::new(Arc::new(LocalExecutor::new().fail_for("synthesizer")));
        let outcome = outcome_with(vec![completed("a", "draft")]);
        let result = aggregator
            .aggregate(&crew, outcome, Some("combine"), Utc::now())
            .await;
        assert_eq!(result.output, "draft");
        assert!(result.errors.contains_key(SYNTHESIS_ERROR_KEY));
        assert_eq!(result.status, ResultStatus::Completed);
    }

    #[tokio::test]
    async fn test_no_successes_yields_failed_result() {
        let crew = crew(ExecutionMode::Sequential, &["a"]);
        let aggregator = Aggregator::new(Arc::new(LocalExecutor::new()));
        let now = Utc::now();
        let outcome = outcome_with(vec![ExecutionLogEntry {
            agent_id: "a".to_string(),
            start_time: now,
            end_time: now,
            status: AgentStatus::Failed,
            output: String::new(),
            tool_calls: Vec::new(),
            error: Some("boom".to_string()),
        }]);
        let result = aggregator.aggregate(&crew, outcome, None, now).await;
        assert_eq!(result.status, ResultStatus::Failed);
        assert!(result.output.is_empty());
        assert!(result.results.is_empty());
    }
}
