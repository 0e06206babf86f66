//! Wave scheduler: dispatches ready agents under an admission limit.
//!
//! The scheduler walks a [`WavePlan`] one wave at a time. Within a wave every
//! member is dispatched concurrently, each acquiring a semaphore slot before
//! the executor call and releasing it on every exit path; the scheduler then
//! suspends until the whole wave has reached a terminal per-agent state.
//! Cancellation is cooperative and observed only at wave boundaries:
//! already-dispatched agents run to completion, no further waves start.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::agent::AgentSpec;
use crate::crew::CrewDefinition;
use crate::errors::{AgentExecutionError, EngineError};
use crate::executor::{AgentCompletion, AgentExecutor, AgentInput, UpstreamOutput};
use crate::graph::WavePlan;
use crate::jobs::JobQuery;
use crate::result::{AgentStatus, ExecutionLogEntry};

/// What to do with an agent whose predecessor failed or was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPolicy {
    /// Never dispatch the agent; record it as skipped. A skipped node counts
    /// as a failed predecessor for its own dependents, so skips propagate.
    SkipOnFailedPredecessor,
    /// Dispatch with only the successful predecessors' outputs; skip only
    /// when no predecessor completed at all.
    RunWithPartialInput,
}

impl Default for SkipPolicy {
    fn default() -> Self {
        SkipPolicy::SkipOnFailedPredecessor
    }
}

/// Tunables for one scheduler run.
#[derive(Debug, Clone, Default)]
pub struct SchedulerOptions {
    /// Admission bound within this run; unlimited if unset.
    pub max_parallel: Option<usize>,
    /// Default per-agent deadline; an agent's own `timeout_ms` wins.
    pub agent_timeout: Option<Duration>,
    /// Failed-predecessor policy.
    pub skip_policy: SkipPolicy,
}

/// Everything a run produced: the log, per-agent errors, and raw outputs.
#[derive(Debug, Clone, Default)]
pub struct WaveOutcome {
    /// Per-agent completion records in completion order.
    pub log: Vec<ExecutionLogEntry>,
    /// Failed agents and their errors. Skipped agents are not errors.
    pub errors: BTreeMap<String, String>,
    /// Raw outputs of completed agents.
    pub outputs: HashMap<String, String>,
    /// Whether cancellation was observed before the plan finished.
    pub cancelled: bool,
}

struct Dispatch {
    agent_id: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    result: Result<AgentCompletion, AgentExecutionError>,
}

/// Drives one crew run against a wave plan.
pub struct Scheduler {
    executor: Arc<dyn AgentExecutor>,
    options: SchedulerOptions,
    cancel: Arc<AtomicBool>,
}

impl Scheduler {
    /// Create a scheduler with its own cancellation flag.
    pub fn new(executor: Arc<dyn AgentExecutor>, options: SchedulerOptions) -> Self {
        Self::with_cancellation(executor, options, Arc::new(AtomicBool::new(false)))
    }

    /// Create a scheduler observing an externally-owned cancellation flag.
    pub fn with_cancellation(
        executor: Arc<dyn AgentExecutor>,
        options: SchedulerOptions,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            executor,
            options,
            cancel,
        }
    }

    /// Handle for requesting cooperative cancellation.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Execute the plan. Agent-level failures are recorded and do not abort
    /// the run; only internal invariant violations return `Err`.
    pub async fn run(
        &self,
        crew: &CrewDefinition,
        plan: &WavePlan,
        query: &JobQuery,
    ) -> Result<WaveOutcome, EngineError> {
        let permits = self.options.max_parallel.unwrap_or(Semaphore::MAX_PERMITS);
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut outcome = WaveOutcome::default();
        let mut states: HashMap<String, AgentStatus> = HashMap::new();

        for (wave_index, wave) in plan.waves.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                log::info!(
                    "cancellation observed before wave {}; stopping crew {}",
                    wave_index,
                    crew.crew_id
                );
                outcome.cancelled = true;
                break;
            }
            if wave.is_empty() {
                return Err(EngineError::Scheduling {
                    message: format!("wave {} computed with no ready agents", wave_index),
                });
            }

            let mut dispatches = Vec::with_capacity(wave.len());
            for agent_id in wave {
                let preds = plan
                    .predecessors
                    .get(agent_id)
                    .cloned()
                    .unwrap_or_default();

                if let Some(reason) = self.skip_reason(&preds, &states) {
                    log::debug!("skipping agent {}: {}", agent_id, reason);
                    let now = Utc::now();
                    states.insert(agent_id.clone(), AgentStatus::Skipped);
                    outcome.log.push(ExecutionLogEntry {
                        agent_id: agent_id.clone(),
                        start_time: now,
                        end_time: now,
                        status: AgentStatus::Skipped,
                        output: String::new(),
                        tool_calls: Vec::new(),
                        error: Some(reason),
                    });
                    continue;
                }

                let spec = crew.agent(agent_id).cloned().ok_or_else(|| {
                    EngineError::Scheduling {
                        message: format!("agent {} present in plan but not in crew", agent_id),
                    }
                })?;
                let input = resolve_input(agent_id, &preds, &outcome.outputs, query);
                let deadline = spec
                    .config
                    .timeout_ms
                    .map(Duration::from_millis)
                    .or(self.options.agent_timeout);
                dispatches.push(self.dispatch(spec, input, semaphore.clone(), deadline));
            }

            for dispatch in join_all(dispatches).await {
                match dispatch.result {
                    Ok(completion) => {
                        states.insert(dispatch.agent_id.clone(), AgentStatus::Completed);
                        outcome
                            .outputs
                            .insert(dispatch.agent_id.clone(), completion.output.clone());
                        outcome.log.push(ExecutionLogEntry {
                            agent_id: dispatch.agent_id,
                            start_time: dispatch.start,
                            end_time: dispatch.end,
                            status: AgentStatus::Completed,
                            output: completion.output,
                            tool_calls: completion.tool_calls,
                            error: None,
                        });
                    }
                    Err(error) => {
                        log::warn!("agent {} failed: {}", dispatch.agent_id, error);
                        states.insert(dispatch.agent_id.clone(), AgentStatus::Failed);
                        outcome
                            .errors
                            .insert(dispatch.agent_id.clone(), error.to_string());
                        outcome.log.push(ExecutionLogEntry {
                            agent_id: dispatch.agent_id,
                            start_time: dispatch.start,
                            end_time: dispatch.end,
                            status: AgentStatus::Failed,
                            output: String::new(),
                            tool_calls: Vec::new(),
                            error: Some(error.to_string()),
                        });
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Whether an agent must be skipped, with the reason, under the
    /// configured policy. Agents with no predecessors never skip.
    fn skip_reason(
        &self,
        preds: &[String],
        states: &HashMap<String, AgentStatus>,
    ) -> Option<String> {
        if preds.is_empty() {
            return None;
        }
        let failed: Vec<&str> = preds
            .iter()
            .filter(|p| {
                matches!(
                    states.get(p.as_str()),
                    Some(AgentStatus::Failed | AgentStatus::Skipped)
                )
            })
            .map(String::as_str)
            .collect();
        let should_skip = match self.options.skip_policy {
            SkipPolicy::SkipOnFailedPredecessor => !failed.is_empty(),
            SkipPolicy::RunWithPartialInput => failed.len() == preds.len(),
        };
        if should_skip {
            Some(format!(
                "predecessor(s) did not complete: {}",
                failed.join(", ")
            ))
        } else {
            None
        }
    }

    async fn dispatch(
        &self,
        spec: AgentSpec,
        input: AgentInput,
        semaphore: Arc<Semaphore>,
        deadline: Option<Duration>,
    ) -> Dispatch {
        let agent_id = spec.agent_id.clone();
        let permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                let now = Utc::now();
                return Dispatch {
                    agent_id,
                    start: now,
                    end: now,
                    result: Err(AgentExecutionError::Failed {
                        message: "admission limiter closed".to_string(),
                    }),
                };
            }
        };

        let start = Utc::now();
        let call = self.executor.execute(&spec, &input);
        let result = match deadline {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(inner) => inner,
                Err(_) => Err(AgentExecutionError::Timeout {
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => call.await,
        };
        let end = Utc::now();
        drop(permit);

        Dispatch {
            agent_id,
            start,
            end,
            result,
        }
    }
}

/// Resolve one agent's input: the job query when it has no completed
/// predecessors, a single predecessor's raw output, or the ordered fan-in of
/// several predecessors' outputs (declaration order).
fn resolve_input(
    agent_id: &str,
    preds: &[String],
    outputs: &HashMap<String, String>,
    query: &JobQuery,
) -> AgentInput {
    let completed: Vec<&String> = preds
        .iter()
        .filter(|p| outputs.contains_key(p.as_str()))
        .collect();

    if completed.is_empty() {
        return match query {
            JobQuery::Single(text) => AgentInput::Query(text.clone()),
            JobQuery::PerAgent(map) => {
                AgentInput::Query(map.get(agent_id).cloned().unwrap_or_default())
            }
        };
    }

    if completed.len() == 1 {
        AgentInput::Query(outputs[completed[0].as_str()].clone())
    } else {
        AgentInput::Upstream(
            completed
                .iter()
                .map(|p| UpstreamOutput {
                    agent_id: (*p).clone(),
                    output: outputs[p.as_str()].clone(),
                })
                .collect(),
        )
    }
}
