//! Job lifecycle and the job manager.
//!
//! A job is one asynchronous, polled execution of a crew against an input.
//! Submission is fire-and-forget: the manager creates the job in `pending`,
//! spawns a detached worker that drives the graph builder, scheduler, and
//! aggregator, and returns the id immediately. The worker is the only writer
//! of its job entry after creation; status reads never block on it. Jobs are
//! volatile in-process state and a periodic sweep evicts terminal jobs older
//! than the configured time-to-live.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::aggregator::Aggregator;
use crate::crew::{CrewDefinition, CrewRegistry};
use crate::errors::EngineError;
use crate::executor::AgentExecutor;
use crate::graph::WavePlan;
use crate::result::{CrewResult, ResultStatus};
use crate::scheduler::{Scheduler, SchedulerOptions, SkipPolicy};

/// Job lifecycle states. Transitions are monotonic along
/// `pending -> running -> {completed | failed | cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, worker not yet started the run.
    Pending,
    /// The worker is executing the crew.
    Running,
    /// At least one agent produced output.
    Completed,
    /// Every agent errored or was skipped, or a top-level error occurred.
    Failed,
    /// Cancellation was observed before completion.
    Cancelled,
}

impl JobStatus {
    /// Whether the job can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Input for a job: one query for the whole crew, or a per-agent mapping
/// for independent parallel tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobQuery {
    /// A single query handed to every first-wave agent.
    Single(String),
    /// Per-agent queries; agents without an entry receive an empty query.
    PerAgent(HashMap<String, String>),
}

impl From<&str> for JobQuery {
    fn from(query: &str) -> Self {
        JobQuery::Single(query.to_string())
    }
}

impl From<String> for JobQuery {
    fn from(query: String) -> Self {
        JobQuery::Single(query)
    }
}

impl From<HashMap<String, String>> for JobQuery {
    fn from(map: HashMap<String, String>) -> Self {
        JobQuery::PerAgent(map)
    }
}

/// One execution instance of a crew. Snapshots are frozen once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub job_id: Uuid,
    /// The crew this job executes.
    pub crew_id: Uuid,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// The submitted input.
    pub query: JobQuery,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// When the worker picked the job up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// The merged result, present on `completed` (and on `cancelled` for the
    /// waves that did run).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CrewResult>,
    /// Top-level error string on `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-submission overrides.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Overrides the crew's synthesis prompt for this job.
    pub synthesis_prompt: Option<String>,
    /// Overrides the manager's default per-agent deadline.
    pub agent_timeout: Option<Duration>,
    /// Overrides the failed-predecessor policy.
    pub skip_policy: Option<SkipPolicy>,
}

/// Manager tunables.
#[derive(Debug, Clone)]
pub struct JobManagerConfig {
    /// How long terminal jobs remain queryable.
    pub job_ttl: Duration,
    /// How often the sweep looks for expired jobs.
    pub sweep_interval: Duration,
    /// Default per-agent deadline applied when neither the agent config nor
    /// the submission sets one.
    pub default_agent_timeout: Option<Duration>,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            job_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            default_agent_timeout: None,
        }
    }
}

struct JobEntry {
    job: Job,
    cancel: Arc<AtomicBool>,
}

/// Owns the job registry and drives crew runs in the background.
///
/// Each job entry is mutated exclusively by its own worker after creation;
/// the registry uses per-entry locking so a write to one job never blocks a
/// read of another. Must be constructed inside a tokio runtime (the TTL
/// sweep is spawned at construction).
pub struct JobManager {
    crews: Arc<CrewRegistry>,
    executor: Arc<dyn AgentExecutor>,
    config: JobManagerConfig,
    jobs: Arc<DashMap<Uuid, JobEntry>>,
    workers: Arc<DashMap<Uuid, JoinHandle<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl JobManager {
    /// Create a manager and start its eviction sweep.
    pub fn new(
        crews: Arc<CrewRegistry>,
        executor: Arc<dyn AgentExecutor>,
        config: JobManagerConfig,
    ) -> Self {
        let jobs: Arc<DashMap<Uuid, JobEntry>> = Arc::new(DashMap::new());
        let workers: Arc<DashMap<Uuid, JoinHandle<()>>> = Arc::new(DashMap::new());
        let sweeper = spawn_sweeper(
            jobs.clone(),
            workers.clone(),
            config.job_ttl,
            config.sweep_interval,
        );
        Self {
            crews,
            executor,
            config,
            jobs,
            workers,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Submit a crew run. Returns the job id immediately; the run proceeds
    /// in a detached worker and the caller polls [`JobManager::status`].
    pub fn submit(
        &self,
        crew_id: Uuid,
        query: impl Into<JobQuery>,
        options: ExecuteOptions,
    ) -> Result<Uuid, EngineError> {
        let crew = self.crews.get(crew_id)?;
        let ExecuteOptions {
            synthesis_prompt,
            agent_timeout,
            skip_policy,
        } = options;

        let job_id = Uuid::new_v4();
        let cancel = Arc::new(AtomicBool::new(false));
        let job = Job {
            job_id,
            crew_id,
            status: JobStatus::Pending,
            query: query.into(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        };
        self.jobs.insert(
            job_id,
            JobEntry {
                job,
                cancel: cancel.clone(),
            },
        );

        let scheduler_options = SchedulerOptions {
            max_parallel: crew.max_parallel_tasks,
            agent_timeout: agent_timeout.or(self.config.default_agent_timeout),
            skip_policy: skip_policy.unwrap_or_default(),
        };
        let synthesis = synthesis_prompt.or_else(|| crew.synthesis_prompt.clone());

        let handle = tokio::spawn(run_job(
            self.jobs.clone(),
            crew,
            self.executor.clone(),
            scheduler_options,
            synthesis,
            job_id,
            cancel,
        ));
        self.workers.insert(job_id, handle);
        log::info!("submitted job {} for crew {}", job_id, crew_id);
        Ok(job_id)
    }

    /// A snapshot of the job. Pure read; repeated calls on a terminal job
    /// return identical snapshots.
    pub fn status(&self, job_id: Uuid) -> Result<Job, EngineError> {
        self.jobs
            .get(&job_id)
            .map(|entry| entry.job.clone())
            .ok_or(EngineError::JobNotFound(job_id))
    }

    /// Request cooperative cancellation. "Cancel" means "stop scheduling new
    /// waves": agents already dispatched run to completion. No effect on a
    /// terminal job.
    pub fn cancel(&self, job_id: Uuid) -> Result<(), EngineError> {
        let entry = self
            .jobs
            .get(&job_id)
            .ok_or(EngineError::JobNotFound(job_id))?;
        if !entry.job.status.is_terminal() {
            log::info!("cancellation requested for job {}", job_id);
            entry.cancel.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Number of jobs currently in the registry.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Stop the sweep, abort all live workers, and drop the registry.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        for entry in self.workers.iter() {
            entry.value().abort();
        }
        self.workers.clear();
        self.jobs.clear();
        log::info!("job manager shut down");
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_sweeper(
    jobs: Arc<DashMap<Uuid, JobEntry>>,
    workers: Arc<DashMap<Uuid, JoinHandle<()>>>,
    ttl: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let cutoff = Utc::now() - ttl;
            let expired: Vec<Uuid> = jobs
                .iter()
                .filter(|entry| {
                    entry.value().job.status.is_terminal()
                        && entry
                            .value()
                            .job
                            .completed_at
                            .map_or(false, |at| at < cutoff)
                })
                .map(|entry| *entry.key())
                .collect();
            for job_id in expired {
                jobs.remove(&job_id);
                if let Some((_, handle)) = workers.remove(&job_id) {
                    handle.abort();
                }
                log::debug!("evicted expired job {}", job_id);
            }
        }
    })
}

/// The detached worker driving one job to a terminal state.
async fn run_job(
    jobs: Arc<DashMap<Uuid, JobEntry>>,
    crew: Arc<CrewDefinition>,
    executor: Arc<dyn AgentExecutor>,
    options: SchedulerOptions,
    synthesis_prompt: Option<String>,
    job_id: Uuid,
    cancel: Arc<AtomicBool>,
) {
    let started = Utc::now();
    let query = match mark_running(&jobs, job_id, started) {
        Some(query) => query,
        None => return,
    };

    let plan = match WavePlan::build(&crew) {
        Ok(plan) => plan,
        Err(error) => {
            finish(&jobs, job_id, JobStatus::Failed, None, Some(error.to_string()));
            return;
        }
    };

    let scheduler = Scheduler::with_cancellation(executor.clone(), options, cancel);
    match scheduler.run(&crew, &plan, &query).await {
        Ok(outcome) => {
            let cancelled = outcome.cancelled;
            let result = Aggregator::new(executor)
                .aggregate(&crew, outcome, synthesis_prompt.as_deref(), started)
                .await;
            let status = if cancelled {
                JobStatus::Cancelled
            } else {
                match result.status {
                    ResultStatus::Completed => JobStatus::Completed,
                    ResultStatus::Failed => JobStatus::Failed,
                }
            };
            let error = (status == JobStatus::Failed)
                .then(|| "all agents failed or were skipped".to_string());
            finish(&jobs, job_id, status, Some(result), error);
        }
        Err(error) => {
            finish(&jobs, job_id, JobStatus::Failed, None, Some(error.to_string()));
        }
    }
}

fn mark_running(
    jobs: &DashMap<Uuid, JobEntry>,
    job_id: Uuid,
    started: DateTime<Utc>,
) -> Option<JobQuery> {
    let mut entry = jobs.get_mut(&job_id)?;
    if entry.job.status != JobStatus::Pending {
        return None;
    }
    entry.job.status = JobStatus::Running;
    entry.job.started_at = Some(started);
    Some(entry.job.query.clone())
}

fn finish(
    jobs: &DashMap<Uuid, JobEntry>,
    job_id: Uuid,
    status: JobStatus,
    result: Option<CrewResult>,
    error: Option<String>,
) {
    let Some(mut entry) = jobs.get_mut(&job_id) else {
        return;
    };
    if entry.job.status.is_terminal() {
        log::warn!("ignoring write to terminal job {}", job_id);
        return;
    }
    entry.job.status = status;
    entry.job.result = result;
    entry.job.error = error;
    entry.job.completed_at = Some(Utc::now());
    log::info!("job {} finished with status {}", job_id, status);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentClass, AgentSpec};
    use crate::crew::FlowRelation;
    use crate::executor::{AgentInput, LocalExecutor};
    use crate::process::ExecutionMode;
    use crate::result::AgentStatus;

    fn manager_with(
        executor: Arc<LocalExecutor>,
        config: JobManagerConfig,
    ) -> (JobManager, Arc<CrewRegistry>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let crews = Arc::new(CrewRegistry::new());
        (
            JobManager::new(crews.clone(), executor, config),
            crews,
        )
    }

    async fn wait_terminal(manager: &JobManager, job_id: Uuid) -> Job {
        for _ in 0..200 {
            let job = manager.status(job_id).unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not reach a terminal state", job_id);
    }

    #[tokio::test]
    async fn test_end_to_end_sequential_crew() {
        let executor = Arc::new(LocalExecutor::new());
        let (manager, crews) = manager_with(executor.clone(), JobManagerConfig::default());
        let crew_id = crews
            .create(CrewDefinition::new(
                ExecutionMode::Sequential,
                vec![
                    AgentSpec::new("researcher", "Researcher").with_class(AgentClass::Research),
                    AgentSpec::new("writer", "Writer"),
                ],
            ))
            .unwrap();

        let job_id = manager
            .submit(crew_id, "Summarize AI trends", ExecuteOptions::default())
            .unwrap();
        let job = wait_terminal(&manager, job_id).await;

        assert_eq!(job.status, JobStatus::Completed);
        let result = job.result.unwrap();
        assert_eq!(result.execution_log.len(), 2);
        assert_eq!(result.execution_log[0].agent_id, "researcher");
        assert_eq!(result.execution_log[1].agent_id, "writer");

        // The writer's input is the researcher's raw output.
        let writer_call = executor
            .calls()
            .into_iter()
            .find(|c| c.agent_id == "writer")
            .unwrap();
        assert_eq!(
            writer_call.input,
            AgentInput::Query(result.execution_log[0].output.clone())
        );
    }

    #[tokio::test]
    async fn test_status_is_idempotent_once_terminal() {
        let executor = Arc::new(LocalExecutor::new());
        let (manager, crews) = manager_with(executor, JobManagerConfig::default());
        let crew_id = crews
            .create(CrewDefinition::new(
                ExecutionMode::Sequential,
                vec![AgentSpec::new("a", "A")],
            ))
            .unwrap();
        let job_id = manager.submit(crew_id, "go", ExecuteOptions::default()).unwrap();
        wait_terminal(&manager, job_id).await;

        let first = serde_json::to_vec(&manager.status(job_id).unwrap()).unwrap();
        let second = serde_json::to_vec(&manager.status(job_id).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_partial_failure_still_completes() {
        let executor = Arc::new(LocalExecutor::new().fail_for("b"));
        let (manager, crews) = manager_with(executor, JobManagerConfig::default());
        let crew_id = crews
            .create(CrewDefinition::new(
                ExecutionMode::Parallel,
                vec![
                    AgentSpec::new("a", "A"),
                    AgentSpec::new("b", "B"),
                    AgentSpec::new("c", "C"),
                ],
            ))
            .unwrap();
        let job_id = manager.submit(crew_id, "go", ExecuteOptions::default()).unwrap();
        let job = wait_terminal(&manager, job_id).await;

        assert_eq!(job.status, JobStatus::Completed);
        let result = job.result.unwrap();
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors.contains_key("b"));
        assert_eq!(result.results.len(), 2);
    }

    #[tokio::test]
    async fn test_all_agents_failing_fails_the_job() {
        let executor = Arc::new(LocalExecutor::new().fail_for("a"));
        let (manager, crews) = manager_with(executor, JobManagerConfig::default());
        let crew_id = crews
            .create(CrewDefinition::new(
                ExecutionMode::Sequential,
                vec![AgentSpec::new("a", "A")],
            ))
            .unwrap();
        let job_id = manager.submit(crew_id, "go", ExecuteOptions::default()).unwrap();
        let job = wait_terminal(&manager, job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.is_some());
    }

    #[tokio::test]
    async fn test_submit_unknown_crew() {
        let executor = Arc::new(LocalExecutor::new());
        let (manager, _crews) = manager_with(executor, JobManagerConfig::default());
        let err = manager
            .submit(Uuid::new_v4(), "go", ExecuteOptions::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::CrewNotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_stops_scheduling_new_waves() {
        let executor = Arc::new(LocalExecutor::new().with_latency(Duration::from_millis(50)));
        let (manager, crews) = manager_with(executor, JobManagerConfig::default());
        let crew_id = crews
            .create(CrewDefinition::new(
                ExecutionMode::Sequential,
                vec![
                    AgentSpec::new("a", "A"),
                    AgentSpec::new("b", "B"),
                    AgentSpec::new("c", "C"),
                ],
            ))
            .unwrap();
        let job_id = manager.submit(crew_id, "go", ExecuteOptions::default()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.cancel(job_id).unwrap();

        let job = wait_terminal(&manager, job_id).await;
        assert_eq!(job.status, JobStatus::Cancelled);
        let result = job.result.unwrap();
        assert!(result.execution_log.len() < 3);
    }

    #[tokio::test]
    async fn test_cancel_is_noop_on_terminal_job() {
        let executor = Arc::new(LocalExecutor::new());
        let (manager, crews) = manager_with(executor, JobManagerConfig::default());
        let crew_id = crews
            .create(CrewDefinition::new(
                ExecutionMode::Sequential,
                vec![AgentSpec::new("a", "A")],
            ))
            .unwrap();
        let job_id = manager.submit(crew_id, "go", ExecuteOptions::default()).unwrap();
        let before = wait_terminal(&manager, job_id).await;
        manager.cancel(job_id).unwrap();
        let after = manager.status(job_id).unwrap();
        assert_eq!(after.status, before.status);
        assert_eq!(
            serde_json::to_vec(&after).unwrap(),
            serde_json::to_vec(&before).unwrap()
        );
    }

    #[tokio::test]
    async fn test_terminal_jobs_are_evicted_after_ttl() {
        let executor = Arc::new(LocalExecutor::new());
        let config = JobManagerConfig {
            job_ttl: Duration::from_millis(50),
            sweep_interval: Duration::from_millis(20),
            default_agent_timeout: None,
        };
        let (manager, crews) = manager_with(executor, config);
        let crew_id = crews
            .create(CrewDefinition::new(
                ExecutionMode::Sequential,
                vec![AgentSpec::new("a", "A")],
            ))
            .unwrap();
        let job_id = manager.submit(crew_id, "go", ExecuteOptions::default()).unwrap();
        wait_terminal(&manager, job_id).await;

        for _ in 0..100 {
            if matches!(manager.status(job_id), Err(EngineError::JobNotFound(_))) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("terminal job was never evicted");
    }

    #[tokio::test]
    async fn test_flow_crew_with_synthesis_prompt() {
        let executor = Arc::new(LocalExecutor::new());
        let (manager, crews) = manager_with(executor, JobManagerConfig::default());
        let crew = CrewDefinition::new(
            ExecutionMode::Flow,
            vec![
                AgentSpec::new("researcher", "Researcher").with_class(AgentClass::Research),
                AgentSpec::new("analyst1", "Analyst 1"),
                AgentSpec::new("analyst2", "Analyst 2"),
            ],
        )
        .with_flow_relations(vec![FlowRelation::fan(
            vec!["researcher".into()],
            vec!["analyst1".into(), "analyst2".into()],
        )])
        .with_synthesis_prompt("combine the analyses");
        let crew_id = crews.create(crew).unwrap();

        let job_id = manager.submit(crew_id, "go", ExecuteOptions::default()).unwrap();
        let job = wait_terminal(&manager, job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        let result = job.result.unwrap();
        assert!(result.output.starts_with("synthesis[synthesizer]"));
        assert_eq!(result.results.len(), 3);
        assert!(result
            .execution_log
            .iter()
            .all(|e| e.status == AgentStatus::Completed));
    }

    #[tokio::test]
    async fn test_shutdown_clears_registry() {
        let executor = Arc::new(LocalExecutor::new());
        let (manager, crews) = manager_with(executor, JobManagerConfig::default());
        let crew_id = crews
            .create(CrewDefinition::new(
                ExecutionMode::Sequential,
                vec![AgentSpec::new("a", "A")],
            ))
            .unwrap();
        let job_id = manager.submit(crew_id, "go", ExecuteOptions::default()).unwrap();
        wait_terminal(&manager, job_id).await;
        manager.shutdown();
        assert!(manager.is_empty());
        assert!(matches!(
            manager.status(job_id),
            Err(EngineError::JobNotFound(_))
        ));
    }
}
