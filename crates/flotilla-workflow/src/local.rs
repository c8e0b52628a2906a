//! In-process workflow engine
//!
//! [`LocalEngine`] runs registered workflows on the tokio runtime. It
//! enforces activity timeouts and retry policies, records a per-execution
//! history and supports cancellation and continue-as-new. Executions do not
//! survive a process restart; production deployments inject a durable
//! [`WorkflowEngine`] instead.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use flotilla_common::Error;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::{ActivityInvoker, Deadline, WorkflowContext, WorkflowInfo};
use crate::engine::{StartWorkflowOptions, WorkflowEngine, WorkflowExecution};
use crate::error::{TimeoutKind, WorkflowError};
use crate::history::{ExecutionStatus, HistoryEvent, HistoryEventKind};
use crate::options::ActivityOptions;
use crate::registry::{Continuation, ErasedActivity, ErasedWorkflow, Registry};
use crate::retry::{retry_with_policy, RetryError, RetryPolicy};

/// Configuration of the local engine
#[derive(Clone, Debug)]
pub struct LocalEngineConfig {
    /// Activity attempts allowed to run at the same time
    pub max_concurrent_activities: usize,
    /// How long a timed-out workflow may keep running to compensate
    pub timeout_grace: Duration,
}

impl Default for LocalEngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_activities: 16,
            timeout_grace: Duration::from_secs(600),
        }
    }
}

struct Execution {
    workflow: String,
    cancel: CancellationToken,
    run_id: Mutex<String>,
    history: Mutex<Vec<HistoryEvent>>,
    status: watch::Sender<ExecutionStatus>,
}

impl Execution {
    fn record(&self, kind: HistoryEventKind) {
        self.history.lock().push(HistoryEvent::now(kind));
    }

    fn is_running(&self) -> bool {
        !self.status.borrow().is_terminal()
    }
}

struct Inner {
    registry: Registry,
    timeout_grace: Duration,
    slots: Arc<Semaphore>,
    executions: DashMap<String, Arc<Execution>>,
}

/// Workflow engine running executions as tokio tasks
#[derive(Clone)]
pub struct LocalEngine {
    inner: Arc<Inner>,
}

impl fmt::Debug for LocalEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEngine")
            .field("workflows", &self.inner.registry.workflow_names())
            .field("executions", &self.inner.executions.len())
            .finish()
    }
}

impl LocalEngine {
    /// Create an engine serving the registered workflows and activities
    pub fn new(registry: Registry, config: LocalEngineConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                timeout_grace: config.timeout_grace,
                slots: Arc::new(Semaphore::new(config.max_concurrent_activities)),
                executions: DashMap::new(),
            }),
        }
    }

    /// The registry this engine dispatches to
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    fn execution(&self, workflow_id: &str) -> Result<Arc<Execution>, WorkflowError> {
        self.inner
            .executions
            .get(workflow_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| WorkflowError::ExecutionNotFound {
                workflow_id: workflow_id.to_string(),
            })
    }

    /// Current status of an execution
    pub fn status(&self, workflow_id: &str) -> Result<ExecutionStatus, WorkflowError> {
        Ok(self.execution(workflow_id)?.status.borrow().clone())
    }

    /// History of the current run of an execution
    pub fn history(&self, workflow_id: &str) -> Result<Vec<HistoryEvent>, WorkflowError> {
        Ok(self.execution(workflow_id)?.history.lock().clone())
    }

    /// ID of the current run of an execution
    pub fn run_id(&self, workflow_id: &str) -> Result<String, WorkflowError> {
        Ok(self.execution(workflow_id)?.run_id.lock().clone())
    }

    /// Wait until an execution reaches a terminal status
    pub async fn wait(&self, workflow_id: &str) -> Result<ExecutionStatus, WorkflowError> {
        let execution = self.execution(workflow_id)?;
        let mut rx = execution.status.subscribe();
        loop {
            let status = rx.borrow_and_update().clone();
            if status.is_terminal() {
                return Ok(status);
            }
            rx.changed()
                .await
                .map_err(|_| WorkflowError::engine("execution status channel closed"))?;
        }
    }

    /// IDs of all known executions, sorted
    pub fn workflow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .executions
            .iter()
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Wait until no execution is running
    pub async fn wait_idle(&self) -> Result<(), WorkflowError> {
        loop {
            let running: Vec<String> = self
                .inner
                .executions
                .iter()
                .filter(|e| e.value().is_running())
                .map(|e| e.key().clone())
                .collect();
            if running.is_empty() {
                return Ok(());
            }
            for workflow_id in running {
                self.wait(&workflow_id).await?;
            }
        }
    }
}

#[async_trait]
impl WorkflowEngine for LocalEngine {
    async fn start_workflow(
        &self,
        workflow: &str,
        options: StartWorkflowOptions,
        input: Value,
    ) -> Result<WorkflowExecution, WorkflowError> {
        let handler = self.inner.registry.workflow(workflow)?;
        let workflow_id = options
            .workflow_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let run_id = Uuid::new_v4().to_string();

        let execution = Arc::new(Execution {
            workflow: workflow.to_string(),
            cancel: CancellationToken::new(),
            run_id: Mutex::new(run_id.clone()),
            history: Mutex::new(Vec::new()),
            status: watch::channel(ExecutionStatus::Running).0,
        });

        match self.inner.executions.entry(workflow_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut existing) => {
                if existing.get().is_running() {
                    return Err(WorkflowError::AlreadyStarted { workflow_id });
                }
                existing.insert(execution.clone());
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(execution.clone());
            }
        }

        info!(
            workflow = %workflow,
            workflow_id = %workflow_id,
            run_id = %run_id,
            task_list = %options.task_list,
            "workflow started"
        );

        tokio::spawn(run_execution(
            self.inner.clone(),
            execution,
            handler,
            workflow_id.clone(),
            options.execution_timeout,
            input,
        ));

        Ok(WorkflowExecution {
            workflow_id,
            run_id,
        })
    }

    async fn cancel_workflow(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        let execution = self.execution(workflow_id)?;
        if execution.is_running() {
            info!(workflow_id = %workflow_id, "workflow cancellation requested");
            execution.cancel.cancel();
        }
        Ok(())
    }
}

async fn run_execution(
    inner: Arc<Inner>,
    execution: Arc<Execution>,
    workflow: Arc<dyn ErasedWorkflow>,
    workflow_id: String,
    execution_timeout: Duration,
    input: Value,
) {
    let mut input = input;
    let status = loop {
        let run_id = execution.run_id.lock().clone();
        execution.record(HistoryEventKind::WorkflowStarted {
            workflow: execution.workflow.clone(),
            run_id: run_id.clone(),
        });

        let invoker = Arc::new(LocalInvoker {
            inner: inner.clone(),
            execution: execution.clone(),
        });
        let deadline = Deadline::default();
        let ctx = WorkflowContext::new(
            WorkflowInfo {
                workflow_name: execution.workflow.clone(),
                workflow_id: workflow_id.clone(),
                run_id,
            },
            invoker,
            execution.cancel.clone(),
        )
        .with_deadline(deadline.clone());

        let run = workflow.run(&ctx, input);
        tokio::pin!(run);

        match tokio::time::timeout(execution_timeout, &mut run).await {
            Ok(Ok(Continuation::Complete)) => {
                execution.record(HistoryEventKind::WorkflowCompleted);
                break ExecutionStatus::Completed;
            }
            Ok(Ok(Continuation::ContinueAsNew(next))) => {
                let next_run_id = Uuid::new_v4().to_string();
                execution.record(HistoryEventKind::WorkflowContinuedAsNew {
                    next_run_id: next_run_id.clone(),
                });
                debug!(
                    workflow_id = %workflow_id,
                    run_id = %next_run_id,
                    "workflow continued as new"
                );
                *execution.run_id.lock() = next_run_id;
                execution.history.lock().clear();
                input = next;
            }
            Ok(Err(e)) if e.is_canceled() => {
                execution.record(HistoryEventKind::WorkflowCanceled);
                break ExecutionStatus::Canceled;
            }
            Ok(Err(e)) => {
                warn!(workflow_id = %workflow_id, error = %e, "workflow failed");
                execution.record(HistoryEventKind::WorkflowFailed {
                    message: e.to_string(),
                });
                break ExecutionStatus::Failed(e.root_message());
            }
            Err(_) => {
                let e = WorkflowError::ExecutionTimeout {
                    workflow: execution.workflow.clone(),
                    timeout: execution_timeout,
                };
                warn!(workflow_id = %workflow_id, error = %e, "workflow timed out");

                // interrupt the run and let it compensate
                deadline.expire(execution_timeout);
                execution.cancel.cancel();
                if tokio::time::timeout(inner.timeout_grace, &mut run)
                    .await
                    .is_err()
                {
                    error!(
                        workflow_id = %workflow_id,
                        grace = ?inner.timeout_grace,
                        "timed-out workflow did not stop, abandoning it"
                    );
                }

                execution.record(HistoryEventKind::WorkflowFailed {
                    message: e.to_string(),
                });
                break ExecutionStatus::TimedOut;
            }
        }
    };

    info!(workflow_id = %workflow_id, status = ?status, "workflow finished");
    execution.status.send_replace(status);
}

/// Outcome of a single failed attempt
#[derive(Debug)]
enum AttemptError {
    Activity(Error),
    ScheduleToStart(Duration),
    StartToClose(Duration),
    Canceled,
    Engine(String),
}

impl AttemptError {
    fn is_retriable(&self, policy: &RetryPolicy) -> bool {
        match self {
            AttemptError::Activity(e) => policy.should_retry(e),
            AttemptError::StartToClose(_) => true,
            AttemptError::ScheduleToStart(_) | AttemptError::Canceled | AttemptError::Engine(_) => {
                false
            }
        }
    }

    fn into_workflow_error(self, activity: &str, attempts: u32) -> WorkflowError {
        match self {
            AttemptError::Activity(source) => WorkflowError::Activity {
                activity: activity.to_string(),
                attempts,
                source,
            },
            AttemptError::ScheduleToStart(timeout) => WorkflowError::Timeout {
                activity: activity.to_string(),
                kind: TimeoutKind::ScheduleToStart,
                timeout,
                attempts,
            },
            AttemptError::StartToClose(timeout) => WorkflowError::Timeout {
                activity: activity.to_string(),
                kind: TimeoutKind::StartToClose,
                timeout,
                attempts,
            },
            AttemptError::Canceled => WorkflowError::Canceled,
            AttemptError::Engine(message) => WorkflowError::engine(message),
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Activity(e) => write!(f, "{e}"),
            AttemptError::ScheduleToStart(t) => write!(f, "schedule-to-start timeout of {t:?}"),
            AttemptError::StartToClose(t) => write!(f, "start-to-close timeout of {t:?}"),
            AttemptError::Canceled => write!(f, "canceled"),
            AttemptError::Engine(m) => write!(f, "{m}"),
        }
    }
}

struct LocalInvoker {
    inner: Arc<Inner>,
    execution: Arc<Execution>,
}

impl LocalInvoker {
    async fn attempt(
        &self,
        name: &str,
        activity: &Arc<dyn ErasedActivity>,
        options: &ActivityOptions,
        input: &Value,
        cancel: &CancellationToken,
        attempt: u32,
    ) -> Result<Value, AttemptError> {
        let permit = match tokio::time::timeout(
            options.schedule_to_start_timeout,
            self.inner.slots.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(AttemptError::Engine("activity slots closed".to_string())),
            Err(_) => {
                return Err(AttemptError::ScheduleToStart(
                    options.schedule_to_start_timeout,
                ))
            }
        };

        self.execution.record(HistoryEventKind::ActivityScheduled {
            activity: name.to_string(),
            attempt,
        });

        let call =
            tokio::time::timeout(options.start_to_close_timeout, activity.call(input.clone()));
        let outcome = if options.wait_for_cancellation {
            call.await
        } else {
            tokio::select! {
                outcome = call => outcome,
                _ = cancel.cancelled() => {
                    self.execution.record(HistoryEventKind::ActivityFailed {
                        activity: name.to_string(),
                        attempt,
                        message: "canceled".to_string(),
                    });
                    return Err(AttemptError::Canceled);
                }
            }
        };
        drop(permit);

        match outcome {
            Ok(Ok(output)) => {
                self.execution.record(HistoryEventKind::ActivityCompleted {
                    activity: name.to_string(),
                    attempt,
                });
                Ok(output)
            }
            Ok(Err(e)) => {
                self.execution.record(HistoryEventKind::ActivityFailed {
                    activity: name.to_string(),
                    attempt,
                    message: e.to_string(),
                });
                Err(AttemptError::Activity(e))
            }
            Err(_) => {
                let err = AttemptError::StartToClose(options.start_to_close_timeout);
                self.execution.record(HistoryEventKind::ActivityFailed {
                    activity: name.to_string(),
                    attempt,
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }
}

#[async_trait]
impl ActivityInvoker for LocalInvoker {
    async fn invoke(
        &self,
        activity: &str,
        options: &ActivityOptions,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, WorkflowError> {
        let handler = self.inner.registry.activity(activity)?;
        let policy = &options.retry_policy;

        let result = retry_with_policy(
            policy,
            activity,
            cancel,
            |e: &AttemptError| e.is_retriable(policy),
            |attempt| self.attempt(activity, &handler, options, &input, cancel, attempt),
        )
        .await;

        match result {
            Ok(output) => Ok(output),
            Err(RetryError::Failed { error, attempts }) => {
                Err(error.into_workflow_error(activity, attempts))
            }
            Err(RetryError::Canceled { .. }) => Err(WorkflowError::Canceled),
        }
    }
}
