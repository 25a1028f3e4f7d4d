use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{stream, StreamExt};
use shared::adapter::{
    AdapterError, AdapterRegistry, DecimalsMemo, FetchContext,
};
use shared::error::{CallError, ErrorClass, PoolError};
use shared::network::NetworkTable;
use shared::pool::ConnectionPool;
use shared::resolver::ResolveError;
use shared::retry::{Classified, RetryPolicy};
use shared::scanner::ScanConfig;
use thiserror::Error;

use crate::checkpoint::CheckpointBuffer;
use crate::entities::EntityRegistry;
use crate::output::{OutputWriter, TaskOutput};
use crate::snapshots::Snapshots;
use crate::task::{Plan, TaskId, TaskState};
use crate::valuation::Valuation;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("entity {0} is not configured")]
    UnknownEntity(String),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Call(#[from] CallError),
    #[error("{failed} block window(s) could not be scanned, first: {first}")]
    IncompleteScan { failed: usize, first: String },
    #[error("cannot write output: {0}")]
    Output(String),
}

impl Classified for TaskError {
    fn class(&self) -> ErrorClass {
        match self {
            TaskError::Resolve(error) => error.class(),
            TaskError::Call(error) => error.class(),
            // The scanner gave up on windows after its own retries, a later
            // attempt usually gets through.
            TaskError::IncompleteScan { .. } => ErrorClass::Transient,
            TaskError::UnknownEntity(_) | TaskError::Adapter(_) => {
                ErrorClass::Configuration
            }
            TaskError::Output(_) => ErrorClass::Terminal,
        }
    }
}

/// Result of a run, on top of what the checkpoint records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub completed: usize,
    pub failed: Vec<(TaskId, String)>,
    pub already_complete: usize,
    pub before_deployment: usize,
    /// Tasks not started because the run was interrupted.
    pub interrupted: usize,
}

impl Summary {
    pub fn print(&self) {
        println!(
            "completed: {}, failed: {}, skipped: {} (already complete: {}, \
             before deployment: {}), interrupted: {}",
            self.completed,
            self.failed.len(),
            self.already_complete + self.before_deployment,
            self.already_complete,
            self.before_deployment,
            self.interrupted
        );
        for (task, error) in &self.failed {
            println!("  {task}: {error}");
        }
    }
}

/// Runs planned tasks over a bounded number of concurrent workers.
pub struct Orchestrator<'a> {
    pub pool: &'a ConnectionPool,
    pub table: &'a NetworkTable,
    pub adapters: &'a AdapterRegistry,
    pub entities: &'a EntityRegistry,
    pub snapshots: &'a Snapshots<'a>,
    pub checkpoint: &'a CheckpointBuffer,
    pub writer: &'a OutputWriter,
    pub valuation: Option<&'a Valuation>,
    /// Retries of single calls and scan windows.
    pub call_policy: RetryPolicy,
    /// Retries of whole tasks.
    pub task_policy: RetryPolicy,
    pub workers: usize,
    pub must_exit: Arc<AtomicBool>,
    pub decimals: DecimalsMemo,
}

impl Orchestrator<'_> {
    async fn execute(&self, task: &TaskId) -> Result<TaskOutput, TaskError> {
        let entity = self
            .entities
            .get(&task.entity)
            .ok_or_else(|| TaskError::UnknownEntity(task.entity.clone()))?;
        let adapter = self.adapters.get(&entity.protocol)?;
        let targets = adapter.resolve_targets(entity)?;

        let network = self.table.canonical(&entity.network);
        let settings = self.table.settings(&network).ok_or_else(|| {
            CallError::from(PoolError::UnknownNetwork(network.clone()))
        })?;

        let snapshot = self.snapshots.snapshot(&network, task.date).await?;
        tracing::debug!(
            task = %task,
            block = snapshot.entry.block,
            first_block = snapshot.first_block,
            "Snapshot resolved"
        );

        let ctx = FetchContext {
            pool: self.pool,
            network: &network,
            scan: ScanConfig::for_network(settings, self.call_policy),
            policy: self.call_policy,
            decimals: &self.decimals,
        };
        let fetched = adapter.fetch(&ctx, entity, &targets, &snapshot).await?;

        if let Some(first) = fetched.failed_windows.first() {
            return Err(TaskError::IncompleteScan {
                failed: fetched.failed_windows.len(),
                first: first.to_string(),
            });
        }

        let mut output = TaskOutput::new(entity, &network, &snapshot);
        for raw in &fetched.records {
            match adapter.decode(raw) {
                Ok(mut fields) => {
                    if let Some(valuation) = self.valuation {
                        valuation.apply(
                            &network,
                            snapshot.entry.timestamp,
                            &mut fields,
                        );
                    }
                    output.push(raw, fields);
                }
                Err(error) => {
                    tracing::warn!(
                        task = %task,
                        block = raw.block,
                        %error,
                        "Dropping undecodable record"
                    );
                    output.undecodable += 1;
                }
            }
        }

        self.writer
            .write(entity, &output)
            .map_err(|e| TaskError::Output(format!("{e:#}")))?;

        Ok(output)
    }

    /// Runs every task of `plan`, recording each outcome in the checkpoint,
    /// which is flushed once more at the end.
    pub async fn run(&self, plan: Plan) -> anyhow::Result<Summary> {
        let mut summary = Summary {
            already_complete: plan.already_complete,
            before_deployment: plan.before_deployment,
            ..Summary::default()
        };
        let total = plan.tasks.len();
        tracing::info!(
            tasks = total,
            workers = self.workers,
            state = %TaskState::Pending,
            "Starting run"
        );

        let mut results = stream::iter(plan.tasks)
            .map(|task| async move {
                if self.must_exit.load(Ordering::Relaxed) {
                    return (task, None);
                }

                tracing::debug!(
                    task = %task,
                    state = %TaskState::Running,
                    "Task started"
                );
                let label = task.to_string();
                let result = self
                    .task_policy
                    .run(&label, || self.execute(&task))
                    .await;
                (task, Some(result))
            })
            .buffer_unordered(self.workers.max(1));

        let mut done = 0;
        while let Some((task, result)) = results.next().await {
            done += 1;
            match result {
                None => summary.interrupted += 1,
                Some(Ok(output)) => {
                    tracing::info!(
                        task = %task,
                        state = %TaskState::Completed,
                        records = output.records.len(),
                        progress = %format!("{done}/{total}"),
                        "Task done"
                    );
                    self.checkpoint.complete(task)?;
                    summary.completed += 1;
                }
                Some(Err(error)) => {
                    tracing::warn!(
                        task = %task,
                        state = %TaskState::Failed,
                        %error,
                        progress = %format!("{done}/{total}"),
                        "Task failed"
                    );
                    let error = error.to_string();
                    self.checkpoint.fail(task.clone(), error.clone())?;
                    summary.failed.push((task, error));
                }
            }
        }

        self.checkpoint.flush()?;
        summary.failed.sort();

        Ok(summary)
    }
}
