use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::FlowError;
use crate::metrics::ControllerMetrics;
use crate::Result;

type TaskFn<C> = Arc<dyn Fn(Arc<C>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct Task<C> {
    name: String,
    dependencies: Vec<String>,
    run: TaskFn<C>,
}

/// Tasks and their dependencies, not yet ordered
pub struct Graph<C> {
    name: String,
    tasks: Vec<Task<C>>,
}

impl<C: Send + Sync + 'static> Graph<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
        }
    }

    /// Add a task that runs after all of `dependencies` succeeded
    pub fn add<F, Fut>(&mut self, name: &str, dependencies: &[&str], run: F) -> &mut Self
    where
        F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.push(Task {
            name: name.to_string(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            run: Arc::new(move |ctx| Box::pin(run(ctx))),
        });
        self
    }

    /// Order the tasks into groups whose members only depend on earlier groups
    pub fn compile(self) -> std::result::Result<Flow<C>, FlowError> {
        let invalid = |reason: String| FlowError::InvalidGraph {
            flow: self.name.clone(),
            reason,
        };

        let mut index = HashMap::new();
        for (i, task) in self.tasks.iter().enumerate() {
            if index.insert(task.name.clone(), i).is_some() {
                return Err(invalid(format!("duplicate task {}", task.name)));
            }
        }

        let count = self.tasks.len();
        let mut indegree = vec![0usize; count];
        let mut dependents = vec![Vec::new(); count];
        for (i, task) in self.tasks.iter().enumerate() {
            for dependency in &task.dependencies {
                let j = *index.get(dependency).ok_or_else(|| {
                    invalid(format!("task {} depends on unknown task {}", task.name, dependency))
                })?;
                indegree[i] += 1;
                dependents[j].push(i);
            }
        }

        let mut order: Vec<Vec<usize>> = Vec::new();
        let mut ready: Vec<usize> = (0..count).filter(|&i| indegree[i] == 0).collect();
        let mut placed = 0;
        while !ready.is_empty() {
            let mut next = Vec::new();
            for &i in &ready {
                for &k in &dependents[i] {
                    indegree[k] -= 1;
                    if indegree[k] == 0 {
                        next.push(k);
                    }
                }
            }
            placed += ready.len();
            order.push(ready);
            next.sort_unstable();
            ready = next;
        }

        if placed != count {
            let cyclic: Vec<&str> = (0..count)
                .filter(|&i| indegree[i] > 0)
                .map(|i| self.tasks[i].name.as_str())
                .collect();
            return Err(invalid(format!("dependency cycle between {}", cyclic.join(", "))));
        }

        let name = self.name;
        let mut tasks: Vec<Option<Task<C>>> = self.tasks.into_iter().map(Some).collect();
        let groups = order
            .into_iter()
            .map(|group| group.into_iter().filter_map(|i| tasks[i].take()).collect())
            .collect();

        Ok(Flow { name, groups })
    }
}

/// Execution options of one flow run
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Upper bound of tasks running at the same time
    pub concurrency: usize,
    /// Deadline of a single task
    pub task_timeout: Duration,
    pub cancel: CancellationToken,
    /// Records task run times when set
    pub metrics: Option<ControllerMetrics>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            task_timeout: Duration::from_secs(15 * 60),
            cancel: CancellationToken::new(),
            metrics: None,
        }
    }
}

/// A compiled, runnable graph
pub struct Flow<C> {
    name: String,
    groups: Vec<Vec<Task<C>>>,
}

impl<C: Send + Sync + 'static> Flow<C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Task names in execution order, grouped by stage
    pub fn groups(&self) -> Vec<Vec<&str>> {
        self.groups
            .iter()
            .map(|g| g.iter().map(|t| t.name.as_str()).collect())
            .collect()
    }

    /// Run all tasks. `on_task_done` is awaited after every successful task;
    /// its failure fails the flow like a task failure. The first failure stops
    /// scheduling: tasks already running finish, later tasks are skipped.
    pub async fn run<H, HF>(
        &self,
        ctx: Arc<C>,
        options: &RunOptions,
        mut on_task_done: H,
    ) -> std::result::Result<(), FlowError>
    where
        H: FnMut(String) -> HF,
        HF: Future<Output = Result<()>>,
    {
        debug!(flow = %self.name, "Starting flow");
        let failed = AtomicBool::new(false);
        let mut first_error: Option<FlowError> = None;

        for group in &self.groups {
            if options.cancel.is_cancelled() {
                return Err(FlowError::Canceled);
            }

            let tasks: Vec<_> = group
                .iter()
                .map(|task| self.run_task(task, ctx.clone(), options, &failed))
                .collect();
            let mut results = stream::iter(tasks).buffer_unordered(options.concurrency.max(1));

            while let Some(result) = results.next().await {
                match result {
                    Ok(Some(task)) => {
                        if let Err(e) = on_task_done(task.clone()).await {
                            failed.store(true, Ordering::SeqCst);
                            first_error.get_or_insert(FlowError::Task {
                                task,
                                source: Box::new(e),
                            });
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        failed.store(true, Ordering::SeqCst);
                        first_error.get_or_insert(e);
                    }
                }
            }

            if let Some(e) = first_error.take() {
                return Err(e);
            }
        }

        debug!(flow = %self.name, "Flow finished");
        Ok(())
    }

    async fn run_task(
        &self,
        task: &Task<C>,
        ctx: Arc<C>,
        options: &RunOptions,
        failed: &AtomicBool,
    ) -> std::result::Result<Option<String>, FlowError> {
        if failed.load(Ordering::SeqCst) {
            debug!(flow = %self.name, task = %task.name, "Skipping task after earlier failure");
            return Ok(None);
        }

        debug!(flow = %self.name, task = %task.name, "Task started");
        let started = Instant::now();
        let future = (task.run)(ctx);
        let outcome = tokio::select! {
            _ = options.cancel.cancelled() => Err(FlowError::Canceled),
            result = tokio::time::timeout(options.task_timeout, future) => match result {
                Ok(Ok(())) => {
                    debug!(flow = %self.name, task = %task.name, "Task finished");
                    Ok(Some(task.name.clone()))
                }
                Ok(Err(crate::Error::Canceled)) => Err(FlowError::Canceled),
                Ok(Err(e)) => {
                    warn!(flow = %self.name, task = %task.name, error = %e, "Task failed");
                    Err(FlowError::Task {
                        task: task.name.clone(),
                        source: Box::new(e),
                    })
                }
                Err(_) => Err(FlowError::Timeout {
                    task: task.name.clone(),
                    after: options.task_timeout,
                }),
            },
        };

        if let Some(metrics) = &options.metrics {
            let result = match &outcome {
                Ok(_) => "succeeded",
                Err(FlowError::Timeout { .. }) => "timeout",
                Err(FlowError::Canceled) => "canceled",
                Err(_) => "failed",
            };
            metrics.observe_task(&self.name, &task.name, result, started.elapsed());
        }
        outcome
    }
}
