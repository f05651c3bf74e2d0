//! Priority scheduler draining queued tasks onto the backend pool.
//!
//! [`Scheduler`] is a cheap cloneable handle. Callers [`submit`] tasks from
//! anywhere; the owner spawns [`Scheduler::run`], which sleeps until work
//! arrives and then drains the queues in round-robin passes: one task from
//! every non-empty priority bucket per pass, most urgent bucket first.
//! Starved tasks are promoted at the start of each pass.
//!
//! Selection runs inside the drain loop so each choice sees the load added by
//! the previous one. Execution runs on its own tokio task.
//!
//! [`submit`]: Scheduler::submit

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::handle::{task_channel, Outcome, TaskHandle, TaskSink, TaskState};
use crate::observer::{NullObserver, SchedulerObserver, TaskInfo};
use crate::pool::{BackendPool, LoadGuard};
use crate::queue::{Entry, PriorityQueues};
use crate::relay::{relay, Relayed};
use crate::task::Task;
use crate::traits::DispatchError;

struct Pending {
    id: u64,
    task: Task,
    sink: TaskSink,
}

struct Inner {
    pool: BackendPool,
    config: SchedulerConfig,
    queues: Mutex<PriorityQueues<Pending>>,
    ready: Notify,
    shutdown: CancellationToken,
    observer: Arc<dyn SchedulerObserver>,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(pool: BackendPool, config: SchedulerConfig) -> Self {
        Self::with_observer(pool, config, Arc::new(NullObserver))
    }

    pub fn with_observer(
        pool: BackendPool,
        config: SchedulerConfig,
        observer: Arc<dyn SchedulerObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                config,
                queues: Mutex::new(PriorityQueues::new()),
                ready: Notify::new(),
                shutdown: CancellationToken::new(),
                observer,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn pool(&self) -> &BackendPool {
        &self.inner.pool
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Tasks waiting in the queues.
    pub fn pending(&self) -> usize {
        self.inner.queues().len()
    }

    /// Queue `task` and return a handle for its output. Never blocks.
    ///
    /// After [`Scheduler::shutdown`] the task ends as cancelled right away.
    pub fn submit(&self, task: Task) -> TaskHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let priority = task.priority.unwrap_or(self.inner.config.default_priority);
        let (sink, handle) = task_channel(id, self.inner.config.chunk_buffer);
        let mut queues = self.inner.queues();
        // Checked under the queue lock so `run` cannot drain in between.
        if self.inner.shutdown.is_cancelled() {
            drop(queues);
            debug!(id, "task submitted after shutdown");
            let meta = TaskInfo {
                id,
                method: task.method(),
                priority,
                waited: Duration::ZERO,
            };
            self.inner.finish(&meta, sink, Outcome::Cancelled);
            return handle;
        }
        debug!(id, method = %task.method(), %priority, "task queued");
        queues.push(Pending { id, task, sink }, priority, Instant::now());
        drop(queues);
        self.inner.ready.notify_one();
        handle
    }

    /// Drain queues until [`Scheduler::shutdown`] is called.
    ///
    /// Tasks still queued at shutdown end as cancelled.
    pub async fn run(&self) {
        info!("scheduler started");
        loop {
            if self.inner.shutdown.is_cancelled() {
                break;
            }
            if self.drain_once().await > 0 {
                continue;
            }
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                _ = self.inner.ready.notified() => {}
            }
        }
        let abandoned = self.inner.queues().drain_all();
        for entry in abandoned {
            entry.item.sink.finish(Outcome::Cancelled);
        }
        info!("scheduler stopped");
    }

    /// Spawn [`Scheduler::run`] on the current runtime.
    pub fn spawn(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run().await })
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Run one round-robin pass and return how many tasks left the queues.
    pub async fn drain_once(&self) -> usize {
        let pass = {
            let mut queues = self.inner.queues();
            let promoted =
                queues.promote_starved(Instant::now(), self.inner.config.starvation_threshold());
            if promoted > 0 {
                debug!(promoted, "promoted starved tasks");
            }
            queues.next_pass()
        };
        let popped = pass.len();
        for entry in pass {
            self.dispatch(entry).await;
        }
        popped
    }

    async fn dispatch(&self, entry: Entry<Pending>) {
        let Entry {
            item: Pending { id, task, sink },
            priority,
            enqueued_at,
            ..
        } = entry;
        let meta = TaskInfo {
            id,
            method: task.method(),
            priority,
            waited: enqueued_at.elapsed(),
        };

        if sink.is_cancelled() {
            debug!(id, "task cancelled while queued");
            self.inner.finish(&meta, sink, Outcome::Cancelled);
            return;
        }

        match self.inner.pool.select_backend(&task.constraints, &[]).await {
            Ok(selection) => {
                for skipped in &selection.skipped {
                    self.inner.report(&meta, skipped);
                }
                sink.transition(TaskState::Assigned);
                let guard = selection.backend.begin();
                info!(
                    id,
                    method = %meta.method,
                    %priority,
                    backend = %selection.backend.name(),
                    model = %selection.model,
                    waited = ?meta.waited,
                    "task dispatched"
                );
                self.inner
                    .observer
                    .on_dispatch(&meta, selection.backend.name(), &selection.model);
                let inner = Arc::clone(&self.inner);
                tokio::spawn(inner.execute(meta, task, sink, guard, selection.model));
            }
            Err(e) => {
                self.inner.report(&meta, &e);
                self.inner.finish(&meta, sink, Outcome::Failed(e));
            }
        }
    }
}

impl Inner {
    fn queues(&self) -> MutexGuard<'_, PriorityQueues<Pending>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, meta: &TaskInfo, error: &DispatchError) {
        warn!(
            id = meta.id,
            method = %meta.method,
            priority = %meta.priority,
            waited = ?meta.waited,
            %error,
            "task error"
        );
        self.observer.on_error(meta, error);
    }

    fn finish(&self, meta: &TaskInfo, sink: TaskSink, outcome: Outcome) {
        let state = outcome.state();
        sink.finish(outcome);
        debug!(id = meta.id, ?state, "task finished");
        self.observer.on_finish(meta, state);
    }

    async fn execute(
        self: Arc<Self>,
        meta: TaskInfo,
        task: Task,
        mut sink: TaskSink,
        mut guard: LoadGuard,
        mut model: String,
    ) {
        sink.transition(TaskState::Executing);
        let timeout = self.config.execution_timeout();
        let mut tried = Vec::new();
        loop {
            let backend = Arc::clone(guard.backend());
            tried.push(backend.name().to_string());
            let relayed = relay(backend.client(), &model, &task.input, &mut sink, timeout).await;
            drop(guard);
            match relayed {
                Relayed::Completed(output) => {
                    backend.record_outcome(&task.constraints.required, true);
                    self.finish(&meta, sink, Outcome::Completed(output));
                    return;
                }
                Relayed::Cancelled => {
                    self.finish(&meta, sink, Outcome::Cancelled);
                    return;
                }
                Relayed::Failed { error, emitted } => {
                    backend.record_outcome(&task.constraints.required, false);
                    self.report(&meta, &error);
                    let attempt = tried.len();
                    if emitted > 0 || attempt > self.config.retry_limit || sink.is_cancelled() {
                        self.finish(&meta, sink, Outcome::Failed(error));
                        return;
                    }
                    match self.pool.select_backend(&task.constraints, &tried).await {
                        Ok(selection) => {
                            info!(
                                id = meta.id,
                                attempt,
                                backend = %selection.backend.name(),
                                model = %selection.model,
                                "retrying task on another backend"
                            );
                            self.observer.on_dispatch(
                                &meta,
                                selection.backend.name(),
                                &selection.model,
                            );
                            guard = selection.backend.begin();
                            model = selection.model;
                        }
                        Err(e) => {
                            debug!(id = meta.id, error = %e, "no backend left for retry");
                            self.finish(&meta, sink, Outcome::Failed(error));
                            return;
                        }
                    }
                }
            }
        }
    }
}
