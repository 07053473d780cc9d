//! Bounded worker pool with priority queues.
//!
//! Four bounded queues (Critical/High/Normal/Low) feed a dispatcher that
//! prefers higher priorities and hands tasks round-robin to per-worker
//! channels. Failed handlers are retried with a fixed delay until
//! `max_retries`; cancelled handlers fail without retry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::cancel::CancelToken;
use crate::errors::{Result, ScanError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    Scan,
    Report,
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub task_type: TaskType,
    pub priority: Priority,
    pub status: TaskStatus,
    /// Opaque handler input.
    pub payload: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub retries: usize,
    pub max_retries: usize,
}

impl Task {
    pub fn new(task_type: TaskType, priority: Priority) -> Self {
        Self {
            id: format!("task_{}", Uuid::new_v4()),
            task_type,
            priority,
            status: TaskStatus::Pending,
            payload: HashMap::new(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            error: None,
            retries: 0,
            max_retries: 0,
        }
    }

    pub fn with_payload(mut self, key: &str, value: &str) -> Self {
        self.payload.insert(key.to_string(), value.to_string());
        self
    }
}

pub type TaskHandler = Arc<
    dyn Fn(CancelToken, Task) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync,
>;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_workers: usize,
    pub queue_size: usize,
    pub retry_attempts: usize,
    pub retry_delay: Duration,
    /// How long `stop` waits for in-flight work before aborting it.
    pub drain_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            queue_size: 100,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            drain_grace: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub active_workers: usize,
    pub queued_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub submissions_by_type: HashMap<TaskType, usize>,
}

#[derive(Default)]
struct Counters {
    is_running: bool,
    active_workers: usize,
    queued_tasks: usize,
    completed_tasks: usize,
    failed_tasks: usize,
    submissions_by_type: HashMap<TaskType, usize>,
}

struct WorkItem {
    task: Task,
    handler: TaskHandler,
}

struct Running {
    queues: [mpsc::Sender<WorkItem>; 4],
    cancel: CancelToken,
    workers: Vec<JoinHandle<()>>,
    dispatcher: JoinHandle<()>,
}

pub struct TaskScheduler {
    config: SchedulerConfig,
    counters: Arc<Mutex<Counters>>,
    running: Mutex<Option<Running>>,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            counters: Arc::new(Mutex::new(Counters::default())),
            running: Mutex::new(None),
        }
    }

    pub fn start(&self, parent: &CancelToken) -> Result<()> {
        let mut running = self.running.lock().unwrap();
        if running.is_some() {
            return Err(ScanError::Config("scheduler already running".to_string()));
        }

        let cancel = parent.child();
        let quarter = (self.config.queue_size / 4).max(1);

        let (critical_tx, critical_rx) = mpsc::channel(quarter);
        let (high_tx, high_rx) = mpsc::channel(quarter);
        let (normal_tx, normal_rx) = mpsc::channel((self.config.queue_size / 2).max(1));
        let (low_tx, low_rx) = mpsc::channel(quarter);

        let queues = [
            critical_tx.clone(),
            high_tx.clone(),
            normal_tx.clone(),
            low_tx.clone(),
        ];

        let worker_count = self.config.max_workers.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        let mut worker_txs = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let (tx, rx) = mpsc::channel::<WorkItem>(1);
            worker_txs.push(tx);
            workers.push(self.spawn_worker(worker_id, rx, queues.clone(), cancel.clone()));
        }

        let dispatcher = self.spawn_dispatcher(
            critical_rx,
            high_rx,
            normal_rx,
            low_rx,
            worker_txs,
            cancel.clone(),
        );

        self.counters.lock().unwrap().is_running = true;
        *running = Some(Running {
            queues: [critical_tx, high_tx, normal_tx, low_tx],
            cancel,
            workers,
            dispatcher,
        });
        Ok(())
    }

    /// Cancel, drain within the grace period, then abort stragglers.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().unwrap().take() else {
            return;
        };
        running.cancel.cancel();
        drop(running.queues);

        let drain = async {
            for worker in running.workers {
                let _ = worker.await;
            }
            let _ = running.dispatcher.await;
        };
        if tokio::time::timeout(self.config.drain_grace, drain)
            .await
            .is_err()
        {
            tracing::warn!("scheduler drain grace exceeded, in-flight work aborted");
        }

        let mut counters = self.counters.lock().unwrap();
        counters.is_running = false;
        counters.active_workers = 0;
    }

    /// Submit fails fast: `QueueFull` when the priority queue is at
    /// capacity, `SchedulerStopped` when not running.
    pub fn submit(&self, mut task: Task, handler: TaskHandler) -> Result<()> {
        let running = self.running.lock().unwrap();
        let Some(running) = running.as_ref() else {
            return Err(ScanError::SchedulerStopped);
        };
        if running.cancel.is_cancelled() {
            return Err(ScanError::SchedulerStopped);
        }

        if task.max_retries == 0 {
            task.max_retries = self.config.retry_attempts;
        }
        task.status = TaskStatus::Pending;

        let queue = &running.queues[queue_index(task.priority)];
        let task_type = task.task_type;
        match queue.try_send(WorkItem { task, handler }) {
            Ok(()) => {
                let mut counters = self.counters.lock().unwrap();
                counters.queued_tasks += 1;
                *counters.submissions_by_type.entry(task_type).or_default() += 1;
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(ScanError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ScanError::SchedulerStopped),
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let counters = self.counters.lock().unwrap();
        SchedulerStatus {
            is_running: counters.is_running,
            active_workers: counters.active_workers,
            queued_tasks: counters.queued_tasks,
            completed_tasks: counters.completed_tasks,
            failed_tasks: counters.failed_tasks,
            submissions_by_type: counters.submissions_by_type.clone(),
        }
    }

    fn spawn_dispatcher(
        &self,
        mut critical: mpsc::Receiver<WorkItem>,
        mut high: mpsc::Receiver<WorkItem>,
        mut normal: mpsc::Receiver<WorkItem>,
        mut low: mpsc::Receiver<WorkItem>,
        worker_txs: Vec<mpsc::Sender<WorkItem>>,
        cancel: CancelToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut next_worker = 0usize;
            loop {
                // Biased select: higher priorities are polled first.
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    Some(item) = critical.recv() => item,
                    Some(item) = high.recv() => item,
                    Some(item) = normal.recv() => item,
                    Some(item) = low.recv() => item,
                    else => break,
                };

                let worker = &worker_txs[next_worker % worker_txs.len()];
                next_worker = next_worker.wrapping_add(1);
                if worker.send(item).await.is_err() {
                    break;
                }
            }
        })
    }

    fn spawn_worker(
        &self,
        worker_id: usize,
        mut rx: mpsc::Receiver<WorkItem>,
        queues: [mpsc::Sender<WorkItem>; 4],
        cancel: CancelToken,
    ) -> JoinHandle<()> {
        let counters = Arc::clone(&self.counters);
        let retry_delay = self.config.retry_delay;
        let scheduler_cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    _ = scheduler_cancel.cancelled() => break,
                    item = rx.recv() => match item {
                        Some(item) => item,
                        None => break,
                    },
                };
                execute_item(
                    worker_id,
                    item,
                    &queues,
                    &scheduler_cancel,
                    &counters,
                    retry_delay,
                )
                .await;
            }
        })
    }
}

fn queue_index(priority: Priority) -> usize {
    match priority {
        Priority::Critical => 0,
        Priority::High => 1,
        Priority::Normal => 2,
        Priority::Low => 3,
    }
}

/// Run one task. A retryable failure re-enqueues the task onto its
/// priority queue after the fixed delay; completed/failed counters move
/// only when the task settles for good.
async fn execute_item(
    worker_id: usize,
    item: WorkItem,
    queues: &[mpsc::Sender<WorkItem>; 4],
    cancel: &CancelToken,
    counters: &Arc<Mutex<Counters>>,
    retry_delay: Duration,
) {
    let WorkItem { mut task, handler } = item;

    {
        let mut c = counters.lock().unwrap();
        c.queued_tasks = c.queued_tasks.saturating_sub(1);
        c.active_workers += 1;
    }

    task.status = TaskStatus::Running;
    task.started_at = Some(Utc::now());

    let task_cancel = cancel.child();
    let outcome = handler(task_cancel.clone(), task.clone()).await;
    task.ended_at = Some(Utc::now());

    match outcome {
        Ok(()) => {
            task.status = TaskStatus::Completed;
            counters.lock().unwrap().completed_tasks += 1;
        }
        Err(err) => {
            task.error = Some(err.to_string());

            // Cancellation is not retried.
            if cancel.is_cancelled() || matches!(err, ScanError::Cancelled) {
                task.status = TaskStatus::Cancelled;
                counters.lock().unwrap().failed_tasks += 1;
            } else if task.retries < task.max_retries {
                task.retries += 1;
                task.status = TaskStatus::Pending;
                tracing::debug!(
                    worker = worker_id,
                    task = %task.id,
                    retry = task.retries,
                    %err,
                    "task failed, re-enqueueing"
                );

                let queue = queues[queue_index(task.priority)].clone();
                let counters = Arc::clone(counters);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(retry_delay).await;
                    let item = WorkItem { task, handler };
                    tokio::select! {
                        sent = queue.send(item) => {
                            if sent.is_ok() {
                                counters.lock().unwrap().queued_tasks += 1;
                            }
                        }
                        _ = cancel.cancelled() => {}
                    }
                });
            } else {
                task.status = TaskStatus::Failed;
                tracing::debug!(worker = worker_id, task = %task.id, %err, "task failed permanently");
                counters.lock().unwrap().failed_tasks += 1;
            }
        }
    }

    counters.lock().unwrap().active_workers -= 1;
}
