//! Poll loop for submitted scan jobs.
//!
//! A [`PollingScheduler`] owns a single active-task slot. [`PollingScheduler::begin`]
//! cancels whatever was being polled, installs the new task and spawns a tokio task
//! that queries the backend on a fixed period until the job reaches a terminal state.
//!
//! Event delivery and cancellation both happen under the slot lock, so once
//! [`PollHandle::cancel`] returns (or a newer `begin` replaced the task) no event for
//! the old task can reach the observer, even if its status query was in flight.

use std::sync::Arc;
use std::time::Duration;

use ::time::OffsetDateTime;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ScanBackend, ScanStatus, StatusResponse};
use crate::error::{BackendError, PollError};
use crate::types::{RawScanResult, ScanTask, TaskState};

/// Period between two status queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Shortest period the poll loop will run with.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What the poll loop reports about a task.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Progress {
        task_id: String,
        elapsed_secs: f64,
    },
    Completed {
        task_id: String,
        results: Vec<RawScanResult>,
        duration_secs: f64,
    },
    Failed {
        task_id: String,
        error: PollError,
    },
}

impl PollEvent {
    pub fn task_id(&self) -> &str {
        match self {
            PollEvent::Progress { task_id, .. }
            | PollEvent::Completed { task_id, .. }
            | PollEvent::Failed { task_id, .. } => task_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollEvent::Progress { .. })
    }
}

/// Receives poll events.
///
/// Called while the scheduler's slot lock is held: implementations must not call
/// back into the scheduler or a [`PollHandle`] synchronously.
pub trait PollObserver: Send + Sync {
    fn notify(&self, event: PollEvent);
}

impl PollObserver for mpsc::UnboundedSender<PollEvent> {
    fn notify(&self, event: PollEvent) {
        // A dropped receiver means nobody is listening anymore.
        let _ = self.send(event);
    }
}

#[derive(Debug)]
struct ActivePoll {
    generation: u64,
    task: ScanTask,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct Slot {
    next_generation: u64,
    active: Option<ActivePoll>,
    last: Option<ScanTask>,
}

/// Drives the status-query loop of at most one task at a time.
pub struct PollingScheduler {
    backend: Arc<dyn ScanBackend>,
    observer: Arc<dyn PollObserver>,
    period: Duration,
    slot: Arc<Mutex<Slot>>,
}

impl PollingScheduler {
    pub fn new(backend: Arc<dyn ScanBackend>, observer: Arc<dyn PollObserver>) -> Self {
        Self {
            backend,
            observer,
            period: DEFAULT_POLL_INTERVAL,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    /// Set the query period. Periods shorter than [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start polling `task_id`, cancelling any poll already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn begin(&self, task_id: impl Into<String>) -> PollHandle {
        let task = ScanTask::starting(task_id);
        let cancel = CancellationToken::new();

        let generation = {
            let mut slot = self.slot.lock();
            if let Some(prev) = slot.active.take() {
                prev.cancel.cancel();
                info!(task_id = %prev.task.id, "poll replaced by a new scan");
            }
            slot.next_generation += 1;
            let generation = slot.next_generation;
            slot.active = Some(ActivePoll {
                generation,
                task: task.clone(),
                cancel: cancel.clone(),
            });
            generation
        };

        let ctx = PollContext {
            task_id: task.id.clone(),
            submitted_at: task.submitted_at,
            generation,
            cancel: cancel.clone(),
            slot: Arc::clone(&self.slot),
            observer: Arc::clone(&self.observer),
        };
        tokio::spawn(ctx.run(Arc::clone(&self.backend), self.period));
        debug!(task_id = %task.id, period_ms = self.period.as_millis() as u64, "polling started");

        PollHandle {
            task_id: task.id,
            generation,
            cancel,
            slot: Arc::clone(&self.slot),
        }
    }

    /// Stop whatever is being polled. No-op when idle.
    pub fn cancel_active(&self) {
        let mut slot = self.slot.lock();
        if let Some(prev) = slot.active.take() {
            prev.cancel.cancel();
            debug!(task_id = %prev.task.id, "poll cancelled");
        }
    }

    /// State of the active task, else of the last finished one, else `Idle`.
    pub fn state(&self) -> TaskState {
        let slot = self.slot.lock();
        slot.active
            .as_ref()
            .map(|a| a.task.state)
            .or_else(|| slot.last.as_ref().map(|t| t.state))
            .unwrap_or(TaskState::Idle)
    }

    pub fn active_task(&self) -> Option<ScanTask> {
        self.slot.lock().active.as_ref().map(|a| a.task.clone())
    }

    /// The most recent task that reached `Completed` or `Failed`.
    pub fn last_task(&self) -> Option<ScanTask> {
        self.slot.lock().last.clone()
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.cancel_active();
    }
}

/// Handle to one poll loop started by [`PollingScheduler::begin`].
#[derive(Debug, Clone)]
pub struct PollHandle {
    task_id: String,
    generation: u64,
    cancel: CancellationToken,
    slot: Arc<Mutex<Slot>>,
}

impl PollHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Stop polling this task. Idempotent; never affects a task that replaced it.
    pub fn cancel(&self) {
        let mut slot = self.slot.lock();
        self.cancel.cancel();
        if slot
            .active
            .as_ref()
            .is_some_and(|a| a.generation == self.generation)
        {
            slot.active = None;
            debug!(task_id = %self.task_id, "poll cancelled");
        }
    }

    /// Whether the loop is still running (not cancelled, replaced or finished).
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Resolves once the loop has stopped for any reason.
    pub async fn stopped(&self) {
        self.cancel.cancelled().await
    }
}

struct PollContext {
    task_id: String,
    submitted_at: OffsetDateTime,
    generation: u64,
    cancel: CancellationToken,
    slot: Arc<Mutex<Slot>>,
    observer: Arc<dyn PollObserver>,
}

impl PollContext {
    async fn run(self, backend: Arc<dyn ScanBackend>, period: Duration) {
        // Both the first and the second deadline must be representable.
        let first_tick = Instant::now()
            .checked_add(period)
            .filter(|start| start.checked_add(period).is_some());
        let Some(start) = first_tick else {
            self.fail(PollError::Query(format!(
                "poll period of {}s is out of range",
                period.as_secs()
            )));
            return;
        };
        let mut ticker = time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let response = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                res = backend.scan_status(&self.task_id) => res,
            };

            if !self.handle(response) {
                break;
            }
        }
        debug!(task_id = %self.task_id, "poll loop stopped");
    }

    /// Turn one status response into an event. Returns whether to keep polling.
    fn handle(&self, response: Result<StatusResponse, BackendError>) -> bool {
        let status = match response {
            Ok(status) => status,
            Err(e) => return self.fail(PollError::Query(e.detail().to_string())),
        };

        match status.scan_status() {
            ScanStatus::Running => {
                let elapsed_secs = self.elapsed_secs(status.submitted_at_epoch_secs);
                debug!(task_id = %self.task_id, elapsed_secs, "scan running");
                self.deliver(
                    PollEvent::Progress {
                        task_id: self.task_id.clone(),
                        elapsed_secs,
                    },
                    TaskState::Running,
                )
            }
            ScanStatus::Completed => {
                let results = status.results.unwrap_or_default();
                let duration_secs = status.duration_secs.unwrap_or(0.0);
                info!(task_id = %self.task_id, hosts = results.len(), duration_secs, "scan completed");
                self.deliver(
                    PollEvent::Completed {
                        task_id: self.task_id.clone(),
                        results,
                        duration_secs,
                    },
                    TaskState::Completed,
                );
                false
            }
            ScanStatus::Failed => {
                let detail = status.error.unwrap_or_else(|| "scan failed".to_string());
                self.fail(PollError::Query(detail))
            }
            ScanStatus::Unknown(value) => self.fail(PollError::ProtocolViolation(value)),
        }
    }

    fn fail(&self, error: PollError) -> bool {
        warn!(task_id = %self.task_id, %error, "polling stopped");
        self.deliver(
            PollEvent::Failed {
                task_id: self.task_id.clone(),
                error,
            },
            TaskState::Failed,
        );
        false
    }

    /// Record the new state and notify the observer, unless this task was
    /// cancelled or replaced. Terminal states clear the active slot.
    fn deliver(&self, event: PollEvent, next: TaskState) -> bool {
        let mut slot = self.slot.lock();
        if self.cancel.is_cancelled() {
            return false;
        }
        match slot.active.as_mut() {
            Some(active) if active.generation == self.generation => active.task.state = next,
            _ => return false,
        }
        if next.is_terminal() {
            self.cancel.cancel();
            let finished = slot.active.take();
            slot.last = finished.map(|a| a.task);
        }
        self.observer.notify(event);
        true
    }

    fn elapsed_secs(&self, reported_start: Option<f64>) -> f64 {
        let now = OffsetDateTime::now_utc();
        let now_secs = now.unix_timestamp_nanos() as f64 / 1e9;
        let start = reported_start
            .unwrap_or_else(|| self.submitted_at.unix_timestamp_nanos() as f64 / 1e9);
        (now_secs - start).max(0.0)
    }
}
