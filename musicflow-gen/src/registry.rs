//! Task registry and worker pool
//!
//! Owns every task for its entire life and the track store it feeds. The
//! registry enforces per-track exclusivity through its own bookkeeping (the
//! `active` map), not through the pool: workers for *different* track names
//! run fully in parallel, but a name never has two live tasks.
//!
//! # Locking
//! One mutex guards all bookkeeping (task map, active map, track store,
//! callback/token side-tables). It is held only for map updates and is never
//! held across the collaborator call, which may block for seconds. Callbacks
//! and event emission always happen after the lock is released.
//!
//! # Cancellation
//! Best-effort and non-preemptive. A PENDING task is reliably stopped before
//! it starts (the worker re-checks status under the lock). A GENERATING task
//! only gets its token cancelled; if the collaborator ignores it, the
//! worker's late terminal write is detected against the already-terminal
//! status and discarded, so cancel-then-complete races resolve to CANCELLED.

use crate::generator::{GenerationRequest, TrackGenerator};
use crate::normalize::normalize_clip;
use crate::task::{Task, TaskCallback, TaskId, TaskOutcome, TaskStatus, TaskSummary};
use chrono::Utc;
use musicflow_common::events::{EventBus, FlowEvent};
use musicflow_common::{Error, Result, Track};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Registry tuning knobs
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Number of concurrent generation workers
    pub worker_count: usize,

    /// Age after which terminal tasks drop out of the default list view.
    /// Tasks are never evicted from storage, only filtered.
    pub retention: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            retention: Duration::from_secs(300),
        }
    }
}

/// Bookkeeping guarded by the registry mutex
#[derive(Default)]
struct RegistryInner {
    /// Every task ever accepted, by id (unbounded retention by design)
    tasks: HashMap<TaskId, Task>,

    /// Task ids in submission order, for stable list views
    order: Vec<TaskId>,

    /// Track name → the one task currently PENDING or GENERATING for it
    active: HashMap<String, TaskId>,

    /// Latest accepted track per name, replaced wholesale on success
    tracks: HashMap<String, Track>,

    /// Callbacks by task id; removed (and invoked outside the lock) at the
    /// terminal transition, or dropped on cancel
    callbacks: HashMap<TaskId, TaskCallback>,

    /// Cooperative cancellation tokens for live tasks
    cancel_tokens: HashMap<TaskId, CancellationToken>,

    /// Cleared by shutdown; submissions are rejected afterwards
    accepting: bool,
}

/// Task registry and scheduler
///
/// Create with [`TaskRegistry::new`] inside a tokio runtime; the worker pool
/// is spawned immediately and pulls queued tasks first-submitted,
/// first-served per available worker.
pub struct TaskRegistry {
    inner: Mutex<RegistryInner>,
    generator: Arc<dyn TrackGenerator>,
    event_bus: EventBus,
    retention: chrono::Duration,
    queue_tx: mpsc::UnboundedSender<TaskId>,
    shutdown_token: CancellationToken,
}

impl TaskRegistry {
    /// Start the registry and its worker pool
    pub fn new(
        generator: Arc<dyn TrackGenerator>,
        event_bus: EventBus,
        config: RegistryConfig,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let worker_count = config.worker_count.max(1);

        let registry = Arc::new(Self {
            inner: Mutex::new(RegistryInner {
                accepting: true,
                ..RegistryInner::default()
            }),
            generator,
            event_bus,
            retention: chrono::Duration::from_std(config.retention)
                .unwrap_or_else(|_| chrono::Duration::seconds(300)),
            queue_tx,
            shutdown_token: CancellationToken::new(),
        });

        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        for worker_id in 0..worker_count {
            let registry = Arc::clone(&registry);
            let queue_rx = Arc::clone(&queue_rx);
            tokio::spawn(async move {
                Self::worker_loop(worker_id, registry, queue_rx).await;
            });
        }

        info!(worker_count, "Task registry started");
        registry
    }

    /// Accept a generation or update request for `track_name`
    ///
    /// Non-blocking: the returned id refers to a PENDING task already queued
    /// on the pool. If a task is already active for the name the **existing**
    /// id is returned and the supplied callback is dropped — at-most-one
    /// callback per active task, the original requester's.
    ///
    /// Updates fail fast with [`Error::NotFound`] when the named track does
    /// not exist *and* no task is active for the name (an update racing the
    /// name's first generation coalesces onto it instead); on the fast-fail
    /// path no task is created, the collaborator is never called, and the
    /// supplied callback is invoked synchronously with the failure.
    pub fn submit(
        &self,
        track_name: &str,
        prompt: &str,
        is_update: bool,
        callback: Option<TaskCallback>,
    ) -> Result<TaskId> {
        if is_update && track_name.is_empty() {
            return Err(Error::InvalidInput(
                "Update requires a track name".to_string(),
            ));
        }

        let mut inner = self.inner.lock().unwrap();

        if !inner.accepting {
            drop(inner);
            if let Some(cb) = callback {
                cb(TaskOutcome::Failed("Registry is shutting down".to_string()));
            }
            return Err(Error::ShuttingDown);
        }

        // Coalescing: a second submission while one is active does not
        // queue. Checked before the update precondition so an update arriving
        // while the first generation for the name is still in flight joins
        // that task instead of failing on the not-yet-stored track.
        if let Some(existing) = inner.active.get(track_name).cloned() {
            drop(inner);
            info!(
                task_id = %existing,
                track = %track_name,
                "Coalescing submission onto active task"
            );
            return Ok(existing);
        }

        if is_update && !inner.tracks.contains_key(track_name) {
            drop(inner);
            let message = format!("Track '{}' does not exist", track_name);
            warn!(track = %track_name, "Rejecting update for unknown track");
            if let Some(cb) = callback {
                cb(TaskOutcome::Failed(message.clone()));
            }
            return Err(Error::NotFound(message));
        }

        let task = Task::new(track_name.to_string(), prompt.to_string(), is_update);
        let task_id = task.task_id.clone();

        inner.order.push(task_id.clone());
        inner.active.insert(track_name.to_string(), task_id.clone());
        inner
            .cancel_tokens
            .insert(task_id.clone(), CancellationToken::new());
        if let Some(cb) = callback {
            inner.callbacks.insert(task_id.clone(), cb);
        }
        inner.tasks.insert(task_id.clone(), task);
        drop(inner);

        info!(task_id = %task_id, track = %track_name, is_update, "Task submitted");
        // Emitted before queueing so subscribers see Submitted before Started
        self.event_bus.emit_lossy(FlowEvent::TaskSubmitted {
            task_id: task_id.to_string(),
            track_name: track_name.to_string(),
            is_update,
            timestamp: Utc::now(),
        });

        // A closed queue only happens after shutdown won the race above, in
        // which case the task was already marked cancelled there.
        let _ = self.queue_tx.send(task_id.clone());

        Ok(task_id)
    }

    /// Snapshot of a task, if known
    pub fn get(&self, task_id: &TaskId) -> Option<Task> {
        self.inner.lock().unwrap().tasks.get(task_id).cloned()
    }

    /// Latest accepted track for `name`, if any
    pub fn track(&self, name: &str) -> Option<Track> {
        self.inner.lock().unwrap().tracks.get(name).cloned()
    }

    /// Names of all stored tracks, sorted
    pub fn track_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().unwrap().tracks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Task summaries in submission order
    ///
    /// The default view hides terminal tasks whose `ended_at` is older than
    /// the retention window; `include_completed` bypasses the age filter.
    /// Nothing is ever evicted from storage.
    pub fn list(&self, include_completed: bool) -> Vec<TaskSummary> {
        let now = Utc::now();
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|id| inner.tasks.get(id))
            .filter(|task| {
                if task.status.is_active() || include_completed {
                    return true;
                }
                match task.ended_at {
                    Some(ended_at) => now - ended_at <= self.retention,
                    None => true,
                }
            })
            .map(Task::summary)
            .collect()
    }

    /// Cancel a task
    ///
    /// Returns true only when the task was PENDING or GENERATING: the task is
    /// marked CANCELLED immediately and its token cancelled. A collaborator
    /// call already in flight is asked to stop but not guaranteed to; its
    /// late terminal write will be discarded. Cancelling a terminal task
    /// returns false and changes nothing.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        let track_name = {
            let mut inner = self.inner.lock().unwrap();
            let Some(task) = inner.tasks.get_mut(task_id) else {
                return false;
            };
            if task.status.is_terminal() {
                return false;
            }

            task.status = TaskStatus::Cancelled;
            task.ended_at = Some(Utc::now());
            let track_name = task.track_name.clone();

            if inner.active.get(&track_name) == Some(task_id) {
                inner.active.remove(&track_name);
            }
            if let Some(token) = inner.cancel_tokens.remove(task_id) {
                token.cancel();
            }
            // The callback is dropped, never invoked, for cancelled tasks
            inner.callbacks.remove(task_id);
            track_name
        };

        info!(task_id = %task_id, track = %track_name, "Task cancelled");
        self.event_bus.emit_lossy(FlowEvent::TaskCancelled {
            task_id: task_id.to_string(),
            track_name,
            timestamp: Utc::now(),
        });
        true
    }

    /// Stop accepting submissions and cancel every live task
    ///
    /// Idempotent. In-flight collaborator calls are not drained: their tokens
    /// are cancelled, idle workers exit, and any late terminal writes are
    /// discarded against the CANCELLED status.
    pub fn shutdown(&self) {
        let cancelled: Vec<(TaskId, String)> = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.accepting {
                return;
            }
            inner.accepting = false;

            let now = Utc::now();
            let mut cancelled = Vec::new();
            for task in inner.tasks.values_mut() {
                if task.status.is_active() {
                    task.status = TaskStatus::Cancelled;
                    task.ended_at = Some(now);
                    cancelled.push((task.task_id.clone(), task.track_name.clone()));
                }
            }
            inner.active.clear();
            for (_, token) in inner.cancel_tokens.drain() {
                token.cancel();
            }
            inner.callbacks.clear();
            cancelled
        };

        self.shutdown_token.cancel();

        for (task_id, track_name) in cancelled {
            self.event_bus.emit_lossy(FlowEvent::TaskCancelled {
                task_id: task_id.to_string(),
                track_name,
                timestamp: Utc::now(),
            });
        }
        info!("Task registry shut down");
    }

    /// True once [`shutdown`](Self::shutdown) has run
    pub fn is_shutdown(&self) -> bool {
        !self.inner.lock().unwrap().accepting
    }

    /// Worker main loop: pull the next queued task, run it, repeat
    async fn worker_loop(
        worker_id: usize,
        registry: Arc<TaskRegistry>,
        queue_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<TaskId>>>,
    ) {
        debug!(worker_id, "Worker started");
        loop {
            let task_id = {
                let mut rx = queue_rx.lock().await;
                tokio::select! {
                    _ = registry.shutdown_token.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(task_id) => task_id,
                        None => break,
                    },
                }
            };
            registry.run_task(worker_id, task_id).await;
        }
        debug!(worker_id, "Worker exiting");
    }

    /// Execute one task: transition to GENERATING, call the collaborator,
    /// normalize the result, and post the terminal outcome
    async fn run_task(&self, worker_id: usize, task_id: TaskId) {
        let (request, cancel) = {
            let mut inner = self.inner.lock().unwrap();
            let Some(task) = inner.tasks.get_mut(&task_id) else {
                return;
            };
            // Cancelled (or shutdown) while queued: nothing to do
            if task.status != TaskStatus::Pending {
                debug!(task_id = %task_id, status = ?task.status, "Skipping task no longer pending");
                return;
            }
            task.status = TaskStatus::Generating;
            let request = GenerationRequest {
                track_name: task.track_name.clone(),
                prompt: task.prompt.clone(),
                is_update: task.is_update,
            };
            let cancel = inner
                .cancel_tokens
                .get(&task_id)
                .cloned()
                .unwrap_or_default();
            (request, cancel)
        };

        info!(
            worker_id,
            task_id = %task_id,
            track = %request.track_name,
            "Worker generating track"
        );
        self.event_bus.emit_lossy(FlowEvent::TaskStarted {
            task_id: task_id.to_string(),
            track_name: request.track_name.clone(),
            timestamp: Utc::now(),
        });

        // The blocking part: never under the lock
        let generated = self.generator.generate(request.clone(), cancel).await;

        match generated {
            Ok(generated) => {
                let bars = generated.clip_length_bars.max(1);
                let beats_per_bar = generated.time_signature.beats_per_bar().max(1);
                let normalized = normalize_clip(&generated.notes, bars, beats_per_bar);

                if normalized.sparse {
                    warn!(
                        task_id = %task_id,
                        track = %request.track_name,
                        empty_bars = ?normalized.empty_bars,
                        "Generated clip is sparse"
                    );
                }
                if normalized.long {
                    warn!(
                        task_id = %task_id,
                        track = %request.track_name,
                        "Generated clip is overlong; keeping all notes"
                    );
                }

                let conformance = normalized.conformance();
                let mut track = Track::from_generated(&request.track_name, &generated);
                track.clip_length_bars = bars;
                track.notes = normalized.notes;

                self.complete(&task_id, TaskOutcome::Completed(track), Some(conformance));
            }
            Err(e) => {
                self.complete(&task_id, TaskOutcome::Failed(e.to_string()), None);
            }
        }
    }

    /// Single atomic completion path
    ///
    /// Under one lock acquisition: write the terminal status and `ended_at`,
    /// store result or error, clear the active marker, replace the stored
    /// track on success, and take the callback. The callback and event run
    /// after the lock is released so a slow callback cannot block the
    /// registry. A task already terminal (cancelled meanwhile) discards the
    /// write — the forward-only state machine is the stale-write guard.
    fn complete(
        &self,
        task_id: &TaskId,
        outcome: TaskOutcome,
        conformance: Option<crate::normalize::ClipConformance>,
    ) {
        let (callback, track_name) = {
            let mut inner = self.inner.lock().unwrap();
            let Some(task) = inner.tasks.get_mut(task_id) else {
                return;
            };
            if task.status.is_terminal() {
                warn!(
                    task_id = %task_id,
                    status = ?task.status,
                    "Discarding late terminal write for already-terminal task"
                );
                return;
            }

            task.ended_at = Some(Utc::now());
            match &outcome {
                TaskOutcome::Completed(track) => {
                    task.status = TaskStatus::Completed;
                    task.result = Some(track.clone());
                    task.conformance = conformance;
                }
                TaskOutcome::Failed(error) => {
                    task.status = TaskStatus::Failed;
                    task.error = Some(error.clone());
                }
            }
            let track_name = task.track_name.clone();

            if inner.active.get(&track_name) == Some(task_id) {
                inner.active.remove(&track_name);
            }
            if let TaskOutcome::Completed(track) = &outcome {
                inner.tracks.insert(track_name.clone(), track.clone());
            }
            inner.cancel_tokens.remove(task_id);
            (inner.callbacks.remove(task_id), track_name)
        };

        match &outcome {
            TaskOutcome::Completed(track) => {
                info!(
                    task_id = %task_id,
                    track = %track_name,
                    note_count = track.notes.len(),
                    "Task completed"
                );
                self.event_bus.emit_lossy(FlowEvent::TaskCompleted {
                    task_id: task_id.to_string(),
                    track_name: track_name.clone(),
                    note_count: track.notes.len(),
                    timestamp: Utc::now(),
                });
            }
            TaskOutcome::Failed(error) => {
                warn!(task_id = %task_id, track = %track_name, error = %error, "Task failed");
                self.event_bus.emit_lossy(FlowEvent::TaskFailed {
                    task_id: task_id.to_string(),
                    track_name: track_name.clone(),
                    error: error.clone(),
                    timestamp: Utc::now(),
                });
            }
        }

        if let Some(cb) = callback {
            cb(outcome);
        }
    }
}
