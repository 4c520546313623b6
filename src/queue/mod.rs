//! Bounded-concurrency job queue with per-identifier deduplication.
//!
//! At most `max_active` jobs run at once; further jobs wait in a FIFO backlog.
//! An identifier stays admitted from `enter_queue` until its continuation has
//! finished, and while admitted any re-submission is dropped.
//!
//! Work and continuation each run in their own task, so a panic in either
//! still frees the slot. A panicking job settles as failed.
//!
//! There is no cancellation or timeout: a job whose future never resolves
//! holds its slot for the life of the process.

pub mod job;

use std::collections::{HashSet, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{debug, error, warn};

pub use job::{Admission, BoxFuture, JobOutcome, JobPanicked};
use job::{Continuation, Job};

/// Mutable queue state, guarded by a short-lived std mutex.
struct QueueState<E> {
    active: usize,
    backlog: VecDeque<Job<E>>,
    admitted: HashSet<String>,
}

struct Inner<E> {
    max_active: usize,
    state: Mutex<QueueState<E>>,
    /// `true` while nothing is running or queued.
    idle: watch::Sender<bool>,
}

/// Schedules backport jobs.
///
/// Cloning is cheap; all clones share the same slots and backlog.
pub struct ExecutionQueue<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for ExecutionQueue<E> {
    fn clone(&self) -> Self {
        ExecutionQueue {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> ExecutionQueue<E>
where
    E: From<JobPanicked> + Send + 'static,
{
    /// Creates a queue running at most `max_active` jobs concurrently.
    ///
    /// A limit of zero is treated as one.
    pub fn new(max_active: usize) -> Self {
        let (idle, _) = watch::channel(true);
        ExecutionQueue {
            inner: Arc::new(Inner {
                max_active: max_active.max(1),
                state: Mutex::new(QueueState {
                    active: 0,
                    backlog: VecDeque::new(),
                    admitted: HashSet::new(),
                }),
                idle,
            }),
        }
    }

    /// Submits a job.
    ///
    /// `run` performs the work; `on_settled` is called exactly once with its
    /// outcome. Errors returned by `on_settled` are logged and otherwise
    /// ignored. Must be called from within a tokio runtime.
    pub fn enter_queue<R, F, Fut, C>(&self, identifier: impl Into<String>, run: R, on_settled: F) -> Admission
    where
        R: Future<Output = Result<(), E>> + Send + 'static,
        F: FnOnce(JobOutcome<E>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), C>> + Send + 'static,
        C: Display,
    {
        let identifier = identifier.into();
        let on_settled: Continuation<E> = Box::new(move |outcome| {
            let fut = on_settled(outcome);
            Box::pin(async move { fut.await.map_err(|e| e.to_string()) })
        });
        let job = Job {
            identifier,
            run: Box::pin(run),
            on_settled,
        };

        let mut state = self.lock();
        if !state.admitted.insert(job.identifier.clone()) {
            debug!(identifier = %job.identifier, "Duplicate job dropped");
            return Admission::Duplicate;
        }
        self.inner.idle.send_replace(false);

        if state.active < self.inner.max_active {
            state.active += 1;
            debug!(identifier = %job.identifier, active = state.active, "Starting job");
            drop(state);
            self.spawn(job);
            Admission::Started
        } else {
            debug!(
                identifier = %job.identifier,
                queued = state.backlog.len() + 1,
                "All slots busy, queueing job"
            );
            state.backlog.push_back(job);
            Admission::Queued
        }
    }

    /// Number of jobs currently running.
    pub fn active_count(&self) -> usize {
        self.lock().active
    }

    /// Number of jobs waiting for a slot.
    pub fn queued_count(&self) -> usize {
        self.lock().backlog.len()
    }

    /// Returns true if `identifier` is running or queued.
    pub fn is_admitted(&self, identifier: &str) -> bool {
        self.lock().admitted.contains(identifier)
    }

    /// Returns true if nothing is running or queued.
    pub fn is_idle(&self) -> bool {
        *self.inner.idle.borrow()
    }

    /// Waits until nothing is running or queued.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.idle.subscribe();
        // The sender lives as long as `self`, so this cannot observe a close.
        let _ = rx.wait_for(|idle| *idle).await;
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<E>> {
        // A poisoned lock means a panic inside one of our short critical
        // sections; the state is still structurally valid.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn(&self, job: Job<E>) {
        let queue = self.clone();
        tokio::spawn(async move {
            let Job {
                identifier,
                run,
                on_settled,
            } = job;

            let result = match tokio::spawn(run).await {
                Ok(result) => result,
                Err(e) => {
                    let message = panic_message(e);
                    error!(identifier = %identifier, panic = %message, "Job panicked");
                    Err(E::from(JobPanicked { message }))
                }
            };
            let outcome = JobOutcome::from(result);
            debug!(identifier = %identifier, success = outcome.is_success(), "Job settled");

            match tokio::spawn(async move { on_settled(outcome).await }).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(identifier = %identifier, error = %e, "Job continuation failed"),
                Err(e) => error!(
                    identifier = %identifier,
                    panic = %panic_message(e),
                    "Job continuation panicked"
                ),
            }

            queue.finish(&identifier);
        });
    }

    /// Releases a finished job's slot and starts as many backlog jobs as fit.
    fn finish(&self, identifier: &str) {
        let mut state = self.lock();
        state.admitted.remove(identifier);
        state.active = state.active.saturating_sub(1);

        let mut ready = Vec::new();
        while state.active < self.inner.max_active {
            let Some(next) = state.backlog.pop_front() else {
                break;
            };
            state.active += 1;
            ready.push(next);
        }

        if state.active == 0 && state.backlog.is_empty() {
            debug!("Execution queue is empty");
            self.inner.idle.send_replace(true);
        }
        drop(state);

        for job in ready {
            debug!(identifier = %job.identifier, "Starting queued job");
            self.spawn(job);
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
