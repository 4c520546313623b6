//! Job types for the execution queue.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// A boxed, sendable future.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Continuation invoked once when a job settles.
///
/// Continuation errors are rendered to strings because the queue only logs
/// them.
pub type Continuation<E> = Box<dyn FnOnce(JobOutcome<E>) -> BoxFuture<Result<(), String>> + Send>;

/// What happened when `enter_queue` was called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A slot was free; the job is running.
    Started,
    /// All slots were busy; the job is waiting in the backlog.
    Queued,
    /// A job with the same identifier is already running or queued.
    Duplicate,
}

/// The tagged result of a job's work, handed to its continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome<E> {
    Succeeded,
    Failed(E),
}

impl<E> JobOutcome<E> {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded)
    }
}

impl<E> From<Result<(), E>> for JobOutcome<E> {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => JobOutcome::Succeeded,
            Err(e) => JobOutcome::Failed(e),
        }
    }
}

/// A job's work panicked instead of returning.
///
/// The queue turns the panic into a [`JobOutcome::Failed`] through the job's
/// error type, so the continuation still runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPanicked {
    pub message: String,
}

impl fmt::Display for JobPanicked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job panicked: {}", self.message)
    }
}

impl std::error::Error for JobPanicked {}

impl From<JobPanicked> for String {
    fn from(panic: JobPanicked) -> Self {
        panic.to_string()
    }
}

/// A unit of work admitted into the queue.
pub(crate) struct Job<E> {
    pub(crate) identifier: String,
    pub(crate) run: BoxFuture<Result<(), E>>,
    pub(crate) on_settled: Continuation<E>,
}

impl<E> fmt::Debug for Job<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}
