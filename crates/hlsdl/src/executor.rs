// Task Executor: admits asynchronous jobs up to a concurrency ceiling and queues the rest.
//
// Every submitted job gets a `JobId` and an entry in the executor's index. A job is
// either pending (queued, not yet started) or running (spawned on the tokio runtime).
// Settled jobs are dropped from the index. Pending jobs can be settled from outside
// with `resolve`/`reject`, which is how a controller cancels queued work.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Identifier of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// Failure outcome of a job handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError<E> {
    /// The job ran (or was rejected) with this reason.
    #[error("job failed: {0}")]
    Failed(E),
    /// The executor dropped the job record without settling it.
    #[error("job discarded by executor")]
    Discarded,
}

type JobFn<T, E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, E>> + Send>;

enum JobState<T, E> {
    Pending {
        job: JobFn<T, E>,
        tx: oneshot::Sender<Result<T, E>>,
    },
    Running,
}

struct Inner<T, E> {
    max_concurrency: usize,
    active: bool,
    next_id: u64,
    jobs: HashMap<JobId, JobState<T, E>>,
    pending: VecDeque<JobId>,
    running: HashSet<JobId>,
}

impl<T, E> Inner<T, E> {
    fn has_capacity(&self) -> bool {
        self.running.len() < self.max_concurrency
    }

    /// Move the oldest pending job to the running set and return what is needed to spawn it.
    fn promote_next(&mut self) -> Option<(JobId, JobFn<T, E>, oneshot::Sender<Result<T, E>>)> {
        if !self.active || !self.has_capacity() {
            return None;
        }
        let id = self.pending.pop_front()?;
        match self.jobs.insert(id, JobState::Running) {
            Some(JobState::Pending { job, tx }) => {
                self.running.insert(id);
                Some((id, job, tx))
            }
            _ => {
                // The queue and the index are updated together; a missing entry means the
                // job was settled externally, so drop the placeholder again.
                self.jobs.remove(&id);
                None
            }
        }
    }

    /// Remove a job only if it is still pending.
    fn take_pending(&mut self, id: JobId) -> Option<oneshot::Sender<Result<T, E>>> {
        if !matches!(self.jobs.get(&id), Some(JobState::Pending { .. })) {
            return None;
        }
        self.pending.retain(|queued| *queued != id);
        match self.jobs.remove(&id) {
            Some(JobState::Pending { tx, .. }) => Some(tx),
            _ => None,
        }
    }
}

/// Bounded-concurrency executor for asynchronous jobs.
///
/// Cloning the executor yields another handle to the same queue.
pub struct TaskExecutor<T, E> {
    inner: Arc<Mutex<Inner<T, E>>>,
}

impl<T, E> Clone for TaskExecutor<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> TaskExecutor<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Create an inactive executor. Jobs submitted before [`TaskExecutor::start`] are queued.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                max_concurrency: max_concurrency.max(1),
                active: false,
                next_id: 0,
                jobs: HashMap::new(),
                pending: VecDeque::new(),
                running: HashSet::new(),
            })),
        }
    }

    /// Set the concurrency ceiling, coerced to at least 1.
    pub fn set_max_concurrency(&self, max_concurrency: usize) {
        self.inner.lock().max_concurrency = max_concurrency.max(1);
    }

    pub fn max_concurrency(&self) -> usize {
        self.inner.lock().max_concurrency
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    pub fn running_count(&self) -> usize {
        self.inner.lock().running.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Activate the executor and fill every idle slot from the pending queue.
    ///
    /// Calling `start` on an active executor does nothing.
    pub fn start(&self) {
        let mut promoted = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.active {
                return;
            }
            inner.active = true;
            while let Some(next) = inner.promote_next() {
                promoted.push(next);
            }
            debug!(
                promoted = promoted.len(),
                pending = inner.pending.len(),
                "Task executor started"
            );
        }
        for (id, job, tx) in promoted {
            self.spawn(id, job, tx);
        }
    }

    /// Deactivate the executor. With `clear`, every pending and running record is dropped
    /// without settling; their handles resolve to [`JobError::Discarded`] unless the job is
    /// already running, in which case it still delivers its own result.
    pub fn stop(&self, clear: bool) {
        let mut inner = self.inner.lock();
        inner.active = false;
        if clear {
            debug!(
                pending = inner.pending.len(),
                running = inner.running.len(),
                "Task executor cleared"
            );
            inner.pending.clear();
            inner.running.clear();
            inner.jobs.clear();
        }
    }

    /// Submit a job. The closure is only invoked once the job is admitted.
    pub fn submit<F, Fut>(&self, job: F) -> JobHandle<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: JobFn<T, E> =
            Box::new(move || -> BoxFuture<'static, Result<T, E>> { Box::pin(job()) });

        let mut inner = self.inner.lock();
        let id = JobId(inner.next_id);
        inner.next_id += 1;

        if inner.active && inner.has_capacity() {
            inner.jobs.insert(id, JobState::Running);
            inner.running.insert(id);
            drop(inner);
            trace!(%id, "Job admitted immediately");
            self.spawn(id, job, tx);
        } else {
            inner.jobs.insert(id, JobState::Pending { job, tx });
            inner.pending.push_back(id);
            trace!(%id, pending = inner.pending.len(), "Job queued");
        }

        JobHandle { id, rx }
    }

    /// Settle a pending job with a success value. Returns whether it took effect.
    pub fn resolve(&self, id: JobId, value: T) -> bool {
        self.settle_pending(id, Ok(value))
    }

    /// Settle a pending job with a failure reason. Returns whether it took effect.
    pub fn reject(&self, id: JobId, reason: E) -> bool {
        self.settle_pending(id, Err(reason))
    }

    fn settle_pending(&self, id: JobId, outcome: Result<T, E>) -> bool {
        let tx = self.inner.lock().take_pending(id);
        match tx {
            Some(tx) => {
                debug!(%id, ok = outcome.is_ok(), "Pending job settled externally");
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    fn spawn(&self, id: JobId, job: JobFn<T, E>, tx: oneshot::Sender<Result<T, E>>) {
        let executor = self.clone();
        tokio::spawn(async move {
            let outcome = job().await;
            // The receiver may have been dropped; the job is settled either way.
            let _ = tx.send(outcome);
            executor.on_job_finished(id);
        });
    }

    fn on_job_finished(&self, id: JobId) {
        let next = {
            let mut inner = self.inner.lock();
            inner.running.remove(&id);
            inner.jobs.remove(&id);
            inner.promote_next()
        };
        trace!(%id, "Job settled");
        if let Some((next_id, job, tx)) = next {
            self.spawn(next_id, job, tx);
        }
    }
}

/// Awaitable handle to a submitted job.
pub struct JobHandle<T, E> {
    id: JobId,
    rx: oneshot::Receiver<Result<T, E>>,
}

impl<T, E> JobHandle<T, E> {
    pub fn id(&self) -> JobId {
        self.id
    }
}

impl<T, E> Future for JobHandle<T, E> {
    type Output = Result<T, JobError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(reason)) => Err(JobError::Failed(reason)),
            Err(_) => Err(JobError::Discarded),
        })
    }
}
