use {
    futures::{StreamExt, channel::mpsc, executor::block_on},
    parking_lot::Mutex,
    std::{fmt, io, sync::Arc, thread},
    tracing::{debug, warn},
};

/// Unit of work handed to a [`Scheduler`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Execution context.
///
/// Every collection is driven by two explicitly injected schedulers: a
/// background one running page and count fetches, and a notification one
/// delivering change events to observers.
pub trait Scheduler: Send + Sync + 'static {
    /// Arranges for `job` to run, possibly on another thread.
    fn schedule(&self, job: Job);
}

/// Runs every job on the calling thread before `schedule` returns.
///
/// Makes the whole engine deterministic, which is mostly useful in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineScheduler;

impl Scheduler for InlineScheduler {
    fn schedule(&self, job: Job) {
        job()
    }
}

/// Runs every job on a freshly spawned OS thread.
#[derive(Debug, Clone)]
pub struct ThreadScheduler {
    name: String,
}

impl ThreadScheduler {
    /// Creates a scheduler naming its threads after `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Hands `job` to `spawn`, running it on the calling thread if no worker
    /// could be started.
    fn dispatch<S>(&self, job: Job, spawn: S)
    where
        S: FnOnce(Job) -> io::Result<()>,
    {
        let slot = Arc::new(Mutex::new(Some(job)));
        let worker = Arc::clone(&slot);
        let spawned = spawn(Box::new(move || {
            let job = worker.lock().take();
            if let Some(job) = job {
                job();
            }
        }));

        if let Err(err) = spawned {
            warn!(%err, scheduler = %self.name, "failed to spawn worker thread, running job inline");
            let job = slot.lock().take();
            if let Some(job) = job {
                job();
            }
        }
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new("vpage-worker")
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, job: Job) {
        self.dispatch(job, |job| {
            thread::Builder::new()
                .name(self.name.clone())
                .spawn(job)
                .map(drop)
        });
    }
}

/// Runs jobs one at a time, in submission order, on a dedicated thread.
///
/// The natural notification context: events raised by one page are delivered
/// in the order they were raised. The worker exits once the scheduler is
/// dropped and the queue is drained.
pub struct SerialScheduler {
    name: String,
    queue: mpsc::UnboundedSender<Job>,
}

impl SerialScheduler {
    /// Starts the worker thread.
    pub fn new(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let (queue, mut jobs) = mpsc::unbounded::<Job>();
        let worker = name.clone();
        thread::Builder::new().name(name.clone()).spawn(move || {
            block_on(async {
                while let Some(job) = jobs.next().await {
                    job();
                }
            });
            debug!(scheduler = %worker, "serial scheduler drained");
        })?;
        Ok(Self { name, queue })
    }
}

impl Scheduler for SerialScheduler {
    fn schedule(&self, job: Job) {
        if self.queue.unbounded_send(job).is_err() {
            warn!(scheduler = %self.name, "serial scheduler worker is gone, job dropped");
        }
    }
}

impl fmt::Debug for SerialScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialScheduler")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::sync::mpsc::channel};

    #[test]
    fn inline_runs_before_return() {
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        InlineScheduler.schedule(Box::new(move || *flag.lock() = true));
        assert!(*ran.lock());
    }

    #[test]
    fn thread_runs_elsewhere() {
        let (tx, rx) = channel();
        ThreadScheduler::new("test-worker").schedule(Box::new(move || {
            tx.send(thread::current().name().map(str::to_owned)).unwrap();
        }));
        assert_eq!(rx.recv().unwrap().as_deref(), Some("test-worker"));
    }

    #[test]
    fn thread_falls_back_to_inline() {
        let ran_on = Arc::new(Mutex::new(None));
        let record = Arc::clone(&ran_on);
        let scheduler = ThreadScheduler::new("test-worker");
        scheduler.dispatch(
            Box::new(move || *record.lock() = Some(thread::current().id())),
            |_job| Err(io::Error::other("no threads left")),
        );
        assert_eq!(*ran_on.lock(), Some(thread::current().id()));
    }

    #[test]
    fn serial_preserves_order() {
        let scheduler = SerialScheduler::new("test-serial").unwrap();
        let (tx, rx) = channel();
        for i in 0..100 {
            let tx = tx.clone();
            scheduler.schedule(Box::new(move || tx.send(i).unwrap()));
        }
        let received = (0..100).map(|_| rx.recv().unwrap()).collect::<Vec<_>>();
        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }
}
