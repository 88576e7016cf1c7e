use {
    crate::PagingError,
    futures::stream::{AbortHandle, AbortRegistration},
    parking_lot::{Condvar, Mutex},
    std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    },
};

/// Cancellation signal of an in-flight fetch.
///
/// Cheap to clone. Task-based and streaming fetches are additionally wrapped
/// into [`futures::stream::Abortable`], so cancelling drops them at their next
/// suspension point; synchronous fetchers should poll
/// [`is_cancelled`](CancelSignal::is_cancelled).
#[derive(Debug, Clone)]
pub struct CancelSignal {
    inner: Arc<CancelInner>,
}

#[derive(Debug)]
struct CancelInner {
    cancelled: AtomicBool,
    aborter: AbortHandle,
}

impl CancelSignal {
    /// Creates a signal together with the registration used to make a future
    /// or stream abortable by it.
    pub fn new() -> (Self, AbortRegistration) {
        let (aborter, registration) = AbortHandle::new_pair();
        let signal = Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                aborter,
            }),
        };
        (signal, registration)
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.aborter.abort();
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }
}

/// How a fetch (or collection initialization) settled.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Values were fetched and applied.
    Fetched,
    /// The backing store reported a failure.
    Failed(PagingError),
    /// Cancelled by disposal; not an error.
    Cancelled,
}

/// Settle-once completion signal.
///
/// Cloning yields another handle to the same signal. Only the first
/// [`settle`](Completion::settle) call has an effect.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    inner: Arc<CompletionInner>,
}

#[derive(Debug, Default)]
struct CompletionInner {
    outcome: Mutex<Option<Outcome>>,
    settled: Condvar,
}

impl Completion {
    /// Creates an unsettled signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a signal that is already settled with `outcome`.
    pub fn settled(outcome: Outcome) -> Self {
        let completion = Self::new();
        completion.settle(outcome);
        completion
    }

    /// Settles the signal and wakes every waiter.
    ///
    /// Returns `false` if the signal had already been settled.
    pub fn settle(&self, outcome: Outcome) -> bool {
        let mut slot = self.inner.outcome.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.inner.settled.notify_all();
        true
    }

    /// Blocks until settled.
    pub fn wait(&self) -> Outcome {
        let mut slot = self.inner.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.inner.settled.wait(&mut slot);
        }
    }

    /// Blocks until settled or until `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        let mut slot = self.inner.outcome.lock();
        if slot.is_none() {
            self.inner
                .settled
                .wait_while_for(&mut slot, |outcome| outcome.is_none(), timeout);
        }
        slot.clone()
    }

    /// Current outcome, without blocking.
    pub fn outcome(&self) -> Option<Outcome> {
        self.inner.outcome.lock().clone()
    }

    /// Whether the signal has been settled.
    pub fn is_settled(&self) -> bool {
        self.inner.outcome.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        futures::{executor::block_on, future::pending, stream::Abortable},
        std::thread,
    };

    #[test]
    fn settles_once() {
        let completion = Completion::new();
        assert!(!completion.is_settled());
        assert!(completion.settle(Outcome::Cancelled));
        assert!(!completion.settle(Outcome::Fetched));
        assert!(matches!(completion.outcome(), Some(Outcome::Cancelled)));
    }

    #[test]
    fn wakes_waiters() {
        let completion = Completion::new();
        let waiters = (0..4)
            .map(|_| {
                let completion = completion.clone();
                thread::spawn(move || completion.wait())
            })
            .collect::<Vec<_>>();

        completion.settle(Outcome::Fetched);
        for waiter in waiters {
            assert!(matches!(waiter.join().unwrap(), Outcome::Fetched));
        }
    }

    #[test]
    fn wait_timeout_unsettled() {
        let completion = Completion::new();
        assert!(completion.wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn cancel_aborts_future() {
        let (signal, registration) = CancelSignal::new();
        let task = Abortable::new(pending::<()>(), registration);
        signal.cancel();
        assert!(signal.is_cancelled());
        assert!(block_on(task).is_err());
    }
}
