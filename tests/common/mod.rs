#![allow(dead_code)]

use {
    parking_lot::Mutex,
    std::{
        collections::VecDeque,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    },
    vpage::{Job, PageFetcher, Scheduler},
};

/// Queues jobs until the test decides to run them.
#[derive(Default)]
pub struct ManualScheduler {
    jobs: Mutex<VecDeque<Job>>,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Runs queued jobs, including the ones they schedule, until the queue is
    /// empty. Returns the number of jobs run.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let job = self.jobs.lock().pop_front();
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.jobs.lock().len()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, job: Job) {
        self.jobs.lock().push_back(job);
    }
}

/// Identity fetcher (`item == global index`) recording every call.
pub fn identity_fetcher(calls: Arc<Mutex<Vec<(usize, usize)>>>) -> PageFetcher<usize> {
    PageFetcher::from_fn(move |offset, size| {
        calls.lock().push((offset, size));
        Ok((offset..offset + size).collect())
    })
}

/// Resource whose release is recorded.
#[derive(Debug)]
pub struct Resource {
    pub index: usize,
    released: Arc<Mutex<Vec<usize>>>,
}

impl Resource {
    pub fn new(index: usize, released: &Arc<Mutex<Vec<usize>>>) -> Self {
        Self {
            index,
            released: Arc::clone(released),
        }
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        self.released.lock().push(self.index);
    }
}

/// Fetcher producing shared resources, counting how many were created.
pub fn resource_fetcher(
    created: Arc<AtomicUsize>,
    released: Arc<Mutex<Vec<usize>>>,
) -> PageFetcher<Arc<Resource>> {
    PageFetcher::from_fn(move |offset, size| {
        created.fetch_add(size, Ordering::SeqCst);
        Ok((offset..offset + size)
            .map(|index| Arc::new(Resource::new(index, &released)))
            .collect())
    })
}

/// Asserts every index in `expected` was released exactly once.
pub fn assert_released_once(released: &Mutex<Vec<usize>>, expected: impl IntoIterator<Item = usize>) {
    let mut released = released.lock().clone();
    released.sort_unstable();
    let mut expected = expected.into_iter().collect::<Vec<_>>();
    expected.sort_unstable();
    assert_eq!(released, expected);
}
