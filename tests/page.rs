mod common;

use {
    common::{ManualScheduler, Resource, assert_released_once, resource_fetcher},
    futures::{future, stream},
    parking_lot::Mutex,
    std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
            mpsc,
        },
        thread,
        time::Duration,
    },
    vpage::{
        FetchPlan,
        InlineScheduler,
        Outcome,
        Page,
        PageArrival,
        PageEvent,
        PageFetcher,
        PageNotifier,
        PageRequest,
        PagingError,
        Placeholders,
        Scheduler,
        ThreadScheduler,
        fetch_error,
    },
};

fn page_request(key: usize, size: usize) -> (PageRequest, Arc<AtomicUsize>) {
    let released = Arc::new(AtomicUsize::new(0));
    let token = Arc::clone(&released);
    let request = PageRequest {
        id: key as u64,
        key,
        offset: key * 10,
        size,
        release: Box::new(move || {
            token.fetch_add(1, Ordering::SeqCst);
        }),
    };
    (request, released)
}

fn identity() -> PageFetcher<i64> {
    PageFetcher::from_fn(|offset, size| Ok((offset as i64..(offset + size) as i64).collect()))
}

fn recording_notifier() -> (PageNotifier<i64>, Arc<Mutex<Vec<PageEvent<i64>>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let notifier = PageNotifier::new(Arc::new(InlineScheduler), move |event| sink.lock().push(event));
    (notifier, events)
}

#[test]
fn eager_page_fetches_on_start() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let fetcher = PageFetcher::from_fn(move |offset, size| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok((offset..offset + size).collect::<Vec<usize>>())
    });

    let (request, _) = page_request(6, 10);
    let page = Arc::new(Page::new(request, FetchPlan::Eager(fetcher)));
    assert!(!page.completion().is_settled());

    page.start();
    page.start();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(page.completion().outcome(), Some(Outcome::Fetched)));

    // Scenario: page 6 of size 10 covers [60, 70).
    assert_eq!(page.offset(), 60);
    assert_eq!(page.index(0).unwrap(), 60);
    assert_eq!(page.index(9).unwrap(), 69);
}

#[test]
fn index_out_of_range() {
    let (request, _) = page_request(0, 5);
    let page = Arc::new(Page::new(request, FetchPlan::Eager(identity())));
    page.start();

    assert!(matches!(
        page.index(5),
        Err(PagingError::OutOfRange { index: 5, len: 5 })
    ));
    assert!(page.index(4).is_ok());
}

#[test]
fn deferred_page_blocks_until_fetched() {
    let background = ManualScheduler::new();
    let (request, _) = page_request(1, 10);
    let page = Arc::new(Page::new(request, FetchPlan::Deferred {
        fetcher: identity(),
        background: Arc::clone(&background) as Arc<dyn Scheduler>,
    }));
    page.start();
    assert_eq!(background.pending(), 1);

    let reader = {
        let page = Arc::clone(&page);
        thread::spawn(move || page.index(3))
    };
    thread::sleep(Duration::from_millis(20));
    assert!(!reader.is_finished());

    background.run_all();
    assert_eq!(reader.join().unwrap().unwrap(), 13);
}

#[test]
fn placeholder_page_swaps_values_in() {
    let background = ManualScheduler::new();
    let (notifier, events) = recording_notifier();
    let (request, _) = page_request(2, 3);
    let page = Arc::new(Page::new(request, FetchPlan::Placeholder {
        fetcher: identity(),
        background: Arc::clone(&background) as Arc<dyn Scheduler>,
        placeholders: Placeholders::new(|key, slot| -((key * 100 + slot) as i64) - 1),
        notifier: Some(notifier),
    }));
    page.start();

    // Placeholders are distinguishable per page and slot.
    assert_eq!(page.index(0).unwrap(), -201);
    assert_eq!(page.index(2).unwrap(), -203);

    background.run_all();
    assert_eq!(page.index(0).unwrap(), 20);
    assert_eq!(page.index(2).unwrap(), 22);

    let events = events.lock();
    assert_eq!(events.len(), 1);
    match &events[0] {
        PageEvent::Arrived(PageArrival {
            key,
            offset,
            previous,
            current,
        }) => {
            assert_eq!(*key, 2);
            assert_eq!(*offset, 20);
            assert_eq!(previous, &vec![Some(-201), Some(-202), Some(-203)]);
            assert_eq!(current, &vec![20, 21, 22]);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn streaming_page_applies_items_one_by_one() {
    let (notifier, events) = recording_notifier();
    let fetcher = PageFetcher::from_stream(|offset, size, _cancel| {
        stream::iter((offset..offset + size).map(|i| Ok(i as i64)))
    });
    let (request, _) = page_request(0, 4);
    let page = Arc::new(Page::new(request, FetchPlan::Placeholder {
        fetcher,
        background: Arc::new(InlineScheduler),
        placeholders: Placeholders::constant(-1),
        notifier: Some(notifier),
    }));
    page.start();

    let offsets = events
        .lock()
        .iter()
        .map(|event| match event {
            PageEvent::Arrived(arrival) => (arrival.offset, arrival.current.clone()),
            other => panic!("unexpected event {other:?}"),
        })
        .collect::<Vec<_>>();
    assert_eq!(offsets, vec![(0, vec![0]), (1, vec![1]), (2, vec![2]), (3, vec![3])]);
}

#[test]
fn short_stream_leaves_placeholders() {
    let fetcher = PageFetcher::from_stream(|offset, _size, _cancel| {
        stream::iter(vec![Ok(offset as i64)])
    });
    let (request, _) = page_request(3, 3);
    let page = Arc::new(Page::new(request, FetchPlan::Placeholder {
        fetcher,
        background: Arc::new(InlineScheduler),
        placeholders: Placeholders::constant(-1),
        notifier: None,
    }));
    page.start();

    assert!(matches!(page.completion().outcome(), Some(Outcome::Fetched)));
    assert_eq!(page.index(0).unwrap(), 30);
    assert_eq!(page.index(1).unwrap(), -1);
}

#[test]
fn short_stream_blocking_reports_missing_item() {
    let fetcher = PageFetcher::from_stream(|offset, _size, _cancel| {
        stream::iter(vec![Ok(offset as i64)])
    });
    let (request, _) = page_request(0, 2);
    let page = Arc::new(Page::new(request, FetchPlan::Eager(fetcher)));
    page.start();

    assert_eq!(page.index(0).unwrap(), 0);
    assert!(matches!(page.index(1), Err(PagingError::MissingItem { index: 1 })));
}

#[test]
fn fetch_failure_surfaces() {
    let fetcher = PageFetcher::<i64>::from_fn(|_, _| Err(fetch_error("backing store down")));

    let (request, _) = page_request(0, 5);
    let page = Arc::new(Page::new(request, FetchPlan::Eager(fetcher.clone())));
    page.start();
    match page.index(0) {
        Err(PagingError::Fetch(err)) => assert_eq!(err.to_string(), "backing store down"),
        other => panic!("unexpected result {other:?}"),
    }

    // Placeholder pages keep their placeholders and report the failure.
    let (notifier, events) = recording_notifier();
    let (request, released) = page_request(1, 5);
    let page = Arc::new(Page::new(request, FetchPlan::Placeholder {
        fetcher,
        background: Arc::new(InlineScheduler),
        placeholders: Placeholders::constant(-1),
        notifier: Some(notifier),
    }));
    page.start();
    assert_eq!(page.index(0).unwrap(), -1);
    assert!(matches!(
        events.lock().as_slice(),
        [PageEvent::Failed {
            key: 1,
            offset: 10,
            size: 5,
            ..
        }]
    ));

    // The page still completes its lifecycle.
    page.dispose();
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn task_fetch_runs_in_background() {
    let fetcher = PageFetcher::from_task(|offset, size, _cancel| async move {
        Ok((offset as i64..(offset + size) as i64).collect::<Vec<_>>())
    });
    let (request, _) = page_request(4, 2);
    let page = Arc::new(Page::new(request, FetchPlan::Deferred {
        fetcher,
        background: Arc::new(ThreadScheduler::new("page-test")),
    }));
    page.start();

    assert_eq!(page.index(1).unwrap(), 41);
}

#[test]
fn dispose_before_fetch_runs() {
    let background = ManualScheduler::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let fetcher = PageFetcher::from_fn(move |offset, size| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok((offset as i64..(offset + size) as i64).collect::<Vec<_>>())
    });

    let (request, released) = page_request(0, 3);
    let page = Arc::new(Page::new(request, FetchPlan::Placeholder {
        fetcher,
        background: Arc::clone(&background) as Arc<dyn Scheduler>,
        placeholders: Placeholders::constant(-1),
        notifier: None,
    }));
    page.start();

    // Scenario: disposal claims the queued fetch, which then never calls the
    // backing store.
    page.dispose();
    assert!(matches!(page.completion().outcome(), Some(Outcome::Cancelled)));
    background.run_all();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(matches!(page.index(0), Err(PagingError::Disposed)));

    // Disposing again is a no-op.
    page.dispose();
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn dispose_aborts_task_fetch() {
    let (started_tx, started_rx) = mpsc::channel();
    let fetcher = PageFetcher::<i64>::from_task(move |_, _, _cancel| {
        let started = started_tx.clone();
        async move {
            started.send(()).unwrap();
            future::pending::<()>().await;
            Ok(Vec::new())
        }
    });

    let (request, released) = page_request(0, 3);
    let page = Arc::new(Page::new(request, FetchPlan::Placeholder {
        fetcher,
        background: Arc::new(ThreadScheduler::new("page-test")),
        placeholders: Placeholders::constant(-1),
        notifier: None,
    }));
    page.start();
    started_rx.recv().unwrap();

    // Cancellation is not an error: the page just settles as cancelled.
    page.dispose();
    assert!(matches!(page.completion().outcome(), Some(Outcome::Cancelled)));
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn late_fetch_results_are_released_not_exposed() {
    let created = Arc::new(AtomicUsize::new(0));
    let released = Arc::new(Mutex::new(Vec::new()));
    let inner = resource_fetcher(Arc::clone(&created), Arc::clone(&released));

    // The fetch reports it is running, then waits for the test to let it go.
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let go_rx = Mutex::new(go_rx);
    let fetcher = PageFetcher::from_fn(move |offset, size| {
        started_tx.send(()).unwrap();
        go_rx.lock().recv().unwrap();
        match &inner {
            PageFetcher::Sync(fetch) => fetch(offset, size),
            _ => unreachable!(),
        }
    });

    let (request, token) = page_request(0, 4);
    let page = Arc::new(Page::new(request, FetchPlan::Deferred {
        fetcher,
        background: Arc::new(ThreadScheduler::new("page-test")),
    }));
    page.start();
    started_rx.recv().unwrap();

    // Scenario: disposal starts while the fetch is in flight.
    let disposer = {
        let page = Arc::clone(&page);
        thread::spawn(move || page.dispose())
    };
    thread::sleep(Duration::from_millis(50));
    go_tx.send(()).unwrap();
    disposer.join().unwrap();

    assert_eq!(created.load(Ordering::SeqCst), 4);
    assert_released_once(&released, 0..4);
    assert_eq!(token.load(Ordering::SeqCst), 1);
    assert!(matches!(page.index(0), Err(PagingError::Disposed)));
}

#[test]
fn dispose_releases_superseded_and_fetched_values() {
    let created = Arc::new(AtomicUsize::new(0));
    let released = Arc::new(Mutex::new(Vec::new()));
    let fetcher = resource_fetcher(Arc::clone(&created), Arc::clone(&released));

    let placeholder_released = Arc::clone(&released);
    let (request, _) = page_request(0, 3);
    let page = Arc::new(Page::new(request, FetchPlan::Placeholder {
        fetcher,
        background: Arc::new(InlineScheduler),
        placeholders: Placeholders::new(move |_, slot| {
            Arc::new(Resource::new(1_000 + slot, &placeholder_released))
        }),
        notifier: None,
    }));
    page.start();

    // Superseded placeholders are released as soon as the values land.
    assert_released_once(&released, 1_000..1_003);

    let value = page.index(1).unwrap();
    assert_eq!(value.index, 1);
    drop(value);

    page.dispose();
    assert_released_once(&released, (0..3).chain(1_000..1_003));
}
