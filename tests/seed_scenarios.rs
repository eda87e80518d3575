use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use elastic_runtime::config::{PoolConfig, SchedulerConfig};
use elastic_runtime::job::InlineWorkerFactory;
use elastic_runtime::prelude::*;

fn pool(config: PoolConfig) -> ElasticExecutor<InlineWorkerFactory> {
    ElasticExecutor::new(InlineWorkerFactory, config, Arc::new(OsSpawner)).unwrap()
}

#[test]
fn fifo_ordering_with_a_single_worker() {
    let pool = pool(PoolConfig {
        min_workers: 1,
        max_workers: 1,
        ..Default::default()
    });

    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..500u32 {
        let order = order.clone();
        pool.submit(Box::new(move || order.lock().unwrap().push(i)))
            .unwrap();
    }

    assert!(pool.wait_until_idle(Some(Duration::from_secs(30))));
    let observed = order.lock().unwrap();
    let expected: Vec<u32> = (0..500).collect();
    assert_eq!(*observed, expected);
}

#[test]
fn admission_control_rejects_once_the_queue_is_full() {
    let barrier = Arc::new(std::sync::Barrier::new(2));
    let pool = pool(PoolConfig {
        min_workers: 0,
        max_workers: 1,
        max_queue_size: 2,
        ..Default::default()
    });

    let b = barrier.clone();
    assert!(pool
        .submit(Box::new(move || {
            b.wait();
        }))
        .unwrap());
    // The single worker picks the above job up and blocks; two more fill
    // the bounded queue.
    assert!(pool.submit(Box::new(|| {})).unwrap());
    assert!(pool.submit(Box::new(|| {})).unwrap());
    assert_eq!(pool.submit(Box::new(|| {})).unwrap(), false);

    barrier.wait();
    assert!(pool.wait_until_idle(Some(Duration::from_secs(10))));
}

#[test]
fn idle_workers_retire_back_to_the_minimum() {
    let pool = pool(PoolConfig {
        min_workers: 1,
        max_workers: 8,
        unused_lifetime: Duration::from_millis(50),
        ..Default::default()
    });

    for _ in 0..40 {
        pool.submit(Box::new(|| {})).unwrap();
    }
    assert!(pool.wait_until_idle(Some(Duration::from_secs(10))));
    assert!(pool.thread_count() >= 1);

    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(pool.thread_count(), 1);
}

#[test]
fn consistent_frequency_catches_up_without_piling_up_extra_runs() {
    let scheduler = TimerScheduler::new(
        SchedulerConfig {
            name: "consistent".to_string(),
            ..Default::default()
        },
        None,
        Arc::new(|job: elastic_runtime::job::Job| {
            job();
            true
        }),
    );

    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let handle = scheduler.build(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    handle
        .set_frequency(Duration::from_millis(30), true)
        .run_immediately();
    handle.set_active(true);

    std::thread::sleep(Duration::from_millis(400));
    handle.set_active(false);

    let runs = count.load(Ordering::SeqCst);
    assert!(runs >= 5, "expected several catch-up runs, saw {runs}");
    assert!(runs <= 20, "catch-up should not pile up far beyond what elapsed, saw {runs}");
}

#[test]
fn non_consistent_frequency_waits_a_full_period_after_each_run() {
    let scheduler = TimerScheduler::new(
        SchedulerConfig {
            name: "non-consistent".to_string(),
            ..Default::default()
        },
        None,
        Arc::new(|job: elastic_runtime::job::Job| {
            job();
            true
        }),
    );

    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let handle = scheduler.build(move || {
        c.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(40));
    });
    handle
        .set_frequency(Duration::from_millis(20), false)
        .run_immediately();
    handle.set_active(true);

    std::thread::sleep(Duration::from_millis(250));
    handle.set_active(false);

    // Each execution takes 40ms plus a 20ms gap, so over 250ms there should
    // be roughly 250 / 60 ~= 4 runs, never the ~12 a (wrongly) start-to-start
    // schedule would produce.
    let runs = count.load(Ordering::SeqCst);
    assert!(runs >= 2 && runs <= 6, "expected end-to-start pacing, saw {runs} runs");
}

#[test]
fn ui_dispatch_preserves_submission_order_across_handles() {
    struct QueueUi(Mutex<Vec<elastic_runtime::job::Job>>);
    impl UiInvoke for QueueUi {
        fn invoke(&self, job: elastic_runtime::job::Job) {
            self.0.lock().unwrap().push(job);
        }
    }

    let ui = Arc::new(QueueUi(Mutex::new(Vec::new())));
    let scheduler = TimerScheduler::new(
        SchedulerConfig {
            name: "ui".to_string(),
            ..Default::default()
        },
        Some(ui.clone() as Arc<dyn UiInvoke>),
        Arc::new(|job: elastic_runtime::job::Job| {
            job();
            true
        }),
    );

    let log = Arc::new(Mutex::new(Vec::new()));

    for i in 0..5u32 {
        let log = log.clone();
        let handle = scheduler.build(move || log.lock().unwrap().push(i));
        handle.with_threading(Threading::Ui).run_immediately();
        handle.set_active(true);
    }

    std::thread::sleep(Duration::from_millis(200));

    let mut jobs = ui.0.lock().unwrap();
    assert_eq!(jobs.len(), 5);
    for job in jobs.drain(..) {
        job();
    }
    assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn scheduler_fans_a_due_task_out_to_the_pool() {
    let pool = pool(PoolConfig {
        min_workers: 1,
        max_workers: 2,
        ..Default::default()
    });
    let scheduler = TimerScheduler::new(
        SchedulerConfig {
            name: "fanout".to_string(),
            ..Default::default()
        },
        None,
        pool.as_accessory_runner(),
    );

    let ran = Arc::new(AtomicUsize::new(0));
    let r = ran.clone();
    let handle = scheduler.build(move || {
        r.fetch_add(1, Ordering::SeqCst);
    });
    handle.run_immediately();
    handle.set_active(true);

    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert!(!handle.is_active());
}
