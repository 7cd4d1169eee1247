// Admission control behaviour through the public API

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use synthgate::admission::AdmissionController;
use synthgate::config::AdmissionConfig;
use synthgate::monitor::{ResourceMonitor, StaticProbe};

fn controller(max_concurrent: usize, max_limit: usize) -> (Arc<AdmissionController>, StaticProbe) {
    let probe = StaticProbe::default();
    let monitor = Arc::new(ResourceMonitor::new(Box::new(probe.clone())));
    let config = AdmissionConfig {
        max_concurrent,
        min_limit: 1,
        max_limit: Some(max_limit),
        default_timeout_secs: 30,
        adjust_interval_secs: 3600,
    };
    (Arc::new(AdmissionController::new(&config, monitor)), probe)
}

#[tokio::test]
async fn test_second_acquire_waits_for_release() {
    let (controller, _) = controller(1, 1);
    let first = controller
        .acquire("first", Duration::from_secs(5))
        .await
        .unwrap();

    let waiter = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            controller
                .acquire("second", Duration::from_secs(5))
                .await
                .map(|guard| guard.correlation_id().to_string())
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!waiter.is_finished());
    assert_eq!(controller.stats().waiting, 1);

    controller.release(first);
    let granted = waiter.await.unwrap().unwrap();
    assert_eq!(granted, "second");
    assert_eq!(controller.stats().total_admitted, 2);
}

#[tokio::test]
async fn test_concurrency_never_exceeds_limit() {
    let (controller, _) = controller(3, 3);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let controller = Arc::clone(&controller);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                let guard = controller
                    .acquire(&format!("job-{}", i), Duration::from_secs(10))
                    .await
                    .unwrap();
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                drop(guard);
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(controller.active(), 0);
    assert_eq!(controller.stats().total_admitted, 20);
}

#[tokio::test]
async fn test_memory_pressure_shrinks_limit() {
    let (controller, probe) = controller(10, 20);
    probe.set_memory(96.0);

    let snapshot = controller.snapshot();
    assert_eq!(controller.adjust(&snapshot), Some(7));
    assert_eq!(controller.current_limit(), 7);
    assert_eq!(controller.stats().available, 7);
}

#[tokio::test]
async fn test_shrink_below_active_withholds_returned_slots() {
    let (controller, probe) = controller(4, 4);
    let mut guards = Vec::new();
    for i in 0..4 {
        guards.push(
            controller
                .acquire(&format!("job-{}", i), Duration::from_secs(1))
                .await
                .unwrap(),
        );
    }

    probe.set_memory(96.0);
    let snapshot = controller.snapshot();
    assert_eq!(controller.adjust(&snapshot), Some(2));
    assert_eq!(controller.active(), 4);

    for guard in guards {
        controller.release(guard);
    }
    assert_eq!(controller.active(), 0);
    assert_eq!(controller.stats().available, 2);
}
