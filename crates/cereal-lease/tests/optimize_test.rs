use cereal_lease::{Cereal, CerealConfig, Timeout};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const LONG: Duration = Duration::from_secs(30);

fn server(staleness: Duration) -> Arc<Cereal> {
    Arc::new(
        Cereal::new(
            CerealConfig::builder()
                .system("optimize")
                .staleness_threshold(staleness)
                .build(),
        )
        .unwrap(),
    )
}

#[test]
fn test_idle_resources_are_reclaimed() {
    let cereal = server(Duration::from_millis(50));

    let a = cereal.lock("alice", "A", LONG, Timeout::Forever).unwrap();
    cereal.release(&a).unwrap();
    let b = cereal.lock("bob", "B", LONG, Timeout::Forever).unwrap();
    assert_eq!(cereal.resource_count(), 2);

    thread::sleep(Duration::from_millis(120));
    assert_eq!(cereal.optimize().unwrap(), 1);
    assert_eq!(cereal.resource_count(), 1);
    assert!(cereal.is_held("B"));

    // A comes back on demand.
    let again = cereal.lock("carol", "A", LONG, Timeout::Forever).unwrap();
    assert!(!again.is_empty());
    assert_eq!(cereal.resource_count(), 2);

    cereal.release(&again).unwrap();
    cereal.release(&b).unwrap();
}

#[test]
fn test_recently_used_resources_survive() {
    let cereal = server(Duration::from_secs(60));

    let a = cereal.lock("alice", "A", LONG, Timeout::Forever).unwrap();
    cereal.release(&a).unwrap();

    assert_eq!(cereal.optimize().unwrap(), 0);
    assert_eq!(cereal.resource_count(), 1);
}

#[test]
fn test_resource_with_waiters_survives() {
    let cereal = server(Duration::from_millis(20));
    let held = cereal.lock("alice", "A", LONG, Timeout::Forever).unwrap();

    let waiter = {
        let cereal = cereal.clone();
        thread::spawn(move || cereal.lock("bob", "A", LONG, Timeout::Forever))
    };
    thread::sleep(Duration::from_millis(100));

    assert_eq!(cereal.optimize().unwrap(), 0);
    assert_eq!(cereal.pending("A"), 1);

    cereal.release(&held).unwrap();
    let granted = waiter.join().unwrap().unwrap();
    assert_eq!(granted.subject(), "bob");
    cereal.release(&granted).unwrap();
}

#[test]
fn test_abandoned_waits_do_not_pin_a_resource() {
    let cereal = server(Duration::from_millis(20));
    let held = cereal
        .lock("alice", "A", Duration::from_millis(150), Timeout::Forever)
        .unwrap();

    let missed = cereal
        .lock("bob", "A", LONG, Duration::from_millis(30))
        .unwrap();
    assert!(missed.is_empty());
    assert_eq!(cereal.pending("A"), 1);

    // Alice's lease expires; Bob's stale request is skipped, not served.
    thread::sleep(Duration::from_millis(300));
    assert!(!cereal.is_held("A"));
    assert_eq!(cereal.optimize().unwrap(), 1);
    assert_eq!(cereal.resource_count(), 0);

    cereal.release(&held).unwrap();
}

#[test]
fn test_optimize_runs_alongside_traffic() {
    let cereal = server(Duration::ZERO);

    let workers: Vec<_> = (0..4)
        .map(|n| {
            let cereal = cereal.clone();
            thread::spawn(move || {
                let subject = format!("worker-{n}");
                for round in 0..50 {
                    let resource = format!("R{}", round % 5);
                    let grain = cereal
                        .lock(&subject, &resource, LONG, Timeout::Forever)
                        .unwrap();
                    assert!(!grain.is_empty());
                    cereal.release(&grain).unwrap();
                }
            })
        })
        .collect();

    let trimmer = {
        let cereal = cereal.clone();
        thread::spawn(move || {
            for _ in 0..50 {
                cereal.optimize().unwrap();
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    for worker in workers {
        worker.join().unwrap();
    }
    trimmer.join().unwrap();
    assert_eq!(cereal.active_lease_count(), 0);
}
