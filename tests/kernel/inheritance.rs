use std::{thread, time::Duration};

use serial_test::serial;
use tracing_test::traced_test;

use cadence_kernel::{Policy, Scheduler, Task};

fn effective_of(sched: &Scheduler, name: &str) -> i64 {
    sched
        .snapshot(name)
        .expect("should snapshot")
        .effective_priority
}

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let started = std::time::Instant::now();
    while started.elapsed() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    check()
}

/// WHY: a low-priority critical section must not stall a high-priority
/// waiter at low urgency; the holder inherits the waiter's priority and
/// drops back on release.
/// WHAT: low (base 1) holds the mutex while high (base 5) blocks on it;
/// low's effective priority reads 5 during the wait, ownership hands to
/// high at release, and low returns to 1.
#[test]
#[serial]
#[traced_test]
#[ntest::timeout(20_000)]
fn holder_inherits_waiter_priority_and_restores_on_release() {
    let sched = Scheduler::builder()
        .with_policy(Policy::Priority)
        .with_parallelism(2)
        .build();
    let mutex = sched.create_mutex().expect("should create mutex");

    let guard = mutex.clone();
    sched
        .add_task(
            Task::new("low", move || {
                guard.acquire("low")?;
                thread::sleep(Duration::from_millis(600));
                guard.release("low")?;
                Ok(())
            })
            .with_priority(1)
            .event_driven(),
        )
        .expect("should add");

    let guard = mutex.clone();
    sched
        .add_task(
            Task::new("high", move || {
                guard.acquire("high")?;
                guard.release("high")?;
                Ok(())
            })
            .with_priority(5)
            .event_driven(),
        )
        .expect("should add");

    sched.start().expect("should start");

    sched.trigger_task("low").expect("should trigger");
    assert!(
        wait_until(Duration::from_secs(2), || mutex.owner().as_deref()
            == Some("low")),
        "low never entered its critical section"
    );

    sched.trigger_task("high").expect("should trigger");
    assert!(
        wait_until(Duration::from_secs(2), || effective_of(&sched, "low") == 5),
        "holder never inherited the waiter priority"
    );
    // the blocked waiter keeps its own priority
    assert_eq!(effective_of(&sched, "high"), 5);

    // low releases after its 600ms section; high completes its run
    assert!(
        wait_until(Duration::from_secs(3), || {
            sched.get_stats("high").expect("should read stats").runs == 1
        }),
        "high never completed after handover"
    );
    assert!(
        wait_until(Duration::from_secs(2), || effective_of(&sched, "low") == 1),
        "holder kept its inherited priority after release"
    );

    sched.stop_all();
}
