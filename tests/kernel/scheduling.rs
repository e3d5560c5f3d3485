use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use serial_test::serial;
use tracing_test::traced_test;

use cadence_kernel::{Policy, Scheduler, Task};

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

/// WHY: under EDF the single worker must drain tasks by absolute
/// deadline, not registration order or priority.
/// WHAT: two one-shot tasks registered A-then-B with B's deadline sooner;
/// B runs first.
#[test]
#[traced_test]
#[ntest::timeout(10_000)]
fn edf_runs_the_tighter_deadline_first() {
    let record: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let sched = Scheduler::builder()
        .with_policy(Policy::Edf)
        .with_parallelism(1)
        .build();

    let seen = record.clone();
    sched
        .add_task(
            Task::new("loose", move || {
                seen.lock().unwrap().push("loose");
                Ok(())
            })
            .with_deadline(Duration::from_millis(500)),
        )
        .expect("should add");

    let seen = record.clone();
    sched
        .add_task(
            Task::new("tight", move || {
                seen.lock().unwrap().push("tight");
                Ok(())
            })
            .with_deadline(Duration::from_millis(200)),
        )
        .expect("should add");

    sched.start().expect("should start");
    assert!(wait_until(Duration::from_secs(2), || record
        .lock()
        .unwrap()
        .len()
        == 2));
    sched.stop_all();

    assert_eq!(record.lock().unwrap().clone(), vec!["tight", "loose"]);
}

/// WHY: the PRIORITY policy dispatches strictly by effective priority with
/// FIFO ties.
/// WHAT: three one-shot tasks with priorities 1/5/3 run as 5, 3, 1.
#[test]
#[traced_test]
#[ntest::timeout(10_000)]
fn priority_policy_runs_most_urgent_first() {
    let record: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let sched = Scheduler::builder()
        .with_policy(Policy::Priority)
        .with_parallelism(1)
        .build();

    for (name, priority) in [("low", 1_i64), ("high", 5), ("mid", 3)] {
        let seen = record.clone();
        sched
            .add_task(
                Task::new(name, move || {
                    seen.lock().unwrap().push(name);
                    Ok(())
                })
                .with_priority(priority),
            )
            .expect("should add");
    }

    sched.start().expect("should start");
    assert!(wait_until(Duration::from_secs(2), || record
        .lock()
        .unwrap()
        .len()
        == 3));
    sched.stop_all();

    assert_eq!(record.lock().unwrap().clone(), vec!["high", "mid", "low"]);
}

/// WHY: under RMS the shorter-period task must dominate a contended single
/// worker.
/// WHAT: periods 40ms vs 100ms over one second; the fast task completes
/// clearly more runs and roughly its rate share.
#[test]
#[serial]
#[traced_test]
#[ntest::timeout(20_000)]
fn rms_gives_the_shorter_period_the_larger_share() {
    let sched = Scheduler::builder()
        .with_policy(Policy::Rms)
        .with_parallelism(1)
        .build();

    sched
        .add_task(
            Task::new("slow", || {
                thread::sleep(Duration::from_millis(10));
                Ok(())
            })
            .with_period(Duration::from_millis(100)),
        )
        .expect("should add");
    sched
        .add_task(
            Task::new("fast", || {
                thread::sleep(Duration::from_millis(10));
                Ok(())
            })
            .with_period(Duration::from_millis(40)),
        )
        .expect("should add");

    sched.start().expect("should start");
    thread::sleep(Duration::from_millis(1_000));
    sched.stop_all();

    let fast = sched.get_stats("fast").expect("should read stats").runs;
    let slow = sched.get_stats("slow").expect("should read stats").runs;
    assert!(fast > slow, "fast={fast} slow={slow}");
    assert!(fast >= 15, "fast task starved: {fast}");
    assert!(slow <= 12, "slow task over-ran its rate: {slow}");
}

/// WHY: an idle scheduler must hold periodic release cadence without
/// accumulating drift.
/// WHAT: a 100ms task over ~1.05s completes close to eleven releases.
#[test]
#[serial]
#[traced_test]
#[ntest::timeout(20_000)]
fn periodic_cadence_stays_on_rate() {
    let sched = Scheduler::builder()
        .with_policy(Policy::Priority)
        .with_parallelism(1)
        .build();

    sched
        .add_task(Task::new("beat", || Ok(())).with_period(Duration::from_millis(100)))
        .expect("should add");

    sched.start().expect("should start");
    thread::sleep(Duration::from_millis(1_050));
    sched.stop_all();

    let runs = sched.get_stats("beat").expect("should read stats").runs;
    assert!((9..=12).contains(&runs), "unexpected cadence: {runs} runs");
}

/// WHY: the preemption tick must raise the yield hint on a running task
/// when a strictly better one becomes ready.
/// WHAT: a long-running low-priority task observes `should_yield` after a
/// high-priority task is enqueued behind it.
#[test]
#[serial]
#[traced_test]
#[ntest::timeout(20_000)]
fn yield_hint_raised_when_a_better_task_waits() {
    let hinted = Arc::new(Mutex::new(false));

    let sched = Scheduler::builder()
        .with_policy(Policy::Priority)
        .with_parallelism(1)
        .with_preempt_quantum(Duration::from_millis(5))
        .build();

    let sched_probe = sched.clone();
    let hinted_clone = hinted.clone();
    sched
        .add_task(
            Task::new("grinder", move || {
                for _ in 0..100 {
                    thread::sleep(Duration::from_millis(10));
                    if sched_probe.should_yield("grinder").unwrap_or(false) {
                        *hinted_clone.lock().unwrap() = true;
                        return Ok(());
                    }
                }
                Ok(())
            })
            .with_priority(1),
        )
        .expect("should add");

    sched.start().expect("should start");
    thread::sleep(Duration::from_millis(100));
    sched
        .add_task(Task::new("urgent", || Ok(())).with_priority(9))
        .expect("should add");

    let observed = wait_until(Duration::from_secs(3), || *hinted.lock().unwrap());
    sched.stop_all();
    assert!(observed, "running task never saw the yield hint");
}
