use std::{thread, time::Duration};

use serial_test::serial;
use tracing_test::traced_test;

use cadence_kernel::{OverrunPolicy, Policy, Scheduler, Task};

/// WHY: under the skip_next policy every overrun must cost exactly one
/// period, halving the effective rate of a chronically late task.
/// WHAT: period 100ms, deadline 50ms, work 80ms over one second completes
/// about five runs instead of ten.
#[test]
#[serial]
#[traced_test]
#[ntest::timeout(20_000)]
fn skip_next_drops_one_period_per_overrun() {
    let sched = Scheduler::builder()
        .with_policy(Policy::Priority)
        .with_parallelism(1)
        .with_overrun_policy(OverrunPolicy::SkipNext)
        .build();

    sched
        .add_task(
            Task::new("late", || {
                thread::sleep(Duration::from_millis(80));
                Ok(())
            })
            .with_period(Duration::from_millis(100))
            .with_deadline(Duration::from_millis(50)),
        )
        .expect("should add");

    sched.start().expect("should start");
    thread::sleep(Duration::from_millis(1_050));
    sched.stop_all();

    let stats = sched.get_stats("late").expect("should read stats");
    assert!(
        (4..=6).contains(&stats.runs),
        "expected roughly five runs, saw {}",
        stats.runs
    );
    assert_eq!(stats.overruns, stats.runs, "every run overran its deadline");
}

/// WHY: the warn policy must leave cadence untouched, only counting.
/// WHAT: the same late task under warn completes roughly its full rate
/// with every run counted as an overrun.
#[test]
#[serial]
#[traced_test]
#[ntest::timeout(20_000)]
fn warn_counts_overruns_without_skipping() {
    let sched = Scheduler::builder()
        .with_policy(Policy::Priority)
        .with_parallelism(1)
        .with_overrun_policy(OverrunPolicy::Warn)
        .build();

    sched
        .add_task(
            Task::new("late", || {
                thread::sleep(Duration::from_millis(80));
                Ok(())
            })
            .with_period(Duration::from_millis(100))
            .with_deadline(Duration::from_millis(50)),
        )
        .expect("should add");

    sched.start().expect("should start");
    thread::sleep(Duration::from_millis(1_050));
    sched.stop_all();

    let stats = sched.get_stats("late").expect("should read stats");
    assert!(
        (8..=11).contains(&stats.runs),
        "expected near-full cadence, saw {}",
        stats.runs
    );
    assert_eq!(stats.overruns, stats.runs);
}
