use std::{thread, time::Duration};

use serial_test::serial;
use tracing_test::traced_test;

use cadence_kernel::{Policy, SchedError, Scheduler, Task};

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

/// WHY: a bound host-OS signal is an event trigger; each delivery must
/// release the bound task once.
/// WHAT: SIGUSR1 bound to an event task; two raises produce two runs.
#[test]
#[serial]
#[traced_test]
#[ntest::timeout(20_000)]
fn bound_signal_triggers_the_task() {
    let sched = Scheduler::builder()
        .with_policy(Policy::Priority)
        .with_parallelism(2)
        .build();

    sched
        .add_task(Task::new("handler", || Ok(())).event_driven())
        .expect("should add");
    sched.start().expect("should start");

    sched
        .bind_signal(signal_hook::consts::SIGUSR1, "handler")
        .expect("should bind");

    signal_hook::low_level::raise(signal_hook::consts::SIGUSR1).expect("should raise");
    assert!(wait_until(Duration::from_secs(5), || {
        sched.get_stats("handler").expect("should read stats").runs == 1
    }));

    signal_hook::low_level::raise(signal_hook::consts::SIGUSR1).expect("should raise");
    assert!(wait_until(Duration::from_secs(5), || {
        sched.get_stats("handler").expect("should read stats").runs == 2
    }));

    sched.stop_all();
}

/// WHY: binding a signal to an unregistered task must fail at bind time,
/// not at delivery.
#[test]
#[serial]
fn binding_to_unknown_task_fails() {
    let sched = Scheduler::new(Policy::Priority);
    assert_eq!(
        sched.bind_signal(signal_hook::consts::SIGUSR2, "ghost"),
        Err(SchedError::UnknownTask("ghost".into()))
    );
}
