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

/// WHY: the inbox contract is strict FIFO per task.
/// WHAT: three messages sent in order arrive in order, opaque payloads
/// intact.
#[test]
fn inbox_is_fifo_per_task() {
    let sched = Scheduler::new(Policy::Priority);
    sched
        .add_task(Task::new("mailbox", || Ok(())).event_driven())
        .expect("should add");

    for value in [1_u32, 2, 3] {
        sched.send_message("mailbox", value).expect("should send");
    }

    for expected in [1_u32, 2, 3] {
        let msg = sched
            .receive_message("mailbox", Some(Duration::from_millis(100)))
            .expect("should receive");
        let value = msg.downcast::<u32>().expect("payload survives opaquely");
        assert_eq!(*value, expected);
    }
}

/// WHY: a timed receive on an empty inbox must report Timeout, not hang
/// or return garbage.
#[test]
fn receive_times_out_on_an_empty_inbox() {
    let sched = Scheduler::new(Policy::Priority);
    sched
        .add_task(Task::new("quiet", || Ok(())).event_driven())
        .expect("should add");

    let err = sched
        .receive_message("quiet", Some(Duration::from_millis(50)))
        .expect_err("nothing was ever sent");
    assert_eq!(err, SchedError::Timeout);
}

/// WHY: messaging to an unregistered name is an API error.
#[test]
fn messaging_unknown_tasks_fails() {
    let sched = Scheduler::new(Policy::Priority);
    assert_eq!(
        sched.send_message("nobody", 1_u32),
        Err(SchedError::UnknownTask("nobody".into()))
    );
    assert!(sched.receive_message("nobody", None).is_err());
}

/// WHY: a send before a cross-thread receive must be observed by the
/// matched receive (happens-before through the inbox).
/// WHAT: a producer task pushes into a sibling's inbox from a worker;
/// the embedder thread receives all values in order.
#[test]
#[serial]
#[traced_test]
#[ntest::timeout(20_000)]
fn worker_to_embedder_messaging_preserves_order() {
    let sched = Scheduler::builder()
        .with_policy(Policy::Priority)
        .with_parallelism(2)
        .build();

    sched
        .add_task(Task::new("sink", || Ok(())).event_driven())
        .expect("should add");

    let producer_side = sched.clone();
    sched
        .add_task(
            Task::new("producer", move || {
                for value in 0_u32..5 {
                    producer_side.send_message("sink", value)?;
                }
                Ok(())
            })
            .event_driven(),
        )
        .expect("should add");

    sched.start().expect("should start");
    sched.trigger_task("producer").expect("should trigger");

    for expected in 0_u32..5 {
        let msg = sched
            .receive_message("sink", Some(Duration::from_secs(2)))
            .expect("should receive in time");
        let value = msg.downcast::<u32>().expect("payload survives opaquely");
        assert_eq!(*value, expected);
    }

    sched.stop_all();
}

/// WHY: `remove_task` frees the name immediately and a trigger in the gap
/// must fail with UnknownTask; re-adding under the same name succeeds.
#[test]
#[serial]
#[traced_test]
#[ntest::timeout(20_000)]
fn remove_readd_round_trip_with_live_workers() {
    let sched = Scheduler::builder()
        .with_policy(Policy::Priority)
        .with_parallelism(1)
        .build();
    sched
        .add_task(Task::new("revolving", || Ok(())).event_driven())
        .expect("should add");
    sched.start().expect("should start");

    sched.trigger_task("revolving").expect("should trigger");
    assert!(wait_until(Duration::from_secs(2), || {
        sched.get_stats("revolving").expect("should read stats").runs == 1
    }));

    sched.remove_task("revolving").expect("should remove");
    assert_eq!(
        sched.trigger_task("revolving"),
        Err(SchedError::UnknownTask("revolving".into()))
    );

    sched
        .add_task(Task::new("revolving", || Ok(())).event_driven())
        .expect("re-add should succeed");
    sched.trigger_task("revolving").expect("should trigger");
    assert!(wait_until(Duration::from_secs(2), || {
        sched.get_stats("revolving").expect("should read stats").runs == 1
    }));

    sched.stop_all();
}
