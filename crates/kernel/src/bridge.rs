// Implements the host-OS signal bridge: a bound signal becomes a
// `trigger_task` call for an event-driven task.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
    thread,
};

use signal_hook::iterator::{backend::Handle, Signals};

use crate::{
    errors::{SchedError, SchedResult},
    scheduler::Core,
};

/// Maps host-OS signals onto task triggers.
///
/// The first bind spawns one dedicated consumer thread over signal-hook's
/// iterator; the handler side of that crate only writes to its self-pipe,
/// so no scheduler lock is ever touched in async-signal context. Later
/// binds feed the same iterator.
#[derive(Default)]
pub(crate) struct SignalBridge {
    state: Mutex<BridgeState>,
}

#[derive(Default)]
struct BridgeState {
    bindings: HashMap<i32, String>,
    handle: Option<Handle>,
    consumer: Option<thread::JoinHandle<()>>,
}

impl SignalBridge {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bind(core: &Arc<Core>, signum: i32, name: &str) -> SchedResult<()> {
        // the bound task must exist at bind time
        let _existing = core.lookup(name)?;

        let mut state = core.bridge.state.lock().unwrap();
        state.bindings.insert(signum, name.to_string());

        if let Some(handle) = &state.handle {
            handle
                .add_signal(signum)
                .map_err(|err| SchedError::SignalBind(err.to_string()))?;
            tracing::debug!("signal {signum} bound to task {name}");
            return Ok(());
        }

        let mut signals =
            Signals::new([signum]).map_err(|err| SchedError::SignalBind(err.to_string()))?;
        state.handle = Some(signals.handle());

        let core_ref: Weak<Core> = Arc::downgrade(core);
        let consumer = thread::Builder::new()
            .name("cadence_signals".to_string())
            .spawn(move || {
                for signum in signals.forever() {
                    let Some(core) = core_ref.upgrade() else { break };
                    let target = core.bridge.state.lock().unwrap().bindings.get(&signum).cloned();
                    match target {
                        Some(task) => {
                            tracing::debug!("signal {signum} triggering task {task}");
                            if let Err(err) = core.trigger_by_name(&task) {
                                tracing::warn!("signal {signum} could not trigger {task}: {err}");
                            }
                        }
                        None => {
                            tracing::debug!("signal {signum} delivered without a binding");
                        }
                    }
                }
                tracing::debug!("signal bridge consumer stopped");
            })
            .map_err(|err| SchedError::SignalBind(err.to_string()))?;
        state.consumer = Some(consumer);

        tracing::debug!("signal {signum} bound to task {name}; bridge consumer started");
        Ok(())
    }

    /// Stop the consumer thread; called on scheduler shutdown.
    pub(crate) fn close(&self) {
        let (handle, consumer) = {
            let mut state = self.state.lock().unwrap();
            (state.handle.take(), state.consumer.take())
        };
        if let Some(handle) = handle {
            handle.close();
        }
        if let Some(consumer) = consumer {
            if consumer.thread().id() != thread::current().id() {
                let _unused = consumer.join();
            }
        }
    }
}
