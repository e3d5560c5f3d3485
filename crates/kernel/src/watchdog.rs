// Implements the deadlock watchdog: builds the "task waits on mutex whose
// owner is task" graph and breaks cycles by sacrificing one acquire.

use std::{collections::HashMap, sync::Arc};

use crate::{
    registry::SlotKey,
    scheduler::Core,
    task::{Phase, TaskCell},
};

/// Find cycles in a functional wait-for graph (every task has at most one
/// outstanding acquire, so each node has at most one successor). Returns
/// each cycle once, as the list of member nodes.
pub(crate) fn find_cycles(successor: &HashMap<usize, usize>) -> Vec<Vec<usize>> {
    const UNSEEN: u8 = 0;
    const ON_PATH: u8 = 1;
    const DONE: u8 = 2;

    let mut state: HashMap<usize, u8> = HashMap::new();
    let mut cycles = Vec::new();

    for &start in successor.keys() {
        if state.get(&start).copied().unwrap_or(UNSEEN) != UNSEEN {
            continue;
        }

        let mut path = Vec::new();
        let mut position: HashMap<usize, usize> = HashMap::new();
        let mut current = start;

        loop {
            match state.get(&current).copied().unwrap_or(UNSEEN) {
                DONE => break,
                ON_PATH => {
                    let from = position[&current];
                    cycles.push(path[from..].to_vec());
                    break;
                }
                _ => {}
            }

            state.insert(current, ON_PATH);
            position.insert(current, path.len());
            path.push(current);

            match successor.get(&current) {
                Some(&next) => current = next,
                None => break,
            }
        }

        for node in path {
            state.insert(node, DONE);
        }
    }

    cycles
}

struct WaitEdge {
    mutex: SlotKey,
    cell: Arc<TaskCell>,
    owner: Arc<TaskCell>,
}

impl Core {
    /// One watchdog round: snapshot the protocol table, report every
    /// cycle, and abort the lowest-base-priority member's acquire.
    pub(crate) fn watchdog_tick(&self) {
        let mut table = self.protocol.lock().unwrap();

        // task slot index -> its single outstanding wait edge
        let mut edges: HashMap<usize, WaitEdge> = HashMap::new();
        let mut successor: HashMap<usize, usize> = HashMap::new();
        for (mutex_key, state) in table.slots.iter() {
            let Some(owner) = state.owner.as_ref() else {
                continue;
            };
            for waiter in &state.waiters {
                edges.insert(
                    waiter.key.index(),
                    WaitEdge {
                        mutex: mutex_key,
                        cell: waiter.cell.clone(),
                        owner: owner.cell.clone(),
                    },
                );
                successor.insert(waiter.key.index(), owner.key.index());
            }
        }

        for cycle in find_cycles(&successor) {
            let members: Vec<&WaitEdge> = cycle
                .iter()
                .filter_map(|index| edges.get(index))
                .collect();
            if members.is_empty() {
                continue;
            }

            let names: Vec<&str> = members
                .iter()
                .map(|edge| edge.cell.name.as_str())
                .collect();
            tracing::error!("deadlock cycle detected: {}", names.join(" -> "));

            let victim = members
                .iter()
                .min_by_key(|edge| (edge.cell.base(), edge.cell.key().index()))
                .expect("cycle has at least one member");
            let victim_cell = victim.cell.clone();
            let victim_mutex = victim.mutex;
            let inflated_owner = victim.owner.clone();
            tracing::error!(
                "aborting acquire of task {} (lowest base priority in cycle)",
                victim_cell.name
            );

            if let Some(state) = table.slots.get_mut(victim_mutex) {
                state
                    .waiters
                    .retain(|waiter| waiter.key != victim_cell.key());
            }
            victim_cell.abort_acquire.set();
            {
                let mut phase = victim_cell.phase.lock().unwrap();
                if matches!(*phase, Phase::WaitingMutex(key) if key == victim_mutex) {
                    *phase = Phase::Running;
                }
            }
            victim_cell.phase_event.notify_all();

            // the victim's priority no longer feeds the owner's ceiling
            Self::recompute_chain(&table, &inflated_owner);
        }
    }
}
