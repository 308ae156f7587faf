use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Local;

use crate::alarm::errors::fatal;
use crate::alarm::events::{AlarmEvent, EventSink};
use crate::alarm::model::Revision;

/// One announcement slot per member alarm of a group. The worker owns
/// the cadence fields; the dispatcher owns membership and the edit
/// handoff. Both sides go through the group mutex.
pub(crate) struct MemberSlot {
    pub alarm_id: u32,
    pub interval: Duration,
    pub message: String,
    pub revision: Revision,
    pub next_announce: Instant,
}

/// An alarm that left the group (expired or moved away) and still owes
/// the observer a "stopped printing" line.
pub(crate) struct Departure {
    pub alarm_id: u32,
    pub message: String,
}

pub(crate) struct GroupState {
    pub members: Vec<MemberSlot>,
    pub departed: Vec<Departure>,
    pub closing: bool,
}

pub(crate) struct GroupCell {
    state: Mutex<GroupState>,
    cond: Condvar,
}

impl GroupCell {
    fn new() -> Self {
        Self {
            state: Mutex::new(GroupState {
                members: Vec::new(),
                departed: Vec::new(),
                closing: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, GroupState> {
        self.state
            .lock()
            .unwrap_or_else(|_| fatal("group display state poisoned"))
    }

    pub(crate) fn notify(&self) {
        self.cond.notify_all();
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, GroupState>) -> MutexGuard<'a, GroupState> {
        self.cond
            .wait(guard)
            .unwrap_or_else(|_| fatal("group display wait failed"))
    }

    fn wait_timeout<'a>(
        &self,
        guard: MutexGuard<'a, GroupState>,
        timeout: Duration,
    ) -> MutexGuard<'a, GroupState> {
        self.cond
            .wait_timeout(guard, timeout)
            .unwrap_or_else(|_| fatal("group display wait failed"))
            .0
    }
}

pub(crate) struct GroupHandle {
    pub cell: Arc<GroupCell>,
    worker: Option<JoinHandle<()>>,
}

impl GroupHandle {
    /// Spawns the group's display worker. Called by the dispatcher the
    /// moment a group first gains a member.
    pub(crate) fn spawn(group_id: u32, sink: EventSink) -> Self {
        let cell = Arc::new(GroupCell::new());
        let worker_cell = Arc::clone(&cell);
        let worker = thread::Builder::new()
            .name(format!("display-{group_id}"))
            .spawn(move || worker_loop(group_id, worker_cell, sink))
            .unwrap_or_else(|err| fatal(&format!("spawn display worker: {err}")));
        log::debug!("display worker started for group {group_id}");
        Self {
            cell,
            worker: Some(worker),
        }
    }
}

/// Map of live groups. The dispatcher is the only structural writer;
/// intake threads and observability accessors only read.
pub struct GroupTable {
    groups: RwLock<HashMap<u32, GroupHandle>>,
}

impl GroupTable {
    pub(crate) fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn write_groups(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<u32, GroupHandle>> {
        self.groups
            .write()
            .unwrap_or_else(|_| fatal("group table poisoned"))
    }

    pub(crate) fn active_groups(&self) -> Vec<u32> {
        let groups = self
            .groups
            .read()
            .unwrap_or_else(|_| fatal("group table poisoned"));
        let mut ids: Vec<u32> = groups.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Removes the given groups from the table and joins their workers.
    /// Callers must not hold the registry lock: joining waits for the
    /// worker to drain its pending "stopped printing" lines.
    pub(crate) fn teardown(&self, group_ids: &[u32]) {
        let mut workers = Vec::new();
        {
            let mut groups = self.write_groups();
            for group_id in group_ids {
                if let Some(mut handle) = groups.remove(group_id) {
                    handle.cell.lock_state().closing = true;
                    handle.cell.notify();
                    if let Some(worker) = handle.worker.take() {
                        workers.push((*group_id, worker));
                    }
                }
            }
        }
        join_workers(workers);
    }

    /// Abrupt shutdown: drop all members without stop lines and join
    /// every worker.
    pub(crate) fn teardown_all(&self) {
        let mut workers = Vec::new();
        {
            let mut groups = self.write_groups();
            for (group_id, mut handle) in groups.drain() {
                {
                    let mut state = handle.cell.lock_state();
                    state.closing = true;
                    state.members.clear();
                }
                handle.cell.notify();
                if let Some(worker) = handle.worker.take() {
                    workers.push((group_id, worker));
                }
            }
        }
        join_workers(workers);
    }
}

fn join_workers(workers: Vec<(u32, JoinHandle<()>)>) {
    for (group_id, worker) in workers {
        if worker.join().is_err() {
            log::error!("display worker for group {group_id} panicked");
        }
    }
}

fn worker_loop(group_id: u32, cell: Arc<GroupCell>, sink: EventSink) {
    let mut state = cell.lock_state();
    loop {
        let now = Instant::now();
        let mut out: Vec<AlarmEvent> = Vec::new();

        for departure in state.departed.drain(..) {
            out.push(AlarmEvent::StoppedPrinting {
                alarm_id: departure.alarm_id,
                group_id,
                at: Local::now(),
                message: departure.message,
            });
        }

        let mut next_due: Option<Instant> = None;
        for member in state.members.iter_mut() {
            if member.revision == Revision::EditedSameGroup {
                member.revision = Revision::Unchanged;
                member.next_announce = now + member.interval;
                out.push(AlarmEvent::Changed {
                    alarm_id: member.alarm_id,
                    group_id,
                    at: Local::now(),
                    message: member.message.clone(),
                });
            } else if member.next_announce <= now {
                member.next_announce = now + member.interval;
                out.push(AlarmEvent::Announced {
                    alarm_id: member.alarm_id,
                    group_id,
                    at: Local::now(),
                    message: member.message.clone(),
                });
            }
            next_due = Some(match next_due {
                Some(due) => due.min(member.next_announce),
                None => member.next_announce,
            });
        }

        if !out.is_empty() {
            // Emit outside the lock, then rescan: the world may have
            // changed while the lock was released.
            drop(state);
            for event in out {
                sink(event);
            }
            state = cell.lock_state();
            continue;
        }

        if state.closing && state.members.is_empty() {
            break;
        }

        state = match next_due {
            Some(due) => cell.wait_timeout(state, due.saturating_duration_since(Instant::now())),
            None => cell.wait(state),
        };
    }
    drop(state);
    log::debug!("display worker for group {group_id} exiting");
}
