use std::sync::Arc;
use std::time::Instant;

use chrono::Local;

use crate::alarm::display::{Departure, GroupHandle, GroupTable, MemberSlot};
use crate::alarm::events::{AlarmEvent, EventSink};
use crate::alarm::model::Revision;
use crate::alarm::registry::AlarmRegistry;
use crate::alarm::service::Shared;

/// The one thread owning the wait-for-nearest-deadline protocol.
///
/// Lock order here and everywhere else: registry mutex, then group
/// table, then group state. The condvar wait releases the registry
/// mutex atomically; nothing else blocks while holding it.
pub(crate) fn run(shared: Arc<Shared>, table: Arc<GroupTable>, sink: EventSink) {
    let mut registry = shared.lock_registry();
    loop {
        if registry.shutdown {
            break;
        }

        if registry.dirty {
            registry.dirty = false;
            let retired = reconcile(&mut registry, &table, &sink);
            if !retired.is_empty() {
                drop(registry);
                table.teardown(&retired);
                registry = shared.lock_registry();
                continue;
            }
        }

        let now = Instant::now();
        match registry.peek_min() {
            None => {
                registry.current_deadline = None;
                log::debug!("dispatcher idle, registry empty");
                registry = shared.wait(registry);
            }
            Some((deadline, _)) if deadline <= now => {
                if let Some(alarm) = registry.pop_due(now) {
                    log::debug!("alarm {} expired in group {}", alarm.alarm_id, alarm.group_id);
                    drop(registry);
                    sink(AlarmEvent::Expired {
                        alarm_id: alarm.alarm_id,
                        group_id: alarm.group_id,
                        at: Local::now(),
                        message: alarm.message,
                    });
                    registry = shared.lock_registry();
                }
            }
            Some((deadline, alarm_id)) => {
                registry.current_deadline = Some(deadline);
                log::debug!("dispatcher waiting on alarm {alarm_id}");
                let timeout = deadline.saturating_duration_since(now);
                registry = shared.wait_timeout(registry, timeout);
                // Woken early or timed out; either way re-evaluate the
                // minimum from scratch.
            }
        }
    }
    drop(registry);
    table.teardown_all();
    log::debug!("dispatcher stopped");
}

/// Brings group display state in line with registry membership: spawns
/// a worker the first time a group gains a member, hands same-group
/// edits to the member slot, queues departures for alarms that expired
/// or moved away, and marks emptied groups for teardown.
fn reconcile(registry: &mut AlarmRegistry, table: &GroupTable, sink: &EventSink) -> Vec<u32> {
    let now = Instant::now();
    let mut groups = table.write_groups();

    for alarm in registry.iter_mut() {
        let group_id = alarm.group_id;
        let handle = groups
            .entry(group_id)
            .or_insert_with(|| GroupHandle::spawn(group_id, Arc::clone(sink)));
        let mut state = handle.cell.lock_state();
        let slot = state
            .members
            .iter()
            .position(|member| member.alarm_id == alarm.alarm_id);
        match slot {
            Some(index) => {
                // Covers a round-trip move back to this group too: the
                // slot survived, so the worker sees an in-place edit.
                if alarm.revision != Revision::Unchanged {
                    let member = &mut state.members[index];
                    member.interval = alarm.interval;
                    member.message = alarm.message.clone();
                    member.revision = Revision::EditedSameGroup;
                    alarm.revision = Revision::Unchanged;
                    handle.cell.notify();
                }
            }
            None => {
                // New member, either fresh or moved in from another
                // group; it announces immediately either way.
                state.members.push(MemberSlot {
                    alarm_id: alarm.alarm_id,
                    interval: alarm.interval,
                    message: alarm.message.clone(),
                    revision: Revision::Unchanged,
                    next_announce: now,
                });
                alarm.revision = Revision::Unchanged;
                handle.cell.notify();
            }
        }
    }

    let mut retired = Vec::new();
    for (group_id, handle) in groups.iter_mut() {
        let mut state = handle.cell.lock_state();
        let mut departed = Vec::new();
        state.members.retain(|member| {
            let stays = registry.group_of(member.alarm_id) == Some(*group_id);
            if !stays {
                departed.push(Departure {
                    alarm_id: member.alarm_id,
                    message: member.message.clone(),
                });
            }
            stays
        });
        if !departed.is_empty() {
            state.departed.append(&mut departed);
            handle.cell.notify();
        }
        if state.members.is_empty() {
            state.closing = true;
            handle.cell.notify();
            retired.push(*group_id);
        }
    }
    retired
}
