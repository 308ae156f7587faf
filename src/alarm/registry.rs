use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use crate::alarm::errors::AlarmError;
use crate::alarm::model::{Alarm, Revision, truncate_message};

/// Queue ordering: soonest deadline first, ascending alarm id on ties.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
struct QueueKey {
    deadline: Instant,
    alarm_id: u32,
}

/// The shared, deadline-ordered collection of active alarms. Pure
/// single-threaded logic; the service wraps it in a mutex and every
/// time-dependent operation takes `now` so tests stay deterministic.
pub(crate) struct AlarmRegistry {
    queue: BTreeMap<QueueKey, Alarm>,
    index: HashMap<u32, QueueKey>,
    /// Deadline the dispatcher is currently sleeping towards;
    /// `None` while the dispatcher is idle.
    pub(crate) current_deadline: Option<Instant>,
    /// Set on any membership or flag mutation; cleared by the
    /// dispatcher once group state has been reconciled.
    pub(crate) dirty: bool,
    pub(crate) shutdown: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ChangeOutcome {
    pub moved_group: bool,
    pub old_group_id: u32,
    pub new_deadline: Instant,
}

impl AlarmRegistry {
    pub(crate) fn new() -> Self {
        Self {
            queue: BTreeMap::new(),
            index: HashMap::new(),
            current_deadline: None,
            dirty: false,
            shutdown: false,
        }
    }

    /// Inserts in `(deadline, alarm_id)` order. Returns whether the new
    /// alarm undercuts the deadline the dispatcher is waiting on (or the
    /// dispatcher is idle), i.e. whether the wait target just moved.
    pub(crate) fn insert(&mut self, alarm: Alarm) -> Result<bool, AlarmError> {
        if self.index.contains_key(&alarm.alarm_id) {
            return Err(AlarmError::DuplicateId(alarm.alarm_id));
        }
        let key = QueueKey {
            deadline: alarm.deadline,
            alarm_id: alarm.alarm_id,
        };
        let undercuts = self
            .current_deadline
            .is_none_or(|current| alarm.deadline < current);
        self.index.insert(alarm.alarm_id, key);
        self.queue.insert(key, alarm);
        self.dirty = true;
        Ok(undercuts)
    }

    pub(crate) fn peek_min(&self) -> Option<(Instant, u32)> {
        self.queue
            .first_key_value()
            .map(|(key, _)| (key.deadline, key.alarm_id))
    }

    /// Removes and returns the minimum-deadline alarm if it is due.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<Alarm> {
        let (&key, _) = self.queue.first_key_value()?;
        if key.deadline > now {
            return None;
        }
        let alarm = self.queue.remove(&key)?;
        self.index.remove(&alarm.alarm_id);
        self.dirty = true;
        Some(alarm)
    }

    /// Applies an edit in place: the record keeps its identity, the
    /// deadline is reset to `now + new_interval`, and the revision flag
    /// tells the display side what kind of edit happened.
    pub(crate) fn apply_change(
        &mut self,
        alarm_id: u32,
        new_group_id: u32,
        new_interval: Duration,
        new_message: &str,
        now: Instant,
    ) -> Result<ChangeOutcome, AlarmError> {
        let key = *self
            .index
            .get(&alarm_id)
            .ok_or(AlarmError::UnknownAlarm(alarm_id))?;
        let Some(mut alarm) = self.queue.remove(&key) else {
            return Err(AlarmError::Synchronization(
                "registry id index out of sync".to_string(),
            ));
        };

        let old_group_id = alarm.group_id;
        let moved_group = new_group_id != old_group_id;
        alarm.group_id = new_group_id;
        alarm.interval = new_interval;
        alarm.message = truncate_message(new_message);
        alarm.deadline = now + new_interval;
        alarm.revision = if moved_group {
            Revision::EditedDifferentGroup
        } else {
            Revision::EditedSameGroup
        };

        let new_key = QueueKey {
            deadline: alarm.deadline,
            alarm_id,
        };
        let new_deadline = alarm.deadline;
        self.index.insert(alarm_id, new_key);
        self.queue.insert(new_key, alarm);
        self.dirty = true;

        Ok(ChangeOutcome {
            moved_group,
            old_group_id,
            new_deadline,
        })
    }

    pub(crate) fn group_of(&self, alarm_id: u32) -> Option<u32> {
        self.index
            .get(&alarm_id)
            .and_then(|key| self.queue.get(key))
            .map(|alarm| alarm.group_id)
    }

    /// Alarms in deadline order. Callers may flip the revision flag but
    /// must never touch the deadline, which is part of the map key.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Alarm> {
        self.queue.values_mut()
    }

    /// `(alarm_id, group_id)` pairs in deadline order.
    pub(crate) fn snapshot(&self) -> Vec<(u32, u32)> {
        self.queue
            .values()
            .map(|alarm| (alarm.alarm_id, alarm.group_id))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}
