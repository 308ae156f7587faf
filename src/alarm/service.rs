use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Local;

use crate::alarm::dispatcher;
use crate::alarm::display::GroupTable;
use crate::alarm::errors::{AlarmError, fatal};
use crate::alarm::events::{AlarmEvent, EventSink};
use crate::alarm::model::Alarm;
use crate::alarm::registry::AlarmRegistry;

/// Registry plus the condvar the dispatcher sleeps on. Signals are
/// sent while the mutex is held, so a change that moves the minimum
/// deadline has woken the dispatcher before the caller gets control
/// back.
pub(crate) struct Shared {
    registry: Mutex<AlarmRegistry>,
    cond: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            registry: Mutex::new(AlarmRegistry::new()),
            cond: Condvar::new(),
        }
    }

    /// Core-thread lock: poisoning is unrecoverable here.
    pub(crate) fn lock_registry(&self) -> MutexGuard<'_, AlarmRegistry> {
        self.registry
            .lock()
            .unwrap_or_else(|_| fatal("alarm registry mutex poisoned"))
    }

    /// Intake-side lock: poisoning surfaces as an error the caller can
    /// report before the process exits.
    fn try_lock_registry(&self) -> Result<MutexGuard<'_, AlarmRegistry>, AlarmError> {
        self.registry
            .lock()
            .map_err(|_| AlarmError::Synchronization("alarm registry mutex poisoned".to_string()))
    }

    pub(crate) fn wait<'a>(
        &self,
        guard: MutexGuard<'a, AlarmRegistry>,
    ) -> MutexGuard<'a, AlarmRegistry> {
        self.cond
            .wait(guard)
            .unwrap_or_else(|_| fatal("alarm condvar wait failed"))
    }

    pub(crate) fn wait_timeout<'a>(
        &self,
        guard: MutexGuard<'a, AlarmRegistry>,
        timeout: Duration,
    ) -> MutexGuard<'a, AlarmRegistry> {
        self.cond
            .wait_timeout(guard, timeout)
            .unwrap_or_else(|_| fatal("alarm condvar wait failed"))
            .0
    }

    fn notify(&self) {
        self.cond.notify_all();
    }
}

/// The in-process alarm command processor: a deadline-ordered registry,
/// one dispatcher thread, and one display worker per live group.
/// Observable output goes through the [`EventSink`] given to `start`.
pub struct AlarmService {
    shared: Arc<Shared>,
    table: Arc<GroupTable>,
    sink: EventSink,
    dispatcher: Option<JoinHandle<()>>,
}

impl AlarmService {
    pub fn start(sink: EventSink) -> Result<Self> {
        let shared = Arc::new(Shared::new());
        let table = Arc::new(GroupTable::new());

        let dispatcher_shared = Arc::clone(&shared);
        let dispatcher_table = Arc::clone(&table);
        let dispatcher_sink = Arc::clone(&sink);
        let dispatcher = thread::Builder::new()
            .name("alarm-dispatcher".to_string())
            .spawn(move || dispatcher::run(dispatcher_shared, dispatcher_table, dispatcher_sink))
            .context("failed to spawn alarm dispatcher thread")?;

        Ok(Self {
            shared,
            table,
            sink,
            dispatcher: Some(dispatcher),
        })
    }

    /// Submits a new alarm due `interval` from now. Duplicate ids are
    /// rejected; route those to [`AlarmService::change_alarm`] instead.
    pub fn submit_alarm(
        &self,
        alarm_id: u32,
        group_id: u32,
        interval: Duration,
        message: &str,
    ) -> Result<(), AlarmError> {
        let alarm = Alarm::new(alarm_id, group_id, interval, message, Instant::now());
        let event = AlarmEvent::Inserted {
            alarm_id,
            group_id,
            interval_secs: interval.as_secs(),
            at: Local::now(),
            message: alarm.message.clone(),
        };
        {
            let mut registry = self.shared.try_lock_registry()?;
            let undercuts = registry.insert(alarm)?;
            if undercuts {
                log::debug!("alarm {alarm_id} moved the minimum deadline");
            }
            self.shared.notify();
        }
        (self.sink)(event);
        Ok(())
    }

    /// Applies an edit to an existing alarm: the deadline resets to
    /// `now + interval`, and the display side announces the change (or
    /// the group move) on its next observation.
    pub fn change_alarm(
        &self,
        alarm_id: u32,
        group_id: u32,
        interval: Duration,
        message: &str,
    ) -> Result<(), AlarmError> {
        let mut registry = self.shared.try_lock_registry()?;
        let outcome = registry.apply_change(alarm_id, group_id, interval, message, Instant::now())?;
        if outcome.moved_group {
            log::debug!(
                "alarm {alarm_id} moved from group {} to {group_id}",
                outcome.old_group_id
            );
        }
        log::trace!(
            "alarm {alarm_id} deadline reset to {:?}",
            outcome.new_deadline
        );
        self.shared.notify();
        Ok(())
    }

    /// `(alarm_id, group_id)` pairs in deadline order, soonest first.
    pub fn queue_snapshot(&self) -> Vec<(u32, u32)> {
        self.shared.lock_registry().snapshot()
    }

    /// Groups that currently have a live display worker, ascending.
    pub fn active_groups(&self) -> Vec<u32> {
        self.table.active_groups()
    }

    pub fn pending_alarms(&self) -> usize {
        self.shared.lock_registry().len()
    }

    /// Stops the dispatcher and joins every worker thread. Pending
    /// alarms are dropped without expiry lines.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(dispatcher) = self.dispatcher.take() else {
            return;
        };
        {
            let mut registry = self.shared.lock_registry();
            registry.shutdown = true;
            self.shared.notify();
        }
        if dispatcher.join().is_err() {
            log::error!("alarm dispatcher panicked");
        }
    }
}

impl Drop for AlarmService {
    fn drop(&mut self) {
        self.stop();
    }
}
