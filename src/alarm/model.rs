use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Messages longer than this are truncated on intake.
pub const MESSAGE_MAX: usize = 128;

/// Upper bound on a requested interval, one year. Keeps deadline
/// arithmetic comfortably inside `Instant`'s range.
pub const INTERVAL_MAX_SECS: u64 = 31_536_000;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Revision {
    Unchanged,
    EditedSameGroup,
    EditedDifferentGroup,
}

#[derive(Debug, Clone)]
pub struct Alarm {
    pub alarm_id: u32,
    pub group_id: u32,
    pub interval: Duration,
    pub deadline: Instant,
    pub message: String,
    pub revision: Revision,
}

impl Alarm {
    /// `interval` must be positive; the intake layers validate this
    /// before the core ever sees a request.
    pub fn new(
        alarm_id: u32,
        group_id: u32,
        interval: Duration,
        message: &str,
        now: Instant,
    ) -> Self {
        debug_assert!(interval > Duration::ZERO);
        Self {
            alarm_id,
            group_id,
            interval,
            deadline: now + interval,
            message: truncate_message(message),
            revision: Revision::Unchanged,
        }
    }
}

pub(crate) fn truncate_message(message: &str) -> String {
    if message.len() <= MESSAGE_MAX {
        return message.to_string();
    }
    let mut end = MESSAGE_MAX;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

/// An alarm read from a `--alarms` preload file, not yet submitted.
#[derive(Debug, Clone)]
pub struct PreloadAlarm {
    pub alarm_id: u32,
    pub group_id: u32,
    pub interval: Duration,
    pub message: String,
}

pub fn load_alarm_file(path: &Path) -> Result<Vec<PreloadAlarm>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read alarm file {}", path.display()))?;
    parse_alarm_file_text(&content)
}

pub fn parse_alarm_file_text(content: &str) -> Result<Vec<PreloadAlarm>> {
    let raw = serde_json::from_str::<AlarmFile>(content).map_err(|err| {
        let line = err.line();
        let column = err.column();
        anyhow::anyhow!("invalid JSON at line {line}, column {column}: {err}")
    })?;

    if raw.version != 1 {
        bail!(
            "unsupported alarm file version {}; expected version 1",
            raw.version
        );
    }

    let mut ids = HashSet::new();
    let mut alarms = Vec::with_capacity(raw.alarms.len());
    for alarm in raw.alarms {
        if !ids.insert(alarm.id) {
            bail!("duplicate alarm id found: {}", alarm.id);
        }
        if alarm.interval_seconds == 0 {
            bail!("alarm {} must have interval_seconds > 0", alarm.id);
        }
        if alarm.interval_seconds > INTERVAL_MAX_SECS {
            bail!(
                "alarm {} interval_seconds exceeds the {INTERVAL_MAX_SECS}s limit",
                alarm.id
            );
        }
        alarms.push(PreloadAlarm {
            alarm_id: alarm.id,
            group_id: alarm.group,
            interval: Duration::from_secs(alarm.interval_seconds),
            message: truncate_message(&alarm.message),
        });
    }

    Ok(alarms)
}

#[derive(Debug, Deserialize)]
struct AlarmFile {
    version: u32,
    alarms: Vec<AlarmEntryFile>,
}

#[derive(Debug, Deserialize)]
struct AlarmEntryFile {
    id: u32,
    group: u32,
    interval_seconds: u64,
    message: String,
}
