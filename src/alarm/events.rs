use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};

/// Receives every observable line the core emits. Called with no
/// internal locks held; the callback must be cheap and must not
/// call back into the service that produced the event.
pub type EventSink = Arc<dyn Fn(AlarmEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub enum AlarmEvent {
    Inserted {
        alarm_id: u32,
        group_id: u32,
        interval_secs: u64,
        at: DateTime<Local>,
        message: String,
    },
    Changed {
        alarm_id: u32,
        group_id: u32,
        at: DateTime<Local>,
        message: String,
    },
    Announced {
        alarm_id: u32,
        group_id: u32,
        at: DateTime<Local>,
        message: String,
    },
    StoppedPrinting {
        alarm_id: u32,
        group_id: u32,
        at: DateTime<Local>,
        message: String,
    },
    Expired {
        alarm_id: u32,
        group_id: u32,
        at: DateTime<Local>,
        message: String,
    },
}

impl AlarmEvent {
    pub fn alarm_id(&self) -> u32 {
        match self {
            AlarmEvent::Inserted { alarm_id, .. }
            | AlarmEvent::Changed { alarm_id, .. }
            | AlarmEvent::Announced { alarm_id, .. }
            | AlarmEvent::StoppedPrinting { alarm_id, .. }
            | AlarmEvent::Expired { alarm_id, .. } => *alarm_id,
        }
    }

    pub fn group_id(&self) -> u32 {
        match self {
            AlarmEvent::Inserted { group_id, .. }
            | AlarmEvent::Changed { group_id, .. }
            | AlarmEvent::Announced { group_id, .. }
            | AlarmEvent::StoppedPrinting { group_id, .. }
            | AlarmEvent::Expired { group_id, .. } => *group_id,
        }
    }
}

impl fmt::Display for AlarmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmEvent::Inserted {
                alarm_id,
                group_id,
                interval_secs,
                at,
                message,
            } => write!(
                f,
                "Alarm({alarm_id}) Inserted Into Alarm List at {}: Group({group_id}) {interval_secs} {message}",
                at.timestamp()
            ),
            AlarmEvent::Changed {
                alarm_id,
                group_id,
                at,
                message,
            } => write!(
                f,
                "Alarm({alarm_id}) Changed at {}: Group({group_id}) {message}",
                at.timestamp()
            ),
            AlarmEvent::Announced {
                alarm_id,
                group_id,
                at,
                message,
            } => write!(
                f,
                "Alarm({alarm_id}) Printed by Display Thread of Group({group_id}) at {}: {message}",
                at.timestamp()
            ),
            AlarmEvent::StoppedPrinting {
                alarm_id,
                group_id,
                at,
                message,
            } => write!(
                f,
                "Display Thread of Group({group_id}) Has Stopped Printing Message of Alarm({alarm_id}) at {}: {message}",
                at.timestamp()
            ),
            AlarmEvent::Expired {
                alarm_id,
                group_id,
                at,
                message,
            } => write!(
                f,
                "Alarm({alarm_id}) Expired at {}: Group({group_id}) {message}",
                at.timestamp()
            ),
        }
    }
}
