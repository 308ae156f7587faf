use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlarmError {
    #[error("alarm id {0} is already present")]
    DuplicateId(u32),
    #[error("no alarm with id {0}")]
    UnknownAlarm(u32),
    #[error("shared alarm state is unusable: {0}")]
    Synchronization(String),
}

/// Once a lock is poisoned or a primitive fails, the shared-state
/// protocol can no longer be trusted; the process must not limp on.
pub(crate) fn fatal(context: &str) -> ! {
    log::error!("fatal: {context}");
    std::process::abort();
}
