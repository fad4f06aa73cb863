//! Lifecycle state machine
//!
//! Pure decision functions shared by the driver and reverse-proxy engines:
//! which path a reconcile takes for the current state, how `lastUpdate`
//! is debounced, and how long to wait before the next attempt.

use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use sha2::{Digest, Sha256};

use crate::crd::{ConditionType, DriverState, LastUpdate};

/// Requeue interval after success, and the floor of every backoff
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);
/// Cap of the exponential backoff
pub const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Continuous failure after which a resource is parked in `Failed`
pub const MAX_RETRY_DURATION: Duration = Duration::from_secs(30 * 60);

/// What a reconcile does for the current state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Path {
    /// Initialize, validate and converge the spec
    Resync,
    /// Recompute status only
    CheckStateOnly,
    /// Terminal until the spec changes or an update is forced
    Stop,
}

/// Route a reconcile on `(state, changed, force_update)`
pub fn decide_path(state: DriverState, changed: bool, force_update: bool) -> Path {
    match state {
        DriverState::Running | DriverState::Succeeded => {
            if changed {
                Path::Resync
            } else {
                Path::CheckStateOnly
            }
        }
        DriverState::InvalidConfig | DriverState::Failed => {
            if force_update || changed {
                Path::Resync
            } else {
                Path::Stop
            }
        }
        DriverState::NoState | DriverState::Updating => Path::Resync,
    }
}

/// Requeue directive returned by an engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requeue {
    Never,
    Immediately,
    After(Duration),
}

impl From<Requeue> for Action {
    fn from(requeue: Requeue) -> Self {
        match requeue {
            Requeue::Never => Action::await_change(),
            Requeue::Immediately => Action::requeue(Duration::ZERO),
            Requeue::After(d) => Action::requeue(d),
        }
    }
}

/// First 8 bytes (little endian) of the SHA-256 of `data`
pub fn spec_hash(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

/// New `lastUpdate`; the time only moves when the condition or message changes
pub fn set_last_status_update(
    old: &LastUpdate,
    condition: Option<ConditionType>,
    error_message: &str,
    now: DateTime<Utc>,
) -> LastUpdate {
    let time = if old.condition == condition && old.error_message == error_message {
        old.time.or(Some(now))
    } else {
        Some(now)
    };
    LastUpdate {
        condition,
        time,
        error_message: error_message.to_string(),
    }
}

/// Time spent in the recorded condition
pub fn time_in_condition(last: &LastUpdate, now: DateTime<Utc>) -> Duration {
    last.time
        .and_then(|t| (now - t).to_std().ok())
        .map(|d| Duration::from_secs(d.as_secs()))
        .unwrap_or_default()
}

fn doubled_interval(elapsed: Duration) -> Duration {
    (elapsed * 2).clamp(DEFAULT_RETRY_INTERVAL, MAX_RETRY_INTERVAL)
}

/// Outcome of a failed sync
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureDecision {
    Retry(Duration),
    /// Give up and park the resource in `Failed`
    Escalate,
}

/// Backoff after a failed sync, from the previous `lastUpdate`
///
/// Only a failure that follows an `Error` condition grows the interval.
pub fn failure_decision(old: &LastUpdate, now: DateTime<Utc>) -> FailureDecision {
    if old.condition != Some(ConditionType::Error) {
        return FailureDecision::Retry(DEFAULT_RETRY_INTERVAL);
    }
    let elapsed = time_in_condition(old, now);
    if elapsed >= MAX_RETRY_DURATION {
        FailureDecision::Escalate
    } else {
        FailureDecision::Retry(doubled_interval(elapsed))
    }
}

/// Requeue after a status-only reconcile
///
/// A freshly `Succeeded` resource is polled with a growing interval until
/// the max duration passes, then left to watch events.
pub fn success_requeue(
    old_state: DriverState,
    old_last: &LastUpdate,
    new_state: DriverState,
    now: DateTime<Utc>,
) -> (Requeue, Duration) {
    match new_state {
        DriverState::Running if old_state == DriverState::Running => {
            (Requeue::Never, DEFAULT_RETRY_INTERVAL)
        }
        DriverState::Succeeded if old_state == DriverState::Succeeded => {
            let elapsed = time_in_condition(old_last, now);
            if elapsed >= MAX_RETRY_DURATION {
                (Requeue::Never, DEFAULT_RETRY_INTERVAL)
            } else {
                let interval = doubled_interval(elapsed);
                (Requeue::After(interval), interval)
            }
        }
        _ => (
            Requeue::After(DEFAULT_RETRY_INTERVAL),
            DEFAULT_RETRY_INTERVAL,
        ),
    }
}

/// State reported after a successful sync or status check
pub fn settled_state(running: bool, calc_failed: bool) -> DriverState {
    if running {
        DriverState::Running
    } else if calc_failed {
        DriverState::Updating
    } else {
        DriverState::Succeeded
    }
}
