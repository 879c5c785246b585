use crate::model::{AccessLogRecord, AccessReason, AccessResult, AccessState, AlarmState, DoorState};

pub const DEFAULT_WARN_THRESHOLD: f64 = 27.0;
pub const DEFAULT_STAGE2_THRESHOLD: f64 = 28.0;
pub const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 3;
pub const DEFAULT_LOCKOUT_SECS: u32 = 120;

/// Identity recorded when a PIN matches no enrolled user.
pub const UNKNOWN_USER: &str = "unknown";

/// Derives the alarm state for a reading.
///
/// Boundary values belong to the higher severity: `t == stage2` is `Alarm`,
/// `t == warn` is `Warn`.
pub fn classify(temperature_c: f64, warn_threshold: f64, stage2_threshold: f64) -> AlarmState {
    if temperature_c >= stage2_threshold {
        AlarmState::Alarm
    } else if temperature_c >= warn_threshold {
        AlarmState::Warn
    } else {
        AlarmState::Normal
    }
}

/// Keypad lockout policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPolicy {
    pub max_failed_attempts: u32,
    pub lockout_secs: u32,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
            lockout_secs: DEFAULT_LOCKOUT_SECS,
        }
    }
}

/// Result of checking an entered PIN against enrolled users
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinOutcome {
    Match { user_id: String, display_name: String },
    WrongPin { user_id: String, display_name: String },
    UnknownUser { user_id: String },
}

impl PinOutcome {
    fn identity(&self) -> (&str, &str) {
        match self {
            PinOutcome::Match {
                user_id,
                display_name,
            }
            | PinOutcome::WrongPin {
                user_id,
                display_name,
            } => (user_id, display_name),
            PinOutcome::UnknownUser { user_id } => (user_id, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    pub result: AccessResult,
    pub reason: AccessReason,
    pub failed_count: u32,
    pub lockout_until: u32,
    pub door_state: DoorState,
    pub next_state: AccessState,
}

impl AccessDecision {
    /// Builds the log record this decision produces.
    pub fn into_record(self, device_id: &str, outcome: &PinOutcome) -> AccessLogRecord {
        let (user_id, display_name) = outcome.identity();
        AccessLogRecord {
            device_id: device_id.to_string(),
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            result: self.result,
            reason: self.reason,
            failed_count: self.failed_count,
            lockout_until: self.lockout_until,
            door_state: self.door_state,
            timestamp: None,
        }
    }
}

impl AccessState {
    /// Seconds of lockout left at `now`, 0 when not locked.
    pub fn lockout_remaining(&self, now: i64) -> u32 {
        if self.lockout_expires_at > now {
            u32::try_from(self.lockout_expires_at - now).unwrap_or(u32::MAX)
        } else {
            0
        }
    }

    pub fn is_locked(&self, now: i64) -> bool {
        self.lockout_remaining(now) > 0
    }

    /// State to persist after `record` is appended at `now`.
    pub fn after_record(record: &AccessLogRecord, now: i64) -> AccessState {
        match record.result {
            AccessResult::Granted => AccessState::default(),
            AccessResult::Denied => AccessState {
                failed_count: record.failed_count,
                lockout_expires_at: 0,
            },
            // Counter restarts once the lockout begins
            AccessResult::Lockout => AccessState {
                failed_count: 0,
                lockout_expires_at: now + i64::from(record.lockout_until),
            },
        }
    }
}

/// Decides the outcome of one keypad attempt.
///
/// Pure: the caller supplies the current state and clock, and persists
/// `next_state`.
pub fn evaluate_attempt(
    state: &AccessState,
    outcome: &PinOutcome,
    policy: &AccessPolicy,
    now: i64,
) -> AccessDecision {
    let remaining = state.lockout_remaining(now);
    if remaining > 0 {
        return AccessDecision {
            result: AccessResult::Lockout,
            reason: AccessReason::MaxAttemptsExceeded,
            failed_count: state.failed_count,
            lockout_until: remaining,
            door_state: DoorState::Locked,
            next_state: *state,
        };
    }

    let (reason, failures) = match outcome {
        PinOutcome::Match { .. } => {
            return AccessDecision {
                result: AccessResult::Granted,
                reason: AccessReason::PinMatch,
                failed_count: 0,
                lockout_until: 0,
                door_state: DoorState::Unlocked,
                next_state: AccessState::default(),
            };
        }
        PinOutcome::WrongPin { .. } => (AccessReason::InvalidPin, state.failed_count + 1),
        PinOutcome::UnknownUser { .. } => (AccessReason::UserNotFound, state.failed_count + 1),
    };

    if failures >= policy.max_failed_attempts && policy.lockout_secs > 0 {
        AccessDecision {
            result: AccessResult::Lockout,
            reason: AccessReason::MaxAttemptsExceeded,
            failed_count: failures,
            lockout_until: policy.lockout_secs,
            door_state: DoorState::Locked,
            next_state: AccessState {
                failed_count: 0,
                lockout_expires_at: now + i64::from(policy.lockout_secs),
            },
        }
    } else {
        AccessDecision {
            result: AccessResult::Denied,
            reason,
            failed_count: failures,
            lockout_until: 0,
            door_state: DoorState::Locked,
            next_state: AccessState {
                failed_count: failures,
                lockout_expires_at: 0,
            },
        }
    }
}
