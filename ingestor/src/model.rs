use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named log a record is appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sheet {
    TelemetryLogs,
    AccessLogs,
}

impl Sheet {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sheet::TelemetryLogs => "telemetry_logs",
            Sheet::AccessLogs => "access_logs",
        }
    }
}

impl FromStr for Sheet {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "telemetry_logs" => Ok(Sheet::TelemetryLogs),
            "access_logs" => Ok(Sheet::AccessLogs),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmState {
    Normal,
    Warn,
    Alarm,
}

impl AlarmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmState::Normal => "NORMAL",
            AlarmState::Warn => "WARN",
            AlarmState::Alarm => "ALARM",
        }
    }
}

impl FromStr for AlarmState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORMAL" => Ok(AlarmState::Normal),
            "WARN" => Ok(AlarmState::Warn),
            "ALARM" => Ok(AlarmState::Alarm),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DoorState {
    Locked,
    Unlocked,
}

impl DoorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoorState::Locked => "LOCKED",
            DoorState::Unlocked => "UNLOCKED",
        }
    }
}

impl FromStr for DoorState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOCKED" => Ok(DoorState::Locked),
            "UNLOCKED" => Ok(DoorState::Unlocked),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessResult {
    Granted,
    Denied,
    Lockout,
}

impl AccessResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessResult::Granted => "GRANTED",
            AccessResult::Denied => "DENIED",
            AccessResult::Lockout => "LOCKOUT",
        }
    }
}

impl FromStr for AccessResult {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GRANTED" => Ok(AccessResult::Granted),
            "DENIED" => Ok(AccessResult::Denied),
            "LOCKOUT" => Ok(AccessResult::Lockout),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessReason {
    PinMatch,
    InvalidPin,
    UserNotFound,
    MaxAttemptsExceeded,
}

impl AccessReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessReason::PinMatch => "PIN_MATCH",
            AccessReason::InvalidPin => "INVALID_PIN",
            AccessReason::UserNotFound => "USER_NOT_FOUND",
            AccessReason::MaxAttemptsExceeded => "MAX_ATTEMPTS_EXCEEDED",
        }
    }
}

impl FromStr for AccessReason {
    type Err = ();

    /// Accepts the older firmware spellings as aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PIN_MATCH" | "VALID_PIN" => Ok(AccessReason::PinMatch),
            "INVALID_PIN" => Ok(AccessReason::InvalidPin),
            "USER_NOT_FOUND" => Ok(AccessReason::UserNotFound),
            "MAX_ATTEMPTS_EXCEEDED" | "MAX_FAILED_ATTEMPTS" => {
                Ok(AccessReason::MaxAttemptsExceeded)
            }
            _ => Err(()),
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(Sheet, AlarmState, DoorState, AccessResult, AccessReason);

/// Periodic sensor/actuator snapshot from a monitored device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub device_id: String,
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub fan1_on: bool,
    pub fan2_on: bool,
    pub alarm_state: AlarmState,
    pub door_state: DoorState,
    pub wifi_rssi: i32,
    pub warn_threshold: f64,
    pub stage2_threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Outcome of one authentication attempt at the keypad
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogRecord {
    pub device_id: String,
    pub user_id: String,
    pub display_name: String,
    pub result: AccessResult,
    pub reason: AccessReason,
    pub failed_count: u32,
    /// Seconds remaining in the lockout, 0 when not locked.
    pub lockout_until: u32,
    pub door_state: DoorState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Telemetry(TelemetryRecord),
    Access(AccessLogRecord),
}

impl Record {
    pub fn sheet(&self) -> Sheet {
        match self {
            Record::Telemetry(_) => Sheet::TelemetryLogs,
            Record::Access(_) => Sheet::AccessLogs,
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            Record::Telemetry(t) => &t.device_id,
            Record::Access(a) => &a.device_id,
        }
    }

    /// Query-string form, the way devices send it. Includes `sheet`.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("sheet", self.sheet().to_string())];
        match self {
            Record::Telemetry(t) => {
                params.extend([
                    ("device_id", t.device_id.clone()),
                    ("temperature_c", t.temperature_c.to_string()),
                    ("humidity_pct", t.humidity_pct.to_string()),
                    ("fan1_on", t.fan1_on.to_string()),
                    ("fan2_on", t.fan2_on.to_string()),
                    ("alarm_state", t.alarm_state.to_string()),
                    ("door_state", t.door_state.to_string()),
                    ("wifi_rssi", t.wifi_rssi.to_string()),
                    ("warn_threshold", t.warn_threshold.to_string()),
                    ("stage2_threshold", t.stage2_threshold.to_string()),
                ]);
                if let Some(ts) = &t.timestamp {
                    params.push(("timestamp", ts.clone()));
                }
            }
            Record::Access(a) => {
                params.extend([
                    ("device_id", a.device_id.clone()),
                    ("user_id", a.user_id.clone()),
                    ("display_name", a.display_name.clone()),
                    ("result", a.result.to_string()),
                    ("reason", a.reason.to_string()),
                    ("failed_count", a.failed_count.to_string()),
                    ("lockout_until", a.lockout_until.to_string()),
                    ("door_state", a.door_state.to_string()),
                ]);
                if let Some(ts) = &a.timestamp {
                    params.push(("timestamp", ts.clone()));
                }
            }
        }
        params
    }
}

impl From<TelemetryRecord> for Record {
    fn from(t: TelemetryRecord) -> Self {
        Record::Telemetry(t)
    }
}

impl From<AccessLogRecord> for Record {
    fn from(a: AccessLogRecord) -> Self {
        Record::Access(a)
    }
}

/// A persisted row: the record plus its position in the log
#[derive(Debug, Clone, Serialize)]
pub struct Stored<T> {
    pub id: i64,
    pub received_at: DateTime<Utc>,
    #[serde(flatten)]
    pub record: T,
}

/// Acknowledgement returned for every accepted append
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
    pub sheet: Sheet,
    pub row: i64,
}

impl Ack {
    pub fn new(sheet: Sheet, row: i64) -> Self {
        Self {
            ok: true,
            sheet,
            row,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: String,
}

/// REST API response wrapper
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub data: Vec<Stored<T>>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Row order for list queries. Ascending is arrival order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Access results counted over a time window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccessCounts {
    pub granted: u64,
    pub denied: u64,
    pub lockout: u64,
}

impl AccessCounts {
    pub fn add(&mut self, result: AccessResult, n: u64) {
        match result {
            AccessResult::Granted => self.granted += n,
            AccessResult::Denied => self.denied += n,
            AccessResult::Lockout => self.lockout += n,
        }
    }
}

/// Dashboard view: newest telemetry row plus recent access outcomes
#[derive(Debug, Serialize)]
pub struct Summary {
    pub device_id: Option<String>,
    pub since: DateTime<Utc>,
    pub latest_telemetry: Option<Stored<TelemetryRecord>>,
    pub access: AccessCounts,
}

/// Consecutive failures and lockout expiry for one `(device_id, user_id)` pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessState {
    pub failed_count: u32,
    /// Unix seconds; 0 when no lockout was ever started.
    pub lockout_expires_at: i64,
}

#[derive(Debug, Serialize)]
pub struct AccessStateResponse {
    pub device_id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub state: AccessState,
    pub lockout_remaining: u32,
}
