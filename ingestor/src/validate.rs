use crate::errors::ValidationError;
use crate::model::{AccessLogRecord, AccessResult, AccessReason, DoorState, Record, Sheet, TelemetryRecord};
use crate::rules::{classify, DEFAULT_STAGE2_THRESHOLD, DEFAULT_WARN_THRESHOLD};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::debug;

const TEMP_MIN: f64 = -50.0;
const TEMP_MAX: f64 = 100.0;
const HUMIDITY_MIN: f64 = 0.0;
const HUMIDITY_MAX: f64 = 100.0;

const TELEMETRY_FIELDS: &[&str] = &[
    "sheet",
    "timestamp",
    "device_id",
    "temperature_c",
    "humidity_pct",
    "fan1_on",
    "fan2_on",
    "alarm_state",
    "door_state",
    "wifi_rssi",
    "warn_threshold",
    "stage2_threshold",
];

const ACCESS_FIELDS: &[&str] = &[
    "sheet",
    "timestamp",
    "device_id",
    "user_id",
    "display_name",
    "result",
    "reason",
    "failed_count",
    "lockout_until",
    "door_state",
];

/// Raw event as received: field name to string value.
pub type Fields = HashMap<String, String>;

/// Thresholds applied when a telemetry event does not carry its own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdDefaults {
    pub warn_threshold: f64,
    pub stage2_threshold: f64,
}

impl Default for ThresholdDefaults {
    fn default() -> Self {
        Self {
            warn_threshold: DEFAULT_WARN_THRESHOLD,
            stage2_threshold: DEFAULT_STAGE2_THRESHOLD,
        }
    }
}

/// Turns a raw event into a typed record, or rejects it whole.
pub fn parse_record(fields: &Fields, defaults: &ThresholdDefaults) -> Result<Record, ValidationError> {
    let sheet_name = required(fields, "sheet")?;
    let sheet = Sheet::from_str(sheet_name)
        .map_err(|_| ValidationError::UnknownSheet(sheet_name.to_string()))?;

    let known = match sheet {
        Sheet::TelemetryLogs => TELEMETRY_FIELDS,
        Sheet::AccessLogs => ACCESS_FIELDS,
    };
    for key in fields.keys().filter(|k| !known.contains(&k.as_str())) {
        debug!("Ignoring unknown field {} for sheet {}", key, sheet);
    }

    match sheet {
        Sheet::TelemetryLogs => parse_telemetry(fields, defaults).map(Record::Telemetry),
        Sheet::AccessLogs => parse_access(fields).map(Record::Access),
    }
}

fn parse_telemetry(fields: &Fields, defaults: &ThresholdDefaults) -> Result<TelemetryRecord, ValidationError> {
    let device_id = required(fields, "device_id")?.to_string();
    let temperature_c = parse_f64(fields, "temperature_c")?;
    let humidity_pct = parse_f64(fields, "humidity_pct")?;
    let fan1_on = parse_bool(fields, "fan1_on")?;
    let fan2_on = parse_bool(fields, "fan2_on")?;
    let door_state: DoorState = parse_enum(fields, "door_state", "LOCKED or UNLOCKED")?;
    let wifi_rssi = parse_int::<i32>(fields, "wifi_rssi", "an integer")?;

    let warn_threshold = match fields.get("warn_threshold") {
        Some(_) => parse_f64(fields, "warn_threshold")?,
        None => defaults.warn_threshold,
    };
    let stage2_threshold = match fields.get("stage2_threshold") {
        Some(_) => parse_f64(fields, "stage2_threshold")?,
        None => defaults.stage2_threshold,
    };

    let alarm_state = match fields.get("alarm_state") {
        Some(_) => parse_enum(fields, "alarm_state", "NORMAL, WARN or ALARM")?,
        None => classify(temperature_c, warn_threshold, stage2_threshold),
    };

    let record = TelemetryRecord {
        device_id,
        temperature_c,
        humidity_pct,
        fan1_on,
        fan2_on,
        alarm_state,
        door_state,
        wifi_rssi,
        warn_threshold,
        stage2_threshold,
        timestamp: fields.get("timestamp").cloned(),
    };
    validate_telemetry(&record)?;
    Ok(record)
}

fn parse_access(fields: &Fields) -> Result<AccessLogRecord, ValidationError> {
    let record = AccessLogRecord {
        device_id: required(fields, "device_id")?.to_string(),
        user_id: required(fields, "user_id")?.to_string(),
        display_name: required(fields, "display_name")?.to_string(),
        result: parse_enum(fields, "result", "GRANTED, DENIED or LOCKOUT")?,
        reason: parse_enum(
            fields,
            "reason",
            "PIN_MATCH, INVALID_PIN, USER_NOT_FOUND or MAX_ATTEMPTS_EXCEEDED",
        )?,
        failed_count: parse_int::<u32>(fields, "failed_count", "a non-negative integer")?,
        lockout_until: parse_int::<u32>(fields, "lockout_until", "a non-negative integer")?,
        door_state: parse_enum(fields, "door_state", "LOCKED or UNLOCKED")?,
        timestamp: fields.get("timestamp").cloned(),
    };
    validate_access(&record)?;
    Ok(record)
}

/// Validates telemetry constraints and the alarm classification invariant
pub fn validate_telemetry(t: &TelemetryRecord) -> Result<(), ValidationError> {
    validate_device_id(&t.device_id)?;

    if !(TEMP_MIN..=TEMP_MAX).contains(&t.temperature_c) {
        return Err(ValidationError::Inconsistent(format!(
            "Temperature {} out of range [{}, {}]",
            t.temperature_c, TEMP_MIN, TEMP_MAX
        )));
    }

    if !(HUMIDITY_MIN..=HUMIDITY_MAX).contains(&t.humidity_pct) {
        return Err(ValidationError::Inconsistent(format!(
            "Humidity {} out of range [{}, {}]",
            t.humidity_pct, HUMIDITY_MIN, HUMIDITY_MAX
        )));
    }

    if !t.warn_threshold.is_finite() || !t.stage2_threshold.is_finite() {
        return Err(ValidationError::Inconsistent(
            "Thresholds must be finite".to_string(),
        ));
    }

    if t.warn_threshold > t.stage2_threshold {
        return Err(ValidationError::Inconsistent(format!(
            "warn_threshold {} exceeds stage2_threshold {}",
            t.warn_threshold, t.stage2_threshold
        )));
    }

    let expected = classify(t.temperature_c, t.warn_threshold, t.stage2_threshold);
    if t.alarm_state != expected {
        return Err(ValidationError::Inconsistent(format!(
            "alarm_state {} does not match {} for {}C with thresholds {}/{}",
            t.alarm_state, expected, t.temperature_c, t.warn_threshold, t.stage2_threshold
        )));
    }

    Ok(())
}

/// Validates the outcome invariants of an access record
pub fn validate_access(a: &AccessLogRecord) -> Result<(), ValidationError> {
    validate_device_id(&a.device_id)?;

    if a.user_id.trim().is_empty() {
        return Err(ValidationError::Inconsistent(
            "User ID cannot be empty".to_string(),
        ));
    }

    match a.result {
        AccessResult::Lockout => {
            if a.lockout_until == 0 {
                return Err(ValidationError::Inconsistent(
                    "LOCKOUT requires lockout_until > 0".to_string(),
                ));
            }
            if a.door_state != DoorState::Locked {
                return Err(ValidationError::Inconsistent(
                    "LOCKOUT requires door_state LOCKED".to_string(),
                ));
            }
        }
        AccessResult::Granted => {
            if a.reason != AccessReason::PinMatch {
                return Err(ValidationError::Inconsistent(format!(
                    "GRANTED requires reason PIN_MATCH, got {}",
                    a.reason
                )));
            }
            if a.door_state != DoorState::Unlocked {
                return Err(ValidationError::Inconsistent(
                    "GRANTED requires door_state UNLOCKED".to_string(),
                ));
            }
        }
        AccessResult::Denied => {
            if a.door_state != DoorState::Locked {
                return Err(ValidationError::Inconsistent(
                    "DENIED requires door_state LOCKED".to_string(),
                ));
            }
        }
    }

    Ok(())
}

/// Validates any typed record before it is appended.
pub fn validate(record: &Record) -> Result<(), ValidationError> {
    match record {
        Record::Telemetry(t) => validate_telemetry(t),
        Record::Access(a) => validate_access(a),
    }
}

/// Flattens a JSON object body into string fields.
///
/// Strings are kept as-is; numbers and booleans are rendered with their JSON
/// text. `null` counts as absent.
pub fn parse_json_fields(body: &[u8]) -> Result<Fields, ValidationError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| ValidationError::Body(e.to_string()))?;

    let serde_json::Value::Object(map) = value else {
        return Err(ValidationError::Body("expected a JSON object".to_string()));
    };

    let mut fields = Fields::with_capacity(map.len());
    for (key, value) in map {
        let text = match value {
            serde_json::Value::Null => continue,
            serde_json::Value::String(s) => s,
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                return Err(ValidationError::Body(format!(
                    "field {} must be a scalar",
                    key
                )));
            }
        };
        fields.insert(key, text);
    }
    Ok(fields)
}

fn validate_device_id(device_id: &str) -> Result<(), ValidationError> {
    if device_id.trim().is_empty() {
        return Err(ValidationError::Inconsistent(
            "Device ID cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn required<'a>(fields: &'a Fields, name: &str) -> Result<&'a str, ValidationError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| ValidationError::MissingField(name.to_string()))
}

fn parse_f64(fields: &Fields, name: &str) -> Result<f64, ValidationError> {
    let raw = required(fields, name)?;
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ValidationError::malformed(name, raw, "a finite number")),
    }
}

fn parse_int<T: FromStr>(fields: &Fields, name: &str, expected: &str) -> Result<T, ValidationError> {
    let raw = required(fields, name)?;
    raw.trim()
        .parse::<T>()
        .map_err(|_| ValidationError::malformed(name, raw, expected))
}

fn parse_bool(fields: &Fields, name: &str) -> Result<bool, ValidationError> {
    let raw = required(fields, name)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ValidationError::malformed(name, raw, "true or false")),
    }
}

fn parse_enum<T: FromStr>(fields: &Fields, name: &str, expected: &str) -> Result<T, ValidationError> {
    let raw = required(fields, name)?;
    raw.trim()
        .parse::<T>()
        .map_err(|_| ValidationError::malformed(name, raw, expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AlarmState;

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn alarm_fixture() -> Fields {
        fields(&[
            ("sheet", "telemetry_logs"),
            ("device_id", "esp32-smart-server-01"),
            ("temperature_c", "29.8"),
            ("humidity_pct", "70.0"),
            ("fan1_on", "true"),
            ("fan2_on", "true"),
            ("alarm_state", "ALARM"),
            ("door_state", "LOCKED"),
            ("wifi_rssi", "-55"),
            ("warn_threshold", "27.0"),
            ("stage2_threshold", "28.0"),
        ])
    }

    fn lockout_fixture() -> Fields {
        fields(&[
            ("sheet", "access_logs"),
            ("device_id", "esp32-smart-server-01"),
            ("user_id", "unknown"),
            ("display_name", "Unknown"),
            ("result", "LOCKOUT"),
            ("reason", "MAX_ATTEMPTS_EXCEEDED"),
            ("failed_count", "3"),
            ("lockout_until", "120"),
            ("door_state", "LOCKED"),
        ])
    }

    #[test]
    fn test_valid_telemetry() {
        let record = parse_record(&alarm_fixture(), &ThresholdDefaults::default()).unwrap();
        let Record::Telemetry(t) = record else {
            panic!("expected telemetry");
        };
        assert_eq!(t.alarm_state, AlarmState::Alarm);
        assert_eq!(t.wifi_rssi, -55);
        assert!(t.fan2_on);
    }

    #[test]
    fn test_valid_lockout() {
        let record = parse_record(&lockout_fixture(), &ThresholdDefaults::default()).unwrap();
        let Record::Access(a) = record else {
            panic!("expected access record");
        };
        assert_eq!(a.result, AccessResult::Lockout);
        assert_eq!(a.failed_count, 3);
        assert_eq!(a.lockout_until, 120);
    }

    #[test]
    fn test_missing_field_is_named() {
        let mut f = alarm_fixture();
        f.remove("humidity_pct");
        assert_eq!(
            parse_record(&f, &ThresholdDefaults::default()),
            Err(ValidationError::MissingField("humidity_pct".to_string()))
        );
    }

    #[test]
    fn test_missing_sheet() {
        let mut f = alarm_fixture();
        f.remove("sheet");
        assert_eq!(
            parse_record(&f, &ThresholdDefaults::default()),
            Err(ValidationError::MissingField("sheet".to_string()))
        );
    }

    #[test]
    fn test_unknown_sheet() {
        let mut f = alarm_fixture();
        f.insert("sheet".to_string(), "Sheet1".to_string());
        assert!(matches!(
            parse_record(&f, &ThresholdDefaults::default()),
            Err(ValidationError::UnknownSheet(_))
        ));
    }

    #[test]
    fn test_malformed_number() {
        let mut f = alarm_fixture();
        f.insert("temperature_c".to_string(), "hot".to_string());
        let err = parse_record(&f, &ThresholdDefaults::default()).unwrap_err();
        assert!(matches!(err, ValidationError::Malformed { ref field, .. } if field == "temperature_c"));
    }

    #[test]
    fn test_nan_rejected() {
        let mut f = alarm_fixture();
        f.insert("humidity_pct".to_string(), "NaN".to_string());
        assert!(parse_record(&f, &ThresholdDefaults::default()).is_err());
    }

    #[test]
    fn test_invalid_humidity() {
        let mut f = alarm_fixture();
        f.insert("humidity_pct".to_string(), "150".to_string());
        assert!(matches!(
            parse_record(&f, &ThresholdDefaults::default()),
            Err(ValidationError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_malformed_bool() {
        let mut f = alarm_fixture();
        f.insert("fan1_on".to_string(), "yes".to_string());
        assert!(parse_record(&f, &ThresholdDefaults::default()).is_err());

        f.insert("fan1_on".to_string(), "FALSE".to_string());
        assert!(parse_record(&f, &ThresholdDefaults::default()).is_ok());
    }

    #[test]
    fn test_alarm_state_must_match_thresholds() {
        let mut f = alarm_fixture();
        f.insert("alarm_state".to_string(), "NORMAL".to_string());
        assert!(matches!(
            parse_record(&f, &ThresholdDefaults::default()),
            Err(ValidationError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_alarm_state_and_thresholds_default() {
        let mut f = alarm_fixture();
        f.remove("alarm_state");
        f.remove("warn_threshold");
        f.remove("stage2_threshold");
        f.insert("temperature_c".to_string(), "27.0".to_string());

        let defaults = ThresholdDefaults::default();
        let Record::Telemetry(t) = parse_record(&f, &defaults).unwrap() else {
            panic!("expected telemetry");
        };
        assert_eq!(t.alarm_state, AlarmState::Warn);
        assert_eq!(t.warn_threshold, 27.0);
        assert_eq!(t.stage2_threshold, 28.0);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut f = alarm_fixture();
        f.insert("warn_threshold".to_string(), "30".to_string());
        assert!(parse_record(&f, &ThresholdDefaults::default()).is_err());
    }

    #[test]
    fn test_empty_device_id() {
        let mut f = lockout_fixture();
        f.insert("device_id".to_string(), "  ".to_string());
        assert!(parse_record(&f, &ThresholdDefaults::default()).is_err());
    }

    #[test]
    fn test_lockout_requires_remaining_seconds() {
        let mut f = lockout_fixture();
        f.insert("lockout_until".to_string(), "0".to_string());
        assert!(matches!(
            parse_record(&f, &ThresholdDefaults::default()),
            Err(ValidationError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_lockout_requires_locked_door() {
        let mut f = lockout_fixture();
        f.insert("door_state".to_string(), "UNLOCKED".to_string());
        assert!(parse_record(&f, &ThresholdDefaults::default()).is_err());
    }

    #[test]
    fn test_granted_requires_pin_match_and_unlocked() {
        let mut f = lockout_fixture();
        f.insert("result".to_string(), "GRANTED".to_string());
        f.insert("reason".to_string(), "PIN_MATCH".to_string());
        f.insert("lockout_until".to_string(), "0".to_string());
        f.insert("failed_count".to_string(), "0".to_string());
        assert!(parse_record(&f, &ThresholdDefaults::default()).is_err());

        f.insert("door_state".to_string(), "UNLOCKED".to_string());
        assert!(parse_record(&f, &ThresholdDefaults::default()).is_ok());

        f.insert("reason".to_string(), "INVALID_PIN".to_string());
        assert!(parse_record(&f, &ThresholdDefaults::default()).is_err());
    }

    #[test]
    fn test_denied_requires_locked_door() {
        let mut f = lockout_fixture();
        f.insert("result".to_string(), "DENIED".to_string());
        f.insert("reason".to_string(), "INVALID_PIN".to_string());
        f.insert("door_state".to_string(), "UNLOCKED".to_string());
        assert!(parse_record(&f, &ThresholdDefaults::default()).is_err());
    }

    #[test]
    fn test_negative_failed_count() {
        let mut f = lockout_fixture();
        f.insert("failed_count".to_string(), "-1".to_string());
        assert!(matches!(
            parse_record(&f, &ThresholdDefaults::default()),
            Err(ValidationError::Malformed { .. })
        ));
    }

    #[test]
    fn test_wire_form_parses_back_equal() {
        let original = parse_record(&lockout_fixture(), &ThresholdDefaults::default()).unwrap();
        let wire: Fields = original
            .to_params()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(parse_record(&wire, &ThresholdDefaults::default()).unwrap(), original);

        let original = parse_record(&alarm_fixture(), &ThresholdDefaults::default()).unwrap();
        let wire: Fields = original
            .to_params()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(parse_record(&wire, &ThresholdDefaults::default()).unwrap(), original);
    }

    #[test]
    fn test_json_fields_coerced() {
        let body = br#"{"sheet":"telemetry_logs","temperature_c":25.5,"fan1_on":true,"timestamp":null}"#;
        let f = parse_json_fields(body).unwrap();
        assert_eq!(f.get("temperature_c").map(String::as_str), Some("25.5"));
        assert_eq!(f.get("fan1_on").map(String::as_str), Some("true"));
        assert!(!f.contains_key("timestamp"));
    }

    #[test]
    fn test_json_body_must_be_flat_object() {
        assert!(parse_json_fields(b"[1,2]").is_err());
        assert!(parse_json_fields(br#"{"a":{"b":1}}"#).is_err());
        assert!(parse_json_fields(b"invalid json").is_err());
    }
}
