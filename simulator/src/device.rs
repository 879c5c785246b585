use chrono::Utc;
use ingestor::model::{AccessLogRecord, AccessState, AlarmState, DoorState, TelemetryRecord};
use ingestor::rules::{classify, evaluate_attempt, AccessPolicy, PinOutcome, UNKNOWN_USER};
use rand::Rng;
use std::collections::HashMap;

const SOLENOID_UNLOCK_SECS: i64 = 10;

/// Enrolled keypad user
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceSettings {
    pub warn_threshold: f64,
    pub stage2_threshold: f64,
    pub fan1_baseline_on: bool,
    pub policy: AccessPolicy,
}

/// A simulated monitor: drifting sensors, fans, door solenoid and keypad.
#[derive(Debug)]
pub struct Device {
    pub device_id: String,
    settings: DeviceSettings,
    users: Vec<User>,
    temperature_c: f64,
    humidity_pct: f64,
    door_unlocked_until: i64,
    attempts: HashMap<String, AccessState>,
}

impl Device {
    pub fn new(device_id: String, settings: DeviceSettings, users: Vec<User>) -> Self {
        Self {
            device_id,
            settings,
            users,
            temperature_c: 24.0,
            humidity_pct: 55.0,
            door_unlocked_until: 0,
            attempts: HashMap::new(),
        }
    }

    pub fn door_state(&self, now: i64) -> DoorState {
        if now < self.door_unlocked_until {
            DoorState::Unlocked
        } else {
            DoorState::Locked
        }
    }

    /// Takes a sensor reading and derives fan and alarm outputs from it.
    pub fn telemetry(&mut self, rng: &mut impl Rng, now: i64) -> TelemetryRecord {
        self.temperature_c = (self.temperature_c + rng.gen_range(-0.4..0.45)).clamp(18.0, 32.0);
        self.humidity_pct = (self.humidity_pct + rng.gen_range(-1.5..1.5)).clamp(30.0, 85.0);

        let temperature_c = (self.temperature_c * 100.0).round() / 100.0;
        let humidity_pct = (self.humidity_pct * 100.0).round() / 100.0;
        let s = &self.settings;
        let alarm_state = classify(temperature_c, s.warn_threshold, s.stage2_threshold);

        TelemetryRecord {
            device_id: self.device_id.clone(),
            temperature_c,
            humidity_pct,
            fan1_on: s.fan1_baseline_on || alarm_state >= AlarmState::Warn,
            fan2_on: alarm_state == AlarmState::Alarm,
            alarm_state,
            door_state: self.door_state(now),
            wifi_rssi: rng.gen_range(-80..=-40),
            warn_threshold: s.warn_threshold,
            stage2_threshold: s.stage2_threshold,
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }

    /// Simulates someone at the keypad. Mostly correct PINs, some mistakes and strangers.
    pub fn keypad_attempt(&mut self, rng: &mut impl Rng, now: i64) -> AccessLogRecord {
        let roll: f64 = rng.gen();
        let outcome = match self.users.get(rng.gen_range(0..self.users.len().max(1))) {
            Some(user) if roll < 0.6 => PinOutcome::Match {
                user_id: user.user_id.clone(),
                display_name: user.display_name.clone(),
            },
            Some(user) if roll < 0.85 => PinOutcome::WrongPin {
                user_id: user.user_id.clone(),
                display_name: user.display_name.clone(),
            },
            _ => PinOutcome::UnknownUser {
                user_id: UNKNOWN_USER.to_string(),
            },
        };
        self.attempt(&outcome, now)
    }

    /// Applies one PIN outcome to this device's attempt state.
    pub fn attempt(&mut self, outcome: &PinOutcome, now: i64) -> AccessLogRecord {
        let key = match outcome {
            PinOutcome::Match { user_id, .. }
            | PinOutcome::WrongPin { user_id, .. }
            | PinOutcome::UnknownUser { user_id } => user_id.clone(),
        };
        let state = self.attempts.get(&key).copied().unwrap_or_default();
        let decision = evaluate_attempt(&state, outcome, &self.settings.policy, now);

        self.attempts.insert(key, decision.next_state);
        if decision.door_state == DoorState::Unlocked {
            self.door_unlocked_until = now + SOLENOID_UNLOCK_SECS;
        }

        let mut record = decision.into_record(&self.device_id, outcome);
        record.timestamp = Some(Utc::now().to_rfc3339());
        record
    }
}

pub fn default_users() -> Vec<User> {
    vec![
        User {
            user_id: "admin".to_string(),
            display_name: "Administrator".to_string(),
        },
        User {
            user_id: "tech01".to_string(),
            display_name: "Technician".to_string(),
        },
    ]
}
