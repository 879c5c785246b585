use crate::client::{LogClient, SendError};
use ingestor::model::{
    AccessLogRecord, AccessReason, AccessResult, AlarmState, DoorState, Record, TelemetryRecord,
};
use tracing::{error, info};

pub const FIXTURE_DEVICE: &str = "esp32-smart-server-01";

#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: &'static str,
    pub record: Record,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
}

impl Summary {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

fn access(
    device_id: &str,
    user_id: &str,
    display_name: &str,
    result: AccessResult,
    reason: AccessReason,
    failed_count: u32,
    lockout_until: u32,
) -> Record {
    let door_state = match result {
        AccessResult::Granted => DoorState::Unlocked,
        AccessResult::Denied | AccessResult::Lockout => DoorState::Locked,
    };
    Record::Access(AccessLogRecord {
        device_id: device_id.to_string(),
        user_id: user_id.to_string(),
        display_name: display_name.to_string(),
        result,
        reason,
        failed_count,
        lockout_until,
        door_state,
        timestamp: None,
    })
}

#[allow(clippy::too_many_arguments)]
fn telemetry(
    device_id: &str,
    temperature_c: f64,
    humidity_pct: f64,
    fan1_on: bool,
    fan2_on: bool,
    alarm_state: AlarmState,
    door_state: DoorState,
    wifi_rssi: i32,
) -> Record {
    Record::Telemetry(TelemetryRecord {
        device_id: device_id.to_string(),
        temperature_c,
        humidity_pct,
        fan1_on,
        fan2_on,
        alarm_state,
        door_state,
        wifi_rssi,
        warn_threshold: 27.0,
        stage2_threshold: 28.0,
        timestamp: None,
    })
}

/// The fixed access and telemetry scenarios, in run order.
pub fn fixtures(device_id: &str) -> Vec<Scenario> {
    vec![
        Scenario {
            name: "access granted",
            record: access(device_id, "admin", "Administrator", AccessResult::Granted, AccessReason::PinMatch, 0, 0),
        },
        Scenario {
            name: "wrong pin",
            record: access(device_id, "unknown", "Unknown", AccessResult::Denied, AccessReason::InvalidPin, 1, 0),
        },
        Scenario {
            name: "unknown user",
            record: access(device_id, "intruder99", "Tidak Dikenal", AccessResult::Denied, AccessReason::UserNotFound, 1, 0),
        },
        Scenario {
            name: "lockout",
            record: access(device_id, "unknown", "Unknown", AccessResult::Lockout, AccessReason::MaxAttemptsExceeded, 3, 120),
        },
        Scenario {
            name: "alarm",
            record: telemetry(device_id, 29.8, 70.0, true, true, AlarmState::Alarm, DoorState::Locked, -55),
        },
        Scenario {
            name: "door unlocked",
            record: telemetry(device_id, 25.0, 55.0, true, false, AlarmState::Normal, DoorState::Unlocked, -50),
        },
        Scenario {
            name: "fans off",
            record: telemetry(device_id, 22.0, 45.0, false, false, AlarmState::Normal, DoorState::Locked, -48),
        },
    ]
}

/// Sends every scenario once and tallies the outcome.
pub async fn run_all(client: &LogClient, scenarios: &[Scenario]) -> Summary {
    let mut summary = Summary::default();

    for scenario in scenarios {
        match client.send(&scenario.record).await {
            Ok(delivery) => {
                info!("[{}] HTTP {}: {}", scenario.name, delivery.status, delivery.body);
                summary.passed += 1;
            }
            Err(SendError::Rejected { status, body }) => {
                error!("[{}] FAILED HTTP {}: {}", scenario.name, status, body);
                summary.failed += 1;
            }
            Err(e) => {
                error!("[{}] FAILED: {}", scenario.name, e);
                summary.failed += 1;
            }
        }
    }

    info!(
        "Result: {} passed, {} failed of {} scenarios",
        summary.passed,
        summary.failed,
        summary.passed + summary.failed
    );
    summary
}
