mod client;
mod device;
mod scenarios;

use clap::{Parser, Subcommand};
use client::LogClient;
use device::{default_users, Device, DeviceSettings};
use ingestor::model::Record;
use ingestor::rules::{AccessPolicy, DEFAULT_STAGE2_THRESHOLD, DEFAULT_WARN_THRESHOLD};
use rand::Rng;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "simulator", about = "Sends device events to the event log endpoint")]
struct Cli {
    /// Endpoint that accepts log events
    #[arg(long, env = "EVENT_LOG_URL", default_value = "http://localhost:8080/api/v1/log")]
    url: String,

    /// Per-request timeout
    #[arg(long, env = "TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send the fixed access and telemetry scenarios once each
    Scenarios {
        #[arg(long, default_value = scenarios::FIXTURE_DEVICE)]
        device_id: String,
    },
    /// Emit telemetry and keypad events like a running monitor
    Device {
        /// Defaults to a random `sim-<uuid>` id
        #[arg(long, env = "DEVICE_ID")]
        device_id: Option<String>,

        /// Events per second
        #[arg(long, env = "RATE", default_value_t = 1.0)]
        rate: f64,

        /// Stop after this many events; runs until Ctrl-C when absent
        #[arg(long)]
        count: Option<u64>,

        /// Share of events that are keypad attempts
        #[arg(long, default_value_t = 0.2)]
        access_ratio: f64,

        #[arg(long, env = "WARN_THRESHOLD_C", default_value_t = DEFAULT_WARN_THRESHOLD)]
        warn_threshold: f64,

        #[arg(long, env = "STAGE2_THRESHOLD_C", default_value_t = DEFAULT_STAGE2_THRESHOLD)]
        stage2_threshold: f64,

        #[arg(long, default_value_t = AccessPolicy::default().max_failed_attempts)]
        max_failed_attempts: u32,

        #[arg(long, default_value_t = AccessPolicy::default().lockout_secs)]
        lockout_secs: u32,
    },
    /// POST a JSON dummy payload
    Upload {
        #[arg(long, default_value_t = 25.5)]
        temperature: f64,

        #[arg(long, default_value_t = 65.0)]
        humidity: f64,

        /// Target sheet; omit to send the bare payload
        #[arg(long)]
        sheet: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let client = LogClient::new(&cli.url, Duration::from_secs(cli.timeout_secs))?;
    info!("Endpoint: {}", cli.url);

    match cli.command {
        Command::Scenarios { device_id } => {
            let summary = scenarios::run_all(&client, &scenarios::fixtures(&device_id)).await;
            if !summary.all_passed() {
                anyhow::bail!("{} of {} scenarios failed", summary.failed, summary.passed + summary.failed);
            }
        }
        Command::Device {
            device_id,
            rate,
            count,
            access_ratio,
            warn_threshold,
            stage2_threshold,
            max_failed_attempts,
            lockout_secs,
        } => {
            check_device_args(rate, access_ratio)?;
            let device_id = device_id.unwrap_or_else(|| format!("sim-{}", uuid::Uuid::new_v4()));
            let settings = DeviceSettings {
                warn_threshold,
                stage2_threshold,
                fan1_baseline_on: true,
                policy: AccessPolicy {
                    max_failed_attempts,
                    lockout_secs,
                },
            };
            let device = Device::new(device_id, settings, default_users());
            run_device(&client, device, rate, count, access_ratio).await;
        }
        Command::Upload {
            temperature,
            humidity,
            sheet,
        } => {
            let mut payload = serde_json::json!({
                "temperature": temperature,
                "humidity": humidity,
            });
            if let Some(sheet) = sheet {
                payload["sheet"] = serde_json::Value::String(sheet);
            }
            info!("Sending dummy payload: {}", payload);
            let delivery = client.post_json(&payload).await?;
            info!("HTTP {}: {}", delivery.status, delivery.body);
        }
    }

    Ok(())
}

fn check_device_args(rate: f64, access_ratio: f64) -> anyhow::Result<()> {
    if !rate.is_finite() || rate <= 0.0 || Duration::try_from_secs_f64(1.0 / rate).is_err() {
        anyhow::bail!("--rate must be a positive finite number, got {}", rate);
    }
    if !access_ratio.is_finite() || !(0.0..=1.0).contains(&access_ratio) {
        anyhow::bail!("--access-ratio must be between 0 and 1, got {}", access_ratio);
    }
    Ok(())
}

async fn run_device(client: &LogClient, mut device: Device, rate: f64, count: Option<u64>, access_ratio: f64) {
    info!("Simulating {} at {} events/s", device.device_id, rate);

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / rate));
    let mut sent = 0u64;
    let mut failed = 0u64;

    loop {
        if count.is_some_and(|limit| sent + failed >= limit) {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }

        let now = chrono::Utc::now().timestamp();
        let record: Record = {
            let mut rng = rand::thread_rng();
            if rng.gen_bool(access_ratio) {
                device.keypad_attempt(&mut rng, now).into()
            } else {
                device.telemetry(&mut rng, now).into()
            }
        };

        match client.send(&record).await {
            Ok(_) => sent += 1,
            Err(e) => {
                failed += 1;
                warn!("Failed to send {} event: {}", record.sheet(), e);
            }
        }

        if (sent + failed) % 100 == 0 {
            info!("Sent {} events ({} failed)", sent, failed);
        }
    }

    if failed > 0 {
        error!("{} of {} events failed", failed, sent + failed);
    }
    info!("Device simulation stopped after {} events", sent + failed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_args_accept_usual_values() {
        assert!(check_device_args(1.0, 0.2).is_ok());
        assert!(check_device_args(200.0, 0.0).is_ok());
        assert!(check_device_args(0.5, 1.0).is_ok());
    }

    #[test]
    fn test_device_args_reject_unusable_rate() {
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e-320] {
            assert!(check_device_args(rate, 0.2).is_err(), "rate: {}", rate);
        }
    }

    #[test]
    fn test_device_args_reject_unusable_access_ratio() {
        for ratio in [f64::NAN, f64::INFINITY, -0.1, 1.5] {
            assert!(check_device_args(1.0, ratio).is_err(), "ratio: {}", ratio);
        }
    }
}
