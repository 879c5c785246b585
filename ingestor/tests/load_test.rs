//! Load tests against a running ingestor (`HTTP_ADDR` default port 8080).
//! Run with `cargo test --test load_test -- --ignored`.

use rand::Rng;
use std::time::{Duration, Instant};
use tokio::time::sleep;

fn endpoint() -> String {
    std::env::var("EVENT_LOG_URL").unwrap_or_else(|_| "http://localhost:8080/api/v1/log".to_string())
}

fn random_telemetry(device_id: &str) -> Vec<(&'static str, String)> {
    let mut rng = rand::thread_rng();
    let temperature: f64 = rng.gen_range(20.0..26.0);
    vec![
        ("sheet", "telemetry_logs".to_string()),
        ("device_id", device_id.to_string()),
        ("temperature_c", format!("{:.2}", temperature)),
        ("humidity_pct", format!("{:.2}", rng.gen_range(30.0..80.0))),
        ("fan1_on", "true".to_string()),
        ("fan2_on", "false".to_string()),
        ("alarm_state", "NORMAL".to_string()),
        ("door_state", "LOCKED".to_string()),
        ("wifi_rssi", rng.gen_range(-80..-40).to_string()),
        ("warn_threshold", "27.0".to_string()),
        ("stage2_threshold", "28.0".to_string()),
    ]
}

#[tokio::test]
#[ignore]
async fn test_200_events_per_second() {
    println!("\nStarting load test: 200 events/s");

    let test_duration_secs = 10;
    let target_rate = 200;
    let total_events = test_duration_secs * target_rate;
    let url = endpoint();
    let client = reqwest::Client::new();

    let start = Instant::now();
    let mut sent_count = 0;
    let mut error_count = 0;

    let burst_size = 20;
    let delay_per_burst = Duration::from_micros((burst_size * 1_000_000) / target_rate as u64);

    for batch_start in (0..total_events).step_by(burst_size as usize) {
        let mut tasks = Vec::with_capacity(burst_size as usize);
        for i in batch_start..std::cmp::min(batch_start + burst_size, total_events) {
            let device_id = format!("load-test-dev-{}", i % 10);
            let params = random_telemetry(&device_id);
            let request = client.get(&url).query(&params).send();
            tasks.push(tokio::spawn(request));
        }

        for task in tasks {
            match task.await {
                Ok(Ok(resp)) if resp.status().is_success() => sent_count += 1,
                Ok(Ok(resp)) => {
                    error_count += 1;
                    eprintln!("Rejected: {}", resp.status());
                }
                Ok(Err(e)) => {
                    error_count += 1;
                    if error_count < 10 {
                        eprintln!("Send error: {}", e);
                    }
                }
                Err(e) => {
                    error_count += 1;
                    eprintln!("Task error: {}", e);
                }
            }
        }

        sleep(delay_per_burst).await;
    }

    let duration = start.elapsed();
    let actual_rate = sent_count as f64 / duration.as_secs_f64();

    println!("  Total sent:  {}", sent_count);
    println!("  Errors:      {}", error_count);
    println!("  Duration:    {:.2}s", duration.as_secs_f64());
    println!("  Actual rate: {:.2} events/s", actual_rate);

    assert!(
        actual_rate >= 150.0,
        "Throughput too low: {:.2} events/s (expected >= 150)",
        actual_rate
    );
    assert_eq!(error_count, 0, "Errors: {}", error_count);
}

#[tokio::test]
#[ignore]
async fn test_concurrent_devices_keep_rows_whole() {
    let url = endpoint();
    let client = reqwest::Client::new();
    let devices = 25;
    let per_device = 40;

    let mut handles = Vec::new();
    for d in 0..devices {
        let client = client.clone();
        let url = url.clone();
        handles.push(tokio::spawn(async move {
            let device_id = format!("concurrent-dev-{}", d);
            let mut ok = 0;
            for _ in 0..per_device {
                let resp = client
                    .get(&url)
                    .query(&random_telemetry(&device_id))
                    .send()
                    .await;
                if let Ok(resp) = resp {
                    if resp.text().await.map(|b| b.contains("\"ok\":true")).unwrap_or(false) {
                        ok += 1;
                    }
                }
            }
            ok
        }));
    }

    let mut total_ok = 0;
    for handle in handles {
        total_ok += handle.await.unwrap();
    }
    assert_eq!(total_ok, devices * per_device);
}
