use std::env;
use std::time::Duration;

use rixens::{DeviceConfig, Event, PollingConfig, UpdateCoordinator};

const WATCHED: &[&str] = &["currenttemp", "setpoint", "fanspeed", "battv", "heaterstate"];

#[tokio::main]
async fn main() -> rixens::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let host = args
        .get(1)
        .expect("usage: monitor <host> [port] [--adaptive]");

    let mut config = DeviceConfig::new(host);
    if let Some(port) = args.get(2).and_then(|p| p.parse().ok()) {
        config.port = port;
    }
    if args.iter().any(|a| a == "--adaptive") {
        config.polling = PollingConfig::Adaptive {
            active_secs: 5,
            idle_secs: 15,
            off_secs: 30,
        };
    }

    println!("Connecting to {}...", config.display_name());
    let coordinator = UpdateCoordinator::setup(&config, reqwest::Client::new()).await?;

    let _sub = coordinator.subscribe(|event| match event {
        Event::Updated { changes, .. } if !changes.is_empty() => {
            for change in changes.iter().filter(|c| WATCHED.contains(&c.key.as_str())) {
                let old = change.old.as_ref().map(|v| v.to_string());
                let new = change.new.as_ref().map(|v| v.to_string());
                println!(
                    "{}: {} -> {}",
                    change.key,
                    old.as_deref().unwrap_or("-"),
                    new.as_deref().unwrap_or("-"),
                );
            }
        }
        Event::Updated { .. } => {}
        Event::Unavailable {
            consecutive_failures,
            reason,
        } => {
            eprintln!("Device unavailable after {consecutive_failures} failures: {reason}");
        }
    });

    if let Some(snapshot) = coordinator.latest_snapshot() {
        println!("Firmware: {}", snapshot.version().unwrap_or("unknown"));
        let faults = snapshot.active_faults();
        if !faults.is_empty() {
            println!("Active faults: {}", faults.join(", "));
        }
    }
    for key in WATCHED {
        if let Some(value) = coordinator.value(key) {
            println!("{key} = {value}");
        }
    }

    coordinator.start();
    println!("Polling every {:?}...", coordinator.current_interval());

    loop {
        tokio::time::sleep(Duration::from_secs(60)).await;
        let stats = coordinator.stats();
        println!(
            "[{:?}] polls: {} ok / {} failed, avg {:.0} ms",
            coordinator.availability(),
            stats.successful_polls,
            stats.failed_polls,
            stats.average_response_ms().unwrap_or_default(),
        );
    }
}
