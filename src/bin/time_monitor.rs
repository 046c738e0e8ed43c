use loopguard::alert::LoggingAlertIssuer;
use loopguard::config::GuardConfig;
use loopguard::trusted_time::{
    DeviceClock, JsonFileOffsetStore, SntpClient, SystemClock, TimeCheckTrigger,
    TrustedTimeMonitor,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{info, warn};

const TRIGGER_BUFFER_SIZE: usize = 16;
const DEFAULT_OFFSET_STORE_PATH: &str = "time_trust.json";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = match std::env::args().nth(1) {
        Some(path) => GuardConfig::load(&path)?,
        None => GuardConfig::default(),
    };
    let monitor_config = config.time_monitor;

    println!("🕒 Trusted Time Monitor");
    println!("=======================");
    println!("   Reference: {}", monitor_config.ntp_server);
    println!("   Loop interval: {}s", monitor_config.loop_interval_secs);
    println!("   Type 'f' + Enter to simulate the app returning to the foreground");

    let clock: Arc<dyn DeviceClock> = Arc::new(SystemClock::new());
    let client = SntpClient::new(
        monitor_config.ntp_server.clone(),
        monitor_config.ntp_timeout(),
        Arc::clone(&clock),
    );
    let store_path = monitor_config
        .offset_store_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OFFSET_STORE_PATH));
    let loop_interval = Duration::from_secs(monitor_config.loop_interval_secs);

    let monitor = Arc::new(TrustedTimeMonitor::new(
        client,
        Arc::new(JsonFileOffsetStore::new(store_path)),
        Arc::new(LoggingAlertIssuer::new()),
        clock,
        monitor_config,
    ));

    let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_BUFFER_SIZE);
    let runner = tokio::spawn(Arc::clone(&monitor).run(trigger_rx));

    let mut interval = time::interval(loop_interval);
    // The first tick fires immediately; the monitor already checks at startup.
    interval.tick().await;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        let trigger = tokio::select! {
            _ = interval.tick() => TimeCheckTrigger::LoopCompleted,
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim() == "f" => TimeCheckTrigger::AppForeground,
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => {
                    stdin_open = false;
                    continue;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        };

        if let Err(e) = trigger_tx.send(trigger).await {
            warn!("Failed to deliver time check trigger: {}", e);
            break;
        }
    }

    drop(trigger_tx);
    runner.await?;
    info!(
        offset_secs = monitor.detected_offset_secs(),
        "Trusted time monitor stopped"
    );

    Ok(())
}
