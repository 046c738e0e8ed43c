use chrono::{Duration, Utc};
use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;
use loopguard::config::GuardConfig;
use loopguard::remote::{
    BolusCommand, CarbCommand, OverrideCommand, OverrideDuration, RemoteCommand, ValidatedAction,
};
use loopguard::alert::LoggingAlertIssuer;
use loopguard::trusted_time::{
    DeviceClock, MemoryOffsetStore, SntpClient, SystemClock, TimeCheckOutcome, TimeMonitorConfig,
    TrustedTimeMonitor,
};
use std::io::Read;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("guardctl")
        .version("0.1.0")
        .author("Loop Safety Engineering Team")
        .about("🛡️  Safety guard tooling - validate remote commands and check trusted time")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Guard configuration file (JSON)")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("bolus")
                .about("💉 Validate a remote bolus command")
                .arg(
                    Arg::with_name("units")
                        .help("Bolus amount in units")
                        .required(true)
                        .allow_hyphen_values(true)
                        .validator(is_number),
                ),
        )
        .subcommand(
            SubCommand::with_name("carb")
                .about("🍎 Validate a remote carb entry command")
                .arg(
                    Arg::with_name("grams")
                        .help("Carb amount in grams")
                        .required(true)
                        .allow_hyphen_values(true)
                        .validator(is_number),
                )
                .arg(
                    Arg::with_name("absorption")
                        .long("absorption-minutes")
                        .value_name("MINUTES")
                        .help("Absorption time override")
                        .takes_value(true)
                        .allow_hyphen_values(true)
                        .validator(is_integer),
                )
                .arg(
                    Arg::with_name("start")
                        .long("start-offset-minutes")
                        .value_name("MINUTES")
                        .help("Start time relative to now (negative for the past)")
                        .takes_value(true)
                        .allow_hyphen_values(true)
                        .validator(is_integer),
                )
                .arg(
                    Arg::with_name("food-type")
                        .long("food-type")
                        .value_name("TYPE")
                        .help("Food type label")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("override")
                .about("🎯 Validate a remote override activation")
                .arg(
                    Arg::with_name("preset")
                        .help("Preset name (exact match)")
                        .required(true),
                )
                .arg(
                    Arg::with_name("duration")
                        .long("duration-minutes")
                        .value_name("MINUTES")
                        .help("Duration override; 0 runs until cancelled")
                        .takes_value(true)
                        .allow_hyphen_values(true)
                        .validator(is_integer),
                )
                .arg(
                    Arg::with_name("remote-address")
                        .long("remote-address")
                        .value_name("ADDRESS")
                        .help("Origin of the command, recorded for audit")
                        .takes_value(true)
                        .default_value("guardctl"),
                ),
        )
        .subcommand(
            SubCommand::with_name("validate")
                .about("📄 Validate a JSON-encoded remote command")
                .arg(
                    Arg::with_name("file")
                        .help("Command file, or '-' for stdin")
                        .required(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("time-check")
                .about("🕒 Compare the device clock against an NTP server")
                .arg(
                    Arg::with_name("server")
                        .short("s")
                        .long("server")
                        .value_name("HOST:PORT")
                        .help("NTP server (defaults to the configured server)")
                        .takes_value(true),
                ),
        )
        .get_matches();

    let config = match matches.value_of("config") {
        Some(path) => GuardConfig::load(path)?,
        None => GuardConfig::default(),
    };
    let format = matches.value_of("format").unwrap_or("table");
    let verbose = matches.is_present("verbose");

    if verbose {
        println!("{}", "🛡️  guardctl - Loop safety guards".bright_blue().bold());
        if let Some(path) = matches.value_of("config") {
            println!("{} {}", "Using config".dimmed(), path);
        }
    }

    match matches.subcommand() {
        ("bolus", Some(sub_matches)) => {
            let units = parse_number(sub_matches, "units")?;
            report(&config, &RemoteCommand::Bolus(BolusCommand::new(units)), format);
        }
        ("carb", Some(sub_matches)) => {
            let command = carb_command(sub_matches)?;
            report(&config, &RemoteCommand::Carb(command), format);
        }
        ("override", Some(sub_matches)) => {
            let command = OverrideCommand {
                preset_name: sub_matches.value_of("preset").unwrap_or_default().to_string(),
                duration: parse_minutes(sub_matches, "duration")?,
                remote_address: sub_matches
                    .value_of("remote-address")
                    .unwrap_or("guardctl")
                    .to_string(),
            };
            report(&config, &RemoteCommand::Override(command), format);
        }
        ("validate", Some(sub_matches)) => {
            let json = read_input(sub_matches.value_of("file").unwrap_or("-"))?;
            let command: RemoteCommand = serde_json::from_str(&json)?;
            report(&config, &command, format);
        }
        ("time-check", Some(sub_matches)) => {
            let server = sub_matches
                .value_of("server")
                .unwrap_or(config.time_monitor.ntp_server.as_str())
                .to_string();
            handle_time_check(&config, &server, format, verbose).await?;
        }
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            println!("{}", "Quick start:".bright_green());
            println!("  {} Validate a 2U bolus", "guardctl --config guard.json bolus 2".bright_cyan());
            println!("  {} Check device clock drift", "guardctl time-check".bright_cyan());
        }
    }

    Ok(())
}

fn is_number(value: String) -> Result<(), String> {
    value
        .parse::<f64>()
        .map(|_| ())
        .map_err(|_| "Value must be a number".to_string())
}

fn is_integer(value: String) -> Result<(), String> {
    value
        .parse::<i64>()
        .map(|_| ())
        .map_err(|_| "Value must be a whole number".to_string())
}

fn parse_number(matches: &ArgMatches<'_>, name: &str) -> Result<f64, Box<dyn std::error::Error>> {
    Ok(matches.value_of(name).unwrap_or_default().parse::<f64>()?)
}

fn parse_minutes(
    matches: &ArgMatches<'_>,
    name: &str,
) -> Result<Option<Duration>, Box<dyn std::error::Error>> {
    match matches.value_of(name) {
        Some(value) => {
            let minutes = value.parse::<i64>()?;
            Ok(Some(Duration::try_minutes(minutes).ok_or("minutes out of range")?))
        }
        None => Ok(None),
    }
}

fn carb_command(matches: &ArgMatches<'_>) -> Result<CarbCommand, Box<dyn std::error::Error>> {
    let mut command = CarbCommand::new(parse_number(matches, "grams")?);
    command.absorption_time = parse_minutes(matches, "absorption")?;
    command.start_date = match parse_minutes(matches, "start")? {
        Some(offset) => Some(
            Utc::now()
                .checked_add_signed(offset)
                .ok_or("start offset out of range")?,
        ),
        None => None,
    };
    command.food_type = matches.value_of("food-type").map(str::to_string);
    Ok(command)
}

fn read_input(path: &str) -> Result<String, Box<dyn std::error::Error>> {
    if path == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(std::fs::read_to_string(path)?)
    }
}

fn report(config: &GuardConfig, command: &RemoteCommand, format: &str) {
    let result = command.validate(&config.rules, Utc::now());

    match format {
        "json" => {
            let value = match &result {
                Ok(action) => serde_json::json!({ "status": "Accepted", "action": action }),
                Err(e) => serde_json::json!({ "status": "Rejected", "reason": e.to_string() }),
            };
            println!("{value}");
        }
        "compact" => match &result {
            Ok(_) => println!("{}", "ACCEPTED".bright_green()),
            Err(e) => println!("{} {}", "REJECTED".bright_red(), e),
        },
        _ => match &result {
            Ok(action) => {
                println!(
                    "{} {} command accepted",
                    "✅".green(),
                    command.kind().bright_white()
                );
                print_action(action);
            }
            Err(e) => {
                println!(
                    "{} {} command rejected: {}",
                    "❌".red(),
                    command.kind().bright_white(),
                    e.to_string().bright_red()
                );
            }
        },
    }
}

fn print_action(action: &ValidatedAction) {
    match action {
        ValidatedAction::BolusDeliveryRequest { amount } => {
            println!("{} {} U", "Amount:".bright_white(), format!("{amount:.2}").bright_cyan());
        }
        ValidatedAction::CarbEntryRequest(entry) => {
            println!(
                "{} {} g",
                "Quantity:".bright_white(),
                format!("{:.0}", entry.quantity.as_grams()).bright_cyan()
            );
            println!("{} {}", "Start:".bright_white(), entry.start_date.to_rfc3339());
            println!(
                "{} {} min",
                "Absorption:".bright_white(),
                entry.absorption_time.num_minutes()
            );
            if let Some(food_type) = &entry.food_type {
                println!("{} {}", "Food type:".bright_white(), food_type);
            }
        }
        ValidatedAction::OverrideActivationRequest(activation) => {
            println!("{} {}", "Preset:".bright_white(), activation.preset.name.bright_cyan());
            let duration = match activation.duration {
                OverrideDuration::Indefinite => "indefinite".to_string(),
                OverrideDuration::Finite(duration) => format!("{} min", duration.num_minutes()),
            };
            println!("{} {}", "Duration:".bright_white(), duration);
        }
    }
}

async fn handle_time_check(
    config: &GuardConfig,
    server: &str,
    format: &str,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if verbose {
        println!("{} {}", "Querying".dimmed(), server);
    }

    let monitor_config = TimeMonitorConfig {
        ntp_server: server.to_string(),
        ..config.time_monitor.clone()
    };
    let clock: Arc<dyn DeviceClock> = Arc::new(SystemClock::new());
    let client = SntpClient::new(server, monitor_config.ntp_timeout(), Arc::clone(&clock));
    let monitor = TrustedTimeMonitor::new(
        client,
        Arc::new(MemoryOffsetStore::new()),
        Arc::new(LoggingAlertIssuer::new()),
        clock,
        monitor_config,
    );

    let drifted = match monitor.check_trusted_time().await {
        TimeCheckOutcome::Drifted { .. } => true,
        TimeCheckOutcome::InSync => false,
        TimeCheckOutcome::FetchFailed(e) => return Err(e.into()),
    };
    let offset_secs = monitor
        .fetcher()
        .cached()
        .map_or(0.0, |reference| monitor.measured_offset_secs(&reference));

    match format {
        "json" => println!(
            "{}",
            serde_json::json!({ "server": server, "offset_secs": offset_secs, "drifted": drifted })
        ),
        "compact" => {
            let status = if drifted { "DRIFT".red() } else { "OK".green() };
            println!("{status} {offset_secs:+.3}s");
        }
        _ => {
            println!("{} {}", "🕒".bright_blue(), "Trusted Time Check".bright_blue().bold());
            println!("{} {}", "Server:".bright_white(), server);
            println!("{} {:+.3}s", "Offset:".bright_white(), offset_secs);
            if drifted {
                println!(
                    "{} {}",
                    "⚠️".yellow(),
                    "Device clock drift exceeds the acceptable delta".bright_red()
                );
            } else {
                println!(
                    "{} Within ±{}s",
                    "✅".green(),
                    monitor.config().acceptable_time_delta_secs
                );
            }
        }
    }

    Ok(())
}
