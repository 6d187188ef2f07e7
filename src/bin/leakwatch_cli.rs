use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;

use leakwatch::alerting::NullNotifier;
use leakwatch::clock::{Clock, SystemClock};
use leakwatch::config::{BounceConfig, Config};
use leakwatch::detection::scenario::default_login_paths;
use leakwatch::detection::{EventAggregator, RequestScope, ScenarioRegistry};
use leakwatch::input::FileTailer;
use leakwatch::models::{AlertRequest, EventStatus};
use leakwatch::output::sink_from_config;
use leakwatch::persistence::{EventStore, SqliteEventStore};
use leakwatch::remediation::{AlertHistorySource, GateDecision, RemediationGate};
use leakwatch::signal::SignalBatcher;

/// Leakwatch Command Line Interface
#[derive(StructOpt, Debug)]
#[structopt(name = "leakwatch", about = "Leaky-bucket intrusion signal engine CLI")]
pub enum Cli {
    /// Generate a default configuration file
    Config {
        /// Output path for the configuration file
        #[structopt(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
    /// List available scenarios
    Scenarios {
        /// Path to configuration file
        #[structopt(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Push pending alerts once, ignoring the push delay
    Push {
        #[structopt(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Show alerts waiting to be pushed
    Pending {
        #[structopt(short, long, default_value = "config.toml")]
        config: PathBuf,
        /// Also show recent events of any status
        #[structopt(short, long)]
        all: bool,
        #[structopt(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show the remediation decision for an address
    Check {
        #[structopt(short, long, default_value = "config.toml")]
        config: PathBuf,
        ip: String,
    },
    /// Queue an alert raised by another component
    Alert {
        #[structopt(short, long, default_value = "config.toml")]
        config: PathBuf,
        ip: String,
        scenario: String,
        /// Unix timestamp of the last occurrence, defaults to now
        #[structopt(long)]
        last_event_date: Option<i64>,
    },
    /// Parse an access log and show which scenarios match
    Parse {
        /// Path to access log file
        #[structopt(short, long)]
        file: PathBuf,
        /// Number of lines to parse
        #[structopt(short, long, default_value = "10")]
        lines: usize,
    },
}

fn load_config(path: &PathBuf) -> Result<Config, Box<dyn std::error::Error>> {
    if path.exists() {
        Config::from_file(path)
    } else {
        log::warn!("Config file {:?} not found, using defaults", path);
        Ok(Config::default())
    }
}

fn open_store(config: &Config) -> Result<Arc<SqliteEventStore>, Box<dyn std::error::Error>> {
    Ok(Arc::new(SqliteEventStore::new(&config.persistence.db_path)?))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::from_args();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli {
        Cli::Config { output } => {
            let config = Config::default();
            config.to_file(&output)?;
            println!("Default configuration written to: {:?}", output);
        }
        Cli::Scenarios { config } => {
            let config = load_config(&config)?;
            let registry = ScenarioRegistry::with_builtin(config.scenarios.login_paths.clone());

            for option in registry.options() {
                let marker = if config.scenarios.enabled.contains(&option.name) {
                    "*"
                } else {
                    " "
                };
                println!("{} {:<24} {}", marker, option.name, option.description);
            }
        }
        Cli::Push { config } => {
            let config = load_config(&config)?;
            let store = open_store(&config)?;
            let sink = sink_from_config(&config.sink)?;
            let batcher =
                SignalBatcher::new(store.clone(), store, clock, config.engine.ban_duration);

            let report = batcher.push_pending(
                sink.as_ref(),
                config.push.max_signals,
                config.push.max_error_count,
                0,
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Cli::Pending { config, all, limit } => {
            let config = load_config(&config)?;
            let store = open_store(&config)?;

            let events = if all {
                store.list_recent(limit)?
            } else {
                let mut pending =
                    store.find_pending(EventStatus::AlertTriggered, config.push.max_error_count)?;
                pending.truncate(limit);
                pending
            };

            println!("{} event(s):\n", events.len());
            for event in &events {
                println!(
                    "  #{} {} {} count={} status={} errors={} last={}",
                    event.id.unwrap_or_default(),
                    event.ip,
                    event.scenario,
                    event.count,
                    event.status,
                    event.error_count,
                    event.last_event_date
                );
            }
        }
        Cli::Check { config, ip } => {
            let config = load_config(&config)?;
            let store = open_store(&config)?;
            let source = AlertHistorySource::new(
                store,
                clock,
                config.scenarios.enabled.clone(),
                config.engine.ban_duration,
            );
            let bounce = BounceConfig {
                enabled: true,
                ..config.bounce.clone()
            };
            let gate = RemediationGate::new(Arc::new(source), &bounce);

            match gate.should_bounce(&ip) {
                GateDecision::Allow => println!("{}: allow", ip),
                GateDecision::Ban => {
                    println!("{}: ban", ip);
                    if let Some(response) = gate.bounce(&ip) {
                        println!("{} {}", response.status, response.body);
                    }
                }
            }
        }
        Cli::Alert {
            config,
            ip,
            scenario,
            last_event_date,
        } => {
            let config = load_config(&config)?;
            let store = open_store(&config)?;
            let aggregator = EventAggregator::new(
                store,
                clock,
                Arc::new(NullNotifier),
                config.engine.ban_duration,
            );

            let request = AlertRequest {
                ip,
                scenario,
                last_event_date: last_event_date.map(serde_json::Value::from),
            };
            let outcome = aggregator.try_ingest_alert(&mut RequestScope::new(), &request)?;
            println!("{:?}", outcome);
        }
        Cli::Parse { file, lines } => {
            if !file.exists() {
                eprintln!("File not found: {:?}", file);
                std::process::exit(1);
            }

            let registry = ScenarioRegistry::with_builtin(default_login_paths());
            let mut tailer = FileTailer::from_start(file);
            let exchanges = tailer.read_exchanges()?;
            let display_count = std::cmp::min(lines, exchanges.len());

            println!(
                "Parsed {} exchange(s), skipped {} line(s) (showing {}):\n",
                exchanges.len(),
                tailer.skipped(),
                display_count
            );
            for exchange in exchanges.iter().take(display_count) {
                let matched: Vec<&str> = registry
                    .iter()
                    .filter(|s| s.detect(exchange).is_some())
                    .map(|s| s.name())
                    .collect();
                println!(
                    "  IP: {}, {} {} -> {}, Scenarios: {:?}",
                    exchange.ip, exchange.method, exchange.path, exchange.status, matched
                );
            }
        }
    }

    Ok(())
}
