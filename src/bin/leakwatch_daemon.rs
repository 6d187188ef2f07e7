use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use leakwatch::alerting::{AlertDispatcher, AlertQueue};
use leakwatch::clock::{Clock, SystemClock};
use leakwatch::config::Config;
use leakwatch::detection::{EventAggregator, ScenarioEngine, ScenarioRegistry};
use leakwatch::input::FileTailer;
use leakwatch::output::sink_from_config;
use leakwatch::persistence::SqliteEventStore;
use leakwatch::remediation::{LocalDecisionCache, RemediationGate};
use leakwatch::signal::SignalBatcher;

/// Main daemon entry point
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("Starting Leakwatch daemon...");

    // Load configuration
    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        log::warn!("Config file not found, using defaults");
        Config::default()
    };

    // Setup graceful shutdown signal handling
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal, gracefully stopping...");
        r.store(false, Ordering::SeqCst);
    })?;

    let store = Arc::new(SqliteEventStore::new(&config.persistence.db_path)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let local_bans = Arc::new(LocalDecisionCache::new(clock.clone()));

    // Alert side effects run on the async runtime
    let runtime = tokio::runtime::Runtime::new()?;
    let (queue, rx) = AlertQueue::channel();
    let dispatcher = AlertDispatcher::new(config.alerting.clone(), Some(local_bans.clone()));
    runtime.spawn(dispatcher.run(rx));

    let registry = Arc::new(ScenarioRegistry::with_builtin(
        config.scenarios.login_paths.clone(),
    ));
    let aggregator = Arc::new(EventAggregator::new(
        store.clone(),
        clock.clone(),
        Arc::new(queue),
        config.engine.ban_duration,
    ));
    let engine = ScenarioEngine::new(registry, aggregator, &config.scenarios.enabled);
    let gate = RemediationGate::new(local_bans.clone(), &config.bounce);

    log::info!("Scenarios enabled: {:?}", config.scenarios.enabled);

    // Signal push loop
    let sink = sink_from_config(&config.sink)?;
    let batcher = SignalBatcher::new(
        store.clone(),
        store.clone(),
        clock.clone(),
        config.engine.ban_duration,
    );
    let push_config = config.push.clone();
    let push_running = running.clone();
    let push_thread = thread::spawn(move || {
        while push_running.load(Ordering::SeqCst) {
            let report = batcher.push_pending(
                sink.as_ref(),
                push_config.max_signals,
                push_config.max_error_count,
                push_config.push_time_delay,
            );
            if report.candidates > 0 {
                log::info!(
                    "Push: {} candidate(s), {} pushed, {} error(s)",
                    report.candidates,
                    report.pushed,
                    report.errors
                );
            }
            local_bans.prune_expired();

            // Sleep in short steps so shutdown is not delayed by the interval
            for _ in 0..push_config.sleep_ticks() {
                if !push_running.load(Ordering::SeqCst) {
                    break;
                }
                thread::sleep(Duration::from_millis(100));
            }
        }
    });

    let mut tailer = match config.input.access_log {
        Some(ref path) => {
            let mut tailer = FileTailer::new(path.clone());
            tailer.initialize()?;
            log::info!("Monitoring access log: {:?}", path);
            Some(tailer)
        }
        None => {
            log::warn!("No access log configured, only pushing signals");
            None
        }
    };

    log::info!("Daemon running. Press Ctrl+C to stop.");

    // Main exchange processing loop
    while running.load(Ordering::SeqCst) {
        if let Some(ref mut tailer) = tailer {
            if tailer.is_valid() {
                match tailer.read_exchanges() {
                    Ok(exchanges) => {
                        for exchange in exchanges {
                            if let Some(response) = gate.bounce(&exchange.ip) {
                                log::info!(
                                    "Bounced {} {} {} ({})",
                                    exchange.ip,
                                    exchange.method,
                                    exchange.path,
                                    response.status
                                );
                                continue;
                            }
                            engine.process(&exchange);
                        }
                    }
                    Err(e) => log::error!("Error reading access log: {}", e),
                }
            }
        }

        // Sleep to avoid busy-waiting
        thread::sleep(Duration::from_millis(100));
    }

    if push_thread.join().is_err() {
        log::error!("Signal push thread panicked");
    }
    drop(engine);
    runtime.shutdown_timeout(Duration::from_secs(5));

    log::info!("Leakwatch daemon stopped");
    Ok(())
}
