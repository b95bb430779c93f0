//! chute-link - conveyor slot/package coordination daemon
//!
//! Listens for the sorter controller on TCP, pairs slot triggers with package
//! identifications and sends sort commands back.
//!
//! Identifications are read from stdin, one per line:
//!
//! ```text
//! <barcode> <chute> [weight_kg]
//! ```
//!
//! A barcode of `-` stands for a no-read.

use chute_link::config::TomlFileConfig;
use chute_link::package::LogRecordSink;
use chute_link::{AppConfig, Error, Package, Result, SortingService};
use std::env;
use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_CONFIG_PATH: &str = "/etc/chute-link.toml";

/// Config path from the arguments after the program name
///
/// `--config <path>`, `-c <path>` and `--config=<path>` win over a bare
/// positional path; with neither, [`DEFAULT_CONFIG_PATH`] is used.
fn config_path_from<I>(args: I) -> String
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut positional = None;

    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            match args.next() {
                Some(path) => return path,
                None => log::warn!("{} given without a path", arg),
            }
        } else if let Some(path) = arg.strip_prefix("--config=") {
            return path.to_string();
        } else if positional.is_none() && !arg.starts_with('-') {
            positional = Some(arg);
        }
    }

    positional.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

/// Parse one `<barcode> <chute> [weight_kg]` line
fn parse_identification(line: &str) -> Option<Package> {
    let mut fields = line.split_whitespace();
    let barcode = match fields.next()? {
        "-" => "",
        code => code,
    };
    let chute: u8 = fields.next()?.parse().ok()?;
    let package = Package::new(barcode, chute);

    match fields.next() {
        Some(weight) => Some(package.with_weight(weight.parse().ok()?)),
        None => Some(package),
    }
}

/// Feed identifications from stdin until EOF or shutdown
fn run_stdin_feed(service: Arc<SortingService>, running: Arc<AtomicBool>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        if !running.load(Ordering::Relaxed) {
            break;
        }
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::error!("stdin read error: {}", e);
                break;
            }
        };
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_identification(&line) {
            Some(mut package) => {
                let outcome = service.on_package_identified(&mut package);
                log::debug!("{} -> {:?}", package.barcode_label(), outcome);
            }
            None => log::warn!("Ignoring malformed identification line: {:?}", line),
        }
    }
    log::info!("Identification feed closed");
}

fn main() -> Result<()> {
    let config_path = config_path_from(env::args().skip(1));
    let config = AppConfig::from_file(&config_path)?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("chute-link v{} starting...", env!("CARGO_PKG_VERSION"));
    log::info!("Using config: {}", config_path);
    log::info!(
        "Matching window {}..{} ms, exception chute {}",
        config.matching.min_wait_ms,
        config.matching.max_wait_ms,
        config.matching.exception_chute
    );

    let provider = Arc::new(TomlFileConfig::new(&config_path, config.matching));
    let service = Arc::new(SortingService::new(provider, Arc::new(LogRecordSink))?);

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    let addr = service.start(&config.network.bind_address, config.network.port)?;
    log::info!("Waiting for controller on {}", addr);

    let feed_service = Arc::clone(&service);
    let feed_running = Arc::clone(&running);
    thread::Builder::new()
        .name("identification-feed".to_string())
        .spawn(move || run_stdin_feed(feed_service, feed_running))
        .map_err(|source| Error::ThreadSpawn {
            name: "identification-feed",
            source,
        })?;

    log::info!("chute-link running. Press Ctrl-C to stop.");

    let stats_interval = Duration::from_secs(config.logging.stats_interval_secs);
    let mut last_stats = Instant::now();
    while running.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(100));

        if !stats_interval.is_zero() && last_stats.elapsed() >= stats_interval {
            let stats = service.stats();
            log::info!(
                "Stats: triggers={} matched={} timeouts={} conflicts={} unmatched={} send_failures={} pending={}",
                stats.triggers,
                stats.matched,
                stats.timeouts,
                stats.binding_conflicts,
                stats.unmatched,
                stats.send_failures,
                service.engine().pending_count()
            );
            last_stats = Instant::now();
        }
    }

    // The stdin thread may stay blocked on read; it holds only an Arc
    service.stop();
    log::info!("chute-link stopped");
    Ok(())
}
