use std::{sync::Arc, time::Duration};
#[cfg(feature = "progress_bar")]
use std::{
    fmt::{Display, Formatter},
    sync::atomic::{AtomicUsize, Ordering},
};

use argument::Cli;
use clap::Parser;
#[cfg(feature = "progress_bar")]
use colored::Colorize;
#[cfg(feature = "log")]
use envoy_probe::initialize_logging;
use envoy_probe::{
    probe, ChannelSink, Config, EvasionStrategy, FileStore, HyperTransportFactory, KeyValueStore,
    ProbeService, ValidationEvent,
};
#[cfg(feature = "progress_bar")]
use status_line::StatusLine;
use tokio::{runtime, time};

mod argument;

#[cfg(feature = "progress_bar")]
/// Resolved/total probe counter shown while waiting for results.
struct Progress {
    resolved: AtomicUsize,
    total: usize,
}

#[cfg(feature = "progress_bar")]
impl Display for Progress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} Probes resolved: {}/{}",
            format!("{}:", module_path!()).bright_blue(),
            "INFO".bright_blue(),
            self.resolved.load(Ordering::Relaxed),
            self.total
        )
    }
}

fn main() {
    if let Err(e) = run_application() {
        eprintln!("Error: {:?}", e);
    }
}

#[cfg(feature = "progress_bar")]
fn label(valid: bool) -> String {
    if valid {
        "VALID  ".green().to_string()
    } else {
        "INVALID".red().to_string()
    }
}

#[cfg(not(feature = "progress_bar"))]
fn label(valid: bool) -> String {
    let label = if valid { "VALID  " } else { "INVALID" };
    label.to_string()
}

/// Formats one event for the console.
fn render(event: &ValidationEvent, format: &str) -> String {
    if format == "json" {
        return event.as_json();
    }
    match event {
        ValidationEvent::ValidationSucceeded {
            valid_url: Some(url),
            valid_strategy,
            ..
        } => format!("{} {} {}", label(true), url, valid_strategy.unwrap_or_default()),
        ValidationEvent::ValidationSucceeded { valid_urls, .. } => valid_urls.join("\n"),
        ValidationEvent::ValidationFailed {
            invalid_url,
            invalid_strategy,
            ..
        } => format!("{} {} {}", label(false), invalid_url, invalid_strategy),
    }
}

fn run_application() -> anyhow::Result<()> {
    let options = Cli::parse();

    #[cfg(feature = "log")]
    {
        let log_level = match options.log_level.as_str() {
            "debug" => log::LevelFilter::Debug,
            "info" => log::LevelFilter::Info,
            "warn" => log::LevelFilter::Warn,
            "error" => log::LevelFilter::Error,
            "trace" => log::LevelFilter::Trace,
            _ => log::LevelFilter::Off,
        };
        initialize_logging(log_level)?;
    }

    let runtime = runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async move {
        let store = match options.storage {
            Some(path) => FileStore::open(path),
            None => FileStore::in_data_dir()?,
        };
        let storage_path = store.path().to_path_buf();
        #[cfg(feature = "log")]
        log::debug!("Valid urls are persisted to {}", storage_path.display());
        let backend: Arc<dyn KeyValueStore> = Arc::new(store);
        let sink = Arc::new(ChannelSink::new());
        let events = sink.subscribe().to_async();

        let mut service = ProbeService::new(
            Config {
                target_endpoint: options.target,
                request_timeout: options.timeout,
                ..Default::default()
            },
            Arc::new(HyperTransportFactory),
            backend,
            sink,
        )?;
        service.start()?;

        let expected = if options.query {
            service.query()?;
            1
        } else {
            let total = probe::plan(&options.urls, EvasionStrategy::from_code(options.strategy)).len();
            service.submit(options.urls, options.strategy)?;
            total
        };

        #[cfg(feature = "progress_bar")]
        let status = (!options.query).then(|| {
            StatusLine::new(Progress {
                resolved: AtomicUsize::new(0),
                total: expected,
            })
        });

        let deadline = time::Instant::now() + Duration::from_secs(options.deadline);
        let mut received = 0;
        while received < expected {
            match time::timeout_at(deadline, events.recv()).await {
                Ok(Ok(event)) => {
                    received += 1;
                    #[cfg(feature = "progress_bar")]
                    if let Some(status) = &status {
                        status.resolved.fetch_add(1, Ordering::Relaxed);
                    }
                    println!("{}", render(&event, &options.format));
                }
                Ok(Err(_)) => break,
                Err(_) => {
                    #[cfg(feature = "log")]
                    log::warn!("Gave up after {}s with {}/{} probes resolved", options.deadline, received, expected);
                    break;
                }
            }
        }

        #[cfg(feature = "progress_bar")]
        drop(status);
        service.stop();

        if !options.query {
            let valid_urls = service.valid_urls();
            if options.format == "json" {
                println!("{}", serde_json::to_string(&valid_urls)?);
            } else {
                println!(
                    "{} valid url(s), saved to {}:",
                    valid_urls.len(),
                    storage_path.display()
                );
                for url in valid_urls {
                    println!("{}", url);
                }
            }
        }
        Ok(())
    })
}
