//! subfinder - find and download subtitles for video files
//!
//! Scans a file or directory for videos without subtitles and downloads
//! subtitles for each of them from the configured backends.

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use subfinder::cli::Args;
use subfinder::config::Config;
use subfinder::error::SubFinderError;
use subfinder::workflow::SubFinder;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            // Try to load config.toml from current directory first
            if std::path::Path::new("config.toml").exists() {
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };
    args.apply_to(&mut config)?;

    setup_logging(config.silence, config.debug)?;

    let silence = config.silence;
    let result = match SubFinder::new(config) {
        Ok(mut finder) => finder.run().await,
        Err(e) => Err(e),
    };

    match result {
        Ok(report) => {
            info!(
                "{} subtitles for {} video files",
                report.total_subtitles(),
                report.total_files()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(SubFinderError::Usage(message)) => {
            if !silence {
                eprintln!("error: {}", message);
            }
            Ok(ExitCode::from(2))
        }
        Err(e) => Err(e.into()),
    }
}

fn setup_logging(silence: bool, debug: bool) -> Result<()> {
    // Create log directory
    let log_dir = std::env::current_dir()?.join(".subfinder").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "subfinder.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if debug { Level::DEBUG } else { Level::INFO };

    // Silence only turns the console off; the file log is always written
    let console_layer = (!silence).then(|| {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(debug)
            .with_file(debug)
            .with_line_number(debug)
    });

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("subfinder.log").display()
    );

    Ok(())
}
