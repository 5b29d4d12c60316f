use crate::error::FleetsshError;
use chrono::Local;
use std::fs::create_dir_all;
use std::io;
use std::path::Path;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time::FormatTime},
    prelude::*,
    EnvFilter, Layer,
};

struct CustomTime;

impl FormatTime for CustomTime {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

/// Initialize the tracing system for logging.
///
/// `level` is one of "error", "warn", "info", "debug", "trace"; anything
/// else falls back to "info". `RUST_LOG` overrides it when set. With
/// `log_to_file`, output additionally goes to `log_file_path` (default
/// `logs/fleetssh.log`), without ANSI colors.
pub fn init_logging(
    level: &str,
    log_to_file: bool,
    log_file_path: Option<&str>,
) -> Result<(), FleetsshError> {
    let filter_level = match level.to_lowercase().as_str() {
        "error" => LevelFilter::ERROR,
        "warn" => LevelFilter::WARN,
        "info" => LevelFilter::INFO,
        "debug" => LevelFilter::DEBUG,
        "trace" => LevelFilter::TRACE,
        _ => LevelFilter::INFO,
    };

    let env_filter = match std::env::var("RUST_LOG") {
        Ok(env_val) => EnvFilter::new(env_val),
        Err(_) => EnvFilter::new(level.to_lowercase()),
    };

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true)
        .with_timer(CustomTime)
        .with_thread_ids(true)
        .with_filter(filter_level);

    type BaseSubscriber = tracing_subscriber::layer::Layered<EnvFilter, tracing_subscriber::Registry>;
    let mut layers: Vec<Box<dyn Layer<BaseSubscriber> + Send + Sync>> = vec![Box::new(stdout_layer)];

    if log_to_file {
        let log_path = log_file_path.unwrap_or("logs/fleetssh.log");

        let dir = Path::new(log_path).parent().unwrap_or(Path::new(""));
        create_dir_all(dir).map_err(FleetsshError::Io)?;

        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(FleetsshError::Io)?;

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_timer(CustomTime)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(filter_level);

        layers.push(Box::new(file_layer));
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .init();

    tracing::info!("Logging initialized at {} level", level.to_uppercase());

    Ok(())
}
