use crate::domain::settings::LogSettings;
use std::str::FromStr;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub struct LoggingGuard {
    // Keeps the file writer alive so buffered logs get flushed
    _guards: Vec<WorkerGuard>,
}

fn parse_rotation(rotation: &str) -> Rotation {
    match rotation.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "minutely" => Rotation::MINUTELY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

/// Subscriber for `settings`: env filter, stderr console layer and the
/// optional rolling file layer.
fn build_subscriber(
    settings: &LogSettings,
) -> (impl Subscriber + Send + Sync + 'static, LoggingGuard) {
    let mut guards = Vec::new();

    // RUST_LOG wins over the configured level
    let level_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout stays free for command output
    let console_layer = settings.console_logging_enabled.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(settings.show_file_line)
            .with_line_number(settings.show_file_line)
            .with_thread_ids(settings.show_thread_ids)
            .with_target(settings.show_target)
            .with_ansi(settings.ansi_colors)
    });

    let file_layer = settings.file_logging_enabled.then(|| {
        let appender = RollingFileAppender::new(
            parse_rotation(&settings.rotation),
            &settings.log_dir,
            &settings.file_name_prefix,
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_file(settings.show_file_line)
            .with_line_number(settings.show_file_line)
            .with_thread_ids(settings.show_thread_ids)
            .with_target(settings.show_target)
    });

    let subscriber = tracing_subscriber::registry()
        .with(level_filter)
        .with(console_layer)
        .with(file_layer);
    (subscriber, LoggingGuard { _guards: guards })
}

pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let (subscriber, guard) = build_subscriber(settings);
    subscriber.try_init()?;

    tracing::debug!(
        file = settings.file_logging_enabled,
        dir = %settings.log_dir,
        "Logging initialized"
    );
    Ok(guard)
}
