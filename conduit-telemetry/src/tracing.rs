use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::PanicHookInfo;
use std::path::Path;
use std::sync::Once;

use conduit_config::Environment;
use thiserror::Error;
use tracing::Subscriber;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, InitError};
use tracing_log::{LogTracer, log_tracer::SetLoggerError};
use tracing_subscriber::{EnvFilter, FmtSubscriber, Registry, fmt, layer::SubscriberExt};

/// Directory receiving rolling log files in production.
const LOG_DIR: &str = "logs";

/// Number of daily log files kept before the oldest is removed.
const MAX_LOG_FILES: usize = 5;

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to build rolling file appender: {0}")]
    InitAppender(#[from] InitError),

    #[error("failed to init log tracer: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to set global default subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),

    #[error("failed to detect the environment: {0}")]
    Environment(#[from] std::io::Error),
}

/// Keeps the non-blocking file writer alive. Dropping it flushes buffered logs.
#[must_use]
pub enum LogFlusher {
    Flusher(WorkerGuard),
    NullFlusher,
}

static INIT_TEST_TRACING: Once = Once::new();

/// Installs a console subscriber for tests when `ENABLE_TRACING` is set:
///
/// ENABLE_TRACING=1 cargo test <test_name>
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_ok() {
            // Without an explicit environment the default is prod, which would
            // send test logs to files.
            Environment::Dev.set();
            let _log_flusher =
                init_tracing("test").expect("Failed to initialize tracing for tests");
        }
    });
}

/// Subscriber selected by [`build_subscriber`].
pub type BoxedSubscriber = Box<dyn Subscriber + Send + Sync>;

/// Initializes the global tracing subscriber for `app_name`.
///
/// Production-like environments write JSON to daily rolling files, every
/// other environment writes pretty output to the console. `RUST_LOG`
/// overrides the default `info` level.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    // Route records emitted through the `log` crate by dependencies such as sqlx.
    LogTracer::init()?;

    let environment = Environment::load()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let (subscriber, log_flusher) = build_subscriber(environment, app_name, LOG_DIR, filter)?;

    set_global_default(subscriber)?;
    set_tracing_panic_hook();

    Ok(log_flusher)
}

/// Builds the subscriber [`init_tracing`] installs for `environment`.
///
/// Production-like environments get a rolling file writer under `log_dir`.
pub fn build_subscriber(
    environment: Environment,
    app_name: &str,
    log_dir: impl AsRef<Path>,
    filter: EnvFilter,
) -> Result<(BoxedSubscriber, LogFlusher), TracingError> {
    if environment.is_prod() {
        prod_subscriber(filter, app_name, log_dir.as_ref())
    } else {
        Ok((dev_subscriber(filter), LogFlusher::NullFlusher))
    }
}

fn prod_subscriber(
    filter: EnvFilter,
    app_name: &str,
    log_dir: &Path,
) -> Result<(BoxedSubscriber, LogFlusher), TracingError> {
    let file_appender = rolling::Builder::new()
        .filename_prefix(app_name)
        .filename_suffix("log")
        .rotation(rolling::Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .build(log_dir)?;

    let (file_appender, guard) = tracing_appender::non_blocking(file_appender);

    let format = fmt::format()
        .with_level(true)
        .with_ansi(false)
        .with_target(false);

    let subscriber = Registry::default().with(filter).with(
        fmt::layer()
            .event_format(format)
            .with_writer(file_appender)
            .json()
            .with_current_span(true)
            .with_span_list(true),
    );

    Ok((Box::new(subscriber), LogFlusher::Flusher(guard)))
}

fn dev_subscriber(filter: EnvFilter) -> BoxedSubscriber {
    let format = fmt::format()
        .with_level(true)
        .with_ansi(true)
        .pretty()
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let subscriber = FmtSubscriber::builder()
        .event_format(format)
        .with_env_filter(filter)
        .finish();

    Box::new(subscriber)
}

/// Chains a hook logging panics through `tracing` in front of the existing one,
/// so panics inside background tasks reach the log files too.
fn set_tracing_panic_hook() {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        panic_hook(info);
        prev_hook(info);
    }));
}

fn panic_hook(panic_info: &PanicHookInfo) {
    let backtrace = Backtrace::capture();
    let (backtrace, note) = match backtrace.status() {
        BacktraceStatus::Captured => (Some(backtrace), None),
        BacktraceStatus::Disabled => (
            None,
            Some("run with RUST_BACKTRACE=1 to display backtraces"),
        ),
        BacktraceStatus::Unsupported => {
            (None, Some("backtraces are not supported on this platform"))
        }
        _ => (None, Some("backtrace status is unknown")),
    };

    let payload = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    };

    let location = panic_info.location().map(|location| location.to_string());

    tracing::error!(
        panic.payload = payload,
        panic.location = location,
        panic.backtrace = backtrace.map(tracing::field::display),
        panic.note = note,
        "a panic occurred",
    );
}
