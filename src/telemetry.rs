//! Module `telemetry` is for handling logging and tracing.
//! It provides three funcionalities:
//! - setup up logger format and level, including the line format shared by
//!   the console and the log file.
//! - open a [`LogSession`]: one `logs/app_<timestamp>.log` per process start.
//! - install a session as the global logger, at most once per process.

use chrono::{Local, NaiveDateTime};
use is_terminal::IsTerminal;
use once_cell::sync::OnceCell;
use tracing::dispatcher::{self, Dispatch, SetGlobalDefaultError};
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::{
    filter::LevelFilter,
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    EnvFilter, Registry,
};

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::configuration::EnvSnapshot;

pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_LOG_LEVEL: &str = "debug";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static INSTALLED_SESSION: OnceCell<PathBuf> = OnceCell::new();

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to prepare log file {path:?}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("A log session is already installed for this process")]
    AlreadyInstalled,
    #[error(transparent)]
    SubscriberError(#[from] SetGlobalDefaultError),
    #[error("Failed to bridge `log` records: {0}")]
    LogBridge(String),
}

#[derive(serde::Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoggerFormat {
    #[default]
    Line,
    Compact,
    Full,
    Pretty,
    Json,
    Bunyan,
}

impl FromStr for LoggerFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "line" => Ok(Self::Line),
            "compact" => Ok(Self::Compact),
            "full" => Ok(Self::Full),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "bunyan" => Ok(Self::Bunyan),
            other => Err(format!("{other} is not a supported logger format")),
        }
    }
}

/// `[2024-05-01 12:00:00] INFO in my::module at src/file.rs:42: message`
pub struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        write!(
            writer,
            "[{}] {} in {} at {}:{}: ",
            Local::now().format(TIMESTAMP_FORMAT),
            meta.level(),
            meta.module_path().unwrap_or(meta.target()),
            meta.file().unwrap_or("<unknown>"),
            meta.line().unwrap_or_default(),
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

pub struct LoggerOutbound<W> {
    make_writer: W,
}

impl<W> LoggerOutbound<W>
where
    W: for<'a> MakeWriter<'a> + 'static,
{
    pub fn new(make_writer: W) -> Self {
        Self { make_writer }
    }

    fn fmt_layer_line<S>(self) -> impl Layer<S>
    where
        S: Subscriber + for<'span> LookupSpan<'span>,
    {
        tracing_subscriber::fmt::Layer::new()
            .event_format(LineFormat)
            .with_ansi(false)
            .with_writer(self.make_writer)
    }

    fn fmt_layer_full<S>(self) -> impl Layer<S>
    where
        S: Subscriber + for<'span> LookupSpan<'span>,
    {
        tracing_subscriber::fmt::Layer::new()
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(self.make_writer)
    }

    fn fmt_layer_pretty<S>(self) -> impl Layer<S>
    where
        S: Subscriber + for<'span> LookupSpan<'span>,
    {
        tracing_subscriber::fmt::Layer::new()
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(self.make_writer)
            .pretty()
    }

    fn fmt_layer_json<S>(self) -> impl Layer<S>
    where
        S: Subscriber + for<'span> LookupSpan<'span>,
    {
        tracing_subscriber::fmt::Layer::new()
            .with_ansi(false)
            .with_writer(self.make_writer)
            .json()
    }

    fn fmt_layer_compact<S>(self) -> impl Layer<S>
    where
        S: Subscriber + for<'span> LookupSpan<'span>,
    {
        tracing_subscriber::fmt::Layer::new()
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(self.make_writer)
            .compact()
            .without_time()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(false)
            .with_line_number(false)
    }

    fn fmt_layer_bunyan<S>(self) -> impl Layer<S>
    where
        S: Subscriber + for<'span> LookupSpan<'span>,
    {
        BunyanFormattingLayer::new("bridge-disease".into(), self.make_writer)
    }
}

/// Get the subscriber for the logger.
/// - `env_filter` applies to the console only and can be: "info", "debug", "trace", "warn",
///   "error"; `RUST_LOG` wins if set.
/// - `format` is the console format.
/// - `output` is where the console log will be written to.
/// - `log_file`, when given, receives every DEBUG-and-above event in [`LineFormat`].
pub fn get_subscriber<Sink>(
    env_filter: String,
    format: LoggerFormat,
    output: LoggerOutbound<Sink>,
    log_file: Option<NonBlocking>,
) -> Box<dyn Subscriber + Send + Sync>
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));

    let file_layer = log_file.map(|writer| {
        tracing_subscriber::fmt::layer()
            .event_format(LineFormat)
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(LevelFilter::DEBUG)
    });

    let file_layer = Registry::default().with(file_layer);

    match format {
        LoggerFormat::Line => {
            Box::new(file_layer.with(output.fmt_layer_line().with_filter(env_filter)))
        }
        LoggerFormat::Compact => {
            Box::new(file_layer.with(output.fmt_layer_compact().with_filter(env_filter)))
        }
        LoggerFormat::Full => {
            Box::new(file_layer.with(output.fmt_layer_full().with_filter(env_filter)))
        }
        LoggerFormat::Pretty => {
            Box::new(file_layer.with(output.fmt_layer_pretty().with_filter(env_filter)))
        }
        LoggerFormat::Json => {
            Box::new(file_layer.with(output.fmt_layer_json().with_filter(env_filter)))
        }
        LoggerFormat::Bunyan => Box::new(
            file_layer
                .with(JsonStorageLayer)
                .with(output.fmt_layer_bunyan().with_filter(env_filter)),
        ),
    }
}

/// Init the subscriber for the logger.
/// Only the first call in a process can succeed.
pub fn init_subscriber<S>(subscriber: S) -> Result<(), TelemetryError>
where
    S: Subscriber + Send + Sync + 'static,
{
    dispatcher::set_global_default(Dispatch::new(subscriber))?;
    LogTracer::init().map_err(|e| TelemetryError::LogBridge(e.to_string()))
}

/// `app_YYYYMMDD_HHMMSS.log`
pub fn log_file_name(started_at: NaiveDateTime) -> String {
    format!("app_{}.log", started_at.format("%Y%m%d_%H%M%S"))
}

/// The logging knobs that have to be known before configuration is resolved.
#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub log_dir: PathBuf,
    pub console_format: LoggerFormat,
    pub level: String,
    /// A `LOG_FORMAT` value that could not be parsed; `Line` is used instead.
    pub rejected_format: Option<String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            console_format: LoggerFormat::default(),
            level: DEFAULT_LOG_LEVEL.into(),
            rejected_format: None,
        }
    }
}

impl TelemetrySettings {
    pub fn from_env(env: &EnvSnapshot) -> Self {
        let mut settings = Self::default();

        if let Some(dir) = env.get("LOG_DIR").filter(|d| !d.is_empty()) {
            settings.log_dir = PathBuf::from(dir);
        }

        if let Some(raw) = env.get("LOG_FORMAT") {
            match raw.parse() {
                Ok(format) => settings.console_format = format,
                Err(_) => settings.rejected_format = Some(raw.to_string()),
            }
        }

        settings
    }
}

/// An owned logging context: the console sink plus this run's log file.
///
/// Nothing is global until [`LogSession::install_global`] is called, so
/// several sessions can live in one process (tests, multiple apps).
pub struct LogSession {
    file_path: PathBuf,
    dispatch: Dispatch,
    // Flushes the file writer on drop.
    _guard: WorkerGuard,
}

impl std::fmt::Debug for LogSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSession")
            .field("file_path", &self.file_path)
            .finish_non_exhaustive()
    }
}

impl LogSession {
    pub fn start<Sink>(
        settings: &TelemetrySettings,
        output: LoggerOutbound<Sink>,
    ) -> Result<Self, TelemetryError>
    where
        Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        Self::start_at(settings, output, Local::now().naive_local())
    }

    pub fn start_at<Sink>(
        settings: &TelemetrySettings,
        output: LoggerOutbound<Sink>,
        started_at: NaiveDateTime,
    ) -> Result<Self, TelemetryError>
    where
        Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        let log_dir = &settings.log_dir;
        fs::create_dir_all(log_dir).map_err(|source| TelemetryError::Filesystem {
            path: log_dir.clone(),
            source,
        })?;

        let file_path = log_dir.join(log_file_name(started_at));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)
            .map_err(|source| TelemetryError::Filesystem {
                path: file_path.clone(),
                source,
            })?;

        let (writer, guard) = tracing_appender::non_blocking(file);
        let subscriber = get_subscriber(
            settings.level.clone(),
            settings.console_format,
            output,
            Some(writer),
        );

        Ok(Self {
            file_path,
            dispatch: Dispatch::new(subscriber),
            _guard: guard,
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Run `f` with this session receiving every event emitted on this thread.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        dispatcher::with_default(&self.dispatch, f)
    }

    /// Make this session the process-wide logger and route `log` records into it.
    pub fn install_global(&self) -> Result<(), TelemetryError> {
        if INSTALLED_SESSION.get().is_some() {
            return Err(TelemetryError::AlreadyInstalled);
        }

        // Recorded only once both hooks are in place.
        INSTALLED_SESSION
            .get_or_try_init(|| {
                dispatcher::set_global_default(self.dispatch.clone())?;
                LogTracer::init().map_err(|e| TelemetryError::LogBridge(e.to_string()))?;
                Ok::<_, TelemetryError>(self.file_path.clone())
            })
            .map(drop)
    }
}
