//! Logging: the driver's pluggable sink, a tracing layer feeding embedder
//! callbacks, and subscriber setup for executables.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber, debug, error, info, trace, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{Layer, Registry};

/// `OnLog(level, message)`; `level` is `ERROR`, `WARN`, `INFO`, `DEBUG` or
/// `TRACE`.
pub type LogCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Messages emitted by the driver.
///
/// Each message becomes a `tracing` event and, when the embedder installed a
/// callback, is also handed to it. The callback runs under the sink's own
/// lock, never under the driver state lock.
#[derive(Clone, Default)]
pub struct LogSink {
    callback: Arc<Mutex<Option<LogCallback>>>,
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let installed = self
            .callback
            .lock()
            .map(|cb| cb.is_some())
            .unwrap_or(false);
        f.debug_struct("LogSink")
            .field("callback", &installed)
            .finish()
    }
}

impl LogSink {
    pub fn new(callback: Option<LogCallback>) -> Self {
        Self {
            callback: Arc::new(Mutex::new(callback)),
        }
    }

    /// Replaces the callback; `None` removes it.
    pub fn set_callback(&self, callback: Option<LogCallback>) {
        *self.callback.lock().expect("log sink mutex poisoned") = callback;
    }

    pub fn log(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => error!(target: "pmonetease::driver", "{}", message),
            Level::WARN => warn!(target: "pmonetease::driver", "{}", message),
            Level::INFO => info!(target: "pmonetease::driver", "{}", message),
            Level::DEBUG => debug!(target: "pmonetease::driver", "{}", message),
            Level::TRACE => trace!(target: "pmonetease::driver", "{}", message),
        }

        let guard = self.callback.lock().expect("log sink mutex poisoned");
        if let Some(callback) = guard.as_ref() {
            callback(&level.to_string(), message);
        }
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Level::ERROR, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(Level::WARN, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Level::INFO, message.as_ref());
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(Level::DEBUG, message.as_ref());
    }
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.push_message(value);
        } else {
            self.push_field(field, value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.push_message(&format!("{:?}", value));
        } else {
            self.push_field(field, &format!("{:?}", value));
        }
    }
}

impl MessageVisitor {
    // Le message passe toujours devant les champs
    fn push_message(&mut self, message: &str) {
        if self.message.is_empty() {
            self.message.push_str(message);
        } else {
            self.message.insert_str(0, &format!("{} ", message));
        }
    }

    fn push_field(&mut self, field: &Field, value: &str) {
        if !self.message.is_empty() {
            self.message.push(' ');
        }
        self.message.push_str(field.name());
        self.message.push('=');
        self.message.push_str(value);
    }
}

/// Tracing layer forwarding every event to an [`LogCallback`], so that an
/// embedder also sees what `pmocdp` and the client log.
pub struct CallbackLayer {
    callback: LogCallback,
}

impl CallbackLayer {
    pub fn new(callback: LogCallback) -> Self {
        Self { callback }
    }
}

impl<S> Layer<S> for CallbackLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);

        let metadata = event.metadata();
        let message = format!("{}: {}", metadata.target(), visitor.message);
        (self.callback)(&metadata.level().to_string(), &message);
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot open log file {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Init(#[from] TryInitError),
}

/// Options du subscriber global
#[derive(Clone)]
pub struct LoggingOptions {
    pub level: LevelFilter,
    /// Sortie formatée sur stderr
    pub enable_console: bool,
    /// Fichier recevant une copie des logs (ajout en fin)
    pub log_file: Option<PathBuf>,
    pub callback: Option<LogCallback>,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            enable_console: true,
            log_file: None,
            callback: None,
        }
    }
}

impl LoggingOptions {
    /// Niveau et console depuis la section `logger` de la configuration
    pub fn from_config(config: &pmoconfig::Config) -> Self {
        let level = config
            .get_log_min_level()
            .ok()
            .and_then(|l| parse_level(&l))
            .unwrap_or(LevelFilter::INFO);
        let enable_console = config.get_log_enable_console().unwrap_or(true);
        Self {
            level,
            enable_console,
            ..Self::default()
        }
    }
}

/// Parses `ERROR`..`TRACE` or `OFF`, case-insensitively.
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    match level.trim().to_uppercase().as_str() {
        "OFF" => Some(LevelFilter::OFF),
        "ERROR" => Some(LevelFilter::ERROR),
        "WARN" | "WARNING" => Some(LevelFilter::WARN),
        "INFO" => Some(LevelFilter::INFO),
        "DEBUG" => Some(LevelFilter::DEBUG),
        "TRACE" => Some(LevelFilter::TRACE),
        _ => None,
    }
}

/// Installs the global subscriber: level filter first, then the console,
/// file and callback outputs that are enabled.
pub fn init_logging(options: LoggingOptions) -> Result<(), LoggingError> {
    let console = options.enable_console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(true)
            .with_writer(std::io::stderr)
    });

    let file = match &options.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::File {
                    path: path.clone(),
                    source,
                })?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let callback = options.callback.map(CallbackLayer::new);

    Registry::default()
        .with(options.level)
        .with(console)
        .with(file)
        .with(callback)
        .try_init()?;
    Ok(())
}
