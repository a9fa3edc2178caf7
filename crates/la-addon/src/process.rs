use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use log::{Level, LevelFilter, Log, Metadata, Record};
use serde::{Deserialize, Serialize};

/// Engine log levels, numbered the way the host sees them.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 2,
    Warn = 3,
    Info = 4,
    /// Plain engine output with no severity.
    #[default]
    Log = 5,
    Debug = 6,
}

impl LogLevel {
    /// The engine's numeric level.
    pub fn number(self) -> u8 {
        self as u8
    }

    /// Inverse of [`LogLevel::number`].
    pub fn from_number(n: i32) -> Option<Self> {
        match n {
            2 => Some(LogLevel::Error),
            3 => Some(LogLevel::Warn),
            4 => Some(LogLevel::Info),
            5 => Some(LogLevel::Log),
            6 => Some(LogLevel::Debug),
            _ => None,
        }
    }

    fn from_log(level: Level) -> Self {
        match level {
            Level::Error => LogLevel::Error,
            Level::Warn => LogLevel::Warn,
            Level::Info => LogLevel::Info,
            Level::Debug | Level::Trace => LogLevel::Debug,
        }
    }

    fn to_log(self) -> Level {
        match self {
            LogLevel::Error => Level::Error,
            LogLevel::Warn => Level::Warn,
            LogLevel::Info | LogLevel::Log => Level::Info,
            LogLevel::Debug => Level::Debug,
        }
    }

    fn to_filter(self) -> LevelFilter {
        self.to_log().to_level_filter()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Severity of an engine log line. `Cont` continues the previous line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineLogLevel {
    Level(LogLevel),
    Cont,
}

pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

struct LogState {
    threshold: AtomicU8,
    last_level: AtomicU8,
    callback: RwLock<Option<LogCallback>>,
}

impl LogState {
    fn threshold(&self) -> u8 {
        self.threshold.load(Ordering::Relaxed)
    }

    fn emit(&self, level: LogLevel, text: &str) -> bool {
        let callback = match self.callback.read() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };
        match callback {
            Some(callback) => {
                callback(level, text);
                true
            }
            None => false,
        }
    }
}

/// Logging state of the runtime that currently owns the process logger.
static ACTIVE: RwLock<Option<Arc<LogState>>> = RwLock::new(None);
static LOGGER: HostLogger = HostLogger;
static LOGGER_INSTALLED: OnceLock<bool> = OnceLock::new();

fn active_state() -> Option<Arc<LogState>> {
    match ACTIVE.read() {
        Ok(guard) => guard.clone(),
        Err(_) => None,
    }
}

/// Routes `log` records from this process to the host callback of the
/// active runtime. Records are dropped while no runtime is active.
struct HostLogger;

impl Log for HostLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        active_state().map_or(false, |state| {
            LogLevel::from_log(metadata.level()).number() <= state.threshold()
        })
    }

    fn log(&self, record: &Record) {
        let Some(state) = active_state() else {
            return;
        };
        let level = LogLevel::from_log(record.level());
        if level.number() > state.threshold() {
            return;
        }
        let text = format!("[{}] {}\n", record.target(), record.args());
        if !state.emit(level, &text) {
            eprint!("{}", text);
        }
    }

    fn flush(&self) {}
}

/// Logging configuration owned by one runtime. At most one context in the
/// process receives `log` records at a time.
#[derive(Clone)]
pub struct ProcessContext {
    state: Arc<LogState>,
}

impl fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessContext")
            .field("log_level", &self.log_level())
            .finish()
    }
}

impl ProcessContext {
    /// Create the logging state. It does not receive `log` records until
    /// [`ProcessContext::install_logger`] makes it the active one.
    pub fn init(level: LogLevel) -> Self {
        Self {
            state: Arc::new(LogState {
                threshold: AtomicU8::new(level.number()),
                last_level: AtomicU8::new(LogLevel::Debug.number()),
                callback: RwLock::new(None),
            }),
        }
    }

    /// Make this context the target of the process logger, replacing any
    /// previously active runtime. Returns false when a logger from another
    /// library is already installed.
    pub fn install_logger(&self) -> bool {
        if !*LOGGER_INSTALLED.get_or_init(|| log::set_logger(&LOGGER).is_ok()) {
            return false;
        }
        if let Ok(mut active) = ACTIVE.write() {
            *active = Some(Arc::clone(&self.state));
        }
        log::set_max_level(self.log_level().unwrap_or_default().to_filter());
        true
    }

    /// Stop routing `log` records to this context. A no-op when another
    /// context has become active since.
    pub fn detach_logger(&self) {
        let Ok(mut active) = ACTIVE.write() else {
            return;
        };
        if active
            .as_ref()
            .map_or(false, |state| Arc::ptr_eq(state, &self.state))
        {
            *active = None;
            log::set_max_level(LevelFilter::Off);
        }
    }

    /// True while `log` records are routed to this context.
    pub fn is_logger_active(&self) -> bool {
        active_state().map_or(false, |state| Arc::ptr_eq(&state, &self.state))
    }

    pub fn log_level(&self) -> Option<LogLevel> {
        LogLevel::from_number(i32::from(self.state.threshold()))
    }

    /// Change the threshold. The `log` max level follows while this
    /// context is active.
    pub fn set_log_level(&self, level: LogLevel) {
        self.state.threshold.store(level.number(), Ordering::Relaxed);
        if self.is_logger_active() {
            log::set_max_level(level.to_filter());
        }
    }

    /// Replace the host callback; `None` sends lines back to stderr.
    pub fn set_log_callback(&self, callback: Option<LogCallback>) {
        if let Ok(mut guard) = self.state.callback.write() {
            *guard = callback;
        }
    }

    pub fn has_log_callback(&self) -> bool {
        self.state.callback.read().map_or(false, |guard| guard.is_some())
    }

    /// Pass an engine log line on, dropping it when above the configured
    /// level. Goes to the host callback when one is set, otherwise through
    /// the `log` macros.
    pub fn forward_engine_log(&self, level: EngineLogLevel, text: &str) {
        let level = match level {
            EngineLogLevel::Level(level) => level,
            EngineLogLevel::Cont => LogLevel::from_number(i32::from(
                self.state.last_level.load(Ordering::Relaxed),
            ))
            .unwrap_or(LogLevel::Debug),
        };
        self.state.last_level.store(level.number(), Ordering::Relaxed);

        if level.number() > self.state.threshold() {
            return;
        }
        if !self.state.emit(level, text) {
            log::log!(target: "engine", level.to_log(), "{}", text.trim_end());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn capture(ctx: &ProcessContext) -> Arc<Mutex<Vec<(LogLevel, String)>>> {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        ctx.set_log_callback(Some(Arc::new(move |level: LogLevel, text: &str| {
            sink.lock().unwrap().push((level, text.to_string()));
        })));
        lines
    }

    #[test]
    fn test_level_numbers() {
        assert_eq!(LogLevel::Error.number(), 2);
        assert_eq!(LogLevel::Debug.number(), 6);
        assert_eq!(LogLevel::from_number(4), Some(LogLevel::Info));
        assert_eq!(LogLevel::from_number(9), None);
    }

    #[test]
    fn test_filters_by_threshold() {
        let ctx = ProcessContext::init(LogLevel::Warn);
        let lines = capture(&ctx);
        ctx.forward_engine_log(EngineLogLevel::Level(LogLevel::Error), "bad");
        ctx.forward_engine_log(EngineLogLevel::Level(LogLevel::Info), "chatty");
        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0], (LogLevel::Error, "bad".to_string()));
    }

    #[test]
    fn test_continuation_reuses_last_level() {
        let ctx = ProcessContext::init(LogLevel::Debug);
        let lines = capture(&ctx);
        ctx.forward_engine_log(EngineLogLevel::Level(LogLevel::Warn), "loading");
        ctx.forward_engine_log(EngineLogLevel::Cont, ".");
        let lines = lines.lock().unwrap();
        assert_eq!(lines[1], (LogLevel::Warn, ".".to_string()));
    }

    #[test]
    fn test_latest_installed_context_becomes_active() {
        let first = ProcessContext::init(LogLevel::Warn);
        let second = ProcessContext::init(LogLevel::Warn);
        assert!(first.install_logger());
        assert!(first.is_logger_active());
        assert!(second.install_logger());
        assert!(!first.is_logger_active());

        first.detach_logger();
        assert!(second.is_logger_active());
        second.detach_logger();
        assert!(!second.is_logger_active());
    }

    #[test]
    fn test_callback_can_be_cleared() {
        let ctx = ProcessContext::init(LogLevel::Log);
        let _lines = capture(&ctx);
        assert!(ctx.has_log_callback());
        ctx.set_log_callback(None);
        assert!(!ctx.has_log_callback());
        ctx.set_log_level(LogLevel::Error);
        assert_eq!(ctx.log_level(), Some(LogLevel::Error));
    }
}
