//! Process-wide logger for the `log` facade.
//!
//! Records go to stderr, a Rust closure or a C callback. Filtering accepts
//! `RUST_LOG`-style directives (`info`, `wirecall::rustcalls=trace`, ...);
//! an explicit filter wins over `RUST_LOG`, which wins over the plain level
//! applied to the `wirecall` target. Re-initializing replaces the
//! configuration of the installed logger.

use std::fmt;
use std::os::raw::{c_char, c_void};
use std::ptr;
use std::sync::{Arc, PoisonError, RwLock};

use log::{Level, LevelFilter, Log, Metadata, Record};
use once_cell::sync::{Lazy, OnceCell};

use crate::error::{LoggingError, cstring_from_str_lossy, report_to_c, wirecall_error_t};
use crate::ffi::read_optional_cstr;

const DEFAULT_TARGET: &str = "wirecall";

static LOGGER: Lazy<WirecallLogger> = Lazy::new(WirecallLogger::new);
static INSTALLED: OnceCell<bool> = OnceCell::new();

#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(C)]
pub enum wirecall_log_level_t {
    WIRECALL_LOG_LEVEL_OFF = 0,
    WIRECALL_LOG_LEVEL_ERROR = 1,
    WIRECALL_LOG_LEVEL_WARN = 2,
    WIRECALL_LOG_LEVEL_INFO = 3,
    WIRECALL_LOG_LEVEL_DEBUG = 4,
    WIRECALL_LOG_LEVEL_TRACE = 5,
}

impl From<wirecall_log_level_t> for LevelFilter {
    fn from(value: wirecall_log_level_t) -> Self {
        use wirecall_log_level_t::*;
        match value {
            WIRECALL_LOG_LEVEL_OFF => LevelFilter::Off,
            WIRECALL_LOG_LEVEL_ERROR => LevelFilter::Error,
            WIRECALL_LOG_LEVEL_WARN => LevelFilter::Warn,
            WIRECALL_LOG_LEVEL_INFO => LevelFilter::Info,
            WIRECALL_LOG_LEVEL_DEBUG => LevelFilter::Debug,
            WIRECALL_LOG_LEVEL_TRACE => LevelFilter::Trace,
        }
    }
}

impl From<Level> for wirecall_log_level_t {
    fn from(value: Level) -> Self {
        use wirecall_log_level_t::*;
        match value {
            Level::Error => WIRECALL_LOG_LEVEL_ERROR,
            Level::Warn => WIRECALL_LOG_LEVEL_WARN,
            Level::Info => WIRECALL_LOG_LEVEL_INFO,
            Level::Debug => WIRECALL_LOG_LEVEL_DEBUG,
            Level::Trace => WIRECALL_LOG_LEVEL_TRACE,
        }
    }
}

/// One log record handed to a C callback.
///
/// Strings are only valid during the callback. `module_path` and `file`
/// may be null; `line` is 0 when unknown.
#[repr(C)]
pub struct wirecall_log_record_t {
    pub level: wirecall_log_level_t,
    pub target: *const c_char,
    pub message: *const c_char,
    pub module_path: *const c_char,
    pub file: *const c_char,
    pub line: u32,
}

/// May be invoked from any thread that logs.
#[allow(non_camel_case_types)]
pub type wirecall_log_callback_t =
    Option<extern "C" fn(record: *const wirecall_log_record_t, user_data: *mut c_void)>;

/// Logging configuration for C callers.
///
/// A non-null `filter` overrides `RUST_LOG`, which overrides `level`. A
/// null `callback` logs to stderr; `user_data` is passed through unchanged.
#[repr(C)]
pub struct wirecall_log_config_t {
    pub level: wirecall_log_level_t,
    pub filter: *const c_char,
    pub callback: wirecall_log_callback_t,
    pub user_data: *mut c_void,
}

/// Where Rust callers want records delivered.
#[derive(Clone, Default)]
pub enum LogSink {
    #[default]
    Stderr,
    Function(Arc<dyn Fn(&Record<'_>) + Send + Sync>),
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stderr => f.write_str("Stderr"),
            Self::Function(_) => f.write_str("Function(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LevelFilter,
    pub filter: Option<String>,
    pub sink: LogSink,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            filter: None,
            sink: LogSink::Stderr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Directive {
    /// `None` applies to every target.
    prefix: Option<String>,
    level: LevelFilter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LogFilter {
    directives: Vec<Directive>,
}

impl LogFilter {
    fn for_level(level: LevelFilter) -> Self {
        Self {
            directives: vec![Directive {
                prefix: Some(DEFAULT_TARGET.to_string()),
                level,
            }],
        }
    }

    fn parse(filter: &str) -> Result<Self, String> {
        filter
            .split(',')
            .map(str::trim)
            .filter(|directive| !directive.is_empty())
            .map(parse_directive)
            .collect::<Result<Vec<_>, _>>()
            .map(|directives| Self { directives })
    }

    /// The most specific matching directive decides; unmatched targets are off.
    fn level_for(&self, target: &str) -> LevelFilter {
        self.directives
            .iter()
            .filter(|d| d.prefix.as_deref().is_none_or(|p| target.starts_with(p)))
            .max_by_key(|d| d.prefix.as_ref().map_or(0, |p| p.len() + 1))
            .map_or(LevelFilter::Off, |d| d.level)
    }

    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level_for(metadata.target())
    }

    fn max_level(&self) -> LevelFilter {
        self.directives
            .iter()
            .map(|d| d.level)
            .max()
            .unwrap_or(LevelFilter::Off)
    }
}

fn parse_directive(directive: &str) -> Result<Directive, String> {
    match directive.split_once('=') {
        Some((target, level)) => {
            let (target, level) = (target.trim(), level.trim());
            if target.is_empty() {
                return Err(format!("missing target in `{directive}`"));
            }
            let level = level
                .parse::<LevelFilter>()
                .map_err(|_| format!("invalid level `{level}` for target `{target}`"))?;
            Ok(Directive {
                prefix: Some(target.to_string()),
                level,
            })
        }
        // A bare word is a global level if it parses as one, else a target at trace.
        None => Ok(match directive.parse::<LevelFilter>() {
            Ok(level) => Directive {
                prefix: None,
                level,
            },
            Err(_) => Directive {
                prefix: Some(directive.to_string()),
                level: LevelFilter::Trace,
            },
        }),
    }
}

fn resolve_filter(
    explicit: Option<&str>,
    from_env: Option<String>,
    level: LevelFilter,
) -> Result<LogFilter, LoggingError> {
    let invalid = |source: &'static str, filter: &str, reason: String| LoggingError::InvalidFilter {
        source_name: source,
        filter: filter.to_string(),
        reason,
    };
    if let Some(filter) = explicit {
        return LogFilter::parse(filter).map_err(|reason| invalid("log filter", filter, reason));
    }
    if let Some(filter) = from_env {
        return LogFilter::parse(&filter).map_err(|reason| invalid("RUST_LOG", &filter, reason));
    }
    Ok(LogFilter::for_level(level))
}

enum Sink {
    Stderr,
    Function(Arc<dyn Fn(&Record<'_>) + Send + Sync>),
    Callback {
        callback: extern "C" fn(*const wirecall_log_record_t, *mut c_void),
        /// Opaque to us; stored as an integer so the logger stays `Sync`.
        user_data: usize,
    },
}

impl From<LogSink> for Sink {
    fn from(sink: LogSink) -> Self {
        match sink {
            LogSink::Stderr => Sink::Stderr,
            LogSink::Function(f) => Sink::Function(f),
        }
    }
}

struct State {
    filter: LogFilter,
    sink: Arc<Sink>,
}

struct WirecallLogger {
    state: RwLock<State>,
}

impl WirecallLogger {
    fn new() -> Self {
        Self {
            state: RwLock::new(State {
                filter: LogFilter::for_level(LevelFilter::Info),
                sink: Arc::new(Sink::Stderr),
            }),
        }
    }

    fn replace(&self, state: State) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn sink_for(&self, metadata: &Metadata<'_>) -> Option<Arc<Sink>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.filter.enabled(metadata).then(|| Arc::clone(&state.sink))
    }
}

impl Log for WirecallLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.sink_for(metadata).is_some()
    }

    fn log(&self, record: &Record<'_>) {
        // The lock is released before user code runs, so sinks may log.
        let Some(sink) = self.sink_for(record.metadata()) else {
            return;
        };
        match &*sink {
            Sink::Stderr => eprintln!("{} {}: {}", record.level(), record.target(), record.args()),
            Sink::Function(f) => f(record),
            Sink::Callback {
                callback,
                user_data,
            } => deliver_to_callback(*callback, *user_data, record),
        }
    }

    fn flush(&self) {}
}

fn deliver_to_callback(
    callback: extern "C" fn(*const wirecall_log_record_t, *mut c_void),
    user_data: usize,
    record: &Record<'_>,
) {
    let target = cstring_from_str_lossy(record.target());
    let message = cstring_from_str_lossy(&record.args().to_string());
    let module_path = record.module_path().map(cstring_from_str_lossy);
    let file = record.file().map(cstring_from_str_lossy);
    let c_record = wirecall_log_record_t {
        level: record.level().into(),
        target: target.as_ptr(),
        message: message.as_ptr(),
        module_path: module_path.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
        file: file.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
        line: record.line().unwrap_or(0),
    };
    callback(&c_record, user_data as *mut c_void);
}

fn install(filter: LogFilter, sink: Sink) -> Result<(), LoggingError> {
    if !*INSTALLED.get_or_init(|| log::set_logger(&*LOGGER).is_ok()) {
        return Err(LoggingError::AlreadyInitialized);
    }
    let max_level = filter.max_level();
    LOGGER.replace(State {
        filter,
        sink: Arc::new(sink),
    });
    log::set_max_level(max_level);
    Ok(())
}

/// Installs (or reconfigures) the wirecall logger.
pub fn init(config: LogConfig) -> Result<(), LoggingError> {
    let filter = resolve_filter(
        config.filter.as_deref(),
        std::env::var("RUST_LOG").ok(),
        config.level,
    )?;
    install(filter, config.sink.into())
}

/// Fills `config` with defaults: INFO on the `wirecall` target, stderr.
#[unsafe(no_mangle)]
pub extern "C" fn wirecall_log_config_init(config: *mut wirecall_log_config_t) {
    // Safety: a non-null pointer is writable config storage owned by the caller.
    let Some(config) = (unsafe { config.as_mut() }) else {
        return;
    };
    *config = wirecall_log_config_t {
        level: wirecall_log_level_t::WIRECALL_LOG_LEVEL_INFO,
        filter: ptr::null(),
        callback: None,
        user_data: ptr::null_mut(),
    };
}

/// Installs or reconfigures logging. A null `config` means defaults.
///
/// Returns false and sets `out_error` if the filter is invalid or another
/// logger already owns the `log` facade.
#[unsafe(no_mangle)]
pub extern "C" fn wirecall_log_init(
    config: *const wirecall_log_config_t,
    out_error: *mut *mut wirecall_error_t,
) -> bool {
    // Safety: a non-null pointer refers to an initialized config.
    let config = unsafe { config.as_ref() };
    // Safety: a non-null filter is a NUL-terminated string.
    let explicit = config.and_then(|c| unsafe { read_optional_cstr(c.filter) });
    let level = config.map_or(LevelFilter::Info, |c| c.level.into());

    let result = resolve_filter(explicit.as_deref(), std::env::var("RUST_LOG").ok(), level)
        .and_then(|filter| {
            let sink = match config.and_then(|c| c.callback) {
                Some(callback) => Sink::Callback {
                    callback,
                    user_data: config.map_or(0, |c| c.user_data as usize),
                },
                None => Sink::Stderr,
            };
            install(filter, sink)
        });
    report_to_c(out_error, result)
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::default_target("wirecall::rustcalls", LevelFilter::Info)]
    #[case::other_crate("tokio::runtime", LevelFilter::Off)]
    fn plain_level_applies_to_wirecall_only(#[case] target: &str, #[case] expected: LevelFilter) {
        assert_eq!(LogFilter::for_level(LevelFilter::Info).level_for(target), expected);
    }

    #[rstest]
    #[case::most_specific_wins("warn,wirecall=info,wirecall::async_call=trace", "wirecall::async_call", LevelFilter::Trace)]
    #[case::parent_target("warn,wirecall=info,wirecall::async_call=trace", "wirecall::component", LevelFilter::Info)]
    #[case::global_fallback("warn,wirecall=info", "libloading", LevelFilter::Warn)]
    #[case::bare_target("wirecall", "wirecall::loader", LevelFilter::Trace)]
    #[case::unmatched("wirecall=debug", "tokio", LevelFilter::Off)]
    fn directives_pick_the_longest_prefix(
        #[case] filter: &str,
        #[case] target: &str,
        #[case] expected: LevelFilter,
    ) {
        let filter = LogFilter::parse(filter).unwrap();
        assert_eq!(filter.level_for(target), expected);
    }

    #[rstest]
    #[case::bad_level("wirecall=loud")]
    #[case::missing_target("=debug")]
    fn malformed_directives_are_rejected(#[case] filter: &str) {
        assert!(LogFilter::parse(filter).is_err());
    }

    #[test]
    fn max_level_is_the_loosest_directive() {
        let filter = LogFilter::parse("error,wirecall::stream=trace").unwrap();
        assert_eq!(filter.max_level(), LevelFilter::Trace);
    }

    #[test]
    fn explicit_filter_beats_environment_and_level() {
        let filter = resolve_filter(
            Some("wirecall=debug"),
            Some("wirecall=trace".to_string()),
            LevelFilter::Error,
        )
        .unwrap();
        assert_eq!(filter.level_for("wirecall"), LevelFilter::Debug);

        let filter = resolve_filter(None, Some("wirecall=trace".to_string()), LevelFilter::Error)
            .unwrap();
        assert_eq!(filter.level_for("wirecall"), LevelFilter::Trace);

        let filter = resolve_filter(None, None, LevelFilter::Error).unwrap();
        assert_eq!(filter.level_for("wirecall"), LevelFilter::Error);
    }

    #[test]
    fn invalid_environment_filter_names_its_source() {
        let err = resolve_filter(None, Some("wirecall=nope".to_string()), LevelFilter::Info)
            .unwrap_err();
        assert!(err.to_string().contains("RUST_LOG"), "{err}");
    }

    #[test]
    fn config_init_writes_defaults() {
        let mut config = wirecall_log_config_t {
            level: wirecall_log_level_t::WIRECALL_LOG_LEVEL_TRACE,
            filter: ptr::null(),
            callback: None,
            user_data: ptr::null_mut(),
        };
        wirecall_log_config_init(&mut config);
        assert_eq!(config.level, wirecall_log_level_t::WIRECALL_LOG_LEVEL_INFO);
        assert!(config.callback.is_none());
        wirecall_log_config_init(ptr::null_mut());
    }

    #[test]
    fn invalid_c_filter_reports_an_error_handle() {
        let filter = CString::new("wirecall=bogus").unwrap();
        let config = wirecall_log_config_t {
            level: wirecall_log_level_t::WIRECALL_LOG_LEVEL_INFO,
            filter: filter.as_ptr(),
            callback: None,
            user_data: ptr::null_mut(),
        };
        let mut error: *mut wirecall_error_t = ptr::null_mut();
        assert!(!wirecall_log_init(&config, &mut error));
        assert!(!error.is_null());
        crate::error::wirecall_error_free(error);
    }
}
