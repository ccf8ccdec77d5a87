//! Logging for searchkit.
//!
//! A small set of macros whose output is controlled through environment
//! variables, so that repository and bulk internals can be traced in
//! production without wiring a logger into every call site.
//!
//! # Usage
//!
//! ```rust
//! use searchkit_log::{debug, info, warn};
//!
//! let index = "articles";
//! debug!("Fetching document {} from {}", "a-1", index);
//! info!(target: "searchkit::bulk", "Flushed {} operations", 42);
//! warn!("Scroll context was not released");
//! ```
//!
//! # Environment Variables
//!
//! - `SEARCHKIT_DEBUG=1` - Enable debug logging
//! - `SEARCHKIT_LOG_LEVEL=trace|debug|info|warn|error|off` - Minimum level
//! - `SEARCHKIT_LOG_FORMAT=pretty|compact|json` - Output format
//! - `SEARCHKIT_LOG_TIMESTAMPS=1|0` - Include timestamps

use once_cell::sync::Lazy;
use std::env;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Prefix shared by every logging environment variable.
pub const ENV_PREFIX: &str = "SEARCHKIT";

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    /// Trace level (most verbose)
    Trace = 0,
    /// Debug level
    Debug = 1,
    /// Info level
    Info = 2,
    /// Warning level
    Warn = 3,
    /// Error level
    Error = 4,
    /// Logging disabled
    Off = 5,
}

impl Level {
    /// Parse a level name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Upper-case level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Off => "OFF",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            4 => Level::Error,
            _ => Level::Off,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human readable, one field per column
    Pretty,
    /// Short single-line format
    Compact,
    /// One JSON object per line
    Json,
}

impl Format {
    /// Parse a format name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static CONFIG: Lazy<LogConfig> = Lazy::new(LogConfig::from_env);

/// Logging configuration, read once from the environment.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether debug mode is enabled
    pub debug: bool,
    /// Minimum level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether lines carry a timestamp
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            timestamps: true,
        }
    }
}

impl LogConfig {
    /// Read configuration from `SEARCHKIT_*` variables and publish the
    /// level to the global filter.
    pub fn from_env() -> Self {
        let config = Self::from_lookup(|key| env::var(key).ok());
        DEBUG_ENABLED.store(config.debug, Ordering::SeqCst);
        LOG_LEVEL.store(config.level as u8, Ordering::SeqCst);
        config
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(&format!("{}_{}", ENV_PREFIX, name));
        let flag = |name: &str| var(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        let debug = flag("DEBUG").unwrap_or(false);
        let level = var("LOG_LEVEL")
            .and_then(|s| Level::parse(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });
        let format = var("LOG_FORMAT")
            .and_then(|s| Format::parse(&s))
            .unwrap_or(Format::Json);
        let timestamps = flag("LOG_TIMESTAMPS").unwrap_or(true);

        Self {
            debug,
            level,
            format,
            timestamps,
        }
    }
}

/// Force configuration loading. Every level check calls this, so the
/// environment is honoured from the first record on.
pub fn init() {
    Lazy::force(&CONFIG);
}

/// Global configuration.
pub fn config() -> &'static LogConfig {
    &CONFIG
}

/// Whether debug mode is on.
#[inline]
pub fn is_debug_enabled() -> bool {
    init();
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Whether records at `level` are emitted.
#[inline]
pub fn is_level_enabled(level: Level) -> bool {
    init();
    level != Level::Off && level as u8 >= LOG_LEVEL.load(Ordering::Relaxed)
}

/// Current minimum level.
pub fn current_level() -> Level {
    init();
    Level::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Change the minimum level at runtime.
pub fn set_level(level: Level) {
    // Load the environment first so it cannot overwrite this later.
    init();
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Toggle debug mode at runtime. Enabling lowers the level to debug.
pub fn set_debug(enabled: bool) {
    init();
    DEBUG_ENABLED.store(enabled, Ordering::SeqCst);
    if enabled && current_level() > Level::Debug {
        set_level(Level::Debug);
    }
}

/// Emit one record. Used by the macros.
#[doc(hidden)]
pub fn log(level: Level, target: &str, message: &str) {
    let config = config();
    if !is_level_enabled(level) {
        return;
    }

    #[cfg(feature = "tracing")]
    tracing_compat::forward(level, target, message);

    let line = render(config, level, target, message);
    let _ = writeln!(std::io::stderr().lock(), "{}", line);
}

fn render(config: &LogConfig, level: Level, target: &str, message: &str) -> String {
    match config.format {
        Format::Pretty => {
            let mut line = String::new();
            if config.timestamps {
                line.push_str(&chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f ").to_string());
            }
            line.push_str(&format!("{:5} [{}] {}", level.as_str(), target, message));
            line
        }
        Format::Compact => {
            let mut line = String::new();
            if config.timestamps {
                line.push_str(&chrono::Local::now().format("%H:%M:%S ").to_string());
            }
            let initial = level.as_str().chars().next().unwrap_or('?');
            line.push_str(&format!("{} {}: {}", initial, target, message));
            line
        }
        Format::Json => render_json(config, level, target, message),
    }
}

#[cfg(feature = "json")]
fn render_json(config: &LogConfig, level: Level, target: &str, message: &str) -> String {
    #[derive(serde::Serialize)]
    struct Record<'a> {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        level: &'a str,
        target: &'a str,
        message: &'a str,
    }

    let record = Record {
        timestamp: config.timestamps.then(|| chrono::Utc::now().to_rfc3339()),
        level: level.as_str(),
        target,
        message,
    };

    serde_json::to_string(&record).unwrap_or_else(|_| message.to_string())
}

#[cfg(not(feature = "json"))]
fn render_json(config: &LogConfig, level: Level, target: &str, message: &str) -> String {
    let timestamp = if config.timestamps {
        format!("\"timestamp\":\"{}\",", chrono::Utc::now().to_rfc3339())
    } else {
        String::new()
    };
    format!(
        "{{{}\"level\":\"{}\",\"target\":\"{}\",\"message\":\"{}\"}}",
        timestamp,
        level.as_str(),
        escape_json(target),
        escape_json(message)
    )
}

#[cfg(not(feature = "json"))]
fn escape_json(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c if c.is_control() => escaped.push_str(&format!("\\u{:04x}", c as u32)),
            c => escaped.push(c),
        }
    }
    escaped
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log {
    ($level:expr, target: $target:expr, $($arg:tt)+) => {
        if $crate::is_level_enabled($level)
            || ($level == $crate::Level::Debug && $crate::is_debug_enabled())
        {
            $crate::log($level, $target, &format!($($arg)+));
        }
    };
}

/// Log at trace level.
#[macro_export]
macro_rules! trace {
    (target: $target:expr, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Trace, target: $target, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__log!($crate::Level::Trace, target: module_path!(), $($arg)+)
    };
}

/// Log at debug level. Also emitted when `SEARCHKIT_DEBUG=1`.
///
/// ```rust
/// use searchkit_log::debug;
///
/// let id = "doc-7";
/// debug!("Version conflict on {}", id);
/// debug!(target: "searchkit::scroll", "Fetched page {}", 3);
/// ```
#[macro_export]
macro_rules! debug {
    (target: $target:expr, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Debug, target: $target, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__log!($crate::Level::Debug, target: module_path!(), $($arg)+)
    };
}

/// Log at info level.
#[macro_export]
macro_rules! info {
    (target: $target:expr, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Info, target: $target, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__log!($crate::Level::Info, target: module_path!(), $($arg)+)
    };
}

/// Log at warn level.
#[macro_export]
macro_rules! warn {
    (target: $target:expr, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Warn, target: $target, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__log!($crate::Level::Warn, target: module_path!(), $($arg)+)
    };
}

/// Log at error level.
#[macro_export]
macro_rules! error {
    (target: $target:expr, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Error, target: $target, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__log!($crate::Level::Error, target: module_path!(), $($arg)+)
    };
}

#[cfg(feature = "tracing")]
pub mod tracing_compat {
    //! Forwarding into `tracing`.
    //!
    //! With the `tracing` feature every record is also emitted as a
    //! `tracing` event, and [`subscriber`] builds a subscriber whose filter
    //! follows the searchkit level.

    use super::*;

    pub(crate) fn forward(level: Level, target: &str, message: &str) {
        match level {
            Level::Trace => tracing::trace!(searchkit_target = target, "{}", message),
            Level::Debug => tracing::debug!(searchkit_target = target, "{}", message),
            Level::Info => tracing::info!(searchkit_target = target, "{}", message),
            Level::Warn => tracing::warn!(searchkit_target = target, "{}", message),
            Level::Error => tracing::error!(searchkit_target = target, "{}", message),
            Level::Off => {}
        }
    }

    /// Subscriber filtered at the configured searchkit level unless
    /// `RUST_LOG` says otherwise.
    pub fn subscriber() -> impl tracing::Subscriber {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::{EnvFilter, fmt};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config().level.as_str().to_ascii_lowercase()));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Off);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(Level::parse("debug"), Some(Level::Debug));
        assert_eq!(Level::parse(" WARNING "), Some(Level::Warn));
        assert_eq!(Level::parse("none"), Some(Level::Off));
        assert_eq!(Level::parse("verbose"), None);
    }

    #[test]
    fn test_config_defaults() {
        let config = LogConfig::from_lookup(lookup(&[]));
        assert!(!config.debug);
        assert_eq!(config.level, Level::Info);
        assert_eq!(config.format, Format::Json);
        assert!(config.timestamps);
    }

    #[test]
    fn test_debug_flag_lowers_default_level() {
        let config = LogConfig::from_lookup(lookup(&[("SEARCHKIT_DEBUG", "true")]));
        assert!(config.debug);
        assert_eq!(config.level, Level::Debug);

        let config = LogConfig::from_lookup(lookup(&[
            ("SEARCHKIT_DEBUG", "1"),
            ("SEARCHKIT_LOG_LEVEL", "error"),
            ("SEARCHKIT_LOG_FORMAT", "compact"),
        ]));
        assert_eq!(config.level, Level::Error);
        assert_eq!(config.format, Format::Compact);
    }

    #[test]
    fn test_render_without_timestamps() {
        let config = LogConfig {
            timestamps: false,
            format: Format::Compact,
            ..LogConfig::default()
        };
        assert_eq!(
            render(&config, Level::Warn, "searchkit::bulk", "3 items failed"),
            "W searchkit::bulk: 3 items failed"
        );

        let config = LogConfig {
            format: Format::Json,
            ..config
        };
        let line = render(&config, Level::Info, "t", "say \"hi\"");
        assert!(line.contains(r#""level":"INFO""#));
        assert!(line.contains(r#"say \"hi\""#));
        assert!(!line.contains("timestamp"));
    }

    #[test]
    fn test_json_line_escapes_control_characters() {
        let config = LogConfig {
            timestamps: false,
            ..LogConfig::default()
        };
        let message = "line one\r\n\tquoted \"x\" back\\slash \u{1}bell";
        let line = render(&config, Level::Error, "searchkit::bulk", message);

        let record: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(record["message"], message);
        assert_eq!(record["target"], "searchkit::bulk");
        assert!(!line.contains('\r'));
        assert!(!line.contains('\t'));
    }

    #[cfg(not(feature = "json"))]
    #[test]
    fn test_escape_json() {
        assert_eq!(escape_json("a\tb\rc"), "a\\tb\\rc");
        assert_eq!(escape_json("\u{7}"), "\\u0007");
        assert_eq!(escape_json("plain"), "plain");
    }

    #[test]
    fn test_set_level_and_debug() {
        init();
        let original = current_level();

        set_level(Level::Error);
        assert!(!is_level_enabled(Level::Warn));
        assert!(is_level_enabled(Level::Error));
        assert!(!is_level_enabled(Level::Off));

        set_debug(true);
        assert!(is_debug_enabled());
        assert_eq!(current_level(), Level::Debug);

        set_debug(false);
        set_level(original);
    }

    #[test]
    fn test_macros_compile() {
        trace!("trace {}", 1);
        debug!("debug");
        info!(target: "test", "info {}", "x");
        warn!("warn");
        error!(target: "test", "error");
    }
}
