//! Provides logging utilities, used by library.

use std::io;

use chrono::Local;
use slog::{
    o, Drain, Duplicate, FnValue, Fuse, Level, Logger, PushFnValue, Record,
};
use slog_async::Async;
use slog_json::Json;

use crate::conf;

/// Re-exports common definitions for logging.
///
/// Use this module as following:
/// ```rust
/// use medea_rtc_client::log::prelude::*;
/// ```
pub mod prelude {
    pub use slog::{slog_debug, slog_error, slog_info, slog_trace, slog_warn};
    pub use slog_scope::{debug, error, info, trace, warn};
}

/// Guards of the installed global logger.
///
/// Global logger is reset once this is dropped, so keep it alive for the
/// whole client lifetime.
pub struct LoggerGuard {
    _scope: slog_scope::GlobalLoggerGuard,
}

/// Installs JSON [`Logger`] built by [`new_dual_logger`] as the global
/// [`slog_scope`] logger and bridges [`log`] facade records into it.
///
/// Records below the configured [`conf::Log::level`] are dropped. If level
/// is `OFF` (or unparseable) then nothing is logged at all.
///
/// [`log`]: https://docs.rs/log
pub fn init(conf: &conf::Log) -> LoggerGuard {
    let logger = match conf.level() {
        Some(lvl) => {
            let drain = new_dual_logger(io::stdout(), io::stderr());
            Logger::root(drain.filter_level(lvl).fuse(), o!())
        }
        None => Logger::root(slog::Discard, o!()),
    };
    let scope = slog_scope::set_global_logger(logger);
    // Bridge may be installed only once per process, which is fine to ignore.
    let _ = slog_stdlog::init();
    LoggerGuard { _scope: scope }
}

/// Builds JSON [`Logger`] which prints all its log records to `w_out` writer,
/// but WARN level (and higher) to `w_err` writer. Logger will use [`Async`]
/// drain with channel size of 2048 entries.
///
/// Created [`Logger`] produces log records with `fqn`, `lvl`, `time` and `msg`
/// fields by default.
pub fn new_dual_logger<W1, W2>(w_out: W1, w_err: W2) -> Logger
where
    W1: io::Write + Send + 'static,
    W2: io::Write + Send + 'static,
{
    let drain_out = Json::new(w_out).build();
    let drain_err = Json::new(w_err).build();
    let drain = Duplicate(
        drain_out.filter(|r| !r.level().is_at_least(Level::Warning)),
        drain_err.filter_level(Level::Warning),
    )
    .map(Fuse);
    let drain = slog_envlogger::new(drain).fuse();
    let drain = Async::new(drain).chan_size(2048).build().fuse();
    add_default_keys(&Logger::root(drain, o!()))
}

/// Adds default log record data (key-value pairs) to specified [`Logger`]:
/// - `msg`: log record message.
/// - `fqn`: path to code line that called log function.
/// - `time`: creation date and time of log record in [RFC 3339] format.
/// - `lvl`: logging level of log record.
///
/// [RFC 3339]: https://www.ietf.org/rfc/rfc3339.txt
fn add_default_keys(logger: &Logger) -> Logger {
    logger.new(o!(
        "msg" => PushFnValue(move |record : &Record, ser| {
            ser.emit(record.msg())
        }),
        "fqn" => PushFnValue(move |record : &Record, ser| {
             ser.emit(format_args!("{}:{}", record.module(), record.line()))
        }),
        "time" => PushFnValue(move |_ : &Record, ser| {
            ser.emit(Local::now().to_rfc3339())
        }),
        "lvl" => FnValue(move |rinfo : &Record| {
            rinfo.level().as_str()
        }),
    ))
}
