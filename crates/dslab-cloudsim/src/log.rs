//! Logging facilities.
//!
//! The macros accept any value with `time() -> f64` and `name() -> &str` methods, such as
//! [`Datacenter`](crate::Datacenter), and prefix the message with the simulated time and the component name.

use atty::Stream;
use colored::{Color, ColoredString, Colorize};

/// Applies the color to the string if stderr (log) goes to console.
pub fn get_colored(s: &str, color: Color) -> ColoredString {
    if atty::is(Stream::Stderr) {
        s.color(color)
    } else {
        s.normal()
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log_with_ctx {
    ($level:ident, $label:literal, $color:ident, $ctx:expr, $format:literal $(, $arg:expr)* $(,)?) => (
        log::$level!(
            target: $ctx.name(),
            concat!("[{:.3} {} {}] ", $format),
            $ctx.time(),
            $crate::log::get_colored($label, $crate::colored::Color::$color),
            $ctx.name()
            $(, $arg)*
        )
    );
}

/// Logs a message at the info level.
///
/// # Examples
///
/// ```rust
/// use std::io::Write;
/// use env_logger::Builder;
/// use dslab_cloudsim::{log_info, Datacenter};
///
/// Builder::from_default_env()
///     .format(|buf, record| writeln!(buf, "{}", record.args()))
///     .init();
///
/// let datacenter = Datacenter::new("dc");
/// log_info!(datacenter, "created with {} hosts", datacenter.hosts().count());
/// ```
#[macro_export]
macro_rules! log_info {
    ($ctx:expr, $($rest:tt)+) => ($crate::__log_with_ctx!(info, "INFO ", Green, $ctx, $($rest)+));
}

/// Logs a message at the debug level.
///
/// See [`log_info!`](crate::log_info!).
#[macro_export]
macro_rules! log_debug {
    ($ctx:expr, $($rest:tt)+) => ($crate::__log_with_ctx!(debug, "DEBUG", Blue, $ctx, $($rest)+));
}

/// Logs a message at the trace level.
#[macro_export]
macro_rules! log_trace {
    ($ctx:expr, $($rest:tt)+) => ($crate::__log_with_ctx!(trace, "TRACE", Cyan, $ctx, $($rest)+));
}

/// Logs a message at the warn level.
#[macro_export]
macro_rules! log_warn {
    ($ctx:expr, $($rest:tt)+) => ($crate::__log_with_ctx!(warn, "WARN ", Yellow, $ctx, $($rest)+));
}

/// Logs a message at the error level.
///
/// ```rust
/// use dslab_cloudsim::{log_error, Datacenter};
///
/// let datacenter = Datacenter::new("dc");
/// if let Err(e) = datacenter.host(7) {
///     log_error!(datacenter, "lookup failed: {}", e);
/// }
/// ```
#[macro_export]
macro_rules! log_error {
    ($ctx:expr, $($rest:tt)+) => ($crate::__log_with_ctx!(error, "ERROR", Red, $ctx, $($rest)+));
}
