//! Structured logging utilities for the IME preload layer.
//!
//! Logging is off unless `IM_PRELOAD_LOG` carries a filter directive. The
//! subscriber writer is supplied by the caller: inside a preloaded process it
//! must not route through the intercepted `write`.
//!
//! # Usage
//!
//! ```ignore
//! use ime_config::logging::*;
//!
//! log_redirect_debug!("create via mknod", path = "/mnt/ime/f");
//! log_preload_info!("bootstrap complete");
//! ```

use crate::ConfigError;

/// Filter directive for the preload subscriber, e.g. `debug` or `ime_redirect=trace`.
pub const LOG_ENV: &str = "IM_PRELOAD_LOG";

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const PRELOAD: &'static str = "PRELOAD";
    pub const REDIRECT: &'static str = "REDIRECT";
    pub const CONFIG: &'static str = "CONFIG";
    pub const BACKEND: &'static str = "BACKEND";
}

// === PRELOAD logging macros ===

#[macro_export]
macro_rules! log_preload_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "PRELOAD", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_preload_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "PRELOAD", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_preload_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "PRELOAD", $($key = $value,)* $msg)
    };
}

// === REDIRECT logging macros ===

#[macro_export]
macro_rules! log_redirect_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "REDIRECT", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_redirect_trace {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::trace!(component = "REDIRECT", $($key = $value,)* $msg)
    };
}

// === BACKEND logging macros ===

#[macro_export]
macro_rules! log_backend_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "BACKEND", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_backend_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "BACKEND", $($key = $value,)* $msg)
    };
}

/// Read the filter directive from the process environment.
pub fn directive_from_env() -> Option<String> {
    std::env::var(LOG_ENV).ok().filter(|d| !d.trim().is_empty())
}

/// Install a global subscriber filtered by `directive`, writing through `writer`.
///
/// Returns an error instead of panicking when a subscriber is already set.
pub fn init_logging<W>(directive: &str, writer: W) -> Result<(), ConfigError>
where
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_target(false)
        .with_ansi(false)
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))
}
