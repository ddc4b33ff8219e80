//! Structured logging utilities for the storage components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use tsfs_config::log_shard_warn;
//!
//! log_shard_warn!(bin = 17, "Missing bin directory");
//! log_gc_info!(container = %name, "Deleted orphaned container file");
//! ```

#[doc(hidden)]
pub use tracing as __tracing;

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const SHARD: &'static str = "SHARD";
    pub const REGISTRY: &'static str = "REGISTRY";
    pub const INDEX: &'static str = "INDEX";
    pub const ALLOC: &'static str = "ALLOC";
    pub const GC: &'static str = "GC";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// === SHARD logging macros ===

#[macro_export]
macro_rules! log_shard_warn {
    ($($arg:tt)+) => {
        $crate::logging::__tracing::warn!(component = "SHARD", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_shard_debug {
    ($($arg:tt)+) => {
        $crate::logging::__tracing::debug!(component = "SHARD", $($arg)+)
    };
}

// === REGISTRY logging macros ===

#[macro_export]
macro_rules! log_registry_error {
    ($($arg:tt)+) => {
        $crate::logging::__tracing::error!(component = "REGISTRY", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_registry_warn {
    ($($arg:tt)+) => {
        $crate::logging::__tracing::warn!(component = "REGISTRY", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_registry_info {
    ($($arg:tt)+) => {
        $crate::logging::__tracing::info!(component = "REGISTRY", $($arg)+)
    };
}

// === INDEX logging macros ===

#[macro_export]
macro_rules! log_index_debug {
    ($($arg:tt)+) => {
        $crate::logging::__tracing::debug!(component = "INDEX", $($arg)+)
    };
}

// === ALLOC logging macros ===

#[macro_export]
macro_rules! log_alloc_info {
    ($($arg:tt)+) => {
        $crate::logging::__tracing::info!(component = "ALLOC", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_alloc_debug {
    ($($arg:tt)+) => {
        $crate::logging::__tracing::debug!(component = "ALLOC", $($arg)+)
    };
}

// === GC logging macros ===

#[macro_export]
macro_rules! log_gc_error {
    ($($arg:tt)+) => {
        $crate::logging::__tracing::error!(component = "GC", $($arg)+)
    };
}

#[macro_export]
macro_rules! log_gc_info {
    ($($arg:tt)+) => {
        $crate::logging::__tracing::info!(component = "GC", $($arg)+)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let filter = match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Tests may call this more than once per process.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_constants() {
        assert_eq!(Component::SHARD, "SHARD");
        assert_eq!(Component::GC, "GC");
        assert_eq!(Component::ALLOC, "ALLOC");
    }

    #[test]
    fn test_macros_expand() {
        init_logging(LogLevel::Debug);
        init_logging(LogLevel::Debug);
        log_shard_warn!(bin = 3u64, "Missing bin directory");
        log_gc_info!(container = %"d-7", "Deleted orphaned container file");
        log_alloc_debug!("plain message");
    }
}
