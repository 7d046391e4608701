//! Structured logging for the transaction coordination crates
//!
//! Logging is off unless `TXCOORD_LOG` selects a level:
//! - `TXCOORD_LOG=off` (default) - no logs
//! - `TXCOORD_LOG=error` / `warn` - failures only
//! - `TXCOORD_LOG=info` - transaction rollbacks, GC passes, session changes
//! - `TXCOORD_LOG=debug` - every lock, txid and cache refresh

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

pub const LOG_ENV_VAR: &str = "TXCOORD_LOG";

static INIT: Once = Once::new();

/// Map a `TXCOORD_LOG` value to a minimum level; `None` means logging is off.
///
/// Unknown values fall back to `Info`.
#[must_use]
pub fn parse_level(value: &str) -> Option<emit::Level> {
    match value.trim().to_ascii_lowercase().as_str() {
        "off" | "" => None,
        "debug" => Some(emit::Level::Debug),
        "warn" => Some(emit::Level::Warn),
        "error" => Some(emit::Level::Error),
        _ => Some(emit::Level::Info),
    }
}

/// Initialize diagnostics based on the `TXCOORD_LOG` environment variable
///
/// Call once at process startup. Subsequent calls are ignored.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let value = std::env::var(LOG_ENV_VAR).unwrap_or_else(|_| "off".to_string());
        let Some(level) = parse_level(&value) else {
            return;
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(level))
            .init();

        // The runtime must outlive every caller; there is no shutdown hook
        std::mem::forget(rt);
    });
}

/// Log notable operations (rollbacks, GC passes, session changes)
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Log detailed diagnostics (lock paths, allocated ids, cache refreshes)
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Log recoverable problems (a single transaction failing to roll back during GC)
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Log failures that stop an operation
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

pub use init_diagnostics as init;
