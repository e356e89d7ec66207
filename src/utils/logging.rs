//! Gated logging macros.
//!
//! Every module that logs declares its own switch and then calls the
//! crate-root macros:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_debug, log_info, log_warn};
//!
//! log_info!("shown only while ENABLE_LOGS is true");
//! ```
//! Flipping the constant to `false` silences a noisy module (the scroll
//! engine logs every wheel delta at debug) without touching `RUST_LOG`.

/// Debug-level record, gated on the caller's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

/// Info-level record, gated on the caller's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Warn-level record. Used for the absorbed failure classes: unmapped
/// characters, failed grabs and settings fallbacks.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
