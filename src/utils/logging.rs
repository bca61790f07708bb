//! Logging macros gated on a per-module `ENABLE_LOGS` switch.
//!
//! Chatty modules (capture loops, pipelines) declare
//! `const ENABLE_LOGS: bool = ...;` and log through these instead of the
//! `log` macros directly, so a noisy module can be silenced without
//! touching `RUST_LOG`. Everything still goes through the `log` facade and
//! the target is the calling module.

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!(target: module_path!(), $($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!(target: module_path!(), $($arg)*);
        }
    };
}

/// Warnings concern dropped frames and retries; they are still gated.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!(target: module_path!(), $($arg)*);
        }
    };
}

/// Errors are never gated.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        log::error!(target: module_path!(), $($arg)*);
    };
}
