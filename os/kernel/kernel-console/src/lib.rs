//! # Kernel Diagnostics Console
//!
//! Leveled text output for the kernel, exposed through the standard `log`
//! facade so subsystems only ever write `info!`/`warn!`/`error!`.
//!
//! ## Overview
//!
//! ```text
//! Kernel code
//!     ↓ log::info! / warn! / error! / kernel_console::fatal!
//! ConsoleLogger<S>          (level filter, "[LEVEL] target: message" lines)
//!     ↓
//! ConsoleSink               (serial port, QEMU debugcon, test buffer, ...)
//! ```
//!
//! The `log` crate has no level above `Error`, so fatal conditions are logged
//! as `Error` records on the dedicated [`FATAL_TARGET`]. The logger renders
//! those as `FATAL` and never filters them out; the caller is responsible for
//! halting afterwards.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kernel_console::{ConsoleLogger, debugcon::DebugConSink};
//! use log::LevelFilter;
//!
//! static LOGGER: ConsoleLogger<DebugConSink> =
//!     ConsoleLogger::new(DebugConSink::new(), LevelFilter::Info);
//!
//! LOGGER.install().expect("logger installed twice");
//! log::info!("memory subsystem online");
//! ```
//!
//! ## Features
//!
//! * `debugcon` (default): compiles [`debugcon::DebugConSink`], which writes
//!   to QEMU's debug console port `0x402` (`-debugcon stdio`).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(all(feature = "debugcon", target_arch = "x86_64"))]
pub mod debugcon;
mod logger;

pub use logger::{ConsoleLogger, ConsoleSink, FATAL_TARGET, level_label};

#[doc(hidden)]
pub use log as __log;

/// Log an unrecoverable condition.
///
/// Expands to an `error!` record on [`FATAL_TARGET`], which
/// [`ConsoleLogger`] prints with the `FATAL` label. Logging does not halt.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        $crate::__log::error!(target: $crate::FATAL_TARGET, $($arg)*);
    }};
}
