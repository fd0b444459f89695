use core::fmt::{self, Write};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Log target used by [`fatal!`](crate::fatal).
pub const FATAL_TARGET: &str = "fatal";

/// Byte sink the console writes formatted lines to.
///
/// Implementations are expected to be best-effort: output errors are dropped.
pub trait ConsoleSink: Send + Sync {
    fn write_str(&self, s: &str);
}

/// Adapts a sink to `core::fmt::Write` so records can be formatted without
/// allocating.
struct SinkWriter<'a, S: ?Sized>(&'a S);

impl<S: ConsoleSink + ?Sized> Write for SinkWriter<'_, S> {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

/// Label printed in front of a record.
#[must_use]
pub fn level_label(level: Level, target: &str) -> &'static str {
    if target == FATAL_TARGET {
        return "FATAL";
    }
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// `log::Log` implementation printing `"[LEVEL] target: message\n"` lines to
/// a [`ConsoleSink`].
pub struct ConsoleLogger<S> {
    sink: S,
    max_level: LevelFilter,
}

impl<S> ConsoleLogger<S>
where
    S: ConsoleSink,
{
    #[must_use]
    pub const fn new(sink: S, max_level: LevelFilter) -> Self {
        Self { sink, max_level }
    }

    /// Register this logger as the global `log` backend.
    ///
    /// Call this once during early init.
    ///
    /// # Errors
    /// Fails if a logger has already been installed.
    pub fn install(&'static self) -> Result<(), SetLoggerError>
    where
        S: 'static,
    {
        log::set_logger(self)?;
        // Fatal records are emitted at `Error`, so the global filter never
        // needs to drop below that.
        log::set_max_level(self.max_level.max(LevelFilter::Error));
        Ok(())
    }

    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    #[must_use]
    pub const fn max_level(&self) -> LevelFilter {
        self.max_level
    }
}

impl<S> Log for ConsoleLogger<S>
where
    S: ConsoleSink,
{
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.target() == FATAL_TARGET || metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Best-effort output; a failing sink must not take the kernel down.
        let _ = writeln!(
            SinkWriter(&self.sink),
            "[{}] {}: {}",
            level_label(record.level(), record.target()),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}
