//! Kernel log service: a [`log::Log`] implementation writing to the serial
//! console.
//!
//! Unlike the teacher's fixed-capacity circular log buffer, this kernel has
//! no subsystem that replays historical log entries, so records are written
//! through as they arrive rather than retained. The level/subsystem tagging
//! idiom is kept.

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::serial_println;

struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        serial_println!(
            "[{:>5} {}] {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Install the serial logger as the global `log` backend. Idempotent after
/// the first call; callers should only invoke this once, during C1 bring-up.
pub fn init() {
    // SAFETY: `set_logger` is only unsafe insofar as it may only be called
    // once; C1 init runs exactly once before any other subsystem logs.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Trace);
}
