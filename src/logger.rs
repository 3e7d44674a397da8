//! Backend for the `log` facade.
//!
//! Lines are formatted as `[LEVEL] target: message` and handed to a sink
//! registered at boot, usually the console. The sink runs under a spin
//! lock so lines from different tasks never interleave.

use crate::sync::SpinMutex;
use core::fmt;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Receives one formatted line, newline included.
pub type Sink = fn(fmt::Arguments<'_>);

pub struct KernelLogger {
    sink: SpinMutex<Option<Sink>>,
}
impl KernelLogger {
    pub const fn new() -> KernelLogger {
        KernelLogger {
            sink: SpinMutex::new(None),
        }
    }
    pub fn set_sink(&self, sink: Sink) {
        *self.sink.lock() = Some(sink);
    }
}
impl Default for KernelLogger {
    fn default() -> KernelLogger {
        KernelLogger::new()
    }
}

impl Log for KernelLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let sink = self.sink.lock();
        if let Some(sink) = *sink {
            sink(format_args!(
                "[{:5}] {}: {}\n",
                record.level(),
                record.target(),
                record.args()
            ));
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger::new();

/// Route the `log` macros to `sink`. Calling this again only swaps the
/// sink; the error reports that the logger was already installed.
pub fn init(sink: Sink, level: LevelFilter) -> Result<(), SetLoggerError> {
    LOGGER.set_sink(sink);
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
