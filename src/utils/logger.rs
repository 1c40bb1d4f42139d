/*
 * Kernel Log Backend
 *
 * The core reports lifecycle events through the `log` facade. This
 * backend formats each record into a fixed buffer and hands the line to
 * whatever console sink the embedder installed; the crate itself never
 * performs I/O. Running without an installed backend is fine, the log
 * macros just discard.
 *
 * Sinks must be leaf functions: a sink that calls back into the kernel
 * can deadlock, since records may be emitted under the table lock.
 */

use core::fmt::Write;

use log::{Level, LevelFilter, Metadata, Record};
use spin::Mutex;

/// Console sink signature. Receives one formatted line per record.
pub type LogSink = fn(&str);

static SINK: Mutex<Option<LogSink>> = Mutex::new(None);

struct CortenLogger;

impl log::Log for CortenLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut line: heapless::String<256> = heapless::String::new();
        // Overlong records are truncated by the buffer.
        let _ = write!(line, "[{}] {}", record.level(), record.args());
        if let Some(sink) = *SINK.lock() {
            sink(line.as_str());
        }
    }

    fn flush(&self) {}
}

static LOGGER: CortenLogger = CortenLogger;

/// Install the backend with the given console sink.
///
/// # Panics
///
/// Panics if another `log` backend is already installed.
pub fn init(sink: LogSink) {
    *SINK.lock() = Some(sink);
    let result = log::set_logger(&LOGGER).map(|()| log::set_max_level(LevelFilter::Info));
    match result {
        Ok(()) => log::info!("log backend online"),
        Err(err) => panic!("log backend installation failed: {}", err),
    }
}
