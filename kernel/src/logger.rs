//! Kernel logger
//!
//! Backs the `log` facade with a fixed-size line formatter writing to a
//! platform console. Formatting needs no allocation, so the logger is usable
//! from interrupt context and before the heap exists.

use core::fmt::{self, Write};

use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use spin::Once;

/// Longest formatted line; anything past it is cut.
pub const LINE_MAX: usize = 512;

/// Byte sink for log lines (serial port, VGA, test buffer...).
pub trait Console: Sync {
    fn write_bytes(&self, bytes: &[u8]);
}

/// Simple buffer writer for formatting without alloc
pub struct BufferWriter<'a> {
    buffer: &'a mut [u8],
    pos: usize,
    truncated: bool,
}

impl<'a> BufferWriter<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, pos: 0, truncated: false }
    }

    pub fn written(&self) -> &[u8] {
        &self.buffer[..self.pos]
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

impl Write for BufferWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buffer.len() - self.pos;
        let to_write = bytes.len().min(remaining);
        if to_write < bytes.len() {
            self.truncated = true;
        }
        self.buffer[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
        self.pos += to_write;
        Ok(())
    }
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN ",
        Level::Info => "INFO ",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// Format `[LEVEL] message\n` into `buf`, returning the bytes written. A cut
/// line still ends with a newline.
pub fn format_record(buf: &mut [u8], level: Level, args: fmt::Arguments<'_>) -> usize {
    let len = {
        let mut writer = BufferWriter::new(buf);
        let _ = writeln!(writer, "[{}] {}", level_tag(level), args);
        writer.pos
    };
    if len == buf.len() && len > 0 {
        buf[len - 1] = b'\n';
    }
    len
}

pub struct KernelLogger {
    console: &'static dyn Console,
    level: LevelFilter,
}

impl KernelLogger {
    pub const fn new(console: &'static dyn Console, level: LevelFilter) -> Self {
        Self { console, level }
    }
}

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut buf = [0u8; LINE_MAX];
        let len = format_record(&mut buf, record.level(), *record.args());
        self.console.write_bytes(&buf[..len]);
    }

    fn flush(&self) {}
}

static LOGGER: Once<KernelLogger> = Once::new();

/// Install the kernel logger. Only the first call installs it.
pub fn init(console: &'static dyn Console, level: LevelFilter) -> Result<(), SetLoggerError> {
    let logger = LOGGER.call_once(|| KernelLogger::new(console, level));
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Log;
    use std::sync::Mutex;
    use std::vec::Vec;

    struct Capture(Mutex<Vec<u8>>);

    impl Console for Capture {
        fn write_bytes(&self, bytes: &[u8]) {
            self.0.lock().unwrap().extend_from_slice(bytes);
        }
    }

    #[test]
    fn test_format_record() {
        let mut buf = [0u8; 64];
        let len = format_record(&mut buf, Level::Warn, format_args!("queue {} full", 3));
        assert_eq!(&buf[..len], b"[WARN ] queue 3 full\n");
    }

    #[test]
    fn test_truncated_line_keeps_newline() {
        let mut buf = [0u8; 16];
        let len = format_record(&mut buf, Level::Info, format_args!("{}", "x".repeat(40)));
        assert_eq!(len, 16);
        assert_eq!(&buf[..len], b"[INFO ] xxxxxxx\n");
    }

    #[test]
    fn test_writer_reports_truncation() {
        let mut buf = [0u8; 4];
        let mut writer = BufferWriter::new(&mut buf);
        writer.write_str("abc").unwrap();
        assert!(!writer.is_truncated());
        writer.write_str("de").unwrap();
        assert!(writer.is_truncated());
        assert_eq!(writer.written(), b"abcd");
    }

    #[test]
    fn test_logger_filters_by_level() {
        static CAPTURE: Capture = Capture(Mutex::new(Vec::new()));
        let logger = KernelLogger::new(&CAPTURE, LevelFilter::Info);
        logger.log(&Record::builder().level(Level::Debug).args(format_args!("hidden")).build());
        logger.log(&Record::builder().level(Level::Error).args(format_args!("shown")).build());
        assert_eq!(CAPTURE.0.lock().unwrap().as_slice(), b"[ERROR] shown\n");
    }
}
