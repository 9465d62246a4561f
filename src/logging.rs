//! Engine-wide logging.
//!
//! Every log line lands in a fixed ring buffer so the most recent activity
//! survives for postmortem dumps even when no sink is attached. The embedding
//! kernel may install a sink (see [`crate::serial`]) to mirror lines to a
//! console as they happen.

use core::fmt;
use spin::Mutex;

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Error level (always emitted)
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    /// Most verbose
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN ",
            LogLevel::Info => "INFO ",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

/// Compile-time log level.
pub const LOG_LEVEL: LogLevel = LogLevel::Debug;

const RING_CAPACITY: usize = 256;
const MAX_LOG_LINE_LEN: usize = 128;

/// A formatted line plus metadata, fixed-width so the ring stays allocation
/// free.
#[derive(Clone, Copy)]
struct LogEntry {
    timestamp_ms: u64,
    level: LogLevel,
    message: [u8; MAX_LOG_LINE_LEN],
    message_len: usize,
}

impl LogEntry {
    const fn new() -> Self {
        Self {
            timestamp_ms: 0,
            level: LogLevel::Trace,
            message: [0; MAX_LOG_LINE_LEN],
            message_len: 0,
        }
    }

    fn set(&mut self, timestamp_ms: u64, level: LogLevel, msg: &str) {
        let bytes = msg.as_bytes();
        let len = bytes.len().min(MAX_LOG_LINE_LEN);
        self.message[..len].copy_from_slice(&bytes[..len]);
        self.message_len = len;
        self.timestamp_ms = timestamp_ms;
        self.level = level;
    }

    fn message(&self) -> &str {
        core::str::from_utf8(&self.message[..self.message_len]).unwrap_or("")
    }
}

struct LogRing {
    entries: [LogEntry; RING_CAPACITY],
    head: usize,
    count: usize,
}

impl LogRing {
    const fn new() -> Self {
        Self {
            entries: [LogEntry::new(); RING_CAPACITY],
            head: 0,
            count: 0,
        }
    }

    fn push(&mut self, timestamp_ms: u64, level: LogLevel, msg: &str) {
        self.entries[self.head].set(timestamp_ms, level, msg);
        self.head = (self.head + 1) % RING_CAPACITY;
        if self.count < RING_CAPACITY {
            self.count += 1;
        }
    }

    fn for_each<F: FnMut(&LogEntry)>(&self, mut f: F) {
        let start = if self.count == RING_CAPACITY { self.head } else { 0 };
        for i in 0..self.count {
            let idx = (start + i) % RING_CAPACITY;
            f(&self.entries[idx]);
        }
    }
}

static LOG_RING: Mutex<LogRing> = Mutex::new(LogRing::new());

/// Optional live sink; receives each line as it is logged.
static SINK: Mutex<Option<fn(LogLevel, &str)>> = Mutex::new(None);

/// Optional millisecond time source for ring timestamps.
static TIME_SOURCE: Mutex<Option<fn() -> u64>> = Mutex::new(None);

/// Install a live sink. Lines are delivered already formatted.
pub fn install_sink(sink: fn(LogLevel, &str)) {
    *SINK.lock() = Some(sink);
}

/// Install the timestamp source used for ring entries.
pub fn install_time_source(source: fn() -> u64) {
    *TIME_SOURCE.lock() = Some(source);
}

fn now_ms() -> u64 {
    match *TIME_SOURCE.lock() {
        Some(f) => f(),
        None => 0,
    }
}

/// Format and record one log line.
pub fn log(level: LogLevel, args: fmt::Arguments) {
    if level > LOG_LEVEL {
        return;
    }

    let mut buf = [0u8; MAX_LOG_LINE_LEN];
    let mut line = LineBuffer { buf: &mut buf, pos: 0 };
    let _ = fmt::Write::write_fmt(&mut line, args);
    let pos = line.pos;
    let msg = core::str::from_utf8(&buf[..pos]).unwrap_or("<bad utf8>");

    let timestamp_ms = now_ms();
    LOG_RING.lock().push(timestamp_ms, level, msg);

    if let Some(sink) = *SINK.lock() {
        sink(level, msg);
    }
}

/// Format and record one log line without ever blocking. Interrupt-context
/// callers use this; the line is dropped (returning false) when the ring
/// lock is contended.
pub fn try_log(level: LogLevel, args: fmt::Arguments) -> bool {
    if level > LOG_LEVEL {
        return true;
    }

    let mut buf = [0u8; MAX_LOG_LINE_LEN];
    let mut line = LineBuffer { buf: &mut buf, pos: 0 };
    let _ = fmt::Write::write_fmt(&mut line, args);
    let pos = line.pos;
    let msg = core::str::from_utf8(&buf[..pos]).unwrap_or("<bad utf8>");

    // Timestamp and sink degrade gracefully; only the ring entry itself
    // decides whether the line was recorded.
    let timestamp_ms = match TIME_SOURCE.try_lock() {
        Some(source) => source.map(|f| f()).unwrap_or(0),
        None => 0,
    };
    match LOG_RING.try_lock() {
        Some(mut ring) => ring.push(timestamp_ms, level, msg),
        None => return false,
    }
    if let Some(sink) = SINK.try_lock() {
        if let Some(sink) = *sink {
            sink(level, msg);
        }
    }
    true
}

/// Fixed scratch buffer for formatting; overflow is truncated.
struct LineBuffer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> fmt::Write for LineBuffer<'a> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buf.len().saturating_sub(self.pos);
        let to_write = bytes.len().min(remaining);
        if to_write > 0 {
            self.buf[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
            self.pos += to_write;
        }
        Ok(())
    }
}

/// Replay the ring through the installed sink, oldest first.
pub fn dump_recent() {
    let sink = match *SINK.lock() {
        Some(s) => s,
        None => return,
    };
    LOG_RING.lock().for_each(|entry| {
        sink(entry.level, entry.message());
    });
}

/// Visit recent entries without needing a sink; used by the diagnostics
/// reporter and the tests.
pub fn recent_entries<F: FnMut(u64, LogLevel, &str)>(mut f: F) {
    LOG_RING.lock().for_each(|entry| {
        f(entry.timestamp_ms, entry.level, entry.message());
    });
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Error, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Warn, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Info, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Debug, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Trace, format_args!($($arg)*));
    };
}

/// Non-blocking variants for interrupt context: the line is dropped when a
/// logging lock is contended.
#[macro_export]
macro_rules! try_log_error {
    ($($arg:tt)*) => {
        $crate::logging::try_log($crate::logging::LogLevel::Error, format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! try_log_warn {
    ($($arg:tt)*) => {
        $crate::logging::try_log($crate::logging::LogLevel::Warn, format_args!($($arg)*));
    };
}
