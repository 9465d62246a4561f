//! UART 16550 log sink.
//!
//! The engine itself never touches the serial port; the embedding kernel
//! calls [`init`] once during bring-up if it wants engine logs mirrored to
//! COM1.

use spin::Mutex;
use uart_16550::SerialPort;

use crate::logging::LogLevel;

/// COM1 serial port (I/O base 0x3F8)
static SERIAL1: Mutex<SerialPort> = Mutex::new(unsafe { SerialPort::new(0x3F8) });

/// Initialize COM1 and register it as the live log sink.
pub fn init() {
    SERIAL1.lock().init();
    crate::logging::install_sink(sink);
}

fn sink(level: LogLevel, msg: &str) {
    use core::fmt::Write;
    let mut port = SERIAL1.lock();
    let _ = write!(port, "[{}] {}\n", level.as_str(), msg);
}
