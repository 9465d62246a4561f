//! Hardware access for the engine.
//!
//! Everything the engine needs from the platform sits behind [`PmuBus`]:
//! the PMU register block, the north-complex message bus, time, and the
//! sleep instruction. [`MmioBus`] is the real implementation; the tests use
//! the scripted mock at the bottom of this file.

use super::regs::REG_WORDS;
use super::SleepState;

/// Platform access used by the engine.
///
/// Register methods take `&self`; implementations provide their own interior
/// mutability where they need it. `delay_us` may sleep, so it must never be
/// called from interrupt context.
pub trait PmuBus {
    /// Read one 32-bit word of the PMU register block.
    fn read_reg(&self, word: usize) -> u32;

    /// Write one 32-bit word of the PMU register block.
    fn write_reg(&self, word: usize, value: u32);

    /// Read a north-complex register over the message bus.
    fn bus_read(&self, port: u8, reg: u32) -> u32;

    /// Write a north-complex register over the message bus.
    fn bus_write(&self, port: u8, reg: u32, value: u32);

    /// Milliseconds since an arbitrary epoch.
    fn now_ms(&self) -> u64;

    /// Bounded sleep used by the polling waits.
    fn delay_us(&self, us: u64);

    /// True if the scheduler has work pending; aborts idle-sleep entry.
    fn sched_event_pending(&self) -> bool {
        false
    }

    /// Execute the architecture sleep instruction. Returns on wake.
    fn cpu_idle(&self);
}

/// Message-bus control/data registers live in PCI config space of bus 0,
/// device 0, function 0.
const MSG_CTRL_REG: u32 = 0xD0;
const MSG_DATA_REG: u32 = 0xD4;
const MSG_OP_READ: u32 = 0x10;
const MSG_OP_WRITE: u32 = 0x11;

const PCI_CONFIG_ADDRESS: u16 = 0xCF8;
const PCI_CONFIG_DATA: u16 = 0xCFC;

/// Real hardware: volatile MMIO for the register block, port I/O for the
/// message bus.
pub struct MmioBus {
    base: *mut u32,
    time_ms: fn() -> u64,
}

// The register block is a fixed device mapping; concurrent access is
// serialized by the engine's locks.
unsafe impl Send for MmioBus {}
unsafe impl Sync for MmioBus {}

impl MmioBus {
    /// # Safety
    /// `base` must point to the mapped PMU register block, valid for
    /// `REG_WORDS` 32-bit words for the lifetime of the bus.
    pub unsafe fn new(base: *mut u32, time_ms: fn() -> u64) -> Self {
        Self { base, time_ms }
    }

    fn pci_config_read(&self, offset: u32) -> u32 {
        use x86_64::instructions::port::Port;
        // Bus 0, device 0, function 0.
        let address = 0x8000_0000u32 | (offset & 0xFC);
        let mut addr_port: Port<u32> = Port::new(PCI_CONFIG_ADDRESS);
        let mut data_port: Port<u32> = Port::new(PCI_CONFIG_DATA);
        unsafe {
            addr_port.write(address);
            data_port.read()
        }
    }

    fn pci_config_write(&self, offset: u32, value: u32) {
        use x86_64::instructions::port::Port;
        let address = 0x8000_0000u32 | (offset & 0xFC);
        let mut addr_port: Port<u32> = Port::new(PCI_CONFIG_ADDRESS);
        let mut data_port: Port<u32> = Port::new(PCI_CONFIG_DATA);
        unsafe {
            addr_port.write(address);
            data_port.write(value);
        }
    }

    fn send_msg_cmd(&self, op: u32, port: u8, reg: u32) {
        let cmd = (op << 24) | ((port as u32) << 16) | ((reg & 0xFF) << 8) | 0xF0;
        self.pci_config_write(MSG_CTRL_REG, cmd);
    }
}

impl PmuBus for MmioBus {
    fn read_reg(&self, word: usize) -> u32 {
        assert!(word < REG_WORDS);
        unsafe { volatile::Volatile::new(&mut *self.base.add(word)).read() }
    }

    fn write_reg(&self, word: usize, value: u32) {
        assert!(word < REG_WORDS);
        unsafe { volatile::Volatile::new(&mut *self.base.add(word)).write(value) }
    }

    fn bus_read(&self, port: u8, reg: u32) -> u32 {
        self.send_msg_cmd(MSG_OP_READ, port, reg);
        self.pci_config_read(MSG_DATA_REG)
    }

    fn bus_write(&self, port: u8, reg: u32, value: u32) {
        self.pci_config_write(MSG_DATA_REG, value);
        self.send_msg_cmd(MSG_OP_WRITE, port, reg);
    }

    fn now_ms(&self) -> u64 {
        (self.time_ms)()
    }

    fn delay_us(&self, us: u64) {
        use x86_64::instructions::port::Port;
        // Port 0x80 writes take roughly 1 us on this platform.
        let mut port: Port<u8> = Port::new(0x80);
        for _ in 0..us {
            unsafe { port.write(0) };
        }
    }

    fn cpu_idle(&self) {
        x86_64::instructions::hlt();
    }
}

/// Sleep-command selection shared by the real and mock paths.
pub fn sleep_command(state: SleepState) -> Option<u32> {
    use super::regs::*;
    match state {
        SleepState::Active => None,
        SleepState::S0i1 => Some(CMD_S0I1),
        SleepState::Lpmp3 => Some(CMD_LPMP3),
        SleepState::S0i3 => Some(CMD_S0I3),
        SleepState::S3 => Some(CMD_POWER_OFF),
    }
}
