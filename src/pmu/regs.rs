//! PMU register block layout and firmware command values.
//!
//! The SCU exposes one memory-mapped block of 32-bit words. Offsets below
//! are word indices into that block. Command values are fixed protocol
//! constants understood by the firmware; they are opaque to the engine.

use super::PowerLevel;

/// Number of 32-bit words in the register block.
pub const REG_WORDS: usize = 20;

/// Status register.
pub const PM_STS: usize = 0;
/// Command register.
pub const PM_CMD: usize = 1;
/// Interrupt control/status register.
pub const PM_ICS: usize = 2;
/// Wake-enable registers.
pub const PM_WKC: [usize; 2] = [3, 4];
/// Wake-status registers.
pub const PM_WKS: [usize; 2] = [5, 6];
/// Subsystem configuration registers (what we ask for).
pub const PM_SSC: [usize; 4] = [7, 8, 9, 10];
/// Subsystem status registers (what the hardware confirms).
pub const PM_SSS: [usize; 4] = [11, 12, 13, 14];
/// Wake subsystem configuration registers.
pub const PM_WSSC: [usize; 4] = [15, 16, 17, 18];
/// C-state latency register.
pub const PM_CSTATE: usize = 19;

/// PM_STS: firmware is processing a command.
pub const STS_BUSY: u32 = 1 << 8;

/// PM_ICS: event code of the latest notification.
pub const ICS_EVENT_MASK: u32 = 0x7;
/// PM_ICS: interrupt pending (write 1 to clear).
pub const ICS_PENDING: u32 = 1 << 8;
/// PM_ICS: interrupt enable.
pub const ICS_ENABLE: u32 = 1 << 9;

// Firmware command values. Fixed protocol constants; not derived.
pub const CMD_POWER_OFF: u32 = 0x0000_2121;
pub const CMD_S0I1: u32 = 0x0000_3101;
pub const CMD_LPMP3: u32 = 0x0000_6101;
pub const CMD_S0I3: u32 = 0x0000_7101;
pub const CMD_FAST_ON_OFF: u32 = 0x0000_5101;
/// Synchronized multi-subsystem state change.
pub const CMD_INTERACTIVE: u32 = 0x0000_2201;
/// Interactive command that raises a completion interrupt.
pub const CMD_INTERACTIVE_IOC: u32 = 0x0001_2201;
/// D3-cold modifier, OR-ed into a command value.
pub const CMD_D3_COLD: u32 = 1 << 21;

/// Default wake-enable configuration (everything may wake us).
pub const WKC_DEFAULT: [u32; 2] = [0xFFFF_FFFF, 0xFFFF_FFFF];

/// Highest representable LSS index.
pub const MAX_LSS: u8 = 63;

/// (word, shift) of an LSS's 2-bit field.
pub fn lss_position(lss: u8) -> (usize, u32) {
    ((lss / 16) as usize, (lss % 16) as u32 * 2)
}

/// 2-bit mask of an LSS within its word.
pub fn lss_mask(lss: u8) -> (usize, u32) {
    let (word, shift) = lss_position(lss);
    (word, 0b11 << shift)
}

/// Bank of an LSS (bank 1 covers words 0..1, bank 2 words 2..3).
pub fn lss_bank(lss: u8) -> u8 {
    if lss < 32 {
        1
    } else {
        2
    }
}

/// The four subsystem-state words, 2 bits per LSS: word `i` holds LSS
/// `i*16 + pos` at bit offset `pos*2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SsRegisters {
    words: [u32; 4],
}

impl SsRegisters {
    pub const fn new() -> Self {
        Self { words: [0; 4] }
    }

    pub const fn from_words(words: [u32; 4]) -> Self {
        Self { words }
    }

    pub fn words(&self) -> [u32; 4] {
        self.words
    }

    pub fn word(&self, i: usize) -> u32 {
        self.words[i]
    }

    pub fn set_word(&mut self, i: usize, value: u32) {
        self.words[i] = value;
    }

    /// Level of one LSS; `None` past the last valid index.
    pub fn get(&self, lss: u8) -> Option<PowerLevel> {
        if lss > MAX_LSS {
            return None;
        }
        let (word, shift) = lss_position(lss);
        Some(PowerLevel::from_bits(self.words[word] >> shift))
    }

    /// Set one LSS's level. Returns false past the last valid index.
    pub fn set(&mut self, lss: u8, level: PowerLevel) -> bool {
        if lss > MAX_LSS {
            return false;
        }
        let (word, mask) = lss_mask(lss);
        let shift = mask.trailing_zeros();
        self.words[word] = (self.words[word] & !mask) | (level.bits() << shift);
        true
    }

    /// Overlay: bits selected by `keep_mask` come from `other`, the rest
    /// from `self`. Used to carry ignored LSS bits through unchanged.
    pub fn overlay(&self, other: &SsRegisters, keep_mask: &[u32; 4]) -> SsRegisters {
        let mut out = *self;
        for i in 0..4 {
            out.words[i] = (self.words[i] & !keep_mask[i]) | (other.words[i] & keep_mask[i]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmu::PowerLevel;

    #[test]
    fn lss_maps_to_one_word_and_offset() {
        assert_eq!(lss_position(0), (0, 0));
        assert_eq!(lss_position(5), (0, 10));
        assert_eq!(lss_position(16), (1, 0));
        assert_eq!(lss_position(63), (3, 30));
        assert_eq!(lss_bank(0), 1);
        assert_eq!(lss_bank(31), 1);
        assert_eq!(lss_bank(32), 2);
    }

    #[test]
    fn set_lss5_d0i3_gives_word0_0c00() {
        // LSS 5 sits at word 0, bit offset 10.
        let mut regs = SsRegisters::new();
        assert!(regs.set(5, PowerLevel::D0i3));
        assert_eq!(regs.word(0), 0x0000_0C00);
        assert_eq!(regs.get(5), Some(PowerLevel::D0i3));
    }

    #[test]
    fn set_preserves_neighbors() {
        let mut regs = SsRegisters::new();
        regs.set(4, PowerLevel::D0i3);
        regs.set(5, PowerLevel::D0i1);
        regs.set(6, PowerLevel::D0i2);
        assert_eq!(regs.get(4), Some(PowerLevel::D0i3));
        assert_eq!(regs.get(5), Some(PowerLevel::D0i1));
        assert_eq!(regs.get(6), Some(PowerLevel::D0i2));
        regs.set(5, PowerLevel::D0i0);
        assert_eq!(regs.get(4), Some(PowerLevel::D0i3));
        assert_eq!(regs.get(6), Some(PowerLevel::D0i2));
    }

    #[test]
    fn out_of_range_is_rejected() {
        let mut regs = SsRegisters::new();
        assert!(!regs.set(64, PowerLevel::D0i3));
        assert_eq!(regs.get(64), None);
        assert_eq!(regs, SsRegisters::new());
    }

    #[test]
    fn overlay_keeps_masked_bits() {
        let mut want = SsRegisters::new();
        want.set(0, PowerLevel::D0i3);
        want.set(5, PowerLevel::D0i3);
        let mut hw = SsRegisters::new();
        hw.set(5, PowerLevel::D0i1);

        // LSS 5 is protected: its bits must come from `hw`.
        let (_, mask5) = lss_mask(5);
        let keep = [mask5, 0, 0, 0];
        let out = want.overlay(&hw, &keep);
        assert_eq!(out.get(0), Some(PowerLevel::D0i3));
        assert_eq!(out.get(5), Some(PowerLevel::D0i1));
    }
}
