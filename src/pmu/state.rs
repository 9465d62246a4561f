//! South-complex state mirror.
//!
//! Guarded by the engine's coordination lock. `requested` mirrors what the
//! OS wants, `confirmed` mirrors what the firmware last accepted. The ignore
//! list protects LSS bit-pairs the engine must never force low: a protected
//! LSS's confirmed bits are carried through every target snapshot unchanged.

use super::regs::{lss_mask, SsRegisters, MAX_LSS};

pub struct SouthState {
    /// OS-requested levels, after shared-slot folding.
    pub requested: SsRegisters,
    /// Levels the firmware last accepted.
    pub confirmed: SsRegisters,
    /// Bit-pair mask of protected LSS, per word. Runtime writable.
    pub ignore: [u32; 4],
    /// Consecutive failed WAIT_COMPLETE cycles, for diagnostics. Reset on
    /// any successful command.
    pub wait_failures: u32,
    /// Last s0ix-possible mask reported by the gate, for diagnostics.
    pub last_s0ix_possible: u32,
}

impl SouthState {
    pub fn new() -> Self {
        Self {
            requested: SsRegisters::new(),
            confirmed: SsRegisters::new(),
            ignore: [0; 4],
            wait_failures: 0,
            last_s0ix_possible: 0,
        }
    }

    /// Seed both mirrors from the hardware status words read at attach.
    pub fn seed(&mut self, hw: SsRegisters) {
        self.requested = hw;
        self.confirmed = hw;
    }

    /// The snapshot to program: requested levels, with protected bits taken
    /// from the confirmed mirror instead.
    pub fn target_snapshot(&self) -> SsRegisters {
        self.requested.overlay(&self.confirmed, &self.ignore)
    }

    pub fn is_ignored(&self, lss: u8) -> bool {
        if lss > MAX_LSS {
            return false;
        }
        let (word, mask) = lss_mask(lss);
        self.ignore[word] & mask != 0
    }

    /// Add one LSS to the ignore list.
    pub fn ignore_lss(&mut self, lss: u8) {
        if lss > MAX_LSS {
            return;
        }
        let (word, mask) = lss_mask(lss);
        self.ignore[word] |= mask;
    }

    /// Replace one word of the ignore mask.
    pub fn set_ignore_word(&mut self, word: usize, mask: u32) {
        if word < 4 {
            self.ignore[word] = mask;
        }
    }
}
