//! North-complex island sequencer.
//!
//! Graphics, video, and ISP islands live in the north complex and are
//! toggled directly over the message bus, not through SCU commands. Each
//! island owns a 2-bit state field in a status word; a mutation writes the
//! folded word and polls until the hardware converges. Island mutations
//! serialize on their own lock and are deliberately unordered relative to
//! south-complex commands.

use super::hw::PmuBus;
use super::{PmuEngine, PmuError, PowerLevel};

/// Islands addressable in one status word.
pub const NC_ISLAND_COUNT: u8 = 16;

/// How an island transition folds into the status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NcTransition {
    /// Force the island to its D0i3 encoding.
    Down,
    /// Clear the island back to D0.
    Up,
    /// Pulse the island's reset encoding.
    SoftReset,
}

/// Which register file a mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NcRegister {
    Apm,
    OspmPolicy,
}

const NC_DOWN_BITS: u32 = 0b11;
const NC_UP_BITS: u32 = 0b00;
const NC_RESET_BITS: u32 = 0b01;

/// Convergence ceiling: iterations at `NC_CONVERGE_DELAY_US`, ~50 s. An
/// island that has not settled by then is hard-desynced.
pub const NC_CONVERGE_ITERS: u32 = 5_000_000;
pub const NC_CONVERGE_DELAY_US: u64 = 10;

/// One recorded island mutation, for postmortem use.
#[derive(Debug, Clone, Copy)]
pub struct NcMutation {
    pub timestamp_ms: u64,
    pub mask: u32,
    pub reg: NcRegister,
    pub transition: NcTransition,
    /// False when the fold produced no change and nothing was written.
    pub changed: bool,
}

pub const NC_RING_CAPACITY: usize = 32;

/// Fixed ring of recent island mutations.
pub struct NcState {
    entries: [NcMutation; NC_RING_CAPACITY],
    head: usize,
    count: usize,
}

impl NcState {
    pub fn new() -> Self {
        const EMPTY: NcMutation = NcMutation {
            timestamp_ms: 0,
            mask: 0,
            reg: NcRegister::Apm,
            transition: NcTransition::Up,
            changed: false,
        };
        Self {
            entries: [EMPTY; NC_RING_CAPACITY],
            head: 0,
            count: 0,
        }
    }

    fn record(&mut self, entry: NcMutation) {
        self.entries[self.head] = entry;
        self.head = (self.head + 1) % NC_RING_CAPACITY;
        if self.count < NC_RING_CAPACITY {
            self.count += 1;
        }
    }

    fn for_each<F: FnMut(&NcMutation)>(&self, mut f: F) {
        let start = if self.count == NC_RING_CAPACITY {
            self.head
        } else {
            0
        };
        for i in 0..self.count {
            f(&self.entries[(start + i) % NC_RING_CAPACITY]);
        }
    }
}

fn transition_bits(t: NcTransition) -> u32 {
    match t {
        NcTransition::Down => NC_DOWN_BITS,
        NcTransition::Up => NC_UP_BITS,
        NcTransition::SoftReset => NC_RESET_BITS,
    }
}

impl<B: PmuBus> PmuEngine<B> {
    /// Toggle one or more islands. `mask` selects islands by single-bit
    /// index (bit `i` = island `i`).
    pub fn set_island_power(
        &self,
        mask: u32,
        transition: NcTransition,
        reg: NcRegister,
    ) -> Result<(), PmuError> {
        if self.dead() {
            return Err(PmuError::Fatal);
        }
        let reg_off = self.variant.nc_reg(reg).ok_or(PmuError::Unsupported)?;
        if mask == 0 || mask >> NC_ISLAND_COUNT != 0 {
            return Err(PmuError::NotFound);
        }

        let mut nc = self.nc.lock();
        let port = self.variant.nc_port();
        let current = self.bus.bus_read(port, reg_off);

        let mut target = current;
        let mut submask = 0u32;
        for island in 0..NC_ISLAND_COUNT {
            if mask & (1 << island) == 0 {
                continue;
            }
            let field = 0b11u32 << (island * 2);
            submask |= field;
            target = (target & !field) | (transition_bits(transition) << (island * 2));
        }

        let changed = target != current;
        nc.record(NcMutation {
            timestamp_ms: self.bus.now_ms(),
            mask,
            reg,
            transition,
            changed,
        });
        if !changed {
            return Ok(());
        }

        self.bus.bus_write(port, reg_off, target);

        // Poll until converged. Down/SoftReset settle on the exact target
        // bits; Up settles as soon as every selected field leaves D0i3
        // (the hardware may report any intermediate on-state).
        let want = target & submask;
        let mut iters = 0u32;
        loop {
            let status = self.bus.bus_read(port, reg_off);
            let converged = match transition {
                NcTransition::Down | NcTransition::SoftReset => status & submask == want,
                NcTransition::Up => (0..NC_ISLAND_COUNT)
                    .filter(|i| mask & (1 << i) != 0)
                    .all(|i| (status >> (i * 2)) & 0b11 != NC_DOWN_BITS),
            };
            if converged {
                break;
            }
            iters += 1;
            if iters >= self.config.nc_converge_iters {
                drop(nc);
                self.fatal("north-complex island never converged");
                return Err(PmuError::Fatal);
            }
            self.bus.delay_us(self.config.nc_converge_delay_us);
        }

        crate::log_debug!(
            "pmu: nc {:?} {:?} mask {:#x} converged after {} polls",
            transition,
            reg,
            mask,
            iters
        );
        Ok(())
    }

    /// Read-only 2-bit state of one island.
    pub fn get_island_power(&self, island: u8, reg: NcRegister) -> Result<PowerLevel, PmuError> {
        let reg_off = self.variant.nc_reg(reg).ok_or(PmuError::Unsupported)?;
        if island >= NC_ISLAND_COUNT {
            return Err(PmuError::NotFound);
        }
        let _nc = self.nc.lock();
        let status = self.bus.bus_read(self.variant.nc_port(), reg_off);
        Ok(PowerLevel::from_bits(status >> (island * 2)))
    }

    /// Visit the recorded island mutations, oldest first.
    pub fn island_mutations<F: FnMut(&NcMutation)>(&self, f: F) {
        self.nc.lock().for_each(f);
    }
}
