//! Interactive command protocol.
//!
//! One command synchronizes all 64 subsystem states with the firmware in a
//! single transaction: write the four config words, write the interactive
//! command value, poll the busy flag until the SCU confirms. Both waits are
//! bounded; exhausting the completion retry ceiling means the hardware and
//! software views of the power rails have diverged, which the engine treats
//! as unrecoverable.

use core::sync::atomic::Ordering;

use super::hw::PmuBus;
use super::regs::*;
use super::state::SouthState;
use super::{CommandOutcome, PmuEngine, PmuError, PowerLevel};
use crate::pmu::device::DeviceId;

/// What to do when a bounded poll runs out of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnExhausted {
    FatalAbort,
    ReturnError,
}

/// A bounded poll: `max_attempts` probes separated by `delay_us` sleeps.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_us: u64,
    pub on_exhausted: OnExhausted,
}

impl RetryPolicy {
    /// Poll `done` until it reports true or the attempts run out. Sleeps go
    /// through the bus so tests drive a virtual clock.
    pub fn poll<B: PmuBus, F: FnMut() -> bool>(&self, bus: &B, mut done: F) -> bool {
        for _ in 0..self.max_attempts {
            if done() {
                return true;
            }
            bus.delay_us(self.delay_us);
        }
        false
    }
}

/// Busy poll before issuing: 50_000 x 10 us, ~500 ms.
pub const WAIT_NOT_BUSY: RetryPolicy = RetryPolicy {
    max_attempts: 50_000,
    delay_us: 10,
    on_exhausted: OnExhausted::ReturnError,
};

/// One completion poll window, ~500 ms.
pub const WAIT_COMPLETE: RetryPolicy = RetryPolicy {
    max_attempts: 50_000,
    delay_us: 10,
    on_exhausted: OnExhausted::FatalAbort,
};

/// Completion windows before the desync is declared unrecoverable.
pub const MAX_COMPLETE_CYCLES: u32 = 60;

impl<B: PmuBus> PmuEngine<B> {
    /// Request a power level for one device.
    ///
    /// The caller may block: the coordination lock is held across the
    /// firmware round trip. Returns [`CommandOutcome::NoOp`] without
    /// touching the hardware when the folded target already matches the
    /// confirmed state.
    pub fn set_power_level(
        &self,
        id: DeviceId,
        level: PowerLevel,
    ) -> Result<CommandOutcome, PmuError> {
        if self.dead() {
            return Err(PmuError::Fatal);
        }
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(PmuError::NotInitialized);
        }

        let mut south = self.south.lock();
        let (lss, effective) = self.devices.lock().set_request(id, level)?;
        south.requested.set(lss, effective);

        let target = south.target_snapshot();
        if target == south.confirmed {
            return Ok(CommandOutcome::NoOp);
        }

        self.issue_interactive(&mut south, target)?;

        if let Some(mut stats) = self.stats.try_lock() {
            stats.note_lss_transition(lss, self.bus.now_ms());
        } else {
            self.stats_dropped.fetch_add(1, Ordering::Relaxed);
        }
        Ok(CommandOutcome::Issued)
    }

    /// Deepest level a device may request right now: D0i0 for a protected
    /// LSS, D0i3 otherwise.
    pub fn choose_deepest_allowed_level(&self, id: DeviceId) -> Result<PowerLevel, PmuError> {
        let south = self.south.lock();
        let resolved = self.devices.lock().resolve(id)?;
        if south.is_ignored(resolved.lss) {
            Ok(PowerLevel::D0i0)
        } else {
            Ok(PowerLevel::D0i3)
        }
    }

    /// Administrative override: force one LSS (or all of them) to a level.
    /// The ignore list still wins.
    pub fn force_power_level(
        &self,
        lss: Option<u8>,
        level: PowerLevel,
    ) -> Result<CommandOutcome, PmuError> {
        if self.dead() {
            return Err(PmuError::Fatal);
        }
        let mut south = self.south.lock();
        match lss {
            Some(lss) if lss > MAX_LSS => return Err(PmuError::NotFound),
            Some(lss) => {
                south.requested.set(lss, level);
            }
            None => {
                for lss in 0..=MAX_LSS {
                    south.requested.set(lss, level);
                }
            }
        }
        let target = south.target_snapshot();
        if target == south.confirmed {
            return Ok(CommandOutcome::NoOp);
        }
        self.issue_interactive(&mut south, target)?;
        Ok(CommandOutcome::Issued)
    }

    /// Program a target snapshot and wait for the firmware to accept it.
    /// Must be called with the coordination lock held.
    fn issue_interactive(
        &self,
        south: &mut SouthState,
        target: SsRegisters,
    ) -> Result<(), PmuError> {
        let busy_clear = || self.bus.read_reg(PM_STS) & STS_BUSY == 0;

        // WAIT_NOT_BUSY: a previous command may still be draining.
        if !self.config.busy_wait.poll(&self.bus, busy_clear) {
            crate::log_warn!("pmu: firmware busy, command not issued");
            self.dump_diagnostics();
            return match self.config.busy_wait.on_exhausted {
                OnExhausted::ReturnError => Err(PmuError::Busy),
                OnExhausted::FatalAbort => {
                    self.fatal("firmware busy past the bounded wait");
                    Err(PmuError::Fatal)
                }
            };
        }

        for (i, ssc) in PM_SSC.iter().enumerate() {
            self.bus.write_reg(*ssc, target.word(i));
        }
        self.cmd_pending.store(true, Ordering::SeqCst);
        self.cmds_issued.fetch_add(1, Ordering::Relaxed);
        self.bus.write_reg(PM_CMD, CMD_INTERACTIVE);

        // WAIT_COMPLETE: bounded windows, diagnostic dump per miss, fatal
        // past the ceiling.
        let mut completed = false;
        for _cycle in 0..self.config.complete_cycles {
            if self.config.complete_wait.poll(&self.bus, busy_clear) {
                completed = true;
                break;
            }
            south.wait_failures += 1;
            crate::log_error!(
                "pmu: completion window missed ({} total), target={:08x?}",
                south.wait_failures,
                target.words()
            );
            self.dump_diagnostics();
        }
        if !completed {
            return match self.config.complete_wait.on_exhausted {
                OnExhausted::FatalAbort => {
                    self.fatal("interactive command never completed");
                    Err(PmuError::Fatal)
                }
                OnExhausted::ReturnError => Err(PmuError::RetryExhausted),
            };
        }

        self.cmd_pending.store(false, Ordering::SeqCst);

        // Read back what the hardware confirms and flag any divergence.
        let mut readback = SsRegisters::new();
        for (i, sss) in PM_SSS.iter().enumerate() {
            readback.set_word(i, self.bus.read_reg(*sss));
        }
        if readback != target {
            self.readback_mismatches.fetch_add(1, Ordering::Relaxed);
            crate::log_warn!(
                "pmu: post-command state mismatch: wrote {:08x?}, hw reports {:08x?}",
                target.words(),
                readback.words()
            );
        }

        south.confirmed = target;
        south.wait_failures = 0;
        Ok(())
    }
}
