//! S0ix entry gate and sleep sequencing.
//!
//! Idle sleep is only attempted when nothing is mid-flight: no suspend or
//! shutdown in progress, display and camera both confirmed down, firmware
//! not busy, coordination lock free. Entry itself is variant specific; the
//! variant is picked once at attach from CPU identification and dispatched
//! by `match`.

use core::sync::atomic::Ordering;

use super::hw::{sleep_command, PmuBus};
use super::regs::*;
use super::{PmuEngine, PmuError, SleepState};

/// SoC generation. Register layouts and the idle-entry sequence differ
/// between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocVariant {
    Penwell,
    Cloverview,
}

impl SocVariant {
    /// Identify the SoC from the CPUID family/model bytes.
    pub fn from_cpu_model(model: u8) -> Option<Self> {
        match model {
            0x27 => Some(SocVariant::Penwell),
            0x35 => Some(SocVariant::Cloverview),
            _ => None,
        }
    }

    /// Message-bus port of the north-complex power unit.
    pub fn nc_port(self) -> u8 {
        0x04
    }

    /// Message-bus register of an island register file; `None` when the
    /// variant does not expose it.
    pub fn nc_reg(self, reg: super::nc::NcRegister) -> Option<u32> {
        use super::nc::NcRegister;
        match (self, reg) {
            (_, NcRegister::Apm) => Some(0x3C),
            (SocVariant::Cloverview, NcRegister::OspmPolicy) => Some(0x30),
            (SocVariant::Penwell, NcRegister::OspmPolicy) => None,
        }
    }
}

/// Identify the running SoC. Returns `None` off-target so callers can fall
/// back to an explicit variant.
#[cfg(target_arch = "x86_64")]
pub fn detect_variant() -> Option<SocVariant> {
    let eax_out: u32;
    let ebx_out: u32;
    let ecx_out: u32;
    let edx_out: u32;
    unsafe {
        core::arch::asm!(
            "push rbx",
            "cpuid",
            "mov {ebx_tmp:e}, ebx",
            "pop rbx",
            ebx_tmp = out(reg) ebx_out,
            inout("eax") 1u32 => eax_out,
            out("ecx") ecx_out,
            out("edx") edx_out,
            options(preserves_flags)
        );
    }
    let _ = (ebx_out, ecx_out, edx_out);
    let model = ((eax_out >> 4) & 0xF) as u8 | (((eax_out >> 16) & 0xF) as u8) << 4;
    SocVariant::from_cpu_model(model)
}

/// Wake-enable words while a given sleep state is armed. Protocol values.
fn wake_enable_for(state: SleepState) -> [u32; 2] {
    match state {
        SleepState::Active => WKC_DEFAULT,
        SleepState::S0i1 => [0x0000_FFFF, 0x0000_0000],
        SleepState::Lpmp3 => [0x0000_00FF, 0x0000_0000],
        SleepState::S0i3 => [0x0000_000F, 0x0000_0000],
        SleepState::S3 => [0x0000_0003, 0x0000_0000],
    }
}

impl<B: PmuBus> PmuEngine<B> {
    /// True when runtime idle sleep is safe to attempt.
    pub fn could_enter_idle_sleep(&self) -> bool {
        let possible = self.initialized.load(Ordering::SeqCst)
            && !self.dead()
            && !self.suspend_in_progress.load(Ordering::SeqCst)
            && !self.shutdown_in_progress.load(Ordering::SeqCst)
            && self.display_off.load(Ordering::SeqCst)
            && self.camera_off.load(Ordering::SeqCst);
        if let Some(mut south) = self.south.try_lock() {
            south.last_s0ix_possible = possible as u32;
        }
        possible
    }

    /// Attempt to enter an idle sleep state.
    ///
    /// Non-blocking on contention: returns `Ok(None)` when the coordination
    /// lock is held, the firmware is busy, or a scheduling event arrives
    /// between arming the wake configuration and sleeping. On success the
    /// CPU has already slept and resumed by the time this returns.
    pub fn enter_idle_sleep(&self, target: SleepState) -> Result<Option<SleepState>, PmuError> {
        if self.dead() {
            return Err(PmuError::Fatal);
        }
        let cmd = sleep_command(target).ok_or(PmuError::Unsupported)?;

        // The guard is held until resume; on the blocking variant this is
        // what serializes the whole sleep against interactive commands.
        let _south = match self.south.try_lock() {
            Some(guard) => guard,
            None => return Ok(None),
        };

        if self.bus.read_reg(PM_STS) & STS_BUSY != 0 {
            return Ok(None);
        }

        let wkc = wake_enable_for(target);
        for (i, reg) in PM_WKC.iter().enumerate() {
            self.bus.write_reg(*reg, wkc[i]);
        }

        if self.bus.sched_event_pending() {
            self.restore_default_wake();
            return Ok(None);
        }

        self.s0ix_complete.store(false, Ordering::SeqCst);
        self.cmd_pending.store(true, Ordering::SeqCst);
        let ics = self.bus.read_reg(PM_ICS);
        self.bus.write_reg(PM_ICS, (ics & !ICS_PENDING) | ICS_ENABLE);
        self.bus.write_reg(PM_CMD, cmd);

        if let Some(mut stats) = self.stats.try_lock() {
            stats.note_entry(target, self.bus.now_ms());
        } else {
            self.stats_dropped.fetch_add(1, Ordering::Relaxed);
        }

        match self.variant {
            SocVariant::Penwell => {
                self.bus.cpu_idle();
            }
            SocVariant::Cloverview => {
                // Cloverview wants the C-state latency hint programmed
                // before the sleep instruction.
                self.bus.write_reg(PM_CSTATE, cstate_hint(target));
                self.bus.cpu_idle();
            }
        }

        // Resume path.
        self.restore_default_wake();
        self.cmd_pending.store(false, Ordering::SeqCst);
        if !self.s0ix_complete.load(Ordering::SeqCst) {
            // Woken without a completion notification: the firmware demoted
            // the entry.
            if let Some(mut stats) = self.stats.try_lock() {
                stats.note_demotion(target);
            } else {
                self.stats_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(Some(target))
    }

    pub(crate) fn restore_default_wake(&self) {
        for (i, reg) in PM_WKC.iter().enumerate() {
            self.bus.write_reg(*reg, WKC_DEFAULT[i]);
        }
    }
}

/// C-state latency hint per target state. Protocol values.
fn cstate_hint(state: SleepState) -> u32 {
    match state {
        SleepState::Active => 0,
        SleepState::S0i1 => 0x52,
        SleepState::Lpmp3 => 0x60,
        SleepState::S0i3 => 0x64,
        SleepState::S3 => 0x64,
    }
}
