//! Subsystem power-state coordination engine.
//!
//! One [`PmuEngine`] instance owns the whole south-complex mirror, the
//! device table, the north-complex sequencer state, and the accounting. It
//! is created at attach time and dropped at detach; there is no global
//! engine state.

pub mod command;
pub mod device;
pub mod hw;
pub mod irq;
pub mod nc;
pub mod regs;
pub mod s0ix;
pub mod state;
pub mod stats;

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use spin::Mutex;

use command::RetryPolicy;
use device::{DeviceDesc, DeviceId, DeviceTable, ResolvedLss};
use hw::PmuBus;
use nc::NcState;
use regs::*;
use state::SouthState;
use stats::Accounting;

pub use device::{DEVICE_CAPACITY, MAX_SHARED};
pub use irq::{IrqEvent, IrqOutcome};
pub use s0ix::SocVariant;

/// Per-subsystem power level, 2-bit encoding. D0i0 is full power, D0i3 the
/// deepest retention state; ordering is by increasing depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PowerLevel {
    D0i0 = 0,
    D0i1 = 1,
    D0i2 = 2,
    D0i3 = 3,
}

impl PowerLevel {
    /// Decode from the low 2 bits of a register field.
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0 => PowerLevel::D0i0,
            1 => PowerLevel::D0i1,
            2 => PowerLevel::D0i2,
            _ => PowerLevel::D0i3,
        }
    }

    pub fn bits(self) -> u32 {
        self as u32
    }
}

/// Platform-wide sleep states gated by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepState {
    Active,
    S0i1,
    Lpmp3,
    S0i3,
    S3,
}

impl SleepState {
    pub fn index(self) -> usize {
        match self {
            SleepState::Active => 0,
            SleepState::S0i1 => 1,
            SleepState::Lpmp3 => 2,
            SleepState::S0i3 => 3,
            SleepState::S3 => 4,
        }
    }
}

/// Engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmuError {
    /// Engine not attached yet.
    NotInitialized,
    /// Unknown device id.
    NotFound,
    /// Device arena is full; fatal configuration error.
    TableFull,
    /// More than 4 devices mapped onto one LSS.
    TooManySharers,
    /// Classification produced an LSS outside bank 1/2.
    BankOverflow,
    /// Firmware stayed busy through the bounded wait.
    Busy,
    /// Bounded retry exhausted.
    RetryExhausted,
    /// Operation not available on this SoC variant.
    Unsupported,
    /// The engine was poisoned by an unrecoverable desync.
    Fatal,
}

/// Outcome of a state-change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// A firmware command was issued and completed.
    Issued,
    /// The target already matched the hardware state; nothing sent.
    NoOp,
}

fn default_fatal_hook(why: &str) {
    panic!("mid_pmu: unrecoverable hardware/firmware desync: {}", why);
}

/// Engine construction parameters. The retry knobs default to the platform
/// values; tests tighten them against the mock bus.
pub struct PmuConfig {
    pub variant: SocVariant,
    /// WAIT_NOT_BUSY poll, ~500 ms.
    pub busy_wait: RetryPolicy,
    /// One WAIT_COMPLETE poll window, ~500 ms.
    pub complete_wait: RetryPolicy,
    /// WAIT_COMPLETE windows before fatal escalation.
    pub complete_cycles: u32,
    /// Island convergence ceiling, iterations of `nc_converge_delay_us`.
    pub nc_converge_iters: u32,
    pub nc_converge_delay_us: u64,
    /// Called from interrupt context after any handled event.
    pub wakeup_hook: Option<fn(IrqEvent)>,
    /// Called once when the engine hits an unrecoverable desync. The
    /// default panics.
    pub fatal_hook: Option<fn(&str)>,
}

impl PmuConfig {
    pub fn new(variant: SocVariant) -> Self {
        Self {
            variant,
            busy_wait: command::WAIT_NOT_BUSY,
            complete_wait: command::WAIT_COMPLETE,
            complete_cycles: command::MAX_COMPLETE_CYCLES,
            nc_converge_iters: nc::NC_CONVERGE_ITERS,
            nc_converge_delay_us: nc::NC_CONVERGE_DELAY_US,
            wakeup_hook: None,
            fatal_hook: None,
        }
    }
}

/// The engine context. All shared state lives behind this object's locks:
/// `south` is the coordination lock serializing every interactive command
/// and hardware-state read; `nc` orders island mutations independently.
pub struct PmuEngine<B: PmuBus> {
    bus: B,
    variant: SocVariant,
    config: PmuConfig,

    south: Mutex<SouthState>,
    devices: Mutex<DeviceTable>,
    nc: Mutex<NcState>,
    stats: Mutex<Accounting>,

    initialized: AtomicBool,
    dead: AtomicBool,
    suspend_in_progress: AtomicBool,
    shutdown_in_progress: AtomicBool,
    display_off: AtomicBool,
    camera_off: AtomicBool,
    /// Set by the completion interrupt; the blocking idle path spins on it.
    s0ix_complete: AtomicBool,
    /// A completion-notifying command is outstanding.
    cmd_pending: AtomicBool,

    cmds_issued: AtomicU64,
    cmd_errors: AtomicU32,
    readback_mismatches: AtomicU32,
    stats_dropped: AtomicU32,
    wake_seen: AtomicBool,
    last_wake_source: AtomicU32,
}

impl<B: PmuBus> PmuEngine<B> {
    /// Attach the engine: program default wake enables, disable the
    /// completion interrupt, and seed the state mirror from the hardware
    /// status registers.
    pub fn attach(bus: B, config: PmuConfig) -> Self {
        let variant = config.variant;

        for (i, wkc) in PM_WKC.iter().enumerate() {
            bus.write_reg(*wkc, WKC_DEFAULT[i]);
        }
        let ics = bus.read_reg(PM_ICS);
        bus.write_reg(PM_ICS, ics & !(ICS_ENABLE | ICS_PENDING));

        let mut hw = SsRegisters::new();
        for (i, sss) in PM_SSS.iter().enumerate() {
            hw.set_word(i, bus.read_reg(*sss));
        }
        let mut south = SouthState::new();
        south.seed(hw);

        crate::log_info!("pmu: attached, variant {:?}, hw state {:08x?}", variant, hw.words());

        Self {
            bus,
            variant,
            config,
            south: Mutex::new(south),
            devices: Mutex::new(DeviceTable::new()),
            nc: Mutex::new(NcState::new()),
            stats: Mutex::new(Accounting::new()),
            initialized: AtomicBool::new(true),
            dead: AtomicBool::new(false),
            suspend_in_progress: AtomicBool::new(false),
            shutdown_in_progress: AtomicBool::new(false),
            display_off: AtomicBool::new(false),
            camera_off: AtomicBool::new(false),
            s0ix_complete: AtomicBool::new(false),
            cmd_pending: AtomicBool::new(false),
            cmds_issued: AtomicU64::new(0),
            cmd_errors: AtomicU32::new(0),
            readback_mismatches: AtomicU32::new(0),
            stats_dropped: AtomicU32::new(0),
            wake_seen: AtomicBool::new(false),
            last_wake_source: AtomicU32::new(0),
        }
    }

    /// Detach: restore default wake enables and drop the context.
    pub fn detach(self) {
        for (i, wkc) in PM_WKC.iter().enumerate() {
            self.bus.write_reg(*wkc, WKC_DEFAULT[i]);
        }
        let ics = self.bus.read_reg(PM_ICS);
        self.bus.write_reg(PM_ICS, ics & !(ICS_ENABLE | ICS_PENDING));
        self.initialized.store(false, Ordering::SeqCst);
        crate::log_info!("pmu: detached");
    }

    pub fn variant(&self) -> SocVariant {
        self.variant
    }

    pub(crate) fn dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    /// Register a device with the engine. Arena or bank overflow is an
    /// unrecoverable configuration error and poisons the engine.
    pub fn register_device(&self, desc: DeviceDesc) -> Result<DeviceId, PmuError> {
        if self.dead() {
            return Err(PmuError::Fatal);
        }
        match self.devices.lock().register(desc) {
            Ok(id) => Ok(id),
            Err(e @ (PmuError::TableFull | PmuError::BankOverflow)) => {
                self.fatal(match e {
                    PmuError::TableFull => "device arena overflow",
                    _ => "device bank resolution overflow",
                });
                Err(PmuError::Fatal)
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve a device to its (LSS, bank, word, bit) mapping.
    pub fn resolve(&self, id: DeviceId) -> Result<ResolvedLss, PmuError> {
        self.devices.lock().resolve(id)
    }

    /// Replace one word of the runtime ignore mask.
    pub fn set_ignore_mask(&self, word: usize, mask: u32) {
        self.south.lock().set_ignore_word(word, mask);
        crate::log_debug!("pmu: ignore word {} = {:#010x}", word, mask);
    }

    /// Protect one LSS from ever being forced low.
    pub fn ignore_lss(&self, lss: u8) {
        self.south.lock().ignore_lss(lss);
    }

    // Blocker flags maintained by external collaborators.

    pub fn set_suspend_in_progress(&self, v: bool) {
        self.suspend_in_progress.store(v, Ordering::SeqCst);
    }

    pub fn set_shutdown_in_progress(&self, v: bool) {
        self.shutdown_in_progress.store(v, Ordering::SeqCst);
    }

    /// The display driver reports completion of its async power-down (or a
    /// power-up, clearing the flag).
    pub fn note_display_power(&self, powered_down: bool) {
        self.display_off.store(powered_down, Ordering::SeqCst);
    }

    /// Same for the camera/ISP pipeline.
    pub fn note_camera_power(&self, powered_down: bool) {
        self.camera_off.store(powered_down, Ordering::SeqCst);
    }

    // Read-only accounting surface for the diagnostics reporter.

    pub fn commands_issued(&self) -> u64 {
        self.cmds_issued.load(Ordering::Relaxed)
    }

    pub fn command_errors(&self) -> u32 {
        self.cmd_errors.load(Ordering::Relaxed)
    }

    pub fn readback_mismatches(&self) -> u32 {
        self.readback_mismatches.load(Ordering::Relaxed)
    }

    pub fn dropped_stat_samples(&self) -> u32 {
        self.stats_dropped.load(Ordering::Relaxed)
    }

    pub fn last_wake_source(&self) -> Option<u32> {
        if self.wake_seen.load(Ordering::Acquire) {
            Some(self.last_wake_source.load(Ordering::Acquire))
        } else {
            None
        }
    }

    pub fn sleep_stats(&self, state: SleepState) -> stats::SleepStats {
        self.stats.lock().sleep_stats(state)
    }

    pub fn error_counters(&self, state: SleepState) -> stats::ErrorCounters {
        self.stats.lock().error_counters(state)
    }

    pub fn demotions(&self, state: SleepState) -> u32 {
        self.stats.lock().demotions(state)
    }

    pub fn lss_transitions(&self, lss: u8) -> u32 {
        self.stats.lock().lss_transitions(lss)
    }

    /// The sleep state currently being timed and its entry timestamp, or
    /// `None` when the last entry already woke.
    pub fn active_sleep_entry(&self) -> Option<(SleepState, u64)> {
        self.stats.lock().timing()
    }

    /// Dump the complete engine state through the log. Safe in interrupt
    /// context: `try_lock` on the coordination lock, non-blocking log
    /// lines (drops a line rather than spin on a contended logging lock).
    pub(crate) fn dump_diagnostics(&self) {
        let sts = self.bus.read_reg(PM_STS);
        let ics = self.bus.read_reg(PM_ICS);
        crate::try_log_error!(
            "pmu: sts={:#010x} busy={} ics={:#010x} pending={}",
            sts,
            sts & STS_BUSY != 0,
            ics,
            ics & ICS_PENDING != 0
        );
        crate::try_log_error!(
            "pmu: suspend={} shutdown={} display_off={} camera_off={} cmd_pending={}",
            self.suspend_in_progress.load(Ordering::SeqCst),
            self.shutdown_in_progress.load(Ordering::SeqCst),
            self.display_off.load(Ordering::SeqCst),
            self.camera_off.load(Ordering::SeqCst),
            self.cmd_pending.load(Ordering::SeqCst)
        );
        if let Some(south) = self.south.try_lock() {
            crate::try_log_error!(
                "pmu: requested={:08x?} confirmed={:08x?} ignore={:08x?}",
                south.requested.words(),
                south.confirmed.words(),
                south.ignore
            );
            crate::try_log_error!(
                "pmu: wait_failures={} last_s0ix_possible={:#010x}",
                south.wait_failures,
                south.last_s0ix_possible
            );
        } else {
            crate::try_log_error!("pmu: coordination lock held, mirror not dumped");
        }
    }

    /// Unrecoverable hardware/firmware desync: dump everything, poison the
    /// engine, and fire the fatal hook exactly once.
    pub(crate) fn fatal(&self, why: &str) {
        if self.dead.swap(true, Ordering::SeqCst) {
            return;
        }
        crate::log_error!("pmu: FATAL: {}", why);
        self.dump_diagnostics();
        let hook = self.config.fatal_hook.unwrap_or(default_fatal_hook);
        hook(why);
    }
}
