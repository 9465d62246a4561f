//! Sleep-state residency and error accounting.
//!
//! Created at attach, torn down with the engine. Mutated on every transition
//! under the stats lock; the interrupt side uses `try_lock` and drops a
//! sample on contention rather than spin in irq context.

use super::SleepState;

/// Number of tracked sleep states (Active, S0i1, LPMP3, S0i3, S3).
pub const SLEEP_STATE_COUNT: usize = 5;

/// Per-state residency snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SleepStats {
    pub count: u64,
    pub total_ms: u64,
    pub first_entry_ms: Option<u64>,
    pub last_entry_ms: u64,
}

/// Recorded-but-non-fatal hardware notifications, per sleep state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorCounters {
    pub cmd_error: u32,
    pub ss_power_error: u32,
    pub s0ix_miss: u32,
    pub no_ack_c6: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwErrorKind {
    CommandError,
    SubsystemPowerError,
    S0ixMiss,
    NoAckC6,
}

pub struct Accounting {
    states: [SleepStats; SLEEP_STATE_COUNT],
    errors: [ErrorCounters; SLEEP_STATE_COUNT],
    demotions: [u32; SLEEP_STATE_COUNT],
    /// Per-LSS transition counters for the diagnostics reporter.
    lss_transitions: [u32; 64],
    lss_last_change_ms: [u64; 64],
    /// The sleep state currently being timed, with its entry timestamp.
    current: Option<(SleepState, u64)>,
    last_wake_source: Option<u32>,
}

impl Accounting {
    pub fn new() -> Self {
        Self {
            states: [SleepStats::default(); SLEEP_STATE_COUNT],
            errors: [ErrorCounters::default(); SLEEP_STATE_COUNT],
            demotions: [0; SLEEP_STATE_COUNT],
            lss_transitions: [0; 64],
            lss_last_change_ms: [0; 64],
            current: None,
            last_wake_source: None,
        }
    }

    /// Start the stopwatch for a sleep-state entry.
    pub fn note_entry(&mut self, state: SleepState, now_ms: u64) {
        let s = &mut self.states[state.index()];
        s.count += 1;
        s.last_entry_ms = now_ms;
        if s.first_entry_ms.is_none() {
            s.first_entry_ms = Some(now_ms);
        }
        self.current = Some((state, now_ms));
    }

    /// Stop the stopwatch on wake, accumulating residency, and record the
    /// wake source.
    pub fn note_wake(&mut self, source: u32, now_ms: u64) {
        if let Some((state, entry_ms)) = self.current.take() {
            self.states[state.index()].total_ms += now_ms.saturating_sub(entry_ms);
        }
        self.last_wake_source = Some(source);
    }

    /// The firmware entered a shallower state than requested.
    pub fn note_demotion(&mut self, requested: SleepState) {
        self.demotions[requested.index()] += 1;
    }

    pub fn note_lss_transition(&mut self, lss: u8, now_ms: u64) {
        if lss < 64 {
            self.lss_transitions[lss as usize] += 1;
            self.lss_last_change_ms[lss as usize] = now_ms;
        }
    }

    pub fn bump_error(&mut self, kind: HwErrorKind) {
        // Attribute to the state being timed, or to Active.
        let idx = self
            .current
            .map(|(s, _)| s.index())
            .unwrap_or(SleepState::Active.index());
        let e = &mut self.errors[idx];
        match kind {
            HwErrorKind::CommandError => e.cmd_error += 1,
            HwErrorKind::SubsystemPowerError => e.ss_power_error += 1,
            HwErrorKind::S0ixMiss => e.s0ix_miss += 1,
            HwErrorKind::NoAckC6 => e.no_ack_c6 += 1,
        }
    }

    pub fn sleep_stats(&self, state: SleepState) -> SleepStats {
        self.states[state.index()]
    }

    pub fn error_counters(&self, state: SleepState) -> ErrorCounters {
        self.errors[state.index()]
    }

    pub fn demotions(&self, state: SleepState) -> u32 {
        self.demotions[state.index()]
    }

    pub fn lss_transitions(&self, lss: u8) -> u32 {
        if lss < 64 {
            self.lss_transitions[lss as usize]
        } else {
            0
        }
    }

    pub fn last_wake_source(&self) -> Option<u32> {
        self.last_wake_source
    }

    pub fn timing(&self) -> Option<(SleepState, u64)> {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn residency_accumulates_across_entries() {
        let mut acct = Accounting::new();
        acct.note_entry(SleepState::S0i3, 100);
        acct.note_wake(0x4, 250);
        acct.note_entry(SleepState::S0i3, 400);
        acct.note_wake(0x8, 500);

        let s = acct.sleep_stats(SleepState::S0i3);
        assert_eq!(s.count, 2);
        assert_eq!(s.total_ms, 250);
        assert_eq!(s.first_entry_ms, Some(100));
        assert_eq!(s.last_entry_ms, 400);
        assert_eq!(acct.last_wake_source(), Some(0x8));
    }

    #[test]
    fn wake_without_entry_only_records_source() {
        let mut acct = Accounting::new();
        acct.note_wake(0x2, 50);
        assert_eq!(acct.sleep_stats(SleepState::S0i1).total_ms, 0);
        assert_eq!(acct.last_wake_source(), Some(0x2));
    }

    #[test]
    fn errors_attribute_to_active_state() {
        let mut acct = Accounting::new();
        acct.bump_error(HwErrorKind::S0ixMiss);
        assert_eq!(acct.error_counters(SleepState::Active).s0ix_miss, 1);

        acct.note_entry(SleepState::S0i1, 10);
        acct.bump_error(HwErrorKind::NoAckC6);
        acct.bump_error(HwErrorKind::SubsystemPowerError);
        let e = acct.error_counters(SleepState::S0i1);
        assert_eq!(e.no_ack_c6, 1);
        assert_eq!(e.ss_power_error, 1);
    }

    #[test]
    fn demotions_count_per_requested_state() {
        let mut acct = Accounting::new();
        acct.note_demotion(SleepState::S0i3);
        acct.note_demotion(SleepState::S0i3);
        assert_eq!(acct.demotions(SleepState::S0i3), 2);
        assert_eq!(acct.demotions(SleepState::S0i1), 0);
    }
}
