//! # Time keeping across low power periods
//!
//! ## Overview
//!
//! Three clocks are involved:
//! - the machine timer (`mtime`), which drives the RTOS tick and stops in
//!   every mode with [`ModeFeatures::TIMER_OFF`],
//! - the 32 kHz RTC counter, which keeps running in every mode and wraps
//!   at [`RTC_COUNT_MAX`],
//! - the PIT, which runs at 20 MHz and is only used to calibrate the RTC.
//!
//! The calibration ratio is the number of PIT ticks per RTC tick times 100,
//! so an RTC tick count converts to microseconds as `ticks * ratio / 2000`.
//!
//! [`MonotonicClock`] keeps the conversions and the wraparound arithmetic in
//! one place. Before the machine timer stops, a [`ClockSnapshot`] is taken;
//! after wakeup [`MonotonicClock::reconcile`] rebuilds the machine time from
//! the RTC ticks that elapsed in between.
//!
//! [`ModeFeatures::TIMER_OFF`]: crate::mode::ModeFeatures::TIMER_OFF

/// The RTC counter wraps to zero after this value.
pub const RTC_COUNT_MAX: u32 = 0xA8BF_FFFF;

/// RTC ticks times ratio per microsecond.
const RTC_RATIO_SCALE: u64 = 100 * 20;

/// Longest idle span, in machine timer ticks, the engine ever programs.
///
/// Just under 23 hours at the default timer rate; keeps every derived RTC
/// alarm below one counter period.
pub const MAX_IDLE_MTIME: u64 = ((1_000_000 * 60 * 60 * 23) - 10_000) * 10;

/// Elapsed RTC ticks from `from` to `to`, across at most one wrap.
pub const fn rtc_elapsed(from: u32, to: u32) -> u32 {
    if to >= from {
        to - from
    } else {
        (RTC_COUNT_MAX - from) + to
    }
}

/// The RTC count `ticks` after `now`, wrapping past [`RTC_COUNT_MAX`].
pub const fn rtc_advance(now: u32, ticks: u32) -> u32 {
    if ticks > RTC_COUNT_MAX - now {
        ticks - (RTC_COUNT_MAX - now)
    } else {
        now + ticks
    }
}

/// Converts RTC ticks to microseconds.
pub const fn rtc_to_us(ticks: u32, ratio: u32) -> u64 {
    ticks as u64 * ratio as u64 / RTC_RATIO_SCALE
}

/// Converts microseconds to RTC ticks, saturating at `u32::MAX`.
///
/// A zero ratio (never calibrated) saturates as well.
pub const fn us_to_rtc(us: u64, ratio: u32) -> u32 {
    if ratio == 0 {
        return u32::MAX;
    }
    let ticks = us.saturating_mul(RTC_RATIO_SCALE) / ratio as u64;
    if ticks > u32::MAX as u64 {
        u32::MAX
    } else {
        ticks as u32
    }
}

/// Machine and RTC time captured right before the machine timer stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockSnapshot {
    /// Machine time at entry.
    pub mtime: u64,
    /// The compare deadline that was pending, restored verbatim.
    pub mtimecmp: u64,
    /// RTC count at entry.
    pub rtc: u32,
}

impl ClockSnapshot {
    /// Prefers the base values left by the watcher firmware.
    ///
    /// The watcher may have woken up and slept again on its own; in that case
    /// it records a fresher `(rtc, mtime)` pair. Zero means "not written".
    pub fn with_retained(self, rtc: u32, mtime: u64) -> Self {
        Self {
            mtime: if mtime != 0 { mtime } else { self.mtime },
            mtimecmp: self.mtimecmp,
            rtc: if rtc != 0 { rtc } else { self.rtc },
        }
    }
}

/// Machine timer conversions and time reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MonotonicClock {
    ticks_per_us: u32,
}

impl MonotonicClock {
    /// Creates a clock for a machine timer running at `ticks_per_us`.
    ///
    /// A rate of zero is taken as one tick per microsecond.
    pub const fn new(ticks_per_us: u32) -> Self {
        let ticks_per_us = if ticks_per_us == 0 { 1 } else { ticks_per_us };
        Self { ticks_per_us }
    }

    /// Machine timer ticks per microsecond.
    pub const fn ticks_per_us(&self) -> u32 {
        self.ticks_per_us
    }

    #[allow(missing_docs)]
    pub const fn us_to_mtime(&self, us: u64) -> u64 {
        us.saturating_mul(self.ticks_per_us as u64)
    }

    #[allow(missing_docs)]
    pub const fn mtime_to_us(&self, mtime: u64) -> u64 {
        mtime / self.ticks_per_us as u64
    }

    /// Captures the entry state.
    pub const fn snapshot(&self, mtime: u64, mtimecmp: u64, rtc: u32) -> ClockSnapshot {
        ClockSnapshot {
            mtime,
            mtimecmp,
            rtc,
        }
    }

    /// Machine time that elapsed while the RTC advanced from `from` to `to`.
    pub const fn elapsed(&self, from: u32, to: u32, ratio: u32) -> u64 {
        self.us_to_mtime(rtc_to_us(rtc_elapsed(from, to), ratio))
    }

    /// Rebuilds the machine time after a period with the timer stopped.
    pub const fn reconcile(&self, snapshot: &ClockSnapshot, rtc_now: u32, ratio: u32) -> u64 {
        snapshot.mtime + self.elapsed(snapshot.rtc, rtc_now, ratio)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new(crate::config::MTIME_TICKS_PER_US)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 20 PIT ticks per RTC tick: one RTC tick is exactly one microsecond
    const RATIO_1US: u32 = 2000;

    #[test]
    fn elapsed_without_wrap() {
        assert_eq!(rtc_elapsed(100, 350), 250);
        assert_eq!(rtc_elapsed(7, 7), 0);
    }

    #[test]
    fn elapsed_across_wrap() {
        assert_eq!(rtc_elapsed(RTC_COUNT_MAX - 10, 5), 15);
        assert_eq!(rtc_elapsed(RTC_COUNT_MAX, 0), 0);
    }

    #[test]
    fn alarm_wraps_past_counter_max() {
        assert_eq!(rtc_advance(1000, 500), 1500);
        assert_eq!(rtc_advance(RTC_COUNT_MAX - 100, 100), RTC_COUNT_MAX);
        assert_eq!(rtc_advance(RTC_COUNT_MAX - 100, 150), 50);
        // an alarm is always reachable by the elapsed computation
        let now = RTC_COUNT_MAX - 3;
        assert_eq!(rtc_elapsed(now, rtc_advance(now, 40)), 40);
    }

    #[test]
    fn rtc_conversions() {
        // 32768 Hz RTC against a 20 MHz PIT
        let ratio = 61_035;
        assert_eq!(rtc_to_us(32_768, ratio), 999_997);
        assert_eq!(us_to_rtc(1_000_000, ratio), 32_768);
        assert_eq!(us_to_rtc(10, 0), u32::MAX);
        assert_eq!(us_to_rtc(u64::MAX, 1), u32::MAX);
    }

    #[test]
    fn reconcile_without_wrap() {
        let clock = MonotonicClock::new(10);
        let snapshot = clock.snapshot(5_000_000, 6_000_000, 40_000);

        let mtime = clock.reconcile(&snapshot, 41_500, RATIO_1US);
        assert_eq!(mtime, 5_000_000 + 1500 * 10);
    }

    #[test]
    fn reconcile_with_wrap() {
        let clock = MonotonicClock::new(10);
        let snapshot = clock.snapshot(123_456_789, 0, RTC_COUNT_MAX - 200);

        let mtime = clock.reconcile(&snapshot, 300, RATIO_1US);
        assert_eq!(mtime, 123_456_789 + 500 * 10);
    }

    #[test]
    fn reconcile_prefers_retained_base() {
        let clock = MonotonicClock::new(10);
        let local = clock.snapshot(1_000, 9_999, 10);

        let retained = local.with_retained(60, 2_000);
        assert_eq!(retained.mtimecmp, 9_999);
        assert_eq!(clock.reconcile(&retained, 70, RATIO_1US), 2_000 + 100);

        let untouched = local.with_retained(0, 0);
        assert_eq!(untouched, local);
    }

    #[test]
    fn zero_rate_never_divides_by_zero() {
        let clock = MonotonicClock::new(0);
        assert_eq!(clock.ticks_per_us(), 1);
        assert_eq!(clock.mtime_to_us(12_345), 12_345);
        assert_eq!(clock.us_to_mtime(12_345), 12_345);
    }

    #[test]
    fn idle_cap_stays_below_one_rtc_period() {
        let clock = MonotonicClock::new(10);
        let us = clock.mtime_to_us(MAX_IDLE_MTIME);
        // slowest plausible RTC: 32 kHz against 20 MHz
        assert!(us_to_rtc(us, 62_500) < RTC_COUNT_MAX);
    }
}
