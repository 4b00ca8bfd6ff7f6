//! RTC-to-PIT ratio calibration.
//!
//! A calibration snaps the PIT and RTC counters twice, `interval` apart, and
//! derives `ratio = pit_delta * 100 / rtc_delta`. The active ratio is an
//! exponentially weighted moving average of those samples; the sleep ratio is
//! discounted when the AON regulator is driven through its operating control
//! register, since the RTC runs slower at the lower sleep voltage.

use crate::time::{rtc_elapsed, MonotonicClock};

/// Interval used to refresh the ratio after every timer-off wakeup.
pub const SNAP_SHORT_INTERVAL_US: u32 = 500;
/// Interval used to recalibrate a stale ratio.
pub const SNAP_LONG_INTERVAL_US: u32 = 20_000;
/// Interval of the initial calibration.
pub const SNAP_PROBE_INTERVAL_US: u32 = SNAP_LONG_INTERVAL_US * 5;

const SLEEP_RATIO_PERMILLE: u32 = 933;
const PIT_HZ: u32 = 20_000_000;

/// A simultaneous capture of the PIT and RTC counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SnapPair {
    /// PIT count.
    pub pit: u32,
    /// RTC count.
    pub rtc: u32,
}

/// Ratio between two snaps, `None` if the RTC did not advance.
pub fn measure_ratio(first: SnapPair, second: SnapPair) -> Option<u32> {
    let pit_diff = second.pit.wrapping_sub(first.pit);
    let rtc_diff = rtc_elapsed(first.rtc, second.rtc);
    if rtc_diff == 0 {
        return None;
    }
    let ratio = pit_diff as u64 * 100 / rtc_diff as u64;
    u32::try_from(ratio).ok()
}

/// Weights a new sample 3:7 against the running average.
pub const fn moving_average(avg: u32, sample: u32) -> u32 {
    (avg * 7 / 10) + (sample * 3 / 10)
}

/// Encodes a ratio in the 8.8 fixed point format of the systimer ratio
/// register.
pub const fn ratio_to_reg(ratio: u32) -> u32 {
    ((ratio / 100) << 8) | (((ratio % 100) * 255 / 100) & 0xff)
}

/// Decodes the systimer ratio register.
pub const fn reg_to_ratio(reg: u32) -> u32 {
    ((reg >> 8) * 100) + ((reg & 0xff) * 100 / 255)
}

/// RTC frequency implied by `ratio`, in Hz.
pub const fn ratio_to_freq(ratio: u32) -> u32 {
    if ratio == 0 {
        return 0;
    }
    ((PIT_HZ as u64 * 100) / ratio as u64) as u32
}

/// Ratio used while the AON rail sits at its sleep voltage.
pub const fn sleep_ratio(act_ratio: u32, ocr: bool) -> u32 {
    if ocr {
        act_ratio * SLEEP_RATIO_PERMILLE / 1000
    } else {
        act_ratio
    }
}

/// Ratio bookkeeping policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RatioCalibrator {
    invalid_time_us: u64,
}

impl RatioCalibrator {
    /// A ratio older than `invalid_time_s` seconds is stale.
    pub const fn new(invalid_time_s: u32) -> Self {
        Self {
            invalid_time_us: invalid_time_s as u64 * 1_000_000,
        }
    }

    /// Folds a new sample into the active ratio. A zero `act_ratio` means
    /// nothing was measured yet and the sample is taken as is.
    pub fn update(&self, act_ratio: u32, first: SnapPair, second: SnapPair) -> u32 {
        match measure_ratio(first, second) {
            Some(sample) if act_ratio == 0 => sample,
            Some(sample) => moving_average(act_ratio, sample),
            None => {
                warn!("RTC did not advance during calibration");
                act_ratio
            }
        }
    }

    /// Whether the ratio measured at `measured_at` needs a refresh at `now`.
    pub fn is_stale(&self, clock: &MonotonicClock, measured_at: u64, now: u64) -> bool {
        clock.mtime_to_us(now.wrapping_sub(measured_at)) > self.invalid_time_us
    }

    /// Recalibration interval: the long interval, shortened to the remaining
    /// idle span.
    pub fn interval(&self, clock: &MonotonicClock, now: u64, wtime: u64) -> u32 {
        let idle_us = clock.mtime_to_us(wtime.saturating_sub(now));
        if idle_us < SNAP_LONG_INTERVAL_US as u64 {
            idle_us as u32
        } else {
            SNAP_LONG_INTERVAL_US
        }
    }
}

impl Default for RatioCalibrator {
    fn default() -> Self {
        Self::new(crate::config::RTC_RATIO_INVALID_TIME_S)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::RTC_COUNT_MAX;

    #[test]
    fn ratio_of_a_32k_rtc() {
        // 20 ms at 20 MHz against 655 RTC ticks
        let first = SnapPair { pit: 1_000, rtc: 10 };
        let second = SnapPair {
            pit: 1_000 + 400_000,
            rtc: 10 + 655,
        };
        assert_eq!(measure_ratio(first, second), Some(61_068));
        assert_eq!(ratio_to_freq(61_068), 32_750);
    }

    #[test]
    fn ratio_across_counter_wraps() {
        let first = SnapPair {
            pit: u32::MAX - 99,
            rtc: RTC_COUNT_MAX - 1,
        };
        let second = SnapPair { pit: 100, rtc: 1 };
        // 200 PIT ticks over 2 RTC ticks
        assert_eq!(measure_ratio(first, second), Some(10_000));
    }

    #[test]
    fn frozen_rtc_keeps_previous_ratio() {
        let cal = RatioCalibrator::new(600);
        let snap = SnapPair { pit: 5, rtc: 5 };
        assert_eq!(measure_ratio(snap, snap), None);
        assert_eq!(cal.update(61_000, snap, snap), 61_000);
    }

    #[test]
    fn first_sample_seeds_the_average() {
        let cal = RatioCalibrator::new(600);
        let first = SnapPair { pit: 0, rtc: 0 };
        let second = SnapPair { pit: 6_000, rtc: 10 };

        assert_eq!(cal.update(0, first, second), 60_000);
        assert_eq!(cal.update(50_000, first, second), 35_000 + 18_000);
    }

    #[test]
    fn register_encoding() {
        assert_eq!(ratio_to_reg(61_035), (610 << 8) | 89);
        assert_eq!(reg_to_ratio(ratio_to_reg(61_000)), 61_000);
        // the fraction loses precision in the 8-bit encoding
        assert_eq!(reg_to_ratio(ratio_to_reg(61_035)), 61_034);
    }

    #[test]
    fn sleep_ratio_discount() {
        assert_eq!(sleep_ratio(61_000, false), 61_000);
        assert_eq!(sleep_ratio(61_000, true), 56_913);
    }

    #[test]
    fn staleness_and_interval() {
        let clock = MonotonicClock::new(10);
        let cal = RatioCalibrator::new(600);
        let ten_min = clock.us_to_mtime(600_000_000);

        assert!(!cal.is_stale(&clock, 1_000, 1_000 + ten_min));
        assert!(cal.is_stale(&clock, 1_000, 1_000 + ten_min + 10));

        assert_eq!(cal.interval(&clock, 0, clock.us_to_mtime(5_000)), 5_000);
        assert_eq!(cal.interval(&clock, 0, clock.us_to_mtime(500_000)), 20_000);
        assert_eq!(cal.interval(&clock, 100, 50), 0);
    }
}
