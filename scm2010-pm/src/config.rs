//! # Configuration
//!
//! Build-time defaults come from `esp-config` (environment variables named
//! `SCM2010_PM_CONFIG_*`). [`Config`] carries the runtime policy and starts
//! out from those defaults.

use core::num::NonZeroU32;

use bitflags::bitflags;

use crate::{
    mode::{LatencyTable, ModeSet},
    wakeup::WakeupSources,
};

pub(crate) const HIBERNATION_LIMIT_MAX: u32 =
    esp_config::esp_config_int!(u32, "SCM2010_PM_CONFIG_HIBERNATION_LIMIT_MAX");
pub(crate) const HIBERNATION_LIMIT_DURATION_S: u32 =
    esp_config::esp_config_int!(u32, "SCM2010_PM_CONFIG_HIBERNATION_LIMIT_DURATION");
pub(crate) const RTC_RATIO_INVALID_TIME_S: u32 =
    esp_config::esp_config_int!(u32, "SCM2010_PM_CONFIG_RTC_RATIO_INVALID_TIME");
pub(crate) const SLEEP_THRESHOLD_US: u32 =
    esp_config::esp_config_int!(u32, "SCM2010_PM_CONFIG_SLEEP_THRESHOLD_US");
pub(crate) const SDIO_PREPARE_TIME_US: u32 =
    esp_config::esp_config_int!(u32, "SCM2010_PM_CONFIG_SDIO_PREPARE_TIME_US");
pub(crate) const MTIME_TICKS_PER_US: u32 =
    esp_config::esp_config_int!(u32, "SCM2010_PM_CONFIG_MTIME_TICKS_PER_US");
pub(crate) const PMU_POLL_LIMIT: u32 =
    esp_config::esp_config_int!(u32, "SCM2010_PM_CONFIG_PMU_POLL_LIMIT");
pub(crate) const DEFAULT_WAKEUP_SOURCES: u16 =
    esp_config::esp_config_int!(u16, "SCM2010_PM_CONFIG_DEFAULT_WAKEUP_SOURCES");

bitflags! {
    /// Optional power-management behaviors, shared with the watcher firmware
    /// through retention RAM.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PmFeatures: u32 {
        /// Lower DLDO/DCDC rail voltages during power down.
        const VOLTAGE_CTRL         = 1 << 0;
        /// Drop the AON regulator to 0.7 V (instead of 0.8 V) while asleep.
        const AON_VOLTAGE_CTRL     = 1 << 1;
        /// The watcher switches the PLL off.
        const PLL_CTRL             = 1 << 2;
        /// IOs are powered off on wakeup from power gated modes.
        const WAKEUP_IO_OFF        = 1 << 3;
        /// Flash enters deep power down.
        const FLASH_DPD            = 1 << 4;
        /// The watcher prints logs.
        const WC_LOG               = 1 << 5;
        /// Use a fixed RTC ratio.
        const RTC_FIX_RATIO        = 1 << 6;
        /// The watcher owns UART1.
        const WC_UART1             = 1 << 7;
        /// The watcher controls DLDO/DCDC.
        const DLDO_DCDC_CTRL       = 1 << 8;
        /// The AON regulator is controlled by its operating control register.
        const AON_VOLTAGE_CTRL_OCR = 1 << 9;
        /// The watcher logs wakeups.
        const WAKEUP_LOG_ON        = 1 << 10;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for PmFeatures {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "PmFeatures({=u32:#x})", self.bits())
    }
}

/// Runtime power-management policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub(crate) enabled_modes: ModeSet,
    pub(crate) wakeup_sources: WakeupSources,
    pub(crate) hib_max_count: u32,
    pub(crate) hib_limit_duration_s: u32,
    pub(crate) hib_min_time_ceiling_us: u32,
    pub(crate) sleep_threshold_us: u32,
    pub(crate) ratio_invalid_time_s: u32,
    pub(crate) mtime_ticks_per_us: u32,
    pub(crate) pmu_poll_limit: u32,
    pub(crate) features: PmFeatures,
    pub(crate) lowpower_io_off: bool,
    pub(crate) wakeup_pins: u8,
    pub(crate) latencies: LatencyTable,
}

impl Default for Config {
    fn default() -> Self {
        let latencies = LatencyTable::default();
        Self {
            enabled_modes: ModeSet::default(),
            wakeup_sources: WakeupSources::from_bits_truncate(DEFAULT_WAKEUP_SOURCES),
            hib_max_count: HIBERNATION_LIMIT_MAX,
            hib_limit_duration_s: HIBERNATION_LIMIT_DURATION_S,
            hib_min_time_ceiling_us: 4 * latencies.tier(crate::mode::Tier::Hibernation).min_time(),
            sleep_threshold_us: SLEEP_THRESHOLD_US + SDIO_PREPARE_TIME_US,
            ratio_invalid_time_s: RTC_RATIO_INVALID_TIME_S,
            mtime_ticks_per_us: MTIME_TICKS_PER_US,
            pmu_poll_limit: PMU_POLL_LIMIT,
            features: PmFeatures::empty(),
            lowpower_io_off: false,
            wakeup_pins: 0,
            latencies,
        }
    }
}

impl Config {
    /// Modes the engine may enter.
    pub fn with_enabled_modes(mut self, modes: ModeSet) -> Self {
        self.enabled_modes = modes;
        self
    }

    /// Wakeup sources armed for shallow modes.
    pub fn with_wakeup_sources(mut self, sources: WakeupSources) -> Self {
        self.wakeup_sources = sources;
        self
    }

    /// Hibernation entries allowed per limit window.
    pub fn with_hib_max_count(mut self, count: u32) -> Self {
        self.hib_max_count = count;
        self
    }

    /// Length of the hibernation limit window, in seconds.
    pub fn with_hib_limit_duration(mut self, seconds: u32) -> Self {
        self.hib_limit_duration_s = seconds;
        self
    }

    /// Upper bound for the self-tuned hibernation minimum time.
    pub fn with_hib_min_time_ceiling(mut self, us: u32) -> Self {
        self.hib_min_time_ceiling_us = us;
        self
    }

    /// Idle spans below this never leave the active mode.
    pub fn with_sleep_threshold(mut self, us: u32) -> Self {
        self.sleep_threshold_us = us;
        self
    }

    /// Age after which the RTC ratio gets recalibrated, in seconds.
    pub fn with_ratio_invalid_time(mut self, seconds: u32) -> Self {
        self.ratio_invalid_time_s = seconds;
        self
    }

    /// Machine timer rate.
    pub fn with_mtime_ticks_per_us(mut self, ticks: NonZeroU32) -> Self {
        self.mtime_ticks_per_us = ticks.get();
        self
    }

    /// Poll budget for indirect PMU transactions.
    pub fn with_pmu_poll_limit(mut self, polls: u32) -> Self {
        self.pmu_poll_limit = polls;
        self
    }

    /// Optional behaviors.
    pub fn with_features(mut self, features: PmFeatures) -> Self {
        self.features = features;
        self
    }

    /// Power IOs off while in low power modes.
    pub fn with_lowpower_io_off(mut self, off: bool) -> Self {
        self.lowpower_io_off = off;
        self
    }

    /// AON pins reserved as wakeup sources; the others are pulled down while
    /// the timer is off.
    pub fn with_wakeup_pins(mut self, pins: u8) -> Self {
        self.wakeup_pins = pins;
        self
    }

    /// Save/restore latencies.
    pub fn with_latencies(mut self, latencies: LatencyTable) -> Self {
        self.latencies = latencies;
        self
    }

    /// Save/restore latencies in use.
    pub fn latencies(&self) -> &LatencyTable {
        &self.latencies
    }
}
