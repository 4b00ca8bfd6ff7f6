//! Power-management state carried across idle invocations.

use crate::{
    config::Config,
    mode::{LatencyTable, ModeSet, PowerMode, Tier, WakeType},
    platform::{GpioState, PlicEnable},
    retention::WakeupFlags,
    time::{ClockSnapshot, MonotonicClock},
    wakeup::{WakeupSources, WakeupStatus, WAKEUP_PIN_MAX},
    Error,
};

/// Margin added to an observed hibernation save overrun.
pub(crate) const HIB_PREP_EXTEND_US: u64 = 100_000;

/// State of the mode-selection engine and the transition sequencer.
///
/// Only ever touched from the idle context, so it needs no locking.
#[derive(Debug, Clone)]
pub struct PowerContext {
    pub(crate) clock: MonotonicClock,
    pub(crate) latencies: LatencyTable,
    pub(crate) sleep_threshold_us: u32,
    pub(crate) hib_limit_duration_s: u32,
    pub(crate) hib_min_time_ceiling_us: u32,

    pub(crate) residual: u32,

    pub(crate) mtime: u64,
    pub(crate) wtime: u64,
    pub(crate) wtime_next: Option<u64>,
    pub(crate) ttime: u64,
    pub(crate) ttime_next: Option<u64>,
    pub(crate) wtype: WakeType,
    pub(crate) snapshot: ClockSnapshot,

    pub(crate) hib_limit_clr: u64,
    pub(crate) hib_limit_cnt: u32,
    pub(crate) hib_max_cnt: u32,
    pub(crate) hib_min_time: u32,
    pub(crate) hib_save_time: u32,

    pub(crate) power_down: Option<u32>,

    pub(crate) pm_mode: PowerMode,
    pub(crate) last_mode: PowerMode,
    pub(crate) pm_mode_enabled: ModeSet,
    pub(crate) lowpower_io_off: bool,
    pub(crate) callback: Option<fn(PowerMode)>,

    pub(crate) wakeup_src: WakeupSources,
    pub(crate) wakeup: WakeupStatus,
    pub(crate) wakeup_flag: WakeupFlags,

    pub(crate) gpio_enabled: u8,
    pub(crate) gpio: GpioState,

    pub(crate) rtc32k: u32,
    pub(crate) ratio: u32,

    pub(crate) plic: [PlicEnable; 2],
}

impl PowerContext {
    /// Initial state for `config`.
    pub fn new(config: &Config) -> Self {
        let hibernation = config.latencies.tier(Tier::Hibernation);

        Self {
            clock: MonotonicClock::new(config.mtime_ticks_per_us),
            latencies: config.latencies,
            sleep_threshold_us: config.sleep_threshold_us,
            hib_limit_duration_s: config.hib_limit_duration_s,
            hib_min_time_ceiling_us: config.hib_min_time_ceiling_us,
            residual: 0,
            mtime: 0,
            wtime: 0,
            wtime_next: None,
            ttime: 0,
            ttime_next: None,
            wtype: WakeType::Full,
            snapshot: ClockSnapshot::default(),
            hib_limit_clr: 0,
            hib_limit_cnt: 0,
            hib_max_cnt: config.hib_max_count,
            hib_min_time: hibernation.min_time(),
            hib_save_time: hibernation.sw_save,
            power_down: None,
            pm_mode: PowerMode::Active,
            last_mode: PowerMode::Active,
            pm_mode_enabled: config.enabled_modes,
            lowpower_io_off: config.lowpower_io_off,
            callback: None,
            wakeup_src: config.wakeup_sources,
            wakeup: WakeupStatus::default(),
            wakeup_flag: WakeupFlags::empty(),
            gpio_enabled: config.wakeup_pins,
            gpio: GpioState::default(),
            rtc32k: 0,
            ratio: 0,
            plic: [PlicEnable::DISABLED; 2],
        }
    }

    /// Machine timer conversions in use.
    pub fn clock(&self) -> &MonotonicClock {
        &self.clock
    }

    /// Mode of the transition in progress, [`PowerMode::Active`] otherwise.
    pub fn mode(&self) -> PowerMode {
        self.pm_mode
    }

    /// Mode of the last completed low power period.
    pub fn last_mode(&self) -> PowerMode {
        self.last_mode
    }

    /// Modes the application permits.
    pub fn enabled_modes(&self) -> ModeSet {
        self.pm_mode_enabled
    }

    /// Wake type of the last selection.
    pub fn wake_type(&self) -> WakeType {
        self.wtype
    }

    /// Wakeup instant of the last selection, in machine time.
    pub fn wake_time(&self) -> u64 {
        self.wtime
    }

    /// Instant resuming has to start at, in machine time.
    pub fn target_time(&self) -> u64 {
        self.ttime
    }

    /// Resume instant after the watcher's own wakeup.
    pub fn next_target_time(&self) -> Option<u64> {
        self.ttime_next
    }

    /// Hibernation entries in the current limit window.
    pub fn hib_limit_count(&self) -> u32 {
        self.hib_limit_cnt
    }

    /// End of the current hibernation limit window, in machine time.
    pub fn hib_window_close(&self) -> u64 {
        self.hib_limit_clr
    }

    /// Hibernation entries allowed per limit window.
    pub fn hib_max_count(&self) -> u32 {
        self.hib_max_cnt
    }

    /// Minimum idle time for hibernation, including tuning.
    pub fn hib_min_time(&self) -> u32 {
        self.hib_min_time
    }

    /// Software save budget of hibernation.
    pub fn hib_save_time(&self) -> u32 {
        self.hib_save_time
    }

    /// Wakeup cause of the last low power period.
    pub fn wakeup_status(&self) -> &WakeupStatus {
        &self.wakeup
    }

    /// RTC ratio used for the last low power period.
    pub fn ratio(&self) -> u32 {
        self.ratio
    }

    /// AON pins reserved as wakeup sources.
    pub fn wakeup_pins(&self) -> u8 {
        self.gpio_enabled
    }

    /// Restarts the hibernation limit window with a new budget.
    pub fn set_hib_max_count(&mut self, count: u32, now: u64) {
        self.hib_limit_clr = self.hib_window_end(now);
        self.hib_limit_cnt = 0;
        self.hib_max_cnt = count;
    }

    pub(crate) fn hib_window_end(&self, now: u64) -> u64 {
        now + self
            .clock
            .us_to_mtime(self.hib_limit_duration_s as u64 * 1_000_000)
    }

    pub(crate) fn record_hibernation(&mut self) {
        if self.hib_limit_cnt < self.hib_max_cnt {
            self.hib_limit_cnt += 1;
        }
    }

    pub(crate) fn enable_wakeup_pin(&mut self, pin: u8) -> Result<(), Error> {
        if pin > WAKEUP_PIN_MAX {
            return Err(Error::InvalidArgument);
        }
        self.gpio_enabled |= 1 << pin;
        Ok(())
    }

    pub(crate) fn disable_wakeup_pin(&mut self, pin: u8) -> Result<(), Error> {
        if pin > WAKEUP_PIN_MAX {
            return Err(Error::InvalidArgument);
        }
        self.gpio_enabled &= !(1 << pin);
        Ok(())
    }

    /// Grows the hibernation save budget after the watcher reported that a
    /// flash save overran it.
    ///
    /// The budget becomes the observed time plus a margin. It never shrinks
    /// and the resulting minimum time never exceeds the configured ceiling.
    pub(crate) fn extend_hib_save_time(&mut self, elapsed_us: u64) {
        let base = self.hib_min_time - self.hib_save_time;
        let room = self.hib_min_time_ceiling_us.saturating_sub(base) as u64;
        let save = (elapsed_us + HIB_PREP_EXTEND_US).min(room) as u32;

        if save <= self.hib_save_time {
            return;
        }

        info!(
            "hibernation save time {} -> {} us",
            self.hib_save_time,
            save
        );
        self.hib_save_time = save;
        self.hib_min_time = base + save;
    }
}

impl Default for PowerContext {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::TierTiming;

    fn config() -> Config {
        let latencies = LatencyTable::new(0).with_tier(
            Tier::Hibernation,
            TierTiming {
                sw_save: 1_000_000,
                hw_save: 0,
                sw_restore: 50_000,
                hw_restore: 0,
                watcher_restore: 0,
            },
        );
        Config::default()
            .with_latencies(latencies)
            .with_hib_min_time_ceiling(2_000_000)
    }

    #[test]
    fn hibernation_budget_from_latencies() {
        let ctx = PowerContext::new(&config());
        assert_eq!(ctx.hib_min_time(), 1_050_000);
        assert_eq!(ctx.hib_save_time(), 1_000_000);
    }

    #[test]
    fn save_overrun_extends_budget() {
        let mut ctx = PowerContext::new(&config());

        ctx.extend_hib_save_time(1_200_000);
        assert_eq!(ctx.hib_save_time(), 1_300_000);
        assert_eq!(ctx.hib_min_time(), 1_350_000);

        // a faster save never shrinks the budget
        ctx.extend_hib_save_time(500_000);
        assert_eq!(ctx.hib_min_time(), 1_350_000);
    }

    #[test]
    fn budget_saturates_at_ceiling() {
        let mut ctx = PowerContext::new(&config());

        ctx.extend_hib_save_time(10_000_000);
        assert_eq!(ctx.hib_min_time(), 2_000_000);
        assert_eq!(ctx.hib_save_time(), 1_950_000);

        ctx.extend_hib_save_time(20_000_000);
        assert_eq!(ctx.hib_min_time(), 2_000_000);
    }

    #[test]
    fn hibernation_count_is_capped() {
        let mut ctx = PowerContext::new(&config().with_hib_max_count(2));
        for _ in 0..5 {
            ctx.record_hibernation();
        }
        assert_eq!(ctx.hib_limit_count(), 2);

        ctx.set_hib_max_count(4, 1_000);
        assert_eq!(ctx.hib_limit_count(), 0);
        assert_eq!(ctx.hib_max_count(), 4);
        assert_eq!(ctx.hib_window_close(), 1_000 + ctx.clock.us_to_mtime(3600 * 1_000_000));
    }

    #[test]
    fn wakeup_pins_range() {
        let mut ctx = PowerContext::default();
        assert_eq!(ctx.enable_wakeup_pin(7), Ok(()));
        assert_eq!(ctx.enable_wakeup_pin(8), Err(Error::InvalidArgument));
        assert_eq!(ctx.wakeup_pins(), 0x80);
        ctx.disable_wakeup_pin(7).unwrap();
        assert_eq!(ctx.wakeup_pins(), 0);
    }
}
