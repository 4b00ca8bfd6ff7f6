//! # Mode selection
//!
//! ## Overview
//!
//! On every idle entry the engine
//! 1. derives the idle span from the RTOS compare deadline and the earliest
//!    device timer, giving up when it is below the sleep threshold,
//! 2. picks the deepest tier whose minimum time fits the span,
//! 3. upgrades deep sleep to hibernation when the watcher can service the
//!    first wakeup and the span after it qualifies for hibernation,
//! 4. applies the hibernation rate limit and the application's mode policy,
//! 5. subtracts the restore latency from the wakeup instant.
//!
//! Every step that does not end in a low power mode returns an [`Abort`].

use crate::{
    context::PowerContext,
    mode::{PowerMode, WakeType},
    systimer::{TimerKind, WakeupInfo},
    time::MAX_IDLE_MTIME,
    Abort,
};

/// Tiers scanned by the selection, deepest first.
const SCAN_ORDER: [PowerMode; 4] = [
    PowerMode::Hibernation,
    PowerMode::DEEP_SLEEP,
    PowerMode::Sleep,
    PowerMode::LightSleep,
];

impl PowerContext {
    fn below_threshold(&self, wtime: u64) -> bool {
        wtime < self.mtime + self.clock.us_to_mtime(self.sleep_threshold_us as u64)
    }

    fn idle_duration(&self) -> u64 {
        self.wtime.saturating_sub(self.mtime)
    }

    fn min_time(&self, mode: PowerMode) -> Option<u32> {
        match mode {
            PowerMode::Hibernation => Some(self.hib_min_time),
            other => self.latencies.min_time(other),
        }
    }

    /// Computes the idle window from the RTOS deadline `mtimecmp` and the
    /// earliest device wakeup.
    pub(crate) fn update_idle_time(
        &mut self,
        mtime: u64,
        mtimecmp: u64,
        device: Option<WakeupInfo>,
    ) -> Result<(), Abort> {
        self.mtime = mtime;
        self.wtime = mtimecmp;
        self.wtime_next = None;

        if self.below_threshold(self.wtime) {
            return Err(Abort::BelowThreshold);
        }

        if let Some(info) = device.filter(|info| info.wtime < self.wtime) {
            self.wtime = info.wtime;

            if self.below_threshold(self.wtime) {
                return Err(Abort::BelowThreshold);
            }

            if info.kind == TimerKind::WakeupIdle {
                let next = match info.next {
                    Some((wtime, _)) => wtime.min(mtimecmp),
                    None => mtimecmp,
                };
                self.wtime_next = Some(next);
            }
        }

        self.wtype = match self.wtime_next {
            Some(_) => WakeType::Watcher,
            None => WakeType::Full,
        };

        if self.idle_duration() > MAX_IDLE_MTIME {
            self.wtime = self.mtime + MAX_IDLE_MTIME;
            self.wtime_next = None;
            self.wtype = WakeType::Full;
        }

        Ok(())
    }

    /// Picks the deepest tier that fits the idle span.
    pub(crate) fn select_mode(&mut self) -> Result<(), Abort> {
        let dur = self.clock.mtime_to_us(self.idle_duration());

        self.pm_mode = SCAN_ORDER
            .into_iter()
            .find(|&mode| self.min_time(mode).is_some_and(|min| dur >= min as u64))
            .ok_or(Abort::NoFeasibleMode)?;

        if self.pm_mode >= PowerMode::DEEP_SLEEP {
            if let Some(next) = self.wtime_next {
                let next_dur = self.clock.mtime_to_us(next.saturating_sub(self.mtime));
                if next_dur >= self.hib_min_time as u64 {
                    self.pm_mode = PowerMode::Hibernation;
                }
            }
        }

        Ok(())
    }

    /// Starts a new hibernation limit window once the current one is over.
    pub(crate) fn reset_hib_limit(&mut self) {
        if self.hib_limit_clr < self.mtime {
            self.hib_limit_clr = self.hib_window_end(self.mtime);
            self.hib_limit_cnt = 0;
        }
    }

    /// Applies the hibernation rate limit and the enabled mode set.
    pub(crate) fn check_mode(&mut self) -> Result<(), Abort> {
        if self.pm_mode == PowerMode::Hibernation && self.hib_limit_cnt >= self.hib_max_cnt {
            trace!("hibernation limit reached");
            self.pm_mode = PowerMode::DEEP_SLEEP;
        }

        while !self.pm_mode_enabled.has(self.pm_mode) {
            match self.pm_mode.shallower() {
                Some(mode) => self.pm_mode = mode,
                None => break,
            }
        }

        match self.pm_mode {
            PowerMode::Active => Err(Abort::NoFeasibleMode),
            _ => Ok(()),
        }
    }

    /// Moves the wakeup instants forward by the restore latency of the
    /// selected mode.
    pub(crate) fn update_target_time(&mut self) {
        let offset = self
            .clock
            .us_to_mtime(self.latencies.restore_offset(self.wtype, self.pm_mode) as u64);

        self.ttime = self.wtime.saturating_sub(offset);
        self.ttime_next = match self.wtype {
            WakeType::Watcher => self.wtime_next.map(|next| next.saturating_sub(offset)),
            WakeType::Full => None,
        };
    }

    /// Runs selection, policy and target computation. On failure the mode is
    /// left at [`PowerMode::Active`].
    pub(crate) fn update_mode(&mut self) -> Result<PowerMode, Abort> {
        let selected = self.select_mode().and_then(|_| {
            self.reset_hib_limit();
            self.check_mode()
        });

        if let Err(abort) = selected {
            self.pm_mode = PowerMode::Active;
            return Err(abort);
        }

        self.update_target_time();
        debug!(
            "selected {:?} ({:?}), target {}",
            self.pm_mode,
            self.wtype,
            self.ttime
        );
        Ok(self.pm_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        mode::{LatencyTable, ModeSet, Tier, TierTiming},
    };

    const MS: u64 = 1_000;

    fn timing(save: u32, restore: u32, watcher_restore: u32) -> TierTiming {
        TierTiming {
            sw_save: save,
            hw_save: 0,
            sw_restore: restore,
            hw_restore: 0,
            watcher_restore,
        }
    }

    // light sleep 10 ms, sleep 30 ms, deep sleep 80 ms, hibernation 1 h
    fn scenario_latencies() -> LatencyTable {
        LatencyTable::new(0)
            .with_tier(Tier::LightSleep, timing(8_000, 2_000, 0))
            .with_tier(Tier::Sleep, timing(20_000, 10_000, 0))
            .with_tier(Tier::DeepSleep, timing(50_000, 30_000, 3_000))
            .with_tier(Tier::Hibernation, timing(3_500_000_000, 100_000_000, 0))
    }

    fn context(modes: ModeSet) -> PowerContext {
        let config = Config::default()
            .with_latencies(scenario_latencies())
            .with_enabled_modes(modes)
            .with_sleep_threshold(1_000)
            .with_hib_min_time_ceiling(u32::MAX);
        PowerContext::new(&config)
    }

    fn all_modes() -> ModeSet {
        ModeSet::all()
    }

    fn select(ctx: &mut PowerContext, now: u64, idle_us: u64) -> Result<PowerMode, Abort> {
        let wtime = now + ctx.clock.us_to_mtime(idle_us);
        ctx.update_idle_time(now, wtime, None)?;
        ctx.update_mode()
    }

    #[test]
    fn below_threshold_never_sleeps() {
        let mut ctx = PowerContext::new(&Config::default().with_sleep_threshold(9_000));

        assert_eq!(ctx.update_idle_time(1_000, 1_000 + 89_999, None), Err(Abort::BelowThreshold));
        // deadline already in the past
        assert_eq!(ctx.update_idle_time(1_000, 500, None), Err(Abort::BelowThreshold));

        let device = WakeupInfo {
            wtime: 1_000 + 50_000,
            kind: TimerKind::WakeupFull,
            next: None,
        };
        assert_eq!(
            ctx.update_idle_time(1_000, 1_000 + 10_000_000, Some(device)),
            Err(Abort::BelowThreshold)
        );
    }

    #[test]
    fn fifty_milliseconds_selects_sleep() {
        let mut ctx = context(all_modes());
        assert_eq!(select(&mut ctx, 0, 50 * MS), Ok(PowerMode::Sleep));
        assert_eq!(ctx.wake_type(), WakeType::Full);
        assert_eq!(ctx.target_time(), ctx.clock.us_to_mtime(40 * MS));
    }

    #[test]
    fn deepest_enabled_feasible_mode_wins() {
        let enabled = ModeSet::ACTIVE | ModeSet::LIGHT_SLEEP | ModeSet::SLEEP | ModeSet::DEEP_SLEEP_1;

        for idle_ms in (2..400).step_by(3) {
            let mut ctx = context(enabled);
            let idle_us = idle_ms * MS;
            let expected = [PowerMode::DeepSleep1, PowerMode::Sleep, PowerMode::LightSleep]
                .into_iter()
                .find(|&mode| ctx.min_time(mode).is_some_and(|min| idle_us >= min as u64));

            match expected {
                Some(mode) => assert_eq!(select(&mut ctx, 7, idle_us), Ok(mode), "{idle_ms} ms"),
                None => assert!(select(&mut ctx, 7, idle_us).is_err(), "{idle_ms} ms"),
            }
        }
    }

    #[test]
    fn minimum_time_is_inclusive() {
        let mut ctx = context(all_modes());
        assert_eq!(select(&mut ctx, 0, 30 * MS), Ok(PowerMode::Sleep));
        assert_eq!(select(&mut ctx, 0, 30 * MS - 1), Ok(PowerMode::LightSleep));
        assert_eq!(select(&mut ctx, 0, 10 * MS - 1), Err(Abort::NoFeasibleMode));
        assert_eq!(ctx.mode(), PowerMode::Active);
    }

    #[test]
    fn disabled_modes_walk_down() {
        let mut ctx = context(ModeSet::ACTIVE | ModeSet::LIGHT_SLEEP);
        assert_eq!(select(&mut ctx, 0, 100 * MS), Ok(PowerMode::LightSleep));
        assert_eq!(ctx.target_time(), ctx.clock.us_to_mtime(98 * MS));

        let mut ctx = context(ModeSet::ACTIVE);
        assert_eq!(select(&mut ctx, 0, 100 * MS), Err(Abort::NoFeasibleMode));
    }

    #[test]
    fn watcher_window_upgrades_to_hibernation() {
        let mut ctx = PowerContext::new(
            &Config::default()
                .with_latencies(
                    scenario_latencies()
                        .with_tier(Tier::LightSleep, timing(500, 500, 0))
                        .with_tier(Tier::Sleep, timing(1_000, 1_000, 0))
                        .with_tier(Tier::DeepSleep, timing(2_000, 2_000, 1_000)),
                )
                .with_enabled_modes(ModeSet::all())
                .with_sleep_threshold(1_000),
        );

        let now = 1_000_000;
        let two_hours = now + ctx.clock.us_to_mtime(2 * 3600 * 1_000_000);
        let device = WakeupInfo {
            wtime: now + ctx.clock.us_to_mtime(5 * MS),
            kind: TimerKind::WakeupIdle,
            next: None,
        };

        ctx.update_idle_time(now, two_hours, Some(device)).unwrap();
        assert_eq!(ctx.wake_type(), WakeType::Watcher);
        assert_eq!(ctx.update_mode(), Ok(PowerMode::Hibernation));

        // the imminent deadline is still the wakeup target
        assert_eq!(ctx.target_time(), device.wtime);
        assert_eq!(ctx.next_target_time(), Some(two_hours));
    }

    #[test]
    fn second_device_timer_bounds_the_watcher_window() {
        let mut ctx = context(all_modes());
        let device = WakeupInfo {
            wtime: ctx.clock.us_to_mtime(100 * MS),
            kind: TimerKind::WakeupIdle,
            next: Some((ctx.clock.us_to_mtime(300 * MS), TimerKind::WakeupFull)),
        };

        ctx.update_idle_time(0, ctx.clock.us_to_mtime(10_000 * MS), Some(device)).unwrap();
        assert_eq!(ctx.wtime_next, Some(ctx.clock.us_to_mtime(300 * MS)));
        assert_eq!(ctx.update_mode(), Ok(PowerMode::DeepSleep1));
        assert_eq!(
            ctx.next_target_time(),
            Some(ctx.clock.us_to_mtime(297 * MS))
        );
        assert_eq!(ctx.target_time(), ctx.clock.us_to_mtime(97 * MS));
    }

    #[test]
    fn full_wakeup_device_timer_is_adopted() {
        let mut ctx = context(all_modes());
        let device = WakeupInfo {
            wtime: ctx.clock.us_to_mtime(60 * MS),
            kind: TimerKind::WakeupFull,
            next: Some((ctx.clock.us_to_mtime(70 * MS), TimerKind::WakeupIdle)),
        };

        ctx.update_idle_time(0, ctx.clock.us_to_mtime(500 * MS), Some(device)).unwrap();
        assert_eq!(ctx.wake_time(), device.wtime);
        assert_eq!(ctx.wake_type(), WakeType::Full);
    }

    #[test]
    fn hibernation_rate_limit() {
        let mut ctx = context(all_modes());
        ctx.hib_max_cnt = 3;
        let one_hour = ctx.clock.us_to_mtime(3600 * 1_000_000);

        let mut now = 10;
        let mut selected = Vec::new();
        for _ in 0..5 {
            let mode = select(&mut ctx, now, 2 * 3600 * 1_000 * MS).unwrap();
            if mode == PowerMode::Hibernation {
                ctx.record_hibernation();
            }
            selected.push(mode);
            now += 1_000;
        }
        assert_eq!(
            selected,
            [
                PowerMode::Hibernation,
                PowerMode::Hibernation,
                PowerMode::Hibernation,
                PowerMode::DEEP_SLEEP,
                PowerMode::DEEP_SLEEP,
            ]
        );

        // the window (one hour by default) is over
        now += one_hour;
        assert_eq!(select(&mut ctx, now, 2 * 3600 * 1_000 * MS), Ok(PowerMode::Hibernation));
        assert_eq!(ctx.hib_limit_count(), 0);
    }

    #[test]
    fn idle_span_is_capped() {
        let mut ctx = context(all_modes());
        let device = WakeupInfo {
            wtime: u64::MAX / 2,
            kind: TimerKind::WakeupIdle,
            next: None,
        };

        ctx.update_idle_time(100, u64::MAX, Some(device)).unwrap();
        assert_eq!(ctx.wake_time(), 100 + MAX_IDLE_MTIME);
        assert_eq!(ctx.wake_type(), WakeType::Full);
        assert_eq!(ctx.wtime_next, None);
    }
}
