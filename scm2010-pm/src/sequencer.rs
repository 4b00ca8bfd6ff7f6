//! # Transition sequencer
//!
//! ## Overview
//!
//! [`PowerManager`] owns the power-management state and every collaborator
//! the transitions touch. The RTOS idle hook calls
//! [`PowerManager::pre_sleep`] and then [`PowerManager::post_sleep`] on each
//! tickless idle entry:
//!
//! - `pre_sleep` runs the mode selection and, if a low power mode was
//!   chosen, saves interrupt enables, suspends peripherals, parks hart 0,
//!   stops the machine timer, programs the RTC alarm and the PMU, and halts.
//!   For power gated modes it arms the retention record and hands over to
//!   the watcher firmware.
//! - `post_sleep` undoes all of that in reverse, rebuilding the machine timer
//!   from the RTC when the timer was off.
//!
//! An attempt that does not reach a low power mode returns an [`Abort`] and
//! leaves the mode at [`PowerMode::Active`]; `post_sleep` then does nothing.
//!
//! Hardware misbehaviour during a transition (a PMU that does not answer, a
//! corrupt retention record, a target time in the past) is unrecoverable and
//! halts through `fatal!`.
//!
//! ## Examples
//!
//! ```rust, ignore
//! static STAY: StayActive = StayActive::new();
//!
//! let mut pm = PowerManager::new(Config::default(), &STAY, board);
//! pm.init()?;
//! pm.relax(PmDevice::App);
//!
//! // from the idle hook
//! let _ = pm.pre_sleep();
//! pm.post_sleep();
//! ```

use crate::{
    calibration::{
        ratio_to_reg,
        sleep_ratio,
        RatioCalibrator,
        SNAP_PROBE_INTERVAL_US,
        SNAP_SHORT_INTERVAL_US,
    },
    config::{Config, PmFeatures},
    context::PowerContext,
    mode::{ModeFeatures, ModeSet, PowerMode, Tier, WakeType},
    platform::{DeviceSuspend, Hart, LowpowerCtrl, Platform, PlicEnable, ResetVector, Rtc32k},
    pmu::{AonControl, DcdcVolt, DldoVolt, Pmu, PmuMode, PmuPort},
    retention::{Retention, RetentionRecord, RetentionStore, SyncFlags, WakeupFlags, WatcherExec},
    stay::{LeaseTimer, PmDevice, StayActive},
    systimer::SysTimer,
    time::{rtc_advance, us_to_rtc, RTC_COUNT_MAX},
    wakeup::{WakeupSources, WakeupStatus},
    Abort,
    Error,
};

/// Margin the target time must keep from the current time when entering.
const ENTRY_MARGIN_US: u64 = 1_000;

/// Collaborators the power manager drives.
pub struct Board<P, T, R, D, S, M> {
    /// CPU, interrupt controller and SMU.
    pub platform: P,
    /// System timer.
    pub timer: T,
    /// 32 kHz RTC.
    pub rtc: R,
    /// Peripheral drivers to quiesce before the system domain goes down.
    pub devices: D,
    /// Always-on RAM region holding the retention record.
    pub retention: S,
    /// PMU register port.
    pub pmu: M,
}

/// Power-management engine.
pub struct PowerManager<'s, P, T, R, D, S, M> {
    ctx: PowerContext,
    stay: &'s StayActive,
    calibrator: RatioCalibrator,
    poll_limit: u32,
    boot_features: PmFeatures,
    platform: P,
    timer: T,
    rtc: R,
    devices: D,
    retention: Retention<S>,
    pmu: Pmu<M>,
}

impl<'s, P, T, R, D, S, M> PowerManager<'s, P, T, R, D, S, M>
where
    P: Platform,
    T: SysTimer,
    R: Rtc32k,
    D: DeviceSuspend,
    S: RetentionStore,
    M: PmuPort,
{
    /// Creates the engine. Nothing is touched until [`Self::init`].
    pub fn new(config: Config, stay: &'s StayActive, board: Board<P, T, R, D, S, M>) -> Self {
        let aon_ocr = config.features.contains(PmFeatures::AON_VOLTAGE_CTRL_OCR);

        Self {
            ctx: PowerContext::new(&config),
            stay,
            calibrator: RatioCalibrator::new(config.ratio_invalid_time_s),
            poll_limit: config.pmu_poll_limit,
            boot_features: config.features,
            platform: board.platform,
            timer: board.timer,
            rtc: board.rtc,
            devices: board.devices,
            retention: Retention::new(board.retention),
            pmu: Pmu::new(board.pmu, config.pmu_poll_limit, aon_ocr),
        }
    }

    /// Brings up the engine.
    ///
    /// Rebuilds the retention record, programs the PMU rail limits, loads
    /// the watcher and parks hart 0. The application veto is held
    /// afterwards. The RTC is calibrated once unless a ratio survived in the
    /// retention record.
    pub fn init(&mut self) -> Result<(), Error> {
        let features = self.boot_features;
        let flash = self.platform.flash_params();
        let crypto = self.platform.crypto_config();
        let entry = self.platform.wakeup_entry();
        self.retention.init(flash, crypto, features, entry)?;
        self.platform.enable_retention();
        self.platform.set_lowpower_ctrl(LowpowerCtrl::default());

        self.pmu.init()?;
        self.platform.load_watcher();

        self.platform.set_reset_vector(Hart::Hart0, ResetVector::WfiStub);
        self.platform.reset_core();

        self.stay.reset(PmDevice::App);

        if self.retention.record().act_ratio == 0 {
            self.calibrate_under_qlr(SNAP_PROBE_INTERVAL_US)?;
        }

        let now = self.platform.mtime();
        self.ctx.hib_limit_clr = self.ctx.hib_window_end(now);

        for tier in [Tier::LightSleep, Tier::Sleep, Tier::DeepSleep, Tier::Hibernation] {
            let timing = self.ctx.latencies.tier(tier);
            info!(
                "{:?}: save {} us, restore {} us, min {} us",
                tier,
                timing.save(),
                timing.restore(),
                timing.min_time()
            );
        }
        info!(
            "features {:?}, RTC ratio {}",
            features,
            self.retention.record().act_ratio
        );

        Ok(())
    }

    /// Power-management state.
    pub fn context(&self) -> &PowerContext {
        &self.ctx
    }

    /// The retention record owner.
    pub fn retention(&self) -> &Retention<S> {
        &self.retention
    }

    /// The platform collaborator.
    pub fn platform(&mut self) -> &mut P {
        &mut self.platform
    }

    /// The system timer collaborator.
    pub fn timer(&mut self) -> &mut T {
        &mut self.timer
    }

    /// Features currently in effect.
    pub fn features(&self) -> PmFeatures {
        self.retention.record().feature
    }

    fn fail(&mut self, err: Error) -> ! {
        self.platform.set_gpio(&self.ctx.gpio);
        fatal!("power transition failed: {:?}", err)
    }

    fn check<V>(&mut self, result: Result<V, Error>) -> V {
        match result {
            Ok(value) => value,
            Err(err) => self.fail(err),
        }
    }

    fn sleep_aon(&self) -> AonControl {
        if self.features().contains(PmFeatures::AON_VOLTAGE_CTRL) {
            AonControl::Qlr0V7
        } else {
            AonControl::Qlr0V8
        }
    }

    fn calibrate(&mut self, interval_us: u32) -> Result<(), Error> {
        let (first, second) = self.timer.rtc_cal(interval_us);
        let act_ratio = self
            .calibrator
            .update(self.retention.record().act_ratio, first, second);
        self.timer.set_ratio_reg(ratio_to_reg(act_ratio));

        let ocr = self.features().contains(PmFeatures::AON_VOLTAGE_CTRL_OCR);
        self.retention.modify(|record| {
            record.act_ratio = act_ratio;
            record.ratio = sleep_ratio(act_ratio, ocr);
        })
    }

    fn calibrate_under_qlr(&mut self, interval_us: u32) -> Result<(), Error> {
        let aon = self.sleep_aon();
        self.pmu.control_aon(aon)?;
        self.calibrate(interval_us)?;
        let now = self.platform.mtime();
        self.retention
            .modify(|record| record.ratio_last_measure_time = now)?;
        self.pmu.control_aon(AonControl::Ilr0V8)
    }

    /// Recalibrates the RTC ratio when the last measurement is too old.
    ///
    /// The calibration consumes part of the idle span, so the attempt is
    /// abandoned afterwards.
    fn check_ratio_valid(&mut self) -> Result<(), Abort> {
        let now = self.platform.mtime();
        let measured_at = self.retention.record().ratio_last_measure_time;
        if !self.calibrator.is_stale(&self.ctx.clock, measured_at, now) {
            return Ok(());
        }

        let interval = self.calibrator.interval(&self.ctx.clock, now, self.ctx.wtime);
        let result = self.calibrate_under_qlr(interval);
        self.check(result);
        debug!("RTC ratio refreshed: {}", self.retention.record().act_ratio);
        Err(Abort::RatioStale)
    }

    fn save_plic(&mut self, hart: Hart) {
        self.ctx.plic[hart as usize] = self.platform.plic_enable(hart);
        self.platform.set_plic_enable(hart, PlicEnable::DISABLED);
    }

    fn restore_plic(&mut self, hart: Hart) {
        self.platform.set_plic_enable(hart, self.ctx.plic[hart as usize]);
    }

    fn save_gpio(&mut self) {
        self.ctx.gpio = self.platform.gpio();
        let parked = self.ctx.gpio.pulled_down(self.ctx.gpio_enabled);
        self.platform.set_gpio(&parked);
        self.platform.clear_gpio_irq();
    }

    fn save_time(&mut self) {
        let rtc = self.rtc.count();
        let mtime = self.platform.mtime();
        let mtimecmp = self.platform.stop_mtime_irq();
        self.ctx.snapshot = self.ctx.clock.snapshot(mtime, mtimecmp, rtc);
        self.ctx.mtime = mtime;
    }

    fn park_hart0(&mut self) {
        self.platform.set_reset_vector(Hart::Hart0, ResetVector::WfiStub);
        self.platform.reset_core();
    }

    /// Ratio the low power period is timed with. Shallow modes and
    /// hibernation keep the AON rail at its active voltage.
    fn ratio_for(&self, mode: PowerMode) -> u32 {
        let record = self.retention.record();
        if mode == PowerMode::Hibernation || mode <= PowerMode::Sleep {
            record.act_ratio
        } else {
            record.ratio
        }
    }

    fn set_rtc_wakeup(&mut self) {
        let span = self.ctx.ttime.saturating_sub(self.ctx.mtime);
        let ticks = us_to_rtc(self.ctx.clock.mtime_to_us(span), self.ctx.ratio);
        if ticks >= RTC_COUNT_MAX {
            fatal!("RTC alarm {} out of range", ticks);
        }

        let now = self.rtc.count();
        self.rtc.set_alarm(rtc_advance(now, ticks));
    }

    fn prepare_lowpower(&mut self, mode: PowerMode) -> Result<(), Error> {
        let features = mode.features();

        let mut ctrl = self.platform.lowpower_ctrl();
        if !features.contains(ModeFeatures::CORE_POWER_GATE) {
            if mode == PowerMode::Idle {
                ctrl.set_idle_en(true);
            } else {
                ctrl.set_sleep_en(true);
            }
            ctrl.set_wakeup_src(ctrl.wakeup_src() | self.ctx.wakeup_src.bits());
        }
        self.platform.set_lowpower_ctrl(ctrl);

        self.ctx.ratio = self.ratio_for(mode);
        if self.ctx.wakeup_src.contains(WakeupSources::RTC) {
            self.set_rtc_wakeup();
        }

        if features.contains(ModeFeatures::CORE_POWER_GATE) {
            self.pmu.disable_irq();
        } else {
            self.pmu.enable_irq();
        }

        let (entry, wakeup) = PmuMode::for_mode(mode, self.ctx.lowpower_io_off, self.features());
        self.pmu.set_mode(entry)?;
        self.pmu.set_mode(wakeup)?;

        self.platform.set_usb_force_suspend(true);
        self.platform.set_uart_lossy_wakeup(true);
        Ok(())
    }

    fn arm_retention(&mut self, mode: PowerMode) -> Result<(), Error> {
        let ctx = &self.ctx;
        self.retention.arm(|record| {
            record.pm_mode = mode;
            record.wk_src = ctx.wakeup_src;
            record.wk_time = ctx.ttime;
            if mode == PowerMode::Hibernation {
                record.sync_flag = SyncFlags::SAVE_FLASH;
            }
            if ctx.wtype == WakeType::Watcher {
                record.rtc_value = ctx.snapshot.rtc;
                record.mtime_value = ctx.snapshot.mtime;
                record.next_mtime_value = ctx.ttime_next.unwrap_or(0);
                record.wakeup_flag |= WakeupFlags::WATCHER;
            }
        })
    }

    /// Idle entry half of a tickless idle period.
    ///
    /// Returns the mode the SoC went through. On return from a shallow mode
    /// the CPU has already woken up; for power gated modes execution comes
    /// back here through the wakeup entry. Either way
    /// [`Self::post_sleep`] has to follow.
    pub fn pre_sleep(&mut self) -> Result<PowerMode, Abort> {
        if let Some(duration) = self.ctx.power_down {
            self.enter_power_down(duration);
        }

        if self.stay.is_held() {
            self.platform.wfi();
            return Err(Abort::Vetoed);
        }

        let mtime = self.platform.mtime();
        let mtimecmp = self.platform.mtimecmp();
        let device = self.timer.wakeup_info(mtime);
        if let Err(abort) = self.ctx.update_idle_time(mtime, mtimecmp, device) {
            self.platform.wfi();
            return Err(abort);
        }

        self.check_ratio_valid()?;

        let mode = match self.ctx.update_mode() {
            Ok(mode) => mode,
            Err(abort) => {
                self.platform.wfi();
                return Err(abort);
            }
        };
        let features = mode.features();

        if !self.platform.lowpower_ctrl().core_idle() {
            self.ctx.pm_mode = PowerMode::Active;
            self.platform.wfi();
            return Err(Abort::CoreBusy);
        }

        if features.contains(ModeFeatures::SYS_POWER_GATE) {
            self.save_plic(Hart::Hart1);
            if self.devices.suspend_devices().is_err() {
                self.restore_plic(Hart::Hart1);
                self.ctx.pm_mode = PowerMode::Active;
                return Err(Abort::SuspendRefused);
            }
        }

        self.save_plic(Hart::Hart0);

        if let Some(callback) = self.ctx.callback {
            callback(mode);
        }

        let now = self.platform.mtime();
        if self.ctx.ttime < now + self.ctx.clock.us_to_mtime(ENTRY_MARGIN_US) {
            fatal!("target time {} too close to {}", self.ctx.ttime, now);
        }

        let aon = self.sleep_aon();
        let result = self.pmu.control_aon(aon);
        self.check(result);

        if features.contains(ModeFeatures::TIMER_OFF) {
            self.park_hart0();
            self.save_time();
            self.save_gpio();
        }

        let result = self.prepare_lowpower(mode);
        self.check(result);

        self.ctx.rtc32k = self.rtc.raw_count();

        if features.contains(ModeFeatures::CORE_POWER_GATE) {
            let result = self.arm_retention(mode);
            self.check(result);
            if mode == PowerMode::Hibernation {
                self.ctx.record_hibernation();
            }

            self.platform.set_reset_vector(Hart::Hart1, ResetVector::Watcher);
            self.platform.set_reset_vector(Hart::Hart0, ResetVector::Watcher);
            self.platform.reset_core();
            self.platform.lowpower_start();
        } else {
            self.platform.wfi();
        }

        Ok(mode)
    }

    fn update_wakeup_status(&mut self, record: Option<&RetentionRecord>) {
        match record {
            Some(record) => {
                self.ctx.wakeup = WakeupStatus {
                    event: record.wk_evt as u16,
                    reason: record.wk_fb_reason,
                    kind: record.wk_fb_type,
                };
                self.ctx.wakeup_flag = record.wakeup_flag;
            }
            None => {
                self.ctx.wakeup.event = self.platform.lowpower_ctrl().wakeup_event();
                self.ctx.wakeup_flag = WakeupFlags::empty();
            }
        }
        trace!("wakeup event {:?}", self.ctx.wakeup.event());
    }

    fn restore_time(&mut self, record: Option<&RetentionRecord>) {
        // the count register lags one RTC tick behind after wakeup
        let advanced = (0..self.poll_limit).any(|_| self.rtc.raw_count() != self.ctx.rtc32k);
        if !advanced {
            warn!("RTC did not advance after wakeup");
        }
        let rtc_now = self.rtc.count();

        let base = match record {
            Some(record) => self
                .ctx
                .snapshot
                .with_retained(record.rtc_value, record.mtime_value),
            None => self.ctx.snapshot,
        };
        let mtime = self.ctx.clock.reconcile(&base, rtc_now, self.ctx.ratio);
        self.platform.set_mtime(mtime);
        self.platform.set_mtimecmp(base.mtimecmp);

        if let Some(record) = record {
            if record.sync_flag.contains(SyncFlags::SAVE_CANCEL)
                && record.wakeup_flag.contains(WakeupFlags::EXT_HIB_TIME)
            {
                let elapsed = mtime.saturating_sub(self.ctx.snapshot.mtime);
                self.ctx
                    .extend_hib_save_time(self.ctx.clock.mtime_to_us(elapsed));
            }
        }
    }

    fn prepare_active(&mut self) {
        self.platform.set_uart_lossy_wakeup(false);
        self.platform.set_usb_force_suspend(false);

        let mut ctrl = self.platform.lowpower_ctrl();
        ctrl.set_wakeup_src(0);
        ctrl.set_sleep_en(false);
        ctrl.set_idle_en(false);
        ctrl.set_event_clr(true);
        self.platform.set_lowpower_ctrl(ctrl);

        self.pmu.enable_irq();
    }

    /// Wakeup half of a tickless idle period. Returns the mode that was
    /// left, [`PowerMode::Active`] if the attempt was abandoned.
    pub fn post_sleep(&mut self) -> PowerMode {
        let mode = self.ctx.pm_mode;
        if mode == PowerMode::Active {
            return mode;
        }
        let features = mode.features();

        if features.contains(ModeFeatures::SYS_CLOCK_GATE) {
            self.timer.load();
        }

        let result = self.pmu.control_aon(AonControl::Ilr0V8);
        self.check(result);

        let record = if features.contains(ModeFeatures::CORE_POWER_GATE) {
            let result = self.retention.consume();
            Some(self.check(result))
        } else {
            None
        };
        self.update_wakeup_status(record.as_ref());

        if features.contains(ModeFeatures::SYS_POWER_GATE) {
            self.platform.restore_clocks();
            self.devices.resume_devices();
            self.restore_plic(Hart::Hart1);
        }

        if features.contains(ModeFeatures::TIMER_OFF) {
            self.restore_time(record.as_ref());
            let result = self.calibrate(SNAP_SHORT_INTERVAL_US);
            self.check(result);
            self.park_hart0();
            self.platform.set_gpio(&self.ctx.gpio);
        }

        if let Some(record) = &record {
            self.timer
                .restart(record.exec_watcher.contains(WatcherExec::EXEC));
        }

        self.prepare_active();

        self.ctx.pm_mode = PowerMode::Active;
        self.ctx.last_mode = mode;
        if let Some(callback) = self.ctx.callback {
            callback(PowerMode::Active);
        }

        if self.platform.mie_enabled() {
            fatal!("interrupts enabled while leaving {:?}", mode);
        }
        self.restore_plic(Hart::Hart0);

        mode
    }

    /// Powers the SoC down until an AON GPIO edge or, if given, an RTC alarm
    /// after `duration_ms` milliseconds. Wakeup goes through the boot ROM.
    fn enter_power_down(&mut self, duration_ms: u32) -> ! {
        self.platform.set_plic_enable(Hart::Hart0, PlicEnable::DISABLED);
        self.platform.set_plic_enable(Hart::Hart1, PlicEnable::DISABLED);

        let mut ctrl = self.platform.lowpower_ctrl();
        ctrl.set_sleep_en(true);
        let mut sources = WakeupSources::GPIO;
        self.save_gpio();

        self.ctx.ratio = self.ratio_for(self.ctx.pm_mode);
        let ticks = us_to_rtc(duration_ms as u64 * 1_000, self.ctx.ratio).min(RTC_COUNT_MAX);
        let now = self.rtc.count();
        self.rtc.set_alarm(rtc_advance(now, ticks));
        sources |= WakeupSources::RTC;

        ctrl.set_wakeup_src(sources.bits());
        self.platform.set_lowpower_ctrl(ctrl);

        self.pmu.disable_irq();
        let result = self
            .pmu
            .set_mode(PmuMode::ActiveToHibernationIoOff)
            .and_then(|_| self.pmu.set_mode(PmuMode::WakeupToActive));
        self.check(result);

        if self.features().contains(PmFeatures::VOLTAGE_CTRL) {
            let result = self.pmu.set_dldo_volt(DldoVolt::V0_75);
            self.check(result);
            self.platform.set_dldo_lp_mode(true);
            let result = self.pmu.set_dcdc_volt(DcdcVolt::V1_15);
            self.check(result);
        }

        self.platform.set_usb_force_suspend(true);
        self.platform.set_reset_vector(Hart::Hart0, ResetVector::BootRom);
        self.platform.set_reset_vector(Hart::Hart1, ResetVector::BootRom);

        let idle = (0..self.poll_limit).any(|_| self.platform.lowpower_ctrl().core_idle());
        if !idle {
            fatal!("hart 0 did not reach idle before power down");
        }

        info!("power down for {} ms", duration_ms);
        self.platform.wfi();
        fatal!("woke up from power down")
    }

    /// Vetoes low power entry on behalf of `device`.
    pub fn stay(&self, device: PmDevice) {
        self.stay.stay(device);
    }

    /// Withdraws the veto of `device`.
    pub fn relax(&self, device: PmDevice) {
        self.stay.relax(device);
    }

    /// Current veto mask, one bit per [`PmDevice`].
    pub fn status(&self) -> u32 {
        self.stay.status()
    }

    /// Holds the veto for at least `ms` milliseconds.
    pub fn stay_timeout(&mut self, ms: u32, timer: &mut impl LeaseTimer) {
        let now = self.platform.mtime();
        self.stay.stay_timeout(ms, now, &self.ctx.clock, timer);
    }

    /// Current machine time.
    pub fn current_time(&mut self) -> u64 {
        self.platform.mtime()
    }

    /// Stores a residual tick count for the idle hook.
    pub fn set_residual(&mut self, residual: u32) {
        self.ctx.residual = residual;
    }

    /// The stored residual tick count.
    pub fn residual(&self) -> u32 {
        self.ctx.residual
    }

    /// Wakeup cause of the last low power period.
    pub fn wakeup_status(&self) -> &WakeupStatus {
        &self.ctx.wakeup
    }

    /// Wakeup events of the last low power period.
    pub fn wakeup_event(&self) -> WakeupSources {
        self.ctx.wakeup.event()
    }

    /// Wakeup reason reported by the watcher.
    pub fn wakeup_reason(&self) -> u16 {
        self.ctx.wakeup.reason()
    }

    /// Wakeup type reported by the watcher.
    pub fn wakeup_type(&self) -> u16 {
        self.ctx.wakeup.kind()
    }

    /// Wakeup subtype reported by the watcher.
    pub fn wakeup_subtype(&self) -> u16 {
        self.ctx.wakeup.subtype()
    }

    /// Clears the reported wakeup type, here and in the retention record.
    pub fn reset_wakeup_type(&mut self) -> Result<(), Error> {
        self.ctx.wakeup.kind = 0;
        self.retention.modify(|record| record.wk_fb_type = 0)
    }

    /// Whether the watcher reset the SoC instead of resuming it.
    pub fn wakeup_is_reset(&self) -> bool {
        self.ctx.wakeup_flag.contains(WakeupFlags::RESET)
    }

    /// Whether the last low power period was hibernation.
    pub fn wakeup_is_hibernation(&self) -> bool {
        self.ctx.last_mode == PowerMode::Hibernation
    }

    /// Requests a power down on the next idle entry. A zero `duration_ms`
    /// sleeps for the longest RTC alarm.
    pub fn power_down(&mut self, duration_ms: u32) {
        self.ctx.power_down = Some(match duration_ms {
            0 => u32::MAX,
            ms => ms,
        });
    }

    /// Lets AON pin `pin` wake the SoC and keeps it configured in sleep.
    pub fn enable_wakeup_io(&mut self, pin: u8) -> Result<(), Error> {
        self.ctx.enable_wakeup_pin(pin)
    }

    /// Releases AON pin `pin`.
    pub fn disable_wakeup_io(&mut self, pin: u8) -> Result<(), Error> {
        self.ctx.disable_wakeup_pin(pin)
    }

    /// Modes the engine may enter.
    pub fn query_mode(&self) -> ModeSet {
        self.ctx.pm_mode_enabled
    }

    /// Permits `mode`.
    pub fn enable_mode(&mut self, mode: PowerMode) {
        self.ctx.pm_mode_enabled.insert(ModeSet::of(mode));
    }

    /// Forbids `mode`.
    pub fn disable_mode(&mut self, mode: PowerMode) {
        self.ctx.pm_mode_enabled.remove(ModeSet::of(mode));
    }

    /// Installs the transition callback. It runs with the target mode right
    /// before entry and with [`PowerMode::Active`] after wakeup.
    pub fn register_handler(&mut self, callback: fn(PowerMode)) {
        self.ctx.callback = Some(callback);
    }

    /// Removes the transition callback.
    pub fn unregister_handler(&mut self) {
        self.ctx.callback = None;
    }

    /// Changes the hibernation budget and restarts the limit window.
    pub fn set_hib_max_count(&mut self, count: u32) {
        let now = self.platform.mtime();
        self.ctx.set_hib_max_count(count, now);
    }

    fn set_feature(&mut self, feature: PmFeatures, on: bool) -> Result<(), Error> {
        if !self.stay.is_held() {
            return Err(Error::NotPermitted);
        }
        self.retention
            .modify(|record| record.feature.set(feature, on))
    }

    /// Voltage scaling of DLDO and DCDC on power down.
    pub fn set_voltage_ctrl(&mut self, on: bool) -> Result<(), Error> {
        self.set_feature(PmFeatures::VOLTAGE_CTRL, on)
    }

    /// Lowering the AON rail around low power periods.
    pub fn set_aon_voltage_ctrl(&mut self, on: bool) -> Result<(), Error> {
        if self.features().contains(PmFeatures::AON_VOLTAGE_CTRL_OCR) {
            return Err(Error::NotPermitted);
        }
        self.set_feature(PmFeatures::AON_VOLTAGE_CTRL, on)
    }

    /// Turning the PLL off in the watcher.
    pub fn set_pll_ctrl(&mut self, on: bool) -> Result<(), Error> {
        self.set_feature(PmFeatures::PLL_CTRL, on)
    }

    /// Keeping IOs powered in sleep and deeper modes.
    pub fn set_lowpower_io(&mut self, on: bool) -> Result<(), Error> {
        if !self.stay.is_held() {
            return Err(Error::NotPermitted);
        }
        self.ctx.lowpower_io_off = !on;
        Ok(())
    }

    /// Keeping IOs powered on wakeup from deep sleep 1 and hibernation.
    pub fn set_wakeup_io(&mut self, on: bool) -> Result<(), Error> {
        self.set_feature(PmFeatures::WAKEUP_IO_OFF, !on)
    }

    /// Watcher wakeup logging.
    pub fn set_wakeup_log(&mut self, on: bool) -> Result<(), Error> {
        self.set_feature(PmFeatures::WAKEUP_LOG_ON, on)
    }

    /// Flash deep power down while the core is off.
    pub fn set_flash_dpd(&mut self, on: bool) -> Result<(), Error> {
        self.set_feature(PmFeatures::FLASH_DPD, on)
    }

    /// Watcher logging.
    pub fn set_wc_log(&mut self, on: bool) -> Result<(), Error> {
        self.set_feature(PmFeatures::WC_LOG, on)
    }

    /// Watcher console on UART1.
    pub fn set_wc_uart1(&mut self, on: bool) -> Result<(), Error> {
        self.set_feature(PmFeatures::WC_UART1, on)
    }
}
