//! Tickless idle glue.
//!
//! The RTOS calls into the power manager around its tickless idle period.
//! [`TicklessIdle`] is the seam it talks to; [`idle`] runs one full period.

use crate::{
    platform::{DeviceSuspend, Platform, Rtc32k},
    pmu::PmuPort,
    retention::RetentionStore,
    sequencer::PowerManager,
    systimer::SysTimer,
};

/// Hooks the RTOS invokes around a tickless idle period.
pub trait TicklessIdle {
    /// Called with interrupts masked before the idle period of
    /// `expected_ticks` RTOS ticks.
    fn pre_sleep_processing(&mut self, expected_ticks: u32);

    /// Called with interrupts still masked after the idle period.
    fn post_sleep_processing(&mut self, expected_ticks: u32);
}

impl<P, T, R, D, S, M> TicklessIdle for PowerManager<'_, P, T, R, D, S, M>
where
    P: Platform,
    T: SysTimer,
    R: Rtc32k,
    D: DeviceSuspend,
    S: RetentionStore,
    M: PmuPort,
{
    fn pre_sleep_processing(&mut self, expected_ticks: u32) {
        match self.pre_sleep() {
            Ok(mode) => trace!("idle for {} ticks in {:?}", expected_ticks, mode),
            Err(abort) => trace!("stayed active: {:?}", abort),
        }
    }

    fn post_sleep_processing(&mut self, _expected_ticks: u32) {
        self.post_sleep();
    }
}

/// Runs one tickless idle period.
///
/// The machine timer is rebuilt from the RTC after every low power period,
/// so the kernel has no ticks left to account for and `0` is returned.
pub fn idle(pm: &mut impl TicklessIdle, expected_ticks: u32) -> u32 {
    pm.pre_sleep_processing(expected_ticks);
    pm.post_sleep_processing(expected_ticks);
    0
}
