//! # SoC collaborators
//!
//! ## Overview
//!
//! The transition sequencer drives the CPU, the interrupt controller, the
//! system management unit (SMU), the AON GPIO block and the 32 kHz RTC
//! through the traits in this module. A board support crate implements them
//! on top of the real registers; tests implement them on a simulated board.
//!
//! Peripheral drivers that have to be quiesced before the system power
//! domain goes down implement [`Suspend`]; a [`DeviceTable`] suspends them in
//! order and rolls back if one refuses.

use crate::retention::{CryptoConfig, FlashParams};

/// One of the two RISC-V harts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Hart {
    /// D25, parked in a wait-for-interrupt stub while the timer is off.
    Hart0 = 0,
    /// N22, the hart running the power manager.
    Hart1 = 1,
}

/// Where a hart starts executing after a core reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetVector {
    /// A stub that only waits for interrupts.
    WfiStub,
    /// The watcher firmware load address.
    Watcher,
    /// The boot ROM, used by the power-down path.
    BootRom,
}

/// Interrupt enable words of one hart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PlicEnable {
    /// Sources 0 to 31.
    pub src0: u32,
    /// Sources 32 to 63.
    pub src1: u32,
}

impl PlicEnable {
    /// Every source masked.
    pub const DISABLED: Self = Self { src0: 0, src1: 0 };
}

bitfield::bitfield! {
    /// SMU low power control register.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct LowpowerCtrl(u32);
    impl Debug;
    /// Armed wakeup sources, see [`WakeupSources`](crate::wakeup::WakeupSources).
    pub u16, wakeup_src, set_wakeup_src: 10, 0;
    /// Hart 0 has reached its idle loop.
    pub core_idle, _: 11;
    /// Chip idle enable.
    pub idle_en, set_idle_en: 13;
    /// Chip sleep enable.
    pub sleep_en, set_sleep_en: 14;
    /// Clears the latched wakeup events.
    pub event_clr, set_event_clr: 18;
    /// Latched wakeup events.
    pub u16, wakeup_event, _: 29, 19;
}

#[cfg(feature = "defmt")]
impl defmt::Format for LowpowerCtrl {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "LowpowerCtrl({=u32:#x})", self.0)
    }
}

/// Configuration of the eight AON GPIOs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpioState {
    /// Pull-up enables.
    pub pull_up: u32,
    /// Pull-down enables.
    pub pull_down: u32,
    /// Input enables.
    pub input_en: u32,
    /// Output enables.
    pub output_en: u32,
    /// Pin function, four bits per pin.
    pub mode: u32,
    /// Rising edge interrupt enables.
    pub rise: u32,
    /// Falling edge interrupt enables.
    pub fall: u32,
}

impl GpioState {
    const GPIO_FUNCTION: u32 = 0x8;

    /// Turns every pin not in `reserved` into a pulled-down input without
    /// interrupts.
    pub fn pulled_down(&self, reserved: u8) -> Self {
        let mut state = *self;
        for pin in (0..8).filter(|pin| reserved & (1 << pin) == 0) {
            let bit = 1 << pin;
            state.pull_up &= !bit;
            state.pull_down |= bit;
            state.input_en |= bit;
            state.output_en &= !bit;
            state.mode &= !(0xf << (pin * 4));
            state.mode |= Self::GPIO_FUNCTION << (pin * 4);
            state.rise &= !bit;
            state.fall &= !bit;
        }
        state
    }
}

/// CPU, interrupt controller and SMU access.
pub trait Platform {
    /// Waits for an interrupt.
    fn wfi(&mut self);

    /// Whether machine interrupts are globally enabled.
    fn mie_enabled(&self) -> bool;

    /// Reads the machine timer.
    fn mtime(&mut self) -> u64;

    /// Rewrites the machine timer.
    fn set_mtime(&mut self, mtime: u64);

    /// Reads the pending compare deadline of the power manager's hart.
    fn mtimecmp(&mut self) -> u64;

    /// Disables the machine timer interrupt and returns the compare deadline
    /// that was pending.
    fn stop_mtime_irq(&mut self) -> u64;

    /// Restores a compare deadline.
    fn set_mtimecmp(&mut self, mtimecmp: u64);

    /// Reads the interrupt enables of `hart`.
    fn plic_enable(&mut self, hart: Hart) -> PlicEnable;

    /// Writes the interrupt enables of `hart`.
    fn set_plic_enable(&mut self, hart: Hart, enable: PlicEnable);

    /// Programs the reset vector of `hart`.
    fn set_reset_vector(&mut self, hart: Hart, vector: ResetVector);

    /// Pulses the core reset.
    fn reset_core(&mut self);

    /// Saves the CPU registers and powers the core down.
    ///
    /// Returns through the wakeup entry once the core is powered up again.
    fn lowpower_start(&mut self);

    /// Reads the SMU low power control register.
    fn lowpower_ctrl(&mut self) -> LowpowerCtrl;

    /// Writes the SMU low power control register.
    fn set_lowpower_ctrl(&mut self, ctrl: LowpowerCtrl);

    /// Reads the AON GPIO configuration.
    fn gpio(&mut self) -> GpioState;

    /// Writes the AON GPIO configuration.
    fn set_gpio(&mut self, state: &GpioState);

    /// Clears pending AON GPIO interrupts.
    fn clear_gpio_irq(&mut self);

    /// Lets UART0 and UART1 wake the SoC, losing the first bytes.
    fn set_uart_lossy_wakeup(&mut self, enable: bool);

    /// Forces the USB PHY into suspend.
    fn set_usb_force_suspend(&mut self, suspend: bool);

    /// Low power mode of the capless digital LDO.
    fn set_dldo_lp_mode(&mut self, enable: bool);

    /// Rebuilds the clock tree after the system power domain was off.
    fn restore_clocks(&mut self);

    /// Keeps the retention RAM powered in every mode.
    fn enable_retention(&mut self);

    /// Copies the watcher firmware to its load address.
    fn load_watcher(&mut self);

    /// Address the watcher jumps to when the application has to resume.
    fn wakeup_entry(&self) -> u32;

    /// Flash controller settings the watcher needs.
    fn flash_params(&mut self) -> FlashParams;

    /// Flash encryption settings.
    fn crypto_config(&mut self) -> CryptoConfig;
}

/// The 32 kHz RTC.
pub trait Rtc32k {
    /// Current count.
    fn count(&mut self) -> u32;

    /// Raw count register, which can lag behind after a wakeup.
    fn raw_count(&mut self) -> u32;

    /// Arms the alarm at count `target`.
    fn set_alarm(&mut self, target: u32);
}

/// A driver refused to suspend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Refused;

/// A peripheral driver that has to be quiesced before the system power
/// domain is switched off.
pub trait Suspend {
    /// Prepares for power loss.
    fn suspend(&mut self) -> Result<(), Refused>;

    /// Brings the device back after power loss.
    fn resume(&mut self);
}

/// Peripheral suspend collaborator.
pub trait DeviceSuspend {
    /// Suspends every device. On refusal nothing stays suspended.
    fn suspend_devices(&mut self) -> Result<(), Refused>;

    /// Resumes every device.
    fn resume_devices(&mut self);
}

impl DeviceSuspend for () {
    fn suspend_devices(&mut self) -> Result<(), Refused> {
        Ok(())
    }

    fn resume_devices(&mut self) {}
}

/// Drivers suspended in table order.
pub struct DeviceTable<'a, 'd> {
    devices: &'a mut [&'d mut dyn Suspend],
}

impl<'a, 'd> DeviceTable<'a, 'd> {
    /// Wraps the driver list.
    pub fn new(devices: &'a mut [&'d mut dyn Suspend]) -> Self {
        Self { devices }
    }
}

impl DeviceSuspend for DeviceTable<'_, '_> {
    fn suspend_devices(&mut self) -> Result<(), Refused> {
        let Some(refused) = self
            .devices
            .iter_mut()
            .position(|device| device.suspend().is_err())
        else {
            return Ok(());
        };

        warn!("device {} refused to suspend", refused);
        for device in self.devices[..=refused].iter_mut().rev() {
            device.resume();
        }
        Err(Refused)
    }

    fn resume_devices(&mut self) {
        for device in self.devices.iter_mut() {
            device.resume();
        }
    }
}

#[cfg(test)]
mod tests {
    use core::cell::RefCell;

    use super::*;

    struct Driver<'l> {
        id: u8,
        refuse: bool,
        log: &'l RefCell<Vec<(u8, bool)>>,
    }

    impl Suspend for Driver<'_> {
        fn suspend(&mut self) -> Result<(), Refused> {
            self.log.borrow_mut().push((self.id, true));
            if self.refuse {
                Err(Refused)
            } else {
                Ok(())
            }
        }

        fn resume(&mut self) {
            self.log.borrow_mut().push((self.id, false));
        }
    }

    #[test]
    fn refusal_rolls_back_in_reverse() {
        let log = RefCell::new(Vec::new());
        let mut a = Driver { id: 0, refuse: false, log: &log };
        let mut b = Driver { id: 1, refuse: true, log: &log };
        let mut c = Driver { id: 2, refuse: false, log: &log };
        let mut devices: [&mut dyn Suspend; 3] = [&mut a, &mut b, &mut c];

        let mut table = DeviceTable::new(&mut devices);
        assert_eq!(table.suspend_devices(), Err(Refused));
        assert_eq!(
            log.borrow().as_slice(),
            &[(0, true), (1, true), (1, false), (0, false)]
        );
    }

    #[test]
    fn all_suspend_and_resume() {
        let log = RefCell::new(Vec::new());
        let mut a = Driver { id: 0, refuse: false, log: &log };
        let mut b = Driver { id: 1, refuse: false, log: &log };
        let mut devices: [&mut dyn Suspend; 2] = [&mut a, &mut b];

        let mut table = DeviceTable::new(&mut devices);
        assert_eq!(table.suspend_devices(), Ok(()));
        table.resume_devices();
        assert_eq!(
            log.borrow().as_slice(),
            &[(0, true), (1, true), (0, false), (1, false)]
        );
    }

    #[test]
    fn unreserved_pins_are_pulled_down() {
        let state = GpioState {
            pull_up: 0xff,
            output_en: 0x0f,
            mode: 0x1111_1111,
            rise: 0xff,
            ..Default::default()
        };

        let parked = state.pulled_down(0b0000_0101);
        assert_eq!(parked.pull_up, 0b0000_0101);
        assert_eq!(parked.pull_down, 0b1111_1010);
        assert_eq!(parked.output_en, 0b0000_0101);
        assert_eq!(parked.mode, 0x8888_8181);
        assert_eq!(parked.rise, 0b0000_0101);
        assert_eq!(parked.input_en, 0b1111_1010);
    }

    #[test]
    fn lowpower_ctrl_fields() {
        let mut ctrl = LowpowerCtrl(1 << 11 | 0x3 << 19);
        assert!(ctrl.core_idle());
        assert_eq!(ctrl.wakeup_event(), 0x3);

        ctrl.set_sleep_en(true);
        ctrl.set_wakeup_src(0x7ff);
        assert_eq!(ctrl.0 & 0x7ff, 0x7ff);
        assert_eq!(ctrl.0 & (1 << 14), 1 << 14);
    }
}
