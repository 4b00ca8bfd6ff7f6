//! # Power Management Unit
//!
//! ## Overview
//!
//! The PMU is reached through a handful of direct registers. Its internal
//! registers (wakeup interface, rail regulators) are accessed indirectly: the
//! data goes to `MPADR`, the address and direction to `MPACR`, and
//! completion is signalled by the `PICL_OK` flag in `IFR`.
//!
//! Transactions are not reentrant. Only the idle path drives the PMU, so no
//! lock is taken.
//!
//! [`PmuPort`] is the register capability; [`Pmu`] implements the access
//! protocol and the operations the power manager needs on top of it.

use crate::{config::PmFeatures, mode::PowerMode, Error};

/// Direct register offsets.
pub mod reg {
    /// Mode status.
    pub const MSR: u32 = 0x00;
    /// Indirect access control.
    pub const MPACR: u32 = 0x04;
    /// Indirect access data.
    pub const MPADR: u32 = 0x08;
    /// Interrupt mask.
    pub const IMR: u32 = 0x0c;
    /// Interrupt flags, write one to clear.
    pub const IFR: u32 = 0x10;

    /// Indirect access done (`IMR` mask and `IFR` flag).
    pub const PICL_OK: u32 = 1 << 6;
    /// Mode change done.
    pub const SCU_OK: u32 = 1 << 7;
    /// Mode change failed.
    pub const SCU_FL: u32 = 1 << 8;
}

bitfield::bitfield! {
    /// Indirect access control register (`MPACR`).
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct AccessControl(u32);
    impl Debug;

    /// Starts the access.
    pub bool, start, set_start: 28;
    /// Read access when set, write access otherwise.
    pub bool, read, set_read: 24;
    /// Indirect register address.
    pub u16, address, set_address: 15, 0;
}

impl AccessControl {
    fn new(address: u16, read: bool) -> Self {
        let mut ctrl = Self(0);
        ctrl.set_start(true);
        ctrl.set_read(read);
        ctrl.set_address(address);
        ctrl
    }
}

const BLOCK_WIU: u16 = 0x01;
const BLOCK_DMU: u16 = 0x30;

const WIU_SLEEP: u16 = 0x06;
const WIU_WAKEUP: u16 = 0x08;
const WIU_IDLE: u16 = 0x0a;

#[derive(Clone, Copy)]
enum Rail {
    Aon  = 0,
    Dcdc = 2,
    Dldo = 4,
}

const DMU_MINOR: u16 = 0x02;
const DMU_MAXOR: u16 = 0x04;
const DMU_OCR: u16 = 0x06;
const DMU_RNO_CR: u16 = 0x0e;
const DMU_TCR: u16 = 0x18;
const DMU_TRR: u16 = 0x1a;

const fn wiu(reg: u16) -> u16 {
    (BLOCK_WIU << 8) | reg
}

const fn dmu(rail: Rail, reg: u16) -> u16 {
    ((BLOCK_DMU + rail as u16) << 8) | reg
}

/// Mode transitions the PMU sequences in hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum PmuMode {
    ActiveToDeepSleep0             = 0,
    ActiveToDeepSleep0IoOff        = 1,
    ActiveToDeepSleep1             = 2,
    ActiveToDeepSleep1IoOff        = 3,
    ActiveToHibernation            = 4,
    ActiveToHibernationIoOff       = 5,
    ActiveIoOffToLightSleepIoOff   = 6,
    ActiveToSleep                  = 7,
    ActiveToSleepIoOff             = 8,
    ActiveToIdle                   = 9,
    ActiveToIdleIoOff              = 10,
    ActiveToLightSleep             = 11,
    ActiveToActiveIoOff            = 12,
    ActiveIoOffToActive            = 13,
    WakeupToActive                 = 14,
    WakeupToActiveIoOff            = 15,
}

impl PmuMode {
    fn control_register(self) -> u16 {
        match self {
            PmuMode::ActiveToIdle | PmuMode::ActiveToIdleIoOff => wiu(WIU_IDLE),
            PmuMode::WakeupToActive | PmuMode::WakeupToActiveIoOff => wiu(WIU_WAKEUP),
            _ => wiu(WIU_SLEEP),
        }
    }

    /// The transition pair (entry, wakeup) programmed for `mode`.
    ///
    /// `lowpower_io_off` powers IOs off on entry to sleep and deeper modes;
    /// `features` decides whether IOs stay off on wakeup from deep sleep 1 and
    /// hibernation.
    pub fn for_mode(mode: PowerMode, lowpower_io_off: bool, features: PmFeatures) -> (Self, Self) {
        let entry = match (mode, lowpower_io_off) {
            (PowerMode::Active | PowerMode::Idle, _) => PmuMode::ActiveToIdle,
            (PowerMode::LightSleep, _) => PmuMode::ActiveToLightSleep,
            (PowerMode::Sleep, false) => PmuMode::ActiveToSleep,
            (PowerMode::Sleep, true) => PmuMode::ActiveToSleepIoOff,
            (PowerMode::DeepSleep0, false) => PmuMode::ActiveToDeepSleep0,
            (PowerMode::DeepSleep0, true) => PmuMode::ActiveToDeepSleep0IoOff,
            (PowerMode::DeepSleep1, false) => PmuMode::ActiveToDeepSleep1,
            (PowerMode::DeepSleep1, true) => PmuMode::ActiveToDeepSleep1IoOff,
            (PowerMode::Hibernation, false) => PmuMode::ActiveToHibernation,
            (PowerMode::Hibernation, true) => PmuMode::ActiveToHibernationIoOff,
        };

        let wakeup = match mode {
            PowerMode::DeepSleep1 | PowerMode::Hibernation
                if features.contains(PmFeatures::WAKEUP_IO_OFF) =>
            {
                PmuMode::WakeupToActiveIoOff
            }
            _ => PmuMode::WakeupToActive,
        };

        (entry, wakeup)
    }
}

/// AON regulator output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum AonVolt {
    V0_60 = 1,
    V0_65 = 2,
    V0_70 = 3,
    V0_75 = 4,
    V0_80 = 5,
    V0_85 = 6,
    V0_90 = 7,
    V0_95 = 8,
    V1_00 = 9,
}

/// Digital LDO output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum DldoVolt {
    V0_65 = 1,
    V0_70 = 2,
    V0_75 = 3,
    V0_80 = 4,
    V0_85 = 5,
    V0_90 = 6,
}

/// DCDC converter output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum DcdcVolt {
    V0_90 = 0x07,
    V0_95 = 0x08,
    V1_00 = 0x09,
    V1_05 = 0x0a,
    V1_10 = 0x0b,
    V1_15 = 0x0c,
    V1_20 = 0x0d,
    V1_25 = 0x0e,
    V1_30 = 0x0f,
    V1_35 = 0x10,
    V1_40 = 0x11,
    V1_45 = 0x12,
}

/// AON regulator setting.
///
/// The quick-response regulator (`qLR`) is used around low power periods,
/// the idle regulator (`iLR`) while active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AonControl {
    /// qLR at 0.7 V, stepped down through 0.75 V.
    Qlr0V7,
    /// qLR at 0.8 V.
    Qlr0V8,
    /// Back to iLR at 0.8 V.
    Ilr0V8,
}

/// Direct register access to the PMU.
pub trait PmuPort {
    /// Reads the direct register at `offset`.
    fn read(&mut self, offset: u32) -> u32;

    /// Writes the direct register at `offset`.
    fn write(&mut self, offset: u32, value: u32);

    /// Polls `IFR` until `PICL_OK` is set, at most `limit` times.
    ///
    /// Returns the flag register that had the bit set.
    fn wait_ready(&mut self, limit: u32) -> Result<u32, Error> {
        for _ in 0..limit {
            let ifr = self.read(reg::IFR);
            if ifr & reg::PICL_OK != 0 {
                return Ok(ifr);
            }
        }
        Err(Error::PmuTimeout)
    }
}

impl<P: PmuPort + ?Sized> PmuPort for &mut P {
    fn read(&mut self, offset: u32) -> u32 {
        (**self).read(offset)
    }

    fn write(&mut self, offset: u32, value: u32) {
        (**self).write(offset, value)
    }

    fn wait_ready(&mut self, limit: u32) -> Result<u32, Error> {
        (**self).wait_ready(limit)
    }
}

/// PMU driver.
#[derive(Debug)]
pub struct Pmu<P> {
    port: P,
    poll_limit: u32,
    aon_ocr: bool,
}

impl<P: PmuPort> Pmu<P> {
    /// Creates the driver.
    ///
    /// With `aon_ocr` the AON rail is controlled by its operating control
    /// register and [`Pmu::control_aon`] does nothing.
    pub fn new(port: P, poll_limit: u32, aon_ocr: bool) -> Self {
        Self {
            port,
            poll_limit,
            aon_ocr,
        }
    }

    fn begin(&mut self) {
        let imr = self.port.read(reg::IMR);
        self.port.write(reg::IMR, imr | reg::PICL_OK);

        let ifr = self.port.read(reg::IFR);
        if ifr & reg::PICL_OK != 0 {
            self.port.write(reg::IFR, ifr);
        }
    }

    fn finish(&mut self) -> Result<(), Error> {
        let ifr = self.port.wait_ready(self.poll_limit)?;
        self.port.write(reg::IFR, ifr);
        Ok(())
    }

    /// Writes an indirect register.
    pub fn indirect_write(&mut self, addr: u16, value: u32) -> Result<(), Error> {
        self.begin();
        self.port.write(reg::MPADR, value);
        self.port.write(reg::MPACR, AccessControl::new(addr, false).0);
        self.finish()
    }

    /// Reads an indirect register.
    pub fn indirect_read(&mut self, addr: u16) -> Result<u32, Error> {
        self.begin();
        self.port.write(reg::MPACR, AccessControl::new(addr, true).0);
        self.finish()?;
        Ok(self.port.read(reg::MPADR))
    }

    /// Programs a transition into the control register it belongs to.
    pub fn set_mode(&mut self, mode: PmuMode) -> Result<(), Error> {
        trace!("PMU mode {:?}", mode);
        self.indirect_write(mode.control_register(), mode as u32)
    }

    fn set_rail(&mut self, rail: Rail, value: u32) -> Result<(), Error> {
        self.indirect_write(dmu(rail, DMU_RNO_CR), value)?;
        self.indirect_write(dmu(rail, DMU_OCR), 0x01)
    }

    /// Sets the digital LDO output.
    pub fn set_dldo_volt(&mut self, volt: DldoVolt) -> Result<(), Error> {
        self.set_rail(Rail::Dldo, volt as u32)
    }

    /// Sets the DCDC output.
    pub fn set_dcdc_volt(&mut self, volt: DcdcVolt) -> Result<(), Error> {
        self.set_rail(Rail::Dcdc, volt as u32)
    }

    /// Hands the AON rail to the quick-response regulator at `volt`.
    pub fn set_aon_qlr(&mut self, volt: AonVolt) -> Result<(), Error> {
        self.indirect_write(dmu(Rail::Aon, DMU_TRR), 0x100 | volt as u32)?;

        let tcr = dmu(Rail::Aon, DMU_TCR);
        self.indirect_write(tcr, 0x81)?;
        self.indirect_write(tcr, 0x81)?;

        for _ in 0..self.poll_limit {
            if self.indirect_read(tcr)? == 0x82 {
                return Ok(());
            }
        }
        Err(Error::PmuTimeout)
    }

    /// Switches the AON regulator.
    pub fn control_aon(&mut self, control: AonControl) -> Result<(), Error> {
        if self.aon_ocr {
            return Ok(());
        }

        match control {
            AonControl::Qlr0V7 => {
                self.set_aon_qlr(AonVolt::V0_75)?;
                self.set_aon_qlr(AonVolt::V0_70)
            }
            AonControl::Qlr0V8 => self.set_aon_qlr(AonVolt::V0_80),
            AonControl::Ilr0V8 => {
                self.set_aon_qlr(AonVolt::V0_80)?;
                self.indirect_write(dmu(Rail::Aon, DMU_TRR), 0x200 | AonVolt::V0_80 as u32)
            }
        }
    }

    /// Unmasks the mode change interrupt.
    pub fn enable_irq(&mut self) {
        let imr = self.port.read(reg::IMR);
        self.port.write(reg::IMR, imr & !reg::SCU_OK);
    }

    /// Masks the mode change interrupt.
    pub fn disable_irq(&mut self) {
        let imr = self.port.read(reg::IMR);
        self.port.write(reg::IMR, imr | reg::SCU_OK);
    }

    /// Programs the rail limits.
    pub fn init(&mut self) -> Result<(), Error> {
        self.disable_irq();

        self.indirect_write(dmu(Rail::Dldo, DMU_MINOR), DldoVolt::V0_70 as u32)?;
        self.indirect_write(dmu(Rail::Dldo, DMU_MAXOR), DldoVolt::V0_90 as u32)?;

        self.indirect_write(dmu(Rail::Dcdc, DMU_MINOR), DcdcVolt::V0_90 as u32)?;
        self.indirect_write(dmu(Rail::Dcdc, DMU_MAXOR), DcdcVolt::V1_40 as u32)?;

        self.indirect_write(dmu(Rail::Aon, DMU_MINOR), AonVolt::V0_60 as u32)?;
        self.indirect_write(dmu(Rail::Aon, DMU_MAXOR), AonVolt::V1_00 as u32)?;

        if self.aon_ocr {
            self.indirect_write(dmu(Rail::Aon, DMU_RNO_CR), AonVolt::V0_70 as u32)?;
        }
        Ok(())
    }

    /// The underlying port.
    pub fn port(&mut self) -> &mut P {
        &mut self.port
    }
}
