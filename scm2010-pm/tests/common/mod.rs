//! A simulated SCM2010 board.
//!
//! One microsecond is 10 machine timer ticks, 20 PIT ticks and one RTC tick,
//! so a calibrated ratio is exactly 2000. The machine timer stops between
//! `stop_mtime_irq` and `set_mtime`; everything else keeps running.

#![allow(dead_code)]

use std::{cell::RefCell, rc::Rc};

use byte::{TryRead, TryWrite};
use scm2010_pm::{
    calibration::SnapPair,
    platform::{
        DeviceSuspend,
        GpioState,
        Hart,
        LowpowerCtrl,
        Platform,
        PlicEnable,
        Refused,
        ResetVector,
        Rtc32k,
    },
    pmu::{reg, PmuPort},
    retention::{CryptoConfig, FlashParams, RetentionRecord, RetentionStore, RECORD_LEN},
    sequencer::{Board, PowerManager},
    systimer::{SysTimer, TimerKind, TimerQueue, WakeupInfo},
    Config,
    StayActive,
};

pub const MTIME_PER_US: u64 = 10;

const CORE_IDLE: u32 = 1 << 11;
const EVENT_CLR: u32 = 1 << 18;
// read only or self clearing
const VOLATILE: u32 = CORE_IDLE | EVENT_CLR | (0x7ff << 19);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Wfi,
    LowpowerStart,
    ResetCore,
    Vector(Hart, ResetVector),
    Suspend,
    Resume,
    RestoreClocks,
    TimerLoad,
    TimerRestart(bool),
}

pub type Watcher = Box<dyn FnMut(&mut RetentionRecord)>;

pub struct Sim {
    pub now_us: u64,
    pub mtime: u64,
    pub mtime_running: bool,
    pub mtimecmp: u64,
    pub mtime_irq: bool,
    pub pit: u32,
    pub rtc: u32,
    pub alarm: Option<u32>,

    pub wfi_us: u64,
    pub lowpower_us: u64,
    pub next_event: u16,
    pub watcher: Option<Watcher>,

    pub events: Vec<Event>,
    pub plic: [PlicEnable; 2],
    pub ctrl: u32,
    pub wakeup_event: u16,
    pub core_idle: bool,
    pub gpio: GpioState,
    pub usb_suspended: bool,
    pub uart_lossy: bool,
    pub ratio_reg: u32,

    pub timers: TimerQueue<4>,
    pub refuse_suspend: bool,

    pub pmu_imr: u32,
    pub pmu_mpadr: u32,
    pub pmu_writes: Vec<(u16, u32)>,

    pub ram: [u8; RECORD_LEN],
}

impl Sim {
    fn new() -> Self {
        Self {
            now_us: 0,
            mtime: 0,
            mtime_running: true,
            mtimecmp: u64::MAX,
            mtime_irq: true,
            pit: 0,
            rtc: 1,
            alarm: None,
            wfi_us: 0,
            lowpower_us: 0,
            next_event: 0,
            watcher: None,
            events: Vec::new(),
            plic: [
                PlicEnable {
                    src0: 0x0000_00ff,
                    src1: 0x1,
                },
                PlicEnable {
                    src0: 0x0000_ff00,
                    src1: 0x2,
                },
            ],
            ctrl: 0,
            wakeup_event: 0,
            core_idle: true,
            gpio: GpioState {
                pull_up: 0x03,
                output_en: 0x01,
                mode: 0x0000_0011,
                rise: 0x02,
                ..Default::default()
            },
            usb_suspended: false,
            uart_lossy: false,
            ratio_reg: 0,
            timers: TimerQueue::new(),
            refuse_suspend: false,
            pmu_imr: 0,
            pmu_mpadr: 0,
            pmu_writes: Vec::new(),
            ram: [0; RECORD_LEN],
        }
    }

    pub fn advance(&mut self, us: u64) {
        self.now_us += us;
        self.pit = self.pit.wrapping_add((us * 20) as u32);
        self.rtc += us as u32;
        if self.mtime_running {
            self.mtime += us * MTIME_PER_US;
        }
    }

    /// Machine time a free running timer would show.
    pub fn true_mtime(&self) -> u64 {
        self.now_us * MTIME_PER_US
    }

    pub fn record(&self) -> RetentionRecord {
        let (record, _) = RetentionRecord::try_read(&self.ram, ()).unwrap();
        record
    }

    pub fn pmu_wrote(&self, value: u32) -> bool {
        self.pmu_writes.iter().any(|&(_, v)| v == value)
    }
}

pub type Shared = Rc<RefCell<Sim>>;

pub struct SimPlatform(pub Shared);
pub struct SimTimer(pub Shared);
pub struct SimRtc(pub Shared);
pub struct SimDevices(pub Shared);
pub struct SimRam(pub Shared);
pub struct SimPmu(pub Shared);

impl Platform for SimPlatform {
    fn wfi(&mut self) {
        let mut s = self.0.borrow_mut();
        s.events.push(Event::Wfi);
        s.wakeup_event = s.next_event;
        let us = s.wfi_us;
        s.advance(us);
    }

    fn mie_enabled(&self) -> bool {
        false
    }

    fn mtime(&mut self) -> u64 {
        self.0.borrow().mtime
    }

    fn set_mtime(&mut self, mtime: u64) {
        let mut s = self.0.borrow_mut();
        s.mtime = mtime;
        s.mtime_running = true;
    }

    fn mtimecmp(&mut self) -> u64 {
        self.0.borrow().mtimecmp
    }

    fn stop_mtime_irq(&mut self) -> u64 {
        let mut s = self.0.borrow_mut();
        s.mtime_running = false;
        s.mtime_irq = false;
        s.mtimecmp
    }

    fn set_mtimecmp(&mut self, mtimecmp: u64) {
        let mut s = self.0.borrow_mut();
        s.mtimecmp = mtimecmp;
        s.mtime_irq = true;
    }

    fn plic_enable(&mut self, hart: Hart) -> PlicEnable {
        self.0.borrow().plic[hart as usize]
    }

    fn set_plic_enable(&mut self, hart: Hart, enable: PlicEnable) {
        self.0.borrow_mut().plic[hart as usize] = enable;
    }

    fn set_reset_vector(&mut self, hart: Hart, vector: ResetVector) {
        self.0.borrow_mut().events.push(Event::Vector(hart, vector));
    }

    fn reset_core(&mut self) {
        self.0.borrow_mut().events.push(Event::ResetCore);
    }

    fn lowpower_start(&mut self) {
        let mut s = self.0.borrow_mut();
        s.events.push(Event::LowpowerStart);

        if let Some(mut watcher) = s.watcher.take() {
            let mut record = s.record();
            watcher(&mut record);
            record.try_write(&mut s.ram, ()).unwrap();
            s.watcher = Some(watcher);
        }

        let us = s.lowpower_us;
        s.advance(us);
    }

    fn lowpower_ctrl(&mut self) -> LowpowerCtrl {
        let s = self.0.borrow();
        let mut value = s.ctrl | (s.wakeup_event as u32) << 19;
        if s.core_idle {
            value |= CORE_IDLE;
        }
        LowpowerCtrl(value)
    }

    fn set_lowpower_ctrl(&mut self, ctrl: LowpowerCtrl) {
        let mut s = self.0.borrow_mut();
        if ctrl.event_clr() {
            s.wakeup_event = 0;
        }
        s.ctrl = ctrl.0 & !VOLATILE;
    }

    fn gpio(&mut self) -> GpioState {
        self.0.borrow().gpio
    }

    fn set_gpio(&mut self, state: &GpioState) {
        self.0.borrow_mut().gpio = *state;
    }

    fn clear_gpio_irq(&mut self) {}

    fn set_uart_lossy_wakeup(&mut self, enable: bool) {
        self.0.borrow_mut().uart_lossy = enable;
    }

    fn set_usb_force_suspend(&mut self, suspend: bool) {
        self.0.borrow_mut().usb_suspended = suspend;
    }

    fn set_dldo_lp_mode(&mut self, _enable: bool) {}

    fn restore_clocks(&mut self) {
        self.0.borrow_mut().events.push(Event::RestoreClocks);
    }

    fn enable_retention(&mut self) {}

    fn load_watcher(&mut self) {}

    fn wakeup_entry(&self) -> u32 {
        0x1000_0000
    }

    fn flash_params(&mut self) -> FlashParams {
        FlashParams::new(0x0b, 0x1234, 0x5)
    }

    fn crypto_config(&mut self) -> CryptoConfig {
        CryptoConfig::default()
    }
}

impl SysTimer for SimTimer {
    fn wakeup_info(&mut self, mtime: u64) -> Option<WakeupInfo> {
        let s = self.0.borrow();
        s.timers.wakeup_info(s.pit, mtime)
    }

    fn snap(&mut self) -> SnapPair {
        let s = self.0.borrow();
        SnapPair {
            pit: s.pit,
            rtc: s.rtc,
        }
    }

    fn delay_us(&mut self, us: u32) {
        self.0.borrow_mut().advance(us as u64);
    }

    fn set_ratio_reg(&mut self, reg: u32) {
        self.0.borrow_mut().ratio_reg = reg;
    }

    fn restart(&mut self, executed_watcher: bool) {
        let mut s = self.0.borrow_mut();
        s.events.push(Event::TimerRestart(executed_watcher));
        s.timers.restart(executed_watcher);
    }

    fn load(&mut self) {
        self.0.borrow_mut().events.push(Event::TimerLoad);
    }
}

impl Rtc32k for SimRtc {
    fn count(&mut self) -> u32 {
        self.0.borrow().rtc
    }

    fn raw_count(&mut self) -> u32 {
        self.0.borrow().rtc
    }

    fn set_alarm(&mut self, target: u32) {
        self.0.borrow_mut().alarm = Some(target);
    }
}

impl DeviceSuspend for SimDevices {
    fn suspend_devices(&mut self) -> Result<(), Refused> {
        let mut s = self.0.borrow_mut();
        if s.refuse_suspend {
            return Err(Refused);
        }
        s.events.push(Event::Suspend);
        Ok(())
    }

    fn resume_devices(&mut self) {
        self.0.borrow_mut().events.push(Event::Resume);
    }
}

impl RetentionStore for SimRam {
    fn load(&self, buf: &mut [u8; RECORD_LEN]) {
        buf.copy_from_slice(&self.0.borrow().ram);
    }

    fn store(&mut self, buf: &[u8; RECORD_LEN]) {
        self.0.borrow_mut().ram.copy_from_slice(buf);
    }
}

impl PmuPort for SimPmu {
    fn read(&mut self, offset: u32) -> u32 {
        let s = self.0.borrow();
        match offset {
            reg::IMR => s.pmu_imr,
            reg::IFR => reg::PICL_OK,
            reg::MPADR => s.pmu_mpadr,
            _ => 0,
        }
    }

    fn write(&mut self, offset: u32, value: u32) {
        let mut s = self.0.borrow_mut();
        match offset {
            reg::IMR => s.pmu_imr = value,
            reg::MPADR => s.pmu_mpadr = value,
            reg::MPACR => {
                // bit 24 selects a read, the low half holds the address
                if value & (1 << 24) != 0 {
                    // the AON regulator handover always completes
                    s.pmu_mpadr = 0x82;
                } else {
                    let data = s.pmu_mpadr;
                    s.pmu_writes.push((value as u16, data));
                }
            }
            _ => {}
        }
    }
}

pub type SimManager<'s> =
    PowerManager<'s, SimPlatform, SimTimer, SimRtc, SimDevices, SimRam, SimPmu>;

pub fn board() -> (Shared, Board<SimPlatform, SimTimer, SimRtc, SimDevices, SimRam, SimPmu>) {
    let sim = Rc::new(RefCell::new(Sim::new()));
    let board = Board {
        platform: SimPlatform(sim.clone()),
        timer: SimTimer(sim.clone()),
        rtc: SimRtc(sim.clone()),
        devices: SimDevices(sim.clone()),
        retention: SimRam(sim.clone()),
        pmu: SimPmu(sim.clone()),
    };
    (sim, board)
}

/// An initialized manager with the application veto released.
pub fn manager<'s>(config: Config, stay: &'s StayActive) -> (Shared, SimManager<'s>) {
    let (sim, board) = board();
    let mut pm = PowerManager::new(config, stay, board);
    pm.init().unwrap();
    pm.relax(scm2010_pm::PmDevice::App);
    sim.borrow_mut().events.clear();
    (sim, pm)
}

/// Sets the RTOS deadline `us` from now.
pub fn deadline_in(sim: &Shared, us: u64) {
    let mut s = sim.borrow_mut();
    s.mtimecmp = s.mtime + us * MTIME_PER_US;
}

/// Queues a device timer `us` from now.
pub fn device_timer_in(sim: &Shared, id: u8, kind: TimerKind, us: u64) {
    let mut s = sim.borrow_mut();
    let now = s.pit;
    s.timers
        .start_at(id, kind, now.wrapping_add((us * 20) as u32), now)
        .unwrap();
}
