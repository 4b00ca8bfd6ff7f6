//! Stay-active veto.
//!
//! Any subsystem can keep the SoC out of every low power mode by holding its
//! bit in [`StayActive`]. Bits are set and cleared from arbitrary task and
//! interrupt contexts, hence the atomic mask. A timed lease
//! ([`StayActive::stay_timeout`]) holds [`PmDevice::Timed`] until a one-shot
//! timer expires.

use portable_atomic::{AtomicU32, AtomicU64, Ordering};

use crate::time::MonotonicClock;

/// Subsystems that can veto low power entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PmDevice {
    /// The application. Held from init until the application relaxes it.
    App   = 0,
    /// Timed lease, see [`StayActive::stay_timeout`].
    Timed = 1,
    /// WLAN stack.
    Wifi  = 2,
    /// BLE controller.
    Ble   = 3,
    /// UART driver with pending traffic.
    Uart  = 4,
    /// USB device stack.
    Usb   = 5,
    /// SDIO device stack.
    Sdio  = 6,
}

impl PmDevice {
    /// Bit in the veto mask.
    pub const fn mask(self) -> u32 {
        1 << self as u8
    }
}

/// One-shot timer backing the timed lease.
pub trait LeaseTimer {
    /// Whether the timer is armed.
    fn is_running(&self) -> bool;

    /// (Re)arms the timer to fire after `ms` milliseconds. On expiry the
    /// owner calls [`StayActive::lease_expired`].
    fn start(&mut self, ms: u32);
}

/// Veto mask shared by every context.
#[derive(Debug)]
pub struct StayActive {
    mask: AtomicU32,
    lease_until: AtomicU64,
}

impl StayActive {
    /// No veto held. Usable in a `static`.
    pub const fn new() -> Self {
        Self {
            mask: AtomicU32::new(0),
            lease_until: AtomicU64::new(0),
        }
    }

    pub(crate) fn reset(&self, device: PmDevice) {
        self.mask.store(device.mask(), Ordering::SeqCst);
        self.lease_until.store(0, Ordering::SeqCst);
    }

    /// Vetoes low power entry on behalf of `device`.
    pub fn stay(&self, device: PmDevice) {
        self.mask.fetch_or(device.mask(), Ordering::SeqCst);
    }

    /// Withdraws the veto of `device`.
    pub fn relax(&self, device: PmDevice) {
        self.mask.fetch_and(!device.mask(), Ordering::SeqCst);
    }

    /// Current veto mask.
    pub fn status(&self) -> u32 {
        self.mask.load(Ordering::SeqCst)
    }

    /// Whether any subsystem holds the veto.
    pub fn is_held(&self) -> bool {
        self.status() != 0
    }

    /// Holds the veto for `ms` milliseconds from `now`.
    ///
    /// A running lease that already lasts at least as long is kept.
    pub fn stay_timeout(
        &self,
        ms: u32,
        now: u64,
        clock: &MonotonicClock,
        timer: &mut impl LeaseTimer,
    ) {
        let until = now + clock.us_to_mtime(ms as u64 * 1000);

        if timer.is_running() && self.lease_until.load(Ordering::SeqCst) >= until {
            return;
        }

        self.stay(PmDevice::Timed);
        timer.start(ms);
        self.lease_until.store(until, Ordering::SeqCst);
    }

    /// Ends the timed lease.
    pub fn lease_expired(&self) {
        self.relax(PmDevice::Timed);
    }

    /// Machine time the current lease ends at.
    pub fn lease_until(&self) -> u64 {
        self.lease_until.load(Ordering::SeqCst)
    }
}

impl Default for StayActive {
    fn default() -> Self {
        Self::new()
    }
}
