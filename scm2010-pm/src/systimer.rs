//! # System timer
//!
//! ## Overview
//!
//! The system timer pairs a free running 20 MHz PIT with the low power RTC.
//! Drivers (the WLAN stack, mostly) schedule compare timers on the PIT; the
//! earliest two tell the power manager when the next device wakeup is due.
//!
//! [`SysTimer`] is the contract the power manager consumes. [`TimerQueue`]
//! is the ordered pending timer list an implementation can build on, and
//! [`SharedTimerQueue`] wraps it for access from interrupt context.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::calibration::SnapPair;

/// PIT ticks per machine timer tick.
pub const PIT_TICKS_PER_MTIME: u32 = 2;

/// How a timer wants the system to wake up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerKind {
    /// The application has to run when the timer fires.
    WakeupFull,
    /// The watcher can service the timer without waking the application.
    WakeupIdle,
}

/// The earliest pending device wakeups, in machine time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WakeupInfo {
    /// Expiry of the first timer.
    pub wtime: u64,
    /// Kind of the first timer.
    pub kind: TimerKind,
    /// Expiry and kind of the second timer, if any.
    pub next: Option<(u64, TimerKind)>,
}

/// Hardware timer collaborator.
pub trait SysTimer {
    /// Earliest pending wakeups relative to the machine time `mtime`.
    fn wakeup_info(&mut self, mtime: u64) -> Option<WakeupInfo>;

    /// Latches the PIT and RTC counters at the same instant.
    fn snap(&mut self) -> SnapPair;

    /// Busy waits.
    fn delay_us(&mut self, us: u32);

    /// Programs the RTC-to-PIT ratio register.
    fn set_ratio_reg(&mut self, reg: u32);

    /// Re-arms the compare interrupt after a core power gate.
    ///
    /// When the watcher ran, it serviced the head timer, which is dropped.
    fn restart(&mut self, executed_watcher: bool);

    /// Reloads the counters from the RTC after the system clock was gated.
    fn load(&mut self);

    /// Snaps twice, `interval_us` apart.
    fn rtc_cal(&mut self, interval_us: u32) -> (SnapPair, SnapPair) {
        let first = self.snap();
        self.delay_us(interval_us);
        let second = self.snap();
        (first, second)
    }
}

/// Whether a compare timer at `expiry` has fired at PIT count `now`.
///
/// Counts within `0xF000_0000` ticks behind `now` are in the past.
pub const fn is_expired(now: u32, expiry: u32) -> bool {
    (now >= expiry && now - expiry < 0xF000_0000) || (now < expiry && expiry - now > 0xF000_0000)
}

/// Distance between `now` and `expiry`, in either direction.
pub const fn distance(now: u32, expiry: u32) -> u32 {
    (expiry.wrapping_sub(now) as i32).unsigned_abs()
}

/// A pending compare timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PendingTimer {
    /// Owner chosen identifier.
    pub id: u8,
    /// Wakeup kind.
    pub kind: TimerKind,
    /// PIT count at which the timer fires.
    pub expiry: u32,
}

/// Timer queue errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QueueError {
    /// No room for another timer.
    Full,
    /// A timer with this id is already pending.
    AlreadyQueued,
}

/// Pending timers, nearest first.
#[derive(Debug, Default)]
pub struct TimerQueue<const N: usize> {
    timers: heapless::Vec<PendingTimer, N>,
}

impl<const N: usize> TimerQueue<N> {
    /// An empty queue.
    pub const fn new() -> Self {
        Self {
            timers: heapless::Vec::new(),
        }
    }

    /// Queues a timer. Returns whether it became the head, in which case the
    /// compare register has to be reprogrammed.
    pub fn start_at(
        &mut self,
        id: u8,
        kind: TimerKind,
        expiry: u32,
        now: u32,
    ) -> Result<bool, QueueError> {
        if self.timers.iter().any(|t| t.id == id) {
            return Err(QueueError::AlreadyQueued);
        }

        let dur = distance(now, expiry);
        let pos = self
            .timers
            .iter()
            .position(|t| dur < distance(now, t.expiry))
            .unwrap_or(self.timers.len());

        self.timers
            .insert(pos, PendingTimer { id, kind, expiry })
            .map_err(|_| QueueError::Full)?;
        Ok(pos == 0)
    }

    /// Removes a timer. Returns `None` if it was not queued, otherwise
    /// whether it was the head.
    pub fn stop(&mut self, id: u8) -> Option<bool> {
        let pos = self.timers.iter().position(|t| t.id == id)?;
        self.timers.remove(pos);
        Some(pos == 0)
    }

    /// The nearest timer.
    pub fn head(&self) -> Option<&PendingTimer> {
        self.timers.first()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Removes and returns the head if it has fired.
    pub fn pop_expired(&mut self, now: u32) -> Option<PendingTimer> {
        let fired = self.head().is_some_and(|head| is_expired(now, head.expiry));
        fired.then(|| self.timers.remove(0))
    }

    /// Earliest two wakeups converted to machine time.
    pub fn wakeup_info(&self, now: u32, mtime: u64) -> Option<WakeupInfo> {
        let to_mtime = |t: &PendingTimer| mtime + (distance(now, t.expiry) / PIT_TICKS_PER_MTIME) as u64;

        let first = self.timers.first()?;
        Some(WakeupInfo {
            wtime: to_mtime(first),
            kind: first.kind,
            next: self.timers.get(1).map(|t| (to_mtime(t), t.kind)),
        })
    }

    /// Drops the head after the watcher serviced it and returns the timer
    /// the compare register has to be programmed for.
    pub fn restart(&mut self, executed_watcher: bool) -> Option<&PendingTimer> {
        if executed_watcher && !self.timers.is_empty() {
            let serviced = self.timers.remove(0);
            debug_assert!(serviced.kind == TimerKind::WakeupIdle);
        }
        self.head()
    }
}

/// A [`TimerQueue`] shared between thread and interrupt context.
pub struct SharedTimerQueue<const N: usize> {
    inner: Mutex<RefCell<TimerQueue<N>>>,
}

impl<const N: usize> SharedTimerQueue<N> {
    /// An empty queue, usable in a `static`.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(TimerQueue::new())),
        }
    }

    /// Runs `f` on the queue with interrupts masked.
    pub fn with<R>(&self, f: impl FnOnce(&mut TimerQueue<N>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }
}

impl<const N: usize> Default for SharedTimerQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
