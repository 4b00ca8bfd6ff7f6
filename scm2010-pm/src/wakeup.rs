//! Wakeup sources and the observed wakeup cause.

use bitflags::bitflags;

bitflags! {
    /// Events that can bring the SoC out of a low power mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WakeupSources: u16 {
        /// AON GPIO edge.
        const GPIO           = 1 << 0;
        /// RTC alarm.
        const RTC            = 1 << 1;
        /// UART0 activity, no data lost.
        const UART0_LOSSLESS = 1 << 2;
        /// UART1 activity, no data lost.
        const UART1_LOSSLESS = 1 << 3;
        /// UART2 activity, no data lost.
        const UART2_LOSSLESS = 1 << 4;
        /// UART0 activity, first bytes may be lost.
        const UART0_LOSSY    = 1 << 5;
        /// UART1 activity, first bytes may be lost.
        const UART1_LOSSY    = 1 << 6;
        /// UART2 activity, first bytes may be lost.
        const UART2_LOSSY    = 1 << 7;
        /// USB resume.
        const USB            = 1 << 8;
        /// SDIO host access.
        const SDIO           = 1 << 9;
        /// Software trigger.
        const SW             = 1 << 10;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for WakeupSources {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "WakeupSources({=u16:#x})", self.bits())
    }
}

/// Highest AON pin that can wake the SoC.
pub const WAKEUP_PIN_MAX: u8 = 7;

/// What woke the SoC up from the last low power period.
///
/// For shallow modes only the event mask is known; after a power gated
/// period the watcher firmware also reports a reason and a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WakeupStatus {
    pub(crate) event: u16,
    pub(crate) reason: u16,
    pub(crate) kind: u16,
}

impl WakeupStatus {
    /// Wakeup events that fired.
    pub fn event(&self) -> WakeupSources {
        WakeupSources::from_bits_truncate(self.event)
    }

    /// Raw wakeup event mask.
    pub fn raw_event(&self) -> u16 {
        self.event
    }

    /// Wakeup reason reported by the watcher.
    pub fn reason(&self) -> u16 {
        self.reason
    }

    /// Wakeup type reported by the watcher.
    pub fn kind(&self) -> u16 {
        (self.kind & 0xff00) >> 8
    }

    /// Wakeup subtype reported by the watcher.
    pub fn subtype(&self) -> u16 {
        self.kind & 0xff
    }
}
