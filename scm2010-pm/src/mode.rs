//! # Power modes
//!
//! ## Overview
//!
//! The SCM2010 knows seven power modes, ordered from shallow to deep. Each
//! mode maps to the set of hardware actions ([`ModeFeatures`]) a transition
//! into it requires; the transition sequencer consults that table instead of
//! matching on individual modes.
//!
//! The save and restore latencies of the low power tiers live in a
//! [`LatencyTable`]. A tier's minimum idle time is the sum of its save and
//! restore times, and the restore time is subtracted from the wakeup instant
//! to obtain the time the hardware has to start resuming.

use bitflags::bitflags;

/// A power mode, ordered from shallowest to deepest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PowerMode {
    /// Running, no transition.
    #[default]
    Active      = 0,
    /// CPU halted, everything else on.
    Idle        = 1,
    /// Machine timer off, system clock gated.
    LightSleep  = 2,
    /// Like light sleep with slower hardware restore.
    Sleep       = 3,
    /// Core power gated, system clock gated.
    DeepSleep0  = 4,
    /// Core and system power gated.
    DeepSleep1  = 5,
    /// Core and system power gated, RAM contents saved to flash.
    Hibernation = 6,
}

impl PowerMode {
    /// Number of power modes.
    pub const COUNT: usize = 7;

    /// The deep sleep variant used by the selection engine and the public
    /// policy API.
    pub const DEEP_SLEEP: PowerMode = PowerMode::DeepSleep1;

    /// All modes, shallowest first.
    pub const ALL: [PowerMode; Self::COUNT] = [
        PowerMode::Active,
        PowerMode::Idle,
        PowerMode::LightSleep,
        PowerMode::Sleep,
        PowerMode::DeepSleep0,
        PowerMode::DeepSleep1,
        PowerMode::Hibernation,
    ];

    /// Converts the raw representation used in retention RAM.
    pub const fn from_raw(raw: u8) -> Option<Self> {
        if (raw as usize) < Self::COUNT {
            Some(Self::ALL[raw as usize])
        } else {
            None
        }
    }

    /// Hardware actions a transition into this mode requires.
    pub const fn features(self) -> ModeFeatures {
        MODE_FEATURES[self as usize]
    }

    /// The next shallower mode, `None` for [`PowerMode::Active`].
    pub const fn shallower(self) -> Option<Self> {
        match self {
            PowerMode::Active => None,
            other => Self::from_raw(other as u8 - 1),
        }
    }

    /// Whether this is one of the deep sleep variants or hibernation.
    pub const fn is_deep(self) -> bool {
        self as u8 >= PowerMode::DeepSleep0 as u8
    }

    pub(crate) const fn tier(self) -> Option<Tier> {
        match self {
            PowerMode::Active | PowerMode::Idle => None,
            PowerMode::LightSleep => Some(Tier::LightSleep),
            PowerMode::Sleep => Some(Tier::Sleep),
            PowerMode::DeepSleep0 | PowerMode::DeepSleep1 => Some(Tier::DeepSleep),
            PowerMode::Hibernation => Some(Tier::Hibernation),
        }
    }
}

bitflags! {
    /// Hardware actions required by a power mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModeFeatures: u8 {
        /// The machine timer stops; time is rebuilt from the RTC on wakeup.
        const TIMER_OFF       = 1 << 0;
        /// The system clock is gated.
        const SYS_CLOCK_GATE  = 1 << 1;
        /// The system power domain is switched off.
        const SYS_POWER_GATE  = 1 << 2;
        /// The core power domain is switched off; the watcher takes over.
        const CORE_POWER_GATE = 1 << 3;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ModeFeatures {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "ModeFeatures({=u8:#x})", self.bits())
    }
}

const CLOCK_GATED: ModeFeatures = ModeFeatures::TIMER_OFF.union(ModeFeatures::SYS_CLOCK_GATE);
const POWER_GATED: ModeFeatures = ModeFeatures::TIMER_OFF
    .union(ModeFeatures::SYS_POWER_GATE)
    .union(ModeFeatures::CORE_POWER_GATE);

static MODE_FEATURES: [ModeFeatures; PowerMode::COUNT] = [
    ModeFeatures::empty(),                            // Active
    ModeFeatures::empty(),                            // Idle
    CLOCK_GATED,                                      // LightSleep
    CLOCK_GATED,                                      // Sleep
    CLOCK_GATED.union(ModeFeatures::CORE_POWER_GATE), // DeepSleep0
    POWER_GATED,                                      // DeepSleep1
    POWER_GATED,                                      // Hibernation
];

bitflags! {
    /// A set of power modes, one bit per [`PowerMode`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModeSet: u8 {
        #[allow(missing_docs)]
        const ACTIVE       = 1 << PowerMode::Active as u8;
        #[allow(missing_docs)]
        const IDLE         = 1 << PowerMode::Idle as u8;
        #[allow(missing_docs)]
        const LIGHT_SLEEP  = 1 << PowerMode::LightSleep as u8;
        #[allow(missing_docs)]
        const SLEEP        = 1 << PowerMode::Sleep as u8;
        #[allow(missing_docs)]
        const DEEP_SLEEP_0 = 1 << PowerMode::DeepSleep0 as u8;
        #[allow(missing_docs)]
        const DEEP_SLEEP_1 = 1 << PowerMode::DeepSleep1 as u8;
        #[allow(missing_docs)]
        const HIBERNATION  = 1 << PowerMode::Hibernation as u8;
    }
}

impl ModeSet {
    /// The set containing only `mode`.
    pub const fn of(mode: PowerMode) -> Self {
        Self::from_bits_retain(1 << mode as u8)
    }

    /// Whether `mode` is part of the set.
    pub const fn has(self, mode: PowerMode) -> bool {
        self.contains(Self::of(mode))
    }
}

impl Default for ModeSet {
    fn default() -> Self {
        ModeSet::ACTIVE | ModeSet::LIGHT_SLEEP | ModeSet::of(PowerMode::DEEP_SLEEP) | ModeSet::HIBERNATION
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ModeSet {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "ModeSet({=u8:#x})", self.bits())
    }
}

/// How the system wakes up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeType {
    /// Full CPU resume.
    #[default]
    Full,
    /// The watcher firmware wakes first and may re-enter sleep on its own.
    Watcher,
}

/// Latency tier shared by one or more power modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Tier {
    /// [`PowerMode::LightSleep`].
    LightSleep  = 0,
    /// [`PowerMode::Sleep`].
    Sleep       = 1,
    /// Both deep sleep variants.
    DeepSleep   = 2,
    /// [`PowerMode::Hibernation`].
    Hibernation = 3,
}

/// Save and restore latencies of one tier, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TierTiming {
    /// Software save time.
    pub sw_save: u32,
    /// Hardware save time.
    pub hw_save: u32,
    /// Software restore time.
    pub sw_restore: u32,
    /// Hardware restore time.
    pub hw_restore: u32,
    /// Restore time when the watcher handles the wakeup.
    pub watcher_restore: u32,
}

impl TierTiming {
    /// Total save time.
    pub const fn save(&self) -> u32 {
        self.sw_save + self.hw_save
    }

    /// Total restore time after a full wakeup.
    pub const fn restore(&self) -> u32 {
        self.sw_restore + self.hw_restore
    }

    /// Shortest idle span that pays off entering this tier.
    pub const fn min_time(&self) -> u32 {
        self.save() + self.restore()
    }
}

/// Per-tier save/restore latencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LatencyTable {
    tiers: [TierTiming; 4],
}

impl LatencyTable {
    /// Measured SCM2010 latencies. `sdio_prepare` is added to the software
    /// save time of the deep tiers when the SDIO host needs preparing.
    pub const fn new(sdio_prepare: u32) -> Self {
        Self {
            tiers: [
                TierTiming {
                    sw_save: 1500 + 5000,
                    hw_save: 0,
                    sw_restore: 1100,
                    hw_restore: 20,
                    watcher_restore: 0,
                },
                TierTiming {
                    sw_save: 1500 + 5000,
                    hw_save: 0,
                    sw_restore: 1100,
                    hw_restore: 6000,
                    watcher_restore: 0,
                },
                TierTiming {
                    sw_save: sdio_prepare + 6500 + 5000,
                    hw_save: 0,
                    sw_restore: 6800,
                    hw_restore: 6000,
                    watcher_restore: 3800,
                },
                TierTiming {
                    sw_save: sdio_prepare + 1_650_000 + 5000,
                    hw_save: 0,
                    sw_restore: 54_000,
                    hw_restore: 6000,
                    watcher_restore: 0,
                },
            ],
        }
    }

    /// Replaces the latencies of one tier.
    pub const fn with_tier(mut self, tier: Tier, timing: TierTiming) -> Self {
        self.tiers[tier as usize] = timing;
        self
    }

    /// Latencies of one tier.
    pub const fn tier(&self, tier: Tier) -> &TierTiming {
        &self.tiers[tier as usize]
    }

    /// Minimum idle time of `mode`, `None` for modes without a tier.
    pub const fn min_time(&self, mode: PowerMode) -> Option<u32> {
        match mode.tier() {
            Some(tier) => Some(self.tier(tier).min_time()),
            None => None,
        }
    }

    /// How long before the wakeup instant resuming has to start.
    pub const fn restore_offset(&self, wake: WakeType, mode: PowerMode) -> u32 {
        let Some(tier) = mode.tier() else {
            return 0;
        };
        let timing = self.tier(tier);
        match (wake, tier) {
            (WakeType::Watcher, Tier::DeepSleep | Tier::Hibernation) => timing.watcher_restore,
            _ => timing.restore(),
        }
    }
}

impl Default for LatencyTable {
    fn default() -> Self {
        Self::new(crate::config::SDIO_PREPARE_TIME_US)
    }
}
