//! Error types.
//!
//! Power management failures are not visible to application code as error
//! codes from the idle path. [`Error`] covers the fallible configuration API
//! and the hardware/retention layers, [`Abort`] describes why a single idle
//! attempt did not enter a low power mode.

/// Errors which can be returned.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, strum::Display)]
pub enum Error {
    /// An indirect PMU transaction did not signal completion within the
    /// configured poll budget.
    PmuTimeout,
    /// The request is only honored while low power entry is vetoed, or the
    /// setting is owned by hardware.
    NotPermitted,
    /// A pin, mode or duration is out of range.
    InvalidArgument,
    /// The retention region does not hold a valid record.
    RetentionInvalid,
    /// The retention record has already been consumed since the last sleep.
    RetentionConsumed,
    /// The retention region is too small for a record.
    Incomplete,
}

impl core::error::Error for Error {}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{}", self)
    }
}

impl From<byte::Error> for Error {
    fn from(err: byte::Error) -> Self {
        match err {
            byte::Error::Incomplete | byte::Error::BadOffset(_) => Error::Incomplete,
            byte::Error::BadInput { .. } => Error::RetentionInvalid,
        }
    }
}

/// Reason an idle attempt stayed in (or returned to) the active mode.
///
/// All of these are transient: the next idle invocation tries again.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, strum::Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Abort {
    /// A subsystem holds the stay-active veto.
    Vetoed,
    /// The idle span is shorter than the sleep threshold.
    BelowThreshold,
    /// The RTC ratio was stale and has just been recalibrated.
    RatioStale,
    /// No enabled mode fits into the idle span.
    NoFeasibleMode,
    /// A peripheral driver refused to suspend.
    SuspendRefused,
    /// The application core has not signalled that it is idle.
    CoreBusy,
}
