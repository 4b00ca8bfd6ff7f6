#![macro_use]
#![allow(unused_macros)]

// Logging front end. Routes to `defmt` or `log` depending on the enabled
// feature and compiles to nothing (while still "using" the arguments) when
// neither is enabled.

#[collapse_debuginfo(yes)]
macro_rules! emit {
    ($level:ident, $s:literal $(, $x:expr)* $(,)?) => {
        {
            cfg_if::cfg_if! {
                if #[cfg(feature = "defmt")] {
                    ::defmt::$level!($s $(, $x)*);
                } else if #[cfg(feature = "log")] {
                    ::log::$level!($s $(, $x)*);
                } else {
                    let _ = ($( & $x ),*);
                }
            }
        }
    };
}

#[collapse_debuginfo(yes)]
macro_rules! trace {
    ($($x:tt)*) => { emit!(trace, $($x)*) };
}

#[collapse_debuginfo(yes)]
macro_rules! debug {
    ($($x:tt)*) => { emit!(debug, $($x)*) };
}

#[collapse_debuginfo(yes)]
macro_rules! info {
    ($($x:tt)*) => { emit!(info, $($x)*) };
}

#[collapse_debuginfo(yes)]
macro_rules! warn {
    ($($x:tt)*) => { emit!(warn, $($x)*) };
}

#[collapse_debuginfo(yes)]
macro_rules! error {
    ($($x:tt)*) => { emit!(error, $($x)*) };
}

#[collapse_debuginfo(yes)]
macro_rules! assert {
    ($($x:tt)*) => {
        {
            cfg_if::cfg_if! {
                if #[cfg(feature = "defmt")] {
                    ::defmt::assert!($($x)*);
                } else {
                    ::core::assert!($($x)*);
                }
            }
        }
    };
}

#[collapse_debuginfo(yes)]
macro_rules! debug_assert {
    ($($x:tt)*) => {
        {
            cfg_if::cfg_if! {
                if #[cfg(feature = "defmt")] {
                    ::defmt::debug_assert!($($x)*);
                } else {
                    ::core::debug_assert!($($x)*);
                }
            }
        }
    };
}

#[collapse_debuginfo(yes)]
macro_rules! panic {
    ($($x:tt)*) => {
        {
            cfg_if::cfg_if! {
                if #[cfg(feature = "defmt")] {
                    ::defmt::panic!($($x)*);
                } else {
                    ::core::panic!($($x)*);
                }
            }
        }
    };
}

/// Logs the violated power-management invariant and halts.
///
/// Mid-transition state is never resumed from, so there is no recovery path.
#[collapse_debuginfo(yes)]
macro_rules! fatal {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            error!($s $(, $x)*);
            panic!("power management invariant violated");
        }
    };
}
