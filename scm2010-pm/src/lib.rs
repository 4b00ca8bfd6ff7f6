//! # Power management for the SCM2010
//!
//! ## Overview
//!
//! This crate decides, on every tickless idle entry of the RTOS, which low
//! power mode the SCM2010 enters and sequences the transition into and out
//! of it.
//!
//! The SoC has seven modes, from [`PowerMode::Active`] down to
//! [`PowerMode::Hibernation`]. Deeper modes save more power but take longer
//! to enter and leave, and from deep sleep on the application core loses its
//! state. The engine
//!
//! 1. derives the idle span from the RTOS deadline and the earliest device
//!    timer,
//! 2. picks the deepest mode whose save and restore latencies fit,
//! 3. quiesces the hardware, programs the RTC alarm and the PMU, and halts,
//! 4. after wakeup rebuilds the machine timer from the RTC and restores the
//!    hardware in reverse.
//!
//! For the power gated modes a co-processor firmware (the watcher) takes over
//! while the core is off. The two communicate through a checksummed record
//! in always-on RAM, see [`retention`].
//!
//! Hardware access goes through the traits in [`platform`], [`systimer`] and
//! [`pmu`]; a board support crate implements them.
//!
//! ## Configuration
//!
//! Build time defaults are read from environment variables through
//! `esp-config`; [`Config`] overrides them at runtime.
//!
#![doc = include_str!(concat!(env!("OUT_DIR"), "/scm2010_pm_config_table.md"))]
//!
//! ## Feature Flags
#![doc = document_features::document_features!(feature_label = r#"<span class="stab portability"><code>{feature}</code></span>"#)]
#![deny(missing_docs, rust_2018_idioms)]
#![cfg_attr(not(test), no_std)]

// MUST be the first module
mod fmt;

pub mod calibration;
pub mod config;
pub mod context;
mod error;
pub mod hooks;
pub mod mode;
pub mod platform;
pub mod pmu;
pub mod retention;
mod selector;
pub mod sequencer;
pub mod stay;
pub mod systimer;
pub mod time;
pub mod wakeup;

pub use self::{
    config::{Config, PmFeatures},
    context::PowerContext,
    error::{Abort, Error},
    mode::{ModeSet, PowerMode},
    sequencer::{Board, PowerManager},
    stay::{PmDevice, StayActive},
    wakeup::WakeupSources,
};
