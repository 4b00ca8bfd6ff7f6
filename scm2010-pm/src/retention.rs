//! # Retention RAM record
//!
//! ## Overview
//!
//! The retention record is the only state that survives a core power gate.
//! It is shared with the watcher firmware, which reads the wakeup target
//! from it and reports back what it observed.
//!
//! The record is serialized explicitly (little endian, no padding) instead of
//! aliasing a `#[repr(C)]` struct onto the always-on RAM:
//!
//! | offset | size | content                                   |
//! |--------|------|-------------------------------------------|
//! | 0      | 8    | magic, layout version, arm state          |
//! | 8      | 128  | body, field offsets shared with the watcher |
//! | 136    | 4    | CRC-32 over the first 136 bytes           |
//!
//! A record is armed right before a core power gate and consumed exactly
//! once after the corresponding wakeup. Consuming it again before the next
//! sleep fails with [`Error::RetentionConsumed`].
//!
//! ## Examples
//!
//! ```rust
//! use scm2010_pm::retention::{Retention, RECORD_LEN};
//!
//! let mut retention = Retention::new([0u8; RECORD_LEN]);
//! retention.arm(|record| record.wk_time = 1_000).unwrap();
//!
//! let record = retention.consume().unwrap();
//! assert_eq!(record.wk_time, 1_000);
//! assert!(retention.consume().is_err());
//! ```

use bitflags::bitflags;
use byte::{ctx::LE, BytesExt, TryRead, TryWrite};
use crc::{Algorithm, Crc};

use crate::{
    calibration::sleep_ratio,
    config::PmFeatures,
    mode::PowerMode,
    wakeup::WakeupSources,
    Error,
};

/// Serialized size of a record.
pub const RECORD_LEN: usize = HEADER_LEN + BODY_LEN + CRC_LEN;

const HEADER_LEN: usize = 8;
const BODY_LEN: usize = 128;
const CRC_LEN: usize = 4;

const MAGIC: u32 = 0x5252_4d50;
const VERSION: u16 = 1;

const STATE_IDLE: u8 = 0;
const STATE_ARMED: u8 = 0xa5;

static ALGO_CRC32: Algorithm<u32> = Algorithm {
    width: 32,
    poly: 0x04c11db7,
    init: 0,
    refin: true,
    refout: true,
    xorout: 0xffffffff,
    check: 0,
    residue: 0,
};

fn checksum(data: &[u8]) -> u32 {
    let crc = Crc::<u32>::new(&ALGO_CRC32);
    let mut digest = crc.digest();
    digest.update(data);
    digest.finalize()
}

bitflags! {
    /// Wakeup flags, written by both firmwares.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WakeupFlags: u8 {
        /// The watcher handles the first wakeup.
        const WATCHER      = 1 << 0;
        /// The watcher decided to reset the SoC.
        const RESET        = 1 << 1;
        /// The hibernation save overran its budget.
        const EXT_HIB_TIME = 1 << 2;
    }
}

bitflags! {
    /// Flash save handshake.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SyncFlags: u8 {
        /// RAM is to be saved to flash.
        const SAVE_FLASH  = 1 << 0;
        /// The flash save was cancelled by an early wakeup.
        const SAVE_CANCEL = 1 << 1;
    }
}

bitflags! {
    /// What the watcher did while the core was off.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WatcherExec: u8 {
        /// The watcher ran.
        const EXEC  = 1 << 0;
        /// The watcher went back to sleep at least once.
        const SLEPT = 1 << 1;
    }
}

/// Flash parameters the watcher needs to access flash on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashParams {
    /// Memory-mapped read command.
    pub read_cmd: u8,
    /// Large erase command.
    pub erase1_cmd: u8,
    /// Large erase unit, in bytes.
    pub erase1_size: u32,
    /// Small erase command.
    pub erase2_cmd: u8,
    /// Small erase unit, in bytes.
    pub erase2_size: u32,
    /// Controller timing register.
    pub timing: u32,
    /// Controller clock configuration.
    pub clk: u32,
}

impl FlashParams {
    /// Parameters with the 64 KiB / 32 KiB block erase commands.
    ///
    /// Hibernation saves 32 KiB aligned RAM images, so smaller erase units
    /// only slow the save down.
    pub const fn new(read_cmd: u8, timing: u32, clk: u32) -> Self {
        Self {
            read_cmd: read_cmd & 0x0f,
            erase1_cmd: 0xd8,
            erase1_size: 64 * 1024,
            erase2_cmd: 0x52,
            erase2_size: 32 * 1024,
            timing,
            clk,
        }
    }
}

/// Flash encryption setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CryptoConfig {
    /// Crypto configuration register.
    pub cfg: u32,
    /// AES key words.
    pub key: [u32; 4],
    /// AES IV words.
    pub iv: [u32; 4],
}

impl CryptoConfig {
    /// Cipher enable bit of the configuration register.
    pub const CIPHER_EN: u32 = 1 << 31;

    /// Whether flash contents are encrypted.
    pub const fn cipher_enabled(&self) -> bool {
        self.cfg & Self::CIPHER_EN != 0
    }
}

/// Contents of the retention region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionRecord {
    armed: bool,
    /// Wakeup flags.
    pub wakeup_flag: WakeupFlags,
    /// Flash save handshake.
    pub sync_flag: SyncFlags,
    /// Watcher activity.
    pub exec_watcher: WatcherExec,
    /// Mode entered.
    pub pm_mode: PowerMode,
    /// Flash access parameters.
    pub flash: FlashParams,
    /// RTC count the watcher last slept from, 0 if untouched.
    pub rtc_value: u32,
    /// Machine time matching `rtc_value`, 0 if untouched.
    pub mtime_value: u64,
    /// Target time after the watcher's own wakeup.
    pub next_mtime_value: u64,
    /// Flash encryption, key and IV only when the cipher is on.
    pub crypto: CryptoConfig,
    /// Feature flags.
    pub feature: PmFeatures,
    /// Wakeup entry address of the application.
    pub wk_entry: u32,
    /// Armed wakeup sources.
    pub wk_src: WakeupSources,
    /// Observed wakeup events.
    pub wk_evt: u32,
    /// Wakeup reason reported by the watcher.
    pub wk_fb_reason: u16,
    /// Wakeup type reported by the watcher.
    pub wk_fb_type: u16,
    /// Target time of the wakeup.
    pub wk_time: u64,
    /// Active RTC ratio.
    pub act_ratio: u32,
    /// Sleep RTC ratio.
    pub ratio: u32,
    /// Machine time of the last ratio calibration.
    pub ratio_last_measure_time: u64,
}

impl RetentionRecord {
    /// Whether the record waits to be consumed.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Zeroes the fields that only describe one sleep cycle.
    ///
    /// Flash, crypto, feature and calibration fields persist.
    pub fn clear_cycle(&mut self) {
        self.armed = false;
        self.wakeup_flag = WakeupFlags::empty();
        self.exec_watcher = WatcherExec::empty();
        self.sync_flag = SyncFlags::empty();
        self.pm_mode = PowerMode::Active;
        self.wk_src = WakeupSources::empty();
        self.wk_evt = 0;
        self.wk_time = 0;
        self.rtc_value = 0;
        self.mtime_value = 0;
    }
}

impl<'a> TryRead<'a> for RetentionRecord {
    fn try_read(bytes: &'a [u8], _: ()) -> byte::Result<(Self, usize)> {
        if bytes.len() < RECORD_LEN {
            return Err(byte::Error::Incomplete);
        }
        let stored_crc = {
            let offset = &mut (HEADER_LEN + BODY_LEN);
            bytes.read_with::<u32>(offset, LE)?
        };
        if stored_crc != checksum(&bytes[..HEADER_LEN + BODY_LEN]) {
            return Err(byte::Error::BadInput { err: "checksum" });
        }

        let offset = &mut 0;
        if bytes.read_with::<u32>(offset, LE)? != MAGIC {
            return Err(byte::Error::BadInput { err: "magic" });
        }
        if bytes.read_with::<u16>(offset, LE)? != VERSION {
            return Err(byte::Error::BadInput { err: "version" });
        }
        let armed = match bytes.read_with::<u8>(offset, LE)? {
            STATE_IDLE => false,
            STATE_ARMED => true,
            _ => return Err(byte::Error::BadInput { err: "state" }),
        };
        *offset += 1;

        let mut record = RetentionRecord {
            armed,
            ..Default::default()
        };
        record.wakeup_flag = WakeupFlags::from_bits_retain(bytes.read_with(offset, LE)?);
        record.sync_flag = SyncFlags::from_bits_retain(bytes.read_with(offset, LE)?);
        record.exec_watcher = WatcherExec::from_bits_retain(bytes.read_with(offset, LE)?);
        record.pm_mode = PowerMode::from_raw(bytes.read_with(offset, LE)?)
            .ok_or(byte::Error::BadInput { err: "mode" })?;
        *offset += 1;

        record.flash.read_cmd = bytes.read_with(offset, LE)?;
        record.flash.erase1_cmd = bytes.read_with(offset, LE)?;
        record.flash.erase2_cmd = bytes.read_with(offset, LE)?;
        record.flash.erase1_size = bytes.read_with(offset, LE)?;
        record.flash.erase2_size = bytes.read_with(offset, LE)?;
        record.flash.timing = bytes.read_with(offset, LE)?;
        record.flash.clk = bytes.read_with(offset, LE)?;
        *offset += 4;

        record.rtc_value = bytes.read_with(offset, LE)?;
        record.mtime_value = bytes.read_with(offset, LE)?;
        record.next_mtime_value = bytes.read_with(offset, LE)?;

        record.crypto.cfg = bytes.read_with(offset, LE)?;
        for word in record.crypto.key.iter_mut() {
            *word = bytes.read_with(offset, LE)?;
        }
        for word in record.crypto.iv.iter_mut() {
            *word = bytes.read_with(offset, LE)?;
        }

        record.feature = PmFeatures::from_bits_retain(bytes.read_with(offset, LE)?);
        record.wk_entry = bytes.read_with(offset, LE)?;
        record.wk_src = WakeupSources::from_bits_truncate(bytes.read_with::<u32>(offset, LE)? as u16);
        record.wk_evt = bytes.read_with(offset, LE)?;
        record.wk_fb_reason = bytes.read_with(offset, LE)?;
        record.wk_fb_type = bytes.read_with(offset, LE)?;
        record.wk_time = bytes.read_with(offset, LE)?;
        record.act_ratio = bytes.read_with(offset, LE)?;
        record.ratio = bytes.read_with(offset, LE)?;
        record.ratio_last_measure_time = bytes.read_with(offset, LE)?;

        debug_assert!(*offset == HEADER_LEN + BODY_LEN);
        Ok((record, RECORD_LEN))
    }
}

impl TryWrite for RetentionRecord {
    fn try_write(self, bytes: &mut [u8], _: ()) -> byte::Result<usize> {
        if bytes.len() < RECORD_LEN {
            return Err(byte::Error::Incomplete);
        }
        let offset = &mut 0;
        bytes.write_with(offset, MAGIC, LE)?;
        bytes.write_with(offset, VERSION, LE)?;
        let state = if self.armed { STATE_ARMED } else { STATE_IDLE };
        bytes.write_with(offset, state, LE)?;
        bytes.write_with(offset, 0u8, LE)?;

        bytes.write_with(offset, self.wakeup_flag.bits(), LE)?;
        bytes.write_with(offset, self.sync_flag.bits(), LE)?;
        bytes.write_with(offset, self.exec_watcher.bits(), LE)?;
        bytes.write_with(offset, self.pm_mode as u8, LE)?;
        bytes.write_with(offset, 0u8, LE)?;

        bytes.write_with(offset, self.flash.read_cmd, LE)?;
        bytes.write_with(offset, self.flash.erase1_cmd, LE)?;
        bytes.write_with(offset, self.flash.erase2_cmd, LE)?;
        bytes.write_with(offset, self.flash.erase1_size, LE)?;
        bytes.write_with(offset, self.flash.erase2_size, LE)?;
        bytes.write_with(offset, self.flash.timing, LE)?;
        bytes.write_with(offset, self.flash.clk, LE)?;
        bytes.write_with(offset, 0u32, LE)?;

        bytes.write_with(offset, self.rtc_value, LE)?;
        bytes.write_with(offset, self.mtime_value, LE)?;
        bytes.write_with(offset, self.next_mtime_value, LE)?;

        bytes.write_with(offset, self.crypto.cfg, LE)?;
        for word in self.crypto.key {
            bytes.write_with(offset, word, LE)?;
        }
        for word in self.crypto.iv {
            bytes.write_with(offset, word, LE)?;
        }

        bytes.write_with(offset, self.feature.bits(), LE)?;
        bytes.write_with(offset, self.wk_entry, LE)?;
        bytes.write_with(offset, self.wk_src.bits() as u32, LE)?;
        bytes.write_with(offset, self.wk_evt, LE)?;
        bytes.write_with(offset, self.wk_fb_reason, LE)?;
        bytes.write_with(offset, self.wk_fb_type, LE)?;
        bytes.write_with(offset, self.wk_time, LE)?;
        bytes.write_with(offset, self.act_ratio, LE)?;
        bytes.write_with(offset, self.ratio, LE)?;
        bytes.write_with(offset, self.ratio_last_measure_time, LE)?;

        let crc = checksum(&bytes[..*offset]);
        bytes.write_with(offset, crc, LE)?;
        Ok(*offset)
    }
}

/// Backing storage of the retention record.
///
/// On hardware this is the always-on RAM region the watcher firmware maps;
/// a plain byte array works for tests.
pub trait RetentionStore {
    /// Copies the region into `buf`.
    fn load(&self, buf: &mut [u8; RECORD_LEN]);

    /// Overwrites the region.
    fn store(&mut self, buf: &[u8; RECORD_LEN]);
}

impl RetentionStore for [u8; RECORD_LEN] {
    fn load(&self, buf: &mut [u8; RECORD_LEN]) {
        buf.copy_from_slice(self);
    }

    fn store(&mut self, buf: &[u8; RECORD_LEN]) {
        self.copy_from_slice(buf);
    }
}

impl<S: RetentionStore + ?Sized> RetentionStore for &mut S {
    fn load(&self, buf: &mut [u8; RECORD_LEN]) {
        (**self).load(buf)
    }

    fn store(&mut self, buf: &[u8; RECORD_LEN]) {
        (**self).store(buf)
    }
}

/// Sole owner of the retention region.
///
/// Keeps a working copy of the record and writes it through on every change.
#[derive(Debug)]
pub struct Retention<S> {
    store: S,
    record: RetentionRecord,
}

impl<S: RetentionStore> Retention<S> {
    /// Takes ownership of the region. Nothing is read or written yet.
    pub fn new(store: S) -> Self {
        Self {
            store,
            record: RetentionRecord::default(),
        }
    }

    fn load(&self) -> Result<RetentionRecord, Error> {
        let mut buf = [0u8; RECORD_LEN];
        self.store.load(&mut buf);
        let (record, _) = RetentionRecord::try_read(&buf, ())?;
        Ok(record)
    }

    fn persist(&mut self) -> Result<(), Error> {
        let mut buf = [0u8; RECORD_LEN];
        self.record.try_write(&mut buf, ())?;
        self.store.store(&buf);
        Ok(())
    }

    /// Rebuilds the record at boot.
    ///
    /// The RTC calibration survives a warm reboot; everything else is
    /// rewritten from the arguments. Key and IV are only retained when the
    /// cipher is enabled.
    pub fn init(
        &mut self,
        flash: FlashParams,
        crypto: CryptoConfig,
        feature: PmFeatures,
        wk_entry: u32,
    ) -> Result<(), Error> {
        let (act_ratio, measured_at) = match self.load() {
            Ok(previous) => (previous.act_ratio, previous.ratio_last_measure_time),
            Err(_) => (0, 0),
        };

        let mut record = RetentionRecord {
            act_ratio,
            ratio: sleep_ratio(act_ratio, feature.contains(PmFeatures::AON_VOLTAGE_CTRL_OCR)),
            ratio_last_measure_time: measured_at,
            flash,
            feature,
            wk_entry,
            ..Default::default()
        };
        record.crypto.cfg = crypto.cfg;
        if crypto.cipher_enabled() {
            record.crypto.key = crypto.key;
            record.crypto.iv = crypto.iv;
        }

        info!("retained RTC ratio {}", act_ratio);
        self.record = record;
        self.persist()
    }

    /// The working copy.
    pub fn record(&self) -> &RetentionRecord {
        &self.record
    }

    /// Changes persistent fields.
    pub fn modify(&mut self, f: impl FnOnce(&mut RetentionRecord)) -> Result<(), Error> {
        f(&mut self.record);
        self.persist()
    }

    /// Populates the cycle fields and marks the record for consumption after
    /// wakeup.
    pub fn arm(&mut self, f: impl FnOnce(&mut RetentionRecord)) -> Result<(), Error> {
        f(&mut self.record);
        self.record.armed = true;
        self.persist()
    }

    /// Reads back the record after a power gated period.
    ///
    /// Returns the record as the watcher left it and zeroes its cycle fields.
    pub fn consume(&mut self) -> Result<RetentionRecord, Error> {
        let record = self.load()?;
        if !record.armed {
            return Err(Error::RetentionConsumed);
        }
        self.record = record;
        self.record.clear_cycle();
        self.persist()?;
        Ok(record)
    }

    /// Zeroes the cycle fields without reading them.
    pub fn clear_cycle(&mut self) -> Result<(), Error> {
        self.record.clear_cycle();
        self.persist()
    }

    /// Gives the region back.
    pub fn release(self) -> S {
        self.store
    }
}
