//! Cartridge header parsing, bank controllers and the MBC3 clock.
//!
//! Banking registers are only ever changed through [`Cartridge::write`] or a
//! snapshot load; both finish with [`Cartridge::remap`], which turns the
//! register values into byte offsets so the hot read path is two lookups.

use thiserror::Error;

use crate::hardware::CPU_CLOCK_HZ;
use crate::snapshot::{CART_RAM_BLOCK, SnapshotError, StateReader, StateWriter};

const ROM_BANK_SIZE: usize = 0x4000;
const RAM_BANK_SIZE: usize = 0x2000;
const MBC2_RAM_SIZE: usize = 0x200;
const HEADER_END: usize = 0x150;

pub const RTC_RECORD_SIZE: usize = 48;

/// Bytes written by [`save_cart_state`]: banking, padded RAM, RTC flag and
/// the live and latched clocks.
pub const STATE_SIZE: usize = 5 + CART_RAM_BLOCK + 1 + 19;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("rom is {0} bytes, too small to hold a header")]
    TooSmall(usize),

    #[error("header declares {declared} bytes of rom but the image has {actual}")]
    RomSizeMismatch { declared: usize, actual: usize },

    #[error("invalid rom size code {0:#04x}")]
    InvalidRomSize(u8),

    #[error("unsupported cartridge type {0:#04x}")]
    UnsupportedCartType(u8),

    #[error("invalid ram size code {0:#04x}")]
    InvalidRamSize(u8),

    #[error("{0}")]
    SystemConflict(&'static str),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SaveDataError {
    #[error("no cartridge is loaded")]
    NoCartridge,

    #[error("cartridge has no battery backed ram")]
    NoBattery,

    #[error("save data is {actual} bytes, cartridge ram is {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("rtc record must be {RTC_RECORD_SIZE} bytes, got {0}")]
    BadRtcRecord(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbcKind {
    None,
    Mbc1,
    Mbc2,
    Mbc3,
    /// MBC3 variant with 8 RAM banks and 8-bit ROM bank numbers.
    Mbc30,
    Mbc5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CartFlags {
    pub ram: bool,
    pub battery: bool,
    pub rtc: bool,
    pub rumble: bool,
}

/// Decoded cartridge header (0x0134-0x014F).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub title: String,
    pub cgb_flag: u8,
    pub sgb_flag: u8,
    pub new_licensee: [u8; 2],
    pub old_licensee: u8,
    pub cart_type: u8,
    pub rom_size_code: u8,
    pub ram_size_code: u8,
    pub version: u8,
    pub header_checksum: u8,
    pub global_checksum: u16,
}

impl Header {
    pub fn parse(rom: &[u8]) -> Result<Self, LoadError> {
        if rom.len() < HEADER_END {
            return Err(LoadError::TooSmall(rom.len()));
        }
        let mut title = &rom[0x134..0x143];
        if let Some(pos) = title.iter().position(|&b| b == 0) {
            title = &title[..pos];
        }
        Ok(Self {
            title: String::from_utf8_lossy(title).trim().to_string(),
            cgb_flag: rom[0x143],
            sgb_flag: rom[0x146],
            new_licensee: [rom[0x144], rom[0x145]],
            old_licensee: rom[0x14B],
            cart_type: rom[0x147],
            rom_size_code: rom[0x148],
            ram_size_code: rom[0x149],
            version: rom[0x14C],
            header_checksum: rom[0x14D],
            global_checksum: u16::from_be_bytes([rom[0x14E], rom[0x14F]]),
        })
    }

    pub fn cgb_only(&self) -> bool {
        self.cgb_flag == 0xC0
    }

    pub fn cgb_supported(&self) -> bool {
        self.cgb_flag & 0x80 != 0
    }

    pub fn rom_size(&self) -> Result<usize, LoadError> {
        if self.rom_size_code > 8 {
            return Err(LoadError::InvalidRomSize(self.rom_size_code));
        }
        Ok(0x8000 << self.rom_size_code)
    }
}

/// Checksum the boot ROM verifies over 0x0134-0x014C.
pub fn header_checksum(rom: &[u8]) -> u8 {
    rom[0x134..=0x14C]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_sub(b).wrapping_sub(1))
}

/// Sum of the title bytes, used by color hardware to pick a DMG palette.
pub fn title_hash(rom: &[u8]) -> u8 {
    rom[0x134..0x144]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
}

fn mbc_for(cart_type: u8, ram_code: u8, rom_len: usize) -> Result<(MbcKind, CartFlags), LoadError> {
    let (kind, ram, battery, rtc, rumble) = match cart_type {
        0x00 => (MbcKind::None, false, false, false, false),
        0x08 => (MbcKind::None, true, false, false, false),
        0x09 => (MbcKind::None, true, true, false, false),
        0x01 => (MbcKind::Mbc1, false, false, false, false),
        0x02 => (MbcKind::Mbc1, true, false, false, false),
        0x03 => (MbcKind::Mbc1, true, true, false, false),
        0x05 => (MbcKind::Mbc2, true, false, false, false),
        0x06 => (MbcKind::Mbc2, true, true, false, false),
        0x0F => (MbcKind::Mbc3, false, true, true, false),
        0x10 => (MbcKind::Mbc3, true, true, true, false),
        0x11 => (MbcKind::Mbc3, false, false, false, false),
        0x12 => (MbcKind::Mbc3, true, false, false, false),
        0x13 => (MbcKind::Mbc3, true, true, false, false),
        0x19 => (MbcKind::Mbc5, false, false, false, false),
        0x1A => (MbcKind::Mbc5, true, false, false, false),
        0x1B => (MbcKind::Mbc5, true, true, false, false),
        0x1C => (MbcKind::Mbc5, false, false, false, true),
        0x1D => (MbcKind::Mbc5, true, false, false, true),
        0x1E => (MbcKind::Mbc5, true, true, false, true),
        other => return Err(LoadError::UnsupportedCartType(other)),
    };
    let kind = if kind == MbcKind::Mbc3 && (ram_code == 0x05 || rom_len > 0x20_0000) {
        MbcKind::Mbc30
    } else {
        kind
    };
    Ok((
        kind,
        CartFlags {
            ram,
            battery,
            rtc,
            rumble,
        },
    ))
}

fn ram_size_for(code: u8) -> Result<usize, LoadError> {
    Ok(match code {
        0x00 => 0,
        0x01 => 0x800,
        0x02 => 0x2000,
        0x03 => 0x8000,
        0x04 => 0x20000,
        0x05 => 0x10000,
        other => return Err(LoadError::InvalidRamSize(other)),
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RtcRegisters {
    seconds: u8,
    minutes: u8,
    hours: u8,
    /// 9-bit day counter.
    days: u16,
    halt: bool,
    carry: bool,
}

impl RtcRegisters {
    fn control(&self) -> u8 {
        let mut out = ((self.days >> 8) as u8) & 0x01;
        if self.halt {
            out |= 0x40;
        }
        if self.carry {
            out |= 0x80;
        }
        out
    }

    fn set_control(&mut self, value: u8) {
        self.days = (self.days & 0x00FF) | (((value & 0x01) as u16) << 8);
        self.halt = value & 0x40 != 0;
        self.carry = value & 0x80 != 0;
    }

    fn read(&self, reg: u8) -> u8 {
        match reg {
            0x08 => self.seconds & 0x3F,
            0x09 => self.minutes & 0x3F,
            0x0A => self.hours & 0x1F,
            0x0B => self.days as u8,
            0x0C => self.control(),
            _ => 0xFF,
        }
    }

    fn to_words(self) -> [u32; 5] {
        [
            self.seconds as u32,
            self.minutes as u32,
            self.hours as u32,
            (self.days & 0xFF) as u32,
            self.control() as u32,
        ]
    }

    fn from_words(words: &[u32; 5]) -> Self {
        let mut regs = Self {
            seconds: (words[0] & 0x3F) as u8,
            minutes: (words[1] & 0x3F) as u8,
            hours: (words[2] & 0x1F) as u8,
            days: (words[3] & 0xFF) as u16,
            halt: false,
            carry: false,
        };
        regs.set_control(words[4] as u8);
        regs
    }

    fn save(&self, w: &mut StateWriter) {
        w.u8(self.seconds);
        w.u8(self.minutes);
        w.u8(self.hours);
        w.u16(self.days);
        w.bool(self.halt);
        w.bool(self.carry);
    }

    fn load(r: &mut StateReader) -> Result<Self, SnapshotError> {
        Ok(Self {
            seconds: r.u8()? & 0x3F,
            minutes: r.u8()? & 0x3F,
            hours: r.u8()? & 0x1F,
            days: r.u16()? & 0x01FF,
            halt: r.bool()?,
            carry: r.bool()?,
        })
    }
}

/// MBC3 real-time clock, advanced by emulated cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Rtc {
    regs: RtcRegisters,
    latched: RtcRegisters,
    subsecond_cycles: u32,
    latch_armed: bool,
}

impl Rtc {
    fn write(&mut self, reg: u8, value: u8) {
        match reg {
            0x08 => {
                self.regs.seconds = value & 0x3F;
                self.subsecond_cycles = 0;
            }
            0x09 => self.regs.minutes = value & 0x3F,
            0x0A => self.regs.hours = value & 0x1F,
            0x0B => self.regs.days = (self.regs.days & 0x0100) | value as u16,
            0x0C => self.regs.set_control(value),
            _ => {}
        }
    }

    /// Latches on a 0x00 followed by 0x01.
    fn latch_write(&mut self, value: u8) {
        if value == 0x01 && self.latch_armed {
            self.latched = self.regs;
        }
        self.latch_armed = value == 0x00;
    }

    fn step(&mut self, cycles: u32) {
        if self.regs.halt {
            return;
        }
        let mut sub = self.subsecond_cycles + cycles;
        let mut seconds = 0u64;
        while sub >= CPU_CLOCK_HZ {
            sub -= CPU_CLOCK_HZ;
            seconds += 1;
        }
        self.subsecond_cycles = sub;
        if seconds > 0 {
            self.advance_seconds(seconds);
        }
    }

    fn advance_seconds(&mut self, mut seconds: u64) {
        while seconds > 0 {
            // out-of-range values count up to 63 and wrap without carrying
            let sec = self.regs.seconds as u64;
            let until_minute = if sec <= 59 { 60 - sec } else { 64 - sec + 60 };
            if seconds < until_minute {
                self.regs.seconds = ((sec + seconds) & 0x3F) as u8;
                return;
            }
            seconds -= until_minute;
            self.regs.seconds = 0;
            self.tick_minute();
        }
    }

    fn tick_minute(&mut self) {
        if self.regs.minutes == 59 {
            self.regs.minutes = 0;
            self.tick_hour();
        } else {
            self.regs.minutes = (self.regs.minutes + 1) & 0x3F;
        }
    }

    fn tick_hour(&mut self) {
        if self.regs.hours == 23 {
            self.regs.hours = 0;
            if self.regs.days >= 0x01FF {
                self.regs.days = 0;
                self.regs.carry = true;
            } else {
                self.regs.days += 1;
            }
        } else {
            self.regs.hours = (self.regs.hours + 1) & 0x1F;
        }
    }

    fn save(&self, w: &mut StateWriter) {
        self.regs.save(w);
        self.latched.save(w);
        w.u32(self.subsecond_cycles);
        w.bool(self.latch_armed);
    }

    fn load(r: &mut StateReader) -> Result<Self, SnapshotError> {
        let regs = RtcRegisters::load(r)?;
        let latched = RtcRegisters::load(r)?;
        let subsecond_cycles = r.u32()?;
        if subsecond_cycles >= CPU_CLOCK_HZ {
            return Err(SnapshotError::Corrupt("rtc subsecond counter out of range"));
        }
        Ok(Self {
            regs,
            latched,
            subsecond_cycles,
            latch_armed: r.bool()?,
        })
    }
}

/// Fixed 48-byte clock record stored next to battery RAM.
///
/// Layout: live S/M/H/DL/DH as five `u32`, the latched copy in the same
/// form, then a `u64` host timestamp in seconds. All little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RtcRecord {
    pub regs: [u32; 5],
    pub latched: [u32; 5],
    /// Host wall-clock seconds at the time the record was produced. The core
    /// never reads the host clock; frontends fill this in.
    pub timestamp: u64,
}

impl RtcRecord {
    pub fn to_bytes(&self) -> [u8; RTC_RECORD_SIZE] {
        let mut out = [0u8; RTC_RECORD_SIZE];
        for (i, v) in self.regs.iter().chain(self.latched.iter()).enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        out[40..48].copy_from_slice(&self.timestamp.to_le_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, SaveDataError> {
        if data.len() != RTC_RECORD_SIZE {
            return Err(SaveDataError::BadRtcRecord(data.len()));
        }
        let word = |i: usize| {
            u32::from_le_bytes([data[i * 4], data[i * 4 + 1], data[i * 4 + 2], data[i * 4 + 3]])
        };
        let mut record = Self::default();
        for i in 0..5 {
            record.regs[i] = word(i);
            record.latched[i] = word(i + 5);
        }
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&data[40..48]);
        record.timestamp = u64::from_le_bytes(ts);
        Ok(record)
    }
}

/// Battery-backed contents handed to and from the frontend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SaveData {
    pub ram: Vec<u8>,
    pub rtc: Option<RtcRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Banking {
    rom_bank: u16,
    ram_bank: u8,
    /// MBC1 banking mode.
    mode: bool,
    ram_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RamMap {
    Unmapped,
    Bank(usize),
    Mbc2,
    Rtc(u8),
}

/// Banking state decoded from a snapshot, not yet applied.
#[derive(Debug, Clone)]
pub struct CartState {
    banking: Banking,
    ram: Vec<u8>,
    rtc: Option<Rtc>,
}

#[derive(Debug, Clone)]
pub struct Cartridge {
    rom: Vec<u8>,
    ram: Vec<u8>,
    header: Header,
    mbc: MbcKind,
    flags: CartFlags,
    banking: Banking,
    rtc: Option<Rtc>,
    rom_lo: usize,
    rom_hi: usize,
    ram_map: RamMap,
}

impl Cartridge {
    /// Validates the header and builds a cartridge in its power-on state.
    pub fn load(rom: Vec<u8>) -> Result<Self, LoadError> {
        let header = Header::parse(&rom)?;
        let declared = header.rom_size()?;
        if declared > rom.len() {
            return Err(LoadError::RomSizeMismatch {
                declared,
                actual: rom.len(),
            });
        }
        let (mbc, mut flags) = mbc_for(header.cart_type, header.ram_size_code, rom.len())?;
        let ram_size = if mbc == MbcKind::Mbc2 {
            MBC2_RAM_SIZE
        } else if flags.ram {
            ram_size_for(header.ram_size_code)?
        } else {
            0
        };
        flags.ram = ram_size > 0;

        let mut cart = Self {
            rom,
            ram: vec![0; ram_size],
            header,
            mbc,
            flags,
            banking: Banking {
                rom_bank: 1,
                ..Banking::default()
            },
            rtc: flags.rtc.then(Rtc::default),
            rom_lo: 0,
            rom_hi: ROM_BANK_SIZE,
            ram_map: RamMap::Unmapped,
        };
        cart.remap();
        log::debug!(
            "cartridge {:?} rom={}KiB ram={}B flags={:?}",
            cart.mbc,
            cart.rom.len() / 1024,
            cart.ram.len(),
            cart.flags
        );
        Ok(cart)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn mbc(&self) -> MbcKind {
        self.mbc
    }

    pub fn flags(&self) -> CartFlags {
        self.flags
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn has_save(&self) -> bool {
        self.flags.ram && self.flags.battery
    }

    pub fn has_rtc(&self) -> bool {
        self.rtc.is_some()
    }

    /// Power-on banking registers. RAM and the clock are kept.
    pub fn reset_banking(&mut self) {
        self.banking = Banking {
            rom_bank: 1,
            ..Banking::default()
        };
        self.remap();
    }

    fn rom_banks(&self) -> usize {
        (self.rom.len() / ROM_BANK_SIZE).max(1)
    }

    fn ram_banks(&self) -> usize {
        self.ram.len().div_ceil(RAM_BANK_SIZE).max(1)
    }

    /// Recomputes the cached offsets from the banking registers.
    pub fn remap(&mut self) {
        let rom_banks = self.rom_banks();
        let ram_banks = self.ram_banks();
        let b = self.banking;

        let (lo, hi) = match self.mbc {
            MbcKind::None => (0, 1),
            MbcKind::Mbc1 => {
                let upper = ((b.ram_bank & 0x03) as usize) << 5;
                let low = match (b.rom_bank & 0x1F) as usize {
                    0 => 1,
                    n => n,
                };
                let lo = if b.mode { upper } else { 0 };
                (lo, upper | low)
            }
            MbcKind::Mbc2 => (0, ((b.rom_bank & 0x0F) as usize).max(1)),
            MbcKind::Mbc3 => (0, ((b.rom_bank & 0x7F) as usize).max(1)),
            MbcKind::Mbc30 => (0, ((b.rom_bank & 0xFF) as usize).max(1)),
            MbcKind::Mbc5 => (0, (b.rom_bank & 0x1FF) as usize),
        };
        self.rom_lo = (lo % rom_banks) * ROM_BANK_SIZE;
        self.rom_hi = (hi % rom_banks) * ROM_BANK_SIZE;

        self.ram_map = if !b.ram_enabled && self.mbc != MbcKind::None {
            RamMap::Unmapped
        } else {
            match self.mbc {
                MbcKind::None if self.ram.is_empty() => RamMap::Unmapped,
                MbcKind::None => RamMap::Bank(0),
                MbcKind::Mbc2 => RamMap::Mbc2,
                MbcKind::Mbc1 => {
                    let bank = if b.mode { (b.ram_bank & 0x03) as usize } else { 0 };
                    RamMap::Bank((bank % ram_banks) * RAM_BANK_SIZE)
                }
                MbcKind::Mbc3 | MbcKind::Mbc30 => {
                    let max = if self.mbc == MbcKind::Mbc30 { 0x07 } else { 0x03 };
                    match b.ram_bank {
                        0x08..=0x0C if self.rtc.is_some() => RamMap::Rtc(b.ram_bank),
                        n if n <= max && !self.ram.is_empty() => {
                            RamMap::Bank((n as usize % ram_banks) * RAM_BANK_SIZE)
                        }
                        _ => RamMap::Unmapped,
                    }
                }
                MbcKind::Mbc5 => {
                    let mask = if self.flags.rumble { 0x07 } else { 0x0F };
                    let bank = (b.ram_bank & mask) as usize;
                    RamMap::Bank((bank % ram_banks) * RAM_BANK_SIZE)
                }
            }
        };
        if self.ram.is_empty() && matches!(self.ram_map, RamMap::Bank(_) | RamMap::Mbc2) {
            self.ram_map = RamMap::Unmapped;
        }
        log::trace!(
            "remap rom_lo={:#x} rom_hi={:#x} ram={:?}",
            self.rom_lo,
            self.rom_hi,
            self.ram_map
        );
    }

    #[inline]
    pub fn read_rom(&self, addr: u16) -> u8 {
        let offset = if addr < 0x4000 {
            self.rom_lo + addr as usize
        } else {
            self.rom_hi + (addr as usize - 0x4000)
        };
        self.rom.get(offset).copied().unwrap_or(0xFF)
    }

    pub fn read_ram(&self, addr: u16) -> u8 {
        let rel = (addr as usize).wrapping_sub(0xA000) & 0x1FFF;
        match self.ram_map {
            RamMap::Unmapped => 0xFF,
            RamMap::Bank(base) => self.ram[(base + rel) % self.ram.len()],
            RamMap::Mbc2 => 0xF0 | (self.ram[rel & 0x1FF] & 0x0F),
            RamMap::Rtc(reg) => self.rtc.as_ref().map_or(0xFF, |rtc| rtc.latched.read(reg)),
        }
    }

    pub fn write_ram(&mut self, addr: u16, val: u8) {
        let rel = (addr as usize).wrapping_sub(0xA000) & 0x1FFF;
        match self.ram_map {
            RamMap::Unmapped => {}
            RamMap::Bank(base) => {
                let len = self.ram.len();
                self.ram[(base + rel) % len] = val;
            }
            RamMap::Mbc2 => self.ram[rel & 0x1FF] = val & 0x0F,
            RamMap::Rtc(reg) => {
                if let Some(rtc) = self.rtc.as_mut() {
                    rtc.write(reg, val);
                }
            }
        }
    }

    /// Handles a write to the controller registers at 0x0000-0x7FFF.
    pub fn write(&mut self, addr: u16, val: u8) {
        let b = &mut self.banking;
        match (self.mbc, addr) {
            (MbcKind::None, _) => return,
            (MbcKind::Mbc2, 0x0000..=0x3FFF) => {
                // address bit 8 selects between RAM enable and ROM bank
                if addr & 0x0100 == 0 {
                    b.ram_enabled = val & 0x0F == 0x0A;
                } else {
                    b.rom_bank = (val & 0x0F) as u16;
                }
            }
            (MbcKind::Mbc2, _) => return,
            (_, 0x0000..=0x1FFF) => b.ram_enabled = val & 0x0F == 0x0A,
            (MbcKind::Mbc1, 0x2000..=0x3FFF) => b.rom_bank = (val & 0x1F) as u16,
            (MbcKind::Mbc1, 0x4000..=0x5FFF) => b.ram_bank = val & 0x03,
            (MbcKind::Mbc1, 0x6000..=0x7FFF) => b.mode = val & 0x01 != 0,
            (MbcKind::Mbc3, 0x2000..=0x3FFF) => b.rom_bank = (val & 0x7F) as u16,
            (MbcKind::Mbc30, 0x2000..=0x3FFF) => b.rom_bank = val as u16,
            (MbcKind::Mbc3 | MbcKind::Mbc30, 0x4000..=0x5FFF) => b.ram_bank = val & 0x0F,
            (MbcKind::Mbc3 | MbcKind::Mbc30, 0x6000..=0x7FFF) => {
                if let Some(rtc) = self.rtc.as_mut() {
                    rtc.latch_write(val);
                }
                return;
            }
            (MbcKind::Mbc5, 0x2000..=0x2FFF) => b.rom_bank = (b.rom_bank & 0x100) | val as u16,
            (MbcKind::Mbc5, 0x3000..=0x3FFF) => {
                b.rom_bank = (b.rom_bank & 0xFF) | (((val & 0x01) as u16) << 8)
            }
            (MbcKind::Mbc5, 0x4000..=0x5FFF) => b.ram_bank = val & 0x0F,
            _ => return,
        }
        self.remap();
    }

    /// Advances the clock by normal-speed CPU cycles.
    pub fn step_rtc(&mut self, cycles: u32) {
        if let Some(rtc) = self.rtc.as_mut() {
            rtc.step(cycles);
        }
    }

    /// Moves the clock forward by host time that passed while not running.
    pub fn advance_rtc_seconds(&mut self, seconds: u64) {
        if let Some(rtc) = self.rtc.as_mut()
            && !rtc.regs.halt
        {
            rtc.advance_seconds(seconds);
        }
    }

    pub fn rtc_record(&self) -> Option<RtcRecord> {
        self.rtc.as_ref().map(|rtc| RtcRecord {
            regs: rtc.regs.to_words(),
            latched: rtc.latched.to_words(),
            timestamp: 0,
        })
    }

    pub fn save_data(&self) -> Result<SaveData, SaveDataError> {
        if !self.has_save() {
            return Err(SaveDataError::NoBattery);
        }
        Ok(SaveData {
            ram: self.ram.clone(),
            rtc: self.rtc_record(),
        })
    }

    /// Replaces battery RAM and, when present, the clock. A RAM size
    /// mismatch leaves everything unchanged.
    pub fn load_save_data(&mut self, data: &SaveData) -> Result<(), SaveDataError> {
        if !self.has_save() {
            return Err(SaveDataError::NoBattery);
        }
        if data.ram.len() != self.ram.len() {
            return Err(SaveDataError::SizeMismatch {
                expected: self.ram.len(),
                actual: data.ram.len(),
            });
        }
        self.ram.copy_from_slice(&data.ram);
        if let (Some(rtc), Some(record)) = (self.rtc.as_mut(), data.rtc.as_ref()) {
            rtc.regs = RtcRegisters::from_words(&record.regs);
            rtc.latched = RtcRegisters::from_words(&record.latched);
            rtc.subsecond_cycles = 0;
        }
        Ok(())
    }

    pub fn apply_state(&mut self, state: CartState) {
        self.banking = state.banking;
        let n = self.ram.len();
        self.ram.copy_from_slice(&state.ram[..n]);
        if self.rtc.is_some() {
            self.rtc = state.rtc;
        }
    }
}

fn save_banking(b: &Banking, w: &mut StateWriter) {
    w.u16(b.rom_bank);
    w.u8(b.ram_bank);
    w.bool(b.mode);
    w.bool(b.ram_enabled);
}

/// Writes the cartridge block. Its size does not depend on the cartridge.
pub fn save_cart_state(cart: Option<&Cartridge>, w: &mut StateWriter) {
    let empty = Rtc::default();
    match cart {
        Some(cart) => {
            save_banking(&cart.banking, w);
            w.padded(&cart.ram, CART_RAM_BLOCK);
            w.bool(cart.rtc.is_some());
            cart.rtc.as_ref().unwrap_or(&empty).save(w);
        }
        None => {
            save_banking(&Banking::default(), w);
            w.padded(&[], CART_RAM_BLOCK);
            w.bool(false);
            empty.save(w);
        }
    }
}

/// Decodes the cartridge block. Returns `None` when no cartridge is loaded.
pub fn decode_cart_state(
    cart: Option<&Cartridge>,
    r: &mut StateReader,
) -> Result<Option<CartState>, SnapshotError> {
    let banking = Banking {
        rom_bank: r.u16()?,
        ram_bank: r.u8()?,
        mode: r.bool()?,
        ram_enabled: r.bool()?,
    };
    let mut ram = vec![0u8; cart.map_or(0, |c| c.ram.len())];
    r.padded_into(&mut ram, CART_RAM_BLOCK)?;
    let has_rtc = r.bool()?;
    let rtc = Rtc::load(r)?;

    let Some(cart) = cart else {
        return Ok(None);
    };
    if has_rtc != cart.has_rtc() {
        return Err(SnapshotError::Corrupt("rtc presence does not match cartridge"));
    }
    Ok(Some(CartState {
        banking,
        ram,
        rtc: has_rtc.then_some(rtc),
    }))
}
