//! Versioned save-state records.
//!
//! ## Binary layout
//!
//! A record starts with a 16-byte header:
//! - `u32` magic (1)
//! - `u32` version (1)
//! - 8 reserved bytes, zero
//!
//! followed by these blocks, in order, with no length prefixes:
//! 1. I/O register bank (0x80 bytes) and IE
//! 2. HRAM (0x7F bytes)
//! 3. WRAM (0x2000 bytes)
//! 4. CPU
//! 5. PPU
//! 6. Timer
//! 7. APU
//! 8. Serial
//! 9. Joypad
//! 10. Cartridge banking state, RAM padded to [`CART_RAM_BLOCK`] and the RTC block
//!
//! All multi-byte values are little-endian. The total length only depends on
//! the format version.

use thiserror::Error;

use crate::events::ErrorKind;
use crate::gameboy::GameBoy;
use crate::mmu::{HRAM_SIZE, WRAM_SIZE};
use crate::{apu, cartridge, cpu, io, joypad, ppu, serial, timer};

pub const SNAPSHOT_MAGIC: u32 = 1;
pub const SNAPSHOT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 16;

/// Cartridge RAM is always stored at this size so records have a fixed length.
pub const CART_RAM_BLOCK: usize = 0x20000;

/// Byte length of every record of the current version.
pub const SNAPSHOT_SIZE: usize = HEADER_SIZE
    + io::STATE_SIZE
    + HRAM_SIZE
    + WRAM_SIZE
    + cpu::STATE_SIZE
    + ppu::STATE_SIZE
    + timer::STATE_SIZE
    + apu::STATE_SIZE
    + serial::STATE_SIZE
    + joypad::STATE_SIZE
    + cartridge::STATE_SIZE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot magic {0} does not match")]
    BadMagic(u32),

    #[error("snapshot version {0} is not supported")]
    UnsupportedVersion(u32),

    #[error("snapshot is {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("snapshot is corrupt: {0}")]
    Corrupt(&'static str),
}

/// Append-only little-endian encoder for state blocks.
#[derive(Default)]
pub struct StateWriter {
    buf: Vec<u8>,
}

impl StateWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn f32(&mut self, v: f32) {
        self.u32(v.to_bits());
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn u32s(&mut self, v: &[u32]) {
        for &x in v {
            self.u32(x);
        }
    }

    /// Writes `v` followed by zero padding up to `len` bytes.
    pub fn padded(&mut self, v: &[u8], len: usize) {
        let n = v.len().min(len);
        self.buf.extend_from_slice(&v[..n]);
        self.buf.resize(self.buf.len() + (len - n), 0);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a state record. Every read is bounds checked.
pub struct StateReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> StateReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SnapshotError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(SnapshotError::Corrupt("unexpected end of data"))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, SnapshotError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(SnapshotError::Corrupt("invalid boolean")),
        }
    }

    pub fn u16(&mut self) -> Result<u16, SnapshotError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, SnapshotError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn f32(&mut self) -> Result<f32, SnapshotError> {
        Ok(f32::from_bits(self.u32()?))
    }

    pub fn bytes_into(&mut self, out: &mut [u8]) -> Result<(), SnapshotError> {
        out.copy_from_slice(self.take(out.len())?);
        Ok(())
    }

    pub fn u32s_into(&mut self, out: &mut [u32]) -> Result<(), SnapshotError> {
        for slot in out.iter_mut() {
            *slot = self.u32()?;
        }
        Ok(())
    }

    /// Reads `len` bytes, keeping the first `out.len()` of them.
    pub fn padded_into(&mut self, out: &mut [u8], len: usize) -> Result<(), SnapshotError> {
        let block = self.take(len)?;
        let n = out.len().min(len);
        out[..n].copy_from_slice(&block[..n]);
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn finish(self) -> Result<(), SnapshotError> {
        if self.remaining() != 0 {
            return Err(SnapshotError::Corrupt("trailing data"));
        }
        Ok(())
    }
}

fn write_header(w: &mut StateWriter) {
    w.u32(SNAPSHOT_MAGIC);
    w.u32(SNAPSHOT_VERSION);
    w.u32(0);
    w.u32(0);
}

fn check_header(data: &[u8]) -> Result<(), SnapshotError> {
    let mut r = StateReader::new(data);
    let magic = r
        .u32()
        .map_err(|_| SnapshotError::Corrupt("truncated header"))?;
    if magic != SNAPSHOT_MAGIC {
        return Err(SnapshotError::BadMagic(magic));
    }
    let version = r
        .u32()
        .map_err(|_| SnapshotError::Corrupt("truncated header"))?;
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }
    Ok(())
}

impl GameBoy {
    /// Serializes the complete mutable machine state.
    pub fn save_state(&self) -> Vec<u8> {
        let mut w = StateWriter::with_capacity(SNAPSHOT_SIZE);
        write_header(&mut w);
        self.mmu.io.save_state(&mut w);
        w.bytes(&self.mmu.hram);
        w.bytes(&self.mmu.wram[..]);
        self.cpu.save_state(&mut w);
        self.mmu.ppu.save_state(&mut w);
        self.mmu.timer.save_state(&mut w);
        self.mmu.apu.save_state(&mut w);
        self.mmu.serial.save_state(&mut w);
        self.mmu.joypad.save_state(&mut w);
        crate::cartridge::save_cart_state(self.mmu.cart.as_ref(), &mut w);
        w.into_inner()
    }

    /// Restores a record produced by [`GameBoy::save_state`].
    ///
    /// Every block is decoded into a staged copy first; the machine is only
    /// modified once the whole record validated.
    pub fn load_state(&mut self, data: &[u8]) -> Result<(), SnapshotError> {
        match self.try_load_state(data) {
            Ok(()) => Ok(()),
            Err(e) => {
                log::warn!("snapshot rejected: {e}");
                self.mmu.events.error(ErrorKind::Snapshot, e.to_string());
                Err(e)
            }
        }
    }

    fn try_load_state(&mut self, data: &[u8]) -> Result<(), SnapshotError> {
        check_header(data)?;
        if data.len() != SNAPSHOT_SIZE {
            return Err(SnapshotError::SizeMismatch {
                expected: SNAPSHOT_SIZE,
                actual: data.len(),
            });
        }

        let mut r = StateReader::new(&data[HEADER_SIZE..]);

        let mut io = self.mmu.io.clone();
        io.load_state(&mut r)?;
        let mut hram = self.mmu.hram;
        r.bytes_into(&mut hram)?;
        let mut wram = self.mmu.wram.clone();
        r.bytes_into(&mut wram[..])?;
        let mut cpu = self.cpu.clone();
        cpu.load_state(&mut r)?;
        let mut ppu = self.mmu.ppu.clone();
        ppu.load_state(&mut r)?;
        let mut timer = self.mmu.timer.clone();
        timer.load_state(&mut r)?;
        let mut apu = self.mmu.apu.clone();
        apu.load_state(&mut r)?;
        let serial = self.mmu.serial.decode_state(&mut r)?;
        let mut joypad = self.mmu.joypad.clone();
        joypad.load_state(&mut r)?;
        let cart = crate::cartridge::decode_cart_state(self.mmu.cart.as_ref(), &mut r)?;
        r.finish()?;

        self.mmu.io = io;
        self.mmu.hram = hram;
        self.mmu.wram = wram;
        self.cpu = cpu;
        self.mmu.ppu = ppu;
        self.mmu.timer = timer;
        self.mmu.apu = apu;
        self.mmu.serial.apply_state(serial);
        self.mmu.joypad = joypad;
        if let (Some(c), Some(state)) = (self.mmu.cart.as_mut(), cart) {
            c.apply_state(state);
            c.remap();
        }
        log::debug!("restored snapshot ({} bytes)", data.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_reports_truncation() {
        let mut r = StateReader::new(&[1, 2, 3]);
        assert_eq!(r.u16(), Ok(0x0201));
        assert_eq!(r.u16(), Err(SnapshotError::Corrupt("unexpected end of data")));
    }

    #[test]
    fn padded_block_keeps_fixed_length() {
        let mut w = StateWriter::new();
        w.padded(&[0xAA, 0xBB], 8);
        assert_eq!(w.len(), 8);

        let data = w.into_inner();
        let mut out = [0u8; 2];
        let mut r = StateReader::new(&data);
        r.padded_into(&mut out, 8).unwrap();
        assert_eq!(out, [0xAA, 0xBB]);
        assert!(r.finish().is_ok());
    }

    #[test]
    fn header_rejects_wrong_version() {
        let mut w = StateWriter::new();
        w.u32(SNAPSHOT_MAGIC);
        w.u32(SNAPSHOT_VERSION + 1);
        w.bytes(&[0; 8]);
        assert_eq!(
            check_header(&w.into_inner()),
            Err(SnapshotError::UnsupportedVersion(SNAPSHOT_VERSION + 1))
        );
    }

    fn written_len(save: impl FnOnce(&mut StateWriter)) -> usize {
        let mut w = StateWriter::new();
        save(&mut w);
        w.len()
    }

    #[test]
    fn blocks_match_declared_sizes() {
        let gb = GameBoy::default();
        assert_eq!(written_len(|w| gb.mmu.io.save_state(w)), io::STATE_SIZE);
        assert_eq!(written_len(|w| gb.cpu.save_state(w)), cpu::STATE_SIZE);
        assert_eq!(written_len(|w| gb.mmu.ppu.save_state(w)), ppu::STATE_SIZE);
        assert_eq!(written_len(|w| gb.mmu.timer.save_state(w)), timer::STATE_SIZE);
        assert_eq!(written_len(|w| gb.mmu.apu.save_state(w)), apu::STATE_SIZE);
        assert_eq!(written_len(|w| gb.mmu.serial.save_state(w)), serial::STATE_SIZE);
        assert_eq!(written_len(|w| gb.mmu.joypad.save_state(w)), joypad::STATE_SIZE);
        assert_eq!(
            written_len(|w| cartridge::save_cart_state(None, w)),
            cartridge::STATE_SIZE
        );
        assert_eq!(gb.save_state().len(), SNAPSHOT_SIZE);
    }

    #[test]
    fn rejected_record_is_reported() {
        let mut gb = GameBoy::default();
        assert_eq!(
            gb.load_state(&[1, 0, 0, 0]),
            Err(SnapshotError::Corrupt("truncated header"))
        );
        assert!(gb.drain_events().iter().any(|e| matches!(
            e,
            crate::Event::Error(crate::events::ErrorEvent::Error {
                kind: ErrorKind::Snapshot,
                ..
            })
        )));
    }

    #[test]
    fn bool_rejects_garbage() {
        let mut r = StateReader::new(&[2]);
        assert!(r.bool().is_err());
    }
}
