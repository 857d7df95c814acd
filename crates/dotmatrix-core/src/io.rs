//! Flat I/O register bank covering 0xFF00-0xFF7F and IE.
//!
//! Units keep their internal counters to themselves but publish every
//! CPU-visible register here; the bus and the units read and write the
//! bank directly. The bank itself has no behavior beyond per-register
//! read and write masks.

use crate::snapshot::{SnapshotError, StateReader, StateWriter};

pub const P1: u16 = 0xFF00;
pub const SB: u16 = 0xFF01;
pub const SC: u16 = 0xFF02;
pub const DIV: u16 = 0xFF04;
pub const TIMA: u16 = 0xFF05;
pub const TMA: u16 = 0xFF06;
pub const TAC: u16 = 0xFF07;
pub const IF: u16 = 0xFF0F;
pub const NR10: u16 = 0xFF10;
pub const NR11: u16 = 0xFF11;
pub const NR12: u16 = 0xFF12;
pub const NR13: u16 = 0xFF13;
pub const NR14: u16 = 0xFF14;
pub const NR21: u16 = 0xFF16;
pub const NR22: u16 = 0xFF17;
pub const NR23: u16 = 0xFF18;
pub const NR24: u16 = 0xFF19;
pub const NR30: u16 = 0xFF1A;
pub const NR31: u16 = 0xFF1B;
pub const NR32: u16 = 0xFF1C;
pub const NR33: u16 = 0xFF1D;
pub const NR34: u16 = 0xFF1E;
pub const NR41: u16 = 0xFF20;
pub const NR42: u16 = 0xFF21;
pub const NR43: u16 = 0xFF22;
pub const NR44: u16 = 0xFF23;
pub const NR50: u16 = 0xFF24;
pub const NR51: u16 = 0xFF25;
pub const NR52: u16 = 0xFF26;
pub const WAVE_RAM: u16 = 0xFF30;
pub const LCDC: u16 = 0xFF40;
pub const STAT: u16 = 0xFF41;
pub const SCY: u16 = 0xFF42;
pub const SCX: u16 = 0xFF43;
pub const LY: u16 = 0xFF44;
pub const LYC: u16 = 0xFF45;
pub const DMA: u16 = 0xFF46;
pub const BGP: u16 = 0xFF47;
pub const OBP0: u16 = 0xFF48;
pub const OBP1: u16 = 0xFF49;
pub const WY: u16 = 0xFF4A;
pub const WX: u16 = 0xFF4B;
pub const KEY1: u16 = 0xFF4D;
pub const BOOT: u16 = 0xFF50;
pub const IE: u16 = 0xFFFF;

// Interrupt request bits shared by IF and IE.
pub const INT_VBLANK: u8 = 0x01;
pub const INT_STAT: u8 = 0x02;
pub const INT_TIMER: u8 = 0x04;
pub const INT_SERIAL: u8 = 0x08;
pub const INT_JOYPAD: u8 = 0x10;

pub const STATE_SIZE: usize = 0x81;

#[inline]
fn index(addr: u16) -> usize {
    (addr & 0x7F) as usize
}

/// Bits that always read back as 1.
fn read_mask(addr: u16, gbc: bool) -> u8 {
    match addr {
        P1 => 0xC0,
        SC => {
            if gbc {
                0x7C
            } else {
                0x7E
            }
        }
        TAC => 0xF8,
        IF => 0xE0,
        NR10 => 0x80,
        NR11 | NR21 => 0x3F,
        NR13 | NR23 | NR31 | NR33 | NR41 => 0xFF,
        NR14 | NR24 | NR34 | NR44 => 0xBF,
        NR30 => 0x7F,
        NR32 => 0x9F,
        NR52 => 0x70,
        STAT => 0x80,
        KEY1 => {
            if gbc {
                0x7E
            } else {
                0xFF
            }
        }
        0xFF01 | 0xFF04..=0xFF06 => 0x00,
        NR12 | NR22 => 0x00,
        0xFF20..=0xFF26 | 0xFF30..=0xFF3F => 0x00,
        0xFF40..=0xFF4B => 0x00,
        _ => 0xFF,
    }
}

/// Bits the CPU may change; the rest keep their current value.
fn write_mask(addr: u16) -> u8 {
    match addr {
        P1 => 0x30,
        SC => 0x83,
        TAC => 0x07,
        IF => 0x1F,
        NR52 => 0x80,
        STAT => 0x78,
        LY => 0x00,
        KEY1 => 0x01,
        _ => 0xFF,
    }
}

#[derive(Clone)]
pub struct Io {
    regs: [u8; 0x80],
    pub ie: u8,
    gbc: bool,
}

impl Io {
    pub fn new(gbc: bool) -> Self {
        let mut io = Self {
            regs: [0xFF; 0x80],
            ie: 0,
            gbc,
        };
        io.apply_post_boot();
        io
    }

    /// Register values left behind by the boot ROM.
    pub fn apply_post_boot(&mut self) {
        self.regs = [0xFF; 0x80];
        self.ie = 0;
        for &(addr, val) in &[
            (P1, 0xCF),
            (SB, 0x00),
            (SC, 0x7E),
            (TIMA, 0x00),
            (TMA, 0x00),
            (TAC, 0xF8),
            (IF, 0xE1),
            (NR10, 0x80),
            (NR11, 0xBF),
            (NR12, 0xF3),
            (NR14, 0xBF),
            (NR21, 0x3F),
            (NR22, 0x00),
            (NR24, 0xBF),
            (NR30, 0x7F),
            (NR31, 0xFF),
            (NR32, 0x9F),
            (NR34, 0xBF),
            (NR41, 0xFF),
            (NR42, 0x00),
            (NR43, 0x00),
            (NR44, 0xBF),
            (NR50, 0x77),
            (NR51, 0xF3),
            (NR52, 0xF1),
            (LCDC, 0x91),
            (STAT, 0x85),
            (SCY, 0x00),
            (SCX, 0x00),
            (LY, 0x00),
            (LYC, 0x00),
            (BGP, 0xFC),
            (OBP0, 0xFF),
            (OBP1, 0xFF),
            (WY, 0x00),
            (WX, 0x00),
        ] {
            self.regs[index(addr)] = val;
        }
        for i in 0..0x10u16 {
            self.regs[index(WAVE_RAM + i)] = 0x00;
        }
        self.regs[index(KEY1)] = if self.gbc { 0x7E } else { 0xFF };
    }

    pub fn is_gbc(&self) -> bool {
        self.gbc
    }

    /// Raw stored value, without any masking.
    #[inline]
    pub fn get(&self, addr: u16) -> u8 {
        if addr == IE {
            self.ie
        } else {
            self.regs[index(addr)]
        }
    }

    /// Stores `val` verbatim. Used by units publishing their own state.
    #[inline]
    pub fn set(&mut self, addr: u16, val: u8) {
        if addr == IE {
            self.ie = val;
        } else {
            self.regs[index(addr)] = val;
        }
    }

    /// CPU-visible value with unused bits forced high.
    pub fn read(&self, addr: u16) -> u8 {
        if addr == IE {
            return self.ie;
        }
        self.regs[index(addr)] | read_mask(addr, self.gbc)
    }

    /// CPU write, preserving read-only bits.
    pub fn write(&mut self, addr: u16, val: u8) {
        if addr == IE {
            self.ie = val;
            return;
        }
        let mask = write_mask(addr);
        let slot = &mut self.regs[index(addr)];
        *slot = (*slot & !mask) | (val & mask);
    }

    #[inline]
    pub fn request_interrupt(&mut self, bits: u8) {
        self.regs[index(IF)] |= bits & 0x1F;
    }

    #[inline]
    pub fn clear_interrupt(&mut self, bits: u8) {
        self.regs[index(IF)] &= !bits;
    }

    /// Requested and enabled interrupt bits.
    #[inline]
    pub fn pending_interrupts(&self) -> u8 {
        self.regs[index(IF)] & self.ie & 0x1F
    }

    pub fn wave_ram(&self) -> [u8; 0x10] {
        let mut out = [0u8; 0x10];
        out.copy_from_slice(&self.regs[0x30..0x40]);
        out
    }

    pub fn save_state(&self, w: &mut StateWriter) {
        w.bytes(&self.regs);
        w.u8(self.ie);
    }

    pub fn load_state(&mut self, r: &mut StateReader) -> Result<(), SnapshotError> {
        r.bytes_into(&mut self.regs)?;
        self.ie = r.u8()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unused_bits_read_high() {
        let mut io = Io::new(false);
        io.write(TAC, 0x00);
        assert_eq!(io.read(TAC), 0xF8);
        io.write(IF, 0x00);
        assert_eq!(io.read(IF), 0xE0);
        assert_eq!(io.read(0xFF03), 0xFF);
    }

    #[test]
    fn read_only_bits_survive_writes() {
        let mut io = Io::new(false);
        io.set(STAT, 0x02);
        io.write(STAT, 0xFF);
        assert_eq!(io.get(STAT) & 0x07, 0x02);
        assert_eq!(io.get(STAT) & 0x78, 0x78);

        io.set(LY, 0x90);
        io.write(LY, 0x00);
        assert_eq!(io.get(LY), 0x90);
    }

    #[test]
    fn pending_requires_enable() {
        let mut io = Io::new(false);
        io.write(IF, 0);
        io.request_interrupt(INT_TIMER | INT_VBLANK);
        io.ie = INT_TIMER;
        assert_eq!(io.pending_interrupts(), INT_TIMER);
    }
}
