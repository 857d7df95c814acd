//! Synthetic cartridge images for integration tests.
#![allow(dead_code)]

use once_cell::sync::Lazy;

use dotmatrix_core::GameBoy;
use dotmatrix_core::config::Config;
use dotmatrix_core::hardware::FRAME_CPU_CYCLES;

pub const CODE_START: usize = 0x150;

/// Builds a ROM image with a valid header whose entry point jumps to
/// [`CODE_START`].
pub struct RomBuilder {
    rom: Vec<u8>,
}

impl RomBuilder {
    pub fn new() -> Self {
        let mut rom = vec![0u8; 0x8000];
        // NOP; JP $0150
        rom[0x100..0x104].copy_from_slice(&[0x00, 0xC3, 0x50, 0x01]);
        // JR -2 at the code start so an empty program idles
        rom[CODE_START] = 0x18;
        rom[CODE_START + 1] = 0xFE;
        Self { rom }
    }

    pub fn title(mut self, title: &str) -> Self {
        let bytes = title.as_bytes();
        let n = bytes.len().min(15);
        self.rom[0x134..0x134 + n].copy_from_slice(&bytes[..n]);
        self
    }

    pub fn cgb_flag(mut self, flag: u8) -> Self {
        self.rom[0x143] = flag;
        self
    }

    pub fn cart_type(mut self, kind: u8) -> Self {
        self.rom[0x147] = kind;
        self
    }

    /// Resizes the image to match `code` and tags every bank's first byte
    /// with its number (bank 0 keeps its header area intact).
    pub fn rom_size_code(mut self, code: u8) -> Self {
        self.rom[0x148] = code;
        self.rom.resize(0x8000 << code, 0);
        for bank in 1..self.rom.len() / 0x4000 {
            self.rom[bank * 0x4000] = bank as u8;
            self.rom[bank * 0x4000 + 1] = (bank >> 8) as u8;
        }
        self
    }

    pub fn ram_size_code(mut self, code: u8) -> Self {
        self.rom[0x149] = code;
        self
    }

    pub fn program(mut self, code: &[u8]) -> Self {
        self.rom[CODE_START..CODE_START + code.len()].copy_from_slice(code);
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        let mut sum: u8 = 0;
        for &b in &self.rom[0x134..0x14D] {
            sum = sum.wrapping_sub(b).wrapping_sub(1);
        }
        self.rom[0x14D] = sum;
        self.rom
    }
}

/// ROM-only cartridge that spins in place.
pub static IDLE_ROM: Lazy<Vec<u8>> = Lazy::new(|| RomBuilder::new().title("IDLE").build());

/// MBC1 cartridge with battery RAM that starts the timer at 4096 Hz and
/// halts between VBlank interrupts, counting them into HRAM 0xFF80.
pub static ACTIVE_ROM: Lazy<Vec<u8>> = Lazy::new(|| {
    let rom = RomBuilder::new()
        .title("ACTIVE")
        .cart_type(0x03)
        .ram_size_code(0x02)
        .program(&[
            0x3E, 0x04, // LD A,$04
            0xE0, 0x07, // LDH (TAC),A
            0x3E, 0x01, // LD A,$01
            0xE0, 0xFF, // LDH (IE),A
            0xAF, // XOR A
            0xE0, 0x80, // LDH ($80),A
            0xFB, // EI
            0x76, // HALT
            0x00, // NOP
            0x18, 0xFC, // JR -4
        ])
        .build();
    with_vblank_counter(rom)
});

/// Installs a VBlank handler at 0x40 that increments HRAM 0xFF80.
pub fn with_vblank_counter(mut rom: Vec<u8>) -> Vec<u8> {
    rom[0x40..0x46].copy_from_slice(&[
        0xF5, // PUSH AF
        0xF0, 0x80, // LDH A,($80)
        0x3C, // INC A
        0xE0, 0x80, // LDH ($80),A
    ]);
    rom[0x46..0x48].copy_from_slice(&[0xF1, 0xD9]); // POP AF; RETI
    rom
}

pub fn machine(rom: &[u8]) -> GameBoy {
    let mut gb = GameBoy::new(Config::default());
    gb.load_rom(rom.to_vec()).expect("test rom loads");
    gb
}

pub fn run_frames(gb: &mut GameBoy, frames: usize) -> u64 {
    let mut total = 0u64;
    for _ in 0..frames {
        let cycles = gb.run_frame();
        assert!(cycles >= FRAME_CPU_CYCLES);
        total += cycles as u64;
    }
    total
}
