mod common;

use common::{IDLE_ROM, RomBuilder, machine, run_frames};
use dotmatrix_core::config::Config;
use dotmatrix_core::hardware::{SystemSelection, SystemType};
use dotmatrix_core::io::{self, INT_JOYPAD};
use dotmatrix_core::palette::{Palette, PaletteSelection};
use dotmatrix_core::{Button, Event, GameBoy};

#[test]
fn post_boot_registers() {
    let gb = machine(&IDLE_ROM);
    assert_eq!(gb.mmu.read(io::LCDC), 0x91);
    assert_eq!(gb.mmu.read(io::BGP), 0xFC);
    assert_eq!(gb.mmu.read(io::NR52), 0xF1);
    assert_eq!(gb.mmu.read(io::DIV), 0xAB);
    assert_eq!(gb.mmu.read(io::IE), 0x00);
    assert_eq!(gb.cpu.a, 0x01);
    assert_eq!(gb.cpu.sp, 0xFFFE);
    assert_eq!(gb.cpu.pc, 0x0100);
}

#[test]
fn hram_and_ie_are_plain_memory() {
    let mut gb = machine(&IDLE_ROM);
    gb.mmu.write(0xFF80, 0x12);
    gb.mmu.write(0xFFFE, 0x34);
    gb.mmu.write(io::IE, 0x1F);
    assert_eq!(gb.mmu.read(0xFF80), 0x12);
    assert_eq!(gb.mmu.read(0xFFFE), 0x34);
    assert_eq!(gb.mmu.read(io::IE), 0x1F);
}

#[test]
fn rom_area_is_read_only_without_mbc() {
    let mut gb = machine(&IDLE_ROM);
    let before = gb.mmu.read(0x0150);
    gb.mmu.write(0x0150, !before);
    assert_eq!(gb.mmu.read(0x0150), before);
}

#[test]
fn joypad_reads_through_selected_line() {
    let mut gb = machine(&IDLE_ROM);
    gb.mmu.write(io::IF, 0x00);
    // select the action buttons
    gb.mmu.write(io::P1, 0x10);
    gb.press(Button::Start);
    assert_eq!(gb.mmu.read(io::P1) & 0x0F, 0x07);
    assert_ne!(gb.mmu.read(io::IF) & INT_JOYPAD, 0);

    // directions are not selected
    gb.mmu.write(io::P1, 0x20);
    assert_eq!(gb.mmu.read(io::P1) & 0x0F, 0x0F);

    gb.release(Button::Start);
    gb.mmu.write(io::P1, 0x10);
    assert_eq!(gb.mmu.read(io::P1) & 0x0F, 0x0F);
}

#[test]
fn dma_register_copies_into_oam() {
    let mut gb = machine(&IDLE_ROM);
    gb.drain_events();
    for i in 0..0xA0u16 {
        gb.mmu.write(0xC100 + i, i as u8 ^ 0x5A);
    }
    gb.mmu.write(io::DMA, 0xC1);
    assert_eq!(gb.mmu.read(0xFE00), 0x5A);
    assert_eq!(gb.mmu.read(0xFE9F), 0x9F ^ 0x5A);
    assert!(
        gb.drain_events()
            .contains(&Event::Dma { source: 0xC100 })
    );
}

#[test]
fn key1_is_absent_on_dmg() {
    let mut gb = machine(&IDLE_ROM);
    gb.mmu.write(io::KEY1, 0x01);
    assert_eq!(gb.mmu.read(io::KEY1), 0xFF);
}

#[test]
fn stop_with_key1_armed_switches_speed_on_gbc() {
    let rom = RomBuilder::new()
        .cgb_flag(0xC0)
        .program(&[
            0x3E, 0x01, // LD A,$01
            0xE0, 0x4D, // LDH (KEY1),A
            0x10, 0x00, // STOP
            0x18, 0xFE, // JR -2
        ])
        .build();
    let mut gb = machine(&rom);
    assert_eq!(gb.system_type(), SystemType::Gbc);
    assert_eq!(gb.cpu.a, 0x11);
    run_frames(&mut gb, 1);
    assert!(gb.cpu.double_speed);
    assert_eq!(gb.mmu.read(io::KEY1), 0xFE);
    assert!(!gb.drain_events().contains(&Event::Stop));
}

#[test]
fn double_speed_runs_twice_the_instructions_per_frame() {
    let rom = RomBuilder::new()
        .cgb_flag(0xC0)
        .program(&[
            0x3E, 0x01, // LD A,$01
            0xE0, 0x4D, // LDH (KEY1),A
            0x10, 0x00, // STOP
            0x18, 0xFE, // JR -2
        ])
        .build();
    let mut gb = machine(&rom);
    run_frames(&mut gb, 1);
    gb.drain_events();
    // one PPU frame now takes twice as many CPU cycles
    let mut vblanks = 0;
    for _ in 0..20 {
        gb.run_frame();
        vblanks += gb
            .drain_events()
            .iter()
            .filter(|e| **e == Event::VBlank)
            .count();
    }
    assert!((9..=11).contains(&vblanks), "vblanks: {vblanks}");
}

#[test]
fn stop_on_dmg_waits_for_a_button() {
    let rom = RomBuilder::new()
        .program(&[
            0x10, 0x00, // STOP
            0x3E, 0x77, // LD A,$77
            0xE0, 0x80, // LDH ($80),A
            0x18, 0xFE, // JR -2
        ])
        .build();
    let mut gb = machine(&rom);
    run_frames(&mut gb, 2);
    assert!(gb.cpu.stopped);
    assert_eq!(gb.mmu.read(0xFF80), 0x00);
    assert!(gb.drain_events().contains(&Event::Stop));

    gb.press(Button::A);
    run_frames(&mut gb, 1);
    assert!(!gb.cpu.stopped);
    assert_eq!(gb.mmu.read(0xFF80), 0x77);
}

#[test]
fn forced_gbc_conflicts_with_dmg_rom() {
    let mut gb = GameBoy::new(Config {
        system: SystemSelection::ForceGbc,
        ..Config::default()
    });
    assert!(gb.load_rom(IDLE_ROM.clone()).is_err());
    assert!(!gb.is_loaded());
}

#[test]
fn builtin_palette_follows_title_and_survives_reset() {
    let config = Config {
        palette: PaletteSelection::Builtin { fallback: None },
        ..Config::default()
    };
    let mut gb = GameBoy::new(config);
    gb.load_rom(RomBuilder::new().title("POKEMON RED").build())
        .unwrap();
    let red = gb.mmu.ppu.palette();
    assert_ne!(red, Palette::CREAM);
    run_frames(&mut gb, 2);
    assert_eq!(gb.framebuffer()[0], red.bg[0]);

    gb.reset();
    assert_eq!(gb.mmu.ppu.palette(), red);

    gb.load_rom(RomBuilder::new().title("HOMEBREW").build())
        .unwrap();
    assert_eq!(gb.mmu.ppu.palette(), Palette::CREAM);
}
