mod common;

use common::{IDLE_ROM, machine, run_frames};
use dotmatrix_core::GameBoy;
use dotmatrix_core::apu::wave_sample;
use dotmatrix_core::config::Config;
use dotmatrix_core::io;

fn status(gb: &GameBoy) -> u8 {
    gb.mmu.read(io::NR52) & 0x0F
}

#[test]
fn channel_one_plays_after_boot() {
    let gb = machine(&IDLE_ROM);
    assert_eq!(status(&gb), 0x01);
}

#[test]
fn trigger_enables_channel_and_length_silences_it() {
    let mut gb = machine(&IDLE_ROM);
    gb.mmu.write(io::NR22, 0xF0);
    gb.mmu.write(io::NR21, 0x3F); // one step of length left
    gb.mmu.write(io::NR24, 0xC0);
    assert_eq!(status(&gb) & 0x02, 0x02);

    // the length counter runs at 256 Hz, so a few frames are plenty
    run_frames(&mut gb, 3);
    assert_eq!(status(&gb) & 0x02, 0);
}

#[test]
fn register_reads_apply_unused_bit_masks() {
    let mut gb = machine(&IDLE_ROM);
    gb.mmu.write(io::NR11, 0x80);
    assert_eq!(gb.mmu.read(io::NR11), 0xBF);
    gb.mmu.write(io::NR13, 0x12);
    assert_eq!(gb.mmu.read(io::NR13), 0xFF);
    gb.mmu.write(io::NR30, 0x80);
    assert_eq!(gb.mmu.read(io::NR30), 0xFF);
}

#[test]
fn wave_ram_survives_power_cycle() {
    let mut gb = machine(&IDLE_ROM);
    for i in 0..16u16 {
        gb.mmu.write(io::WAVE_RAM + i, (i as u8) * 0x11);
    }
    gb.mmu.write(io::NR52, 0x00);
    assert_eq!(gb.mmu.read(io::NR52), 0x70);
    assert_eq!(gb.mmu.read(io::NR51), 0x00);

    // registers are locked while powered off, wave RAM is not
    gb.mmu.write(io::NR51, 0xFF);
    assert_eq!(gb.mmu.read(io::NR51), 0x00);
    gb.mmu.write(io::WAVE_RAM, 0xAB);

    gb.mmu.write(io::NR52, 0x80);
    assert_eq!(gb.mmu.read(io::WAVE_RAM), 0xAB);
    assert_eq!(gb.mmu.read(io::WAVE_RAM + 15), 0xFF);
}

#[test]
fn silent_machine_settles_to_zero_output() {
    let mut gb = machine(&IDLE_ROM);
    gb.mmu.write(io::NR52, 0x00);
    run_frames(&mut gb, 2);
    gb.take_samples();
    gb.run_frame();
    assert!(gb.take_samples().iter().all(|&s| s == 0));
}

#[test]
fn custom_sample_rate_is_honoured() {
    let mut gb = GameBoy::new(Config {
        sample_rate: 22_050,
        ..Config::default()
    });
    gb.load_rom(IDLE_ROM.clone()).unwrap();
    gb.run_frame();
    let frames = gb.take_samples().len() / 2;
    assert!((367..=371).contains(&frames), "samples: {frames}");
}

#[test]
fn wave_volume_shift_table() {
    assert_eq!(wave_sample(0xF, 0), 0);
    assert_eq!(wave_sample(0xF, 1), 15);
    assert_eq!(wave_sample(0x0, 1), -15);
    assert!(wave_sample(0xF, 2).abs() <= wave_sample(0xF, 1).abs());
    assert!(wave_sample(0xF, 3).abs() <= wave_sample(0xF, 2).abs());
}
