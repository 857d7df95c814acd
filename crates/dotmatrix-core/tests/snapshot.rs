mod common;

use common::{ACTIVE_ROM, IDLE_ROM, machine, run_frames};
use dotmatrix_core::Button;
use dotmatrix_core::snapshot::{HEADER_SIZE, SNAPSHOT_SIZE, SnapshotError};
use dotmatrix_core::{cpu, io, mmu, ppu};

#[test]
fn resave_after_load_is_byte_identical() {
    let mut gb = machine(&ACTIVE_ROM);
    gb.mmu.write(0x0000, 0x0A);
    gb.mmu.write(0xA010, 0x5A);
    run_frames(&mut gb, 7);
    let saved = gb.save_state();

    let mut other = machine(&ACTIVE_ROM);
    other.load_state(&saved).unwrap();
    assert_eq!(other.save_state(), saved);
    assert_eq!((other.cpu.pc, other.cpu.sp), (gb.cpu.pc, gb.cpu.sp));
}

#[test]
fn restored_machine_runs_in_lockstep() {
    let mut gb = machine(&ACTIVE_ROM);
    run_frames(&mut gb, 3);
    let saved = gb.save_state();

    let mut other = machine(&ACTIVE_ROM);
    other.load_state(&saved).unwrap();
    for _ in 0..5 {
        assert_eq!(gb.run_frame(), other.run_frame());
    }
    assert_eq!(gb.framebuffer(), other.framebuffer());
    assert_eq!(gb.save_state(), other.save_state());
}

#[test]
fn record_size_is_fixed() {
    let empty = dotmatrix_core::GameBoy::default().save_state();
    let loaded = machine(&IDLE_ROM).save_state();
    let big_ram = machine(&ACTIVE_ROM).save_state();
    assert_eq!(empty.len(), SNAPSHOT_SIZE);
    assert_eq!(loaded.len(), SNAPSHOT_SIZE);
    assert_eq!(big_ram.len(), SNAPSHOT_SIZE);
}

#[test]
fn bad_magic_leaves_state_untouched() {
    let mut gb = machine(&IDLE_ROM);
    run_frames(&mut gb, 2);
    let before = gb.save_state();

    let mut bad = before.clone();
    bad[0] = 7;
    assert_eq!(gb.load_state(&bad), Err(SnapshotError::BadMagic(7)));
    assert_eq!(gb.save_state(), before);
}

#[test]
fn unsupported_version_is_rejected() {
    let mut gb = machine(&IDLE_ROM);
    let mut bad = gb.save_state();
    bad[4] = 9;
    assert_eq!(
        gb.load_state(&bad),
        Err(SnapshotError::UnsupportedVersion(9))
    );
}

#[test]
fn truncated_record_leaves_state_untouched() {
    let mut gb = machine(&IDLE_ROM);
    gb.press(Button::Start);
    run_frames(&mut gb, 2);
    let before = gb.save_state();

    let err = gb.load_state(&before[..before.len() - 1]).unwrap_err();
    assert!(matches!(err, SnapshotError::SizeMismatch { .. }));
    assert_eq!(gb.save_state(), before);
}

#[test]
fn corrupt_block_leaves_state_untouched() {
    let mut gb = machine(&IDLE_ROM);
    run_frames(&mut gb, 1);
    let before = gb.save_state();
    let mut other = machine(&IDLE_ROM);
    run_frames(&mut other, 4);
    let mut bad = other.save_state();

    // a PPU mode outside 0..=3 fails validation after several blocks decoded
    let ppu_mode = ppu_mode_offset(&bad);
    bad[ppu_mode] = 9;
    assert!(matches!(
        gb.load_state(&bad),
        Err(SnapshotError::Corrupt(_))
    ));
    assert_eq!(gb.save_state(), before);
}

/// Offset of the PPU mode byte: header, I/O, HRAM, WRAM and CPU blocks,
/// then VRAM, OAM and LY.
fn ppu_mode_offset(record: &[u8]) -> usize {
    let offset = HEADER_SIZE
        + io::STATE_SIZE
        + mmu::HRAM_SIZE
        + mmu::WRAM_SIZE
        + cpu::STATE_SIZE
        + ppu::VRAM_SIZE
        + ppu::OAM_SIZE
        + 1;
    assert!(record[offset] <= 3);
    offset
}
