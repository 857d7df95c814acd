//! Battery RAM, clock records and snapshots on disk.

use std::error::Error;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use dotmatrix_core::GameBoy;
use dotmatrix_core::cartridge::{RtcRecord, SaveData};

/// Host wall clock in whole seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn sibling(rom: &Path, save_dir: Option<&Path>, ext: &str) -> PathBuf {
    let name = rom.with_extension(ext);
    match (save_dir, name.file_name()) {
        (Some(dir), Some(file)) => dir.join(file),
        _ => name,
    }
}

pub fn save_path(rom: &Path, save_dir: Option<&Path>) -> PathBuf {
    sibling(rom, save_dir, "sav")
}

pub fn rtc_path(rom: &Path, save_dir: Option<&Path>) -> PathBuf {
    sibling(rom, save_dir, "rtc")
}

pub fn snapshot_path(rom: &Path, slot: u8) -> PathBuf {
    rom.with_extension(format!("ss{slot}"))
}

/// Loads battery RAM (and the clock record, if any) for the inserted
/// cartridge. Returns false when there was nothing to load.
pub fn load_battery(
    gb: &mut GameBoy,
    rom: &Path,
    save_dir: Option<&Path>,
    now: u64,
) -> Result<bool, Box<dyn Error>> {
    if !gb.has_save() {
        return Ok(false);
    }
    let path = save_path(rom, save_dir);
    let ram = match std::fs::read(&path) {
        Ok(ram) => ram,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::info!("no save file at {}", path.display());
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };

    let rtc = if gb.has_rtc() {
        read_rtc(&rtc_path(rom, save_dir))
    } else {
        None
    };
    gb.load_save_data(&SaveData { ram, rtc })?;

    if let Some(record) = rtc
        && record.timestamp != 0
        && now > record.timestamp
    {
        let elapsed = now - record.timestamp;
        log::info!("advancing cartridge clock by {elapsed}s");
        gb.advance_rtc_seconds(elapsed);
    }
    log::info!("loaded battery save from {}", path.display());
    Ok(true)
}

fn read_rtc(path: &Path) -> Option<RtcRecord> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                log::warn!("failed to read {}: {e}", path.display());
            }
            return None;
        }
    };
    match RtcRecord::from_bytes(&data) {
        Ok(record) => Some(record),
        Err(e) => {
            log::warn!("ignoring {}: {e}", path.display());
            None
        }
    }
}

/// Writes battery RAM and the clock record stamped with `now`. Cartridges
/// without a battery are skipped.
pub fn store_battery(
    gb: &GameBoy,
    rom: &Path,
    save_dir: Option<&Path>,
    now: u64,
) -> Result<bool, Box<dyn Error>> {
    if !gb.has_save() {
        return Ok(false);
    }
    let data = gb.save_data()?;
    if let Some(dir) = save_dir {
        std::fs::create_dir_all(dir)?;
    }
    let path = save_path(rom, save_dir);
    std::fs::write(&path, &data.ram)?;
    if let Some(mut record) = data.rtc {
        record.timestamp = now;
        std::fs::write(rtc_path(rom, save_dir), record.to_bytes())?;
    }
    log::info!("wrote battery save to {}", path.display());
    Ok(true)
}

pub fn save_snapshot(gb: &GameBoy, path: &Path) -> std::io::Result<()> {
    std::fs::write(path, gb.save_state())?;
    log::info!("saved snapshot to {}", path.display());
    Ok(())
}

/// Restores a snapshot file. The machine is left untouched on failure.
pub fn load_snapshot(gb: &mut GameBoy, path: &Path) -> Result<(), Box<dyn Error>> {
    let data = std::fs::read(path)?;
    gb.load_state(&data)?;
    log::info!("restored snapshot from {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// MBC3+TIMER+RAM+BATTERY with 8 KiB RAM, spinning at 0x150.
    fn rtc_rom() -> Vec<u8> {
        let mut rom = vec![0u8; 0x8000];
        rom[0x100..0x104].copy_from_slice(&[0x00, 0xC3, 0x50, 0x01]);
        rom[0x150..0x152].copy_from_slice(&[0x18, 0xFE]);
        rom[0x147] = 0x10;
        rom[0x149] = 0x02;
        rom
    }

    fn machine() -> GameBoy {
        let mut gb = GameBoy::default();
        gb.load_rom(rtc_rom()).unwrap();
        gb.mmu.write(0x0000, 0x0A);
        gb
    }

    fn rtc_seconds(gb: &mut GameBoy) -> u8 {
        gb.mmu.write(0x6000, 0x00);
        gb.mmu.write(0x6000, 0x01);
        gb.mmu.write(0x4000, 0x08);
        let secs = gb.mmu.read(0xA000);
        gb.mmu.write(0x4000, 0x00);
        secs
    }

    #[test]
    fn paths_follow_the_rom_or_save_dir() {
        let rom = Path::new("/games/zelda.gb");
        assert_eq!(save_path(rom, None), PathBuf::from("/games/zelda.sav"));
        assert_eq!(
            rtc_path(rom, Some(Path::new("/saves"))),
            PathBuf::from("/saves/zelda.rtc")
        );
        assert_eq!(snapshot_path(rom, 2), PathBuf::from("/games/zelda.ss2"));
    }

    #[test]
    fn battery_round_trip_with_clock_catch_up() {
        let dir = tempfile::tempdir().unwrap();
        let rom = dir.path().join("game.gb");

        let mut gb = machine();
        gb.mmu.write(0xA000, 0x5C);
        gb.advance_rtc_seconds(10);
        assert!(store_battery(&gb, &rom, None, 1_000).unwrap());
        assert_eq!(std::fs::read(dir.path().join("game.rtc")).unwrap().len(), 48);

        let mut restored = machine();
        assert!(load_battery(&mut restored, &rom, None, 1_030).unwrap());
        assert_eq!(restored.mmu.read(0xA000), 0x5C);
        assert_eq!(rtc_seconds(&mut restored), 40);
    }

    #[test]
    fn missing_save_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut gb = machine();
        assert!(!load_battery(&mut gb, &dir.path().join("new.gb"), None, 0).unwrap());
    }

    #[test]
    fn wrong_size_save_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let rom = dir.path().join("game.gb");
        std::fs::write(save_path(&rom, None), [0u8; 16]).unwrap();
        let mut gb = machine();
        gb.mmu.write(0xA000, 0x33);
        assert!(load_battery(&mut gb, &rom, None, 0).is_err());
        assert_eq!(gb.mmu.read(0xA000), 0x33);
    }

    #[test]
    fn corrupt_rtc_file_still_loads_ram() {
        let dir = tempfile::tempdir().unwrap();
        let rom = dir.path().join("game.gb");
        std::fs::write(save_path(&rom, None), vec![0x77; 0x2000]).unwrap();
        std::fs::write(rtc_path(&rom, None), [1u8; 5]).unwrap();
        let mut gb = machine();
        assert!(load_battery(&mut gb, &rom, None, 0).unwrap());
        assert_eq!(gb.mmu.read(0xA100), 0x77);
    }

    #[test]
    fn snapshot_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.ss0");
        let mut gb = machine();
        gb.run_frame();
        save_snapshot(&gb, &path).unwrap();

        let mut other = machine();
        load_snapshot(&mut other, &path).unwrap();
        assert_eq!(other.save_state(), gb.save_state());

        std::fs::write(&path, [0u8; 8]).unwrap();
        let before = other.save_state();
        assert!(load_snapshot(&mut other, &path).is_err());
        assert_eq!(other.save_state(), before);
    }
}
