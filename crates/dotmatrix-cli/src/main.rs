mod config;
mod persist;
mod screenshot;

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use dotmatrix_core::events::{ErrorEvent, ErrorKind};
use dotmatrix_core::hardware::{CPU_CLOCK_HZ, FRAME_CPU_CYCLES};
use dotmatrix_core::serial::NullLinkPort;
use dotmatrix_core::{Button, Event, GameBoy};

use config::{EmulationMode, FrontendConfig, PaletteName};

const DEFAULT_FRAMES: u64 = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Key {
    Right,
    Left,
    Up,
    Down,
    A,
    B,
    Select,
    Start,
}

impl From<Key> for Button {
    fn from(key: Key) -> Self {
        match key {
            Key::Right => Button::Right,
            Key::Left => Button::Left,
            Key::Up => Button::Up,
            Key::Down => Button::Down,
            Key::A => Button::A,
            Key::B => Button::B,
            Key::Select => Button::Select,
            Key::Start => Button::Start,
        }
    }
}

#[derive(Parser)]
#[command(name = "dotmatrix", version, about = "Headless DMG emulator")]
struct Args {
    /// Path to ROM file
    rom: PathBuf,

    /// Config file (defaults to the per-user config location)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Force DMG mode
    #[arg(long, conflicts_with_all = ["sgb", "gbc"])]
    dmg: bool,

    /// Force SGB mode
    #[arg(long, conflicts_with_all = ["dmg", "gbc"])]
    sgb: bool,

    /// Force GBC mode
    #[arg(long, conflicts_with_all = ["dmg", "sgb"])]
    gbc: bool,

    /// Shade palette for the four DMG colors
    #[arg(long, value_enum)]
    palette: Option<Palette>,

    /// Use the title's built-in palette when one is known
    #[arg(long)]
    builtin_palette: bool,

    /// Number of frames to run
    #[arg(long)]
    frames: Option<u64>,

    /// Number of emulated seconds to run
    #[arg(long)]
    seconds: Option<u64>,

    /// Number of CPU cycles to run
    #[arg(long)]
    cycles: Option<u64>,

    /// Buttons held for the whole run
    #[arg(long, value_enum, value_delimiter = ',')]
    hold: Vec<Key>,

    /// Print bytes sent over the serial port
    #[arg(long)]
    serial: bool,

    /// Loop the serial port back onto itself
    #[arg(long)]
    link_loopback: bool,

    /// Print CPU state once per emulated second
    #[arg(long)]
    debug: bool,

    /// Restore this snapshot before running
    #[arg(long)]
    load_state: Option<PathBuf>,

    /// Write a snapshot here after running
    #[arg(long)]
    save_state: Option<PathBuf>,

    /// Restore the numbered snapshot stored next to the ROM
    #[arg(long, conflicts_with = "load_state")]
    load_slot: Option<u8>,

    /// Write a numbered snapshot next to the ROM after running
    #[arg(long, conflicts_with = "save_state")]
    save_slot: Option<u8>,

    /// Write the last frame as PNG
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Do not read or write battery saves
    #[arg(long)]
    no_battery: bool,

    /// Store the effective settings back to the config file
    #[arg(long)]
    save_config: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Palette {
    Cream,
    Green,
    Grey,
}

impl From<Palette> for PaletteName {
    fn from(p: Palette) -> Self {
        match p {
            Palette::Cream => PaletteName::Cream,
            Palette::Green => PaletteName::Green,
            Palette::Grey => PaletteName::Grey,
        }
    }
}

/// When the frame loop stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Limits {
    frames: Option<u64>,
    cycles: Option<u64>,
}

impl Limits {
    fn from_args(args: &Args) -> Self {
        let cycles = match (args.cycles, args.seconds) {
            (Some(c), Some(s)) => Some(c.min(s * CPU_CLOCK_HZ as u64)),
            (Some(c), None) => Some(c),
            (None, Some(s)) => Some(s * CPU_CLOCK_HZ as u64),
            (None, None) => None,
        };
        let frames = match (args.frames, cycles) {
            (None, None) => Some(DEFAULT_FRAMES),
            (frames, _) => frames,
        };
        Self { frames, cycles }
    }

    fn reached(&self, frames: u64, cycles: u64) -> bool {
        self.frames.is_some_and(|max| frames >= max)
            || self.cycles.is_some_and(|max| cycles >= max)
    }
}

fn apply_overrides(cfg: &mut FrontendConfig, args: &Args) {
    if args.dmg {
        cfg.emulation_mode = EmulationMode::ForceDmg;
    } else if args.sgb {
        cfg.emulation_mode = EmulationMode::ForceSgb;
    } else if args.gbc {
        cfg.emulation_mode = EmulationMode::ForceGbc;
    }
    if let Some(p) = args.palette {
        cfg.palette = p.into();
    }
    if args.builtin_palette {
        cfg.builtin_palette = true;
    }
}

/// Forwards queued core events to the log.
fn report_events(gb: &mut GameBoy) {
    for event in gb.drain_events() {
        match event {
            Event::Error(e @ ErrorEvent::UnknownInstruction { .. }) => log::warn!("{e}"),
            Event::Error(ErrorEvent::Info(msg)) => log::info!("{msg}"),
            Event::Error(ErrorEvent::Warn(msg)) => log::warn!("{msg}"),
            Event::Error(
                e @ ErrorEvent::Error {
                    kind: ErrorKind::Memory,
                    ..
                },
            ) => log::debug!("{e}"),
            Event::Error(e @ ErrorEvent::Error { .. }) => log::error!("{e}"),
            Event::Stop => log::debug!("cpu stopped"),
            Event::VBlank | Event::HBlank | Event::Dma { .. } | Event::Halt => {}
        }
    }
}

fn print_serial(bytes: &[u8]) {
    let mut out = std::io::stdout().lock();
    for &b in bytes {
        let _ = if b.is_ascii_graphic() || b == b' ' || b == b'\n' {
            write!(out, "{}", b as char)
        } else {
            write!(out, "\\x{b:02X}")
        };
    }
    let _ = out.flush();
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let mut cfg = config::load_from_file(&config_path);
    apply_overrides(&mut cfg, &args);
    if args.save_config {
        config::save_to_file(&config_path, &cfg)?;
        log::info!("wrote config {}", config_path.display());
    }

    let rom = std::fs::read(&args.rom)
        .map_err(|e| format!("failed to read {}: {e}", args.rom.display()))?;
    let mut gb = GameBoy::new(cfg.core_config());
    let info = gb.load_rom(rom)?;
    println!(
        "Loaded \"{}\" ({:?}) as {}",
        info.header.title,
        info.mbc,
        info.system.name()
    );
    report_events(&mut gb);

    let save_dir = cfg.save_dir.as_deref();
    let battery = !args.no_battery;
    if battery
        && let Err(e) = persist::load_battery(&mut gb, &args.rom, save_dir, persist::unix_now())
    {
        log::warn!("battery save not loaded: {e}");
    }
    let load_state = args
        .load_state
        .clone()
        .or_else(|| args.load_slot.map(|slot| persist::snapshot_path(&args.rom, slot)));
    if let Some(path) = &load_state {
        persist::load_snapshot(&mut gb, path)?;
    }
    if args.link_loopback {
        gb.connect_link_cable(Box::new(NullLinkPort::new(true)));
    }
    for &key in &args.hold {
        gb.press(key.into());
    }

    let limits = Limits::from_args(&args);
    let frames_per_second = (CPU_CLOCK_HZ as u64).div_ceil(FRAME_CPU_CYCLES as u64);
    let mut frames = 0u64;
    let mut cycles = 0u64;
    while !limits.reached(frames, cycles) {
        cycles += gb.run_frame() as u64;
        frames += 1;
        report_events(&mut gb);
        // nothing plays the audio; keep the queue from filling
        gb.take_samples();

        let serial = gb.take_serial_output();
        if args.serial && !serial.is_empty() {
            print_serial(&serial);
        }
        if args.debug && frames.is_multiple_of(frames_per_second) {
            println!("{}", gb.cpu.debug_state());
        }
    }
    log::info!("ran {frames} frames ({cycles} cycles)");

    if let Some(path) = &args.screenshot {
        screenshot::write_png(path, gb.framebuffer())?;
    }
    let save_state = args
        .save_state
        .clone()
        .or_else(|| args.save_slot.map(|slot| persist::snapshot_path(&args.rom, slot)));
    if let Some(path) = &save_state {
        persist::save_snapshot(&gb, path)?;
    }
    if battery && cfg.autosave {
        persist::store_battery(&gb, &args.rom, save_dir, persist::unix_now())?;
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
