//! Cycle-stepped DMG Game Boy emulation core.
//!
//! This crate contains the platform-agnostic emulator logic (CPU/bus/PPU/APU
//! and friends). Frontends live in separate crates and drive the core via the
//! [`gameboy`] facade, draining [`events::Event`]s between steps.

/// Sound channels, frame sequencer and mixer.
pub mod apu;

/// Cartridge header, bank controllers and the MBC3 clock.
pub mod cartridge;

/// Core-wide settings.
pub mod config;

/// SM83 CPU core.
pub mod cpu;

/// Notifications queued while stepping.
pub mod events;

/// High-level facade that wires the CPU and bus into a single machine.
pub mod gameboy;

/// Clock constants and console models.
pub mod hardware;

/// Memory-mapped I/O register bank.
pub mod io;

/// Joypad register and edge-triggered interrupt behavior.
pub mod joypad;

/// Memory map and hardware plumbing.
pub mod mmu;

/// Host colors for the four DMG shades.
pub mod palette;

/// Pixel Processing Unit (PPU) emulation.
pub mod ppu;

/// Serial unit and link cable plumbing.
pub mod serial;

/// Save-state records.
pub mod snapshot;

/// Divider/timer unit.
pub mod timer;

pub use config::Config;
pub use events::{ErrorEvent, ErrorKind, Event};
pub use gameboy::{GameBoy, RomInfo};
pub use joypad::Button;
