use crate::hardware::SystemSelection;
use crate::palette::PaletteSelection;

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Emulator-wide settings consulted at construction and at ROM load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub system: SystemSelection,
    pub palette: PaletteSelection,
    /// Output rate of the mixer in Hz.
    pub sample_rate: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system: SystemSelection::Auto,
            palette: PaletteSelection::Default,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}
