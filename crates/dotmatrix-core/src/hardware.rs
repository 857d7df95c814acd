/// Master clock of the handheld in normal speed.
pub const CPU_CLOCK_HZ: u32 = 4_194_304;

/// CPU cycles in one video frame (154 lines of 456 dots).
pub const FRAME_CPU_CYCLES: u32 = 70_224;

pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
/// The console model the loaded cartridge runs as.
///
/// `Sgb` behaves like `Dmg` in the core; it only changes the post-boot
/// register values reported to software.
pub enum SystemType {
    #[default]
    Dmg,
    Sgb,
    Gbc,
}

impl SystemType {
    #[inline]
    pub const fn is_gbc(self) -> bool {
        matches!(self, SystemType::Gbc)
    }

    pub const fn name(self) -> &'static str {
        match self {
            SystemType::Dmg => "DMG",
            SystemType::Sgb => "SGB",
            SystemType::Gbc => "GBC",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
/// User preference used when resolving [`SystemType`] from the header.
pub enum SystemSelection {
    #[default]
    Auto,
    ForceDmg,
    ForceSgb,
    ForceGbc,
}
