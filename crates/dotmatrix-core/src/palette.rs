//! DMG shade palettes.
//!
//! The DMG has no color RAM: BGP/OBP0/OBP1 select one of four shades per
//! color id. A [`Palette`] maps those shades to `0x00RRGGBB` host colors,
//! separately for the background and both object palettes.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Palette {
    pub bg: [u32; 4],
    pub obj0: [u32; 4],
    pub obj1: [u32; 4],
}

impl Palette {
    /// The green LCD tint of the original handheld.
    pub const GREEN: Palette = Palette::uniform([0x009BBC0F, 0x008BAC0F, 0x00306230, 0x000F380F]);

    /// Neutral greyscale.
    pub const GREY: Palette = Palette::uniform([0x00FFFFFF, 0x00AAAAAA, 0x00555555, 0x00000000]);

    /// Warm off-white shades.
    pub const CREAM: Palette = Palette::uniform([0x00F7E7C6, 0x00D68E49, 0x00A63725, 0x00331E50]);

    pub const fn uniform(shades: [u32; 4]) -> Self {
        Self::new(shades, shades, shades)
    }

    pub const fn new(bg: [u32; 4], obj0: [u32; 4], obj1: [u32; 4]) -> Self {
        Self { bg, obj0, obj1 }
    }

    /// Looks up the color-hardware compatibility palette for a title.
    ///
    /// `title_hash` is the byte sum of the 16 title bytes. Entries that
    /// share a hash are told apart by the fourth title byte.
    pub fn builtin(title_hash: u8, fourth: u8) -> Option<Palette> {
        BUILTIN
            .iter()
            .find(|(hash, letter, _)| *hash == title_hash && letter.is_none_or(|l| l == fourth))
            .map(|&(_, _, palette)| palette)
    }
}

const WHITE_RED: [u32; 4] = [0x00FFFFFF, 0x00FF8484, 0x00943A3A, 0x00000000];
const WHITE_GREEN: [u32; 4] = [0x00FFFFFF, 0x007BFF31, 0x00008400, 0x00000000];
const WHITE_BLUE: [u32; 4] = [0x00FFFFFF, 0x0063A5FF, 0x000000FF, 0x00000000];
const WHITE_YELLOW: [u32; 4] = [0x00FFFFFF, 0x00FFFF00, 0x00FF0000, 0x00000000];

const BUILTIN: &[(u8, Option<u8>, Palette)] = &[
    // POKEMON RED
    (0x14, None, Palette::new(WHITE_RED, WHITE_GREEN, WHITE_RED)),
    // POKEMON YELLOW
    (0x15, None, Palette::uniform(WHITE_YELLOW)),
    // DR.MARIO
    (0x3C, None, Palette::new(WHITE_BLUE, WHITE_RED, WHITE_GREEN)),
    // SUPER MARIOLAND
    (
        0x46,
        Some(b'E'),
        Palette::new(
            [0x00FFFFFF, 0x00ADAD84, 0x0042737B, 0x00000000],
            [0x00FFFFFF, 0x00FF7300, 0x00944200, 0x00000000],
            [0x00FFFFFF, 0x005ABDFF, 0x00FF0000, 0x000000FF],
        ),
    ),
    // METROID2
    (
        0x46,
        Some(b'R'),
        Palette::new(
            [0x00FFFFFF, 0x007BFF31, 0x000063C5, 0x00000000],
            WHITE_RED,
            WHITE_RED,
        ),
    ),
    // KIRBY DREAM LAND
    (
        0x49,
        None,
        Palette::new(
            [0x00FFFFFF, 0x00FFAD63, 0x00843100, 0x00000000],
            WHITE_RED,
            WHITE_BLUE,
        ),
    ),
    // POKEMON BLUE
    (0x61, None, Palette::new(WHITE_BLUE, WHITE_RED, WHITE_BLUE)),
    // ZELDA
    (
        0x70,
        None,
        Palette::new(
            WHITE_RED,
            [0x00FFFFFF, 0x0000FF00, 0x00318400, 0x00004A00],
            WHITE_BLUE,
        ),
    ),
    // TETRIS
    (0xDB, None, Palette::uniform(WHITE_YELLOW)),
];

impl Default for Palette {
    fn default() -> Self {
        Palette::CREAM
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
/// How the host colors for DMG shades are chosen at ROM load.
pub enum PaletteSelection {
    /// Use [`Palette::default`].
    #[default]
    Default,
    /// Use a caller-supplied palette.
    Custom(Palette),
    /// Use the title's compatibility palette, else `fallback`, else the
    /// default.
    Builtin { fallback: Option<Palette> },
}

impl PaletteSelection {
    /// The palette to use before a cartridge is known.
    pub fn resolve(self) -> Palette {
        match self {
            PaletteSelection::Default => Palette::default(),
            PaletteSelection::Custom(p) => p,
            PaletteSelection::Builtin { fallback } => fallback.unwrap_or_default(),
        }
    }

    /// The palette for a cartridge with the given title hash and fourth
    /// title byte.
    pub fn resolve_for(self, title_hash: u8, fourth: u8) -> Palette {
        match self {
            PaletteSelection::Builtin { .. } => {
                Palette::builtin(title_hash, fourth).unwrap_or_else(|| self.resolve())
            }
            _ => self.resolve(),
        }
    }
}

/// Maps the 2-bit shade fields of a palette register through `shades`.
#[inline]
pub fn map_palette(register: u8, shades: &[u32; 4]) -> [u32; 4] {
    let mut out = [0u32; 4];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = shades[((register >> (i << 1)) & 3) as usize];
    }
    out
}
