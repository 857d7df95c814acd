use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use dotmatrix_core::config::{Config, DEFAULT_SAMPLE_RATE};
use dotmatrix_core::hardware::SystemSelection;
use dotmatrix_core::palette::{Palette, PaletteSelection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EmulationMode {
    #[default]
    Auto,
    ForceDmg,
    ForceSgb,
    ForceGbc,
}

impl From<EmulationMode> for SystemSelection {
    fn from(mode: EmulationMode) -> Self {
        match mode {
            EmulationMode::Auto => SystemSelection::Auto,
            EmulationMode::ForceDmg => SystemSelection::ForceDmg,
            EmulationMode::ForceSgb => SystemSelection::ForceSgb,
            EmulationMode::ForceGbc => SystemSelection::ForceGbc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PaletteName {
    #[default]
    Cream,
    Green,
    Grey,
}

impl PaletteName {
    pub fn palette(self) -> Palette {
        match self {
            Self::Cream => Palette::CREAM,
            Self::Green => Palette::GREEN,
            Self::Grey => Palette::GREY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    pub emulation_mode: EmulationMode,
    pub palette: PaletteName,
    /// Prefer the title's compatibility palette over `palette`.
    pub builtin_palette: bool,
    pub sample_rate: u32,
    /// Where `.sav`/`.rtc` files go; next to the ROM when unset.
    pub save_dir: Option<PathBuf>,
    /// Write battery RAM back when the run ends.
    pub autosave: bool,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            emulation_mode: EmulationMode::Auto,
            palette: PaletteName::Cream,
            builtin_palette: false,
            sample_rate: DEFAULT_SAMPLE_RATE,
            save_dir: None,
            autosave: true,
        }
    }
}

impl FrontendConfig {
    pub fn core_config(&self) -> Config {
        Config {
            system: self.emulation_mode.into(),
            palette: if self.builtin_palette {
                PaletteSelection::Builtin {
                    fallback: Some(self.palette.palette()),
                }
            } else {
                PaletteSelection::Custom(self.palette.palette())
            },
            sample_rate: self.sample_rate,
        }
    }
}

pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("dotmatrix").join("config.toml");
        }
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("dotmatrix").join("config.toml");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("dotmatrix")
            .join("config.toml");
    }

    PathBuf::from("config.toml")
}

/// Reads the config, falling back to defaults when the file is missing or
/// does not parse.
pub fn load_from_file(path: &Path) -> FrontendConfig {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read config {}: {e}; using defaults", path.display());
            }
            return FrontendConfig::default();
        }
    };

    match toml::from_str::<FrontendConfig>(&text) {
        Ok(cfg) if cfg.sample_rate == 0 => {
            warn!("Config {} has a zero sample rate; using defaults", path.display());
            FrontendConfig::default()
        }
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(
                "Failed to parse config {}: {e}; using defaults",
                path.display()
            );
            FrontendConfig::default()
        }
    }
}

pub fn save_to_file(path: &Path, cfg: &FrontendConfig) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let text = toml::to_string_pretty(cfg).map_err(std::io::Error::other)?;
    std::fs::write(path, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_from_file(&dir.path().join("absent.toml"));
        assert_eq!(cfg, FrontendConfig::default());
    }

    #[test]
    fn invalid_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "emulation-mode = 7\n[[[").unwrap();
        assert_eq!(load_from_file(&path), FrontendConfig::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "emulation_mode = \"force-dmg\"\npalette = \"grey\"\n").unwrap();
        let cfg = load_from_file(&path);
        assert_eq!(cfg.emulation_mode, EmulationMode::ForceDmg);
        assert_eq!(cfg.palette, PaletteName::Grey);
        assert_eq!(cfg.sample_rate, DEFAULT_SAMPLE_RATE);
        assert!(cfg.autosave);

        let core = cfg.core_config();
        assert_eq!(core.system, SystemSelection::ForceDmg);
        assert_eq!(core.palette.resolve(), Palette::GREY);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = FrontendConfig {
            emulation_mode: EmulationMode::ForceSgb,
            palette: PaletteName::Green,
            builtin_palette: true,
            sample_rate: 48_000,
            save_dir: Some(PathBuf::from("saves")),
            autosave: false,
        };
        save_to_file(&path, &cfg).unwrap();
        assert_eq!(load_from_file(&path), cfg);
    }

    #[test]
    fn builtin_palette_falls_back_to_named_palette() {
        let cfg = FrontendConfig {
            palette: PaletteName::Grey,
            builtin_palette: true,
            ..FrontendConfig::default()
        };
        assert_eq!(
            cfg.core_config().palette,
            PaletteSelection::Builtin {
                fallback: Some(Palette::GREY)
            }
        );
    }
}
