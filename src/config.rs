use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::charset::{CharacterSet, DEFAULT_PRESET};
use crate::error_codes::{
    CodedError, CONFIG_INVALID_COLUMNS, CONFIG_INVALID_SIZE, CONFIG_PARSE_FAILED,
};

pub const DEFAULT_COLUMNS: u32 = 120;
/// Largest output width or height accepted from configuration or flags.
pub const MAX_OUTPUT_DIMENSION: u32 = 16_384;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderConfig {
    #[serde(default = "default_columns")]
    pub columns: u32,
    #[serde(default)]
    pub charset: CharsetSetting,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<PathBuf>,
    #[serde(default)]
    pub window: WindowConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            columns: DEFAULT_COLUMNS,
            charset: CharsetSetting::default(),
            font: None,
            window: WindowConfig::default(),
        }
    }
}

/// `charset: { preset: blocks }` or `charset: { symbols: " .:#" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharsetSetting {
    Preset(String),
    Symbols(String),
}

impl Default for CharsetSetting {
    fn default() -> Self {
        Self::Preset(DEFAULT_PRESET.to_owned())
    }
}

impl CharsetSetting {
    pub fn resolve(&self) -> Result<CharacterSet> {
        match self {
            Self::Preset(id) => CharacterSet::preset(id),
            Self::Symbols(symbols) => CharacterSet::new(symbols),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_window_width")]
    pub width: u32,
    #[serde(default = "default_window_height")]
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            width: default_window_width(),
            height: default_window_height(),
        }
    }
}

fn default_columns() -> u32 {
    DEFAULT_COLUMNS
}

fn default_title() -> String {
    "glyphcast".to_owned()
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    720
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub columns: Option<u32>,
    pub preset: Option<String>,
    pub symbols: Option<String>,
    pub font: Option<PathBuf>,
}

impl RenderConfig {
    /// Loads `path` when given (defaults otherwise), applies `overrides`, and
    /// validates the result.
    pub fn resolve(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => parse_config_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(columns) = overrides.columns {
            self.columns = columns;
        }
        if let Some(preset) = &overrides.preset {
            self.charset = CharsetSetting::Preset(preset.clone());
        }
        // literal symbols win over a preset given alongside them
        if let Some(symbols) = &overrides.symbols {
            self.charset = CharsetSetting::Symbols(symbols.clone());
        }
        if let Some(font) = &overrides.font {
            self.font = Some(font.clone());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.columns == 0 {
            return Err(
                CodedError::config(CONFIG_INVALID_COLUMNS, "columns must be at least 1").into(),
            );
        }
        validate_output_size(self.window.width, self.window.height)
            .context("invalid window size")?;
        self.charset.resolve()?;
        Ok(())
    }

    pub fn character_set(&self) -> Result<CharacterSet> {
        self.charset.resolve()
    }
}

/// Rejects output sizes with a zero side or a side above [`MAX_OUTPUT_DIMENSION`].
pub fn validate_output_size(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 || width > MAX_OUTPUT_DIMENSION || height > MAX_OUTPUT_DIMENSION {
        return Err(CodedError::config(
            CONFIG_INVALID_SIZE,
            format!(
                "output size must be between 1x1 and {MAX_OUTPUT_DIMENSION}x{MAX_OUTPUT_DIMENSION}, got {width}x{height}"
            ),
        )
        .into());
    }
    Ok(())
}

fn parse_config_file(path: &Path) -> Result<RenderConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_config(&contents).map_err(|error| {
        let location = error
            .location()
            .map(|location| format!("line {}, column {}", location.line(), location.column()))
            .unwrap_or_else(|| "unknown location".to_owned());
        CodedError::config(
            CONFIG_PARSE_FAILED,
            format!(
                "failed to parse yaml in {} at {}: {}",
                path.display(),
                location,
                error
            ),
        )
        .into()
    })
}

fn parse_config(contents: &str) -> std::result::Result<RenderConfig, serde_yaml::Error> {
    if contents.trim().is_empty() {
        return Ok(RenderConfig::default());
    }
    serde_yaml::from_str(contents)
}
