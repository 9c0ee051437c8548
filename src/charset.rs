use std::collections::HashSet;
use std::fmt;

use anyhow::Result;
use tracing::warn;

use crate::error_codes::{CodedError, CONFIG_EMPTY_CHARSET, CONFIG_UNKNOWN_PRESET};

/// Ordered glyph ramp. Index 0 is the visually lightest symbol, the last index
/// the densest one; the shader maps rising luminance onto rising indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterSet {
    symbols: Vec<char>,
}

impl CharacterSet {
    pub fn new(symbols: &str) -> Result<Self> {
        let symbols = symbols.chars().collect::<Vec<_>>();
        if symbols.is_empty() {
            return Err(CodedError::config(
                CONFIG_EMPTY_CHARSET,
                "character set must contain at least one symbol",
            )
            .into());
        }

        let mut seen = HashSet::with_capacity(symbols.len());
        let duplicates = symbols
            .iter()
            .filter(|symbol| !seen.insert(**symbol))
            .collect::<String>();
        if !duplicates.is_empty() {
            warn!(
                duplicates = %duplicates.escape_default(),
                "character set repeats symbols; repeated entries still occupy atlas cells"
            );
        }

        Ok(Self { symbols })
    }

    pub fn preset(id: &str) -> Result<Self> {
        let normalized = id.trim().to_ascii_lowercase();
        let preset = PRESETS
            .iter()
            .find(|preset| preset.id == normalized)
            .ok_or_else(|| {
                CodedError::config(
                    CONFIG_UNKNOWN_PRESET,
                    format!(
                        "unknown character set preset '{}' (expected one of: {})",
                        id,
                        preset_ids().join(", ")
                    ),
                )
            })?;
        Self::new(preset.symbols)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Always false; kept for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbols(&self) -> &[char] {
        &self.symbols
    }
}

impl Default for CharacterSet {
    fn default() -> Self {
        Self {
            symbols: STANDARD_RAMP.chars().collect(),
        }
    }
}

impl fmt::Display for CharacterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for symbol in &self.symbols {
            write!(f, "{symbol}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharsetPreset {
    pub id: &'static str,
    pub symbols: &'static str,
    pub description: &'static str,
}

pub const DEFAULT_PRESET: &str = "standard";

const STANDARD_RAMP: &str = " .:-=+*#%@";

pub const PRESETS: &[CharsetPreset] = &[
    CharsetPreset {
        id: "standard",
        symbols: STANDARD_RAMP,
        description: "Ten-step ramp, high contrast.",
    },
    CharsetPreset {
        id: "detailed",
        symbols: " .'`^\",:;Il!i><~+_-?][}{1)(|\\/tfjrxnuvczXYUJCLQ0OZmwqpdbkhao*#MW&8%B@$",
        description: "Seventy-symbol ramp for smooth gradients at high column counts.",
    },
    CharsetPreset {
        id: "blocks",
        symbols: " \u{2591}\u{2592}\u{2593}\u{2588}",
        description: "Unicode shade blocks; needs a font with block elements.",
    },
    CharsetPreset {
        id: "minimal",
        symbols: " .oO@",
        description: "Five-step ramp, legible at low column counts.",
    },
];

pub fn preset_ids() -> Vec<&'static str> {
    PRESETS.iter().map(|preset| preset.id).collect()
}

/// The preset after `id` in `PRESETS`, wrapping around. Unknown ids start over.
pub fn next_preset(id: &str) -> &'static CharsetPreset {
    let position = PRESETS.iter().position(|preset| preset.id == id);
    match position {
        Some(index) => &PRESETS[(index + 1) % PRESETS.len()],
        None => &PRESETS[0],
    }
}

pub fn render_presets() -> String {
    let mut output = String::new();
    output.push_str("GLYPHCAST CHARACTER SETS (light to dense)\n");
    for preset in PRESETS {
        output.push('\n');
        output.push_str("- id: ");
        output.push_str(preset.id);
        output.push('\n');
        output.push_str("  glyphs: ");
        output.push_str(&preset.symbols.chars().count().to_string());
        output.push('\n');
        output.push_str("  ramp: \"");
        output.push_str(preset.symbols);
        output.push_str("\"\n");
        output.push_str("  description: ");
        output.push_str(preset.description);
        output.push('\n');
    }
    output
}
