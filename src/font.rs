use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use fontdue::Font;

use crate::error_codes::{CodedError, RESOURCE_FONT_UNAVAILABLE};

pub const FONT_ENV_VAR: &str = "GLYPHCAST_FONT";

/// Monospaced fonts commonly shipped with the major desktop platforms, probed
/// in order when no font is configured.
pub const SYSTEM_MONOSPACE_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/TTF/DejaVuSansMono.ttf",
    "/usr/share/fonts/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/dejavu-sans-mono-fonts/DejaVuSansMono.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf",
    "/usr/share/fonts/liberation-mono/LiberationMono-Regular.ttf",
    "/usr/share/fonts/truetype/noto/NotoSansMono-Regular.ttf",
    "/usr/share/fonts/noto/NotoSansMono-Regular.ttf",
    "/usr/share/fonts/truetype/ubuntu/UbuntuMono-R.ttf",
    "/System/Library/Fonts/Menlo.ttc",
    "/System/Library/Fonts/Monaco.ttf",
    "/System/Library/Fonts/Supplemental/Courier New.ttf",
    "C:\\Windows\\Fonts\\consola.ttf",
    "C:\\Windows\\Fonts\\cour.ttf",
];

/// Explicit path first, then `GLYPHCAST_FONT`, then the system list.
pub fn resolve_font_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(CodedError::resource(
                RESOURCE_FONT_UNAVAILABLE,
                format!("font file '{}' does not exist", path.display()),
            )
            .into());
        }
        return Ok(path.to_path_buf());
    }

    if let Some(from_env) = env::var_os(FONT_ENV_VAR) {
        let path = PathBuf::from(from_env);
        if path.is_file() {
            return Ok(path);
        }
        tracing::warn!(
            path = %path.display(),
            "{FONT_ENV_VAR} does not point at a file; probing system fonts"
        );
    }

    SYSTEM_MONOSPACE_FONTS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
        .ok_or_else(|| {
            CodedError::resource(
                RESOURCE_FONT_UNAVAILABLE,
                format!(
                    "no monospace font found; pass --font <path> or set {FONT_ENV_VAR} (probed: {})",
                    SYSTEM_MONOSPACE_FONTS.join(", ")
                ),
            )
            .into()
        })
}

pub fn load_font(path: &Path) -> Result<Font> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read font file {}", path.display()))?;
    Font::from_bytes(bytes, fontdue::FontSettings::default())
        .map_err(|error| anyhow!("failed to parse font {}: {error}", path.display()))
}

/// Whitespace always counts as drawable; anything else needs an outline in
/// `font`, or it rasterizes blank in the atlas.
pub fn has_outline(font: &Font, symbol: char) -> bool {
    symbol.is_whitespace() || font.lookup_glyph_index(symbol) != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_codes::find_coded_error;

    #[test]
    fn missing_explicit_font_is_a_resource_error() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let error = resolve_font_path(Some(&dir.path().join("nope.ttf"))).unwrap_err();
        let coded = find_coded_error(&error).expect("should carry a code");
        assert_eq!(coded.code, RESOURCE_FONT_UNAVAILABLE);
    }

    #[test]
    fn garbage_font_bytes_fail_to_parse() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let path = dir.path().join("broken.ttf");
        fs::write(&path, b"definitely not a font").expect("write should succeed");
        let error = load_font(&path).unwrap_err();
        assert!(error.to_string().contains("failed to parse font"));
    }

    #[test]
    fn system_font_has_ascii_outlines() {
        let Ok(path) = resolve_font_path(None) else {
            eprintln!("Skipping test: no system monospace font found");
            return;
        };
        let font = load_font(&path).expect("font should load");
        assert!(" .:-=+*#%@".chars().all(|symbol| has_outline(&font, symbol)));
        assert!(!has_outline(&font, '\u{E0041}'), "tag characters have no outline");
    }

    #[test]
    fn explicit_font_path_wins() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let path = dir.path().join("any.ttf");
        fs::write(&path, b"x").expect("write should succeed");
        assert_eq!(resolve_font_path(Some(&path)).expect("resolves"), path);
    }
}
