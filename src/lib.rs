//! GPU ASCII-art renderer: every output pixel is mapped to a glyph from a
//! pre-rasterized atlas by the luminance of its grid cell in the source video.

pub mod atlas;
pub mod charset;
pub mod config;
pub mod driver;
pub mod error_codes;
pub mod font;
pub mod grid;
pub mod logging;
#[cfg(feature = "play")]
pub mod play;
pub mod renderer;
pub mod shading;
pub mod source;
