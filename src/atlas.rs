//! Glyph atlas construction.
//!
//! Every symbol of the character set is rasterized once into a fixed-size cell
//! of a single RGBA image. Cell `i` sits at `(i % atlas_cols, i / atlas_cols)`;
//! RGB is white and alpha carries coverage, which is the only channel the
//! shader reads.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use fontdue::Font;
use image::{Rgba, RgbaImage};
use tracing::{debug, warn};

use crate::charset::CharacterSet;
use crate::error_codes::{CodedError, CONFIG_INVALID_SIZE};

pub const MAX_ATLAS_COLUMNS: u32 = 16;
pub const MIN_GLYPH_WIDTH: u32 = 6;
/// wgpu's default `max_texture_dimension_2d`.
pub const MAX_ATLAS_DIMENSION: u32 = 8192;
const FONT_SCALE: f32 = 0.9;

/// Pixel size of one atlas cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlyphCell {
    pub width: u32,
    pub height: u32,
}

impl GlyphCell {
    /// `width = max(6, floor(output_width / cols))`, `height = floor(width * 1.6)`.
    pub fn for_surface(output_width: u32, cols: u32) -> Self {
        Self::with_width((output_width / cols.max(1)).max(MIN_GLYPH_WIDTH))
    }

    /// The surface cell, shrunk where needed so an atlas of `layout` stays
    /// within [`MAX_ATLAS_DIMENSION`]. The shader samples the atlas through
    /// normalized coordinates, so a smaller cell only lowers glyph resolution.
    pub fn for_atlas(output_width: u32, cols: u32, layout: &AtlasLayout) -> Self {
        let cell = Self::for_surface(output_width, cols);
        let max_width = MAX_ATLAS_DIMENSION / layout.atlas_cols.max(1);
        let max_height = u64::from(MAX_ATLAS_DIMENSION / layout.atlas_rows.max(1));
        // largest width with floor(width * 8 / 5) <= max_height
        let width_for_height = u32::try_from((max_height * 5 + 4) / 8).unwrap_or(u32::MAX);
        let cap = max_width.min(width_for_height).max(MIN_GLYPH_WIDTH);
        if cell.width <= cap {
            return cell;
        }
        Self::with_width(cap)
    }

    fn with_width(width: u32) -> Self {
        // floor(width * 1.6) in integers
        let height = u64::from(width) * 8 / 5;
        Self {
            width,
            height: u32::try_from(height).unwrap_or(u32::MAX),
        }
    }

    pub fn font_px(&self) -> f32 {
        (self.height as f32 * FONT_SCALE).floor().max(1.0)
    }
}

/// Atlas shape in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasLayout {
    pub atlas_cols: u32,
    pub atlas_rows: u32,
    pub glyph_count: u32,
}

impl AtlasLayout {
    pub fn for_glyph_count(glyph_count: u32) -> Self {
        let atlas_cols = glyph_count.min(MAX_ATLAS_COLUMNS);
        let atlas_rows = if atlas_cols == 0 {
            0
        } else {
            glyph_count.div_ceil(atlas_cols)
        };
        Self {
            atlas_cols,
            atlas_rows,
            glyph_count,
        }
    }

    /// Atlas image size in pixels; `u64` so oversized cells cannot overflow.
    pub fn pixel_size(&self, cell: GlyphCell) -> (u64, u64) {
        (
            u64::from(self.atlas_cols) * u64::from(cell.width),
            u64::from(self.atlas_rows) * u64::from(cell.height),
        )
    }

    /// Top-left pixel of glyph `index`.
    pub fn cell_origin(&self, index: u32, cell: GlyphCell) -> (u32, u32) {
        let (col, row) = crate::shading::glyph_cell(index, self.atlas_cols);
        (col * cell.width, row * cell.height)
    }
}

/// Coverage of one glyph, positioned relative to the top-left of its cell.
#[derive(Debug, Clone, Default)]
pub struct GlyphBitmap {
    pub width: usize,
    pub height: usize,
    pub offset_x: i32,
    pub offset_y: i32,
    pub coverage: Vec<u8>,
}

/// Turns one symbol into a coverage bitmap laid out for a cell.
pub trait GlyphRasterizer {
    fn rasterize(&mut self, symbol: char, cell: GlyphCell) -> GlyphBitmap;

    /// Whether `symbol` has an outline; unsupported symbols come out blank.
    fn supports(&self, _symbol: char) -> bool {
        true
    }
}

/// `fontdue` rasterizer. Glyphs are centered horizontally on their advance and
/// vertically on the font's ascent/descent box, at 0.9x the cell height.
pub struct FontRasterizer {
    font: Font,
    cache_cell: Option<GlyphCell>,
    glyph_cache: HashMap<char, GlyphBitmap>,
}

impl FontRasterizer {
    pub fn new(font: Font) -> Self {
        Self {
            font,
            cache_cell: None,
            glyph_cache: HashMap::new(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Ok(Self::new(crate::font::load_font(path)?))
    }

    fn layout_glyph(&self, symbol: char, cell: GlyphCell) -> GlyphBitmap {
        let px = cell.font_px();
        let (metrics, coverage) = self.font.rasterize(symbol, px);
        let (ascent, descent) = self
            .font
            .horizontal_line_metrics(px)
            .map(|line| (line.ascent, line.descent))
            .unwrap_or((px * 0.8, -px * 0.2));

        let pen_x = (cell.width as f32 - metrics.advance_width) / 2.0;
        let baseline = cell.height as f32 / 2.0 + (ascent + descent) / 2.0;
        let top = baseline - (metrics.ymin as f32 + metrics.height as f32);

        GlyphBitmap {
            width: metrics.width,
            height: metrics.height,
            offset_x: (pen_x + metrics.xmin as f32).round() as i32,
            offset_y: top.round() as i32,
            coverage,
        }
    }
}

impl GlyphRasterizer for FontRasterizer {
    fn rasterize(&mut self, symbol: char, cell: GlyphCell) -> GlyphBitmap {
        if self.cache_cell != Some(cell) {
            self.glyph_cache.clear();
            self.cache_cell = Some(cell);
        }
        if let Some(cached) = self.glyph_cache.get(&symbol) {
            return cached.clone();
        }
        let bitmap = self.layout_glyph(symbol, cell);
        self.glyph_cache.insert(symbol, bitmap.clone());
        bitmap
    }

    fn supports(&self, symbol: char) -> bool {
        crate::font::has_outline(&self.font, symbol)
    }
}

#[derive(Debug)]
pub struct GlyphAtlas {
    image: RgbaImage,
    layout: AtlasLayout,
    cell: GlyphCell,
    unsupported: Vec<char>,
}

impl GlyphAtlas {
    pub fn layout(&self) -> AtlasLayout {
        self.layout
    }

    pub fn cell(&self) -> GlyphCell {
        self.cell
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn rgba(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Symbols the rasterizer could not draw.
    pub fn unsupported(&self) -> &[char] {
        &self.unsupported
    }

    /// Alpha of pixel `(x, y)` inside the cell of glyph `index`.
    pub fn coverage_at(&self, index: u32, x: u32, y: u32) -> Option<u8> {
        if index >= self.layout.glyph_count || x >= self.cell.width || y >= self.cell.height {
            return None;
        }
        let (origin_x, origin_y) = self.layout.cell_origin(index, self.cell);
        Some(self.image.get_pixel(origin_x + x, origin_y + y)[3])
    }

    /// Sum of alpha over one glyph cell.
    pub fn glyph_coverage(&self, index: u32) -> u64 {
        let mut total = 0_u64;
        for y in 0..self.cell.height {
            for x in 0..self.cell.width {
                total += u64::from(self.coverage_at(index, x, y).unwrap_or(0));
            }
        }
        total
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.image
            .save(path)
            .with_context(|| format!("failed to write atlas {}", path.display()))
    }
}

pub fn build_atlas(
    charset: &CharacterSet,
    cell: GlyphCell,
    rasterizer: &mut dyn GlyphRasterizer,
) -> Result<GlyphAtlas> {
    let layout = AtlasLayout::for_glyph_count(charset.len() as u32);
    let (width, height) = match layout.pixel_size(cell) {
        (width, height)
            if width <= u64::from(MAX_ATLAS_DIMENSION) && height <= u64::from(MAX_ATLAS_DIMENSION) =>
        {
            (width as u32, height as u32)
        }
        (width, height) => {
            return Err(CodedError::config(
                CONFIG_INVALID_SIZE,
                format!(
                    "{} glyphs in cells of {}x{} produce a {width}x{height} atlas, above the {MAX_ATLAS_DIMENSION}px texture limit",
                    layout.glyph_count, cell.width, cell.height
                ),
            )
            .into());
        }
    };

    let mut image = RgbaImage::new(width, height);
    let mut unsupported = Vec::new();

    for (index, symbol) in charset.symbols().iter().copied().enumerate() {
        if !rasterizer.supports(symbol) {
            unsupported.push(symbol);
            continue;
        }
        let bitmap = rasterizer.rasterize(symbol, cell);
        let origin = layout.cell_origin(index as u32, cell);
        blit_glyph(&mut image, origin, cell, &bitmap);
    }

    if !unsupported.is_empty() {
        warn!(
            symbols = %unsupported.iter().collect::<String>().escape_default(),
            "font has no outline for some symbols; they render blank"
        );
    }
    debug!(
        atlas_cols = layout.atlas_cols,
        atlas_rows = layout.atlas_rows,
        cell_width = cell.width,
        cell_height = cell.height,
        "built glyph atlas {width}x{height}"
    );

    Ok(GlyphAtlas {
        image,
        layout,
        cell,
        unsupported,
    })
}

/// Copies coverage into the cell at `origin`, clipped to the cell bounds.
fn blit_glyph(image: &mut RgbaImage, origin: (u32, u32), cell: GlyphCell, bitmap: &GlyphBitmap) {
    for row in 0..bitmap.height {
        let y = bitmap.offset_y + row as i32;
        if y < 0 || y >= cell.height as i32 {
            continue;
        }
        for col in 0..bitmap.width {
            let x = bitmap.offset_x + col as i32;
            if x < 0 || x >= cell.width as i32 {
                continue;
            }
            let alpha = bitmap.coverage[row * bitmap.width + col];
            if alpha == 0 {
                continue;
            }
            image.put_pixel(
                origin.0 + x as u32,
                origin.1 + y as u32,
                Rgba([255, 255, 255, alpha]),
            );
        }
    }
}
