//! Per-frame tick: rebuild the atlas when it is stale, upload the latest video
//! frame, push uniforms, draw once.

use anyhow::{Context, Result};
use tracing::{info, trace};

use crate::atlas::{build_atlas, AtlasLayout, GlyphAtlas, GlyphCell, GlyphRasterizer};
use crate::charset::CharacterSet;
use crate::error_codes::{CodedError, CONFIG_INVALID_COLUMNS};
use crate::grid::{resolve_grid, Grid, SurfaceSize};
use crate::shading::AsciiUniforms;
use crate::source::{FrameSource, VideoFrame};

/// Where a tick's work lands. Implemented by the GPU renderer over a target
/// view; tests record the calls instead.
pub trait FrameSink {
    fn upload_atlas(&mut self, atlas: &GlyphAtlas) -> Result<()>;
    fn upload_frame(&mut self, frame: &VideoFrame) -> Result<()>;
    /// Undrawable uniforms (empty grid) must clear the target instead.
    fn draw(&mut self, uniforms: &AsciiUniforms) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No frame was ready; nothing was submitted.
    Skipped,
    Drawn(Grid),
}

pub struct FrameDriver {
    columns: u32,
    charset: CharacterSet,
    surface: SurfaceSize,
    rasterizer: Box<dyn GlyphRasterizer>,
    atlas: Option<GlyphAtlas>,
    atlas_dirty: bool,
}

impl FrameDriver {
    pub fn new(
        columns: u32,
        charset: CharacterSet,
        surface: SurfaceSize,
        rasterizer: Box<dyn GlyphRasterizer>,
    ) -> Result<Self> {
        validate_columns(columns)?;
        Ok(Self {
            columns,
            charset,
            surface,
            rasterizer,
            atlas: None,
            atlas_dirty: true,
        })
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    pub fn charset(&self) -> &CharacterSet {
        &self.charset
    }

    pub fn surface(&self) -> SurfaceSize {
        self.surface
    }

    pub fn atlas(&self) -> Option<&GlyphAtlas> {
        self.atlas.as_ref()
    }

    pub fn is_atlas_dirty(&self) -> bool {
        self.atlas_dirty
    }

    pub fn set_columns(&mut self, columns: u32) -> Result<()> {
        validate_columns(columns)?;
        self.columns = columns;
        self.atlas_dirty = true;
        Ok(())
    }

    pub fn set_charset(&mut self, charset: CharacterSet) {
        self.charset = charset;
        self.atlas_dirty = true;
    }

    /// Glyph cells depend on the output width only, so a height-only resize
    /// keeps the current atlas.
    pub fn resize(&mut self, surface: SurfaceSize) {
        if surface.width != self.surface.width {
            self.atlas_dirty = true;
        }
        self.surface = surface;
    }

    pub fn tick(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
    ) -> Result<TickOutcome> {
        source.poll();
        let Some(frame) = source.current_frame() else {
            trace!(source = source.label(), "no frame ready; skipping tick");
            return Ok(TickOutcome::Skipped);
        };

        if self.atlas_dirty || self.atlas.is_none() {
            self.rebuild_atlas(sink)?;
        }
        let Some(atlas) = self.atlas.as_ref() else {
            return Ok(TickOutcome::Skipped);
        };

        let grid = resolve_grid(self.columns, self.surface, Some((frame.width, frame.height)));
        let uniforms = AsciiUniforms::new(self.surface, grid, &atlas.layout());

        sink.upload_frame(frame).context("failed to upload video frame")?;
        sink.draw(&uniforms).context("failed to draw ascii frame")?;
        trace!(cols = grid.cols, rows = grid.rows, "drew frame");
        Ok(TickOutcome::Drawn(grid))
    }

    fn rebuild_atlas(&mut self, sink: &mut dyn FrameSink) -> Result<()> {
        let layout = AtlasLayout::for_glyph_count(self.charset.len() as u32);
        let cell = GlyphCell::for_atlas(self.surface.width, self.columns, &layout);
        let atlas = build_atlas(&self.charset, cell, self.rasterizer.as_mut())?;
        sink.upload_atlas(&atlas).context("failed to upload glyph atlas")?;
        info!(
            glyphs = self.charset.len(),
            columns = self.columns,
            cell_width = cell.width,
            cell_height = cell.height,
            "rebuilt glyph atlas {}x{}",
            atlas.width(),
            atlas.height()
        );
        self.atlas = Some(atlas);
        self.atlas_dirty = false;
        Ok(())
    }
}

fn validate_columns(columns: u32) -> Result<()> {
    if columns == 0 {
        return Err(CodedError::config(CONFIG_INVALID_COLUMNS, "columns must be at least 1").into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::GlyphBitmap;
    use crate::error_codes::find_coded_error;
    use crate::source::StillImageSource;

    struct BlockRasterizer;

    impl GlyphRasterizer for BlockRasterizer {
        fn rasterize(&mut self, _symbol: char, cell: GlyphCell) -> GlyphBitmap {
            GlyphBitmap {
                width: 2,
                height: 2,
                offset_x: (cell.width / 2) as i32,
                offset_y: (cell.height / 2) as i32,
                coverage: vec![255; 4],
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: Vec<&'static str>,
        atlas_sizes: Vec<(u32, u32)>,
        uniforms: Vec<AsciiUniforms>,
    }

    impl FrameSink for RecordingSink {
        fn upload_atlas(&mut self, atlas: &GlyphAtlas) -> Result<()> {
            self.calls.push("atlas");
            self.atlas_sizes.push((atlas.width(), atlas.height()));
            Ok(())
        }

        fn upload_frame(&mut self, _frame: &VideoFrame) -> Result<()> {
            self.calls.push("frame");
            Ok(())
        }

        fn draw(&mut self, uniforms: &AsciiUniforms) -> Result<()> {
            self.calls.push("draw");
            self.uniforms.push(*uniforms);
            Ok(())
        }
    }

    struct PendingSource;

    impl FrameSource for PendingSource {
        fn label(&self) -> &str {
            "pending"
        }

        fn dimensions(&self) -> Option<(u32, u32)> {
            None
        }

        fn current_frame(&self) -> Option<&VideoFrame> {
            None
        }
    }

    fn driver(columns: u32, width: u32, height: u32) -> FrameDriver {
        FrameDriver::new(
            columns,
            CharacterSet::default(),
            SurfaceSize::new(width, height),
            Box::new(BlockRasterizer),
        )
        .expect("driver should build")
    }

    fn gray_still() -> StillImageSource {
        StillImageSource::from_frame("gray", VideoFrame::solid(640, 480, [128, 128, 128, 255]))
    }

    #[test]
    fn not_ready_source_skips_without_touching_sink() {
        let mut driver = driver(80, 640, 480);
        let mut sink = RecordingSink::default();
        let outcome = driver.tick(&mut PendingSource, &mut sink).expect("tick");
        assert_eq!(outcome, TickOutcome::Skipped);
        assert!(sink.calls.is_empty());
        assert!(driver.is_atlas_dirty());
    }

    #[test]
    fn first_tick_builds_atlas_then_draws() {
        let mut driver = driver(80, 640, 480);
        let mut sink = RecordingSink::default();
        let outcome = driver.tick(&mut gray_still(), &mut sink).expect("tick");

        assert_eq!(outcome, TickOutcome::Drawn(Grid { cols: 80, rows: 60 }));
        assert_eq!(sink.calls, vec!["atlas", "frame", "draw"]);
        assert!(!driver.is_atlas_dirty());
        assert_eq!(sink.uniforms[0].grid, [80.0, 60.0]);
        assert_eq!(sink.uniforms[0].charset_len, 10.0);
    }

    #[test]
    fn steady_ticks_do_not_rebuild_atlas() {
        let mut driver = driver(80, 640, 480);
        let mut sink = RecordingSink::default();
        let mut source = gray_still();
        for _ in 0..3 {
            driver.tick(&mut source, &mut sink).expect("tick");
        }
        assert_eq!(sink.calls.iter().filter(|call| **call == "atlas").count(), 1);
        assert_eq!(sink.calls.iter().filter(|call| **call == "draw").count(), 3);
    }

    #[test]
    fn height_only_resize_keeps_atlas() {
        let mut driver = driver(80, 640, 480);
        let mut sink = RecordingSink::default();
        let mut source = gray_still();
        driver.tick(&mut source, &mut sink).expect("tick");

        driver.resize(SurfaceSize::new(640, 900));
        assert!(!driver.is_atlas_dirty());
        driver.tick(&mut source, &mut sink).expect("tick");
        assert_eq!(sink.atlas_sizes.len(), 1);
        assert_eq!(sink.uniforms[1].resolution, [640.0, 900.0]);
    }

    #[test]
    fn width_resize_rebuilds_with_new_cell_size() {
        let mut driver = driver(80, 640, 480);
        let mut sink = RecordingSink::default();
        let mut source = gray_still();
        driver.tick(&mut source, &mut sink).expect("tick");

        driver.resize(SurfaceSize::new(1280, 960));
        assert!(driver.is_atlas_dirty());
        driver.tick(&mut source, &mut sink).expect("tick");

        assert_eq!(sink.atlas_sizes.len(), 2);
        assert_ne!(sink.atlas_sizes[0], sink.atlas_sizes[1]);
        assert_eq!(sink.uniforms[0].atlas_grid, sink.uniforms[1].atlas_grid);
        assert_eq!(sink.uniforms[0].charset_len, sink.uniforms[1].charset_len);
    }

    #[test]
    fn config_changes_mark_atlas_dirty() {
        let mut driver = driver(80, 640, 480);
        let mut sink = RecordingSink::default();
        let mut source = gray_still();
        driver.tick(&mut source, &mut sink).expect("tick");

        driver.set_columns(40).expect("columns");
        assert!(driver.is_atlas_dirty());
        driver.tick(&mut source, &mut sink).expect("tick");

        driver.set_charset(CharacterSet::preset("blocks").expect("preset"));
        driver.tick(&mut source, &mut sink).expect("tick");
        assert_eq!(sink.atlas_sizes.len(), 3);
        assert_eq!(sink.uniforms[2].charset_len, 5.0);
        assert_eq!(sink.uniforms[2].grid, [40.0, 30.0]);
    }

    #[test]
    fn zero_columns_is_a_config_error() {
        let mut driver = driver(80, 640, 480);
        let error = driver.set_columns(0).unwrap_err();
        assert_eq!(
            find_coded_error(&error).map(|coded| coded.code),
            Some(CONFIG_INVALID_COLUMNS)
        );
        assert_eq!(driver.columns(), 80);
    }

    #[test]
    fn single_column_on_wide_surface_keeps_drawing() {
        let mut driver = driver(120, 1280, 720);
        let mut sink = RecordingSink::default();
        let mut source = gray_still();
        driver.tick(&mut source, &mut sink).expect("tick");

        driver.set_columns(1).expect("one column is valid");
        for _ in 0..3 {
            let outcome = driver.tick(&mut source, &mut sink).expect("tick after set_columns(1)");
            assert_eq!(outcome, TickOutcome::Drawn(Grid { cols: 1, rows: 0 }));
        }
        assert_eq!(sink.calls.iter().filter(|call| **call == "draw").count(), 4);
        assert_eq!(sink.atlas_sizes.len(), 2);
        let (width, height) = sink.atlas_sizes[1];
        assert!(width <= crate::atlas::MAX_ATLAS_DIMENSION, "atlas {width}x{height}");
        assert!(height <= crate::atlas::MAX_ATLAS_DIMENSION);
        assert_eq!(driver.atlas().map(|atlas| atlas.cell().width), Some(819));
    }

    #[test]
    fn flat_video_draws_undrawable_uniforms() {
        let mut driver = driver(1, 640, 480);
        let mut sink = RecordingSink::default();
        let mut source =
            StillImageSource::from_frame("strip", VideoFrame::solid(400, 2, [255, 255, 255, 255]));
        let outcome = driver.tick(&mut source, &mut sink).expect("tick");
        assert_eq!(outcome, TickOutcome::Drawn(Grid { cols: 1, rows: 0 }));
        assert!(!sink.uniforms[0].is_drawable());
    }

    struct FailingAtlasSink;

    impl FrameSink for FailingAtlasSink {
        fn upload_atlas(&mut self, _atlas: &GlyphAtlas) -> Result<()> {
            anyhow::bail!("device lost")
        }

        fn upload_frame(&mut self, _frame: &VideoFrame) -> Result<()> {
            Ok(())
        }

        fn draw(&mut self, _uniforms: &AsciiUniforms) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_atlas_upload_stays_dirty() {
        let mut driver = driver(80, 640, 480);
        assert!(driver.tick(&mut gray_still(), &mut FailingAtlasSink).is_err());
        assert!(driver.is_atlas_dirty());
        assert!(driver.atlas().is_none());
    }
}
