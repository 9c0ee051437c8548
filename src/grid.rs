//! Grid geometry: how many rows a column count implies, and how the output
//! surface is fitted to the source aspect ratio.

/// Pixel size of the render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Cell grid for one tick. `rows` may be zero; the shader then draws nothing
/// recognisable and the driver clears to black instead of dividing by zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub cols: u32,
    pub rows: u32,
}

impl Grid {
    pub fn is_drawable(&self) -> bool {
        self.cols > 0 && self.rows > 0
    }
}

/// Rows follow the video aspect ratio when its dimensions are known, else the
/// output aspect ratio.
pub fn resolve_grid(cols: u32, output: SurfaceSize, video: Option<(u32, u32)>) -> Grid {
    let rows = match video {
        Some((video_width, video_height)) if video_width > 0 && video_height > 0 => {
            scale_floor(cols, video_height, video_width)
        }
        _ if output.width > 0 => scale_floor(cols, output.height, output.width),
        _ => 0,
    };
    Grid { cols, rows }
}

/// Largest surface inside `viewport` with the video's aspect ratio, or the
/// viewport itself while the video size is unknown.
pub fn fit_surface(viewport: SurfaceSize, video: Option<(u32, u32)>) -> SurfaceSize {
    let fitted = match video {
        Some((video_width, video_height))
            if video_width > 0 && video_height > 0 && !viewport.is_empty() =>
        {
            // viewport_w / viewport_h > video_w / video_h, cross-multiplied
            let viewport_is_wider = u64::from(viewport.width) * u64::from(video_height)
                > u64::from(video_width) * u64::from(viewport.height);
            if viewport_is_wider {
                let height = viewport.height;
                SurfaceSize::new(scale_floor(height, video_width, video_height), height)
            } else {
                let width = viewport.width;
                SurfaceSize::new(width, scale_floor(width, video_height, video_width))
            }
        }
        _ => viewport,
    };

    SurfaceSize::new(fitted.width.max(1), fitted.height.max(1))
}

/// Placement of the fitted surface inside a larger target, centered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub size: SurfaceSize,
}

impl Viewport {
    pub fn centered(outer: SurfaceSize, inner: SurfaceSize) -> Self {
        let size = SurfaceSize::new(inner.width.min(outer.width), inner.height.min(outer.height));
        Self {
            x: (outer.width - size.width) / 2,
            y: (outer.height - size.height) / 2,
            size,
        }
    }
}

/// `floor(value * numerator / denominator)` without float rounding drift.
fn scale_floor(value: u32, numerator: u32, denominator: u32) -> u32 {
    let scaled = u64::from(value) * u64::from(numerator) / u64::from(denominator);
    scaled.min(u64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hd_video_with_120_columns_yields_67_rows() {
        let grid = resolve_grid(120, SurfaceSize::new(1280, 720), Some((1920, 1080)));
        assert_eq!(grid, Grid { cols: 120, rows: 67 });
    }

    #[test]
    fn vga_video_with_80_columns_yields_60_rows() {
        let grid = resolve_grid(80, SurfaceSize::new(800, 800), Some((640, 480)));
        assert_eq!(grid.rows, 60);
    }

    #[test]
    fn unknown_video_falls_back_to_output_aspect() {
        let grid = resolve_grid(100, SurfaceSize::new(1000, 500), None);
        assert_eq!(grid.rows, 50);

        let zero_video = resolve_grid(100, SurfaceSize::new(1000, 500), Some((0, 480)));
        assert_eq!(zero_video.rows, 50);
    }

    #[test]
    fn degenerate_inputs_yield_undrawable_grid() {
        let zero_cols = resolve_grid(0, SurfaceSize::new(640, 480), Some((640, 480)));
        assert_eq!(zero_cols.rows, 0);
        assert!(!zero_cols.is_drawable());

        let zero_output = resolve_grid(80, SurfaceSize::new(0, 0), None);
        assert_eq!(zero_output.rows, 0);

        let flat_video = resolve_grid(1, SurfaceSize::new(640, 480), Some((1920, 10)));
        assert_eq!(flat_video.rows, 0);
        assert!(!flat_video.is_drawable());
    }

    #[test]
    fn fit_surface_letterboxes_wide_viewports() {
        let fitted = fit_surface(SurfaceSize::new(2000, 1000), Some((640, 480)));
        assert_eq!(fitted, SurfaceSize::new(1333, 1000));
    }

    #[test]
    fn fit_surface_pillarboxes_tall_viewports() {
        let fitted = fit_surface(SurfaceSize::new(800, 1200), Some((1920, 1080)));
        assert_eq!(fitted, SurfaceSize::new(800, 450));
    }

    #[test]
    fn fit_surface_without_video_fills_viewport() {
        let viewport = SurfaceSize::new(1024, 768);
        assert_eq!(fit_surface(viewport, None), viewport);
    }

    #[test]
    fn viewport_centers_fitted_surface() {
        let outer = SurfaceSize::new(2000, 1000);
        let viewport = Viewport::centered(outer, fit_surface(outer, Some((640, 480))));
        assert_eq!(viewport.x, 333);
        assert_eq!(viewport.y, 0);
        assert_eq!(viewport.size, SurfaceSize::new(1333, 1000));

        let clamped = Viewport::centered(SurfaceSize::new(10, 10), SurfaceSize::new(50, 4));
        assert_eq!(clamped, Viewport { x: 0, y: 3, size: SurfaceSize::new(10, 4) });
    }

    #[test]
    fn fit_surface_never_returns_zero_area() {
        assert_eq!(
            fit_surface(SurfaceSize::new(0, 0), Some((640, 480))),
            SurfaceSize::new(1, 1)
        );
        assert_eq!(
            fit_surface(SurfaceSize::new(1, 1000), Some((1920, 10))),
            SurfaceSize::new(1, 1)
        );
    }
}
