//! Per-pixel glyph mapping.
//!
//! The WGSL kernel below is the renderer; the free functions in this module are
//! the same arithmetic on the CPU and act as its executable reference in tests.
//! Keep both sides in sync when touching either.
//!
//! Coordinates follow a bottom-left origin (`uv = clip * 0.5 + 0.5`). Textures
//! are uploaded top row first, so both the video and the atlas lookup flip y.

use bytemuck::{Pod, Zeroable};

use crate::atlas::AtlasLayout;
use crate::grid::{Grid, SurfaceSize};

/// Bias added before flooring so luminance landing exactly on a bucket edge
/// `k / (N - 1)` resolves to bucket `k` despite float error.
pub const INDEX_BIAS: f32 = 0.0001;

/// ITU-R BT.601 luma weights.
pub const LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

pub const ASCII_SHADER: &str = r#"
struct AsciiUniforms {
  resolution: vec2<f32>,
  grid: vec2<f32>,
  atlas_grid: vec2<f32>,
  charset_len: f32,
  _pad0: f32,
}

const INDEX_BIAS: f32 = 0.0001;

@group(0) @binding(0) var video_tex: texture_2d<f32>;
@group(0) @binding(1) var video_sampler: sampler;
@group(0) @binding(2) var atlas_tex: texture_2d<f32>;
@group(0) @binding(3) var atlas_sampler: sampler;
@group(0) @binding(4) var<uniform> params: AsciiUniforms;

struct VertexOutput {
  @builtin(position) position: vec4<f32>,
  @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
  var positions = array<vec2<f32>, 3>(
    vec2<f32>(-1.0, -3.0),
    vec2<f32>(-1.0, 1.0),
    vec2<f32>(3.0, 1.0)
  );

  var out: VertexOutput;
  let p = positions[vertex_index];
  out.position = vec4<f32>(p, 0.0, 1.0);
  out.uv = p * 0.5 + vec2<f32>(0.5, 0.5);
  return out;
}

fn luminance(color: vec3<f32>) -> f32 {
  return dot(color, vec3<f32>(0.299, 0.587, 0.114));
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
  let pixel_pos = input.uv * params.resolution;
  let cell_size = params.resolution / params.grid;
  let cell = floor(pixel_pos / cell_size);
  let local = fract(pixel_pos / cell_size);

  let video_uv = (cell + vec2<f32>(0.5, 0.5)) / params.grid;
  let color = textureSample(video_tex, video_sampler, vec2<f32>(video_uv.x, 1.0 - video_uv.y)).rgb;

  let last = params.charset_len - 1.0;
  let idx = clamp(floor(luminance(color) * last + INDEX_BIAS), 0.0, last);

  let atlas_cols = params.atlas_grid.x;
  let glyph_col = idx % atlas_cols;
  let glyph_row = floor(idx / atlas_cols);
  let atlas_uv = vec2<f32>(
    (glyph_col + local.x) / atlas_cols,
    (glyph_row + (1.0 - local.y)) / params.atlas_grid.y
  );

  let coverage = textureSample(atlas_tex, atlas_sampler, atlas_uv).a;
  return vec4<f32>(vec3<f32>(coverage), 1.0);
}
"#;

/// Matches `AsciiUniforms` in `ASCII_SHADER`.
/// 32 bytes, 16-byte aligned.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, PartialEq)]
pub struct AsciiUniforms {
    pub resolution: [f32; 2],
    pub grid: [f32; 2],
    pub atlas_grid: [f32; 2],
    pub charset_len: f32,
    pub _pad: f32,
}

impl AsciiUniforms {
    pub fn new(surface: SurfaceSize, grid: Grid, atlas: &AtlasLayout) -> Self {
        Self {
            resolution: [surface.width as f32, surface.height as f32],
            grid: [grid.cols as f32, grid.rows as f32],
            atlas_grid: [atlas.atlas_cols as f32, atlas.atlas_rows as f32],
            charset_len: atlas.glyph_count as f32,
            _pad: 0.0,
        }
    }

    /// False when the kernel would divide by a zero grid or atlas extent.
    pub fn is_drawable(&self) -> bool {
        self.resolution.iter().all(|v| *v > 0.0)
            && self.grid.iter().all(|v| *v >= 1.0)
            && self.atlas_grid.iter().all(|v| *v >= 1.0)
            && self.charset_len >= 1.0
    }
}

pub fn luminance(rgb: [f32; 3]) -> f32 {
    LUMA_WEIGHTS[0] * rgb[0] + LUMA_WEIGHTS[1] * rgb[1] + LUMA_WEIGHTS[2] * rgb[2]
}

pub fn luminance_rgba8(pixel: [u8; 4]) -> f32 {
    luminance([
        f32::from(pixel[0]) / 255.0,
        f32::from(pixel[1]) / 255.0,
        f32::from(pixel[2]) / 255.0,
    ])
}

/// `clamp(floor(b * (N - 1) + INDEX_BIAS), 0, N - 1)`.
///
/// Monotonic in `luma`. Out-of-range and NaN luminance clamp to the ends.
pub fn glyph_index(luma: f32, charset_len: u32) -> u32 {
    let last = charset_len.saturating_sub(1);
    let raw = (luma * last as f32 + INDEX_BIAS).floor();
    if raw.is_nan() || raw <= 0.0 {
        return 0;
    }
    (raw as u32).min(last)
}

/// Atlas cell `(col, row)` holding glyph `index`.
pub fn glyph_cell(index: u32, atlas_cols: u32) -> (u32, u32) {
    let atlas_cols = atlas_cols.max(1);
    (index % atlas_cols, index / atlas_cols)
}

/// Splits a pixel position into its grid cell and the position within it.
pub fn cell_of_pixel(pixel: [f32; 2], resolution: [f32; 2], grid: [f32; 2]) -> ([f32; 2], [f32; 2]) {
    let mut cell = [0.0; 2];
    let mut local = [0.0; 2];
    for axis in 0..2 {
        let scaled = pixel[axis] / (resolution[axis] / grid[axis]);
        cell[axis] = scaled.floor();
        local[axis] = scaled - scaled.floor();
    }
    (cell, local)
}

/// Texture coordinate sampled from the video for `cell`, y flipped.
pub fn video_uv(cell: [f32; 2], grid: [f32; 2]) -> [f32; 2] {
    let u = (cell[0] + 0.5) / grid[0];
    let v = (cell[1] + 0.5) / grid[1];
    [u, 1.0 - v]
}

/// Texture coordinate inside the atlas for glyph `index` at sub-cell `local`.
pub fn atlas_uv(index: u32, local: [f32; 2], atlas_cols: u32, atlas_rows: u32) -> [f32; 2] {
    let (col, row) = glyph_cell(index, atlas_cols);
    [
        (col as f32 + local[0]) / atlas_cols.max(1) as f32,
        (row as f32 + (1.0 - local[1])) / atlas_rows.max(1) as f32,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_uniforms_is_32_bytes() {
        assert_eq!(
            std::mem::size_of::<AsciiUniforms>(),
            32,
            "AsciiUniforms must be 32 bytes to match WGSL struct"
        );
    }

    #[test]
    fn luma_weights_sum_to_one() {
        let white = luminance([1.0, 1.0, 1.0]);
        assert!((white - 1.0).abs() < 1e-6);
        assert!((luminance([0.0, 1.0, 0.0]) - 0.587).abs() < 1e-6);
    }

    #[test]
    fn extremes_map_to_first_and_last_glyph() {
        for len in 1..=40 {
            assert_eq!(glyph_index(0.0, len), 0, "len={len}");
            assert_eq!(glyph_index(1.0, len), len - 1, "len={len}");
        }
    }

    #[test]
    fn mid_gray_selects_index_four_of_ten() {
        assert_eq!(glyph_index(0.5, 10), 4);
        assert_eq!(glyph_index(luminance_rgba8([128, 128, 128, 255]), 10), 4);
    }

    #[test]
    fn bucket_edges_resolve_to_upper_bucket() {
        let len = 10;
        for k in 0..len {
            let edge = k as f32 / (len - 1) as f32;
            assert_eq!(glyph_index(edge, len), k, "edge {k}/{}", len - 1);
        }
    }

    #[test]
    fn mapping_is_monotonic_and_pure() {
        let mut previous = 0;
        for step in 0..=1000 {
            let luma = step as f32 / 1000.0;
            let index = glyph_index(luma, 16);
            assert!(index >= previous, "luma={luma}");
            assert_eq!(index, glyph_index(luma, 16));
            previous = index;
        }
    }

    #[test]
    fn out_of_range_luma_clamps() {
        assert_eq!(glyph_index(-3.0, 10), 0);
        assert_eq!(glyph_index(7.0, 10), 9);
        assert_eq!(glyph_index(f32::NAN, 10), 0);
    }

    #[test]
    fn glyph_cell_round_trips_to_index() {
        for atlas_cols in 1..=16 {
            for index in 0..100 {
                let (col, row) = glyph_cell(index, atlas_cols);
                assert!(col < atlas_cols);
                assert_eq!(row * atlas_cols + col, index);
            }
        }
    }

    #[test]
    fn pixel_splits_into_cell_and_local_offset() {
        let (cell, local) = cell_of_pixel([15.0, 7.5], [100.0, 50.0], [10.0, 5.0]);
        assert_eq!(cell, [1.0, 0.0]);
        assert!((local[0] - 0.5).abs() < 1e-6);
        assert!((local[1] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn video_sample_is_cell_center_flipped() {
        let uv = video_uv([0.0, 0.0], [4.0, 2.0]);
        assert_eq!(uv, [0.125, 0.75]);
    }

    #[test]
    fn atlas_uv_stays_inside_glyph_cell() {
        let uv_top = atlas_uv(17, [0.0, 1.0], 16, 2);
        assert_eq!(uv_top, [1.0 / 16.0, 0.5]);
        let uv_bottom = atlas_uv(17, [0.5, 0.0], 16, 2);
        assert_eq!(uv_bottom, [1.5 / 16.0, 1.0]);
    }

    #[test]
    fn zero_grid_uniforms_are_not_drawable() {
        let layout = AtlasLayout::for_glyph_count(10);
        let uniforms = AsciiUniforms::new(
            SurfaceSize::new(640, 480),
            Grid { cols: 80, rows: 0 },
            &layout,
        );
        assert!(!uniforms.is_drawable());

        let drawable = AsciiUniforms::new(
            SurfaceSize::new(640, 480),
            Grid { cols: 80, rows: 60 },
            &layout,
        );
        assert!(drawable.is_drawable());
        assert_eq!(drawable.atlas_grid, [10.0, 1.0]);
        assert_eq!(drawable.charset_len, 10.0);
    }

    #[test]
    fn wgsl_declares_entry_points_and_bindings() {
        assert!(ASCII_SHADER.contains("fn vs_main"));
        assert!(ASCII_SHADER.contains("fn fs_main"));
        assert!(ASCII_SHADER.contains("struct AsciiUniforms"));
        for binding in 0..5 {
            assert!(ASCII_SHADER.contains(&format!("@binding({binding})")));
        }
        assert!(ASCII_SHADER.contains(&format!("INDEX_BIAS: f32 = {INDEX_BIAS}")));
    }
}
