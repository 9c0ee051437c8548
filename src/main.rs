use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;

use glyphcast::atlas::{build_atlas, AtlasLayout, FontRasterizer, GlyphCell};
use glyphcast::charset::render_presets;
use glyphcast::config::{validate_output_size, ConfigOverrides, RenderConfig};
use glyphcast::error_codes::{find_coded_error, uncoded_envelope, CodedErrorKind};
use glyphcast::font::resolve_font_path;
use glyphcast::grid::{fit_surface, resolve_grid, SurfaceSize};
use glyphcast::logging;
use glyphcast::source::{parse_dimensions, SourceRequest};

#[derive(Debug, Parser)]
#[command(name = "glyphcast")]
#[command(about = "Render video as ascii art on the GPU")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GLYPHCAST_GIT_HASH"), ")"))]
struct Cli {
    /// Print failures as a JSON envelope on stdout.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct RenderArgs {
    /// YAML config file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    columns: Option<u32>,
    /// Character set preset id (see `glyphcast charsets`).
    #[arg(long)]
    preset: Option<String>,
    /// Literal character set, darkest first. Wins over --preset.
    #[arg(long)]
    symbols: Option<String>,
    #[arg(long)]
    font: Option<PathBuf>,
}

impl RenderArgs {
    fn resolve(&self) -> Result<RenderConfig> {
        let overrides = ConfigOverrides {
            columns: self.columns,
            preset: self.preset.clone(),
            symbols: self.symbols.clone(),
            font: self.font.clone(),
        };
        RenderConfig::resolve(self.config.as_deref(), &overrides)
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Open a window and render a video file, image, or `webcam[:device]`.
    Play {
        source: Option<String>,
        #[command(flatten)]
        render: RenderArgs,
    },
    /// Write the glyph atlas the configuration would build to a PNG.
    Atlas {
        #[arg(long)]
        out: PathBuf,
        /// Output width the glyph cells are sized for. Defaults to the window width.
        #[arg(long)]
        width: Option<u32>,
        #[command(flatten)]
        render: RenderArgs,
    },
    /// Validate the configuration and print the resolved grid and atlas layout.
    Check {
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        /// Source video size as WIDTHxHEIGHT.
        #[arg(long)]
        video: Option<String>,
        #[command(flatten)]
        render: RenderArgs,
    },
    /// List the built-in character set presets.
    Charsets,
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();
    let json = cli.json;

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => report_failure(&error, json),
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Play { source, render } => run_play(source.as_deref(), &render),
        Commands::Atlas { out, width, render } => run_atlas(&out, width, &render),
        Commands::Check {
            width,
            height,
            video,
            render,
        } => run_check(width, height, video.as_deref(), &render, cli.json),
        Commands::Charsets => {
            print!("{}", render_presets());
            Ok(())
        }
    }
}

#[cfg(feature = "play")]
fn run_play(source: Option<&str>, render: &RenderArgs) -> Result<()> {
    let config = render.resolve()?;
    let source = source.map(SourceRequest::parse).transpose()?;
    tracing::info!(build = env!("GLYPHCAST_GIT_HASH"), "starting player");
    glyphcast::play::run_play(&config, source)
}

#[cfg(not(feature = "play"))]
fn run_play(_source: Option<&str>, _render: &RenderArgs) -> Result<()> {
    anyhow::bail!("glyphcast was built without the `play` feature")
}

fn run_atlas(out: &Path, width: Option<u32>, render: &RenderArgs) -> Result<()> {
    let config = render.resolve()?;
    let charset = config.character_set()?;
    let output_width = width.unwrap_or(config.window.width);
    validate_output_size(output_width, config.window.height).context("invalid --width")?;
    let font_path = resolve_font_path(config.font.as_deref())?;
    let mut rasterizer = FontRasterizer::from_path(&font_path)?;
    let layout = AtlasLayout::for_glyph_count(charset.len() as u32);
    let cell = GlyphCell::for_atlas(output_width, config.columns, &layout);
    let atlas = build_atlas(&charset, cell, &mut rasterizer)?;
    atlas.save_png(out)?;

    println!(
        "Wrote {} ({}x{}, {} glyphs in {}x{} cells of {}x{}px)",
        out.display(),
        atlas.width(),
        atlas.height(),
        charset.len(),
        atlas.layout().atlas_cols,
        atlas.layout().atlas_rows,
        cell.width,
        cell.height
    );
    if !atlas.unsupported().is_empty() {
        println!(
            "Blank glyphs (missing from {}): {}",
            font_path.display(),
            atlas.unsupported().iter().collect::<String>()
        );
    }
    Ok(())
}

fn run_check(
    width: Option<u32>,
    height: Option<u32>,
    video: Option<&str>,
    render: &RenderArgs,
    json: bool,
) -> Result<()> {
    let config = render.resolve()?;
    let charset = config.character_set()?;
    let viewport = SurfaceSize::new(
        width.unwrap_or(config.window.width),
        height.unwrap_or(config.window.height),
    );
    validate_output_size(viewport.width, viewport.height).context("invalid --width/--height")?;
    let video = video
        .map(|raw| parse_dimensions(raw).with_context(|| format!("invalid --video '{raw}'")))
        .transpose()?;

    let surface = fit_surface(viewport, video);
    let grid = resolve_grid(config.columns, surface, video);
    let layout = AtlasLayout::for_glyph_count(charset.len() as u32);
    let cell = GlyphCell::for_atlas(surface.width, config.columns, &layout);
    let (atlas_width, atlas_height) = layout.pixel_size(cell);

    if json {
        let report = json!({
            "ok": true,
            "columns": config.columns,
            "charset": charset.to_string(),
            "charset_len": charset.len(),
            "surface": { "width": surface.width, "height": surface.height },
            "grid": { "cols": grid.cols, "rows": grid.rows },
            "glyph_cell": { "width": cell.width, "height": cell.height },
            "atlas": {
                "cols": layout.atlas_cols,
                "rows": layout.atlas_rows,
                "width": atlas_width,
                "height": atlas_height,
            },
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to encode check report")?
        );
        return Ok(());
    }

    println!(
        "OK: {} columns, {} glyphs ({})",
        config.columns,
        charset.len(),
        charset
    );
    println!("Surface: {}x{}", surface.width, surface.height);
    println!("Grid: {}x{}", grid.cols, grid.rows);
    println!("Glyph cell: {}x{}", cell.width, cell.height);
    println!(
        "Atlas: {}x{} cells, {}x{}px",
        layout.atlas_cols, layout.atlas_rows, atlas_width, atlas_height
    );
    Ok(())
}

fn report_failure(error: &anyhow::Error, json: bool) -> ExitCode {
    let coded = find_coded_error(error);
    if json {
        let envelope = match coded {
            Some(coded) => serde_json::to_value(coded.envelope())
                .unwrap_or_else(|_| uncoded_envelope(error)),
            None => uncoded_envelope(error),
        };
        println!("{envelope}");
    } else {
        match coded {
            Some(coded) => eprintln!("error: {coded}"),
            None => eprintln!("error: {error:#}"),
        }
    }

    match coded.map(|coded| coded.kind) {
        Some(CodedErrorKind::Config) => ExitCode::from(2),
        _ => ExitCode::from(1),
    }
}
