#![cfg(feature = "play")]
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use tracing::{error, info, warn};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event as WinitEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowBuilder};

use crate::atlas::{FontRasterizer, GlyphAtlas};
use crate::charset::{next_preset, CharacterSet, DEFAULT_PRESET};
use crate::config::{CharsetSetting, RenderConfig};
use crate::driver::{FrameDriver, FrameSink, TickOutcome};
use crate::error_codes::find_coded_error;
use crate::font::resolve_font_path;
use crate::grid::{fit_surface, SurfaceSize, Viewport};
use crate::renderer::{pick_surface_format, AsciiRenderer, GpuContext};
use crate::shading::AsciiUniforms;
use crate::source::{SourceRequest, SourceSlot, VideoFrame, DEFAULT_WEBCAM_DEVICE};

pub const COLUMN_STEP: u32 = 8;
const REFRESH_INTERVAL: Duration = Duration::from_millis(16);

pub fn run_play(config: &RenderConfig, initial_source: Option<SourceRequest>) -> Result<()> {
    let charset = config.character_set()?;
    let font_path = resolve_font_path(config.font.as_deref())?;
    let rasterizer = FontRasterizer::from_path(&font_path)?;
    info!(font = %font_path.display(), "loaded font");

    let mut slot = SourceSlot::default();
    if let Some(request) = initial_source {
        slot.switch_to(|| request.open())?;
    }

    let event_loop = EventLoop::new().context("failed to create play event loop")?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(window_title(&config.window.title, slot.label()))
            .with_inner_size(PhysicalSize::new(config.window.width, config.window.height))
            .build(&event_loop)
            .context("failed to create preview window")?,
    );

    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let surface = instance
        .create_surface(window.clone())
        .context("failed to create wgpu surface")?;
    let gpu = pollster::block_on(GpuContext::for_surface(&instance, &surface))?;

    let caps = surface.get_capabilities(&gpu.adapter);
    let format = pick_surface_format(&caps.formats)
        .ok_or_else(|| anyhow!("surface reports no supported texture formats"))?;
    let present_mode = if caps.present_modes.contains(&wgpu::PresentMode::Mailbox) {
        wgpu::PresentMode::Mailbox
    } else {
        wgpu::PresentMode::Fifo
    };
    let alpha_mode = caps
        .alpha_modes
        .first()
        .copied()
        .unwrap_or(wgpu::CompositeAlphaMode::Auto);
    let initial_size = window.inner_size();
    let mut surface_config = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width: initial_size.width.max(1),
        height: initial_size.height.max(1),
        present_mode,
        alpha_mode,
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    };
    surface.configure(&gpu.device, &surface_config);

    let mut renderer = AsciiRenderer::new(&gpu, format)?;
    let window_size = SurfaceSize::new(surface_config.width, surface_config.height);
    let mut driver = FrameDriver::new(
        config.columns,
        charset,
        fit_surface(window_size, current_dimensions(&mut slot)),
        Box::new(rasterizer),
    )?;
    let mut preset_id = match &config.charset {
        CharsetSetting::Preset(id) => id.trim().to_ascii_lowercase(),
        CharsetSetting::Symbols(_) => DEFAULT_PRESET.to_owned(),
    };

    info!(
        backend = %gpu.backend_name(),
        format = ?format,
        "play: {}x{}, {} columns",
        surface_config.width,
        surface_config.height,
        driver.columns()
    );
    info!("controls: Up/Down columns, C cycle charset, W webcam, drop a file to play it, Esc quit");

    let title = config.window.title.clone();
    let mut next_redraw_at = Instant::now();
    event_loop
        .run(move |event, target| {
            target.set_control_flow(ControlFlow::WaitUntil(next_redraw_at));

            match event {
                WinitEvent::WindowEvent { window_id, event } if window_id == window.id() => {
                    match event {
                        WindowEvent::CloseRequested => target.exit(),
                        WindowEvent::KeyboardInput { event, .. } => {
                            if event.state == ElementState::Pressed && !event.repeat {
                                let switched = handle_keyboard_event(
                                    event.physical_key,
                                    &mut driver,
                                    &mut preset_id,
                                    &mut slot,
                                    target,
                                );
                                if switched {
                                    window.set_title(&window_title(&title, slot.label()));
                                }
                            }
                        }
                        WindowEvent::DroppedFile(path) => {
                            if switch_source(&mut slot, SourceRequest::from_path(&path)) {
                                window.set_title(&window_title(&title, slot.label()));
                            }
                        }
                        WindowEvent::Resized(size) => {
                            if size.width > 0 && size.height > 0 {
                                surface_config.width = size.width;
                                surface_config.height = size.height;
                                surface.configure(&gpu.device, &surface_config);
                            }
                        }
                        WindowEvent::RedrawRequested => {
                            render_tick(
                                &window,
                                &surface,
                                &gpu,
                                &surface_config,
                                &mut renderer,
                                &mut driver,
                                &mut slot,
                            );
                        }
                        _ => {}
                    }
                }
                WinitEvent::AboutToWait => {
                    let now = Instant::now();
                    if now >= next_redraw_at {
                        window.request_redraw();
                        next_redraw_at = now + REFRESH_INTERVAL;
                    }
                    target.set_control_flow(ControlFlow::WaitUntil(next_redraw_at));
                }
                _ => {}
            }
        })
        .map_err(|error| anyhow!("play event loop terminated: {error}"))
}

fn render_tick(
    window: &Window,
    surface: &wgpu::Surface<'static>,
    gpu: &GpuContext,
    surface_config: &wgpu::SurfaceConfiguration,
    renderer: &mut AsciiRenderer,
    driver: &mut FrameDriver,
    slot: &mut SourceSlot,
) {
    let window_size = window.inner_size();
    if window_size.width == 0 || window_size.height == 0 {
        return;
    }
    let target_size = SurfaceSize::new(surface_config.width, surface_config.height);
    let fitted = fit_surface(target_size, current_dimensions(slot));
    if fitted != driver.surface() {
        driver.resize(fitted);
    }

    let Some(source) = slot.current_mut() else {
        return;
    };
    let mut sink = SurfaceSink {
        gpu,
        renderer,
        surface,
        surface_config,
        viewport: Viewport::centered(target_size, fitted),
    };
    match driver.tick(source, &mut sink) {
        Ok(TickOutcome::Drawn(grid)) => tracing::trace!(rows = grid.rows, "presented"),
        Ok(TickOutcome::Skipped) => {}
        Err(error) => error!("render error: {error:#}"),
    }
}

fn current_dimensions(slot: &mut SourceSlot) -> Option<(u32, u32)> {
    slot.current_mut().and_then(|source| source.dimensions())
}

/// Acquires the swapchain texture only when the driver actually draws, so a
/// skipped tick never holds a frame.
struct SurfaceSink<'a> {
    gpu: &'a GpuContext,
    renderer: &'a mut AsciiRenderer,
    surface: &'a wgpu::Surface<'static>,
    surface_config: &'a wgpu::SurfaceConfiguration,
    viewport: Viewport,
}

impl FrameSink for SurfaceSink<'_> {
    fn upload_atlas(&mut self, atlas: &GlyphAtlas) -> Result<()> {
        self.renderer.upload_atlas(self.gpu, atlas)
    }

    fn upload_frame(&mut self, frame: &VideoFrame) -> Result<()> {
        self.renderer.upload_frame(self.gpu, frame)
    }

    fn draw(&mut self, uniforms: &AsciiUniforms) -> Result<()> {
        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                self.surface.configure(&self.gpu.device, self.surface_config);
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => return Ok(()),
            Err(wgpu::SurfaceError::OutOfMemory) => {
                return Err(anyhow!("surface out of memory"));
            }
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let result = self
            .renderer
            .render_to_view(self.gpu, &view, uniforms, Some(self.viewport));
        frame.present();
        result
    }
}

/// Returns true when the bound source changed.
fn handle_keyboard_event(
    key: PhysicalKey,
    driver: &mut FrameDriver,
    preset_id: &mut String,
    slot: &mut SourceSlot,
    target: &EventLoopWindowTarget<()>,
) -> bool {
    match key {
        PhysicalKey::Code(KeyCode::Escape) => {
            target.exit();
            false
        }
        PhysicalKey::Code(KeyCode::ArrowUp) => {
            let columns = driver.columns().saturating_add(COLUMN_STEP);
            change_columns(driver, columns);
            false
        }
        PhysicalKey::Code(KeyCode::ArrowDown) => {
            let columns = driver.columns().saturating_sub(COLUMN_STEP).max(1);
            change_columns(driver, columns);
            false
        }
        PhysicalKey::Code(KeyCode::KeyC) => {
            let preset = next_preset(preset_id);
            match CharacterSet::new(preset.symbols) {
                Ok(charset) => {
                    info!(preset = preset.id, "switched character set");
                    driver.set_charset(charset);
                    *preset_id = preset.id.to_owned();
                }
                Err(error) => warn!("cannot use preset {}: {error:#}", preset.id),
            }
            false
        }
        PhysicalKey::Code(KeyCode::KeyW) => switch_source(
            slot,
            SourceRequest::Webcam(DEFAULT_WEBCAM_DEVICE.to_owned()),
        ),
        _ => false,
    }
}

fn change_columns(driver: &mut FrameDriver, columns: u32) {
    if columns == driver.columns() {
        return;
    }
    match driver.set_columns(columns) {
        Ok(()) => info!(columns, "changed column count"),
        Err(error) => warn!("{error:#}"),
    }
}

/// Failures are logged; the previous source keeps rendering unless it was
/// exclusive and already released.
fn switch_source(slot: &mut SourceSlot, request: SourceRequest) -> bool {
    match slot.switch_to(|| request.open()) {
        Ok(()) => true,
        Err(error) => {
            match find_coded_error(&error) {
                Some(coded) => warn!(code = coded.code, "source switch failed: {}", coded.message),
                None => warn!("source switch failed: {error:#}"),
            }
            slot.label().is_none()
        }
    }
}

fn window_title(base: &str, source: Option<&str>) -> String {
    match source {
        Some(label) => format!("{base} - {}", display_name(label)),
        None => format!("{base} - drop a video or press W"),
    }
}

fn display_name(label: &str) -> String {
    if label.starts_with("webcam:") {
        return label.to_owned();
    }
    Path::new(label)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| label.to_owned())
}
