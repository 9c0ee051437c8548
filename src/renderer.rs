use std::sync::mpsc;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

use crate::atlas::GlyphAtlas;
use crate::driver::FrameSink;
use crate::error_codes::{CodedError, PIPELINE_SHADER_INVALID, RESOURCE_GPU_UNAVAILABLE};
use crate::grid::{SurfaceSize, Viewport};
use crate::shading::{AsciiUniforms, ASCII_SHADER};
use crate::source::VideoFrame;

/// Format of offscreen targets. Also the format the video and atlas textures
/// use, so no sRGB conversion happens anywhere on the path.
pub const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

pub struct GpuContext {
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    pub async fn headless() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(no_adapter)?;
        Self::from_adapter(adapter).await
    }

    pub async fn for_surface(
        instance: &wgpu::Instance,
        surface: &wgpu::Surface<'_>,
    ) -> Result<Self> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: Some(surface),
            })
            .await
            .ok_or_else(no_adapter)?;
        Self::from_adapter(adapter).await
    }

    async fn from_adapter(adapter: wgpu::Adapter) -> Result<Self> {
        let adapter_info = adapter.get_info();
        info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            "selected GPU adapter"
        );
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("glyphcast-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .context("failed to request wgpu device")?;
        Ok(Self {
            adapter,
            device,
            queue,
        })
    }

    pub fn backend_name(&self) -> String {
        format!("{:?}", self.adapter.get_info().backend)
    }
}

fn no_adapter() -> anyhow::Error {
    CodedError::resource(RESOURCE_GPU_UNAVAILABLE, "no suitable GPU adapter found").into()
}

struct SizedTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl SizedTexture {
    fn new(device: &wgpu::Device, label: &str, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OFFSCREEN_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
        }
    }

    fn write(&self, queue: &wgpu::Queue, rgba: &[u8]) -> Result<()> {
        let bytes_per_row = self
            .width
            .checked_mul(4)
            .ok_or_else(|| anyhow!("texture width overflow when computing row bytes"))?;
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }
}

/// The ascii pass: one pipeline, a reused video texture, the current atlas
/// texture, and the uniform buffer.
pub struct AsciiRenderer {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    video_sampler: wgpu::Sampler,
    atlas_sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    video: Option<SizedTexture>,
    atlas: Option<SizedTexture>,
    bind_group: Option<wgpu::BindGroup>,
}

impl AsciiRenderer {
    pub fn new(gpu: &GpuContext, target_format: wgpu::TextureFormat) -> Result<Self> {
        Self::with_shader(gpu, target_format, ASCII_SHADER)
    }

    /// Builds the pipeline from `shader_source`. Validation failures come back
    /// as `PIPELINE_SHADER_INVALID` carrying wgpu's diagnostic.
    pub fn with_shader(
        gpu: &GpuContext,
        target_format: wgpu::TextureFormat,
        shader_source: &str,
    ) -> Result<Self> {
        let device = &gpu.device;
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("glyphcast-ascii-bind-group-layout"),
            entries: &[
                texture_entry(0),
                sampler_entry(1),
                texture_entry(2),
                sampler_entry(3),
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<AsciiUniforms>() as u64,
                        ),
                    },
                    count: None,
                },
            ],
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("glyphcast-ascii-shader"),
            source: wgpu::ShaderSource::Wgsl(shader_source.into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("glyphcast-ascii-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("glyphcast-ascii-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(CodedError::pipeline(
                PIPELINE_SHADER_INVALID,
                format!("ascii shader failed validation: {error}"),
            )
            .into());
        }

        let video_sampler = linear_clamp_sampler(device, "glyphcast-video-sampler");
        let atlas_sampler = linear_clamp_sampler(device, "glyphcast-atlas-sampler");
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("glyphcast-ascii-uniforms"),
            size: std::mem::size_of::<AsciiUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            pipeline,
            bind_group_layout,
            video_sampler,
            atlas_sampler,
            uniform_buffer,
            video: None,
            atlas: None,
            bind_group: None,
        })
    }

    /// Replaces the atlas texture.
    pub fn upload_atlas(&mut self, gpu: &GpuContext, atlas: &GlyphAtlas) -> Result<()> {
        let texture = SizedTexture::new(
            &gpu.device,
            "glyphcast-atlas-texture",
            atlas.width(),
            atlas.height(),
        );
        texture.write(&gpu.queue, atlas.rgba())?;
        self.atlas = Some(texture);
        self.bind_group = None;
        debug!(width = atlas.width(), height = atlas.height(), "uploaded atlas texture");
        Ok(())
    }

    /// Writes into the existing video texture; reallocates only when the frame
    /// dimensions change.
    pub fn upload_frame(&mut self, gpu: &GpuContext, frame: &VideoFrame) -> Result<()> {
        let reusable = self
            .video
            .as_ref()
            .is_some_and(|video| video.width == frame.width && video.height == frame.height);
        if !reusable {
            debug!(
                width = frame.width,
                height = frame.height,
                "allocating video texture"
            );
            self.video = Some(SizedTexture::new(
                &gpu.device,
                "glyphcast-video-texture",
                frame.width,
                frame.height,
            ));
            self.bind_group = None;
        }
        let video = self
            .video
            .as_ref()
            .ok_or_else(|| anyhow!("video texture missing after allocation"))?;
        video.write(&gpu.queue, &frame.rgba)
    }

    /// Clears `view` to black, then draws the full-screen triangle when the
    /// uniforms describe a drawable grid and both textures are resident.
    /// `viewport` confines the draw to a sub-rectangle of the view.
    pub fn render_to_view(
        &mut self,
        gpu: &GpuContext,
        view: &wgpu::TextureView,
        uniforms: &AsciiUniforms,
        viewport: Option<Viewport>,
    ) -> Result<()> {
        gpu.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(uniforms));
        self.ensure_bind_group(gpu);

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("glyphcast-ascii-encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("glyphcast-ascii-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            if let (true, Some(bind_group)) = (uniforms.is_drawable(), self.bind_group.as_ref()) {
                if let Some(viewport) = viewport {
                    render_pass.set_viewport(
                        viewport.x as f32,
                        viewport.y as f32,
                        viewport.size.width as f32,
                        viewport.size.height as f32,
                        0.0,
                        1.0,
                    );
                }
                render_pass.set_pipeline(&self.pipeline);
                render_pass.set_bind_group(0, bind_group, &[]);
                render_pass.draw(0..3, 0..1);
            }
        }
        gpu.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn ensure_bind_group(&mut self, gpu: &GpuContext) {
        if self.bind_group.is_some() {
            return;
        }
        let (Some(video), Some(atlas)) = (self.video.as_ref(), self.atlas.as_ref()) else {
            return;
        };
        self.bind_group = Some(gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("glyphcast-ascii-bind-group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&video.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.video_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&atlas.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.atlas_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        }));
    }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

fn linear_clamp_sampler(device: &wgpu::Device, label: &str) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

/// A renderer bound to one target view for the duration of a tick.
pub struct ViewSink<'a> {
    pub gpu: &'a GpuContext,
    pub renderer: &'a mut AsciiRenderer,
    pub view: &'a wgpu::TextureView,
    pub viewport: Option<Viewport>,
}

impl FrameSink for ViewSink<'_> {
    fn upload_atlas(&mut self, atlas: &GlyphAtlas) -> Result<()> {
        self.renderer.upload_atlas(self.gpu, atlas)
    }

    fn upload_frame(&mut self, frame: &VideoFrame) -> Result<()> {
        self.renderer.upload_frame(self.gpu, frame)
    }

    fn draw(&mut self, uniforms: &AsciiUniforms) -> Result<()> {
        self.renderer
            .render_to_view(self.gpu, self.view, uniforms, self.viewport)
    }
}

/// Offscreen render target with CPU readback, for headless verification of
/// the kernel. The player presents straight to its surface and never reads back.
pub struct OffscreenTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback_buffer: wgpu::Buffer,
    size: SurfaceSize,
    unpadded_bytes_per_row: u32,
    padded_bytes_per_row: u32,
}

impl OffscreenTarget {
    pub fn new(gpu: &GpuContext, size: SurfaceSize) -> Result<Self> {
        if size.is_empty() {
            return Err(anyhow!(
                "offscreen target must be non-empty, got {}x{}",
                size.width,
                size.height
            ));
        }
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("glyphcast-offscreen-target"),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OFFSCREEN_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let unpadded_bytes_per_row = size
            .width
            .checked_mul(4)
            .ok_or_else(|| anyhow!("frame width overflow when computing row bytes"))?;
        let padded_bytes_per_row =
            align_to(unpadded_bytes_per_row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("glyphcast-readback-buffer"),
            size: u64::from(padded_bytes_per_row) * u64::from(size.height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Ok(Self {
            texture,
            view,
            readback_buffer,
            size,
            unpadded_bytes_per_row,
            padded_bytes_per_row,
        })
    }

    pub fn size(&self) -> SurfaceSize {
        self.size
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Copies the target back to the CPU as tightly packed RGBA8, top row first.
    pub fn read_rgba(&self, gpu: &GpuContext) -> Result<Vec<u8>> {
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("glyphcast-readback-encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &self.readback_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.size.height),
                },
            },
            wgpu::Extent3d {
                width: self.size.width,
                height: self.size.height,
                depth_or_array_layers: 1,
            },
        );
        gpu.queue.submit(Some(encoder.finish()));

        let buffer_slice = self.readback_buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        gpu.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|_| anyhow!("failed receiving GPU map callback"))?
            .context("GPU buffer mapping failed")?;

        let mapped = buffer_slice.get_mapped_range();
        let row_bytes = self.unpadded_bytes_per_row as usize;
        let mut pixels = Vec::with_capacity(row_bytes * self.size.height as usize);
        for chunk in mapped
            .chunks(self.padded_bytes_per_row as usize)
            .take(self.size.height as usize)
        {
            pixels.extend_from_slice(&chunk[..row_bytes]);
        }

        drop(mapped);
        self.readback_buffer.unmap();
        Ok(pixels)
    }
}

fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

/// Prefers a linear format so coverage reaches the screen unmodified.
pub fn pick_surface_format(formats: &[wgpu::TextureFormat]) -> Option<wgpu::TextureFormat> {
    formats
        .iter()
        .copied()
        .find(|format| !format.is_srgb())
        .or_else(|| formats.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readback_rows_align_to_copy_alignment() {
        assert_eq!(align_to(4, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(2560, 256), 2560);
        assert_eq!(align_to(2564, 256), 2816);
    }

    #[test]
    fn surface_format_prefers_linear() {
        let formats = [
            wgpu::TextureFormat::Bgra8UnormSrgb,
            wgpu::TextureFormat::Bgra8Unorm,
        ];
        assert_eq!(
            pick_surface_format(&formats),
            Some(wgpu::TextureFormat::Bgra8Unorm)
        );
        assert_eq!(
            pick_surface_format(&[wgpu::TextureFormat::Rgba8UnormSrgb]),
            Some(wgpu::TextureFormat::Rgba8UnormSrgb)
        );
        assert_eq!(pick_surface_format(&[]), None);
    }
}
