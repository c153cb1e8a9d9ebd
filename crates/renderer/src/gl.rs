//! wgpu host context restricted to the GL backend (WebGL2 in browsers,
//! GLES/desktop GL elsewhere). Draws a sorted list of cubes, one dynamic
//! uniform slot per draw.
//! wgpu = 26.x, winit = 0.30.x

use std::{io::Write, mem::size_of, num::NonZeroU64, sync::Arc};

use anyhow::{Context, Result, anyhow};
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use parking_lot::Mutex;
use wgpu::{
    Backends, BindGroup, BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingType, BlendState,
    Buffer, BufferBinding, BufferBindingType, BufferUsages, ColorTargetState, ColorWrites,
    CommandEncoderDescriptor, CompositeAlphaMode, DepthBiasState, DepthStencilState,
    DeviceDescriptor, Extent3d, Features, FragmentState, Instance, InstanceDescriptor, Limits,
    LoadOp, Operations, PipelineLayoutDescriptor, PowerPreference, PresentMode, Queue,
    RenderPassColorAttachment, RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor,
    ShaderModuleDescriptor, ShaderSource, ShaderStages, StoreOp, Surface, SurfaceConfiguration,
    SurfaceError, SurfaceTexture, TextureDescriptor, TextureDimension, TextureFormat,
    TextureUsages, TextureView, TextureViewDescriptor, VertexBufferLayout, VertexState,
    VertexStepMode, util::DeviceExt,
};
use winit::{dpi::PhysicalSize, window::Window};

use asset::Shader;

use crate::device::{Bounds, DebugSink, HostContext, Pass};

/// Draws per frame; anything past this is dropped with a warning.
pub const MAX_DRAWS: usize = 1024;

const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Vertex: position + color.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    pub const LAYOUT: VertexBufferLayout<'static> = VertexBufferLayout {
        array_stride: size_of::<Vertex>() as u64,
        step_mode: VertexStepMode::Vertex,
        attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3],
    };
}

/// Per-draw uniform block (`layout(set = 0, binding = 0) uniform Draw`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct DrawUniform {
    mvp: [[f32; 4]; 4],
    tint: [f32; 4],
}

/// One entry of a draw list, already in draw order.
#[derive(Clone, Copy, Debug)]
pub struct DrawItem {
    pub model: Mat4,
    pub tint: [f32; 4],
}

/// Uniform slot size rounded up to the device's dynamic offset alignment.
fn uniform_stride(size: u64, alignment: u64) -> u64 {
    size.div_ceil(alignment.max(1)) * alignment.max(1)
}

/// Lay out one `DrawUniform` per item at `stride` byte intervals.
fn pack_draws(view_proj: Mat4, draws: &[DrawItem], stride: u64) -> Vec<u8> {
    let stride = stride as usize;
    let mut bytes = vec![0u8; stride * draws.len()];
    for (i, item) in draws.iter().enumerate() {
        let uniform = DrawUniform {
            mvp: (view_proj * item.model).to_cols_array_2d(),
            tint: item.tint,
        };
        let at = i * stride;
        bytes[at..at + size_of::<DrawUniform>()].copy_from_slice(bytemuck::bytes_of(&uniform));
    }
    bytes
}

pub struct GlContext {
    // Surface
    surface: Surface<'static>,
    surface_config: SurfaceConfiguration,

    // Device/queue
    device: wgpu::Device,
    queue: Queue,

    // Pipeline & geometry
    pipeline: RenderPipeline,
    vertex_buf: Buffer,
    index_buf: Buffer,
    index_count: u32,

    // Per-draw uniforms
    draw_bg: BindGroup,
    draw_buf: Buffer,
    draw_stride: u64,

    depth_view: TextureView,

    /// Rendered but not yet presented.
    pending: Option<SurfaceTexture>,
    debug: Arc<Mutex<Option<DebugSink>>>,

    // Size cache
    width: u32,
    height: u32,
}

impl GlContext {
    /// Create a GL-backed context for `window`, compiling `shader` (GLSL,
    /// entry point `main` in both stages).
    pub async fn new(window: Arc<Window>, shader: &Shader) -> Result<Self> {
        let PhysicalSize { width, height } = window.inner_size();
        let width = width.max(1);
        let height = height.max(1);

        let instance = Instance::new(&InstanceDescriptor {
            backends: Backends::GL,
            ..Default::default()
        });
        let surface: Surface<'static> = instance
            .create_surface(window)
            .context("Failed to create GL surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("No GL adapter available")?;
        log::info!("Using adapter: {:?}", adapter.get_info());

        let (device, queue) = adapter
            .request_device(&DeviceDescriptor {
                label: Some("Svarog3D GL Device"),
                required_features: Features::empty(),
                required_limits: Limits::downlevel_webgl2_defaults()
                    .using_resolution(adapter.limits()),
                memory_hints: Default::default(),
                trace: Default::default(),
            })
            .await
            .context("request_device failed")?;

        let debug: Arc<Mutex<Option<DebugSink>>> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&debug);
        device.on_uncaptured_error(Box::new(move |err: wgpu::Error| {
            match sink.lock().as_mut() {
                Some(out) => {
                    let _ = writeln!(out, "[gl] {err}");
                }
                None => log::error!("Uncaptured GPU error: {err}"),
            }
        }));

        // Surface format (prefer sRGB)
        let caps = surface.get_capabilities(&adapter);
        let surface_format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| anyhow!("Surface is not supported by the GL adapter"))?;

        let surface_config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width,
            height,
            present_mode: PresentMode::AutoVsync,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let depth_view = create_depth_view(&device, &surface_config);

        // Shader compile and pipeline validation errors are construction
        // failures, not uncaptured errors.
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let vs = device.create_shader_module(ShaderModuleDescriptor {
            label: Some(shader.name()),
            source: ShaderSource::Glsl {
                shader: shader.vertex_text(),
                stage: wgpu::naga::ShaderStage::Vertex,
                defines: Default::default(),
            },
        });
        let fs = device.create_shader_module(ShaderModuleDescriptor {
            label: Some(shader.name()),
            source: ShaderSource::Glsl {
                shader: shader.fragment_text(),
                stage: wgpu::naga::ShaderStage::Fragment,
                defines: Default::default(),
            },
        });

        // ==== Per-draw uniforms (dynamic offsets) ====
        let draw_size = size_of::<DrawUniform>() as u64;
        let draw_stride = uniform_stride(
            draw_size,
            device.limits().min_uniform_buffer_offset_alignment as u64,
        );
        let draw_bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Draw BGL"),
            entries: &[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::VERTEX,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(draw_size),
                },
                count: None,
            }],
        });
        let draw_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Draw UBO"),
            size: draw_stride * MAX_DRAWS as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let draw_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Draw BG"),
            layout: &draw_bgl,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(BufferBinding {
                    buffer: &draw_buf,
                    offset: 0,
                    size: NonZeroU64::new(draw_size),
                }),
            }],
        });

        // ==== Pipeline ====
        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Draw PipelineLayout"),
            bind_group_layouts: &[&draw_bgl],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Cube Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: VertexState {
                module: &vs,
                entry_point: Some("main"),
                buffers: &[Vertex::LAYOUT],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(FragmentState {
                module: &fs,
                entry_point: Some("main"),
                targets: &[Some(ColorTargetState {
                    format: surface_format,
                    blend: Some(BlendState::ALPHA_BLENDING),
                    write_mask: ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                cull_mode: Some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil: Some(DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        if let Some(err) = device.pop_error_scope().await {
            return Err(anyhow!("Shader '{}' rejected: {err}", shader.name()));
        }

        // ==== Geometry: indexed cube ====
        let (vertices, indices) = cube_vertices();
        let vertex_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Cube VB"),
            contents: bytemuck::cast_slice(&vertices),
            usage: BufferUsages::VERTEX,
        });
        let index_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Cube IB"),
            contents: bytemuck::cast_slice(&indices),
            usage: BufferUsages::INDEX,
        });

        log::info!(
            "GL context ready: {}x{}, format {:?}, draw stride {} bytes",
            width,
            height,
            surface_format,
            draw_stride
        );

        Ok(Self {
            surface,
            surface_config,
            device,
            queue,
            pipeline,
            vertex_buf,
            index_buf,
            index_count: indices.len() as u32,
            draw_bg,
            draw_buf,
            draw_stride,
            depth_view,
            pending: None,
            debug,
            width,
            height,
        })
    }

    /// Resize: reconfigure surface & recreate depth view.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
        self.surface_config.width = self.width;
        self.surface_config.height = self.height;
        self.surface.configure(&self.device, &self.surface_config);
        self.depth_view = create_depth_view(&self.device, &self.surface_config);
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Render `draws` in the given order. The frame stays pending until
    /// `present`.
    pub fn draw_frame(&mut self, view_proj: Mat4, draws: &[DrawItem]) -> Result<Pass, SurfaceError> {
        if draws.len() > MAX_DRAWS {
            log::warn!("Draw list truncated: {} > {}", draws.len(), MAX_DRAWS);
        }
        let draws = &draws[..draws.len().min(MAX_DRAWS)];

        let staging = pack_draws(view_proj, draws, self.draw_stride);
        if !staging.is_empty() {
            self.queue.write_buffer(&self.draw_buf, 0, &staging);
        }

        // An unpresented frame must be released before acquiring the next.
        self.pending = None;
        let frame = self.surface.get_current_texture()?;
        let view = frame.texture.create_view(&Default::default());

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("MainEncoder"),
            });

        {
            let mut rpass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("MainPass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(wgpu::Color {
                            r: 0.05,
                            g: 0.05,
                            b: 0.08,
                            a: 1.0,
                        }),
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(Operations {
                        load: LoadOp::Clear(1.0),
                        store: StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            rpass.set_pipeline(&self.pipeline);
            rpass.set_vertex_buffer(0, self.vertex_buf.slice(..));
            rpass.set_index_buffer(self.index_buf.slice(..), wgpu::IndexFormat::Uint16);
            for i in 0..draws.len() {
                let offset = (i as u64 * self.draw_stride) as u32;
                rpass.set_bind_group(0, &self.draw_bg, &[offset]);
                rpass.draw_indexed(0..self.index_count, 0, 0..1);
            }
        }

        self.queue.submit(Some(encoder.finish()));
        self.pending = Some(frame);
        Ok(Pass::Complete)
    }

    /// `draw_frame`, recovering from a lost surface. Failures skip the frame.
    pub fn render(&mut self, view_proj: Mat4, draws: &[DrawItem]) -> Pass {
        match self.draw_frame(view_proj, draws) {
            Ok(pass) => pass,
            Err(err) if Self::is_surface_lost(&err) => {
                log::warn!("Surface lost ({err:?}), reconfiguring");
                self.recreate_surface();
                Pass::Partial
            }
            Err(err) => {
                log::error!("Frame skipped: {err}");
                Pass::Partial
            }
        }
    }

    pub fn is_surface_lost(err: &SurfaceError) -> bool {
        matches!(err, SurfaceError::Lost | SurfaceError::Outdated)
    }

    pub fn recreate_surface(&mut self) {
        self.resize(self.width, self.height);
    }
}

impl HostContext for GlContext {
    fn present(&mut self) {
        if let Some(frame) = self.pending.take() {
            frame.present();
        }
    }

    fn update_bounds(&mut self, bounds: Bounds) {
        log::debug!("GL bounds -> {}x{}", bounds.width, bounds.height);
        self.resize(bounds.width, bounds.height);
    }

    fn set_debug_output(&mut self, sink: Option<DebugSink>) {
        *self.debug.lock() = sink;
    }

    fn destroy(&mut self) {
        self.pending = None;
        self.device.destroy();
    }
}

/// Create a depth texture view matching the surface config.
fn create_depth_view(device: &wgpu::Device, sc: &SurfaceConfiguration) -> TextureView {
    let tex = device.create_texture(&TextureDescriptor {
        label: Some("DepthTex"),
        size: Extent3d {
            width: sc.width.max(1),
            height: sc.height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    tex.create_view(&TextureViewDescriptor::default())
}

/// Unit cube (positions + colors) and indices (CCW).
fn cube_vertices() -> (Vec<Vertex>, Vec<u16>) {
    let v = [
        // back z=-1
        Vertex { pos: [-1.0, -1.0, -1.0], color: [1.0, 0.0, 0.0] }, // 0
        Vertex { pos: [ 1.0, -1.0, -1.0], color: [0.0, 1.0, 0.0] }, // 1
        Vertex { pos: [ 1.0,  1.0, -1.0], color: [0.0, 0.0, 1.0] }, // 2
        Vertex { pos: [-1.0,  1.0, -1.0], color: [1.0, 1.0, 0.0] }, // 3
        // front z=+1
        Vertex { pos: [-1.0, -1.0,  1.0], color: [1.0, 0.0, 1.0] }, // 4
        Vertex { pos: [ 1.0, -1.0,  1.0], color: [0.0, 1.0, 1.0] }, // 5
        Vertex { pos: [ 1.0,  1.0,  1.0], color: [1.0, 1.0, 1.0] }, // 6
        Vertex { pos: [-1.0,  1.0,  1.0], color: [1.0, 0.5, 0.0] }, // 7
    ];
    let idx: [u16; 36] = [
        4, 5, 6, 4, 6, 7, // front (+Z)
        0, 2, 1, 0, 3, 2, // back (-Z)
        3, 6, 2, 3, 7, 6, // top (+Y)
        0, 1, 5, 0, 5, 4, // bottom (-Y)
        0, 7, 3, 0, 4, 7, // left (-X)
        1, 2, 6, 1, 6, 5, // right (+X)
    ];
    (v.to_vec(), idx.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec3, Vec4};

    #[test]
    fn stride_rounds_up_to_alignment() {
        assert_eq!(uniform_stride(80, 256), 256);
        assert_eq!(uniform_stride(256, 256), 256);
        assert_eq!(uniform_stride(257, 256), 512);
        assert_eq!(uniform_stride(80, 0), 80);
    }

    #[test]
    fn draws_are_packed_at_stride_in_order() {
        let draws = [
            DrawItem {
                model: Mat4::from_translation(Vec3::X),
                tint: [1.0, 0.0, 0.0, 1.0],
            },
            DrawItem {
                model: Mat4::IDENTITY,
                tint: [0.0, 0.0, 1.0, 0.5],
            },
        ];
        let bytes = pack_draws(Mat4::IDENTITY, &draws, 256);
        assert_eq!(bytes.len(), 512);

        let second: DrawUniform =
            bytemuck::pod_read_unaligned(&bytes[256..256 + size_of::<DrawUniform>()]);
        assert_eq!(second.tint, [0.0, 0.0, 1.0, 0.5]);
        assert_eq!(second.mvp, Mat4::IDENTITY.to_cols_array_2d());

        let first: DrawUniform = bytemuck::pod_read_unaligned(&bytes[..size_of::<DrawUniform>()]);
        let col3 = Vec4::from_array(first.mvp[3]);
        assert_eq!(col3, Vec4::new(1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn cube_faces_wind_outward() {
        let (v, idx) = cube_vertices();
        assert_eq!(idx.len(), 36);
        for tri in idx.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from_array(v[i as usize].pos));
            let normal = (b - a).cross(c - a);
            let center = (a + b + c) / 3.0;
            assert!(normal.dot(center) > 0.0, "triangle {tri:?} faces inward");
        }
    }
}
