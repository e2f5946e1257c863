//! wgpu backend implementation
//!
//! Render commands are buffered per pass and replayed on `end_render_pass`.
//! Pipelines are built lazily at draw time from (program, render state, pass
//! formats) and cached. Each draw snapshots its program's parameter block into a
//! per-frame uniform ring buffer addressed through a dynamic offset.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::shader::reflect::{reflect_wgsl, ParameterLocation, ProgramReflection};
use crate::shader::ParameterValue;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// Bytes of uniform data available to the draws of one frame
const UNIFORM_RING_SIZE: u64 = 4 * 1024 * 1024;

/// Buffered render pass command
#[derive(Clone)]
enum RenderCommand {
    SetPipeline(u64),
    SetUniforms { program: u64, offset: u32 },
    SetTextures(u64),
    SetVertexBuffer { slot: u32, buffer: BufferHandle, offset: u64 },
    SetIndexBuffer { buffer: BufferHandle, offset: u64, format: IndexFormat },
    SetViewport { x: f32, y: f32, width: f32, height: f32 },
    Draw { vertices: std::ops::Range<u32>, instances: std::ops::Range<u32> },
    DrawIndexed { indices: std::ops::Range<u32>, base_vertex: i32, instances: std::ops::Range<u32> },
}

/// Pending render pass with buffered commands
struct PendingRenderPass {
    descriptor: RenderPassDescriptor,
    color_formats: Vec<TextureFormat>,
    depth_format: Option<TextureFormat>,
    commands: Vec<RenderCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: u64,
    state: RenderState,
    color_formats: Vec<TextureFormat>,
    depth_format: Option<TextureFormat>,
}

/// A linked program and the state its next draw will use
struct ProgramEntry {
    label: String,
    module: wgpu::ShaderModule,
    reflection: ProgramReflection,
    pipeline_layout: wgpu::PipelineLayout,
    uniform_bind_group: Option<wgpu::BindGroup>,
    texture_layout: Option<wgpu::BindGroupLayout>,
    uniform_data: Vec<u8>,
    textures: HashMap<u32, (TextureViewHandle, SamplerHandle)>,
}

/// Views bound when a program samples a texture nobody set
struct Fallbacks {
    color_2d: u64,
    depth_2d: u64,
    color_cube: u64,
    depth_cube: u64,
    filtering: u64,
    comparison: u64,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    surface: wgpu::Surface<'static>,
    #[allow(dead_code)]
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_config: wgpu::SurfaceConfiguration,
    current_texture: Option<wgpu::SurfaceTexture>,
    swapchain_view: Option<wgpu::TextureView>,
    current_view_id: u64,

    // Resource storage
    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, (wgpu::Texture, TextureFormat)>,
    texture_views: HashMap<u64, (wgpu::TextureView, TextureFormat)>,
    samplers: HashMap<u64, wgpu::Sampler>,
    programs: HashMap<u64, ProgramEntry>,
    pipelines: HashMap<PipelineKey, Option<u64>>,
    pipeline_store: HashMap<u64, wgpu::RenderPipeline>,
    texture_bind_groups: HashMap<(u64, Vec<(u32, u64, u64)>), u64>,
    bind_group_store: HashMap<u64, wgpu::BindGroup>,
    fallbacks: Fallbacks,

    next_id: u64,

    // Per-frame parameter snapshots
    uniform_ring: wgpu::Buffer,
    uniform_cursor: u64,
    uniform_alignment: u64,

    // Command encoding
    encoder: Option<wgpu::CommandEncoder>,
    pending_render_pass: Option<PendingRenderPass>,
    bound_program: Option<u64>,
    state: RenderState,
}

impl WgpuBackend {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
            TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
            TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        }
    }

    fn convert_texture_format_back(format: wgpu::TextureFormat) -> TextureFormat {
        match format {
            wgpu::TextureFormat::Rgba8Unorm => TextureFormat::Rgba8Unorm,
            wgpu::TextureFormat::Rgba8UnormSrgb => TextureFormat::Rgba8UnormSrgb,
            wgpu::TextureFormat::Bgra8Unorm => TextureFormat::Bgra8Unorm,
            wgpu::TextureFormat::Bgra8UnormSrgb => TextureFormat::Bgra8UnormSrgb,
            wgpu::TextureFormat::Rgba16Float => TextureFormat::Rgba16Float,
            wgpu::TextureFormat::Rgba32Float => TextureFormat::Rgba32Float,
            wgpu::TextureFormat::Depth32Float => TextureFormat::Depth32Float,
            wgpu::TextureFormat::Depth24PlusStencil8 => TextureFormat::Depth24PlusStencil8,
            wgpu::TextureFormat::R32Float => TextureFormat::R32Float,
            _ => TextureFormat::Rgba8Unorm,
        }
    }

    fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
        let mut result = wgpu::BufferUsages::empty();
        if usage.contains(BufferUsage::COPY_DST) {
            result |= wgpu::BufferUsages::COPY_DST;
        }
        if usage.contains(BufferUsage::INDEX) {
            result |= wgpu::BufferUsages::INDEX;
        }
        if usage.contains(BufferUsage::VERTEX) {
            result |= wgpu::BufferUsages::VERTEX;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            result |= wgpu::BufferUsages::UNIFORM;
        }
        result
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::TEXTURE_BINDING) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        result
    }

    fn convert_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
        match format {
            VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
            VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
            VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        }
    }

    fn convert_compare_function(func: CompareFunction) -> wgpu::CompareFunction {
        match func {
            CompareFunction::Never => wgpu::CompareFunction::Never,
            CompareFunction::Less => wgpu::CompareFunction::Less,
            CompareFunction::Equal => wgpu::CompareFunction::Equal,
            CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            CompareFunction::Greater => wgpu::CompareFunction::Greater,
            CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
            CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            CompareFunction::Always => wgpu::CompareFunction::Always,
        }
    }

    fn convert_blend_mode(mode: BlendMode) -> Option<wgpu::BlendState> {
        match mode {
            BlendMode::Opaque => None,
            BlendMode::Additive => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent::REPLACE,
            }),
            BlendMode::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
        }
    }

    fn convert_cull_mode(mode: CullMode) -> Option<wgpu::Face> {
        match mode {
            CullMode::None => None,
            CullMode::Front => Some(wgpu::Face::Front),
            CullMode::Back => Some(wgpu::Face::Back),
        }
    }

    fn convert_front_face(face: FrontFace) -> wgpu::FrontFace {
        match face {
            FrontFace::Ccw => wgpu::FrontFace::Ccw,
            FrontFace::Cw => wgpu::FrontFace::Cw,
        }
    }

    fn convert_filter_mode(mode: FilterMode) -> wgpu::FilterMode {
        match mode {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        }
    }

    fn convert_address_mode(mode: AddressMode) -> wgpu::AddressMode {
        match mode {
            AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            AddressMode::Repeat => wgpu::AddressMode::Repeat,
        }
    }

    fn convert_load_op<T>(op: &LoadOp, clear: impl FnOnce(&[f32; 4]) -> T) -> wgpu::LoadOp<T> {
        match op {
            LoadOp::Clear(color) => wgpu::LoadOp::Clear(clear(color)),
            LoadOp::Load => wgpu::LoadOp::Load,
        }
    }

    fn convert_store_op(op: StoreOp) -> wgpu::StoreOp {
        match op {
            StoreOp::Store => wgpu::StoreOp::Store,
            StoreOp::Discard => wgpu::StoreOp::Discard,
        }
    }

    fn clamp_to_limits(&self, width: u32, height: u32) -> (u32, u32) {
        let max_size = self.device.limits().max_texture_dimension_2d;
        clamp_surface_size(width, height, max_size)
    }
}

/// Clamp to device limits while maintaining aspect ratio
fn clamp_surface_size(width: u32, height: u32, max_size: u32) -> (u32, u32) {
    if width > max_size || height > max_size {
        let scale = (max_size as f32 / width as f32).min(max_size as f32 / height as f32);
        let new_width = ((width as f32 * scale) as u32).max(1);
        let new_height = ((height as f32 * scale) as u32).max(1);
        (new_width, new_height)
    } else {
        (width.max(1), height.max(1))
    }
}

impl WgpuBackend {
    /// Create a backend drawing into `window`. Blocks on adapter and device requests.
    pub fn new(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(window, vsync))
    }

    pub async fn new_async(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        let (instance, surface, adapter, device, queue) = Self::init_native(window.clone()).await?;

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| BackendError::SurfaceCreationFailed("Surface reports no formats".into()))?;

        let present_mode = if vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };

        let (width, height) = clamp_surface_size(
            size.width,
            size.height,
            device.limits().max_texture_dimension_2d,
        );

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width,
            height,
            present_mode,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let uniform_ring = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Uniform Ring"),
            size: UNIFORM_RING_SIZE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_alignment = device.limits().min_uniform_buffer_offset_alignment as u64;

        let mut backend = Self {
            instance,
            surface,
            adapter,
            device,
            queue,
            surface_config,
            current_texture: None,
            swapchain_view: None,
            current_view_id: 0,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            texture_views: HashMap::new(),
            samplers: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            pipeline_store: HashMap::new(),
            texture_bind_groups: HashMap::new(),
            bind_group_store: HashMap::new(),
            fallbacks: Fallbacks {
                color_2d: 0,
                depth_2d: 0,
                color_cube: 0,
                depth_cube: 0,
                filtering: 0,
                comparison: 0,
            },
            next_id: 1,
            uniform_ring,
            uniform_cursor: 0,
            uniform_alignment,
            encoder: None,
            pending_render_pass: None,
            bound_program: None,
            state: RenderState::STANDARD,
        };
        backend.fallbacks = backend.create_fallbacks()?;

        log::info!(
            "wgpu backend ready: {}x{} {:?}",
            width,
            height,
            surface_format
        );
        Ok(backend)
    }

    /// Native initialization
    async fn init_native(
        window: Arc<winit::window::Window>,
    ) -> BackendResult<(
        wgpu::Instance,
        wgpu::Surface<'static>,
        wgpu::Adapter,
        wgpu::Device,
        wgpu::Queue,
    )> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Forward Engine Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        Ok((instance, surface, adapter, device, queue))
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn fallback_view(
        &mut self,
        layers: u32,
        format: TextureFormat,
        view: TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        let usage = if format.is_depth() {
            TextureUsage::TEXTURE_BINDING | TextureUsage::RENDER_ATTACHMENT
        } else {
            TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST
        };
        let texture = self.create_texture(&TextureDescriptor {
            label: Some("Fallback Texture".into()),
            layers,
            format,
            usage,
            ..Default::default()
        })?;
        if !format.is_depth() {
            for layer in 0..layers {
                self.write_texture(texture, layer, &[255; 4], 1, 1);
            }
        }
        self.create_texture_view(texture, &view)
    }

    fn create_fallbacks(&mut self) -> BackendResult<Fallbacks> {
        let color_2d = self.fallback_view(1, TextureFormat::Rgba8Unorm, TextureViewDescriptor::d2())?;
        let depth_2d = self.fallback_view(1, TextureFormat::Depth32Float, TextureViewDescriptor::d2())?;
        let color_cube = self.fallback_view(6, TextureFormat::Rgba8Unorm, TextureViewDescriptor::cube())?;
        let depth_cube = self.fallback_view(6, TextureFormat::Depth32Float, TextureViewDescriptor::cube())?;
        let filtering = self.create_sampler(&SamplerDescriptor::default())?;
        let comparison = self.create_sampler(&SamplerDescriptor::shadow())?;

        Ok(Fallbacks {
            color_2d: color_2d.0,
            depth_2d: depth_2d.0,
            color_cube: color_cube.0,
            depth_cube: depth_cube.0,
            filtering: filtering.0,
            comparison: comparison.0,
        })
    }

    fn view_format(&self, view: TextureViewHandle) -> Option<TextureFormat> {
        if view.0 == self.current_view_id && self.swapchain_view.is_some() {
            Some(Self::convert_texture_format_back(self.surface_config.format))
        } else {
            self.texture_views.get(&view.0).map(|(_, format)| *format)
        }
    }

    fn pipeline_for(&mut self, key: PipelineKey) -> Option<u64> {
        if let Some(cached) = self.pipelines.get(&key) {
            return *cached;
        }

        let entry = self.programs.get(&key.program)?;

        let vertex_layout = Vertex::layout();
        let attributes: Vec<wgpu::VertexAttribute> = vertex_layout
            .attributes
            .iter()
            .map(|a| wgpu::VertexAttribute {
                format: Self::convert_vertex_format(a.format),
                offset: a.offset,
                shader_location: a.location,
            })
            .collect();
        let vertex_buffers = if entry.reflection.has_vertex_input {
            vec![wgpu::VertexBufferLayout {
                array_stride: vertex_layout.array_stride,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &attributes,
            }]
        } else {
            Vec::new()
        };

        let blend = Self::convert_blend_mode(key.state.blend);
        let color_targets: Vec<Option<wgpu::ColorTargetState>> = key
            .color_formats
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: Self::convert_texture_format(*format),
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&entry.label),
            layout: Some(&entry.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &entry.module,
                entry_point: "vs_main",
                compilation_options: Default::default(),
                buffers: &vertex_buffers,
            },
            fragment: entry.reflection.has_fragment.then(|| wgpu::FragmentState {
                module: &entry.module,
                entry_point: "fs_main",
                compilation_options: Default::default(),
                targets: &color_targets,
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: Self::convert_front_face(key.state.front_face),
                cull_mode: Self::convert_cull_mode(key.state.cull),
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: key.depth_format.map(|format| wgpu::DepthStencilState {
                format: Self::convert_texture_format(format),
                depth_write_enabled: key.state.depth_write,
                depth_compare: Self::convert_compare_function(key.state.depth_compare),
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let id = match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => {
                log::error!("Pipeline for '{}' failed: {}", entry.label, err);
                None
            }
            None => {
                log::debug!("Created pipeline for '{}' with {:?}", entry.label, key.state);
                let id = self.next_handle();
                self.pipeline_store.insert(id, pipeline);
                Some(id)
            }
        };
        self.pipelines.insert(key, id);
        id
    }

    /// Copy the program's parameter block into the ring, returning its dynamic offset
    fn snapshot_uniforms(&mut self, program: u64) -> Option<u32> {
        let entry = self.programs.get(&program)?;
        let size = entry.uniform_data.len() as u64;
        let offset = self.uniform_cursor;
        if offset + size > UNIFORM_RING_SIZE {
            log::warn!("Uniform ring exhausted, dropping draw of '{}'", entry.label);
            return None;
        }
        self.queue.write_buffer(&self.uniform_ring, offset, &entry.uniform_data);
        self.uniform_cursor = (offset + size).div_ceil(self.uniform_alignment) * self.uniform_alignment;
        Some(offset as u32)
    }

    /// Bind group for the textures currently set on a program, created on first use
    fn texture_bind_group(&mut self, program: u64) -> Option<u64> {
        let entry = self.programs.get(&program)?;
        let layout = entry.texture_layout.as_ref()?;

        let mut key = Vec::with_capacity(entry.reflection.textures.len());
        for slot in &entry.reflection.textures {
            let bound = entry
                .textures
                .get(&slot.binding)
                .filter(|(view, sampler)| {
                    self.texture_views.contains_key(&view.0) && self.samplers.contains_key(&sampler.0)
                })
                .map(|(view, sampler)| (view.0, sampler.0));
            let (view, sampler) = bound.unwrap_or_else(|| {
                let view = match (slot.dimension, slot.depth) {
                    (ViewDimension::D2, false) => self.fallbacks.color_2d,
                    (ViewDimension::D2, true) => self.fallbacks.depth_2d,
                    (ViewDimension::Cube, false) => self.fallbacks.color_cube,
                    (ViewDimension::Cube, true) => self.fallbacks.depth_cube,
                };
                let sampler = if slot.comparison {
                    self.fallbacks.comparison
                } else {
                    self.fallbacks.filtering
                };
                (view, sampler)
            });
            key.push((slot.binding, view, sampler));
        }

        let cache_key = (program, key);
        if let Some(id) = self.texture_bind_groups.get(&cache_key) {
            return Some(*id);
        }

        let mut entries = Vec::with_capacity(cache_key.1.len() * 2);
        for (binding, view, sampler) in &cache_key.1 {
            let (view, _) = self.texture_views.get(view)?;
            let sampler = self.samplers.get(sampler)?;
            entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: *binding + 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&entry.label),
            layout,
            entries: &entries,
        });

        let id = self.next_handle();
        self.bind_group_store.insert(id, bind_group);
        self.texture_bind_groups.insert(cache_key, id);
        Some(id)
    }

    /// Resolve pipeline, parameters and textures of the next draw into pass commands
    fn prepare_draw(&mut self) -> bool {
        let Some(pending) = self.pending_render_pass.as_ref() else {
            return false;
        };
        let Some(program) = self.bound_program else {
            log::warn!("Draw without a bound program ignored");
            return false;
        };
        let key = PipelineKey {
            program,
            state: self.state,
            color_formats: pending.color_formats.clone(),
            depth_format: pending.depth_format,
        };

        let Some(pipeline) = self.pipeline_for(key) else {
            return false;
        };
        let has_uniforms = self
            .programs
            .get(&program)
            .is_some_and(|p| p.uniform_bind_group.is_some());
        let uniform_offset = if has_uniforms {
            match self.snapshot_uniforms(program) {
                Some(offset) => Some(offset),
                None => return false,
            }
        } else {
            None
        };
        let textures = self.texture_bind_group(program);

        let Some(pending) = self.pending_render_pass.as_mut() else {
            return false;
        };
        pending.commands.push(RenderCommand::SetPipeline(pipeline));
        if let Some(offset) = uniform_offset {
            pending.commands.push(RenderCommand::SetUniforms { program, offset });
        }
        if let Some(textures) = textures {
            pending.commands.push(RenderCommand::SetTextures(textures));
        }
        true
    }

    fn forget_bind_groups(&mut self, mut stale: impl FnMut(&(u64, Vec<(u32, u64, u64)>)) -> bool) {
        let store = &mut self.bind_group_store;
        self.texture_bind_groups.retain(|key, id| {
            if stale(key) {
                store.remove(id);
                false
            } else {
                true
            }
        });
    }
}

impl GraphicsBackend for WgpuBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            let (width, height) = self.clamp_to_limits(width, height);
            self.surface_config.width = width;
            self.surface_config.height = height;
            self.surface.configure(&self.device, &self.surface_config);
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.surface_config);
                return Err(BackendError::SurfaceLost);
            }
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(BackendError::OutOfMemory),
            Err(e) => return Err(BackendError::AcquireImageFailed(e.to_string())),
        };

        let view_id = self.next_handle();
        self.current_view_id = view_id;
        self.swapchain_view = Some(
            output
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default()),
        );
        self.current_texture = Some(output);
        self.uniform_cursor = 0;

        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                }),
        );

        Ok(FrameContext {
            swapchain_view: TextureViewHandle(view_id),
            width: self.surface_config.width,
            height: self.surface_config.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        self.swapchain_view = None;
        if let Some(texture) = self.current_texture.take() {
            texture.present();
        }
        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        Self::convert_texture_format_back(self.surface_config.format)
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: desc.label.as_deref(),
            contents: data,
            usage: Self::convert_buffer_usage(desc.usage),
        });
        let id = self.next_handle();
        self.buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 || desc.layers == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has an empty extent",
                desc.label
            )));
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_texture_format(desc.format),
            usage: Self::convert_texture_usage(desc.usage),
            view_formats: &[],
        });

        let id = self.next_handle();
        self.textures.insert(id, (texture, desc.format));
        Ok(TextureHandle(id))
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        let (tex, format) = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::InvalidHandle("texture"))?;

        let view = tex.create_view(&wgpu::TextureViewDescriptor {
            label: None,
            format: None,
            dimension: Some(match desc.dimension {
                ViewDimension::D2 => wgpu::TextureViewDimension::D2,
                ViewDimension::Cube => wgpu::TextureViewDimension::Cube,
            }),
            aspect: wgpu::TextureAspect::All,
            base_mip_level: 0,
            mip_level_count: None,
            base_array_layer: desc.base_layer,
            array_layer_count: Some(desc.layer_count),
        });
        let format = *format;

        let id = self.next_handle();
        self.texture_views.insert(id, (view, format));
        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, layer: u32, data: &[u8], width: u32, height: u32) {
        if let Some((tex, format)) = self.textures.get(&texture.0) {
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: tex,
                    mip_level: 0,
                    origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(width * format.bytes_per_pixel()),
                    rows_per_image: Some(height),
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let address_mode = Self::convert_address_mode(desc.address_mode);
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: desc.label.as_deref(),
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            mag_filter: Self::convert_filter_mode(desc.mag_filter),
            min_filter: Self::convert_filter_mode(desc.min_filter),
            mipmap_filter: wgpu::FilterMode::Nearest,
            lod_min_clamp: 0.0,
            lod_max_clamp: 32.0,
            compare: desc.compare.map(Self::convert_compare_function),
            anisotropy_clamp: 1,
            border_color: None,
        });

        let id = self.next_handle();
        self.samplers.insert(id, sampler);
        Ok(SamplerHandle(id))
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        let reflection = reflect_wgsl(&desc.source)
            .map_err(|err| BackendError::ShaderCreationFailed(format!("{}: {}", desc.label, err)))?;
        if reflection.uniform_size == 0 && !reflection.textures.is_empty() {
            return Err(BackendError::ShaderCreationFailed(format!(
                "{}: textures require a parameter block at @group(0) @binding(0)",
                desc.label
            )));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&desc.label),
            source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
        });

        let uniform_layout = (reflection.uniform_size > 0).then(|| {
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&desc.label),
                    entries: &[wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: true,
                            min_binding_size: NonZeroU64::new(reflection.uniform_size as u64),
                        },
                        count: None,
                    }],
                })
        });

        let texture_layout = (!reflection.textures.is_empty()).then(|| {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = reflection
                .textures
                .iter()
                .flat_map(|slot| {
                    [
                        wgpu::BindGroupLayoutEntry {
                            binding: slot.binding,
                            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                            ty: wgpu::BindingType::Texture {
                                sample_type: if slot.depth {
                                    wgpu::TextureSampleType::Depth
                                } else {
                                    wgpu::TextureSampleType::Float { filterable: true }
                                },
                                view_dimension: match slot.dimension {
                                    ViewDimension::D2 => wgpu::TextureViewDimension::D2,
                                    ViewDimension::Cube => wgpu::TextureViewDimension::Cube,
                                },
                                multisampled: false,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: slot.binding + 1,
                            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                            ty: wgpu::BindingType::Sampler(if slot.comparison {
                                wgpu::SamplerBindingType::Comparison
                            } else {
                                wgpu::SamplerBindingType::Filtering
                            }),
                            count: None,
                        },
                    ]
                })
                .collect();
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&desc.label),
                    entries: &entries,
                })
        });

        let layouts: Vec<&wgpu::BindGroupLayout> =
            uniform_layout.iter().chain(texture_layout.iter()).collect();
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&desc.label),
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });

        let uniform_bind_group = uniform_layout.as_ref().map(|layout| {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&desc.label),
                layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.uniform_ring,
                        offset: 0,
                        size: NonZeroU64::new(reflection.uniform_size as u64),
                    }),
                }],
            })
        });

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::ShaderCreationFailed(format!(
                "{}: {}",
                desc.label, err
            )));
        }

        let id = self.next_handle();
        self.programs.insert(
            id,
            ProgramEntry {
                label: desc.label.clone(),
                module,
                uniform_data: vec![0; reflection.uniform_size as usize],
                reflection,
                pipeline_layout,
                uniform_bind_group,
                texture_layout,
                textures: HashMap::new(),
            },
        );
        Ok(ProgramHandle(id))
    }

    fn parameter_location(&mut self, program: ProgramHandle, name: &str) -> Option<ParameterLocation> {
        self.programs.get(&program.0)?.reflection.location(name)
    }

    fn bind_program(&mut self, program: ProgramHandle) {
        if self.programs.contains_key(&program.0) {
            self.bound_program = Some(program.0);
        }
    }

    fn set_parameter(
        &mut self,
        program: ProgramHandle,
        location: &ParameterLocation,
        value: &ParameterValue,
    ) {
        let Some(entry) = self.programs.get_mut(&program.0) else {
            return;
        };
        match (location, value) {
            (ParameterLocation::Uniform { offset, kind }, _) => {
                if !value.write_uniform(&mut entry.uniform_data, *offset, *kind) {
                    log::warn!(
                        "'{}': cannot store {:?} in a {:?} parameter",
                        entry.label,
                        value,
                        kind
                    );
                }
            }
            (ParameterLocation::Texture { binding }, ParameterValue::Texture { view, sampler }) => {
                entry.textures.insert(*binding, (*view, *sampler));
            }
            (ParameterLocation::Texture { .. }, _) => {
                log::warn!("'{}': texture parameter set with {:?}", entry.label, value);
            }
        }
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        let color_formats = desc
            .color_attachments
            .iter()
            .filter_map(|att| self.view_format(att.view))
            .collect();
        let depth_format = desc
            .depth_stencil_attachment
            .as_ref()
            .and_then(|att| self.view_format(att.view));

        self.pending_render_pass = Some(PendingRenderPass {
            descriptor: desc.clone(),
            color_formats,
            depth_format,
            commands: Vec::new(),
        });
    }

    fn end_render_pass(&mut self) {
        let Some(pending) = self.pending_render_pass.take() else {
            return;
        };
        let Some(mut encoder) = self.encoder.take() else {
            return;
        };

        let current_view_id = self.current_view_id;
        let resolve_view = |id: u64| -> Option<&wgpu::TextureView> {
            if id == current_view_id {
                self.swapchain_view.as_ref()
            } else {
                self.texture_views.get(&id).map(|(view, _)| view)
            }
        };

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = pending
            .descriptor
            .color_attachments
            .iter()
            .map(|att| {
                resolve_view(att.view.0).map(|view| wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: Self::convert_load_op(&att.load_op, |c| wgpu::Color {
                            r: c[0] as f64,
                            g: c[1] as f64,
                            b: c[2] as f64,
                            a: c[3] as f64,
                        }),
                        store: Self::convert_store_op(att.store_op),
                    },
                })
            })
            .collect();

        let depth_attachment = pending
            .descriptor
            .depth_stencil_attachment
            .as_ref()
            .and_then(|att| {
                resolve_view(att.view.0).map(|view| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: Self::convert_load_op(&att.depth_load_op, |_| att.depth_clear_value),
                        store: Self::convert_store_op(att.depth_store_op),
                    }),
                    stencil_ops: None,
                })
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: pending.descriptor.label.as_deref(),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for cmd in &pending.commands {
                match cmd {
                    RenderCommand::SetPipeline(id) => {
                        if let Some(pipeline) = self.pipeline_store.get(id) {
                            render_pass.set_pipeline(pipeline);
                        }
                    }
                    RenderCommand::SetUniforms { program, offset } => {
                        if let Some(bg) = self
                            .programs
                            .get(program)
                            .and_then(|p| p.uniform_bind_group.as_ref())
                        {
                            render_pass.set_bind_group(0, bg, &[*offset]);
                        }
                    }
                    RenderCommand::SetTextures(id) => {
                        if let Some(bg) = self.bind_group_store.get(id) {
                            render_pass.set_bind_group(1, bg, &[]);
                        }
                    }
                    RenderCommand::SetVertexBuffer { slot, buffer, offset } => {
                        if let Some(buf) = self.buffers.get(&buffer.0) {
                            render_pass.set_vertex_buffer(*slot, buf.slice(*offset..));
                        }
                    }
                    RenderCommand::SetIndexBuffer { buffer, offset, format } => {
                        if let Some(buf) = self.buffers.get(&buffer.0) {
                            let wgpu_format = match format {
                                IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
                                IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
                            };
                            render_pass.set_index_buffer(buf.slice(*offset..), wgpu_format);
                        }
                    }
                    RenderCommand::SetViewport { x, y, width, height } => {
                        render_pass.set_viewport(*x, *y, *width, *height, 0.0, 1.0);
                    }
                    RenderCommand::Draw { vertices, instances } => {
                        render_pass.draw(vertices.clone(), instances.clone());
                    }
                    RenderCommand::DrawIndexed { indices, base_vertex, instances } => {
                        render_pass.draw_indexed(indices.clone(), *base_vertex, instances.clone());
                    }
                }
            }
        }

        self.encoder = Some(encoder);
    }

    fn set_render_state(&mut self, state: RenderState) {
        self.state = state;
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetVertexBuffer { slot, buffer, offset });
        }
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetIndexBuffer { buffer, offset, format });
        }
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetViewport { x, y, width, height });
        }
    }

    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        if self.prepare_draw() {
            if let Some(ref mut pending) = self.pending_render_pass {
                pending.commands.push(RenderCommand::Draw { vertices, instances });
            }
        }
    }

    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        base_vertex: i32,
        instances: std::ops::Range<u32>,
    ) {
        if self.prepare_draw() {
            if let Some(ref mut pending) = self.pending_render_pass {
                pending.commands.push(RenderCommand::DrawIndexed { indices, base_vertex, instances });
            }
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.texture_views.remove(&view.0);
        self.forget_bind_groups(|(_, bound)| bound.iter().any(|(_, v, _)| *v == view.0));
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program.0);
        if self.bound_program == Some(program.0) {
            self.bound_program = None;
        }
        let store = &mut self.pipeline_store;
        self.pipelines.retain(|key, id| {
            if key.program != program.0 {
                return true;
            }
            if let Some(id) = id {
                store.remove(id);
            }
            false
        });
        self.forget_bind_groups(|(owner, _)| *owner == program.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_surface_size_keeps_aspect() {
        assert_eq!(clamp_surface_size(1280, 720, 8192), (1280, 720));
        assert_eq!(clamp_surface_size(16384, 8192, 8192), (8192, 4096));
        assert_eq!(clamp_surface_size(0, 0, 8192), (1, 1));
    }

    #[test]
    fn test_blend_modes() {
        assert!(WgpuBackend::convert_blend_mode(BlendMode::Opaque).is_none());
        let additive = WgpuBackend::convert_blend_mode(BlendMode::Additive).unwrap();
        assert_eq!(additive.color.dst_factor, wgpu::BlendFactor::One);
        assert_eq!(
            WgpuBackend::convert_blend_mode(BlendMode::Alpha),
            Some(wgpu::BlendState::ALPHA_BLENDING)
        );
    }
}
