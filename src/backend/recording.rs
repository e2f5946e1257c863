//! Recording backend for tests and headless runs.
//!
//! Nothing touches a GPU. Programs are still parsed and validated with naga, so a
//! broken shader fails here exactly as it does on [`WgpuBackend`](super::wgpu_backend::WgpuBackend),
//! and every command the renderer issues is kept in order for inspection.

use std::collections::HashMap;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::shader::reflect::{reflect_wgsl, ParameterLocation, ProgramReflection};
use crate::shader::ParameterValue;

/// A command as the renderer issued it
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginFrame {
        swapchain_view: TextureViewHandle,
    },
    EndFrame,
    BeginRenderPass(RenderPassDescriptor),
    EndRenderPass,
    SetRenderState(RenderState),
    BindProgram(ProgramHandle),
    SetParameter {
        program: ProgramHandle,
        name: String,
        value: ParameterValue,
    },
    SetViewport {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    Draw {
        program: String,
        state: RenderState,
        count: u32,
        indexed: bool,
    },
}

#[derive(Debug)]
struct RecordedProgram {
    label: String,
    reflection: ProgramReflection,
    names: HashMap<ParameterLocation, String>,
    values: HashMap<String, ParameterValue>,
}

/// Headless backend recording every command
#[derive(Debug)]
pub struct RecordingBackend {
    width: u32,
    height: u32,
    commands: Vec<RecordedCommand>,
    buffers: HashMap<u64, u64>,
    textures: HashMap<u64, TextureDescriptor>,
    views: HashMap<u64, (TextureHandle, TextureViewDescriptor)>,
    samplers: HashMap<u64, SamplerDescriptor>,
    programs: HashMap<u64, RecordedProgram>,
    failing_programs: Vec<String>,
    parameter_queries: usize,
    next_id: u64,
    swapchain_view: Option<TextureViewHandle>,
    in_pass: bool,
    bound_program: Option<ProgramHandle>,
    state: RenderState,
}

impl RecordingBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            commands: Vec::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            views: HashMap::new(),
            samplers: HashMap::new(),
            programs: HashMap::new(),
            failing_programs: Vec::new(),
            parameter_queries: 0,
            next_id: 1,
            swapchain_view: None,
            in_pass: false,
            bound_program: None,
            state: RenderState::STANDARD,
        }
    }

    /// Make every later `create_program` with this label fail to link
    pub fn fail_program(&mut self, label: &str) {
        self.failing_programs.push(label.to_string());
    }

    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Number of times a parameter location was requested
    pub fn parameter_queries(&self) -> usize {
        self.parameter_queries
    }

    /// Last value stored for a parameter of a program
    pub fn parameter_value(&self, program: ProgramHandle, name: &str) -> Option<ParameterValue> {
        self.programs.get(&program.0)?.values.get(name).copied()
    }

    pub fn program_label(&self, program: ProgramHandle) -> Option<&str> {
        self.programs.get(&program.0).map(|p| p.label.as_str())
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0)
    }

    pub fn view_descriptor(&self, view: TextureViewHandle) -> Option<&TextureViewDescriptor> {
        self.views.get(&view.0).map(|(_, desc)| desc)
    }

    /// Texture a view was created from
    pub fn view_texture(&self, view: TextureViewHandle) -> Option<TextureHandle> {
        self.views.get(&view.0).map(|(texture, _)| *texture)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_views(&self) -> usize {
        self.views.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn sampler_descriptor(&self, sampler: SamplerHandle) -> Option<&SamplerDescriptor> {
        self.samplers.get(&sampler.0)
    }

    /// Labels of recorded render passes, in order
    pub fn pass_labels(&self) -> Vec<String> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BeginRenderPass(desc) => {
                    Some(desc.label.clone().unwrap_or_default())
                }
                _ => None,
            })
            .collect()
    }

    /// `(program label, state)` of every recorded draw, in order
    pub fn draws(&self) -> Vec<(String, RenderState)> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Draw { program, state, .. } => Some((program.clone(), *state)),
                _ => None,
            })
            .collect()
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record_draw(&mut self, count: u32, indexed: bool) {
        if !self.in_pass {
            log::warn!("RecordingBackend: draw outside of a render pass ignored");
            return;
        }
        let Some(program) = self.bound_program else {
            log::warn!("RecordingBackend: draw without a bound program ignored");
            return;
        };
        let label = self
            .programs
            .get(&program.0)
            .map(|p| p.label.clone())
            .unwrap_or_default();
        self.commands.push(RecordedCommand::Draw {
            program: label,
            state: self.state,
            count,
            indexed,
        });
    }
}

impl GraphicsBackend for RecordingBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.width = width;
            self.height = height;
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        let view = TextureViewHandle(self.next_handle());
        self.swapchain_view = Some(view);
        self.commands.push(RecordedCommand::BeginFrame { swapchain_view: view });
        Ok(FrameContext {
            swapchain_view: view,
            width: self.width,
            height: self.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.swapchain_view = None;
        self.commands.push(RecordedCommand::EndFrame);
        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        TextureFormat::Bgra8UnormSrgb
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        log::trace!(
            "RecordingBackend: creating buffer {:?} ({} bytes)",
            desc.label,
            data.len()
        );
        let id = self.next_handle();
        self.buffers.insert(id, data.len() as u64);
        Ok(BufferHandle(id))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 || desc.layers == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has an empty extent",
                desc.label
            )));
        }
        log::trace!(
            "RecordingBackend: creating texture {:?} ({}x{}x{})",
            desc.label,
            desc.width,
            desc.height,
            desc.layers
        );
        let id = self.next_handle();
        self.textures.insert(id, desc.clone());
        Ok(TextureHandle(id))
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        let layers = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::InvalidHandle("texture"))?
            .layers;
        if desc.base_layer + desc.layer_count > layers {
            return Err(BackendError::TextureCreationFailed(format!(
                "view of layers {}..{} exceeds {} layers",
                desc.base_layer,
                desc.base_layer + desc.layer_count,
                layers
            )));
        }
        let id = self.next_handle();
        self.views.insert(id, (texture, *desc));
        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, _texture: TextureHandle, _layer: u32, _data: &[u8], _width: u32, _height: u32) {}

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let id = self.next_handle();
        self.samplers.insert(id, desc.clone());
        Ok(SamplerHandle(id))
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        if self.failing_programs.iter().any(|label| *label == desc.label) {
            return Err(BackendError::ShaderCreationFailed(format!(
                "'{}' was configured to fail",
                desc.label
            )));
        }
        let reflection = reflect_wgsl(&desc.source)
            .map_err(|err| BackendError::ShaderCreationFailed(err.to_string()))?;

        let mut names = HashMap::new();
        for (name, &(offset, kind)) in &reflection.uniforms {
            names.insert(ParameterLocation::Uniform { offset, kind }, name.clone());
        }
        for slot in &reflection.textures {
            names.insert(
                ParameterLocation::Texture {
                    binding: slot.binding,
                },
                slot.name.clone(),
            );
        }

        let id = self.next_handle();
        self.programs.insert(
            id,
            RecordedProgram {
                label: desc.label.clone(),
                reflection,
                names,
                values: HashMap::new(),
            },
        );
        Ok(ProgramHandle(id))
    }

    fn parameter_location(&mut self, program: ProgramHandle, name: &str) -> Option<ParameterLocation> {
        self.parameter_queries += 1;
        self.programs.get(&program.0)?.reflection.location(name)
    }

    fn bind_program(&mut self, program: ProgramHandle) {
        self.bound_program = Some(program);
        self.commands.push(RecordedCommand::BindProgram(program));
    }

    fn set_parameter(
        &mut self,
        program: ProgramHandle,
        location: &ParameterLocation,
        value: &ParameterValue,
    ) {
        let Some(recorded) = self.programs.get_mut(&program.0) else {
            return;
        };
        let Some(name) = recorded.names.get(location).cloned() else {
            return;
        };
        recorded.values.insert(name.clone(), *value);
        self.commands.push(RecordedCommand::SetParameter {
            program,
            name,
            value: *value,
        });
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.in_pass = true;
        self.commands.push(RecordedCommand::BeginRenderPass(desc.clone()));
    }

    fn end_render_pass(&mut self) {
        if self.in_pass {
            self.in_pass = false;
            self.commands.push(RecordedCommand::EndRenderPass);
        }
    }

    fn set_render_state(&mut self, state: RenderState) {
        self.state = state;
        self.commands.push(RecordedCommand::SetRenderState(state));
    }

    fn set_vertex_buffer(&mut self, _slot: u32, _buffer: BufferHandle, _offset: u64) {}

    fn set_index_buffer(&mut self, _buffer: BufferHandle, _offset: u64, _format: IndexFormat) {}

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32) {
        self.commands.push(RecordedCommand::SetViewport {
            x,
            y,
            width,
            height,
        });
    }

    fn draw(&mut self, vertices: std::ops::Range<u32>, _instances: std::ops::Range<u32>) {
        self.record_draw(vertices.len() as u32, false);
    }

    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        _base_vertex: i32,
        _instances: std::ops::Range<u32>,
    ) {
        self.record_draw(indices.len() as u32, true);
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.views.remove(&view.0);
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program.0);
        if self.bound_program == Some(program) {
            self.bound_program = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_view_needs_six_layers() {
        let mut backend = RecordingBackend::new(8, 8);
        let texture = backend
            .create_texture(&TextureDescriptor {
                layers: 1,
                ..Default::default()
            })
            .unwrap();
        assert!(backend
            .create_texture_view(texture, &TextureViewDescriptor::cube())
            .is_err());
    }

    #[test]
    fn test_draw_outside_pass_is_dropped() {
        let mut backend = RecordingBackend::new(8, 8);
        backend.draw(0..3, 0..1);
        assert!(backend.draws().is_empty());
    }

    #[test]
    fn test_state_persists_across_passes() {
        let mut backend = RecordingBackend::new(8, 8);
        let program = backend
            .create_program(&ProgramDescriptor::new(
                "tri",
                "@vertex fn vs_main() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }",
            ))
            .unwrap();
        backend.set_render_state(RenderState::ALPHA_BLEND);
        let pass = RenderPassDescriptor {
            label: Some("a".into()),
            color_attachments: vec![],
            depth_stencil_attachment: None,
        };
        backend.begin_render_pass(&pass);
        backend.end_render_pass();
        backend.begin_render_pass(&pass);
        backend.bind_program(program);
        backend.draw(0..3, 0..1);
        backend.end_render_pass();
        assert_eq!(
            backend.draws(),
            vec![("tri".to_string(), RenderState::ALPHA_BLEND)]
        );
    }
}
