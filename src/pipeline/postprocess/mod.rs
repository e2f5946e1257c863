//! Post-processing effects
//!
//! Passes run in insertion order. The first reads the HDR target, the last
//! writes the swapchain, and intermediate results ping-pong between two
//! scratch targets.

mod tonemapping;

pub use tonemapping::{TonemapOperator, TonemapSettings, TonemappingPass};

use std::any::Any;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_target::{RenderTarget, RenderTargetDescriptor};

/// Where a post-process pass writes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostProcessOutput {
    pub view: TextureViewHandle,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
}

/// Per-pass inputs
pub struct PostProcessContext<'a> {
    pub backend: &'a mut dyn GraphicsBackend,
    pub input: TextureViewHandle,
    pub output: PostProcessOutput,
}

/// A full-screen effect reading one texture and writing one color target
pub trait PostProcessPass: Any {
    fn name(&self) -> &str;

    /// Record the pass. Returns the number of draws issued.
    fn execute(&mut self, ctx: &mut PostProcessContext<'_>) -> BackendResult<u32>;

    fn destroy(&mut self, backend: &mut dyn GraphicsBackend);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

const SCRATCH_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

#[derive(Default)]
pub struct PostProcessPipeline {
    passes: Vec<Box<dyn PostProcessPass>>,
    scratch: Vec<RenderTarget>,
}

impl PostProcessPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<P: PostProcessPass>(&mut self, pass: P) {
        log::debug!("Post-process pass '{}' added", pass.name());
        self.passes.push(Box::new(pass));
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// First pass of type `P`
    pub fn get_mut<P: PostProcessPass>(&mut self) -> Option<&mut P> {
        self.passes
            .iter_mut()
            .find_map(|p| p.as_any_mut().downcast_mut::<P>())
    }

    pub fn get<P: PostProcessPass>(&self) -> Option<&P> {
        self.passes.iter().find_map(|p| p.as_any().downcast_ref::<P>())
    }

    fn ensure_scratch(&mut self, backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> BackendResult<()> {
        let needed = self.passes.len().saturating_sub(1).min(2);
        while self.scratch.len() < needed {
            let label = format!("PostProcess Scratch {}", self.scratch.len());
            self.scratch.push(RenderTarget::new(
                backend,
                RenderTargetDescriptor::color(&label, width, height, SCRATCH_FORMAT),
            )?);
        }
        for target in &mut self.scratch {
            if (target.width(), target.height()) != (width, height) {
                target.recreate(backend, width, height)?;
            }
        }
        Ok(())
    }

    /// Run every pass from `input` to `output`. Returns the number of draws issued.
    pub fn execute(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        input: TextureViewHandle,
        output: PostProcessOutput,
    ) -> BackendResult<u32> {
        if self.passes.is_empty() {
            log::debug!("No post-process passes, output left untouched");
            return Ok(0);
        }
        self.ensure_scratch(backend, output.width, output.height)?;

        let last = self.passes.len() - 1;
        let mut input = input;
        let mut draws = 0;
        for (index, pass) in self.passes.iter_mut().enumerate() {
            let target = if index == last {
                output
            } else {
                let scratch = &self.scratch[index % 2];
                PostProcessOutput {
                    view: scratch
                        .color_view(0)
                        .ok_or(BackendError::InvalidHandle("post-process target"))?,
                    format: SCRATCH_FORMAT,
                    width: scratch.width(),
                    height: scratch.height(),
                }
            };
            let mut ctx = PostProcessContext {
                backend: &mut *backend,
                input,
                output: target,
            };
            draws += pass.execute(&mut ctx)?;
            input = target.view;
        }
        Ok(draws)
    }

    /// Recreate the scratch targets at the new window size
    pub fn resize(&mut self, backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> BackendResult<()> {
        for target in &mut self.scratch {
            target.recreate(backend, width, height)?;
        }
        Ok(())
    }

    pub fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        for pass in &mut self.passes {
            pass.destroy(backend);
        }
        for mut target in self.scratch.drain(..) {
            target.destroy(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{RecordedCommand, RecordingBackend};

    fn output(backend: &mut RecordingBackend) -> PostProcessOutput {
        let frame = backend.begin_frame().unwrap();
        PostProcessOutput {
            view: frame.swapchain_view,
            format: backend.swapchain_format(),
            width: frame.width,
            height: frame.height,
        }
    }

    fn targets(backend: &RecordingBackend) -> Vec<TextureViewHandle> {
        backend
            .commands()
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BeginRenderPass(desc) => Some(desc.color_attachments[0].view),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_single_pass_writes_output() {
        let mut backend = RecordingBackend::new(64, 32);
        let mut pipeline = PostProcessPipeline::new();
        pipeline.add(TonemappingPass::new(&mut backend, TonemapSettings::default(), false));
        let out = output(&mut backend);
        let input = TextureViewHandle(9999);

        assert_eq!(pipeline.execute(&mut backend, input, out).unwrap(), 1);
        assert_eq!(targets(&backend), vec![out.view]);
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn test_chained_passes_ping_pong() {
        let mut backend = RecordingBackend::new(64, 32);
        let mut pipeline = PostProcessPipeline::new();
        for _ in 0..3 {
            pipeline.add(TonemappingPass::new(&mut backend, TonemapSettings::default(), false));
        }
        let out = output(&mut backend);

        assert_eq!(pipeline.execute(&mut backend, TextureViewHandle(9999), out).unwrap(), 3);
        let written = targets(&backend);
        assert_eq!(written.len(), 3);
        assert_ne!(written[0], written[1]);
        assert_eq!(written[2], out.view);
        assert_eq!(backend.live_textures(), 2);

        pipeline.destroy(&mut backend);
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn test_get_mut_finds_pass_by_type() {
        let mut backend = RecordingBackend::new(8, 8);
        let mut pipeline = PostProcessPipeline::new();
        pipeline.add(TonemappingPass::new(&mut backend, TonemapSettings::default(), false));
        pipeline.get_mut::<TonemappingPass>().unwrap().debug_split = true;
        assert!(pipeline.get::<TonemappingPass>().unwrap().debug_split);
        assert_eq!(pipeline.names(), vec!["Tonemapping"]);
    }
}
