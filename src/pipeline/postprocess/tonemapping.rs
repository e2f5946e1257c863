//! Tonemapping post-processing

use std::any::Any;

use super::{PostProcessContext, PostProcessPass};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::shader::{sources, GpuProgram, ParameterValue};

/// Tonemapping operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TonemapOperator {
    Reinhard,
    #[default]
    Aces,
    Uncharted2,
    None,
}

impl TonemapOperator {
    /// Value of the program's `tonemap_operator` switch
    fn index(self) -> u32 {
        match self {
            TonemapOperator::Reinhard => 0,
            TonemapOperator::Aces => 1,
            TonemapOperator::Uncharted2 => 2,
            TonemapOperator::None => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TonemapSettings {
    pub operator: TonemapOperator,
    pub exposure: f32,
    /// Ignored when the output format already encodes sRGB
    pub gamma: f32,
}

impl Default for TonemapSettings {
    fn default() -> Self {
        Self {
            operator: TonemapOperator::Aces,
            exposure: 1.0,
            gamma: 2.2,
        }
    }
}

/// Tonemapping post-processing pass.
///
/// With `debug_split` the left half of the output is tone mapped and the right
/// half shows the HDR values clamped, through the `passthrough` variant.
pub struct TonemappingPass {
    pub settings: TonemapSettings,
    pub debug_split: bool,
    program: GpuProgram,
    sampler: Option<SamplerHandle>,
}

impl TonemappingPass {
    pub fn new(backend: &mut dyn GraphicsBackend, settings: TonemapSettings, debug_split: bool) -> Self {
        let program = GpuProgram::new(backend, &ProgramDescriptor::new("tonemap", sources::TONEMAP))
            .with_variants(ShaderStage::Fragment, "fs_variant", &["tonemap", "passthrough"]);
        Self {
            settings,
            debug_split,
            program,
            sampler: None,
        }
    }

    fn draw_region(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        variant: &str,
        x: u32,
        width: u32,
        height: u32,
    ) -> u32 {
        if width == 0 {
            return 0;
        }
        backend.set_viewport(x as f32, 0.0, width as f32, height as f32);
        self.program.select_variant(backend, ShaderStage::Fragment, variant);
        backend.draw(0..3, 0..1);
        1
    }
}

impl PostProcessPass for TonemappingPass {
    fn name(&self) -> &str {
        "Tonemapping"
    }

    fn execute(&mut self, ctx: &mut PostProcessContext<'_>) -> BackendResult<u32> {
        let backend = &mut *ctx.backend;
        let output = ctx.output;
        let sampler = match self.sampler {
            Some(sampler) => sampler,
            None => *self.sampler.insert(backend.create_sampler(&SamplerDescriptor {
                label: Some("hdr sampler".into()),
                ..Default::default()
            })?),
        };

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Tonemapping".into()),
            color_attachments: vec![ColorAttachment {
                view: output.view,
                load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
        });
        backend.set_render_state(RenderState::FULLSCREEN);

        let mut draws = 0;
        if self.program.bind(backend) {
            let gamma = if output.format.is_srgb() { 1.0 } else { self.settings.gamma };
            self.program.set_parameter(backend, "exposure", self.settings.exposure);
            self.program.set_parameter(backend, "gamma", gamma);
            self.program.set_parameter(backend, "tonemap_operator", self.settings.operator.index());
            self.program.set_parameter(
                backend,
                "hdr_texture",
                ParameterValue::Texture {
                    view: ctx.input,
                    sampler,
                },
            );

            if self.debug_split {
                let left = output.width / 2;
                draws += self.draw_region(backend, "tonemap", 0, left, output.height);
                draws += self.draw_region(backend, "passthrough", left, output.width - left, output.height);
            } else {
                draws += self.draw_region(backend, "tonemap", 0, output.width, output.height);
            }
        }

        backend.set_render_state(RenderState::STANDARD);
        backend.end_render_pass();
        Ok(draws)
    }

    fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        self.program.destroy(backend);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
