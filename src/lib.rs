//! Forward Engine - a forward-lit rendering core built around a transform graph
//!
//! The crate is split in two halves that meet in [`Engine`]:
//! - **Scene**: an arena-backed [`TransformGraph`] with dirty-flag propagation,
//!   lights, cameras and render queues kept in sync through [`SceneEvent`]s
//! - **Renderer**: ambient pass, per-light additive passes fed by shadow maps,
//!   skybox, back-to-front alpha pass and a tone-mapping post-process
//!
//! Rendering goes through the [`GraphicsBackend`] trait. [`WgpuBackend`] draws to
//! a window; [`RecordingBackend`] records every command and is used by the tests.

pub mod backend;
pub mod engine;
pub mod pipeline;
pub mod render_target;
pub mod resources;
pub mod scene;
pub mod shader;
pub mod time;
pub mod window;

use std::sync::Once;
use std::time::Duration;

pub use backend::recording::RecordingBackend;
pub use backend::wgpu_backend::WgpuBackend;
pub use backend::{BackendError, BackendResult, GraphicsBackend};
pub use engine::{Engine, FrameReport};
pub use pipeline::{FrameStats, Renderer, RendererConfig};
pub use render_target::{RenderTarget, RenderTargetDescriptor, SurfaceKind};
pub use resources::Assets;
pub use scene::{
    Attenuation, Camera, DestroyPolicy, Light, LightKind, NodeId, QueueKind, RenderQueueManager,
    Renderable, Scene, SceneError, SceneEvent, Transform, TransformGraph,
};
pub use shader::{GpuProgram, ParameterValue};
pub use time::{FixedTimestep, FrameClock};
pub use window::Window;

/// Configuration for initializing the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Enable vsync
    pub vsync: bool,
    /// Length of one simulation quantum
    pub fixed_timestep: Duration,
    /// Upper bound on simulation quanta run before a frame is rendered
    pub max_steps_per_frame: u32,
    /// Renderer settings
    pub renderer: RendererConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Forward Engine".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            fixed_timestep: Duration::from_secs_f64(1.0 / 60.0),
            max_steps_per_frame: 5,
            renderer: RendererConfig::default(),
        }
    }
}

static LOGGING: Once = Once::new();

/// Installs `env_logger` once. `RUST_LOG` overrides the default `info` filter.
///
/// Subsequent calls are ignored, so tests and binaries can both call it.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .try_init();
        log::debug!("logging initialized");
    });
}
