//! Main engine orchestrator
//!
//! [`Engine`] is the explicit context of a running application: it owns the
//! backend, renderer, scene and assets, and drives the fixed-step loop.

use std::sync::Arc;
use std::time::Duration;

use winit::window::Window as WinitWindow;

use crate::backend::traits::*;
use crate::backend::wgpu_backend::WgpuBackend;
use crate::pipeline::{FrameStats, Renderer};
use crate::resources::Assets;
use crate::scene::{Scene, SceneEvent};
use crate::time::{FixedTimestep, FrameClock};
use crate::EngineConfig;

/// What one call to [`Engine::frame`] did
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameReport {
    pub steps: u32,
    /// Simulation time dropped because catch-up hit the step limit
    pub dropped: Duration,
    pub events_applied: usize,
    pub nodes_updated: usize,
    /// `None` when no frame was rendered
    pub stats: Option<FrameStats>,
    pub close_requested: bool,
}

/// The main engine
pub struct Engine<B: GraphicsBackend> {
    backend: B,
    renderer: Renderer,
    scene: Scene,
    assets: Assets,
    clock: FrameClock,
    timestep: FixedTimestep,
    config: EngineConfig,
    width: u32,
    height: u32,
    close_requested: bool,
}

impl Engine<WgpuBackend> {
    /// Create a wgpu-backed engine drawing to `window`
    pub fn with_window(window: Arc<WinitWindow>, config: EngineConfig) -> BackendResult<Self> {
        let backend = WgpuBackend::new(window, config.vsync)?;
        Self::new(backend, config)
    }
}

impl<B: GraphicsBackend> Engine<B> {
    pub fn new(mut backend: B, config: EngineConfig) -> BackendResult<Self> {
        let renderer = Renderer::new(&mut backend, config.renderer.clone())?;
        let (width, height) = backend.surface_size();
        log::info!("Engine started at {}x{}", width, height);

        Ok(Self {
            backend,
            renderer,
            scene: Scene::new(),
            assets: Assets::new(),
            clock: FrameClock::new(),
            timestep: FixedTimestep::new(config.fixed_timestep, config.max_steps_per_frame),
            config,
            width,
            height,
            close_requested: false,
        })
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn assets(&self) -> &Assets {
        &self.assets
    }

    pub fn assets_mut(&mut self) -> &mut Assets {
        &mut self.assets
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Queue a scene event, applied during the next simulation step
    pub fn push_event(&mut self, event: SceneEvent) {
        self.scene.push_event(event);
    }

    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    /// Apply a new renderer configuration
    pub fn configure_renderer(&mut self, config: crate::RendererConfig) -> BackendResult<()> {
        self.renderer.configure(&mut self.backend, config.clone())?;
        self.config.renderer = config;
        Ok(())
    }

    /// Handle window resize
    pub fn resize(&mut self, width: u32, height: u32) -> BackendResult<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.backend.resize(width, height);

        // The surface may be clamped by device limits
        let (actual_width, actual_height) = self.backend.surface_size();
        if (actual_width, actual_height) == (self.width, self.height) {
            return Ok(());
        }
        self.width = actual_width;
        self.height = actual_height;
        self.renderer.resize(&mut self.backend, actual_width, actual_height)
    }

    /// Measure wall time since the last tick and run [`Engine::frame`] with it
    pub fn tick<C, U>(&mut self, should_close: C, update: U) -> BackendResult<FrameReport>
    where
        C: FnMut() -> bool,
        U: FnMut(&mut Scene, Duration),
    {
        let elapsed = self.clock.tick().dt;
        self.frame(elapsed, should_close, update)
    }

    /// Run the simulation quanta `elapsed` pays for, then render once.
    ///
    /// Each quantum checks `should_close`, runs `update`, applies pending scene
    /// events and updates the transform graph. Nothing is rendered once a close
    /// was requested.
    pub fn frame<C, U>(&mut self, elapsed: Duration, mut should_close: C, mut update: U) -> BackendResult<FrameReport>
    where
        C: FnMut() -> bool,
        U: FnMut(&mut Scene, Duration),
    {
        let plan = self.timestep.advance(elapsed);
        let step = self.timestep.step();
        let mut report = FrameReport {
            dropped: plan.dropped,
            ..Default::default()
        };

        for _ in 0..plan.steps {
            if self.close_requested || should_close() {
                self.close_requested = true;
                break;
            }
            update(&mut self.scene, step);
            report.events_applied += self.scene.dispatch_pending(&self.assets);
            report.nodes_updated += self.scene.update();
            report.steps += 1;
        }

        report.close_requested = self.close_requested;
        if !self.close_requested {
            report.stats = Some(self.render()?);
        }
        Ok(report)
    }

    /// Upload new assets and render one frame
    pub fn render(&mut self) -> BackendResult<FrameStats> {
        self.assets.upload(&mut self.backend)?;
        match self.renderer.render(&mut self.backend, &mut self.scene, &self.assets) {
            Err(BackendError::SurfaceLost) => {
                log::warn!("Surface lost, reconfiguring at {}x{}", self.width, self.height);
                self.backend.resize(self.width, self.height);
                Ok(FrameStats::default())
            }
            result => result,
        }
    }

    /// Release every GPU resource
    pub fn shutdown(mut self) {
        self.renderer.destroy(&mut self.backend);
        self.assets.release(&mut self.backend);
        log::info!("Engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{RecordedCommand, RecordingBackend};
    use crate::scene::Transform;
    use bevy_ecs::entity::Entity;

    fn engine() -> Engine<RecordingBackend> {
        Engine::new(RecordingBackend::new(64, 64), EngineConfig::default()).unwrap()
    }

    fn frames_begun(engine: &Engine<RecordingBackend>) -> usize {
        engine
            .backend()
            .commands()
            .iter()
            .filter(|c| matches!(c, RecordedCommand::BeginFrame { .. }))
            .count()
    }

    #[test]
    fn test_frame_runs_steps_then_renders_once() {
        let mut engine = engine();
        let step = engine.config().fixed_timestep;
        engine.push_event(SceneEvent::EntitySpawned {
            entity: Entity::from_raw(1),
            parent: None,
            transform: Transform::IDENTITY,
        });

        let mut updates = 0;
        let report = engine
            .frame(step * 3, || false, |_, dt| {
                assert_eq!(dt, step);
                updates += 1;
            })
            .unwrap();
        assert_eq!(report.steps, 3);
        assert_eq!(updates, 3);
        assert_eq!(report.events_applied, 1);
        assert_eq!(report.nodes_updated, 1);
        assert!(report.stats.is_some());
        assert_eq!(frames_begun(&engine), 1);
    }

    #[test]
    fn test_catch_up_is_capped() {
        let mut engine = engine();
        let report = engine.frame(Duration::from_secs(5), || false, |_, _| {}).unwrap();
        assert_eq!(report.steps, engine.config().max_steps_per_frame);
        assert!(report.dropped > Duration::ZERO);
    }

    #[test]
    fn test_close_stops_rendering() {
        let mut engine = engine();
        let step = engine.config().fixed_timestep;
        let report = engine.frame(step * 2, || true, |_, _| {}).unwrap();
        assert!(report.close_requested);
        assert_eq!(report.steps, 0);
        assert!(report.stats.is_none());
        assert_eq!(frames_begun(&engine), 0);
    }

    #[test]
    fn test_resize_recreates_hdr() {
        let mut engine = engine();
        engine.resize(300, 200).unwrap();
        assert_eq!(engine.dimensions(), (300, 200));
        assert_eq!(engine.renderer().hdr_target().width(), 300);
        engine.resize(0, 0).unwrap();
        assert_eq!(engine.dimensions(), (300, 200));
    }
}
