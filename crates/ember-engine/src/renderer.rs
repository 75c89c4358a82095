//! Frame composition and the per-frame synchronization protocol.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::buffers::BufferPool;
use crate::command::{CommandAllocator, CommandStream};
use crate::config::{PoolCapacities, ViewCapacities};
use crate::device::{Device, DeviceInit};
use crate::gpu::queue::PresentSink;
use crate::gpu::state::ResourceState;
use crate::passes::{
    BlitPass, FrameContext, OpaquePass, RayTracePass, RenderPass, SetupContext, ShaderSet,
    SkyboxPass,
};
use crate::pipeline::PipelineLayout;
use crate::scene::{Camera, GpuScene, SceneData, SceneSession};
use crate::swapchain::SwapChain;
use crate::sync::FrameSynchronizer;
use crate::targets::FrameTargets;
use crate::views::ViewTableManager;

/// Which passes run each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassToggles {
    pub opaque: bool,
    pub skybox: bool,
    pub blit: bool,
    pub ray_trace: bool,
}

impl Default for PassToggles {
    fn default() -> Self {
        Self {
            opaque: true,
            skybox: true,
            blit: true,
            ray_trace: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub width: u32,
    pub height: u32,
    pub device: DeviceInit,
    pub pools: PoolCapacities,
    pub views: ViewCapacities,
    pub toggles: PassToggles,
    pub shaders: ShaderSet,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            device: DeviceInit::default(),
            pools: PoolCapacities::DEFAULT,
            views: ViewCapacities::DEFAULT,
            toggles: PassToggles::default(),
            shaders: ShaderSet::builtin(),
        }
    }
}

/// What one call to [`Renderer::render_frame`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub frame_index: u64,
    pub back_buffer_index: usize,
    pub fence_value: u64,
    pub draws: usize,
    pub dispatches: usize,
    pub transitions: usize,
    pub barrier_batches: usize,
    pub scratch_released: usize,
}

/// Owns the device-side state of one window and renders frames into it.
///
/// At most one frame is in flight: every frame waits for its own fence value
/// before scratch memory is released or the back buffer index advances.
pub struct Renderer {
    device: Device,
    views: ViewTableManager,
    pool: BufferPool,
    allocator: CommandAllocator,
    stream: CommandStream,
    sync: FrameSynchronizer,
    swap_chain: SwapChain,
    targets: FrameTargets,
    session: SceneSession,
    scene: Option<GpuScene>,
    opaque: OpaquePass,
    skybox: SkyboxPass,
    blit: BlitPass,
    ray_trace: RayTracePass,
    toggles: PassToggles,
    frame_index: u64,
}

impl Renderer {
    /// Creates the device, uploads the scene produced by `load` and sets up every pass.
    pub fn new(
        config: RendererConfig,
        sink: Arc<dyn PresentSink>,
        load: impl FnOnce(&mut SceneSession) -> SceneData,
    ) -> Result<Self> {
        let device = Device::create(config.device).context("failed to create device")?;
        let mut views = device.create_view_table_manager(config.views);
        let mut pool = device.create_buffer_pool(config.pools);
        let allocator = device.create_command_allocator("frame");
        let mut stream = device.create_command_stream();
        let mut sync = device.create_frame_synchronizer();

        // View slots: back buffers take the first render-target slots and the
        // intermediate target the first global shader-resource slot.
        let swap_chain = SwapChain::new(&device, &mut views, sink, config.width, config.height)?;
        let targets = FrameTargets::new(&mut pool, &mut views, config.width, config.height)?;

        let mut session = SceneSession::new();
        let data = load(&mut session);
        stream.reset(&allocator);
        let scene = GpuScene::upload(&data, &mut session, &mut pool, &mut views, &mut stream)
            .context("failed to record scene upload")?;
        stream.execute_command_list()?;
        sync.wait_for_gpu()?;
        let released = pool.release_scratch_upload();
        log::info!(
            "scene uploaded: {} objects, {released} staging buffers released",
            scene.object_count()
        );

        let layout = Arc::new(PipelineLayout::raster());
        let mut opaque = OpaquePass::new();
        let mut skybox = SkyboxPass::new();
        let mut blit = BlitPass::new();
        let mut ray_trace = RayTracePass::new();
        {
            let ctx = SetupContext {
                device: &device,
                layout: &layout,
                views: &views,
                shaders: &config.shaders,
                scene: &scene,
            };
            let passes: [&mut dyn RenderPass; 4] = [&mut opaque, &mut skybox, &mut blit, &mut ray_trace];
            for pass in passes {
                pass.setup(&ctx)
                    .with_context(|| format!("failed to set up the {} pass", pass.name()))?;
            }
        }
        sync.wait_for_gpu()?;

        Ok(Self {
            device,
            views,
            pool,
            allocator,
            stream,
            sync,
            swap_chain,
            targets,
            session,
            scene: Some(scene),
            opaque,
            skybox,
            blit,
            ray_trace,
            toggles: config.toggles,
            frame_index: 0,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn toggles(&self) -> PassToggles {
        self.toggles
    }

    pub fn set_toggles(&mut self, toggles: PassToggles) {
        self.toggles = toggles;
    }

    pub fn size(&self) -> (u32, u32) {
        (self.targets.width(), self.targets.height())
    }

    /// Records, submits, presents and waits for one frame.
    pub fn render_frame(&mut self, camera: &dyn Camera) -> Result<FrameStats> {
        let scene = self.scene.as_ref().context("no scene loaded")?;
        scene.update_constants(&self.pool, camera)?;

        let stream = &mut self.stream;
        stream.reset(&self.allocator);

        let back_buffer = self.swap_chain.back_buffer();
        stream.add_transition_barrier(back_buffer, ResourceState::Present, ResourceState::RenderTarget);
        stream.flush_barriers();

        let frame = FrameContext {
            frame_index: self.frame_index,
            back_buffer,
            back_buffer_rtv: self.swap_chain.back_buffer_rtv(&self.views),
            pool: &self.pool,
            views: &self.views,
            scene,
            targets: &self.targets,
            camera,
        };

        let toggles = self.toggles;
        let raster: [(bool, &dyn RenderPass); 3] = [
            (toggles.opaque, &self.opaque),
            (toggles.skybox, &self.skybox),
            (toggles.blit, &self.blit),
        ];
        for (enabled, pass) in raster {
            if enabled {
                pass.execute(stream, &frame)
                    .with_context(|| format!("{} pass failed", pass.name()))?;
            }
        }

        if toggles.ray_trace {
            self.ray_trace.execute(stream, &frame)?;

            let output = self.targets.ray_tracing_output(&self.pool)?;
            stream.add_transition_barrier(back_buffer, ResourceState::RenderTarget, ResourceState::CopyDest);
            stream.add_transition_barrier(output, ResourceState::UnorderedAccess, ResourceState::CopySource);
            stream.flush_barriers();
            stream.copy_resource(back_buffer, output);
            stream.add_transition_barrier(back_buffer, ResourceState::CopyDest, ResourceState::Present);
            stream.add_transition_barrier(output, ResourceState::CopySource, ResourceState::UnorderedAccess);
        } else {
            stream.add_transition_barrier(back_buffer, ResourceState::RenderTarget, ResourceState::Present);
        }
        stream.flush_barriers();

        let recorded = stream.stats();
        stream.execute_command_list()?;
        self.swap_chain.present()?;

        let fence_value = self.sync.update_fence()?;
        self.sync.wait_for_frame(fence_value)?;
        let scratch_released = self.pool.release_scratch_upload();
        log::trace!("frame {} retired, {scratch_released} scratch buffers released", self.frame_index);

        let stats = FrameStats {
            frame_index: self.frame_index,
            back_buffer_index: self.swap_chain.current_index(),
            fence_value,
            draws: recorded.draws,
            dispatches: recorded.dispatches,
            transitions: recorded.transitions,
            barrier_batches: recorded.barrier_batches,
            scratch_released,
        };
        self.swap_chain.advance();
        self.frame_index += 1;
        Ok(stats)
    }

    /// Recreates the back buffers and frame targets at a new size.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if (width, height) == self.size() || width == 0 || height == 0 {
            return Ok(());
        }
        self.sync.wait_for_gpu()?;
        self.swap_chain.resize(&self.views, width, height)?;
        self.targets.allocate(&mut self.pool, &self.views, width, height)?;
        Ok(())
    }

    /// Waits for the GPU and releases the scene. Called on drop as well.
    pub fn shutdown(&mut self) -> Result<()> {
        if let Some(scene) = self.scene.take() {
            self.sync.wait_for_gpu()?;
            scene.unload(&mut self.pool, &mut self.session);
            log::info!("renderer shut down after {} frames", self.frame_index);
        }
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::warn!("shutdown without a GPU drain: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::gpu::queue::PresentedFrame;
    use crate::gpu::resource::rgba8;
    use crate::logging::init_test_logging;
    use crate::scene::{demo_scene, FlyCamera};
    use crate::targets::CLEAR_COLOR;

    #[derive(Default)]
    struct Capture(Mutex<Vec<PresentedFrame>>);

    impl PresentSink for Capture {
        fn present(&self, frame: PresentedFrame) {
            self.0.lock().push(frame);
        }
    }

    fn renderer(toggles: PassToggles) -> (Renderer, Arc<Capture>, FlyCamera) {
        init_test_logging();
        let (width, height) = (32, 24);
        let sink = Arc::new(Capture::default());
        let config = RendererConfig {
            width,
            height,
            device: DeviceInit {
                validation: true,
                ..DeviceInit::default()
            },
            toggles,
            ..RendererConfig::default()
        };
        let renderer = Renderer::new(config, sink.clone(), demo_scene).unwrap();
        (renderer, sink, FlyCamera::new(width, height))
    }

    #[test]
    fn frames_present_in_order_with_increasing_fences() {
        let (mut renderer, sink, camera) = renderer(PassToggles::default());

        let stats: Vec<FrameStats> = (0..3).map(|_| renderer.render_frame(&camera).unwrap()).collect();

        assert!(stats.windows(2).all(|w| w[0].fence_value < w[1].fence_value));
        assert_eq!(stats.iter().map(|s| s.back_buffer_index).collect::<Vec<_>>(), vec![0, 1, 0]);
        assert!(stats.iter().all(|s| s.dispatches == 1 && s.draws > 0));
        assert!(stats.iter().all(|s| s.scratch_released == 0));
        renderer.device().check_status().unwrap();

        let frames = sink.0.lock();
        assert_eq!(frames.len(), 3);
        assert!(frames[0].pixels.chunks_exact(4).all(|p| p[3] == 255));
    }

    #[test]
    fn ray_traced_frame_presents_the_ray_tracing_output() {
        let (mut traced, traced_sink, camera) = renderer(PassToggles::default());
        let raster_only = PassToggles {
            ray_trace: false,
            ..PassToggles::default()
        };
        let (mut raster, raster_sink, _) = renderer(raster_only);
        traced.render_frame(&camera).unwrap();
        raster.render_frame(&camera).unwrap();
        traced.device().check_status().unwrap();

        let output = traced.targets.ray_tracing_output(&traced.pool).unwrap();
        assert_eq!(output.state(), ResourceState::UnorderedAccess);
        let traced_frames = traced_sink.0.lock();
        let presented = traced_frames[0].pixels.as_slice();
        assert_eq!(presented, &output.cell().data()[..presented.len()]);

        let raster_frames = raster_sink.0.lock();
        assert_ne!(presented, raster_frames[0].pixels.as_slice());
    }

    #[test]
    fn raster_only_frame_blits_the_intermediate_target() {
        let toggles = PassToggles {
            skybox: false,
            ray_trace: false,
            ..PassToggles::default()
        };
        let (mut renderer, sink, camera) = renderer(toggles);
        let stats = renderer.render_frame(&camera).unwrap();
        assert_eq!(stats.dispatches, 0);
        renderer.device().check_status().unwrap();

        let frames = sink.0.lock();
        let frame = &frames[0];
        let pixel = |x: u32, y: u32| {
            let at = ((y * frame.width + x) * 4) as usize;
            [frame.pixels[at], frame.pixels[at + 1], frame.pixels[at + 2], frame.pixels[at + 3]]
        };
        // Above the horizon only the clear colour remains; the ground fills the bottom.
        assert_eq!(pixel(0, 0), rgba8(CLEAR_COLOR));
        assert_ne!(pixel(frame.width / 2, frame.height - 1), rgba8(CLEAR_COLOR));
    }

    #[test]
    fn resize_recreates_targets() {
        let (mut renderer, sink, mut camera) = renderer(PassToggles::default());
        renderer.render_frame(&camera).unwrap();
        renderer.resize(16, 8).unwrap();
        camera.resize(16, 8);
        let stats = renderer.render_frame(&camera).unwrap();

        assert_eq!(stats.back_buffer_index, 0);
        assert_eq!(renderer.size(), (16, 8));
        let frames = sink.0.lock();
        assert_eq!((frames[1].width, frames[1].height), (16, 8));
    }

    #[test]
    fn shutdown_releases_scene_memory() {
        let (mut renderer, _sink, camera) = renderer(PassToggles::default());
        renderer.render_frame(&camera).unwrap();
        let live = renderer.device().resources_live();
        renderer.shutdown().unwrap();
        assert!(renderer.device().resources_live() < live);
        assert!(renderer.render_frame(&camera).is_err());
    }
}
