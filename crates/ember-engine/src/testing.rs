//! Fixtures shared by tests that drive the ray-tracing path end to end.

use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};

use crate::buffers::BufferPool;
use crate::command::{CommandAllocator, CommandStream};
use crate::config::{PoolCapacities, ViewCapacities};
use crate::device::{Device, DeviceInit};
use crate::logging::init_test_logging;
use crate::passes::{FrameContext, RayTracePass, RenderPass, SetupContext, ShaderSet};
use crate::pipeline::PipelineLayout;
use crate::scene::{cube, Camera, GpuScene, Material, SceneData, SceneObject, SceneSession, TextureImage};
use crate::sync::FrameSynchronizer;
use crate::targets::FrameTargets;
use crate::views::ViewTableManager;

pub(crate) const RED: Vec4 = Vec4::new(1.0, 0.0, 0.0, 1.0);
pub(crate) const BLUE: Vec4 = Vec4::new(0.0, 0.0, 1.0, 1.0);

/// A red cube left and a blue cube right of the home camera's view axis.
pub(crate) fn two_cube_scene(session: &mut SceneSession) -> SceneData {
    let sky = TextureImage {
        id: session.next_texture_id(),
        name: "sky".into(),
        width: 1,
        height: 1,
        mips: vec![vec![128, 160, 255, 255]],
    };

    let mut objects = Vec::new();
    for (name, x, albedo) in [("red cube", -2.0, RED), ("blue cube", 2.0, BLUE)] {
        objects.push(SceneObject {
            id: session.next_object_id(),
            name: name.into(),
            mesh: cube(albedo),
            material: Material::Lit {
                albedo,
                texture: None,
            },
            transform: Mat4::from_translation(Vec3::new(x, 0.8, 0.0)) * Mat4::from_scale(Vec3::splat(2.0)),
        });
    }

    let skybox = SceneObject {
        id: session.next_object_id(),
        name: "skybox".into(),
        mesh: cube(Vec4::ONE),
        material: Material::Skybox { texture: sky.id },
        transform: Mat4::IDENTITY,
    };

    SceneData {
        objects,
        skybox,
        textures: vec![sky],
    }
}

/// Device, uploaded scene and a set-up ray-tracing pass, without a swap chain.
pub(crate) struct RayTraceRig {
    pub device: Device,
    pub views: ViewTableManager,
    pub pool: BufferPool,
    allocator: CommandAllocator,
    stream: CommandStream,
    sync: FrameSynchronizer,
    pub targets: FrameTargets,
    pub scene: GpuScene,
    pub pass: RayTracePass,
}

impl RayTraceRig {
    pub fn new(width: u32, height: u32, load: impl FnOnce(&mut SceneSession) -> SceneData) -> Self {
        init_test_logging();
        let device = Device::create(DeviceInit {
            validation: true,
            ..DeviceInit::default()
        })
        .unwrap();
        let mut views = device.create_view_table_manager(ViewCapacities::DEFAULT);
        let mut pool = device.create_buffer_pool(PoolCapacities::DEFAULT);
        let allocator = device.create_command_allocator("test");
        let mut stream = device.create_command_stream();
        let mut sync = device.create_frame_synchronizer();
        let targets = FrameTargets::new(&mut pool, &mut views, width, height).unwrap();

        let mut session = SceneSession::new();
        let data = load(&mut session);
        stream.reset(&allocator);
        let scene = GpuScene::upload(&data, &mut session, &mut pool, &mut views, &mut stream).unwrap();
        stream.execute_command_list().unwrap();
        sync.wait_for_gpu().unwrap();
        pool.release_scratch_upload();

        let mut pass = RayTracePass::new();
        pass.setup(&SetupContext {
            device: &device,
            layout: &Arc::new(PipelineLayout::raster()),
            views: &views,
            shaders: &ShaderSet::builtin(),
            scene: &scene,
        })
        .unwrap();

        Self {
            device,
            views,
            pool,
            allocator,
            stream,
            sync,
            targets,
            scene,
            pass,
        }
    }

    /// Dispatches the pass once and returns the output image, tightly packed RGBA8.
    pub fn trace(&mut self, camera: &dyn Camera) -> Vec<u8> {
        self.scene.update_constants(&self.pool, camera).unwrap();
        self.stream.reset(&self.allocator);

        let target = self.targets.intermediate(&self.pool).unwrap();
        let frame = FrameContext {
            frame_index: 0,
            back_buffer: target,
            back_buffer_rtv: self.targets.intermediate_rtv(&self.views),
            pool: &self.pool,
            views: &self.views,
            scene: &self.scene,
            targets: &self.targets,
            camera,
        };
        self.pass.execute(&mut self.stream, &frame).unwrap();
        self.stream.execute_command_list().unwrap();
        self.sync.wait_for_gpu().unwrap();
        self.device.check_status().unwrap();

        let output = self.targets.ray_tracing_output(&self.pool).unwrap();
        let len = (self.targets.width() * self.targets.height() * 4) as usize;
        output.cell().data()[..len].to_vec()
    }
}

/// RGBA8 texel at `(x, y)` of a tightly packed image `width` texels wide.
pub(crate) fn texel(pixels: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let at = ((y * width + x) * 4) as usize;
    [pixels[at], pixels[at + 1], pixels[at + 2], pixels[at + 3]]
}
