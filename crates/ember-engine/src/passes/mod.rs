//! Render passes and their Setup/Execute contract.
//!
//! Setup builds the pass's pipeline state once and fails on any malformed
//! shader or layout mismatch. Execute only records into the command stream.

mod blit;
mod opaque;
mod ray_trace;
mod shaders;
mod skybox;

use std::sync::Arc;

use anyhow::Result;

use crate::buffers::{BufferPool, GpuResource};
use crate::command::CommandStream;
use crate::device::Device;
use crate::gpu::descriptor::DescriptorHandle;
use crate::pipeline::PipelineLayout;
use crate::scene::{Camera, GpuScene};
use crate::targets::FrameTargets;
use crate::views::ViewTableManager;

pub use blit::BlitPass;
pub use opaque::OpaquePass;
pub use ray_trace::RayTracePass;
pub use shaders::ShaderSet;
pub use skybox::SkyboxPass;

/// Inputs available while a pass builds its pipeline state.
pub struct SetupContext<'a> {
    pub device: &'a Device,
    /// Binding layout shared by the rasterization passes.
    pub layout: &'a Arc<PipelineLayout>,
    pub views: &'a ViewTableManager,
    pub shaders: &'a ShaderSet,
    pub scene: &'a GpuScene,
}

/// Everything a pass may read while recording one frame.
pub struct FrameContext<'a> {
    pub frame_index: u64,
    pub back_buffer: &'a GpuResource,
    pub back_buffer_rtv: DescriptorHandle,
    pub pool: &'a BufferPool,
    pub views: &'a ViewTableManager,
    pub scene: &'a GpuScene,
    pub targets: &'a FrameTargets,
    pub camera: &'a dyn Camera,
}

pub trait RenderPass {
    fn name(&self) -> &'static str;

    fn setup(&mut self, ctx: &SetupContext<'_>) -> Result<()>;

    fn execute(&self, stream: &mut CommandStream, frame: &FrameContext<'_>) -> Result<()>;
}

/// Message for a pass executed before its setup succeeded.
fn not_set_up(name: &str) -> anyhow::Error {
    anyhow::anyhow!("{name} pass executed before setup")
}
