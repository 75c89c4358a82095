//! Frame-scoped render targets: the intermediate colour target, the depth
//! buffer and the ray-tracing output image.

use anyhow::{Context, Result};

use crate::buffers::{BufferPool, GpuResource, ResourceKey};
use crate::command::CommandStream;
use crate::gpu::descriptor::{DescriptorHandle, SrvDimension, ViewDesc};
use crate::gpu::resource::{ClearValue, Format, ResourceDesc};
use crate::gpu::state::ResourceState;
use crate::views::{ViewKind, ViewTableManager};

/// Clear colour of the intermediate target.
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.2, 0.4, 1.0];
pub const CLEAR_DEPTH: f32 = 1.0;

/// View-table slots and extent of the frame targets.
///
/// Slots are allocated once; [`Self::allocate`] may recreate the resources
/// behind them at a new size.
#[derive(Debug)]
pub struct FrameTargets {
    width: u32,
    height: u32,
    rtv: u32,
    srv: u32,
    dsv: u32,
    uav: u32,
}

impl FrameTargets {
    /// Reserves view slots and allocates the targets.
    pub fn new(pool: &mut BufferPool, views: &mut ViewTableManager, width: u32, height: u32) -> Result<Self> {
        let mut targets = Self {
            width,
            height,
            rtv: views.allocate(ViewKind::Rtv),
            srv: views.allocate(ViewKind::GlobalSrv),
            dsv: views.allocate(ViewKind::Dsv),
            uav: views.allocate(ViewKind::Uav),
        };
        targets.allocate(pool, views, width, height)?;
        Ok(targets)
    }

    /// Releases any existing targets and allocates new ones at `width` x `height`.
    ///
    /// The caller must have waited for the GPU.
    pub fn allocate(
        &mut self,
        pool: &mut BufferPool,
        views: &ViewTableManager,
        width: u32,
        height: u32,
    ) -> Result<()> {
        for key in [
            ResourceKey::IntermediateTarget,
            ResourceKey::DepthBuffer,
            ResourceKey::RayTracingOutput,
        ] {
            pool.release_default(key);
        }
        self.width = width;
        self.height = height;

        let color = ResourceDesc::texture_2d(width, height, 1, Format::Rgba8Unorm);
        let intermediate = pool.allocate_default(
            ResourceKey::IntermediateTarget,
            color.clone(),
            ResourceState::ShaderResource,
            "intermediate target",
            Some(ClearValue::Color(CLEAR_COLOR)),
        )?;
        views.create_view(ViewKind::Rtv, self.rtv, intermediate, ViewDesc::RenderTarget);
        views.create_view(
            ViewKind::GlobalSrv,
            self.srv,
            intermediate,
            ViewDesc::ShaderResource(SrvDimension::Texture2D),
        );

        let depth = pool.allocate_default(
            ResourceKey::DepthBuffer,
            ResourceDesc::texture_2d(width, height, 1, Format::D32Float),
            ResourceState::DepthWrite,
            "depth buffer",
            Some(ClearValue::Depth(CLEAR_DEPTH)),
        )?;
        views.create_view(ViewKind::Dsv, self.dsv, depth, ViewDesc::DepthStencil);

        let output = pool.allocate_default(
            ResourceKey::RayTracingOutput,
            color,
            ResourceState::UnorderedAccess,
            "ray tracing output",
            None,
        )?;
        views.create_view(ViewKind::Uav, self.uav, output, ViewDesc::UnorderedAccess);

        log::debug!("frame targets allocated at {width}x{height}");
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn intermediate<'p>(&self, pool: &'p BufferPool) -> Result<&'p GpuResource> {
        pool.default_resource(ResourceKey::IntermediateTarget)
            .context("intermediate target not allocated")
    }

    pub fn ray_tracing_output<'p>(&self, pool: &'p BufferPool) -> Result<&'p GpuResource> {
        pool.default_resource(ResourceKey::RayTracingOutput)
            .context("ray-tracing output not allocated")
    }

    pub fn intermediate_rtv(&self, views: &ViewTableManager) -> DescriptorHandle {
        views.handle(ViewKind::Rtv, self.rtv)
    }

    pub fn depth_dsv(&self, views: &ViewTableManager) -> DescriptorHandle {
        views.handle(ViewKind::Dsv, self.dsv)
    }

    /// Global shader-resource slot the blit samples the intermediate from.
    pub fn intermediate_srv_slot(&self) -> u32 {
        self.srv
    }

    pub fn output_uav_slot(&self) -> u32 {
        self.uav
    }

    /// Queues the intermediate target's move into `usage`, from whatever state
    /// the stream has it in. A no-op if it is already there.
    pub fn emplace(
        &self,
        stream: &mut CommandStream,
        pool: &BufferPool,
        usage: ResourceState,
    ) -> Result<()> {
        stream.transition_to(self.intermediate(pool)?, usage);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolCapacities, ViewCapacities};
    use crate::device::{Device, DeviceInit};

    #[test]
    fn emplace_follows_logical_state_in_any_pass_order() {
        let device = Device::create(DeviceInit::default()).unwrap();
        let mut pool = device.create_buffer_pool(PoolCapacities::DEFAULT);
        let mut views = device.create_view_table_manager(ViewCapacities::DEFAULT);
        let targets = FrameTargets::new(&mut pool, &mut views, 8, 8).unwrap();
        let allocator = device.create_command_allocator("targets");
        let mut stream = device.create_command_stream();
        stream.reset(&allocator);

        // Sampling first, then rendering, then sampling again.
        targets.emplace(&mut stream, &pool, ResourceState::ShaderResource).unwrap();
        targets.emplace(&mut stream, &pool, ResourceState::RenderTarget).unwrap();
        stream.flush_barriers();
        targets.emplace(&mut stream, &pool, ResourceState::ShaderResource).unwrap();
        targets.emplace(&mut stream, &pool, ResourceState::ShaderResource).unwrap();
        stream.flush_barriers();

        assert_eq!(stream.stats().transitions, 2);
        assert_eq!(
            targets.intermediate(&pool).unwrap().state(),
            ResourceState::ShaderResource
        );

        stream.execute_command_list().unwrap();
        let mut sync = device.create_frame_synchronizer();
        sync.wait_for_gpu().unwrap();
    }

    #[test]
    fn reallocation_keeps_view_slots() {
        let device = Device::create(DeviceInit::default()).unwrap();
        let mut pool = device.create_buffer_pool(PoolCapacities::DEFAULT);
        let mut views = device.create_view_table_manager(ViewCapacities::DEFAULT);
        let mut targets = FrameTargets::new(&mut pool, &mut views, 8, 8).unwrap();
        let rtv = targets.intermediate_rtv(&views).slot();

        targets.allocate(&mut pool, &views, 16, 4).unwrap();
        assert_eq!(targets.intermediate_rtv(&views).slot(), rtv);
        assert_eq!(
            targets.ray_tracing_output(&pool).unwrap().desc().extent(0),
            (16, 4)
        );
        assert_eq!(views.allocated(ViewKind::Rtv), 1);
    }
}
