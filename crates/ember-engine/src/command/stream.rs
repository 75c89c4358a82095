use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::buffers::GpuResource;
use crate::device::DeviceError;
use crate::gpu::command::{
    Command, CommandList, DispatchRaysDesc, IndexBufferView, ScissorRect, Transition,
    VertexBufferView, Viewport,
};
use crate::gpu::descriptor::DescriptorHandle;
use crate::gpu::queue::CommandQueue;
use crate::gpu::resource::{ResourceCell, SubresourceFootprint};
use crate::gpu::state::ResourceState;
use crate::pipeline::{GraphicsPipeline, PipelineLayout};
use crate::raytracing::{AccelInstance, RaytracingPipeline, ShaderTable};

use super::CommandAllocator;

/// Tables and extent for one ray dispatch.
#[derive(Debug, Clone, Copy)]
pub struct DispatchRays<'a> {
    pub ray_generation: &'a ShaderTable,
    pub miss: &'a ShaderTable,
    pub hit_group: &'a ShaderTable,
    pub width: u32,
    pub height: u32,
}

/// Counters for the work recorded since the last reset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    pub transitions: usize,
    pub barrier_batches: usize,
    pub draws: usize,
    pub copies: usize,
    pub dispatches: usize,
}

/// Single-threaded command recorder for the device's queue.
///
/// State transitions are queued by [`Self::add_transition_barrier`] and only
/// recorded, as one batch, by [`Self::flush_barriers`]. The logical state of a
/// resource changes when its transition is flushed.
pub struct CommandStream {
    queue: Arc<CommandQueue>,
    commands: Vec<Command>,
    pending: Vec<Transition>,
    allocator: Option<Arc<AtomicU64>>,
    layout: Option<Arc<PipelineLayout>>,
    stats: StreamStats,
}

impl CommandStream {
    pub(crate) fn new(queue: Arc<CommandQueue>) -> Self {
        Self {
            queue,
            commands: Vec::new(),
            pending: Vec::new(),
            allocator: None,
            layout: None,
            stats: StreamStats::default(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.allocator.is_some()
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Number of queued, unflushed transitions.
    pub fn pending_barriers(&self) -> usize {
        self.pending.len()
    }

    /// Starts recording into `allocator`.
    ///
    /// # Panics
    /// If the last list recorded from `allocator` has not finished executing,
    /// or if the stream is already recording.
    pub fn reset(&mut self, allocator: &CommandAllocator) {
        assert!(!self.is_recording(), "command stream reset while recording");
        let retired = self.queue.retired_serial();
        assert!(
            allocator.last_submitted() <= retired,
            "allocator '{}' reset while list {} is in flight (retired {retired})",
            allocator.name(),
            allocator.last_submitted()
        );

        self.commands.clear();
        self.layout = None;
        self.stats = StreamStats::default();
        self.allocator = Some(allocator.tracker());
    }

    fn assert_recording(&self) {
        assert!(self.is_recording(), "command stream is not recording");
    }

    fn begin_work(&mut self, what: &str) {
        self.assert_recording();
        assert!(
            self.pending.is_empty(),
            "{what} recorded with {} unflushed barriers",
            self.pending.len()
        );
    }

    fn effective_state(&self, cell: &Arc<ResourceCell>) -> ResourceState {
        self.pending
            .iter()
            .rev()
            .find(|t| Arc::ptr_eq(&t.resource, cell))
            .map(|t| t.after)
            .unwrap_or_else(|| cell.logical_state())
    }

    /// Queues a transition of `resource` from `from` to `to`.
    ///
    /// # Panics
    /// If `from` differs from the resource's logical state, counting transitions
    /// already queued.
    pub fn add_transition_barrier(
        &mut self,
        resource: &GpuResource,
        from: ResourceState,
        to: ResourceState,
    ) {
        self.assert_recording();
        let current = self.effective_state(resource.cell());
        assert_eq!(
            current,
            from,
            "barrier for '{}' expects {from} but the resource is in {current}",
            resource.name()
        );
        if from == to {
            return;
        }
        self.pending.push(Transition {
            resource: resource.cell().clone(),
            before: from,
            after: to,
        });
    }

    /// Queues a transition from whatever state `resource` is logically in.
    pub fn transition_to(&mut self, resource: &GpuResource, to: ResourceState) {
        let from = self.effective_state(resource.cell());
        self.add_transition_barrier(resource, from, to);
    }

    /// Records every queued transition as a single barrier command.
    pub fn flush_barriers(&mut self) {
        self.assert_recording();
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        for t in &batch {
            t.resource.set_logical_state(t.after);
        }
        log::trace!("flushing {} barriers", batch.len());

        self.stats.transitions += batch.len();
        self.stats.barrier_batches += 1;
        self.commands.push(Command::Barrier(batch));
    }

    pub fn copy_buffer_region(
        &mut self,
        dst: &GpuResource,
        dst_offset: u64,
        src: &GpuResource,
        src_offset: u64,
        size: u64,
    ) {
        self.begin_work("buffer copy");
        self.stats.copies += 1;
        self.commands.push(Command::CopyBufferRegion {
            dst: dst.cell().clone(),
            dst_offset,
            src: src.cell().clone(),
            src_offset,
            size,
        });
    }

    /// Copies one subresource laid out by `footprint` in `src` into `dst`.
    pub fn copy_texture_region(
        &mut self,
        dst: &GpuResource,
        subresource: u32,
        src: &GpuResource,
        footprint: SubresourceFootprint,
    ) {
        self.begin_work("texture copy");
        self.stats.copies += 1;
        self.commands.push(Command::CopyTextureRegion {
            dst: dst.cell().clone(),
            subresource,
            src: src.cell().clone(),
            footprint,
        });
    }

    pub fn copy_resource(&mut self, dst: &GpuResource, src: &GpuResource) {
        self.begin_work("resource copy");
        self.stats.copies += 1;
        self.commands.push(Command::CopyResource {
            dst: dst.cell().clone(),
            src: src.cell().clone(),
        });
    }

    pub fn clear_render_target(&mut self, target: &DescriptorHandle, color: [f32; 4]) {
        self.begin_work("render target clear");
        self.commands.push(Command::ClearRenderTarget {
            target: target.clone(),
            color,
        });
    }

    pub fn clear_depth(&mut self, target: &DescriptorHandle, depth: f32) {
        self.begin_work("depth clear");
        self.commands.push(Command::ClearDepth {
            target: target.clone(),
            depth,
        });
    }

    /// Binds a rasterization pipeline and makes its layout the active one.
    pub fn set_pipeline_state(&mut self, pipeline: &Arc<GraphicsPipeline>) {
        self.assert_recording();
        self.layout = Some(pipeline.layout().clone());
        self.commands.push(Command::SetPipelineState(pipeline.clone()));
    }

    /// Binds a ray-tracing state object and makes its global layout the active one.
    pub fn set_raytracing_state(&mut self, pipeline: &Arc<RaytracingPipeline>) {
        self.assert_recording();
        self.layout = Some(pipeline.global_layout().clone());
        self.commands.push(Command::SetRaytracingState(pipeline.clone()));
    }

    /// Binds the descriptor table starting at `base` to its layout slot.
    ///
    /// # Panics
    /// If no pipeline is bound or the active layout has no table of that kind.
    pub fn set_descriptor_table(&mut self, base: DescriptorHandle) {
        self.assert_recording();
        let layout = self
            .layout
            .as_ref()
            .unwrap_or_else(|| panic!("descriptor table bound before any pipeline"));
        let kind = base.kind();
        let root_index = layout
            .root_index_of(kind)
            .unwrap_or_else(|| panic!("layout '{}' has no {kind:?} table", layout.name()));
        self.commands.push(Command::SetDescriptorTable { root_index, base });
    }

    pub fn set_viewports(&mut self, viewport: Viewport) {
        self.assert_recording();
        self.commands.push(Command::SetViewport(viewport));
    }

    pub fn set_scissor_rects(&mut self, rect: ScissorRect) {
        self.assert_recording();
        self.commands.push(Command::SetScissor(rect));
    }

    pub fn set_render_targets(
        &mut self,
        color: Option<&DescriptorHandle>,
        depth: Option<&DescriptorHandle>,
    ) {
        self.assert_recording();
        self.commands.push(Command::SetRenderTargets {
            color: color.cloned(),
            depth: depth.cloned(),
        });
    }

    pub fn set_vertex_buffer(&mut self, view: VertexBufferView) {
        self.assert_recording();
        self.commands.push(Command::SetVertexBuffer(view));
    }

    pub fn set_index_buffer(&mut self, view: IndexBufferView) {
        self.assert_recording();
        self.commands.push(Command::SetIndexBuffer(view));
    }

    pub fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
    ) {
        self.begin_work("draw");
        self.stats.draws += 1;
        self.commands.push(Command::DrawIndexedInstanced {
            index_count,
            instance_count,
            start_index,
            base_vertex,
        });
    }

    /// Builds a bottom-level structure over indexed triangles.
    pub fn build_bottom_level(
        &mut self,
        dest: &GpuResource,
        vertices: VertexBufferView,
        indices: IndexBufferView,
    ) {
        self.begin_work("bottom-level build");
        self.commands.push(Command::BuildBottomLevel {
            dest: dest.cell().clone(),
            vertices,
            indices,
        });
    }

    pub fn build_top_level(&mut self, dest: &GpuResource, instances: &[AccelInstance<'_>]) {
        self.begin_work("top-level build");
        self.commands.push(Command::BuildTopLevel {
            dest: dest.cell().clone(),
            instances: instances.iter().map(|i| i.to_command()).collect(),
        });
    }

    pub fn dispatch_rays(&mut self, desc: &DispatchRays<'_>) {
        self.begin_work("ray dispatch");
        self.stats.dispatches += 1;
        self.commands.push(Command::DispatchRays(DispatchRaysDesc {
            ray_generation: desc.ray_generation.range(),
            miss: desc.miss.range(),
            hit_group: desc.hit_group.range(),
            width: desc.width,
            height: desc.height,
        }));
    }

    /// Flushes pending barriers, closes the list and submits it.
    ///
    /// Returns the submission serial.
    pub fn execute_command_list(&mut self) -> Result<u64, DeviceError> {
        self.flush_barriers();
        let tracker = self
            .allocator
            .take()
            .unwrap_or_else(|| panic!("command stream is not recording"));

        let list = CommandList {
            commands: std::mem::take(&mut self.commands),
        };
        log::trace!("submitting {} commands", list.len());

        let serial = self.queue.execute(list)?;
        tracker.store(serial, Ordering::Release);
        Ok(serial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolCapacities;
    use crate::device::{Device, DeviceInit};
    use crate::gpu::resource::ResourceDesc;

    fn setup() -> (Device, CommandAllocator, CommandStream, crate::buffers::BufferPool) {
        let device = Device::create(DeviceInit::default()).unwrap();
        let allocator = device.create_command_allocator("test");
        let mut stream = device.create_command_stream();
        stream.reset(&allocator);
        let pool = device.create_buffer_pool(PoolCapacities::DEFAULT);
        (device, allocator, stream, pool)
    }

    fn default_buffer(pool: &mut crate::buffers::BufferPool, id: u32) -> &GpuResource {
        pool.allocate_default(
            crate::buffers::ResourceKey::Vertices(id),
            ResourceDesc::buffer(64),
            ResourceState::CopyDest,
            "buffer",
            None,
        )
        .unwrap()
    }

    #[test]
    fn batched_and_individual_flushes_agree() {
        let (_device, _allocator, mut stream, mut pool) = setup();
        default_buffer(&mut pool, 0);
        default_buffer(&mut pool, 1);
        let a = pool.default_resource(crate::buffers::ResourceKey::Vertices(0)).unwrap();
        let b = pool.default_resource(crate::buffers::ResourceKey::Vertices(1)).unwrap();

        let steps = [
            (ResourceState::CopyDest, ResourceState::ShaderResource),
            (ResourceState::ShaderResource, ResourceState::CopySource),
            (ResourceState::CopySource, ResourceState::VertexAndConstantBuffer),
        ];

        for (from, to) in steps {
            stream.add_transition_barrier(a, from, to);
        }
        stream.flush_barriers();

        for (from, to) in steps {
            stream.add_transition_barrier(b, from, to);
            stream.flush_barriers();
        }

        assert_eq!(a.state(), ResourceState::VertexAndConstantBuffer);
        assert_eq!(a.state(), b.state());
        assert_eq!(stream.stats().barrier_batches, 4);
        assert_eq!(stream.stats().transitions, 6);
    }

    #[test]
    fn state_changes_only_on_flush() {
        let (_device, _allocator, mut stream, mut pool) = setup();
        let buffer = default_buffer(&mut pool, 0);

        stream.add_transition_barrier(buffer, ResourceState::CopyDest, ResourceState::ShaderResource);
        assert_eq!(buffer.state(), ResourceState::CopyDest);
        assert_eq!(stream.pending_barriers(), 1);

        stream.flush_barriers();
        assert_eq!(buffer.state(), ResourceState::ShaderResource);
    }

    #[test]
    #[should_panic(expected = "expects")]
    fn mismatched_from_state_panics() {
        let (_device, _allocator, mut stream, mut pool) = setup();
        let buffer = default_buffer(&mut pool, 0);
        stream.add_transition_barrier(buffer, ResourceState::Common, ResourceState::CopySource);
    }

    #[test]
    #[should_panic(expected = "unflushed barriers")]
    fn copy_with_pending_barriers_panics() {
        let (_device, _allocator, mut stream, mut pool) = setup();
        let buffer = default_buffer(&mut pool, 0);
        stream.transition_to(buffer, ResourceState::CopySource);
        stream.copy_resource(buffer, buffer);
    }

    #[test]
    fn transition_to_follows_queued_barriers() {
        let (_device, _allocator, mut stream, mut pool) = setup();
        let buffer = default_buffer(&mut pool, 0);
        stream.transition_to(buffer, ResourceState::ShaderResource);
        stream.transition_to(buffer, ResourceState::CopySource);
        stream.flush_barriers();
        assert_eq!(buffer.state(), ResourceState::CopySource);
    }

    #[test]
    #[should_panic(expected = "in flight")]
    fn reset_before_completion_panics() {
        let device = Device::create(DeviceInit {
            simulated_latency: Some(std::time::Duration::from_millis(200)),
            ..DeviceInit::default()
        })
        .unwrap();
        let allocator = device.create_command_allocator("slow");
        let mut stream = device.create_command_stream();

        stream.reset(&allocator);
        stream.execute_command_list().unwrap();
        stream.reset(&allocator);
    }

    #[test]
    fn reset_after_fence_wait_succeeds() {
        let device = Device::create(DeviceInit::default()).unwrap();
        let allocator = device.create_command_allocator("frame");
        let mut stream = device.create_command_stream();
        let mut sync = device.create_frame_synchronizer();

        stream.reset(&allocator);
        let serial = stream.execute_command_list().unwrap();
        let value = sync.update_fence().unwrap();
        sync.wait_for_frame(value).unwrap();

        stream.reset(&allocator);
        assert_eq!(allocator.last_submitted(), serial);
        assert!(stream.is_recording());
    }
}
