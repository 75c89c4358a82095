use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};

use crate::buffers::{BufferPool, GpuResource};
use crate::command::{CommandAllocator, CommandStream};
use crate::config::{PoolCapacities, ViewCapacities};
use crate::gpu::adapter::{enumerate_adapters, AdapterInfo, AdapterKind};
use crate::gpu::queue::{CommandQueue, DeviceStatus, Fence, TimelineConfig};
use crate::gpu::resource::{
    ClearValue, HeapType, ResourceCell, ResourceCounters, ResourceDesc, ResourceId,
};
use crate::gpu::state::ResourceState;
use crate::pipeline::{GraphicsPipeline, GraphicsPipelineDesc};
use crate::raytracing::{RaytracingPipeline, RaytracingPipelineDesc};
use crate::sync::FrameSynchronizer;
use crate::views::ViewTableManager;

use super::{DeviceError, DeviceInit};

/// The single logical GPU connection.
///
/// Cloning is cheap; every clone shares the adapter, the queue and the
/// removal status. The queue's timeline thread exits once the last clone drops.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    adapter: AdapterInfo,
    queue: Arc<CommandQueue>,
    status: Arc<DeviceStatus>,
    counters: Arc<ResourceCounters>,
    next_resource: AtomicU64,
}

impl Device {
    /// Creates the device on the first compatible adapter.
    ///
    /// Hardware adapters are preferred; the software reference adapter is used
    /// only when `init.allow_software_fallback` is set.
    pub fn create(init: DeviceInit) -> Result<Self> {
        let adapters = enumerate_adapters();
        let adapter = adapters
            .iter()
            .find(|a| a.kind == AdapterKind::Hardware && a.supports_ray_tracing)
            .or_else(|| {
                adapters
                    .iter()
                    .find(|a| a.kind == AdapterKind::Software && init.allow_software_fallback)
            })
            .cloned()
            .ok_or(DeviceError::NoCompatibleAdapter)?;

        log::info!("selected adapter: {} ({:?})", adapter.name, adapter.kind);
        if init.validation {
            log::debug!("device validation enabled");
        }

        let status = Arc::new(DeviceStatus::default());
        let queue = CommandQueue::new(
            status.clone(),
            TimelineConfig {
                validation: init.validation,
                latency: init.simulated_latency,
            },
        )
        .context("failed to create command queue")?;

        Ok(Self {
            inner: Arc::new(DeviceInner {
                adapter,
                queue: Arc::new(queue),
                status,
                counters: Arc::new(ResourceCounters::default()),
                next_resource: AtomicU64::new(1),
            }),
        })
    }

    pub fn adapter(&self) -> &AdapterInfo {
        &self.inner.adapter
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.inner.queue
    }

    /// Fails once the device has been removed.
    pub fn check_status(&self) -> Result<(), DeviceError> {
        self.inner.status.check()
    }

    pub fn create_view_table_manager(&self, capacities: ViewCapacities) -> ViewTableManager {
        ViewTableManager::new(capacities)
    }

    pub fn create_buffer_pool(&self, capacities: PoolCapacities) -> BufferPool {
        BufferPool::new(self.clone(), capacities)
    }

    pub fn create_command_allocator(&self, name: &str) -> CommandAllocator {
        CommandAllocator::new(name)
    }

    pub fn create_command_stream(&self) -> CommandStream {
        CommandStream::new(self.inner.queue.clone())
    }

    pub fn create_fence(&self, initial_value: u64) -> Fence {
        Fence::new(initial_value, self.inner.status.clone())
    }

    pub fn create_frame_synchronizer(&self) -> FrameSynchronizer {
        FrameSynchronizer::new(self.inner.queue.clone(), self.create_fence(0))
    }

    pub fn create_graphics_pipeline(
        &self,
        desc: GraphicsPipelineDesc,
    ) -> Result<Arc<GraphicsPipeline>> {
        GraphicsPipeline::build(desc).map(Arc::new)
    }

    pub fn create_raytracing_pipeline(
        &self,
        desc: RaytracingPipelineDesc,
    ) -> Result<Arc<RaytracingPipeline>> {
        anyhow::ensure!(
            self.inner.adapter.supports_ray_tracing,
            "adapter '{}' does not support ray tracing",
            self.inner.adapter.name
        );
        RaytracingPipeline::build(desc).map(Arc::new)
    }

    /// Allocates a committed resource with its own backing memory.
    ///
    /// Upload memory must start in `GenericRead`, readback memory in `CopyDest`.
    pub fn create_committed_resource(
        &self,
        desc: ResourceDesc,
        heap: HeapType,
        initial_state: ResourceState,
        name: &str,
        clear: Option<ClearValue>,
    ) -> Result<GpuResource, DeviceError> {
        self.check_status()?;

        let invalid = |detail: &str| DeviceError::InvalidResource {
            name: name.to_string(),
            detail: detail.to_string(),
        };

        if desc.byte_size() == 0 {
            return Err(invalid("zero-sized resource"));
        }
        match heap {
            HeapType::Upload if initial_state != ResourceState::GenericRead => {
                return Err(invalid("upload heap resources must start in GenericRead"));
            }
            HeapType::Readback if initial_state != ResourceState::CopyDest => {
                return Err(invalid("readback heap resources must start in CopyDest"));
            }
            HeapType::Upload | HeapType::Readback if desc.is_texture() => {
                return Err(invalid("textures must live on the default heap"));
            }
            _ => {}
        }
        match (clear, desc.format()) {
            (None, _) => {}
            (Some(ClearValue::Color(_)), Some(f)) if f.is_color() => {}
            (Some(ClearValue::Depth(_)), Some(f)) if f.is_depth() => {}
            (Some(_), _) => return Err(invalid("clear value does not match the format")),
        }

        let id = ResourceId(self.inner.next_resource.fetch_add(1, Ordering::Relaxed));
        log::trace!("create resource {id} '{name}' on {heap:?} in {initial_state}");

        Ok(GpuResource::new(ResourceCell::new(
            id,
            desc,
            heap,
            initial_state,
            name,
            clear,
            self.inner.counters.clone(),
        )))
    }

    /// Number of committed resources created over the device's lifetime.
    pub fn resources_created(&self) -> u64 {
        self.inner.counters.created()
    }

    /// Number of committed resources not yet released.
    pub fn resources_live(&self) -> u64 {
        self.inner.counters.live()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("adapter", &self.inner.adapter.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::resource::Format;

    #[test]
    fn software_fallback_is_required_without_hardware() {
        let init = DeviceInit {
            allow_software_fallback: false,
            ..DeviceInit::default()
        };
        let err = Device::create(init).unwrap_err();
        assert_eq!(
            err.downcast_ref::<DeviceError>(),
            Some(&DeviceError::NoCompatibleAdapter)
        );
    }

    #[test]
    fn upload_resources_must_start_generic_read() {
        let device = Device::create(DeviceInit::default()).unwrap();
        let err = device
            .create_committed_resource(
                ResourceDesc::buffer(64),
                HeapType::Upload,
                ResourceState::CopyDest,
                "bad upload",
                None,
            )
            .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidResource { .. }));
    }

    #[test]
    fn depth_clear_on_color_texture_is_rejected() {
        let device = Device::create(DeviceInit::default()).unwrap();
        let result = device.create_committed_resource(
            ResourceDesc::texture_2d(4, 4, 1, Format::Rgba8Unorm),
            HeapType::Default,
            ResourceState::RenderTarget,
            "rt",
            Some(ClearValue::Depth(1.0)),
        );
        assert!(result.is_err());
    }

    #[test]
    fn dropping_a_resource_updates_live_count() {
        let device = Device::create(DeviceInit::default()).unwrap();
        let buffer = device
            .create_committed_resource(
                ResourceDesc::buffer(16),
                HeapType::Default,
                ResourceState::Common,
                "tmp",
                None,
            )
            .unwrap();
        assert_eq!(device.resources_live(), 1);
        drop(buffer);
        assert_eq!((device.resources_created(), device.resources_live()), (1, 0));
    }
}
