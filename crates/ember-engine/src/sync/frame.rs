use std::sync::Arc;

use crate::device::DeviceError;
use crate::gpu::queue::{CommandQueue, Fence};

/// Monotonic fence counter gating CPU reuse of frame-scoped GPU state.
///
/// At most one frame is in flight: the renderer signals after each submission
/// and waits on that value before touching anything the frame referenced.
pub struct FrameSynchronizer {
    queue: Arc<CommandQueue>,
    fence: Fence,
    next_value: u64,
}

impl FrameSynchronizer {
    pub(crate) fn new(queue: Arc<CommandQueue>, fence: Fence) -> Self {
        let next_value = fence.completed_value() + 1;
        Self {
            queue,
            fence,
            next_value,
        }
    }

    /// Signals the current counter value on the queue, then increments it.
    ///
    /// Returns the value signaled.
    pub fn update_fence(&mut self) -> Result<u64, DeviceError> {
        let value = self.next_value;
        self.queue.signal(&self.fence, value)?;
        self.next_value += 1;
        log::trace!("fence signal queued: {value}");
        Ok(value)
    }

    /// Blocks until the GPU has completed `value`. There is no timeout.
    pub fn wait_for_frame(&self, value: u64) -> Result<(), DeviceError> {
        if self.fence.completed_value() < value {
            log::trace!("waiting for fence {value}");
        }
        self.fence.wait(value)
    }

    /// Signals and waits in one step, without touching any pool.
    pub fn wait_for_gpu(&mut self) -> Result<(), DeviceError> {
        let value = self.update_fence()?;
        self.wait_for_frame(value)
    }

    pub fn completed_value(&self) -> u64 {
        self.fence.completed_value()
    }

    /// The value the next [`Self::update_fence`] will signal.
    pub fn next_value(&self) -> u64 {
        self.next_value
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::buffers::ResourceKey;
    use crate::config::PoolCapacities;
    use crate::device::{Device, DeviceError, DeviceInit};
    use crate::gpu::resource::ResourceDesc;
    use crate::gpu::state::ResourceState;

    #[test]
    fn fence_values_strictly_increase() {
        let device = Device::create(DeviceInit::default()).unwrap();
        let mut sync = device.create_frame_synchronizer();

        let values: Vec<u64> = (0..5).map(|_| sync.update_fence().unwrap()).collect();
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(values[0], 1);
    }

    #[test]
    fn wait_returns_only_after_gpu_reaches_value() {
        let device = Device::create(DeviceInit {
            simulated_latency: Some(Duration::from_millis(50)),
            ..DeviceInit::default()
        })
        .unwrap();
        let allocator = device.create_command_allocator("frame");
        let mut stream = device.create_command_stream();
        let mut sync = device.create_frame_synchronizer();

        stream.reset(&allocator);
        stream.execute_command_list().unwrap();
        let value = sync.update_fence().unwrap();

        assert!(sync.completed_value() < value);
        sync.wait_for_frame(value).unwrap();
        assert!(sync.completed_value() >= value);
    }

    #[test]
    fn wait_for_gpu_drains_the_queue() {
        let device = Device::create(DeviceInit::default()).unwrap();
        let mut sync = device.create_frame_synchronizer();
        sync.wait_for_gpu().unwrap();
        sync.wait_for_gpu().unwrap();
        assert_eq!(sync.completed_value(), 2);
        assert_eq!(sync.next_value(), 3);
    }

    #[test]
    fn device_removal_fails_fence_waits() {
        let device = Device::create(DeviceInit {
            validation: true,
            ..DeviceInit::default()
        })
        .unwrap();
        let mut pool = device.create_buffer_pool(PoolCapacities::DEFAULT);
        let allocator = device.create_command_allocator("frame");
        let mut stream = device.create_command_stream();
        let mut sync = device.create_frame_synchronizer();

        let buffer = pool
            .allocate_default(ResourceKey::Indices(0), ResourceDesc::buffer(64), ResourceState::CopyDest, "ib", None)
            .unwrap();
        // Desynchronize bookkeeping from the device without a barrier.
        buffer.set_state(ResourceState::ShaderResource);

        stream.reset(&allocator);
        stream.add_transition_barrier(buffer, ResourceState::ShaderResource, ResourceState::IndexBuffer);
        stream.execute_command_list().unwrap();

        assert!(matches!(sync.wait_for_gpu(), Err(DeviceError::Removed { .. })));
        assert!(device.check_status().is_err());
        assert!(matches!(sync.update_fence(), Err(DeviceError::Removed { .. })));
    }
}
