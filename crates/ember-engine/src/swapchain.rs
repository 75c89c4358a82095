//! Presentation surface as seen by the renderer.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::buffers::GpuResource;
use crate::config::FRAME_COUNT;
use crate::device::{Device, DeviceError};
use crate::gpu::descriptor::{DescriptorHandle, ViewDesc};
use crate::gpu::queue::PresentSink;
use crate::gpu::resource::{Format, HeapType, ResourceDesc};
use crate::gpu::state::ResourceState;
use crate::views::{ViewKind, ViewTableManager};

/// `FRAME_COUNT` RGBA8 back buffers, steady state `Present`, rotated after
/// each presented frame.
pub struct SwapChain {
    device: Device,
    sink: Arc<dyn PresentSink>,
    buffers: Vec<GpuResource>,
    rtv: Vec<u32>,
    current: usize,
}

impl SwapChain {
    pub fn new(
        device: &Device,
        views: &mut ViewTableManager,
        sink: Arc<dyn PresentSink>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let rtv = (0..FRAME_COUNT).map(|_| views.allocate(ViewKind::Rtv)).collect();
        let mut swap_chain = Self {
            device: device.clone(),
            sink,
            buffers: Vec::with_capacity(FRAME_COUNT),
            rtv,
            current: 0,
        };
        swap_chain.resize(views, width, height)?;
        Ok(swap_chain)
    }

    /// Recreates the back buffers; the caller must have waited for the GPU.
    pub fn resize(&mut self, views: &ViewTableManager, width: u32, height: u32) -> Result<()> {
        self.buffers.clear();
        for (i, &slot) in self.rtv.iter().enumerate() {
            let buffer = self
                .device
                .create_committed_resource(
                    ResourceDesc::texture_2d(width, height, 1, Format::Rgba8Unorm),
                    HeapType::Default,
                    ResourceState::Present,
                    &format!("back buffer {i}"),
                    None,
                )
                .with_context(|| format!("failed to create back buffer {i}"))?;
            views.create_view(ViewKind::Rtv, slot, &buffer, ViewDesc::RenderTarget);
            self.buffers.push(buffer);
        }
        self.current = 0;
        log::debug!("swap chain sized {width}x{height}");
        Ok(())
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn back_buffer(&self) -> &GpuResource {
        &self.buffers[self.current]
    }

    pub fn back_buffer_rtv(&self, views: &ViewTableManager) -> DescriptorHandle {
        views.handle(ViewKind::Rtv, self.rtv[self.current])
    }

    /// Queues presentation of the current back buffer behind all submitted work.
    pub fn present(&self) -> Result<(), DeviceError> {
        self.device
            .queue()
            .present(self.back_buffer().cell().clone(), self.current, self.sink.clone())
    }

    /// Moves to the next back buffer. Call after the presented frame completed.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.buffers.len();
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::config::ViewCapacities;
    use crate::device::DeviceInit;

    #[derive(Default)]
    struct Capture(Mutex<Vec<usize>>);

    impl PresentSink for Capture {
        fn present(&self, frame: crate::gpu::queue::PresentedFrame) {
            self.0.lock().push(frame.back_buffer_index);
        }
    }

    #[test]
    fn presents_rotate_through_back_buffers() {
        let device = Device::create(DeviceInit::default()).unwrap();
        let mut views = device.create_view_table_manager(ViewCapacities::DEFAULT);
        let sink = Arc::new(Capture::default());
        let mut swap_chain = SwapChain::new(&device, &mut views, sink.clone(), 4, 4).unwrap();
        let mut sync = device.create_frame_synchronizer();

        for _ in 0..3 {
            swap_chain.present().unwrap();
            sync.wait_for_gpu().unwrap();
            swap_chain.advance();
        }
        assert_eq!(*sink.0.lock(), vec![0, 1, 0]);
    }

    #[test]
    fn present_outside_present_state_removes_the_device() {
        let device = Device::create(DeviceInit {
            validation: true,
            ..DeviceInit::default()
        })
        .unwrap();
        let mut views = device.create_view_table_manager(ViewCapacities::DEFAULT);
        let sink = Arc::new(Capture::default());
        let swap_chain = SwapChain::new(&device, &mut views, sink.clone(), 4, 4).unwrap();
        swap_chain.back_buffer().cell().set_actual_state(ResourceState::RenderTarget);

        swap_chain.present().unwrap();
        let mut sync = device.create_frame_synchronizer();
        assert!(matches!(sync.wait_for_gpu(), Err(DeviceError::Removed { .. })));
        assert!(sink.0.lock().is_empty());
    }
}
