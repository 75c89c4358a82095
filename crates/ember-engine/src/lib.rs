//! Ember engine crate.
//!
//! This crate owns the GPU resource and command orchestration pieces of the
//! renderer: the device, view tables, buffer pools, the barrier-batching
//! command stream, frame synchronization and the composed render passes.

pub mod config;
pub mod device;
pub mod gpu;
pub mod logging;

pub mod buffers;
pub mod command;
pub mod pipeline;
pub mod raytracing;
pub mod sync;
pub mod views;

pub mod passes;
pub mod renderer;
pub mod scene;
pub mod swapchain;
pub mod targets;

#[cfg(test)]
mod testing;

pub use buffers::{BufferHandle, BufferPool, GpuResource, PoolCategory, ResourceKey};
pub use command::{CommandAllocator, CommandStream, StreamStats};
pub use config::{PoolCapacities, ViewCapacities, FRAME_COUNT};
pub use device::{Device, DeviceError, DeviceInit};
pub use gpu::queue::{Fence, PresentSink, PresentedFrame};
pub use gpu::resource::{ClearValue, Format, HeapType, ResourceDesc};
pub use gpu::state::ResourceState;
pub use renderer::{FrameStats, PassToggles, Renderer, RendererConfig};
pub use sync::FrameSynchronizer;
pub use views::{ViewKind, ViewTableManager};
