//! Pooled GPU memory.
//!
//! Three slot-scanned categories (scratch upload, upload, readback), identity-keyed
//! GPU-resident allocations, and the global / per-object constant buffers.

mod pool;
mod resource;

pub use pool::{BufferHandle, BufferPool, PoolCategory, ResourceKey};
pub use resource::GpuResource;
