//! Command recording and barrier batching.

mod allocator;
mod stream;

pub use allocator::CommandAllocator;
pub use stream::{CommandStream, DispatchRays, StreamStats};
