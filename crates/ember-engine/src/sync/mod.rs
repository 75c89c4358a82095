//! CPU/GPU frame synchronization.

mod frame;

pub use frame::FrameSynchronizer;
