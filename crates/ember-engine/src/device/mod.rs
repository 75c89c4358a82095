//! Device creation and factories.
//!
//! This module is responsible for:
//! - selecting an adapter (hardware first, software reference as fallback)
//! - owning the single submission queue
//! - creating the managers, recorders and resources that sit above it

mod error;
mod gpu;
mod init;

pub use error::DeviceError;
pub use gpu::Device;
pub use init::DeviceInit;
