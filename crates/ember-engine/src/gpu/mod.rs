//! Software reference adapter: resources, descriptors, the command queue and
//! the timeline that executes recorded work.

pub(crate) mod accel;
pub mod adapter;
pub mod command;
pub mod descriptor;
mod exec;
pub mod queue;
pub mod resource;
pub mod state;
