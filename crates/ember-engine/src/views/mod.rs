//! Descriptor view tables.

mod kind;
mod manager;

pub use kind::ViewKind;
pub use manager::ViewTableManager;
