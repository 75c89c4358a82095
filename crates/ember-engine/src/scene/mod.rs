//! Scene-side collaborators of the renderer.
//!
//! Responsibilities:
//! - describe loaded scene content (meshes, materials, textures)
//! - hand out dense object and texture ids per scene session
//! - provide the camera the passes read view state from
//! - upload scene content to GPU memory and keep per-frame constants current

mod camera;
mod constants;
mod data;
mod gpu;
mod procedural;
mod session;

pub use camera::{Camera, CameraControl, FlyCamera};
pub use constants::{CameraConstants, ObjectConstants};
pub use data::{Material, MeshData, SceneData, SceneObject, TextureImage, Vertex};
pub use gpu::GpuScene;
pub use procedural::{cube, demo_scene};
pub use session::SceneSession;
