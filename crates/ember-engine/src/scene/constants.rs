use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Contents of the global constant buffer.
///
/// Ray generation reads `inv_view_proj` at byte 64 and `position` at byte 128.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct CameraConstants {
    pub view_proj: Mat4,
    pub inv_view_proj: Mat4,
    pub position: Vec4,
}

impl CameraConstants {
    pub fn new(view_proj: Mat4, position: Vec3) -> Self {
        Self {
            view_proj,
            inv_view_proj: view_proj.inverse(),
            position: position.extend(1.0),
        }
    }
}

/// Contents of a per-object constant buffer.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct ObjectConstants {
    pub world: Mat4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_block_offsets() {
        assert_eq!(std::mem::offset_of!(CameraConstants, inv_view_proj), 64);
        assert_eq!(std::mem::offset_of!(CameraConstants, position), 128);
        assert!(std::mem::size_of::<CameraConstants>() as u64 <= crate::config::CONSTANT_BUFFER_SIZE);
    }
}
