use glam::Mat4;

use crate::buffers::GpuResource;
use crate::gpu::command::TopLevelInstance;

/// One placement of a bottom-level structure in the top-level structure.
#[derive(Debug, Clone, Copy)]
pub struct AccelInstance<'a> {
    pub blas: &'a GpuResource,
    pub transform: Mat4,
    pub instance_id: u32,
    /// Added to the ray's contribution when indexing the hit-group table.
    pub hit_group_offset: u32,
}

impl AccelInstance<'_> {
    pub(crate) fn to_command(self) -> TopLevelInstance {
        TopLevelInstance {
            blas: self.blas.cell().clone(),
            transform: self.transform,
            instance_id: self.instance_id,
            hit_group_offset: self.hit_group_offset,
        }
    }
}
