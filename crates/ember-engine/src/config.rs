//! Compile-time configuration.
//!
//! Capacities are fixed at construction; nothing here grows at runtime.

use crate::views::ViewKind;

/// Number of swap-chain back buffers.
pub const FRAME_COUNT: usize = 2;

/// Size in bytes of every global and per-object constant allocation.
pub const CONSTANT_BUFFER_SIZE: u64 = 1024;

/// Size in bytes of a ray-tracing shader identifier.
pub const SHADER_IDENTIFIER_SIZE: usize = 32;

/// Every shader record stride must be a multiple of this.
pub const SHADER_RECORD_ALIGNMENT: usize = 32;

/// Start address alignment of a shader table.
pub const SHADER_TABLE_ALIGNMENT: u64 = 64;

/// Ray types traced by the ray-tracing pass: primary and ambient occlusion.
/// Each instance owns this many consecutive hit-group records.
pub const RAY_TYPE_COUNT: u32 = 2;

/// Row pitch alignment for buffer-to-texture copies.
pub const TEXTURE_PITCH_ALIGNMENT: u64 = 256;

/// Placement alignment for each subresource inside an upload buffer.
pub const TEXTURE_PLACEMENT_ALIGNMENT: u64 = 512;

/// Slot counts for the three slot-scanned buffer pool categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCapacities {
    pub scratch_upload: usize,
    pub upload: usize,
    pub readback: usize,
}

impl PoolCapacities {
    pub const DEFAULT: Self = Self {
        scratch_upload: 64,
        upload: 256,
        readback: 8,
    };
}

impl Default for PoolCapacities {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Descriptor count per view kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewCapacities {
    pub global_cbv: u32,
    pub per_object_cbv: u32,
    pub global_srv: u32,
    pub per_object_srv: u32,
    pub uav: u32,
    pub sampler: u32,
    pub rtv: u32,
    pub dsv: u32,
}

impl ViewCapacities {
    /// Global SRV slot 0 holds the intermediate render target, slot 1 the scene
    /// acceleration structure. RTV slots `0..FRAME_COUNT` are back buffers and
    /// slot `FRAME_COUNT` is the intermediate render target.
    pub const DEFAULT: Self = Self {
        global_cbv: 1,
        per_object_cbv: 64,
        global_srv: 2,
        per_object_srv: 128,
        uav: 1,
        sampler: 128,
        rtv: FRAME_COUNT as u32 + 1,
        dsv: 1,
    };

    pub fn get(&self, kind: ViewKind) -> u32 {
        match kind {
            ViewKind::GlobalCbv => self.global_cbv,
            ViewKind::PerObjectCbv => self.per_object_cbv,
            ViewKind::GlobalSrv => self.global_srv,
            ViewKind::PerObjectSrv => self.per_object_srv,
            ViewKind::Uav => self.uav,
            ViewKind::Sampler => self.sampler,
            ViewKind::Rtv => self.rtv,
            ViewKind::Dsv => self.dsv,
        }
    }
}

impl Default for ViewCapacities {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Rounds `value` up to the next multiple of `alignment` (a power of two).
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_power_of_two() {
        assert_eq!(align_up(0, 32), 0);
        assert_eq!(align_up(1, 32), 32);
        assert_eq!(align_up(32, 32), 32);
        assert_eq!(align_up(33, 256), 256);
    }

    #[test]
    fn default_rtv_capacity_covers_back_buffers_and_intermediate_target() {
        assert_eq!(ViewCapacities::DEFAULT.get(ViewKind::Rtv), FRAME_COUNT as u32 + 1);
    }
}
