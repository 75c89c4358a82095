use std::collections::HashMap;

use anyhow::{Context, Result};

use crate::config::{PoolCapacities, CONSTANT_BUFFER_SIZE};
use crate::device::Device;
use crate::gpu::resource::{ClearValue, HeapType, ResourceDesc};
use crate::gpu::state::ResourceState;

use super::GpuResource;

/// Slot-scanned pool categories.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PoolCategory {
    /// Staging memory reclaimed in bulk once per frame.
    ScratchUpload,
    /// Long-lived CPU-written memory; released by its owner.
    Upload,
    /// GPU-written, CPU-read memory; released by its owner.
    Readback,
}

/// Index of an occupied slot in one pool category.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    pub category: PoolCategory,
    pub slot: usize,
}

/// Identity of the logical resource a GPU-resident allocation backs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Vertices(u32),
    Indices(u32),
    Texture(u32),
    BottomLevel(u32),
    TopLevel,
    IntermediateTarget,
    DepthBuffer,
    RayTracingOutput,
}

/// Owner of every pooled GPU allocation.
///
/// Slots own their resources by value; clearing a slot drops, and so releases,
/// the allocation.
pub struct BufferPool {
    device: Device,
    capacities: PoolCapacities,
    scratch_upload: Vec<Option<GpuResource>>,
    upload: Vec<Option<GpuResource>>,
    readback: Vec<Option<GpuResource>>,
    defaults: HashMap<ResourceKey, GpuResource>,
    global_constant: Option<GpuResource>,
    object_constants: HashMap<u32, GpuResource>,
}

impl BufferPool {
    pub(crate) fn new(device: Device, capacities: PoolCapacities) -> Self {
        let slots = |n| std::iter::repeat_with(|| None).take(n).collect();
        Self {
            device,
            capacities,
            scratch_upload: slots(capacities.scratch_upload),
            upload: slots(capacities.upload),
            readback: slots(capacities.readback),
            defaults: HashMap::new(),
            global_constant: None,
            object_constants: HashMap::new(),
        }
    }

    pub fn capacities(&self) -> PoolCapacities {
        self.capacities
    }

    fn slots(&self, category: PoolCategory) -> &Vec<Option<GpuResource>> {
        match category {
            PoolCategory::ScratchUpload => &self.scratch_upload,
            PoolCategory::Upload => &self.upload,
            PoolCategory::Readback => &self.readback,
        }
    }

    fn slots_mut(&mut self, category: PoolCategory) -> &mut Vec<Option<GpuResource>> {
        match category {
            PoolCategory::ScratchUpload => &mut self.scratch_upload,
            PoolCategory::Upload => &mut self.upload,
            PoolCategory::Readback => &mut self.readback,
        }
    }

    /// First-free scan. Exhaustion is a capacity-planning bug and halts before
    /// any device call is made.
    fn allocate_slot(
        &mut self,
        category: PoolCategory,
        desc: ResourceDesc,
        heap: HeapType,
        state: ResourceState,
        tag: &str,
    ) -> Result<BufferHandle> {
        let Some(slot) = self.slots(category).iter().position(Option::is_none) else {
            let capacity = self.slots(category).len();
            log::error!("{category:?} pool exhausted ({capacity} slots) allocating '{tag}'");
            panic!("{category:?} pool exhausted ({capacity} slots)");
        };

        let resource = self
            .device
            .create_committed_resource(desc, heap, state, tag, None)
            .with_context(|| format!("failed to allocate {category:?} buffer '{tag}'"))?;
        self.slots_mut(category)[slot] = Some(resource);

        Ok(BufferHandle { category, slot })
    }

    pub fn allocate_scratch_upload(&mut self, size: u64, tag: &str) -> Result<BufferHandle> {
        self.allocate_slot(
            PoolCategory::ScratchUpload,
            ResourceDesc::buffer(size),
            HeapType::Upload,
            ResourceState::GenericRead,
            tag,
        )
    }

    pub fn allocate_upload(
        &mut self,
        size: u64,
        state: ResourceState,
        tag: &str,
    ) -> Result<BufferHandle> {
        self.allocate_slot(
            PoolCategory::Upload,
            ResourceDesc::buffer(size),
            HeapType::Upload,
            state,
            tag,
        )
    }

    pub fn allocate_readback(&mut self, size: u64, tag: &str) -> Result<BufferHandle> {
        self.allocate_slot(
            PoolCategory::Readback,
            ResourceDesc::buffer(size),
            HeapType::Readback,
            ResourceState::CopyDest,
            tag,
        )
    }

    /// Backs `key` with GPU-resident memory.
    ///
    /// Idempotent: if `key` is already backed, nothing is allocated and the
    /// existing resource keeps its state.
    pub fn allocate_default(
        &mut self,
        key: ResourceKey,
        desc: ResourceDesc,
        state: ResourceState,
        tag: &str,
        clear: Option<ClearValue>,
    ) -> Result<&GpuResource> {
        if !self.defaults.contains_key(&key) {
            let resource = self
                .device
                .create_committed_resource(desc, HeapType::Default, state, tag, clear)
                .with_context(|| format!("failed to allocate default resource '{tag}'"))?;
            self.defaults.insert(key, resource);
        }
        Ok(&self.defaults[&key])
    }

    pub fn allocate_global_constant(&mut self) -> Result<()> {
        if self.global_constant.is_some() {
            return Ok(());
        }
        let resource = self
            .device
            .create_committed_resource(
                ResourceDesc::buffer(CONSTANT_BUFFER_SIZE),
                HeapType::Upload,
                ResourceState::GenericRead,
                "global constants",
                None,
            )
            .context("failed to allocate global constant buffer")?;
        self.global_constant = Some(resource);
        Ok(())
    }

    /// Allocates the constant buffer of `object_id`, replacing any previous one.
    ///
    /// The previous allocation is released before the new one is created.
    pub fn allocate_per_object_constant(&mut self, object_id: u32) -> Result<()> {
        if self.object_constants.remove(&object_id).is_some() {
            log::debug!("replacing constant buffer of object {object_id}");
        }
        let resource = self
            .device
            .create_committed_resource(
                ResourceDesc::buffer(CONSTANT_BUFFER_SIZE),
                HeapType::Upload,
                ResourceState::GenericRead,
                &format!("object {object_id} constants"),
                None,
            )
            .with_context(|| format!("failed to allocate constants for object {object_id}"))?;
        self.object_constants.insert(object_id, resource);
        Ok(())
    }

    /// The resource in an occupied slot.
    ///
    /// # Panics
    /// If the slot is empty; a stale handle is a programming error.
    pub fn resource(&self, handle: BufferHandle) -> &GpuResource {
        self.slots(handle.category)
            .get(handle.slot)
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("stale buffer handle {handle:?}"))
    }

    pub fn default_resource(&self, key: ResourceKey) -> Option<&GpuResource> {
        self.defaults.get(&key)
    }

    pub fn global_constant(&self) -> Option<&GpuResource> {
        self.global_constant.as_ref()
    }

    pub fn per_object_constant(&self, object_id: u32) -> Option<&GpuResource> {
        self.object_constants.get(&object_id)
    }

    /// Releases every scratch-upload slot. Returns how many were occupied.
    ///
    /// Call exactly once per frame, after the frame's fence wait returns.
    pub fn release_scratch_upload(&mut self) -> usize {
        let released = self
            .scratch_upload
            .iter_mut()
            .filter_map(Option::take)
            .count();
        log::trace!("released {released} scratch upload buffers");
        released
    }

    pub fn release_upload(&mut self, handle: BufferHandle) {
        assert_eq!(handle.category, PoolCategory::Upload, "not an upload handle");
        self.upload[handle.slot] = None;
    }

    pub fn release_readback(&mut self, handle: BufferHandle) {
        assert_eq!(handle.category, PoolCategory::Readback, "not a readback handle");
        self.readback[handle.slot] = None;
    }

    pub fn release_default(&mut self, key: ResourceKey) -> bool {
        self.defaults.remove(&key).is_some()
    }

    /// Drops every per-object constant buffer (scene teardown).
    pub fn release_object_constants(&mut self) {
        self.object_constants.clear();
    }

    /// Occupied slots in `category`.
    pub fn occupied(&self, category: PoolCategory) -> usize {
        self.slots(category).iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceInit;

    fn pool(scratch: usize) -> (Device, BufferPool) {
        let device = Device::create(DeviceInit::default()).unwrap();
        let pool = device.create_buffer_pool(PoolCapacities {
            scratch_upload: scratch,
            ..PoolCapacities::DEFAULT
        });
        (device, pool)
    }

    #[test]
    fn scratch_allocations_get_distinct_slots() {
        let (_device, mut pool) = pool(4);
        let slots: Vec<usize> = (0..4)
            .map(|i| pool.allocate_scratch_upload(64, &format!("s{i}")).unwrap().slot)
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "pool exhausted")]
    fn scratch_exhaustion_halts_before_allocating() {
        let (device, mut pool) = pool(2);
        pool.allocate_scratch_upload(64, "a").unwrap();
        pool.allocate_scratch_upload(64, "b").unwrap();

        let created = device.resources_created();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pool.allocate_scratch_upload(64, "c").ok();
        }));
        assert_eq!(device.resources_created(), created);
        std::panic::resume_unwind(result.unwrap_err());
    }

    #[test]
    fn released_scratch_slots_are_reused() {
        let (device, mut pool) = pool(3);
        for i in 0..3 {
            pool.allocate_scratch_upload(32, &format!("frame0 {i}")).unwrap();
        }
        assert_eq!(pool.release_scratch_upload(), 3);
        assert_eq!(device.resources_live(), 0);

        let slots: Vec<usize> = (0..3)
            .map(|i| pool.allocate_scratch_upload(32, &format!("frame1 {i}")).unwrap().slot)
            .collect();
        assert_eq!(slots, vec![0, 1, 2]);
    }

    #[test]
    fn first_free_slot_is_reused_after_owner_release() {
        let (_device, mut pool) = pool(4);
        let a = pool.allocate_upload(16, ResourceState::GenericRead, "a").unwrap();
        let _b = pool.allocate_upload(16, ResourceState::GenericRead, "b").unwrap();
        pool.release_upload(a);

        let c = pool.allocate_upload(16, ResourceState::GenericRead, "c").unwrap();
        assert_eq!(c.slot, a.slot);
        assert_eq!(pool.occupied(PoolCategory::Upload), 2);
    }

    #[test]
    fn default_allocation_is_idempotent() {
        let (device, mut pool) = pool(4);
        let desc = ResourceDesc::buffer(256);
        let first = pool
            .allocate_default(ResourceKey::Vertices(7), desc.clone(), ResourceState::CopyDest, "vb", None)
            .unwrap()
            .id();
        pool.default_resource(ResourceKey::Vertices(7)).unwrap().set_state(ResourceState::VertexAndConstantBuffer);

        let second = pool
            .allocate_default(ResourceKey::Vertices(7), desc, ResourceState::CopyDest, "vb", None)
            .unwrap();

        assert_eq!(second.id(), first);
        assert_eq!(second.state(), ResourceState::VertexAndConstantBuffer);
        assert_eq!(device.resources_created(), 1);
    }

    #[test]
    fn per_object_reallocation_frees_the_previous_buffer_first() {
        let (device, mut pool) = pool(4);
        pool.allocate_per_object_constant(3).unwrap();
        let first = pool.per_object_constant(3).unwrap().cell().clone();
        let live = device.resources_live();

        pool.allocate_per_object_constant(3).unwrap();

        assert!(first.is_released());
        assert_eq!(device.resources_live(), live);
        assert_ne!(pool.per_object_constant(3).unwrap().id(), first.id());
    }

    #[test]
    fn readback_starts_as_copy_destination() {
        let (_device, mut pool) = pool(4);
        let handle = pool.allocate_readback(64, "rb").unwrap();
        assert_eq!(pool.resource(handle).state(), ResourceState::CopyDest);
        pool.release_readback(handle);
        assert_eq!(pool.occupied(PoolCategory::Readback), 0);
    }

    #[test]
    fn scratch_pattern_reaches_default_buffer() {
        let (device, mut pool) = pool(4);
        let allocator = device.create_command_allocator("upload");
        let mut stream = device.create_command_stream();
        let mut sync = device.create_frame_synchronizer();
        let pattern: Vec<u8> = (0..=255).collect();

        stream.reset(&allocator);
        let staging = pool.allocate_scratch_upload(256, "pattern staging").unwrap();
        pool.resource(staging).write_bytes(0, &pattern);
        let key = ResourceKey::Vertices(0);
        pool.allocate_default(key, ResourceDesc::buffer(256), ResourceState::CopyDest, "pattern", None)
            .unwrap();
        let dst = pool.default_resource(key).unwrap();
        stream.copy_buffer_region(dst, 0, pool.resource(staging), 0, 256);
        stream.add_transition_barrier(dst, ResourceState::CopyDest, ResourceState::ShaderResource);
        stream.execute_command_list().unwrap();
        let value = sync.update_fence().unwrap();
        sync.wait_for_frame(value).unwrap();
        assert_eq!(pool.release_scratch_upload(), 1);

        assert_eq!(pool.default_resource(key).unwrap().state(), ResourceState::ShaderResource);

        // Read the contents back through a readback buffer.
        let readback = pool.allocate_readback(256, "pattern readback").unwrap();
        let dst = pool.default_resource(key).unwrap();
        stream.reset(&allocator);
        stream.transition_to(dst, ResourceState::CopySource);
        stream.flush_barriers();
        stream.copy_buffer_region(pool.resource(readback), 0, dst, 0, 256);
        stream.execute_command_list().unwrap();
        sync.wait_for_gpu().unwrap();

        assert_eq!(pool.resource(readback).read_bytes(0, 256), pattern);
        device.check_status().unwrap();
    }
}
