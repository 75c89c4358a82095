use std::sync::Arc;

use crate::buffers::GpuResource;
use crate::command::CommandStream;
use crate::config::ViewCapacities;
use crate::gpu::descriptor::{Descriptor, DescriptorHandle, DescriptorHeap, SamplerDesc, ViewDesc};

use super::ViewKind;

/// Fixed-capacity descriptor tables, one per [`ViewKind`].
///
/// Slots are never compacted, so a handle stays valid for the manager's lifetime.
pub struct ViewTableManager {
    heaps: Vec<Arc<DescriptorHeap>>,
    next_slot: [u32; ViewKind::ALL.len()],
    capacities: ViewCapacities,
}

impl ViewTableManager {
    pub(crate) fn new(capacities: ViewCapacities) -> Self {
        let heaps = ViewKind::ALL
            .iter()
            .map(|&kind| Arc::new(DescriptorHeap::new(kind, capacities.get(kind))))
            .collect();

        log::debug!("view tables created: {capacities:?}");

        Self {
            heaps,
            next_slot: [0; ViewKind::ALL.len()],
            capacities,
        }
    }

    pub fn capacity(&self, kind: ViewKind) -> u32 {
        self.capacities.get(kind)
    }

    pub fn capacities(&self) -> &ViewCapacities {
        &self.capacities
    }

    /// Number of slots handed out by [`Self::allocate`] for `kind`.
    pub fn allocated(&self, kind: ViewKind) -> u32 {
        self.next_slot[kind.index()]
    }

    /// Hands out the next unused slot of `kind`, or `None` once the table is full.
    pub fn try_allocate(&mut self, kind: ViewKind) -> Option<u32> {
        let next = &mut self.next_slot[kind.index()];
        if *next >= self.capacities.get(kind) {
            return None;
        }
        let slot = *next;
        *next += 1;
        Some(slot)
    }

    /// Hands out the next unused slot of `kind`.
    ///
    /// # Panics
    /// If every slot of `kind` is taken.
    pub fn allocate(&mut self, kind: ViewKind) -> u32 {
        match self.try_allocate(kind) {
            Some(slot) => slot,
            None => {
                log::error!("{kind:?} view table exhausted ({} slots)", self.capacity(kind));
                panic!("{kind:?} view table exhausted");
            }
        }
    }

    /// Returns the descriptor handle at (`kind`, `slot`).
    ///
    /// # Panics
    /// If `slot >= capacity(kind)`.
    pub fn handle(&self, kind: ViewKind, slot: u32) -> DescriptorHandle {
        let capacity = self.capacity(kind);
        assert!(
            slot < capacity,
            "{kind:?} view slot {slot} out of range (capacity {capacity})"
        );
        DescriptorHandle {
            heap: self.heaps[kind.index()].clone(),
            slot,
        }
    }

    /// Writes a view of `resource` into (`kind`, `slot`).
    ///
    /// # Panics
    /// If the slot is out of range or `view` cannot live in a `kind` table.
    pub fn create_view(&self, kind: ViewKind, slot: u32, resource: &GpuResource, view: ViewDesc) {
        assert!(view.fits(kind), "{view:?} cannot be written to a {kind:?} table");
        let handle = self.handle(kind, slot);
        handle.heap.write(
            slot,
            Descriptor::Resource {
                resource: resource.cell().clone(),
                view,
            },
        );
    }

    pub fn create_sampler(&self, slot: u32, desc: SamplerDesc) {
        let handle = self.handle(ViewKind::Sampler, slot);
        handle.heap.write(slot, Descriptor::Sampler(desc));
    }

    /// Whether (`kind`, `slot`) currently holds a descriptor.
    pub fn is_populated(&self, kind: ViewKind, slot: u32) -> bool {
        self.handle(kind, slot).read().is_some()
    }

    /// Binds the table starting at (`kind`, `slot`) for the next draw or dispatch.
    pub fn bind_views_for_draw(&self, stream: &mut CommandStream, kind: ViewKind, slot: u32) {
        stream.set_descriptor_table(self.handle(kind, slot));
    }

    pub fn bind_samplers(&self, stream: &mut CommandStream, slot: u32) {
        self.bind_views_for_draw(stream, ViewKind::Sampler, slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> ViewCapacities {
        ViewCapacities {
            per_object_cbv: 4,
            ..ViewCapacities::DEFAULT
        }
    }

    #[test]
    fn allocation_fills_table_then_rejects() {
        let mut views = ViewTableManager::new(small());
        let slots: Vec<u32> = (0..4)
            .map(|_| views.try_allocate(ViewKind::PerObjectCbv).unwrap())
            .collect();

        assert_eq!(slots, vec![0, 1, 2, 3]);
        assert_eq!(*slots.last().unwrap(), views.capacity(ViewKind::PerObjectCbv) - 1);
        assert_eq!(views.try_allocate(ViewKind::PerObjectCbv), None);
    }

    #[test]
    fn kinds_have_independent_counters() {
        let mut views = ViewTableManager::new(small());
        views.allocate(ViewKind::PerObjectCbv);
        views.allocate(ViewKind::PerObjectCbv);

        assert_eq!(views.allocate(ViewKind::PerObjectSrv), 0);
        assert_eq!(views.allocated(ViewKind::PerObjectCbv), 2);
    }

    #[test]
    #[should_panic(expected = "view table exhausted")]
    fn allocate_past_capacity_panics() {
        let mut views = ViewTableManager::new(small());
        for _ in 0..5 {
            views.allocate(ViewKind::PerObjectCbv);
        }
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn handle_out_of_range_panics() {
        let views = ViewTableManager::new(small());
        views.handle(ViewKind::Dsv, 1);
    }

    #[test]
    fn handles_are_stable() {
        let views = ViewTableManager::new(small());
        let a = views.handle(ViewKind::Sampler, 3);
        views.create_sampler(3, SamplerDesc::default());

        assert_eq!(a, views.handle(ViewKind::Sampler, 3));
        assert!(views.is_populated(ViewKind::Sampler, 3));
        assert!(!views.is_populated(ViewKind::Sampler, 2));
    }
}
