use std::sync::Arc;

use parking_lot::RwLock;

use crate::views::ViewKind;

use super::resource::ResourceCell;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Filter {
    Point,
    Linear,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddressMode {
    Wrap,
    Clamp,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SamplerDesc {
    pub filter: Filter,
    pub address: AddressMode,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: Filter::Linear,
            address: AddressMode::Clamp,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SrvDimension {
    Texture2D,
    Buffer {
        first_element: u64,
        num_elements: u64,
        stride: u64,
    },
    AccelerationStructure,
}

/// How a resource is viewed by a pipeline stage.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ViewDesc {
    ConstantBuffer { offset: u64, size: u64 },
    ShaderResource(SrvDimension),
    UnorderedAccess,
    RenderTarget,
    DepthStencil,
}

impl ViewDesc {
    /// View kinds a descriptor of this shape may be written into.
    pub(crate) fn fits(&self, kind: ViewKind) -> bool {
        match self {
            ViewDesc::ConstantBuffer { .. } => {
                matches!(kind, ViewKind::GlobalCbv | ViewKind::PerObjectCbv)
            }
            ViewDesc::ShaderResource(_) => {
                matches!(kind, ViewKind::GlobalSrv | ViewKind::PerObjectSrv)
            }
            ViewDesc::UnorderedAccess => kind == ViewKind::Uav,
            ViewDesc::RenderTarget => kind == ViewKind::Rtv,
            ViewDesc::DepthStencil => kind == ViewKind::Dsv,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Descriptor {
    Resource {
        resource: Arc<ResourceCell>,
        view: ViewDesc,
    },
    Sampler(SamplerDesc),
}

impl Descriptor {
    pub(crate) fn resource(&self) -> Option<(&Arc<ResourceCell>, ViewDesc)> {
        match self {
            Descriptor::Resource { resource, view } => Some((resource, *view)),
            Descriptor::Sampler(_) => None,
        }
    }
}

/// Fixed-capacity descriptor table for a single view kind.
///
/// The GPU timeline reads descriptors at execution time, so the table is shared.
#[derive(Debug)]
pub(crate) struct DescriptorHeap {
    kind: ViewKind,
    slots: RwLock<Vec<Option<Descriptor>>>,
}

impl DescriptorHeap {
    pub(crate) fn new(kind: ViewKind, capacity: u32) -> Self {
        Self {
            kind,
            slots: RwLock::new(vec![None; capacity as usize]),
        }
    }

    pub(crate) fn kind(&self) -> ViewKind {
        self.kind
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.slots.read().len() as u32
    }

    pub(crate) fn write(&self, slot: u32, descriptor: Descriptor) {
        self.slots.write()[slot as usize] = Some(descriptor);
    }

    pub(crate) fn read(&self, slot: u32) -> Option<Descriptor> {
        self.slots.read().get(slot as usize).cloned().flatten()
    }
}

/// Opaque handle naming one descriptor: a (kind, slot) pair in a view table.
///
/// Handles are stable for the lifetime of the table.
#[derive(Clone)]
pub struct DescriptorHandle {
    pub(crate) heap: Arc<DescriptorHeap>,
    pub(crate) slot: u32,
}

impl DescriptorHandle {
    pub fn kind(&self) -> ViewKind {
        self.heap.kind()
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub(crate) fn read(&self) -> Option<Descriptor> {
        self.heap.read(self.slot)
    }
}

impl std::fmt::Debug for DescriptorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DescriptorHandle({:?}, {})", self.kind(), self.slot)
    }
}

impl PartialEq for DescriptorHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.heap, &other.heap) && self.slot == other.slot
    }
}

impl Eq for DescriptorHandle {}
