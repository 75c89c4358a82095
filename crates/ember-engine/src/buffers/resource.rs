use std::sync::Arc;

use bytemuck::Pod;

use crate::gpu::command::{IndexBufferView, IndexFormat, VertexBufferView};
use crate::gpu::resource::{HeapType, ResourceCell, ResourceDesc, ResourceId};
use crate::gpu::state::ResourceState;

/// Exclusive owner of one committed GPU allocation.
///
/// Dropping the owner releases the allocation. Command lists already recorded
/// keep the backing storage alive, but the GPU faults if it touches a released
/// resource.
pub struct GpuResource {
    cell: Arc<ResourceCell>,
}

impl GpuResource {
    pub(crate) fn new(cell: ResourceCell) -> Self {
        Self {
            cell: Arc::new(cell),
        }
    }

    pub(crate) fn cell(&self) -> &Arc<ResourceCell> {
        &self.cell
    }

    pub fn id(&self) -> ResourceId {
        self.cell.id()
    }

    pub fn name(&self) -> &str {
        self.cell.name()
    }

    pub fn desc(&self) -> &ResourceDesc {
        self.cell.desc()
    }

    pub fn heap(&self) -> HeapType {
        self.cell.heap()
    }

    pub fn size(&self) -> u64 {
        self.cell.desc().byte_size()
    }

    /// Logical state as of the last flushed barrier.
    pub fn state(&self) -> ResourceState {
        self.cell.logical_state()
    }

    pub(crate) fn set_state(&self, state: ResourceState) {
        self.cell.set_logical_state(state);
    }

    /// Synchronous copy of `bytes` into mapped upload memory at `offset`.
    ///
    /// # Panics
    /// If the resource is not on the upload heap or the range is out of bounds.
    pub fn write_bytes(&self, offset: u64, bytes: &[u8]) {
        assert_eq!(
            self.heap(),
            HeapType::Upload,
            "'{}' is not CPU-writable",
            self.name()
        );
        let start = offset as usize;
        let mut data = self.cell.data();
        assert!(
            start + bytes.len() <= data.len(),
            "write of {} bytes at {offset} overflows '{}' ({} bytes)",
            bytes.len(),
            self.name(),
            data.len()
        );
        data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn write_pod<T: Pod>(&self, offset: u64, value: &T) {
        self.write_bytes(offset, bytemuck::bytes_of(value));
    }

    /// Reads mapped upload or readback memory.
    ///
    /// # Panics
    /// If the resource is GPU-resident only or the range is out of bounds.
    pub fn read_bytes(&self, offset: u64, len: usize) -> Vec<u8> {
        assert!(self.heap().is_cpu_visible(), "'{}' is not CPU-readable", self.name());
        let start = offset as usize;
        let data = self.cell.data();
        assert!(start + len <= data.len(), "read overflows '{}'", self.name());
        data[start..start + len].to_vec()
    }

    pub fn vertex_buffer_view(&self, stride: u32) -> VertexBufferView {
        VertexBufferView {
            buffer: self.cell.clone(),
            stride,
            size: self.size(),
        }
    }

    pub fn index_buffer_view(&self, format: IndexFormat) -> IndexBufferView {
        IndexBufferView {
            buffer: self.cell.clone(),
            format,
            size: self.size(),
        }
    }
}

impl Drop for GpuResource {
    fn drop(&mut self) {
        self.cell.mark_released();
    }
}

impl std::fmt::Debug for GpuResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuResource")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("heap", &self.heap())
            .field("state", &self.state())
            .finish()
    }
}
