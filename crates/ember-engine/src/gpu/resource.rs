use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::config::{align_up, TEXTURE_PITCH_ALIGNMENT, TEXTURE_PLACEMENT_ALIGNMENT};

use super::accel::AccelData;
use super::state::ResourceState;

/// Device-wide unique resource identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u64);

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Memory heap a committed resource lives in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HeapType {
    /// CPU-write, GPU-read.
    Upload,
    /// GPU-write, CPU-read.
    Readback,
    /// GPU-resident only.
    Default,
}

impl HeapType {
    pub fn is_cpu_visible(self) -> bool {
        !matches!(self, HeapType::Default)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Format {
    Rgba8Unorm,
    D32Float,
}

impl Format {
    pub fn bytes_per_pixel(self) -> u64 {
        match self {
            Format::Rgba8Unorm | Format::D32Float => 4,
        }
    }

    pub fn is_color(self) -> bool {
        self == Format::Rgba8Unorm
    }

    pub fn is_depth(self) -> bool {
        self == Format::D32Float
    }
}

/// Optimized clear value for render targets and depth buffers.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    Depth(f32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceDesc {
    Buffer {
        size: u64,
    },
    Texture2D {
        width: u32,
        height: u32,
        mip_levels: u32,
        format: Format,
    },
}

impl ResourceDesc {
    pub fn buffer(size: u64) -> Self {
        ResourceDesc::Buffer { size }
    }

    pub fn texture_2d(width: u32, height: u32, mip_levels: u32, format: Format) -> Self {
        ResourceDesc::Texture2D {
            width,
            height,
            mip_levels: mip_levels.max(1),
            format,
        }
    }

    pub fn is_texture(&self) -> bool {
        matches!(self, ResourceDesc::Texture2D { .. })
    }

    pub fn subresource_count(&self) -> u32 {
        match self {
            ResourceDesc::Buffer { .. } => 1,
            ResourceDesc::Texture2D { mip_levels, .. } => *mip_levels,
        }
    }

    /// Width and height of mip `subresource`. Buffers report `(size, 1)`.
    pub fn extent(&self, subresource: u32) -> (u32, u32) {
        match self {
            ResourceDesc::Buffer { size } => (*size as u32, 1),
            ResourceDesc::Texture2D { width, height, .. } => {
                ((*width >> subresource).max(1), (*height >> subresource).max(1))
            }
        }
    }

    /// Offset of `subresource` inside the device's tightly packed storage.
    pub(crate) fn storage_offset(&self, subresource: u32) -> u64 {
        (0..subresource).map(|s| self.subresource_size(s)).sum()
    }

    pub(crate) fn subresource_size(&self, subresource: u32) -> u64 {
        match self {
            ResourceDesc::Buffer { size } => *size,
            ResourceDesc::Texture2D { format, .. } => {
                let (w, h) = self.extent(subresource);
                w as u64 * h as u64 * format.bytes_per_pixel()
            }
        }
    }

    pub fn byte_size(&self) -> u64 {
        (0..self.subresource_count())
            .map(|s| self.subresource_size(s))
            .sum()
    }

    pub fn format(&self) -> Option<Format> {
        match self {
            ResourceDesc::Buffer { .. } => None,
            ResourceDesc::Texture2D { format, .. } => Some(*format),
        }
    }
}

/// Layout of one texture subresource inside a linear (upload) buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SubresourceFootprint {
    pub offset: u64,
    pub width: u32,
    pub height: u32,
    /// Pitch between rows in the linear buffer (aligned).
    pub row_pitch: u64,
    /// Bytes of pixel data per row (unaligned).
    pub row_size: u64,
}

impl SubresourceFootprint {
    pub fn total_bytes(&self) -> u64 {
        self.row_pitch * (self.height as u64 - 1) + self.row_size
    }
}

/// Computes the linear-buffer layout for `count` subresources starting at `first`.
///
/// Returns the footprints and the total number of bytes an upload buffer must hold.
pub fn copyable_footprints(
    desc: &ResourceDesc,
    first: u32,
    count: u32,
) -> (Vec<SubresourceFootprint>, u64) {
    let Some(format) = desc.format() else {
        let size = desc.byte_size();
        let fp = SubresourceFootprint {
            offset: 0,
            width: size as u32,
            height: 1,
            row_pitch: size,
            row_size: size,
        };
        return (vec![fp], size);
    };

    let mut offset = 0;
    let mut footprints = Vec::with_capacity(count as usize);
    for subresource in first..first + count {
        offset = align_up(offset, TEXTURE_PLACEMENT_ALIGNMENT);
        let (width, height) = desc.extent(subresource);
        let row_size = width as u64 * format.bytes_per_pixel();
        let fp = SubresourceFootprint {
            offset,
            width,
            height,
            row_pitch: align_up(row_size, TEXTURE_PITCH_ALIGNMENT),
            row_size,
        };
        offset += fp.total_bytes();
        footprints.push(fp);
    }
    (footprints, offset)
}

/// Counters shared by every resource created on one device.
#[derive(Debug, Default)]
pub(crate) struct ResourceCounters {
    created: AtomicU64,
    live: AtomicU64,
}

impl ResourceCounters {
    pub(crate) fn created(&self) -> u64 {
        self.created.load(Ordering::Acquire)
    }

    pub(crate) fn live(&self) -> u64 {
        self.live.load(Ordering::Acquire)
    }
}

/// Device-side storage of a committed resource.
///
/// Shared between its CPU owner and any command list referencing it. The
/// logical state is written only by the CPU; the actual state only by the GPU
/// timeline.
pub(crate) struct ResourceCell {
    id: ResourceId,
    desc: ResourceDesc,
    heap: HeapType,
    name: String,
    logical: AtomicU8,
    actual: AtomicU8,
    released: AtomicBool,
    data: Mutex<Vec<u8>>,
    accel: Mutex<Option<Arc<AccelData>>>,
    counters: Arc<ResourceCounters>,
}

impl ResourceCell {
    pub(crate) fn new(
        id: ResourceId,
        desc: ResourceDesc,
        heap: HeapType,
        state: ResourceState,
        name: &str,
        clear: Option<ClearValue>,
        counters: Arc<ResourceCounters>,
    ) -> Self {
        let size = desc.byte_size() as usize;
        let data = match clear {
            Some(ClearValue::Color(c)) => rgba8(c).repeat(size / 4),
            Some(ClearValue::Depth(d)) => d.to_le_bytes().repeat(size / 4),
            None => vec![0; size],
        };

        counters.created.fetch_add(1, Ordering::AcqRel);
        counters.live.fetch_add(1, Ordering::AcqRel);

        Self {
            id,
            desc,
            heap,
            name: name.to_string(),
            logical: AtomicU8::new(state as u8),
            actual: AtomicU8::new(state as u8),
            released: AtomicBool::new(false),
            data: Mutex::new(data),
            accel: Mutex::new(None),
            counters,
        }
    }

    pub(crate) fn id(&self) -> ResourceId {
        self.id
    }

    pub(crate) fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    pub(crate) fn heap(&self) -> HeapType {
        self.heap
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn logical_state(&self) -> ResourceState {
        ResourceState::from_u8(self.logical.load(Ordering::Acquire))
    }

    pub(crate) fn set_logical_state(&self, state: ResourceState) {
        self.logical.store(state as u8, Ordering::Release);
    }

    pub(crate) fn actual_state(&self) -> ResourceState {
        ResourceState::from_u8(self.actual.load(Ordering::Acquire))
    }

    pub(crate) fn set_actual_state(&self, state: ResourceState) {
        self.actual.store(state as u8, Ordering::Release);
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub(crate) fn mark_released(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.counters.live.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub(crate) fn data(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock()
    }

    pub(crate) fn accel(&self) -> Option<Arc<AccelData>> {
        self.accel.lock().clone()
    }

    pub(crate) fn set_accel(&self, accel: AccelData) {
        *self.accel.lock() = Some(Arc::new(accel));
    }
}

impl std::fmt::Debug for ResourceCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCell")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("heap", &self.heap)
            .field("desc", &self.desc)
            .finish()
    }
}

pub(crate) fn rgba8(color: [f32; 4]) -> [u8; 4] {
    color.map(|c| (c.clamp(0.0, 1.0) * 255.0 + 0.5) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footprints_align_rows_and_placement() {
        let desc = ResourceDesc::texture_2d(10, 4, 2, Format::Rgba8Unorm);
        let (fps, total) = copyable_footprints(&desc, 0, 2);

        assert_eq!(fps[0].row_size, 40);
        assert_eq!(fps[0].row_pitch, 256);
        assert_eq!(fps[0].total_bytes(), 256 * 3 + 40);

        assert_eq!(fps[1].offset, 1024);
        assert_eq!((fps[1].width, fps[1].height), (5, 2));
        assert_eq!(total, 1024 + 256 + 20);
    }

    #[test]
    fn texture_storage_is_tightly_packed_per_mip() {
        let desc = ResourceDesc::texture_2d(8, 8, 3, Format::Rgba8Unorm);
        assert_eq!(desc.storage_offset(1), 8 * 8 * 4);
        assert_eq!(desc.storage_offset(2), 8 * 8 * 4 + 4 * 4 * 4);
        assert_eq!(desc.byte_size(), (64 + 16 + 4) * 4);
    }

    #[test]
    fn clear_value_initializes_render_target_memory() {
        let counters = Arc::new(ResourceCounters::default());
        let cell = ResourceCell::new(
            ResourceId(1),
            ResourceDesc::texture_2d(2, 1, 1, Format::Rgba8Unorm),
            HeapType::Default,
            ResourceState::RenderTarget,
            "rt",
            Some(ClearValue::Color([0.0, 0.2, 0.4, 1.0])),
            counters.clone(),
        );
        assert_eq!(&cell.data()[..4], &[0, 51, 102, 255]);
        assert_eq!(counters.live(), 1);
        cell.mark_released();
        cell.mark_released();
        assert_eq!(counters.live(), 0);
    }
}
