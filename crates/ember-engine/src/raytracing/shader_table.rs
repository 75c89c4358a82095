use anyhow::{ensure, Context, Result};

use crate::buffers::GpuResource;
use crate::config::{align_up, SHADER_IDENTIFIER_SIZE, SHADER_RECORD_ALIGNMENT, SHADER_TABLE_ALIGNMENT};
use crate::device::Device;
use crate::gpu::command::ShaderTableRange;
use crate::gpu::resource::{HeapType, ResourceDesc};
use crate::gpu::state::ResourceState;

use super::ShaderIdentifier;

/// A shader identifier followed by its local root arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderRecord {
    pub identifier: ShaderIdentifier,
    pub local_arguments: Vec<u8>,
}

impl ShaderRecord {
    pub fn new(identifier: ShaderIdentifier) -> Self {
        Self {
            identifier,
            local_arguments: Vec::new(),
        }
    }

    pub fn with_arguments(identifier: ShaderIdentifier, local_arguments: &[u8]) -> Self {
        Self {
            identifier,
            local_arguments: local_arguments.to_vec(),
        }
    }
}

/// Tightly packed, fixed-stride array of shader records in upload memory.
#[derive(Debug)]
pub struct ShaderTable {
    buffer: GpuResource,
    stride: u64,
    record_count: u32,
}

impl ShaderTable {
    /// Record stride for records carrying at most `max_arguments` bytes.
    pub fn stride_for(max_arguments: usize) -> u64 {
        align_up(
            (SHADER_IDENTIFIER_SIZE + max_arguments) as u64,
            SHADER_RECORD_ALIGNMENT as u64,
        )
    }

    /// Packs `records` into a new upload buffer.
    pub fn build(device: &Device, name: &str, records: &[ShaderRecord]) -> Result<Self> {
        ensure!(!records.is_empty(), "shader table '{name}' has no records");

        let max_arguments = records
            .iter()
            .map(|r| r.local_arguments.len())
            .max()
            .unwrap_or(0);
        let stride = Self::stride_for(max_arguments);
        let size = align_up(stride * records.len() as u64, SHADER_TABLE_ALIGNMENT);

        let buffer = device
            .create_committed_resource(
                ResourceDesc::buffer(size),
                HeapType::Upload,
                ResourceState::GenericRead,
                name,
                None,
            )
            .with_context(|| format!("failed to allocate shader table '{name}'"))?;

        let mut bytes = vec![0u8; size as usize];
        for (i, record) in records.iter().enumerate() {
            let at = i * stride as usize;
            bytes[at..at + SHADER_IDENTIFIER_SIZE].copy_from_slice(&record.identifier);
            let args = at + SHADER_IDENTIFIER_SIZE;
            bytes[args..args + record.local_arguments.len()].copy_from_slice(&record.local_arguments);
        }
        buffer.write_bytes(0, &bytes);

        log::debug!(
            "built shader table '{name}': {} records, stride {stride}, {size} bytes",
            records.len()
        );

        Ok(Self {
            buffer,
            stride,
            record_count: records.len() as u32,
        })
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    pub fn size(&self) -> u64 {
        self.stride * self.record_count as u64
    }

    pub fn buffer(&self) -> &GpuResource {
        &self.buffer
    }

    pub(crate) fn range(&self) -> ShaderTableRange {
        ShaderTableRange {
            buffer: self.buffer.cell().clone(),
            offset: 0,
            size: self.size(),
            stride: self.stride,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceInit;

    #[test]
    fn stride_rounds_up_to_record_alignment() {
        assert_eq!(ShaderTable::stride_for(0), 32);
        assert_eq!(ShaderTable::stride_for(16), 64);
        assert_eq!(ShaderTable::stride_for(32), 64);
        assert_eq!(ShaderTable::stride_for(33), 96);
    }

    #[test]
    fn records_are_packed_at_fixed_stride() {
        let device = Device::create(DeviceInit::default()).unwrap();
        let albedo: Vec<u8> = [0.5f32, 0.25, 1.0, 1.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let records = [
            ShaderRecord::with_arguments([1; 32], &albedo),
            ShaderRecord::new([2; 32]),
            ShaderRecord::with_arguments([3; 32], &albedo),
        ];

        let table = ShaderTable::build(&device, "hit groups", &records).unwrap();
        let bytes = table.buffer().read_bytes(0, table.size() as usize);

        assert_eq!(table.stride(), 64);
        assert_eq!(table.buffer().size() % SHADER_TABLE_ALIGNMENT, 0);
        assert_eq!(&bytes[64..96], &[2; 32]);
        assert_eq!(&bytes[96..112], &[0; 16]);
        assert_eq!(&bytes[160..176], albedo.as_slice());
    }

    #[test]
    fn empty_table_is_rejected() {
        let device = Device::create(DeviceInit::default()).unwrap();
        assert!(ShaderTable::build(&device, "empty", &[]).is_err());
    }
}
