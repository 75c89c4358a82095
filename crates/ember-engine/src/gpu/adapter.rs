use crate::config::{SHADER_IDENTIFIER_SIZE, SHADER_RECORD_ALIGNMENT, SHADER_TABLE_ALIGNMENT};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AdapterKind {
    Hardware,
    /// CPU reference implementation.
    Software,
}

/// Description of an adapter the device can be created on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub kind: AdapterKind,
    pub supports_ray_tracing: bool,
    pub shader_identifier_size: usize,
    pub shader_record_alignment: usize,
    pub shader_table_alignment: u64,
}

impl AdapterInfo {
    fn reference() -> Self {
        Self {
            name: "Ember Software Reference Adapter".to_string(),
            kind: AdapterKind::Software,
            supports_ray_tracing: true,
            shader_identifier_size: SHADER_IDENTIFIER_SIZE,
            shader_record_alignment: SHADER_RECORD_ALIGNMENT,
            shader_table_alignment: SHADER_TABLE_ALIGNMENT,
        }
    }
}

/// Lists every adapter available to this process.
pub fn enumerate_adapters() -> Vec<AdapterInfo> {
    vec![AdapterInfo::reference()]
}
