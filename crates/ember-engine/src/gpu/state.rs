use std::fmt;

/// Usage state of a GPU resource.
///
/// A resource is in exactly one state at a time. Moving between states requires
/// a transition barrier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResourceState {
    Common = 0,
    Present,
    RenderTarget,
    CopySource,
    CopyDest,
    ShaderResource,
    UnorderedAccess,
    VertexAndConstantBuffer,
    IndexBuffer,
    GenericRead,
    DepthWrite,
    DepthRead,
    AccelerationStructure,
}

impl ResourceState {
    const ALL: [ResourceState; 13] = [
        ResourceState::Common,
        ResourceState::Present,
        ResourceState::RenderTarget,
        ResourceState::CopySource,
        ResourceState::CopyDest,
        ResourceState::ShaderResource,
        ResourceState::UnorderedAccess,
        ResourceState::VertexAndConstantBuffer,
        ResourceState::IndexBuffer,
        ResourceState::GenericRead,
        ResourceState::DepthWrite,
        ResourceState::DepthRead,
        ResourceState::AccelerationStructure,
    ];

    #[inline]
    pub(crate) fn from_u8(raw: u8) -> Self {
        Self::ALL[raw as usize]
    }

    /// States a shader may read a resource in.
    pub fn is_shader_readable(self) -> bool {
        matches!(
            self,
            ResourceState::ShaderResource
                | ResourceState::GenericRead
                | ResourceState::VertexAndConstantBuffer
                | ResourceState::UnorderedAccess
        )
    }

    /// States a copy may read from.
    pub fn is_copy_readable(self) -> bool {
        matches!(self, ResourceState::CopySource | ResourceState::GenericRead)
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_memory_is_copy_readable_without_transition() {
        assert!(ResourceState::GenericRead.is_copy_readable());
        assert!(!ResourceState::CopyDest.is_copy_readable());
    }

    #[test]
    fn render_target_is_not_shader_readable() {
        assert!(!ResourceState::RenderTarget.is_shader_readable());
        assert!(ResourceState::ShaderResource.is_shader_readable());
    }
}
