//! Buffer types and descriptors.

use bitflags::bitflags;

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsage: u32 {
        /// Buffer can be used as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 1;
        /// Buffer can be used as a constant (uniform) buffer.
        const CONSTANT = 1 << 2;
        /// Buffer can be read from shaders (structured/byte-address/texel).
        const SHADER_READ = 1 << 3;
        /// Buffer can be written from shaders.
        const SHADER_WRITE = 1 << 4;
        /// Buffer can hold indirect draw/dispatch arguments.
        const INDIRECT = 1 << 5;
        /// Buffer can be used for conditional rendering.
        const PREDICATION = 1 << 6;
        /// Buffer can back acceleration structures and shader binding tables.
        const RAY_TRACING = 1 << 7;
    }
}

/// Residency class of a resource's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryType {
    /// Device local, not host visible.
    #[default]
    Private,
    /// Host visible, write combined, persistently mapped.
    Upload,
    /// Host visible, cached, persistently mapped.
    Readback,
}

impl MemoryType {
    /// Whether memory of this type is mapped for CPU access.
    pub fn is_host_visible(self) -> bool {
        !matches!(self, Self::Private)
    }
}

bitflags! {
    /// Logical buffer states tracked for barrier generation.
    ///
    /// An empty set is the undefined/common state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferStates: u32 {
        const VERTEX_BUFFER = 1 << 0;
        const INDEX_BUFFER = 1 << 1;
        const CONSTANT_BUFFER = 1 << 2;
        const INDIRECT_ARGUMENT = 1 << 3;
        const SHADER_RESOURCE = 1 << 4;
        const UNORDERED_ACCESS = 1 << 5;
        const COPY_SOURCE = 1 << 6;
        const COPY_DEST = 1 << 7;
        const PREDICATION = 1 << 8;
        const ACCELERATION_STRUCTURE_READ = 1 << 9;
        const ACCELERATION_STRUCTURE_WRITE = 1 << 10;
        const ACCELERATION_STRUCTURE_BUILD_INPUT = 1 << 11;
    }
}

impl BufferStates {
    /// The undefined state.
    pub const UNDEFINED: Self = Self::empty();
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Usage flags.
    pub usage: BufferUsage,
    /// Memory residency.
    pub memory_type: MemoryType,
}

impl BufferDescriptor {
    /// Create a new device-local buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
            memory_type: MemoryType::Private,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the memory type.
    pub fn with_memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = memory_type;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_descriptor_builder() {
        let desc = BufferDescriptor::new(256, BufferUsage::VERTEX | BufferUsage::INDEX)
            .with_label("mesh")
            .with_memory_type(MemoryType::Upload);
        assert_eq!(desc.size, 256);
        assert_eq!(desc.label.as_deref(), Some("mesh"));
        assert!(desc.memory_type.is_host_visible());
        assert!(desc.usage.contains(BufferUsage::INDEX));
    }

    #[test]
    fn test_buffer_states_default_is_undefined() {
        assert_eq!(BufferStates::default(), BufferStates::UNDEFINED);
        assert!(BufferStates::UNDEFINED.is_empty());
    }
}
