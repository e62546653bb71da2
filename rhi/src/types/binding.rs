//! Binding layout definitions.
//!
//! A bind group layout is an ordered list of slots. Every slot is a resource
//! kind plus the shader stages that can see it. Bind groups created from a
//! layout always populate every slot, falling back to the device's null
//! resources for slots without an entry.

use super::{PixelFormat, SamplerDescriptor, TextureViewDimension};

bitflags::bitflags! {
    /// Shader stages that can access a binding or push constant range.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShaderStages: u32 {
        /// Vertex shader stage.
        const VERTEX = 1 << 0;
        /// Fragment shader stage.
        const FRAGMENT = 1 << 1;
        /// Compute shader stage.
        const COMPUTE = 1 << 2;
        /// Task/amplification shader stage.
        const AMPLIFICATION = 1 << 3;
        /// Mesh shader stage.
        const MESH = 1 << 4;
        /// Every stage.
        const ALL = Self::VERTEX.bits()
            | Self::FRAGMENT.bits()
            | Self::COMPUTE.bits()
            | Self::AMPLIFICATION.bits()
            | Self::MESH.bits();
    }
}

/// How a buffer slot is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferBindingType {
    /// Uniform buffer.
    #[default]
    Constant,
    /// Read-only storage buffer.
    ShaderRead,
    /// Read-write storage buffer.
    ShaderReadWrite,
}

/// Kind of sampler a slot expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplerBindingType {
    #[default]
    Filtering,
    NonFiltering,
    Comparison,
}

/// Component type of a sampled texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureSampleType {
    #[default]
    Float,
    UnfilterableFloat,
    Depth,
    Sint,
    Uint,
}

/// Access mode of a storage texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageTextureAccess {
    #[default]
    WriteOnly,
    ReadOnly,
    ReadWrite,
}

/// Resource kind of a binding slot.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingType {
    Buffer {
        ty: BufferBindingType,
        has_dynamic_offset: bool,
    },
    Sampler(SamplerBindingType),
    /// Immutable sampler baked into the layout. Bind groups never write it.
    StaticSampler(SamplerDescriptor),
    Texture {
        sample_type: TextureSampleType,
        view_dimension: TextureViewDimension,
        multisampled: bool,
    },
    StorageTexture {
        access: StorageTextureAccess,
        format: PixelFormat,
        view_dimension: TextureViewDimension,
    },
    AccelerationStructure,
}

/// Describes a single binding slot in a layout.
#[derive(Debug, Clone, PartialEq)]
pub struct BindGroupLayoutEntry {
    /// Register index as declared in the shader.
    pub binding: u32,
    /// Shader stages that can access this binding.
    pub visibility: ShaderStages,
    pub ty: BindingType,
    /// Array length; `0` is treated as `1`.
    pub count: u32,
}

impl BindGroupLayoutEntry {
    /// Create a new entry visible to all stages.
    pub fn new(binding: u32, ty: BindingType) -> Self {
        Self {
            binding,
            visibility: ShaderStages::ALL,
            ty,
            count: 1,
        }
    }

    pub fn constant_buffer(binding: u32) -> Self {
        Self::new(
            binding,
            BindingType::Buffer {
                ty: BufferBindingType::Constant,
                has_dynamic_offset: false,
            },
        )
    }

    pub fn storage_buffer(binding: u32, read_only: bool) -> Self {
        let ty = if read_only {
            BufferBindingType::ShaderRead
        } else {
            BufferBindingType::ShaderReadWrite
        };
        Self::new(
            binding,
            BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
            },
        )
    }

    pub fn texture(binding: u32) -> Self {
        Self::new(
            binding,
            BindingType::Texture {
                sample_type: TextureSampleType::Float,
                view_dimension: TextureViewDimension::View2D,
                multisampled: false,
            },
        )
    }

    pub fn storage_texture(binding: u32, format: PixelFormat) -> Self {
        Self::new(
            binding,
            BindingType::StorageTexture {
                access: StorageTextureAccess::ReadWrite,
                format,
                view_dimension: TextureViewDimension::View2D,
            },
        )
    }

    pub fn sampler(binding: u32) -> Self {
        Self::new(binding, BindingType::Sampler(SamplerBindingType::Filtering))
    }

    pub fn static_sampler(binding: u32, descriptor: SamplerDescriptor) -> Self {
        Self::new(binding, BindingType::StaticSampler(descriptor))
    }

    /// Set the shader stage visibility.
    pub fn with_visibility(mut self, visibility: ShaderStages) -> Self {
        self.visibility = visibility;
        self
    }

    /// Turn the slot into an array.
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    /// Enable dynamic offsets on a buffer slot. No effect on other kinds.
    pub fn with_dynamic_offset(mut self) -> Self {
        if let BindingType::Buffer {
            has_dynamic_offset, ..
        } = &mut self.ty
        {
            *has_dynamic_offset = true;
        }
        self
    }

    /// Number of descriptors in the slot.
    pub fn descriptor_count(&self) -> u32 {
        self.count.max(1)
    }
}

/// Descriptor for creating a bind group layout.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BindGroupLayoutDescriptor {
    pub label: Option<String>,
    pub entries: Vec<BindGroupLayoutEntry>,
}

impl BindGroupLayoutDescriptor {
    /// Create a new empty layout descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding entry to the layout.
    pub fn with_entry(mut self, entry: BindGroupLayoutEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Set a debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// A push constant range. Offsets are assigned in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantRange {
    /// Size in bytes.
    pub size: u32,
    pub visibility: ShaderStages,
}

impl PushConstantRange {
    pub fn new(size: u32, visibility: ShaderStages) -> Self {
        Self { size, visibility }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_builder() {
        let desc = BindGroupLayoutDescriptor::new()
            .with_label("material")
            .with_entry(BindGroupLayoutEntry::constant_buffer(0).with_dynamic_offset())
            .with_entry(BindGroupLayoutEntry::texture(0).with_visibility(ShaderStages::FRAGMENT))
            .with_entry(BindGroupLayoutEntry::sampler(0).with_count(0));

        assert_eq!(desc.entries.len(), 3);
        assert_eq!(
            desc.entries[0].ty,
            BindingType::Buffer {
                ty: BufferBindingType::Constant,
                has_dynamic_offset: true
            }
        );
        assert_eq!(desc.entries[1].visibility, ShaderStages::FRAGMENT);
        assert_eq!(desc.entries[2].descriptor_count(), 1);
    }

    #[test]
    fn test_dynamic_offset_ignored_for_textures() {
        let entry = BindGroupLayoutEntry::texture(3).with_dynamic_offset();
        assert!(matches!(entry.ty, BindingType::Texture { .. }));
    }
}
