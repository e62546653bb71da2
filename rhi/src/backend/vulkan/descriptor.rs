//! Descriptor pools and binding register offsets.
//!
//! Bind group layouts shift every slot by a per-kind register offset so that
//! constant buffers, shader resources, unordered-access resources and samplers
//! declared with the same shader register never collide in one set.

use ash::vk;

use crate::error::GraphicsError;
use crate::types::{BindingType, BufferBindingType, StorageTextureAccess};

pub const CONSTANT_BUFFER_REGISTER_OFFSET: u32 = 0;
pub const SHADER_RESOURCE_REGISTER_OFFSET: u32 = 1000;
pub const UNORDERED_ACCESS_REGISTER_OFFSET: u32 = 2000;
pub const SAMPLER_REGISTER_OFFSET: u32 = 3000;

/// Native binding index for a slot declared at shader `register`.
pub fn register_offset(ty: &BindingType) -> u32 {
    match ty {
        BindingType::Buffer {
            ty: BufferBindingType::Constant,
            ..
        } => CONSTANT_BUFFER_REGISTER_OFFSET,
        BindingType::Buffer {
            ty: BufferBindingType::ShaderRead,
            ..
        }
        | BindingType::Texture { .. }
        | BindingType::AccelerationStructure => SHADER_RESOURCE_REGISTER_OFFSET,
        BindingType::StorageTexture {
            access: StorageTextureAccess::ReadOnly,
            ..
        } => SHADER_RESOURCE_REGISTER_OFFSET,
        BindingType::Buffer {
            ty: BufferBindingType::ShaderReadWrite,
            ..
        }
        | BindingType::StorageTexture { .. } => UNORDERED_ACCESS_REGISTER_OFFSET,
        BindingType::Sampler(_) | BindingType::StaticSampler(_) => SAMPLER_REGISTER_OFFSET,
    }
}

/// Native descriptor type of a slot.
pub fn descriptor_type(ty: &BindingType) -> vk::DescriptorType {
    match ty {
        BindingType::Buffer {
            ty: BufferBindingType::Constant,
            has_dynamic_offset: false,
        } => vk::DescriptorType::UNIFORM_BUFFER,
        BindingType::Buffer {
            ty: BufferBindingType::Constant,
            has_dynamic_offset: true,
        } => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        BindingType::Buffer {
            has_dynamic_offset: false,
            ..
        } => vk::DescriptorType::STORAGE_BUFFER,
        BindingType::Buffer {
            has_dynamic_offset: true,
            ..
        } => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        BindingType::Sampler(_) | BindingType::StaticSampler(_) => vk::DescriptorType::SAMPLER,
        BindingType::Texture { .. } => vk::DescriptorType::SAMPLED_IMAGE,
        BindingType::StorageTexture { .. } => vk::DescriptorType::STORAGE_IMAGE,
        BindingType::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
    }
}

/// Sets per pool.
pub const POOL_MAX_SETS: u32 = 1024;

/// Descriptor counts per pool.
pub fn pool_sizes(acceleration_structures: bool) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes = vec![
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 512,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            descriptor_count: 16,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: 512,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
            descriptor_count: 16,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 128,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLED_IMAGE,
            descriptor_count: 128,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLER,
            descriptor_count: 16,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_IMAGE,
            descriptor_count: 8,
        },
    ];
    if acceleration_structures {
        sizes.push(vk::DescriptorPoolSize {
            ty: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
            descriptor_count: 8,
        });
    }
    sizes
}

/// Whether an allocation failure should be answered with a fresh pool.
pub fn is_pool_exhausted(result: vk::Result) -> bool {
    matches!(
        result,
        vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL
    )
}

/// Growing list of descriptor pools. Sets are allocated from the newest pool.
#[derive(Debug, Default)]
pub struct DescriptorAllocator {
    pools: Vec<vk::DescriptorPool>,
    acceleration_structures: bool,
}

impl DescriptorAllocator {
    pub fn new(acceleration_structures: bool) -> Self {
        Self {
            pools: Vec::new(),
            acceleration_structures,
        }
    }

    fn grow(&mut self, device: &ash::Device) -> Result<vk::DescriptorPool, GraphicsError> {
        let sizes = pool_sizes(self.acceleration_structures);
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(POOL_MAX_SETS)
            .pool_sizes(&sizes);
        let pool = unsafe { device.create_descriptor_pool(&create_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!(
                "Failed to create descriptor pool: {:?}",
                e
            ))
        })?;
        self.pools.push(pool);
        log::debug!("Created descriptor pool #{}", self.pools.len());
        Ok(pool)
    }

    /// Allocate one set. Exhaustion of the current pool creates a new pool
    /// and retries exactly once.
    pub fn allocate(
        &mut self,
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
        variable_count: Option<u32>,
    ) -> Result<(vk::DescriptorPool, vk::DescriptorSet), GraphicsError> {
        let pool = match self.pools.last() {
            Some(&pool) => pool,
            None => self.grow(device)?,
        };

        match Self::allocate_from(device, pool, layout, variable_count) {
            Ok(set) => Ok((pool, set)),
            Err(e) if is_pool_exhausted(e) => {
                let pool = self.grow(device)?;
                let set = Self::allocate_from(device, pool, layout, variable_count).map_err(|e| {
                    GraphicsError::ResourceCreationFailed(format!(
                        "Failed to allocate descriptor set after pool growth: {:?}",
                        e
                    ))
                })?;
                Ok((pool, set))
            }
            Err(e) => Err(GraphicsError::ResourceCreationFailed(format!(
                "Failed to allocate descriptor set: {:?}",
                e
            ))),
        }
    }

    fn allocate_from(
        device: &ash::Device,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        variable_count: Option<u32>,
    ) -> Result<vk::DescriptorSet, vk::Result> {
        let layouts = [layout];
        let counts = [variable_count.unwrap_or(0)];
        let mut variable_info =
            vk::DescriptorSetVariableDescriptorCountAllocateInfo::default().descriptor_counts(&counts);
        let mut alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        if variable_count.is_some() {
            alloc_info = alloc_info.push_next(&mut variable_info);
        }
        let sets = unsafe { device.allocate_descriptor_sets(&alloc_info) }?;
        sets.into_iter().next().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Destroy every pool, freeing all sets allocated from them.
    ///
    /// # Safety
    ///
    /// No set allocated from these pools may still be in use by the GPU.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for pool in self.pools.drain(..) {
            unsafe { device.destroy_descriptor_pool(pool, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        SamplerBindingType, SamplerDescriptor, TextureSampleType, TextureViewDimension,
    };
    use crate::types::PixelFormat;
    use rstest::rstest;

    #[rstest]
    #[case::constant(BindingType::Buffer { ty: BufferBindingType::Constant, has_dynamic_offset: false }, 0)]
    #[case::read_only_storage(BindingType::Buffer { ty: BufferBindingType::ShaderRead, has_dynamic_offset: false }, 1000)]
    #[case::texture(
        BindingType::Texture {
            sample_type: TextureSampleType::Float,
            view_dimension: TextureViewDimension::View2D,
            multisampled: false,
        },
        1000
    )]
    #[case::read_write_storage(BindingType::Buffer { ty: BufferBindingType::ShaderReadWrite, has_dynamic_offset: false }, 2000)]
    #[case::storage_texture(
        BindingType::StorageTexture {
            access: StorageTextureAccess::ReadWrite,
            format: PixelFormat::Rgba8Unorm,
            view_dimension: TextureViewDimension::View2D,
        },
        2000
    )]
    #[case::sampler(BindingType::Sampler(SamplerBindingType::Filtering), 3000)]
    #[case::static_sampler(BindingType::StaticSampler(SamplerDescriptor::default()), 3000)]
    fn test_register_offsets(#[case] ty: BindingType, #[case] expected: u32) {
        assert_eq!(register_offset(&ty), expected);
    }

    #[test]
    fn test_dynamic_offsets_select_dynamic_descriptors() {
        let ty = BindingType::Buffer {
            ty: BufferBindingType::Constant,
            has_dynamic_offset: true,
        };
        assert_eq!(descriptor_type(&ty), vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC);
        let ty = BindingType::Buffer {
            ty: BufferBindingType::ShaderRead,
            has_dynamic_offset: true,
        };
        assert_eq!(descriptor_type(&ty), vk::DescriptorType::STORAGE_BUFFER_DYNAMIC);
    }

    #[test]
    fn test_pool_sizes() {
        assert!(!pool_sizes(false)
            .iter()
            .any(|s| s.ty == vk::DescriptorType::ACCELERATION_STRUCTURE_KHR));
        assert!(pool_sizes(true)
            .iter()
            .any(|s| s.ty == vk::DescriptorType::ACCELERATION_STRUCTURE_KHR));
    }

    #[test]
    fn test_exhaustion_codes() {
        assert!(is_pool_exhausted(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        assert!(is_pool_exhausted(vk::Result::ERROR_FRAGMENTED_POOL));
        assert!(!is_pool_exhausted(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
    }
}
