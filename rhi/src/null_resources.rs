//! Placeholder resources bound to descriptor slots that received no entry.
//!
//! Every bind group slot must reference a valid descriptor, so slots without
//! a user resource point at these objects instead. The images live in the
//! `GENERAL` layout for their whole lifetime, which is valid for sampled and
//! storage descriptors alike.

use ash::vk;
use gpu_allocator::vulkan::Allocation;

use crate::backend::vulkan::allocator::MemoryAllocator;
use crate::backend::vulkan::barriers::image_barrier;
use crate::backend::vulkan::dispatch::DeviceDispatch;
use crate::backend::vulkan::states::{NativeState, texture_state};
use crate::error::GraphicsError;
use crate::types::{MemoryType, TextureLayout, TextureViewDimension};

/// Size of the null buffer. Large enough for any dynamic-offset range.
pub(crate) const NULL_BUFFER_SIZE: u64 = 256;

const NULL_IMAGE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Layout the null images are kept in.
pub(crate) const NULL_IMAGE_LAYOUT: vk::ImageLayout = vk::ImageLayout::GENERAL;

struct NullImage {
    image: vk::Image,
    allocation: Option<Allocation>,
}

/// Null buffer, images and views owned by the device.
pub(crate) struct NullResources {
    buffer: vk::Buffer,
    buffer_allocation: Option<Allocation>,
    images: Vec<NullImage>,
    /// One view per [`TextureViewDimension`], indexed by [`view_index`].
    views: [vk::ImageView; 7],
    /// Native sampler owned by the device sampler cache.
    sampler: vk::Sampler,
}

fn view_index(dimension: TextureViewDimension) -> usize {
    match dimension {
        TextureViewDimension::View1D => 0,
        TextureViewDimension::View1DArray => 1,
        TextureViewDimension::View2D => 2,
        TextureViewDimension::View2DArray => 3,
        TextureViewDimension::ViewCube => 4,
        TextureViewDimension::ViewCubeArray => 5,
        TextureViewDimension::View3D => 6,
    }
}

impl NullResources {
    /// Create the native objects. The images are left in `UNDEFINED` until
    /// [`NullResources::record_initialization`] ran on the GPU.
    pub(crate) fn new(
        device: &ash::Device,
        allocator: &MemoryAllocator,
        sampler: vk::Sampler,
    ) -> Result<Self, GraphicsError> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(NULL_BUFFER_SIZE)
            .usage(
                vk::BufferUsageFlags::UNIFORM_BUFFER
                    | vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER
                    | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&buffer_info, None) }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create null buffer: {:?}", e))
        })?;
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let allocation = allocator.allocate("null buffer", requirements, MemoryType::Private, true)?;
        unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
            .map_err(|e| {
                GraphicsError::InitializationFailed(format!(
                    "Failed to bind null buffer memory: {:?}",
                    e
                ))
            })?;

        let mut resources = Self {
            buffer,
            buffer_allocation: Some(allocation),
            images: Vec::with_capacity(3),
            views: [vk::ImageView::null(); 7],
            sampler,
        };

        let image_1d = resources.create_image(
            device,
            allocator,
            vk::ImageType::TYPE_1D,
            vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            },
            1,
            vk::ImageCreateFlags::empty(),
        )?;
        let image_2d = resources.create_image(
            device,
            allocator,
            vk::ImageType::TYPE_2D,
            vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            },
            6,
            vk::ImageCreateFlags::CUBE_COMPATIBLE,
        )?;
        let image_3d = resources.create_image(
            device,
            allocator,
            vk::ImageType::TYPE_3D,
            vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            },
            1,
            vk::ImageCreateFlags::empty(),
        )?;

        for (dimension, image, view_type, layers) in [
            (TextureViewDimension::View1D, image_1d, vk::ImageViewType::TYPE_1D, 1),
            (TextureViewDimension::View1DArray, image_1d, vk::ImageViewType::TYPE_1D_ARRAY, 1),
            (TextureViewDimension::View2D, image_2d, vk::ImageViewType::TYPE_2D, 1),
            (TextureViewDimension::View2DArray, image_2d, vk::ImageViewType::TYPE_2D_ARRAY, 6),
            (TextureViewDimension::ViewCube, image_2d, vk::ImageViewType::CUBE, 6),
            (TextureViewDimension::ViewCubeArray, image_2d, vk::ImageViewType::CUBE_ARRAY, 6),
            (TextureViewDimension::View3D, image_3d, vk::ImageViewType::TYPE_3D, 1),
        ] {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(view_type)
                .format(NULL_IMAGE_FORMAT)
                .subresource_range(color_range(layers));
            let view = unsafe { device.create_image_view(&view_info, None) }.map_err(|e| {
                GraphicsError::InitializationFailed(format!(
                    "Failed to create null {:?} view: {:?}",
                    dimension, e
                ))
            })?;
            resources.views[view_index(dimension)] = view;
        }

        Ok(resources)
    }

    fn create_image(
        &mut self,
        device: &ash::Device,
        allocator: &MemoryAllocator,
        image_type: vk::ImageType,
        extent: vk::Extent3D,
        layers: u32,
        flags: vk::ImageCreateFlags,
    ) -> Result<vk::Image, GraphicsError> {
        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(image_type)
            .format(NULL_IMAGE_FORMAT)
            .extent(extent)
            .mip_levels(1)
            .array_layers(layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(
                vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::STORAGE
                    | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.create_image(&image_info, None) }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create null image: {:?}", e))
        })?;
        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let allocation = allocator.allocate("null image", requirements, MemoryType::Private, false)?;
        unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
            .map_err(|e| {
                GraphicsError::InitializationFailed(format!(
                    "Failed to bind null image memory: {:?}",
                    e
                ))
            })?;
        self.images.push(NullImage {
            image,
            allocation: Some(allocation),
        });
        Ok(image)
    }

    /// Record the commands that zero the buffer and images and move the
    /// images into [`NULL_IMAGE_LAYOUT`].
    pub(crate) fn record_initialization(&self, dispatch: &DeviceDispatch, cmd: vk::CommandBuffer) {
        let device = dispatch.device();
        let general = texture_state(TextureLayout::UnorderedAccess, false);
        let copy_dest = texture_state(TextureLayout::CopyDest, false);

        let to_copy: Vec<_> = self
            .images
            .iter()
            .map(|i| {
                image_barrier(
                    i.image,
                    color_range(vk::REMAINING_ARRAY_LAYERS),
                    NativeState::UNDEFINED,
                    copy_dest,
                )
            })
            .collect();
        let to_general: Vec<_> = self
            .images
            .iter()
            .map(|i| {
                image_barrier(i.image, color_range(vk::REMAINING_ARRAY_LAYERS), copy_dest, general)
            })
            .collect();

        let clear = vk::ClearColorValue { float32: [0.0; 4] };
        unsafe {
            device.cmd_fill_buffer(cmd, self.buffer, 0, vk::WHOLE_SIZE, 0);
            dispatch.cmd_pipeline_barrier2(
                cmd,
                &vk::DependencyInfo::default().image_memory_barriers(&to_copy),
            );
            for image in &self.images {
                device.cmd_clear_color_image(
                    cmd,
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &clear,
                    &[color_range(vk::REMAINING_ARRAY_LAYERS)],
                );
            }
            dispatch.cmd_pipeline_barrier2(
                cmd,
                &vk::DependencyInfo::default().image_memory_barriers(&to_general),
            );
        }
    }

    pub(crate) fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    pub(crate) fn view(&self, dimension: TextureViewDimension) -> vk::ImageView {
        self.views[view_index(dimension)]
    }

    pub(crate) fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Destroy every object. The sampler belongs to the sampler cache.
    ///
    /// # Safety
    ///
    /// The device must be idle.
    pub(crate) unsafe fn destroy(&mut self, device: &ash::Device, allocator: &MemoryAllocator) {
        unsafe {
            for view in self.views.iter_mut() {
                if *view != vk::ImageView::null() {
                    device.destroy_image_view(*view, None);
                    *view = vk::ImageView::null();
                }
            }
            for mut image in self.images.drain(..) {
                if let Some(allocation) = image.allocation.take() {
                    allocator.free(allocation);
                }
                device.destroy_image(image.image, None);
            }
            if let Some(allocation) = self.buffer_allocation.take() {
                allocator.free(allocation);
            }
            device.destroy_buffer(self.buffer, None);
        }
    }
}

fn color_range(layers: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: layers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_view_dimension_has_a_slot() {
        let dimensions = [
            TextureViewDimension::View1D,
            TextureViewDimension::View1DArray,
            TextureViewDimension::View2D,
            TextureViewDimension::View2DArray,
            TextureViewDimension::ViewCube,
            TextureViewDimension::ViewCubeArray,
            TextureViewDimension::View3D,
        ];
        let mut seen = [false; 7];
        for dimension in dimensions {
            seen[view_index(dimension)] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }
}
