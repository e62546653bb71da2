//! Copy commands and the region math behind them.

use std::sync::Arc;

use ash::vk;

use super::CommandBuffer;
use crate::error::GraphicsError;
use crate::resources::{Buffer, Texture, mip_extent};
use crate::types::{BufferStates, Extent3d, TextureDescriptor, TextureDimension, TextureLayout};

/// A box of texels inside one mip level of a texture.
///
/// For 1D and 2D textures the third coordinate addresses array layers:
/// `origin[2]` is the first layer and `extent.depth_or_array_layers` the
/// number of layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureCopyRegion {
    pub mip_level: u32,
    pub origin: [u32; 3],
    pub extent: Extent3d,
}

impl TextureCopyRegion {
    /// Every texel and layer of `mip_level`.
    pub fn whole(texture: &Texture, mip_level: u32) -> Self {
        let depth_or_array_layers = match texture.descriptor().dimension {
            TextureDimension::Texture3D => texture.depth(mip_level),
            _ => texture.array_layers(),
        };
        Self {
            mip_level,
            origin: [0; 3],
            extent: Extent3d::new(
                texture.width(mip_level),
                texture.height(mip_level),
                depth_or_array_layers,
            ),
        }
    }

    pub fn with_origin(mut self, x: u32, y: u32, z: u32) -> Self {
        self.origin = [x, y, z];
        self
    }

    pub fn with_extent(mut self, extent: Extent3d) -> Self {
        self.extent = extent;
        self
    }
}

/// A [`TextureCopyRegion`] validated against its texture and split into the
/// native subresource, offset and extent.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NativeCopyRegion {
    pub subresource: vk::ImageSubresourceLayers,
    pub offset: vk::Offset3D,
    pub extent: vk::Extent3D,
}

impl NativeCopyRegion {
    /// Bytes of a tightly packed copy of this region.
    pub fn packed_size(&self, descriptor: &TextureDescriptor) -> u64 {
        let (_, slice_pitch) = descriptor
            .format
            .surface_pitch(self.extent.width, self.extent.height);
        slice_pitch as u64 * self.extent.depth as u64 * self.subresource.layer_count as u64
    }
}

pub(crate) fn resolve_copy_region(
    descriptor: &TextureDescriptor,
    region: &TextureCopyRegion,
) -> Result<NativeCopyRegion, GraphicsError> {
    let mip = region.mip_level;
    if mip >= descriptor.mip_level_count.max(1) {
        return Err(GraphicsError::InvalidParameter(format!(
            "copy mip level {} out of {}",
            mip, descriptor.mip_level_count
        )));
    }
    let extent = region.extent;
    if extent.width == 0 || extent.height == 0 || extent.depth_or_array_layers == 0 {
        return Err(GraphicsError::InvalidParameter(
            "copy extent must be non-zero".to_string(),
        ));
    }

    let width = mip_extent(descriptor.width, mip);
    let height = mip_extent(descriptor.height, mip);
    let is_3d = descriptor.dimension == TextureDimension::Texture3D;
    let depth_limit = if is_3d {
        mip_extent(descriptor.depth(), mip)
    } else {
        descriptor.array_layers()
    };
    let [x, y, z] = region.origin;
    let fits = |origin: u32, size: u32, limit: u32| {
        origin.checked_add(size).is_some_and(|end| end <= limit)
    };
    if !fits(x, extent.width, width)
        || !fits(y, extent.height, height)
        || !fits(z, extent.depth_or_array_layers, depth_limit)
    {
        return Err(GraphicsError::InvalidParameter(format!(
            "copy region {:?} + {:?} exceeds mip {} of size {}x{}x{}",
            region.origin, extent, mip, width, height, depth_limit
        )));
    }

    // Copies of depth-stencil images move the depth plane.
    let aspect_mask = if descriptor.format.has_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    };
    let (base_array_layer, layer_count, offset_z, depth) = if is_3d {
        (0, 1, z, extent.depth_or_array_layers)
    } else {
        (z, extent.depth_or_array_layers, 0, 1)
    };

    Ok(NativeCopyRegion {
        subresource: vk::ImageSubresourceLayers {
            aspect_mask,
            mip_level: mip,
            base_array_layer,
            layer_count,
        },
        offset: vk::Offset3D {
            x: x as i32,
            y: y as i32,
            z: offset_z as i32,
        },
        extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth,
        },
    })
}

fn check_buffer_range(buffer: &Buffer, offset: u64, size: u64) -> Result<(), GraphicsError> {
    if offset.checked_add(size).is_none_or(|end| end > buffer.size()) {
        return Err(GraphicsError::InvalidParameter(format!(
            "range {}+{} exceeds buffer {:?} of {} bytes",
            offset,
            size,
            buffer.label(),
            buffer.size()
        )));
    }
    Ok(())
}

impl CommandBuffer {
    /// Copy `size` bytes between two buffers.
    pub fn copy_buffer_to_buffer(
        &mut self,
        src: &Arc<Buffer>,
        src_offset: u64,
        dst: &Arc<Buffer>,
        dst_offset: u64,
        size: u64,
    ) -> Result<(), GraphicsError> {
        check_buffer_range(src, src_offset, size)?;
        check_buffer_range(dst, dst_offset, size)?;
        if Arc::ptr_eq(src, dst) {
            return Err(GraphicsError::InvalidParameter(
                "source and destination buffers must differ".to_string(),
            ));
        }
        if size == 0 {
            return Ok(());
        }

        self.transition_buffer(src, BufferStates::COPY_SOURCE);
        self.transition_buffer(dst, BufferStates::COPY_DEST);
        self.flush_barriers();

        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        let (device, recorder) = self.parts();
        unsafe {
            device
                .raw()
                .cmd_copy_buffer(recorder.handle(), src.handle(), dst.handle(), &[region]);
        }
        recorder.retain(src);
        recorder.retain(dst);
        Ok(())
    }

    /// Copy tightly packed texels from `src` at `buffer_offset` into a
    /// region of `dst`.
    pub fn copy_buffer_to_texture(
        &mut self,
        src: &Arc<Buffer>,
        buffer_offset: u64,
        dst: &Arc<Texture>,
        region: &TextureCopyRegion,
    ) -> Result<(), GraphicsError> {
        let native = resolve_copy_region(dst.descriptor(), region)?;
        check_buffer_range(src, buffer_offset, native.packed_size(dst.descriptor()))?;

        self.transition_buffer(src, BufferStates::COPY_SOURCE);
        self.transition_texture_region(dst, &native, TextureLayout::CopyDest);
        self.flush_barriers();

        let copy = buffer_image_copy(buffer_offset, &native);
        let (device, recorder) = self.parts();
        unsafe {
            device.raw().cmd_copy_buffer_to_image(
                recorder.handle(),
                src.handle(),
                dst.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            );
        }
        recorder.retain(src);
        recorder.retain(dst);
        Ok(())
    }

    /// Copy a region of `src` into `dst` at `buffer_offset`, tightly packed.
    pub fn copy_texture_to_buffer(
        &mut self,
        src: &Arc<Texture>,
        region: &TextureCopyRegion,
        dst: &Arc<Buffer>,
        buffer_offset: u64,
    ) -> Result<(), GraphicsError> {
        let native = resolve_copy_region(src.descriptor(), region)?;
        check_buffer_range(dst, buffer_offset, native.packed_size(src.descriptor()))?;

        self.transition_texture_region(src, &native, TextureLayout::CopySource);
        self.transition_buffer(dst, BufferStates::COPY_DEST);
        self.flush_barriers();

        let copy = buffer_image_copy(buffer_offset, &native);
        let (device, recorder) = self.parts();
        unsafe {
            device.raw().cmd_copy_image_to_buffer(
                recorder.handle(),
                src.handle(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst.handle(),
                &[copy],
            );
        }
        recorder.retain(src);
        recorder.retain(dst);
        Ok(())
    }

    /// Copy `region` of `src` to the same-sized region of `dst` starting at
    /// `dst_mip_level` and `dst_origin`.
    pub fn copy_texture_to_texture(
        &mut self,
        src: &Arc<Texture>,
        region: &TextureCopyRegion,
        dst: &Arc<Texture>,
        dst_mip_level: u32,
        dst_origin: [u32; 3],
    ) -> Result<(), GraphicsError> {
        if Arc::ptr_eq(src, dst) {
            return Err(GraphicsError::InvalidParameter(
                "source and destination textures must differ".to_string(),
            ));
        }
        let src_native = resolve_copy_region(src.descriptor(), region)?;
        let dst_region = TextureCopyRegion {
            mip_level: dst_mip_level,
            origin: dst_origin,
            extent: region.extent,
        };
        let dst_native = resolve_copy_region(dst.descriptor(), &dst_region)?;

        self.transition_texture_region(src, &src_native, TextureLayout::CopySource);
        self.transition_texture_region(dst, &dst_native, TextureLayout::CopyDest);
        self.flush_barriers();

        let copy = vk::ImageCopy {
            src_subresource: src_native.subresource,
            src_offset: src_native.offset,
            dst_subresource: dst_native.subresource,
            dst_offset: dst_native.offset,
            extent: src_native.extent,
        };
        let (device, recorder) = self.parts();
        unsafe {
            device.raw().cmd_copy_image(
                recorder.handle(),
                src.handle(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            );
        }
        recorder.retain(src);
        recorder.retain(dst);
        Ok(())
    }

    /// Fill `size` bytes of `buffer` with a repeated 32-bit value.
    ///
    /// `offset` and `size` must be multiples of 4.
    pub fn fill_buffer(
        &mut self,
        buffer: &Arc<Buffer>,
        offset: u64,
        size: u64,
        value: u32,
    ) -> Result<(), GraphicsError> {
        if offset % 4 != 0 || size % 4 != 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "fill range {}+{} is not 4-byte aligned",
                offset, size
            )));
        }
        check_buffer_range(buffer, offset, size)?;
        if size == 0 {
            return Ok(());
        }

        self.transition_buffer(buffer, BufferStates::COPY_DEST);
        self.flush_barriers();
        let (device, recorder) = self.parts();
        unsafe {
            device
                .raw()
                .cmd_fill_buffer(recorder.handle(), buffer.handle(), offset, size, value);
        }
        recorder.retain(buffer);
        Ok(())
    }

    fn transition_texture_region(
        &mut self,
        texture: &Arc<Texture>,
        region: &NativeCopyRegion,
        target: TextureLayout,
    ) {
        let transitions = texture.transition_range(
            region.subresource.mip_level,
            1,
            region.subresource.base_array_layer,
            region.subresource.layer_count,
            target,
        );
        self.record_texture_transitions(texture, transitions, target);
    }
}

fn buffer_image_copy(buffer_offset: u64, region: &NativeCopyRegion) -> vk::BufferImageCopy {
    vk::BufferImageCopy {
        buffer_offset,
        // Zero means tightly packed.
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: region.subresource,
        image_offset: region.offset,
        image_extent: region.extent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PixelFormat, TextureUsage};
    use rstest::rstest;

    fn texture_2d_array() -> TextureDescriptor {
        TextureDescriptor::texture_2d(PixelFormat::Rgba8Unorm, 64, 32, TextureUsage::SHADER_READ)
            .with_mip_levels(3)
            .with_array_layers(4)
    }

    #[test]
    fn test_array_region_maps_z_to_layers() {
        let region = TextureCopyRegion {
            mip_level: 1,
            origin: [0, 0, 2],
            extent: Extent3d::new(32, 16, 2),
        };
        let native = resolve_copy_region(&texture_2d_array(), &region).unwrap();
        assert_eq!(native.subresource.base_array_layer, 2);
        assert_eq!(native.subresource.layer_count, 2);
        assert_eq!(native.offset.z, 0);
        assert_eq!(native.extent.depth, 1);
        assert_eq!(native.packed_size(&texture_2d_array()), 32 * 16 * 4 * 2);
    }

    #[test]
    fn test_volume_region_keeps_depth() {
        let descriptor = TextureDescriptor::texture_3d(
            PixelFormat::R8Unorm,
            16,
            16,
            8,
            TextureUsage::SHADER_READ,
        );
        let region = TextureCopyRegion {
            mip_level: 0,
            origin: [0, 0, 4],
            extent: Extent3d::new(16, 16, 4),
        };
        let native = resolve_copy_region(&descriptor, &region).unwrap();
        assert_eq!(native.subresource.layer_count, 1);
        assert_eq!(native.offset.z, 4);
        assert_eq!(native.extent.depth, 4);
    }

    #[rstest]
    #[case::mip_out_of_range(3, [0, 0, 0], Extent3d::new(1, 1, 1))]
    #[case::too_wide(1, [1, 0, 0], Extent3d::new(32, 16, 1))]
    #[case::too_many_layers(0, [0, 0, 3], Extent3d::new(64, 32, 2))]
    #[case::empty(0, [0, 0, 0], Extent3d::new(0, 32, 1))]
    fn test_invalid_regions_rejected(
        #[case] mip_level: u32,
        #[case] origin: [u32; 3],
        #[case] extent: Extent3d,
    ) {
        let region = TextureCopyRegion {
            mip_level,
            origin,
            extent,
        };
        assert!(resolve_copy_region(&texture_2d_array(), &region).is_err());
    }

    #[test]
    fn test_depth_stencil_copies_depth_plane() {
        let descriptor = TextureDescriptor::texture_2d(
            PixelFormat::Depth24UnormStencil8,
            8,
            8,
            TextureUsage::RENDER_TARGET,
        );
        let region = TextureCopyRegion {
            mip_level: 0,
            origin: [0; 3],
            extent: Extent3d::new(8, 8, 1),
        };
        let native = resolve_copy_region(&descriptor, &region).unwrap();
        assert_eq!(native.subresource.aspect_mask, vk::ImageAspectFlags::DEPTH);
    }
}
