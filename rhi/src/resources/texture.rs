//! GPU texture and texture view resources.
//!
//! A [`Texture`] tracks the layout of every (mip, layer) subresource so that
//! command recording only emits barriers for ranges whose layout actually
//! changes. Different ranges of one texture may be in different layouts at
//! the same time, for example while generating mips.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use parking_lot::Mutex;

use crate::backend::vulkan::barriers::BarrierBatch;
use crate::backend::vulkan::conversion::{
    convert_image_aspect, convert_image_type, convert_sample_count, convert_texture_usage,
    convert_view_type,
};
use crate::backend::vulkan::deferred::DeferredResource;
use crate::backend::vulkan::states::SubresourceLayouts;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::{
    PixelFormat, TextureAspect, TextureData, TextureDescriptor, TextureDimension, TextureLayout,
    TextureUsage, TextureViewDescriptor, TextureViewDimension,
};

/// Flat subresource index: `mip + layer * mips + plane * mips * layers`.
pub fn subresource_index(mip: u32, layer: u32, plane: u32, mip_levels: u32, array_layers: u32) -> u32 {
    mip + layer * mip_levels + plane * mip_levels * array_layers
}

/// Extent of `size` at mip level `mip`, never below one.
pub fn mip_extent(size: u32, mip: u32) -> u32 {
    (size >> mip.min(31)).max(1)
}

/// Layout a texture is primed into after creation.
///
/// Render targets win over storage, storage wins over sampling.
pub(crate) fn initial_layout(usage: TextureUsage, format: PixelFormat) -> TextureLayout {
    if usage.contains(TextureUsage::RENDER_TARGET) {
        if format.is_depth_stencil() {
            TextureLayout::DepthWrite
        } else {
            TextureLayout::RenderTarget
        }
    } else if usage.contains(TextureUsage::SHADER_WRITE) {
        TextureLayout::UnorderedAccess
    } else if usage.contains(TextureUsage::SHADER_READ) {
        TextureLayout::ShaderResource
    } else {
        TextureLayout::Undefined
    }
}

/// Native create flags for a texture.
pub(crate) fn image_create_flags(descriptor: &TextureDescriptor) -> vk::ImageCreateFlags {
    let mut flags = vk::ImageCreateFlags::empty();
    match descriptor.dimension {
        TextureDimension::Texture2D
            if descriptor.width == descriptor.height && descriptor.array_layers() >= 6 =>
        {
            flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        }
        TextureDimension::Texture3D => flags |= vk::ImageCreateFlags::TYPE_2D_ARRAY_COMPATIBLE,
        _ => {}
    }
    // sRGB formats cannot be used for storage; views reinterpret them instead.
    if descriptor.usage.contains(TextureUsage::SHADER_WRITE) && descriptor.format.is_srgb() {
        flags |= vk::ImageCreateFlags::MUTABLE_FORMAT | vk::ImageCreateFlags::EXTENDED_USAGE;
    }
    flags
}

/// One subresource copy of an initial data upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SubresourceUpload {
    pub mip: u32,
    pub layer: u32,
    /// Offset into the staging buffer.
    pub offset: u64,
    /// Tightly packed row pitch in the staging buffer.
    pub row_pitch: u32,
    /// Number of block rows per slice.
    pub block_rows: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl SubresourceUpload {
    pub fn slice_pitch(&self) -> u64 {
        self.row_pitch as u64 * self.block_rows as u64
    }

    pub fn size(&self) -> u64 {
        self.slice_pitch() * self.depth as u64
    }
}

/// Byte offset of block row `row` of depth slice `z` in caller-provided data.
fn source_row_offset(z: u32, row: u32, slice_pitch: u64, row_pitch: u32) -> u64 {
    z as u64 * slice_pitch + row as u64 * row_pitch as u64
}

/// Lay out `count` subresources in a staging buffer, each starting at a
/// multiple of `alignment`. Returns the copies and the total size.
pub(crate) fn plan_upload(
    descriptor: &TextureDescriptor,
    count: usize,
    alignment: u64,
) -> (Vec<SubresourceUpload>, u64) {
    let info = descriptor.format.info();
    let mips = descriptor.mip_level_count.max(1);
    let layers = descriptor.array_layers();
    let alignment = alignment.max(1);

    let mut uploads = Vec::with_capacity(count);
    let mut offset = 0u64;
    'outer: for layer in 0..layers {
        for mip in 0..mips {
            if uploads.len() == count {
                break 'outer;
            }
            let width = mip_extent(descriptor.width, mip);
            let height = mip_extent(descriptor.height, mip);
            let depth = mip_extent(descriptor.depth(), mip);
            let (row_pitch, _) = descriptor.format.surface_pitch(width, height);
            let upload = SubresourceUpload {
                mip,
                layer,
                offset: offset.next_multiple_of(alignment),
                row_pitch,
                block_rows: height.div_ceil(info.block_height.max(1)).max(1),
                width,
                height,
                depth,
            };
            offset = upload.offset + upload.size();
            uploads.push(upload);
        }
    }
    (uploads, offset)
}

/// A transition of a subresource range: `(base_mip, mip_count, base_layer,
/// layer_count, layout before)`.
pub(crate) type RangeTransition = (u32, u32, u32, u32, TextureLayout);

/// Move a range to `target`, returning the transitions needed.
///
/// A range in one uniform layout yields at most one transition. Otherwise
/// every differing subresource gets its own. The tracked layouts are updated
/// before any barrier executes, so a repeated request yields nothing.
pub(crate) fn plan_transitions(
    layouts: &mut SubresourceLayouts,
    base_mip: u32,
    mip_count: u32,
    base_layer: u32,
    layer_count: u32,
    target: TextureLayout,
) -> Vec<RangeTransition> {
    let (base_mip, mip_count, base_layer, layer_count) =
        layouts.clamp_range(base_mip, mip_count, base_layer, layer_count);

    let mut transitions = Vec::new();
    match layouts.uniform_layout(base_mip, mip_count, base_layer, layer_count) {
        Some(current) if current == target => {}
        Some(current) => {
            transitions.push((base_mip, mip_count, base_layer, layer_count, current));
        }
        None => {
            for layer in base_layer..base_layer + layer_count {
                for mip in base_mip..base_mip + mip_count {
                    let current = layouts.get(mip, layer);
                    if current != target {
                        transitions.push((mip, 1, layer, 1, current));
                    }
                }
            }
        }
    }
    layouts.set_range(base_mip, mip_count, base_layer, layer_count, target);
    transitions
}

/// A GPU texture resource.
///
/// Textures are created by [`GraphicsDevice::create_texture`] together with
/// a default view covering every subresource. Swap chain back buffers are
/// textures too, but their image belongs to the swap chain.
///
/// # Example
///
/// ```ignore
/// let texture = device.create_texture(
///     &TextureDescriptor::texture_2d(PixelFormat::Rgba8Unorm, 512, 512, TextureUsage::SHADER_READ)
///         .with_mip_levels(10)
///         .with_label("albedo"),
/// )?;
/// let view = texture.default_view();
/// ```
pub struct Texture {
    device: Arc<GraphicsDevice>,
    descriptor: TextureDescriptor,
    handle: vk::Image,
    native_format: vk::Format,
    /// `None` for swap chain images.
    allocation: Option<Allocation>,
    default_view: vk::ImageView,
    layouts: Mutex<SubresourceLayouts>,
}

impl Texture {
    pub(crate) fn new(
        device: &Arc<GraphicsDevice>,
        descriptor: &TextureDescriptor,
        data: &[TextureData<'_>],
    ) -> Result<Arc<Self>, GraphicsError> {
        validate_descriptor(descriptor)?;
        if !data.is_empty() && descriptor.format.is_depth_stencil() {
            return Err(GraphicsError::InvalidParameter(
                "Depth-stencil textures cannot be created with initial data".to_string(),
            ));
        }

        let raw = device.raw();
        let label = descriptor.label.as_deref().unwrap_or("texture");
        let native_format = device.native_format(descriptor.format);
        let (sharing_mode, families) = device.sharing();
        let height = match descriptor.dimension {
            TextureDimension::Texture1D => 1,
            _ => descriptor.height,
        };
        let image_info = vk::ImageCreateInfo::default()
            .flags(image_create_flags(descriptor))
            .image_type(convert_image_type(descriptor.dimension))
            .format(native_format)
            .extent(vk::Extent3D {
                width: descriptor.width,
                height,
                depth: descriptor.depth(),
            })
            .mip_levels(descriptor.mip_level_count)
            .array_layers(descriptor.array_layers())
            .samples(convert_sample_count(descriptor.sample_count))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_texture_usage(descriptor.usage, descriptor.format))
            .sharing_mode(sharing_mode)
            .queue_family_indices(families)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let handle = unsafe { raw.create_image(&image_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create texture: {:?}", e))
        })?;

        let requirements = unsafe { raw.get_image_memory_requirements(handle) };
        let allocation = match device
            .allocator()
            .allocate(label, requirements, descriptor.memory_type, false)
        {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { raw.destroy_image(handle, None) };
                return Err(e);
            }
        };
        if let Err(e) =
            unsafe { raw.bind_image_memory(handle, allocation.memory(), allocation.offset()) }
        {
            device.allocator().free(allocation);
            unsafe { raw.destroy_image(handle, None) };
            return Err(GraphicsError::ResourceCreationFailed(format!(
                "Failed to bind texture memory: {:?}",
                e
            )));
        }
        device.debug_names().set_object_name(handle, label);

        let mut texture = Self {
            device: Arc::clone(device),
            descriptor: descriptor.clone(),
            handle,
            native_format,
            allocation: Some(allocation),
            default_view: vk::ImageView::null(),
            layouts: Mutex::new(SubresourceLayouts::new(
                descriptor.mip_level_count,
                descriptor.array_layers(),
                TextureLayout::Undefined,
            )),
        };
        // Dropping `texture` from here on defers destruction of everything
        // created so far.
        texture.default_view = texture.create_view_handle(&ResolvedView::whole(descriptor))?;

        let target = initial_layout(descriptor.usage, descriptor.format);
        if !data.is_empty() {
            texture.upload(data, target)?;
        } else if target != TextureLayout::Undefined {
            texture.prime(target)?;
        }

        log::trace!(
            "Created texture {:?} ({}x{}x{}, {:?}, {} mips)",
            descriptor.label,
            descriptor.width,
            descriptor.height,
            descriptor.depth_or_array_layers,
            descriptor.format,
            descriptor.mip_level_count
        );
        Ok(Arc::new(texture))
    }

    /// Wrap a swap chain image. The image itself is never destroyed here.
    pub(crate) fn from_swapchain_image(
        device: &Arc<GraphicsDevice>,
        image: vk::Image,
        native_format: vk::Format,
        descriptor: TextureDescriptor,
    ) -> Result<Arc<Self>, GraphicsError> {
        let mut texture = Self {
            device: Arc::clone(device),
            layouts: Mutex::new(SubresourceLayouts::new(1, 1, TextureLayout::Undefined)),
            descriptor,
            handle: image,
            native_format,
            allocation: None,
            default_view: vk::ImageView::null(),
        };
        texture.default_view = texture.create_view_handle(&ResolvedView::whole(&texture.descriptor))?;
        if let Some(label) = &texture.descriptor.label {
            device.debug_names().set_object_name(image, label);
        }
        Ok(Arc::new(texture))
    }

    fn upload(&self, data: &[TextureData<'_>], target: TextureLayout) -> Result<(), GraphicsError> {
        let device = &self.device;
        let subresources = (self.descriptor.mip_level_count * self.descriptor.array_layers()) as usize;
        if data.len() > subresources {
            return Err(GraphicsError::InvalidParameter(format!(
                "{} initial data entries for a texture with {} subresources",
                data.len(),
                subresources
            )));
        }

        let (plan, total) = plan_upload(
            &self.descriptor,
            data.len(),
            device.limits().texture_depth_pitch_alignment,
        );
        let mut context = device.copy_allocator().allocate(device, total)?;

        for (upload, source) in plan.iter().zip(data) {
            let src_row = if source.row_pitch == 0 {
                upload.row_pitch
            } else {
                source.row_pitch
            };
            let src_slice = if source.slice_pitch == 0 {
                src_row as u64 * upload.block_rows as u64
            } else {
                source.slice_pitch as u64
            };
            let row_bytes = upload.row_pitch.min(src_row) as usize;
            for z in 0..upload.depth {
                for row in 0..upload.block_rows {
                    let src_start = source_row_offset(z, row, src_slice, src_row);
                    let bytes = usize::try_from(src_start).ok().and_then(|start| {
                        source.data.get(start..start.checked_add(row_bytes)?)
                    });
                    let Some(bytes) = bytes else {
                        return Err(GraphicsError::InvalidParameter(format!(
                            "Initial data for mip {} layer {} is too small",
                            upload.mip, upload.layer
                        )));
                    };
                    let dst = upload.offset
                        + z as u64 * upload.slice_pitch()
                        + row as u64 * upload.row_pitch as u64;
                    context.write(dst, bytes)?;
                }
            }
        }

        let aspect = convert_image_aspect(self.descriptor.format, TextureAspect::All);
        let regions: Vec<vk::BufferImageCopy> = plan
            .iter()
            .map(|upload| {
                vk::BufferImageCopy::default()
                    .buffer_offset(upload.offset)
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: aspect,
                        mip_level: upload.mip,
                        base_array_layer: upload.layer,
                        layer_count: 1,
                    })
                    .image_extent(vk::Extent3D {
                        width: upload.width,
                        height: upload.height,
                        depth: upload.depth,
                    })
            })
            .collect();

        let depth_only = self.descriptor.format.is_depth_only();
        let mut barriers = BarrierBatch::new();
        barriers.add_image_barrier(
            self.handle,
            self.full_range(),
            depth_only,
            TextureLayout::Undefined,
            TextureLayout::CopyDest,
        );
        barriers.flush(device.dispatch(), context.transfer_command_buffer());
        unsafe {
            device.raw().cmd_copy_buffer_to_image(
                context.transfer_command_buffer(),
                context.staging_buffer(),
                self.handle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            );
        }

        let target = if target == TextureLayout::Undefined {
            TextureLayout::CopyDest
        } else {
            target
        };
        barriers.add_image_barrier(
            self.handle,
            self.full_range(),
            depth_only,
            TextureLayout::CopyDest,
            target,
        );
        barriers.flush(device.dispatch(), context.transition_command_buffer());
        self.set_all_layouts(target);

        device.copy_allocator().submit(device, context)
    }

    /// Move a fresh texture out of `UNDEFINED` on the graphics queue.
    fn prime(&self, target: TextureLayout) -> Result<(), GraphicsError> {
        let device = &self.device;
        let context = device.copy_allocator().allocate(device, 0)?;
        let mut barriers = BarrierBatch::new();
        barriers.add_image_barrier(
            self.handle,
            self.full_range(),
            self.descriptor.format.is_depth_only(),
            TextureLayout::Undefined,
            target,
        );
        barriers.flush(device.dispatch(), context.transition_command_buffer());
        self.set_all_layouts(target);
        device.copy_allocator().submit(device, context)
    }

    fn set_all_layouts(&self, layout: TextureLayout) {
        let mut layouts = self.layouts.lock();
        let (mips, layers) = (layouts.mip_levels(), layouts.array_layers());
        layouts.set_range(0, mips, 0, layers, layout);
    }

    fn create_view_handle(&self, view: &ResolvedView) -> Result<vk::ImageView, GraphicsError> {
        let format = if view.format == self.descriptor.format {
            self.native_format
        } else {
            self.device.native_format(view.format)
        };
        // Storage usage on an sRGB image is only legal on non-sRGB views.
        let mut usage_info = vk::ImageViewUsageCreateInfo::default().usage(
            convert_texture_usage(self.descriptor.usage, view.format) & !vk::ImageUsageFlags::STORAGE,
        );
        let mut view_info = vk::ImageViewCreateInfo::default()
            .image(self.handle)
            .view_type(convert_view_type(view.dimension))
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: convert_image_aspect(view.format, view.aspect),
                base_mip_level: view.base_mip_level,
                level_count: view.mip_level_count,
                base_array_layer: view.base_array_layer,
                layer_count: view.array_layer_count,
            });

        if view.format.is_srgb() && self.descriptor.usage.contains(TextureUsage::SHADER_WRITE) {
            view_info = view_info.push_next(&mut usage_info);
        }

        let handle = unsafe { self.device.raw().create_image_view(&view_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create texture view: {:?}", e))
        })?;
        Ok(handle)
    }

    /// Get the parent device.
    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    /// Get the texture descriptor.
    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    pub fn format(&self) -> PixelFormat {
        self.descriptor.format
    }

    /// Width of mip level `mip`.
    pub fn width(&self, mip: u32) -> u32 {
        mip_extent(self.descriptor.width, mip)
    }

    /// Height of mip level `mip`.
    pub fn height(&self, mip: u32) -> u32 {
        mip_extent(self.descriptor.height, mip)
    }

    /// Depth of mip level `mip`.
    pub fn depth(&self, mip: u32) -> u32 {
        mip_extent(self.descriptor.depth(), mip)
    }

    pub fn mip_level_count(&self) -> u32 {
        self.descriptor.mip_level_count
    }

    pub fn array_layers(&self) -> u32 {
        self.descriptor.array_layers()
    }

    /// Get the texture label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// The view created with the texture, covering every subresource.
    pub fn default_view(self: &Arc<Self>) -> Arc<TextureView> {
        Arc::new(TextureView {
            view: ResolvedView::whole(&self.descriptor),
            texture: Arc::clone(self),
            handle: self.default_view,
            owned: false,
        })
    }

    /// Tracked layout of one subresource.
    pub fn layout(&self, mip: u32, layer: u32) -> TextureLayout {
        self.layouts.lock().get(mip, layer)
    }

    pub(crate) fn handle(&self) -> vk::Image {
        self.handle
    }

    pub(crate) fn native_format(&self) -> vk::Format {
        self.native_format
    }

    pub(crate) fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: convert_image_aspect(self.descriptor.format, TextureAspect::All),
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        }
    }

    /// Update the tracked layout of a range and return the barriers to record.
    pub(crate) fn transition_range(
        &self,
        base_mip: u32,
        mip_count: u32,
        base_layer: u32,
        layer_count: u32,
        target: TextureLayout,
    ) -> Vec<(vk::ImageSubresourceRange, TextureLayout)> {
        let aspect = convert_image_aspect(self.descriptor.format, TextureAspect::All);
        let transitions = plan_transitions(
            &mut self.layouts.lock(),
            base_mip,
            mip_count,
            base_layer,
            layer_count,
            target,
        );
        transitions
            .into_iter()
            .map(|(base_mip, mip_count, base_layer, layer_count, before)| {
                (
                    vk::ImageSubresourceRange {
                        aspect_mask: aspect,
                        base_mip_level: base_mip,
                        level_count: mip_count,
                        base_array_layer: base_layer,
                        layer_count,
                    },
                    before,
                )
            })
            .collect()
    }

    /// Forget the tracked layouts, used when a swap chain image is reacquired.
    pub(crate) fn reset_layouts(&self, layout: TextureLayout) {
        self.set_all_layouts(layout);
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        let views = if self.default_view != vk::ImageView::null() {
            vec![self.default_view]
        } else {
            Vec::new()
        };
        self.device.defer_destroy(DeferredResource::Texture {
            image: self.handle,
            views,
            allocation: self.allocation.take(),
        });
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("dimension", &self.descriptor.dimension)
            .field("format", &self.descriptor.format)
            .field("width", &self.descriptor.width)
            .field("height", &self.descriptor.height)
            .field("depth_or_array_layers", &self.descriptor.depth_or_array_layers)
            .field("mip_level_count", &self.descriptor.mip_level_count)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

fn validate_descriptor(descriptor: &TextureDescriptor) -> Result<(), GraphicsError> {
    if descriptor.width == 0 || descriptor.height == 0 || descriptor.depth_or_array_layers == 0 {
        return Err(GraphicsError::InvalidParameter(
            "Texture dimensions must be greater than 0".to_string(),
        ));
    }
    if descriptor.mip_level_count == 0 {
        return Err(GraphicsError::InvalidParameter(
            "Texture must have at least one mip level".to_string(),
        ));
    }
    if descriptor.format == PixelFormat::Undefined {
        return Err(GraphicsError::InvalidParameter(
            "Texture format must not be Undefined".to_string(),
        ));
    }
    Ok(())
}

/// View parameters with every "derive from texture" value filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResolvedView {
    pub dimension: TextureViewDimension,
    pub format: PixelFormat,
    pub base_mip_level: u32,
    pub mip_level_count: u32,
    pub base_array_layer: u32,
    pub array_layer_count: u32,
    pub aspect: TextureAspect,
}

impl ResolvedView {
    /// A view over every subresource.
    pub fn whole(texture: &TextureDescriptor) -> Self {
        Self::resolve(texture, &TextureViewDescriptor::default())
    }

    pub fn resolve(texture: &TextureDescriptor, view: &TextureViewDescriptor) -> Self {
        let mips = texture.mip_level_count.max(1);
        let layers = texture.array_layers();
        let base_mip_level = view.base_mip_level.min(mips - 1);
        let base_array_layer = view.base_array_layer.min(layers - 1);
        let mip_level_count = match view.mip_level_count {
            0 => mips - base_mip_level,
            n => n.min(mips - base_mip_level),
        };
        let array_layer_count = match view.array_layer_count {
            0 => layers - base_array_layer,
            n => n.min(layers - base_array_layer),
        };
        let dimension = view.dimension.unwrap_or(match texture.dimension {
            TextureDimension::Texture1D if array_layer_count > 1 => TextureViewDimension::View1DArray,
            TextureDimension::Texture1D => TextureViewDimension::View1D,
            TextureDimension::Texture2D if array_layer_count > 1 => TextureViewDimension::View2DArray,
            TextureDimension::Texture2D => TextureViewDimension::View2D,
            TextureDimension::Texture3D => TextureViewDimension::View3D,
        });
        let format = match view.format {
            PixelFormat::Undefined => texture.format,
            format => format,
        };
        Self {
            dimension,
            format,
            base_mip_level,
            mip_level_count,
            base_array_layer,
            array_layer_count,
            aspect: view.aspect,
        }
    }
}

/// A view of a subresource range of a [`Texture`].
///
/// Views are used as render pass attachments and bind group entries. The
/// view keeps its texture alive.
pub struct TextureView {
    texture: Arc<Texture>,
    handle: vk::ImageView,
    /// Whether the handle belongs to this view rather than the texture.
    owned: bool,
    view: ResolvedView,
}

impl TextureView {
    pub(crate) fn new(
        texture: &Arc<Texture>,
        descriptor: &TextureViewDescriptor,
    ) -> Result<Arc<Self>, GraphicsError> {
        let view = ResolvedView::resolve(&texture.descriptor, descriptor);
        let handle = texture.create_view_handle(&view)?;
        if let Some(label) = &descriptor.label {
            texture.device.debug_names().set_object_name(handle, label);
        }
        Ok(Arc::new(Self {
            texture: Arc::clone(texture),
            handle,
            owned: true,
            view,
        }))
    }

    pub fn texture(&self) -> &Arc<Texture> {
        &self.texture
    }

    pub fn dimension(&self) -> TextureViewDimension {
        self.view.dimension
    }

    pub fn format(&self) -> PixelFormat {
        self.view.format
    }

    pub fn base_mip_level(&self) -> u32 {
        self.view.base_mip_level
    }

    pub fn mip_level_count(&self) -> u32 {
        self.view.mip_level_count
    }

    pub fn base_array_layer(&self) -> u32 {
        self.view.base_array_layer
    }

    /// Number of array layers the view covers.
    pub fn layer_count(&self) -> u32 {
        self.view.array_layer_count
    }

    /// Width of the view's first mip.
    pub fn width(&self) -> u32 {
        self.texture.width(self.view.base_mip_level)
    }

    /// Height of the view's first mip.
    pub fn height(&self) -> u32 {
        self.texture.height(self.view.base_mip_level)
    }

    pub(crate) fn handle(&self) -> vk::ImageView {
        self.handle
    }

    /// Move the viewed range to `target` and return the barriers to record.
    pub(crate) fn transitions(&self, target: TextureLayout) -> Vec<(vk::ImageSubresourceRange, TextureLayout)> {
        self.texture.transition_range(
            self.view.base_mip_level,
            self.view.mip_level_count,
            self.view.base_array_layer,
            self.view.array_layer_count,
            target,
        )
    }
}

impl Drop for TextureView {
    fn drop(&mut self) {
        if self.owned {
            self.texture
                .device
                .defer_destroy(DeferredResource::ImageView(self.handle));
        }
    }
}

impl std::fmt::Debug for TextureView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureView")
            .field("texture", &self.texture.descriptor.label)
            .field("dimension", &self.view.dimension)
            .field("format", &self.view.format)
            .field("mips", &(self.view.base_mip_level..self.view.base_mip_level + self.view.mip_level_count))
            .field("layers", &(self.view.base_array_layer..self.view.base_array_layer + self.view.array_layer_count))
            .finish()
    }
}

static_assertions::assert_impl_all!(Texture: Send, Sync);
static_assertions::assert_impl_all!(TextureView: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_subresource_index() {
        assert_eq!(subresource_index(0, 0, 0, 4, 6), 0);
        assert_eq!(subresource_index(3, 0, 0, 4, 6), 3);
        assert_eq!(subresource_index(1, 2, 0, 4, 6), 9);
        assert_eq!(subresource_index(0, 0, 1, 4, 6), 24);
    }

    #[rstest]
    #[case::first_row(0, 0, 1024, 64, 0)]
    #[case::second_slice(1, 3, 1024, 64, 1024 + 3 * 64)]
    #[case::deep_volume(600, 0, 8 << 20, 8192, 600 * (8 << 20))]
    #[case::last_row_of_large_volume(1023, 1023, 8 << 20, 8192, 1023 * (8 << 20) + 1023 * 8192)]
    fn test_source_row_offset(
        #[case] z: u32,
        #[case] row: u32,
        #[case] slice_pitch: u64,
        #[case] row_pitch: u32,
        #[case] expected: u64,
    ) {
        assert_eq!(source_row_offset(z, row, slice_pitch, row_pitch), expected);
    }

    #[rstest]
    #[case(256, 0, 256)]
    #[case(256, 3, 32)]
    #[case(5, 2, 1)]
    #[case(1, 10, 1)]
    #[case(1024, 40, 1)]
    fn test_mip_extent(#[case] size: u32, #[case] mip: u32, #[case] expected: u32) {
        assert_eq!(mip_extent(size, mip), expected);
    }

    #[rstest]
    #[case::sampled(TextureUsage::SHADER_READ, PixelFormat::Rgba8Unorm, TextureLayout::ShaderResource)]
    #[case::storage(
        TextureUsage::SHADER_READ | TextureUsage::SHADER_WRITE,
        PixelFormat::Rgba8Unorm,
        TextureLayout::UnorderedAccess
    )]
    #[case::color_target(
        TextureUsage::RENDER_TARGET | TextureUsage::SHADER_READ,
        PixelFormat::Rgba8Unorm,
        TextureLayout::RenderTarget
    )]
    #[case::depth_target(TextureUsage::RENDER_TARGET, PixelFormat::Depth32Float, TextureLayout::DepthWrite)]
    #[case::none(TextureUsage::empty(), PixelFormat::Rgba8Unorm, TextureLayout::Undefined)]
    fn test_initial_layout(
        #[case] usage: TextureUsage,
        #[case] format: PixelFormat,
        #[case] expected: TextureLayout,
    ) {
        assert_eq!(initial_layout(usage, format), expected);
    }

    #[test]
    fn test_cube_compatible_flags() {
        let cube = TextureDescriptor::texture_cube(PixelFormat::Rgba8Unorm, 64, 1, TextureUsage::SHADER_READ);
        assert!(image_create_flags(&cube).contains(vk::ImageCreateFlags::CUBE_COMPATIBLE));

        let rect = TextureDescriptor::texture_2d(PixelFormat::Rgba8Unorm, 64, 32, TextureUsage::SHADER_READ)
            .with_array_layers(6);
        assert!(!image_create_flags(&rect).contains(vk::ImageCreateFlags::CUBE_COMPATIBLE));

        let volume = TextureDescriptor::texture_3d(PixelFormat::R8Unorm, 8, 8, 8, TextureUsage::SHADER_READ);
        assert!(image_create_flags(&volume).contains(vk::ImageCreateFlags::TYPE_2D_ARRAY_COMPATIBLE));
    }

    #[test]
    fn test_srgb_storage_is_mutable() {
        let desc = TextureDescriptor::texture_2d(
            PixelFormat::Rgba8UnormSrgb,
            16,
            16,
            TextureUsage::SHADER_WRITE,
        );
        let flags = image_create_flags(&desc);
        assert!(flags.contains(vk::ImageCreateFlags::MUTABLE_FORMAT));
        assert!(flags.contains(vk::ImageCreateFlags::EXTENDED_USAGE));
    }

    #[test]
    fn test_plan_upload_mip_chain() {
        let desc = TextureDescriptor::texture_2d(PixelFormat::Rgba8Unorm, 8, 8, TextureUsage::SHADER_READ)
            .with_mip_levels(4);
        let (plan, total) = plan_upload(&desc, 4, 16);
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0].offset, 0);
        assert_eq!(plan[0].row_pitch, 32);
        assert_eq!(plan[0].size(), 256);
        // 4x4 mip starts right after 8x8.
        assert_eq!(plan[1].offset, 256);
        assert_eq!(plan[1].size(), 64);
        // 2x2 mip, 16 bytes.
        assert_eq!(plan[2].offset, 320);
        // 1x1 mip is 4 bytes at an aligned offset.
        assert_eq!(plan[3].offset, 336);
        assert_eq!(total, 340);
    }

    #[test]
    fn test_plan_upload_orders_layers_then_mips() {
        let desc = TextureDescriptor::texture_2d(PixelFormat::R8Unorm, 4, 4, TextureUsage::SHADER_READ)
            .with_mip_levels(2)
            .with_array_layers(2);
        let (plan, _) = plan_upload(&desc, 3, 16);
        let order: Vec<(u32, u32)> = plan.iter().map(|u| (u.mip, u.layer)).collect();
        assert_eq!(order, vec![(0, 0), (1, 0), (0, 1)]);
        assert!(plan.iter().all(|u| u.offset % 16 == 0));
    }

    #[test]
    fn test_plan_upload_compressed_blocks() {
        let desc = TextureDescriptor::texture_2d(PixelFormat::Bc1RgbaUnorm, 10, 10, TextureUsage::SHADER_READ);
        let (plan, total) = plan_upload(&desc, 1, 16);
        assert_eq!(plan[0].row_pitch, 24);
        assert_eq!(plan[0].block_rows, 3);
        assert_eq!(total, 72);
    }

    #[test]
    fn test_transition_dedup() {
        let mut layouts = SubresourceLayouts::new(4, 1, TextureLayout::Undefined);
        let first = plan_transitions(&mut layouts, 0, 0, 0, 0, TextureLayout::ShaderResource);
        assert_eq!(first, vec![(0, 4, 0, 1, TextureLayout::Undefined)]);

        let second = plan_transitions(&mut layouts, 0, 0, 0, 0, TextureLayout::ShaderResource);
        assert!(second.is_empty());
    }

    #[test]
    fn test_transition_mixed_range_splits() {
        let mut layouts = SubresourceLayouts::new(3, 1, TextureLayout::ShaderResource);
        plan_transitions(&mut layouts, 1, 1, 0, 1, TextureLayout::RenderTarget);

        let transitions = plan_transitions(&mut layouts, 0, 0, 0, 0, TextureLayout::CopySource);
        assert_eq!(
            transitions,
            vec![
                (0, 1, 0, 1, TextureLayout::ShaderResource),
                (1, 1, 0, 1, TextureLayout::RenderTarget),
                (2, 1, 0, 1, TextureLayout::ShaderResource),
            ]
        );
        assert_eq!(layouts.uniform_layout(0, 3, 0, 1), Some(TextureLayout::CopySource));
    }

    #[test]
    fn test_transition_skips_subresources_already_in_target() {
        let mut layouts = SubresourceLayouts::new(2, 2, TextureLayout::ShaderResource);
        plan_transitions(&mut layouts, 0, 1, 1, 1, TextureLayout::RenderTarget);
        let transitions = plan_transitions(&mut layouts, 0, 0, 0, 0, TextureLayout::RenderTarget);
        assert_eq!(transitions.len(), 3);
        assert!(transitions.iter().all(|t| t.4 == TextureLayout::ShaderResource));
    }

    #[test]
    fn test_resolve_view_defaults() {
        let desc = TextureDescriptor::texture_2d(PixelFormat::Rgba8Unorm, 64, 64, TextureUsage::SHADER_READ)
            .with_mip_levels(7)
            .with_array_layers(4);
        let view = ResolvedView::whole(&desc);
        assert_eq!(view.dimension, TextureViewDimension::View2DArray);
        assert_eq!(view.format, PixelFormat::Rgba8Unorm);
        assert_eq!(view.mip_level_count, 7);
        assert_eq!(view.array_layer_count, 4);
    }

    #[test]
    fn test_resolve_view_clamps_ranges() {
        let desc = TextureDescriptor::texture_2d(PixelFormat::Rgba8Unorm, 64, 64, TextureUsage::SHADER_READ)
            .with_mip_levels(4);
        let view = ResolvedView::resolve(
            &desc,
            &TextureViewDescriptor::new().with_mip_range(2, 10),
        );
        assert_eq!(view.base_mip_level, 2);
        assert_eq!(view.mip_level_count, 2);
        assert_eq!(view.dimension, TextureViewDimension::View2D);
    }

    #[test]
    fn test_resolve_view_cube() {
        let desc = TextureDescriptor::texture_cube(PixelFormat::Rgba16Float, 32, 1, TextureUsage::SHADER_READ);
        let view = ResolvedView::resolve(
            &desc,
            &TextureViewDescriptor::new().with_dimension(TextureViewDimension::ViewCube),
        );
        assert_eq!(view.dimension, TextureViewDimension::ViewCube);
        assert_eq!(view.array_layer_count, 6);
    }
}
