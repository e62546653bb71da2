//! Graphics adapter.
//!
//! A [`GraphicsAdapter`] is a physical device that passed the suitability
//! checks. It exposes identification, limits and capability queries, and
//! creates logical devices.

use std::sync::Arc;

use ash::vk;

use crate::backend::vulkan::conversion::{
    convert_adapter_type, convert_pixel_format, convert_vertex_format,
};
use crate::backend::vulkan::extensions::PhysicalDeviceExtensions;
use crate::backend::vulkan::features::AdapterFeatures;
use crate::backend::vulkan::instance::MINIMUM_API_VERSION;
use crate::backend::vulkan::queue_family::QueueFamilyCaps;
use crate::device::{DeviceDescriptor, GraphicsDevice};
use crate::error::GraphicsError;
use crate::instance::{GraphicsInstance, Surface};
use crate::types::{
    AdapterType, Feature, GraphicsLimits, MAX_BIND_GROUPS, PixelFormat, PixelFormatSupport,
    TEXEL_BLOCK_STRIDE_LCM, VertexFormat, least_common_multiple,
};

/// One queue family as reported by the driver.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AdapterQueueFamily {
    pub properties: vk::QueueFamilyProperties,
    pub video_codecs: vk::VideoCodecOperationFlagsKHR,
}

/// A physical GPU with its queried capabilities.
///
/// Immutable after discovery.
pub struct GraphicsAdapter {
    instance: Arc<GraphicsInstance>,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    api_version: u32,
    max_memory_allocation_size: u64,
    extensions: PhysicalDeviceExtensions,
    features: AdapterFeatures,
    queue_families: Vec<AdapterQueueFamily>,
    name: String,
    driver_description: String,
    adapter_type: AdapterType,
}

impl GraphicsAdapter {
    /// Query a physical device. Returns `None` and logs the reason when the
    /// device lacks a mandatory capability.
    pub(crate) fn probe(
        instance: Arc<GraphicsInstance>,
        physical_device: vk::PhysicalDevice,
    ) -> Option<Self> {
        let raw = instance.raw();
        let properties = unsafe { raw.get_physical_device_properties(physical_device) };
        let name = properties
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "Unknown".to_string());

        if properties.api_version < MINIMUM_API_VERSION {
            log::warn!(
                "Skipping adapter {}: Vulkan 1.2 is not supported (device reports {}.{})",
                name,
                vk::api_version_major(properties.api_version),
                vk::api_version_minor(properties.api_version)
            );
            return None;
        }

        let extensions = PhysicalDeviceExtensions::query(raw, physical_device);
        if !extensions.swapchain {
            log::warn!("Skipping adapter {}: VK_KHR_swapchain is not supported", name);
            return None;
        }

        let api_version = properties.api_version.min(instance.api_version());
        let mut features_properties = properties;
        features_properties.api_version = api_version;
        let features = AdapterFeatures::query(raw, physical_device, &features_properties, &extensions);
        if let Some(missing) = features.missing_mandatory() {
            log::warn!("Skipping adapter {}: {} is not supported", name, missing);
            return None;
        }

        let mut driver = vk::PhysicalDeviceDriverProperties::default();
        let mut vulkan11 = vk::PhysicalDeviceVulkan11Properties::default();
        {
            let mut properties2 = vk::PhysicalDeviceProperties2::default()
                .push_next(&mut driver)
                .push_next(&mut vulkan11);
            unsafe { raw.get_physical_device_properties2(physical_device, &mut properties2) };
        }
        let driver_description = match (driver.driver_name_as_c_str(), driver.driver_info_as_c_str())
        {
            (Ok(driver_name), Ok(info)) if !info.is_empty() => format!(
                "{} {}",
                driver_name.to_string_lossy(),
                info.to_string_lossy()
            ),
            (Ok(driver_name), _) => driver_name.to_string_lossy().into_owned(),
            _ => String::new(),
        };

        let queue_families =
            query_queue_families(raw, physical_device, extensions.supports_video_decode());

        log::info!(
            "Found adapter: {} ({:?}, driver: {})",
            name,
            properties.device_type,
            driver_description
        );

        Some(Self {
            physical_device,
            properties,
            api_version,
            max_memory_allocation_size: vulkan11.max_memory_allocation_size,
            extensions,
            features,
            queue_families,
            name,
            driver_description,
            adapter_type: convert_adapter_type(properties.device_type),
            instance,
        })
    }

    /// The instance this adapter belongs to.
    pub fn instance(&self) -> &Arc<GraphicsInstance> {
        &self.instance
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Driver name and version information.
    pub fn driver_description(&self) -> &str {
        &self.driver_description
    }

    /// PCI vendor identifier.
    pub fn vendor_id(&self) -> u32 {
        self.properties.vendor_id
    }

    /// Vendor-specific device identifier.
    pub fn device_id(&self) -> u32 {
        self.properties.device_id
    }

    pub fn adapter_type(&self) -> AdapterType {
        self.adapter_type
    }

    /// API version used for devices created from this adapter.
    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    /// Nanoseconds per timestamp tick.
    pub fn timestamp_period(&self) -> f32 {
        self.properties.limits.timestamp_period
    }

    /// Device limits.
    pub fn limits(&self) -> GraphicsLimits {
        map_limits(&self.properties.limits, self.max_memory_allocation_size)
    }

    /// Whether an optional feature is supported.
    pub fn query_feature_support(&self, feature: Feature) -> bool {
        self.features.supports(feature)
    }

    /// What a pixel format can be used for.
    pub fn query_pixel_format_support(&self, format: PixelFormat) -> PixelFormatSupport {
        if format == PixelFormat::Undefined {
            return PixelFormatSupport::empty();
        }
        let vk_format = convert_pixel_format(format, self.features.supports_d24s8);
        let properties = unsafe {
            self.instance
                .raw()
                .get_physical_device_format_properties(self.physical_device, vk_format)
        };
        pixel_format_support(&properties)
    }

    /// Whether a vertex format can be used in vertex buffers.
    pub fn query_vertex_format_support(&self, format: VertexFormat) -> bool {
        let properties = unsafe {
            self.instance.raw().get_physical_device_format_properties(
                self.physical_device,
                convert_vertex_format(format),
            )
        };
        properties
            .buffer_features
            .contains(vk::FormatFeatureFlags::VERTEX_BUFFER)
    }

    /// Create a logical device.
    ///
    /// # Errors
    ///
    /// Returns an error if a required feature is missing, no queue family
    /// can serve graphics with presentation, or device creation fails.
    pub fn create_device(
        self: &Arc<Self>,
        descriptor: &DeviceDescriptor,
    ) -> Result<Arc<GraphicsDevice>, GraphicsError> {
        for feature in &descriptor.required_features {
            if !self.features.supports(*feature) {
                return Err(GraphicsError::FeatureNotSupported(format!(
                    "{:?} is not supported by adapter {}",
                    feature, self.name
                )));
            }
        }
        GraphicsDevice::new(Arc::clone(self), descriptor)
    }

    pub(crate) fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub(crate) fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub(crate) fn extensions(&self) -> &PhysicalDeviceExtensions {
        &self.extensions
    }

    pub(crate) fn features(&self) -> &AdapterFeatures {
        &self.features
    }

    /// Queue family capabilities, with presentation support checked against
    /// `surface`. Without a surface every family is assumed present-capable.
    pub(crate) fn queue_family_caps(&self, surface: Option<&Surface>) -> Vec<QueueFamilyCaps> {
        self.queue_families
            .iter()
            .enumerate()
            .map(|(index, family)| {
                let present_support = match (surface, self.instance.surface_loader()) {
                    (Some(surface), Some(loader)) => match unsafe {
                        loader.get_physical_device_surface_support(
                            self.physical_device,
                            index as u32,
                            surface.handle(),
                        )
                    } {
                        Ok(supported) => supported,
                        Err(e) => {
                            log::warn!(
                                "Failed to query present support of queue family {}: {:?}",
                                index,
                                e
                            );
                            false
                        }
                    },
                    _ => true,
                };
                QueueFamilyCaps {
                    flags: family.properties.queue_flags,
                    queue_count: family.properties.queue_count,
                    video_codecs: family.video_codecs,
                    present_support,
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for GraphicsAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsAdapter")
            .field("name", &self.name)
            .field("adapter_type", &self.adapter_type)
            .field("vendor_id", &format_args!("{:#06x}", self.properties.vendor_id))
            .field("device_id", &format_args!("{:#06x}", self.properties.device_id))
            .finish()
    }
}

static_assertions::assert_impl_all!(GraphicsAdapter: Send, Sync);

fn query_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    video: bool,
) -> Vec<AdapterQueueFamily> {
    let count = unsafe { instance.get_physical_device_queue_family_properties2_len(physical_device) };
    let mut video_properties = vec![vk::QueueFamilyVideoPropertiesKHR::default(); count];
    let families: Vec<vk::QueueFamilyProperties> = {
        let mut properties: Vec<vk::QueueFamilyProperties2> = video_properties
            .iter_mut()
            .map(|video_props| {
                if video {
                    vk::QueueFamilyProperties2::default().push_next(video_props)
                } else {
                    vk::QueueFamilyProperties2::default()
                }
            })
            .collect();
        unsafe {
            instance.get_physical_device_queue_family_properties2(physical_device, &mut properties)
        };
        properties.iter().map(|p| p.queue_family_properties).collect()
    };

    families
        .into_iter()
        .zip(video_properties)
        .map(|(properties, video_props)| AdapterQueueFamily {
            properties,
            video_codecs: video_props.video_codec_operations,
        })
        .collect()
}

/// Map native limits to the client-facing limit set.
pub(crate) fn map_limits(
    limits: &vk::PhysicalDeviceLimits,
    max_memory_allocation_size: u64,
) -> GraphicsLimits {
    GraphicsLimits {
        max_texture_dimension_1d: limits.max_image_dimension1_d,
        max_texture_dimension_2d: limits.max_image_dimension2_d,
        max_texture_dimension_3d: limits.max_image_dimension3_d,
        max_texture_dimension_cube: limits.max_image_dimension_cube,
        max_texture_array_layers: limits.max_image_array_layers,
        max_bind_groups: limits.max_bound_descriptor_sets.min(MAX_BIND_GROUPS as u32),
        min_constant_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
        max_constant_buffer_binding_size: limits.max_uniform_buffer_range,
        min_storage_buffer_offset_alignment: limits.min_storage_buffer_offset_alignment,
        max_storage_buffer_binding_size: limits.max_storage_buffer_range,
        texture_row_pitch_alignment: limits.optimal_buffer_copy_row_pitch_alignment,
        texture_depth_pitch_alignment: least_common_multiple(
            limits.optimal_buffer_copy_offset_alignment,
            TEXEL_BLOCK_STRIDE_LCM,
        ),
        max_buffer_size: max_memory_allocation_size,
        max_push_constants_size: limits.max_push_constants_size,
        max_color_attachments: limits.max_color_attachments,
        max_viewports: limits.max_viewports,
        max_vertex_buffers: limits.max_vertex_input_bindings,
        max_vertex_attributes: limits.max_vertex_input_attributes,
        max_vertex_buffer_array_stride: limits.max_vertex_input_binding_stride,
        max_compute_workgroup_storage_size: limits.max_compute_shared_memory_size,
        max_compute_invocations_per_workgroup: limits.max_compute_work_group_invocations,
        max_compute_workgroup_size_x: limits.max_compute_work_group_size[0],
        max_compute_workgroup_size_y: limits.max_compute_work_group_size[1],
        max_compute_workgroup_size_z: limits.max_compute_work_group_size[2],
        max_compute_workgroups_per_dimension: limits.max_compute_work_group_count[0]
            .min(limits.max_compute_work_group_count[1])
            .min(limits.max_compute_work_group_count[2]),
        max_sampler_anisotropy: limits.max_sampler_anisotropy as u32,
        max_framebuffer_width: limits.max_framebuffer_width,
        max_framebuffer_height: limits.max_framebuffer_height,
        max_framebuffer_layers: limits.max_framebuffer_layers,
    }
}

/// Translate native format features into [`PixelFormatSupport`].
pub(crate) fn pixel_format_support(properties: &vk::FormatProperties) -> PixelFormatSupport {
    let optimal = properties.optimal_tiling_features;
    let buffer = properties.buffer_features;
    let mut support = PixelFormatSupport::empty();

    if optimal.intersects(vk::FormatFeatureFlags::TRANSFER_SRC | vk::FormatFeatureFlags::TRANSFER_DST)
    {
        support |= PixelFormatSupport::TEXTURE;
    }
    if optimal.contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT) {
        support |= PixelFormatSupport::DEPTH_STENCIL;
    }
    if optimal.contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT) {
        support |= PixelFormatSupport::RENDER_TARGET;
    }
    if optimal.contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT_BLEND) {
        support |= PixelFormatSupport::BLENDABLE;
    }
    if optimal.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE)
        || buffer.contains(vk::FormatFeatureFlags::UNIFORM_TEXEL_BUFFER)
    {
        support |= PixelFormatSupport::SHADER_LOAD;
    }
    if optimal.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR) {
        support |= PixelFormatSupport::SHADER_SAMPLE;
    }
    if optimal.contains(vk::FormatFeatureFlags::STORAGE_IMAGE)
        || buffer.contains(vk::FormatFeatureFlags::STORAGE_TEXEL_BUFFER)
    {
        support |= PixelFormatSupport::SHADER_UAV_LOAD | PixelFormatSupport::SHADER_UAV_STORE;
    }
    if optimal.contains(vk::FormatFeatureFlags::STORAGE_IMAGE_ATOMIC)
        || buffer.contains(vk::FormatFeatureFlags::STORAGE_TEXEL_BUFFER_ATOMIC)
    {
        support |= PixelFormatSupport::SHADER_ATOMIC;
    }
    support
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_pitch_alignment_is_lcm() {
        let limits = vk::PhysicalDeviceLimits {
            optimal_buffer_copy_offset_alignment: 64,
            optimal_buffer_copy_row_pitch_alignment: 128,
            max_bound_descriptor_sets: 32,
            ..Default::default()
        };
        let mapped = map_limits(&limits, 1 << 30);
        assert_eq!(mapped.texture_depth_pitch_alignment, 64);
        assert_eq!(mapped.texture_row_pitch_alignment, 128);
        assert_eq!(mapped.max_bind_groups, MAX_BIND_GROUPS as u32);
        assert_eq!(mapped.max_buffer_size, 1 << 30);

        let limits = vk::PhysicalDeviceLimits {
            optimal_buffer_copy_offset_alignment: 1,
            ..Default::default()
        };
        assert_eq!(map_limits(&limits, 0).texture_depth_pitch_alignment, 16);
    }

    #[test]
    fn test_pixel_format_support_from_features() {
        let properties = vk::FormatProperties {
            optimal_tiling_features: vk::FormatFeatureFlags::TRANSFER_DST
                | vk::FormatFeatureFlags::SAMPLED_IMAGE
                | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
                | vk::FormatFeatureFlags::COLOR_ATTACHMENT
                | vk::FormatFeatureFlags::COLOR_ATTACHMENT_BLEND,
            ..Default::default()
        };
        assert_eq!(
            pixel_format_support(&properties),
            PixelFormatSupport::TEXTURE
                | PixelFormatSupport::SHADER_LOAD
                | PixelFormatSupport::SHADER_SAMPLE
                | PixelFormatSupport::RENDER_TARGET
                | PixelFormatSupport::BLENDABLE
        );
    }

    #[test]
    fn test_storage_texel_buffer_counts_as_uav() {
        let properties = vk::FormatProperties {
            buffer_features: vk::FormatFeatureFlags::STORAGE_TEXEL_BUFFER
                | vk::FormatFeatureFlags::STORAGE_TEXEL_BUFFER_ATOMIC,
            ..Default::default()
        };
        assert_eq!(
            pixel_format_support(&properties),
            PixelFormatSupport::SHADER_UAV_LOAD
                | PixelFormatSupport::SHADER_UAV_STORE
                | PixelFormatSupport::SHADER_ATOMIC
        );
    }

    #[test]
    fn test_depth_format_support() {
        let properties = vk::FormatProperties {
            optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            ..Default::default()
        };
        assert_eq!(
            pixel_format_support(&properties),
            PixelFormatSupport::DEPTH_STENCIL
        );
        assert!(pixel_format_support(&vk::FormatProperties::default()).is_empty());
    }
}
