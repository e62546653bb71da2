//! Texture sampler resource.
//!
//! Native samplers are interned in the device's sampler cache, keyed by
//! every field of the descriptor except the label. Two [`Sampler`]s created
//! from equal descriptors share one native object, which lives until the
//! device is destroyed.

use std::sync::Arc;

use ash::vk;

use crate::backend::vulkan::conversion::{
    convert_address_mode, convert_border_color, convert_compare_function, convert_filter_mode,
    convert_mipmap_filter_mode, convert_reduction_type,
};
use crate::backend::vulkan::features::AdapterFeatures;
use crate::device::GraphicsDevice;
use crate::types::{GraphicsLimits, SamplerDescriptor, SamplerReductionType};

/// Anisotropy actually applied, or `None` when anisotropic filtering is off.
pub(crate) fn effective_anisotropy(
    requested: u16,
    supported: bool,
    max_anisotropy: u32,
) -> Option<f32> {
    (requested > 1 && supported).then(|| (requested as u32).min(max_anisotropy.max(1)) as f32)
}

/// Create a native sampler without going through the cache.
pub(crate) fn create_native_sampler(
    device: &ash::Device,
    features: &AdapterFeatures,
    limits: &GraphicsLimits,
    descriptor: &SamplerDescriptor,
) -> Result<vk::Sampler, vk::Result> {
    let mirror_clamp = features.sampler_mirror_clamp_to_edge;
    let mut info = vk::SamplerCreateInfo::default()
        .mag_filter(convert_filter_mode(descriptor.mag_filter))
        .min_filter(convert_filter_mode(descriptor.min_filter))
        .mipmap_mode(convert_mipmap_filter_mode(descriptor.mipmap_filter))
        .address_mode_u(convert_address_mode(descriptor.address_mode_u, mirror_clamp))
        .address_mode_v(convert_address_mode(descriptor.address_mode_v, mirror_clamp))
        .address_mode_w(convert_address_mode(descriptor.address_mode_w, mirror_clamp))
        .min_lod(descriptor.lod_min_clamp)
        .max_lod(if descriptor.lod_max_clamp == f32::MAX {
            vk::LOD_CLAMP_NONE
        } else {
            descriptor.lod_max_clamp
        })
        .border_color(convert_border_color(descriptor.border_color))
        .unnormalized_coordinates(false);

    if let Some(anisotropy) = effective_anisotropy(
        descriptor.max_anisotropy,
        features.sampler_anisotropy,
        limits.max_sampler_anisotropy,
    ) {
        info = info.anisotropy_enable(true).max_anisotropy(anisotropy);
    }

    if descriptor.reduction_type == SamplerReductionType::Comparison {
        info = info
            .compare_enable(true)
            .compare_op(convert_compare_function(descriptor.compare));
    }

    let mut reduction = vk::SamplerReductionModeCreateInfo::default();
    if let Some(mode) = convert_reduction_type(descriptor.reduction_type) {
        if features.sampler_filter_minmax {
            reduction = reduction.reduction_mode(mode);
            info = info.push_next(&mut reduction);
        } else {
            log::warn!(
                "Sampler reduction {:?} is not supported, using a weighted average",
                descriptor.reduction_type
            );
        }
    }

    unsafe { device.create_sampler(&info, None) }
}

/// A texture sampler.
///
/// # Example
///
/// ```ignore
/// let sampler = device.create_sampler(&SamplerDescriptor::linear_clamp());
/// assert!(sampler.is_valid());
/// ```
pub struct Sampler {
    device: Arc<GraphicsDevice>,
    descriptor: SamplerDescriptor,
    handle: vk::Sampler,
}

impl Sampler {
    pub(crate) fn new(device: &Arc<GraphicsDevice>, descriptor: &SamplerDescriptor) -> Arc<Self> {
        let handle = match device.get_or_create_sampler(descriptor) {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("Failed to create sampler {:?}: {:?}", descriptor.label, e);
                vk::Sampler::null()
            }
        };
        Arc::new(Self {
            device: Arc::clone(device),
            descriptor: descriptor.clone(),
            handle,
        })
    }

    /// Get the parent device.
    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn descriptor(&self) -> &SamplerDescriptor {
        &self.descriptor
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Whether native creation succeeded.
    pub fn is_valid(&self) -> bool {
        self.handle != vk::Sampler::null()
    }

    pub(crate) fn handle(&self) -> vk::Sampler {
        self.handle
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("min_filter", &self.descriptor.min_filter)
            .field("mag_filter", &self.descriptor.mag_filter)
            .field("address_mode_u", &self.descriptor.address_mode_u)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Sampler: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::disabled(1, true, 16, None)]
    #[case::enabled(8, true, 16, Some(8.0))]
    #[case::clamped(16, true, 4, Some(4.0))]
    #[case::unsupported(16, false, 16, None)]
    fn test_effective_anisotropy(
        #[case] requested: u16,
        #[case] supported: bool,
        #[case] limit: u32,
        #[case] expected: Option<f32>,
    ) {
        assert_eq!(effective_anisotropy(requested, supported, limit), expected);
    }
}
