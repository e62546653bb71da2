//! Physical device feature discovery.
//!
//! Features are read through a `VkPhysicalDeviceFeatures2` chain whose shape
//! depends on the API version and the advertised extensions. The same chain
//! is reused at device creation so that every supported feature is enabled.

use ash::vk;

use super::extensions::PhysicalDeviceExtensions;
use crate::types::Feature;

/// Storage for every feature struct that can be linked into a query chain.
#[derive(Default)]
pub struct FeatureChain {
    pub features11: vk::PhysicalDeviceVulkan11Features<'static>,
    pub features12: vk::PhysicalDeviceVulkan12Features<'static>,
    pub features13: vk::PhysicalDeviceVulkan13Features<'static>,
    pub dynamic_rendering: vk::PhysicalDeviceDynamicRenderingFeatures<'static>,
    pub synchronization2: vk::PhysicalDeviceSynchronization2Features<'static>,
    pub maintenance4: vk::PhysicalDeviceMaintenance4Features<'static>,
    pub extended_dynamic_state: vk::PhysicalDeviceExtendedDynamicStateFeaturesEXT<'static>,
    pub extended_dynamic_state2: vk::PhysicalDeviceExtendedDynamicState2FeaturesEXT<'static>,
    pub pipeline_creation_cache_control:
        vk::PhysicalDevicePipelineCreationCacheControlFeatures<'static>,
    pub astc_hdr: vk::PhysicalDeviceTextureCompressionASTCHDRFeatures<'static>,
    pub depth_clip_enable: vk::PhysicalDeviceDepthClipEnableFeaturesEXT<'static>,
    pub acceleration_structure: vk::PhysicalDeviceAccelerationStructureFeaturesKHR<'static>,
    pub ray_tracing_pipeline: vk::PhysicalDeviceRayTracingPipelineFeaturesKHR<'static>,
    pub ray_query: vk::PhysicalDeviceRayQueryFeaturesKHR<'static>,
    pub fragment_shading_rate: vk::PhysicalDeviceFragmentShadingRateFeaturesKHR<'static>,
    pub mesh_shader: vk::PhysicalDeviceMeshShaderFeaturesEXT<'static>,
    pub conditional_rendering: vk::PhysicalDeviceConditionalRenderingFeaturesEXT<'static>,
}

impl FeatureChain {
    fn clear_links(&mut self) {
        self.features11.p_next = std::ptr::null_mut();
        self.features12.p_next = std::ptr::null_mut();
        self.features13.p_next = std::ptr::null_mut();
        self.dynamic_rendering.p_next = std::ptr::null_mut();
        self.synchronization2.p_next = std::ptr::null_mut();
        self.maintenance4.p_next = std::ptr::null_mut();
        self.extended_dynamic_state.p_next = std::ptr::null_mut();
        self.extended_dynamic_state2.p_next = std::ptr::null_mut();
        self.pipeline_creation_cache_control.p_next = std::ptr::null_mut();
        self.astc_hdr.p_next = std::ptr::null_mut();
        self.depth_clip_enable.p_next = std::ptr::null_mut();
        self.acceleration_structure.p_next = std::ptr::null_mut();
        self.ray_tracing_pipeline.p_next = std::ptr::null_mut();
        self.ray_query.p_next = std::ptr::null_mut();
        self.fragment_shading_rate.p_next = std::ptr::null_mut();
        self.mesh_shader.p_next = std::ptr::null_mut();
        self.conditional_rendering.p_next = std::ptr::null_mut();
    }

    /// Link the structs relevant for this device into a `Features2` chain.
    pub fn link<'a>(
        &'a mut self,
        api_version: u32,
        extensions: &PhysicalDeviceExtensions,
    ) -> vk::PhysicalDeviceFeatures2<'a> {
        self.clear_links();

        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut self.features11)
            .push_next(&mut self.features12);

        if api_version >= vk::API_VERSION_1_3 {
            features2 = features2.push_next(&mut self.features13);
        } else {
            if extensions.maintenance4 {
                features2 = features2.push_next(&mut self.maintenance4);
            }
            if extensions.dynamic_rendering {
                features2 = features2.push_next(&mut self.dynamic_rendering);
            }
            if extensions.synchronization2 {
                features2 = features2.push_next(&mut self.synchronization2);
            }
            if extensions.extended_dynamic_state {
                features2 = features2.push_next(&mut self.extended_dynamic_state);
            }
            if extensions.extended_dynamic_state2 {
                features2 = features2.push_next(&mut self.extended_dynamic_state2);
            }
            if extensions.pipeline_creation_cache_control {
                features2 = features2.push_next(&mut self.pipeline_creation_cache_control);
            }
            if extensions.texture_compression_astc_hdr {
                features2 = features2.push_next(&mut self.astc_hdr);
            }
        }

        if extensions.depth_clip_enable {
            features2 = features2.push_next(&mut self.depth_clip_enable);
        }
        if extensions.supports_acceleration_structure() {
            features2 = features2.push_next(&mut self.acceleration_structure);
            if extensions.ray_tracing_pipeline && extensions.pipeline_library {
                features2 = features2.push_next(&mut self.ray_tracing_pipeline);
            }
            if extensions.ray_query {
                features2 = features2.push_next(&mut self.ray_query);
            }
        }
        if extensions.fragment_shading_rate {
            features2 = features2.push_next(&mut self.fragment_shading_rate);
        }
        if extensions.mesh_shader {
            features2 = features2.push_next(&mut self.mesh_shader);
        }
        if extensions.conditional_rendering {
            features2 = features2.push_next(&mut self.conditional_rendering);
        }

        features2
    }
}

/// Feature support of an adapter, flattened into plain booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdapterFeatures {
    // Core 1.0
    pub robust_buffer_access: bool,
    pub full_draw_index_uint32: bool,
    pub image_cube_array: bool,
    pub independent_blend: bool,
    pub sample_rate_shading: bool,
    pub depth_clamp: bool,
    pub depth_bias_clamp: bool,
    pub fill_mode_non_solid: bool,
    pub depth_bounds: bool,
    pub sampler_anisotropy: bool,
    pub texture_compression_bc: bool,
    pub texture_compression_etc2: bool,
    pub texture_compression_astc_ldr: bool,
    pub occlusion_query_precise: bool,
    pub pipeline_statistics_query: bool,
    pub fragment_stores_and_atomics: bool,
    pub shader_clip_distance: bool,
    pub draw_indirect_first_instance: bool,
    pub multi_draw_indirect: bool,

    // Core 1.2
    pub draw_indirect_count: bool,
    pub shader_float16: bool,
    pub descriptor_indexing: bool,
    pub runtime_descriptor_array: bool,
    pub descriptor_binding_partially_bound: bool,
    pub descriptor_binding_variable_descriptor_count: bool,
    pub shader_sampled_image_array_non_uniform_indexing: bool,
    pub sampler_mirror_clamp_to_edge: bool,
    pub sampler_filter_minmax: bool,
    pub timeline_semaphore: bool,
    pub buffer_device_address: bool,

    // Core 1.3 or extension
    pub synchronization2: bool,
    pub dynamic_rendering: bool,
    pub texture_compression_astc_hdr: bool,

    // Extensions
    pub depth_clip_enable: bool,
    pub conservative_rasterization: bool,
    pub acceleration_structure: bool,
    pub ray_tracing_pipeline: bool,
    pub ray_query: bool,
    pub pipeline_fragment_shading_rate: bool,
    pub attachment_fragment_shading_rate: bool,
    pub mesh_shader: bool,
    pub task_shader: bool,
    pub conditional_rendering: bool,

    // Properties and formats
    pub timestamp_compute_and_graphics: bool,
    pub supports_d24s8: bool,
    pub supports_d32s8: bool,
    pub rg11b10_renderable: bool,
    pub bgra8_storage: bool,
}

impl AdapterFeatures {
    /// Flatten a queried chain.
    pub fn from_chain(
        core: &vk::PhysicalDeviceFeatures,
        chain: &FeatureChain,
        api_version: u32,
        extensions: &PhysicalDeviceExtensions,
    ) -> Self {
        let on = |b: vk::Bool32| b == vk::TRUE;
        let f12 = &chain.features12;
        let is_13 = api_version >= vk::API_VERSION_1_3;
        Self {
            robust_buffer_access: on(core.robust_buffer_access),
            full_draw_index_uint32: on(core.full_draw_index_uint32),
            image_cube_array: on(core.image_cube_array),
            independent_blend: on(core.independent_blend),
            sample_rate_shading: on(core.sample_rate_shading),
            depth_clamp: on(core.depth_clamp),
            depth_bias_clamp: on(core.depth_bias_clamp),
            fill_mode_non_solid: on(core.fill_mode_non_solid),
            depth_bounds: on(core.depth_bounds),
            sampler_anisotropy: on(core.sampler_anisotropy),
            texture_compression_bc: on(core.texture_compression_bc),
            texture_compression_etc2: on(core.texture_compression_etc2),
            texture_compression_astc_ldr: on(core.texture_compression_astc_ldr),
            occlusion_query_precise: on(core.occlusion_query_precise),
            pipeline_statistics_query: on(core.pipeline_statistics_query),
            fragment_stores_and_atomics: on(core.fragment_stores_and_atomics),
            shader_clip_distance: on(core.shader_clip_distance),
            draw_indirect_first_instance: on(core.draw_indirect_first_instance),
            multi_draw_indirect: on(core.multi_draw_indirect),

            draw_indirect_count: on(f12.draw_indirect_count),
            shader_float16: on(f12.shader_float16),
            descriptor_indexing: on(f12.descriptor_indexing),
            runtime_descriptor_array: on(f12.runtime_descriptor_array),
            descriptor_binding_partially_bound: on(f12.descriptor_binding_partially_bound),
            descriptor_binding_variable_descriptor_count: on(
                f12.descriptor_binding_variable_descriptor_count,
            ),
            shader_sampled_image_array_non_uniform_indexing: on(
                f12.shader_sampled_image_array_non_uniform_indexing,
            ),
            sampler_mirror_clamp_to_edge: on(f12.sampler_mirror_clamp_to_edge),
            sampler_filter_minmax: on(f12.sampler_filter_minmax),
            timeline_semaphore: on(f12.timeline_semaphore),
            buffer_device_address: on(f12.buffer_device_address),

            synchronization2: if is_13 {
                on(chain.features13.synchronization2)
            } else {
                on(chain.synchronization2.synchronization2)
            },
            dynamic_rendering: if is_13 {
                on(chain.features13.dynamic_rendering)
            } else {
                on(chain.dynamic_rendering.dynamic_rendering)
            },
            texture_compression_astc_hdr: if is_13 {
                on(chain.features13.texture_compression_astc_hdr)
            } else {
                on(chain.astc_hdr.texture_compression_astc_hdr)
            },

            depth_clip_enable: on(chain.depth_clip_enable.depth_clip_enable),
            conservative_rasterization: extensions.conservative_rasterization,
            acceleration_structure: on(chain.acceleration_structure.acceleration_structure),
            ray_tracing_pipeline: on(chain.ray_tracing_pipeline.ray_tracing_pipeline),
            ray_query: on(chain.ray_query.ray_query),
            pipeline_fragment_shading_rate: on(
                chain.fragment_shading_rate.pipeline_fragment_shading_rate,
            ),
            attachment_fragment_shading_rate: on(
                chain.fragment_shading_rate.attachment_fragment_shading_rate,
            ),
            mesh_shader: on(chain.mesh_shader.mesh_shader),
            task_shader: on(chain.mesh_shader.task_shader),
            conditional_rendering: on(chain.conditional_rendering.conditional_rendering),

            ..Default::default()
        }
    }

    /// Query the features of a physical device.
    pub fn query(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        properties: &vk::PhysicalDeviceProperties,
        extensions: &PhysicalDeviceExtensions,
    ) -> Self {
        let mut chain = FeatureChain::default();
        let core = {
            let mut features2 = chain.link(properties.api_version, extensions);
            unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };
            features2.features
        };

        let format_features = |format: vk::Format| unsafe {
            instance
                .get_physical_device_format_properties(physical_device, format)
                .optimal_tiling_features
        };

        let mut features = Self::from_chain(&core, &chain, properties.api_version, extensions);
        features.timestamp_compute_and_graphics =
            properties.limits.timestamp_compute_and_graphics == vk::TRUE;
        features.supports_d24s8 = format_features(vk::Format::D24_UNORM_S8_UINT)
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT);
        features.supports_d32s8 = format_features(vk::Format::D32_SFLOAT_S8_UINT)
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT);
        features.rg11b10_renderable = format_features(vk::Format::B10G11R11_UFLOAT_PACK32)
            .intersects(
                vk::FormatFeatureFlags::COLOR_ATTACHMENT
                    | vk::FormatFeatureFlags::COLOR_ATTACHMENT_BLEND,
            );
        features.bgra8_storage = format_features(vk::Format::B8G8R8A8_UNORM)
            .contains(vk::FormatFeatureFlags::STORAGE_IMAGE);
        features
    }

    /// Name of the first mandatory feature the adapter lacks.
    pub fn missing_mandatory(&self) -> Option<&'static str> {
        let required = [
            (self.robust_buffer_access, "robustBufferAccess"),
            (self.full_draw_index_uint32, "fullDrawIndexUint32"),
            (self.depth_clamp, "depthClamp"),
            (self.depth_bias_clamp, "depthBiasClamp"),
            (self.fragment_stores_and_atomics, "fragmentStoresAndAtomics"),
            (self.image_cube_array, "imageCubeArray"),
            (self.independent_blend, "independentBlend"),
            (self.sample_rate_shading, "sampleRateShading"),
            (self.shader_clip_distance, "shaderClipDistance"),
            (self.occlusion_query_precise, "occlusionQueryPrecise"),
            (
                self.texture_compression_bc
                    || (self.texture_compression_etc2 && self.texture_compression_astc_ldr),
                "textureCompressionBC or textureCompressionETC2 + textureCompressionASTC_LDR",
            ),
            (self.descriptor_indexing, "descriptorIndexing"),
            (self.runtime_descriptor_array, "runtimeDescriptorArray"),
            (
                self.descriptor_binding_partially_bound,
                "descriptorBindingPartiallyBound",
            ),
            (
                self.descriptor_binding_variable_descriptor_count,
                "descriptorBindingVariableDescriptorCount",
            ),
            (
                self.shader_sampled_image_array_non_uniform_indexing,
                "shaderSampledImageArrayNonUniformIndexing",
            ),
            (self.timeline_semaphore, "timelineSemaphore"),
            (self.synchronization2, "synchronization2"),
            (self.dynamic_rendering, "dynamicRendering"),
            (
                self.supports_d24s8 || self.supports_d32s8,
                "D24S8 or D32S8 depth-stencil format",
            ),
        ];
        required
            .into_iter()
            .find(|(present, _)| !present)
            .map(|(_, name)| name)
    }

    /// Whether an optional feature is available.
    pub fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::Depth32FloatStencil8 => self.supports_d32s8,
            Feature::TimestampQuery => self.timestamp_compute_and_graphics,
            Feature::PipelineStatisticsQuery => self.pipeline_statistics_query,
            Feature::TextureCompressionBC => self.texture_compression_bc,
            Feature::TextureCompressionETC2 => self.texture_compression_etc2,
            Feature::TextureCompressionASTC => self.texture_compression_astc_ldr,
            Feature::TextureCompressionASTCHDR => self.texture_compression_astc_hdr,
            Feature::IndirectFirstInstance => self.draw_indirect_first_instance,
            // 16-bit storage is core in 1.1 and float16 arithmetic in 1.2.
            Feature::ShaderFloat16 => true,
            Feature::RG11B10UfloatRenderable => self.rg11b10_renderable,
            Feature::BGRA8UnormStorage => self.bgra8_storage,
            Feature::TextureComponentSwizzle => true,
            Feature::DepthBoundsTest => self.depth_bounds,
            Feature::SamplerClampToBorder => true,
            Feature::SamplerMirrorClampToEdge => self.sampler_mirror_clamp_to_edge,
            Feature::SamplerMinMax => self.sampler_filter_minmax,
            Feature::Predication => self.conditional_rendering,
            Feature::DescriptorIndexing => self.descriptor_indexing,
            Feature::VariableRateShading => self.pipeline_fragment_shading_rate,
            Feature::VariableRateShadingTier2 => self.attachment_fragment_shading_rate,
            Feature::RayTracing => {
                self.buffer_device_address
                    && self.acceleration_structure
                    && self.ray_tracing_pipeline
            }
            Feature::RayTracingTier2 => self.ray_query && self.supports(Feature::RayTracing),
            Feature::MeshShader => self.mesh_shader && self.task_shader,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// An adapter with exactly the mandatory feature set.
    pub(crate) fn baseline() -> AdapterFeatures {
        AdapterFeatures {
            robust_buffer_access: true,
            full_draw_index_uint32: true,
            image_cube_array: true,
            independent_blend: true,
            sample_rate_shading: true,
            depth_clamp: true,
            depth_bias_clamp: true,
            texture_compression_bc: true,
            occlusion_query_precise: true,
            fragment_stores_and_atomics: true,
            shader_clip_distance: true,
            descriptor_indexing: true,
            runtime_descriptor_array: true,
            descriptor_binding_partially_bound: true,
            descriptor_binding_variable_descriptor_count: true,
            shader_sampled_image_array_non_uniform_indexing: true,
            timeline_semaphore: true,
            synchronization2: true,
            dynamic_rendering: true,
            supports_d32s8: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_baseline_is_suitable() {
        assert_eq!(baseline().missing_mandatory(), None);
    }

    #[test]
    fn test_missing_mandatory_reports_name() {
        let features = AdapterFeatures {
            dynamic_rendering: false,
            ..baseline()
        };
        assert_eq!(features.missing_mandatory(), Some("dynamicRendering"));
    }

    #[test]
    fn test_mobile_compression_satisfies_requirement() {
        let mobile = AdapterFeatures {
            texture_compression_bc: false,
            texture_compression_etc2: true,
            texture_compression_astc_ldr: true,
            ..baseline()
        };
        assert_eq!(mobile.missing_mandatory(), None);

        let etc_only = AdapterFeatures {
            texture_compression_astc_ldr: false,
            ..mobile
        };
        assert!(etc_only.missing_mandatory().is_some());
    }

    #[test]
    fn test_ray_tracing_tiers() {
        let mut features = baseline();
        assert!(!features.supports(Feature::RayTracing));

        features.buffer_device_address = true;
        features.acceleration_structure = true;
        features.ray_tracing_pipeline = true;
        assert!(features.supports(Feature::RayTracing));
        assert!(!features.supports(Feature::RayTracingTier2));

        features.ray_query = true;
        assert!(features.supports(Feature::RayTracingTier2));
    }

    #[test]
    fn test_mesh_shader_needs_task_shader() {
        let features = AdapterFeatures {
            mesh_shader: true,
            ..baseline()
        };
        assert!(!features.supports(Feature::MeshShader));
        assert!(AdapterFeatures { task_shader: true, ..features }.supports(Feature::MeshShader));
    }

    #[test]
    fn test_always_available_features() {
        let features = AdapterFeatures::default();
        assert!(features.supports(Feature::ShaderFloat16));
        assert!(features.supports(Feature::SamplerClampToBorder));
        assert!(!features.supports(Feature::DepthBoundsTest));
    }

    #[test]
    fn test_chain_link_resets_stale_pointers() {
        let extensions = PhysicalDeviceExtensions {
            mesh_shader: true,
            ..Default::default()
        };
        let mut chain = FeatureChain::default();
        let first_len = {
            let features2 = chain.link(vk::API_VERSION_1_3, &extensions);
            chain_len(features2.p_next)
        };
        let second_len = {
            let features2 = chain.link(vk::API_VERSION_1_3, &extensions);
            chain_len(features2.p_next)
        };
        // 1.1 + 1.2 + 1.3 + mesh shader
        assert_eq!(first_len, 4);
        assert_eq!(second_len, first_len);
    }

    fn chain_len(mut next: *mut std::ffi::c_void) -> usize {
        let mut len = 0;
        while !next.is_null() {
            len += 1;
            // SAFETY: every element of the chain is a live BaseOutStructure.
            next = unsafe { (*(next as *mut vk::BaseOutStructure)).p_next as *mut _ };
        }
        len
    }
}
