//! Device extension discovery and the list of extensions a device enables.

use std::ffi::CStr;

use ash::vk;

/// Video coding extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoExtensions {
    pub queue: bool,
    pub decode_queue: bool,
    pub decode_h264: bool,
    pub decode_h265: bool,
    pub encode_queue: bool,
}

/// Device extensions the RHI knows how to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhysicalDeviceExtensions {
    // Core in 1.3
    pub maintenance4: bool,
    pub dynamic_rendering: bool,
    pub synchronization2: bool,
    pub extended_dynamic_state: bool,
    pub extended_dynamic_state2: bool,
    pub pipeline_creation_cache_control: bool,
    pub format_feature_flags2: bool,

    pub swapchain: bool,
    pub depth_clip_enable: bool,
    pub conservative_rasterization: bool,
    pub memory_budget: bool,
    pub memory_priority: bool,
    pub deferred_host_operations: bool,
    pub portability_subset: bool,
    pub texture_compression_astc_hdr: bool,
    pub shader_viewport_index_layer: bool,
    pub acceleration_structure: bool,
    pub ray_tracing_pipeline: bool,
    pub pipeline_library: bool,
    pub ray_query: bool,
    pub fragment_shading_rate: bool,
    pub mesh_shader: bool,
    pub conditional_rendering: bool,
    pub video: VideoExtensions,
}

impl PhysicalDeviceExtensions {
    /// Parse the extension names reported by a physical device.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a CStr>) -> Self {
        let mut extensions = Self::default();
        for name in names {
            if let Some(flag) = extensions.flag_mut(name) {
                *flag = true;
            }
        }
        extensions
    }

    /// Query and parse the extensions of a physical device.
    pub fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties =
            match unsafe { instance.enumerate_device_extension_properties(physical_device) } {
                Ok(properties) => properties,
                Err(e) => {
                    log::warn!("Failed to enumerate device extensions: {:?}", e);
                    return Self::default();
                }
            };
        Self::from_names(properties.iter().filter_map(|p| p.extension_name_as_c_str().ok()))
    }

    fn flag_mut(&mut self, name: &CStr) -> Option<&mut bool> {
        let flag = if name == ash::khr::maintenance4::NAME {
            &mut self.maintenance4
        } else if name == ash::khr::dynamic_rendering::NAME {
            &mut self.dynamic_rendering
        } else if name == ash::khr::synchronization2::NAME {
            &mut self.synchronization2
        } else if name == ash::ext::extended_dynamic_state::NAME {
            &mut self.extended_dynamic_state
        } else if name == ash::ext::extended_dynamic_state2::NAME {
            &mut self.extended_dynamic_state2
        } else if name == ash::ext::pipeline_creation_cache_control::NAME {
            &mut self.pipeline_creation_cache_control
        } else if name == ash::khr::format_feature_flags2::NAME {
            &mut self.format_feature_flags2
        } else if name == ash::khr::swapchain::NAME {
            &mut self.swapchain
        } else if name == ash::ext::depth_clip_enable::NAME {
            &mut self.depth_clip_enable
        } else if name == ash::ext::conservative_rasterization::NAME {
            &mut self.conservative_rasterization
        } else if name == ash::ext::memory_budget::NAME {
            &mut self.memory_budget
        } else if name == ash::ext::memory_priority::NAME {
            &mut self.memory_priority
        } else if name == ash::khr::deferred_host_operations::NAME {
            &mut self.deferred_host_operations
        } else if name == ash::khr::portability_subset::NAME {
            &mut self.portability_subset
        } else if name == ash::ext::texture_compression_astc_hdr::NAME {
            &mut self.texture_compression_astc_hdr
        } else if name == ash::ext::shader_viewport_index_layer::NAME {
            &mut self.shader_viewport_index_layer
        } else if name == ash::khr::acceleration_structure::NAME {
            &mut self.acceleration_structure
        } else if name == ash::khr::ray_tracing_pipeline::NAME {
            &mut self.ray_tracing_pipeline
        } else if name == ash::khr::pipeline_library::NAME {
            &mut self.pipeline_library
        } else if name == ash::khr::ray_query::NAME {
            &mut self.ray_query
        } else if name == ash::khr::fragment_shading_rate::NAME {
            &mut self.fragment_shading_rate
        } else if name == ash::ext::mesh_shader::NAME {
            &mut self.mesh_shader
        } else if name == ash::ext::conditional_rendering::NAME {
            &mut self.conditional_rendering
        } else if name == ash::khr::video_queue::NAME {
            &mut self.video.queue
        } else if name == ash::khr::video_decode_queue::NAME {
            &mut self.video.decode_queue
        } else if name == ash::khr::video_decode_h264::NAME {
            &mut self.video.decode_h264
        } else if name == ash::khr::video_decode_h265::NAME {
            &mut self.video.decode_h265
        } else if name == ash::khr::video_encode_queue::NAME {
            &mut self.video.encode_queue
        } else {
            return None;
        };
        Some(flag)
    }

    /// Whether a video decode queue can be created.
    pub fn supports_video_decode(&self) -> bool {
        self.video.queue && self.video.decode_queue && (self.video.decode_h264 || self.video.decode_h265)
    }

    /// Ray tracing needs the acceleration structure and its host-operation dependency.
    pub fn supports_acceleration_structure(&self) -> bool {
        self.acceleration_structure && self.deferred_host_operations
    }

    /// Extensions to enable at device creation for the given API version.
    ///
    /// Extensions promoted to core in 1.3 are only requested on 1.2 devices.
    pub fn enabled_extension_names(&self, api_version: u32) -> Vec<&'static CStr> {
        let mut names = vec![ash::khr::swapchain::NAME];

        if api_version < vk::API_VERSION_1_3 {
            for (present, name) in [
                (self.maintenance4, ash::khr::maintenance4::NAME),
                (self.dynamic_rendering, ash::khr::dynamic_rendering::NAME),
                (self.synchronization2, ash::khr::synchronization2::NAME),
                (self.extended_dynamic_state, ash::ext::extended_dynamic_state::NAME),
                (self.extended_dynamic_state2, ash::ext::extended_dynamic_state2::NAME),
                (
                    self.pipeline_creation_cache_control,
                    ash::ext::pipeline_creation_cache_control::NAME,
                ),
                (self.format_feature_flags2, ash::khr::format_feature_flags2::NAME),
                (
                    self.texture_compression_astc_hdr,
                    ash::ext::texture_compression_astc_hdr::NAME,
                ),
            ] {
                if present {
                    names.push(name);
                }
            }
        }

        for (present, name) in [
            (self.memory_budget, ash::ext::memory_budget::NAME),
            (self.memory_priority, ash::ext::memory_priority::NAME),
            (self.portability_subset, ash::khr::portability_subset::NAME),
            (self.depth_clip_enable, ash::ext::depth_clip_enable::NAME),
            (self.conservative_rasterization, ash::ext::conservative_rasterization::NAME),
            (self.shader_viewport_index_layer, ash::ext::shader_viewport_index_layer::NAME),
            (self.fragment_shading_rate, ash::khr::fragment_shading_rate::NAME),
            (self.mesh_shader, ash::ext::mesh_shader::NAME),
            (self.conditional_rendering, ash::ext::conditional_rendering::NAME),
        ] {
            if present {
                names.push(name);
            }
        }

        if self.supports_acceleration_structure() {
            names.push(ash::khr::deferred_host_operations::NAME);
            names.push(ash::khr::acceleration_structure::NAME);
            if self.ray_tracing_pipeline && self.pipeline_library {
                names.push(ash::khr::ray_tracing_pipeline::NAME);
                names.push(ash::khr::pipeline_library::NAME);
            }
            if self.ray_query {
                names.push(ash::khr::ray_query::NAME);
            }
        }

        if self.supports_video_decode() {
            names.push(ash::khr::video_queue::NAME);
            names.push(ash::khr::video_decode_queue::NAME);
            if self.video.decode_h264 {
                names.push(ash::khr::video_decode_h264::NAME);
            }
            if self.video.decode_h265 {
                names.push(ash::khr::video_decode_h265::NAME);
            }
        }

        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        let extensions = PhysicalDeviceExtensions::from_names([
            ash::khr::swapchain::NAME,
            ash::ext::mesh_shader::NAME,
            ash::khr::video_decode_h265::NAME,
            c"VK_VENDOR_unknown_extension",
        ]);

        assert!(extensions.swapchain);
        assert!(extensions.mesh_shader);
        assert!(extensions.video.decode_h265);
        assert!(!extensions.video.queue);
        assert!(!extensions.dynamic_rendering);
    }

    #[test]
    fn test_promoted_extensions_only_on_old_api() {
        let extensions = PhysicalDeviceExtensions::from_names([
            ash::khr::swapchain::NAME,
            ash::khr::dynamic_rendering::NAME,
            ash::khr::synchronization2::NAME,
        ]);

        let names_12 = extensions.enabled_extension_names(vk::API_VERSION_1_2);
        assert!(names_12.contains(&ash::khr::dynamic_rendering::NAME));
        assert!(names_12.contains(&ash::khr::synchronization2::NAME));

        let names_13 = extensions.enabled_extension_names(vk::API_VERSION_1_3);
        assert_eq!(names_13, vec![ash::khr::swapchain::NAME]);
    }

    #[test]
    fn test_acceleration_structure_requires_host_operations() {
        let mut extensions = PhysicalDeviceExtensions::from_names([
            ash::khr::swapchain::NAME,
            ash::khr::acceleration_structure::NAME,
            ash::khr::ray_query::NAME,
        ]);
        let names = extensions.enabled_extension_names(vk::API_VERSION_1_3);
        assert!(!names.contains(&ash::khr::acceleration_structure::NAME));

        extensions.deferred_host_operations = true;
        let names = extensions.enabled_extension_names(vk::API_VERSION_1_3);
        assert!(names.contains(&ash::khr::deferred_host_operations::NAME));
        assert!(names.contains(&ash::khr::acceleration_structure::NAME));
        assert!(names.contains(&ash::khr::ray_query::NAME));
    }

    #[test]
    fn test_video_decode_needs_codec() {
        let mut extensions = PhysicalDeviceExtensions::from_names([
            ash::khr::video_queue::NAME,
            ash::khr::video_decode_queue::NAME,
        ]);
        assert!(!extensions.supports_video_decode());
        extensions.video.decode_h264 = true;
        assert!(extensions.supports_video_decode());
    }
}
