//! Vulkan instance creation and configuration.

use std::ffi::CStr;

use ash::vk;

use crate::error::GraphicsError;
use crate::types::ValidationMode;

use super::debug;

/// Lowest API version a usable loader and adapter must report.
pub const MINIMUM_API_VERSION: u32 = vk::API_VERSION_1_2;

/// API version requested from the loader.
pub const REQUESTED_API_VERSION: u32 = vk::API_VERSION_1_3;

/// Validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Surface extensions enabled whenever the loader offers them.
const SURFACE_EXTENSIONS: [&CStr; 8] = [
    ash::khr::surface::NAME,
    ash::khr::win32_surface::NAME,
    ash::khr::xlib_surface::NAME,
    ash::khr::xcb_surface::NAME,
    ash::khr::wayland_surface::NAME,
    ash::khr::android_surface::NAME,
    ash::ext::metal_surface::NAME,
    ash::ext::swapchain_colorspace::NAME,
];

/// Instance extensions that were actually enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceExtensions {
    pub surface: bool,
    pub debug_utils: bool,
    pub portability_enumeration: bool,
    pub swapchain_colorspace: bool,
}

/// Everything produced by instance creation.
pub struct CreatedInstance {
    pub instance: ash::Instance,
    pub api_version: u32,
    pub extensions: InstanceExtensions,
    pub debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

/// Pick the instance extensions to enable from the ones the loader reports.
pub fn select_instance_extensions(
    available: &[&CStr],
) -> (Vec<&'static CStr>, InstanceExtensions) {
    let has = |name: &CStr| available.iter().any(|n| *n == name);
    let mut names = Vec::new();
    let mut enabled = InstanceExtensions::default();

    for name in SURFACE_EXTENSIONS {
        if has(name) {
            names.push(name);
        }
    }
    enabled.surface = has(ash::khr::surface::NAME);
    enabled.swapchain_colorspace = has(ash::ext::swapchain_colorspace::NAME);

    // Object naming works without the validation layer.
    if has(ash::ext::debug_utils::NAME) {
        names.push(ash::ext::debug_utils::NAME);
        enabled.debug_utils = true;
    }
    if has(ash::khr::portability_enumeration::NAME) {
        names.push(ash::khr::portability_enumeration::NAME);
        enabled.portability_enumeration = true;
    }

    (names, enabled)
}

/// Create a Vulkan instance.
pub fn create_instance(
    entry: &ash::Entry,
    application_name: &str,
    validation: ValidationMode,
) -> Result<CreatedInstance, GraphicsError> {
    let loader_version = match unsafe { entry.try_enumerate_instance_version() } {
        Ok(Some(version)) => version,
        Ok(None) => vk::API_VERSION_1_0,
        Err(e) => {
            return Err(GraphicsError::InitializationFailed(format!(
                "Failed to query Vulkan instance version: {:?}",
                e
            )));
        }
    };
    if loader_version < MINIMUM_API_VERSION {
        return Err(GraphicsError::InitializationFailed(format!(
            "Vulkan 1.2 is required, loader reports {}.{}",
            vk::api_version_major(loader_version),
            vk::api_version_minor(loader_version)
        )));
    }
    let api_version = loader_version.min(REQUESTED_API_VERSION);

    let validation_requested = validation != ValidationMode::Disabled;
    let validation_available = validation_requested && check_validation_layer_support(entry);
    if validation_requested && !validation_available {
        log::warn!("Validation layers requested but not available");
    }

    let available = unsafe { entry.enumerate_instance_extension_properties(None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!(
            "Failed to enumerate instance extensions: {:?}",
            e
        ))
    })?;
    let available_names: Vec<&CStr> = available
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok())
        .collect();
    let (extension_names, extensions) = select_instance_extensions(&available_names);
    let extension_ptrs: Vec<*const std::ffi::c_char> =
        extension_names.iter().map(|n| n.as_ptr()).collect();

    let app_name = debug::label_cstring(application_name);
    let engine_name = c"RedLilium Engine";

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(api_version);

    let layer_names: Vec<*const std::ffi::c_char> = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    let mut create_flags = vk::InstanceCreateFlags::empty();
    if extensions.portability_enumeration {
        create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let create_info = vk::InstanceCreateInfo::default()
        .flags(create_flags)
        .application_info(&app_info)
        .enabled_extension_names(&extension_ptrs)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })?;

    let debug_utils = if extensions.debug_utils {
        let loader = ash::ext::debug_utils::Instance::new(entry, &instance);
        if validation_available {
            match debug::create_debug_messenger(&loader, validation == ValidationMode::Verbose) {
                Ok(messenger) => Some((loader, messenger)),
                Err(e) => {
                    log::warn!("{}", e);
                    Some((loader, vk::DebugUtilsMessengerEXT::null()))
                }
            }
        } else {
            Some((loader, vk::DebugUtilsMessengerEXT::null()))
        }
    } else {
        None
    };

    log::info!(
        "Created Vulkan instance (API {}.{}, validation: {})",
        vk::api_version_major(api_version),
        vk::api_version_minor(api_version),
        validation_available
    );

    Ok(CreatedInstance {
        instance,
        api_version,
        extensions,
        debug_utils,
    })
}

/// Check if the validation layer is available.
fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let available_layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(_) => return false,
    };

    available_layers
        .iter()
        .any(|layer| {
            layer
                .layer_name_as_c_str()
                .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_instance_extensions() {
        let available = [
            ash::khr::surface::NAME,
            ash::khr::xlib_surface::NAME,
            ash::ext::debug_utils::NAME,
            c"VK_KHR_get_physical_device_properties2",
        ];
        let (names, enabled) = select_instance_extensions(&available);

        assert!(enabled.surface);
        assert!(enabled.debug_utils);
        assert!(!enabled.portability_enumeration);
        assert_eq!(
            names,
            vec![
                ash::khr::surface::NAME,
                ash::khr::xlib_surface::NAME,
                ash::ext::debug_utils::NAME
            ]
        );
    }

    #[test]
    fn test_headless_loader() {
        let (names, enabled) = select_instance_extensions(&[]);
        assert!(names.is_empty());
        assert!(!enabled.surface);
    }
}
