//! Graphics instance.
//!
//! The [`GraphicsInstance`] is the top-level entry point of the RHI. It loads
//! the Vulkan loader, creates the native instance, enumerates adapters and
//! creates presentation surfaces for windows.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::adapter::GraphicsAdapter;
use crate::backend::vulkan::instance::{self as vk_instance, InstanceExtensions};
use crate::error::GraphicsError;
use crate::types::{AdapterType, PowerPreference, ValidationMode};

/// Instance configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescriptor {
    /// Application name reported to the driver.
    pub application_name: String,
    /// Validation layer setup.
    pub validation: ValidationMode,
    /// Adapter preference used by [`GraphicsInstance::request_adapter`].
    pub power_preference: PowerPreference,
}

impl Default for InstanceDescriptor {
    fn default() -> Self {
        Self {
            application_name: "RedLilium".to_string(),
            validation: if cfg!(debug_assertions) {
                ValidationMode::Enabled
            } else {
                ValidationMode::Disabled
            },
            power_preference: PowerPreference::HighPerformance,
        }
    }
}

impl InstanceDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    pub fn with_validation(mut self, validation: ValidationMode) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_power_preference(mut self, power_preference: PowerPreference) -> Self {
        self.power_preference = power_preference;
        self
    }
}

/// The graphics instance owns the Vulkan loader and instance.
///
/// Adapters, devices and surfaces keep the instance alive through an `Arc`,
/// so the native instance is destroyed only after every child object.
///
/// # Thread Safety
///
/// `GraphicsInstance` is `Send + Sync` and can be safely shared across threads.
///
/// # Example
///
/// ```ignore
/// let instance = GraphicsInstance::new(InstanceDescriptor::default())?;
/// let adapter = instance.request_adapter()?;
/// let device = adapter.create_device(&DeviceDescriptor::default())?;
/// ```
pub struct GraphicsInstance {
    entry: ash::Entry,
    instance: ash::Instance,
    api_version: u32,
    extensions: InstanceExtensions,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_loader: Option<ash::khr::surface::Instance>,
    descriptor: InstanceDescriptor,
}

impl GraphicsInstance {
    /// Probe whether a usable Vulkan loader (API 1.2 or newer) is installed.
    ///
    /// The result is not cached; call it once at startup and keep the answer.
    pub fn is_supported() -> bool {
        let Ok(entry) = (unsafe { ash::Entry::load() }) else {
            return false;
        };
        matches!(
            unsafe { entry.try_enumerate_instance_version() },
            Ok(Some(version)) if version >= vk_instance::MINIMUM_API_VERSION
        )
    }

    /// Create a new graphics instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the Vulkan loader is missing or too old, or if
    /// instance creation fails.
    pub fn new(descriptor: InstanceDescriptor) -> Result<Arc<Self>, GraphicsError> {
        log::info!("Creating GraphicsInstance");

        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to load Vulkan: {}", e))
        })?;

        let created = vk_instance::create_instance(
            &entry,
            &descriptor.application_name,
            descriptor.validation,
        )?;

        let surface_loader = created
            .extensions
            .surface
            .then(|| ash::khr::surface::Instance::new(&entry, &created.instance));

        Ok(Arc::new(Self {
            entry,
            instance: created.instance,
            api_version: created.api_version,
            extensions: created.extensions,
            debug_utils: created.debug_utils,
            surface_loader,
            descriptor,
        }))
    }

    /// The descriptor this instance was created with.
    pub fn descriptor(&self) -> &InstanceDescriptor {
        &self.descriptor
    }

    /// Negotiated instance API version.
    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    /// Enumerate every suitable adapter.
    ///
    /// Physical devices that miss a mandatory capability are skipped with a
    /// warning naming the missing item.
    pub fn enumerate_adapters(self: &Arc<Self>) -> Result<Vec<Arc<GraphicsAdapter>>, GraphicsError> {
        let physical_devices = unsafe { self.instance.enumerate_physical_devices() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!(
                "Failed to enumerate physical devices: {:?}",
                e
            ))
        })?;

        let mut adapters = Vec::with_capacity(physical_devices.len());
        for physical_device in physical_devices {
            if let Some(adapter) = GraphicsAdapter::probe(Arc::clone(self), physical_device) {
                adapters.push(Arc::new(adapter));
            }
        }
        Ok(adapters)
    }

    /// Pick an adapter according to the descriptor's power preference.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InitializationFailed`] if no adapter is suitable.
    pub fn request_adapter(self: &Arc<Self>) -> Result<Arc<GraphicsAdapter>, GraphicsError> {
        let mut adapters = self.enumerate_adapters()?;
        let types: Vec<AdapterType> = adapters.iter().map(|a| a.adapter_type()).collect();
        let index = pick_adapter(&types, self.descriptor.power_preference).ok_or_else(|| {
            GraphicsError::InitializationFailed("No suitable Vulkan adapter found".to_string())
        })?;
        let adapter = adapters.swap_remove(index);
        log::info!(
            "Selected adapter: {} ({:?})",
            adapter.name(),
            adapter.adapter_type()
        );
        Ok(adapter)
    }

    /// Create a presentation surface for a window.
    ///
    /// # Errors
    ///
    /// Returns an error if the loader exposes no surface extensions or the
    /// platform surface cannot be created.
    pub fn create_surface<W>(self: &Arc<Self>, window: &W) -> Result<Arc<Surface>, GraphicsError>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        if self.surface_loader.is_none() {
            return Err(GraphicsError::FeatureNotSupported(
                "VK_KHR_surface is not available".to_string(),
            ));
        }

        let display_handle = window.display_handle().map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to get display handle: {}", e))
        })?;
        let window_handle = window.window_handle().map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to get window handle: {}", e))
        })?;

        let handle = unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create Vulkan surface: {:?}", e))
        })?;

        log::info!("Created Vulkan surface");
        Ok(Arc::new(Surface {
            instance: Arc::clone(self),
            handle,
        }))
    }

    pub(crate) fn raw(&self) -> &ash::Instance {
        &self.instance
    }

    pub(crate) fn surface_loader(&self) -> Option<&ash::khr::surface::Instance> {
        self.surface_loader.as_ref()
    }

    pub(crate) fn debug_utils_enabled(&self) -> bool {
        self.extensions.debug_utils
    }
}

impl Drop for GraphicsInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug_utils.take() {
                if messenger != vk::DebugUtilsMessengerEXT::null() {
                    loader.destroy_debug_utils_messenger(messenger, None);
                }
            }
            self.instance.destroy_instance(None);
        }
        log::info!("Destroyed Vulkan instance");
    }
}

impl std::fmt::Debug for GraphicsInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsInstance")
            .field("api_version", &format_args!(
                "{}.{}",
                vk::api_version_major(self.api_version),
                vk::api_version_minor(self.api_version)
            ))
            .field("extensions", &self.extensions)
            .field("validation", &self.descriptor.validation)
            .finish()
    }
}

/// Index of the adapter to use for a power preference.
///
/// HighPerformance prefers discrete GPUs, LowPower prefers integrated ones.
/// Otherwise, or when no adapter of the preferred type exists, the first
/// adapter wins.
pub(crate) fn pick_adapter(types: &[AdapterType], preference: PowerPreference) -> Option<usize> {
    let preferred = match preference {
        PowerPreference::HighPerformance => Some(AdapterType::DiscreteGpu),
        PowerPreference::LowPower => Some(AdapterType::IntegratedGpu),
        PowerPreference::Undefined => None,
    };
    preferred
        .and_then(|ty| types.iter().position(|t| *t == ty))
        .or_else(|| (!types.is_empty()).then_some(0))
}

/// A native presentation surface created from a window.
///
/// Swap chains hold the surface until their own deferred destruction ran.
pub struct Surface {
    instance: Arc<GraphicsInstance>,
    handle: vk::SurfaceKHR,
}

impl Surface {
    /// The instance that created this surface.
    pub fn instance(&self) -> &Arc<GraphicsInstance> {
        &self.instance
    }

    pub(crate) fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        if let Some(loader) = self.instance.surface_loader() {
            unsafe { loader.destroy_surface(self.handle, None) };
        }
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface").field("handle", &self.handle).finish()
    }
}

static_assertions::assert_impl_all!(GraphicsInstance: Send, Sync);
static_assertions::assert_impl_all!(Surface: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_descriptor_builders() {
        let desc = InstanceDescriptor::new()
            .with_application_name("viewer")
            .with_validation(ValidationMode::Verbose)
            .with_power_preference(PowerPreference::LowPower);
        assert_eq!(desc.application_name, "viewer");
        assert_eq!(desc.validation, ValidationMode::Verbose);
        assert_eq!(desc.power_preference, PowerPreference::LowPower);
    }

    #[rstest]
    #[case::discrete_preferred(
        &[AdapterType::IntegratedGpu, AdapterType::DiscreteGpu],
        PowerPreference::HighPerformance,
        Some(1)
    )]
    #[case::integrated_preferred(
        &[AdapterType::DiscreteGpu, AdapterType::IntegratedGpu],
        PowerPreference::LowPower,
        Some(1)
    )]
    #[case::fallback_to_first(&[AdapterType::Cpu, AdapterType::VirtualGpu], PowerPreference::HighPerformance, Some(0))]
    #[case::no_preference(&[AdapterType::IntegratedGpu, AdapterType::DiscreteGpu], PowerPreference::Undefined, Some(0))]
    #[case::empty(&[], PowerPreference::LowPower, None)]
    fn test_pick_adapter(
        #[case] types: &[AdapterType],
        #[case] preference: PowerPreference,
        #[case] expected: Option<usize>,
    ) {
        assert_eq!(pick_adapter(types, preference), expected);
    }
}
