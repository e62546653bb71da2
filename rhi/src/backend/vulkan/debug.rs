//! Validation layer messenger and debug-utils object naming.

use std::ffi::{CStr, CString};

use ash::vk;

use crate::error::GraphicsError;

/// Create a debug messenger for validation layer output.
///
/// `verbose` additionally routes INFO and VERBOSE messages.
pub fn create_debug_messenger(
    debug_utils: &ash::ext::debug_utils::Instance,
    verbose: bool,
) -> Result<vk::DebugUtilsMessengerEXT, GraphicsError> {
    let mut severity =
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING;
    if verbose {
        severity |= vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE;
    }

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(severity)
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!(
                "Failed to create debug messenger: {:?}",
                e
            ))
        })?;

    Ok(messenger)
}

/// Debug callback function for validation layer messages.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() {
        String::from("(no message)")
    } else {
        // SAFETY: callback_data is guaranteed to be valid by the Vulkan driver
        let data = unsafe { *callback_data };
        if data.p_message.is_null() {
            String::from("(null message)")
        } else {
            // SAFETY: p_message is a valid null-terminated string from the Vulkan driver
            unsafe { CStr::from_ptr(data.p_message) }
                .to_string_lossy()
                .into_owned()
        }
    };

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Unknown",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan {}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan {}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!("[Vulkan {}] {}", type_str, message);
        }
        _ => {
            log::debug!("[Vulkan {}] {}", type_str, message);
        }
    }

    vk::FALSE
}

/// Convert a label to a C string, dropping interior NUL bytes.
pub fn label_cstring(label: &str) -> CString {
    CString::new(label.replace('\0', "")).unwrap_or_default()
}

/// Device-level debug-utils entry points, present when the instance enabled
/// `VK_EXT_debug_utils`. Every method is a no-op otherwise.
#[derive(Clone)]
pub struct DebugNames {
    loader: Option<ash::ext::debug_utils::Device>,
}

impl DebugNames {
    pub fn new(instance: &ash::Instance, device: &ash::Device, enabled: bool) -> Self {
        Self {
            loader: enabled.then(|| ash::ext::debug_utils::Device::new(instance, device)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.loader.is_some()
    }

    /// Attach a debug name to a native object.
    pub fn set_object_name<H: vk::Handle>(&self, handle: H, name: &str) {
        let Some(loader) = &self.loader else {
            return;
        };
        let name = label_cstring(name);
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        if let Err(e) = unsafe { loader.set_debug_utils_object_name(&info) } {
            log::warn!("Failed to set object name {:?}: {:?}", name, e);
        }
    }

    pub fn begin_label(&self, cmd: vk::CommandBuffer, label: &str) {
        if let Some(loader) = &self.loader {
            let name = label_cstring(label);
            let info = vk::DebugUtilsLabelEXT::default().label_name(&name);
            unsafe { loader.cmd_begin_debug_utils_label(cmd, &info) };
        }
    }

    pub fn end_label(&self, cmd: vk::CommandBuffer) {
        if let Some(loader) = &self.loader {
            unsafe { loader.cmd_end_debug_utils_label(cmd) };
        }
    }

    pub fn insert_label(&self, cmd: vk::CommandBuffer, label: &str) {
        if let Some(loader) = &self.loader {
            let name = label_cstring(label);
            let info = vk::DebugUtilsLabelEXT::default().label_name(&name);
            unsafe { loader.cmd_insert_debug_utils_label(cmd, &info) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_cstring_strips_nul() {
        assert_eq!(label_cstring("gbuffer\0albedo").as_bytes(), b"gbufferalbedo");
        assert_eq!(label_cstring("").as_bytes(), b"");
    }
}
