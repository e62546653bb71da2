//! Shader module resource holding SPIR-V code.

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::ShaderStage;

/// First word of every SPIR-V binary.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode a little-endian SPIR-V byte stream into words.
///
/// # Errors
///
/// Returns [`GraphicsError::InvalidParameter`] when the length is not a
/// multiple of four or the magic number is missing.
pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>, GraphicsError> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(GraphicsError::InvalidParameter(format!(
            "SPIR-V length {} is not a non-zero multiple of 4",
            bytes.len()
        )));
    }
    let words: Vec<u32> = match bytemuck::try_cast_slice::<u8, u32>(bytes) {
        Ok(words) if cfg!(target_endian = "little") => words.to_vec(),
        _ => bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    };
    if words[0] != SPIRV_MAGIC {
        return Err(GraphicsError::InvalidParameter(format!(
            "SPIR-V magic number mismatch: {:#010x}",
            words[0]
        )));
    }
    Ok(words)
}

/// Descriptor for creating a shader module.
#[derive(Debug, Clone)]
pub struct ShaderModuleDescriptor {
    pub label: Option<String>,
    pub stage: ShaderStage,
    pub entry_point: String,
    /// SPIR-V words.
    pub code: Vec<u32>,
}

impl ShaderModuleDescriptor {
    /// Describe a module from SPIR-V words with the `main` entry point.
    pub fn new(stage: ShaderStage, code: Vec<u32>) -> Self {
        Self {
            label: None,
            stage,
            entry_point: "main".to_string(),
            code,
        }
    }

    /// Describe a module from a SPIR-V file's bytes.
    pub fn from_bytes(stage: ShaderStage, bytes: &[u8]) -> Result<Self, GraphicsError> {
        Ok(Self::new(stage, spirv_words(bytes)?))
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }
}

/// A compiled shader stage.
pub struct ShaderModule {
    device: Arc<GraphicsDevice>,
    label: Option<String>,
    stage: ShaderStage,
    entry_point: CString,
    handle: vk::ShaderModule,
}

impl ShaderModule {
    pub(crate) fn new(device: &Arc<GraphicsDevice>, descriptor: &ShaderModuleDescriptor) -> Arc<Self> {
        let entry_point = CString::new(descriptor.entry_point.as_str()).unwrap_or_else(|_| {
            log::error!(
                "Shader {:?}: entry point {:?} contains a NUL byte",
                descriptor.label,
                descriptor.entry_point
            );
            CString::default()
        });

        let handle = match Self::create_handle(device, descriptor) {
            Ok(handle) => {
                if let Some(label) = &descriptor.label {
                    device.debug_names().set_object_name(handle, label);
                }
                log::trace!(
                    "Created {:?} shader module {:?} ({} words)",
                    descriptor.stage,
                    descriptor.label,
                    descriptor.code.len()
                );
                handle
            }
            Err(message) => {
                log::error!(
                    "Failed to create shader module {:?}: {}",
                    descriptor.label,
                    message
                );
                vk::ShaderModule::null()
            }
        };

        Arc::new(Self {
            device: Arc::clone(device),
            label: descriptor.label.clone(),
            stage: descriptor.stage,
            entry_point,
            handle,
        })
    }

    fn create_handle(
        device: &GraphicsDevice,
        descriptor: &ShaderModuleDescriptor,
    ) -> Result<vk::ShaderModule, String> {
        if descriptor.code.first() != Some(&SPIRV_MAGIC) {
            return Err("code is not SPIR-V".to_string());
        }
        let features = device.features();
        match descriptor.stage {
            ShaderStage::Mesh if !features.mesh_shader => {
                return Err("mesh shaders are not supported".to_string());
            }
            ShaderStage::Amplification if !features.task_shader => {
                return Err("amplification shaders are not supported".to_string());
            }
            _ => {}
        }
        let info = vk::ShaderModuleCreateInfo::default().code(&descriptor.code);
        unsafe { device.raw().create_shader_module(&info, None) }.map_err(|e| format!("{:?}", e))
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn is_valid(&self) -> bool {
        self.handle != vk::ShaderModule::null() && !self.entry_point.is_empty()
    }

    pub(crate) fn entry_point(&self) -> &std::ffi::CStr {
        &self.entry_point
    }

    pub(crate) fn handle(&self) -> vk::ShaderModule {
        self.handle
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        // Pipelines do not reference modules after creation.
        if self.handle != vk::ShaderModule::null() {
            unsafe { self.device.raw().destroy_shader_module(self.handle, None) };
        }
    }
}

impl std::fmt::Debug for ShaderModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderModule")
            .field("label", &self.label)
            .field("stage", &self.stage)
            .field("entry_point", &self.entry_point)
            .finish()
    }
}

static_assertions::assert_impl_all!(ShaderModule: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes() -> Vec<u8> {
        [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect()
    }

    #[test]
    fn test_spirv_words_decodes_header() {
        let words = spirv_words(&header_bytes()).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
        assert_eq!(words[1], 0x0001_0000);
    }

    #[test]
    fn test_spirv_words_rejects_bad_length() {
        let mut bytes = header_bytes();
        bytes.pop();
        assert!(matches!(
            spirv_words(&bytes),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert!(spirv_words(&[]).is_err());
    }

    #[test]
    fn test_spirv_words_rejects_bad_magic() {
        let mut bytes = header_bytes();
        bytes[0] = 0;
        assert!(spirv_words(&bytes).is_err());
    }

    #[test]
    fn test_descriptor_defaults_to_main() {
        let desc = ShaderModuleDescriptor::from_bytes(ShaderStage::Compute, &header_bytes())
            .unwrap()
            .with_label("cs");
        assert_eq!(desc.entry_point, "main");
        assert_eq!(desc.label.as_deref(), Some("cs"));
    }
}
