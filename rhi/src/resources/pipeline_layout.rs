//! Pipeline layout resource.

use std::sync::Arc;

use ash::vk;

use crate::backend::vulkan::conversion::convert_shader_stages;
use crate::backend::vulkan::deferred::DeferredResource;
use crate::device::GraphicsDevice;
use crate::resources::BindGroupLayout;
use crate::types::{MAX_BIND_GROUPS, PushConstantRange};

/// Assign push constant offsets by accumulating sizes in declaration order.
pub(crate) fn push_constant_offsets(ranges: &[PushConstantRange]) -> Vec<u32> {
    ranges
        .iter()
        .scan(0u32, |offset, range| {
            let current = *offset;
            *offset += range.size;
            Some(current)
        })
        .collect()
}

/// Descriptor for creating a pipeline layout.
#[derive(Debug, Clone, Default)]
pub struct PipelineLayoutDescriptor {
    pub label: Option<String>,
    /// Set `i` of the pipeline uses `bind_group_layouts[i]`.
    pub bind_group_layouts: Vec<Arc<BindGroupLayout>>,
    pub push_constant_ranges: Vec<PushConstantRange>,
}

impl PipelineLayoutDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_bind_group_layout(mut self, layout: Arc<BindGroupLayout>) -> Self {
        self.bind_group_layouts.push(layout);
        self
    }

    pub fn with_push_constants(mut self, range: PushConstantRange) -> Self {
        self.push_constant_ranges.push(range);
        self
    }
}

/// A push constant range with its assigned offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NativePushRange {
    pub offset: u32,
    pub size: u32,
    pub stages: vk::ShaderStageFlags,
}

/// Bind group layouts and push constant ranges shared by pipelines.
///
/// Like other pipeline objects, creation failures are logged and leave the
/// layout invalid instead of returning an error.
pub struct PipelineLayout {
    device: Arc<GraphicsDevice>,
    label: Option<String>,
    bind_group_layouts: Vec<Arc<BindGroupLayout>>,
    push_ranges: Vec<NativePushRange>,
    handle: vk::PipelineLayout,
}

impl PipelineLayout {
    pub(crate) fn new(
        device: &Arc<GraphicsDevice>,
        descriptor: &PipelineLayoutDescriptor,
    ) -> Arc<Self> {
        let push_ranges: Vec<NativePushRange> = descriptor
            .push_constant_ranges
            .iter()
            .zip(push_constant_offsets(&descriptor.push_constant_ranges))
            .map(|(range, offset)| NativePushRange {
                offset,
                size: range.size,
                stages: convert_shader_stages(range.visibility),
            })
            .collect();

        let handle = match Self::create_handle(device, descriptor, &push_ranges) {
            Ok(handle) => {
                if let Some(label) = &descriptor.label {
                    device.debug_names().set_object_name(handle, label);
                }
                log::trace!(
                    "Created pipeline layout {:?}: {} sets, {} push constant ranges",
                    descriptor.label,
                    descriptor.bind_group_layouts.len(),
                    push_ranges.len()
                );
                handle
            }
            Err(message) => {
                log::error!(
                    "Failed to create pipeline layout {:?}: {}",
                    descriptor.label,
                    message
                );
                vk::PipelineLayout::null()
            }
        };

        Arc::new(Self {
            device: Arc::clone(device),
            label: descriptor.label.clone(),
            bind_group_layouts: descriptor.bind_group_layouts.clone(),
            push_ranges,
            handle,
        })
    }

    fn create_handle(
        device: &GraphicsDevice,
        descriptor: &PipelineLayoutDescriptor,
        push_ranges: &[NativePushRange],
    ) -> Result<vk::PipelineLayout, String> {
        if descriptor.bind_group_layouts.len() > MAX_BIND_GROUPS {
            return Err(format!(
                "{} bind group layouts exceed the maximum of {}",
                descriptor.bind_group_layouts.len(),
                MAX_BIND_GROUPS
            ));
        }
        if let Some(invalid) = descriptor
            .bind_group_layouts
            .iter()
            .position(|layout| !layout.is_valid())
        {
            return Err(format!("bind group layout {} is invalid", invalid));
        }
        let total: u32 = push_ranges.iter().map(|r| r.size).sum();
        let limit = device.limits().max_push_constants_size;
        if total > limit {
            return Err(format!(
                "{} bytes of push constants exceed the device limit of {}",
                total, limit
            ));
        }

        let set_layouts: Vec<vk::DescriptorSetLayout> = descriptor
            .bind_group_layouts
            .iter()
            .map(|layout| layout.handle())
            .collect();
        let ranges: Vec<vk::PushConstantRange> = push_ranges
            .iter()
            .map(|range| vk::PushConstantRange {
                stage_flags: range.stages,
                offset: range.offset,
                size: range.size,
            })
            .collect();
        let info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&ranges);

        unsafe { device.raw().create_pipeline_layout(&info, None) }.map_err(|e| format!("{:?}", e))
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn is_valid(&self) -> bool {
        self.handle != vk::PipelineLayout::null()
    }

    pub fn bind_group_layouts(&self) -> &[Arc<BindGroupLayout>] {
        &self.bind_group_layouts
    }

    pub fn push_constant_range_count(&self) -> usize {
        self.push_ranges.len()
    }

    pub(crate) fn push_range(&self, index: usize) -> Option<NativePushRange> {
        self.push_ranges.get(index).copied()
    }

    pub(crate) fn handle(&self) -> vk::PipelineLayout {
        self.handle
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        if self.is_valid() {
            self.device
                .defer_destroy(DeferredResource::PipelineLayout(self.handle));
        }
    }
}

impl std::fmt::Debug for PipelineLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineLayout")
            .field("label", &self.label)
            .field("bind_group_layouts", &self.bind_group_layouts.len())
            .field("push_ranges", &self.push_ranges)
            .finish()
    }
}

static_assertions::assert_impl_all!(PipelineLayout: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ShaderStages;

    #[test]
    fn test_push_constant_offsets_accumulate() {
        let ranges = [
            PushConstantRange::new(64, ShaderStages::VERTEX),
            PushConstantRange::new(16, ShaderStages::FRAGMENT),
            PushConstantRange::new(48, ShaderStages::ALL),
        ];
        assert_eq!(push_constant_offsets(&ranges), vec![0, 64, 80]);
    }

    #[test]
    fn test_push_constant_offsets_empty() {
        assert!(push_constant_offsets(&[]).is_empty());
    }
}
