//! Bind group layout resource.
//!
//! Every layout entry becomes one native binding at `binding + register
//! offset`, where the offset depends on the resource kind. The resulting
//! slots are kept sorted by native binding so that bind group writes and
//! dynamic offsets follow the same order the driver expects.

use std::sync::Arc;

use ash::vk;

use crate::backend::vulkan::conversion::convert_shader_stages;
use crate::backend::vulkan::deferred::DeferredResource;
use crate::backend::vulkan::descriptor::{descriptor_type, register_offset};
use crate::device::GraphicsDevice;
use crate::types::{BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingType, ShaderStages};

/// One native binding of a layout.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LayoutSlot {
    /// Binding as declared by the user.
    pub binding: u32,
    /// Binding in the native descriptor set.
    pub native_binding: u32,
    pub ty: BindingType,
    pub visibility: ShaderStages,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
}

impl LayoutSlot {
    /// Whether bind groups write this slot. Immutable samplers are baked
    /// into the layout.
    pub fn is_written(&self) -> bool {
        !matches!(self.ty, BindingType::StaticSampler(_))
    }

    pub fn has_dynamic_offset(&self) -> bool {
        matches!(
            self.ty,
            BindingType::Buffer {
                has_dynamic_offset: true,
                ..
            }
        )
    }
}

/// Translate layout entries into native slots, sorted by native binding.
pub(crate) fn build_slots(entries: &[BindGroupLayoutEntry]) -> Vec<LayoutSlot> {
    let mut slots: Vec<LayoutSlot> = entries
        .iter()
        .map(|entry| LayoutSlot {
            binding: entry.binding,
            native_binding: entry.binding + register_offset(&entry.ty),
            ty: entry.ty.clone(),
            visibility: entry.visibility,
            descriptor_type: descriptor_type(&entry.ty),
            count: entry.descriptor_count(),
        })
        .collect();
    slots.sort_by_key(|slot| slot.native_binding);
    slots
}

/// Native bindings that collide after applying register offsets.
pub(crate) fn duplicate_bindings(slots: &[LayoutSlot]) -> Vec<u32> {
    slots
        .windows(2)
        .filter(|pair| pair[0].native_binding == pair[1].native_binding)
        .map(|pair| pair[1].native_binding)
        .collect()
}

/// Schema of a bind group.
///
/// Creation never fails outright: if the driver rejects the layout the error
/// is logged and [`BindGroupLayout::is_valid`] returns `false`.
pub struct BindGroupLayout {
    device: Arc<GraphicsDevice>,
    descriptor: BindGroupLayoutDescriptor,
    slots: Vec<LayoutSlot>,
    handle: vk::DescriptorSetLayout,
}

impl BindGroupLayout {
    pub(crate) fn new(
        device: &Arc<GraphicsDevice>,
        descriptor: &BindGroupLayoutDescriptor,
    ) -> Arc<Self> {
        let slots = build_slots(&descriptor.entries);
        let handle = match Self::create_handle(device, &slots) {
            Ok(handle) => {
                if let Some(label) = &descriptor.label {
                    device.debug_names().set_object_name(handle, label);
                }
                log::trace!(
                    "Created bind group layout {:?} with {} slots",
                    descriptor.label,
                    slots.len()
                );
                handle
            }
            Err(message) => {
                log::error!(
                    "Failed to create bind group layout {:?}: {}",
                    descriptor.label,
                    message
                );
                vk::DescriptorSetLayout::null()
            }
        };

        Arc::new(Self {
            device: Arc::clone(device),
            descriptor: descriptor.clone(),
            slots,
            handle,
        })
    }

    fn create_handle(
        device: &GraphicsDevice,
        slots: &[LayoutSlot],
    ) -> Result<vk::DescriptorSetLayout, String> {
        let duplicates = duplicate_bindings(slots);
        if !duplicates.is_empty() {
            return Err(format!("duplicate native bindings {:?}", duplicates));
        }

        // Immutable sampler arrays must outlive the create call.
        let mut immutable: Vec<Vec<vk::Sampler>> = Vec::with_capacity(slots.len());
        for slot in slots {
            let samplers = match &slot.ty {
                BindingType::StaticSampler(sampler) => {
                    let handle = device
                        .get_or_create_sampler(sampler)
                        .map_err(|e| format!("static sampler creation failed: {:?}", e))?;
                    vec![handle; slot.count as usize]
                }
                _ => Vec::new(),
            };
            immutable.push(samplers);
        }

        let bindings: Vec<vk::DescriptorSetLayoutBinding> = slots
            .iter()
            .zip(&immutable)
            .map(|(slot, samplers)| {
                let binding = vk::DescriptorSetLayoutBinding::default()
                    .binding(slot.native_binding)
                    .descriptor_type(slot.descriptor_type)
                    .descriptor_count(slot.count)
                    .stage_flags(convert_shader_stages(slot.visibility));
                if samplers.is_empty() {
                    binding
                } else {
                    binding.immutable_samplers(samplers)
                }
            })
            .collect();

        // Acceleration structure slots have no null resource and stay unwritten.
        let binding_flags: Vec<vk::DescriptorBindingFlags> = slots
            .iter()
            .map(|slot| match slot.ty {
                BindingType::AccelerationStructure => vk::DescriptorBindingFlags::PARTIALLY_BOUND,
                _ => vk::DescriptorBindingFlags::empty(),
            })
            .collect();
        let mut flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);

        let mut info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        if binding_flags.iter().any(|flags| !flags.is_empty()) {
            info = info.push_next(&mut flags_info);
        }

        unsafe { device.raw().create_descriptor_set_layout(&info, None) }
            .map_err(|e| format!("{:?}", e))
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn descriptor(&self) -> &BindGroupLayoutDescriptor {
        &self.descriptor
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Whether native creation succeeded.
    pub fn is_valid(&self) -> bool {
        self.handle != vk::DescriptorSetLayout::null()
    }

    /// Number of native bindings.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of dynamic offsets a bind group of this layout consumes.
    pub fn dynamic_offset_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.has_dynamic_offset())
            .map(|slot| slot.count as usize)
            .sum()
    }

    pub(crate) fn slots(&self) -> &[LayoutSlot] {
        &self.slots
    }

    pub(crate) fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }
}

impl Drop for BindGroupLayout {
    fn drop(&mut self) {
        if self.is_valid() {
            self.device
                .defer_destroy(DeferredResource::DescriptorSetLayout(self.handle));
        }
    }
}

impl std::fmt::Debug for BindGroupLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindGroupLayout")
            .field("label", &self.descriptor.label)
            .field("slots", &self.slots.len())
            .field("valid", &self.is_valid())
            .finish()
    }
}

static_assertions::assert_impl_all!(BindGroupLayout: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::vulkan::descriptor::{
        SAMPLER_REGISTER_OFFSET, SHADER_RESOURCE_REGISTER_OFFSET, UNORDERED_ACCESS_REGISTER_OFFSET,
    };
    use crate::types::{PixelFormat, SamplerDescriptor};

    #[test]
    fn test_slots_are_offset_and_sorted() {
        let entries = vec![
            BindGroupLayoutEntry::sampler(0),
            BindGroupLayoutEntry::texture(0),
            BindGroupLayoutEntry::constant_buffer(0),
            BindGroupLayoutEntry::storage_buffer(1, false),
        ];
        let slots = build_slots(&entries);
        let native: Vec<u32> = slots.iter().map(|s| s.native_binding).collect();
        assert_eq!(
            native,
            vec![
                0,
                SHADER_RESOURCE_REGISTER_OFFSET,
                UNORDERED_ACCESS_REGISTER_OFFSET + 1,
                SAMPLER_REGISTER_OFFSET,
            ]
        );
        assert_eq!(slots[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(slots[1].descriptor_type, vk::DescriptorType::SAMPLED_IMAGE);
        assert_eq!(slots[2].descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(slots[3].descriptor_type, vk::DescriptorType::SAMPLER);
        assert!(duplicate_bindings(&slots).is_empty());
    }

    #[test]
    fn test_duplicate_bindings_detected() {
        let entries = vec![
            BindGroupLayoutEntry::constant_buffer(2),
            BindGroupLayoutEntry::constant_buffer(2),
        ];
        assert_eq!(duplicate_bindings(&build_slots(&entries)), vec![2]);
    }

    #[test]
    fn test_static_sampler_slot_is_not_written() {
        let slots = build_slots(&[
            BindGroupLayoutEntry::static_sampler(0, SamplerDescriptor::default()),
            BindGroupLayoutEntry::storage_texture(0, PixelFormat::Rgba8Unorm),
        ]);
        assert!(slots.iter().any(|s| !s.is_written()));
        assert_eq!(slots.iter().filter(|s| s.is_written()).count(), 1);
    }

    #[test]
    fn test_dynamic_slots_counted_with_arrays() {
        let slots = build_slots(&[
            BindGroupLayoutEntry::constant_buffer(0).with_dynamic_offset(),
            BindGroupLayoutEntry::storage_buffer(1, true)
                .with_dynamic_offset()
                .with_count(3),
            BindGroupLayoutEntry::constant_buffer(2),
        ]);
        let dynamic: usize = slots
            .iter()
            .filter(|s| s.has_dynamic_offset())
            .map(|s| s.count as usize)
            .sum();
        assert_eq!(dynamic, 4);
    }
}
