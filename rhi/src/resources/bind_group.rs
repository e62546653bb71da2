//! Bind group resource.
//!
//! A bind group is one native descriptor set. Every written slot of its
//! layout is populated on creation: slots the caller supplied no entry for
//! point at the device's null buffer, image or sampler.

use std::sync::Arc;

use ash::vk;

use crate::backend::vulkan::deferred::DeferredResource;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::null_resources::{NULL_BUFFER_SIZE, NULL_IMAGE_LAYOUT};
use crate::resources::{BindGroupLayout, Buffer, LayoutSlot, Sampler, TextureView};
use crate::types::{BindingType, TextureViewDimension, WHOLE_SIZE};

/// A resource bound to a slot.
#[derive(Debug, Clone)]
pub enum BindingResource {
    Buffer {
        buffer: Arc<Buffer>,
        offset: u64,
        /// Bound range in bytes, or [`WHOLE_SIZE`].
        size: u64,
    },
    Texture(Arc<TextureView>),
    Sampler(Arc<Sampler>),
}

impl BindingResource {
    /// Bind a whole buffer.
    pub fn buffer(buffer: Arc<Buffer>) -> Self {
        Self::Buffer {
            buffer,
            offset: 0,
            size: WHOLE_SIZE,
        }
    }

    fn kind(&self) -> ResourceKind {
        match self {
            Self::Buffer { .. } => ResourceKind::Buffer,
            Self::Texture(_) => ResourceKind::Texture,
            Self::Sampler(_) => ResourceKind::Sampler,
        }
    }
}

/// One resource of a bind group.
#[derive(Debug, Clone)]
pub struct BindGroupEntry {
    /// Binding as declared in the layout entry.
    pub binding: u32,
    /// Element of an arrayed slot.
    pub array_element: u32,
    pub resource: BindingResource,
}

impl BindGroupEntry {
    pub fn new(binding: u32, resource: BindingResource) -> Self {
        Self {
            binding,
            array_element: 0,
            resource,
        }
    }

    pub fn with_array_element(mut self, array_element: u32) -> Self {
        self.array_element = array_element;
        self
    }
}

/// Descriptor for creating a bind group.
#[derive(Debug, Clone, Default)]
pub struct BindGroupDescriptor {
    pub label: Option<String>,
    pub entries: Vec<BindGroupEntry>,
}

impl BindGroupDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_entry(mut self, binding: u32, resource: BindingResource) -> Self {
        self.entries.push(BindGroupEntry::new(binding, resource));
        self
    }

    pub fn with_buffer(self, binding: u32, buffer: Arc<Buffer>) -> Self {
        self.with_entry(binding, BindingResource::buffer(buffer))
    }

    pub fn with_texture(self, binding: u32, view: Arc<TextureView>) -> Self {
        self.with_entry(binding, BindingResource::Texture(view))
    }

    pub fn with_sampler(self, binding: u32, sampler: Arc<Sampler>) -> Self {
        self.with_entry(binding, BindingResource::Sampler(sampler))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResourceKind {
    Buffer,
    Texture,
    Sampler,
}

/// Whether a resource of `kind` can fill a slot of type `ty`.
pub(crate) fn accepts(ty: &BindingType, kind: ResourceKind) -> bool {
    matches!(
        (ty, kind),
        (BindingType::Buffer { .. }, ResourceKind::Buffer)
            | (
                BindingType::Texture { .. } | BindingType::StorageTexture { .. },
                ResourceKind::Texture
            )
            | (BindingType::Sampler(_), ResourceKind::Sampler)
    )
}

/// Source of one descriptor write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteSource {
    /// Index into the caller's entries.
    Entry(usize),
    Null,
}

/// One descriptor of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PlannedWrite {
    pub slot: usize,
    pub array_element: u32,
    pub source: WriteSource,
}

/// Resolve every descriptor of every written slot to an entry or to a null
/// resource.
///
/// `entries` holds `(binding, array_element, kind)` per caller entry. The
/// first slot, in native binding order, whose user binding matches and whose
/// type accepts the kind wins. Immutable sampler and acceleration structure
/// slots are never written.
pub(crate) fn plan_writes(
    slots: &[LayoutSlot],
    entries: &[(u32, u32, ResourceKind)],
) -> Vec<PlannedWrite> {
    let mut writes = Vec::new();
    for (slot_index, slot) in slots.iter().enumerate() {
        if !slot.is_written() || matches!(slot.ty, BindingType::AccelerationStructure) {
            continue;
        }
        for element in 0..slot.count {
            let source = entries
                .iter()
                .position(|&(binding, array_element, kind)| {
                    binding == slot.binding
                        && array_element == element
                        && accepts(&slot.ty, kind)
                        && first_accepting_slot(slots, binding, kind) == Some(slot_index)
                })
                .map_or(WriteSource::Null, WriteSource::Entry);
            writes.push(PlannedWrite {
                slot: slot_index,
                array_element: element,
                source,
            });
        }
    }
    writes
}

fn first_accepting_slot(slots: &[LayoutSlot], binding: u32, kind: ResourceKind) -> Option<usize> {
    slots
        .iter()
        .position(|slot| slot.binding == binding && slot.is_written() && accepts(&slot.ty, kind))
}

/// Entries that match no slot of the layout.
pub(crate) fn unmatched_entries(
    slots: &[LayoutSlot],
    entries: &[(u32, u32, ResourceKind)],
) -> Vec<usize> {
    entries
        .iter()
        .enumerate()
        .filter(|&(_, &(binding, element, kind))| {
            first_accepting_slot(slots, binding, kind)
                .is_none_or(|slot| element >= slots[slot].count)
        })
        .map(|(index, _)| index)
        .collect()
}

fn view_dimension(ty: &BindingType) -> TextureViewDimension {
    match ty {
        BindingType::Texture { view_dimension, .. }
        | BindingType::StorageTexture { view_dimension, .. } => *view_dimension,
        _ => TextureViewDimension::View2D,
    }
}

fn image_layout(descriptor_type: vk::DescriptorType) -> vk::ImageLayout {
    if descriptor_type == vk::DescriptorType::STORAGE_IMAGE {
        vk::ImageLayout::GENERAL
    } else {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    }
}

enum DescriptorInfo {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

/// A set of resources bound together.
pub struct BindGroup {
    device: Arc<GraphicsDevice>,
    layout: Arc<BindGroupLayout>,
    label: Option<String>,
    /// Kept alive while the descriptor set may be referenced.
    resources: Vec<BindingResource>,
    pool: vk::DescriptorPool,
    handle: vk::DescriptorSet,
}

impl BindGroup {
    pub(crate) fn new(
        device: &Arc<GraphicsDevice>,
        layout: &Arc<BindGroupLayout>,
        descriptor: &BindGroupDescriptor,
    ) -> Result<Arc<Self>, GraphicsError> {
        if !layout.is_valid() {
            return Err(GraphicsError::InvalidParameter(format!(
                "Bind group {:?} uses an invalid layout",
                descriptor.label
            )));
        }

        let keys: Vec<(u32, u32, ResourceKind)> = descriptor
            .entries
            .iter()
            .map(|e| (e.binding, e.array_element, e.resource.kind()))
            .collect();
        for index in unmatched_entries(layout.slots(), &keys) {
            log::warn!(
                "Bind group {:?}: entry at binding {} matches no slot of the layout",
                descriptor.label,
                descriptor.entries[index].binding
            );
        }

        let (pool, handle) = device.allocate_descriptor_set(layout.handle(), None)?;
        let plan = plan_writes(layout.slots(), &keys);
        let infos: Vec<DescriptorInfo> = plan
            .iter()
            .map(|write| {
                let slot = &layout.slots()[write.slot];
                match write.source {
                    WriteSource::Entry(index) => {
                        entry_info(&descriptor.entries[index].resource, slot.descriptor_type)
                    }
                    WriteSource::Null => null_info(device, slot),
                }
            })
            .collect();

        let writes: Vec<vk::WriteDescriptorSet> = plan
            .iter()
            .zip(&infos)
            .map(|(write, info)| {
                let slot = &layout.slots()[write.slot];
                let native = vk::WriteDescriptorSet::default()
                    .dst_set(handle)
                    .dst_binding(slot.native_binding)
                    .dst_array_element(write.array_element)
                    .descriptor_type(slot.descriptor_type);
                match info {
                    DescriptorInfo::Buffer(info) => native.buffer_info(std::slice::from_ref(info)),
                    DescriptorInfo::Image(info) => native.image_info(std::slice::from_ref(info)),
                }
            })
            .collect();

        unsafe { device.raw().update_descriptor_sets(&writes, &[]) };

        if let Some(label) = &descriptor.label {
            device.debug_names().set_object_name(handle, label);
        }
        log::trace!(
            "Created bind group {:?}: {} descriptors, {} null",
            descriptor.label,
            plan.len(),
            plan.iter().filter(|w| w.source == WriteSource::Null).count()
        );

        Ok(Arc::new(Self {
            device: Arc::clone(device),
            layout: Arc::clone(layout),
            label: descriptor.label.clone(),
            resources: descriptor.entries.iter().map(|e| e.resource.clone()).collect(),
            pool,
            handle,
        }))
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn layout(&self) -> &Arc<BindGroupLayout> {
        &self.layout
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Resources referenced by this group.
    pub fn resources(&self) -> &[BindingResource] {
        &self.resources
    }

    pub(crate) fn handle(&self) -> vk::DescriptorSet {
        self.handle
    }
}

fn entry_info(resource: &BindingResource, descriptor_type: vk::DescriptorType) -> DescriptorInfo {
    match resource {
        BindingResource::Buffer {
            buffer,
            offset,
            size,
        } => DescriptorInfo::Buffer(vk::DescriptorBufferInfo {
            buffer: buffer.handle(),
            offset: *offset,
            range: if *size == WHOLE_SIZE {
                vk::WHOLE_SIZE
            } else {
                *size
            },
        }),
        BindingResource::Texture(view) => DescriptorInfo::Image(vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: view.handle(),
            image_layout: image_layout(descriptor_type),
        }),
        BindingResource::Sampler(sampler) => DescriptorInfo::Image(vk::DescriptorImageInfo {
            sampler: sampler.handle(),
            image_view: vk::ImageView::null(),
            image_layout: vk::ImageLayout::UNDEFINED,
        }),
    }
}

fn null_info(device: &GraphicsDevice, slot: &LayoutSlot) -> DescriptorInfo {
    let null = device.null_resources();
    match slot.ty {
        BindingType::Buffer { .. } => DescriptorInfo::Buffer(vk::DescriptorBufferInfo {
            buffer: null.buffer(),
            offset: 0,
            range: NULL_BUFFER_SIZE,
        }),
        BindingType::Sampler(_) | BindingType::StaticSampler(_) => {
            DescriptorInfo::Image(vk::DescriptorImageInfo {
                sampler: null.sampler(),
                image_view: vk::ImageView::null(),
                image_layout: vk::ImageLayout::UNDEFINED,
            })
        }
        _ => DescriptorInfo::Image(vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: null.view(view_dimension(&slot.ty)),
            image_layout: NULL_IMAGE_LAYOUT,
        }),
    }
}

impl Drop for BindGroup {
    fn drop(&mut self) {
        self.device.defer_destroy(DeferredResource::DescriptorSet {
            pool: self.pool,
            set: self.handle,
        });
    }
}

impl std::fmt::Debug for BindGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindGroup")
            .field("label", &self.label)
            .field("layout", &self.layout.label())
            .field("resources", &self.resources.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(BindGroup: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::build_slots;
    use crate::types::{BindGroupLayoutEntry, SamplerDescriptor};

    fn material_slots() -> Vec<LayoutSlot> {
        build_slots(&[
            BindGroupLayoutEntry::constant_buffer(0),
            BindGroupLayoutEntry::texture(0).with_count(2),
            BindGroupLayoutEntry::sampler(0),
            BindGroupLayoutEntry::static_sampler(1, SamplerDescriptor::default()),
        ])
    }

    #[test]
    fn test_empty_entries_fill_every_descriptor_with_null() {
        let slots = material_slots();
        let writes = plan_writes(&slots, &[]);
        // 1 buffer + 2 texture elements + 1 sampler, static sampler skipped.
        assert_eq!(writes.len(), 4);
        assert!(writes.iter().all(|w| w.source == WriteSource::Null));
    }

    #[test]
    fn test_entries_resolve_by_binding_and_kind() {
        let slots = material_slots();
        let entries = [
            (0, 0, ResourceKind::Sampler),
            (0, 1, ResourceKind::Texture),
            (0, 0, ResourceKind::Buffer),
        ];
        let writes = plan_writes(&slots, &entries);
        let sources: Vec<(u32, u32, WriteSource)> = writes
            .iter()
            .map(|w| (slots[w.slot].native_binding, w.array_element, w.source))
            .collect();
        assert_eq!(
            sources,
            vec![
                (0, 0, WriteSource::Entry(2)),
                (1000, 0, WriteSource::Null),
                (1000, 1, WriteSource::Entry(1)),
                (3000, 0, WriteSource::Entry(0)),
            ]
        );
    }

    #[test]
    fn test_first_slot_in_native_order_wins_for_shared_binding() {
        let slots = build_slots(&[
            BindGroupLayoutEntry::storage_buffer(0, false),
            BindGroupLayoutEntry::constant_buffer(0),
        ]);
        let writes = plan_writes(&slots, &[(0, 0, ResourceKind::Buffer)]);
        assert_eq!(writes[0].source, WriteSource::Entry(0));
        assert_eq!(writes[1].source, WriteSource::Null);
    }

    #[test]
    fn test_unmatched_entries_reported() {
        let slots = material_slots();
        let entries = [
            (5, 0, ResourceKind::Buffer),
            (0, 2, ResourceKind::Texture),
            (1, 0, ResourceKind::Sampler),
            (0, 0, ResourceKind::Texture),
        ];
        assert_eq!(unmatched_entries(&slots, &entries), vec![0, 1, 2]);
    }

    #[test]
    fn test_acceleration_structure_slot_is_skipped() {
        let slots = build_slots(&[BindGroupLayoutEntry::new(
            0,
            BindingType::AccelerationStructure,
        )]);
        assert!(plan_writes(&slots, &[]).is_empty());
    }

    #[test]
    fn test_storage_images_use_general_layout() {
        assert_eq!(
            image_layout(vk::DescriptorType::STORAGE_IMAGE),
            vk::ImageLayout::GENERAL
        );
        assert_eq!(
            image_layout(vk::DescriptorType::SAMPLED_IMAGE),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }
}
