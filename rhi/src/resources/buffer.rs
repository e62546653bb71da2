//! GPU buffer resource.

use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use parking_lot::Mutex;

use crate::backend::vulkan::barriers::BarrierBatch;
use crate::backend::vulkan::conversion::convert_buffer_usage;
use crate::backend::vulkan::deferred::DeferredResource;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::{BufferDescriptor, BufferStates, BufferUsage};

/// States a buffer is read in for the given usage, used after uploads.
pub(crate) fn usage_states(usage: BufferUsage) -> BufferStates {
    const TABLE: [(BufferUsage, BufferStates); 7] = [
        (BufferUsage::VERTEX, BufferStates::VERTEX_BUFFER),
        (BufferUsage::INDEX, BufferStates::INDEX_BUFFER),
        (BufferUsage::CONSTANT, BufferStates::CONSTANT_BUFFER),
        (BufferUsage::SHADER_READ, BufferStates::SHADER_RESOURCE),
        (BufferUsage::INDIRECT, BufferStates::INDIRECT_ARGUMENT),
        (BufferUsage::PREDICATION, BufferStates::PREDICATION),
        (
            BufferUsage::RAY_TRACING,
            BufferStates::ACCELERATION_STRUCTURE_BUILD_INPUT,
        ),
    ];
    TABLE
        .iter()
        .filter(|(bit, _)| usage.contains(*bit))
        .fold(BufferStates::UNDEFINED, |acc, (_, state)| acc | *state)
}

/// Size actually allocated for a buffer: constant buffers are padded to the
/// constant offset alignment so that whole-buffer bindings stay legal.
pub(crate) fn padded_size(size: u64, usage: BufferUsage, constant_alignment: u64) -> u64 {
    if usage.contains(BufferUsage::CONSTANT) && constant_alignment > 1 {
        size.div_ceil(constant_alignment) * constant_alignment
    } else {
        size
    }
}

/// A GPU buffer resource.
///
/// Buffers are created by [`GraphicsDevice::create_buffer`] and are
/// reference-counted. Dropping the last reference queues the native buffer
/// for destruction once every frame that may use it retired.
///
/// `Upload` and `Readback` buffers are persistently mapped and can be
/// accessed with [`Buffer::write_data`] and [`Buffer::read_data`].
///
/// # Example
///
/// ```ignore
/// let buffer = device.create_buffer(
///     &BufferDescriptor::new(1024, BufferUsage::CONSTANT).with_memory_type(MemoryType::Upload),
/// )?;
/// buffer.write_data(0, bytemuck::bytes_of(&uniforms))?;
/// ```
pub struct Buffer {
    device: Arc<GraphicsDevice>,
    descriptor: BufferDescriptor,
    handle: vk::Buffer,
    allocation: Option<Allocation>,
    allocated_size: u64,
    mapped: Option<NonNull<u8>>,
    gpu_address: u64,
    /// State last recorded into any command buffer.
    state: Mutex<BufferStates>,
}

// SAFETY: the mapped pointer refers to persistently mapped memory that lives
// as long as the allocation, and every write goes through `&self` methods
// that copy bytes without creating references into the mapping.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    pub(crate) fn new(
        device: &Arc<GraphicsDevice>,
        descriptor: &BufferDescriptor,
        data: Option<&[u8]>,
    ) -> Result<Arc<Self>, GraphicsError> {
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "Buffer size must be greater than 0".to_string(),
            ));
        }
        if let Some(data) = data {
            if data.len() as u64 > descriptor.size {
                return Err(GraphicsError::InvalidParameter(format!(
                    "Initial data of {} bytes exceeds buffer size {}",
                    data.len(),
                    descriptor.size
                )));
            }
        }

        let raw = device.raw();
        let label = descriptor.label.as_deref().unwrap_or("buffer");
        let allocated_size = padded_size(
            descriptor.size,
            descriptor.usage,
            device.limits().min_constant_buffer_offset_alignment,
        );
        let usage = convert_buffer_usage(descriptor.usage, device.features().buffer_device_address);
        let (sharing_mode, families) = device.sharing();
        let buffer_info = vk::BufferCreateInfo::default()
            .size(allocated_size)
            .usage(usage)
            .sharing_mode(sharing_mode)
            .queue_family_indices(families);

        let handle = unsafe { raw.create_buffer(&buffer_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create buffer: {:?}", e))
        })?;

        let requirements = unsafe { raw.get_buffer_memory_requirements(handle) };
        let allocation = match device
            .allocator()
            .allocate(label, requirements, descriptor.memory_type, true)
        {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { raw.destroy_buffer(handle, None) };
                return Err(e);
            }
        };
        if let Err(e) =
            unsafe { raw.bind_buffer_memory(handle, allocation.memory(), allocation.offset()) }
        {
            device.allocator().free(allocation);
            unsafe { raw.destroy_buffer(handle, None) };
            return Err(GraphicsError::ResourceCreationFailed(format!(
                "Failed to bind buffer memory: {:?}",
                e
            )));
        }

        let gpu_address = if usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            unsafe {
                raw.get_buffer_device_address(
                    &vk::BufferDeviceAddressInfo::default().buffer(handle),
                )
            }
        } else {
            0
        };

        let mapped = if descriptor.memory_type.is_host_visible() {
            allocation.mapped_ptr().map(|ptr| ptr.cast::<u8>())
        } else {
            None
        };

        device.debug_names().set_object_name(handle, label);

        let buffer = Self {
            device: Arc::clone(device),
            descriptor: descriptor.clone(),
            handle,
            allocation: Some(allocation),
            allocated_size,
            mapped,
            gpu_address,
            state: Mutex::new(BufferStates::UNDEFINED),
        };

        // From here on a failure drops `buffer`, which defers its destruction.
        if let Some(data) = data.filter(|d| !d.is_empty()) {
            if buffer.mapped.is_some() {
                buffer.write_data(0, data)?;
            } else {
                buffer.upload(data)?;
            }
        }

        log::trace!(
            "Created buffer {:?} ({} bytes, {:?}, {:?})",
            descriptor.label,
            descriptor.size,
            descriptor.usage,
            descriptor.memory_type
        );
        Ok(Arc::new(buffer))
    }

    /// Copy data into a device-local buffer through the copy allocator.
    fn upload(&self, data: &[u8]) -> Result<(), GraphicsError> {
        let device = &self.device;
        let mut context = device.copy_allocator().allocate(device, data.len() as u64)?;
        context.write(0, data)?;

        let region = vk::BufferCopy::default()
            .src_offset(0)
            .dst_offset(0)
            .size(data.len() as u64);
        unsafe {
            device.raw().cmd_copy_buffer(
                context.transfer_command_buffer(),
                context.staging_buffer(),
                self.handle,
                &[region],
            );
        }

        let mut target = usage_states(self.descriptor.usage);
        if target.is_empty() {
            target = BufferStates::COPY_DEST;
        }
        let mut barriers = BarrierBatch::new();
        barriers.add_buffer_barrier(self.handle, BufferStates::COPY_DEST, target);
        barriers.flush(device.dispatch(), context.transition_command_buffer());
        *self.state.lock() = target;

        device.copy_allocator().submit(device, context)
    }

    /// Get the parent device.
    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    /// Get the buffer descriptor.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Get the requested buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    /// Size of the native buffer, including constant-buffer padding.
    pub fn allocated_size(&self) -> u64 {
        self.allocated_size
    }

    /// Get the buffer label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Device address for shader access, or `0` when buffer device address
    /// is unavailable or the usage does not need it.
    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    /// Whether the buffer is persistently mapped.
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Pointer to the mapped memory of `Upload` and `Readback` buffers.
    pub fn mapped_data(&self) -> Option<NonNull<u8>> {
        self.mapped
    }

    /// Write bytes into a mapped buffer.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InvalidParameter`] if the buffer is not mapped
    /// or the range is out of bounds.
    pub fn write_data(&self, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        let ptr = self.checked_range(offset, data.len() as u64)?;
        // SAFETY: the range lies inside the mapping. Racing with GPU reads is
        // the caller's responsibility, as with any persistently mapped buffer.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len()) };
        Ok(())
    }

    /// Read bytes from a mapped buffer into `out`.
    pub fn read_data(&self, offset: u64, out: &mut [u8]) -> Result<(), GraphicsError> {
        let ptr = self.checked_range(offset, out.len() as u64)?;
        // SAFETY: the range lies inside the mapping.
        unsafe { std::ptr::copy_nonoverlapping(ptr.cast_const(), out.as_mut_ptr(), out.len()) };
        Ok(())
    }

    fn checked_range(&self, offset: u64, len: u64) -> Result<*mut u8, GraphicsError> {
        let mapped = self.mapped.ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "Buffer {:?} is not host visible",
                self.descriptor.label
            ))
        })?;
        match offset.checked_add(len) {
            Some(end) if end <= self.descriptor.size => {
                // SAFETY: offset is within the mapped allocation.
                Ok(unsafe { mapped.as_ptr().add(offset as usize) })
            }
            _ => Err(GraphicsError::InvalidParameter(format!(
                "Range {}..{} is out of bounds for buffer of {} bytes",
                offset,
                offset.saturating_add(len),
                self.descriptor.size
            ))),
        }
    }

    pub(crate) fn handle(&self) -> vk::Buffer {
        self.handle
    }

    /// Record a transition to `state`, returning the previous state.
    pub(crate) fn swap_state(&self, state: BufferStates) -> BufferStates {
        std::mem::replace(&mut *self.state.lock(), state)
    }

    /// State after the transitions recorded so far.
    pub fn state(&self) -> BufferStates {
        *self.state.lock()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.device.defer_destroy(DeferredResource::Buffer {
            buffer: self.handle,
            allocation: self.allocation.take(),
        });
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.descriptor.size)
            .field("usage", &self.descriptor.usage)
            .field("memory_type", &self.descriptor.memory_type)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Buffer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::vertex(BufferUsage::VERTEX, BufferStates::VERTEX_BUFFER)]
    #[case::index(BufferUsage::INDEX, BufferStates::INDEX_BUFFER)]
    #[case::constant(BufferUsage::CONSTANT, BufferStates::CONSTANT_BUFFER)]
    #[case::shader_read(BufferUsage::SHADER_READ, BufferStates::SHADER_RESOURCE)]
    #[case::write_only(BufferUsage::SHADER_WRITE, BufferStates::UNDEFINED)]
    #[case::combined(
        BufferUsage::VERTEX | BufferUsage::INDIRECT,
        BufferStates::VERTEX_BUFFER | BufferStates::INDIRECT_ARGUMENT
    )]
    fn test_usage_states(#[case] usage: BufferUsage, #[case] expected: BufferStates) {
        assert_eq!(usage_states(usage), expected);
    }

    #[rstest]
    #[case::unaligned_constant(100, BufferUsage::CONSTANT, 256, 256)]
    #[case::aligned_constant(512, BufferUsage::CONSTANT, 256, 512)]
    #[case::vertex_untouched(100, BufferUsage::VERTEX, 256, 100)]
    #[case::no_alignment(100, BufferUsage::CONSTANT, 1, 100)]
    fn test_padded_size(
        #[case] size: u64,
        #[case] usage: BufferUsage,
        #[case] alignment: u64,
        #[case] expected: u64,
    ) {
        assert_eq!(padded_size(size, usage, alignment), expected);
    }
}
