//! Staging uploads and initial-state priming.
//!
//! Every host to device upload, and every resource that has to start in a
//! layout other than `UNDEFINED`, goes through an [`UploadContext`] taken from
//! the device's [`CopyAllocator`].
//!
//! ```text
//! Free ──allocate()──► Acquired/Recording ──submit()──► Submitted ──fence──► Free
//! ```
//!
//! [`CopyAllocator::submit`] hands the work across queues in a fixed order:
//!
//! ```text
//! copy      : transfer commands                      ─► s0
//! graphics  : wait s0, transition commands           ─► s1 (+ s2 with video)
//! video     : wait s2                                ─► s3
//! compute   : wait s1 (+ s3), signal the context fence
//! ```
//!
//! Compute always runs last, so a single fence tells when the whole chain
//! finished and the context can be handed out again.

use std::ptr::NonNull;

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use parking_lot::Mutex;

use crate::backend::vulkan::allocator::MemoryAllocator;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::{MemoryType, QueueType};

/// Smallest staging buffer ever created.
pub(crate) const MIN_STAGING_SIZE: u64 = 64 * 1024;

/// Staging buffer size for a request: the next power of two, at least
/// [`MIN_STAGING_SIZE`].
pub(crate) fn staging_size(request: u64) -> u64 {
    request.max(1).next_power_of_two().max(MIN_STAGING_SIZE)
}

/// Index of the first context that is large enough and idle.
///
/// `is_idle` is only called for contexts whose capacity fits.
pub(crate) fn first_reusable<T>(
    contexts: &[T],
    request: u64,
    capacity: impl Fn(&T) -> u64,
    mut is_idle: impl FnMut(&T) -> bool,
) -> Option<usize> {
    contexts
        .iter()
        .position(|context| capacity(context) >= request && is_idle(context))
}

/// A staging buffer with the command buffers and sync objects of one upload.
pub(crate) struct UploadContext {
    size: u64,
    staging_buffer: vk::Buffer,
    staging_allocation: Option<Allocation>,
    mapped: NonNull<u8>,
    transfer_pool: vk::CommandPool,
    transfer_command_buffer: vk::CommandBuffer,
    transition_pool: vk::CommandPool,
    transition_command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    semaphores: [vk::Semaphore; 4],
}

// SAFETY: the mapped pointer refers to persistently mapped memory owned by
// the staging allocation, and a context is used by one thread at a time.
unsafe impl Send for UploadContext {}

impl UploadContext {
    fn new(device: &GraphicsDevice, size: u64) -> Result<Self, GraphicsError> {
        let raw = device.raw();
        let mut context = Self {
            size,
            staging_buffer: vk::Buffer::null(),
            staging_allocation: None,
            mapped: NonNull::dangling(),
            transfer_pool: vk::CommandPool::null(),
            transfer_command_buffer: vk::CommandBuffer::null(),
            transition_pool: vk::CommandPool::null(),
            transition_command_buffer: vk::CommandBuffer::null(),
            fence: vk::Fence::null(),
            semaphores: [vk::Semaphore::null(); 4],
        };

        // Anything created before a failure is released by destroy().
        if let Err(e) = context.create_objects(device, size) {
            unsafe { context.destroy(raw, device.allocator()) };
            return Err(e);
        }

        log::debug!("Created upload context with {} byte staging buffer", size);
        Ok(context)
    }

    fn create_objects(&mut self, device: &GraphicsDevice, size: u64) -> Result<(), GraphicsError> {
        let raw = device.raw();
        let fail = |what: &str, e: vk::Result| {
            GraphicsError::ResourceCreationFailed(format!(
                "Failed to create upload context {}: {:?}",
                what, e
            ))
        };

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        self.staging_buffer = unsafe { raw.create_buffer(&buffer_info, None) }
            .map_err(|e| fail("staging buffer", e))?;
        let requirements = unsafe { raw.get_buffer_memory_requirements(self.staging_buffer) };
        let allocation = self.staging_allocation.insert(device.allocator().allocate(
            "upload staging",
            requirements,
            MemoryType::Upload,
            true,
        )?);
        unsafe { raw.bind_buffer_memory(self.staging_buffer, allocation.memory(), allocation.offset()) }
            .map_err(|e| fail("staging memory binding", e))?;
        self.mapped = allocation
            .mapped_ptr()
            .map(|ptr| ptr.cast::<u8>())
            .ok_or_else(|| {
                GraphicsError::ResourceCreationFailed(
                    "Upload staging memory is not host visible".to_string(),
                )
            })?;

        let copy_family = queue_family(device, QueueType::Copy)?;
        let graphics_family = queue_family(device, QueueType::Graphics)?;
        (self.transfer_pool, self.transfer_command_buffer) =
            create_pool_and_buffer(raw, copy_family).map_err(|e| fail("transfer commands", e))?;
        (self.transition_pool, self.transition_command_buffer) =
            create_pool_and_buffer(raw, graphics_family)
                .map_err(|e| fail("transition commands", e))?;

        self.fence = unsafe { raw.create_fence(&vk::FenceCreateInfo::default(), None) }
            .map_err(|e| fail("fence", e))?;
        for semaphore in &mut self.semaphores {
            *semaphore = unsafe { raw.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
                .map_err(|e| fail("semaphore", e))?;
        }

        let names = device.debug_names();
        names.set_object_name(self.staging_buffer, "upload staging buffer");
        names.set_object_name(self.transfer_command_buffer, "upload transfer");
        names.set_object_name(self.transition_command_buffer, "upload transition");
        Ok(())
    }

    /// Capacity of the staging buffer.
    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn staging_buffer(&self) -> vk::Buffer {
        self.staging_buffer
    }

    /// Command buffer executed on the copy queue.
    pub(crate) fn transfer_command_buffer(&self) -> vk::CommandBuffer {
        self.transfer_command_buffer
    }

    /// Command buffer executed on the graphics queue after the transfer.
    pub(crate) fn transition_command_buffer(&self) -> vk::CommandBuffer {
        self.transition_command_buffer
    }

    /// Copy `data` into the staging buffer at `offset`.
    pub(crate) fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= self.size)
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "Upload of {} bytes at offset {} exceeds staging size {}",
                    data.len(),
                    offset,
                    self.size
                ))
            })?;
        // SAFETY: the range was checked against the mapped staging size and
        // the GPU does not read the buffer until the context is submitted.
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.mapped.as_ptr().add(offset as usize),
                data.len(),
            );
        }
        Ok(())
    }

    fn begin(&self, raw: &ash::Device) -> Result<(), vk::Result> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            raw.reset_fences(&[self.fence])?;
            raw.reset_command_pool(self.transfer_pool, vk::CommandPoolResetFlags::empty())?;
            raw.reset_command_pool(self.transition_pool, vk::CommandPoolResetFlags::empty())?;
            raw.begin_command_buffer(self.transfer_command_buffer, &begin_info)?;
            raw.begin_command_buffer(self.transition_command_buffer, &begin_info)?;
        }
        Ok(())
    }

    fn is_idle(&self, raw: &ash::Device) -> bool {
        unsafe { raw.get_fence_status(self.fence) }.unwrap_or(false)
    }

    /// # Safety
    ///
    /// The context fence must be signaled, or the device idle.
    unsafe fn destroy(&mut self, raw: &ash::Device, allocator: &MemoryAllocator) {
        unsafe {
            for semaphore in self.semaphores {
                if semaphore != vk::Semaphore::null() {
                    raw.destroy_semaphore(semaphore, None);
                }
            }
            if self.fence != vk::Fence::null() {
                raw.destroy_fence(self.fence, None);
            }
            if self.transfer_pool != vk::CommandPool::null() {
                raw.destroy_command_pool(self.transfer_pool, None);
            }
            if self.transition_pool != vk::CommandPool::null() {
                raw.destroy_command_pool(self.transition_pool, None);
            }
            if self.staging_buffer != vk::Buffer::null() {
                raw.destroy_buffer(self.staging_buffer, None);
            }
        }
        if let Some(allocation) = self.staging_allocation.take() {
            allocator.free(allocation);
        }
    }
}

/// Free list of [`UploadContext`]s.
#[derive(Default)]
pub(crate) struct CopyAllocator {
    free: Mutex<Vec<UploadContext>>,
    created: Mutex<usize>,
}

impl CopyAllocator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of contexts created over the device's lifetime.
    pub(crate) fn context_count(&self) -> usize {
        *self.created.lock()
    }

    /// Take an idle context of at least `size` bytes, creating one if none
    /// is available, and begin recording on both of its command buffers.
    pub(crate) fn allocate(
        &self,
        device: &GraphicsDevice,
        size: u64,
    ) -> Result<UploadContext, GraphicsError> {
        let raw = device.raw();
        let reused = {
            let mut free = self.free.lock();
            first_reusable(&free[..], size, UploadContext::size, |c| c.is_idle(raw))
                .map(|index| free.swap_remove(index))
        };

        let context = match reused {
            Some(context) => context,
            None => {
                let context = UploadContext::new(device, staging_size(size))?;
                *self.created.lock() += 1;
                context
            }
        };

        if let Err(e) = context.begin(raw) {
            // The fence is reset or the context is broken; either way it must
            // not be handed out as idle again.
            self.free.lock().push(context);
            return Err(GraphicsError::Internal(format!(
                "Failed to begin upload context: {:?}",
                e
            )));
        }
        Ok(context)
    }

    /// End the context's command buffers and run the cross-queue hand-off.
    ///
    /// The context returns to the free list whether or not submission
    /// succeeded. A failed submission leaves its fence unsignaled, so it is
    /// never reused.
    pub(crate) fn submit(
        &self,
        device: &GraphicsDevice,
        context: UploadContext,
    ) -> Result<(), GraphicsError> {
        let result = self.submit_chain(device, &context);
        self.free.lock().push(context);
        result
    }

    fn submit_chain(
        &self,
        device: &GraphicsDevice,
        context: &UploadContext,
    ) -> Result<(), GraphicsError> {
        let raw = device.raw();
        let dispatch = device.dispatch();
        unsafe {
            raw.end_command_buffer(context.transfer_command_buffer)?;
            raw.end_command_buffer(context.transition_command_buffer)?;
        }

        let missing =
            |ty: QueueType| GraphicsError::Internal(format!("{:?} queue is missing", ty));
        let copy = device.queue(QueueType::Copy).ok_or_else(|| missing(QueueType::Copy))?;
        let graphics = device
            .queue(QueueType::Graphics)
            .ok_or_else(|| missing(QueueType::Graphics))?;
        let compute = device
            .queue(QueueType::Compute)
            .ok_or_else(|| missing(QueueType::Compute))?;
        let video = device.queue(QueueType::VideoDecode);

        let [s0, s1, s2, s3] = context.semaphores;
        let semaphore = |s: vk::Semaphore| {
            vk::SemaphoreSubmitInfo::default()
                .semaphore(s)
                .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        };

        let transfer = [vk::CommandBufferSubmitInfo::default()
            .command_buffer(context.transfer_command_buffer)];
        let signal = [semaphore(s0)];
        let submit = vk::SubmitInfo2::default()
            .command_buffer_infos(&transfer)
            .signal_semaphore_infos(&signal);
        copy.submit_raw(dispatch, &[submit], vk::Fence::null())?;

        let transition = [vk::CommandBufferSubmitInfo::default()
            .command_buffer(context.transition_command_buffer)];
        let wait = [semaphore(s0)];
        let signal: Vec<_> = if video.is_some() {
            vec![semaphore(s1), semaphore(s2)]
        } else {
            vec![semaphore(s1)]
        };
        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait)
            .command_buffer_infos(&transition)
            .signal_semaphore_infos(&signal);
        graphics.submit_raw(dispatch, &[submit], vk::Fence::null())?;

        if let Some(video) = video {
            let wait = [semaphore(s2)];
            let signal = [semaphore(s3)];
            let submit = vk::SubmitInfo2::default()
                .wait_semaphore_infos(&wait)
                .signal_semaphore_infos(&signal);
            video.submit_raw(dispatch, &[submit], vk::Fence::null())?;
        }

        let wait: Vec<_> = if video.is_some() {
            vec![semaphore(s1), semaphore(s3)]
        } else {
            vec![semaphore(s1)]
        };
        let submit = vk::SubmitInfo2::default().wait_semaphore_infos(&wait);
        compute.submit_raw(dispatch, &[submit], context.fence)?;
        Ok(())
    }

    /// Destroy every pooled context.
    ///
    /// # Safety
    ///
    /// The device must be idle.
    pub(crate) unsafe fn destroy(&self, raw: &ash::Device, allocator: &MemoryAllocator) {
        for mut context in self.free.lock().drain(..) {
            unsafe { context.destroy(raw, allocator) };
        }
    }
}

impl std::fmt::Debug for CopyAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyAllocator")
            .field("free", &self.free.lock().len())
            .field("created", &self.context_count())
            .finish()
    }
}

fn queue_family(device: &GraphicsDevice, ty: QueueType) -> Result<u32, GraphicsError> {
    device
        .queue(ty)
        .map(|queue| queue.family())
        .ok_or_else(|| GraphicsError::Internal(format!("{:?} queue is missing", ty)))
}

fn create_pool_and_buffer(
    raw: &ash::Device,
    family: u32,
) -> Result<(vk::CommandPool, vk::CommandBuffer), vk::Result> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .flags(vk::CommandPoolCreateFlags::TRANSIENT)
        .queue_family_index(family);
    let pool = unsafe { raw.create_command_pool(&pool_info, None) }?;
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    match unsafe { raw.allocate_command_buffers(&alloc_info) } {
        Ok(buffers) => Ok((pool, buffers[0])),
        Err(e) => {
            unsafe { raw.destroy_command_pool(pool, None) };
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(0, MIN_STAGING_SIZE)]
    #[case::tiny(256, MIN_STAGING_SIZE)]
    #[case::exact_floor(64 * 1024, 64 * 1024)]
    #[case::rounds_up(64 * 1024 + 1, 128 * 1024)]
    #[case::power_of_two(4 << 20, 4 << 20)]
    #[case::large(3 << 20, 4 << 20)]
    fn test_staging_size(#[case] request: u64, #[case] expected: u64) {
        assert_eq!(staging_size(request), expected);
    }

    #[test]
    fn test_reuse_skips_busy_contexts() {
        // (capacity, fence signaled)
        let contexts: [(u64, bool); 3] = [(1 << 16, false), (1 << 16, true), (1 << 20, true)];
        let found = first_reusable(&contexts, 1024, |c| c.0, |c| c.1);
        assert_eq!(found, Some(1));
    }

    #[test]
    fn test_reuse_skips_small_contexts() {
        let contexts: [(u64, bool); 2] = [(1 << 16, true), (1 << 20, true)];
        let found = first_reusable(&contexts, 1 << 17, |c| c.0, |c| c.1);
        assert_eq!(found, Some(1));
    }

    #[test]
    fn test_no_reuse_when_all_busy() {
        let contexts: [(u64, bool); 2] = [(1 << 16, false), (1 << 20, false)];
        assert_eq!(first_reusable(&contexts, 16, |c| c.0, |c| c.1), None);
    }

    #[test]
    fn test_fence_queried_only_for_fitting_contexts() {
        let contexts: [(u64, bool); 2] = [(1024, true), (1 << 16, true)];
        let mut queried = Vec::new();
        let found = first_reusable(
            &contexts,
            4096,
            |c| c.0,
            |c| {
                queried.push(c.0);
                c.1
            },
        );
        assert_eq!(found, Some(1));
        assert_eq!(queried, vec![1 << 16]);
    }

    #[test]
    fn test_sequential_small_uploads_fit_one_context() {
        // Uploads that fit the first context's staging size reuse it once it
        // is idle again.
        let mut pool: Vec<(u64, bool)> = Vec::new();
        let mut created = 0;
        for request in [100u64, 2000, 4096, 60_000] {
            let index = first_reusable(&pool, request, |c| c.0, |c| c.1);
            let mut context = match index {
                Some(i) => pool.swap_remove(i),
                None => {
                    created += 1;
                    (staging_size(request), false)
                }
            };
            // Submitted and completed.
            context.1 = true;
            pool.push(context);
        }
        assert_eq!(created, 1);
        assert_eq!(pool.len(), 1);
    }
}
