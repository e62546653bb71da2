//! Native command pools and buffers behind a [`CommandBuffer`](super::CommandBuffer).

use std::any::Any;
use std::sync::{Arc, Weak};

use ash::vk;

use super::state::BindState;
use crate::backend::vulkan::barriers::BarrierBatch;
use crate::backend::vulkan::dispatch::DeviceDispatch;
use crate::error::GraphicsError;
use crate::swapchain::SwapChain;
use crate::types::QueueType;

/// One command pool and primary command buffer per frame slot, plus the
/// per-recording state of the encoders.
///
/// Recorders are pooled by their queue. A recorder is only begun for frame
/// slot `k` once the previous submission that used slot `k` has retired, so
/// resetting the slot's pool is always safe.
pub(crate) struct CommandRecorder {
    queue: QueueType,
    pools: Vec<vk::CommandPool>,
    buffers: Vec<vk::CommandBuffer>,
    frame_index: u32,
    pub(crate) barriers: BarrierBatch,
    pub(crate) bind_state: BindState,
    /// Resources referenced by recorded commands, held until the recording ends.
    retained: Vec<Arc<dyn Any + Send + Sync>>,
    presents: Vec<Weak<SwapChain>>,
    debug_depth: u32,
}

impl CommandRecorder {
    pub(crate) fn new(
        device: &ash::Device,
        queue: QueueType,
        family: u32,
        frames_in_flight: u32,
    ) -> Result<Self, GraphicsError> {
        let mut recorder = Self {
            queue,
            pools: Vec::with_capacity(frames_in_flight as usize),
            buffers: Vec::with_capacity(frames_in_flight as usize),
            frame_index: 0,
            barriers: BarrierBatch::new(),
            bind_state: BindState::new(),
            retained: Vec::new(),
            presents: Vec::new(),
            debug_depth: 0,
        };

        for _ in 0..frames_in_flight {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(family)
                .flags(vk::CommandPoolCreateFlags::TRANSIENT);
            let pool = match unsafe { device.create_command_pool(&pool_info, None) } {
                Ok(pool) => pool,
                Err(e) => {
                    unsafe { recorder.destroy(device) };
                    return Err(GraphicsError::ResourceCreationFailed(format!(
                        "Failed to create {:?} command pool: {:?}",
                        queue, e
                    )));
                }
            };
            recorder.pools.push(pool);

            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            match unsafe { device.allocate_command_buffers(&alloc_info) } {
                Ok(buffers) => recorder.buffers.extend(buffers),
                Err(e) => {
                    unsafe { recorder.destroy(device) };
                    return Err(GraphicsError::ResourceCreationFailed(format!(
                        "Failed to allocate {:?} command buffer: {:?}",
                        queue, e
                    )));
                }
            }
        }

        Ok(recorder)
    }

    pub(crate) fn queue(&self) -> QueueType {
        self.queue
    }

    /// Reset the pool of `frame_index` and begin its command buffer.
    pub(crate) fn begin(
        &mut self,
        device: &ash::Device,
        frame_index: u32,
    ) -> Result<(), GraphicsError> {
        let slot = frame_index as usize % self.pools.len();
        self.frame_index = slot as u32;
        self.barriers.reset();
        self.bind_state.reset();
        self.retained.clear();
        self.presents.clear();
        self.debug_depth = 0;

        unsafe {
            device
                .reset_command_pool(self.pools[slot], vk::CommandPoolResetFlags::empty())
                .map_err(|e| {
                    GraphicsError::Internal(format!("Failed to reset command pool: {:?}", e))
                })?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(self.buffers[slot], &begin_info)
                .map_err(|e| {
                    GraphicsError::Internal(format!("Failed to begin command buffer: {:?}", e))
                })?;
        }
        Ok(())
    }

    /// Flush pending barriers and end the command buffer.
    ///
    /// Retained resources are released here. The command buffer is submitted
    /// with the current frame, and the deletion queue keeps anything dropped
    /// now alive until that frame retired.
    pub(crate) fn end(&mut self, dispatch: &DeviceDispatch) -> Result<(), GraphicsError> {
        let cmd = self.handle();
        self.barriers.flush(dispatch, cmd);
        self.retained.clear();
        if self.debug_depth > 0 {
            log::warn!(
                "{:?} command buffer ended with {} open debug groups",
                self.queue,
                self.debug_depth
            );
        }
        unsafe { dispatch.device().end_command_buffer(cmd) }
            .map_err(|e| GraphicsError::Internal(format!("Failed to end command buffer: {:?}", e)))
    }

    /// Drop everything recorded without ending. The pool is reset on the
    /// next [`begin`](Self::begin).
    pub(crate) fn discard(&mut self) {
        self.barriers.clear();
        self.retained.clear();
        self.presents.clear();
    }

    pub(crate) fn handle(&self) -> vk::CommandBuffer {
        self.buffers[self.frame_index as usize]
    }

    pub(crate) fn retain<T: Any + Send + Sync>(&mut self, resource: &Arc<T>) {
        self.retained.push(Arc::clone(resource) as Arc<dyn Any + Send + Sync>);
    }

    pub(crate) fn push_present(&mut self, swapchain: &Arc<SwapChain>) {
        self.presents.push(Arc::downgrade(swapchain));
    }

    pub(crate) fn take_presents(&mut self) -> Vec<Weak<SwapChain>> {
        std::mem::take(&mut self.presents)
    }

    pub(crate) fn push_debug_group(&mut self) {
        self.debug_depth += 1;
    }

    /// Returns false when no group is open.
    pub(crate) fn pop_debug_group(&mut self) -> bool {
        if self.debug_depth == 0 {
            return false;
        }
        self.debug_depth -= 1;
        true
    }

    /// Destroy every pool, which frees the command buffers.
    ///
    /// # Safety
    ///
    /// No command buffer of this recorder may be pending execution.
    pub(crate) unsafe fn destroy(mut self, device: &ash::Device) {
        unsafe {
            for pool in self.pools.drain(..) {
                device.destroy_command_pool(pool, None);
            }
        }
        self.buffers.clear();
    }
}

impl std::fmt::Debug for CommandRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRecorder")
            .field("queue", &self.queue)
            .field("frame_index", &self.frame_index)
            .field("pending_barriers", &self.barriers.len())
            .field("retained", &self.retained.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(CommandRecorder: Send);
