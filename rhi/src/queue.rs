//! Device queues.
//!
//! Every [`QueueType`] the device exposes has one [`Queue`]. A queue collects
//! the command buffers submitted during a frame and the swap chains they
//! present to, then hands everything to the driver in a single submission
//! when the device commits the frame.

use std::sync::{Arc, Weak};

use ash::vk;
use parking_lot::Mutex;

use crate::backend::vulkan::dispatch::DeviceDispatch;
use crate::command::CommandRecorder;
use crate::error::GraphicsError;
use crate::swapchain::SwapChain;
use crate::types::QueueType;

#[derive(Default)]
struct PendingWork {
    recorders: Vec<Box<CommandRecorder>>,
    swapchains: Vec<Weak<SwapChain>>,
}

/// A native queue plus its per-frame fences and pending work.
pub(crate) struct Queue {
    ty: QueueType,
    family: u32,
    index: u32,
    handle: vk::Queue,
    /// Shared by every [`Queue`] that maps to the same native queue.
    submit_lock: Arc<Mutex<()>>,
    frame_fences: Vec<vk::Fence>,
    pending: Mutex<PendingWork>,
    free_recorders: Mutex<Vec<Box<CommandRecorder>>>,
}

impl Queue {
    pub(crate) fn new(
        device: &ash::Device,
        ty: QueueType,
        family: u32,
        index: u32,
        submit_lock: Arc<Mutex<()>>,
        frames_in_flight: u32,
    ) -> Result<Self, GraphicsError> {
        let handle = unsafe { device.get_device_queue(family, index) };

        let mut frame_fences = Vec::with_capacity(frames_in_flight as usize);
        for _ in 0..frames_in_flight {
            let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
                .map_err(|e| {
                    GraphicsError::InitializationFailed(format!(
                        "Failed to create {:?} queue frame fence: {:?}",
                        ty, e
                    ))
                })?;
            frame_fences.push(fence);
        }

        Ok(Self {
            ty,
            family,
            index,
            handle,
            submit_lock,
            frame_fences,
            pending: Mutex::new(PendingWork::default()),
            free_recorders: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn ty(&self) -> QueueType {
        self.ty
    }

    pub(crate) fn family(&self) -> u32 {
        self.family
    }

    pub(crate) fn index(&self) -> u32 {
        self.index
    }

    pub(crate) fn handle(&self) -> vk::Queue {
        self.handle
    }

    pub(crate) fn frame_fence(&self, frame_index: u32) -> vk::Fence {
        self.frame_fences[frame_index as usize]
    }

    pub(crate) fn submit_lock(&self) -> &Arc<Mutex<()>> {
        &self.submit_lock
    }

    /// Pop a recorder from the free list, creating one when it is empty.
    pub(crate) fn acquire_recorder(
        &self,
        device: &ash::Device,
    ) -> Result<Box<CommandRecorder>, GraphicsError> {
        if let Some(recorder) = self.free_recorders.lock().pop() {
            return Ok(recorder);
        }
        let recorder = CommandRecorder::new(
            device,
            self.ty,
            self.family,
            self.frame_fences.len() as u32,
        )?;
        log::debug!("Created {:?} command recorder", self.ty);
        Ok(Box::new(recorder))
    }

    /// Return a recorder that was never submitted.
    pub(crate) fn release_recorder(&self, recorder: Box<CommandRecorder>) {
        self.free_recorders.lock().push(recorder);
    }

    /// Queue an ended recorder for the next frame submission.
    pub(crate) fn enqueue(&self, mut recorder: Box<CommandRecorder>) {
        let swapchains = recorder.take_presents();
        let mut pending = self.pending.lock();
        pending.swapchains.extend(swapchains);
        pending.recorders.push(recorder);
    }

    /// Submit work outside of frame accounting, such as upload hand-offs.
    pub(crate) fn submit_raw(
        &self,
        dispatch: &DeviceDispatch,
        submits: &[vk::SubmitInfo2],
        fence: vk::Fence,
    ) -> Result<(), GraphicsError> {
        let _guard = self.submit_lock.lock();
        unsafe { dispatch.queue_submit2(self.handle, submits, fence) }.map_err(|e| {
            log::error!("{:?} queue submission failed: {:?}", self.ty, e);
            GraphicsError::from(e)
        })
    }

    /// Submit every pending command buffer of the frame and present the
    /// swap chains they rendered to.
    ///
    /// The frame fence is signaled even when nothing was recorded, so frame
    /// pacing can always wait on it.
    pub(crate) fn submit(
        &self,
        dispatch: &DeviceDispatch,
        swapchain_loader: &ash::khr::swapchain::Device,
        frame_index: u32,
    ) -> Result<(), GraphicsError> {
        let PendingWork {
            recorders,
            swapchains,
        } = std::mem::take(&mut *self.pending.lock());

        let swapchains: Vec<Arc<SwapChain>> =
            swapchains.iter().filter_map(Weak::upgrade).collect();
        let targets: Vec<_> = swapchains
            .iter()
            .filter_map(|swapchain| swapchain.present_target().map(|t| (swapchain, t)))
            .collect();

        let command_buffers: Vec<vk::CommandBufferSubmitInfo> = recorders
            .iter()
            .map(|r| vk::CommandBufferSubmitInfo::default().command_buffer(r.handle()))
            .collect();
        let waits: Vec<vk::SemaphoreSubmitInfo> = targets
            .iter()
            .map(|(_, t)| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(t.acquire_semaphore)
                    .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            })
            .collect();
        let signals: Vec<vk::SemaphoreSubmitInfo> = targets
            .iter()
            .map(|(_, t)| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(t.release_semaphore)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            })
            .collect();

        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&waits)
            .command_buffer_infos(&command_buffers)
            .signal_semaphore_infos(&signals);
        let submits: &[vk::SubmitInfo2] =
            if command_buffers.is_empty() && waits.is_empty() {
                &[]
            } else {
                std::slice::from_ref(&submit)
            };

        let _guard = self.submit_lock.lock();
        unsafe { dispatch.queue_submit2(self.handle, submits, self.frame_fence(frame_index)) }
            .map_err(|e| {
                log::error!("{:?} queue frame submission failed: {:?}", self.ty, e);
                GraphicsError::from(e)
            })?;

        let mut device_lost = false;
        if !targets.is_empty() {
            let handles: Vec<vk::SwapchainKHR> = targets.iter().map(|(_, t)| t.swapchain).collect();
            let image_indices: Vec<u32> = targets.iter().map(|(_, t)| t.image_index).collect();
            let release: Vec<vk::Semaphore> =
                targets.iter().map(|(_, t)| t.release_semaphore).collect();
            let mut results = vec![vk::Result::SUCCESS; targets.len()];
            let present_info = vk::PresentInfoKHR::default()
                .wait_semaphores(&release)
                .swapchains(&handles)
                .image_indices(&image_indices)
                .results(&mut results);

            let overall = unsafe { swapchain_loader.queue_present(self.handle, &present_info) };
            device_lost = overall == Err(vk::Result::ERROR_DEVICE_LOST);
            for ((swapchain, _), result) in targets.iter().zip(results) {
                swapchain.finish_present(result);
            }
        }
        drop(_guard);

        self.free_recorders.lock().extend(recorders);
        if device_lost {
            return Err(GraphicsError::DeviceLost);
        }
        Ok(())
    }

    /// Destroy the fences and every recorder.
    ///
    /// # Safety
    ///
    /// The queue must be idle.
    pub(crate) unsafe fn destroy(&mut self, device: &ash::Device) {
        let pending = std::mem::take(&mut *self.pending.lock());
        let free = std::mem::take(&mut *self.free_recorders.lock());
        unsafe {
            for recorder in pending.recorders.into_iter().chain(free) {
                recorder.destroy(device);
            }
            for fence in self.frame_fences.drain(..) {
                device.destroy_fence(fence, None);
            }
        }
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("ty", &self.ty)
            .field("family", &self.family)
            .field("index", &self.index)
            .finish()
    }
}
