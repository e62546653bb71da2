//! Entry points promoted to core in Vulkan 1.3.
//!
//! On 1.3 devices the core functions of `ash::Device` are used. On 1.2
//! devices the same commands come from the `KHR` extension loaders, which
//! adapter selection guarantees to be present.

use ash::vk;

/// The logical device plus the extension loaders for promoted commands.
#[derive(Clone)]
pub struct DeviceDispatch {
    device: ash::Device,
    synchronization2: Option<ash::khr::synchronization2::Device>,
    dynamic_rendering: Option<ash::khr::dynamic_rendering::Device>,
}

impl DeviceDispatch {
    pub fn new(instance: &ash::Instance, device: ash::Device, api_version: u32) -> Self {
        let core_13 = api_version >= vk::API_VERSION_1_3;
        Self {
            synchronization2: (!core_13)
                .then(|| ash::khr::synchronization2::Device::new(instance, &device)),
            dynamic_rendering: (!core_13)
                .then(|| ash::khr::dynamic_rendering::Device::new(instance, &device)),
            device,
        }
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// # Safety
    ///
    /// `cmd` must be recording and every barrier must reference live handles.
    pub unsafe fn cmd_pipeline_barrier2(&self, cmd: vk::CommandBuffer, info: &vk::DependencyInfo) {
        match &self.synchronization2 {
            Some(loader) => unsafe { loader.cmd_pipeline_barrier2(cmd, info) },
            None => unsafe { self.device.cmd_pipeline_barrier2(cmd, info) },
        }
    }

    /// # Safety
    ///
    /// The caller must hold the queue's submit lock.
    pub unsafe fn queue_submit2(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo2],
        fence: vk::Fence,
    ) -> Result<(), vk::Result> {
        match &self.synchronization2 {
            Some(loader) => unsafe { loader.queue_submit2(queue, submits, fence) },
            None => unsafe { self.device.queue_submit2(queue, submits, fence) },
        }
    }

    /// # Safety
    ///
    /// `cmd` must be recording outside of any render pass.
    pub unsafe fn cmd_write_timestamp2(
        &self,
        cmd: vk::CommandBuffer,
        stage: vk::PipelineStageFlags2,
        pool: vk::QueryPool,
        query: u32,
    ) {
        match &self.synchronization2 {
            Some(loader) => unsafe { loader.cmd_write_timestamp2(cmd, stage, pool, query) },
            None => unsafe { self.device.cmd_write_timestamp2(cmd, stage, pool, query) },
        }
    }

    /// # Safety
    ///
    /// `cmd` must be recording and every attachment view must be alive.
    pub unsafe fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, info: &vk::RenderingInfo) {
        match &self.dynamic_rendering {
            Some(loader) => unsafe { loader.cmd_begin_rendering(cmd, info) },
            None => unsafe { self.device.cmd_begin_rendering(cmd, info) },
        }
    }

    /// # Safety
    ///
    /// `cmd` must be inside a render pass begun with [`Self::cmd_begin_rendering`].
    pub unsafe fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        match &self.dynamic_rendering {
            Some(loader) => unsafe { loader.cmd_end_rendering(cmd) },
            None => unsafe { self.device.cmd_end_rendering(cmd) },
        }
    }
}
