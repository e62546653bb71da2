//! Compute pass encoder.

use std::sync::Arc;

use ash::vk;

use super::CommandBuffer;
use crate::error::GraphicsError;
use crate::resources::{
    BindGroup, Buffer, ComputePipeline, PipelineLayout, QueryHeap, TextureView,
};
use crate::types::{BufferStates, DispatchIndirectArgs, QueueType, TextureLayout};

/// Records dispatches.
///
/// Unlike a render pass, resources may be transitioned while the pass is
/// open. Pending transitions are flushed before every dispatch and when the
/// encoder is dropped.
pub struct ComputePass<'a> {
    cmd: &'a mut CommandBuffer,
    labeled: bool,
    layout: Option<Arc<PipelineLayout>>,
}

impl<'a> ComputePass<'a> {
    pub(super) fn begin(
        cmd: &'a mut CommandBuffer,
        label: Option<&str>,
    ) -> Result<Self, GraphicsError> {
        if !matches!(cmd.queue(), QueueType::Graphics | QueueType::Compute) {
            return Err(GraphicsError::InvalidParameter(format!(
                "compute passes need the graphics or compute queue, not {:?}",
                cmd.queue()
            )));
        }
        let (device, recorder) = cmd.parts();
        if let Some(label) = label {
            device.debug_names().begin_label(recorder.handle(), label);
        }
        recorder.bind_state.reset();
        Ok(Self {
            cmd,
            labeled: label.is_some(),
            layout: None,
        })
    }

    pub fn set_pipeline(&mut self, pipeline: &Arc<ComputePipeline>) {
        if !pipeline.is_valid() {
            log::error!("Skipping invalid compute pipeline {:?}", pipeline.label());
            return;
        }
        self.cmd.bind_pipeline(
            vk::PipelineBindPoint::COMPUTE,
            pipeline.handle(),
            pipeline.layout(),
        );
        self.cmd.parts().1.retain(pipeline);
        self.layout = Some(Arc::clone(pipeline.layout()));
    }

    pub fn set_bind_group(
        &mut self,
        index: u32,
        group: &Arc<BindGroup>,
        dynamic_offsets: &[u32],
    ) {
        self.cmd.set_bind_group(index, group, dynamic_offsets);
    }

    pub fn set_push_constants(
        &mut self,
        range_index: usize,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let layout = self.layout.clone().ok_or_else(|| {
            GraphicsError::InvalidParameter("push constants set before a pipeline".to_string())
        })?;
        self.cmd.push_constants(&layout, range_index, data)
    }

    pub fn transition_buffer(&mut self, buffer: &Arc<Buffer>, state: BufferStates) {
        self.cmd.transition_buffer(buffer, state);
    }

    pub fn transition_texture(&mut self, view: &Arc<TextureView>, layout: TextureLayout) {
        self.cmd.transition_texture(view, layout);
    }

    fn prepare_dispatch(&mut self) -> Option<vk::CommandBuffer> {
        self.cmd.flush_barriers();
        if !self.cmd.flush_bind_groups(vk::PipelineBindPoint::COMPUTE) {
            return None;
        }
        Some(self.cmd.parts().1.handle())
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        let limit = self.cmd.device().limits().max_compute_workgroups_per_dimension;
        if x > limit || y > limit || z > limit {
            log::error!(
                "Dispatch of {}x{}x{} groups exceeds the limit of {}",
                x,
                y,
                z,
                limit
            );
            return;
        }
        let Some(handle) = self.prepare_dispatch() else {
            return;
        };
        unsafe { self.cmd.device().raw().cmd_dispatch(handle, x, y, z) };
    }

    /// Dispatch with [`DispatchIndirectArgs`] read from `buffer` at `offset`.
    pub fn dispatch_indirect(&mut self, buffer: &Arc<Buffer>, offset: u64) {
        if offset % 4 != 0
            || offset
                .checked_add(DispatchIndirectArgs::SIZE)
                .is_none_or(|end| end > buffer.size())
        {
            log::error!(
                "Indirect dispatch arguments at {} do not fit buffer {:?}",
                offset,
                buffer.label()
            );
            return;
        }
        self.cmd.transition_buffer(buffer, BufferStates::INDIRECT_ARGUMENT);
        let Some(handle) = self.prepare_dispatch() else {
            return;
        };
        unsafe {
            self.cmd
                .device()
                .raw()
                .cmd_dispatch_indirect(handle, buffer.handle(), offset);
        }
        self.cmd.parts().1.retain(buffer);
    }

    pub fn write_timestamp(&mut self, heap: &Arc<QueryHeap>, index: u32) {
        self.cmd.write_timestamp(heap, index);
    }

    pub fn push_debug_group(&mut self, label: &str) {
        self.cmd.push_debug_group(label);
    }

    pub fn pop_debug_group(&mut self) {
        self.cmd.pop_debug_group();
    }
}

impl Drop for ComputePass<'_> {
    fn drop(&mut self) {
        self.cmd.flush_barriers();
        if self.labeled {
            let (device, recorder) = self.cmd.parts();
            device.debug_names().end_label(recorder.handle());
        }
    }
}
