//! Command recording.
//!
//! A [`CommandBuffer`] records into the current frame slot of one queue.
//! Resource transitions requested through it are deduplicated against the
//! tracked state of each resource and batched; the batch is flushed before
//! every command that depends on it, when it fills up, and when recording
//! ends.
//!
//! ```ignore
//! let mut cmd = device.begin_command_buffer(QueueType::Graphics, Some("frame"))?;
//! {
//!     let mut pass = cmd.begin_render_pass(
//!         &RenderPassDescriptor::new().with_color_attachment(ColorAttachment::new(back_buffer)),
//!     )?;
//!     pass.set_pipeline(&pipeline);
//!     pass.set_bind_group(0, &bind_group, &[]);
//!     pass.draw(3, 1, 0, 0);
//! }
//! cmd.present(&swapchain)?;
//! device.submit(cmd)?;
//! ```

mod compute_pass;
mod copy;
mod recorder;
mod render_pass;
mod state;

use std::sync::Arc;

use ash::vk;

pub use compute_pass::ComputePass;
pub use copy::TextureCopyRegion;
pub use render_pass::{ColorAttachment, DepthStencilAttachment, RenderPass, RenderPassDescriptor};

pub(crate) use recorder::CommandRecorder;
use state::BoundGroup;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::resources::{BindGroup, Buffer, PipelineLayout, QueryHeap, Texture, TextureView};
use crate::swapchain::SwapChain;
use crate::types::{BufferStates, QueryType, QueueType, TextureLayout};

/// Whether a queue of type `queue` can access a buffer in `state`.
pub(crate) fn buffer_state_allowed(queue: QueueType, state: BufferStates) -> bool {
    match queue {
        QueueType::Graphics => true,
        QueueType::Compute => {
            !state.intersects(BufferStates::VERTEX_BUFFER | BufferStates::INDEX_BUFFER)
        }
        QueueType::Copy | QueueType::VideoDecode => {
            (BufferStates::COPY_SOURCE | BufferStates::COPY_DEST).contains(state)
        }
    }
}

/// Whether a queue of type `queue` can access a texture in `layout`.
pub(crate) fn texture_layout_allowed(queue: QueueType, layout: TextureLayout) -> bool {
    match queue {
        QueueType::Graphics => true,
        QueueType::Compute => matches!(
            layout,
            TextureLayout::Undefined
                | TextureLayout::CopySource
                | TextureLayout::CopyDest
                | TextureLayout::ShaderResource
                | TextureLayout::UnorderedAccess
        ),
        QueueType::Copy | QueueType::VideoDecode => matches!(
            layout,
            TextureLayout::Undefined | TextureLayout::CopySource | TextureLayout::CopyDest
        ),
    }
}

/// A command buffer recording for one queue in the current frame.
///
/// Obtained from [`GraphicsDevice::begin_command_buffer`] and handed back
/// with [`GraphicsDevice::submit`]. The recorded work executes when the
/// frame is committed. Dropping a command buffer without submitting it
/// discards everything recorded.
pub struct CommandBuffer {
    device: Arc<GraphicsDevice>,
    queue: QueueType,
    labeled: bool,
    /// Present until `finish` or drop.
    recorder: Option<Box<CommandRecorder>>,
}

impl CommandBuffer {
    pub(crate) fn begin(
        device: Arc<GraphicsDevice>,
        queue: QueueType,
        label: Option<&str>,
    ) -> Result<Self, GraphicsError> {
        let native_queue = device.queue(queue).ok_or_else(|| {
            GraphicsError::FeatureNotSupported(format!("device has no {:?} queue", queue))
        })?;
        let mut recorder = native_queue.acquire_recorder(device.raw())?;
        if let Err(e) = recorder.begin(device.raw(), device.frame_index()) {
            native_queue.release_recorder(recorder);
            return Err(e);
        }
        if let Some(label) = label {
            device.debug_names().begin_label(recorder.handle(), label);
        }

        Ok(Self {
            device,
            queue,
            labeled: label.is_some(),
            recorder: Some(recorder),
        })
    }

    pub(crate) fn finish(mut self) -> Result<(QueueType, Box<CommandRecorder>), GraphicsError> {
        let Some(mut recorder) = self.recorder.take() else {
            return Err(GraphicsError::Internal(
                "command buffer already finished".to_string(),
            ));
        };
        if self.labeled {
            self.device.debug_names().end_label(recorder.handle());
        }
        if let Err(e) = recorder.end(self.device.dispatch()) {
            recorder.discard();
            if let Some(queue) = self.device.queue(self.queue) {
                queue.release_recorder(recorder);
            }
            return Err(e);
        }
        Ok((self.queue, recorder))
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn queue(&self) -> QueueType {
        self.queue
    }

    fn parts(&mut self) -> (&GraphicsDevice, &mut CommandRecorder) {
        let recorder = self
            .recorder
            .as_deref_mut()
            .unwrap_or_else(|| unreachable!("recorder is only taken by finish and drop"));
        (&self.device, recorder)
    }

    // ------------------------------------------------------------------
    // Barriers
    // ------------------------------------------------------------------

    /// Move `buffer` to `state`. Nothing is recorded when the buffer is
    /// already in that state.
    pub fn transition_buffer(&mut self, buffer: &Arc<Buffer>, state: BufferStates) {
        if !buffer_state_allowed(self.queue, state) {
            log::error!(
                "Buffer {:?} cannot be moved to {:?} on the {:?} queue",
                buffer.label(),
                state,
                self.queue
            );
            return;
        }
        let before = buffer.swap_state(state);
        let (device, recorder) = self.parts();
        if recorder
            .barriers
            .add_buffer_barrier(buffer.handle(), before, state)
        {
            recorder.retain(buffer);
            if recorder.barriers.is_full() {
                let cmd = recorder.handle();
                recorder.barriers.flush(device.dispatch(), cmd);
            }
        }
    }

    /// Move every subresource covered by `view` to `layout`.
    pub fn transition_texture(&mut self, view: &Arc<TextureView>, layout: TextureLayout) {
        let texture = view.texture();
        if !self.check_layout(texture, layout) {
            return;
        }
        let transitions = view.transitions(layout);
        self.record_texture_transitions(texture, transitions, layout);
    }

    /// Move a range of mips and layers of `texture` to `layout`.
    pub fn transition_texture_range(
        &mut self,
        texture: &Arc<Texture>,
        base_mip: u32,
        mip_count: u32,
        base_layer: u32,
        layer_count: u32,
        layout: TextureLayout,
    ) {
        if !self.check_layout(texture, layout) {
            return;
        }
        let transitions =
            texture.transition_range(base_mip, mip_count, base_layer, layer_count, layout);
        self.record_texture_transitions(texture, transitions, layout);
    }

    fn check_layout(&self, texture: &Texture, layout: TextureLayout) -> bool {
        if texture_layout_allowed(self.queue, layout) {
            return true;
        }
        log::error!(
            "Texture {:?} cannot be moved to {:?} on the {:?} queue",
            texture.label(),
            layout,
            self.queue
        );
        false
    }

    pub(crate) fn record_texture_transitions(
        &mut self,
        texture: &Arc<Texture>,
        transitions: Vec<(vk::ImageSubresourceRange, TextureLayout)>,
        target: TextureLayout,
    ) {
        if transitions.is_empty() {
            return;
        }
        let depth_only = texture.format().is_depth_only();
        let (device, recorder) = self.parts();
        let cmd = recorder.handle();
        for (range, before) in transitions {
            recorder
                .barriers
                .add_image_barrier(texture.handle(), range, depth_only, before, target);
            if recorder.barriers.is_full() {
                recorder.barriers.flush(device.dispatch(), cmd);
            }
        }
        recorder.retain(texture);
    }

    /// Record every pending transition now.
    pub fn flush_barriers(&mut self) {
        let (device, recorder) = self.parts();
        let cmd = recorder.handle();
        recorder.barriers.flush(device.dispatch(), cmd);
    }

    // ------------------------------------------------------------------
    // Pipeline state shared by the pass encoders
    // ------------------------------------------------------------------

    pub(crate) fn bind_pipeline(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
        layout: &Arc<PipelineLayout>,
    ) {
        let (device, recorder) = self.parts();
        if recorder.bind_state.set_pipeline(pipeline, layout.handle()) {
            unsafe {
                device
                    .raw()
                    .cmd_bind_pipeline(recorder.handle(), bind_point, pipeline);
            }
        }
        recorder.retain(layout);
    }

    pub(crate) fn set_bind_group(
        &mut self,
        index: u32,
        group: &Arc<BindGroup>,
        dynamic_offsets: &[u32],
    ) {
        let expected = group.layout().dynamic_offset_count();
        if index as usize >= crate::types::MAX_BIND_GROUPS {
            log::error!("Bind group index {} out of range", index);
            return;
        }
        if dynamic_offsets.len() != expected {
            log::error!(
                "Bind group {:?} needs {} dynamic offsets, got {}",
                group.label(),
                expected,
                dynamic_offsets.len()
            );
            return;
        }
        let (_, recorder) = self.parts();
        recorder.bind_state.set_bind_group(
            index as usize,
            BoundGroup {
                set: group.handle(),
                dynamic_offsets: dynamic_offsets.to_vec(),
            },
        );
        recorder.retain(group);
    }

    /// Issue the bind calls pending before a draw or dispatch. Returns false
    /// when no pipeline is bound.
    pub(crate) fn flush_bind_groups(&mut self, bind_point: vk::PipelineBindPoint) -> bool {
        let (device, recorder) = self.parts();
        let layout = recorder.bind_state.layout();
        if recorder.bind_state.pipeline() == vk::Pipeline::null() {
            log::error!("Draw or dispatch recorded without a pipeline");
            return false;
        }
        let cmd = recorder.handle();
        for call in recorder.bind_state.flush() {
            unsafe {
                device.raw().cmd_bind_descriptor_sets(
                    cmd,
                    bind_point,
                    layout,
                    call.first_set,
                    &call.sets,
                    &call.dynamic_offsets,
                );
            }
        }
        true
    }

    pub(crate) fn push_constants(
        &mut self,
        layout: &PipelineLayout,
        range_index: usize,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let range = layout.push_range(range_index).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "pipeline layout {:?} has no push constant range {}",
                layout.label(),
                range_index
            ))
        })?;
        if data.len() as u32 > range.size || data.len() % 4 != 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "{} push constant bytes do not fit range {} of {} bytes",
                data.len(),
                range_index,
                range.size
            )));
        }
        let (device, recorder) = self.parts();
        unsafe {
            device.raw().cmd_push_constants(
                recorder.handle(),
                layout.handle(),
                range.stages,
                range.offset,
                data,
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Debug annotations
    // ------------------------------------------------------------------

    pub fn push_debug_group(&mut self, label: &str) {
        let (device, recorder) = self.parts();
        device.debug_names().begin_label(recorder.handle(), label);
        recorder.push_debug_group();
    }

    pub fn pop_debug_group(&mut self) {
        let (device, recorder) = self.parts();
        if recorder.pop_debug_group() {
            device.debug_names().end_label(recorder.handle());
        } else {
            log::warn!("pop_debug_group without a matching push");
        }
    }

    pub fn insert_debug_marker(&mut self, label: &str) {
        let (device, recorder) = self.parts();
        device.debug_names().insert_label(recorder.handle(), label);
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Reset `first..first + count` so they can be written again.
    pub fn reset_query_heap(&mut self, heap: &Arc<QueryHeap>, first: u32, count: u32) {
        if !check_query_range(heap, first, count) {
            return;
        }
        let (device, recorder) = self.parts();
        unsafe {
            device
                .raw()
                .cmd_reset_query_pool(recorder.handle(), heap.handle(), first, count);
        }
        recorder.retain(heap);
    }

    /// Begin an occlusion or pipeline statistics query.
    pub fn begin_query(&mut self, heap: &Arc<QueryHeap>, index: u32) {
        if !check_query_range(heap, index, 1) {
            return;
        }
        let flags = match heap.ty() {
            QueryType::Occlusion if self.device.features().occlusion_query_precise => {
                vk::QueryControlFlags::PRECISE
            }
            QueryType::Timestamp => {
                log::error!("Timestamp queries are written with write_timestamp");
                return;
            }
            _ => vk::QueryControlFlags::empty(),
        };
        let (device, recorder) = self.parts();
        unsafe {
            device
                .raw()
                .cmd_begin_query(recorder.handle(), heap.handle(), index, flags);
        }
        recorder.retain(heap);
    }

    pub fn end_query(&mut self, heap: &Arc<QueryHeap>, index: u32) {
        if heap.ty() == QueryType::Timestamp || !check_query_range(heap, index, 1) {
            return;
        }
        let (device, recorder) = self.parts();
        unsafe {
            device
                .raw()
                .cmd_end_query(recorder.handle(), heap.handle(), index);
        }
    }

    /// Write the GPU timestamp once all previous commands completed.
    pub fn write_timestamp(&mut self, heap: &Arc<QueryHeap>, index: u32) {
        if heap.ty() != QueryType::Timestamp {
            log::error!("write_timestamp needs a timestamp query heap");
            return;
        }
        if !check_query_range(heap, index, 1) {
            return;
        }
        let (device, recorder) = self.parts();
        unsafe {
            device.dispatch().cmd_write_timestamp2(
                recorder.handle(),
                vk::PipelineStageFlags2::ALL_COMMANDS,
                heap.handle(),
                index,
            );
        }
        recorder.retain(heap);
    }

    /// Copy the results of `first..first + count` into `dst` at `offset`,
    /// [`QueryHeap::result_size`] bytes per query.
    pub fn resolve_query(
        &mut self,
        heap: &Arc<QueryHeap>,
        first: u32,
        count: u32,
        dst: &Arc<Buffer>,
        offset: u64,
    ) -> Result<(), GraphicsError> {
        if !check_query_range(heap, first, count) {
            return Err(GraphicsError::InvalidParameter(format!(
                "query range {}+{} is not valid for heap {:?}",
                first,
                count,
                heap.label()
            )));
        }
        let stride = heap.result_size() as u64;
        let size = stride * count as u64;
        if offset % 8 != 0 || offset.checked_add(size).is_none_or(|end| end > dst.size()) {
            return Err(GraphicsError::InvalidParameter(format!(
                "{} query results at offset {} do not fit buffer {:?}",
                count,
                offset,
                dst.label()
            )));
        }

        self.transition_buffer(dst, BufferStates::COPY_DEST);
        self.flush_barriers();
        let (device, recorder) = self.parts();
        unsafe {
            device.raw().cmd_copy_query_pool_results(
                recorder.handle(),
                heap.handle(),
                first,
                count,
                dst.handle(),
                offset,
                stride,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            );
        }
        recorder.retain(heap);
        recorder.retain(dst);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Conditional rendering
    // ------------------------------------------------------------------

    /// Skip subsequent draws and dispatches when the 32-bit value at
    /// `offset` in `buffer` is zero, or non-zero when `inverted`.
    pub fn begin_conditional_rendering(
        &mut self,
        buffer: &Arc<Buffer>,
        offset: u64,
        inverted: bool,
    ) -> Result<(), GraphicsError> {
        let Some(loader) = self.device.loaders().conditional_rendering.clone() else {
            return Err(GraphicsError::FeatureNotSupported(
                "conditional rendering".to_string(),
            ));
        };
        if offset % 4 != 0 || offset + 4 > buffer.size() {
            return Err(GraphicsError::InvalidParameter(format!(
                "predicate offset {} is not valid for buffer {:?}",
                offset,
                buffer.label()
            )));
        }
        self.transition_buffer(buffer, BufferStates::PREDICATION);
        self.flush_barriers();

        let flags = if inverted {
            vk::ConditionalRenderingFlagsEXT::INVERTED
        } else {
            vk::ConditionalRenderingFlagsEXT::empty()
        };
        let info = vk::ConditionalRenderingBeginInfoEXT::default()
            .buffer(buffer.handle())
            .offset(offset)
            .flags(flags);
        let (_, recorder) = self.parts();
        unsafe { (loader.fp().cmd_begin_conditional_rendering_ext)(recorder.handle(), &info) };
        recorder.retain(buffer);
        Ok(())
    }

    pub fn end_conditional_rendering(&mut self) {
        let Some(loader) = self.device.loaders().conditional_rendering.clone() else {
            return;
        };
        let (_, recorder) = self.parts();
        unsafe { (loader.fp().cmd_end_conditional_rendering_ext)(recorder.handle()) };
    }

    // ------------------------------------------------------------------
    // Passes and presentation
    // ------------------------------------------------------------------

    /// Begin a render pass. Graphics queue only.
    pub fn begin_render_pass(
        &mut self,
        descriptor: &RenderPassDescriptor,
    ) -> Result<RenderPass<'_>, GraphicsError> {
        RenderPass::begin(self, descriptor)
    }

    /// Begin a compute pass. Graphics and compute queues only.
    pub fn begin_compute_pass(
        &mut self,
        label: Option<&str>,
    ) -> Result<ComputePass<'_>, GraphicsError> {
        ComputePass::begin(self, label)
    }

    /// Move the swap chain's current image to the present layout and queue
    /// it for presentation when the frame is committed.
    pub fn present(&mut self, swapchain: &Arc<SwapChain>) -> Result<(), GraphicsError> {
        if self.queue != QueueType::Graphics {
            return Err(GraphicsError::InvalidParameter(format!(
                "present must be recorded on the graphics queue, not {:?}",
                self.queue
            )));
        }
        let texture = swapchain.acquired_texture().ok_or_else(|| {
            GraphicsError::InvalidParameter("swap chain has no acquired image".to_string())
        })?;
        let full = texture.transition_range(
            0,
            texture.mip_level_count(),
            0,
            texture.array_layers(),
            TextureLayout::Present,
        );
        self.record_texture_transitions(&texture, full, TextureLayout::Present);
        let (_, recorder) = self.parts();
        recorder.push_present(swapchain);
        Ok(())
    }
}

static_assertions::assert_impl_all!(CommandBuffer: Send);

fn check_query_range(heap: &QueryHeap, first: u32, count: u32) -> bool {
    if !heap.is_valid() || first.checked_add(count).is_none_or(|end| end > heap.count()) {
        log::error!(
            "Query range {}+{} is not valid for heap {:?} of {}",
            first,
            count,
            heap.label(),
            heap.count()
        );
        return false;
    }
    true
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        if let Some(mut recorder) = self.recorder.take() {
            log::warn!(
                "{:?} command buffer dropped without being submitted",
                self.queue
            );
            recorder.discard();
            if let Some(queue) = self.device.queue(self.queue) {
                queue.release_recorder(recorder);
            }
        }
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("queue", &self.queue)
            .field("recorder", &self.recorder)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    use crate::device::DeviceDescriptor;
    use crate::instance::{GraphicsInstance, InstanceDescriptor};
    use crate::types::{BufferDescriptor, BufferUsage, PixelFormat, TextureDescriptor, TextureUsage};

    fn try_device() -> Option<Arc<GraphicsDevice>> {
        let instance = GraphicsInstance::new(InstanceDescriptor::new()).ok()?;
        let adapter = instance.request_adapter().ok()?;
        adapter.create_device(&DeviceDescriptor::new()).ok()
    }

    /// Pending barriers and native barrier calls of a recording buffer.
    fn barrier_counts(cmd: &CommandBuffer) -> (usize, u64) {
        let recorder = cmd.recorder.as_deref().expect("recording");
        (recorder.barriers.len(), recorder.barriers.flush_count())
    }

    #[test]
    fn test_repeated_transitions_record_one_barrier() {
        let Some(device) = try_device() else {
            eprintln!("No Vulkan device available, skipping");
            return;
        };
        let buffer = device
            .create_buffer(&BufferDescriptor::new(256, BufferUsage::SHADER_READ))
            .expect("buffer");
        let texture = device
            .create_texture(&TextureDescriptor::texture_2d(
                PixelFormat::Rgba8Unorm,
                4,
                4,
                TextureUsage::SHADER_READ,
            ))
            .expect("texture");
        assert_ne!(buffer.state(), BufferStates::COPY_DEST);
        assert_ne!(texture.layout(0, 0), TextureLayout::CopyDest);

        let mut cmd = device
            .begin_command_buffer(QueueType::Graphics, Some("dedup"))
            .expect("command buffer");
        for _ in 0..2 {
            cmd.transition_buffer(&buffer, BufferStates::COPY_DEST);
            cmd.transition_texture_range(&texture, 0, 1, 0, 1, TextureLayout::CopyDest);
        }
        assert_eq!(barrier_counts(&cmd), (2, 0));

        cmd.flush_barriers();
        assert_eq!(barrier_counts(&cmd), (0, 1));

        cmd.transition_buffer(&buffer, BufferStates::COPY_DEST);
        cmd.transition_texture_range(&texture, 0, 1, 0, 1, TextureLayout::CopyDest);
        cmd.flush_barriers();
        assert_eq!(barrier_counts(&cmd), (0, 1));

        device.submit(cmd).expect("submit");
        device.commit_frame().expect("commit frame");
        device.wait_idle().expect("wait idle");
    }

    #[rstest]
    #[case::graphics_vertex(QueueType::Graphics, BufferStates::VERTEX_BUFFER, true)]
    #[case::compute_storage(QueueType::Compute, BufferStates::UNORDERED_ACCESS, true)]
    #[case::compute_indirect(QueueType::Compute, BufferStates::INDIRECT_ARGUMENT, true)]
    #[case::compute_index(QueueType::Compute, BufferStates::INDEX_BUFFER, false)]
    #[case::copy_dest(QueueType::Copy, BufferStates::COPY_DEST, true)]
    #[case::copy_shader_read(QueueType::Copy, BufferStates::SHADER_RESOURCE, false)]
    fn test_buffer_state_per_queue(
        #[case] queue: QueueType,
        #[case] state: BufferStates,
        #[case] allowed: bool,
    ) {
        assert_eq!(buffer_state_allowed(queue, state), allowed);
    }

    #[rstest]
    #[case::graphics_present(QueueType::Graphics, TextureLayout::Present, true)]
    #[case::compute_storage(QueueType::Compute, TextureLayout::UnorderedAccess, true)]
    #[case::compute_render_target(QueueType::Compute, TextureLayout::RenderTarget, false)]
    #[case::compute_depth(QueueType::Compute, TextureLayout::DepthRead, false)]
    #[case::copy_source(QueueType::Copy, TextureLayout::CopySource, true)]
    #[case::copy_shader_read(QueueType::Copy, TextureLayout::ShaderResource, false)]
    fn test_texture_layout_per_queue(
        #[case] queue: QueueType,
        #[case] layout: TextureLayout,
        #[case] allowed: bool,
    ) {
        assert_eq!(texture_layout_allowed(queue, layout), allowed);
    }
}
