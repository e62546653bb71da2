//! Barrier batching for command recording.
//!
//! Buffer and image barriers are collected into fixed-capacity arrays and
//! issued together with a single `vkCmdPipelineBarrier2` call. A batch must be
//! flushed once either array is full; [`BarrierBatch::is_full`] reports that.

use ash::vk;

use super::dispatch::DeviceDispatch;
use super::states::{NativeState, buffer_state, texture_state};
use crate::types::{BufferStates, TextureLayout};

/// Maximum number of barriers of one kind held before a flush.
pub const MAX_BARRIER_COUNT: usize = 16;

/// A batch of buffer and image memory barriers to submit together.
#[derive(Debug)]
pub struct BarrierBatch {
    buffer_barriers: Vec<vk::BufferMemoryBarrier2<'static>>,
    image_barriers: Vec<vk::ImageMemoryBarrier2<'static>>,
    /// Number of native barrier calls issued so far.
    flush_count: u64,
}

// SAFETY: the stored barrier structs never carry a p_next chain, so the only
// raw pointers inside them are null.
unsafe impl Send for BarrierBatch {}

impl Default for BarrierBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl BarrierBatch {
    /// Create a new empty barrier batch.
    pub fn new() -> Self {
        Self {
            buffer_barriers: Vec::with_capacity(MAX_BARRIER_COUNT),
            image_barriers: Vec::with_capacity(MAX_BARRIER_COUNT),
            flush_count: 0,
        }
    }

    /// Add a whole-buffer transition.
    ///
    /// Transitions where `before == after` are skipped. Returns whether a
    /// barrier was added.
    pub fn add_buffer_barrier(
        &mut self,
        buffer: vk::Buffer,
        before: BufferStates,
        after: BufferStates,
    ) -> bool {
        if before == after {
            return false;
        }
        debug_assert!(self.buffer_barriers.len() < MAX_BARRIER_COUNT);

        let src = buffer_state(before);
        let dst = buffer_state(after);
        self.buffer_barriers.push(
            vk::BufferMemoryBarrier2::default()
                .src_stage_mask(src.stage)
                .src_access_mask(src.access)
                .dst_stage_mask(dst.stage)
                .dst_access_mask(dst.access)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(buffer)
                .offset(0)
                .size(vk::WHOLE_SIZE),
        );
        true
    }

    /// Add an image layout transition over a subresource range.
    ///
    /// Transitions where `before == after` are skipped. Returns whether a
    /// barrier was added.
    pub fn add_image_barrier(
        &mut self,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
        depth_only: bool,
        before: TextureLayout,
        after: TextureLayout,
    ) -> bool {
        if before == after {
            return false;
        }
        debug_assert!(self.image_barriers.len() < MAX_BARRIER_COUNT);

        let src = texture_state(before, depth_only);
        let dst = texture_state(after, depth_only);
        self.image_barriers
            .push(image_barrier(image, range, src, dst));
        true
    }

    /// Whether either barrier array reached capacity.
    pub fn is_full(&self) -> bool {
        self.buffer_barriers.len() >= MAX_BARRIER_COUNT
            || self.image_barriers.len() >= MAX_BARRIER_COUNT
    }

    /// Check if the batch has any barriers.
    pub fn is_empty(&self) -> bool {
        self.buffer_barriers.is_empty() && self.image_barriers.is_empty()
    }

    /// Get the number of pending barriers of both kinds.
    pub fn len(&self) -> usize {
        self.buffer_barriers.len() + self.image_barriers.len()
    }

    /// Number of native barrier calls issued by this batch.
    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }

    /// Build the dependency info for the pending barriers.
    pub fn dependency_info(&self) -> vk::DependencyInfo<'_> {
        vk::DependencyInfo::default()
            .buffer_memory_barriers(&self.buffer_barriers)
            .image_memory_barriers(&self.image_barriers)
    }

    /// Record every pending barrier in one call and clear the batch.
    ///
    /// Does nothing if the batch is empty.
    pub fn flush(&mut self, dispatch: &DeviceDispatch, cmd: vk::CommandBuffer) {
        if self.is_empty() {
            return;
        }

        let dependency_info = self.dependency_info();
        // SAFETY: cmd is in the recording state and every barrier references
        // live handles owned by resources kept alive by the caller.
        unsafe { dispatch.cmd_pipeline_barrier2(cmd, &dependency_info) };

        self.flush_count += 1;
        self.clear();
    }

    /// Drop pending barriers without recording them.
    pub fn clear(&mut self) {
        self.buffer_barriers.clear();
        self.image_barriers.clear();
    }

    /// Forget pending barriers and reset statistics.
    pub fn reset(&mut self) {
        self.clear();
        self.flush_count = 0;
    }
}

/// Build a single image barrier between two native states.
pub fn image_barrier(
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    src: NativeState,
    dst: NativeState,
) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2::default()
        .src_stage_mask(src.stage)
        .src_access_mask(src.access)
        .dst_stage_mask(dst.stage)
        .dst_access_mask(dst.access)
        .old_layout(src.layout)
        .new_layout(dst.layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn color_range() -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    #[test]
    fn test_barrier_batch_empty() {
        let batch = BarrierBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
        assert!(!batch.is_full());
    }

    #[test]
    fn test_barrier_batch_skip_same_state() {
        let mut batch = BarrierBatch::new();
        let image = vk::Image::from_raw(12345);
        let buffer = vk::Buffer::from_raw(54321);

        assert!(!batch.add_image_barrier(
            image,
            color_range(),
            false,
            TextureLayout::RenderTarget,
            TextureLayout::RenderTarget,
        ));
        assert!(!batch.add_buffer_barrier(
            buffer,
            BufferStates::VERTEX_BUFFER,
            BufferStates::VERTEX_BUFFER,
        ));
        assert!(batch.is_empty());
    }

    #[test]
    fn test_barrier_batch_adds_transition() {
        let mut batch = BarrierBatch::new();
        let image = vk::Image::from_raw(12345);

        assert!(batch.add_image_barrier(
            image,
            color_range(),
            false,
            TextureLayout::Undefined,
            TextureLayout::RenderTarget,
        ));

        let info = batch.dependency_info();
        assert_eq!(info.image_memory_barrier_count, 1);
        assert_eq!(info.buffer_memory_barrier_count, 0);
        assert_eq!(batch.image_barriers[0].old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(
            batch.image_barriers[0].new_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn test_buffer_barrier_covers_whole_buffer() {
        let mut batch = BarrierBatch::new();
        batch.add_buffer_barrier(
            vk::Buffer::from_raw(7),
            BufferStates::COPY_DEST,
            BufferStates::VERTEX_BUFFER,
        );

        let barrier = &batch.buffer_barriers[0];
        assert_eq!(barrier.size, vk::WHOLE_SIZE);
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::VERTEX_ATTRIBUTE_READ);
    }

    #[test]
    fn test_full_at_threshold() {
        let mut batch = BarrierBatch::new();
        for i in 0..MAX_BARRIER_COUNT {
            assert!(!batch.is_full());
            batch.add_buffer_barrier(
                vk::Buffer::from_raw(i as u64 + 1),
                BufferStates::UNDEFINED,
                BufferStates::SHADER_RESOURCE,
            );
        }
        assert!(batch.is_full());
        assert_eq!(batch.len(), MAX_BARRIER_COUNT);

        batch.clear();
        assert!(batch.is_empty());
        assert!(!batch.is_full());
    }

    #[test]
    fn test_kinds_fill_independently() {
        let mut batch = BarrierBatch::new();
        for i in 0..MAX_BARRIER_COUNT - 1 {
            batch.add_buffer_barrier(
                vk::Buffer::from_raw(i as u64 + 1),
                BufferStates::UNDEFINED,
                BufferStates::COPY_DEST,
            );
            batch.add_image_barrier(
                vk::Image::from_raw(i as u64 + 1),
                color_range(),
                false,
                TextureLayout::Undefined,
                TextureLayout::CopyDest,
            );
        }
        assert!(!batch.is_full());
        assert_eq!(batch.len(), 2 * (MAX_BARRIER_COUNT - 1));
    }
}
