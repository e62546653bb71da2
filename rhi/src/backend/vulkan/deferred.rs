//! Deferred destruction of Vulkan objects.
//!
//! GPU work runs up to `max_frames_in_flight` frames behind the CPU, so a
//! native handle cannot be destroyed when its owning resource is dropped.
//! Drop implementations push the handle into the device's [`DeletionQueue`]
//! tagged with the current frame count. The queue is drained after the frame
//! fence wait in `commit_frame`, and unconditionally on `wait_idle` and
//! device teardown.
//!
//! ```text
//! drop(Buffer)          commit_frame()                 wait_idle()
//!     │                      │                              │
//!     ▼                      ▼                              ▼
//! push(frame F)  ──►  drain entries with         ──►  drain everything
//!                     F + max_frames < count
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::Allocation;

use super::allocator::MemoryAllocator;
use crate::instance::Surface;

/// Entries queued for destruction, each tagged with the frame it was retired in.
#[derive(Debug)]
pub struct DeletionQueue<T> {
    entries: VecDeque<(u64, T)>,
}

impl<T> Default for DeletionQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DeletionQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Queue an item retired during `frame`.
    pub fn push(&mut self, frame: u64, item: T) {
        self.entries.push_back((frame, item));
    }

    /// Remove and return every item whose frame has provably retired.
    ///
    /// An item pushed during frame `F` is safe once `F + max_frames < frame_count`.
    /// `force` drains the whole queue and must only be used on an idle device.
    pub fn drain_retired(&mut self, frame_count: u64, max_frames: u64, force: bool) -> Vec<T> {
        let mut retired = Vec::new();
        while let Some((frame, _)) = self.entries.front() {
            if !force && frame + max_frames >= frame_count {
                break;
            }
            if let Some((_, item)) = self.entries.pop_front() {
                retired.push(item);
            }
        }
        retired
    }

    /// Number of entries still waiting.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A Vulkan object pending destruction.
pub enum DeferredResource {
    Buffer {
        buffer: vk::Buffer,
        allocation: Option<Allocation>,
    },
    /// An image plus every view created for it.
    Texture {
        image: vk::Image,
        views: Vec<vk::ImageView>,
        allocation: Option<Allocation>,
    },
    ImageView(vk::ImageView),
    Sampler(vk::Sampler),
    DescriptorSetLayout(vk::DescriptorSetLayout),
    DescriptorSet {
        pool: vk::DescriptorPool,
        set: vk::DescriptorSet,
    },
    PipelineLayout(vk::PipelineLayout),
    Pipeline(vk::Pipeline),
    QueryPool(vk::QueryPool),
    Fence(vk::Fence),
    Semaphore(vk::Semaphore),
    CommandPool(vk::CommandPool),
    /// The surface is released after the swapchain that presents to it.
    Swapchain {
        loader: ash::khr::swapchain::Device,
        swapchain: vk::SwapchainKHR,
        surface: Arc<Surface>,
    },
}

// SAFETY: DeferredResource only contains Vulkan handles and loader tables,
// which may be used from any thread.
unsafe impl Send for DeferredResource {}
unsafe impl Sync for DeferredResource {}

impl std::fmt::Debug for DeferredResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Buffer { .. } => "Buffer",
            Self::Texture { .. } => "Texture",
            Self::ImageView(_) => "ImageView",
            Self::Sampler(_) => "Sampler",
            Self::DescriptorSetLayout(_) => "DescriptorSetLayout",
            Self::DescriptorSet { .. } => "DescriptorSet",
            Self::PipelineLayout(_) => "PipelineLayout",
            Self::Pipeline(_) => "Pipeline",
            Self::QueryPool(_) => "QueryPool",
            Self::Fence(_) => "Fence",
            Self::Semaphore(_) => "Semaphore",
            Self::CommandPool(_) => "CommandPool",
            Self::Swapchain { .. } => "Swapchain",
        };
        f.write_str(name)
    }
}

impl DeferredResource {
    /// Destroy the object and free its memory.
    ///
    /// # Safety
    ///
    /// The caller must ensure the GPU is no longer using this object and that
    /// `device` is the device that created it.
    pub unsafe fn destroy(self, device: &ash::Device, allocator: &MemoryAllocator) {
        match self {
            DeferredResource::Buffer { buffer, allocation } => {
                if let Some(allocation) = allocation {
                    allocator.free(allocation);
                }
                unsafe { device.destroy_buffer(buffer, None) };
            }
            DeferredResource::Texture {
                image,
                views,
                allocation,
            } => {
                unsafe {
                    for view in views {
                        device.destroy_image_view(view, None);
                    }
                }
                // Swapchain images have no allocation and are owned by the swapchain.
                if let Some(allocation) = allocation {
                    allocator.free(allocation);
                    unsafe { device.destroy_image(image, None) };
                }
            }
            DeferredResource::ImageView(view) => unsafe { device.destroy_image_view(view, None) },
            DeferredResource::Sampler(sampler) => unsafe { device.destroy_sampler(sampler, None) },
            DeferredResource::DescriptorSetLayout(layout) => unsafe {
                device.destroy_descriptor_set_layout(layout, None)
            },
            DeferredResource::DescriptorSet { pool, set } => {
                if let Err(e) = unsafe { device.free_descriptor_sets(pool, &[set]) } {
                    log::error!("Failed to free descriptor set: {:?}", e);
                }
            }
            DeferredResource::PipelineLayout(layout) => unsafe {
                device.destroy_pipeline_layout(layout, None)
            },
            DeferredResource::Pipeline(pipeline) => unsafe {
                device.destroy_pipeline(pipeline, None)
            },
            DeferredResource::QueryPool(pool) => unsafe { device.destroy_query_pool(pool, None) },
            DeferredResource::Fence(fence) => unsafe { device.destroy_fence(fence, None) },
            DeferredResource::Semaphore(semaphore) => unsafe {
                device.destroy_semaphore(semaphore, None)
            },
            DeferredResource::CommandPool(pool) => unsafe {
                device.destroy_command_pool(pool, None)
            },
            DeferredResource::Swapchain {
                loader,
                swapchain,
                surface,
            } => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                drop(surface);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_wait_for_retirement() {
        let mut queue = DeletionQueue::new();
        queue.push(5, "a");

        // max_frames = 2: frame 5 retires once the frame count passes 7.
        assert!(queue.drain_retired(5, 2, false).is_empty());
        assert!(queue.drain_retired(6, 2, false).is_empty());
        assert!(queue.drain_retired(7, 2, false).is_empty());
        assert_eq!(queue.drain_retired(8, 2, false), vec!["a"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_preserves_order_and_stops_at_young_entry() {
        let mut queue = DeletionQueue::new();
        queue.push(1, 1);
        queue.push(2, 2);
        queue.push(6, 3);

        assert_eq!(queue.drain_retired(5, 2, false), vec![1, 2]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_force_drains_everything() {
        let mut queue = DeletionQueue::new();
        queue.push(10, 'x');
        queue.push(11, 'y');
        assert_eq!(queue.drain_retired(0, 3, true), vec!['x', 'y']);
        assert!(queue.is_empty());
    }
}
