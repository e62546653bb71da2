//! Graphics device.
//!
//! The [`GraphicsDevice`] owns the logical device, one [`Queue`] per queue
//! type, the pooled memory allocator, the pipeline cache, the sampler cache,
//! the null resources used for unbound descriptor slots and the deletion
//! queue. It is created by [`GraphicsAdapter::create_device`].
//!
//! # Frame lifecycle
//!
//! ```text
//! begin_command_buffer ─► record ─► submit ─► ... ─► commit_frame
//!                                                        │
//!            every queue submits its pending work ◄──────┤
//!            frame counter advances                      │
//!            oldest frame slot fences are waited on ◄────┤
//!            retired deletion queue entries destroyed ◄──┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::adapter::GraphicsAdapter;
use crate::backend::vulkan::allocator::{MemoryAllocator, create_allocator};
use crate::backend::vulkan::conversion::convert_pixel_format;
use crate::backend::vulkan::debug::DebugNames;
use crate::backend::vulkan::deferred::{DeferredResource, DeletionQueue};
use crate::backend::vulkan::descriptor::DescriptorAllocator;
use crate::backend::vulkan::dispatch::DeviceDispatch;
use crate::backend::vulkan::features::{AdapterFeatures, FeatureChain};
use crate::backend::vulkan::frame::{DEFAULT_FRAMES_IN_FLIGHT, FramePacer, clamp_frames_in_flight};
use crate::backend::vulkan::queue_family::{QueueSelection, select_queue_families, unique_families};
use crate::command::CommandBuffer;
use crate::copy_allocator::CopyAllocator;
use crate::error::GraphicsError;
use crate::instance::Surface;
use crate::null_resources::NullResources;
use crate::queue::Queue;
use crate::resources::{
    BindGroup, BindGroupDescriptor, BindGroupLayout, Buffer, ComputePipeline,
    ComputePipelineDescriptor, PipelineLayout, PipelineLayoutDescriptor, QueryHeap,
    RenderPipeline, RenderPipelineDescriptor, Sampler, ShaderModule, ShaderModuleDescriptor,
    Texture, TextureView, create_native_sampler,
};
use crate::swapchain::{SwapChain, SwapChainDescriptor};
use crate::types::{
    BindGroupLayoutDescriptor, BufferDescriptor, Feature, GraphicsLimits, PixelFormat,
    QueryHeapDescriptor, QueueType, SamplerDescriptor, SamplerKey, TextureData,
    TextureDescriptor, TextureViewDescriptor,
};

/// Upper bound of every blocking fence wait. Exceeding it means the GPU hung.
pub(crate) const FENCE_TIMEOUT_NS: u64 = 5_000_000_000;

/// Device configuration.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    /// Debug label of the logical device.
    pub label: Option<String>,
    /// Frames the CPU may record ahead of the GPU, clamped to `1..=3`.
    pub max_frames_in_flight: u32,
    /// Features that must be available, otherwise creation fails.
    pub required_features: Vec<Feature>,
    /// Surface the graphics queue must be able to present to.
    pub compatible_surface: Option<Arc<Surface>>,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            max_frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            required_features: Vec::new(),
            compatible_surface: None,
        }
    }
}

impl DeviceDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_max_frames_in_flight(mut self, frames: u32) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    pub fn with_required_feature(mut self, feature: Feature) -> Self {
        self.required_features.push(feature);
        self
    }

    pub fn with_compatible_surface(mut self, surface: Arc<Surface>) -> Self {
        self.compatible_surface = Some(surface);
        self
    }
}

/// Extension loaders for commands that are not part of the core API.
pub(crate) struct ExtensionLoaders {
    pub swapchain: ash::khr::swapchain::Device,
    pub mesh_shader: Option<ash::ext::mesh_shader::Device>,
    pub conditional_rendering: Option<ash::ext::conditional_rendering::Device>,
}

/// A logical GPU device.
///
/// # Thread Safety
///
/// `GraphicsDevice` is `Send + Sync`. Resources may be created and command
/// buffers recorded from any thread. Submission to one queue is serialized
/// by that queue's lock, and [`GraphicsDevice::commit_frame`] is serialized
/// against itself.
///
/// # Example
///
/// ```ignore
/// let device = adapter.create_device(&DeviceDescriptor::default())?;
/// let buffer = device.create_buffer_with_data(
///     &BufferDescriptor::new(256, BufferUsage::VERTEX),
///     bytemuck::cast_slice(&vertices),
/// )?;
///
/// let mut cmd = device.begin_command_buffer(QueueType::Graphics, Some("frame"))?;
/// // record passes...
/// device.submit(cmd)?;
/// device.commit_frame()?;
/// ```
pub struct GraphicsDevice {
    adapter: Arc<GraphicsAdapter>,
    label: Option<String>,
    dispatch: DeviceDispatch,
    debug_names: DebugNames,
    allocator: MemoryAllocator,
    loaders: ExtensionLoaders,
    selection: QueueSelection,
    queues: [Option<Queue>; QueueType::COUNT],
    /// Families of the graphics, compute and copy queues, deduplicated.
    sharing_families: Vec<u32>,
    pipeline_cache: vk::PipelineCache,
    dynamic_states: Vec<vk::DynamicState>,
    limits: GraphicsLimits,
    timestamp_frequency: u64,
    pacer: Mutex<FramePacer>,
    commit_lock: Mutex<()>,
    deletion_queue: Mutex<DeletionQueue<DeferredResource>>,
    sampler_cache: Mutex<HashMap<SamplerKey, vk::Sampler>>,
    descriptor_allocator: Mutex<DescriptorAllocator>,
    null_resources: NullResources,
    copy_allocator: CopyAllocator,
}

impl GraphicsDevice {
    pub(crate) fn new(
        adapter: Arc<GraphicsAdapter>,
        descriptor: &DeviceDescriptor,
    ) -> Result<Arc<Self>, GraphicsError> {
        let instance = adapter.instance();
        let raw_instance = instance.raw();
        let physical_device = adapter.physical_device();
        let api_version = adapter.api_version();
        let extensions = adapter.extensions();
        let features = *adapter.features();

        let caps = adapter.queue_family_caps(descriptor.compatible_surface.as_deref());
        let selection = select_queue_families(&caps, extensions.supports_video_decode())?;

        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = selection
            .queue_requests()
            .map(|(family, priorities)| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(priorities)
            })
            .collect();

        let extension_names = extensions.enabled_extension_names(api_version);
        let extension_ptrs: Vec<*const std::ffi::c_char> =
            extension_names.iter().map(|name| name.as_ptr()).collect();

        // Query the chain again and hand it back unchanged: every supported
        // feature in it is enabled.
        let mut chain = FeatureChain::default();
        let mut features2 = chain.link(api_version, extensions);
        unsafe { raw_instance.get_physical_device_features2(physical_device, &mut features2) };

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .push_next(&mut features2);

        let device = unsafe { raw_instance.create_device(physical_device, &create_info, None) }
            .map_err(|e| {
                GraphicsError::InitializationFailed(format!(
                    "Failed to create logical device: {:?}",
                    e
                ))
            })?;

        let dispatch = DeviceDispatch::new(raw_instance, device.clone(), api_version);
        let debug_names = DebugNames::new(raw_instance, &device, instance.debug_utils_enabled());
        if let Some(label) = &descriptor.label {
            debug_names.set_object_name(device.handle(), label);
        }

        let allocator = MemoryAllocator::new(create_allocator(
            raw_instance,
            physical_device,
            device.clone(),
            features.buffer_device_address,
        )?);

        let frames_in_flight = clamp_frames_in_flight(descriptor.max_frames_in_flight);
        let queues = create_queues(&device, &selection, frames_in_flight)?;
        for queue in queues.iter().flatten() {
            debug_names.set_object_name(queue.handle(), &format!("{:?} queue", queue.ty()));
        }
        let sharing_families = unique_families(&[
            selection.family(QueueType::Graphics),
            selection.family(QueueType::Compute),
            selection.family(QueueType::Copy),
        ]);

        let pipeline_cache =
            unsafe { device.create_pipeline_cache(&vk::PipelineCacheCreateInfo::default(), None) }
                .map_err(|e| {
                    GraphicsError::InitializationFailed(format!(
                        "Failed to create pipeline cache: {:?}",
                        e
                    ))
                })?;

        let limits = adapter.limits();
        let mut sampler_cache = HashMap::new();
        let null_sampler_descriptor = SamplerDescriptor::default();
        let null_sampler =
            create_native_sampler(&device, &features, &limits, &null_sampler_descriptor)
                .map_err(|e| {
                    GraphicsError::InitializationFailed(format!(
                        "Failed to create null sampler: {:?}",
                        e
                    ))
                })?;
        sampler_cache.insert(null_sampler_descriptor.cache_key(), null_sampler);
        let null_resources = NullResources::new(&device, &allocator, null_sampler)?;

        let loaders = ExtensionLoaders {
            swapchain: ash::khr::swapchain::Device::new(raw_instance, &device),
            mesh_shader: (extensions.mesh_shader && features.mesh_shader)
                .then(|| ash::ext::mesh_shader::Device::new(raw_instance, &device)),
            conditional_rendering: features
                .conditional_rendering
                .then(|| ash::ext::conditional_rendering::Device::new(raw_instance, &device)),
        };

        let period = adapter.timestamp_period();
        let timestamp_frequency = if period > 0.0 {
            (1.0e9 / period as f64) as u64
        } else {
            0
        };

        let this = Arc::new(Self {
            label: descriptor.label.clone(),
            dispatch,
            debug_names,
            allocator,
            loaders,
            queues,
            sharing_families,
            pipeline_cache,
            dynamic_states: dynamic_states(&features),
            limits,
            timestamp_frequency,
            pacer: Mutex::new(FramePacer::new(frames_in_flight)),
            commit_lock: Mutex::new(()),
            deletion_queue: Mutex::new(DeletionQueue::new()),
            sampler_cache: Mutex::new(sampler_cache),
            descriptor_allocator: Mutex::new(DescriptorAllocator::new(
                extensions.supports_acceleration_structure(),
            )),
            null_resources,
            copy_allocator: CopyAllocator::new(),
            selection,
            adapter,
        });

        let context = this.copy_allocator.allocate(&this, 0)?;
        this.null_resources
            .record_initialization(&this.dispatch, context.transition_command_buffer());
        this.copy_allocator.submit(&this, context)?;

        log::info!(
            "Created GraphicsDevice on {} (graphics family {}, compute family {}, copy family {}, video decode: {}, {} frames in flight)",
            this.adapter.name(),
            this.selection.family(QueueType::Graphics),
            this.selection.family(QueueType::Compute),
            this.selection.family(QueueType::Copy),
            this.selection.has_queue(QueueType::VideoDecode),
            frames_in_flight
        );

        Ok(this)
    }

    /// The adapter this device was created from.
    pub fn adapter(&self) -> &Arc<GraphicsAdapter> {
        &self.adapter
    }

    /// Debug label given at creation.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn limits(&self) -> &GraphicsLimits {
        &self.limits
    }

    /// Whether a queue of this type exists on the device.
    pub fn has_queue(&self, queue: QueueType) -> bool {
        self.queues[queue.index()].is_some()
    }

    /// Whether an optional feature is available.
    pub fn supports(&self, feature: Feature) -> bool {
        self.adapter.query_feature_support(feature)
    }

    /// Number of frames committed so far.
    pub fn frame_count(&self) -> u64 {
        self.pacer.lock().frame_count()
    }

    /// Frame slot currently being recorded.
    pub fn frame_index(&self) -> u32 {
        self.pacer.lock().frame_index()
    }

    pub fn max_frames_in_flight(&self) -> u32 {
        self.pacer.lock().max_frames_in_flight()
    }

    /// Timestamp query ticks per second.
    pub fn timestamp_frequency(&self) -> u64 {
        self.timestamp_frequency
    }

    /// Bytes currently allocated from device memory pools.
    pub fn allocated_memory_bytes(&self) -> u64 {
        self.allocator.allocated_bytes()
    }

    /// Number of live memory allocations.
    pub fn allocation_count(&self) -> usize {
        self.allocator.allocation_count()
    }

    /// Native objects waiting in the deletion queue.
    pub fn pending_deletions(&self) -> usize {
        self.deletion_queue.lock().len()
    }

    /// Number of upload contexts created so far.
    pub fn upload_context_count(&self) -> usize {
        self.copy_allocator.context_count()
    }

    /// Block until the GPU finished all submitted work, then destroy every
    /// queued object.
    ///
    /// Frame commits and every queue submission are held off while the device
    /// drains. Must not be called while a swap chain's state is locked.
    pub fn wait_idle(&self) -> Result<(), GraphicsError> {
        {
            let _commit = self.commit_lock.lock();
            let _submits: Vec<_> = self
                .distinct_submit_locks()
                .into_iter()
                .map(|lock| lock.lock())
                .collect();
            unsafe { self.dispatch.device().device_wait_idle() }.map_err(|e| {
                log::error!("vkDeviceWaitIdle failed: {:?}", e);
                GraphicsError::from(e)
            })?;
        }
        self.process_deletion_queue(true);
        Ok(())
    }

    /// Submission locks of every native queue, in queue-type order.
    ///
    /// Queue types that share a native queue share its lock, so it appears
    /// once.
    fn distinct_submit_locks(&self) -> Vec<&Arc<Mutex<()>>> {
        let mut locks: Vec<&Arc<Mutex<()>>> = Vec::with_capacity(QueueType::COUNT);
        for queue in self.queues.iter().flatten() {
            let lock = queue.submit_lock();
            if !locks.iter().any(|known| Arc::ptr_eq(known, lock)) {
                locks.push(lock);
            }
        }
        locks
    }

    /// Submit the frame's work on every queue and advance to the next frame.
    ///
    /// Once `max_frames_in_flight` frames are outstanding this blocks until
    /// the oldest one finished on the GPU.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::Timeout`] when the GPU does not finish the
    /// oldest frame in time. The device should be considered lost then.
    pub fn commit_frame(&self) -> Result<(), GraphicsError> {
        let _commit = self.commit_lock.lock();

        let frame_index = self.pacer.lock().frame_index();
        for queue in self.queues.iter().flatten() {
            queue.submit(&self.dispatch, &self.loaders.swapchain, frame_index)?;
        }

        let wait_slot = self.pacer.lock().advance();
        if let Some(slot) = wait_slot {
            let fences: Vec<vk::Fence> = self
                .queues
                .iter()
                .flatten()
                .map(|queue| queue.frame_fence(slot))
                .collect();
            self.wait_for_fences(&fences)?;
            unsafe { self.dispatch.device().reset_fences(&fences) }.map_err(|e| {
                GraphicsError::Internal(format!("Failed to reset frame fences: {:?}", e))
            })?;
        }

        self.process_deletion_queue(false);
        Ok(())
    }

    pub(crate) fn wait_for_fences(&self, fences: &[vk::Fence]) -> Result<(), GraphicsError> {
        match unsafe {
            self.dispatch
                .device()
                .wait_for_fences(fences, true, FENCE_TIMEOUT_NS)
        } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => {
                log::error!("Fence wait exceeded {} ns", FENCE_TIMEOUT_NS);
                Err(GraphicsError::Timeout(format!(
                    "GPU did not signal {} fence(s) within {} ms",
                    fences.len(),
                    FENCE_TIMEOUT_NS / 1_000_000
                )))
            }
            Err(e) => Err(GraphicsError::from(e)),
        }
    }

    fn process_deletion_queue(&self, force: bool) {
        let (frame_count, max_frames) = {
            let pacer = self.pacer.lock();
            (pacer.frame_count(), pacer.max_frames_in_flight() as u64)
        };
        let retired = self
            .deletion_queue
            .lock()
            .drain_retired(frame_count, max_frames, force);
        for resource in retired {
            // SAFETY: the frame that last used the object has retired, or
            // the device is idle.
            unsafe { resource.destroy(self.dispatch.device(), &self.allocator) };
        }
    }

    /// Begin recording a command buffer for a queue.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::FeatureNotSupported`] when the device has no
    /// queue of this type.
    pub fn begin_command_buffer(
        self: &Arc<Self>,
        queue: QueueType,
        label: Option<&str>,
    ) -> Result<CommandBuffer, GraphicsError> {
        CommandBuffer::begin(Arc::clone(self), queue, label)
    }

    /// End a command buffer and queue it for the next [`commit_frame`](Self::commit_frame).
    pub fn submit(&self, command_buffer: CommandBuffer) -> Result<(), GraphicsError> {
        let (queue, recorder) = command_buffer.finish()?;
        self.queue(queue)
            .ok_or_else(|| GraphicsError::Internal(format!("{:?} queue is missing", queue)))?
            .enqueue(recorder);
        Ok(())
    }

    /// Create a buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the size is zero or memory allocation fails.
    pub fn create_buffer(
        self: &Arc<Self>,
        descriptor: &BufferDescriptor,
    ) -> Result<Arc<Buffer>, GraphicsError> {
        Buffer::new(self, descriptor, None)
    }

    /// Create a buffer and upload `data` into it.
    pub fn create_buffer_with_data(
        self: &Arc<Self>,
        descriptor: &BufferDescriptor,
        data: &[u8],
    ) -> Result<Arc<Buffer>, GraphicsError> {
        Buffer::new(self, descriptor, Some(data))
    }

    /// Create a texture with its default view.
    pub fn create_texture(
        self: &Arc<Self>,
        descriptor: &TextureDescriptor,
    ) -> Result<Arc<Texture>, GraphicsError> {
        Texture::new(self, descriptor, &[])
    }

    /// Create a texture and upload initial data.
    ///
    /// `data` is indexed by subresource, `mip + layer * mip_level_count`.
    pub fn create_texture_with_data(
        self: &Arc<Self>,
        descriptor: &TextureDescriptor,
        data: &[TextureData<'_>],
    ) -> Result<Arc<Texture>, GraphicsError> {
        Texture::new(self, descriptor, data)
    }

    /// Create an additional view of a texture.
    pub fn create_texture_view(
        &self,
        texture: &Arc<Texture>,
        descriptor: &TextureViewDescriptor,
    ) -> Result<Arc<TextureView>, GraphicsError> {
        TextureView::new(texture, descriptor)
    }

    /// Get the interned sampler for a descriptor.
    pub fn create_sampler(self: &Arc<Self>, descriptor: &SamplerDescriptor) -> Arc<Sampler> {
        Sampler::new(self, descriptor)
    }

    pub fn create_bind_group_layout(
        self: &Arc<Self>,
        descriptor: &BindGroupLayoutDescriptor,
    ) -> Arc<BindGroupLayout> {
        BindGroupLayout::new(self, descriptor)
    }

    /// Create a bind group. Layout slots without an entry are bound to null
    /// resources.
    pub fn create_bind_group(
        self: &Arc<Self>,
        layout: &Arc<BindGroupLayout>,
        descriptor: &BindGroupDescriptor,
    ) -> Result<Arc<BindGroup>, GraphicsError> {
        BindGroup::new(self, layout, descriptor)
    }

    pub fn create_pipeline_layout(
        self: &Arc<Self>,
        descriptor: &PipelineLayoutDescriptor,
    ) -> Arc<PipelineLayout> {
        PipelineLayout::new(self, descriptor)
    }

    pub fn create_shader_module(
        self: &Arc<Self>,
        descriptor: &ShaderModuleDescriptor,
    ) -> Arc<ShaderModule> {
        ShaderModule::new(self, descriptor)
    }

    pub fn create_render_pipeline(
        self: &Arc<Self>,
        descriptor: &RenderPipelineDescriptor,
    ) -> Arc<RenderPipeline> {
        RenderPipeline::new(self, descriptor)
    }

    pub fn create_compute_pipeline(
        self: &Arc<Self>,
        descriptor: &ComputePipelineDescriptor,
    ) -> Arc<ComputePipeline> {
        ComputePipeline::new(self, descriptor)
    }

    pub fn create_query_heap(self: &Arc<Self>, descriptor: &QueryHeapDescriptor) -> Arc<QueryHeap> {
        QueryHeap::new(self, descriptor)
    }

    /// Create a swap chain presenting to `surface`.
    pub fn create_swapchain(
        self: &Arc<Self>,
        surface: Arc<Surface>,
        descriptor: &SwapChainDescriptor,
    ) -> Result<Arc<SwapChain>, GraphicsError> {
        SwapChain::new(self, surface, descriptor)
    }

    // ------------------------------------------------------------------
    // Crate internals
    // ------------------------------------------------------------------

    pub(crate) fn raw(&self) -> &ash::Device {
        self.dispatch.device()
    }

    pub(crate) fn dispatch(&self) -> &DeviceDispatch {
        &self.dispatch
    }

    pub(crate) fn debug_names(&self) -> &DebugNames {
        &self.debug_names
    }

    pub(crate) fn allocator(&self) -> &MemoryAllocator {
        &self.allocator
    }

    pub(crate) fn loaders(&self) -> &ExtensionLoaders {
        &self.loaders
    }

    pub(crate) fn features(&self) -> &AdapterFeatures {
        self.adapter.features()
    }

    pub(crate) fn queue(&self, queue: QueueType) -> Option<&Queue> {
        self.queues[queue.index()].as_ref()
    }

    /// Sharing mode and family indices for buffers and images.
    pub(crate) fn sharing(&self) -> (vk::SharingMode, &[u32]) {
        if self.sharing_families.len() > 1 {
            (vk::SharingMode::CONCURRENT, &self.sharing_families)
        } else {
            (vk::SharingMode::EXCLUSIVE, &[])
        }
    }

    pub(crate) fn pipeline_cache(&self) -> vk::PipelineCache {
        self.pipeline_cache
    }

    pub(crate) fn dynamic_states(&self) -> &[vk::DynamicState] {
        &self.dynamic_states
    }

    pub(crate) fn null_resources(&self) -> &NullResources {
        &self.null_resources
    }

    pub(crate) fn copy_allocator(&self) -> &CopyAllocator {
        &self.copy_allocator
    }

    pub(crate) fn native_format(&self, format: PixelFormat) -> vk::Format {
        convert_pixel_format(format, self.adapter.features().supports_d24s8)
    }

    /// Native sampler for a descriptor, created on first use.
    pub(crate) fn get_or_create_sampler(
        &self,
        descriptor: &SamplerDescriptor,
    ) -> Result<vk::Sampler, vk::Result> {
        let key = descriptor.cache_key();
        let mut cache = self.sampler_cache.lock();
        if let Some(&sampler) = cache.get(&key) {
            return Ok(sampler);
        }
        let sampler =
            create_native_sampler(self.raw(), self.features(), &self.limits, descriptor)?;
        cache.insert(key, sampler);
        Ok(sampler)
    }

    pub(crate) fn sampler_cache_len(&self) -> usize {
        self.sampler_cache.lock().len()
    }

    pub(crate) fn allocate_descriptor_set(
        &self,
        layout: vk::DescriptorSetLayout,
        variable_count: Option<u32>,
    ) -> Result<(vk::DescriptorPool, vk::DescriptorSet), GraphicsError> {
        self.descriptor_allocator
            .lock()
            .allocate(self.raw(), layout, variable_count)
    }

    /// Queue a native object for destruction once the current frame retired.
    pub(crate) fn defer_destroy(&self, resource: DeferredResource) {
        let frame = self.pacer.lock().frame_count();
        self.deletion_queue.lock().push(frame, resource);
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        let device = self.dispatch.device().clone();
        unsafe {
            if let Err(e) = device.device_wait_idle() {
                log::error!("vkDeviceWaitIdle failed during teardown: {:?}", e);
            }
        }
        self.process_deletion_queue(true);

        unsafe {
            self.copy_allocator.destroy(&device, &self.allocator);
            for queue in self.queues.iter_mut().flatten() {
                queue.destroy(&device);
            }
            self.null_resources.destroy(&device, &self.allocator);
            for (_, sampler) in self.sampler_cache.lock().drain() {
                device.destroy_sampler(sampler, None);
            }
            self.descriptor_allocator.lock().destroy(&device);
            device.destroy_pipeline_cache(self.pipeline_cache, None);
        }

        self.allocator.destroy();
        unsafe { device.destroy_device(None) };
        log::info!("Destroyed GraphicsDevice");
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("adapter", &self.adapter.name())
            .field("label", &self.label)
            .field("queues", &self.selection.families)
            .field("allocator", &self.allocator)
            .finish()
    }
}

// SAFETY: every Vulkan handle in the device is externally synchronized by
// the locks around its mutable users.
unsafe impl Send for GraphicsDevice {}
unsafe impl Sync for GraphicsDevice {}

fn create_queues(
    device: &ash::Device,
    selection: &QueueSelection,
    frames_in_flight: u32,
) -> Result<[Option<Queue>; QueueType::COUNT], GraphicsError> {
    let mut locks: Vec<((u32, u32), Arc<Mutex<()>>)> = Vec::new();
    let mut queues: [Option<Queue>; QueueType::COUNT] = Default::default();
    for ty in QueueType::ALL {
        if !selection.has_queue(ty) {
            continue;
        }
        let key = (selection.family(ty), selection.index(ty));
        let lock = match locks.iter().find(|(k, _)| *k == key) {
            Some((_, lock)) => Arc::clone(lock),
            None => {
                let lock = Arc::new(Mutex::new(()));
                locks.push((key, Arc::clone(&lock)));
                lock
            }
        };
        queues[ty.index()] = Some(Queue::new(
            device,
            ty,
            key.0,
            key.1,
            lock,
            frames_in_flight,
        )?);
    }
    Ok(queues)
}

/// Dynamic states set on every render pipeline.
pub(crate) fn dynamic_states(features: &AdapterFeatures) -> Vec<vk::DynamicState> {
    let mut states = vec![
        vk::DynamicState::VIEWPORT,
        vk::DynamicState::SCISSOR,
        vk::DynamicState::STENCIL_REFERENCE,
        vk::DynamicState::BLEND_CONSTANTS,
    ];
    if features.depth_bounds {
        states.push(vk::DynamicState::DEPTH_BOUNDS);
    }
    states
}

static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);

static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults_and_builders() {
        let desc = DeviceDescriptor::default();
        assert_eq!(desc.max_frames_in_flight, 2);
        assert!(desc.required_features.is_empty());
        assert!(desc.compatible_surface.is_none());

        let desc = DeviceDescriptor::new()
            .with_label("main")
            .with_max_frames_in_flight(3)
            .with_required_feature(Feature::TimestampQuery);
        assert_eq!(desc.label.as_deref(), Some("main"));
        assert_eq!(desc.max_frames_in_flight, 3);
        assert_eq!(desc.required_features, vec![Feature::TimestampQuery]);
    }

    #[test]
    fn test_dynamic_states_follow_features() {
        let features = AdapterFeatures::default();
        assert_eq!(dynamic_states(&features).len(), 4);

        let features = AdapterFeatures {
            depth_bounds: true,
            pipeline_fragment_shading_rate: true,
            ..Default::default()
        };
        let states = dynamic_states(&features);
        assert!(states.contains(&vk::DynamicState::DEPTH_BOUNDS));
        assert_eq!(states.len(), 5);
        assert!(!states.contains(&vk::DynamicState::FRAGMENT_SHADING_RATE_KHR));
    }
}
