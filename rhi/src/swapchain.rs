//! Swap chain acquire and present.
//!
//! A [`SwapChain`] owns the native swap chain of one [`Surface`] and a back
//! buffer [`Texture`] per image. Acquire semaphores rotate every frame; the
//! release semaphore is chosen by the image index the driver hands out.
//! Presentation happens when the graphics queue submits the frame, after a
//! command buffer recorded [`CommandBuffer::present`](crate::CommandBuffer::present).
//!
//! Out-of-date and suboptimal results are not errors. They mark the swap
//! chain for recreation, which happens before the next acquire.

use std::sync::Arc;

use ash::vk;
use parking_lot::{Mutex, MutexGuard};

use crate::backend::vulkan::conversion::pixel_format_from_vk;
use crate::backend::vulkan::deferred::DeferredResource;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::instance::Surface;
use crate::resources::Texture;
use crate::types::{PixelFormat, QueueType, TextureDescriptor, TextureLayout, TextureUsage};

/// How presented images are queued for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresentMode {
    /// Present immediately, tearing allowed.
    Immediate,
    /// Replace the queued image, no tearing.
    Mailbox,
    /// Wait for vertical blank. Always supported.
    #[default]
    Fifo,
    /// Like `Fifo`, but late images present immediately.
    FifoRelaxed,
}

fn native_present_mode(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapChainDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    /// Preferred back buffer format. Another supported format is used when
    /// the surface cannot present this one.
    pub format: PixelFormat,
    pub present_mode: PresentMode,
    /// Recorded for the caller. Vulkan surfaces present windowed.
    pub is_fullscreen: bool,
}

impl Default for SwapChainDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            format: PixelFormat::Bgra8Unorm,
            present_mode: PresentMode::Fifo,
            is_fullscreen: false,
        }
    }
}

impl SwapChainDescriptor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_present_mode(mut self, present_mode: PresentMode) -> Self {
        self.present_mode = present_mode;
        self
    }

    pub fn with_fullscreen(mut self, is_fullscreen: bool) -> Self {
        self.is_fullscreen = is_fullscreen;
        self
    }
}

// ============================================================================
// Negotiation
// ============================================================================

/// Pick the surface format: the requested format in sRGB non-linear color
/// space, then the requested format in any color space, then the first
/// format the surface reports.
pub(crate) fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    requested: vk::Format,
) -> Option<vk::SurfaceFormatKHR> {
    // A single UNDEFINED entry means any format is accepted.
    if let [only] = available {
        if only.format == vk::Format::UNDEFINED {
            return Some(vk::SurfaceFormatKHR {
                format: requested,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            });
        }
    }
    available
        .iter()
        .find(|f| f.format == requested && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| available.iter().find(|f| f.format == requested))
        .or_else(|| available.first())
        .copied()
}

/// The requested mode when supported, FIFO otherwise.
pub(crate) fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    requested: PresentMode,
) -> vk::PresentModeKHR {
    let mode = native_present_mode(requested);
    if available.contains(&mode) {
        mode
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub(crate) fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One image more than the minimum, within the surface's maximum. A zero
/// maximum means unbounded.
pub(crate) fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

pub(crate) fn choose_composite_alpha(
    supported: vk::CompositeAlphaFlagsKHR,
) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::INHERIT,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
    .into_iter()
    .find(|&flag| supported.contains(flag))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

// ============================================================================
// SwapChain
// ============================================================================

/// What the graphics queue needs to present the acquired image.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PresentTarget {
    pub acquire_semaphore: vk::Semaphore,
    pub release_semaphore: vk::Semaphore,
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
}

struct SwapChainState {
    width: u32,
    height: u32,
    handle: vk::SwapchainKHR,
    format: PixelFormat,
    present_mode: vk::PresentModeKHR,
    back_buffers: Vec<Arc<Texture>>,
    acquire_semaphores: Vec<vk::Semaphore>,
    release_semaphores: Vec<vk::Semaphore>,
    acquire_index: usize,
    /// The image acquired and not yet presented.
    acquired: Option<u32>,
    needs_recreate: bool,
}

impl SwapChainState {
    fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            handle: vk::SwapchainKHR::null(),
            format: PixelFormat::Undefined,
            present_mode: vk::PresentModeKHR::FIFO,
            back_buffers: Vec::new(),
            acquire_semaphores: Vec::new(),
            release_semaphores: Vec::new(),
            acquire_index: 0,
            acquired: None,
            needs_recreate: false,
        }
    }
}

/// A presentable chain of back buffers for one surface.
///
/// # Example
///
/// ```ignore
/// let swapchain = device.create_swapchain(surface, &SwapChainDescriptor::new(1280, 720))?;
/// loop {
///     let back_buffer = swapchain.get_current_texture()?;
///     let mut cmd = device.begin_command_buffer(QueueType::Graphics, None)?;
///     // render into back_buffer.default_view()...
///     cmd.present(&swapchain)?;
///     device.submit(cmd)?;
///     device.commit_frame()?;
/// }
/// ```
pub struct SwapChain {
    device: Arc<GraphicsDevice>,
    surface: Arc<Surface>,
    descriptor: SwapChainDescriptor,
    state: Mutex<SwapChainState>,
}

impl SwapChain {
    pub(crate) fn new(
        device: &Arc<GraphicsDevice>,
        surface: Arc<Surface>,
        descriptor: &SwapChainDescriptor,
    ) -> Result<Arc<Self>, GraphicsError> {
        let graphics = device
            .queue(QueueType::Graphics)
            .ok_or_else(|| GraphicsError::Internal("graphics queue is missing".to_string()))?;
        let loader = surface.instance().surface_loader().ok_or_else(|| {
            GraphicsError::FeatureNotSupported("surface extensions are not enabled".to_string())
        })?;
        let physical_device = device.adapter().physical_device();
        let supported = unsafe {
            loader.get_physical_device_surface_support(
                physical_device,
                graphics.family(),
                surface.handle(),
            )
        }?;
        if !supported {
            return Err(GraphicsError::FeatureNotSupported(
                "graphics queue cannot present to this surface".to_string(),
            ));
        }

        let swapchain = Arc::new(Self {
            device: Arc::clone(device),
            surface,
            descriptor: descriptor.clone(),
            state: Mutex::new(SwapChainState::empty(descriptor.width, descriptor.height)),
        });
        {
            let mut state = swapchain.state.lock();
            swapchain.recreate(&mut state)?;
            log::info!(
                "Created swap chain {:?}: {}x{} {:?} with {} images, {:?}",
                descriptor.label,
                state.width,
                state.height,
                state.format,
                state.back_buffers.len(),
                state.present_mode
            );
        }
        Ok(swapchain)
    }

    /// Build a new native swap chain for the current surface state and
    /// retire the old one.
    ///
    /// The state lock is released while the device drains, since frame
    /// commits lock it from inside queue submission.
    fn recreate(&self, state: &mut MutexGuard<'_, SwapChainState>) -> Result<(), GraphicsError> {
        let device = &self.device;
        if state.handle != vk::SwapchainKHR::null() {
            MutexGuard::unlocked(state, || device.wait_idle())?;
        }
        let loader = self.surface.instance().surface_loader().ok_or_else(|| {
            GraphicsError::FeatureNotSupported("surface extensions are not enabled".to_string())
        })?;
        let physical_device = device.adapter().physical_device();
        let surface = self.surface.handle();

        let (capabilities, formats, present_modes) = unsafe {
            (
                loader.get_physical_device_surface_capabilities(physical_device, surface)?,
                loader.get_physical_device_surface_formats(physical_device, surface)?,
                loader.get_physical_device_surface_present_modes(physical_device, surface)?,
            )
        };

        let extent = choose_extent(&capabilities, state.width, state.height);
        if extent.width == 0 || extent.height == 0 {
            // Minimized window; try again on the next acquire.
            state.needs_recreate = true;
            return Err(GraphicsError::SurfaceOutdated);
        }
        let requested_format = device.native_format(self.descriptor.format);
        let surface_format = choose_surface_format(&formats, requested_format).ok_or_else(|| {
            GraphicsError::ResourceCreationFailed("surface reports no formats".to_string())
        })?;
        let present_mode = choose_present_mode(&present_modes, self.descriptor.present_mode);
        if present_mode != native_present_mode(self.descriptor.present_mode) {
            log::warn!(
                "Present mode {:?} is not supported, using FIFO",
                self.descriptor.present_mode
            );
        }
        let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT
            | (capabilities.supported_usage_flags
                & (vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST));

        let old = state.handle;

        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(choose_image_count(&capabilities))
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(choose_composite_alpha(capabilities.supported_composite_alpha))
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);
        let swapchain_loader = &device.loaders().swapchain;
        let handle = unsafe { swapchain_loader.create_swapchain(&info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create swapchain: {:?}", e))
        })?;

        // Retire the old chain before anything below can fail.
        self.retire(state);
        state.handle = handle;
        state.format = pixel_format_from_vk(surface_format.format);
        state.present_mode = present_mode;
        state.needs_recreate = false;

        let images = unsafe { swapchain_loader.get_swapchain_images(handle) }?;
        let mut usage_flags = TextureUsage::RENDER_TARGET;
        if usage.contains(vk::ImageUsageFlags::TRANSFER_DST) {
            usage_flags |= TextureUsage::COPY_DST;
        }
        for (index, &image) in images.iter().enumerate() {
            let mut texture_descriptor =
                TextureDescriptor::texture_2d(state.format, extent.width, extent.height, usage_flags);
            if let Some(label) = &self.descriptor.label {
                texture_descriptor = texture_descriptor.with_label(format!("{} #{}", label, index));
            }
            let texture = Texture::from_swapchain_image(
                device,
                image,
                surface_format.format,
                texture_descriptor,
            )?;
            state.back_buffers.push(texture);
        }

        let semaphore_info = vk::SemaphoreCreateInfo::default();
        for _ in 0..images.len() {
            let acquire = unsafe { device.raw().create_semaphore(&semaphore_info, None) }?;
            state.acquire_semaphores.push(acquire);
            let release = unsafe { device.raw().create_semaphore(&semaphore_info, None) }?;
            state.release_semaphores.push(release);
        }
        state.acquire_index = 0;

        state.width = extent.width;
        state.height = extent.height;
        log::debug!(
            "Swap chain {:?} is {}x{} with {} images",
            self.descriptor.label,
            extent.width,
            extent.height,
            images.len()
        );
        Ok(())
    }

    /// Hand the current native objects to the deletion queue.
    fn retire(&self, state: &mut SwapChainState) {
        let device = &self.device;
        state.back_buffers.clear();
        state.acquired = None;
        for semaphore in state
            .acquire_semaphores
            .drain(..)
            .chain(state.release_semaphores.drain(..))
        {
            device.defer_destroy(DeferredResource::Semaphore(semaphore));
        }
        let handle = std::mem::replace(&mut state.handle, vk::SwapchainKHR::null());
        if handle != vk::SwapchainKHR::null() {
            device.defer_destroy(DeferredResource::Swapchain {
                loader: device.loaders().swapchain.clone(),
                swapchain: handle,
                surface: Arc::clone(&self.surface),
            });
        }
    }

    fn acquire(&self, state: &SwapChainState) -> Result<(u32, bool), vk::Result> {
        let semaphore = state.acquire_semaphores[state.acquire_index];
        unsafe {
            self.device.loaders().swapchain.acquire_next_image(
                state.handle,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    /// The back buffer to render into this frame.
    ///
    /// Acquires the next image unless one is already acquired and not yet
    /// presented, in which case that image is returned again. An out-of-date
    /// swap chain is recreated and acquisition retried once.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::SurfaceOutdated`] while the surface has a zero
    /// size, and the driver's error when acquisition fails after recreation.
    pub fn get_current_texture(&self) -> Result<Arc<Texture>, GraphicsError> {
        let mut state = self.state.lock();
        if let Some(index) = state.acquired {
            return Ok(Arc::clone(&state.back_buffers[index as usize]));
        }
        if state.needs_recreate || state.handle == vk::SwapchainKHR::null() {
            self.recreate(&mut state)?;
        }

        let mut retried = false;
        loop {
            match self.acquire(&state) {
                Ok((index, suboptimal)) => {
                    if suboptimal {
                        // The semaphore is signaled, so this image must still be used.
                        log::debug!("Swap chain {:?} is suboptimal", self.descriptor.label);
                        state.needs_recreate = true;
                    }
                    state.acquired = Some(index);
                    let texture = Arc::clone(&state.back_buffers[index as usize]);
                    texture.reset_layouts(TextureLayout::Undefined);
                    return Ok(texture);
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) if !retried => {
                    log::debug!("Swap chain {:?} is out of date", self.descriptor.label);
                    retried = true;
                    self.recreate(&mut state)?;
                }
                Err(e) => {
                    log::error!("Failed to acquire swap chain image: {:?}", e);
                    return Err(e.into());
                }
            }
        }
    }

    /// Resize the back buffers. Any acquired image is dropped.
    pub fn resize(&self, width: u32, height: u32) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        if state.width == width && state.height == height && !state.needs_recreate {
            return Ok(());
        }
        state.width = width;
        state.height = height;
        self.recreate(&mut state)
    }

    pub(crate) fn acquired_texture(&self) -> Option<Arc<Texture>> {
        let state = self.state.lock();
        state
            .acquired
            .map(|index| Arc::clone(&state.back_buffers[index as usize]))
    }

    pub(crate) fn present_target(&self) -> Option<PresentTarget> {
        let state = self.state.lock();
        let image_index = state.acquired?;
        Some(PresentTarget {
            acquire_semaphore: state.acquire_semaphores[state.acquire_index],
            release_semaphore: state.release_semaphores[image_index as usize],
            swapchain: state.handle,
            image_index,
        })
    }

    /// Record the outcome of presenting the acquired image.
    pub(crate) fn finish_present(&self, result: vk::Result) {
        let mut state = self.state.lock();
        state.acquired = None;
        if !state.acquire_semaphores.is_empty() {
            state.acquire_index = (state.acquire_index + 1) % state.acquire_semaphores.len();
        }
        match result {
            vk::Result::SUCCESS => {}
            vk::Result::SUBOPTIMAL_KHR | vk::Result::ERROR_OUT_OF_DATE_KHR => {
                log::debug!(
                    "Swap chain {:?} needs recreation after present: {:?}",
                    self.descriptor.label,
                    result
                );
                state.needs_recreate = true;
            }
            e => {
                log::error!("Failed to present swap chain {:?}: {:?}", self.descriptor.label, e);
                state.needs_recreate = true;
            }
        }
    }

    pub fn descriptor(&self) -> &SwapChainDescriptor {
        &self.descriptor
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    pub fn width(&self) -> u32 {
        self.state.lock().width
    }

    pub fn height(&self) -> u32 {
        self.state.lock().height
    }

    /// Format of the back buffers, which may differ from the requested one.
    pub fn format(&self) -> PixelFormat {
        self.state.lock().format
    }

    pub fn image_count(&self) -> usize {
        self.state.lock().back_buffers.len()
    }

    pub fn surface(&self) -> &Arc<Surface> {
        &self.surface
    }
}

impl Drop for SwapChain {
    fn drop(&mut self) {
        let mut state = std::mem::replace(self.state.get_mut(), SwapChainState::empty(0, 0));
        self.retire(&mut state);
    }
}

impl std::fmt::Debug for SwapChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapChain")
            .field("label", &self.descriptor.label)
            .field("present_mode", &self.descriptor.present_mode)
            .finish()
    }
}

static_assertions::assert_impl_all!(SwapChain: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 16,
                height: 16,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_format_prefers_srgb_nonlinear_match() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&available, vk::Format::B8G8R8A8_UNORM).unwrap();
        assert_eq!(chosen, available[2]);
    }

    #[test]
    fn test_format_falls_back_to_first() {
        let available = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&available, vk::Format::R16G16B16A16_SFLOAT).unwrap();
        assert_eq!(chosen, available[0]);
        assert!(choose_surface_format(&[], vk::Format::B8G8R8A8_UNORM).is_none());
    }

    #[test]
    fn test_undefined_surface_format_accepts_request() {
        let available = [format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        let chosen = choose_surface_format(&available, vk::Format::R8G8B8A8_UNORM).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[rstest]
    #[case::mailbox_supported(PresentMode::Mailbox, vk::PresentModeKHR::MAILBOX)]
    #[case::immediate_missing(PresentMode::Immediate, vk::PresentModeKHR::FIFO)]
    #[case::fifo(PresentMode::Fifo, vk::PresentModeKHR::FIFO)]
    fn test_present_mode_fallback(#[case] requested: PresentMode, #[case] expected: vk::PresentModeKHR) {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&available, requested), expected);
    }

    #[rstest]
    #[case::unbounded(2, 0, 3)]
    #[case::room_for_one_more(2, 8, 3)]
    #[case::clamped_to_max(3, 3, 3)]
    fn test_image_count(#[case] min: u32, #[case] max: u32, #[case] expected: u32) {
        assert_eq!(choose_image_count(&capabilities(min, max)), expected);
    }

    #[test]
    fn test_extent_uses_current_extent_when_fixed() {
        let mut caps = capabilities(2, 0);
        caps.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let extent = choose_extent(&caps, 1920, 1080);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_extent_clamps_request() {
        let extent = choose_extent(&capabilities(2, 0), 8, 10000);
        assert_eq!((extent.width, extent.height), (16, 4096));
    }

    #[test]
    fn test_composite_alpha_prefers_opaque() {
        assert_eq!(
            choose_composite_alpha(
                vk::CompositeAlphaFlagsKHR::INHERIT | vk::CompositeAlphaFlagsKHR::OPAQUE
            ),
            vk::CompositeAlphaFlagsKHR::OPAQUE
        );
        assert_eq!(
            choose_composite_alpha(vk::CompositeAlphaFlagsKHR::INHERIT),
            vk::CompositeAlphaFlagsKHR::INHERIT
        );
    }

    #[test]
    fn test_descriptor_builders() {
        let desc = SwapChainDescriptor::new(1280, 720)
            .with_label("main")
            .with_present_mode(PresentMode::Mailbox)
            .with_format(PixelFormat::Rgba8Unorm)
            .with_fullscreen(true);
        assert_eq!(desc.label.as_deref(), Some("main"));
        assert_eq!((desc.width, desc.height), (1280, 720));
        assert_eq!(desc.present_mode, PresentMode::Mailbox);
        assert!(desc.is_fullscreen);
    }
}
