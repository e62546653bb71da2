//! # RedLilium RHI
//!
//! Explicit GPU abstraction over Vulkan 1.2+ for the RedLilium engine.
//!
//! ## Overview
//!
//! - [`GraphicsInstance`] - Loader, validation layers and presentation surfaces
//! - [`GraphicsAdapter`] - A physical GPU with its features, limits and formats
//! - [`GraphicsDevice`] - Resource creation, queues, frame pacing and deferred destruction
//! - [`CommandBuffer`] - Barrier tracking, copies, queries, render and compute passes
//! - [`SwapChain`] - Acquire and present of window back buffers
//!
//! Resources are reference counted and destroyed only after the GPU stopped
//! using them. Resource states are tracked per buffer and per texture
//! subresource, and transitions are batched into as few pipeline barriers as
//! possible.
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_rhi::*;
//!
//! let instance = GraphicsInstance::new(InstanceDescriptor::default())?;
//! let adapter = instance.request_adapter()?;
//! let device = adapter.create_device(&DeviceDescriptor::new().with_label("main"))?;
//!
//! let buffer = device.create_buffer(&BufferDescriptor::new(1024, BufferUsage::SHADER_WRITE))?;
//! let mut cmd = device.begin_command_buffer(QueueType::Graphics, Some("clear"))?;
//! cmd.fill_buffer(&buffer, 0, 1024, 0)?;
//! device.submit(cmd)?;
//! device.commit_frame()?;
//! ```

mod adapter;
mod command;
mod copy_allocator;
mod device;
mod error;
mod instance;
mod null_resources;
mod queue;
mod swapchain;

#[doc(hidden)]
pub mod backend;
pub mod resources;
pub mod types;

pub use adapter::GraphicsAdapter;
pub use command::{
    ColorAttachment, CommandBuffer, ComputePass, DepthStencilAttachment, RenderPass,
    RenderPassDescriptor, TextureCopyRegion,
};
pub use device::{DeviceDescriptor, GraphicsDevice};
pub use error::GraphicsError;
pub use instance::{GraphicsInstance, InstanceDescriptor, Surface};
pub use resources::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindingResource, Buffer,
    ComputePipeline, ComputePipelineDescriptor, PipelineLayout, PipelineLayoutDescriptor,
    QueryHeap, RenderPipeline, RenderPipelineDescriptor, Sampler, ShaderModule,
    ShaderModuleDescriptor, Texture, TextureView,
};
pub use swapchain::{PresentMode, SwapChain, SwapChainDescriptor};
pub use types::*;

/// RHI library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
