//! GPU resources created by a [`GraphicsDevice`](crate::GraphicsDevice).
//!
//! Every resource keeps its device alive through an `Arc`. Dropping a
//! resource never destroys the native object immediately; it is handed to
//! the device's deletion queue and destroyed once every frame that could
//! still reference it has retired.

mod bind_group;
mod bind_group_layout;
mod buffer;
mod pipeline;
mod pipeline_layout;
mod query_heap;
mod sampler;
mod shader_module;
mod texture;

pub use bind_group::{BindGroup, BindGroupDescriptor, BindGroupEntry, BindingResource};
pub use bind_group_layout::BindGroupLayout;
pub use buffer::Buffer;
pub use pipeline::{
    ComputePipeline, ComputePipelineDescriptor, RenderPipeline, RenderPipelineDescriptor,
};
pub use pipeline_layout::{PipelineLayout, PipelineLayoutDescriptor};
pub use query_heap::QueryHeap;
pub use sampler::Sampler;
pub use shader_module::{SPIRV_MAGIC, ShaderModule, ShaderModuleDescriptor, spirv_words};
pub use texture::{Texture, TextureView, mip_extent, subresource_index};

pub(crate) use bind_group_layout::{LayoutSlot, build_slots};
pub(crate) use sampler::create_native_sampler;
