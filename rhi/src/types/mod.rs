//! Common types and descriptors for GPU resources.
//!
//! This module contains format enums, usage flags, fixed-function state and
//! descriptor structs used throughout the RHI. Nothing in here touches Vulkan.

mod binding;
mod buffer;
mod common;
mod features;
mod pipeline;
mod query;
mod sampler;
mod texture;

pub use binding::{
    BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingType, BufferBindingType,
    PushConstantRange, SamplerBindingType, ShaderStages, StorageTextureAccess, TextureSampleType,
};
pub use buffer::{BufferDescriptor, BufferStates, BufferUsage, MemoryType};
pub use common::{
    AdapterType, Color, DispatchIndirectArgs, DrawIndexedIndirectArgs, DrawIndirectArgs,
    Extent3d, IndexType, LoadAction, MAX_BIND_GROUPS, MAX_COLOR_ATTACHMENTS,
    MAX_VERTEX_BUFFER_BINDINGS, MAX_VIEWPORTS_AND_SCISSORS, PowerPreference, QueueType,
    ScissorRect, StoreAction, ValidationMode, Viewport, WHOLE_SIZE,
};
pub use features::{
    Feature, GraphicsLimits, PixelFormatSupport, TEXEL_BLOCK_STRIDE_LCM, least_common_multiple,
};
pub use pipeline::{
    BlendFactor, BlendOperation, BlendState, ColorWriteMask, CullMode, DepthClipMode,
    DepthStencilState, FillMode, FrontFace, PrimitiveTopology, RasterizerState,
    RenderTargetBlendState, ShaderStage, StencilFaceState, StencilOperation, VertexAttribute,
    VertexBufferLayout, VertexFormat, VertexStepMode,
};
pub use query::{
    PIPELINE_STATISTICS_COUNT, PIPELINE_STATISTICS_MESH_COUNT, QueryHeapDescriptor, QueryType,
    query_result_size,
};
pub use sampler::{
    AddressMode, BorderColor, CompareFunction, FilterMode, MipmapFilterMode, SamplerDescriptor,
    SamplerKey, SamplerReductionType,
};
pub use texture::{
    PixelFormat, PixelFormatInfo, TextureAspect, TextureData, TextureDescriptor, TextureDimension,
    TextureLayout, TextureSampleCount, TextureUsage, TextureViewDescriptor, TextureViewDimension,
};
