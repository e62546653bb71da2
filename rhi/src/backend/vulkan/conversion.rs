//! Type conversions between RedLilium RHI types and Vulkan types.

use ash::vk;

use crate::types::{
    AdapterType, AddressMode, BlendFactor, BlendOperation, BorderColor, BufferUsage,
    ColorWriteMask, CompareFunction, CullMode, FillMode, FilterMode, FrontFace, IndexType,
    LoadAction, MipmapFilterMode, PixelFormat, PrimitiveTopology, QueryType,
    SamplerReductionType, ShaderStage, ShaderStages, StencilOperation, StoreAction,
    TextureAspect, TextureDimension, TextureSampleCount, TextureUsage, TextureViewDimension,
    VertexFormat, VertexStepMode,
};

/// Convert a pixel format to a Vulkan format.
///
/// `Depth24UnormStencil8` is promoted to `D32_SFLOAT_S8_UINT` on adapters
/// without D24S8 attachment support.
pub fn convert_pixel_format(format: PixelFormat, supports_d24s8: bool) -> vk::Format {
    use PixelFormat::*;
    match format {
        Undefined => vk::Format::UNDEFINED,

        R8Unorm => vk::Format::R8_UNORM,
        R8Snorm => vk::Format::R8_SNORM,
        R8Uint => vk::Format::R8_UINT,
        R8Sint => vk::Format::R8_SINT,

        R16Unorm => vk::Format::R16_UNORM,
        R16Snorm => vk::Format::R16_SNORM,
        R16Uint => vk::Format::R16_UINT,
        R16Sint => vk::Format::R16_SINT,
        R16Float => vk::Format::R16_SFLOAT,
        Rg8Unorm => vk::Format::R8G8_UNORM,
        Rg8Snorm => vk::Format::R8G8_SNORM,
        Rg8Uint => vk::Format::R8G8_UINT,
        Rg8Sint => vk::Format::R8G8_SINT,

        Bgra4Unorm => vk::Format::B4G4R4A4_UNORM_PACK16,
        B5G6R5Unorm => vk::Format::B5G6R5_UNORM_PACK16,
        Bgr5A1Unorm => vk::Format::B5G5R5A1_UNORM_PACK16,

        R32Uint => vk::Format::R32_UINT,
        R32Sint => vk::Format::R32_SINT,
        R32Float => vk::Format::R32_SFLOAT,
        Rg16Unorm => vk::Format::R16G16_UNORM,
        Rg16Snorm => vk::Format::R16G16_SNORM,
        Rg16Uint => vk::Format::R16G16_UINT,
        Rg16Sint => vk::Format::R16G16_SINT,
        Rg16Float => vk::Format::R16G16_SFLOAT,
        Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        Rgba8Snorm => vk::Format::R8G8B8A8_SNORM,
        Rgba8Uint => vk::Format::R8G8B8A8_UINT,
        Rgba8Sint => vk::Format::R8G8B8A8_SINT,
        Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,

        Rgb9e5Ufloat => vk::Format::E5B9G9R9_UFLOAT_PACK32,
        Rgb10a2Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
        Rgb10a2Uint => vk::Format::A2B10G10R10_UINT_PACK32,
        Rg11b10Float => vk::Format::B10G11R11_UFLOAT_PACK32,

        Rg32Uint => vk::Format::R32G32_UINT,
        Rg32Sint => vk::Format::R32G32_SINT,
        Rg32Float => vk::Format::R32G32_SFLOAT,
        Rgba16Unorm => vk::Format::R16G16B16A16_UNORM,
        Rgba16Snorm => vk::Format::R16G16B16A16_SNORM,
        Rgba16Uint => vk::Format::R16G16B16A16_UINT,
        Rgba16Sint => vk::Format::R16G16B16A16_SINT,
        Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,

        Rgba32Uint => vk::Format::R32G32B32A32_UINT,
        Rgba32Sint => vk::Format::R32G32B32A32_SINT,
        Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,

        Stencil8 => vk::Format::S8_UINT,
        Depth16Unorm => vk::Format::D16_UNORM,
        Depth24UnormStencil8 if supports_d24s8 => vk::Format::D24_UNORM_S8_UINT,
        Depth24UnormStencil8 => vk::Format::D32_SFLOAT_S8_UINT,
        Depth32Float => vk::Format::D32_SFLOAT,
        Depth32FloatStencil8 => vk::Format::D32_SFLOAT_S8_UINT,

        Bc1RgbaUnorm => vk::Format::BC1_RGBA_UNORM_BLOCK,
        Bc1RgbaUnormSrgb => vk::Format::BC1_RGBA_SRGB_BLOCK,
        Bc2RgbaUnorm => vk::Format::BC2_UNORM_BLOCK,
        Bc2RgbaUnormSrgb => vk::Format::BC2_SRGB_BLOCK,
        Bc3RgbaUnorm => vk::Format::BC3_UNORM_BLOCK,
        Bc3RgbaUnormSrgb => vk::Format::BC3_SRGB_BLOCK,
        Bc4RUnorm => vk::Format::BC4_UNORM_BLOCK,
        Bc4RSnorm => vk::Format::BC4_SNORM_BLOCK,
        Bc5RgUnorm => vk::Format::BC5_UNORM_BLOCK,
        Bc5RgSnorm => vk::Format::BC5_SNORM_BLOCK,
        Bc6hRgbUfloat => vk::Format::BC6H_UFLOAT_BLOCK,
        Bc6hRgbSfloat => vk::Format::BC6H_SFLOAT_BLOCK,
        Bc7RgbaUnorm => vk::Format::BC7_UNORM_BLOCK,
        Bc7RgbaUnormSrgb => vk::Format::BC7_SRGB_BLOCK,

        Etc2Rgb8Unorm => vk::Format::ETC2_R8G8B8_UNORM_BLOCK,
        Etc2Rgb8UnormSrgb => vk::Format::ETC2_R8G8B8_SRGB_BLOCK,
        Etc2Rgb8A1Unorm => vk::Format::ETC2_R8G8B8A1_UNORM_BLOCK,
        Etc2Rgb8A1UnormSrgb => vk::Format::ETC2_R8G8B8A1_SRGB_BLOCK,
        Etc2Rgba8Unorm => vk::Format::ETC2_R8G8B8A8_UNORM_BLOCK,
        Etc2Rgba8UnormSrgb => vk::Format::ETC2_R8G8B8A8_SRGB_BLOCK,
        EacR11Unorm => vk::Format::EAC_R11_UNORM_BLOCK,
        EacR11Snorm => vk::Format::EAC_R11_SNORM_BLOCK,
        EacRg11Unorm => vk::Format::EAC_R11G11_UNORM_BLOCK,
        EacRg11Snorm => vk::Format::EAC_R11G11_SNORM_BLOCK,

        Astc4x4Unorm => vk::Format::ASTC_4X4_UNORM_BLOCK,
        Astc4x4UnormSrgb => vk::Format::ASTC_4X4_SRGB_BLOCK,
        Astc5x4Unorm => vk::Format::ASTC_5X4_UNORM_BLOCK,
        Astc5x4UnormSrgb => vk::Format::ASTC_5X4_SRGB_BLOCK,
        Astc5x5Unorm => vk::Format::ASTC_5X5_UNORM_BLOCK,
        Astc5x5UnormSrgb => vk::Format::ASTC_5X5_SRGB_BLOCK,
        Astc6x5Unorm => vk::Format::ASTC_6X5_UNORM_BLOCK,
        Astc6x5UnormSrgb => vk::Format::ASTC_6X5_SRGB_BLOCK,
        Astc6x6Unorm => vk::Format::ASTC_6X6_UNORM_BLOCK,
        Astc6x6UnormSrgb => vk::Format::ASTC_6X6_SRGB_BLOCK,
        Astc8x5Unorm => vk::Format::ASTC_8X5_UNORM_BLOCK,
        Astc8x5UnormSrgb => vk::Format::ASTC_8X5_SRGB_BLOCK,
        Astc8x6Unorm => vk::Format::ASTC_8X6_UNORM_BLOCK,
        Astc8x6UnormSrgb => vk::Format::ASTC_8X6_SRGB_BLOCK,
        Astc8x8Unorm => vk::Format::ASTC_8X8_UNORM_BLOCK,
        Astc8x8UnormSrgb => vk::Format::ASTC_8X8_SRGB_BLOCK,
        Astc10x5Unorm => vk::Format::ASTC_10X5_UNORM_BLOCK,
        Astc10x5UnormSrgb => vk::Format::ASTC_10X5_SRGB_BLOCK,
        Astc10x6Unorm => vk::Format::ASTC_10X6_UNORM_BLOCK,
        Astc10x6UnormSrgb => vk::Format::ASTC_10X6_SRGB_BLOCK,
        Astc10x8Unorm => vk::Format::ASTC_10X8_UNORM_BLOCK,
        Astc10x8UnormSrgb => vk::Format::ASTC_10X8_SRGB_BLOCK,
        Astc10x10Unorm => vk::Format::ASTC_10X10_UNORM_BLOCK,
        Astc10x10UnormSrgb => vk::Format::ASTC_10X10_SRGB_BLOCK,
        Astc12x10Unorm => vk::Format::ASTC_12X10_UNORM_BLOCK,
        Astc12x10UnormSrgb => vk::Format::ASTC_12X10_SRGB_BLOCK,
        Astc12x12Unorm => vk::Format::ASTC_12X12_UNORM_BLOCK,
        Astc12x12UnormSrgb => vk::Format::ASTC_12X12_SRGB_BLOCK,
    }
}

/// Map a surface format reported by the presentation engine back to a pixel format.
pub fn pixel_format_from_vk(format: vk::Format) -> PixelFormat {
    match format {
        vk::Format::B8G8R8A8_UNORM => PixelFormat::Bgra8Unorm,
        vk::Format::B8G8R8A8_SRGB => PixelFormat::Bgra8UnormSrgb,
        vk::Format::R8G8B8A8_UNORM => PixelFormat::Rgba8Unorm,
        vk::Format::R8G8B8A8_SRGB => PixelFormat::Rgba8UnormSrgb,
        vk::Format::A2B10G10R10_UNORM_PACK32 => PixelFormat::Rgb10a2Unorm,
        vk::Format::R16G16B16A16_SFLOAT => PixelFormat::Rgba16Float,
        vk::Format::B5G6R5_UNORM_PACK16 => PixelFormat::B5G6R5Unorm,
        _ => PixelFormat::Undefined,
    }
}

/// Convert a vertex attribute format.
pub fn convert_vertex_format(format: VertexFormat) -> vk::Format {
    use VertexFormat::*;
    match format {
        Uint8 => vk::Format::R8_UINT,
        Uint8x2 => vk::Format::R8G8_UINT,
        Uint8x4 => vk::Format::R8G8B8A8_UINT,
        Sint8 => vk::Format::R8_SINT,
        Sint8x2 => vk::Format::R8G8_SINT,
        Sint8x4 => vk::Format::R8G8B8A8_SINT,
        Unorm8 => vk::Format::R8_UNORM,
        Unorm8x2 => vk::Format::R8G8_UNORM,
        Unorm8x4 => vk::Format::R8G8B8A8_UNORM,
        Snorm8 => vk::Format::R8_SNORM,
        Snorm8x2 => vk::Format::R8G8_SNORM,
        Snorm8x4 => vk::Format::R8G8B8A8_SNORM,
        Uint16 => vk::Format::R16_UINT,
        Uint16x2 => vk::Format::R16G16_UINT,
        Uint16x4 => vk::Format::R16G16B16A16_UINT,
        Sint16 => vk::Format::R16_SINT,
        Sint16x2 => vk::Format::R16G16_SINT,
        Sint16x4 => vk::Format::R16G16B16A16_SINT,
        Unorm16 => vk::Format::R16_UNORM,
        Unorm16x2 => vk::Format::R16G16_UNORM,
        Unorm16x4 => vk::Format::R16G16B16A16_UNORM,
        Snorm16 => vk::Format::R16_SNORM,
        Snorm16x2 => vk::Format::R16G16_SNORM,
        Snorm16x4 => vk::Format::R16G16B16A16_SNORM,
        Float16 => vk::Format::R16_SFLOAT,
        Float16x2 => vk::Format::R16G16_SFLOAT,
        Float16x4 => vk::Format::R16G16B16A16_SFLOAT,
        Float32 => vk::Format::R32_SFLOAT,
        Float32x2 => vk::Format::R32G32_SFLOAT,
        Float32x3 => vk::Format::R32G32B32_SFLOAT,
        Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
        Uint32 => vk::Format::R32_UINT,
        Uint32x2 => vk::Format::R32G32_UINT,
        Uint32x3 => vk::Format::R32G32B32_UINT,
        Uint32x4 => vk::Format::R32G32B32A32_UINT,
        Sint32 => vk::Format::R32_SINT,
        Sint32x2 => vk::Format::R32G32_SINT,
        Sint32x3 => vk::Format::R32G32B32_SINT,
        Sint32x4 => vk::Format::R32G32B32A32_SINT,
        Unorm10_10_10_2 => vk::Format::A2B10G10R10_UNORM_PACK32,
        Unorm8x4Bgra => vk::Format::B8G8R8A8_UNORM,
    }
}

/// Buffer usage bit to native usage flags.
const BUFFER_USAGE_TABLE: [(BufferUsage, vk::BufferUsageFlags); 8] = [
    (BufferUsage::VERTEX, vk::BufferUsageFlags::VERTEX_BUFFER),
    (BufferUsage::INDEX, vk::BufferUsageFlags::INDEX_BUFFER),
    (BufferUsage::CONSTANT, vk::BufferUsageFlags::UNIFORM_BUFFER),
    (
        BufferUsage::SHADER_READ,
        vk::BufferUsageFlags::from_raw(
            vk::BufferUsageFlags::STORAGE_BUFFER.as_raw()
                | vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER.as_raw(),
        ),
    ),
    (
        BufferUsage::SHADER_WRITE,
        vk::BufferUsageFlags::from_raw(
            vk::BufferUsageFlags::STORAGE_BUFFER.as_raw()
                | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER.as_raw(),
        ),
    ),
    (BufferUsage::INDIRECT, vk::BufferUsageFlags::INDIRECT_BUFFER),
    (
        BufferUsage::PREDICATION,
        vk::BufferUsageFlags::CONDITIONAL_RENDERING_EXT,
    ),
    (
        BufferUsage::RAY_TRACING,
        vk::BufferUsageFlags::from_raw(
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR.as_raw()
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR.as_raw()
                | vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR.as_raw(),
        ),
    ),
];

/// Convert buffer usage flags. Every buffer can be a copy source and destination.
///
/// `device_address` adds `SHADER_DEVICE_ADDRESS` for usages that can be
/// addressed from shaders.
pub fn convert_buffer_usage(usage: BufferUsage, device_address: bool) -> vk::BufferUsageFlags {
    let mut flags = BUFFER_USAGE_TABLE
        .iter()
        .filter(|(bit, _)| usage.contains(*bit))
        .fold(
            vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
            |acc, (_, native)| acc | *native,
        );

    let addressable = BufferUsage::VERTEX
        | BufferUsage::INDEX
        | BufferUsage::SHADER_READ
        | BufferUsage::SHADER_WRITE
        | BufferUsage::RAY_TRACING;
    if device_address && usage.intersects(addressable) {
        flags |= vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
    }
    flags
}

/// Convert texture usage flags for an image of `format`.
pub fn convert_texture_usage(usage: TextureUsage, format: PixelFormat) -> vk::ImageUsageFlags {
    let mut flags = if usage.contains(TextureUsage::TRANSIENT) {
        vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
    } else {
        vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST
    };

    if usage.contains(TextureUsage::SHADER_READ) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::SHADER_WRITE) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(TextureUsage::RENDER_TARGET) {
        if format.is_depth_stencil() {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        } else {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if !usage.contains(TextureUsage::TRANSIENT) {
            flags |= vk::ImageUsageFlags::INPUT_ATTACHMENT;
        }
    }
    if usage.contains(TextureUsage::SHADING_RATE) {
        flags |= vk::ImageUsageFlags::FRAGMENT_SHADING_RATE_ATTACHMENT_KHR;
    }
    flags
}

pub fn convert_image_type(dimension: TextureDimension) -> vk::ImageType {
    match dimension {
        TextureDimension::Texture1D => vk::ImageType::TYPE_1D,
        TextureDimension::Texture2D => vk::ImageType::TYPE_2D,
        TextureDimension::Texture3D => vk::ImageType::TYPE_3D,
    }
}

pub fn convert_view_type(dimension: TextureViewDimension) -> vk::ImageViewType {
    match dimension {
        TextureViewDimension::View1D => vk::ImageViewType::TYPE_1D,
        TextureViewDimension::View1DArray => vk::ImageViewType::TYPE_1D_ARRAY,
        TextureViewDimension::View2D => vk::ImageViewType::TYPE_2D,
        TextureViewDimension::View2DArray => vk::ImageViewType::TYPE_2D_ARRAY,
        TextureViewDimension::ViewCube => vk::ImageViewType::CUBE,
        TextureViewDimension::ViewCubeArray => vk::ImageViewType::CUBE_ARRAY,
        TextureViewDimension::View3D => vk::ImageViewType::TYPE_3D,
    }
}

pub fn convert_sample_count(count: TextureSampleCount) -> vk::SampleCountFlags {
    match count {
        TextureSampleCount::Count1 => vk::SampleCountFlags::TYPE_1,
        TextureSampleCount::Count2 => vk::SampleCountFlags::TYPE_2,
        TextureSampleCount::Count4 => vk::SampleCountFlags::TYPE_4,
        TextureSampleCount::Count8 => vk::SampleCountFlags::TYPE_8,
        TextureSampleCount::Count16 => vk::SampleCountFlags::TYPE_16,
        TextureSampleCount::Count32 => vk::SampleCountFlags::TYPE_32,
    }
}

/// Image aspects covered by `aspect` for an image of `format`.
pub fn convert_image_aspect(format: PixelFormat, aspect: TextureAspect) -> vk::ImageAspectFlags {
    match aspect {
        TextureAspect::DepthOnly => vk::ImageAspectFlags::DEPTH,
        TextureAspect::StencilOnly => vk::ImageAspectFlags::STENCIL,
        TextureAspect::All => {
            let mut flags = vk::ImageAspectFlags::empty();
            if format.has_depth() {
                flags |= vk::ImageAspectFlags::DEPTH;
            }
            if format.has_stencil() {
                flags |= vk::ImageAspectFlags::STENCIL;
            }
            if flags.is_empty() {
                vk::ImageAspectFlags::COLOR
            } else {
                flags
            }
        }
    }
}

pub fn convert_filter_mode(mode: FilterMode) -> vk::Filter {
    match mode {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

pub fn convert_mipmap_filter_mode(mode: MipmapFilterMode) -> vk::SamplerMipmapMode {
    match mode {
        MipmapFilterMode::Nearest => vk::SamplerMipmapMode::NEAREST,
        MipmapFilterMode::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

/// Convert an address mode. Without `mirror_clamp_to_edge` support the
/// mirror-once mode degrades to mirrored repeat.
pub fn convert_address_mode(mode: AddressMode, mirror_clamp_to_edge: bool) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirrorRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        AddressMode::MirrorClampToEdge if mirror_clamp_to_edge => {
            vk::SamplerAddressMode::MIRROR_CLAMP_TO_EDGE
        }
        AddressMode::MirrorClampToEdge => vk::SamplerAddressMode::MIRRORED_REPEAT,
    }
}

pub fn convert_border_color(color: BorderColor) -> vk::BorderColor {
    match color {
        BorderColor::FloatTransparentBlack => vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        BorderColor::FloatOpaqueBlack => vk::BorderColor::FLOAT_OPAQUE_BLACK,
        BorderColor::FloatOpaqueWhite => vk::BorderColor::FLOAT_OPAQUE_WHITE,
        BorderColor::UintTransparentBlack => vk::BorderColor::INT_TRANSPARENT_BLACK,
        BorderColor::UintOpaqueBlack => vk::BorderColor::INT_OPAQUE_BLACK,
        BorderColor::UintOpaqueWhite => vk::BorderColor::INT_OPAQUE_WHITE,
    }
}

/// Native reduction mode for min/max samplers, `None` for the default average.
pub fn convert_reduction_type(ty: SamplerReductionType) -> Option<vk::SamplerReductionMode> {
    match ty {
        SamplerReductionType::Minimum => Some(vk::SamplerReductionMode::MIN),
        SamplerReductionType::Maximum => Some(vk::SamplerReductionMode::MAX),
        SamplerReductionType::Standard | SamplerReductionType::Comparison => None,
    }
}

pub fn convert_compare_function(func: CompareFunction) -> vk::CompareOp {
    match func {
        CompareFunction::Never => vk::CompareOp::NEVER,
        CompareFunction::Less => vk::CompareOp::LESS,
        CompareFunction::Equal => vk::CompareOp::EQUAL,
        CompareFunction::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareFunction::Greater => vk::CompareOp::GREATER,
        CompareFunction::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareFunction::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareFunction::Always => vk::CompareOp::ALWAYS,
    }
}

pub fn convert_stencil_operation(op: StencilOperation) -> vk::StencilOp {
    match op {
        StencilOperation::Keep => vk::StencilOp::KEEP,
        StencilOperation::Zero => vk::StencilOp::ZERO,
        StencilOperation::Replace => vk::StencilOp::REPLACE,
        StencilOperation::IncrementClamp => vk::StencilOp::INCREMENT_AND_CLAMP,
        StencilOperation::DecrementClamp => vk::StencilOp::DECREMENT_AND_CLAMP,
        StencilOperation::Invert => vk::StencilOp::INVERT,
        StencilOperation::IncrementWrap => vk::StencilOp::INCREMENT_AND_WRAP,
        StencilOperation::DecrementWrap => vk::StencilOp::DECREMENT_AND_WRAP,
    }
}

pub fn convert_blend_factor(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SourceColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::OneMinusSourceColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::SourceAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSourceAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DestinationColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::OneMinusDestinationColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFactor::DestinationAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusDestinationAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        BlendFactor::SourceAlphaSaturate => vk::BlendFactor::SRC_ALPHA_SATURATE,
        BlendFactor::BlendColor => vk::BlendFactor::CONSTANT_COLOR,
        BlendFactor::OneMinusBlendColor => vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
        BlendFactor::Source1Color => vk::BlendFactor::SRC1_COLOR,
        BlendFactor::OneMinusSource1Color => vk::BlendFactor::ONE_MINUS_SRC1_COLOR,
        BlendFactor::Source1Alpha => vk::BlendFactor::SRC1_ALPHA,
        BlendFactor::OneMinusSource1Alpha => vk::BlendFactor::ONE_MINUS_SRC1_ALPHA,
    }
}

pub fn convert_blend_operation(op: BlendOperation) -> vk::BlendOp {
    match op {
        BlendOperation::Add => vk::BlendOp::ADD,
        BlendOperation::Subtract => vk::BlendOp::SUBTRACT,
        BlendOperation::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOperation::Min => vk::BlendOp::MIN,
        BlendOperation::Max => vk::BlendOp::MAX,
    }
}

pub fn convert_color_write_mask(mask: ColorWriteMask) -> vk::ColorComponentFlags {
    let mut flags = vk::ColorComponentFlags::empty();
    if mask.contains(ColorWriteMask::RED) {
        flags |= vk::ColorComponentFlags::R;
    }
    if mask.contains(ColorWriteMask::GREEN) {
        flags |= vk::ColorComponentFlags::G;
    }
    if mask.contains(ColorWriteMask::BLUE) {
        flags |= vk::ColorComponentFlags::B;
    }
    if mask.contains(ColorWriteMask::ALPHA) {
        flags |= vk::ColorComponentFlags::A;
    }
    flags
}

pub fn convert_primitive_topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveTopology::PatchList => vk::PrimitiveTopology::PATCH_LIST,
    }
}

/// Convert a fill mode. Wireframe needs `fillModeNonSolid` and falls back to solid.
pub fn convert_fill_mode(mode: FillMode, fill_mode_non_solid: bool) -> vk::PolygonMode {
    match mode {
        FillMode::Wireframe if fill_mode_non_solid => vk::PolygonMode::LINE,
        FillMode::Wireframe | FillMode::Solid => vk::PolygonMode::FILL,
    }
}

pub fn convert_cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub fn convert_front_face(face: FrontFace) -> vk::FrontFace {
    match face {
        FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
    }
}

pub fn convert_step_mode(mode: VertexStepMode) -> vk::VertexInputRate {
    match mode {
        VertexStepMode::Vertex => vk::VertexInputRate::VERTEX,
        VertexStepMode::Instance => vk::VertexInputRate::INSTANCE,
    }
}

pub fn convert_index_type(ty: IndexType) -> vk::IndexType {
    match ty {
        IndexType::Uint16 => vk::IndexType::UINT16,
        IndexType::Uint32 => vk::IndexType::UINT32,
    }
}

pub fn convert_load_action(action: LoadAction) -> vk::AttachmentLoadOp {
    match action {
        LoadAction::Load => vk::AttachmentLoadOp::LOAD,
        LoadAction::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadAction::Discard => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub fn convert_store_action(action: StoreAction) -> vk::AttachmentStoreOp {
    match action {
        StoreAction::Store => vk::AttachmentStoreOp::STORE,
        StoreAction::Discard => vk::AttachmentStoreOp::DONT_CARE,
    }
}

pub fn convert_shader_stage(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        ShaderStage::Amplification => vk::ShaderStageFlags::TASK_EXT,
        ShaderStage::Mesh => vk::ShaderStageFlags::MESH_EXT,
    }
}

/// Convert a stage visibility mask. `ALL` maps to `ShaderStageFlags::ALL`.
pub fn convert_shader_stages(stages: ShaderStages) -> vk::ShaderStageFlags {
    if stages == ShaderStages::ALL {
        return vk::ShaderStageFlags::ALL;
    }
    let mut flags = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    if stages.contains(ShaderStages::AMPLIFICATION) {
        flags |= vk::ShaderStageFlags::TASK_EXT;
    }
    if stages.contains(ShaderStages::MESH) {
        flags |= vk::ShaderStageFlags::MESH_EXT;
    }
    flags
}

pub fn convert_query_type(ty: QueryType) -> vk::QueryType {
    match ty {
        QueryType::Occlusion | QueryType::BinaryOcclusion => vk::QueryType::OCCLUSION,
        QueryType::Timestamp => vk::QueryType::TIMESTAMP,
        QueryType::PipelineStatistics => vk::QueryType::PIPELINE_STATISTICS,
    }
}

pub fn convert_adapter_type(ty: vk::PhysicalDeviceType) -> AdapterType {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => AdapterType::DiscreteGpu,
        vk::PhysicalDeviceType::INTEGRATED_GPU => AdapterType::IntegratedGpu,
        vk::PhysicalDeviceType::VIRTUAL_GPU => AdapterType::VirtualGpu,
        vk::PhysicalDeviceType::CPU => AdapterType::Cpu,
        _ => AdapterType::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::packed_10_10_10_2(PixelFormat::Rgb10a2Unorm, vk::Format::A2B10G10R10_UNORM_PACK32)]
    #[case::packed_11_11_10(PixelFormat::Rg11b10Float, vk::Format::B10G11R11_UFLOAT_PACK32)]
    #[case::shared_exponent(PixelFormat::Rgb9e5Ufloat, vk::Format::E5B9G9R9_UFLOAT_PACK32)]
    #[case::stencil(PixelFormat::Stencil8, vk::Format::S8_UINT)]
    #[case::srgb(PixelFormat::Bgra8UnormSrgb, vk::Format::B8G8R8A8_SRGB)]
    #[case::astc(PixelFormat::Astc10x8UnormSrgb, vk::Format::ASTC_10X8_SRGB_BLOCK)]
    fn test_pixel_format(#[case] format: PixelFormat, #[case] expected: vk::Format) {
        assert_eq!(convert_pixel_format(format, true), expected);
    }

    #[test]
    fn test_d24s8_fallback() {
        assert_eq!(
            convert_pixel_format(PixelFormat::Depth24UnormStencil8, true),
            vk::Format::D24_UNORM_S8_UINT
        );
        assert_eq!(
            convert_pixel_format(PixelFormat::Depth24UnormStencil8, false),
            vk::Format::D32_SFLOAT_S8_UINT
        );
    }

    #[test]
    fn test_surface_format_round_trip() {
        for format in [PixelFormat::Bgra8Unorm, PixelFormat::Rgba8UnormSrgb, PixelFormat::Rgba16Float] {
            assert_eq!(pixel_format_from_vk(convert_pixel_format(format, true)), format);
        }
        assert_eq!(pixel_format_from_vk(vk::Format::R4G4_UNORM_PACK8), PixelFormat::Undefined);
    }

    #[test]
    fn test_buffer_usage_table_fold() {
        let flags = convert_buffer_usage(BufferUsage::VERTEX | BufferUsage::SHADER_WRITE, false);
        assert!(flags.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(flags.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
        assert!(flags.contains(vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER));
        assert!(flags.contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert!(!flags.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS));

        let addressable = convert_buffer_usage(BufferUsage::SHADER_READ, true);
        assert!(addressable.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS));
        let constant = convert_buffer_usage(BufferUsage::CONSTANT, true);
        assert!(!constant.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS));
    }

    #[test]
    fn test_texture_usage() {
        let depth = convert_texture_usage(TextureUsage::RENDER_TARGET, PixelFormat::Depth32Float);
        assert!(depth.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
        assert!(depth.contains(vk::ImageUsageFlags::TRANSFER_DST));

        let transient = convert_texture_usage(
            TextureUsage::RENDER_TARGET | TextureUsage::TRANSIENT,
            PixelFormat::Rgba8Unorm,
        );
        assert!(transient.contains(vk::ImageUsageFlags::TRANSIENT_ATTACHMENT));
        assert!(transient.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert!(!transient.contains(vk::ImageUsageFlags::TRANSFER_SRC));
    }

    #[rstest]
    #[case(PixelFormat::Rgba8Unorm, vk::ImageAspectFlags::COLOR)]
    #[case(PixelFormat::Depth32Float, vk::ImageAspectFlags::DEPTH)]
    #[case(PixelFormat::Stencil8, vk::ImageAspectFlags::STENCIL)]
    #[case(
        PixelFormat::Depth24UnormStencil8,
        vk::ImageAspectFlags::from_raw(
            vk::ImageAspectFlags::DEPTH.as_raw() | vk::ImageAspectFlags::STENCIL.as_raw()
        )
    )]
    fn test_image_aspect(#[case] format: PixelFormat, #[case] expected: vk::ImageAspectFlags) {
        assert_eq!(convert_image_aspect(format, TextureAspect::All), expected);
    }

    #[test]
    fn test_feature_dependent_fallbacks() {
        assert_eq!(
            convert_address_mode(AddressMode::MirrorClampToEdge, false),
            vk::SamplerAddressMode::MIRRORED_REPEAT
        );
        assert_eq!(
            convert_address_mode(AddressMode::MirrorClampToEdge, true),
            vk::SamplerAddressMode::MIRROR_CLAMP_TO_EDGE
        );
        assert_eq!(convert_fill_mode(FillMode::Wireframe, false), vk::PolygonMode::FILL);
        assert_eq!(convert_fill_mode(FillMode::Wireframe, true), vk::PolygonMode::LINE);
    }

    #[test]
    fn test_shader_stages() {
        assert_eq!(convert_shader_stages(ShaderStages::ALL), vk::ShaderStageFlags::ALL);
        assert_eq!(
            convert_shader_stages(ShaderStages::AMPLIFICATION | ShaderStages::MESH),
            vk::ShaderStageFlags::TASK_EXT | vk::ShaderStageFlags::MESH_EXT
        );
        assert_eq!(convert_shader_stage(ShaderStage::Mesh), vk::ShaderStageFlags::MESH_EXT);
    }

    #[test]
    fn test_binary_occlusion_uses_occlusion_pool() {
        assert_eq!(convert_query_type(QueryType::BinaryOcclusion), vk::QueryType::OCCLUSION);
    }
}
