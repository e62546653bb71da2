//! Optional features, format capabilities and device limits.

use bitflags::bitflags;

/// Optional capability that can be queried on an adapter or required at
/// device creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Depth32FloatStencil8,
    TimestampQuery,
    PipelineStatisticsQuery,
    TextureCompressionBC,
    TextureCompressionETC2,
    TextureCompressionASTC,
    TextureCompressionASTCHDR,
    IndirectFirstInstance,
    ShaderFloat16,
    RG11B10UfloatRenderable,
    BGRA8UnormStorage,
    TextureComponentSwizzle,
    DepthBoundsTest,
    SamplerClampToBorder,
    SamplerMirrorClampToEdge,
    SamplerMinMax,
    Predication,
    DescriptorIndexing,
    VariableRateShading,
    VariableRateShadingTier2,
    RayTracing,
    RayTracingTier2,
    MeshShader,
}

impl Feature {
    /// Every queryable feature.
    pub const ALL: [Feature; 23] = [
        Feature::Depth32FloatStencil8,
        Feature::TimestampQuery,
        Feature::PipelineStatisticsQuery,
        Feature::TextureCompressionBC,
        Feature::TextureCompressionETC2,
        Feature::TextureCompressionASTC,
        Feature::TextureCompressionASTCHDR,
        Feature::IndirectFirstInstance,
        Feature::ShaderFloat16,
        Feature::RG11B10UfloatRenderable,
        Feature::BGRA8UnormStorage,
        Feature::TextureComponentSwizzle,
        Feature::DepthBoundsTest,
        Feature::SamplerClampToBorder,
        Feature::SamplerMirrorClampToEdge,
        Feature::SamplerMinMax,
        Feature::Predication,
        Feature::DescriptorIndexing,
        Feature::VariableRateShading,
        Feature::VariableRateShadingTier2,
        Feature::RayTracing,
        Feature::RayTracingTier2,
        Feature::MeshShader,
    ];
}

bitflags! {
    /// What a pixel format can be used for on a given adapter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PixelFormatSupport: u32 {
        const TEXTURE = 1 << 0;
        const DEPTH_STENCIL = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const BLENDABLE = 1 << 3;
        const SHADER_LOAD = 1 << 4;
        const SHADER_SAMPLE = 1 << 5;
        const SHADER_UAV_LOAD = 1 << 6;
        const SHADER_UAV_STORE = 1 << 7;
        const SHADER_ATOMIC = 1 << 8;
    }
}

/// Device limits exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GraphicsLimits {
    pub max_texture_dimension_1d: u32,
    pub max_texture_dimension_2d: u32,
    pub max_texture_dimension_3d: u32,
    pub max_texture_dimension_cube: u32,
    pub max_texture_array_layers: u32,
    pub max_bind_groups: u32,
    pub min_constant_buffer_offset_alignment: u64,
    pub max_constant_buffer_binding_size: u32,
    pub min_storage_buffer_offset_alignment: u64,
    pub max_storage_buffer_binding_size: u32,
    pub texture_row_pitch_alignment: u64,
    pub texture_depth_pitch_alignment: u64,
    pub max_buffer_size: u64,
    pub max_push_constants_size: u32,
    pub max_color_attachments: u32,
    pub max_viewports: u32,
    pub max_vertex_buffers: u32,
    pub max_vertex_attributes: u32,
    pub max_vertex_buffer_array_stride: u32,
    pub max_compute_workgroup_storage_size: u32,
    pub max_compute_invocations_per_workgroup: u32,
    pub max_compute_workgroup_size_x: u32,
    pub max_compute_workgroup_size_y: u32,
    pub max_compute_workgroup_size_z: u32,
    pub max_compute_workgroups_per_dimension: u32,
    pub max_sampler_anisotropy: u32,
    pub max_framebuffer_width: u32,
    pub max_framebuffer_height: u32,
    pub max_framebuffer_layers: u32,
}

/// Copy offsets must be a multiple of every texel block size in use.
/// All block sizes are divisors of 16.
pub const TEXEL_BLOCK_STRIDE_LCM: u64 = 16;

/// Least common multiple of two non-zero values.
pub fn least_common_multiple(a: u64, b: u64) -> u64 {
    fn gcd(mut a: u64, mut b: u64) -> u64 {
        while b != 0 {
            (a, b) = (b, a % b);
        }
        a
    }
    if a == 0 || b == 0 {
        return a.max(b);
    }
    a / gcd(a, b) * b
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 16, 16)]
    #[case(4, 16, 16)]
    #[case(64, 16, 64)]
    #[case(12, 16, 48)]
    #[case(0, 16, 16)]
    fn test_least_common_multiple(#[case] a: u64, #[case] b: u64, #[case] expected: u64) {
        assert_eq!(least_common_multiple(a, b), expected);
    }

    #[test]
    fn test_feature_list_is_unique() {
        let set: std::collections::HashSet<_> = Feature::ALL.iter().collect();
        assert_eq!(set.len(), Feature::ALL.len());
    }
}
