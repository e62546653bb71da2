//! Fixed-function pipeline state.

use bitflags::bitflags;

use super::{CompareFunction, MAX_COLOR_ATTACHMENTS};

/// Programmable stage a shader module targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
    Amplification,
    Mesh,
}

// ============================================================================
// Vertex input
// ============================================================================

/// Format of a single vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Uint8,
    Uint8x2,
    Uint8x4,
    Sint8,
    Sint8x2,
    Sint8x4,
    Unorm8,
    Unorm8x2,
    Unorm8x4,
    Snorm8,
    Snorm8x2,
    Snorm8x4,
    Uint16,
    Uint16x2,
    Uint16x4,
    Sint16,
    Sint16x2,
    Sint16x4,
    Unorm16,
    Unorm16x2,
    Unorm16x4,
    Snorm16,
    Snorm16x2,
    Snorm16x4,
    Float16,
    Float16x2,
    Float16x4,
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
    Uint32x2,
    Uint32x3,
    Uint32x4,
    Sint32,
    Sint32x2,
    Sint32x3,
    Sint32x4,
    Unorm10_10_10_2,
    Unorm8x4Bgra,
}

impl VertexFormat {
    /// Size of the attribute in bytes.
    pub const fn size(self) -> u32 {
        use VertexFormat::*;
        match self {
            Uint8 | Sint8 | Unorm8 | Snorm8 => 1,
            Uint8x2 | Sint8x2 | Unorm8x2 | Snorm8x2 | Uint16 | Sint16 | Unorm16 | Snorm16
            | Float16 => 2,
            Uint8x4 | Sint8x4 | Unorm8x4 | Snorm8x4 | Uint16x2 | Sint16x2 | Unorm16x2
            | Snorm16x2 | Float16x2 | Float32 | Uint32 | Sint32 | Unorm10_10_10_2
            | Unorm8x4Bgra => 4,
            Uint16x4 | Sint16x4 | Unorm16x4 | Snorm16x4 | Float16x4 | Float32x2 | Uint32x2
            | Sint32x2 => 8,
            Float32x3 | Uint32x3 | Sint32x3 => 12,
            Float32x4 | Uint32x4 | Sint32x4 => 16,
        }
    }
}

/// Whether a vertex buffer advances per vertex or per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VertexStepMode {
    #[default]
    Vertex,
    Instance,
}

/// A single vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub format: VertexFormat,
    pub offset: u32,
    pub shader_location: u32,
}

impl VertexAttribute {
    pub fn new(format: VertexFormat, offset: u32, shader_location: u32) -> Self {
        Self {
            format,
            offset,
            shader_location,
        }
    }
}

/// Layout of one vertex buffer slot. Layouts with a zero stride are skipped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VertexBufferLayout {
    pub stride: u32,
    pub step_mode: VertexStepMode,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexBufferLayout {
    /// Build a tightly packed layout, assigning offsets and locations in order.
    pub fn packed(formats: &[VertexFormat]) -> Self {
        let mut offset = 0;
        let attributes = formats
            .iter()
            .enumerate()
            .map(|(location, &format)| {
                let attribute = VertexAttribute::new(format, offset, location as u32);
                offset += format.size();
                attribute
            })
            .collect();
        Self {
            stride: offset,
            step_mode: VertexStepMode::Vertex,
            attributes,
        }
    }

    /// Set the step mode.
    pub fn with_step_mode(mut self, step_mode: VertexStepMode) -> Self {
        self.step_mode = step_mode;
        self
    }
}

// ============================================================================
// Input assembly and rasterization
// ============================================================================

/// Primitive topology. Strip topologies enable primitive restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
    PatchList,
}

impl PrimitiveTopology {
    /// Returns true for strip topologies.
    pub fn is_strip(self) -> bool {
        matches!(self, Self::LineStrip | Self::TriangleStrip)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    #[default]
    Solid,
    /// Falls back to solid when non-solid fill is not supported.
    Wireframe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrontFace {
    #[default]
    Clockwise,
    CounterClockwise,
}

/// Behaviour for primitives outside the depth range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DepthClipMode {
    #[default]
    Clip,
    Clamp,
}

/// Rasterizer configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizerState {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub depth_bias: f32,
    pub depth_bias_slope_scale: f32,
    pub depth_bias_clamp: f32,
    pub depth_clip_mode: DepthClipMode,
    pub conservative_raster: bool,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self::CULL_BACK
    }
}

impl RasterizerState {
    pub const CULL_NONE: Self = Self::with_cull(CullMode::None);
    pub const CULL_FRONT: Self = Self::with_cull(CullMode::Front);
    pub const CULL_BACK: Self = Self::with_cull(CullMode::Back);

    const fn with_cull(cull_mode: CullMode) -> Self {
        Self {
            fill_mode: FillMode::Solid,
            cull_mode,
            front_face: FrontFace::Clockwise,
            depth_bias: 0.0,
            depth_bias_slope_scale: 0.0,
            depth_bias_clamp: 0.0,
            depth_clip_mode: DepthClipMode::Clip,
            conservative_raster: false,
        }
    }

    /// Whether depth bias is active.
    pub fn depth_bias_enabled(&self) -> bool {
        self.depth_bias != 0.0 || self.depth_bias_slope_scale != 0.0
    }
}

// ============================================================================
// Depth-stencil
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StencilOperation {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

/// Stencil operations for one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilFaceState {
    pub compare: CompareFunction,
    pub fail_op: StencilOperation,
    pub depth_fail_op: StencilOperation,
    pub pass_op: StencilOperation,
}

impl Default for StencilFaceState {
    fn default() -> Self {
        Self {
            compare: CompareFunction::Always,
            fail_op: StencilOperation::Keep,
            depth_fail_op: StencilOperation::Keep,
            pass_op: StencilOperation::Keep,
        }
    }
}

impl StencilFaceState {
    /// Whether this face does anything beyond the default pass-through.
    pub fn is_active(&self) -> bool {
        *self != Self::default()
    }
}

/// Depth and stencil test configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub stencil_front: StencilFaceState,
    pub stencil_back: StencilFaceState,
    /// Ignored when the adapter lacks depth bounds support.
    pub depth_bounds_test: bool,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self::DEPTH_DEFAULT
    }
}

impl DepthStencilState {
    pub const DEPTH_NONE: Self = Self::new(false, CompareFunction::Always);
    pub const DEPTH_DEFAULT: Self = Self::new(true, CompareFunction::LessEqual);
    pub const DEPTH_READ: Self = Self::new(false, CompareFunction::LessEqual);
    pub const DEPTH_REVERSE_Z: Self = Self::new(true, CompareFunction::GreaterEqual);
    pub const DEPTH_READ_REVERSE_Z: Self = Self::new(false, CompareFunction::GreaterEqual);

    pub const fn new(depth_write_enabled: bool, depth_compare: CompareFunction) -> Self {
        let face = StencilFaceState {
            compare: CompareFunction::Always,
            fail_op: StencilOperation::Keep,
            depth_fail_op: StencilOperation::Keep,
            pass_op: StencilOperation::Keep,
        };
        Self {
            depth_write_enabled,
            depth_compare,
            stencil_read_mask: 0xFF,
            stencil_write_mask: 0xFF,
            stencil_front: face,
            stencil_back: face,
            depth_bounds_test: false,
        }
    }

    /// Depth testing is needed unless the compare always passes and nothing is written.
    pub fn depth_test_enabled(&self) -> bool {
        self.depth_compare != CompareFunction::Always || self.depth_write_enabled
    }

    pub fn stencil_test_enabled(&self) -> bool {
        self.stencil_front.is_active() || self.stencil_back.is_active()
    }
}

// ============================================================================
// Blending
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SourceColor,
    OneMinusSourceColor,
    SourceAlpha,
    OneMinusSourceAlpha,
    DestinationColor,
    OneMinusDestinationColor,
    DestinationAlpha,
    OneMinusDestinationAlpha,
    SourceAlphaSaturate,
    BlendColor,
    OneMinusBlendColor,
    Source1Color,
    OneMinusSource1Color,
    Source1Alpha,
    OneMinusSource1Alpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendOperation {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorWriteMask: u8 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
        const ALL = 0xF;
    }
}

impl Default for ColorWriteMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// Blend configuration of one color attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetBlendState {
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_op: BlendOperation,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendOperation,
    pub write_mask: ColorWriteMask,
}

impl Default for RenderTargetBlendState {
    fn default() -> Self {
        Self::OPAQUE
    }
}

impl RenderTargetBlendState {
    pub const OPAQUE: Self = Self {
        src_color: BlendFactor::One,
        dst_color: BlendFactor::Zero,
        color_op: BlendOperation::Add,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::Zero,
        alpha_op: BlendOperation::Add,
        write_mask: ColorWriteMask::ALL,
    };

    pub const ALPHA_BLEND: Self = Self {
        src_color: BlendFactor::SourceAlpha,
        dst_color: BlendFactor::OneMinusSourceAlpha,
        color_op: BlendOperation::Add,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::OneMinusSourceAlpha,
        alpha_op: BlendOperation::Add,
        write_mask: ColorWriteMask::ALL,
    };

    pub const ADDITIVE: Self = Self {
        src_color: BlendFactor::SourceAlpha,
        dst_color: BlendFactor::One,
        color_op: BlendOperation::Add,
        src_alpha: BlendFactor::SourceAlpha,
        dst_alpha: BlendFactor::One,
        alpha_op: BlendOperation::Add,
        write_mask: ColorWriteMask::ALL,
    };

    /// Blending is a no-op for `One, Zero, Add` on both color and alpha.
    pub fn blend_enabled(&self) -> bool {
        !(self.src_color == BlendFactor::One
            && self.dst_color == BlendFactor::Zero
            && self.color_op == BlendOperation::Add
            && self.src_alpha == BlendFactor::One
            && self.dst_alpha == BlendFactor::Zero
            && self.alpha_op == BlendOperation::Add)
    }
}

/// Blend configuration for all color attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub alpha_to_coverage: bool,
    /// When false every attachment uses `render_targets[0]`.
    pub independent_blend: bool,
    pub render_targets: [RenderTargetBlendState; MAX_COLOR_ATTACHMENTS],
}

impl Default for BlendState {
    fn default() -> Self {
        Self::uniform(RenderTargetBlendState::OPAQUE)
    }
}

impl BlendState {
    /// Same blend state for every attachment.
    pub fn uniform(state: RenderTargetBlendState) -> Self {
        Self {
            alpha_to_coverage: false,
            independent_blend: false,
            render_targets: [state; MAX_COLOR_ATTACHMENTS],
        }
    }

    /// State used for attachment `index`.
    pub fn attachment(&self, index: usize) -> &RenderTargetBlendState {
        if self.independent_blend {
            &self.render_targets[index]
        } else {
            &self.render_targets[0]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_vertex_layout() {
        let layout = VertexBufferLayout::packed(&[
            VertexFormat::Float32x3,
            VertexFormat::Float32x3,
            VertexFormat::Float32x2,
            VertexFormat::Unorm8x4,
        ]);
        assert_eq!(layout.stride, 36);
        assert_eq!(layout.attributes[2].offset, 24);
        assert_eq!(layout.attributes[3].shader_location, 3);
    }

    #[test]
    fn test_depth_stencil_presets() {
        assert!(!DepthStencilState::DEPTH_NONE.depth_test_enabled());
        assert!(DepthStencilState::DEPTH_READ.depth_test_enabled());
        assert!(!DepthStencilState::DEPTH_DEFAULT.stencil_test_enabled());

        let mut state = DepthStencilState::DEPTH_DEFAULT;
        state.stencil_front.pass_op = StencilOperation::Replace;
        assert!(state.stencil_test_enabled());
    }

    #[test]
    fn test_blend_enabled() {
        assert!(!RenderTargetBlendState::OPAQUE.blend_enabled());
        assert!(RenderTargetBlendState::ALPHA_BLEND.blend_enabled());
    }

    #[test]
    fn test_independent_blend_selection() {
        let mut blend = BlendState::uniform(RenderTargetBlendState::ADDITIVE);
        blend.render_targets[1] = RenderTargetBlendState::OPAQUE;
        assert_eq!(*blend.attachment(1), RenderTargetBlendState::ADDITIVE);
        blend.independent_blend = true;
        assert_eq!(*blend.attachment(1), RenderTargetBlendState::OPAQUE);
    }

    #[test]
    fn test_strip_topology() {
        assert!(PrimitiveTopology::TriangleStrip.is_strip());
        assert!(!PrimitiveTopology::TriangleList.is_strip());
    }
}
