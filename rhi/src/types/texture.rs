//! Texture types and descriptors.

use bitflags::bitflags;

use super::MemoryType;

/// Pixel format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum PixelFormat {
    #[default]
    Undefined,

    // 8-bit formats
    R8Unorm,
    R8Snorm,
    R8Uint,
    R8Sint,

    // 16-bit formats
    R16Unorm,
    R16Snorm,
    R16Uint,
    R16Sint,
    R16Float,
    Rg8Unorm,
    Rg8Snorm,
    Rg8Uint,
    Rg8Sint,

    // Packed 16-bit formats
    Bgra4Unorm,
    B5G6R5Unorm,
    Bgr5A1Unorm,

    // 32-bit formats
    R32Uint,
    R32Sint,
    R32Float,
    Rg16Unorm,
    Rg16Snorm,
    Rg16Uint,
    Rg16Sint,
    Rg16Float,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgba8Snorm,
    Rgba8Uint,
    Rgba8Sint,
    Bgra8Unorm,
    Bgra8UnormSrgb,

    // Packed 32-bit formats
    Rgb9e5Ufloat,
    Rgb10a2Unorm,
    Rgb10a2Uint,
    Rg11b10Float,

    // 64-bit formats
    Rg32Uint,
    Rg32Sint,
    Rg32Float,
    Rgba16Unorm,
    Rgba16Snorm,
    Rgba16Uint,
    Rgba16Sint,
    Rgba16Float,

    // 128-bit formats
    Rgba32Uint,
    Rgba32Sint,
    Rgba32Float,

    // Depth-stencil formats
    Stencil8,
    Depth16Unorm,
    Depth24UnormStencil8,
    Depth32Float,
    Depth32FloatStencil8,

    // BC compressed formats
    Bc1RgbaUnorm,
    Bc1RgbaUnormSrgb,
    Bc2RgbaUnorm,
    Bc2RgbaUnormSrgb,
    Bc3RgbaUnorm,
    Bc3RgbaUnormSrgb,
    Bc4RUnorm,
    Bc4RSnorm,
    Bc5RgUnorm,
    Bc5RgSnorm,
    Bc6hRgbUfloat,
    Bc6hRgbSfloat,
    Bc7RgbaUnorm,
    Bc7RgbaUnormSrgb,

    // ETC2/EAC compressed formats
    Etc2Rgb8Unorm,
    Etc2Rgb8UnormSrgb,
    Etc2Rgb8A1Unorm,
    Etc2Rgb8A1UnormSrgb,
    Etc2Rgba8Unorm,
    Etc2Rgba8UnormSrgb,
    EacR11Unorm,
    EacR11Snorm,
    EacRg11Unorm,
    EacRg11Snorm,

    // ASTC compressed formats
    Astc4x4Unorm,
    Astc4x4UnormSrgb,
    Astc5x4Unorm,
    Astc5x4UnormSrgb,
    Astc5x5Unorm,
    Astc5x5UnormSrgb,
    Astc6x5Unorm,
    Astc6x5UnormSrgb,
    Astc6x6Unorm,
    Astc6x6UnormSrgb,
    Astc8x5Unorm,
    Astc8x5UnormSrgb,
    Astc8x6Unorm,
    Astc8x6UnormSrgb,
    Astc8x8Unorm,
    Astc8x8UnormSrgb,
    Astc10x5Unorm,
    Astc10x5UnormSrgb,
    Astc10x6Unorm,
    Astc10x6UnormSrgb,
    Astc10x8Unorm,
    Astc10x8UnormSrgb,
    Astc10x10Unorm,
    Astc10x10UnormSrgb,
    Astc12x10Unorm,
    Astc12x10UnormSrgb,
    Astc12x12Unorm,
    Astc12x12UnormSrgb,
}

/// Block layout of a pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelFormatInfo {
    /// Bytes per block (per pixel for uncompressed formats).
    pub bytes_per_block: u32,
    /// Block width in pixels.
    pub block_width: u32,
    /// Block height in pixels.
    pub block_height: u32,
}

impl PixelFormatInfo {
    const fn pixel(bytes: u32) -> Self {
        Self {
            bytes_per_block: bytes,
            block_width: 1,
            block_height: 1,
        }
    }

    const fn block(bytes: u32, width: u32, height: u32) -> Self {
        Self {
            bytes_per_block: bytes,
            block_width: width,
            block_height: height,
        }
    }
}

impl PixelFormat {
    /// Block layout for this format.
    pub fn info(self) -> PixelFormatInfo {
        use PixelFormat::*;
        match self {
            Undefined => PixelFormatInfo::pixel(0),
            R8Unorm | R8Snorm | R8Uint | R8Sint | Stencil8 => PixelFormatInfo::pixel(1),
            R16Unorm | R16Snorm | R16Uint | R16Sint | R16Float | Rg8Unorm | Rg8Snorm | Rg8Uint
            | Rg8Sint | Bgra4Unorm | B5G6R5Unorm | Bgr5A1Unorm | Depth16Unorm => {
                PixelFormatInfo::pixel(2)
            }
            R32Uint | R32Sint | R32Float | Rg16Unorm | Rg16Snorm | Rg16Uint | Rg16Sint
            | Rg16Float | Rgba8Unorm | Rgba8UnormSrgb | Rgba8Snorm | Rgba8Uint | Rgba8Sint
            | Bgra8Unorm | Bgra8UnormSrgb | Rgb9e5Ufloat | Rgb10a2Unorm | Rgb10a2Uint
            | Rg11b10Float | Depth24UnormStencil8 | Depth32Float => PixelFormatInfo::pixel(4),
            Depth32FloatStencil8 => PixelFormatInfo::pixel(5),
            Rg32Uint | Rg32Sint | Rg32Float | Rgba16Unorm | Rgba16Snorm | Rgba16Uint
            | Rgba16Sint | Rgba16Float => PixelFormatInfo::pixel(8),
            Rgba32Uint | Rgba32Sint | Rgba32Float => PixelFormatInfo::pixel(16),
            Bc1RgbaUnorm | Bc1RgbaUnormSrgb | Bc4RUnorm | Bc4RSnorm => {
                PixelFormatInfo::block(8, 4, 4)
            }
            Bc2RgbaUnorm | Bc2RgbaUnormSrgb | Bc3RgbaUnorm | Bc3RgbaUnormSrgb | Bc5RgUnorm
            | Bc5RgSnorm | Bc6hRgbUfloat | Bc6hRgbSfloat | Bc7RgbaUnorm | Bc7RgbaUnormSrgb => {
                PixelFormatInfo::block(16, 4, 4)
            }
            Etc2Rgb8Unorm | Etc2Rgb8UnormSrgb | Etc2Rgb8A1Unorm | Etc2Rgb8A1UnormSrgb
            | EacR11Unorm | EacR11Snorm => PixelFormatInfo::block(8, 4, 4),
            Etc2Rgba8Unorm | Etc2Rgba8UnormSrgb | EacRg11Unorm | EacRg11Snorm => {
                PixelFormatInfo::block(16, 4, 4)
            }
            Astc4x4Unorm | Astc4x4UnormSrgb => PixelFormatInfo::block(16, 4, 4),
            Astc5x4Unorm | Astc5x4UnormSrgb => PixelFormatInfo::block(16, 5, 4),
            Astc5x5Unorm | Astc5x5UnormSrgb => PixelFormatInfo::block(16, 5, 5),
            Astc6x5Unorm | Astc6x5UnormSrgb => PixelFormatInfo::block(16, 6, 5),
            Astc6x6Unorm | Astc6x6UnormSrgb => PixelFormatInfo::block(16, 6, 6),
            Astc8x5Unorm | Astc8x5UnormSrgb => PixelFormatInfo::block(16, 8, 5),
            Astc8x6Unorm | Astc8x6UnormSrgb => PixelFormatInfo::block(16, 8, 6),
            Astc8x8Unorm | Astc8x8UnormSrgb => PixelFormatInfo::block(16, 8, 8),
            Astc10x5Unorm | Astc10x5UnormSrgb => PixelFormatInfo::block(16, 10, 5),
            Astc10x6Unorm | Astc10x6UnormSrgb => PixelFormatInfo::block(16, 10, 6),
            Astc10x8Unorm | Astc10x8UnormSrgb => PixelFormatInfo::block(16, 10, 8),
            Astc10x10Unorm | Astc10x10UnormSrgb => PixelFormatInfo::block(16, 10, 10),
            Astc12x10Unorm | Astc12x10UnormSrgb => PixelFormatInfo::block(16, 12, 10),
            Astc12x12Unorm | Astc12x12UnormSrgb => PixelFormatInfo::block(16, 12, 12),
        }
    }

    /// Returns true for depth, stencil and combined depth-stencil formats.
    pub fn is_depth_stencil(self) -> bool {
        matches!(
            self,
            Self::Stencil8
                | Self::Depth16Unorm
                | Self::Depth24UnormStencil8
                | Self::Depth32Float
                | Self::Depth32FloatStencil8
        )
    }

    /// Returns true for formats with a depth aspect and no stencil aspect.
    pub fn is_depth_only(self) -> bool {
        matches!(self, Self::Depth16Unorm | Self::Depth32Float)
    }

    /// Returns true for formats with a stencil aspect.
    pub fn has_stencil(self) -> bool {
        matches!(
            self,
            Self::Stencil8 | Self::Depth24UnormStencil8 | Self::Depth32FloatStencil8
        )
    }

    /// Returns true for formats with a depth aspect.
    pub fn has_depth(self) -> bool {
        self.is_depth_stencil() && self != Self::Stencil8
    }

    /// Returns true for sRGB encoded formats.
    pub fn is_srgb(self) -> bool {
        use PixelFormat::*;
        matches!(
            self,
            Rgba8UnormSrgb
                | Bgra8UnormSrgb
                | Bc1RgbaUnormSrgb
                | Bc2RgbaUnormSrgb
                | Bc3RgbaUnormSrgb
                | Bc7RgbaUnormSrgb
                | Etc2Rgb8UnormSrgb
                | Etc2Rgb8A1UnormSrgb
                | Etc2Rgba8UnormSrgb
                | Astc4x4UnormSrgb
                | Astc5x4UnormSrgb
                | Astc5x5UnormSrgb
                | Astc6x5UnormSrgb
                | Astc6x6UnormSrgb
                | Astc8x5UnormSrgb
                | Astc8x6UnormSrgb
                | Astc8x8UnormSrgb
                | Astc10x5UnormSrgb
                | Astc10x6UnormSrgb
                | Astc10x8UnormSrgb
                | Astc10x10UnormSrgb
                | Astc12x10UnormSrgb
                | Astc12x12UnormSrgb
        )
    }

    /// Returns true for block compressed formats.
    pub fn is_compressed(self) -> bool {
        let info = self.info();
        info.block_width > 1 || info.block_height > 1
    }

    /// Row pitch and slice pitch in bytes for a tightly packed region.
    pub fn surface_pitch(self, width: u32, height: u32) -> (u32, u32) {
        let info = self.info();
        let blocks_x = width.div_ceil(info.block_width).max(1);
        let blocks_y = height.div_ceil(info.block_height).max(1);
        let row_pitch = blocks_x * info.bytes_per_block;
        (row_pitch, row_pitch * blocks_y)
    }
}

/// Texture dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    Texture1D,
    #[default]
    Texture2D,
    Texture3D,
}

/// Dimensionality of a texture view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureViewDimension {
    View1D,
    View1DArray,
    #[default]
    View2D,
    View2DArray,
    ViewCube,
    ViewCubeArray,
    View3D,
}

/// Which aspects of a texture a view or copy covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureAspect {
    #[default]
    All,
    DepthOnly,
    StencilOnly,
}

/// Multisample count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureSampleCount {
    #[default]
    Count1,
    Count2,
    Count4,
    Count8,
    Count16,
    Count32,
}

impl TextureSampleCount {
    /// Number of samples.
    pub fn count(self) -> u32 {
        match self {
            Self::Count1 => 1,
            Self::Count2 => 2,
            Self::Count4 => 4,
            Self::Count8 => 8,
            Self::Count16 => 16,
            Self::Count32 => 32,
        }
    }
}

bitflags! {
    /// Usage flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureUsage: u32 {
        /// Texture can be sampled or loaded in shaders.
        const SHADER_READ = 1 << 0;
        /// Texture can be written as a storage image.
        const SHADER_WRITE = 1 << 1;
        /// Texture can be a color or depth-stencil attachment.
        const RENDER_TARGET = 1 << 2;
        /// Texture contents only live inside a render pass.
        const TRANSIENT = 1 << 3;
        /// Texture can be a fragment shading rate attachment.
        const SHADING_RATE = 1 << 4;
    }
}

/// Logical texture state of a subresource.
///
/// Each state maps to a native layout, pipeline stage and access mask in
/// the backend state tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureLayout {
    /// Contents undefined.
    #[default]
    Undefined,
    CopySource,
    CopyDest,
    ShaderResource,
    UnorderedAccess,
    RenderTarget,
    DepthWrite,
    DepthRead,
    Present,
    ShadingRateSurface,
}

/// Descriptor for creating a texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    /// Debug label.
    pub label: Option<String>,
    pub dimension: TextureDimension,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Depth for 3D textures, array layers otherwise.
    pub depth_or_array_layers: u32,
    pub mip_level_count: u32,
    pub sample_count: TextureSampleCount,
    pub usage: TextureUsage,
    pub memory_type: MemoryType,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            dimension: TextureDimension::Texture2D,
            format: PixelFormat::Rgba8Unorm,
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
            mip_level_count: 1,
            sample_count: TextureSampleCount::Count1,
            usage: TextureUsage::SHADER_READ,
            memory_type: MemoryType::Private,
        }
    }
}

impl TextureDescriptor {
    /// Create a 1D texture descriptor.
    pub fn texture_1d(format: PixelFormat, width: u32, usage: TextureUsage) -> Self {
        Self {
            dimension: TextureDimension::Texture1D,
            format,
            width,
            usage,
            ..Default::default()
        }
    }

    /// Create a 2D texture descriptor.
    pub fn texture_2d(format: PixelFormat, width: u32, height: u32, usage: TextureUsage) -> Self {
        Self {
            dimension: TextureDimension::Texture2D,
            format,
            width,
            height,
            usage,
            ..Default::default()
        }
    }

    /// Create a 3D texture descriptor.
    pub fn texture_3d(
        format: PixelFormat,
        width: u32,
        height: u32,
        depth: u32,
        usage: TextureUsage,
    ) -> Self {
        Self {
            dimension: TextureDimension::Texture3D,
            format,
            width,
            height,
            depth_or_array_layers: depth,
            usage,
            ..Default::default()
        }
    }

    /// Create a cube texture descriptor (6 layers per cube).
    pub fn texture_cube(format: PixelFormat, size: u32, cubes: u32, usage: TextureUsage) -> Self {
        Self {
            dimension: TextureDimension::Texture2D,
            format,
            width: size,
            height: size,
            depth_or_array_layers: 6 * cubes.max(1),
            usage,
            ..Default::default()
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the number of mip levels.
    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_level_count = count;
        self
    }

    /// Set the number of array layers (ignored for 3D textures).
    pub fn with_array_layers(mut self, layers: u32) -> Self {
        self.depth_or_array_layers = layers;
        self
    }

    /// Set the sample count.
    pub fn with_sample_count(mut self, sample_count: TextureSampleCount) -> Self {
        self.sample_count = sample_count;
        self
    }

    /// Number of array layers.
    pub fn array_layers(&self) -> u32 {
        match self.dimension {
            TextureDimension::Texture3D => 1,
            _ => self.depth_or_array_layers.max(1),
        }
    }

    /// Depth of mip 0.
    pub fn depth(&self) -> u32 {
        match self.dimension {
            TextureDimension::Texture3D => self.depth_or_array_layers.max(1),
            _ => 1,
        }
    }
}

/// Descriptor for creating a texture view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TextureViewDescriptor {
    pub label: Option<String>,
    /// View dimension; `None` derives it from the texture.
    pub dimension: Option<TextureViewDimension>,
    /// View format; `Undefined` uses the texture format.
    pub format: PixelFormat,
    pub base_mip_level: u32,
    /// Number of mips; `0` means all remaining.
    pub mip_level_count: u32,
    pub base_array_layer: u32,
    /// Number of layers; `0` means all remaining.
    pub array_layer_count: u32,
    pub aspect: TextureAspect,
}

impl TextureViewDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_dimension(mut self, dimension: TextureViewDimension) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// Restrict the view to `count` mips starting at `base`; `0` means all remaining.
    pub fn with_mip_range(mut self, base: u32, count: u32) -> Self {
        self.base_mip_level = base;
        self.mip_level_count = count;
        self
    }

    /// Restrict the view to `count` layers starting at `base`; `0` means all remaining.
    pub fn with_layer_range(mut self, base: u32, count: u32) -> Self {
        self.base_array_layer = base;
        self.array_layer_count = count;
        self
    }

    pub fn with_aspect(mut self, aspect: TextureAspect) -> Self {
        self.aspect = aspect;
        self
    }
}

/// Initial data for one texture subresource.
#[derive(Debug, Clone, Copy)]
pub struct TextureData<'a> {
    pub data: &'a [u8],
    pub row_pitch: u32,
    pub slice_pitch: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_classification() {
        assert!(PixelFormat::Depth32Float.is_depth_only());
        assert!(PixelFormat::Depth24UnormStencil8.has_stencil());
        assert!(!PixelFormat::Stencil8.has_depth());
        assert!(PixelFormat::Bgra8UnormSrgb.is_srgb());
        assert!(PixelFormat::Bc7RgbaUnorm.is_compressed());
        assert!(!PixelFormat::Rgba16Float.is_compressed());
    }

    #[test]
    fn test_surface_pitch() {
        assert_eq!(PixelFormat::Rgba8Unorm.surface_pitch(16, 8), (64, 512));
        // 10x10 BC1 rounds up to 3x3 blocks of 8 bytes.
        assert_eq!(PixelFormat::Bc1RgbaUnorm.surface_pitch(10, 10), (24, 72));
        assert_eq!(PixelFormat::Astc12x12Unorm.surface_pitch(1, 1), (16, 16));
    }

    #[test]
    fn test_array_layers_and_depth() {
        let tex = TextureDescriptor::texture_3d(PixelFormat::R8Unorm, 4, 4, 8, TextureUsage::SHADER_READ);
        assert_eq!(tex.array_layers(), 1);
        assert_eq!(tex.depth(), 8);

        let cube = TextureDescriptor::texture_cube(PixelFormat::Rgba8Unorm, 64, 2, TextureUsage::SHADER_READ);
        assert_eq!(cube.array_layers(), 12);
        assert_eq!(cube.depth(), 1);
    }
}
