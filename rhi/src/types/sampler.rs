//! Sampler types and descriptors.

/// Minification and magnification filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

/// Filter between mip levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MipmapFilterMode {
    #[default]
    Nearest,
    Linear,
}

/// Texture coordinate wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    Repeat,
    MirrorRepeat,
    ClampToEdge,
    ClampToBorder,
    /// Requires [`Feature::SamplerMirrorClampToEdge`](super::Feature::SamplerMirrorClampToEdge);
    /// falls back to [`AddressMode::MirrorRepeat`] otherwise.
    MirrorClampToEdge,
}

/// Comparison function for depth/stencil tests and comparison samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunction {
    #[default]
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// How filtered texels are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplerReductionType {
    /// Weighted average.
    #[default]
    Standard,
    /// Weighted average of the comparison results.
    Comparison,
    /// Component-wise minimum.
    Minimum,
    /// Component-wise maximum.
    Maximum,
}

/// Border color for [`AddressMode::ClampToBorder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BorderColor {
    #[default]
    FloatTransparentBlack,
    FloatOpaqueBlack,
    FloatOpaqueWhite,
    UintTransparentBlack,
    UintOpaqueBlack,
    UintOpaqueWhite,
}

/// Descriptor for creating a sampler.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDescriptor {
    /// Debug label for the sampler.
    pub label: Option<String>,
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub mipmap_filter: MipmapFilterMode,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    pub lod_min_clamp: f32,
    /// `f32::MAX` disables the upper clamp.
    pub lod_max_clamp: f32,
    /// Only used with [`SamplerReductionType::Comparison`].
    pub compare: CompareFunction,
    /// Values above 1 enable anisotropic filtering.
    pub max_anisotropy: u16,
    pub reduction_type: SamplerReductionType,
    pub border_color: BorderColor,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            min_filter: FilterMode::Nearest,
            mag_filter: FilterMode::Nearest,
            mipmap_filter: MipmapFilterMode::Nearest,
            address_mode_u: AddressMode::Repeat,
            address_mode_v: AddressMode::Repeat,
            address_mode_w: AddressMode::Repeat,
            lod_min_clamp: 0.0,
            lod_max_clamp: f32::MAX,
            compare: CompareFunction::Never,
            max_anisotropy: 1,
            reduction_type: SamplerReductionType::Standard,
            border_color: BorderColor::FloatTransparentBlack,
        }
    }
}

impl SamplerDescriptor {
    fn with_filter_and_mode(filter: FilterMode, mode: AddressMode, max_anisotropy: u16) -> Self {
        let mipmap_filter = match filter {
            FilterMode::Nearest => MipmapFilterMode::Nearest,
            FilterMode::Linear => MipmapFilterMode::Linear,
        };
        Self {
            min_filter: filter,
            mag_filter: filter,
            mipmap_filter,
            max_anisotropy,
            ..Default::default()
        }
        .with_address_mode(mode)
    }

    pub fn point_wrap() -> Self {
        Self::with_filter_and_mode(FilterMode::Nearest, AddressMode::Repeat, 1)
    }

    pub fn point_clamp() -> Self {
        Self::with_filter_and_mode(FilterMode::Nearest, AddressMode::ClampToEdge, 1)
    }

    pub fn point_mirror() -> Self {
        Self::with_filter_and_mode(FilterMode::Nearest, AddressMode::MirrorRepeat, 1)
    }

    pub fn linear_wrap() -> Self {
        Self::with_filter_and_mode(FilterMode::Linear, AddressMode::Repeat, 1)
    }

    pub fn linear_clamp() -> Self {
        Self::with_filter_and_mode(FilterMode::Linear, AddressMode::ClampToEdge, 1)
    }

    pub fn linear_mirror() -> Self {
        Self::with_filter_and_mode(FilterMode::Linear, AddressMode::MirrorRepeat, 1)
    }

    pub fn anisotropic_wrap() -> Self {
        Self::with_filter_and_mode(FilterMode::Linear, AddressMode::Repeat, 16)
    }

    pub fn anisotropic_clamp() -> Self {
        Self::with_filter_and_mode(FilterMode::Linear, AddressMode::ClampToEdge, 16)
    }

    /// Depth comparison sampler.
    pub fn comparison(compare: CompareFunction) -> Self {
        Self {
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            compare,
            reduction_type: SamplerReductionType::Comparison,
            ..Default::default()
        }
        .with_address_mode(AddressMode::ClampToEdge)
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set address mode for all coordinates.
    pub fn with_address_mode(mut self, mode: AddressMode) -> Self {
        self.address_mode_u = mode;
        self.address_mode_v = mode;
        self.address_mode_w = mode;
        self
    }

    /// Set the anisotropy level.
    pub fn with_anisotropy(mut self, level: u16) -> Self {
        self.max_anisotropy = level;
        self
    }

    /// Set the border color.
    pub fn with_border_color(mut self, color: BorderColor) -> Self {
        self.border_color = color;
        self
    }

    /// Key identifying the native sampler state. The label is not part of it.
    pub fn cache_key(&self) -> SamplerKey {
        SamplerKey {
            min_filter: self.min_filter,
            mag_filter: self.mag_filter,
            mipmap_filter: self.mipmap_filter,
            address_modes: [self.address_mode_u, self.address_mode_v, self.address_mode_w],
            lod_min_clamp: self.lod_min_clamp.to_bits(),
            lod_max_clamp: self.lod_max_clamp.to_bits(),
            compare: self.compare,
            max_anisotropy: self.max_anisotropy,
            reduction_type: self.reduction_type,
            border_color: self.border_color,
        }
    }
}

/// Hashable sampler state used to intern samplers on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerKey {
    min_filter: FilterMode,
    mag_filter: FilterMode,
    mipmap_filter: MipmapFilterMode,
    address_modes: [AddressMode; 3],
    lod_min_clamp: u32,
    lod_max_clamp: u32,
    compare: CompareFunction,
    max_anisotropy: u16,
    reduction_type: SamplerReductionType,
    border_color: BorderColor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_cache_key_ignores_label() {
        let a = SamplerDescriptor::linear_wrap().with_label("a");
        let b = SamplerDescriptor::linear_wrap().with_label("b");
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_cache_key_distinguishes_state() {
        let keys: HashSet<SamplerKey> = [
            SamplerDescriptor::point_wrap(),
            SamplerDescriptor::point_clamp(),
            SamplerDescriptor::linear_wrap(),
            SamplerDescriptor::anisotropic_wrap(),
            SamplerDescriptor::comparison(CompareFunction::LessEqual),
            SamplerDescriptor {
                lod_max_clamp: 4.0,
                ..SamplerDescriptor::point_wrap()
            },
        ]
        .iter()
        .map(SamplerDescriptor::cache_key)
        .collect();
        assert_eq!(keys.len(), 6);
    }

    #[test]
    fn test_presets() {
        let desc = SamplerDescriptor::anisotropic_clamp();
        assert_eq!(desc.max_anisotropy, 16);
        assert_eq!(desc.address_mode_w, AddressMode::ClampToEdge);
        assert_eq!(desc.mipmap_filter, MipmapFilterMode::Linear);
    }
}
