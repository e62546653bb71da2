//! Resource state tables and per-subresource layout tracking.
//!
//! Logical states ([`BufferStates`], [`TextureLayout`]) are translated into the
//! synchronization2 stage mask, access mask and image layout used when a
//! barrier is recorded. Buffer states are bitsets, so their native state is
//! the fold of every set bit through [`BUFFER_STATE_TABLE`].

use ash::vk;

use crate::types::{BufferStates, TextureLayout};

/// Native synchronization scope of a logical resource state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl NativeState {
    const fn new(
        stage: vk::PipelineStageFlags2,
        access: vk::AccessFlags2,
        layout: vk::ImageLayout,
    ) -> Self {
        Self {
            stage,
            access,
            layout,
        }
    }

    const fn buffer(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        Self::new(stage, access, vk::ImageLayout::UNDEFINED)
    }

    /// State of a resource whose contents are undefined.
    pub const UNDEFINED: Self = Self::new(
        vk::PipelineStageFlags2::TOP_OF_PIPE,
        vk::AccessFlags2::NONE,
        vk::ImageLayout::UNDEFINED,
    );
}

const fn stages(a: vk::PipelineStageFlags2, b: vk::PipelineStageFlags2) -> vk::PipelineStageFlags2 {
    vk::PipelineStageFlags2::from_raw(a.as_raw() | b.as_raw())
}

const fn accesses(a: vk::AccessFlags2, b: vk::AccessFlags2) -> vk::AccessFlags2 {
    vk::AccessFlags2::from_raw(a.as_raw() | b.as_raw())
}

/// Buffer state bit to native stage/access.
pub const BUFFER_STATE_TABLE: [(BufferStates, NativeState); 12] = [
    (
        BufferStates::VERTEX_BUFFER,
        NativeState::buffer(
            vk::PipelineStageFlags2::VERTEX_INPUT,
            vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
        ),
    ),
    (
        BufferStates::INDEX_BUFFER,
        NativeState::buffer(
            vk::PipelineStageFlags2::VERTEX_INPUT,
            vk::AccessFlags2::INDEX_READ,
        ),
    ),
    (
        BufferStates::CONSTANT_BUFFER,
        NativeState::buffer(
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::UNIFORM_READ,
        ),
    ),
    (
        BufferStates::INDIRECT_ARGUMENT,
        NativeState::buffer(
            vk::PipelineStageFlags2::DRAW_INDIRECT,
            vk::AccessFlags2::INDIRECT_COMMAND_READ,
        ),
    ),
    (
        BufferStates::SHADER_RESOURCE,
        NativeState::buffer(
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::SHADER_READ,
        ),
    ),
    (
        BufferStates::UNORDERED_ACCESS,
        NativeState::buffer(
            vk::PipelineStageFlags2::ALL_COMMANDS,
            accesses(vk::AccessFlags2::SHADER_READ, vk::AccessFlags2::SHADER_WRITE),
        ),
    ),
    (
        BufferStates::COPY_SOURCE,
        NativeState::buffer(
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_READ,
        ),
    ),
    (
        BufferStates::COPY_DEST,
        NativeState::buffer(
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
        ),
    ),
    (
        BufferStates::PREDICATION,
        NativeState::buffer(
            vk::PipelineStageFlags2::CONDITIONAL_RENDERING_EXT,
            vk::AccessFlags2::CONDITIONAL_RENDERING_READ_EXT,
        ),
    ),
    (
        BufferStates::ACCELERATION_STRUCTURE_READ,
        NativeState::buffer(
            stages(
                vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
                vk::PipelineStageFlags2::COMPUTE_SHADER,
            ),
            vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
        ),
    ),
    (
        BufferStates::ACCELERATION_STRUCTURE_WRITE,
        NativeState::buffer(
            vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
            vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
        ),
    ),
    (
        BufferStates::ACCELERATION_STRUCTURE_BUILD_INPUT,
        NativeState::buffer(
            vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
            vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
        ),
    ),
];

/// Fold a buffer state bitset into a single native stage/access pair.
pub fn buffer_state(states: BufferStates) -> NativeState {
    if states.is_empty() {
        return NativeState::UNDEFINED;
    }
    BUFFER_STATE_TABLE
        .iter()
        .filter(|(bit, _)| states.contains(*bit))
        .fold(
            NativeState::buffer(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE),
            |acc, (_, state)| NativeState::buffer(acc.stage | state.stage, acc.access | state.access),
        )
}

/// Native state of a texture layout.
///
/// Depth-only formats use the depth-specific layouts so that no stencil
/// aspect is implied.
pub fn texture_state(layout: TextureLayout, depth_only: bool) -> NativeState {
    let depth_tests = stages(
        vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS,
        vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
    );
    match layout {
        TextureLayout::Undefined => NativeState::UNDEFINED,
        TextureLayout::CopySource => NativeState::new(
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_READ,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ),
        TextureLayout::CopyDest => NativeState::new(
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ),
        TextureLayout::ShaderResource => NativeState::new(
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::SHADER_READ,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ),
        TextureLayout::UnorderedAccess => NativeState::new(
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE,
            vk::ImageLayout::GENERAL,
        ),
        TextureLayout::RenderTarget => NativeState::new(
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ),
        TextureLayout::DepthWrite => NativeState::new(
            depth_tests,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            if depth_only {
                vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            },
        ),
        TextureLayout::DepthRead => NativeState::new(
            depth_tests,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
            if depth_only {
                vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL
            } else {
                vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
            },
        ),
        TextureLayout::Present => NativeState::new(
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_READ,
            vk::ImageLayout::PRESENT_SRC_KHR,
        ),
        TextureLayout::ShadingRateSurface => NativeState::new(
            vk::PipelineStageFlags2::FRAGMENT_SHADING_RATE_ATTACHMENT_KHR,
            vk::AccessFlags2::FRAGMENT_SHADING_RATE_ATTACHMENT_READ_KHR,
            vk::ImageLayout::FRAGMENT_SHADING_RATE_ATTACHMENT_OPTIMAL_KHR,
        ),
    }
}

/// Current layout of every (mip, layer) of a texture.
///
/// Subresources are stored mip-major inside each layer, matching the
/// subresource index `mip + layer * mips`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubresourceLayouts {
    mip_levels: u32,
    array_layers: u32,
    layouts: Vec<TextureLayout>,
}

impl SubresourceLayouts {
    pub fn new(mip_levels: u32, array_layers: u32, initial: TextureLayout) -> Self {
        let mip_levels = mip_levels.max(1);
        let array_layers = array_layers.max(1);
        Self {
            mip_levels,
            array_layers,
            layouts: vec![initial; (mip_levels * array_layers) as usize],
        }
    }

    fn index(&self, mip: u32, layer: u32) -> usize {
        (mip + layer * self.mip_levels) as usize
    }

    /// Layout of a single subresource.
    pub fn get(&self, mip: u32, layer: u32) -> TextureLayout {
        self.layouts[self.index(mip, layer)]
    }

    /// Clamp a requested range to the texture, resolving `0` counts to "all remaining".
    pub fn clamp_range(
        &self,
        base_mip: u32,
        mip_count: u32,
        base_layer: u32,
        layer_count: u32,
    ) -> (u32, u32, u32, u32) {
        let base_mip = base_mip.min(self.mip_levels - 1);
        let base_layer = base_layer.min(self.array_layers - 1);
        let max_mips = self.mip_levels - base_mip;
        let max_layers = self.array_layers - base_layer;
        let mip_count = if mip_count == 0 { max_mips } else { mip_count.min(max_mips) };
        let layer_count = if layer_count == 0 {
            max_layers
        } else {
            layer_count.min(max_layers)
        };
        (base_mip, mip_count, base_layer, layer_count)
    }

    /// The single layout shared by every subresource in the range, if any.
    pub fn uniform_layout(
        &self,
        base_mip: u32,
        mip_count: u32,
        base_layer: u32,
        layer_count: u32,
    ) -> Option<TextureLayout> {
        let first = self.get(base_mip, base_layer);
        for layer in base_layer..base_layer + layer_count {
            for mip in base_mip..base_mip + mip_count {
                if self.get(mip, layer) != first {
                    return None;
                }
            }
        }
        Some(first)
    }

    /// Set the layout of every subresource in the range.
    pub fn set_range(
        &mut self,
        base_mip: u32,
        mip_count: u32,
        base_layer: u32,
        layer_count: u32,
        layout: TextureLayout,
    ) {
        for layer in base_layer..base_layer + layer_count {
            for mip in base_mip..base_mip + mip_count {
                let index = self.index(mip, layer);
                self.layouts[index] = layout;
            }
        }
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_empty_buffer_state_is_undefined() {
        assert_eq!(buffer_state(BufferStates::UNDEFINED), NativeState::UNDEFINED);
    }

    #[test]
    fn test_buffer_state_fold() {
        let state = buffer_state(BufferStates::VERTEX_BUFFER | BufferStates::INDEX_BUFFER);
        assert_eq!(state.stage, vk::PipelineStageFlags2::VERTEX_INPUT);
        assert_eq!(
            state.access,
            vk::AccessFlags2::VERTEX_ATTRIBUTE_READ | vk::AccessFlags2::INDEX_READ
        );

        let state = buffer_state(BufferStates::COPY_DEST | BufferStates::SHADER_RESOURCE);
        assert_eq!(
            state.stage,
            vk::PipelineStageFlags2::TRANSFER | vk::PipelineStageFlags2::ALL_COMMANDS
        );
        assert_eq!(state.layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn test_buffer_table_covers_every_bit() {
        let covered = BUFFER_STATE_TABLE
            .iter()
            .fold(BufferStates::empty(), |acc, (bit, _)| acc | *bit);
        assert_eq!(covered, BufferStates::all());
    }

    #[rstest]
    #[case::copy_dest(TextureLayout::CopyDest, false, vk::ImageLayout::TRANSFER_DST_OPTIMAL)]
    #[case::shader(TextureLayout::ShaderResource, false, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)]
    #[case::uav(TextureLayout::UnorderedAccess, false, vk::ImageLayout::GENERAL)]
    #[case::rt(TextureLayout::RenderTarget, false, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)]
    #[case::depth_write(TextureLayout::DepthWrite, false, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)]
    #[case::depth_write_only(TextureLayout::DepthWrite, true, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)]
    #[case::depth_read(TextureLayout::DepthRead, false, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)]
    #[case::depth_read_only(TextureLayout::DepthRead, true, vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL)]
    #[case::present(TextureLayout::Present, false, vk::ImageLayout::PRESENT_SRC_KHR)]
    fn test_texture_layouts(
        #[case] layout: TextureLayout,
        #[case] depth_only: bool,
        #[case] expected: vk::ImageLayout,
    ) {
        assert_eq!(texture_state(layout, depth_only).layout, expected);
    }

    #[test]
    fn test_depth_states_cover_both_test_stages() {
        let state = texture_state(TextureLayout::DepthRead, true);
        assert!(state.stage.contains(vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS));
        assert!(state.stage.contains(vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS));
        assert!(!state.access.contains(vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn test_subresource_indexing() {
        let mut layouts = SubresourceLayouts::new(4, 3, TextureLayout::Undefined);
        layouts.set_range(1, 2, 2, 1, TextureLayout::ShaderResource);

        assert_eq!(layouts.get(0, 2), TextureLayout::Undefined);
        assert_eq!(layouts.get(1, 2), TextureLayout::ShaderResource);
        assert_eq!(layouts.get(2, 2), TextureLayout::ShaderResource);
        assert_eq!(layouts.get(3, 2), TextureLayout::Undefined);
        assert_eq!(layouts.get(1, 1), TextureLayout::Undefined);
    }

    #[test]
    fn test_uniform_layout() {
        let mut layouts = SubresourceLayouts::new(2, 2, TextureLayout::CopyDest);
        assert_eq!(layouts.uniform_layout(0, 2, 0, 2), Some(TextureLayout::CopyDest));

        layouts.set_range(1, 1, 1, 1, TextureLayout::RenderTarget);
        assert_eq!(layouts.uniform_layout(0, 2, 0, 2), None);
        assert_eq!(layouts.uniform_layout(0, 1, 0, 2), Some(TextureLayout::CopyDest));
    }

    #[rstest]
    #[case::all(0, 0, 0, 0, (0, 5, 0, 6))]
    #[case::tail(2, 0, 4, 0, (2, 3, 4, 2))]
    #[case::clamped(3, 10, 5, 10, (3, 2, 5, 1))]
    fn test_clamp_range(
        #[case] base_mip: u32,
        #[case] mips: u32,
        #[case] base_layer: u32,
        #[case] layers: u32,
        #[case] expected: (u32, u32, u32, u32),
    ) {
        let layouts = SubresourceLayouts::new(5, 6, TextureLayout::Undefined);
        assert_eq!(layouts.clamp_range(base_mip, mips, base_layer, layers), expected);
    }
}
