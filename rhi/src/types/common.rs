//! Common types shared across the RHI.

use bytemuck::{Pod, Zeroable};

/// Special size value meaning "from offset to the end of the resource".
pub const WHOLE_SIZE: u64 = u64::MAX;

/// Maximum number of simultaneously bound color attachments.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// Maximum number of bind groups a pipeline layout may reference.
pub const MAX_BIND_GROUPS: usize = 8;

/// Maximum number of vertex buffer slots.
pub const MAX_VERTEX_BUFFER_BINDINGS: usize = 8;

/// Maximum number of viewports and scissors set by a single call.
pub const MAX_VIEWPORTS_AND_SCISSORS: usize = 16;

// ============================================================================
// Queues
// ============================================================================

/// The hardware queue a command buffer or submission targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueueType {
    /// Graphics + compute + present capable queue.
    #[default]
    Graphics,
    /// Async compute queue.
    Compute,
    /// Transfer-only queue used for uploads.
    Copy,
    /// Video decode queue (optional).
    VideoDecode,
}

impl QueueType {
    /// Number of queue types.
    pub const COUNT: usize = 4;

    /// All queue types in index order.
    pub const ALL: [QueueType; Self::COUNT] = [
        QueueType::Graphics,
        QueueType::Compute,
        QueueType::Copy,
        QueueType::VideoDecode,
    ];

    /// Index of this queue type in per-queue arrays.
    pub const fn index(self) -> usize {
        self as usize
    }
}

// ============================================================================
// Adapter classification
// ============================================================================

/// Physical device classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AdapterType {
    /// Dedicated GPU.
    DiscreteGpu,
    /// GPU integrated with the CPU.
    IntegratedGpu,
    /// Virtualized GPU.
    VirtualGpu,
    /// Software rasterizer.
    Cpu,
    /// Anything else.
    #[default]
    Other,
}

/// Preference used when picking an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PowerPreference {
    /// No preference, the first suitable adapter wins.
    #[default]
    Undefined,
    /// Prefer integrated GPUs.
    LowPower,
    /// Prefer discrete GPUs.
    HighPerformance,
}

// ============================================================================
// Geometry
// ============================================================================

/// RGBA color with float components.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    /// Create a new color.
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Components as an array.
    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Viewport configuration for rendering.
///
/// The RHI uses the D3D convention: origin at the top-left corner and a
/// `[0, 1]` depth range. The Vulkan backend flips the viewport height so that
/// shaders written for that convention work unchanged.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

impl Viewport {
    /// Create a new viewport with the standard `[0, 1]` depth range.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    /// Create a viewport from dimensions with origin at (0, 0).
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }

    /// Set the depth range.
    pub fn with_depth_range(mut self, min_depth: f32, max_depth: f32) -> Self {
        self.min_depth = min_depth;
        self.max_depth = max_depth;
        self
    }
}

/// Integer rectangle used for scissors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl ScissorRect {
    /// Create a new scissor rectangle.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// 3D extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
}

impl Default for Extent3d {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        }
    }
}

impl Extent3d {
    /// Create a new extent.
    pub const fn new(width: u32, height: u32, depth_or_array_layers: u32) -> Self {
        Self {
            width,
            height,
            depth_or_array_layers,
        }
    }
}

// ============================================================================
// Render pass operations
// ============================================================================

/// What happens to an attachment at the start of a render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadAction {
    /// Preserve existing contents.
    Load,
    /// Clear to the attachment's clear value.
    #[default]
    Clear,
    /// Contents are undefined.
    Discard,
}

/// What happens to an attachment at the end of a render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreAction {
    /// Write results to memory.
    #[default]
    Store,
    /// Results may be discarded.
    Discard,
}

/// Index element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexType {
    Uint16,
    #[default]
    Uint32,
}

impl IndexType {
    /// Size of one index in bytes.
    pub const fn size(self) -> u64 {
        match self {
            Self::Uint16 => 2,
            Self::Uint32 => 4,
        }
    }
}

/// Debug and validation configuration for the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValidationMode {
    /// No validation layer, no messenger.
    #[default]
    Disabled,
    /// Khronos validation layer, warnings and errors are logged.
    Enabled,
    /// Like [`ValidationMode::Enabled`] and info/verbose messages as well.
    Verbose,
}

// ============================================================================
// Indirect arguments
// ============================================================================

/// Arguments of a non-indexed indirect draw (16 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct DrawIndirectArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

impl DrawIndirectArgs {
    /// Size of the struct in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

/// Arguments of an indexed indirect draw (20 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct DrawIndexedIndirectArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

impl DrawIndexedIndirectArgs {
    /// Size of the struct in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

/// Arguments of an indirect dispatch (12 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct DispatchIndirectArgs {
    pub group_count_x: u32,
    pub group_count_y: u32,
    pub group_count_z: u32,
}

impl DispatchIndirectArgs {
    /// Size of the struct in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

static_assertions::const_assert_eq!(DrawIndirectArgs::SIZE, 16);
static_assertions::const_assert_eq!(DrawIndexedIndirectArgs::SIZE, 20);
static_assertions::const_assert_eq!(DispatchIndirectArgs::SIZE, 12);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_type_indices_are_dense() {
        for (i, queue) in QueueType::ALL.iter().enumerate() {
            assert_eq!(queue.index(), i);
        }
    }

    #[test]
    fn test_indirect_args_bytes() {
        let args = DrawIndexedIndirectArgs {
            index_count: 36,
            instance_count: 2,
            first_index: 0,
            base_vertex: -1,
            first_instance: 0,
        };
        let bytes = bytemuck::bytes_of(&args);
        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[0..4], &36u32.to_ne_bytes());
        assert_eq!(&bytes[12..16], &(-1i32).to_ne_bytes());
    }

    #[test]
    fn test_viewport_default_depth_range() {
        let viewport = Viewport::from_dimensions(1280, 720);
        assert_eq!(viewport.width, 1280.0);
        assert_eq!(viewport.min_depth, 0.0);
        assert_eq!(viewport.max_depth, 1.0);
    }
}
