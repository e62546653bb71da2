//! Native backend.
//!
//! Only Vulkan is implemented. These are internals exposed for benchmarks;
//! the public object model lives at the crate root.

pub mod vulkan;
