//! Native Vulkan backend implementation using ash.
//!
//! These modules hold the pieces that talk to the driver directly: instance
//! creation, feature negotiation, format and state translation, barrier
//! batching, memory allocation and deferred destruction. The public objects
//! in the crate root are thin owners built on top of them.

pub mod allocator;
pub mod barriers;
pub mod conversion;
pub mod debug;
pub mod deferred;
pub mod descriptor;
pub mod dispatch;
pub mod extensions;
pub mod features;
pub mod frame;
pub mod instance;
pub mod queue_family;
pub mod states;
