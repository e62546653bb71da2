//! GPU memory allocator integration using gpu-allocator.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::types::MemoryType;

/// Create a memory allocator for the Vulkan device.
pub fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    buffer_device_address: bool,
) -> Result<Allocator, GraphicsError> {
    let allocator = Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device,
        physical_device,
        debug_settings: gpu_allocator::AllocatorDebugSettings {
            log_leaks_on_shutdown: false,
            ..Default::default()
        },
        buffer_device_address,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create memory allocator: {}", e))
    })?;

    Ok(allocator)
}

/// Memory location for a residency class.
pub fn memory_location(memory_type: MemoryType) -> MemoryLocation {
    match memory_type {
        MemoryType::Private => MemoryLocation::GpuOnly,
        MemoryType::Upload => MemoryLocation::CpuToGpu,
        MemoryType::Readback => MemoryLocation::GpuToCpu,
    }
}

/// The device's pooled allocator plus outstanding allocation statistics.
///
/// The inner allocator is taken out on teardown so that it is dropped
/// before the logical device.
pub struct MemoryAllocator {
    inner: Mutex<Option<Allocator>>,
    allocated_bytes: AtomicU64,
    allocation_count: AtomicUsize,
}

impl std::fmt::Debug for MemoryAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAllocator")
            .field("allocated_bytes", &self.allocated_bytes())
            .field("allocation_count", &self.allocation_count())
            .finish()
    }
}

impl MemoryAllocator {
    pub fn new(allocator: Allocator) -> Self {
        Self {
            inner: Mutex::new(Some(allocator)),
            allocated_bytes: AtomicU64::new(0),
            allocation_count: AtomicUsize::new(0),
        }
    }

    /// Allocate memory satisfying `requirements`.
    pub fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        memory_type: MemoryType,
        linear: bool,
    ) -> Result<Allocation, GraphicsError> {
        let mut guard = self.inner.lock();
        let allocator = guard.as_mut().ok_or_else(|| {
            GraphicsError::Internal("Memory allocator already destroyed".to_string())
        })?;

        let allocation = allocator
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: memory_location(memory_type),
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| match e {
                gpu_allocator::AllocationError::OutOfMemory => GraphicsError::OutOfMemory,
                other => GraphicsError::ResourceCreationFailed(format!(
                    "Failed to allocate memory for {}: {}",
                    name, other
                )),
            })?;

        self.allocated_bytes
            .fetch_add(allocation.size(), Ordering::Relaxed);
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
        Ok(allocation)
    }

    /// Return an allocation to the pool.
    pub fn free(&self, allocation: Allocation) {
        let size = allocation.size();
        let mut guard = self.inner.lock();
        let Some(allocator) = guard.as_mut() else {
            log::warn!("Allocation freed after allocator teardown");
            return;
        };
        match allocator.free(allocation) {
            Ok(()) => {
                self.allocated_bytes.fetch_sub(size, Ordering::Relaxed);
                self.allocation_count.fetch_sub(1, Ordering::Relaxed);
            }
            Err(e) => log::error!("Failed to free allocation: {}", e),
        }
    }

    /// Bytes currently allocated through this allocator.
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes.load(Ordering::Relaxed)
    }

    /// Number of live allocations.
    pub fn allocation_count(&self) -> usize {
        self.allocation_count.load(Ordering::Relaxed)
    }

    /// Log leaked memory and drop the inner allocator.
    pub fn destroy(&self) {
        let leaked = self.allocated_bytes();
        if leaked > 0 {
            log::warn!("Total device memory leaked: {} bytes", leaked);
        }
        if let Some(allocator) = self.inner.lock().take() {
            if leaked > 0 {
                allocator.report_memory_leaks(log::Level::Warn);
            }
            drop(allocator);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_locations() {
        assert_eq!(memory_location(MemoryType::Private), MemoryLocation::GpuOnly);
        assert_eq!(memory_location(MemoryType::Upload), MemoryLocation::CpuToGpu);
        assert_eq!(memory_location(MemoryType::Readback), MemoryLocation::GpuToCpu);
    }
}
