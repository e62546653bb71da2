//! GPU query heap.

use std::sync::Arc;

use ash::vk;

use crate::backend::vulkan::conversion::convert_query_type;
use crate::backend::vulkan::deferred::DeferredResource;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::{QueryHeapDescriptor, QueryType, query_result_size};

/// Counters collected by pipeline statistics queries, in result order.
pub(crate) fn pipeline_statistics_flags(mesh_shader: bool) -> vk::QueryPipelineStatisticFlags {
    let mut flags = vk::QueryPipelineStatisticFlags::INPUT_ASSEMBLY_VERTICES
        | vk::QueryPipelineStatisticFlags::INPUT_ASSEMBLY_PRIMITIVES
        | vk::QueryPipelineStatisticFlags::VERTEX_SHADER_INVOCATIONS
        | vk::QueryPipelineStatisticFlags::GEOMETRY_SHADER_INVOCATIONS
        | vk::QueryPipelineStatisticFlags::GEOMETRY_SHADER_PRIMITIVES
        | vk::QueryPipelineStatisticFlags::CLIPPING_INVOCATIONS
        | vk::QueryPipelineStatisticFlags::CLIPPING_PRIMITIVES
        | vk::QueryPipelineStatisticFlags::FRAGMENT_SHADER_INVOCATIONS
        | vk::QueryPipelineStatisticFlags::TESSELLATION_CONTROL_SHADER_PATCHES
        | vk::QueryPipelineStatisticFlags::TESSELLATION_EVALUATION_SHADER_INVOCATIONS
        | vk::QueryPipelineStatisticFlags::COMPUTE_SHADER_INVOCATIONS;
    if mesh_shader {
        flags |= vk::QueryPipelineStatisticFlags::TASK_SHADER_INVOCATIONS_EXT
            | vk::QueryPipelineStatisticFlags::MESH_SHADER_INVOCATIONS_EXT;
    }
    flags
}

/// A pool of occlusion, timestamp or pipeline statistics queries.
///
/// Every query is reset on the GPU before the heap is handed out. Results
/// are resolved into a buffer with `CommandBuffer::resolve_queries` or read
/// back on the host with [`QueryHeap::read_results`].
pub struct QueryHeap {
    device: Arc<GraphicsDevice>,
    descriptor: QueryHeapDescriptor,
    result_size: u32,
    handle: vk::QueryPool,
}

impl QueryHeap {
    pub(crate) fn new(device: &Arc<GraphicsDevice>, descriptor: &QueryHeapDescriptor) -> Arc<Self> {
        let mesh_shader = device.features().mesh_shader;
        let handle = match Self::create_handle(device, descriptor, mesh_shader) {
            Ok(handle) => {
                if let Some(label) = &descriptor.label {
                    device.debug_names().set_object_name(handle, label);
                }
                log::trace!(
                    "Created {:?} query heap {:?} with {} queries",
                    descriptor.ty,
                    descriptor.label,
                    descriptor.count
                );
                handle
            }
            Err(e) => {
                log::error!("Failed to create query heap {:?}: {}", descriptor.label, e);
                vk::QueryPool::null()
            }
        };

        Arc::new(Self {
            device: Arc::clone(device),
            descriptor: descriptor.clone(),
            result_size: query_result_size(descriptor.ty, mesh_shader),
            handle,
        })
    }

    fn create_handle(
        device: &GraphicsDevice,
        descriptor: &QueryHeapDescriptor,
        mesh_shader: bool,
    ) -> Result<vk::QueryPool, GraphicsError> {
        if descriptor.count == 0 {
            return Err(GraphicsError::InvalidParameter(
                "query count must be non-zero".to_string(),
            ));
        }
        if descriptor.ty == QueryType::PipelineStatistics
            && !device.features().pipeline_statistics_query
        {
            return Err(GraphicsError::FeatureNotSupported(
                "pipeline statistics queries".to_string(),
            ));
        }

        let mut info = vk::QueryPoolCreateInfo::default()
            .query_type(convert_query_type(descriptor.ty))
            .query_count(descriptor.count);
        if descriptor.ty == QueryType::PipelineStatistics {
            info = info.pipeline_statistics(pipeline_statistics_flags(mesh_shader));
        }
        let handle = unsafe { device.raw().create_query_pool(&info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create query pool: {:?}", e))
        })?;

        if let Err(e) = Self::reset_on_gpu(device, handle, descriptor.count) {
            unsafe { device.raw().destroy_query_pool(handle, None) };
            return Err(e);
        }
        Ok(handle)
    }

    fn reset_on_gpu(
        device: &GraphicsDevice,
        handle: vk::QueryPool,
        count: u32,
    ) -> Result<(), GraphicsError> {
        let copy_allocator = device.copy_allocator();
        let context = copy_allocator.allocate(device, 0)?;
        unsafe {
            device
                .raw()
                .cmd_reset_query_pool(context.transition_command_buffer(), handle, 0, count);
        }
        copy_allocator.submit(device, context)
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    pub fn ty(&self) -> QueryType {
        self.descriptor.ty
    }

    pub fn count(&self) -> u32 {
        self.descriptor.count
    }

    /// Bytes written per resolved query.
    pub fn result_size(&self) -> u32 {
        self.result_size
    }

    pub fn is_valid(&self) -> bool {
        self.handle != vk::QueryPool::null()
    }

    /// Read results of `first..first + count` without waiting.
    ///
    /// Returns `Ok(false)` when some results are not available yet, in which
    /// case `results` is left unspecified. `results` must hold
    /// `count * result_size / 8` values.
    pub fn read_results(
        &self,
        first: u32,
        count: u32,
        results: &mut [u64],
    ) -> Result<bool, GraphicsError> {
        let per_query = (self.result_size / 8) as usize;
        if first.saturating_add(count) > self.count() || results.len() < count as usize * per_query
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "query range {}..{} does not fit heap of {} or output of {} values",
                first,
                first.saturating_add(count),
                self.count(),
                results.len()
            )));
        }
        if !self.is_valid() {
            return Err(GraphicsError::InvalidParameter(
                "query heap is invalid".to_string(),
            ));
        }
        let data = &mut results[..count as usize * per_query];
        let device = self.device.raw();
        // Per-query stride differs from the element size for statistics queries.
        let result = unsafe {
            (device.fp_v1_0().get_query_pool_results)(
                device.handle(),
                self.handle,
                first,
                count,
                std::mem::size_of_val(data),
                data.as_mut_ptr().cast(),
                self.result_size as vk::DeviceSize,
                vk::QueryResultFlags::TYPE_64,
            )
        };
        match result {
            vk::Result::SUCCESS => Ok(true),
            vk::Result::NOT_READY => Ok(false),
            e => Err(e.into()),
        }
    }

    pub(crate) fn handle(&self) -> vk::QueryPool {
        self.handle
    }
}

impl Drop for QueryHeap {
    fn drop(&mut self) {
        if self.is_valid() {
            self.device.defer_destroy(DeferredResource::QueryPool(self.handle));
        }
    }
}

impl std::fmt::Debug for QueryHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHeap")
            .field("ty", &self.descriptor.ty)
            .field("count", &self.descriptor.count)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(QueryHeap: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PIPELINE_STATISTICS_COUNT, PIPELINE_STATISTICS_MESH_COUNT};

    #[test]
    fn test_statistics_flags_match_counter_count() {
        assert_eq!(
            pipeline_statistics_flags(false).as_raw().count_ones(),
            PIPELINE_STATISTICS_COUNT
        );
        assert_eq!(
            pipeline_statistics_flags(true).as_raw().count_ones(),
            PIPELINE_STATISTICS_COUNT + PIPELINE_STATISTICS_MESH_COUNT
        );
    }
}
