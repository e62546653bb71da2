//! Query heap types.

/// Kind of queries stored in a query heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueryType {
    /// Number of samples that passed depth and stencil tests.
    #[default]
    Occlusion,
    /// Non-zero if any sample passed.
    BinaryOcclusion,
    /// GPU timestamp, see `GraphicsDevice::timestamp_frequency`.
    Timestamp,
    /// Pipeline statistics counters.
    PipelineStatistics,
}

/// Number of pipeline statistics counters written per query.
pub const PIPELINE_STATISTICS_COUNT: u32 = 11;

/// Counters added when mesh shaders are available.
pub const PIPELINE_STATISTICS_MESH_COUNT: u32 = 2;

/// Descriptor for creating a query heap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QueryHeapDescriptor {
    pub label: Option<String>,
    pub ty: QueryType,
    pub count: u32,
}

impl QueryHeapDescriptor {
    pub fn new(ty: QueryType, count: u32) -> Self {
        Self {
            label: None,
            ty,
            count,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Size in bytes of one resolved query result.
pub fn query_result_size(ty: QueryType, mesh_shader: bool) -> u32 {
    let counters = match ty {
        QueryType::PipelineStatistics if mesh_shader => {
            PIPELINE_STATISTICS_COUNT + PIPELINE_STATISTICS_MESH_COUNT
        }
        QueryType::PipelineStatistics => PIPELINE_STATISTICS_COUNT,
        _ => 1,
    };
    counters * std::mem::size_of::<u64>() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::occlusion(QueryType::Occlusion, false, 8)]
    #[case::timestamp(QueryType::Timestamp, true, 8)]
    #[case::statistics(QueryType::PipelineStatistics, false, 88)]
    #[case::statistics_mesh(QueryType::PipelineStatistics, true, 104)]
    fn test_query_result_size(#[case] ty: QueryType, #[case] mesh: bool, #[case] expected: u32) {
        assert_eq!(query_result_size(ty, mesh), expected);
    }
}
