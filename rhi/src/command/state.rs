//! Bound pipeline and bind group tracking for an encoder.
//!
//! Bind group changes are only recorded as pending. They are issued to the
//! driver by [`BindState::flush`] right before a draw or dispatch, and only
//! for the groups whose pending value differs from what is already bound.

use ash::vk;

use crate::types::MAX_BIND_GROUPS;

/// A descriptor set plus its dynamic offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BoundGroup {
    pub set: vk::DescriptorSet,
    pub dynamic_offsets: Vec<u32>,
}

/// A run of consecutive bind group indices to bind with one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BindCall {
    pub first_set: u32,
    pub sets: Vec<vk::DescriptorSet>,
    pub dynamic_offsets: Vec<u32>,
}

#[derive(Debug, Default)]
pub(crate) struct BindState {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    pending: [Option<BoundGroup>; MAX_BIND_GROUPS],
    bound: [Option<BoundGroup>; MAX_BIND_GROUPS],
    /// Bit `i` is set when group `i` may need to be rebound.
    dirty: u32,
}

impl BindState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything, as at the start of a command buffer or pass.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn dirty_mask(&self) -> u32 {
        self.dirty
    }

    /// Install a pipeline. Returns whether it differs from the bound one.
    ///
    /// Changing the layout invalidates every bound group, so all pending
    /// groups are marked dirty.
    pub fn set_pipeline(&mut self, pipeline: vk::Pipeline, layout: vk::PipelineLayout) -> bool {
        if self.layout != layout {
            self.layout = layout;
            self.bound = Default::default();
            self.dirty = self
                .pending
                .iter()
                .enumerate()
                .filter(|(_, group)| group.is_some())
                .fold(0, |mask, (index, _)| mask | (1 << index));
        }
        if self.pipeline == pipeline {
            return false;
        }
        self.pipeline = pipeline;
        true
    }

    /// Record a pending bind group. Setting the value already pending is a
    /// no-op.
    pub fn set_bind_group(&mut self, index: usize, group: BoundGroup) {
        debug_assert!(index < MAX_BIND_GROUPS);
        if self.pending[index].as_ref() == Some(&group) {
            return;
        }
        self.pending[index] = Some(group);
        self.dirty |= 1 << index;
    }

    /// Take the bind calls needed before the next draw or dispatch.
    ///
    /// Consecutive dirty groups that differ from the bound value are merged
    /// into one call.
    pub fn flush(&mut self) -> Vec<BindCall> {
        let mut calls: Vec<BindCall> = Vec::new();
        let mut mask = std::mem::take(&mut self.dirty);
        while mask != 0 {
            let index = mask.trailing_zeros() as usize;
            mask &= mask - 1;

            let Some(group) = self.pending[index].clone() else {
                continue;
            };
            if self.bound[index].as_ref() == Some(&group) {
                continue;
            }
            match calls.last_mut() {
                Some(call) if call.first_set as usize + call.sets.len() == index => {
                    call.sets.push(group.set);
                    call.dynamic_offsets.extend_from_slice(&group.dynamic_offsets);
                }
                _ => calls.push(BindCall {
                    first_set: index as u32,
                    sets: vec![group.set],
                    dynamic_offsets: group.dynamic_offsets.clone(),
                }),
            }
            self.bound[index] = Some(group);
        }
        calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn group(raw: u64) -> BoundGroup {
        BoundGroup {
            set: vk::DescriptorSet::from_raw(raw),
            dynamic_offsets: Vec::new(),
        }
    }

    fn layout(raw: u64) -> vk::PipelineLayout {
        vk::PipelineLayout::from_raw(raw)
    }

    #[test]
    fn test_repeated_set_binds_once() {
        let mut state = BindState::new();
        state.set_pipeline(vk::Pipeline::from_raw(1), layout(1));
        state.set_bind_group(0, group(10));
        assert_eq!(state.flush().len(), 1);

        state.set_bind_group(0, group(10));
        state.set_bind_group(0, group(10));
        assert_eq!(state.dirty_mask(), 0);
        assert!(state.flush().is_empty());
    }

    #[test]
    fn test_rebinding_same_group_after_change_back_is_skipped() {
        let mut state = BindState::new();
        state.set_pipeline(vk::Pipeline::from_raw(1), layout(1));
        state.set_bind_group(1, group(10));
        state.flush();

        state.set_bind_group(1, group(11));
        state.set_bind_group(1, group(10));
        assert_eq!(state.dirty_mask(), 0b10);
        assert!(state.flush().is_empty());
    }

    #[test]
    fn test_consecutive_groups_merge() {
        let mut state = BindState::new();
        state.set_pipeline(vk::Pipeline::from_raw(1), layout(1));
        state.set_bind_group(0, group(10));
        state.set_bind_group(1, group(11));
        state.set_bind_group(3, group(13));
        let calls = state.flush();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].first_set, 0);
        assert_eq!(calls[0].sets.len(), 2);
        assert_eq!(calls[1].first_set, 3);
    }

    #[test]
    fn test_layout_change_rebinds_pending_groups() {
        let mut state = BindState::new();
        state.set_pipeline(vk::Pipeline::from_raw(1), layout(1));
        state.set_bind_group(0, group(10));
        state.set_bind_group(2, group(12));
        state.flush();

        assert!(state.set_pipeline(vk::Pipeline::from_raw(2), layout(1)));
        assert!(state.flush().is_empty());

        state.set_pipeline(vk::Pipeline::from_raw(3), layout(2));
        assert_eq!(state.dirty_mask(), 0b101);
        assert_eq!(state.flush().len(), 2);
    }

    #[test]
    fn test_same_pipeline_not_rebound() {
        let mut state = BindState::new();
        assert!(state.set_pipeline(vk::Pipeline::from_raw(1), layout(1)));
        assert!(!state.set_pipeline(vk::Pipeline::from_raw(1), layout(1)));
    }

    #[test]
    fn test_dynamic_offsets_are_concatenated_in_order() {
        let mut state = BindState::new();
        state.set_pipeline(vk::Pipeline::from_raw(1), layout(1));
        state.set_bind_group(
            0,
            BoundGroup {
                set: vk::DescriptorSet::from_raw(10),
                dynamic_offsets: vec![256],
            },
        );
        state.set_bind_group(
            1,
            BoundGroup {
                set: vk::DescriptorSet::from_raw(11),
                dynamic_offsets: vec![512, 768],
            },
        );
        let calls = state.flush();
        assert_eq!(calls[0].dynamic_offsets, vec![256, 512, 768]);
    }
}
