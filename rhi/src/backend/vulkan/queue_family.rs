//! Queue family selection.
//!
//! Queues are assigned greedily from the families the adapter reports. Every
//! successful match consumes one queue from the family, so two roles only land
//! on the same family/index when the fallback rules say so.

use ash::vk;

use crate::error::GraphicsError;
use crate::types::QueueType;

/// Capabilities of one queue family as seen by the selection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyCaps {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    /// Codec operations supported by video queues of this family.
    pub video_codecs: vk::VideoCodecOperationFlagsKHR,
    /// Whether queues of this family can present to the target surface.
    pub present_support: bool,
}

impl QueueFamilyCaps {
    pub fn new(flags: vk::QueueFlags, queue_count: u32) -> Self {
        Self {
            flags,
            queue_count,
            video_codecs: vk::VideoCodecOperationFlagsKHR::NONE,
            present_support: true,
        }
    }
}

const GRAPHICS_PRIORITY: f32 = 0.5;
const COMPUTE_PRIORITY: f32 = 1.0;
const COPY_PRIORITY: f32 = 0.5;
const VIDEO_PRIORITY: f32 = 0.5;

/// Family/index pair of every queue type plus the per-family create requests.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSelection {
    /// `vk::QUEUE_FAMILY_IGNORED` marks an absent queue.
    pub families: [u32; QueueType::COUNT],
    pub indices: [u32; QueueType::COUNT],
    /// Priorities of the queues requested from each family, indexed by family.
    pub priorities: Vec<Vec<f32>>,
}

impl QueueSelection {
    /// Whether a queue of this type exists on the device.
    pub fn has_queue(&self, queue: QueueType) -> bool {
        self.families[queue.index()] != vk::QUEUE_FAMILY_IGNORED
    }

    /// Family of a queue type.
    pub fn family(&self, queue: QueueType) -> u32 {
        self.families[queue.index()]
    }

    /// Index within the family of a queue type.
    pub fn index(&self, queue: QueueType) -> u32 {
        self.indices[queue.index()]
    }

    /// Families that actually receive queues, with their priorities.
    pub fn queue_requests(&self) -> impl Iterator<Item = (u32, &[f32])> {
        self.priorities
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_empty())
            .map(|(family, p)| (family as u32, p.as_slice()))
    }
}

struct Selector {
    families: Vec<QueueFamilyCaps>,
    priorities: Vec<Vec<f32>>,
}

impl Selector {
    fn find_vacant(
        &mut self,
        required: vk::QueueFlags,
        ignored: vk::QueueFlags,
        priority: f32,
    ) -> Option<(u32, u32)> {
        for (i, family) in self.families.iter_mut().enumerate() {
            if family.flags.intersects(ignored) {
                continue;
            }
            if required.contains(vk::QueueFlags::GRAPHICS) && !family.present_support {
                continue;
            }
            if required.contains(vk::QueueFlags::VIDEO_DECODE_KHR)
                && !family.video_codecs.intersects(
                    vk::VideoCodecOperationFlagsKHR::DECODE_H264
                        | vk::VideoCodecOperationFlagsKHR::DECODE_H265,
                )
            {
                continue;
            }
            if family.queue_count > 0 && family.flags.contains(required) {
                family.queue_count -= 1;
                let index = self.priorities[i].len() as u32;
                self.priorities[i].push(priority);
                return Some((i as u32, index));
            }
        }
        None
    }
}

/// Assign a family and queue index to every queue type.
///
/// Fails only when no family can serve graphics + compute with presentation.
/// The video decode queue is only searched for when `video_decode` is set.
pub fn select_queue_families(
    families: &[QueueFamilyCaps],
    video_decode: bool,
) -> Result<QueueSelection, GraphicsError> {
    let mut selector = Selector {
        families: families.to_vec(),
        priorities: vec![Vec::new(); families.len()],
    };
    let mut result_families = [vk::QUEUE_FAMILY_IGNORED; QueueType::COUNT];
    let mut result_indices = [u32::MAX; QueueType::COUNT];

    let graphics_compute = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;

    let graphics = selector
        .find_vacant(graphics_compute, vk::QueueFlags::empty(), GRAPHICS_PRIORITY)
        .ok_or_else(|| {
            GraphicsError::InitializationFailed(
                "Could not find graphics queue with compute and present".to_string(),
            )
        })?;

    let compute = selector
        .find_vacant(graphics_compute, vk::QueueFlags::empty(), COMPUTE_PRIORITY)
        .or_else(|| {
            selector.find_vacant(
                vk::QueueFlags::COMPUTE,
                vk::QueueFlags::empty(),
                COMPUTE_PRIORITY,
            )
        })
        .unwrap_or(graphics);

    let copy = selector
        .find_vacant(vk::QueueFlags::TRANSFER, graphics_compute, COPY_PRIORITY)
        .or_else(|| {
            selector.find_vacant(
                vk::QueueFlags::COMPUTE,
                vk::QueueFlags::GRAPHICS,
                COPY_PRIORITY,
            )
        })
        .unwrap_or(compute);

    let video = if video_decode {
        selector.find_vacant(
            vk::QueueFlags::VIDEO_DECODE_KHR,
            vk::QueueFlags::empty(),
            VIDEO_PRIORITY,
        )
    } else {
        None
    };

    for (queue, assignment) in [
        (QueueType::Graphics, Some(graphics)),
        (QueueType::Compute, Some(compute)),
        (QueueType::Copy, Some(copy)),
        (QueueType::VideoDecode, video),
    ] {
        if let Some((family, index)) = assignment {
            result_families[queue.index()] = family;
            result_indices[queue.index()] = index;
        }
    }

    Ok(QueueSelection {
        families: result_families,
        indices: result_indices,
        priorities: selector.priorities,
    })
}

/// Unique, present queue families among `families`, in first-seen order.
pub fn unique_families(families: &[u32]) -> Vec<u32> {
    let mut unique = Vec::with_capacity(families.len());
    for &family in families {
        if family != vk::QUEUE_FAMILY_IGNORED && !unique.contains(&family) {
            unique.push(family);
        }
    }
    unique
}

/// Sharing mode for resources used from the given queue families.
///
/// More than one family means concurrent sharing with the returned indices.
pub fn sharing_mode(families: &[u32]) -> (vk::SharingMode, Vec<u32>) {
    let unique = unique_families(families);
    if unique.len() > 1 {
        (vk::SharingMode::CONCURRENT, unique)
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const GCT: vk::QueueFlags = vk::QueueFlags::from_raw(
        vk::QueueFlags::GRAPHICS.as_raw()
            | vk::QueueFlags::COMPUTE.as_raw()
            | vk::QueueFlags::TRANSFER.as_raw(),
    );
    const CT: vk::QueueFlags =
        vk::QueueFlags::from_raw(vk::QueueFlags::COMPUTE.as_raw() | vk::QueueFlags::TRANSFER.as_raw());

    #[test]
    fn test_single_family_single_queue_falls_back() {
        let families = [QueueFamilyCaps::new(GCT, 1)];
        let selection = select_queue_families(&families, false).unwrap();

        assert_eq!(selection.family(QueueType::Graphics), 0);
        assert_eq!(selection.family(QueueType::Compute), 0);
        assert_eq!(selection.family(QueueType::Copy), 0);
        assert_eq!(selection.index(QueueType::Compute), selection.index(QueueType::Graphics));
        assert_eq!(selection.index(QueueType::Copy), selection.index(QueueType::Graphics));
        assert!(!selection.has_queue(QueueType::VideoDecode));

        // Only one queue is requested, no duplicate allocation.
        let requests: Vec<_> = selection.queue_requests().collect();
        assert_eq!(requests, vec![(0, [GRAPHICS_PRIORITY].as_slice())]);
    }

    #[test]
    fn test_single_family_many_queues() {
        let families = [QueueFamilyCaps::new(GCT, 16)];
        let selection = select_queue_families(&families, false).unwrap();

        assert_eq!(selection.index(QueueType::Graphics), 0);
        assert_eq!(selection.index(QueueType::Compute), 1);
        // Copy ignores graphics families, so it shares the compute queue.
        assert_eq!(selection.index(QueueType::Copy), 1);
        assert_eq!(selection.priorities[0], vec![GRAPHICS_PRIORITY, COMPUTE_PRIORITY]);
    }

    #[test]
    fn test_dedicated_families() {
        let families = [
            QueueFamilyCaps::new(GCT, 1),
            QueueFamilyCaps::new(CT, 2),
            QueueFamilyCaps::new(vk::QueueFlags::TRANSFER, 1),
        ];
        let selection = select_queue_families(&families, false).unwrap();

        assert_eq!(selection.family(QueueType::Graphics), 0);
        assert_eq!(selection.family(QueueType::Compute), 1);
        assert_eq!(selection.family(QueueType::Copy), 2);
        assert_eq!(selection.queue_requests().count(), 3);
    }

    #[test]
    fn test_copy_falls_back_to_async_compute_family() {
        let families = [QueueFamilyCaps::new(GCT, 1), QueueFamilyCaps::new(CT, 2)];
        let selection = select_queue_families(&families, false).unwrap();

        assert_eq!(selection.family(QueueType::Compute), 1);
        assert_eq!(selection.index(QueueType::Compute), 0);
        assert_eq!(selection.family(QueueType::Copy), 1);
        assert_eq!(selection.index(QueueType::Copy), 1);
    }

    #[test]
    fn test_graphics_requires_present() {
        let mut no_present = QueueFamilyCaps::new(GCT, 1);
        no_present.present_support = false;
        let families = [no_present, QueueFamilyCaps::new(GCT, 1)];
        let selection = select_queue_families(&families, false).unwrap();
        assert_eq!(selection.family(QueueType::Graphics), 1);
    }

    #[test]
    fn test_no_graphics_family_fails() {
        let families = [QueueFamilyCaps::new(CT, 4)];
        let result = select_queue_families(&families, false);
        assert!(matches!(result, Err(GraphicsError::InitializationFailed(_))));
    }

    #[rstest]
    #[case::h264(vk::VideoCodecOperationFlagsKHR::DECODE_H264, true)]
    #[case::h265(vk::VideoCodecOperationFlagsKHR::DECODE_H265, true)]
    #[case::none(vk::VideoCodecOperationFlagsKHR::NONE, false)]
    fn test_video_decode_requires_codec(
        #[case] codecs: vk::VideoCodecOperationFlagsKHR,
        #[case] expected: bool,
    ) {
        let mut video = QueueFamilyCaps::new(vk::QueueFlags::VIDEO_DECODE_KHR, 1);
        video.video_codecs = codecs;
        let families = [QueueFamilyCaps::new(GCT, 1), video];
        let selection = select_queue_families(&families, true).unwrap();
        assert_eq!(selection.has_queue(QueueType::VideoDecode), expected);
    }

    #[test]
    fn test_video_decode_skipped_without_extension() {
        let mut video = QueueFamilyCaps::new(vk::QueueFlags::VIDEO_DECODE_KHR, 1);
        video.video_codecs = vk::VideoCodecOperationFlagsKHR::DECODE_H264;
        let families = [QueueFamilyCaps::new(GCT, 1), video];
        let selection = select_queue_families(&families, false).unwrap();
        assert!(!selection.has_queue(QueueType::VideoDecode));
    }

    #[rstest]
    #[case::same(&[0, 0, 0], vk::SharingMode::EXCLUSIVE, &[])]
    #[case::ignored(&[0, vk::QUEUE_FAMILY_IGNORED], vk::SharingMode::EXCLUSIVE, &[])]
    #[case::distinct(&[0, 1, 0, 2], vk::SharingMode::CONCURRENT, &[0, 1, 2])]
    fn test_sharing_mode(
        #[case] families: &[u32],
        #[case] mode: vk::SharingMode,
        #[case] indices: &[u32],
    ) {
        let (actual_mode, actual_indices) = sharing_mode(families);
        assert_eq!(actual_mode, mode);
        assert_eq!(actual_indices, indices);
    }
}
