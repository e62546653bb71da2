//! Frame counting and pacing.

/// Default number of frames the CPU may record ahead of the GPU.
pub const DEFAULT_FRAMES_IN_FLIGHT: u32 = 2;

/// Upper bound for frames in flight.
pub const MAX_FRAMES_IN_FLIGHT: u32 = 3;

/// Clamp a requested frames-in-flight count to the supported range.
pub fn clamp_frames_in_flight(requested: u32) -> u32 {
    requested.clamp(1, MAX_FRAMES_IN_FLIGHT)
}

/// Monotonic frame counter with a bounded frames-in-flight window.
///
/// Frame slot `k` owns one fence per queue and one command pool per command
/// buffer. A slot may only be recorded again once the fences signaled by its
/// previous submission have been waited on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePacer {
    frame_count: u64,
    frame_index: u32,
    max_frames_in_flight: u32,
}

impl FramePacer {
    pub fn new(max_frames_in_flight: u32) -> Self {
        Self {
            frame_count: 0,
            frame_index: 0,
            max_frames_in_flight: clamp_frames_in_flight(max_frames_in_flight),
        }
    }

    /// Move to the next frame.
    ///
    /// Returns the slot whose fences must be waited on and reset before the
    /// new frame starts recording, or `None` while the window is not full yet.
    pub fn advance(&mut self) -> Option<u32> {
        self.frame_count += 1;
        self.frame_index = (self.frame_count % self.max_frames_in_flight as u64) as u32;
        (self.frame_count >= self.max_frames_in_flight as u64).then_some(self.frame_index)
    }

    /// Number of frames committed so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Slot currently being recorded.
    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn max_frames_in_flight(&self) -> u32 {
        self.max_frames_in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 1)]
    #[case(1, 1)]
    #[case(2, 2)]
    #[case(8, MAX_FRAMES_IN_FLIGHT)]
    fn test_clamp_frames_in_flight(#[case] requested: u32, #[case] expected: u32) {
        assert_eq!(clamp_frames_in_flight(requested), expected);
    }

    #[test]
    fn test_no_stall_until_window_is_full() {
        let mut pacer = FramePacer::new(3);
        assert_eq!(pacer.advance(), None);
        assert_eq!(pacer.advance(), None);
        assert_eq!(pacer.frame_index(), 2);
        // Third frame reuses slot 0, which the first frame submitted with.
        assert_eq!(pacer.advance(), Some(0));
        assert_eq!(pacer.frame_count(), 3);
    }

    #[test]
    fn test_stall_every_frame_once_full() {
        let mut pacer = FramePacer::new(2);
        let waits: Vec<_> = (0..6).map(|_| pacer.advance()).collect();
        assert_eq!(
            waits,
            vec![None, Some(0), Some(1), Some(0), Some(1), Some(0)]
        );
    }

    #[test]
    fn test_frames_in_flight_plus_one_always_stalls() {
        for max in 1..=MAX_FRAMES_IN_FLIGHT {
            let mut pacer = FramePacer::new(max);
            for _ in 0..max {
                pacer.advance();
            }
            assert!(pacer.advance().is_some());
        }
    }
}
