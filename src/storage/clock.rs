use super::{BufferFrame, FrameID, MAX_CLOCK_PASSES};

/// Generalized clock. Every unpinned frame carries a reference value
/// which the hand decrements as it passes; a frame is chosen once the hand
/// finds it unpinned with a reference value of zero.
pub struct GClockReplacer {
    /// clock handle, next frame to inspect
    handle: usize,
    size: usize,
}

impl GClockReplacer {
    pub fn new(size: usize) -> Self {
        Self { handle: 0, size }
    }

    pub fn handle(&self) -> usize {
        self.handle
    }

    /// advance the clock handle, return the old handle
    fn advance(&mut self) -> usize {
        let handle = self.handle;
        self.handle += 1;
        if self.handle == self.size {
            self.handle = 0;
        }
        handle
    }

    /// Sweep at most `MAX_CLOCK_PASSES` times around `frames`. The handle
    /// is left just past the chosen frame. A frame whose page lock is held
    /// by someone else is in use and gets skipped like a pinned one.
    pub fn victim(&mut self, frames: &mut [BufferFrame]) -> Option<FrameID> {
        debug_assert_eq!(frames.len(), self.size);
        for _ in 0..MAX_CLOCK_PASSES {
            for _ in 0..self.size {
                let handle = self.advance();
                let frame = &mut frames[handle];
                if frame.is_pinned() || frame.is_latched() {
                    continue;
                }
                if frame.reference_value() == 0 {
                    return Some(handle);
                }
                frame.decay_reference();
            }
        }
        None
    }
}
