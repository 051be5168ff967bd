//! Epoch-stamped visited set for graph traversal.
//!
//! Marking is O(1) array indexing; resetting bumps the epoch instead of clearing the array.

/// Visited marks for node ids `0..capacity`.
///
/// A slot is visited when it holds the current epoch. The array is only zeroed when the
/// u16 epoch wraps.
#[derive(Debug, Default)]
pub struct VisitedSet {
    stamps: Vec<u16>,
    epoch: u16,
}

impl VisitedSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            stamps: vec![0; capacity],
            epoch: 1,
        }
    }

    /// Forget every mark.
    pub fn reset(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        if self.epoch == 0 {
            self.stamps.fill(0);
            self.epoch = 1;
        }
    }

    /// Grow to cover ids below `capacity`. New slots start unvisited.
    pub fn grow_to(&mut self, capacity: usize) {
        if capacity > self.stamps.len() {
            self.stamps.resize(capacity, 0);
        }
    }

    /// Mark `id`. Returns `true` the first time `id` is seen since the last reset.
    #[inline]
    pub fn mark(&mut self, id: u32) -> bool {
        let slot = &mut self.stamps[id as usize];
        if *slot == self.epoch {
            return false;
        }
        *slot = self.epoch;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_reset() {
        let mut vs = VisitedSet::with_capacity(8);
        assert!(vs.mark(3));
        assert!(!vs.mark(3));
        vs.reset();
        assert!(vs.mark(3));
    }

    #[test]
    fn test_epoch_wrap_clears_stamps() {
        let mut vs = VisitedSet::with_capacity(4);
        for _ in 0..(u16::MAX - 1) {
            vs.reset();
        }
        assert_eq!(vs.epoch, u16::MAX);
        vs.mark(2);
        vs.reset();
        assert_eq!(vs.epoch, 1);
        assert!(vs.mark(2));
    }

    #[test]
    fn test_grow_to() {
        let mut vs = VisitedSet::default();
        vs.grow_to(10);
        vs.reset();
        assert!(vs.mark(9));
    }
}
