use std::collections::VecDeque;

use crate::stabilize::StabilizedFix;

/// Per-session fix history. Capacity is structural: pushing into a full
/// history drops the oldest entry.
pub const FIX_HISTORY_CAPACITY: usize = 20;

#[derive(Debug, Default, Clone)]
pub struct FixHistory {
    entries: VecDeque<StabilizedFix>,
}

impl FixHistory {
    pub fn new() -> Self {
        FixHistory {
            entries: VecDeque::with_capacity(FIX_HISTORY_CAPACITY),
        }
    }

    pub fn push(&mut self, fix: StabilizedFix) {
        if self.entries.len() == FIX_HISTORY_CAPACITY {
            self.entries.pop_front();
        }

        self.entries.push_back(fix);
    }

    pub fn last(&self) -> Option<&StabilizedFix> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent `count` entries, oldest first.
    pub fn tail(&self, count: usize) -> impl Iterator<Item = &StabilizedFix> {
        self.entries.iter().skip(self.entries.len().saturating_sub(count))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
