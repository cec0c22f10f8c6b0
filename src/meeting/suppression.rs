//! Windows the user said "no" to.
//!
//! A suppressed window gets no further consent prompts until the engine
//! reports that its meeting is over.

use std::collections::HashSet;

use crate::engine::WindowId;

#[derive(Debug, Default)]
pub struct SuppressionSet {
    windows: HashSet<WindowId>,
}

impl SuppressionSet {
    pub fn suppress(&mut self, window_id: WindowId) -> bool {
        self.windows.insert(window_id)
    }

    pub fn is_suppressed(&self, window_id: &WindowId) -> bool {
        self.windows.contains(window_id)
    }

    pub fn release(&mut self, window_id: &WindowId) -> bool {
        self.windows.remove(window_id)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Sorted for stable output.
    pub fn windows(&self) -> Vec<WindowId> {
        let mut windows: Vec<_> = self.windows.iter().cloned().collect();
        windows.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        windows
    }
}
