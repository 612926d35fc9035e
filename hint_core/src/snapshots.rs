//! Text snapshots kept along the current search path.
//!
//! Entry `i` holds the artifact with the choices of layers `0..i` applied.
//! Entry 0 is the original and is never cleared.

/// Fixed-size stack of artifact snapshots, one per search depth.
#[derive(Debug, Clone)]
pub struct SnapshotStack {
    entries: Vec<Option<String>>,
}

impl SnapshotStack {
    /// Creates a stack for `layers` layers rooted at `original`.
    pub fn new(original: impl Into<String>, layers: usize) -> Self {
        let mut entries = vec![None; layers + 1];
        entries[0] = Some(original.into());
        Self { entries }
    }

    /// The unmodified artifact.
    pub fn original(&self) -> &str {
        self.entries[0].as_deref().unwrap_or_default()
    }

    /// Snapshot at `depth`, if it is still valid.
    pub fn get(&self, depth: usize) -> Option<&str> {
        self.entries.get(depth).and_then(|e| e.as_deref())
    }

    /// Records the snapshot at `depth` and drops everything deeper.
    pub fn commit(&mut self, depth: usize, text: String) {
        if depth == 0 || depth >= self.entries.len() {
            return;
        }
        self.entries[depth] = Some(text);
        self.invalidate_after(depth);
    }

    /// Clears every snapshot deeper than `depth`.
    pub fn invalidate_after(&mut self, depth: usize) {
        for entry in self.entries.iter_mut().skip(depth + 1) {
            *entry = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_and_invalidate() {
        let mut stack = SnapshotStack::new("v0", 3);
        stack.commit(1, "v1".into());
        stack.commit(2, "v2".into());
        stack.commit(3, "v3".into());
        assert_eq!(stack.get(3), Some("v3"));

        stack.commit(2, "v2b".into());
        assert_eq!(stack.get(2), Some("v2b"));
        assert_eq!(stack.get(3), None);

        stack.invalidate_after(0);
        assert_eq!(stack.get(1), None);
        assert_eq!(stack.original(), "v0");
    }

    #[test]
    fn test_original_is_protected() {
        let mut stack = SnapshotStack::new("v0", 1);
        stack.commit(0, "other".into());
        stack.commit(5, "out of range".into());
        assert_eq!(stack.original(), "v0");
        assert_eq!(stack.get(1), None);
    }
}
