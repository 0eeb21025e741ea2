//! Tracks every file a build produces.

use std::collections::BTreeMap;

/// How a file ends up in the output tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Rendered by this build
    Written,

    /// Discovered as a dependency, not copied yet
    PendingCopy,

    /// Copied from the source or library directory
    Copied,
}

/// Output files keyed by name relative to the site root (no leading slash).
#[derive(Debug, Default, Clone)]
pub struct Manifest {
    files: BTreeMap<String, FileState>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rendered page. Replaces any pending copy of the same name.
    pub fn mark_written(&mut self, name: impl Into<String>) {
        self.files.insert(name.into(), FileState::Written);
    }

    /// Record a dependency unless the name is already known.
    ///
    /// Returns true if the name was new.
    pub fn mark_dependency(&mut self, name: impl Into<String>) -> bool {
        let mut inserted = false;
        self.files.entry(name.into()).or_insert_with(|| {
            inserted = true;
            FileState::PendingCopy
        });
        inserted
    }

    /// Mark a pending dependency as copied.
    pub fn mark_copied(&mut self, name: &str) {
        if let Some(state) = self.files.get_mut(name) {
            if *state == FileState::PendingCopy {
                *state = FileState::Copied;
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<FileState> {
        self.files.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<FileState> {
        self.files.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    /// Names still waiting to be copied, in order.
    pub fn pending(&self) -> Vec<String> {
        self.names_in(FileState::PendingCopy)
    }

    pub fn names_in(&self, state: FileState) -> Vec<String> {
        self.files
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FileState)> {
        self.files.iter().map(|(name, state)| (name.as_str(), *state))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
