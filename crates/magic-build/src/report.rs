//! Summary of a finished build.

/// What a build produced. All name lists are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Pages rendered and written
    pub written: Vec<String>,

    /// Dependencies copied into the output
    pub copied: Vec<String>,

    /// Pages that failed to render, with the error message
    pub failed: Vec<(String, String)>,

    /// Dependencies that could not be copied
    pub missing: Vec<String>,

    /// Files in the output directory that this build did not produce
    pub stale: Vec<String>,

    /// Total build time in milliseconds
    pub duration_ms: u64,
}

impl BuildReport {
    /// True when every page rendered and every dependency was copied.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.missing.is_empty()
    }

    pub(crate) fn sort(&mut self) {
        self.written.sort();
        self.copied.sort();
        self.failed.sort();
        self.missing.sort();
        self.stale.sort();
    }
}
