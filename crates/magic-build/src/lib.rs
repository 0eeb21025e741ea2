//! Build orchestrator for minimal-magic sites.
//!
//! Renders every HTML page of a source tree through a headless browser,
//! copies the files those pages depend on, and reports leftovers in the
//! output directory.

pub mod builder;
pub mod manifest;
pub mod report;

pub use builder::{BuildConfig, BuildError, SiteBuilder};
pub use manifest::{FileState, Manifest};
pub use report::BuildReport;
