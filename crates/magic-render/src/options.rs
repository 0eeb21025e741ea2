//! Render session settings.

use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::browser::BrowserConfig;

/// Browser viewport used for every rendered page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub scale: f64,
}

impl Default for Viewport {
    /// Large and high resolution, so captured images look decent everywhere.
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            scale: 2.0,
        }
    }
}

/// Configuration for a [`crate::RenderSession`].
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Page viewport
    pub viewport: Viewport,

    /// Upper bound for navigation plus network idle, per page
    pub timeout: Duration,

    /// How long the network must stay quiet before a page counts as loaded
    pub idle: Duration,

    /// Rewrite same-origin links in the output to relative paths
    pub relative_links: bool,

    /// Chromium executable; auto-detected when unset
    pub executable: Option<PathBuf>,

    /// Run Chromium with its sandbox enabled
    pub sandbox: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            timeout: Duration::from_millis(10_000),
            idle: Duration::from_millis(500),
            relative_links: false,
            executable: None,
            sandbox: true,
        }
    }
}

impl RenderOptions {
    pub(crate) fn browser_config(&self) -> Result<BrowserConfig, String> {
        let mut builder = BrowserConfig::builder()
            .window_size(self.viewport.width, self.viewport.height)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking");

        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        if !self.sandbox {
            builder = builder.no_sandbox();
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_build_expectations() {
        let options = RenderOptions::default();
        assert_eq!(options.viewport.width, 1920);
        assert_eq!(options.viewport.height, 1080);
        assert_eq!(options.viewport.scale, 2.0);
        assert_eq!(options.timeout, Duration::from_secs(10));
        assert_eq!(options.idle, Duration::from_millis(500));
        assert!(!options.relative_links);
    }
}
