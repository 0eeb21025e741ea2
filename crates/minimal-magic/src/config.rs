//! Configuration file structure (magic.toml).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use magic_render::{RenderOptions, Viewport};
use serde::Deserialize;

/// Environment variable that overrides the shared library directory.
pub const LIB_DIR_ENV: &str = "MAGIC_LIB_DIR";

/// Library directory bundled with the tool.
const BUNDLED_LIB_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../lib");

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ConfigFile {
    /// Shared client library directory
    pub lib: Option<PathBuf>,
    pub build: BuildSettings,
    pub browser: BrowserSettings,
    pub serve: ServeSettings,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuildSettings {
    pub out: PathBuf,
    pub relative_links: bool,
    pub timeout_ms: u64,
    pub idle_ms: u64,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            out: PathBuf::from("./out"),
            relative_links: false,
            timeout_ms: 10_000,
            idle_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrowserSettings {
    pub executable: Option<PathBuf>,
    pub sandbox: bool,
    pub width: u32,
    pub height: u32,
    pub scale: f64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        let viewport = Viewport::default();
        Self {
            executable: None,
            sandbox: true,
            width: viewport.width,
            height: viewport.height,
            scale: viewport.scale,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServeSettings {
    pub host: String,
    pub port: u16,
    pub open: bool,
    pub live_reload: bool,
}

impl Default for ServeSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            open: false,
            live_reload: true,
        }
    }
}

impl ConfigFile {
    /// Shared library directory: `MAGIC_LIB_DIR`, then `lib`, then the
    /// bundled copy.
    pub fn lib_dir(&self) -> PathBuf {
        if let Some(dir) = std::env::var_os(LIB_DIR_ENV).filter(|v| !v.is_empty()) {
            return PathBuf::from(dir);
        }
        self.lib
            .clone()
            .unwrap_or_else(|| PathBuf::from(BUNDLED_LIB_DIR))
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            viewport: Viewport {
                width: self.browser.width,
                height: self.browser.height,
                scale: self.browser.scale,
            },
            timeout: Duration::from_millis(self.build.timeout_ms),
            idle: Duration::from_millis(self.build.idle_ms),
            relative_links: self.build.relative_links,
            executable: self.browser.executable.clone(),
            sandbox: self.browser.sandbox,
        }
    }
}

/// Load configuration from `path` if it exists.
/// Returns an error if the config file exists but is malformed.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    if path.exists() {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let config = parse_config(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        tracing::info!("Loaded config from {}", path.display());
        return Ok(config);
    }
    Ok(ConfigFile::default())
}

fn parse_config(content: &str) -> Result<ConfigFile, toml::de::Error> {
    toml::from_str(content)
}
