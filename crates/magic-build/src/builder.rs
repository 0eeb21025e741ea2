//! Static site builder.

use std::collections::BTreeSet;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use walkdir::{DirEntry, WalkDir};

use magic_render::{PageRenderResult, PageRenderer, RenderError, RenderOptions, RenderSession};
use magic_routes::Route;

use crate::manifest::{FileState, Manifest};
use crate::report::BuildReport;

/// Prefix of names served from the shared library directory.
const LIB_NAME_PREFIX: &str = "lib/";

/// Configuration for building a site.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Source directory containing the HTML pages
    pub src_dir: PathBuf,

    /// Output directory
    pub out_dir: PathBuf,

    /// Shared client library, served at `/lib`
    pub lib_dir: PathBuf,

    /// Browser and page load settings
    pub render: RenderOptions,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            src_dir: PathBuf::from("src"),
            out_dir: PathBuf::from("out"),
            lib_dir: PathBuf::from("lib"),
            render: RenderOptions::default(),
        }
    }
}

/// Errors that can occur during build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Source directory not found: {0}")]
    SourceNotFound(String),

    #[error("Refusing to build into {out}: it overlaps the source directory {src}")]
    UnsafeLayout { src: String, out: String },

    #[error("No HTML pages found in {0}")]
    NoPages(String),

    #[error("{0}")]
    Io(String),

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Resolved directories and pages of one build.
#[derive(Debug)]
struct Layout {
    src: PathBuf,
    out: PathBuf,
    lib: PathBuf,
    pages: Vec<Route>,
}

/// Static site builder.
pub struct SiteBuilder {
    config: BuildConfig,
}

impl SiteBuilder {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Build the site with a headless browser.
    ///
    /// Layout checks run before the browser is launched. The render session
    /// is stopped whether or not the pages built.
    pub async fn build(&self) -> Result<BuildReport, BuildError> {
        let layout = self.prepare()?;

        let mut session = RenderSession::new(self.config.render.clone());
        session.start(&layout.src, &layout.lib).await?;

        let report = self.run(&session, &layout).await;

        if let Err(e) = session.stop().await {
            tracing::warn!("Failed to stop render session: {}", e);
        }
        Ok(report)
    }

    /// Build the site with an existing renderer.
    pub async fn build_with<R: PageRenderer>(&self, renderer: &R) -> Result<BuildReport, BuildError> {
        let layout = self.prepare()?;
        Ok(self.run(renderer, &layout).await)
    }

    /// Resolve paths, check the layout, find pages and create the output
    /// directory.
    fn prepare(&self) -> Result<Layout, BuildError> {
        let src = self.config.src_dir.canonicalize().map_err(|e| {
            BuildError::SourceNotFound(format!("{}: {}", self.config.src_dir.display(), e))
        })?;
        if !src.is_dir() {
            return Err(BuildError::SourceNotFound(src.display().to_string()));
        }

        let out = absolute(&self.config.out_dir)
            .map_err(|e| BuildError::Io(format!("{}: {}", self.config.out_dir.display(), e)))?;
        check_layout(&src, &out)?;

        let lib = self
            .config
            .lib_dir
            .canonicalize()
            .unwrap_or_else(|_| self.config.lib_dir.clone());

        let pages = discover_pages(&src);
        if pages.is_empty() {
            return Err(BuildError::NoPages(src.display().to_string()));
        }

        std::fs::create_dir_all(&out).map_err(|e| {
            BuildError::Io(format!(
                "Failed to create output directory {}: {}",
                out.display(),
                e
            ))
        })?;

        Ok(Layout {
            src,
            out,
            lib,
            pages,
        })
    }

    async fn run<R: PageRenderer>(&self, renderer: &R, layout: &Layout) -> BuildReport {
        let start = Instant::now();
        let mut manifest = Manifest::new();
        let mut report = BuildReport::default();

        let mut renders: FuturesUnordered<_> = layout
            .pages
            .iter()
            .map(|route| async move { (route, build_page(renderer, route, &layout.out).await) })
            .collect();

        while let Some((route, result)) = renders.next().await {
            match result {
                Ok(page) => {
                    let name = page.route.name();
                    tracing::info!("html {}", name);
                    for dependency in page.dependencies() {
                        manifest.mark_dependency(dependency.name());
                    }
                    manifest.mark_written(name.clone());
                    report.written.push(name);
                }
                Err(e) => {
                    tracing::error!("Failed to build {}: {}", route, e);
                    report.failed.push((route.name(), e.to_string()));
                }
            }
        }
        drop(renders);

        // Pages are only ever rendered, so a failed page stays out of the output.
        let page_names: BTreeSet<String> = layout.pages.iter().map(Route::name).collect();
        for name in manifest.pending() {
            if page_names.contains(&name) {
                manifest.remove(&name);
            }
        }

        let mut copies: FuturesUnordered<_> = manifest
            .pending()
            .into_iter()
            .map(|name| async move {
                let result = copy_dependency(&name, layout).await;
                (name, result)
            })
            .collect();

        while let Some((name, result)) = copies.next().await {
            match result {
                Ok(()) => {
                    tracing::info!("copy {}", name);
                    manifest.mark_copied(&name);
                    report.copied.push(name);
                }
                Err(e) => {
                    tracing::error!("Failed to copy {}: {}", name, e);
                    manifest.remove(&name);
                    report.missing.push(name);
                }
            }
        }
        drop(copies);

        report.stale = find_stale(&layout.out, &manifest);
        if !report.stale.is_empty() {
            tracing::warn!(
                "Possibly stale files in {}: {}",
                layout.out.display(),
                report.stale.join(", ")
            );
        }

        debug_assert!(manifest.iter().all(|(_, state)| state != FileState::PendingCopy));

        report.sort();
        report.duration_ms = start.elapsed().as_millis() as u64;
        report
    }
}

/// Render one page and write it under `out`.
async fn build_page<R: PageRenderer>(
    renderer: &R,
    route: &Route,
    out: &Path,
) -> Result<PageRenderResult, BuildError> {
    let page = renderer.render(route).await?;
    let dest = mirrored_path(out, &page.route.name())
        .ok_or_else(|| BuildError::Io(format!("Invalid output name for {}", page.route)))?;
    write_file(&dest, page.content.as_bytes())
        .await
        .map_err(|e| BuildError::Io(format!("Failed to write {}: {}", dest.display(), e)))?;
    Ok(page)
}

/// Copy a dependency from the library or source directory into `out`.
async fn copy_dependency(name: &str, layout: &Layout) -> io::Result<()> {
    let source = match name.strip_prefix(LIB_NAME_PREFIX) {
        Some(rest) => mirrored_path(&layout.lib, rest),
        None => mirrored_path(&layout.src, name),
    }
    .ok_or_else(|| invalid_name(name))?;
    let dest = mirrored_path(&layout.out, name).ok_or_else(|| invalid_name(name))?;

    let metadata = tokio::fs::metadata(&source).await?;
    if !metadata.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a file", source.display()),
        ));
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(&source, &dest).await?;
    Ok(())
}

fn invalid_name(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("invalid file name {:?}", name))
}

/// Write `content` to `path` through a temporary sibling so a failed write
/// never leaves a partial file behind.
async fn write_file(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    tokio::fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = parent.join(format!(".{}.tmp", file_name));

    if let Err(e) = tokio::fs::write(&temp, content).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e);
    }
    Ok(())
}

/// Join a `/`-separated name onto `root`, rejecting names that escape it.
fn mirrored_path(root: &Path, name: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for part in name.split('/') {
        match part {
            "" | "." => continue,
            ".." => return None,
            part if Path::new(part).components().count() != 1 => return None,
            part => path.push(part),
        }
    }
    if path == root {
        return None;
    }
    Some(path)
}

/// Refuse output directories that would overwrite or contain the source.
fn check_layout(src: &Path, out: &Path) -> Result<(), BuildError> {
    if src.starts_with(out) || out.starts_with(src) {
        return Err(BuildError::UnsafeLayout {
            src: src.display().to_string(),
            out: out.display().to_string(),
        });
    }
    Ok(())
}

/// Make `path` absolute, resolving symlinks in the part that exists.
fn absolute(path: &Path) -> io::Result<PathBuf> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }

    let mut existing = normalized.as_path();
    let mut rest = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(normalized),
        }
    }

    let mut resolved = existing.canonicalize()?;
    for name in rest.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

/// All `*.html` files under `src`, skipping hidden entries.
fn discover_pages(src: &Path) -> Vec<Route> {
    let mut pages: Vec<Route> = WalkDir::new(src)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|ext| ext.to_str()) == Some("html"))
        .filter_map(|e| relative_name(src, e.path()))
        .map(|name| Route::from_name(&name))
        .collect();
    pages.sort();
    pages
}

/// Files under `out` that the manifest does not account for.
fn find_stale(out: &Path, manifest: &Manifest) -> Vec<String> {
    let mut stale: Vec<String> = WalkDir::new(out)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| relative_name(out, e.path()))
        .filter(|name| !manifest.contains(name))
        .collect();
    stale.sort();
    stale
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// `/`-separated name of `path` relative to `root`.
fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
