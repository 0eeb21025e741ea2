//! Static site build command.

use std::path::PathBuf;

use anyhow::Result;
use magic_build::{BuildConfig, SiteBuilder};

use crate::config::ConfigFile;

/// Merge command-line flags over the config file.
pub fn config(
    file: &ConfigFile,
    src: PathBuf,
    out: Option<PathBuf>,
    relative_links: bool,
) -> BuildConfig {
    let mut render = file.render_options();
    render.relative_links |= relative_links;

    BuildConfig {
        src_dir: src,
        out_dir: out.unwrap_or_else(|| file.build.out.clone()),
        lib_dir: file.lib_dir(),
        render,
    }
}

/// Check the source and output paths before anything is launched.
pub fn check_usage(config: &BuildConfig) -> Result<(), String> {
    if !config.src_dir.exists() {
        return Err(format!(
            "Source directory {} does not exist",
            config.src_dir.display()
        ));
    }
    if !config.src_dir.is_dir() {
        return Err(format!("Source {} is not a directory", config.src_dir.display()));
    }
    if config.out_dir.exists() && !config.out_dir.is_dir() {
        return Err(format!(
            "Output {} exists and is not a directory",
            config.out_dir.display()
        ));
    }
    Ok(())
}

/// Run the build command.
pub async fn run(config: BuildConfig) -> Result<()> {
    tracing::info!(
        "Building {} into {}",
        config.src_dir.display(),
        config.out_dir.display()
    );

    let report = SiteBuilder::new(config).build().await?;

    tracing::info!(
        "Wrote {} pages, copied {} files, {} failures in {}ms",
        report.written.len(),
        report.copied.len(),
        report.failed.len() + report.missing.len(),
        report.duration_ms
    );

    // Per-page failures leave the exit status at 0.
    if !report.is_clean() {
        tracing::warn!(
            "{} pages failed and {} dependencies were missing",
            report.failed.len(),
            report.missing.len()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn flags_override_config_file() {
        let mut file = ConfigFile::default();
        file.lib = Some(PathBuf::from("shared"));
        file.build.out = PathBuf::from("dist");

        let config = config(&file, PathBuf::from("site"), None, true);
        assert_eq!(config.out_dir, PathBuf::from("dist"));
        assert!(config.render.relative_links);

        let config = super::config(&file, PathBuf::from("site"), Some(PathBuf::from("public")), false);
        assert_eq!(config.out_dir, PathBuf::from("public"));
        assert!(!config.render.relative_links);
    }

    #[test]
    fn rejects_missing_or_file_source() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("index.html");
        fs::write(&file, "").unwrap();

        let missing = config(&ConfigFile::default(), temp.path().join("nope"), None, false);
        assert!(check_usage(&missing).unwrap_err().contains("does not exist"));

        let not_dir = config(&ConfigFile::default(), file, None, false);
        assert!(check_usage(&not_dir).unwrap_err().contains("not a directory"));
    }

    #[test]
    fn rejects_file_output() {
        let temp = tempdir().unwrap();
        let out = temp.path().join("out");
        fs::write(&out, "").unwrap();

        let config = config(
            &ConfigFile::default(),
            temp.path().to_path_buf(),
            Some(out),
            false,
        );
        assert!(check_usage(&config).unwrap_err().contains("not a directory"));
    }

    #[test]
    fn accepts_directory_source() {
        let temp = tempdir().unwrap();
        let config = config(
            &ConfigFile::default(),
            temp.path().to_path_buf(),
            Some(temp.path().join("missing-out")),
            false,
        );
        assert!(check_usage(&config).is_ok());
    }
}
