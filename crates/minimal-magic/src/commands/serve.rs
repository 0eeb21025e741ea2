//! Development server command.

use std::path::PathBuf;

use anyhow::Result;
use magic_server::{DevServer, DevServerConfig};

use crate::config::ConfigFile;

/// Merge command-line flags over the config file.
pub fn config(
    file: &ConfigFile,
    src: PathBuf,
    host: Option<String>,
    port: Option<u16>,
    open: bool,
    no_reload: bool,
) -> DevServerConfig {
    DevServerConfig {
        src_dir: src,
        lib_dir: file.lib_dir(),
        host: host.unwrap_or_else(|| file.serve.host.clone()),
        port: port.unwrap_or(file.serve.port),
        open: open || file.serve.open,
        live_reload: file.serve.live_reload && !no_reload,
    }
}

pub fn check_usage(config: &DevServerConfig) -> Result<(), String> {
    if !config.src_dir.is_dir() {
        return Err(format!(
            "Source directory {} does not exist or is not a directory",
            config.src_dir.display()
        ));
    }
    Ok(())
}

/// Run the dev server.
pub async fn run(config: DevServerConfig) -> Result<()> {
    tracing::info!(
        "Starting development server for {} on {}:{}",
        config.src_dir.display(),
        config.host,
        config.port
    );

    DevServer::new(config).start().await?;

    Ok(())
}
