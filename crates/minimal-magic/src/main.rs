//! minimal-magic CLI - tools for a website with minimal magic.

use std::path::PathBuf;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "minimal-magic")]
#[command(about = "Tools for a website with minimal magic")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to magic.toml config file
    #[arg(short, long, global = true, default_value = "magic.toml")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a release version of the website in SRC
    Build {
        /// Output directory (defaults to config or "./out")
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Rewrite same-origin links to relative paths
        #[arg(long)]
        relative_links: bool,

        /// Source directory
        #[arg(default_value = "./src")]
        src: PathBuf,
    },

    /// Start a local development server for the website in SRC
    Serve {
        /// Host to bind to (defaults to config or "localhost")
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (defaults to config or 8080)
        #[arg(short, long)]
        port: Option<u16>,

        /// Open the site in a browser
        #[arg(long)]
        open: bool,

        /// Do not inject the live reload script
        #[arg(long)]
        no_reload: bool,

        /// Source directory
        #[arg(default_value = "./src")]
        src: PathBuf,
    },

    /// Display version and licensing information
    Version,
}

/// Report a usage error on stderr and exit with status 2.
fn usage_error(message: impl std::fmt::Display) -> ! {
    Cli::command().error(ErrorKind::InvalidValue, message).exit()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    fmt().with_env_filter(filter).with_target(false).init();

    // Execute command
    match cli.command {
        Commands::Build {
            out,
            relative_links,
            src,
        } => {
            let file_config = config::load_config(&cli.config)?;
            let build_config = commands::build::config(&file_config, src, out, relative_links);
            if let Err(message) = commands::build::check_usage(&build_config) {
                usage_error(message);
            }
            commands::build::run(build_config).await?;
        }
        Commands::Serve {
            host,
            port,
            open,
            no_reload,
            src,
        } => {
            let file_config = config::load_config(&cli.config)?;
            let server_config =
                commands::serve::config(&file_config, src, host, port, open, no_reload);
            if let Err(message) = commands::serve::check_usage(&server_config) {
                usage_error(message);
            }
            commands::serve::run(server_config).await?;
        }
        Commands::Version => {
            commands::version::run();
        }
    }

    Ok(())
}
