//! CLI entry point for tlbview.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tlbview::Dialect;
use tracing::info;

/// tlbview: render COM interface definitions from type-library images and
/// proxy tables.
#[derive(Parser, Debug)]
#[command(name = "tlbview", version, about)]
struct Cli {
    /// Path to the tlbview.toml configuration file.
    #[arg(default_value = "tlbview.toml")]
    config: PathBuf,

    /// Output file path (overrides config).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output dialect (overrides config).
    #[arg(long, value_enum)]
    dialect: Option<Dialect>,

    /// Drop documentation comments.
    #[arg(long)]
    hide_comments: bool,

    /// Render only interfaces and the records they use.
    #[arg(long)]
    interfaces_only: bool,

    /// Write the decoded graph's name overlay to PATH instead of rendering.
    #[arg(long, value_name = "PATH")]
    capture_names: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tlbview=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = tlbview::config::load_config(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    let base_dir = cli
        .config
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    if let Some(path) = &cli.capture_names {
        let overlay = tlbview::capture_names_from_config(&cfg, &base_dir)?;
        std::fs::write(path, &overlay)
            .with_context(|| format!("writing name overlay to {}", path.display()))?;
        info!(path = %path.display(), "wrote name overlay");
        return Ok(());
    }

    if let Some(dialect) = cli.dialect {
        cfg.render.dialect = dialect;
    }
    cfg.render.hide_comments |= cli.hide_comments;
    cfg.render.interfaces_only |= cli.interfaces_only;

    tlbview::run_config(&cfg, &base_dir, cli.output.as_deref())?;
    Ok(())
}
