//! tlbview: COM type model extraction and interface source rendering.
//!
//! Decodes flattened type-library images and NDR proxy procedure tables into
//! a [`TypeGraph`], then renders the graph as IDL, C++ or a generic
//! interface syntax.
//!
//! # Quick start
//!
//! Render everything a config file points at and write the output file:
//!
//! ```no_run
//! use std::path::Path;
//!
//! // Reads config TOML, decodes the inputs, writes the rendered source.
//! tlbview::run(Path::new("tlbview.toml"), None).unwrap();
//! ```
//!
//! Or work with the pieces directly:
//!
//! ```no_run
//! use tlbview::{BuildOptions, RenderConfig, SourceRenderer, TypeGraphBuilder, TypeLibraryImage};
//!
//! # fn demo(bytes: &[u8]) -> tlbview::Result<()> {
//! let image = TypeLibraryImage::decode(bytes)?;
//! let mut builder = TypeGraphBuilder::new(BuildOptions::default());
//! let roots = builder.add_library(&image)?;
//! let text = SourceRenderer::new(RenderConfig::default()).render(builder.graph(), &roots)?;
//! println!("{text}");
//! # Ok(()) }
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{info, warn};

pub mod builder;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod image;
pub mod model;
pub mod names;
pub mod proxy;
pub mod reader;
pub mod render;

pub use builder::{BuildOptions, TypeGraphBuilder};
pub use error::{Error, Result};
pub use image::{TypeInfoData, TypeLibraryImage};
pub use model::{TypeGraph, TypeId, TypeKind, TypeNode};
pub use names::{DisplayNames, IidNameCache, NameLookup, NameOverlay, NoNames};
pub use proxy::{ProxyDecoder, ProxyImage};
pub use render::{Dialect, RenderConfig, SourceRenderer};

/// Run the full pipeline: load config, decode every input, render, and write
/// the output file.
///
/// `config_path` is the path to a `tlbview.toml` configuration file.
/// `output` optionally overrides the output file path from the config.
///
/// Returns the path the source was written to.
pub fn run(config_path: &Path, output: Option<&Path>) -> anyhow::Result<PathBuf> {
    let cfg = config::load_config(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    run_config(&cfg, base_dir, output)
}

/// [`run`] for an already-loaded config, e.g. one with command-line
/// overrides applied.
pub fn run_config(
    cfg: &config::Config,
    base_dir: &Path,
    output: Option<&Path>,
) -> anyhow::Result<PathBuf> {
    let text = generate_from_config(cfg, base_dir)?;

    let output_path = match output {
        Some(p) => p.to_path_buf(),
        None => base_dir.join(&cfg.output.file),
    };
    std::fs::write(&output_path, &text)
        .with_context(|| format!("writing output to {}", output_path.display()))?;

    info!(
        path = %output_path.display(),
        size = text.len(),
        "wrote source"
    );

    Ok(output_path)
}

/// Load a `tlbview.toml` config file, decode the inputs it lists and return
/// the rendered source without writing to disk.
pub fn generate(config_path: &Path) -> anyhow::Result<String> {
    let cfg = config::load_config(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    generate_from_config(&cfg, base_dir)
}

/// Render source from an already-loaded [`config::Config`].
///
/// `base_dir` is the directory relative to which input paths in the config
/// are resolved (typically the parent directory of the TOML file).
pub fn generate_from_config(cfg: &config::Config, base_dir: &Path) -> anyhow::Result<String> {
    let (graph, changed) = build_graph(cfg, base_dir)?;

    let mut renderer =
        SourceRenderer::new(cfg.render).with_iid_names(iid_names(cfg, &graph, &changed)?);
    let roots = graph.roots();
    renderer
        .render(&graph, &roots)
        .context("rendering decoded types")
}

/// Decode the config's inputs and return the name overlay of the resulting
/// graph as TOML, ready to be edited and referenced as `overlay`.
pub fn capture_names(config_path: &Path) -> anyhow::Result<String> {
    let cfg = config::load_config(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    capture_names_from_config(&cfg, base_dir)
}

/// [`capture_names`] for an already-loaded config.
pub fn capture_names_from_config(cfg: &config::Config, base_dir: &Path) -> anyhow::Result<String> {
    let (graph, _) = build_graph(cfg, base_dir)?;
    let overlay = NameOverlay::capture(&graph);
    toml::to_string(&overlay).context("serializing name overlay")
}

/// Decode every configured input into one graph and apply the overlay.
///
/// Also returns the identities whose definitions were replaced while
/// decoding.
pub fn build_graph(
    cfg: &config::Config,
    base_dir: &Path,
) -> anyhow::Result<(TypeGraph, Vec<uguid::Guid>)> {
    if cfg.type_library.is_empty() && cfg.proxy.is_empty() {
        anyhow::bail!(
            "configuration lists no inputs.\n\
             Hint: add a `[[type_library]]` or `[[proxy]]` entry with a `path`."
        );
    }

    info!(
        type_libraries = cfg.type_library.len(),
        proxies = cfg.proxy.len(),
        "loaded configuration"
    );

    let mut builder = TypeGraphBuilder::new(BuildOptions::from(&cfg.build));

    for lib in &cfg.type_library {
        let path = config::resolve_path(&lib.path, base_dir);
        let bytes = std::fs::read(&path)
            .with_context(|| format!("reading type library {}", path.display()))?;
        let image = TypeLibraryImage::decode(&bytes)
            .with_context(|| format!("decoding type library {}", path.display()))?;
        builder
            .add_library(&image)
            .with_context(|| format!("building types from {}", path.display()))?;
    }

    for proxy in &cfg.proxy {
        let path = config::resolve_path(&proxy.path, base_dir);
        let iid = config::parse_guid(&proxy.iid)
            .with_context(|| format!("proxy {}", path.display()))?;
        let bytes =
            std::fs::read(&path).with_context(|| format!("reading proxy {}", path.display()))?;
        ProxyDecoder::decode(&mut builder, &bytes, iid, proxy.name.as_deref(), &NoNames)
            .with_context(|| format!("decoding proxy {}", path.display()))?;
    }

    let changed = builder.take_changed_identities();
    let mut graph = builder.into_graph();

    if let Some(overlay_path) = &cfg.overlay {
        let path = config::resolve_path(overlay_path, base_dir);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading name overlay {}", path.display()))?;
        let overlay: NameOverlay = toml::from_str(&content)
            .with_context(|| format!("parsing name overlay {}", path.display()))?;
        let applied = overlay.apply(&mut graph);
        if applied == 0 && !overlay.types.is_empty() {
            warn!(path = %path.display(), "name overlay matched nothing");
        }
        info!(path = %path.display(), applied, "applied name overlay");
    }

    Ok((graph, changed))
}

/// IID name cache for rendering: well-known interfaces, then every named
/// interface in the graph, then the config's explicit entries.
fn iid_names(
    cfg: &config::Config,
    graph: &TypeGraph,
    changed: &[uguid::Guid],
) -> anyhow::Result<IidNameCache> {
    let mut cache = IidNameCache::with_well_known();
    cache.invalidate_all(changed);
    for id in graph.ids() {
        let node = graph.node(id);
        if let (TypeKind::Interface(_), Some(guid)) = (&node.kind, node.guid()) {
            if !node.name.is_empty() {
                cache.insert(guid, node.name.clone());
            }
        }
    }
    for (iid, name) in &cfg.iid_names {
        let guid = config::parse_guid(iid).context("reading [iid_names]")?;
        cache.insert(guid, name.clone());
    }
    Ok(cache)
}
