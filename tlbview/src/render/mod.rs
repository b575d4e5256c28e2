//! Renderer: type graph → interface source text.
//!
//! One [`SourceRenderer`] owns the formatter for its current
//! `(dialect, hide_comments)` pair and the IID name cache used to name
//! interfaces that carry no name of their own.

use std::collections::HashSet;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{ParseState, TypeGraph, TypeId, TypeKind};
use crate::names::{DisplayNames, IidNameCache};

mod decl;
pub mod dialect;
pub mod writer;

pub use decl::format_dispatch_id;
pub use dialect::{Dialect, Formatter, escape_string};
pub use writer::{AttributeList, IndentGuard, SourceWriter};

/// Rendering options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub dialect: Dialect,
    /// Drop `// ...` documentation lines.
    pub hide_comments: bool,
    /// Keep only interfaces and the records, aliases and enums they reach.
    pub interfaces_only: bool,
    /// Render incomplete nodes with placeholders instead of failing.
    pub best_effort: bool,
}

#[derive(Debug, Default)]
pub struct SourceRenderer {
    config: RenderConfig,
    formatter: Option<Formatter>,
    formatter_builds: usize,
    iid_names: IidNameCache,
}

impl SourceRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_iid_names(mut self, iid_names: IidNameCache) -> Self {
        self.iid_names = iid_names;
        self
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut RenderConfig {
        &mut self.config
    }

    pub fn iid_names(&self) -> &IidNameCache {
        &self.iid_names
    }

    pub fn iid_names_mut(&mut self) -> &mut IidNameCache {
        &mut self.iid_names
    }

    /// Number of times the formatter slot has been (re)built.
    pub fn formatter_builds(&self) -> usize {
        self.formatter_builds
    }

    /// Formatter for the current options, reusing the cached one when the
    /// dialect and comment setting are unchanged.
    pub fn formatter(&mut self) -> Formatter {
        let (dialect, hide_comments) = (self.config.dialect, self.config.hide_comments);
        match self.formatter {
            Some(fmt) if fmt.dialect == dialect && fmt.hide_comments == hide_comments => fmt,
            _ => {
                let fmt = Formatter::new(dialect, hide_comments);
                self.formatter = Some(fmt);
                self.formatter_builds += 1;
                debug!(?dialect, hide_comments, "built formatter");
                fmt
            }
        }
    }

    /// Render `roots` in order, each followed by a blank line.
    ///
    /// A root that is not fully parsed fails the whole call with
    /// [`Error::NotParsed`] unless best-effort rendering is enabled.
    pub fn render(&mut self, graph: &TypeGraph, roots: &[TypeId]) -> Result<String> {
        let fmt = self.formatter();
        let config = self.config;

        let selected = if config.interfaces_only {
            interfaces_and_reachable(graph, roots)
        } else {
            roots.to_vec()
        };

        for &id in &selected {
            let node = graph.node(id);
            if !config.best_effort && node.state != ParseState::Complete {
                return Err(Error::NotParsed(describe(graph, id)));
            }
        }

        let names = DisplayNames::resolve(graph, Some(&self.iid_names), fmt.separator);
        let mut emitter = decl::Emitter::new(graph, &names, fmt, config.best_effort);
        for &id in &selected {
            emitter.declaration(id);
        }
        let text = emitter.w.into_string();

        info!(
            dialect = ?config.dialect,
            roots = selected.len(),
            bytes = text.len(),
            "rendered source"
        );
        Ok(text)
    }
}

fn describe(graph: &TypeGraph, id: TypeId) -> String {
    let node = graph.node(id);
    match (node.name.is_empty(), node.guid()) {
        (false, _) => node.name.clone(),
        (true, Some(guid)) => crate::names::format_guid(&guid),
        (true, None) => format!("type #{}", id.index()),
    }
}

/// Interfaces among `roots` plus every root record, alias and enum their
/// bodies reach, in root order.
fn interfaces_and_reachable(graph: &TypeGraph, roots: &[TypeId]) -> Vec<TypeId> {
    let mut reachable = HashSet::new();
    let mut stack: Vec<TypeId> = roots
        .iter()
        .copied()
        .filter(|&id| matches!(graph.node(id).kind, TypeKind::Interface(_)))
        .collect();
    while let Some(id) = stack.pop() {
        if !reachable.insert(id) {
            continue;
        }
        let mut types = graph.body_references(id);
        while let Some(ty) = types.pop() {
            match &graph.node(ty).kind {
                TypeKind::Pointer { target } => types.push(*target),
                TypeKind::Array { element, .. } => types.push(*element),
                TypeKind::Record { .. } | TypeKind::Alias { .. } | TypeKind::Enum { .. } => {
                    stack.push(ty)
                }
                TypeKind::Interface(_) | TypeKind::Primitive(_) => {}
            }
        }
    }
    roots
        .iter()
        .copied()
        .filter(|id| reachable.contains(id))
        .collect()
}
