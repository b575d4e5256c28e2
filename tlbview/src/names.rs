//! Names: external name lookup, editable name overlays, the IID name cache
//! and the display names used when rendering.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uguid::{Guid, guid};

use crate::model::{TypeGraph, TypeId, TypeKind};

/// Recovers member and parameter names that are not embedded in a binary
/// structure. Ordinal 0 names the member itself, ordinal `i + 1` its `i`th
/// parameter (the `ITypeInfo::GetNames` convention).
pub trait NameLookup {
    fn name(&self, member_id: i32, ordinal: usize) -> Option<String>;
}

/// Lookup that never knows a name.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNames;

impl NameLookup for NoNames {
    fn name(&self, _member_id: i32, _ordinal: usize) -> Option<String> {
        None
    }
}

impl NameLookup for HashMap<(i32, usize), String> {
    fn name(&self, member_id: i32, ordinal: usize) -> Option<String> {
        self.get(&(member_id, ordinal)).cloned()
    }
}

// ---------------------------------------------------------------------------
// Name overlay
// ---------------------------------------------------------------------------

/// Replacement display names keyed by type index and member index.
///
/// Captured from one graph and applied to another (or the same one after a
/// re-decode). Entries that no longer fit the graph are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameOverlay {
    #[serde(default)]
    pub types: Vec<TypeNameData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeNameData {
    pub index: usize,
    pub name: String,
    /// Fields, enum members or methods, by ordinal.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<MemberNameData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberNameData {
    pub index: usize,
    pub name: String,
    /// Method parameters, by ordinal.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<MemberNameData>,
}

impl MemberNameData {
    fn leaf(index: usize, name: &str) -> Self {
        Self {
            index,
            name: name.to_string(),
            parameters: Vec::new(),
        }
    }
}

impl NameOverlay {
    /// Snapshot the current display names of every declaration.
    pub fn capture(graph: &TypeGraph) -> Self {
        let mut types = Vec::new();
        for id in graph.ids() {
            let node = graph.node(id);
            if node.retired {
                continue;
            }
            let members = match &node.kind {
                TypeKind::Record { fields, .. } => fields
                    .iter()
                    .enumerate()
                    .map(|(i, f)| MemberNameData::leaf(i, &f.name))
                    .collect(),
                TypeKind::Enum { members } => members
                    .iter()
                    .enumerate()
                    .map(|(i, m)| MemberNameData::leaf(i, &m.name))
                    .collect(),
                TypeKind::Interface(def) => def
                    .methods
                    .iter()
                    .enumerate()
                    .map(|(i, m)| MemberNameData {
                        index: i,
                        name: m.name.clone(),
                        parameters: m
                            .parameters
                            .iter()
                            .enumerate()
                            .map(|(j, p)| MemberNameData::leaf(j, &p.name))
                            .collect(),
                    })
                    .collect(),
                TypeKind::Alias { .. } => Vec::new(),
                TypeKind::Primitive(_) | TypeKind::Pointer { .. } | TypeKind::Array { .. } => {
                    continue;
                }
            };
            types.push(TypeNameData {
                index: id.index(),
                name: node.name.clone(),
                members,
            });
        }
        Self { types }
    }

    /// Overwrite display names in place. Returns the number of names written.
    pub fn apply(&self, graph: &mut TypeGraph) -> usize {
        let mut applied = 0;
        for entry in &self.types {
            let Some(node) = graph.get(entry.index) else {
                debug!(index = entry.index, "overlay entry past end of graph, skipped");
                continue;
            };
            if !node.is_declaration() {
                debug!(index = entry.index, "overlay entry targets no declaration, skipped");
                continue;
            }
            let node = graph.node_mut(TypeId(entry.index));
            node.name = entry.name.clone();
            applied += 1;

            for member in &entry.members {
                match &mut node.kind {
                    TypeKind::Record { fields, .. } => {
                        if let Some(field) = fields.get_mut(member.index) {
                            field.name = member.name.clone();
                            applied += 1;
                        }
                    }
                    TypeKind::Enum { members } => {
                        if let Some(m) = members.get_mut(member.index) {
                            m.name = member.name.clone();
                            applied += 1;
                        }
                    }
                    TypeKind::Interface(def) => {
                        if let Some(method) = def.methods.get_mut(member.index) {
                            method.name = member.name.clone();
                            applied += 1;
                            for param in &member.parameters {
                                if let Some(p) = method.parameters.get_mut(param.index) {
                                    p.name = param.name.clone();
                                    applied += 1;
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        applied
    }
}

// ---------------------------------------------------------------------------
// IID name cache
// ---------------------------------------------------------------------------

/// Known interface names keyed by IID.
///
/// Owned by whoever renders; entries must be invalidated when a decode
/// reports a changed definition for the same IID.
#[derive(Debug, Clone, Default)]
pub struct IidNameCache {
    names: HashMap<Guid, String>,
}

impl IidNameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache pre-seeded with the core COM interfaces.
    pub fn with_well_known() -> Self {
        let mut cache = Self::new();
        cache.insert(guid!("00000000-0000-0000-c000-000000000046"), "IUnknown");
        cache.insert(guid!("00000001-0000-0000-c000-000000000046"), "IClassFactory");
        cache.insert(guid!("00000003-0000-0000-c000-000000000046"), "IMarshal");
        cache.insert(guid!("00020400-0000-0000-c000-000000000046"), "IDispatch");
        cache
    }

    pub fn insert(&mut self, iid: Guid, name: impl Into<String>) {
        self.names.insert(iid, name.into());
    }

    pub fn get(&self, iid: &Guid) -> Option<&str> {
        self.names.get(iid).map(String::as_str)
    }

    /// Drop a cached name. Returns whether an entry existed.
    pub fn invalidate(&mut self, iid: &Guid) -> bool {
        self.names.remove(iid).is_some()
    }

    pub fn invalidate_all<'a>(&mut self, iids: impl IntoIterator<Item = &'a Guid>) {
        for iid in iids {
            self.invalidate(iid);
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Display names
// ---------------------------------------------------------------------------

/// Uppercase registry form of a GUID, without braces.
pub fn format_guid(guid: &Guid) -> String {
    guid.to_string().to_uppercase()
}

/// Undo WinRT name mangling (`__x_ABI_CWindows_CFoundation_CIUriRuntimeClass`
/// becomes `ABI.Windows.Foundation.IUriRuntimeClass` for separator `.`).
pub fn demangle_name(name: &str, separator: &str) -> String {
    match name.strip_prefix("__x_") {
        Some(rest) => rest.replace("_C", separator),
        None => name.to_string(),
    }
}

/// Member names made usable in source: empty names get `fallback(ordinal)`,
/// repeats get an `_ordinal` suffix, counted upwards while it is taken.
pub fn disambiguate<'a>(
    names: impl IntoIterator<Item = &'a str>,
    fallback: impl Fn(usize) -> String,
) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let base = if name.is_empty() {
                fallback(i)
            } else {
                name.to_string()
            };
            let mut unique = base.clone();
            let mut suffix = i;
            while seen.contains(&unique) {
                unique = format!("{base}_{suffix}");
                suffix += 1;
            }
            seen.insert(unique.clone());
            unique
        })
        .collect()
}

/// Final, collision-free names for every declaration in a graph.
#[derive(Debug, Clone)]
pub struct DisplayNames {
    names: Vec<String>,
}

impl DisplayNames {
    pub fn resolve(graph: &TypeGraph, iid_names: Option<&IidNameCache>, separator: &str) -> Self {
        let mut used = HashSet::new();
        let mut names = Vec::with_capacity(graph.len());
        for id in graph.ids() {
            let node = graph.node(id);
            if !node.is_declaration() {
                names.push(String::new());
                continue;
            }
            let base = if !node.name.is_empty() {
                demangle_name(&node.name, separator)
            } else if let Some(guid) = node.guid() {
                iid_names
                    .and_then(|cache| cache.get(&guid))
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("intf_{}", format_guid(&guid).replace('-', "_")))
            } else {
                format!("__MIDL_type_{}", id.index())
            };
            let mut unique = base.clone();
            let mut suffix = 1;
            while used.contains(&unique) {
                unique = format!("{base}_{suffix}");
                suffix += 1;
            }
            used.insert(unique.clone());
            names.push(unique);
        }
        Self { names }
    }

    pub fn get(&self, id: TypeId) -> &str {
        &self.names[id.index()]
    }
}
