//! Graph building: decoded type-info records → [`TypeGraph`] nodes.

use std::collections::HashMap;

use tracing::{debug, info, warn};
use uguid::Guid;

use crate::descriptor::{FuncDesc, TypeAttr, TypeDesc, TypeKindTag, VarDesc, VarKind};
use crate::error::{Error, Result};
use crate::image::{CustomDataTarget, TypeInfoData, TypeLibraryImage, TypeReference};
use crate::model::*;
use crate::names::NameLookup;

/// Knobs for a build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Turn the first contained per-node failure into an error.
    pub strict: bool,
}

/// Identifies the library a GUID-less type info belongs to.
type LibraryKey = (Guid, String);

/// Appends and merges nodes into a [`TypeGraph`].
#[derive(Debug, Default)]
pub struct TypeGraphBuilder {
    graph: TypeGraph,
    options: BuildOptions,
    /// Library index → node, for the library currently being added.
    local: HashMap<u32, TypeId>,
    library: LibraryKey,
    /// (library, index) → node, for type infos with a zero GUID.
    anonymous: HashMap<(LibraryKey, u32), TypeId>,
    /// Interface IID → (type format offset → node) of the records its last
    /// proxy decode produced.
    proxy_structs: HashMap<Guid, HashMap<usize, TypeId>>,
    changed: Vec<Guid>,
}

impl TypeGraphBuilder {
    pub fn new(options: BuildOptions) -> Self {
        Self::with_graph(TypeGraph::new(), options)
    }

    /// Continue building into an existing graph.
    pub fn with_graph(graph: TypeGraph, options: BuildOptions) -> Self {
        Self {
            graph,
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> BuildOptions {
        self.options
    }

    pub fn graph(&self) -> &TypeGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut TypeGraph {
        &mut self.graph
    }

    pub fn into_graph(self) -> TypeGraph {
        self.graph
    }

    /// GUIDs whose definition was replaced by a later decode since the last
    /// call. Caches keyed by these identities are stale.
    pub fn take_changed_identities(&mut self) -> Vec<Guid> {
        std::mem::take(&mut self.changed)
    }

    /// Add every type info of a library image.
    ///
    /// Shells for all decodable types are created first so references between
    /// types (forward, cyclic) resolve regardless of order. Returns the nodes
    /// built, in library order.
    pub fn add_library(&mut self, image: &TypeLibraryImage) -> Result<Vec<TypeId>> {
        self.local.clear();
        self.library = (image.libid, image.name.clone());

        for info in &image.types {
            let shell = TypeAttr::decode(&info.attr).and_then(|attr| {
                shell_kind(attr.typekind)
                    .map(|kind| (attr.guid, kind))
                    .ok_or_else(|| unsupported_kind(attr.typekind))
            });
            match shell {
                Ok((guid, kind)) => {
                    let id =
                        self.declare_type_info(guid, info.index, &info.documentation.name, kind);
                    self.local.insert(info.index, id);
                }
                Err(e) if self.options.strict => return Err(e),
                Err(e) => {
                    warn!(name = %info.documentation.name, index = info.index, err = %e, "skipping type info");
                }
            }
        }

        let mut built = Vec::new();
        for info in &image.types {
            let Some(&id) = self.local.get(&info.index) else {
                continue;
            };
            match self.add_type_info(info, info) {
                Ok(id) => built.push(id),
                Err(e) if self.options.strict => return Err(e),
                Err(e) => {
                    warn!(name = %info.documentation.name, err = %e, "type info left incomplete");
                    self.graph.node_mut(id).state = ParseState::Incomplete(vec![ParseIssue {
                        member: None,
                        error: e,
                    }]);
                    built.push(id);
                }
            }
        }

        info!(
            library = %image.name,
            types = image.types.len(),
            built = built.len(),
            "built type library"
        );
        Ok(built)
    }

    /// Build (or rebuild) the node for one type info.
    pub fn add_type_info(&mut self, info: &TypeInfoData, names: &dyn NameLookup) -> Result<TypeId> {
        let attr = TypeAttr::decode(&info.attr)?;
        let shell = shell_kind(attr.typekind).ok_or_else(|| unsupported_kind(attr.typekind))?;

        let id = match self.local.get(&info.index) {
            Some(&id) if self.graph.node(id).state == ParseState::Pending => id,
            _ => {
                let id =
                    self.declare_type_info(attr.guid, info.index, &info.documentation.name, shell);
                self.local.insert(info.index, id);
                id
            }
        };

        let mut issues = Vec::new();
        let kind = match attr.typekind {
            TypeKindTag::Enum => self.build_enum(info, names, &attr, &mut issues),
            TypeKindTag::Record => {
                self.build_record(info, names, &attr, RecordLayout::Struct, &mut issues)
            }
            TypeKindTag::Union => {
                self.build_record(info, names, &attr, RecordLayout::Union, &mut issues)
            }
            TypeKindTag::Interface => self.build_interface(info, names, &attr, false, &mut issues),
            TypeKindTag::Dispatch => self.build_interface(info, names, &attr, true, &mut issues),
            TypeKindTag::Alias => {
                let underlying = attr
                    .alias
                    .as_ref()
                    .ok_or_else(|| {
                        Error::UnsupportedLayout(format!(
                            "alias `{}` carries no type descriptor",
                            info.documentation.name
                        ))
                    })
                    .and_then(|desc| self.resolve(info, desc));
                TypeKind::Alias {
                    underlying: contain(&mut issues, None, underlying),
                }
            }
            TypeKindTag::Module | TypeKindTag::CoClass => return Err(unsupported_kind(attr.typekind)),
        };

        let node = self.graph.node_mut(id);
        node.name = info.documentation.name.clone();
        node.doc = info.documentation.clone();
        node.flags = attr.flags;
        node.version = (attr.major_version, attr.minor_version);
        node.custom_data = info.custom_data_for(CustomDataTarget::Type);
        node.external = false;
        node.kind = kind;
        debug!(name = %node.name, kind = ?attr.typekind, issues = issues.len(), "built type");

        if issues.is_empty() {
            node.state = ParseState::Complete;
            return Ok(id);
        }
        let first = issues[0].error.clone();
        node.state = ParseState::Incomplete(issues);
        if self.options.strict {
            return Err(first);
        }
        Ok(id)
    }

    /// Find or create the node for a declaration. An existing node with the
    /// same GUID is reset and reused.
    pub(crate) fn declare(&mut self, guid: Guid, name: &str, kind: TypeKind) -> TypeId {
        if let Some(id) = self.graph.find_by_guid(&guid) {
            let node = self.graph.node_mut(id);
            if node.state != ParseState::Pending && !node.external {
                debug!(%guid, name, "replacing previously decoded definition");
                self.changed.push(guid);
            }
            node.name = name.to_string();
            node.kind = kind;
            node.external = false;
            node.state = ParseState::Pending;
            return id;
        }
        self.graph.add(Some(guid), name, kind)
    }

    /// [`declare`](Self::declare) for a type info. One with a zero GUID is
    /// identified by its library and index instead.
    fn declare_type_info(
        &mut self,
        guid: Guid,
        index: u32,
        name: &str,
        kind: TypeKind,
    ) -> TypeId {
        if !guid.is_zero() {
            return self.declare(guid, name, kind);
        }
        let key = (self.library.clone(), index);
        if let Some(&id) = self.anonymous.get(&key) {
            let node = self.graph.node_mut(id);
            debug!(index, name, "replacing previously decoded anonymous definition");
            node.name = name.to_string();
            node.kind = kind;
            node.external = false;
            node.retired = false;
            node.state = ParseState::Pending;
            return id;
        }
        let id = self.graph.add(None, name, kind);
        self.anonymous.insert(key, id);
        id
    }

    /// Records produced by the last proxy decode of `iid`, keyed by type
    /// format offset. The entry is removed.
    pub(crate) fn take_proxy_structs(&mut self, iid: Guid) -> HashMap<usize, TypeId> {
        self.proxy_structs.remove(&iid).unwrap_or_default()
    }

    pub(crate) fn set_proxy_structs(&mut self, iid: Guid, structs: HashMap<usize, TypeId>) {
        self.proxy_structs.insert(iid, structs);
    }

    /// Node for a type defined elsewhere, created once per GUID.
    pub fn external(&mut self, guid: Guid, name: &str, kind: TypeKind) -> TypeId {
        if let Some(id) = self.graph.find_by_guid(&guid) {
            let node = self.graph.node_mut(id);
            if node.name.is_empty() && !name.is_empty() {
                node.name = name.to_string();
            }
            return id;
        }
        let id = self.graph.add(Some(guid), name, kind);
        let node = self.graph.node_mut(id);
        node.external = true;
        node.state = ParseState::Complete;
        id
    }

    pub fn external_interface(&mut self, iid: Guid, name: Option<&str>) -> TypeId {
        self.external(
            iid,
            name.unwrap_or_default(),
            TypeKind::Interface(InterfaceDef::default()),
        )
    }

    // -----------------------------------------------------------------------
    // Per-kind bodies
    // -----------------------------------------------------------------------

    fn build_enum(
        &mut self,
        info: &TypeInfoData,
        names: &dyn NameLookup,
        attr: &TypeAttr,
        issues: &mut Vec<ParseIssue>,
    ) -> TypeKind {
        let mut members = Vec::new();
        for i in 0..attr.vars as usize {
            let member = var_bytes(info, i).and_then(VarDesc::decode).and_then(|var| {
                let VarKind::Const(value) = var.kind else {
                    return Err(Error::UnsupportedLayout(format!(
                        "non-constant member {i} in enum `{}`",
                        info.documentation.name
                    )));
                };
                let doc = member_doc(info, var.memid);
                Ok(EnumMember {
                    name: member_name(&doc, names, var.memid),
                    value,
                    doc,
                })
            });
            if let Some(member) = contain(issues, Some(i), member) {
                members.push(member);
            }
        }
        TypeKind::Enum { members }
    }

    fn build_record(
        &mut self,
        info: &TypeInfoData,
        names: &dyn NameLookup,
        attr: &TypeAttr,
        layout: RecordLayout,
        issues: &mut Vec<ParseIssue>,
    ) -> TypeKind {
        let mut fields = Vec::new();
        for i in 0..attr.vars as usize {
            let field = self.build_field(info, names, i);
            if let Some(field) = contain(issues, Some(i), field) {
                fields.push(field);
            }
        }
        TypeKind::Record { layout, fields }
    }

    fn build_field(
        &mut self,
        info: &TypeInfoData,
        names: &dyn NameLookup,
        index: usize,
    ) -> Result<Field> {
        let var = VarDesc::decode(var_bytes(info, index)?)?;
        let ty = self.resolve(info, &var.elem.ty)?;
        let doc = member_doc(info, var.memid);
        Ok(Field {
            name: member_name(&doc, names, var.memid),
            ty,
            ordinal: index,
            flags: var.flags,
            doc,
            custom_data: info.custom_data_for(CustomDataTarget::Var(index)),
        })
    }

    fn build_interface(
        &mut self,
        info: &TypeInfoData,
        names: &dyn NameLookup,
        attr: &TypeAttr,
        dispatch: bool,
        issues: &mut Vec<ParseIssue>,
    ) -> TypeKind {
        let base = info.impl_types.first().map(|implemented| {
            self.resolve_href(info, implemented.href).and_then(|id| {
                match self.graph.node(id).kind {
                    TypeKind::Interface(_) => Ok(id),
                    _ => Err(Error::DanglingReference(format!(
                        "base of `{}` is not an interface",
                        info.documentation.name
                    ))),
                }
            })
        });
        let base = base.and_then(|base| contain(issues, None, base));

        let mut methods = Vec::new();
        for i in 0..attr.funcs as usize {
            let method = self.build_method(info, names, i, dispatch);
            if let Some(method) = contain(issues, Some(i), method) {
                methods.push(method);
            }
        }
        TypeKind::Interface(InterfaceDef {
            methods,
            base,
            dispatch,
        })
    }

    fn build_method(
        &mut self,
        info: &TypeInfoData,
        names: &dyn NameLookup,
        index: usize,
        dispatch: bool,
    ) -> Result<Method> {
        let bytes = info.funcs.get(index).ok_or_else(|| {
            Error::DanglingReference(format!(
                "function descriptor {index} of `{}` is missing",
                info.documentation.name
            ))
        })?;
        let desc = FuncDesc::decode(bytes)?;

        let mut parameters = Vec::with_capacity(desc.params.len());
        for (ordinal, elem) in desc.params.iter().enumerate() {
            parameters.push(Parameter {
                name: names
                    .name(desc.memid, ordinal + 1)
                    .unwrap_or_else(|| format!("p{ordinal}")),
                ty: self.resolve(info, &elem.ty)?,
                ordinal,
                flags: elem.flags,
                custom_data: info.custom_data_for(CustomDataTarget::Param(index, ordinal)),
            });
        }
        let return_type = self.resolve(info, &desc.ret.ty)?;
        let doc = member_doc(info, desc.memid);

        Ok(Method {
            name: member_name(&doc, names, desc.memid),
            return_type,
            parameters,
            vtable_offset: desc.vtable_offset as i32,
            invoke_kind: desc.invkind,
            flags: desc.flags,
            dispatch_id: dispatch.then_some(desc.memid),
            doc,
            custom_data: info.custom_data_for(CustomDataTarget::Func(index)),
        })
    }

    // -----------------------------------------------------------------------
    // Type descriptor resolution
    // -----------------------------------------------------------------------

    /// Resolve a type descriptor, recursing through pointers and arrays.
    fn resolve(&mut self, info: &TypeInfoData, desc: &TypeDesc) -> Result<TypeId> {
        Ok(match desc {
            TypeDesc::Base(primitive) => self.graph.primitive(*primitive),
            TypeDesc::Ptr(inner) => {
                let target = self.resolve(info, inner)?;
                self.graph.pointer(target)
            }
            TypeDesc::SafeArray(inner) => {
                let element = self.resolve(info, inner)?;
                self.graph.array(element, ArrayBound::Safe)
            }
            TypeDesc::CArray { dims, element } => {
                let element = self.resolve(info, element)?;
                self.graph.array(element, ArrayBound::Fixed(dims.clone()))
            }
            TypeDesc::UserDefined(href) => self.resolve_href(info, *href)?,
        })
    }

    fn resolve_href(&mut self, info: &TypeInfoData, href: u32) -> Result<TypeId> {
        match info.references.get(&href) {
            Some(TypeReference::Local(index)) => self.local.get(index).copied().ok_or_else(|| {
                Error::DanglingReference(format!(
                    "hreftype {href:#x} of `{}` names local type {index}, which is not in the graph",
                    info.documentation.name
                ))
            }),
            Some(TypeReference::External { guid, name, kind }) => {
                let shell = shell_kind(*kind).ok_or_else(|| {
                    Error::DanglingReference(format!("external `{name}` is a {kind:?}"))
                })?;
                Ok(self.external(*guid, name, shell))
            }
            None => Err(Error::DanglingReference(format!(
                "hreftype {href:#x} of `{}`",
                info.documentation.name
            ))),
        }
    }
}

/// Record a contained child failure; returns the value on success.
fn contain<T>(issues: &mut Vec<ParseIssue>, member: Option<usize>, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(member = ?member, err = %error, "child node failed to build");
            issues.push(ParseIssue { member, error });
            None
        }
    }
}

/// Empty node body matching a type kind; `None` for kinds the graph does not
/// model.
fn shell_kind(kind: TypeKindTag) -> Option<TypeKind> {
    Some(match kind {
        TypeKindTag::Enum => TypeKind::Enum {
            members: Vec::new(),
        },
        TypeKindTag::Record => TypeKind::Record {
            layout: RecordLayout::Struct,
            fields: Vec::new(),
        },
        TypeKindTag::Union => TypeKind::Record {
            layout: RecordLayout::Union,
            fields: Vec::new(),
        },
        TypeKindTag::Interface => TypeKind::Interface(InterfaceDef::default()),
        TypeKindTag::Dispatch => TypeKind::Interface(InterfaceDef {
            dispatch: true,
            ..InterfaceDef::default()
        }),
        TypeKindTag::Alias => TypeKind::Alias { underlying: None },
        TypeKindTag::Module | TypeKindTag::CoClass => return None,
    })
}

fn unsupported_kind(kind: TypeKindTag) -> Error {
    Error::UnsupportedLayout(format!("{kind:?} type infos"))
}

fn var_bytes(info: &TypeInfoData, index: usize) -> Result<&[u8]> {
    info.vars
        .get(index)
        .map(Vec::as_slice)
        .ok_or_else(|| {
            Error::DanglingReference(format!(
                "variable descriptor {index} of `{}` is missing",
                info.documentation.name
            ))
        })
}

fn member_doc(info: &TypeInfoData, memid: i32) -> Documentation {
    info.member_docs.get(&memid).cloned().unwrap_or_default()
}

fn member_name(doc: &Documentation, names: &dyn NameLookup, memid: i32) -> String {
    if !doc.name.is_empty() {
        return doc.name.clone();
    }
    names.name(memid, 0).unwrap_or_default()
}
