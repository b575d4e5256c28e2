//! Type graph: the bridge between binary decoding and source rendering.
//!
//! Nodes live in an arena addressed by [`TypeId`]. Named declarations
//! (aliases, enums, records, interfaces) reference each other by id, so
//! self-referential and mutually-referential types need no special casing.
//! Structural nodes (primitives, pointers, arrays) are interned.

use std::collections::HashMap;

use bitflags::bitflags;
use uguid::Guid;

use crate::error::Error;

/// Index of a node within its [`TypeGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub(crate) usize);

impl TypeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Stable identity of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identity {
    Guid(Guid),
    /// Synthetic identity for anonymous or GUID-less nodes.
    Index(u32),
}

/// Name and help text attached to a node or member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Documentation {
    pub name: String,
    pub doc_string: String,
    pub help_context: u32,
    pub help_file: String,
}

/// Value of a custom-data entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomValue {
    Int(i64),
    Str(String),
}

/// Vendor attribute keyed by GUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomDataItem {
    pub guid: Guid,
    pub value: CustomValue,
}

bitflags! {
    /// `TYPEFLAGS` of a type info.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TypeFlags: u16 {
        const APPOBJECT = 0x0001;
        const CANCREATE = 0x0002;
        const LICENSED = 0x0004;
        const PREDECLID = 0x0008;
        const HIDDEN = 0x0010;
        const CONTROL = 0x0020;
        const DUAL = 0x0040;
        const NONEXTENSIBLE = 0x0080;
        const OLEAUTOMATION = 0x0100;
        const RESTRICTED = 0x0200;
        const AGGREGATABLE = 0x0400;
        const REPLACEABLE = 0x0800;
        const DISPATCHABLE = 0x1000;
        const REVERSEBIND = 0x2000;
        const PROXY = 0x4000;
    }
}

bitflags! {
    /// `FUNCFLAGS` of a function descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FuncFlags: u16 {
        const RESTRICTED = 0x0001;
        const SOURCE = 0x0002;
        const BINDABLE = 0x0004;
        const REQUESTEDIT = 0x0008;
        const DISPLAYBIND = 0x0010;
        const DEFAULTBIND = 0x0020;
        const HIDDEN = 0x0040;
        const USESGETLASTERROR = 0x0080;
        const DEFAULTCOLLELEM = 0x0100;
        const UIDEFAULT = 0x0200;
        const NONBROWSABLE = 0x0400;
        const REPLACEABLE = 0x0800;
        const IMMEDIATEBIND = 0x1000;
    }
}

bitflags! {
    /// `VARFLAGS` of a variable descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VarFlags: u16 {
        const READONLY = 0x0001;
        const SOURCE = 0x0002;
        const BINDABLE = 0x0004;
        const REQUESTEDIT = 0x0008;
        const DISPLAYBIND = 0x0010;
        const DEFAULTBIND = 0x0020;
        const HIDDEN = 0x0040;
        const RESTRICTED = 0x0080;
        const DEFAULTCOLLELEM = 0x0100;
        const UIDEFAULT = 0x0200;
        const NONBROWSABLE = 0x0400;
        const REPLACEABLE = 0x0800;
        const IMMEDIATEBIND = 0x1000;
    }
}

bitflags! {
    /// `PARAMFLAGS` of an element descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ParamFlags: u16 {
        const IN = 0x0001;
        const OUT = 0x0002;
        const LCID = 0x0004;
        const RETVAL = 0x0008;
        const OPTIONAL = 0x0010;
        const HASDEFAULT = 0x0020;
        const HASCUSTDATA = 0x0040;
    }
}

bitflags! {
    /// `IMPLTYPEFLAGS` of an implemented-type reference.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ImplTypeFlags: u16 {
        const DEFAULT = 0x0001;
        const SOURCE = 0x0002;
        const RESTRICTED = 0x0004;
        const DEFAULTVTABLE = 0x0008;
    }
}

/// Built-in scalar and pointer-like types shared by type libraries and proxies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Void,
    I1,
    UI1,
    /// NDR `byte`.
    Byte,
    /// NDR `char`.
    Char,
    WChar,
    I2,
    UI2,
    I4,
    UI4,
    I8,
    UI8,
    Int,
    UInt,
    R4,
    R8,
    Currency,
    Date,
    Bstr,
    Dispatch,
    Scode,
    Bool,
    Variant,
    Unknown,
    Decimal,
    HResult,
    LpStr,
    LpWStr,
    IntPtr,
    UIntPtr,
    ErrorStatus,
}

impl Primitive {
    /// Map a primitive `VARTYPE`. Composite VARTYPEs return `None`.
    pub fn from_vt(vt: u16) -> Option<Self> {
        Some(match vt {
            2 => Primitive::I2,
            3 => Primitive::I4,
            4 => Primitive::R4,
            5 => Primitive::R8,
            6 => Primitive::Currency,
            7 => Primitive::Date,
            8 => Primitive::Bstr,
            9 => Primitive::Dispatch,
            10 => Primitive::Scode,
            11 => Primitive::Bool,
            12 => Primitive::Variant,
            13 => Primitive::Unknown,
            14 => Primitive::Decimal,
            16 => Primitive::I1,
            17 => Primitive::UI1,
            18 => Primitive::UI2,
            19 => Primitive::UI4,
            20 => Primitive::I8,
            21 => Primitive::UI8,
            22 => Primitive::Int,
            23 => Primitive::UInt,
            24 => Primitive::Void,
            25 => Primitive::HResult,
            30 => Primitive::LpStr,
            31 => Primitive::LpWStr,
            37 => Primitive::IntPtr,
            38 => Primitive::UIntPtr,
            _ => return None,
        })
    }
}

/// Storage layout of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLayout {
    Struct,
    Union,
}

/// One dimension of a C-style array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayDim {
    pub elements: u32,
    pub lower_bound: i32,
}

/// Bound of an array node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArrayBound {
    Fixed(Vec<ArrayDim>),
    /// `SAFEARRAY(T)`.
    Safe,
}

/// Accessor kind of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvokeKind {
    #[default]
    Func,
    PropertyGet,
    PropertyPut,
    PropertyPutRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: TypeId,
    pub ordinal: usize,
    pub flags: VarFlags,
    pub doc: Documentation,
    pub custom_data: Vec<CustomDataItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumMember {
    pub name: String,
    pub value: i64,
    pub doc: Documentation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub ty: TypeId,
    pub ordinal: usize,
    pub flags: ParamFlags,
    pub custom_data: Vec<CustomDataItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub name: String,
    pub return_type: TypeId,
    pub parameters: Vec<Parameter>,
    /// Byte offset of the method's slot in the v-table.
    pub vtable_offset: i32,
    pub invoke_kind: InvokeKind,
    pub flags: FuncFlags,
    /// Member id, rendered as `id(...)` on dispatch interfaces.
    pub dispatch_id: Option<i32>,
    pub doc: Documentation,
    pub custom_data: Vec<CustomDataItem>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InterfaceDef {
    pub methods: Vec<Method>,
    pub base: Option<TypeId>,
    pub dispatch: bool,
}

/// The closed set of node shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Alias { underlying: Option<TypeId> },
    Enum { members: Vec<EnumMember> },
    Record { layout: RecordLayout, fields: Vec<Field> },
    Interface(InterfaceDef),
    Primitive(Primitive),
    Pointer { target: TypeId },
    Array { element: TypeId, bound: ArrayBound },
}

impl TypeKind {
    /// Declarations carry a name and are rendered at top level; structural
    /// kinds only appear inside other declarations.
    pub fn is_declaration(&self) -> bool {
        matches!(
            self,
            TypeKind::Alias { .. }
                | TypeKind::Enum { .. }
                | TypeKind::Record { .. }
                | TypeKind::Interface(_)
        )
    }
}

/// A child that failed to decode, recorded on its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseIssue {
    /// Ordinal of the failing field, member or method; `None` for the node
    /// itself (alias target, base interface, header).
    pub member: Option<usize>,
    pub error: Error,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ParseState {
    /// Shell created by a first pass, body not built yet.
    #[default]
    Pending,
    Complete,
    Incomplete(Vec<ParseIssue>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeNode {
    pub identity: Identity,
    pub name: String,
    pub doc: Documentation,
    pub custom_data: Vec<CustomDataItem>,
    pub flags: TypeFlags,
    pub version: (u16, u16),
    /// Declared in another binary; only referenced here.
    pub external: bool,
    /// Dropped by a later decode. The slot keeps its index but is no longer
    /// a declaration.
    pub retired: bool,
    pub state: ParseState,
    pub kind: TypeKind,
}

impl TypeNode {
    pub fn is_declaration(&self) -> bool {
        !self.retired && self.kind.is_declaration()
    }

    pub fn is_parsed(&self) -> bool {
        self.state == ParseState::Complete
    }

    pub fn issues(&self) -> &[ParseIssue] {
        match &self.state {
            ParseState::Incomplete(issues) => issues,
            _ => &[],
        }
    }

    pub fn guid(&self) -> Option<Guid> {
        match self.identity {
            Identity::Guid(guid) => Some(guid),
            Identity::Index(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum StructuralKey {
    Primitive(Primitive),
    Pointer(TypeId),
    Array(TypeId, ArrayBound),
}

/// Arena of type nodes with GUID and structural indexes.
#[derive(Debug, Default, Clone)]
pub struct TypeGraph {
    nodes: Vec<TypeNode>,
    by_guid: HashMap<Guid, TypeId>,
    structural: HashMap<StructuralKey, TypeId>,
}

impl TypeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: TypeId) -> &TypeNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: TypeId) -> &mut TypeNode {
        &mut self.nodes[id.0]
    }

    pub fn get(&self, index: usize) -> Option<&TypeNode> {
        self.nodes.get(index)
    }

    pub fn ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        (0..self.nodes.len()).map(TypeId)
    }

    pub fn find_by_guid(&self, guid: &Guid) -> Option<TypeId> {
        self.by_guid.get(guid).copied()
    }

    /// First declaration carrying `name`.
    pub fn find_by_name(&self, name: &str) -> Option<TypeId> {
        self.ids().find(|&id| {
            let node = self.node(id);
            node.is_declaration() && node.name == name
        })
    }

    /// Declarations defined by the decoded sources, in insertion order.
    pub fn roots(&self) -> Vec<TypeId> {
        self.ids()
            .filter(|&id| {
                let node = self.node(id);
                node.is_declaration() && !node.external
            })
            .collect()
    }

    /// Append a declaration node. A non-zero GUID is indexed; use
    /// [`TypeGraph::find_by_guid`] first when merging.
    pub fn add(&mut self, guid: Option<Guid>, name: impl Into<String>, kind: TypeKind) -> TypeId {
        let id = TypeId(self.nodes.len());
        let identity = match guid.filter(|g| !g.is_zero()) {
            Some(guid) => {
                self.by_guid.insert(guid, id);
                Identity::Guid(guid)
            }
            None => Identity::Index(id.0 as u32),
        };
        self.nodes.push(TypeNode {
            identity,
            name: name.into(),
            doc: Documentation::default(),
            custom_data: Vec::new(),
            flags: TypeFlags::empty(),
            version: (0, 0),
            external: false,
            retired: false,
            state: ParseState::Pending,
            kind,
        });
        id
    }

    /// Detach a declaration no decode produces any more. Indices of every
    /// other node stay valid.
    pub fn retire(&mut self, id: TypeId) {
        let node = &mut self.nodes[id.0];
        if let Identity::Guid(guid) = node.identity {
            if self.by_guid.get(&guid) == Some(&id) {
                self.by_guid.remove(&guid);
            }
        }
        node.retired = true;
        node.name.clear();
    }

    fn intern(&mut self, key: StructuralKey, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.structural.get(&key) {
            return id;
        }
        let id = self.add(None, String::new(), kind);
        self.nodes[id.0].state = ParseState::Complete;
        self.structural.insert(key, id);
        id
    }

    pub fn primitive(&mut self, primitive: Primitive) -> TypeId {
        self.intern(
            StructuralKey::Primitive(primitive),
            TypeKind::Primitive(primitive),
        )
    }

    pub fn pointer(&mut self, target: TypeId) -> TypeId {
        self.intern(StructuralKey::Pointer(target), TypeKind::Pointer { target })
    }

    pub fn array(&mut self, element: TypeId, bound: ArrayBound) -> TypeId {
        self.intern(
            StructuralKey::Array(element, bound.clone()),
            TypeKind::Array { element, bound },
        )
    }

    /// Records and interfaces reachable from `id` through pointers, arrays and
    /// aliases, without entering other declarations' bodies.
    pub fn referenced_declarations(&self, id: TypeId, out: &mut Vec<TypeId>) {
        let mut stack = vec![id];
        let mut seen_aliases = Vec::new();
        while let Some(id) = stack.pop() {
            match &self.node(id).kind {
                TypeKind::Pointer { target } => stack.push(*target),
                TypeKind::Array { element, .. } => stack.push(*element),
                TypeKind::Alias { underlying } => {
                    if let Some(underlying) = underlying {
                        if !seen_aliases.contains(&id) {
                            seen_aliases.push(id);
                            stack.push(*underlying);
                        }
                    }
                }
                TypeKind::Record { .. } | TypeKind::Interface(_) => {
                    if !out.contains(&id) {
                        out.push(id);
                    }
                }
                TypeKind::Enum { .. } | TypeKind::Primitive(_) => {}
            }
        }
    }

    /// Type ids a declaration's body refers to, in declaration order.
    pub fn body_references(&self, id: TypeId) -> Vec<TypeId> {
        match &self.node(id).kind {
            TypeKind::Record { fields, .. } => fields.iter().map(|f| f.ty).collect(),
            TypeKind::Interface(def) => def
                .methods
                .iter()
                .flat_map(|m| {
                    std::iter::once(m.return_type).chain(m.parameters.iter().map(|p| p.ty))
                })
                .collect(),
            TypeKind::Alias { underlying } => underlying.iter().copied().collect(),
            _ => Vec::new(),
        }
    }
}
