//! Shared fixture encoders for the integration tests.
//!
//! Produces the little-endian records the decoders consume, so tests can
//! describe inputs field by field.

#![allow(dead_code)]

use tlbview::descriptor::TypeKindTag;
use tlbview::image::{CustomDataTarget, TypeInfoData, TypeLibraryImage, TypeReference};
use tlbview::model::*;
use tlbview::{TypeGraph, TypeId};
use uguid::{Guid, guid};

pub const IUNKNOWN: Guid = guid!("00000000-0000-0000-c000-000000000046");
pub const IID_IFOO: Guid = guid!("12345678-1234-1234-1234-1234567890ab");
pub const IID_IBAR: Guid = guid!("87654321-4321-4321-4321-ba0987654321");

// VARTYPEs
pub const VT_I2: u16 = 2;
pub const VT_I4: u16 = 3;
pub const VT_BSTR: u16 = 8;
pub const VT_VOID: u16 = 24;
pub const VT_HRESULT: u16 = 25;
pub const VT_PTR: u16 = 26;
pub const VT_SAFEARRAY: u16 = 27;
pub const VT_CARRAY: u16 = 28;
pub const VT_USERDEFINED: u16 = 29;
pub const VT_LPWSTR: u16 = 31;

// TYPEKINDs
pub const TKIND_ENUM: u16 = 0;
pub const TKIND_RECORD: u16 = 1;
pub const TKIND_INTERFACE: u16 = 3;
pub const TKIND_DISPATCH: u16 = 4;
pub const TKIND_COCLASS: u16 = 5;
pub const TKIND_ALIAS: u16 = 6;
pub const TKIND_UNION: u16 = 7;

// INVOKEKINDs
pub const INVOKE_FUNC: u16 = 1;
pub const INVOKE_PROPERTYGET: u16 = 2;
pub const INVOKE_PROPERTYPUT: u16 = 4;

// ---------------------------------------------------------------------------
// Byte writer
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct Bytes(pub Vec<u8>);

impl Bytes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(tag: &[u8; 4], version: u16) -> Self {
        let mut b = Self::new();
        b.raw(tag).u16(version);
        b
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.extend_from_slice(bytes);
        self
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.0.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.raw(&v.to_le_bytes())
    }

    pub fn i16(&mut self, v: i16) -> &mut Self {
        self.raw(&v.to_le_bytes())
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.raw(&v.to_le_bytes())
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.raw(&v.to_le_bytes())
    }

    pub fn i64(&mut self, v: i64) -> &mut Self {
        self.raw(&v.to_le_bytes())
    }

    pub fn guid(&mut self, g: Guid) -> &mut Self {
        self.raw(&g.to_bytes())
    }

    pub fn bstr(&mut self, s: &str) -> &mut Self {
        let units: Vec<u16> = s.encode_utf16().collect();
        self.u16(units.len() as u16);
        for unit in units {
            self.u16(unit);
        }
        self
    }

    pub fn blob(&mut self, bytes: &[u8]) -> &mut Self {
        self.u32(bytes.len() as u32).raw(bytes)
    }

    pub fn build(&self) -> Vec<u8> {
        self.0.clone()
    }
}

// ---------------------------------------------------------------------------
// Type descriptors
// ---------------------------------------------------------------------------

pub fn td(vt: u16) -> Vec<u8> {
    vt.to_le_bytes().to_vec()
}

pub fn td_ptr(inner: Vec<u8>) -> Vec<u8> {
    let mut out = td(VT_PTR);
    out.extend(inner);
    out
}

pub fn td_safearray(inner: Vec<u8>) -> Vec<u8> {
    let mut out = td(VT_SAFEARRAY);
    out.extend(inner);
    out
}

pub fn td_carray(elements: &[u32], inner: Vec<u8>) -> Vec<u8> {
    let mut b = Bytes::new();
    b.u16(VT_CARRAY).u16(elements.len() as u16);
    for &n in elements {
        b.u32(n).i32(0);
    }
    b.raw(&inner);
    b.build()
}

pub fn td_user(href: u32) -> Vec<u8> {
    let mut b = Bytes::new();
    b.u16(VT_USERDEFINED).u32(href);
    b.build()
}

/// `ElemDesc`: type descriptor plus parameter flags.
pub fn elem(ty: Vec<u8>, flags: ParamFlags) -> Vec<u8> {
    let mut out = ty;
    out.extend(flags.bits().to_le_bytes());
    out
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

pub struct Attr {
    pub guid: Guid,
    pub typekind: u16,
    pub flags: TypeFlags,
    pub funcs: u16,
    pub vars: u16,
    pub impl_types: u16,
    pub version: (u16, u16),
    pub alias: Option<Vec<u8>>,
}

impl Attr {
    pub fn new(guid: Guid, typekind: u16) -> Self {
        Self {
            guid,
            typekind,
            flags: TypeFlags::empty(),
            funcs: 0,
            vars: 0,
            impl_types: 0,
            version: (0, 0),
            alias: None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut b = Bytes::header(b"TATR", 1);
        b.guid(self.guid)
            .u32(0x409)
            .u16(self.typekind)
            .u16(self.flags.bits())
            .u16(self.funcs)
            .u16(self.vars)
            .u16(self.impl_types)
            .u16(8 * (3 + self.funcs))
            .u32(4)
            .u16(4)
            .u16(self.version.0)
            .u16(self.version.1);
        if let Some(alias) = &self.alias {
            b.raw(alias);
        }
        b.build()
    }
}

/// `FUNC` record with `FUNC_PUREVIRTUAL` and `CC_STDCALL`.
pub fn func(
    memid: i32,
    invkind: u16,
    vtable_offset: i16,
    flags: FuncFlags,
    ret: Vec<u8>,
    params: &[Vec<u8>],
) -> Vec<u8> {
    let mut b = Bytes::header(b"FUNC", 1);
    b.i32(memid)
        .u16(1)
        .u16(invkind)
        .u16(4)
        .u16(params.len() as u16)
        .i16(0)
        .i16(vtable_offset)
        .u16(flags.bits())
        .raw(&ret);
    for p in params {
        b.raw(p);
    }
    b.build()
}

pub fn var_instance(memid: i32, offset: u32, flags: VarFlags, ty: Vec<u8>) -> Vec<u8> {
    let mut b = Bytes::header(b"VARD", 1);
    b.i32(memid)
        .u16(0)
        .u16(flags.bits())
        .u32(offset)
        .raw(&elem(ty, ParamFlags::empty()));
    b.build()
}

pub fn var_const(memid: i32, value: i64) -> Vec<u8> {
    let mut b = Bytes::header(b"VARD", 1);
    b.i32(memid)
        .u16(2)
        .u16(0)
        .i64(value)
        .raw(&elem(td(VT_I4), ParamFlags::empty()));
    b.build()
}

// ---------------------------------------------------------------------------
// Type infos and libraries
// ---------------------------------------------------------------------------

pub fn type_info(index: u32, name: &str, attr: &Attr) -> TypeInfoData {
    TypeInfoData {
        index,
        documentation: Documentation {
            name: name.to_string(),
            ..Documentation::default()
        },
        attr: attr.encode(),
        ..TypeInfoData::default()
    }
}

pub fn named(info: &mut TypeInfoData, memid: i32, ordinal: usize, name: &str) {
    info.names.insert((memid, ordinal), name.to_string());
}

pub fn external_iunknown(info: &mut TypeInfoData, href: u32) {
    info.references.insert(
        href,
        TypeReference::External {
            guid: IUNKNOWN,
            name: "IUnknown".to_string(),
            kind: TypeKindTag::Interface,
        },
    );
    info.impl_types.push(tlbview::image::ImplType {
        href,
        flags: ImplTypeFlags::empty(),
    });
}

pub fn library(name: &str, types: Vec<TypeInfoData>) -> TypeLibraryImage {
    TypeLibraryImage {
        libid: guid!("0f0e0d0c-0b0a-0908-0706-050403020100"),
        version: (1, 0),
        name: name.to_string(),
        doc_string: String::new(),
        types,
    }
}

fn typekind_raw(kind: TypeKindTag) -> u16 {
    match kind {
        TypeKindTag::Enum => 0,
        TypeKindTag::Record => 1,
        TypeKindTag::Module => 2,
        TypeKindTag::Interface => 3,
        TypeKindTag::Dispatch => 4,
        TypeKindTag::CoClass => 5,
        TypeKindTag::Alias => 6,
        TypeKindTag::Union => 7,
    }
}

/// Serialize an image into the `TLIB` container.
pub fn encode_library(image: &TypeLibraryImage) -> Vec<u8> {
    let mut b = Bytes::header(b"TLIB", 1);
    b.guid(image.libid)
        .u16(image.version.0)
        .u16(image.version.1)
        .bstr(&image.name)
        .bstr(&image.doc_string)
        .u32(image.types.len() as u32);
    for info in &image.types {
        let doc = &info.documentation;
        b.bstr(&doc.name)
            .bstr(&doc.doc_string)
            .u32(doc.help_context)
            .bstr(&doc.help_file)
            .blob(&info.attr);
        b.u16(info.funcs.len() as u16);
        for f in &info.funcs {
            b.blob(f);
        }
        b.u16(info.vars.len() as u16);
        for v in &info.vars {
            b.blob(v);
        }
        b.u16(info.impl_types.len() as u16);
        for t in &info.impl_types {
            b.u32(t.href).u16(t.flags.bits());
        }
        b.u16(info.references.len() as u16);
        for (href, target) in &info.references {
            b.u32(*href);
            match target {
                TypeReference::Local(index) => {
                    b.u8(0).u32(*index);
                }
                TypeReference::External { guid, name, kind } => {
                    b.u8(1).guid(*guid).bstr(name).u16(typekind_raw(*kind));
                }
            }
        }
        b.u32(info.names.len() as u32);
        for ((memid, ordinal), name) in &info.names {
            b.i32(*memid).u16(*ordinal as u16).bstr(name);
        }
        b.u32(info.member_docs.len() as u32);
        for (memid, doc) in &info.member_docs {
            b.i32(*memid)
                .bstr(&doc.name)
                .bstr(&doc.doc_string)
                .u32(doc.help_context);
        }
        b.u32(info.custom_data.len() as u32);
        for (target, item) in &info.custom_data {
            let (raw, first, second) = match *target {
                CustomDataTarget::Type => (0, 0, 0),
                CustomDataTarget::Func(i) => (1, i, 0),
                CustomDataTarget::Param(i, j) => (2, i, j),
                CustomDataTarget::Var(i) => (3, i, 0),
            };
            b.u8(raw).u16(first as u16).u16(second as u16).guid(item.guid);
            match &item.value {
                CustomValue::Int(v) => {
                    b.u8(0).i64(*v);
                }
                CustomValue::Str(s) => {
                    b.u8(1).bstr(s);
                }
            }
        }
    }
    b.build()
}

// ---------------------------------------------------------------------------
// Libraries used by several test files
// ---------------------------------------------------------------------------

/// `IFoo : IUnknown { HRESULT Get([in] long value, [out] long* result); }`
pub fn ifoo_type_info(index: u32) -> TypeInfoData {
    let mut attr = Attr::new(IID_IFOO, TKIND_INTERFACE);
    attr.funcs = 1;
    attr.impl_types = 1;
    let mut info = type_info(index, "IFoo", &attr);
    info.funcs.push(func(
        0x6001_0000,
        INVOKE_FUNC,
        24,
        FuncFlags::empty(),
        elem(td(VT_HRESULT), ParamFlags::empty()),
        &[
            elem(td(VT_I4), ParamFlags::IN),
            elem(td_ptr(td(VT_I4)), ParamFlags::OUT),
        ],
    ));
    named(&mut info, 0x6001_0000, 0, "Get");
    named(&mut info, 0x6001_0000, 1, "value");
    named(&mut info, 0x6001_0000, 2, "result");
    external_iunknown(&mut info, 0);
    info
}

// ---------------------------------------------------------------------------
// Proxy images
// ---------------------------------------------------------------------------

pub const FC_LONG: u8 = 0x08;
pub const FC_SHORT: u8 = 0x06;
pub const FC_AUTO_HANDLE: u8 = 0x33;

pub const PARAM_IN: u16 = 0x0008;
pub const PARAM_OUT: u16 = 0x0010;
pub const PARAM_RETURN: u16 = 0x0020;
pub const PARAM_BASETYPE: u16 = 0x0040;
pub const PARAM_SIMPLE_REF: u16 = 0x0100;

/// Parameter type as written after the attribute and stack offset words.
pub enum ProcParam {
    Base(u8),
    Type(u16),
}

/// `-Oif` object procedure with an implicit handle and no extensions.
pub fn procedure(proc_num: u16, params: &[(u16, ProcParam)]) -> Vec<u8> {
    procedure_with_flags(proc_num, 0x40 | 0x02 | 0x04, params)
}

pub fn procedure_with_flags(proc_num: u16, oi_flags: u8, params: &[(u16, ProcParam)]) -> Vec<u8> {
    let mut b = Bytes::new();
    b.u8(FC_AUTO_HANDLE)
        .u8(oi_flags)
        .u16(proc_num)
        .u16(8 * (params.len() as u16 + 1))
        .u16(0)
        .u16(8)
        .u8(0x06)
        .u8(params.len() as u8);
    for (i, (attributes, ty)) in params.iter().enumerate() {
        b.u16(*attributes).u16(8 * (i as u16 + 1));
        match ty {
            ProcParam::Base(fc) => {
                b.u8(*fc).u8(0);
            }
            ProcParam::Type(offset) => {
                b.u16(*offset);
            }
        }
    }
    b.build()
}

/// `NDRP` image. Procedures are laid out back to back; `None` slots are
/// inherited.
pub fn proxy_image(base: Guid, procs: &[Option<Vec<u8>>], type_format: &[u8]) -> Vec<u8> {
    let mut proc_format = Vec::new();
    let mut offsets = Vec::new();
    for p in procs {
        match p {
            Some(bytes) => {
                offsets.push(proc_format.len() as u16);
                proc_format.extend_from_slice(bytes);
            }
            None => offsets.push(0xFFFF),
        }
    }
    let mut b = Bytes::header(b"NDRP", 1);
    b.guid(base).u16(offsets.len() as u16);
    for o in offsets {
        b.u16(o);
    }
    b.blob(&proc_format).blob(type_format);
    b.build()
}

/// Proxy equivalent of [`ifoo_type_info`]: slots 0-2 inherited, `Get` at 3.
pub fn ifoo_proxy() -> Vec<u8> {
    let get = procedure(
        3,
        &[
            (PARAM_IN | PARAM_BASETYPE, ProcParam::Base(FC_LONG)),
            (
                PARAM_OUT | PARAM_BASETYPE | PARAM_SIMPLE_REF,
                ProcParam::Base(FC_LONG),
            ),
            (PARAM_OUT | PARAM_RETURN | PARAM_BASETYPE, ProcParam::Base(FC_LONG)),
        ],
    );
    proxy_image(IUNKNOWN, &[None, None, None, Some(get)], &[0, 0])
}

// ---------------------------------------------------------------------------
// Hand-built graphs
// ---------------------------------------------------------------------------

pub fn method(name: &str, ret: TypeId, params: &[(&str, TypeId, ParamFlags)]) -> Method {
    Method {
        name: name.to_string(),
        return_type: ret,
        parameters: params
            .iter()
            .enumerate()
            .map(|(i, (n, ty, flags))| Parameter {
                name: n.to_string(),
                ty: *ty,
                ordinal: i,
                flags: *flags,
                custom_data: Vec::new(),
            })
            .collect(),
        vtable_offset: 0,
        invoke_kind: InvokeKind::Func,
        flags: FuncFlags::empty(),
        dispatch_id: None,
        doc: Documentation::default(),
        custom_data: Vec::new(),
    }
}

pub fn field(name: &str, ty: TypeId) -> Field {
    Field {
        name: name.to_string(),
        ty,
        ordinal: 0,
        flags: VarFlags::empty(),
        doc: Documentation::default(),
        custom_data: Vec::new(),
    }
}

/// Add a complete declaration node.
pub fn declare(graph: &mut TypeGraph, guid: Option<Guid>, name: &str, kind: TypeKind) -> TypeId {
    let id = graph.add(guid, name, kind);
    graph.node_mut(id).state = ParseState::Complete;
    id
}

/// Complete interface node with the given methods.
pub fn interface(
    graph: &mut TypeGraph,
    guid: Guid,
    name: &str,
    base: Option<TypeId>,
    methods: Vec<Method>,
) -> TypeId {
    declare(
        graph,
        Some(guid),
        name,
        TypeKind::Interface(InterfaceDef {
            methods,
            base,
            dispatch: false,
        }),
    )
}

/// External `IUnknown` node.
pub fn iunknown(graph: &mut TypeGraph) -> TypeId {
    let id = declare(
        graph,
        Some(IUNKNOWN),
        "IUnknown",
        TypeKind::Interface(InterfaceDef::default()),
    );
    graph.node_mut(id).external = true;
    id
}
