//! Typed records decoded from type-library descriptor bytes.
//!
//! Layouts mirror `TYPEATTR`, `FUNCDESC`, `VARDESC`, `ELEMDESC` and
//! `TYPEDESC`, flattened into tagged little-endian records with no pointers.

use uguid::Guid;

use crate::error::{Error, Result};
use crate::model::{ArrayDim, FuncFlags, InvokeKind, ParamFlags, Primitive, TypeFlags, VarFlags};
use crate::reader::Reader;

const VT_PTR: u16 = 26;
const VT_SAFEARRAY: u16 = 27;
const VT_CARRAY: u16 = 28;
const VT_USERDEFINED: u16 = 29;

const MAX_TYPEDESC_DEPTH: usize = 64;

/// `TYPEKIND` of a type info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKindTag {
    Enum,
    Record,
    Module,
    Interface,
    Dispatch,
    CoClass,
    Alias,
    Union,
}

impl TypeKindTag {
    pub fn from_raw(raw: u16) -> Option<Self> {
        Some(match raw {
            0 => TypeKindTag::Enum,
            1 => TypeKindTag::Record,
            2 => TypeKindTag::Module,
            3 => TypeKindTag::Interface,
            4 => TypeKindTag::Dispatch,
            5 => TypeKindTag::CoClass,
            6 => TypeKindTag::Alias,
            7 => TypeKindTag::Union,
            _ => return None,
        })
    }
}

/// Recursive type descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDesc {
    Base(Primitive),
    Ptr(Box<TypeDesc>),
    SafeArray(Box<TypeDesc>),
    CArray {
        dims: Vec<ArrayDim>,
        element: Box<TypeDesc>,
    },
    /// Reference through the owning type info's hreftype table.
    UserDefined(u32),
}

impl TypeDesc {
    pub fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Self::decode_at_depth(reader, 0)
    }

    fn decode_at_depth(reader: &mut Reader<'_>, depth: usize) -> Result<Self> {
        if depth > MAX_TYPEDESC_DEPTH {
            return Err(Error::malformed(
                reader.pos(),
                format!("type descriptor nested deeper than {MAX_TYPEDESC_DEPTH}"),
            ));
        }
        let start = reader.pos();
        let vt = reader.read_u16()?;
        Ok(match vt {
            VT_PTR => TypeDesc::Ptr(Box::new(Self::decode_at_depth(reader, depth + 1)?)),
            VT_SAFEARRAY => {
                TypeDesc::SafeArray(Box::new(Self::decode_at_depth(reader, depth + 1)?))
            }
            VT_CARRAY => {
                let count = reader.read_u16()?;
                if count == 0 {
                    return Err(Error::malformed(start, "C array with zero dimensions"));
                }
                let mut dims = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    dims.push(ArrayDim {
                        elements: reader.read_u32()?,
                        lower_bound: reader.read_i32()?,
                    });
                }
                let element = Box::new(Self::decode_at_depth(reader, depth + 1)?);
                TypeDesc::CArray { dims, element }
            }
            VT_USERDEFINED => TypeDesc::UserDefined(reader.read_u32()?),
            other => TypeDesc::Base(
                Primitive::from_vt(other)
                    .ok_or_else(|| Error::UnsupportedLayout(format!("VARTYPE {other:#06x}")))?,
            ),
        })
    }
}

/// Type descriptor plus parameter flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElemDesc {
    pub ty: TypeDesc,
    pub flags: ParamFlags,
}

impl ElemDesc {
    pub fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let ty = TypeDesc::decode(reader)?;
        let flags = ParamFlags::from_bits_retain(reader.read_u16()?);
        Ok(Self { ty, flags })
    }
}

/// `TYPEATTR` equivalent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeAttr {
    pub guid: Guid,
    pub lcid: u32,
    pub typekind: TypeKindTag,
    pub flags: TypeFlags,
    pub funcs: u16,
    pub vars: u16,
    pub impl_types: u16,
    pub size_vft: u16,
    pub size_instance: u32,
    pub alignment: u16,
    pub major_version: u16,
    pub minor_version: u16,
    /// Present only for aliases.
    pub alias: Option<TypeDesc>,
}

impl TypeAttr {
    pub const TAG: &'static [u8; 4] = b"TATR";

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        r.read_header(Self::TAG, &[1])?;
        let guid = r.read_guid()?;
        let lcid = r.read_u32()?;
        let raw_kind = r.read_u16()?;
        let typekind = TypeKindTag::from_raw(raw_kind).ok_or_else(|| {
            Error::malformed(r.pos() - 2, format!("unknown TYPEKIND {raw_kind}"))
        })?;
        let flags = TypeFlags::from_bits_retain(r.read_u16()?);
        let funcs = r.read_u16()?;
        let vars = r.read_u16()?;
        let impl_types = r.read_u16()?;
        let size_vft = r.read_u16()?;
        let size_instance = r.read_u32()?;
        let alignment = r.read_u16()?;
        let major_version = r.read_u16()?;
        let minor_version = r.read_u16()?;
        let alias = match typekind {
            TypeKindTag::Alias => Some(TypeDesc::decode(&mut r)?),
            _ => None,
        };
        r.finish()?;
        Ok(Self {
            guid,
            lcid,
            typekind,
            flags,
            funcs,
            vars,
            impl_types,
            size_vft,
            size_instance,
            alignment,
            major_version,
            minor_version,
            alias,
        })
    }
}

/// `FUNCKIND` of a function descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncKind {
    Virtual,
    PureVirtual,
    NonVirtual,
    Static,
    Dispatch,
}

/// `FUNCDESC` equivalent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncDesc {
    pub memid: i32,
    pub funckind: FuncKind,
    pub invkind: InvokeKind,
    pub callconv: u16,
    pub params_opt: i16,
    pub vtable_offset: i16,
    pub flags: FuncFlags,
    pub ret: ElemDesc,
    pub params: Vec<ElemDesc>,
}

impl FuncDesc {
    pub const TAG: &'static [u8; 4] = b"FUNC";

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        r.read_header(Self::TAG, &[1])?;
        let memid = r.read_i32()?;
        let at = r.pos();
        let funckind = match r.read_u16()? {
            0 => FuncKind::Virtual,
            1 => FuncKind::PureVirtual,
            2 => FuncKind::NonVirtual,
            3 => FuncKind::Static,
            4 => FuncKind::Dispatch,
            other => return Err(Error::malformed(at, format!("unknown FUNCKIND {other}"))),
        };
        let at = r.pos();
        let invkind = match r.read_u16()? {
            1 => InvokeKind::Func,
            2 => InvokeKind::PropertyGet,
            4 => InvokeKind::PropertyPut,
            8 => InvokeKind::PropertyPutRef,
            other => return Err(Error::malformed(at, format!("unknown INVOKEKIND {other}"))),
        };
        let callconv = r.read_u16()?;
        let param_count = r.read_u16()?;
        let params_opt = r.read_i16()?;
        let vtable_offset = r.read_i16()?;
        let flags = FuncFlags::from_bits_retain(r.read_u16()?);
        let ret = ElemDesc::decode(&mut r)?;
        let mut params = Vec::with_capacity(param_count as usize);
        for _ in 0..param_count {
            params.push(ElemDesc::decode(&mut r)?);
        }
        r.finish()?;
        Ok(Self {
            memid,
            funckind,
            invkind,
            callconv,
            params_opt,
            vtable_offset,
            flags,
            ret,
            params,
        })
    }
}

/// `VARKIND` plus the kind-specific payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    PerInstance { offset: u32 },
    Static,
    Const(i64),
    Dispatch,
}

/// `VARDESC` equivalent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarDesc {
    pub memid: i32,
    pub kind: VarKind,
    pub flags: VarFlags,
    pub elem: ElemDesc,
}

impl VarDesc {
    pub const TAG: &'static [u8; 4] = b"VARD";

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        r.read_header(Self::TAG, &[1])?;
        let memid = r.read_i32()?;
        let at = r.pos();
        let raw_kind = r.read_u16()?;
        let flags = VarFlags::from_bits_retain(r.read_u16()?);
        let kind = match raw_kind {
            0 => VarKind::PerInstance {
                offset: r.read_u32()?,
            },
            1 => {
                r.read_u32()?;
                VarKind::Static
            }
            2 => VarKind::Const(r.read_i64()?),
            3 => {
                r.read_u32()?;
                VarKind::Dispatch
            }
            other => return Err(Error::malformed(at, format!("unknown VARKIND {other}"))),
        };
        let elem = ElemDesc::decode(&mut r)?;
        r.finish()?;
        Ok(Self {
            memid,
            kind,
            flags,
            elem,
        })
    }
}
