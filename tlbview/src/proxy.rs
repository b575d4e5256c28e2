//! Proxy decoding: NDR procedure tables → interface nodes.
//!
//! An `NDRP` image carries what a proxy file exposes for one interface: the
//! base IID, the procedure format offset of every v-table slot and the
//! procedure and type format strings (`-Oicf` interpreter encoding).
//! Complex NDR types become anonymous records named `Struct_{n}`. A record
//! is keyed by its interface and type format offset, so decoding the same
//! interface again updates the records in place.

use std::collections::HashMap;

use tracing::{debug, info, warn};
use uguid::Guid;

use crate::builder::TypeGraphBuilder;
use crate::error::{Error, Result};
use crate::model::*;
use crate::names::NameLookup;
use crate::reader::Reader;

// ---------------------------------------------------------------------------
// Format characters
// ---------------------------------------------------------------------------

mod fc {
    pub const BYTE: u8 = 0x01;
    pub const CHAR: u8 = 0x02;
    pub const SMALL: u8 = 0x03;
    pub const USMALL: u8 = 0x04;
    pub const WCHAR: u8 = 0x05;
    pub const SHORT: u8 = 0x06;
    pub const USHORT: u8 = 0x07;
    pub const LONG: u8 = 0x08;
    pub const ULONG: u8 = 0x09;
    pub const FLOAT: u8 = 0x0a;
    pub const HYPER: u8 = 0x0b;
    pub const DOUBLE: u8 = 0x0c;
    pub const ENUM16: u8 = 0x0d;
    pub const ENUM32: u8 = 0x0e;
    pub const ERROR_STATUS_T: u8 = 0x10;
    pub const RP: u8 = 0x11;
    pub const UP: u8 = 0x12;
    pub const OP: u8 = 0x13;
    pub const FP: u8 = 0x14;
    pub const STRUCT: u8 = 0x15;
    pub const BOGUS_STRUCT: u8 = 0x1a;
    pub const SMFARRAY: u8 = 0x1d;
    pub const C_CSTRING: u8 = 0x22;
    pub const C_WSTRING: u8 = 0x25;
    pub const IP: u8 = 0x2f;
    pub const BIND_CONTEXT: u8 = 0x30;
    pub const BIND_GENERIC: u8 = 0x31;
    pub const BIND_PRIMITIVE: u8 = 0x32;
    pub const POINTER: u8 = 0x36;
    pub const ALIGNM2: u8 = 0x37;
    pub const ALIGNM8: u8 = 0x39;
    pub const STRUCTPAD1: u8 = 0x3d;
    pub const STRUCTPAD7: u8 = 0x43;
    pub const EMBEDDED_COMPLEX: u8 = 0x4c;
    pub const CONSTANT_IID: u8 = 0x5a;
    pub const END: u8 = 0x5b;
    pub const PAD: u8 = 0x5c;
    pub const INT3264: u8 = 0xb8;
    pub const UINT3264: u8 = 0xb9;

    /// Pointer attribute: the pointee is a base type inline.
    pub const SIMPLE_POINTER: u8 = 0x08;
}

const OI_HAS_RPCFLAGS: u8 = 0x08;
const OI_OBJECT_PROC: u8 = 0x40;
const OI_OBJ_USE_V2_INTERPRETER: u8 = 0x02;
const OPT_HAS_EXTENSIONS: u8 = 0x40;

const PARAM_IS_IN: u16 = 0x0008;
const PARAM_IS_OUT: u16 = 0x0010;
const PARAM_IS_RETURN: u16 = 0x0020;
const PARAM_IS_BASETYPE: u16 = 0x0040;
const PARAM_IS_SIMPLE_REF: u16 = 0x0100;

/// Slots inherited from the base interface carry this offset.
const INHERITED_PROC: u16 = 0xFFFF;

const MAX_TYPE_DEPTH: usize = 64;
const POINTER_SIZE: u32 = 8;

// ---------------------------------------------------------------------------
// Image
// ---------------------------------------------------------------------------

/// A decoded `NDRP` image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyImage<'a> {
    /// Zero when the interface has no base.
    pub base_iid: Guid,
    pub proc_offsets: Vec<u16>,
    pub proc_format: &'a [u8],
    pub type_format: &'a [u8],
}

impl<'a> ProxyImage<'a> {
    pub const TAG: &'static [u8; 4] = b"NDRP";

    pub fn decode(bytes: &'a [u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        r.read_header(Self::TAG, &[1])?;
        let base_iid = r.read_guid()?;
        let count = r.read_u16()?;
        let proc_offsets = (0..count)
            .map(|_| r.read_u16())
            .collect::<Result<Vec<_>>>()?;
        let proc_format = r.read_blob()?;
        let type_format = r.read_blob()?;
        r.finish()?;
        Ok(Self {
            base_iid,
            proc_offsets,
            proc_format,
            type_format,
        })
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

pub struct ProxyDecoder;

impl ProxyDecoder {
    /// Decode a proxy image into an interface node identified by `iid`.
    ///
    /// Decoding stops at the first procedure that fails; the methods before
    /// it are kept and the node is left incomplete (an error under strict
    /// builds). Records the failing procedure introduced are retired, as are
    /// records of an earlier decode of `iid` that this one no longer reaches.
    pub fn decode(
        builder: &mut TypeGraphBuilder,
        data: &[u8],
        iid: Guid,
        name: Option<&str>,
        names: &dyn NameLookup,
    ) -> Result<TypeId> {
        let image = ProxyImage::decode(data)?;

        let name = match name {
            Some(name) => name.to_string(),
            None => builder
                .graph()
                .find_by_guid(&iid)
                .map(|id| builder.graph().node(id).name.clone())
                .unwrap_or_default(),
        };
        let id = builder.declare(iid, &name, TypeKind::Interface(InterfaceDef::default()));
        let base = (!image.base_iid.is_zero())
            .then(|| builder.external_interface(image.base_iid, None));

        let previous = builder.take_proxy_structs(iid);
        let mut types = TypeFormat {
            builder: &mut *builder,
            format: image.type_format,
            memo: HashMap::new(),
            previous,
            current: HashMap::new(),
            created: Vec::new(),
        };
        let mut methods = Vec::new();
        let mut issues = Vec::new();
        for (slot, &offset) in image.proc_offsets.iter().enumerate() {
            if offset == INHERITED_PROC {
                continue;
            }
            let mark = types.created.len();
            match decode_procedure(&mut types, image.proc_format, offset as usize, names) {
                Ok(method) => {
                    debug!(method = %method.name, params = method.parameters.len(), "decoded procedure");
                    methods.push(method);
                }
                Err(error) => {
                    warn!(slot, offset, err = %error, "procedure failed to decode, stopping");
                    types.discard_since(mark);
                    issues.push(ParseIssue {
                        member: Some(slot),
                        error,
                    });
                    break;
                }
            }
        }
        let TypeFormat {
            previous, current, ..
        } = types;
        for (offset, stale) in previous {
            debug!(offset, index = stale.index(), "retiring record the decode no longer reaches");
            builder.graph_mut().retire(stale);
        }
        let structs = current.len();
        builder.set_proxy_structs(iid, current);

        let strict = builder.options().strict;
        let node = builder.graph_mut().node_mut(id);
        node.kind = TypeKind::Interface(InterfaceDef {
            methods,
            base,
            dispatch: false,
        });
        info!(
            %iid,
            name = %node.name,
            slots = image.proc_offsets.len(),
            structs,
            issues = issues.len(),
            "decoded proxy"
        );
        match issues.first() {
            None => node.state = ParseState::Complete,
            Some(first) => {
                let first = first.error.clone();
                node.state = ParseState::Incomplete(issues);
                if strict {
                    return Err(first);
                }
            }
        }
        Ok(id)
    }
}

fn decode_procedure(
    types: &mut TypeFormat<'_, '_>,
    proc_format: &[u8],
    offset: usize,
    names: &dyn NameLookup,
) -> Result<Method> {
    let mut r = Reader::at(proc_format, offset)?;
    let handle_type = r.read_u8()?;
    let oi_flags = r.read_u8()?;
    let required = OI_OBJECT_PROC | OI_OBJ_USE_V2_INTERPRETER;
    if oi_flags & required != required {
        return Err(Error::unsupported_proc(
            offset,
            format!("Oi flags {oi_flags:#04x} are not an -Oif object procedure"),
        ));
    }
    if oi_flags & OI_HAS_RPCFLAGS != 0 {
        r.read_u32()?;
    }
    let proc_num = r.read_u16()?;
    let _stack_size = r.read_u16()?;
    if handle_type == 0 {
        let at = r.pos();
        match r.read_u8()? {
            fc::BIND_PRIMITIVE => r.skip(3)?,
            fc::BIND_GENERIC | fc::BIND_CONTEXT => r.skip(5)?,
            other => {
                return Err(Error::unsupported_proc(
                    at,
                    format!("explicit handle {other:#04x}"),
                ));
            }
        }
    }
    let _client_buffer = r.read_u16()?;
    let _server_buffer = r.read_u16()?;
    let opt_flags = r.read_u8()?;
    let param_count = r.read_u8()?;
    if opt_flags & OPT_HAS_EXTENSIONS != 0 {
        let size = r.read_u8()? as usize;
        r.skip(size.saturating_sub(1))?;
    }

    let method_id = proc_num as i32;
    let mut parameters = Vec::new();
    let mut return_type = None;
    for _ in 0..param_count {
        let attributes = r.read_u16()?;
        let _stack_offset = r.read_u16()?;
        let ty = if attributes & PARAM_IS_BASETYPE != 0 {
            let at = r.pos();
            let code = r.read_u8()?;
            r.read_u8()?;
            if attributes & PARAM_IS_RETURN != 0 && code == fc::LONG {
                types.builder.graph_mut().primitive(Primitive::HResult)
            } else {
                let primitive = base_type(code)
                    .ok_or_else(|| Error::unsupported_proc(at, format!("base type {code:#04x}")))?;
                let ty = types.builder.graph_mut().primitive(primitive);
                if attributes & PARAM_IS_SIMPLE_REF != 0 {
                    types.builder.graph_mut().pointer(ty)
                } else {
                    ty
                }
            }
        } else {
            let type_offset = r.read_u16()? as usize;
            let (ty, _) = types.decode(type_offset, 0)?;
            ty
        };

        if attributes & PARAM_IS_RETURN != 0 {
            return_type = Some(ty);
            continue;
        }
        let ordinal = parameters.len();
        let mut flags = ParamFlags::empty();
        if attributes & PARAM_IS_IN != 0 {
            flags |= ParamFlags::IN;
        }
        if attributes & PARAM_IS_OUT != 0 {
            flags |= ParamFlags::OUT;
        }
        parameters.push(Parameter {
            name: names
                .name(method_id, ordinal + 1)
                .unwrap_or_else(|| format!("p{ordinal}")),
            ty,
            ordinal,
            flags,
            custom_data: Vec::new(),
        });
    }

    let return_type = match return_type {
        Some(ty) => ty,
        None => types.builder.graph_mut().primitive(Primitive::Void),
    };
    Ok(Method {
        name: names
            .name(method_id, 0)
            .unwrap_or_else(|| format!("Proc{proc_num}")),
        return_type,
        parameters,
        vtable_offset: proc_num as i32 * POINTER_SIZE as i32,
        invoke_kind: InvokeKind::Func,
        flags: FuncFlags::empty(),
        dispatch_id: None,
        doc: Documentation::default(),
        custom_data: Vec::new(),
    })
}

/// Type format string walker. Complex types are decoded once per offset.
struct TypeFormat<'b, 'f> {
    builder: &'b mut TypeGraphBuilder,
    format: &'f [u8],
    /// Type format offset → (node, memory size).
    memo: HashMap<usize, (TypeId, u32)>,
    /// Records of the previous decode not yet reused, by offset.
    previous: HashMap<usize, TypeId>,
    /// Records of this decode, by offset.
    current: HashMap<usize, TypeId>,
    /// Offsets in `current`, in creation order.
    created: Vec<usize>,
}

impl TypeFormat<'_, '_> {
    /// Retire the records created after `mark`.
    fn discard_since(&mut self, mark: usize) {
        for offset in self.created.drain(mark..) {
            self.memo.remove(&offset);
            if let Some(id) = self.current.remove(&offset) {
                self.builder.graph_mut().retire(id);
            }
        }
    }

    /// Node for the record at `offset`: the previous decode's, reset, or a
    /// new one.
    fn record_node(&mut self, offset: usize) -> TypeId {
        let name = format!("Struct_{}", self.created.len());
        let empty = TypeKind::Record {
            layout: RecordLayout::Struct,
            fields: Vec::new(),
        };
        let graph = self.builder.graph_mut();
        let id = match self.previous.remove(&offset) {
            Some(id) => {
                let node = graph.node_mut(id);
                node.name = name;
                node.kind = empty;
                node.retired = false;
                node.state = ParseState::Pending;
                id
            }
            None => graph.add(None, name, empty),
        };
        self.current.insert(offset, id);
        self.created.push(offset);
        id
    }

    /// Decode the type description at `offset`; returns the node and its
    /// memory size.
    fn decode(&mut self, offset: usize, depth: usize) -> Result<(TypeId, u32)> {
        if depth > MAX_TYPE_DEPTH {
            return Err(Error::unsupported_proc(
                offset,
                format!("type nested deeper than {MAX_TYPE_DEPTH}"),
            ));
        }
        if let Some(&known) = self.memo.get(&offset) {
            return Ok(known);
        }
        let mut r = Reader::at(self.format, offset)?;
        let code = r.read_u8()?;
        match code {
            fc::RP | fc::UP | fc::OP | fc::FP => self.pointer(&mut r, depth),
            fc::IP => {
                let at = r.pos();
                if r.read_u8()? != fc::CONSTANT_IID {
                    return Err(Error::unsupported_proc(at, "interface pointer without a constant IID"));
                }
                let iid = r.read_guid()?;
                let target = self.builder.external_interface(iid, None);
                Ok((self.builder.graph_mut().pointer(target), POINTER_SIZE))
            }
            fc::C_CSTRING => Ok((self.builder.graph_mut().primitive(Primitive::Char), 1)),
            fc::C_WSTRING => Ok((self.builder.graph_mut().primitive(Primitive::WChar), 2)),
            fc::STRUCT | fc::BOGUS_STRUCT => self.structure(offset, code, &mut r, depth),
            fc::SMFARRAY => self.fixed_array(&mut r, depth),
            code => match base_type(code) {
                Some(primitive) => {
                    Ok((self.builder.graph_mut().primitive(primitive), base_size(code)))
                }
                None => Err(Error::unsupported_proc(offset, format!("type format {code:#04x}"))),
            },
        }
    }

    /// Pointer descriptor whose type byte has already been read.
    fn pointer(&mut self, r: &mut Reader<'_>, depth: usize) -> Result<(TypeId, u32)> {
        let attributes = r.read_u8()?;
        if attributes & fc::SIMPLE_POINTER != 0 {
            let at = r.pos();
            let code = r.read_u8()?;
            r.read_u8()?;
            let pointee = match code {
                fc::C_CSTRING => return Ok((self.string(Primitive::LpStr), POINTER_SIZE)),
                fc::C_WSTRING => return Ok((self.string(Primitive::LpWStr), POINTER_SIZE)),
                code => base_type(code)
                    .ok_or_else(|| Error::unsupported_proc(at, format!("simple pointer to {code:#04x}")))?,
            };
            let target = self.builder.graph_mut().primitive(pointee);
            return Ok((self.builder.graph_mut().pointer(target), POINTER_SIZE));
        }

        let target_offset = relative_offset(r)?;
        let pointee_code = self.format.get(target_offset).copied();
        match pointee_code {
            Some(fc::C_CSTRING) => Ok((self.string(Primitive::LpStr), POINTER_SIZE)),
            Some(fc::C_WSTRING) => Ok((self.string(Primitive::LpWStr), POINTER_SIZE)),
            _ => {
                let (target, _) = self.decode(target_offset, depth + 1)?;
                Ok((self.builder.graph_mut().pointer(target), POINTER_SIZE))
            }
        }
    }

    fn string(&mut self, primitive: Primitive) -> TypeId {
        self.builder.graph_mut().primitive(primitive)
    }

    /// `FC_STRUCT` / `FC_BOGUS_STRUCT` at `offset`, type byte already read.
    fn structure(
        &mut self,
        offset: usize,
        code: u8,
        r: &mut Reader<'_>,
        depth: usize,
    ) -> Result<(TypeId, u32)> {
        let _alignment = r.read_u8()?;
        let memory_size = r.read_u16()? as u32;

        let mut pointer_layout = None;
        if code == fc::BOGUS_STRUCT {
            let at = r.pos();
            if r.read_i16()? != 0 {
                return Err(Error::unsupported_proc(at, "conformant bogus struct"));
            }
            let at = r.pos();
            let relative = r.read_i16()?;
            if relative != 0 {
                pointer_layout = Some(offset_from(at, relative)?);
            }
        }

        let id = self.record_node(offset);
        self.memo.insert(offset, (id, memory_size));

        let mut pointers = match pointer_layout {
            Some(at) => Some(Reader::at(self.format, at)?),
            None => None,
        };
        let mut fields = Vec::new();
        loop {
            let at = r.pos();
            let member = r.read_u8()?;
            let ty = match member {
                fc::END => break,
                fc::PAD | fc::ALIGNM2..=fc::ALIGNM8 | fc::STRUCTPAD1..=fc::STRUCTPAD7 => continue,
                fc::POINTER => {
                    let layout = pointers.as_mut().ok_or_else(|| {
                        Error::unsupported_proc(at, "pointer member without a pointer layout")
                    })?;
                    let pointer_at = layout.pos();
                    let (ty, _) = self.decode(pointer_at, depth + 1)?;
                    layout.skip(4)?;
                    ty
                }
                fc::EMBEDDED_COMPLEX => {
                    let _memory_pad = r.read_u8()?;
                    let target = relative_offset(r)?;
                    self.decode(target, depth + 1)?.0
                }
                code => {
                    let primitive = base_type(code).ok_or_else(|| {
                        Error::unsupported_proc(at, format!("struct member {code:#04x}"))
                    })?;
                    self.builder.graph_mut().primitive(primitive)
                }
            };
            let ordinal = fields.len();
            fields.push(Field {
                name: format!("Member{ordinal}"),
                ty,
                ordinal,
                flags: VarFlags::empty(),
                doc: Documentation::default(),
                custom_data: Vec::new(),
            });
        }

        let node = self.builder.graph_mut().node_mut(id);
        node.kind = TypeKind::Record {
            layout: RecordLayout::Struct,
            fields,
        };
        node.state = ParseState::Complete;
        Ok((id, memory_size))
    }

    /// `FC_SMFARRAY`, type byte already read.
    fn fixed_array(&mut self, r: &mut Reader<'_>, depth: usize) -> Result<(TypeId, u32)> {
        let _alignment = r.read_u8()?;
        let total_size = r.read_u16()? as u32;
        let at = r.pos();
        let (element, element_size) = match r.read_u8()? {
            fc::EMBEDDED_COMPLEX => {
                let _memory_pad = r.read_u8()?;
                let target = relative_offset(r)?;
                self.decode(target, depth + 1)?
            }
            code => {
                let primitive = base_type(code)
                    .ok_or_else(|| Error::unsupported_proc(at, format!("array element {code:#04x}")))?;
                (self.builder.graph_mut().primitive(primitive), base_size(code))
            }
        };
        if element_size == 0 || total_size % element_size != 0 {
            return Err(Error::unsupported_proc(
                at,
                format!("array of {total_size} bytes does not divide into {element_size}-byte elements"),
            ));
        }
        let dims = vec![ArrayDim {
            elements: total_size / element_size,
            lower_bound: 0,
        }];
        let array = self.builder.graph_mut().array(element, ArrayBound::Fixed(dims));
        Ok((array, total_size))
    }
}

/// Read an `i16` offset relative to its own position.
fn relative_offset(r: &mut Reader<'_>) -> Result<usize> {
    let at = r.pos();
    let relative = r.read_i16()?;
    offset_from(at, relative)
}

fn offset_from(at: usize, relative: i16) -> Result<usize> {
    at.checked_add_signed(relative as isize)
        .ok_or_else(|| Error::malformed(at, format!("offset {relative} points before the type format")))
}

fn base_type(code: u8) -> Option<Primitive> {
    Some(match code {
        fc::BYTE => Primitive::Byte,
        fc::CHAR => Primitive::Char,
        fc::SMALL => Primitive::I1,
        fc::USMALL => Primitive::UI1,
        fc::WCHAR => Primitive::WChar,
        fc::SHORT | fc::ENUM16 => Primitive::I2,
        fc::USHORT => Primitive::UI2,
        fc::LONG | fc::ENUM32 => Primitive::I4,
        fc::ULONG => Primitive::UI4,
        fc::FLOAT => Primitive::R4,
        fc::HYPER => Primitive::I8,
        fc::DOUBLE => Primitive::R8,
        fc::ERROR_STATUS_T => Primitive::ErrorStatus,
        fc::INT3264 => Primitive::IntPtr,
        fc::UINT3264 => Primitive::UIntPtr,
        _ => return None,
    })
}

fn base_size(code: u8) -> u32 {
    match code {
        fc::BYTE | fc::CHAR | fc::SMALL | fc::USMALL => 1,
        fc::WCHAR | fc::SHORT | fc::USHORT | fc::ENUM16 => 2,
        fc::HYPER | fc::DOUBLE | fc::INT3264 | fc::UINT3264 => 8,
        _ => 4,
    }
}
