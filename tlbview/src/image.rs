//! Type-library image container.
//!
//! A collaborator that owns an `ITypeLib` flattens it into one `TLIB` image:
//! per type info, the raw attribute/function/variable records plus everything
//! `ITypeInfo` would otherwise answer through calls (documentation, names,
//! implemented types, hreftype targets, custom data). The records themselves
//! stay as bytes and are decoded by the builder.

use std::collections::HashMap;

use tracing::trace;
use uguid::Guid;

use crate::descriptor::TypeKindTag;
use crate::error::{Error, Result};
use crate::model::{CustomDataItem, CustomValue, Documentation, ImplTypeFlags};
use crate::names::NameLookup;
use crate::reader::Reader;

/// Where an hreftype points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeReference {
    /// Another type info in the same library, by index.
    Local(u32),
    /// A type defined by another library.
    External {
        guid: Guid,
        name: String,
        kind: TypeKindTag,
    },
}

/// Which member a custom-data entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomDataTarget {
    Type,
    Func(usize),
    Param(usize, usize),
    Var(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImplType {
    pub href: u32,
    pub flags: ImplTypeFlags,
}

/// One type info as handed over by the type-library collaborator.
#[derive(Debug, Clone, Default)]
pub struct TypeInfoData {
    /// Position within the owning library.
    pub index: u32,
    pub documentation: Documentation,
    /// `TATR` record.
    pub attr: Vec<u8>,
    /// `FUNC` records in index order.
    pub funcs: Vec<Vec<u8>>,
    /// `VARD` records in index order.
    pub vars: Vec<Vec<u8>>,
    pub impl_types: Vec<ImplType>,
    pub references: HashMap<u32, TypeReference>,
    /// `(member id, ordinal) -> name`; ordinal 0 is the member itself.
    pub names: HashMap<(i32, usize), String>,
    pub member_docs: HashMap<i32, Documentation>,
    pub custom_data: Vec<(CustomDataTarget, CustomDataItem)>,
}

impl TypeInfoData {
    pub fn custom_data_for(&self, target: CustomDataTarget) -> Vec<CustomDataItem> {
        self.custom_data
            .iter()
            .filter(|(t, _)| *t == target)
            .map(|(_, item)| item.clone())
            .collect()
    }
}

impl NameLookup for TypeInfoData {
    fn name(&self, member_id: i32, ordinal: usize) -> Option<String> {
        self.names.get(&(member_id, ordinal)).cloned()
    }
}

/// A decoded `TLIB` image.
#[derive(Debug, Clone, Default)]
pub struct TypeLibraryImage {
    pub libid: Guid,
    pub version: (u16, u16),
    pub name: String,
    pub doc_string: String,
    pub types: Vec<TypeInfoData>,
}

impl TypeLibraryImage {
    pub const TAG: &'static [u8; 4] = b"TLIB";

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        r.read_header(Self::TAG, &[1])?;
        let libid = r.read_guid()?;
        let version = (r.read_u16()?, r.read_u16()?);
        let name = r.read_bstr()?;
        let doc_string = r.read_bstr()?;
        let count = r.read_u32()?;
        let mut types = Vec::new();
        for index in 0..count {
            types.push(decode_type_info(&mut r, index)?);
        }
        r.finish()?;
        trace!(library = %name, types = types.len(), "decoded type library image");
        Ok(Self {
            libid,
            version,
            name,
            doc_string,
            types,
        })
    }
}

fn decode_type_info(r: &mut Reader<'_>, index: u32) -> Result<TypeInfoData> {
    let documentation = Documentation {
        name: r.read_bstr()?,
        doc_string: r.read_bstr()?,
        help_context: r.read_u32()?,
        help_file: r.read_bstr()?,
    };
    let attr = r.read_blob()?.to_vec();

    let funcs = (0..r.read_u16()?)
        .map(|_| r.read_blob().map(<[u8]>::to_vec))
        .collect::<Result<Vec<_>>>()?;
    let vars = (0..r.read_u16()?)
        .map(|_| r.read_blob().map(<[u8]>::to_vec))
        .collect::<Result<Vec<_>>>()?;

    let mut impl_types = Vec::new();
    for _ in 0..r.read_u16()? {
        impl_types.push(ImplType {
            href: r.read_u32()?,
            flags: ImplTypeFlags::from_bits_retain(r.read_u16()?),
        });
    }

    let mut references = HashMap::new();
    for _ in 0..r.read_u16()? {
        let href = r.read_u32()?;
        let at = r.pos();
        let target = match r.read_u8()? {
            0 => TypeReference::Local(r.read_u32()?),
            1 => {
                let guid = r.read_guid()?;
                let name = r.read_bstr()?;
                let kind_at = r.pos();
                let raw = r.read_u16()?;
                let kind = TypeKindTag::from_raw(raw).ok_or_else(|| {
                    Error::malformed(kind_at, format!("unknown TYPEKIND {raw}"))
                })?;
                TypeReference::External { guid, name, kind }
            }
            other => {
                return Err(Error::malformed(at, format!("unknown reference kind {other}")));
            }
        };
        references.insert(href, target);
    }

    let mut names = HashMap::new();
    for _ in 0..r.read_u32()? {
        let memid = r.read_i32()?;
        let ordinal = r.read_u16()? as usize;
        names.insert((memid, ordinal), r.read_bstr()?);
    }

    let mut member_docs = HashMap::new();
    for _ in 0..r.read_u32()? {
        let memid = r.read_i32()?;
        member_docs.insert(
            memid,
            Documentation {
                name: r.read_bstr()?,
                doc_string: r.read_bstr()?,
                help_context: r.read_u32()?,
                help_file: String::new(),
            },
        );
    }

    let mut custom_data = Vec::new();
    for _ in 0..r.read_u32()? {
        let at = r.pos();
        let raw_target = r.read_u8()?;
        let first = r.read_u16()? as usize;
        let second = r.read_u16()? as usize;
        let target = match raw_target {
            0 => CustomDataTarget::Type,
            1 => CustomDataTarget::Func(first),
            2 => CustomDataTarget::Param(first, second),
            3 => CustomDataTarget::Var(first),
            other => {
                return Err(Error::malformed(at, format!("unknown custom data target {other}")));
            }
        };
        let guid = r.read_guid()?;
        let at = r.pos();
        let value = match r.read_u8()? {
            0 => CustomValue::Int(r.read_i64()?),
            1 => CustomValue::Str(r.read_bstr()?),
            other => {
                return Err(Error::malformed(at, format!("unknown custom value kind {other}")));
            }
        };
        custom_data.push((target, CustomDataItem { guid, value }));
    }

    Ok(TypeInfoData {
        index,
        documentation,
        attr,
        funcs,
        vars,
        impl_types,
        references,
        names,
        member_docs,
        custom_data,
    })
}
