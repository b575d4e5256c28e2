//! Declaration emission: one graph node → source lines.

use std::collections::HashSet;

use crate::model::*;
use crate::names::{DisplayNames, disambiguate, format_guid};

use super::dialect::{Dialect, Formatter, comment_safe, escape_string};
use super::writer::{AttributeList, SourceWriter};

pub(super) struct Emitter<'a> {
    graph: &'a TypeGraph,
    names: &'a DisplayNames,
    fmt: Formatter,
    best_effort: bool,
    declared: HashSet<TypeId>,
    forwarded: HashSet<TypeId>,
    pub(super) w: SourceWriter,
}

impl<'a> Emitter<'a> {
    pub(super) fn new(
        graph: &'a TypeGraph,
        names: &'a DisplayNames,
        fmt: Formatter,
        best_effort: bool,
    ) -> Self {
        Self {
            graph,
            names,
            fmt,
            best_effort,
            declared: HashSet::new(),
            forwarded: HashSet::new(),
            w: SourceWriter::new(),
        }
    }

    /// Emit one top-level declaration followed by a blank line.
    pub(super) fn declaration(&mut self, id: TypeId) {
        let graph = self.graph;
        let node = graph.node(id);
        match &node.kind {
            TypeKind::Alias { underlying } => self.alias(id, node, *underlying),
            TypeKind::Enum { members } => self.enumeration(id, node, members),
            TypeKind::Record { layout, fields } => {
                self.forward_declarations(id);
                self.record(id, node, *layout, fields);
            }
            TypeKind::Interface(def) => {
                self.forward_declarations(id);
                self.interface(id, node, def);
            }
            TypeKind::Primitive(_) | TypeKind::Pointer { .. } | TypeKind::Array { .. } => return,
        }
        self.declared.insert(id);
        self.w.blank();
    }

    // -----------------------------------------------------------------------
    // Kinds
    // -----------------------------------------------------------------------

    fn alias(&mut self, id: TypeId, node: &TypeNode, underlying: Option<TypeId>) {
        let mut attrs = AttributeList::new();
        attrs.push("public");
        self.type_attributes(node, &mut attrs);
        let (prefix, suffix) = match underlying {
            Some(ty) => self.spell(ty),
            None => ("__incomplete__".to_string(), String::new()),
        };
        let name = self.names.get(id);
        let line = format!("typedef {}{prefix} {name}{suffix};", attrs.inline(&self.fmt));
        self.w.line(line);
    }

    fn enumeration(&mut self, id: TypeId, node: &TypeNode, members: &[EnumMember]) {
        self.block_attributes(node);
        let names = self.names;
        let name = names.get(id);
        self.w.line(format!("enum {name} {{"));
        let member_names = disambiguate(members.iter().map(|m| m.name.as_str()), |i| {
            format!("Value{i}")
        });
        {
            let mut body = self.w.indent();
            for (i, (member, name)) in members.iter().zip(&member_names).enumerate() {
                for doc in doc_lines(&member.doc, &self.fmt) {
                    body.line(doc);
                }
                let comma = if i + 1 < members.len() { "," } else { "" };
                body.line(format!("{name} = {}{comma}", member.value));
            }
            incomplete_lines(&mut body, node, self.best_effort);
        }
        self.w.line(self.fmt.close_brace());
    }

    fn record(&mut self, id: TypeId, node: &TypeNode, layout: RecordLayout, fields: &[Field]) {
        self.block_attributes(node);
        let keyword = record_keyword(layout);
        let names = self.names;
        self.w.line(format!("{keyword} {} {{", names.get(id)));
        let field_names =
            disambiguate(fields.iter().map(|f| f.name.as_str()), |i| format!("field{i}"));
        let lines: Vec<(Vec<String>, String)> = fields
            .iter()
            .zip(&field_names)
            .map(|(field, name)| {
                let (prefix, suffix) = self.spell(field.ty);
                let attrs = self.field_attributes(field).inline(&self.fmt);
                (doc_lines(&field.doc, &self.fmt), format!("{attrs}{prefix} {name}{suffix};"))
            })
            .collect();
        {
            let mut body = self.w.indent();
            for (docs, line) in lines {
                for doc in docs {
                    body.line(doc);
                }
                body.line(line);
            }
            incomplete_lines(&mut body, node, self.best_effort);
        }
        self.w.line(self.fmt.close_brace());
    }

    fn interface(&mut self, id: TypeId, node: &TypeNode, def: &InterfaceDef) {
        let dispinterface = def.dispatch && self.fmt.dialect == Dialect::Idl;
        self.block_attributes(node);

        let names = self.names;
        let name = names.get(id);
        let base = def.base.map(|base| names.get(base));
        let header = match (self.fmt.dialect, dispinterface, base) {
            (_, true, _) => format!("dispinterface {name} {{"),
            (Dialect::Cpp, _, Some(base)) => format!("struct {name} : public {base} {{"),
            (_, _, Some(base)) => format!("{} {name} : {base} {{", self.fmt.interface_keyword()),
            (_, _, None) => format!("{} {name} {{", self.fmt.interface_keyword()),
        };
        self.w.line(header);

        let lines: Vec<(Vec<String>, String)> = disambiguate(
            def.methods.iter().map(|m| m.name.as_str()),
            |i| format!("Method{i}"),
        )
        .iter()
        .zip(&def.methods)
        .map(|(name, method)| (doc_lines(&method.doc, &self.fmt), self.method(name, method)))
        .collect();

        if dispinterface {
            self.w.line("properties:");
            self.w.line("methods:");
        }
        {
            let mut body = self.w.indent();
            for (docs, line) in lines {
                for doc in docs {
                    body.line(doc);
                }
                body.line(line);
            }
            incomplete_lines(&mut body, node, self.best_effort);
        }
        self.w.line(self.fmt.close_brace());
    }

    fn method(&self, name: &str, method: &Method) -> String {
        let attrs = self.method_attributes(method).inline(&self.fmt);
        let (ret, ret_suffix) = self.spell(method.return_type);
        let param_names = disambiguate(method.parameters.iter().map(|p| p.name.as_str()), |i| {
            format!("p{i}")
        });
        let params = method
            .parameters
            .iter()
            .zip(&param_names)
            .map(|(param, name)| {
                let (prefix, suffix) = self.spell(param.ty);
                let attrs = self.param_attributes(param).inline(&self.fmt);
                format!("{attrs}{prefix} {name}{suffix}")
            })
            .collect::<Vec<_>>()
            .join(", ");
        match self.fmt.dialect {
            Dialect::Cpp => {
                format!("{attrs}virtual {ret}{ret_suffix} __stdcall {name}({params}) = 0;")
            }
            Dialect::Idl | Dialect::Generic => {
                format!("{attrs}{ret}{ret_suffix} {name}({params});")
            }
        }
    }

    // -----------------------------------------------------------------------
    // Forward declarations
    // -----------------------------------------------------------------------

    fn forward_declarations(&mut self, id: TypeId) {
        let mut reachable = Vec::new();
        for referenced in self.graph.body_references(id) {
            self.graph.referenced_declarations(referenced, &mut reachable);
        }
        for target in reachable {
            let node = self.graph.node(target);
            if node.external || self.declared.contains(&target) || !self.forwarded.insert(target) {
                continue;
            }
            let keyword = match &node.kind {
                TypeKind::Record { layout, .. } => record_keyword(*layout),
                TypeKind::Interface(def) if def.dispatch && self.fmt.dialect == Dialect::Idl => {
                    "dispinterface"
                }
                TypeKind::Interface(_) => self.fmt.interface_keyword(),
                _ => continue,
            };
            let line = format!("{keyword} {};", self.names.get(target));
            self.w.line(line);
        }
    }

    // -----------------------------------------------------------------------
    // Type spelling
    // -----------------------------------------------------------------------

    /// Text before and after the declared name (`long` + `[4]`).
    fn spell(&self, id: TypeId) -> (String, String) {
        let node = self.graph.node(id);
        match &node.kind {
            TypeKind::Primitive(p) => (self.fmt.primitive(*p).to_string(), String::new()),
            TypeKind::Pointer { target } => {
                let (prefix, suffix) = self.spell(*target);
                (format!("{prefix}*"), suffix)
            }
            TypeKind::Array {
                element,
                bound: ArrayBound::Fixed(dims),
            } => {
                let (prefix, mut suffix) = self.spell(*element);
                for dim in dims {
                    suffix.push_str(&format!("[{}]", dim.elements));
                }
                (prefix, suffix)
            }
            TypeKind::Array {
                element,
                bound: ArrayBound::Safe,
            } => match self.fmt.dialect {
                Dialect::Cpp => ("SAFEARRAY*".to_string(), String::new()),
                Dialect::Idl | Dialect::Generic => {
                    let (prefix, suffix) = self.spell(*element);
                    (format!("SAFEARRAY({prefix}{suffix})"), String::new())
                }
            },
            TypeKind::Record { layout, .. } => {
                let name = self.names.get(id);
                let name = match self.fmt.dialect {
                    Dialect::Generic => name.to_string(),
                    Dialect::Idl | Dialect::Cpp => format!("{} {name}", record_keyword(*layout)),
                };
                (name, String::new())
            }
            TypeKind::Enum { .. } => {
                let name = self.names.get(id);
                let name = match self.fmt.dialect {
                    Dialect::Generic => name.to_string(),
                    Dialect::Idl | Dialect::Cpp => format!("enum {name}"),
                };
                (name, String::new())
            }
            TypeKind::Alias { .. } | TypeKind::Interface(_) => {
                (self.names.get(id).to_string(), String::new())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Attributes
    // -----------------------------------------------------------------------

    fn block_attributes(&mut self, node: &TypeNode) {
        let mut attrs = AttributeList::new();
        if let TypeKind::Interface(def) = &node.kind {
            attrs.push_if(!def.dispatch && self.fmt.dialect == Dialect::Idl, "object");
        }
        self.type_attributes(node, &mut attrs);
        attrs.write_block(&mut self.w, &self.fmt);
    }

    fn type_attributes(&self, node: &TypeNode, attrs: &mut AttributeList) {
        if let Some(guid) = node.guid() {
            attrs.push(format!("uuid({})", format_guid(&guid)));
        }
        if node.version != (0, 0) {
            attrs.push(format!("version({}.{})", node.version.0, node.version.1));
        }
        if !node.doc.doc_string.is_empty() {
            attrs.push(format!("helpstring(\"{}\")", escape_string(&node.doc.doc_string)));
        }
        if node.doc.help_context != 0 {
            attrs.push(format!("helpcontext(0x{:08X})", node.doc.help_context));
        }
        let flags = node.flags;
        attrs.push_if(flags.contains(TypeFlags::APPOBJECT), "appobject");
        attrs.push_if(flags.contains(TypeFlags::LICENSED), "licensed");
        attrs.push_if(flags.contains(TypeFlags::PREDECLID), "predeclid");
        attrs.push_if(flags.contains(TypeFlags::HIDDEN), "hidden");
        attrs.push_if(flags.contains(TypeFlags::CONTROL), "control");
        attrs.push_if(flags.contains(TypeFlags::DUAL), "dual");
        attrs.push_if(flags.contains(TypeFlags::NONEXTENSIBLE), "nonextensible");
        attrs.push_if(flags.contains(TypeFlags::OLEAUTOMATION), "oleautomation");
        attrs.push_if(flags.contains(TypeFlags::RESTRICTED), "restricted");
        attrs.push_if(flags.contains(TypeFlags::AGGREGATABLE), "aggregatable");
        attrs.push_if(flags.contains(TypeFlags::REPLACEABLE), "replaceable");
        attrs.push_if(flags.contains(TypeFlags::PROXY), "proxy");
        custom_attributes(&node.custom_data, attrs);
    }

    fn method_attributes(&self, method: &Method) -> AttributeList {
        let mut attrs = AttributeList::new();
        if let Some(id) = method.dispatch_id {
            attrs.push(format_dispatch_id(id));
        }
        match method.invoke_kind {
            InvokeKind::PropertyGet => attrs.push("propget"),
            InvokeKind::PropertyPut | InvokeKind::PropertyPutRef => attrs.push("propput"),
            InvokeKind::Func => {}
        }
        let flags = method.flags;
        attrs.push_if(flags.contains(FuncFlags::BINDABLE), "bindable");
        attrs.push_if(flags.contains(FuncFlags::DEFAULTBIND), "defaultbind");
        attrs.push_if(flags.contains(FuncFlags::DEFAULTCOLLELEM), "defaultcollelem");
        attrs.push_if(flags.contains(FuncFlags::DISPLAYBIND), "displaybind");
        attrs.push_if(flags.contains(FuncFlags::HIDDEN), "hidden");
        attrs.push_if(flags.contains(FuncFlags::IMMEDIATEBIND), "immediatebind");
        attrs.push_if(flags.contains(FuncFlags::NONBROWSABLE), "nonbrowsable");
        attrs.push_if(flags.contains(FuncFlags::REQUESTEDIT), "requestedit");
        attrs.push_if(flags.contains(FuncFlags::RESTRICTED), "restricted");
        attrs.push_if(flags.contains(FuncFlags::SOURCE), "source");
        attrs.push_if(flags.contains(FuncFlags::UIDEFAULT), "uidefault");
        attrs.push_if(flags.contains(FuncFlags::USESGETLASTERROR), "usesgetlasterror");
        attrs.push_if(flags.contains(FuncFlags::REPLACEABLE), "replaceable");
        custom_attributes(&method.custom_data, &mut attrs);
        attrs
    }

    fn param_attributes(&self, param: &Parameter) -> AttributeList {
        let mut attrs = AttributeList::new();
        let flags = param.flags;
        let fmt = &self.fmt;
        attrs.push_if(flags.contains(ParamFlags::IN), fmt.param_token("in", "In"));
        attrs.push_if(flags.contains(ParamFlags::OUT), fmt.param_token("out", "Out"));
        attrs.push_if(flags.contains(ParamFlags::LCID), fmt.param_token("lcid", "Lcid"));
        attrs.push_if(flags.contains(ParamFlags::RETVAL), fmt.param_token("retval", "RetVal"));
        attrs.push_if(
            flags.contains(ParamFlags::OPTIONAL),
            fmt.param_token("optional", "Optional"),
        );
        custom_attributes(&param.custom_data, &mut attrs);
        attrs
    }

    fn field_attributes(&self, field: &Field) -> AttributeList {
        let mut attrs = AttributeList::new();
        let flags = field.flags;
        attrs.push_if(flags.contains(VarFlags::READONLY), "readonly");
        attrs.push_if(flags.contains(VarFlags::SOURCE), "source");
        attrs.push_if(flags.contains(VarFlags::BINDABLE), "bindable");
        attrs.push_if(flags.contains(VarFlags::HIDDEN), "hidden");
        attrs.push_if(flags.contains(VarFlags::RESTRICTED), "restricted");
        attrs.push_if(flags.contains(VarFlags::NONBROWSABLE), "nonbrowsable");
        custom_attributes(&field.custom_data, &mut attrs);
        attrs
    }
}

/// `id(5)` for small ids, `id(0x0000012C)` otherwise.
pub fn format_dispatch_id(id: i32) -> String {
    if (0..256).contains(&id) {
        format!("id({id})")
    } else {
        format!("id(0x{:08X})", id as u32)
    }
}

fn custom_attributes(items: &[CustomDataItem], attrs: &mut AttributeList) {
    for item in items {
        let value = match &item.value {
            CustomValue::Int(v) => v.to_string(),
            CustomValue::Str(s) => format!("\"{}\"", escape_string(s)),
        };
        attrs.push(format!("custom({}, {value})", format_guid(&item.guid)));
    }
}

fn record_keyword(layout: RecordLayout) -> &'static str {
    match layout {
        RecordLayout::Struct => "struct",
        RecordLayout::Union => "union",
    }
}

/// One `//` line per line of the documentation string.
fn doc_lines(doc: &Documentation, fmt: &Formatter) -> Vec<String> {
    if fmt.hide_comments || doc.doc_string.is_empty() {
        return Vec::new();
    }
    doc.doc_string
        .replace("\r\n", "\n")
        .split(['\r', '\n'])
        .map(|line| format!("// {line}").trim_end().to_string())
        .collect()
}

fn incomplete_lines(w: &mut SourceWriter, node: &TypeNode, best_effort: bool) {
    if !best_effort {
        return;
    }
    for issue in node.issues() {
        let error = issue.error.to_string();
        match issue.member {
            Some(member) => w.line(format!(
                "/* __incomplete__: member {member}: {} */",
                comment_safe(&error)
            )),
            None => w.line(format!("/* __incomplete__: {} */", comment_safe(&error))),
        }
    }
}
