//! Graph building from type-library images.

mod common;

use std::sync::LazyLock;

use common::*;
use tlbview::image::{TypeInfoData, TypeLibraryImage, TypeReference};
use tlbview::model::*;
use tlbview::{BuildOptions, Error, TypeGraphBuilder};
use uguid::guid;

const IID_DFOO: uguid::Guid = guid!("aaaaaaaa-0000-0000-0000-000000000001");

fn node_type_info(index: u32) -> TypeInfoData {
    // struct Node { long value; struct Node* next; }
    let mut attr = Attr::new(uguid::Guid::ZERO, TKIND_RECORD);
    attr.vars = 2;
    let mut info = type_info(index, "Node", &attr);
    info.vars.push(var_instance(0x4000_0000, 0, VarFlags::empty(), td(VT_I4)));
    info.vars.push(var_instance(
        0x4000_0001,
        8,
        VarFlags::empty(),
        td_ptr(td_user(1)),
    ));
    info.references.insert(1, TypeReference::Local(index));
    named(&mut info, 0x4000_0000, 0, "value");
    named(&mut info, 0x4000_0001, 0, "next");
    info
}

fn color_type_info(index: u32) -> TypeInfoData {
    let mut attr = Attr::new(uguid::Guid::ZERO, TKIND_ENUM);
    attr.vars = 2;
    let mut info = type_info(index, "Color", &attr);
    info.vars.push(var_const(0x4000_0000, 0));
    info.vars.push(var_const(0x4000_0001, 1));
    named(&mut info, 0x4000_0000, 0, "Red");
    named(&mut info, 0x4000_0001, 0, "Green");
    info
}

fn quad_type_info(index: u32) -> TypeInfoData {
    let mut attr = Attr::new(uguid::Guid::ZERO, TKIND_ALIAS);
    attr.alias = Some(td_carray(&[4], td(VT_I4)));
    type_info(index, "Quad", &attr)
}

fn dfoo_type_info(index: u32) -> TypeInfoData {
    let mut attr = Attr::new(IID_DFOO, TKIND_DISPATCH);
    attr.funcs = 2;
    let mut info = type_info(index, "DFoo", &attr);
    info.funcs.push(func(
        5,
        INVOKE_PROPERTYGET,
        0,
        FuncFlags::empty(),
        elem(td(VT_BSTR), ParamFlags::empty()),
        &[],
    ));
    info.funcs.push(func(
        300,
        INVOKE_FUNC,
        0,
        FuncFlags::empty(),
        elem(td(VT_VOID), ParamFlags::empty()),
        &[elem(td(VT_I4), ParamFlags::IN)],
    ));
    named(&mut info, 5, 0, "Name");
    named(&mut info, 300, 0, "Refresh");
    info
}

fn coclass_type_info(index: u32) -> TypeInfoData {
    type_info(
        index,
        "FooClass",
        &Attr::new(guid!("bbbbbbbb-0000-0000-0000-000000000002"), TKIND_COCLASS),
    )
}

static SAMPLE: LazyLock<TypeLibraryImage> = LazyLock::new(|| {
    library(
        "Sample",
        vec![
            ifoo_type_info(0),
            node_type_info(1),
            color_type_info(2),
            quad_type_info(3),
            dfoo_type_info(4),
            coclass_type_info(5),
        ],
    )
});

fn build_sample() -> (TypeGraphBuilder, Vec<TypeId>) {
    let mut builder = TypeGraphBuilder::new(BuildOptions::default());
    let built = builder.add_library(&SAMPLE).expect("build sample library");
    (builder, built)
}

fn find(graph: &TypeGraph, name: &str) -> TypeId {
    graph
        .find_by_name(name)
        .unwrap_or_else(|| panic!("`{name}` missing from graph"))
}

#[test]
fn sample_library_builds_every_supported_kind() {
    let (builder, built) = build_sample();
    let graph = builder.graph();

    let names: Vec<&str> = built.iter().map(|&id| graph.node(id).name.as_str()).collect();
    assert_eq!(names, vec!["IFoo", "Node", "Color", "Quad", "DFoo"]);
    assert!(
        graph.find_by_name("FooClass").is_none(),
        "coclasses are not modelled"
    );
    for &id in &built {
        assert!(
            graph.node(id).is_parsed(),
            "{} should be complete: {:?}",
            graph.node(id).name,
            graph.node(id).state
        );
    }
    assert_eq!(graph.roots(), built);
}

#[test]
fn self_referential_record_points_at_itself() {
    let (builder, _) = build_sample();
    let graph = builder.graph();
    let node = find(graph, "Node");

    let TypeKind::Record { layout, fields } = &graph.node(node).kind else {
        panic!("Node should be a record");
    };
    assert_eq!(*layout, RecordLayout::Struct);
    assert_eq!(fields.len(), 2);
    assert_eq!(fields[0].name, "value");
    assert_eq!(
        graph.node(fields[0].ty).kind,
        TypeKind::Primitive(Primitive::I4)
    );
    assert_eq!(fields[1].name, "next");
    assert_eq!(graph.node(fields[1].ty).kind, TypeKind::Pointer { target: node });
}

#[test]
fn interface_methods_and_base() {
    let (builder, _) = build_sample();
    let graph = builder.graph();
    let ifoo = find(graph, "IFoo");

    let node = graph.node(ifoo);
    assert_eq!(node.guid(), Some(IID_IFOO));
    let TypeKind::Interface(def) = &node.kind else {
        panic!("IFoo should be an interface");
    };
    assert!(!def.dispatch);

    let base = def.base.expect("IFoo has a base");
    assert_eq!(graph.node(base).name, "IUnknown");
    assert!(graph.node(base).external);
    assert_eq!(graph.find_by_guid(&IUNKNOWN), Some(base));

    let get = &def.methods[0];
    assert_eq!(get.name, "Get");
    assert_eq!(get.vtable_offset, 24);
    assert_eq!(get.dispatch_id, None);
    assert_eq!(
        graph.node(get.return_type).kind,
        TypeKind::Primitive(Primitive::HResult)
    );
    let params: Vec<(&str, ParamFlags)> = get
        .parameters
        .iter()
        .map(|p| (p.name.as_str(), p.flags))
        .collect();
    assert_eq!(
        params,
        vec![("value", ParamFlags::IN), ("result", ParamFlags::OUT)]
    );
}

#[test]
fn unnamed_parameters_fall_back_to_ordinals() {
    let mut info = ifoo_type_info(0);
    info.names.retain(|&(_, ordinal), _| ordinal == 0);
    let mut builder = TypeGraphBuilder::new(BuildOptions::default());
    builder
        .add_library(&library("Unnamed", vec![info]))
        .expect("build");

    let graph = builder.graph();
    let TypeKind::Interface(def) = &graph.node(find(graph, "IFoo")).kind else {
        panic!("IFoo should be an interface");
    };
    let names: Vec<&str> = def.methods[0]
        .parameters
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(names, vec!["p0", "p1"]);
}

#[test]
fn dispatch_interface_records_dispatch_ids() {
    let (builder, _) = build_sample();
    let graph = builder.graph();
    let TypeKind::Interface(def) = &graph.node(find(graph, "DFoo")).kind else {
        panic!("DFoo should be an interface");
    };
    assert!(def.dispatch);
    assert_eq!(def.base, None);
    assert_eq!(def.methods[0].dispatch_id, Some(5));
    assert_eq!(def.methods[0].invoke_kind, InvokeKind::PropertyGet);
    assert_eq!(def.methods[1].dispatch_id, Some(300));
}

#[test]
fn enum_members_and_alias_target() {
    let (builder, _) = build_sample();
    let graph = builder.graph();

    let TypeKind::Enum { members } = &graph.node(find(graph, "Color")).kind else {
        panic!("Color should be an enum");
    };
    let members: Vec<(&str, i64)> = members.iter().map(|m| (m.name.as_str(), m.value)).collect();
    assert_eq!(members, vec![("Red", 0), ("Green", 1)]);

    let TypeKind::Alias {
        underlying: Some(target),
    } = graph.node(find(graph, "Quad")).kind
    else {
        panic!("Quad should alias a resolved type");
    };
    let TypeKind::Array { element, bound } = &graph.node(target).kind else {
        panic!("Quad should alias an array");
    };
    assert_eq!(graph.node(*element).kind, TypeKind::Primitive(Primitive::I4));
    assert_eq!(
        *bound,
        ArrayBound::Fixed(vec![ArrayDim {
            elements: 4,
            lower_bound: 0
        }])
    );
}

#[test]
fn structural_nodes_are_interned() {
    let (mut builder, _) = build_sample();
    let graph = builder.graph_mut();
    let long = graph.primitive(Primitive::I4);
    let before = graph.len();
    let p1 = graph.pointer(long);
    let p2 = graph.pointer(long);
    assert_eq!(p1, p2);
    assert_eq!(graph.primitive(Primitive::I4), long);
    assert!(graph.len() <= before + 1);
}

fn record_with_bad_field() -> TypeInfoData {
    let mut attr = Attr::new(uguid::Guid::ZERO, TKIND_RECORD);
    attr.vars = 3;
    let mut info = type_info(0, "Broken", &attr);
    info.vars.push(var_instance(1, 0, VarFlags::empty(), td(VT_I4)));
    info.vars.push(var_instance(2, 4, VarFlags::empty(), td(0x00ff)));
    info.vars.push(var_instance(3, 8, VarFlags::empty(), td(VT_I2)));
    named(&mut info, 1, 0, "first");
    named(&mut info, 2, 0, "bad");
    named(&mut info, 3, 0, "third");
    info
}

#[test]
fn failed_field_is_dropped_and_recorded() {
    let mut builder = TypeGraphBuilder::new(BuildOptions::default());
    let built = builder
        .add_library(&library("Broken", vec![record_with_bad_field()]))
        .expect("lenient build succeeds");

    let node = builder.graph().node(built[0]);
    assert!(!node.is_parsed());
    let TypeKind::Record { fields, .. } = &node.kind else {
        panic!("expected record");
    };
    let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["first", "third"]);

    let issues = node.issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].member, Some(1));
    assert!(matches!(issues[0].error, Error::UnsupportedLayout(_)));
}

#[test]
fn strict_build_surfaces_first_issue() {
    let mut builder = TypeGraphBuilder::new(BuildOptions { strict: true });
    let err = builder
        .add_library(&library("Broken", vec![record_with_bad_field()]))
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedLayout(_)), "got {err:?}");
}

#[test]
fn unresolved_reference_is_dangling() {
    let mut attr = Attr::new(uguid::Guid::ZERO, TKIND_RECORD);
    attr.vars = 1;
    let mut info = type_info(0, "Lost", &attr);
    info.vars.push(var_instance(1, 0, VarFlags::empty(), td_user(99)));

    let mut builder = TypeGraphBuilder::new(BuildOptions::default());
    let built = builder
        .add_library(&library("Lost", vec![info]))
        .expect("lenient build succeeds");
    let issues = builder.graph().node(built[0]).issues();
    assert_eq!(issues.len(), 1);
    assert!(
        matches!(issues[0].error, Error::DanglingReference(_)),
        "got {:?}",
        issues[0].error
    );
}

#[test]
fn undecodable_attributes_skip_the_type() {
    let mut broken = ifoo_type_info(1);
    broken.attr.truncate(10);
    let image = library("Partial", vec![color_type_info(0), broken]);

    let mut builder = TypeGraphBuilder::new(BuildOptions::default());
    let built = builder.add_library(&image).expect("lenient build succeeds");
    assert_eq!(built.len(), 1);

    let mut strict = TypeGraphBuilder::new(BuildOptions { strict: true });
    assert!(matches!(
        strict.add_library(&image),
        Err(Error::MalformedDescriptor { .. })
    ));
}

#[test]
fn rebuilding_merges_by_guid_and_reports_changes() {
    let (mut builder, first) = build_sample();
    assert!(builder.take_changed_identities().is_empty());
    let ifoo = find(builder.graph(), "IFoo");

    let again = builder
        .add_library(&library("Again", vec![ifoo_type_info(0)]))
        .expect("rebuild IFoo");
    assert_eq!(again, vec![ifoo]);
    assert!(first.contains(&ifoo));
    assert_eq!(builder.take_changed_identities(), vec![IID_IFOO]);
    assert!(builder.take_changed_identities().is_empty());
    assert!(builder.graph().node(ifoo).is_parsed());
}

#[test]
fn rebuilding_a_library_reuses_guidless_types() {
    let (mut builder, first) = build_sample();
    let nodes = builder.graph().len();

    let again = builder.add_library(&SAMPLE).expect("rebuild sample library");
    assert_eq!(again, first);
    assert_eq!(builder.graph().len(), nodes, "rebuild added nodes");
    assert_eq!(builder.graph().roots(), first);
    assert!(builder.graph().node(find(builder.graph(), "Node")).is_parsed());
}

#[test]
fn guidless_types_of_different_libraries_stay_apart() {
    let mut builder = TypeGraphBuilder::new(BuildOptions::default());
    let a = builder
        .add_library(&library("A", vec![color_type_info(0)]))
        .expect("build A");
    let b = builder
        .add_library(&library("B", vec![color_type_info(0)]))
        .expect("build B");
    assert_ne!(a, b);
    assert_eq!(builder.graph().roots().len(), 2);
}

#[test]
fn missing_variable_descriptor_is_dangling() {
    let mut attr = Attr::new(uguid::Guid::ZERO, TKIND_RECORD);
    attr.vars = 2;
    let mut info = type_info(0, "Short", &attr);
    info.vars.push(var_instance(1, 0, VarFlags::empty(), td(VT_I4)));

    let mut builder = TypeGraphBuilder::new(BuildOptions::default());
    let built = builder
        .add_library(&library("Short", vec![info]))
        .expect("lenient build succeeds");
    let issues = builder.graph().node(built[0]).issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].member, Some(1));
    match &issues[0].error {
        Error::DanglingReference(message) => {
            assert!(message.contains("variable descriptor 1 of `Short`"), "{message}")
        }
        other => panic!("expected DanglingReference, got {other:?}"),
    }
}

#[test]
fn external_interface_nodes_are_shared() {
    let mut builder = TypeGraphBuilder::new(BuildOptions::default());
    let a = builder.external_interface(IUNKNOWN, None);
    let b = builder.external_interface(IUNKNOWN, Some("IUnknown"));
    assert_eq!(a, b);
    let node = builder.graph().node(a);
    assert!(node.external);
    assert_eq!(node.name, "IUnknown");
    assert!(builder.graph().roots().is_empty());
}

#[test]
fn encoded_library_builds_the_same_graph() {
    let bytes = encode_library(&SAMPLE);
    let image = TypeLibraryImage::decode(&bytes).expect("decode TLIB");
    let mut builder = TypeGraphBuilder::new(BuildOptions::default());
    let built = builder.add_library(&image).expect("build decoded library");
    let names: Vec<&str> = built
        .iter()
        .map(|&id| builder.graph().node(id).name.as_str())
        .collect();
    assert_eq!(names, vec!["IFoo", "Node", "Color", "Quad", "DFoo"]);
}
