use super::diagnostics::codes;
use super::*;
use crate::autodiff::{IndexSubset, ParsedDifferentiationParameter as Wrt};
use crate::decls::{
    Access, AccessLevel, DeclContext, DeclNameRef, DifferentiableAttr, DifferentiatingAttr,
    FunctionDecl, ParamDecl, StorageDecl, WhereRequirement,
};
use crate::diagnostics::{FileId, Span};
use crate::stdlib::standard_environment;
use crate::types::{
    GenericParamType, LayoutConstraint, Requirement, StoredProperty, TypeEnvironment,
};

struct Checked {
    module: SourceModule,
    registry: DifferentiableAttrRegistry,
    diagnostics: Vec<Diagnostic>,
}

impl Checked {
    fn codes(&self) -> Vec<&str> {
        self.diagnostics
            .iter()
            .filter_map(Diagnostic::code_str)
            .collect()
    }

    fn differentiable(&self, decl: DeclId) -> Vec<&DifferentiableAttr> {
        self.module
            .attributes(decl)
            .iter()
            .filter(|attribute| !attribute.invalid)
            .filter_map(DeclAttribute::as_differentiable)
            .collect()
    }
}

fn environment() -> TypeEnvironment {
    let mut env = standard_environment();
    env.declare_differentiable_struct(
        "Point",
        vec![
            StoredProperty::new("x", Type::float()),
            StoredProperty::new("y", Type::float()),
        ],
    );
    env
}

fn check(mut module: SourceModule) -> Checked {
    let env = environment();
    let mut registry = DifferentiableAttrRegistry::new();
    let mut sink = DiagnosticSink::new("autodiff");
    check_module(&mut module, &env, &mut registry, &mut sink);
    Checked {
        module,
        registry,
        diagnostics: sink.into_vec(),
    }
}

fn point() -> Type {
    Type::structure("Point")
}

fn differentiable(attr: DifferentiableAttr) -> DeclAttribute {
    DeclAttribute::differentiable(attr)
}

fn differentiating(original: &str) -> DeclAttribute {
    DeclAttribute::differentiating(DifferentiatingAttr::new(DeclNameRef::new(original)))
}

fn float_fn(name: &str) -> FunctionDecl {
    FunctionDecl::new(name, vec![ParamDecl::new("x", Type::float())], Type::float())
}

fn derivative_result(label: &str, map: Type) -> Type {
    Type::labeled_tuple(vec![("value", Type::float()), (label, map)])
}

fn float_to_float() -> Type {
    Type::function(vec![Type::float()], Type::float())
}

fn t_signature(requirements: Vec<Requirement>) -> crate::types::GenericSignature {
    crate::types::GenericSignature::new(
        vec![GenericParamType {
            name: "T".into(),
            depth: 0,
            index: 0,
        }],
        requirements,
    )
}

#[test]
fn infers_differentiable_parameters() {
    let mut module = SourceModule::new("main");
    let f = module.add_function(
        FunctionDecl::new(
            "f",
            vec![
                ParamDecl::new("x", Type::float()),
                ParamDecl::new("n", Type::int()),
            ],
            Type::float(),
        )
        .with_attribute(differentiable(DifferentiableAttr::new())),
    );
    let checked = check(module);
    assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
    let attrs = checked.differentiable(f);
    assert_eq!(attrs.len(), 1);
    assert_eq!(
        attrs[0].parameter_indices,
        Some(IndexSubset::from_indices(2, [0]))
    );
    assert!(checked
        .registry
        .get(f, &IndexSubset::from_indices(2, [0]))
        .is_some());
}

#[test]
fn self_must_come_first_in_wrt_list() {
    let mut module = SourceModule::new("main");
    let method = |wrt: Vec<Wrt>| {
        FunctionDecl::new(
            "scaled",
            vec![ParamDecl::new("factor", Type::float())],
            point(),
        )
        .in_context(DeclContext::in_type(point()))
        .with_attribute(differentiable(DifferentiableAttr::new().wrt(wrt)))
    };
    let bad = module.add_function(method(vec![Wrt::named("factor"), Wrt::self_param()]));
    let good = module.add_function(method(vec![Wrt::self_param(), Wrt::named("factor")]));
    let checked = check(module);
    assert_eq!(checked.codes(), vec![codes::SELF_MUST_BE_FIRST]);
    assert!(checked.module.attributes(bad)[0].invalid);
    assert_eq!(
        checked.differentiable(good)[0].parameter_indices,
        Some(IndexSubset::from_indices(2, [0, 1]))
    );
}

#[test]
fn wrt_names_must_exist_and_be_ordered() {
    let mut module = SourceModule::new("main");
    let two_params = |wrt: Vec<Wrt>| {
        FunctionDecl::new(
            "g",
            vec![
                ParamDecl::new("x", Type::float()),
                ParamDecl::new("y", Type::float()),
            ],
            Type::float(),
        )
        .with_attribute(differentiable(DifferentiableAttr::new().wrt(wrt)))
    };
    module.add_function(two_params(vec![Wrt::named("z")]));
    module.add_function(two_params(vec![Wrt::named("y"), Wrt::named("x")]));
    module.add_function(two_params(vec![Wrt::ordered(2)]));
    module.add_function(two_params(vec![Wrt::self_param()]));
    let checked = check(module);
    assert_eq!(
        checked.codes(),
        vec![
            codes::UNKNOWN_PARAMETER_NAME,
            codes::PARAMS_NOT_ORIGINAL_ORDER,
            codes::PARAM_INDEX_OUT_OF_RANGE,
            codes::SELF_INSTANCE_MEMBER_ONLY,
        ]
    );
}

#[test]
fn rejects_non_differentiable_parameters_and_results() {
    let mut module = SourceModule::new("main");
    module.add_function(
        FunctionDecl::new("count", vec![ParamDecl::new("n", Type::int())], Type::float())
            .with_attribute(differentiable(
                DifferentiableAttr::new().wrt(vec![Wrt::named("n")]),
            )),
    );
    module.add_function(
        FunctionDecl::new("round", vec![ParamDecl::new("x", Type::float())], Type::int())
            .with_attribute(differentiable(DifferentiableAttr::new())),
    );
    module.add_function(
        FunctionDecl::new("consume", vec![ParamDecl::new("x", Type::float())], Type::unit())
            .with_attribute(differentiable(DifferentiableAttr::new())),
    );
    module.add_function(
        FunctionDecl::new(
            "apply",
            vec![ParamDecl::new("body", float_to_float())],
            Type::float(),
        )
        .with_attribute(differentiable(
            DifferentiableAttr::new().wrt(vec![Wrt::named("body")]),
        )),
    );
    let checked = check(module);
    assert_eq!(
        checked.codes(),
        vec![
            codes::PARAM_NOT_DIFFERENTIABLE,
            codes::RESULT_NOT_DIFFERENTIABLE,
            codes::VOID_RESULT,
            codes::WRT_FUNCTION,
        ]
    );
    assert!(checked.diagnostics[1].mentions("'Int' does not conform to 'Differentiable'"));
}

#[test]
fn linear_attribute_with_custom_derivative_is_removed() {
    let mut module = SourceModule::new("main");
    let f = module.add_function(float_fn("f").with_attribute(differentiable(
        DifferentiableAttr::new()
            .linear()
            .with_vjp(DeclNameRef::new("fVJP")),
    )));
    let checked = check(module);
    assert_eq!(checked.codes(), vec![codes::LINEAR_WITH_CUSTOM_DERIVATIVE]);
    assert!(checked.module.attributes(f).is_empty());
}

#[test]
fn duplicate_attributes_point_at_the_first() {
    let mut module = SourceModule::new("main");
    let f = module.add_function(
        float_fn("f")
            .with_attribute(differentiable(DifferentiableAttr::new()).at(Span::new(0, 16)))
            .with_attribute(
                differentiable(DifferentiableAttr::new().wrt(vec![Wrt::named("x")]))
                    .at(Span::new(17, 40)),
            ),
    );
    let checked = check(module);
    assert_eq!(checked.codes(), vec![codes::DUPLICATE_ATTRIBUTE]);
    let duplicate = &checked.diagnostics[0];
    assert_eq!(duplicate.span(), Some(Span::new(17, 40)));
    assert_eq!(duplicate.secondary_labels[0].span, Span::new(0, 16));
    assert!(duplicate.mentions("other attribute declared here"));
    assert_eq!(checked.differentiable(f).len(), 1);
    assert_eq!(checked.registry.len(), 1);
}

#[test]
fn resolves_custom_jvp_by_type() {
    let mut module = SourceModule::new("main");
    let f = module.add_function(float_fn("f").with_attribute(differentiable(
        DifferentiableAttr::new().with_jvp(DeclNameRef::new("fJVP")),
    )));
    let jvp = module.add_function(FunctionDecl::new(
        "fJVP",
        vec![ParamDecl::new("x", Type::float())],
        derivative_result("differential", float_to_float()),
    ));
    let checked = check(module);
    assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
    assert_eq!(checked.differentiable(f)[0].jvp_function, Some(jvp));
}

#[test]
fn custom_derivative_with_wrong_type_is_reported() {
    let mut module = SourceModule::new("main");
    module.add_function(float_fn("f").with_attribute(differentiable(
        DifferentiableAttr::new().with_vjp(DeclNameRef::new("fVJP")),
    )));
    module.add_function(FunctionDecl::new(
        "fVJP",
        vec![ParamDecl::new("x", Type::float())],
        derivative_result(
            "pullback",
            Type::function(vec![Type::double()], Type::float()),
        ),
    ));
    module.add_function(float_fn("g").with_attribute(differentiable(
        DifferentiableAttr::new().with_vjp(DeclNameRef::new("missing")),
    )));
    let checked = check(module);
    assert_eq!(
        checked.codes(),
        vec![codes::DERIVATIVE_TYPE_MISMATCH, codes::UNRESOLVED_NAME]
    );
    assert!(checked.diagnostics[0]
        .mentions("'fVJP' does not have expected type '(Float) -> (value: Float, pullback: (Float) -> Float)'"));
}

#[test]
fn public_original_requires_abi_visible_derivative() {
    let mut module = SourceModule::new("main");
    module.add_function(
        float_fn("f")
            .with_access(Access::new(AccessLevel::Public))
            .with_attribute(differentiable(
                DifferentiableAttr::new().with_jvp(DeclNameRef::new("fJVP")),
            )),
    );
    module.add_function(FunctionDecl::new(
        "fJVP",
        vec![ParamDecl::new("x", Type::float())],
        derivative_result("differential", float_to_float()),
    ));
    let checked = check(module);
    assert_eq!(checked.codes(), vec![codes::INVALID_ACCESS]);
}

#[test]
fn differentiating_synthesizes_attribute_on_original() {
    let mut module = SourceModule::new("main");
    let f = module.add_function(float_fn("f"));
    let vjp = module.add_function(
        FunctionDecl::new(
            "vjpF",
            vec![ParamDecl::new("x", Type::float())],
            derivative_result("pullback", float_to_float()),
        )
        .with_attribute(differentiating("f")),
    );
    let checked = check(module);
    assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
    let synthesized = &checked.module.attributes(f)[0];
    assert!(synthesized.implicit);
    let attr = synthesized.as_differentiable().expect("differentiable");
    assert_eq!(attr.vjp_function, Some(vjp));
    assert_eq!(attr.parameter_indices, Some(IndexSubset::from_indices(1, [0])));
    assert!(attr.requirements.is_empty());
    let derivative = checked.module.attributes(vjp)[0]
        .as_differentiating()
        .expect("differentiating");
    assert_eq!(derivative.original_function, Some(f));
    assert!(checked
        .registry
        .get(f, &IndexSubset::from_indices(1, [0]))
        .is_some());
}

#[test]
fn differentiating_merges_into_existing_attribute() {
    let mut module = SourceModule::new("main");
    let jvp = module.add_function(
        FunctionDecl::new(
            "jvpF",
            vec![ParamDecl::new("x", Type::float())],
            derivative_result("differential", float_to_float()),
        )
        .with_attribute(differentiating("f")),
    );
    let f = module.add_function(float_fn("f").with_attribute(differentiable(
        DifferentiableAttr::new().wrt(vec![Wrt::named("x")]),
    )));
    let checked = check(module);
    assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
    let attrs = checked.differentiable(f);
    assert_eq!(attrs.len(), 1);
    assert!(!checked.module.attributes(f)[0].implicit);
    assert_eq!(attrs[0].jvp_function, Some(jvp));
    assert_eq!(checked.registry.len(), 1);
}

#[test]
fn differentiating_conflicts_with_named_derivative() {
    let mut module = SourceModule::new("main");
    module.add_function(float_fn("f").with_attribute(differentiable(
        DifferentiableAttr::new().with_vjp(DeclNameRef::new("fVJP")),
    )));
    module.add_function(FunctionDecl::new(
        "fVJP",
        vec![ParamDecl::new("x", Type::float())],
        derivative_result("pullback", float_to_float()),
    ));
    let other = module.add_function(
        FunctionDecl::new(
            "otherVJP",
            vec![ParamDecl::new("x", Type::float())],
            derivative_result("pullback", float_to_float()),
        )
        .with_attribute(differentiating("f")),
    );
    let checked = check(module);
    assert_eq!(checked.codes(), vec![codes::ORIGINAL_HAS_DERIVATIVE]);
    assert!(checked.module.attributes(other).is_empty());
}

#[test]
fn differentiating_result_shape_is_checked() {
    let mut module = SourceModule::new("main");
    module.add_function(float_fn("f"));
    let derivative = |name: &str, result: Type| {
        FunctionDecl::new(name, vec![ParamDecl::new("x", Type::float())], result)
            .with_attribute(differentiating("f"))
    };
    module.add_function(derivative("a", Type::float()));
    module.add_function(derivative(
        "b",
        Type::labeled_tuple(vec![("result", Type::float()), ("pullback", float_to_float())]),
    ));
    module.add_function(derivative("c", derivative_result("derivative", float_to_float())));
    module.add_function(derivative(
        "d",
        derivative_result("pullback", Type::function(vec![Type::float()], Type::double())),
    ));
    let checked = check(module);
    assert_eq!(
        checked.codes(),
        vec![
            codes::EXPECTED_RESULT_TUPLE,
            codes::INVALID_VALUE_LABEL,
            codes::INVALID_LINEAR_MAP_LABEL,
            codes::LINEAR_MAP_TYPE_MISMATCH,
        ]
    );
    assert!(checked.diagnostics[3].mentions("'pullback' does not have expected type '(Float) -> Float'"));
}

#[test]
fn differentiating_requires_same_file_and_existing_original() {
    let mut module = SourceModule::new("main");
    module.add_function(float_fn("f"));
    let elsewhere = module.add_function(
        FunctionDecl::new(
            "vjpF",
            vec![ParamDecl::new("x", Type::float())],
            derivative_result("pullback", float_to_float()),
        )
        .in_file(FileId(1))
        .with_attribute(differentiating("f")),
    );
    module.add_function(
        FunctionDecl::new(
            "vjpG",
            vec![ParamDecl::new("x", Type::double())],
            Type::labeled_tuple(vec![
                ("value", Type::double()),
                ("pullback", Type::function(vec![Type::double()], Type::double())),
            ]),
        )
        .with_attribute(differentiating("f")),
    );
    let checked = check(module);
    assert_eq!(
        checked.codes(),
        vec![codes::NOT_IN_SAME_FILE, codes::ORIGINAL_NOT_FOUND]
    );
    assert!(checked.module.attributes(elsewhere).is_empty());
}

#[test]
fn generic_derivative_records_extra_requirements() {
    let t = Type::generic("T", 0, 0);
    let mut module = SourceModule::new("main");
    let original = module.add_function(
        FunctionDecl::new("identity", vec![ParamDecl::new("x", t.clone())], t.clone())
            .with_signature(t_signature(Vec::new())),
    );
    let conformance = Requirement::conformance(t.clone(), crate::types::DIFFERENTIABLE);
    let tangent = Type::member(t.clone(), crate::types::TANGENT_VECTOR);
    module.add_function(
        FunctionDecl::new(
            "vjpIdentity",
            vec![ParamDecl::new("x", t.clone())],
            Type::labeled_tuple(vec![
                ("value", t.clone()),
                ("pullback", Type::function(vec![tangent.clone()], tangent)),
            ]),
        )
        .with_signature(t_signature(vec![conformance.clone()]))
        .with_attribute(differentiating("identity")),
    );
    let checked = check(module);
    assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
    let attr = checked.differentiable(original)[0];
    assert_eq!(attr.requirements, vec![conformance]);
    assert!(attr.derivative_generic_signature.is_some());
}

#[test]
fn where_clauses_are_validated() {
    let t = Type::generic("T", 0, 0);
    let mut module = SourceModule::new("main");
    let generic = |name: &str, attr: DifferentiableAttr| {
        FunctionDecl::new(name, vec![ParamDecl::new("x", t.clone())], t.clone())
            .with_signature(t_signature(Vec::new()))
            .with_attribute(differentiable(attr))
    };
    let constrained = module.add_function(generic(
        "a",
        DifferentiableAttr::new().with_where_clause(vec![WhereRequirement::new(
            Requirement::conformance(t.clone(), crate::types::DIFFERENTIABLE),
        )]),
    ));
    module.add_function(generic("b", DifferentiableAttr::new()));
    module.add_function(generic(
        "c",
        DifferentiableAttr::new().with_where_clause(vec![WhereRequirement::new(
            Requirement::Layout {
                subject: t.clone(),
                layout: LayoutConstraint::Class,
            },
        )]),
    ));
    module.add_function(float_fn("d").with_attribute(differentiable(
        DifferentiableAttr::new().with_where_clause(vec![WhereRequirement::new(
            Requirement::conformance(t.clone(), crate::types::DIFFERENTIABLE),
        )]),
    )));
    module.add_function(generic(
        "e",
        DifferentiableAttr::new().with_where_clause(Vec::new()),
    ));
    let checked = check(module);
    assert_eq!(
        checked.codes(),
        vec![
            codes::NO_INFERRED_PARAMETERS,
            codes::UNSUPPORTED_REQUIREMENT_KIND,
            codes::NONGENERIC_WHERE_CLAUSE,
            codes::EMPTY_WHERE_CLAUSE,
        ]
    );
    let attr = checked.differentiable(constrained)[0];
    assert_eq!(attr.requirements.len(), 1);
    let signature = attr.derivative_generic_signature.as_ref().expect("signature");
    assert!(signature.states_conformance(&t, crate::types::DIFFERENTIABLE));
}

#[test]
fn stored_property_attribute_moves_to_getter() {
    let mut module = SourceModule::new("main");
    let storage = module.add_storage(
        StorageDecl::stored("x", Type::float())
            .in_context(DeclContext::in_type(point()))
            .with_attribute(differentiable(DifferentiableAttr::new())),
    );
    let getter = module
        .storage(storage)
        .and_then(|storage| storage.getter)
        .expect("getter");
    let checked = check(module);
    assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
    assert!(checked.module.attributes(storage).is_empty());
    let moved = &checked.module.attributes(getter)[0];
    assert!(moved.implicit);
    assert_eq!(
        moved.as_differentiable().and_then(|attr| attr.parameter_indices.clone()),
        Some(IndexSubset::from_indices(1, [0]))
    );
    assert!(checked
        .registry
        .get(getter, &IndexSubset::from_indices(1, [0]))
        .is_some());
}

#[test]
fn accessors_and_stored_properties_restrict_custom_derivatives() {
    let mut module = SourceModule::new("main");
    let stored = module.add_storage(
        StorageDecl::stored("x", Type::float())
            .in_context(DeclContext::in_type(point()))
            .with_attribute(differentiable(
                DifferentiableAttr::new().with_jvp(DeclNameRef::new("xJVP")),
            )),
    );
    let computed = module.add_storage(
        StorageDecl::computed("magnitude", Type::float())
            .in_context(DeclContext::in_type(point()))
            .settable(),
    );
    let setter = module
        .storage(computed)
        .and_then(|storage| storage.setter)
        .expect("setter");
    module.add_attribute(setter, differentiable(DifferentiableAttr::new()));
    let checked = check(module);
    assert_eq!(
        checked.codes(),
        vec![
            codes::STORED_PROPERTY_CUSTOM_DERIVATIVE,
            codes::INVALID_DECL_ATTRIBUTE
        ]
    );
    assert!(checked.module.attributes(stored).is_empty());
}

#[test]
fn class_members_are_rejected() {
    let mut module = SourceModule::new("main");
    let method = module.add_function(
        float_fn("forward")
            .in_context(DeclContext::in_type(Type::class("Model")))
            .with_attribute(differentiable(DifferentiableAttr::new())),
    );
    let checked = check(module);
    assert_eq!(checked.codes(), vec![codes::CLASS_MEMBER_UNSUPPORTED]);
    assert!(checked.module.attributes(method).is_empty());
}

#[test]
fn modifier_placement_is_checked_with_fix_its() {
    let mut module = SourceModule::new("main");
    let global = module.add_function(
        float_fn("f")
            .with_attribute(DeclAttribute::new(AttributeKind::Final).at(Span::new(0, 5)))
            .with_attribute(DeclAttribute::new(AttributeKind::Mutating))
            .with_attribute(DeclAttribute::new(AttributeKind::NoDerivative)),
    );
    let method = module.add_function(
        float_fn("g")
            .in_context(DeclContext::in_type(point()))
            .with_attribute(DeclAttribute::new(AttributeKind::Mutating))
            .with_attribute(DeclAttribute::new(AttributeKind::NonMutating)),
    );
    module.add_function(
        float_fn("h")
            .in_context(DeclContext::in_type(point()))
            .static_member()
            .with_attribute(DeclAttribute::new(AttributeKind::Mutating)),
    );
    let property = module.add_storage(
        StorageDecl::stored("x", Type::float())
            .in_context(DeclContext::in_type(point()))
            .with_attribute(DeclAttribute::new(AttributeKind::NoDerivative)),
    );
    let checked = check(module);
    assert_eq!(
        checked.codes(),
        vec![
            codes::FINAL_OUTSIDE_CLASS,
            codes::MUTATING_AT_MODULE_SCOPE,
            codes::NO_DERIVATIVE_OUTSIDE_STORED_PROPERTY,
            codes::MUTATING_AND_NONMUTATING,
            codes::STATIC_MUTATING,
        ]
    );
    let fix_it = &checked.diagnostics[0].suggestions[0];
    assert_eq!(fix_it.message, "remove 'final'");
    assert_eq!(fix_it.span, Some(Span::new(0, 5)));
    assert!(checked.module.attributes(global).is_empty());
    assert_eq!(checked.module.attributes(method).len(), 1);
    assert_eq!(checked.module.attributes(property).len(), 1);
}
