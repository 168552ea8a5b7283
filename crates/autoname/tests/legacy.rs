//! Identity-based fallbacks, consulted when the construction site carries no
//! instruction stream.
use std::rc::Rc;

use autoname::{
    BoundObject, CallSite, CallStack, ClassDef, CodeBuilder, CodeKind, ExecutionFrame, NameError, ResolveConfig,
    ResolveContext, ResolverKind, SENTINEL, TypeObject, Value, new_namespace,
};
use pretty_assertions::assert_eq;

/// An object constructed with no frame to scan.
fn siteless() -> Rc<BoundObject> {
    BoundObject::construct(&ClassDef::engine(), 0, CallSite::new(), &CallStack::new()).unwrap()
}

/// A function frame with the given locals, all unbound.
fn function_frame(locals: &[&str], parent: Option<&Rc<ExecutionFrame>>) -> Rc<ExecutionFrame> {
    let mut builder = CodeBuilder::new("f", CodeKind::Function);
    for local in locals {
        builder.declare_local(local);
    }
    ExecutionFrame::new(Rc::new(builder.build()), parent, new_namespace())
}

#[test]
fn lexical_single_binding() {
    let object = siteless();
    let frame = function_frame(&["unrelated", "found"], None);
    assert!(frame.set_local(0, Value::Int(1)));
    assert!(frame.set_local(1, Value::Object(Rc::clone(&object))));
    let mut stack = CallStack::new();
    stack.push(frame);

    let config = ResolveConfig::default();
    let ctx = ResolveContext::new(&config).with_stack(&stack);
    assert_eq!(object.resolved_name_in(&ctx).unwrap(), "found");
    assert_eq!(object.via(), Some(ResolverKind::LexicalScanner));
}

/// Two aliases in the deciding frame are a conflict, and the failure is
/// cached like a name would be.
#[test]
fn lexical_conflict_is_cached() {
    let object = siteless();
    let frame = function_frame(&["a", "b"], None);
    frame.set_local(0, Value::Object(Rc::clone(&object)));
    frame.set_local(1, Value::Object(Rc::clone(&object)));
    let mut stack = CallStack::new();
    stack.push(Rc::clone(&frame));

    let config = ResolveConfig::default();
    let ctx = ResolveContext::new(&config).with_stack(&stack);
    let expected = NameError::Conflict {
        names: vec!["a".to_owned(), "b".to_owned()],
    };
    assert_eq!(object.resolved_name_in(&ctx).unwrap_err(), expected);

    frame.set_local(1, Value::None);
    assert_eq!(object.resolved_name_in(&ctx).unwrap_err(), expected);
}

/// The innermost frame holding the object decides; outer aliases are not
/// consulted.
#[test]
fn lexical_innermost_scope_decides() {
    let object = siteless();
    let outer = function_frame(&["outer"], None);
    outer.set_local(0, Value::Object(Rc::clone(&object)));
    let inner = function_frame(&["inner"], Some(&outer));
    inner.set_local(0, Value::Object(Rc::clone(&object)));
    let mut stack = CallStack::new();
    stack.push(outer);
    stack.push(inner);

    let config = ResolveConfig::default();
    let ctx = ResolveContext::new(&config).with_stack(&stack);
    assert_eq!(object.resolved_name_in(&ctx).unwrap(), "inner");
}

/// The namespace scanner descends into class namespaces that hold
/// self-naming values.
#[test]
fn namespace_nested_type() {
    let object = siteless();
    let members = new_namespace();
    members
        .borrow_mut()
        .insert("member".to_owned(), Value::Object(Rc::clone(&object)));
    let namespace = new_namespace();
    namespace
        .borrow_mut()
        .insert("Holder".to_owned(), Value::Type(Rc::new(TypeObject::new("Holder", members))));

    let config = ResolveConfig::default();
    let ctx = ResolveContext::new(&config).with_namespace(&namespace);
    assert_eq!(object.resolved_name_in(&ctx).unwrap(), "member");
    assert_eq!(object.via(), Some(ResolverKind::NamespaceScanner));
}

#[test]
fn namespace_conflict() {
    let object = siteless();
    let namespace = new_namespace();
    namespace
        .borrow_mut()
        .insert("first".to_owned(), Value::Object(Rc::clone(&object)));
    namespace
        .borrow_mut()
        .insert("second".to_owned(), Value::Object(Rc::clone(&object)));

    let config = ResolveConfig::default();
    let ctx = ResolveContext::new(&config).with_namespace(&namespace);
    assert_eq!(
        object.resolved_name_in(&ctx).unwrap_err(),
        NameError::Conflict {
            names: vec!["first".to_owned(), "second".to_owned()]
        }
    );
}

/// Fallbacks run in the configured order; with none configured the name is
/// the sentinel.
#[test]
fn fallback_order_follows_config() {
    let namespace = new_namespace();
    let frame = function_frame(&["local"], None);
    let mut stack = CallStack::new();
    stack.push(Rc::clone(&frame));

    let resolve_with = |fallbacks: Vec<ResolverKind>| {
        let object = siteless();
        frame.set_local(0, Value::Object(Rc::clone(&object)));
        namespace
            .borrow_mut()
            .insert("global".to_owned(), Value::Object(Rc::clone(&object)));
        let config = ResolveConfig::default().with_fallbacks(fallbacks);
        let ctx = ResolveContext::new(&config)
            .with_stack(&stack)
            .with_namespace(&namespace);
        object.resolved_name_in(&ctx).map(str::to_owned)
    };

    assert_eq!(
        resolve_with(vec![ResolverKind::LexicalScanner, ResolverKind::NamespaceScanner]).unwrap(),
        "local"
    );
    assert_eq!(
        resolve_with(vec![ResolverKind::NamespaceScanner, ResolverKind::LexicalScanner]).unwrap(),
        "global"
    );
    assert_eq!(resolve_with(vec![]).unwrap(), SENTINEL);
}

/// A declared name is never overridden by a fallback.
#[test]
fn declared_name_wins() {
    let object = BoundObject::named(&ClassDef::engine(), "declared");
    let namespace = new_namespace();
    namespace
        .borrow_mut()
        .insert("alias".to_owned(), Value::Object(Rc::clone(&object)));

    let config = ResolveConfig::default();
    let ctx = ResolveContext::new(&config).with_namespace(&namespace);
    assert_eq!(object.resolved_name_in(&ctx).unwrap(), "declared");
    assert_eq!(object.via(), Some(ResolverKind::ExplicitHook));
}
