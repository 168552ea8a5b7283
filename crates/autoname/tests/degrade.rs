//! Malformed instruction streams never fail a name read: resolution degrades
//! to the sentinel and the decoder error is reported to the tracer.
use std::rc::Rc;

use autoname::{
    BoundObject, CallSite, CallStack, ClassDef, Code, CodeBuilder, CodeKind, ExecutionFrame, Opcode,
    RecordingTracer, ResolveConfig, ResolveContext, SENTINEL, TargetKind, TraceEvent, assemble, new_namespace,
    scan::ScanError,
};
use pretty_assertions::assert_eq;

/// Resolves a value constructed by a call ending at `resume` in `code`, with
/// that code as the only live frame.
fn resolve(code: Code, resume: usize, config: &ResolveConfig) -> (String, Vec<TraceEvent>) {
    let frame = ExecutionFrame::new(Rc::new(code), None, new_namespace());
    frame.set_ip(resume);
    let mut stack = CallStack::new();
    stack.push(frame);

    let object = BoundObject::construct(&ClassDef::engine(), 0, CallSite::new(), &stack).unwrap();
    let mut tracer = RecordingTracer::new();
    let ctx = ResolveContext::new(config).with_stack(&stack);
    let name = object.resolved_name_traced(&ctx, &mut tracer).unwrap().to_owned();
    assert_eq!(object.via(), None);
    (name, tracer.into_events())
}

fn degraded(events: &[TraceEvent]) -> Vec<ScanError> {
    events
        .iter()
        .filter_map(|event| match event {
            TraceEvent::Degraded { error } => Some(error.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn unknown_opcode_in_live_run() {
    let code = assemble(
        "LOAD_GLOBAL AutoName
         CALL_FUNCTION 0
         .raw 238 0
         STORE_NAME obj",
    )
    .unwrap();
    let (name, events) = resolve(code, 4, &ResolveConfig::default());
    assert_eq!(name, SENTINEL);
    assert_eq!(degraded(&events), vec![ScanError::UnknownOpcode { offset: 4, byte: 238 }]);
}

#[test]
fn store_operand_out_of_range() {
    let mut builder = CodeBuilder::new("<module>", CodeKind::Module);
    builder.emit_named(Opcode::LoadGlobal, "AutoName");
    builder.emit_arg(Opcode::CallFunction, 0);
    builder.emit_raw(Opcode::StoreName as u8, 9);
    let (name, events) = resolve(builder.build(), 4, &ResolveConfig::default());
    assert_eq!(name, SENTINEL);
    assert_eq!(
        degraded(&events),
        vec![ScanError::MissingSymbol {
            offset: 4,
            kind: TargetKind::Name,
            index: 9
        }]
    );
}

#[test]
fn scan_budget_exhausted() {
    let code = assemble(
        "LOAD_GLOBAL AutoName
         CALL_FUNCTION 0
         DUP_TOP
         DUP_TOP
         DUP_TOP
         STORE_NAME a
         STORE_NAME b
         STORE_NAME c
         STORE_NAME d",
    )
    .unwrap();
    let tight = ResolveConfig::default().with_max_scan_instructions(3);
    let (name, events) = resolve(code.clone(), 4, &tight);
    assert_eq!(name, SENTINEL);
    assert_eq!(degraded(&events), vec![ScanError::BudgetExceeded { limit: 3 }]);

    let (name, events) = resolve(code, 4, &ResolveConfig::default());
    assert_eq!(name, "d");
    assert!(degraded(&events).is_empty());
}

/// A destructuring that runs off the end of the stream before every position
/// is bound.
#[test]
fn unclosed_group() {
    let code = assemble(
        "LOAD_GLOBAL AutoName
         CALL_FUNCTION 0
         UNPACK_SEQUENCE 3
         STORE_NAME a
         STORE_NAME b",
    )
    .unwrap();
    let (name, events) = resolve(code, 4, &ResolveConfig::default());
    assert_eq!(name, SENTINEL);
    assert_eq!(degraded(&events), vec![ScanError::UnclosedGroup { group: 0, missing: 1 }]);
}
