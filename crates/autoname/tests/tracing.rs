//! What the engine reports to a tracer while resolving names.
use autoname::{
    RecordingTracer, ResolverKind, StderrTracer, TargetKind, TraceEvent, Vm, assemble, scan::RunEnd,
};
use pretty_assertions::assert_eq;

/// Resolution-side events only, leaving out VM dispatch and decoder steps.
fn resolution_events(vm: &Vm<RecordingTracer>) -> Vec<TraceEvent> {
    vm.tracer()
        .events()
        .iter()
        .filter(|event| {
            !matches!(
                event,
                TraceEvent::Instruction { .. }
                    | TraceEvent::Call { .. }
                    | TraceEvent::Return { .. }
                    | TraceEvent::Decode { .. }
            )
        })
        .cloned()
        .collect()
}

#[test]
fn single_store_is_traced_on_first_read() {
    let code = assemble(
        "LOAD_GLOBAL AutoName
         CALL_FUNCTION 0
         STORE_NAME obj",
    )
    .unwrap();
    let mut vm = Vm::new(RecordingTracer::new());
    vm.run_module(code).unwrap();
    assert!(resolution_events(&vm).is_empty());

    assert_eq!(vm.name_of("obj").unwrap().unwrap(), "obj");
    assert_eq!(
        resolution_events(&vm),
        vec![
            TraceEvent::Store {
                name: "obj".to_owned(),
                kind: TargetKind::Name,
                position: 0
            },
            TraceEvent::RunEnd {
                offset: 6,
                reason: RunEnd::ValueConsumed
            },
            TraceEvent::Resolved {
                name: "obj".to_owned(),
                via: ResolverKind::InstructionScanner
            },
        ]
    );

    // Cached: a second read reports nothing new.
    let before = vm.tracer().events().len();
    vm.name_of("obj").unwrap().unwrap();
    assert_eq!(vm.tracer().events().len(), before);
}

/// Destructuring resolves the value while unpacking; the siblings come out
/// pre-named and the value itself has no simple target.
#[test]
fn unpack_group_is_traced() {
    let code = assemble(
        "LOAD_GLOBAL AutoName
         LOAD_CONST 2
         CALL_FUNCTION 1
         UNPACK_SEQUENCE 2
         STORE_NAME a
         STORE_NAME b",
    )
    .unwrap();
    let mut vm = Vm::new(RecordingTracer::new());
    vm.run_module(code).unwrap();
    assert_eq!(
        resolution_events(&vm),
        vec![
            TraceEvent::GroupOpen { group: 0, size: 2 },
            TraceEvent::Store {
                name: "a".to_owned(),
                kind: TargetKind::Name,
                position: 0
            },
            TraceEvent::Store {
                name: "b".to_owned(),
                kind: TargetKind::Name,
                position: 1
            },
            TraceEvent::GroupClose { group: 0, start: 0, end: 2 },
            TraceEvent::RunEnd {
                offset: 12,
                reason: RunEnd::ValueConsumed
            },
        ]
    );
    assert_eq!(vm.name_of("b").unwrap().unwrap(), "b");
}

#[test]
fn stderr_tracer_runs_to_completion() {
    let code = assemble(
        "LOAD_GLOBAL AutoName
         CALL_FUNCTION 0
         STORE_NAME obj",
    )
    .unwrap();
    let mut vm = Vm::new(StderrTracer::with_limit(2));
    vm.run_module(code).unwrap();
    assert_eq!(vm.name_of("obj").unwrap().unwrap(), "obj");
}

/// A member named by its class body never has its call site decoded.
#[test]
fn declared_member_skips_decoding() {
    let code = assemble(
        ".code Holder class
             LOAD_GLOBAL AutoName
             CALL_FUNCTION 0
             STORE_NAME member
         .end
             LOAD_CONST @Holder
             BUILD_CLASS Holder
             LOAD_ATTR member
             STORE_NAME held",
    )
    .unwrap();
    let mut vm = Vm::new(RecordingTracer::new());
    vm.run_module(code).unwrap();
    assert_eq!(vm.name_of("held").unwrap().unwrap(), "member");

    let events = vm.tracer().events();
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, TraceEvent::Decode { .. } | TraceEvent::Store { .. }))
    );
    assert!(events.contains(&TraceEvent::Resolved {
        name: "member".to_owned(),
        via: ResolverKind::ExplicitHook
    }));
}
