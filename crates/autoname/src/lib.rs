#![doc = include_str!("../../../README.md")]

mod asm;
mod bytecode;
mod config;
mod error;
mod frame;
mod legacy;
mod locator;
mod object;
mod resolver;
pub mod scan;
pub mod tracer;
mod value;
mod vm;

pub use crate::{
    asm::{AsmError, MODULE_NAME, assemble},
    bytecode::{Code, CodeBuilder, CodeKind, Const, INSTRUCTION_WIDTH, JumpLabel, Opcode, TargetKind},
    config::{DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_SCAN_INSTRUCTIONS, ResolveConfig, SENTINEL},
    error::NameError,
    frame::{CallStack, ExecutionFrame},
    legacy::{LexicalScanner, NamespaceScanner},
    locator::{CallSite, locate},
    object::{BoundObject, ClassDef, ENGINE_BASE, Entered},
    resolver::{ExplicitHook, InstructionScanner, NameResolver, ResolveContext, ResolverKind, fallback},
    tracer::{NoopTracer, RecordingTracer, StderrTracer, TraceEvent, Tracer},
    value::{Namespace, SeqIter, TypeObject, Value, new_namespace},
    vm::{RunError, Vm},
};
