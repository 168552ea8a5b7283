//! Bytecode model: opcodes, code objects and the builder that emits them.

mod builder;
mod code;
mod op;

pub use builder::{CodeBuilder, JumpLabel};
pub use code::{Code, CodeKind, Const};
pub use op::{INSTRUCTION_WIDTH, Opcode, TargetKind};
