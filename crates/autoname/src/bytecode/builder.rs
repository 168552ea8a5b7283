//! Builder for emitting bytecode.
//!
//! `CodeBuilder` encodes opcodes and operands into fixed-width slots, splitting
//! wide operands into `EXTENDED_ARG` prefixes, interns identifiers into the
//! symbol tables and patches forward jumps.

use indexmap::IndexSet;

use super::{
    code::{Code, CodeKind, Const},
    op::{INSTRUCTION_WIDTH, Opcode, TargetKind},
};

/// Builder for a single [`Code`] object.
///
/// # Usage
///
/// ```
/// use autoname::{CodeBuilder, CodeKind, Opcode};
///
/// let mut builder = CodeBuilder::new("<module>", CodeKind::Module);
/// builder.emit_named(Opcode::LoadGlobal, "AutoName");
/// builder.emit_arg(Opcode::CallFunction, 0);
/// builder.emit(Opcode::DupTop);
/// builder.emit_named(Opcode::StoreName, "a");
/// builder.emit_named(Opcode::StoreName, "b");
/// let code = builder.build();
/// assert_eq!(code.names(), ["AutoName", "a", "b"]);
/// ```
#[derive(Debug)]
pub struct CodeBuilder {
    name: String,
    kind: CodeKind,

    /// The bytecode being built.
    bytecode: Vec<u8>,

    /// Constants collected during emission.
    constants: Vec<Const>,

    /// Identifiers for name, global and attribute operands.
    names: IndexSet<String>,

    /// Local variable names indexed by slot number.
    varnames: IndexSet<String>,

    /// Closure cell names indexed by cell slot.
    cellvars: IndexSet<String>,
}

impl CodeBuilder {
    /// Creates a new empty builder.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: CodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            bytecode: Vec::new(),
            constants: Vec::new(),
            names: IndexSet::new(),
            varnames: IndexSet::new(),
            cellvars: IndexSet::new(),
        }
    }

    /// Byte offset where the next instruction will be emitted.
    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.bytecode.len()
    }

    /// Emits an instruction whose operand is ignored.
    pub fn emit(&mut self, op: Opcode) {
        self.bytecode.push(op as u8);
        self.bytecode.push(0);
    }

    /// Emits an instruction with an arbitrary operand.
    ///
    /// Operands above 255 are preceded by `EXTENDED_ARG` instructions holding
    /// the higher bytes, most-significant first.
    pub fn emit_arg(&mut self, op: Opcode, arg: u32) {
        let bytes = arg.to_be_bytes();
        let first = bytes.iter().position(|&b| b != 0).unwrap_or(3).min(3);
        for &byte in &bytes[first..3] {
            self.bytecode.push(Opcode::ExtendedArg as u8);
            self.bytecode.push(byte);
        }
        self.bytecode.push(op as u8);
        self.bytecode.push(bytes[3]);
    }

    /// Emits a raw opcode/operand pair without any operand splitting.
    ///
    /// Used by the assembler for explicit `EXTENDED_ARG` lines and by tests that
    /// need malformed streams.
    pub fn emit_raw(&mut self, op: u8, operand: u8) {
        self.bytecode.push(op);
        self.bytecode.push(operand);
    }

    /// Emits a load or store instruction, interning `symbol` into the table the
    /// opcode indexes. `BUILD_CLASS` takes its class name from `names` too.
    ///
    /// # Panics
    ///
    /// Panics if `op` does not take a symbolic operand.
    pub fn emit_named(&mut self, op: Opcode, symbol: &str) {
        let kind = op
            .store_kind()
            .or_else(|| op.load_kind())
            .or((op == Opcode::BuildClass).then_some(TargetKind::Name))
            .unwrap_or_else(|| panic!("{op} does not take a symbolic operand"));
        let index = self.symbol_index(kind, symbol);
        self.emit_arg(op, index);
    }

    /// Interns `symbol` into the table for `kind`, returning its index.
    pub fn symbol_index(&mut self, kind: TargetKind, symbol: &str) -> u32 {
        let table = match kind {
            TargetKind::Name | TargetKind::Global | TargetKind::Attribute => &mut self.names,
            TargetKind::Local => &mut self.varnames,
            TargetKind::Cell => &mut self.cellvars,
        };
        let (index, _) = table.insert_full(symbol.to_owned());
        index_u32(index)
    }

    /// Declares a local slot up front, e.g. for function parameters.
    pub fn declare_local(&mut self, name: &str) -> u32 {
        self.symbol_index(TargetKind::Local, name)
    }

    /// Declares a closure cell up front.
    pub fn declare_cell(&mut self, name: &str) -> u32 {
        self.symbol_index(TargetKind::Cell, name)
    }

    /// Adds a constant and returns its index.
    pub fn add_const(&mut self, value: Const) -> u32 {
        self.constants.push(value);
        index_u32(self.constants.len() - 1)
    }

    /// Emits `LOAD_CONST` for a new constant.
    pub fn load_const(&mut self, value: Const) {
        let index = self.add_const(value);
        self.emit_arg(Opcode::LoadConst, index);
    }

    /// Emits a jump whose target is not known yet.
    ///
    /// Jumps always reserve one `EXTENDED_ARG` prefix so the target can be
    /// patched in place without shifting later offsets (16-bit targets).
    #[must_use]
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        debug_assert!(op.is_jump(), "{op} is not a jump");
        let label = JumpLabel(self.bytecode.len());
        self.bytecode.push(Opcode::ExtendedArg as u8);
        self.bytecode.push(0);
        self.bytecode.push(op as u8);
        self.bytecode.push(0);
        label
    }

    /// Emits a jump to an already known (usually backward) target.
    pub fn emit_jump_to(&mut self, op: Opcode, target: usize) {
        let label = self.emit_jump(op);
        self.patch_jump_to(label, target);
    }

    /// Points a previously emitted jump at the current offset.
    ///
    /// # Panics
    ///
    /// Panics if the current offset does not fit in 16 bits.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.bytecode.len();
        self.patch_jump_to(label, target);
    }

    /// Points a previously emitted jump at `target`.
    ///
    /// # Panics
    ///
    /// Panics if `target` does not fit the 16 bits a jump reserves.
    pub fn patch_jump_to(&mut self, label: JumpLabel, target: usize) {
        let target = u16::try_from(target).expect("jump target exceeds 16 bits");
        let [hi, lo] = target.to_be_bytes();
        self.bytecode[label.0 + 1] = hi;
        self.bytecode[label.0 + INSTRUCTION_WIDTH + 1] = lo;
    }

    /// Finishes the code object.
    #[must_use]
    pub fn build(self) -> Code {
        Code::new(
            self.name,
            self.kind,
            self.bytecode,
            self.constants,
            self.names.into_iter().collect(),
            self.varnames.into_iter().collect(),
            self.cellvars.into_iter().collect(),
        )
    }
}

/// Label for a forward jump that needs patching.
///
/// Stores the offset of the reserved `EXTENDED_ARG` prefix.
#[derive(Debug, Clone, Copy)]
pub struct JumpLabel(usize);

fn index_u32(index: usize) -> u32 {
    u32::try_from(index).expect("symbol table exceeds u32 indices")
}
