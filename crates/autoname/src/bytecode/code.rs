//! Code objects: an instruction stream plus the symbol tables its operands index.

use std::{fmt, rc::Rc};

use serde::{Deserialize, Serialize};
use strum::Display;

use super::op::{INSTRUCTION_WIDTH, Opcode, TargetKind};

/// What kind of execution unit a code object represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum CodeKind {
    /// Top-level code; its name namespace is the module globals.
    Module,
    /// Function body with fast local slots.
    Function,
    /// Class body; stores go to the class namespace.
    Class,
    /// Placeholder for frames of native routines (constructors). Has no bytecode.
    Native,
}

/// Compile-time constant referenced by `LOAD_CONST`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Const {
    None,
    Int(i64),
    Str(String),
    Code(Rc<Code>),
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Code(code) => write!(f, "<code {}>", code.name()),
        }
    }
}

/// An immutable unit of bytecode with its constant pool and symbol tables.
///
/// The tables are what give operands meaning: `names` backs name, global and
/// attribute operands, `varnames` backs fast local slots and `cellvars` backs
/// closure cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
    name: String,
    kind: CodeKind,
    bytecode: Vec<u8>,
    constants: Vec<Const>,
    names: Vec<String>,
    varnames: Vec<String>,
    cellvars: Vec<String>,
}

impl Code {
    pub(crate) fn new(
        name: String,
        kind: CodeKind,
        bytecode: Vec<u8>,
        constants: Vec<Const>,
        names: Vec<String>,
        varnames: Vec<String>,
        cellvars: Vec<String>,
    ) -> Self {
        Self {
            name,
            kind,
            bytecode,
            constants,
            names,
            varnames,
            cellvars,
        }
    }

    /// Creates the bytecode-less code object used for native constructor frames.
    #[must_use]
    pub fn native(name: impl Into<String>) -> Self {
        Self::new(name.into(), CodeKind::Native, vec![], vec![], vec![], vec![], vec![])
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> CodeKind {
        self.kind
    }

    #[must_use]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    #[must_use]
    pub fn constants(&self) -> &[Const] {
        &self.constants
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn varnames(&self) -> &[String] {
        &self.varnames
    }

    #[must_use]
    pub fn cellvars(&self) -> &[String] {
        &self.cellvars
    }

    /// Whether this code carries an instruction stream that can be scanned.
    #[must_use]
    pub fn is_inspectable(&self) -> bool {
        self.kind != CodeKind::Native && !self.bytecode.is_empty()
    }

    /// Resolves an operand index against the symbol table for `kind`.
    #[must_use]
    pub fn symbol(&self, kind: TargetKind, index: u32) -> Option<&str> {
        let table = match kind {
            TargetKind::Name | TargetKind::Global | TargetKind::Attribute => &self.names,
            TargetKind::Local => &self.varnames,
            TargetKind::Cell => &self.cellvars,
        };
        let index = usize::try_from(index).ok()?;
        table.get(index).map(String::as_str)
    }

    /// Number of whole instruction slots in the stream.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.bytecode.len() / INSTRUCTION_WIDTH
    }

    /// Finds a nested code constant by name.
    #[must_use]
    pub fn nested(&self, name: &str) -> Option<&Rc<Self>> {
        self.constants.iter().find_map(|c| match c {
            Const::Code(code) if code.name() == name => Some(code),
            _ => None,
        })
    }

    fn describe_operand(&self, opcode: Opcode, arg: u32) -> Option<String> {
        if let Some(kind) = opcode.store_kind().or_else(|| opcode.load_kind()) {
            return Some(self.symbol(kind, arg).unwrap_or("?").to_owned());
        }
        match opcode {
            Opcode::LoadConst => Some(
                usize::try_from(arg)
                    .ok()
                    .and_then(|i| self.constants.get(i))
                    .map_or_else(|| "?".to_owned(), ToString::to_string),
            ),
            Opcode::BuildClass => Some(self.symbol(TargetKind::Name, arg).unwrap_or("?").to_owned()),
            op if op.is_jump() => Some(format!("to {arg}")),
            _ => None,
        }
    }
}

/// Disassembly listing. Extended operands are folded into the instruction they extend.
impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Disassembly of <{} {}>:", self.kind, self.name)?;
        let mut ext: u32 = 0;
        for (slot, pair) in self.bytecode.chunks(INSTRUCTION_WIDTH).enumerate() {
            let offset = slot * INSTRUCTION_WIDTH;
            let &[byte, raw] = pair else {
                writeln!(f, "{offset:>6} <truncated>")?;
                break;
            };
            let Some(opcode) = Opcode::from_byte(byte) else {
                writeln!(f, "{offset:>6} <{byte}>")?;
                ext = 0;
                continue;
            };
            let arg = ((ext & 0x00ff_ffff) << 8) | u32::from(raw);
            ext = if opcode == Opcode::ExtendedArg { arg } else { 0 };
            let mnemonic: &'static str = opcode.into();
            if !opcode.has_operand() {
                writeln!(f, "{offset:>6} {mnemonic}")?;
            } else if let Some(detail) = self.describe_operand(opcode, arg) {
                writeln!(f, "{offset:>6} {mnemonic:<20} {arg:>5} ({detail})")?;
            } else {
                writeln!(f, "{offset:>6} {mnemonic:<20} {arg:>5}")?;
            }
        }
        for constant in &self.constants {
            if let Const::Code(code) = constant {
                writeln!(f)?;
                write!(f, "{code}")?;
            }
        }
        Ok(())
    }
}
