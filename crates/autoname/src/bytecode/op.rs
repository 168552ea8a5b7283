//! Opcode definitions for the fixed-width instruction stream.
//!
//! Every instruction occupies exactly two bytes: the opcode followed by a one
//! byte operand. Operands wider than a byte are prefixed by one or more
//! [`Opcode::ExtendedArg`] instructions carrying the high-order bits,
//! most-significant first.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, FromRepr, IntoStaticStr};

/// Width in bytes of a single instruction slot (opcode + operand).
pub const INSTRUCTION_WIDTH: usize = 2;

/// Bytecode opcodes understood by the VM and the store-target decoder.
///
/// The string form is the conventional upper snake case mnemonic
/// (`STORE_FAST`, `UNPACK_SEQUENCE`, ...), which is also what the assembler
/// accepts.
#[repr(u8)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    FromRepr,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    Nop = 0,
    /// Inline cache slot; never executed.
    Cache,
    PopTop,
    RotTwo,
    DupTop,
    ExtendedArg,

    LoadConst,
    LoadName,
    LoadGlobal,
    LoadFast,
    LoadDeref,
    LoadAttr,

    StoreName,
    StoreGlobal,
    StoreFast,
    StoreDeref,
    StoreAttr,

    UnpackSequence,
    BuildTuple,
    BuildList,
    GetIter,
    /// Advances the iterator on top of the stack; jumps to the absolute target
    /// in the operand when exhausted.
    ForIter,
    JumpAbsolute,
    SetupWith,
    ExitWith,

    CallFunction,
    MakeFunction,
    /// Runs the class body code on top of the stack; operand names the class.
    BuildClass,
    ReturnValue,
}

/// Which symbol table a store (or load) instruction indexes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum TargetKind {
    /// Frame namespace (module or class body), indexed through `Code::names`.
    Name,
    /// Module globals, indexed through `Code::names`.
    Global,
    /// Fast local slot, indexed through `Code::varnames`.
    Local,
    /// Closure cell, indexed through `Code::cellvars`.
    Cell,
    /// Attribute of a receiver object, indexed through `Code::names`.
    Attribute,
}

impl Opcode {
    /// Decodes a raw opcode byte.
    #[inline]
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::from_repr(byte)
    }

    /// Returns the target kind for store-family opcodes.
    #[must_use]
    pub fn store_kind(self) -> Option<TargetKind> {
        match self {
            Self::StoreName => Some(TargetKind::Name),
            Self::StoreGlobal => Some(TargetKind::Global),
            Self::StoreFast => Some(TargetKind::Local),
            Self::StoreDeref => Some(TargetKind::Cell),
            Self::StoreAttr => Some(TargetKind::Attribute),
            _ => None,
        }
    }

    /// Returns the symbol table indexed by load-family opcodes.
    #[must_use]
    pub fn load_kind(self) -> Option<TargetKind> {
        match self {
            Self::LoadName => Some(TargetKind::Name),
            Self::LoadGlobal => Some(TargetKind::Global),
            Self::LoadFast => Some(TargetKind::Local),
            Self::LoadDeref => Some(TargetKind::Cell),
            Self::LoadAttr => Some(TargetKind::Attribute),
            _ => None,
        }
    }

    /// Opcodes whose operand is an absolute jump target.
    #[must_use]
    pub fn is_jump(self) -> bool {
        matches!(self, Self::ForIter | Self::JumpAbsolute)
    }

    /// Whether the operand byte carries meaning for this opcode.
    #[must_use]
    pub fn has_operand(self) -> bool {
        !matches!(
            self,
            Self::Nop
                | Self::Cache
                | Self::PopTop
                | Self::RotTwo
                | Self::DupTop
                | Self::GetIter
                | Self::SetupWith
                | Self::ExitWith
                | Self::MakeFunction
                | Self::ReturnValue
        )
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn mnemonic_round_trips_through_strum() {
        assert_eq!(Opcode::StoreFast.to_string(), "STORE_FAST");
        assert_eq!(Opcode::from_str("UNPACK_SEQUENCE").unwrap(), Opcode::UnpackSequence);
        assert!(Opcode::from_str("STORE_SUBSCR").is_err());
    }

    #[test]
    fn raw_bytes_decode() {
        assert_eq!(Opcode::from_byte(Opcode::DupTop as u8), Some(Opcode::DupTop));
        assert_eq!(Opcode::from_byte(0xff), None);
    }

    #[test]
    fn store_family_maps_to_tables() {
        assert_eq!(Opcode::StoreFast.store_kind(), Some(TargetKind::Local));
        assert_eq!(Opcode::StoreDeref.store_kind(), Some(TargetKind::Cell));
        assert_eq!(Opcode::StoreAttr.store_kind(), Some(TargetKind::Attribute));
        assert_eq!(Opcode::LoadFast.store_kind(), None);
        assert_eq!(Opcode::LoadFast.load_kind(), Some(TargetKind::Local));
    }
}
