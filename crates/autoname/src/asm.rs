//! Line-oriented assembler for [`Code`] objects.
//!
//! ```text
//! # module body; nested bodies are declared before use
//! .code make function
//! .locals count
//!     LOAD_GLOBAL AutoName
//!     LOAD_FAST count
//!     CALL_FUNCTION 1
//!     STORE_FAST inner
//!     LOAD_FAST inner
//!     RETURN_VALUE
//! .end
//!     LOAD_CONST @make
//!     MAKE_FUNCTION
//!     STORE_NAME make
//! loop:
//!     JUMP_ABSOLUTE done
//! done:
//! ```
//!
//! Lines hold one instruction, a `label:` or a directive. `#` starts a
//! comment. Symbolic operands are interned into the table the opcode indexes;
//! a plain integer is used as a raw index instead. `LOAD_CONST` takes `None`,
//! an integer, a double-quoted string or `@name` for a nested body. Jumps take
//! a label or an absolute offset. `.raw OP ARG` emits a raw byte pair.

use std::{fmt, rc::Rc, str::FromStr};

use ahash::AHashMap;

use crate::bytecode::{Code, CodeBuilder, CodeKind, Const, JumpLabel, Opcode};

/// Name of the implicit top-level body.
pub const MODULE_NAME: &str = "<module>";

/// Assembly failures, each tagged with its 1-based source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmError {
    UnknownOpcode { line: usize, mnemonic: String },
    UnknownDirective { line: usize, directive: String },
    MissingOperand { line: usize, mnemonic: String },
    BadOperand { line: usize, operand: String },
    UnknownLabel { line: usize, label: String },
    DuplicateLabel { line: usize, label: String },
    UnknownCode { line: usize, name: String },
    /// `.end` without `.code`, or `.code` never closed.
    UnbalancedBlock { line: usize },
    JumpOutOfRange { line: usize, target: usize },
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOpcode { line, mnemonic } => write!(f, "line {line}: unknown opcode {mnemonic}"),
            Self::UnknownDirective { line, directive } => write!(f, "line {line}: unknown directive {directive}"),
            Self::MissingOperand { line, mnemonic } => write!(f, "line {line}: {mnemonic} needs an operand"),
            Self::BadOperand { line, operand } => write!(f, "line {line}: bad operand {operand:?}"),
            Self::UnknownLabel { line, label } => write!(f, "line {line}: undefined label {label}"),
            Self::DuplicateLabel { line, label } => write!(f, "line {line}: label {label} defined twice"),
            Self::UnknownCode { line, name } => write!(f, "line {line}: no nested code named {name}"),
            Self::UnbalancedBlock { line } => write!(f, "line {line}: unbalanced .code/.end"),
            Self::JumpOutOfRange { line, target } => write!(f, "line {line}: jump target {target} exceeds 16 bits"),
        }
    }
}

impl std::error::Error for AsmError {}

/// Assembles `source` into a module code object.
pub fn assemble(source: &str) -> Result<Code, AsmError> {
    let mut blocks = vec![Block::new(MODULE_NAME, CodeKind::Module, 0)];
    let mut last_line = 0;
    for (index, raw) in source.lines().enumerate() {
        let line = index + 1;
        last_line = line;
        let text = strip_comment(raw).trim();
        if text.is_empty() {
            continue;
        }
        if let Some(directive) = text.strip_prefix('.') {
            directive_line(&mut blocks, directive, line)?;
            continue;
        }
        let block = blocks.last_mut().ok_or(AsmError::UnbalancedBlock { line })?;
        if let Some(label) = text.strip_suffix(':')
            && is_identifier(label)
        {
            block.define_label(label, line)?;
        } else {
            block.instruction(text, line)?;
        }
    }

    let module = blocks.pop().ok_or(AsmError::UnbalancedBlock { line: last_line })?;
    if !blocks.is_empty() {
        return Err(AsmError::UnbalancedBlock { line: module.line });
    }
    module.finish()
}

fn directive_line(blocks: &mut Vec<Block>, directive: &str, line: usize) -> Result<(), AsmError> {
    let mut words = directive.split_whitespace();
    let keyword = words.next().unwrap_or_default();
    match keyword {
        "code" => {
            let (Some(name), Some(kind), None) = (words.next(), words.next(), words.next()) else {
                return Err(AsmError::BadOperand {
                    line,
                    operand: directive.to_owned(),
                });
            };
            let kind = match kind {
                "function" => CodeKind::Function,
                "class" => CodeKind::Class,
                _ => {
                    return Err(AsmError::BadOperand {
                        line,
                        operand: kind.to_owned(),
                    });
                }
            };
            blocks.push(Block::new(name, kind, line));
        }
        "end" => {
            // The implicit module block can never be closed explicitly.
            if blocks.len() < 2 {
                return Err(AsmError::UnbalancedBlock { line });
            }
            let block = blocks.pop().ok_or(AsmError::UnbalancedBlock { line })?;
            let name = block.name.clone();
            let code = block.finish()?;
            if let Some(parent) = blocks.last_mut() {
                parent.children.insert(name, Rc::new(code));
            }
        }
        "locals" | "cells" => {
            let block = blocks.last_mut().ok_or(AsmError::UnbalancedBlock { line })?;
            for word in words {
                if keyword == "locals" {
                    block.builder.declare_local(word);
                } else {
                    block.builder.declare_cell(word);
                }
            }
        }
        "raw" => {
            let block = blocks.last_mut().ok_or(AsmError::UnbalancedBlock { line })?;
            let (Some(op), Some(arg), None) = (words.next(), words.next(), words.next()) else {
                return Err(AsmError::BadOperand {
                    line,
                    operand: directive.to_owned(),
                });
            };
            block.builder.emit_raw(byte(op, line)?, byte(arg, line)?);
        }
        _ => {
            return Err(AsmError::UnknownDirective {
                line,
                directive: keyword.to_owned(),
            });
        }
    }
    Ok(())
}

/// One `.code` body under construction.
struct Block {
    name: String,
    /// Line the block was opened on.
    line: usize,
    builder: CodeBuilder,
    children: AHashMap<String, Rc<Code>>,
    labels: AHashMap<String, usize>,
    /// Forward jumps waiting for their label.
    pending: Vec<(String, JumpLabel, usize)>,
}

impl Block {
    fn new(name: &str, kind: CodeKind, line: usize) -> Self {
        Self {
            name: name.to_owned(),
            line,
            builder: CodeBuilder::new(name, kind),
            children: AHashMap::new(),
            labels: AHashMap::new(),
            pending: Vec::new(),
        }
    }

    fn define_label(&mut self, label: &str, line: usize) -> Result<(), AsmError> {
        let target = self.builder.current_offset();
        if self.labels.insert(label.to_owned(), target).is_some() {
            return Err(AsmError::DuplicateLabel {
                line,
                label: label.to_owned(),
            });
        }
        if target > usize::from(u16::MAX) && self.pending.iter().any(|(name, ..)| name == label) {
            return Err(AsmError::JumpOutOfRange { line, target });
        }
        let (ready, waiting): (Vec<_>, Vec<_>) = self.pending.drain(..).partition(|(name, ..)| name == label);
        self.pending = waiting;
        for (_, jump, _) in ready {
            self.builder.patch_jump_to(jump, target);
        }
        Ok(())
    }

    fn instruction(&mut self, text: &str, line: usize) -> Result<(), AsmError> {
        let (mnemonic, operand) = match text.split_once(char::is_whitespace) {
            Some((mnemonic, rest)) => (mnemonic, Some(rest.trim())),
            None => (text, None),
        };
        let opcode = Opcode::from_str(mnemonic).map_err(|_| AsmError::UnknownOpcode {
            line,
            mnemonic: mnemonic.to_owned(),
        })?;
        let missing = || AsmError::MissingOperand {
            line,
            mnemonic: mnemonic.to_owned(),
        };

        let symbolic = opcode.store_kind().or_else(|| opcode.load_kind()).is_some() || opcode == Opcode::BuildClass;
        if symbolic {
            let operand = operand.ok_or_else(missing)?;
            match operand.parse::<u32>() {
                Ok(index) => self.builder.emit_arg(opcode, index),
                Err(_) if is_identifier(operand) => self.builder.emit_named(opcode, operand),
                Err(_) => return Err(bad(operand, line)),
            }
        } else if opcode == Opcode::LoadConst {
            let operand = operand.ok_or_else(missing)?;
            let constant = self.constant(operand, line)?;
            self.builder.load_const(constant);
        } else if opcode.is_jump() {
            let operand = operand.ok_or_else(missing)?;
            self.jump(opcode, operand, line)?;
        } else if opcode.has_operand() {
            let arg = match operand {
                Some(text) => text.parse::<u32>().map_err(|_| bad(text, line))?,
                None => 0,
            };
            self.builder.emit_arg(opcode, arg);
        } else if let Some(text) = operand {
            return Err(bad(text, line));
        } else {
            self.builder.emit(opcode);
        }
        Ok(())
    }

    fn constant(&self, operand: &str, line: usize) -> Result<Const, AsmError> {
        if operand == "None" {
            return Ok(Const::None);
        }
        if let Some(name) = operand.strip_prefix('@') {
            let code = self.children.get(name).ok_or_else(|| AsmError::UnknownCode {
                line,
                name: name.to_owned(),
            })?;
            return Ok(Const::Code(Rc::clone(code)));
        }
        if let Some(text) = operand.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')) {
            return Ok(Const::Str(text.to_owned()));
        }
        operand.parse::<i64>().map(Const::Int).map_err(|_| bad(operand, line))
    }

    fn jump(&mut self, opcode: Opcode, operand: &str, line: usize) -> Result<(), AsmError> {
        let target = if let Ok(offset) = operand.parse::<usize>() {
            Some(offset)
        } else if is_identifier(operand) {
            self.labels.get(operand).copied()
        } else {
            return Err(bad(operand, line));
        };
        match target {
            Some(target) if target > usize::from(u16::MAX) => Err(AsmError::JumpOutOfRange { line, target }),
            Some(target) => {
                self.builder.emit_jump_to(opcode, target);
                Ok(())
            }
            None => {
                let jump = self.builder.emit_jump(opcode);
                self.pending.push((operand.to_owned(), jump, line));
                Ok(())
            }
        }
    }

    fn finish(self) -> Result<Code, AsmError> {
        if let Some((label, _, line)) = self.pending.into_iter().next() {
            return Err(AsmError::UnknownLabel { line, label });
        }
        Ok(self.builder.build())
    }
}

fn strip_comment(line: &str) -> &str {
    let mut quoted = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '#' if !quoted => return &line[..index],
            _ => {}
        }
    }
    line
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|first| first.is_alphabetic() || first == '_' || first == '<')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '<' | '>' | '.'))
}

fn byte(text: &str, line: usize) -> Result<u8, AsmError> {
    text.parse::<u8>().map_err(|_| bad(text, line))
}

fn bad(operand: &str, line: usize) -> AsmError {
    AsmError::BadOperand {
        line,
        operand: operand.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::bytecode::TargetKind;

    #[test]
    fn symbolic_operands_are_interned() {
        let code = assemble(
            "LOAD_GLOBAL AutoName
             CALL_FUNCTION 0
             DUP_TOP
             STORE_NAME a   # first target
             STORE_NAME b",
        )
        .unwrap();
        assert_eq!(code.names(), ["AutoName", "a", "b"]);
        assert_eq!(code.instruction_count(), 5);
    }

    #[test]
    fn nested_code_is_referenced_by_name() {
        let code = assemble(
            ".code f function
             .locals x
                 LOAD_FAST x
                 RETURN_VALUE
             .end
                 LOAD_CONST @f
                 MAKE_FUNCTION
                 STORE_NAME f",
        )
        .unwrap();
        let nested = code.nested("f").unwrap();
        assert_eq!(nested.kind(), CodeKind::Function);
        assert_eq!(nested.symbol(TargetKind::Local, 0), Some("x"));
    }

    #[test]
    fn forward_and_backward_labels() {
        let code = assemble(
            "top:
                 JUMP_ABSOLUTE out
                 JUMP_ABSOLUTE top
             out:",
        )
        .unwrap();
        assert_eq!(
            code.bytecode(),
            &[
                Opcode::ExtendedArg as u8,
                0,
                Opcode::JumpAbsolute as u8,
                8,
                Opcode::ExtendedArg as u8,
                0,
                Opcode::JumpAbsolute as u8,
                0,
            ]
        );
    }

    #[test]
    fn constants_keep_hashes_inside_strings() {
        let code = assemble(r#"LOAD_CONST "a # b""#).unwrap();
        assert_eq!(code.constants(), [Const::Str("a # b".to_owned())]);
    }

    #[test]
    fn errors_carry_line_numbers() {
        assert_eq!(
            assemble("NOP\nFROB 1"),
            Err(AsmError::UnknownOpcode {
                line: 2,
                mnemonic: "FROB".to_owned()
            })
        );
        assert_eq!(
            assemble("JUMP_ABSOLUTE nowhere"),
            Err(AsmError::UnknownLabel {
                line: 1,
                label: "nowhere".to_owned()
            })
        );
        assert_eq!(assemble(".end"), Err(AsmError::UnbalancedBlock { line: 1 }));
        assert_eq!(
            assemble(".code f function\nNOP"),
            Err(AsmError::UnbalancedBlock { line: 1 })
        );
        assert_eq!(
            assemble("LOAD_CONST @missing"),
            Err(AsmError::UnknownCode {
                line: 1,
                name: "missing".to_owned()
            })
        );
    }

    #[test]
    fn raw_pairs_are_emitted_verbatim() {
        let code = assemble(".raw 238 7").unwrap();
        assert_eq!(code.bytecode(), &[238, 7]);
    }
}
