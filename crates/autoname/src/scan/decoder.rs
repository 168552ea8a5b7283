//! Store-target decoder.
//!
//! Starting right after the instruction that produced a value, the decoder
//! walks the instruction stream while simulating what happens to that value on
//! the operand stack. Duplications, destructurings and stores are tracked slot
//! by slot, so the walk stops exactly when every reference to the value has
//! been bound, and stores that belong to the next statement are never picked
//! up.

use std::{fmt, ops::Range};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    bytecode::{Code, INSTRUCTION_WIDTH, Opcode, TargetKind},
    tracer::Tracer,
};

/// One decoded binding of the value (or of one of its destructured elements).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEvent {
    /// Identifier the store writes to.
    pub name: String,
    /// Which symbol table the operand indexed.
    pub kind: TargetKind,
    /// Index of this event in [`StoreScan::events`].
    pub position: usize,
    /// Byte offset of the store instruction.
    pub offset: usize,
}

/// Events produced by one destructuring of the constructed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpackGroup {
    /// First event belonging to the group.
    pub start: usize,
    /// One past the last event belonging to the group.
    pub end: usize,
    /// For each pattern position, the event that bound it directly. Positions
    /// that were destructured further have no direct name.
    pub targets: Vec<Option<usize>>,
}

impl UnpackGroup {
    /// Number of pattern positions.
    #[must_use]
    pub fn size(&self) -> usize {
        self.targets.len()
    }

    /// Event indices covered by the group.
    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Why the qualifying run of instructions stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunEnd {
    /// Every reference to the value was bound.
    ValueConsumed,
    /// An instruction outside the qualifying set was reached.
    Disqualified { opcode: Opcode },
    /// The instruction stream ended.
    EndOfStream,
}

impl fmt::Display for RunEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValueConsumed => f.write_str("value consumed"),
            Self::Disqualified { opcode } => write!(f, "disqualified by {opcode}"),
            Self::EndOfStream => f.write_str("end of stream"),
        }
    }
}

/// Malformed or unsupported instruction shapes.
///
/// These never reach callers of the naming facade: resolution degrades to the
/// sentinel and the error is only reported to the tracer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanError {
    /// A byte that is not a known opcode while the value was still live.
    UnknownOpcode { offset: usize, byte: u8 },
    /// The stream ends in the middle of an instruction slot.
    Truncated { offset: usize },
    /// A store operand indexes past the end of its symbol table.
    MissingSymbol { offset: usize, kind: TargetKind, index: u32 },
    /// Operand extension accumulated more than 32 bits.
    OperandOverflow { offset: usize },
    /// A destructuring group did not receive all of its positions.
    UnclosedGroup { group: usize, missing: usize },
    /// The scan budget ran out before the run ended.
    BudgetExceeded { limit: usize },
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOpcode { offset, byte } => write!(f, "unknown opcode {byte} at offset {offset}"),
            Self::Truncated { offset } => write!(f, "instruction stream truncated at offset {offset}"),
            Self::MissingSymbol { offset, kind, index } => {
                write!(f, "{kind} operand {index} at offset {offset} is out of range")
            }
            Self::OperandOverflow { offset } => write!(f, "operand extension overflow at offset {offset}"),
            Self::UnclosedGroup { group, missing } => {
                write!(f, "unpack group {group} is missing {missing} target(s)")
            }
            Self::BudgetExceeded { limit } => write!(f, "scan budget of {limit} instructions exceeded"),
        }
    }
}

impl std::error::Error for ScanError {}

/// Decoded bindings for one construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreScan {
    /// Every store in physical order.
    pub events: Vec<StoreEvent>,
    /// Destructurings of the value itself, in the order they were opened.
    pub groups: Vec<UnpackGroup>,
}

impl StoreScan {
    /// Events not covered by any group: simple or chained assignments of the
    /// value itself.
    pub fn residual(&self) -> impl Iterator<Item = &StoreEvent> + '_ {
        self.events
            .iter()
            .filter(|event| !self.groups.iter().any(|g| g.range().contains(&event.position)))
    }
}

/// What the value on a simulated stack slot is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// The constructed value itself.
    Whole,
    /// Direct element of a destructuring of the value.
    Element { group: usize, position: usize },
    /// Element of a nested pattern inside a group.
    Nested { group: usize },
    /// Object an attribute store will write into.
    Receiver,
    /// The value wrapped in a one-element container that is about to be
    /// iterated (`for x in [value]`).
    Wrapped,
}

enum Step {
    Continue,
    Extend,
    Stop,
}

/// Scans `code` from byte offset `start` for the stores of the value produced
/// by the instruction just before `start`.
pub fn scan_stores(
    code: &Code,
    start: usize,
    max_instructions: usize,
    tracer: &mut impl Tracer,
) -> Result<StoreScan, ScanError> {
    Decoder {
        code,
        offset: start,
        max_instructions,
        stack: smallvec::smallvec![Slot::Whole],
        outstanding: Vec::new(),
        scan: StoreScan::default(),
    }
    .run(tracer)
}

struct Decoder<'c> {
    code: &'c Code,
    offset: usize,
    max_instructions: usize,
    /// Simulated operand stack, restricted to slots derived from the value.
    stack: SmallVec<[Slot; 8]>,
    /// Per group, slots still waiting to be bound.
    outstanding: Vec<usize>,
    scan: StoreScan,
}

impl Decoder<'_> {
    fn run(mut self, tracer: &mut impl Tracer) -> Result<StoreScan, ScanError> {
        let code = self.code;
        let bytecode = code.bytecode();
        let mut ext: u32 = 0;
        let mut examined = 0;
        let end = loop {
            if self.stack.is_empty() {
                break RunEnd::ValueConsumed;
            }
            let at = self.offset;
            let Some(&[byte, raw]) = bytecode.get(at..at + INSTRUCTION_WIDTH) else {
                if at < bytecode.len() {
                    return Err(ScanError::Truncated { offset: at });
                }
                break RunEnd::EndOfStream;
            };
            examined += 1;
            if examined > self.max_instructions {
                return Err(ScanError::BudgetExceeded {
                    limit: self.max_instructions,
                });
            }
            let opcode = Opcode::from_byte(byte).ok_or(ScanError::UnknownOpcode { offset: at, byte })?;
            if ext > 0x00ff_ffff {
                return Err(ScanError::OperandOverflow { offset: at });
            }
            let arg = (ext << 8) | u32::from(raw);
            ext = 0;
            self.offset += INSTRUCTION_WIDTH;
            tracer.on_decode(at, opcode, arg);

            match self.step(at, opcode, arg, tracer)? {
                Step::Continue => {}
                Step::Extend => ext = arg,
                Step::Stop => {
                    self.offset = at;
                    break RunEnd::Disqualified { opcode };
                }
            }
        };

        if let Some((group, &missing)) = self.outstanding.iter().enumerate().find(|(_, n)| **n > 0) {
            return Err(ScanError::UnclosedGroup { group, missing });
        }
        tracer.on_run_end(self.offset, end);
        Ok(self.scan)
    }

    fn step(&mut self, offset: usize, opcode: Opcode, arg: u32, tracer: &mut impl Tracer) -> Result<Step, ScanError> {
        let Some(&top) = self.stack.last() else {
            return Ok(Step::Stop);
        };
        if opcode == Opcode::ExtendedArg {
            return Ok(Step::Extend);
        }
        let pristine = self.is_pristine();
        if top == Slot::Wrapped {
            match opcode {
                Opcode::Nop | Opcode::Cache | Opcode::GetIter => {}
                Opcode::ForIter => {
                    self.stack.pop();
                    self.stack.push(Slot::Whole);
                }
                // The container itself is what gets stored.
                _ => return Ok(Step::Stop),
            }
            return Ok(Step::Continue);
        }
        if let Some(kind) = opcode.store_kind() {
            return self.store(offset, kind, arg, top, tracer);
        }
        let receiver = top == Slot::Receiver;
        match opcode {
            Opcode::DupTop if !receiver => {
                self.track(top, 1);
                self.stack.push(top);
            }
            Opcode::UnpackSequence if !receiver => {
                let size = usize::try_from(arg).unwrap_or(usize::MAX);
                if size > self.max_instructions {
                    return Err(ScanError::BudgetExceeded {
                        limit: self.max_instructions,
                    });
                }
                self.stack.pop();
                self.unpack(top, size, tracer);
                // Nested patterns grow the stack without costing instructions.
                if self.stack.len() > self.max_instructions {
                    return Err(ScanError::BudgetExceeded {
                        limit: self.max_instructions,
                    });
                }
            }
            // Receiver of an attribute store: `obj.attr = value`, `obj.a.b = value`.
            Opcode::LoadName | Opcode::LoadGlobal | Opcode::LoadFast | Opcode::LoadDeref if !receiver => {
                self.stack.push(Slot::Receiver);
            }
            Opcode::LoadAttr if receiver => {}
            Opcode::Nop | Opcode::Cache | Opcode::SetupWith if pristine => {}
            Opcode::BuildList | Opcode::BuildTuple if pristine && arg == 1 => {
                self.stack.pop();
                self.stack.push(Slot::Wrapped);
            }
            _ => return Ok(Step::Stop),
        }
        Ok(Step::Continue)
    }

    fn store(
        &mut self,
        offset: usize,
        kind: TargetKind,
        arg: u32,
        top: Slot,
        tracer: &mut impl Tracer,
    ) -> Result<Step, ScanError> {
        let is_attr = kind == TargetKind::Attribute;
        if top == Slot::Wrapped {
            return Ok(Step::Stop);
        }
        // Attribute stores consume a receiver on top of the value; any other
        // store with a receiver on top means the loads belonged to something else.
        if is_attr != (top == Slot::Receiver) {
            return Ok(Step::Stop);
        }
        let name = self
            .code
            .symbol(kind, arg)
            .ok_or(ScanError::MissingSymbol { offset, kind, index: arg })?
            .to_owned();
        if is_attr {
            self.stack.pop();
        }
        let Some(slot) = self.stack.pop() else {
            return Ok(Step::Stop);
        };

        let position = self.scan.events.len();
        let event = StoreEvent {
            name,
            kind,
            position,
            offset,
        };
        tracer.on_store(&event);
        self.scan.events.push(event);

        match slot {
            Slot::Whole | Slot::Receiver | Slot::Wrapped => {}
            Slot::Element { group, position: index } => {
                self.scan.groups[group].targets[index] = Some(position);
                self.consume(group, 1, tracer);
            }
            Slot::Nested { group } => self.consume(group, 1, tracer),
        }
        Ok(Step::Continue)
    }

    fn unpack(&mut self, slot: Slot, size: usize, tracer: &mut impl Tracer) {
        match slot {
            Slot::Whole => {
                let group = self.scan.groups.len();
                let start = self.scan.events.len();
                self.scan.groups.push(UnpackGroup {
                    start,
                    end: start,
                    targets: vec![None; size],
                });
                self.outstanding.push(size);
                tracer.on_group_open(group, size);
                // The first pattern position ends up on top.
                self.stack
                    .extend((0..size).rev().map(|position| Slot::Element { group, position }));
                if size == 0 {
                    tracer.on_group_close(group, start, start);
                }
            }
            Slot::Element { group, .. } | Slot::Nested { group } => {
                self.outstanding[group] += size;
                self.stack.extend((0..size).map(|_| Slot::Nested { group }));
                self.consume(group, 1, tracer);
            }
            Slot::Receiver | Slot::Wrapped => {}
        }
    }

    fn track(&mut self, slot: Slot, extra: usize) {
        if let Slot::Element { group, .. } | Slot::Nested { group } = slot {
            self.outstanding[group] += extra;
        }
    }

    fn consume(&mut self, group: usize, count: usize, tracer: &mut impl Tracer) {
        let remaining = &mut self.outstanding[group];
        *remaining -= count;
        if *remaining == 0 {
            let end = self.scan.events.len();
            let unpacked = &mut self.scan.groups[group];
            unpacked.end = end;
            tracer.on_group_close(group, unpacked.start, end);
        }
    }

    /// Nothing has happened to the value yet.
    fn is_pristine(&self) -> bool {
        self.scan.events.is_empty() && self.stack.as_slice() == [Slot::Whole]
    }
}
