//! Execution frames and the call stack the naming engine inspects.

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use crate::{
    bytecode::{Code, CodeKind},
    value::{Namespace, Value, new_namespace},
};

/// One activation of a [`Code`] object.
///
/// The frame does not own its caller: the parent link is weak, and the
/// [`CallStack`] is what keeps frames alive.
#[derive(Debug)]
pub struct ExecutionFrame {
    code: Rc<Code>,
    /// Resume offset: the byte offset right after the instruction currently
    /// executing in this frame.
    ip: Cell<usize>,
    parent: Weak<ExecutionFrame>,
    globals: Namespace,
    /// Name namespace. For module frames this is the globals table itself.
    names: Namespace,
    locals: RefCell<Vec<Option<Value>>>,
    cells: RefCell<Vec<Option<Value>>>,
}

impl ExecutionFrame {
    /// Creates a frame. Module frames share `globals` as their name namespace;
    /// every other kind gets a fresh one.
    #[must_use]
    pub fn new(code: Rc<Code>, parent: Option<&Rc<Self>>, globals: Namespace) -> Rc<Self> {
        let names = if code.kind() == CodeKind::Module {
            Rc::clone(&globals)
        } else {
            new_namespace()
        };
        let locals = RefCell::new(vec![None; code.varnames().len()]);
        let cells = RefCell::new(vec![None; code.cellvars().len()]);
        Rc::new(Self {
            code,
            ip: Cell::new(0),
            parent: parent.map_or_else(Weak::new, Rc::downgrade),
            globals,
            names,
            locals,
            cells,
        })
    }

    #[must_use]
    pub fn code(&self) -> &Rc<Code> {
        &self.code
    }

    #[must_use]
    pub fn ip(&self) -> usize {
        self.ip.get()
    }

    pub fn set_ip(&self, ip: usize) {
        self.ip.set(ip);
    }

    /// The calling frame, if it is still alive.
    #[must_use]
    pub fn parent(&self) -> Option<Rc<Self>> {
        self.parent.upgrade()
    }

    #[must_use]
    pub fn globals(&self) -> &Namespace {
        &self.globals
    }

    #[must_use]
    pub fn names(&self) -> &Namespace {
        &self.names
    }

    #[must_use]
    pub fn local(&self, slot: usize) -> Option<Value> {
        self.locals.borrow().get(slot).cloned().flatten()
    }

    /// Binds a local slot. Returns `false` if the slot does not exist.
    pub fn set_local(&self, slot: usize, value: Value) -> bool {
        match self.locals.borrow_mut().get_mut(slot) {
            Some(entry) => {
                *entry = Some(value);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn cell(&self, slot: usize) -> Option<Value> {
        self.cells.borrow().get(slot).cloned().flatten()
    }

    /// Binds a closure cell. Returns `false` if the cell does not exist.
    pub fn set_cell(&self, slot: usize, value: Value) -> bool {
        match self.cells.borrow_mut().get_mut(slot) {
            Some(entry) => {
                *entry = Some(value);
                true
            }
            None => false,
        }
    }

    /// Every identifier bound in this frame with its current value: local
    /// slots, then cells, then the name namespace. Globals are only included
    /// for module frames, where they are the name namespace.
    #[must_use]
    pub fn bindings(&self) -> Vec<(String, Value)> {
        let locals = self.locals.borrow();
        let cells = self.cells.borrow();
        let slots = self
            .code
            .varnames()
            .iter()
            .zip(locals.iter())
            .chain(self.code.cellvars().iter().zip(cells.iter()))
            .filter_map(|(name, value)| value.clone().map(|v| (name.clone(), v)));
        let names = self.names.borrow();
        slots
            .chain(names.iter().map(|(name, value)| (name.clone(), value.clone())))
            .collect()
    }
}

/// The live frames of one thread of execution, innermost last.
#[derive(Debug, Default)]
pub struct CallStack {
    frames: Vec<Rc<ExecutionFrame>>,
}

impl CallStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Rc<ExecutionFrame>) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<Rc<ExecutionFrame>> {
        self.frames.pop()
    }

    #[must_use]
    pub fn innermost(&self) -> Option<&Rc<ExecutionFrame>> {
        self.frames.last()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Walks from the innermost frame outward through parent links.
    pub fn outward(&self) -> impl Iterator<Item = Rc<ExecutionFrame>> {
        std::iter::successors(self.innermost().cloned(), |frame| frame.parent())
    }
}
