//! The host VM.
//!
//! A small stack machine over [`Code`] objects. Every frame it runs is pushed
//! onto a [`CallStack`] with its resume offset kept current, so that a
//! construction happening inside a native constructor frame can find its call
//! site and the code that will store the result.

use std::{fmt, rc::Rc};

use crate::{
    bytecode::{Code, CodeKind, INSTRUCTION_WIDTH, Opcode, TargetKind},
    config::ResolveConfig,
    error::NameError,
    frame::{CallStack, ExecutionFrame},
    locator::CallSite,
    object::{BoundObject, ClassDef, ENGINE_BASE},
    resolver::ResolveContext,
    tracer::{NoopTracer, Tracer},
    value::{Namespace, SeqIter, TypeObject, Value, new_namespace},
};

/// Errors raised while executing a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// A name, global or attribute lookup found nothing.
    UndefinedName { name: String },
    /// A local slot or cell was read before being bound.
    UnboundLocal { name: String },
    /// An attribute the receiver does not have.
    Attribute { type_name: &'static str, attr: String },
    /// An operation applied to a value of the wrong type.
    Type { message: String },
    /// A value of the right type but the wrong shape.
    Value { message: String },
    /// The call depth limit was hit.
    Recursion { limit: usize },
    /// The instruction stream itself is broken.
    MalformedCode { code: String, offset: usize, reason: String },
    /// Reading a self-naming value's name failed.
    Name(NameError),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedName { name } => write!(f, "name {name:?} is not defined"),
            Self::UnboundLocal { name } => write!(f, "local variable {name:?} referenced before assignment"),
            Self::Attribute { type_name, attr } => write!(f, "{type_name:?} object has no attribute {attr:?}"),
            Self::Type { message } => write!(f, "type error: {message}"),
            Self::Value { message } => write!(f, "value error: {message}"),
            Self::Recursion { limit } => write!(f, "maximum call depth of {limit} exceeded"),
            Self::MalformedCode { code, offset, reason } => {
                write!(f, "malformed code in {code} at offset {offset}: {reason}")
            }
            Self::Name(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for RunError {}

impl From<NameError> for RunError {
    fn from(error: NameError) -> Self {
        Self::Name(error)
    }
}

/// Executes programs and hosts self-naming types.
///
/// ```
/// use autoname::{Vm, assemble};
///
/// let code = assemble(
///     "LOAD_GLOBAL AutoName
///      CALL_FUNCTION 0
///      STORE_NAME greeting",
/// )
/// .unwrap();
/// let mut vm = Vm::default();
/// vm.run_module(code).unwrap();
/// assert_eq!(vm.name_of("greeting").unwrap().unwrap(), "greeting");
/// ```
#[derive(Debug)]
pub struct Vm<Tr: Tracer = NoopTracer> {
    stack: CallStack,
    globals: Namespace,
    config: ResolveConfig,
    tracer: Tr,
}

impl Default for Vm<NoopTracer> {
    fn default() -> Self {
        Self::new(NoopTracer)
    }
}

impl<Tr: Tracer> Vm<Tr> {
    /// Creates a VM with the engine base type bound as a global.
    pub fn new(tracer: Tr) -> Self {
        Self::with_config(ResolveConfig::default(), tracer)
    }

    pub fn with_config(config: ResolveConfig, tracer: Tr) -> Self {
        let globals = new_namespace();
        globals
            .borrow_mut()
            .insert(ENGINE_BASE.to_owned(), Value::Class(ClassDef::engine()));
        Self {
            stack: CallStack::new(),
            globals,
            config,
            tracer,
        }
    }

    /// The engine base type bound at startup.
    #[must_use]
    pub fn engine_class(&self) -> Option<Rc<ClassDef>> {
        match self.global(ENGINE_BASE) {
            Some(Value::Class(class)) => Some(class),
            _ => None,
        }
    }

    /// Binds a self-naming type as a global under its own name.
    pub fn define(&mut self, class: Rc<ClassDef>) -> Rc<ClassDef> {
        self.globals
            .borrow_mut()
            .insert(class.name().to_owned(), Value::Class(Rc::clone(&class)));
        class
    }

    #[must_use]
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.borrow().get(name).cloned()
    }

    #[must_use]
    pub fn globals(&self) -> &Namespace {
        &self.globals
    }

    #[must_use]
    pub fn config(&self) -> &ResolveConfig {
        &self.config
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut Tr {
        &mut self.tracer
    }

    #[must_use]
    pub fn into_tracer(self) -> Tr {
        self.tracer
    }

    /// Runs `code` as the top-level module and returns its result.
    pub fn run_module(&mut self, code: impl Into<Rc<Code>>) -> Result<Value, RunError> {
        let frame = ExecutionFrame::new(code.into(), None, Rc::clone(&self.globals));
        self.execute(frame)
    }

    /// Resolves the name of a self-naming value, tracing the resolution.
    pub fn resolve_name(&mut self, object: &BoundObject) -> Result<String, NameError> {
        let ctx = ResolveContext::new(&self.config)
            .with_stack(&self.stack)
            .with_namespace(&self.globals);
        object.resolved_name_traced(&ctx, &mut self.tracer).map(str::to_owned)
    }

    /// Convenience: the resolved name of the self-naming value bound to the
    /// global `name`, or `None` if that global is not one.
    pub fn name_of(&mut self, name: &str) -> Option<Result<String, NameError>> {
        let Some(Value::Object(object)) = self.global(name) else {
            return None;
        };
        Some(self.resolve_name(&object))
    }

    fn siblings(&mut self, object: &BoundObject) -> Vec<Value> {
        let ctx = ResolveContext::new(&self.config)
            .with_stack(&self.stack)
            .with_namespace(&self.globals);
        object
            .siblings_in(&ctx, &mut self.tracer)
            .iter()
            .map(|sibling| Value::Object(Rc::clone(sibling)))
            .collect()
    }

    fn execute(&mut self, frame: Rc<ExecutionFrame>) -> Result<Value, RunError> {
        if self.stack.depth() >= self.config.max_call_depth {
            return Err(RunError::Recursion {
                limit: self.config.max_call_depth,
            });
        }
        self.stack.push(Rc::clone(&frame));
        self.tracer.on_call(frame.code().name(), self.stack.depth());
        let result = if frame.code().is_inspectable() {
            self.dispatch(&frame)
        } else {
            Ok(Value::None)
        };
        self.stack.pop();
        self.tracer.on_return(self.stack.depth());
        result
    }

    fn dispatch(&mut self, frame: &ExecutionFrame) -> Result<Value, RunError> {
        let code = Rc::clone(frame.code());
        let bytecode = code.bytecode();
        let mut operands = Operands::new(&code);
        let mut ext: u32 = 0;
        let mut ip = 0;

        loop {
            let Some(&[byte, raw]) = bytecode.get(ip..ip + INSTRUCTION_WIDTH) else {
                if ip < bytecode.len() {
                    return Err(malformed(&code, ip, "truncated instruction"));
                }
                return Ok(Value::None);
            };
            let offset = ip;
            let opcode = Opcode::from_byte(byte).ok_or_else(|| malformed(&code, offset, "unknown opcode"))?;
            if ext > 0x00ff_ffff {
                return Err(malformed(&code, offset, "operand extension overflow"));
            }
            let arg = (ext << 8) | u32::from(raw);
            ip += INSTRUCTION_WIDTH;
            frame.set_ip(ip);
            operands.offset = offset;
            self.tracer.on_instruction(offset, opcode, arg);
            if opcode == Opcode::ExtendedArg {
                ext = arg;
                continue;
            }
            ext = 0;

            match opcode {
                Opcode::Nop | Opcode::Cache | Opcode::ExtendedArg => {}
                Opcode::PopTop => {
                    operands.pop()?;
                }
                Opcode::RotTwo => {
                    let top = operands.pop()?;
                    let below = operands.pop()?;
                    operands.push(top);
                    operands.push(below);
                }
                Opcode::DupTop => {
                    let top = operands.peek()?.clone();
                    operands.push(top);
                }
                Opcode::LoadConst => {
                    let constant = usize::try_from(arg)
                        .ok()
                        .and_then(|i| code.constants().get(i))
                        .ok_or_else(|| malformed(&code, offset, "constant index out of range"))?;
                    operands.push(Value::from(constant));
                }
                Opcode::LoadName => {
                    let name = symbol(&code, TargetKind::Name, arg, offset)?;
                    let value = frame.names().borrow().get(name).cloned();
                    let value = value.or_else(|| frame.globals().borrow().get(name).cloned());
                    operands.push(value.ok_or_else(|| undefined(name))?);
                }
                Opcode::LoadGlobal => {
                    let name = symbol(&code, TargetKind::Global, arg, offset)?;
                    let value = frame.globals().borrow().get(name).cloned();
                    operands.push(value.ok_or_else(|| undefined(name))?);
                }
                Opcode::LoadFast => {
                    let name = symbol(&code, TargetKind::Local, arg, offset)?;
                    let value = frame.local(slot(arg)).ok_or_else(|| unbound(name))?;
                    operands.push(value);
                }
                Opcode::LoadDeref => {
                    let name = symbol(&code, TargetKind::Cell, arg, offset)?;
                    let value = frame.cell(slot(arg)).ok_or_else(|| unbound(name))?;
                    operands.push(value);
                }
                Opcode::LoadAttr => {
                    let attr = symbol(&code, TargetKind::Attribute, arg, offset)?;
                    let receiver = operands.pop()?;
                    let value = self.load_attr(&receiver, attr)?;
                    operands.push(value);
                }
                Opcode::StoreName => {
                    let name = symbol(&code, TargetKind::Name, arg, offset)?;
                    let value = operands.pop()?;
                    frame.names().borrow_mut().insert(name.to_owned(), value);
                }
                Opcode::StoreGlobal => {
                    let name = symbol(&code, TargetKind::Global, arg, offset)?;
                    let value = operands.pop()?;
                    frame.globals().borrow_mut().insert(name.to_owned(), value);
                }
                Opcode::StoreFast => {
                    symbol(&code, TargetKind::Local, arg, offset)?;
                    let value = operands.pop()?;
                    frame.set_local(slot(arg), value);
                }
                Opcode::StoreDeref => {
                    symbol(&code, TargetKind::Cell, arg, offset)?;
                    let value = operands.pop()?;
                    frame.set_cell(slot(arg), value);
                }
                Opcode::StoreAttr => {
                    let attr = symbol(&code, TargetKind::Attribute, arg, offset)?;
                    let receiver = operands.pop()?;
                    let value = operands.pop()?;
                    let Value::Type(ty) = receiver else {
                        return Err(RunError::Attribute {
                            type_name: receiver.type_name(),
                            attr: attr.to_owned(),
                        });
                    };
                    ty.namespace().borrow_mut().insert(attr.to_owned(), value);
                }
                Opcode::UnpackSequence => {
                    let value = operands.pop()?;
                    let items = self.elements(&value)?;
                    if items.len() != slot(arg) {
                        return Err(RunError::Value {
                            message: format!("expected {arg} values to unpack, got {}", items.len()),
                        });
                    }
                    for item in items.into_iter().rev() {
                        operands.push(item);
                    }
                }
                Opcode::BuildTuple => {
                    let items = operands.pop_n(slot(arg))?;
                    operands.push(Value::from(items));
                }
                Opcode::BuildList => {
                    let items = operands.pop_n(slot(arg))?;
                    operands.push(Value::List(Rc::new(std::cell::RefCell::new(items))));
                }
                Opcode::GetIter => {
                    let value = operands.pop()?;
                    let iter = match value {
                        Value::Iter(iter) => iter,
                        other => Rc::new(SeqIter::new(self.elements(&other)?)),
                    };
                    operands.push(Value::Iter(iter));
                }
                Opcode::ForIter => {
                    let Value::Iter(iter) = operands.peek()? else {
                        return Err(RunError::Type {
                            message: "FOR_ITER requires an iterator".to_owned(),
                        });
                    };
                    let iter = Rc::clone(iter);
                    if let Some(item) = iter.advance() {
                        operands.push(item);
                    } else {
                        operands.pop()?;
                        ip = jump_target(&code, arg, offset)?;
                    }
                }
                Opcode::JumpAbsolute => ip = jump_target(&code, arg, offset)?,
                Opcode::SetupWith => {
                    let manager = operands.pop()?;
                    let entered = self.enter(&manager)?;
                    operands.push(manager);
                    operands.push(entered);
                }
                Opcode::ExitWith => {
                    let manager = operands.pop()?;
                    if let Value::Object(object) = manager {
                        object.exit();
                    }
                }
                Opcode::CallFunction => {
                    let args = operands.pop_n(slot(arg))?;
                    let callee = operands.pop()?;
                    let result = self.call(frame, callee, args)?;
                    operands.push(result);
                }
                Opcode::MakeFunction => {
                    let Value::Code(body) = operands.pop()? else {
                        return Err(RunError::Type {
                            message: "MAKE_FUNCTION requires a code object".to_owned(),
                        });
                    };
                    operands.push(Value::Function(body));
                }
                Opcode::BuildClass => {
                    let name = symbol(&code, TargetKind::Name, arg, offset)?;
                    let Value::Code(body) = operands.pop()? else {
                        return Err(RunError::Type {
                            message: "BUILD_CLASS requires a code object".to_owned(),
                        });
                    };
                    let ty = self.build_class(frame, name, body)?;
                    operands.push(Value::Type(ty));
                }
                Opcode::ReturnValue => return operands.pop(),
            }
        }
    }

    fn call(&mut self, caller: &ExecutionFrame, callee: Value, args: Vec<Value>) -> Result<Value, RunError> {
        match callee {
            Value::Class(class) => self.instantiate(&class, &args),
            Value::Function(body) => {
                if args.len() > body.varnames().len() {
                    return Err(RunError::Type {
                        message: format!("{} takes at most {} arguments", body.name(), body.varnames().len()),
                    });
                }
                let parent = self.stack.innermost().cloned();
                let frame = ExecutionFrame::new(body, parent.as_ref(), Rc::clone(caller.globals()));
                for (index, value) in args.into_iter().enumerate() {
                    frame.set_local(index, value);
                }
                self.execute(frame)
            }
            other => Err(RunError::Type {
                message: format!("{:?} object is not callable", other.type_name()),
            }),
        }
    }

    /// Runs the constructor chain for `class`: one native frame per overriding
    /// layer, each delegating upward, then the engine's own frame, inside which
    /// the object is built.
    fn instantiate(&mut self, class: &Rc<ClassDef>, args: &[Value]) -> Result<Value, RunError> {
        let count = match args {
            [] => 0,
            [Value::Int(count)] => *count,
            [other] => {
                return Err(RunError::Type {
                    message: format!("count must be an int, not {:?}", other.type_name()),
                });
            }
            _ => {
                return Err(RunError::Type {
                    message: format!("{} takes at most one argument", class.name()),
                });
            }
        };

        if count < 0 {
            return Err(NameError::Usage { count }.into());
        }
        let mut pushed = 0;
        let result = self.construct_in_frames(class, count, &mut pushed);
        for _ in 0..pushed {
            self.stack.pop();
            self.tracer.on_return(self.stack.depth());
        }
        result
    }

    fn construct_in_frames(&mut self, class: &Rc<ClassDef>, count: i64, pushed: &mut usize) -> Result<Value, RunError> {
        let mut site = CallSite::new();
        for layer in class.delegating_layers() {
            self.enter_native(&format!("{}.__init__", layer.name()))?;
            *pushed += 1;
            site = site.delegate();
        }
        self.enter_native(&format!("{ENGINE_BASE}.__init__"))?;
        *pushed += 1;
        let object = BoundObject::construct(class, count, site, &self.stack)?;
        Ok(Value::Object(object))
    }

    fn enter_native(&mut self, name: &str) -> Result<(), RunError> {
        if self.stack.depth() >= self.config.max_call_depth {
            return Err(RunError::Recursion {
                limit: self.config.max_call_depth,
            });
        }
        let parent = self.stack.innermost().cloned();
        let frame = ExecutionFrame::new(Rc::new(Code::native(name)), parent.as_ref(), Rc::clone(&self.globals));
        self.stack.push(frame);
        self.tracer.on_call(name, self.stack.depth());
        Ok(())
    }

    /// Runs a class body and hands each self-naming member to the
    /// declaring-namespace hook.
    fn build_class(&mut self, caller: &ExecutionFrame, name: &str, body: Rc<Code>) -> Result<Rc<TypeObject>, RunError> {
        if body.kind() != CodeKind::Class {
            return Err(RunError::Type {
                message: format!("{} is not a class body", body.name()),
            });
        }
        let parent = self.stack.innermost().cloned();
        let frame = ExecutionFrame::new(body, parent.as_ref(), Rc::clone(caller.globals()));
        let namespace = Rc::clone(frame.names());
        self.execute(frame)?;
        let members: Vec<(String, Rc<BoundObject>)> = namespace
            .borrow()
            .iter()
            .filter_map(|(member, value)| value.as_object().map(|o| (member.clone(), Rc::clone(o))))
            .collect();
        for (member, object) in members {
            object.set_name(name, &member);
        }
        Ok(Rc::new(TypeObject::new(name, namespace)))
    }

    fn load_attr(&mut self, receiver: &Value, attr: &str) -> Result<Value, RunError> {
        match (receiver, attr) {
            (Value::Object(object), "name" | "__name__") => Ok(Value::Str(Rc::from(self.resolve_name(object)?))),
            (Value::Object(object), "owner") => Ok(object.owner().map_or(Value::None, |o| Value::Str(Rc::from(o)))),
            (Value::Type(ty), _) => ty
                .namespace()
                .borrow()
                .get(attr)
                .cloned()
                .ok_or_else(|| RunError::Attribute {
                    type_name: "type",
                    attr: attr.to_owned(),
                }),
            _ => Err(RunError::Attribute {
                type_name: receiver.type_name(),
                attr: attr.to_owned(),
            }),
        }
    }

    /// Items produced by unpacking or iterating `value`.
    fn elements(&mut self, value: &Value) -> Result<Vec<Value>, RunError> {
        if let Value::Object(object) = value {
            return Ok(self.siblings(object));
        }
        value.sequence().ok_or_else(|| RunError::Type {
            message: format!("cannot unpack non-iterable {:?} object", value.type_name()),
        })
    }

    fn enter(&mut self, manager: &Value) -> Result<Value, RunError> {
        match manager {
            Value::Object(object) if object.expected() == 0 => Ok(manager.clone()),
            Value::Object(object) => Ok(Value::from(self.siblings(object))),
            other => Err(RunError::Type {
                message: format!("{:?} object does not support scoped acquisition", other.type_name()),
            }),
        }
    }
}

/// Operand stack of one frame.
struct Operands<'c> {
    code: &'c Code,
    /// Offset of the instruction being executed, for error reports.
    offset: usize,
    values: Vec<Value>,
}

impl<'c> Operands<'c> {
    fn new(code: &'c Code) -> Self {
        Self {
            code,
            offset: 0,
            values: Vec::new(),
        }
    }

    fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    fn pop(&mut self) -> Result<Value, RunError> {
        self.values
            .pop()
            .ok_or_else(|| malformed(self.code, self.offset, "operand stack underflow"))
    }

    fn peek(&self) -> Result<&Value, RunError> {
        self.values
            .last()
            .ok_or_else(|| malformed(self.code, self.offset, "operand stack underflow"))
    }

    /// Pops `n` values, returned in push order.
    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, RunError> {
        let start = self
            .values
            .len()
            .checked_sub(n)
            .ok_or_else(|| malformed(self.code, self.offset, "operand stack underflow"))?;
        Ok(self.values.split_off(start))
    }
}

fn slot(arg: u32) -> usize {
    usize::try_from(arg).unwrap_or(usize::MAX)
}

fn symbol(code: &Code, kind: TargetKind, arg: u32, offset: usize) -> Result<&str, RunError> {
    code.symbol(kind, arg)
        .ok_or_else(|| malformed(code, offset, &format!("{kind} operand {arg} out of range")))
}

fn jump_target(code: &Code, arg: u32, offset: usize) -> Result<usize, RunError> {
    let target = slot(arg);
    if target % INSTRUCTION_WIDTH != 0 || target > code.bytecode().len() {
        return Err(malformed(code, offset, &format!("bad jump target {target}")));
    }
    Ok(target)
}

fn malformed(code: &Code, offset: usize, reason: &str) -> RunError {
    RunError::MalformedCode {
        code: code.name().to_owned(),
        offset,
        reason: reason.to_owned(),
    }
}

fn undefined(name: &str) -> RunError {
    RunError::UndefinedName { name: name.to_owned() }
}

fn unbound(name: &str) -> RunError {
    RunError::UnboundLocal { name: name.to_owned() }
}
