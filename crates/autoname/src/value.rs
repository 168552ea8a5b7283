//! Runtime values of the host VM.

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

use indexmap::IndexMap;

use crate::{
    bytecode::{Code, Const},
    object::{BoundObject, ClassDef},
};

/// A mutable, insertion-ordered variable table shared by reference.
pub type Namespace = Rc<RefCell<IndexMap<String, Value>>>;

/// Creates an empty namespace.
#[must_use]
pub fn new_namespace() -> Namespace {
    Rc::new(RefCell::new(IndexMap::new()))
}

/// A value on the VM operand stack or in a variable table.
///
/// Cloning is cheap: everything beyond scalars is reference counted, and
/// clones of `Object` share identity with the original.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Int(i64),
    Str(Rc<str>),
    Tuple(Rc<[Value]>),
    List(Rc<RefCell<Vec<Value>>>),
    Iter(Rc<SeqIter>),
    /// A self-naming value.
    Object(Rc<BoundObject>),
    /// A constructible self-naming type.
    Class(Rc<ClassDef>),
    /// A type produced by running a class body.
    Type(Rc<TypeObject>),
    Code(Rc<Code>),
    Function(Rc<Code>),
}

impl Value {
    /// Short type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Int(_) => "int",
            Self::Str(_) => "str",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Iter(_) => "iterator",
            Self::Object(_) => "object",
            Self::Class(_) | Self::Type(_) => "type",
            Self::Code(_) => "code",
            Self::Function(_) => "function",
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Rc<BoundObject>> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Whether this value is the given self-naming object itself.
    #[must_use]
    pub fn is_object(&self, target: &BoundObject) -> bool {
        self.as_object().is_some_and(|object| std::ptr::eq(Rc::as_ptr(object), target))
    }

    /// Elements of an iterable value, for unpacking and iteration.
    pub(crate) fn sequence(&self) -> Option<Vec<Self>> {
        match self {
            Self::Tuple(items) => Some(items.to_vec()),
            Self::List(items) => Some(items.borrow().clone()),
            _ => None,
        }
    }
}

impl From<&Const> for Value {
    fn from(constant: &Const) -> Self {
        match constant {
            Const::None => Self::None,
            Const::Int(i) => Self::Int(*i),
            Const::Str(s) => Self::Str(Rc::from(s.as_str())),
            Const::Code(code) => Self::Code(Rc::clone(code)),
        }
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Tuple(items.into())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Tuple(items) => {
                f.write_str("(")?;
                write_items(f, items)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Self::List(items) => {
                f.write_str("[")?;
                write_items(f, &items.borrow())?;
                f.write_str("]")
            }
            Self::Iter(_) => f.write_str("<iterator>"),
            Self::Object(object) => write!(f, "<{} object>", object.class().name()),
            Self::Class(class) => write!(f, "<class {}>", class.name()),
            Self::Type(ty) => write!(f, "<class {}>", ty.name()),
            Self::Code(code) => write!(f, "<code {}>", code.name()),
            Self::Function(code) => write!(f, "<function {}>", code.name()),
        }
    }
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// Iterator over a snapshot of a sequence.
#[derive(Debug)]
pub struct SeqIter {
    items: Vec<Value>,
    next: Cell<usize>,
}

impl SeqIter {
    #[must_use]
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items,
            next: Cell::new(0),
        }
    }

    /// Returns the next item, or `None` once exhausted.
    pub fn advance(&self) -> Option<Value> {
        let index = self.next.get();
        let item = self.items.get(index)?.clone();
        self.next.set(index + 1);
        Some(item)
    }
}

/// Result of executing a class body.
#[derive(Debug)]
pub struct TypeObject {
    name: String,
    namespace: Namespace,
    /// Set when the body bound at least one self-naming value. Namespace
    /// scanning only descends into such types.
    holds_bound_objects: bool,
}

impl TypeObject {
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: Namespace) -> Self {
        let holds_bound_objects = namespace.borrow().values().any(|v| v.as_object().is_some());
        Self {
            name: name.into(),
            namespace,
            holds_bound_objects,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    #[must_use]
    pub fn holds_bound_objects(&self) -> bool {
        self.holds_bound_objects
    }
}
