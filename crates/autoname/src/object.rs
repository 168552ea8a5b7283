//! Self-naming values and the types that construct them.

use std::{
    cell::{OnceCell, RefCell},
    rc::Rc,
};

use crate::{
    bytecode::Code,
    config::{ResolveConfig, SENTINEL},
    error::NameError,
    frame::CallStack,
    locator::{CallSite, locate},
    resolver::{InstructionScanner, ResolveContext, ResolverKind, fallback},
    tracer::{NoopTracer, Tracer},
};

/// Name of the engine's base type.
pub const ENGINE_BASE: &str = "AutoName";

/// A constructible self-naming type.
#[derive(Debug)]
pub struct ClassDef {
    name: String,
    base: Option<Rc<ClassDef>>,
    /// Whether this type has its own constructor that delegates to its base.
    overrides_init: bool,
}

impl ClassDef {
    /// The engine's base type.
    #[must_use]
    pub fn engine() -> Rc<Self> {
        Rc::new(Self {
            name: ENGINE_BASE.to_owned(),
            base: None,
            overrides_init: false,
        })
    }

    #[must_use]
    pub fn subclass(name: impl Into<String>, base: &Rc<Self>, overrides_init: bool) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            base: Some(Rc::clone(base)),
            overrides_init,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn base(&self) -> Option<&Rc<Self>> {
        self.base.as_ref()
    }

    #[must_use]
    pub fn overrides_init(&self) -> bool {
        self.overrides_init
    }

    /// This type followed by its ancestors.
    pub fn lineage(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |class| class.base.as_deref())
    }

    /// Constructor layers that run before the engine's, most derived first.
    pub fn delegating_layers(&self) -> impl Iterator<Item = &Self> {
        self.lineage().filter(|class| class.overrides_init)
    }
}

#[derive(Debug)]
struct Resolution {
    name: Result<String, NameError>,
    via: Option<ResolverKind>,
    /// Identifiers of the last destructuring of the value, by pattern position.
    group: Option<Vec<Option<String>>>,
}

/// What scoped acquisition hands to the `as` target.
#[derive(Debug, Clone)]
pub enum Entered {
    /// The object itself, when no destructuring was requested.
    Itself(Rc<BoundObject>),
    /// The sibling group.
    Group(Vec<Rc<BoundObject>>),
}

/// A value that knows the identifier it was bound to at construction.
///
/// Construction only records where it happened; the name is worked out on
/// first read and cached for the lifetime of the object.
///
/// ```
/// use autoname::{BoundObject, ClassDef};
///
/// let object = BoundObject::named(&ClassDef::engine(), "config");
/// assert_eq!(object.resolved_name().unwrap(), "config");
/// ```
#[derive(Debug)]
pub struct BoundObject {
    class: Rc<ClassDef>,
    expected: usize,
    /// Code and resume offset of the construction site. Taken on resolution.
    site: RefCell<Option<(Rc<Code>, usize)>>,
    declared: RefCell<Option<String>>,
    /// Class whose body bound this object, recorded even after resolution.
    owner: RefCell<Option<String>>,
    resolution: OnceCell<Resolution>,
    siblings: OnceCell<Vec<Rc<BoundObject>>>,
}

impl BoundObject {
    /// Constructs an object whose call site is `site` hops out from the
    /// innermost frame of `stack`.
    ///
    /// `count` is how many siblings destructuring should produce. It is
    /// validated before any frame is looked at.
    pub fn construct(class: &Rc<ClassDef>, count: i64, site: CallSite, stack: &CallStack) -> Result<Rc<Self>, NameError> {
        let expected = usize::try_from(count).map_err(|_| NameError::Usage { count })?;
        let captured = locate(stack, site).map(|frame| (Rc::clone(frame.code()), frame.ip()));
        Ok(Rc::new(Self {
            class: Rc::clone(class),
            expected,
            site: RefCell::new(captured),
            declared: RefCell::new(None),
            owner: RefCell::new(None),
            resolution: OnceCell::new(),
            siblings: OnceCell::new(),
        }))
    }

    /// Constructs an object with an explicitly declared name.
    #[must_use]
    pub fn named(class: &Rc<ClassDef>, name: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            class: Rc::clone(class),
            expected: 0,
            site: RefCell::new(None),
            declared: RefCell::new(Some(name.into())),
            owner: RefCell::new(None),
            resolution: OnceCell::new(),
            siblings: OnceCell::new(),
        })
    }

    fn sibling(class: &Rc<ClassDef>, expected: usize, name: Option<String>) -> Rc<Self> {
        let via = name.is_some().then_some(ResolverKind::InstructionScanner);
        Rc::new(Self {
            class: Rc::clone(class),
            expected,
            site: RefCell::new(None),
            declared: RefCell::new(None),
            owner: RefCell::new(None),
            resolution: OnceCell::from(Resolution {
                name: Ok(name.unwrap_or_else(|| SENTINEL.to_owned())),
                via,
                group: None,
            }),
            siblings: OnceCell::new(),
        })
    }

    #[must_use]
    pub fn class(&self) -> &Rc<ClassDef> {
        &self.class
    }

    /// Number of siblings destructuring produces.
    #[must_use]
    pub fn expected(&self) -> usize {
        self.expected
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolution.get().is_some()
    }

    #[must_use]
    pub fn declared_name(&self) -> Option<String> {
        self.declared.borrow().clone()
    }

    /// Name of the class whose body declared this object, if any.
    #[must_use]
    pub fn owner(&self) -> Option<String> {
        self.owner.borrow().clone()
    }

    /// Resolver that produced the name, once resolved. `None` for the sentinel.
    #[must_use]
    pub fn via(&self) -> Option<ResolverKind> {
        self.resolution.get().and_then(|r| r.via)
    }

    /// The resolved name, using only what was captured at construction.
    pub fn resolved_name(&self) -> Result<&str, NameError> {
        let config = ResolveConfig::default();
        self.resolved_name_in(&ResolveContext::new(&config))
    }

    pub fn resolved_name_in(&self, ctx: &ResolveContext<'_>) -> Result<&str, NameError> {
        self.resolved_name_traced(ctx, &mut NoopTracer)
    }

    /// The resolved name; resolution runs on the first call only.
    pub fn resolved_name_traced(&self, ctx: &ResolveContext<'_>, tracer: &mut impl Tracer) -> Result<&str, NameError> {
        self.resolution(ctx, tracer).name.as_deref().map_err(Clone::clone)
    }

    /// Siblings for destructuring, using only what was captured at construction.
    pub fn siblings(&self) -> &[Rc<Self>] {
        let config = ResolveConfig::default();
        self.siblings_in(&ResolveContext::new(&config), &mut NoopTracer)
    }

    /// Exactly `expected` siblings of the same class, pre-named from the last
    /// destructuring at the construction site. Built once and reused.
    pub fn siblings_in(&self, ctx: &ResolveContext<'_>, tracer: &mut impl Tracer) -> &[Rc<Self>] {
        let group = self.resolution(ctx, tracer).group.as_deref();
        self.siblings.get_or_init(|| {
            (0..self.expected)
                .map(|position| {
                    let name = group.and_then(|g| g.get(position).cloned().flatten());
                    Self::sibling(&self.class, self.expected, name)
                })
                .collect()
        })
    }

    /// Iterates the cached siblings. Every call starts over and yields the
    /// same objects.
    pub fn iterate(&self) -> impl Iterator<Item = Rc<Self>> + '_ {
        self.siblings().iter().cloned()
    }

    /// Scoped acquisition.
    #[must_use]
    pub fn enter(self: &Rc<Self>) -> Entered {
        if self.expected == 0 {
            Entered::Itself(Rc::clone(self))
        } else {
            Entered::Group(self.siblings().to_vec())
        }
    }

    /// Scoped release. Nothing is cleaned up and an error in flight is never
    /// suppressed.
    #[expect(clippy::unused_self, reason = "pairs with `enter` on the same receiver")]
    pub fn exit(&self) {}

    /// Declaring-namespace hook: `owner`'s body bound this object to `member`.
    ///
    /// The owner is always recorded. The name only takes effect while
    /// unresolved, and a later call replaces an earlier one. Returns whether
    /// the name was recorded.
    pub fn set_name(&self, owner: &str, member: &str) -> bool {
        *self.owner.borrow_mut() = Some(owner.to_owned());
        if self.is_resolved() {
            return false;
        }
        *self.declared.borrow_mut() = Some(member.to_owned());
        true
    }

    fn resolution(&self, ctx: &ResolveContext<'_>, tracer: &mut impl Tracer) -> &Resolution {
        self.resolution.get_or_init(|| self.resolve(ctx, tracer))
    }

    fn resolve(&self, ctx: &ResolveContext<'_>, tracer: &mut impl Tracer) -> Resolution {
        let declared = self.declared_name();
        // A declared name bypasses the scanner unless siblings need naming.
        let site = self
            .site
            .borrow_mut()
            .take()
            .filter(|_| declared.is_none() || self.expected > 0);
        let scanned = site.and_then(|(code, offset)| InstructionScanner.scan(&code, offset, ctx.config, tracer));
        let group = scanned.as_ref().and_then(|collected| collected.group.clone());

        let (name, via) = if let Some(name) = declared {
            (Ok(name), Some(ResolverKind::ExplicitHook))
        } else if let Some(collected) = scanned {
            match collected.name {
                Some(name) => (Ok(name), Some(ResolverKind::InstructionScanner)),
                None => (Ok(SENTINEL.to_owned()), None),
            }
        } else {
            self.fall_back(ctx)
        };

        if let (Ok(name), Some(via)) = (&name, via) {
            tracer.on_resolved(name, via);
        }
        Resolution { name, via, group }
    }

    fn fall_back(&self, ctx: &ResolveContext<'_>) -> (Result<String, NameError>, Option<ResolverKind>) {
        for &kind in &ctx.config.fallbacks {
            let Some(resolver) = fallback(kind) else {
                continue;
            };
            match resolver.resolve(self, ctx) {
                Ok(Some(name)) => return (Ok(name), Some(kind)),
                Ok(None) => {}
                Err(error) => return (Err(error), Some(kind)),
            }
        }
        (Ok(SENTINEL.to_owned()), None)
    }
}
