//! Name resolvers.
//!
//! The instruction scanner is the primary strategy. The others are consulted
//! only when there is no instruction stream to scan, in the order given by
//! [`ResolveConfig::fallbacks`]. A declared name always wins over any of them.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    bytecode::Code,
    config::ResolveConfig,
    error::NameError,
    frame::CallStack,
    legacy::{LexicalScanner, NamespaceScanner},
    object::BoundObject,
    scan::{Collected, collect, scan_stores},
    tracer::Tracer,
    value::Namespace,
};

/// Which strategy produced a name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResolverKind {
    /// Decoding the stores after the construction call.
    InstructionScanner,
    /// Identity search through the live variable tables of enclosing frames.
    LexicalScanner,
    /// Identity search through a namespace and the class namespaces it holds.
    NamespaceScanner,
    /// A name declared explicitly or by the declaring-namespace hook.
    ExplicitHook,
}

/// What a resolver may look at when a name is first read.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    /// Live frames of the reading thread.
    pub stack: Option<&'a CallStack>,
    /// Namespace whose members the namespace scanner searches.
    pub namespace: Option<&'a Namespace>,
    pub config: &'a ResolveConfig,
}

impl<'a> ResolveContext<'a> {
    /// A context with nothing to inspect beyond the captured call site.
    #[must_use]
    pub fn new(config: &'a ResolveConfig) -> Self {
        Self {
            stack: None,
            namespace: None,
            config,
        }
    }

    #[must_use]
    pub fn with_stack(mut self, stack: &'a CallStack) -> Self {
        self.stack = Some(stack);
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: &'a Namespace) -> Self {
        self.namespace = Some(namespace);
        self
    }
}

/// A strategy that finds the identifier an object is bound to.
pub trait NameResolver {
    fn kind(&self) -> ResolverKind;

    /// Returns `Ok(None)` when this strategy has no answer, so the next one
    /// can be tried.
    fn resolve(&self, target: &BoundObject, ctx: &ResolveContext<'_>) -> Result<Option<String>, NameError>;
}

/// Reports the declared name, if any.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplicitHook;

impl NameResolver for ExplicitHook {
    fn kind(&self) -> ResolverKind {
        ResolverKind::ExplicitHook
    }

    fn resolve(&self, target: &BoundObject, _ctx: &ResolveContext<'_>) -> Result<Option<String>, NameError> {
        Ok(target.declared_name())
    }
}

/// Decodes the stores following a construction call.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstructionScanner;

impl InstructionScanner {
    /// Scans `code` from the resume offset captured at construction.
    ///
    /// Returns `None` when the code carries no instruction stream, in which
    /// case the fallbacks apply. A malformed stream is reported to the tracer
    /// and yields an empty result, which resolves to the sentinel.
    pub fn scan(self, code: &Code, offset: usize, config: &ResolveConfig, tracer: &mut impl Tracer) -> Option<Collected> {
        if !code.is_inspectable() {
            return None;
        }
        match scan_stores(code, offset, config.max_scan_instructions, tracer) {
            Ok(scan) => Some(collect(&scan)),
            Err(error) => {
                tracer.on_degraded(&error);
                Some(Collected::default())
            }
        }
    }
}

/// The resolver implementing a fallback kind. The instruction scanner is not a
/// fallback and has none.
#[must_use]
pub fn fallback(kind: ResolverKind) -> Option<&'static dyn NameResolver> {
    match kind {
        ResolverKind::InstructionScanner => None,
        ResolverKind::LexicalScanner => Some(&LexicalScanner),
        ResolverKind::NamespaceScanner => Some(&NamespaceScanner),
        ResolverKind::ExplicitHook => Some(&ExplicitHook),
    }
}
