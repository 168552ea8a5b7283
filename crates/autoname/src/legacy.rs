//! Identity-based fallback resolvers.
//!
//! These find a name by looking for variables that currently hold the object,
//! rather than by decoding how it was stored. They are less precise: they see
//! every alias at once, so more than one candidate is a conflict.

use std::rc::Rc;

use ahash::AHashSet;

use crate::{
    error::NameError,
    object::BoundObject,
    resolver::{NameResolver, ResolveContext, ResolverKind},
    value::{Namespace, Value},
};

/// Searches enclosing frames, innermost first. The first frame holding the
/// object decides.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalScanner;

impl NameResolver for LexicalScanner {
    fn kind(&self) -> ResolverKind {
        ResolverKind::LexicalScanner
    }

    fn resolve(&self, target: &BoundObject, ctx: &ResolveContext<'_>) -> Result<Option<String>, NameError> {
        let Some(stack) = ctx.stack else {
            return Ok(None);
        };
        for frame in stack.outward() {
            let mut names: Vec<String> = frame
                .bindings()
                .into_iter()
                .filter(|(_, value)| value.is_object(target))
                .map(|(name, _)| name)
                .collect();
            names.dedup();
            if !names.is_empty() {
                return single(names);
            }
        }
        Ok(None)
    }
}

/// Searches a namespace, descending into class namespaces that hold
/// self-naming values.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceScanner;

impl NameResolver for NamespaceScanner {
    fn kind(&self) -> ResolverKind {
        ResolverKind::NamespaceScanner
    }

    fn resolve(&self, target: &BoundObject, ctx: &ResolveContext<'_>) -> Result<Option<String>, NameError> {
        let Some(namespace) = ctx.namespace else {
            return Ok(None);
        };
        let mut visited = AHashSet::new();
        let mut names = Vec::new();
        search(namespace, target, &mut visited, &mut names);
        if names.is_empty() { Ok(None) } else { single(names) }
    }
}

fn search(namespace: &Namespace, target: &BoundObject, visited: &mut AHashSet<usize>, found: &mut Vec<String>) {
    if !visited.insert(Rc::as_ptr(namespace) as usize) {
        return;
    }
    // Collect first so no borrow is held while recursing.
    let members: Vec<(String, Value)> = namespace
        .borrow()
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    for (name, value) in members {
        match value {
            Value::Object(_) if value.is_object(target) => found.push(name),
            Value::Type(ty) if ty.holds_bound_objects() => search(ty.namespace(), target, visited, found),
            _ => {}
        }
    }
}

fn single(mut names: Vec<String>) -> Result<Option<String>, NameError> {
    if names.len() == 1 {
        Ok(names.pop())
    } else {
        Err(NameError::Conflict { names })
    }
}
