//! Call-site location.
//!
//! A construction runs inside one or more native frames: the engine's own
//! constructor, plus one frame per overriding constructor layer that delegated
//! to it. The call site is the frame just outside all of them. Each layer
//! reports its delegation explicitly through [`CallSite::delegate`], so the
//! hop count never depends on the shape of the type hierarchy.

use std::rc::Rc;

use crate::frame::{CallStack, ExecutionFrame};

/// Number of frames to walk outward from the innermost (constructor) frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite {
    hops: usize,
}

impl Default for CallSite {
    fn default() -> Self {
        Self::new()
    }
}

impl CallSite {
    /// A direct construction: the caller is one hop out.
    #[must_use]
    pub const fn new() -> Self {
        Self { hops: 1 }
    }

    /// Records one more constructor layer between the caller and the engine.
    #[must_use]
    pub const fn delegate(self) -> Self {
        Self { hops: self.hops + 1 }
    }

    #[must_use]
    pub const fn hops(self) -> usize {
        self.hops
    }
}

/// Finds the call-site frame for `site`.
///
/// When the stack is not deep enough for the requested hops (a constructor
/// invoked from the outermost frame), one fewer hop is used. Returns `None`
/// if even that is out of reach.
#[must_use]
pub fn locate(stack: &CallStack, site: CallSite) -> Option<Rc<ExecutionFrame>> {
    let hops = if site.hops() < stack.depth() {
        site.hops()
    } else {
        site.hops().checked_sub(1)?
    };
    stack.outward().nth(hops)
}
