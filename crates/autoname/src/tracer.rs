//! Execution and resolution tracing infrastructure.
//!
//! A trait-based tracing system shared by the VM and the name-resolution
//! engine. With [`NoopTracer`] every hook compiles away through
//! monomorphization.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (default) |
//! | [`StderrTracer`] | Human-readable log to stderr |
//! | [`RecordingTracer`] | Full event recording for post-mortem analysis and tests |
//!
//! ```ignore
//! let mut vm = Vm::new(NoopTracer);
//! let mut vm = Vm::new(StderrTracer::new());
//! let mut vm = Vm::new(RecordingTracer::new());
//! vm.run_module(code)?;
//! for event in vm.tracer().events() { /* ... */ }
//! ```

use crate::{
    bytecode::{Opcode, TargetKind},
    resolver::ResolverKind,
    scan::{RunEnd, ScanError, StoreEvent},
};

/// Trace event captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    /// The VM dispatched an instruction.
    Instruction {
        /// Byte offset of the opcode.
        offset: usize,
        opcode: Opcode,
        /// Combined operand, extension prefixes included.
        arg: u32,
    },
    /// A frame was pushed.
    Call {
        name: String,
        /// Call stack depth after the push.
        depth: usize,
    },
    /// A frame was popped.
    Return {
        /// Call stack depth after the pop.
        depth: usize,
    },
    /// The store-target decoder examined an instruction.
    Decode { offset: usize, opcode: Opcode, arg: u32 },
    /// The decoder recorded a binding.
    Store {
        name: String,
        kind: TargetKind,
        position: usize,
    },
    /// A destructuring group was opened.
    GroupOpen { group: usize, size: usize },
    /// A destructuring group consumed all of its positions.
    GroupClose { group: usize, start: usize, end: usize },
    /// The qualifying run ended.
    RunEnd { offset: usize, reason: RunEnd },
    /// A resolver produced the final name for an object.
    Resolved { name: String, via: ResolverKind },
    /// Decoding hit a malformed shape and resolution fell back to the sentinel.
    Degraded { error: ScanError },
}

/// Trait for tracing VM execution and name resolution.
///
/// All methods have default no-op implementations; implementations override
/// only the hooks they care about.
pub trait Tracer: std::fmt::Debug {
    /// Called before each opcode dispatch in the VM loop.
    #[inline(always)]
    fn on_instruction(&mut self, _offset: usize, _opcode: Opcode, _arg: u32) {}

    /// Called when a frame is pushed.
    ///
    /// # Arguments
    /// * `name` - Name of the code object the frame executes
    /// * `depth` - Call stack depth after the push
    #[inline(always)]
    fn on_call(&mut self, _name: &str, _depth: usize) {}

    /// Called when a frame is popped.
    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    /// Called for each instruction the store-target decoder examines.
    #[inline(always)]
    fn on_decode(&mut self, _offset: usize, _opcode: Opcode, _arg: u32) {}

    /// Called for each decoded binding.
    #[inline(always)]
    fn on_store(&mut self, _event: &StoreEvent) {}

    /// Called when a destructuring of the constructed value begins.
    #[inline(always)]
    fn on_group_open(&mut self, _group: usize, _size: usize) {}

    /// Called when a destructuring group has consumed all of its positions.
    #[inline(always)]
    fn on_group_close(&mut self, _group: usize, _start: usize, _end: usize) {}

    /// Called once when the qualifying run of instructions ends.
    #[inline(always)]
    fn on_run_end(&mut self, _offset: usize, _reason: RunEnd) {}

    /// Called when an object's name is resolved for the first time.
    #[inline(always)]
    fn on_resolved(&mut self, _name: &str, _via: ResolverKind) {}

    /// Called when decoding failed and resolution degraded to the sentinel.
    #[inline(always)]
    fn on_degraded(&mut self, _error: &ScanError) {}
}

impl<T: Tracer + ?Sized> Tracer for &mut T {
    fn on_instruction(&mut self, offset: usize, opcode: Opcode, arg: u32) {
        (**self).on_instruction(offset, opcode, arg);
    }

    fn on_call(&mut self, name: &str, depth: usize) {
        (**self).on_call(name, depth);
    }

    fn on_return(&mut self, depth: usize) {
        (**self).on_return(depth);
    }

    fn on_decode(&mut self, offset: usize, opcode: Opcode, arg: u32) {
        (**self).on_decode(offset, opcode, arg);
    }

    fn on_store(&mut self, event: &StoreEvent) {
        (**self).on_store(event);
    }

    fn on_group_open(&mut self, group: usize, size: usize) {
        (**self).on_group_open(group, size);
    }

    fn on_group_close(&mut self, group: usize, start: usize, end: usize) {
        (**self).on_group_close(group, start, end);
    }

    fn on_run_end(&mut self, offset: usize, reason: RunEnd) {
        (**self).on_run_end(offset, reason);
    }

    fn on_resolved(&mut self, name: &str, via: ResolverKind) {
        (**self).on_resolved(name, via);
    }

    fn on_degraded(&mut self, error: &ScanError) {
        (**self).on_degraded(error);
    }
}

// ============================================================================
// NoopTracer: zero-cost default
// ============================================================================

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}

// ============================================================================
// StderrTracer: human-readable log
// ============================================================================

/// Tracer that prints a human-readable log to stderr.
///
/// Output format:
/// ```text
/// [    0] LOAD_GLOBAL        0
/// [    2] CALL_FUNCTION      0
///   >>> CALL AutoName.__init__    depth=2
///   ... scan [    4] DUP_TOP            0
///   ... store a (name) #0
///   ... run end at 8: value consumed
///   === resolved b via instruction_scanner
///   <<< RETURN                    depth=1
/// ```
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Maximum number of VM instructions to log (None = unlimited).
    limit: Option<usize>,
    /// Number of instructions logged so far.
    count: usize,
    /// Whether the limit has been hit.
    stopped: bool,
}

impl StderrTracer {
    /// Creates a stderr tracer with no instruction limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stderr tracer that stops logging after `limit` VM instructions.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

impl Tracer for StderrTracer {
    fn on_instruction(&mut self, offset: usize, opcode: Opcode, arg: u32) {
        if self.stopped {
            return;
        }
        eprintln!("[{offset:>5}] {opcode:<18} {arg}");
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} instructions) ---");
            self.stopped = true;
        }
    }

    fn on_call(&mut self, name: &str, depth: usize) {
        if !self.stopped {
            eprintln!("  >>> CALL {name:<24} depth={depth}");
        }
    }

    fn on_return(&mut self, depth: usize) {
        if !self.stopped {
            eprintln!("  <<< RETURN                   depth={depth}");
        }
    }

    fn on_decode(&mut self, offset: usize, opcode: Opcode, arg: u32) {
        eprintln!("  ... scan [{offset:>5}] {opcode:<18} {arg}");
    }

    fn on_store(&mut self, event: &StoreEvent) {
        eprintln!("  ... store {} ({}) #{}", event.name, event.kind, event.position);
    }

    fn on_group_open(&mut self, group: usize, size: usize) {
        eprintln!("  ... unpack group {group} of {size}");
    }

    fn on_group_close(&mut self, group: usize, start: usize, end: usize) {
        eprintln!("  ... unpack group {group} closed, events {start}..{end}");
    }

    fn on_run_end(&mut self, offset: usize, reason: RunEnd) {
        eprintln!("  ... run end at {offset}: {reason}");
    }

    fn on_resolved(&mut self, name: &str, via: ResolverKind) {
        eprintln!("  === resolved {name} via {via}");
    }

    fn on_degraded(&mut self, error: &ScanError) {
        eprintln!("  !!! degraded to sentinel: {error}");
    }
}

// ============================================================================
// RecordingTracer: full event recording
// ============================================================================

/// Tracer that records every event into a `Vec<TraceEvent>`.
///
/// The most expensive tracer (allocates per event); use it for debugging and
/// in tests that assert on what the engine saw.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    /// Optional limit on number of events recorded.
    limit: Option<usize>,
}

impl RecordingTracer {
    /// Creates a recording tracer with no event limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recording tracer that stops recording after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
        }
    }

    /// Returns the recorded events.
    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Consumes the tracer and returns the recorded events.
    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    fn record(&mut self, event: TraceEvent) {
        if self.limit.is_none_or(|l| self.events.len() < l) {
            self.events.push(event);
        }
    }
}

impl Tracer for RecordingTracer {
    fn on_instruction(&mut self, offset: usize, opcode: Opcode, arg: u32) {
        self.record(TraceEvent::Instruction { offset, opcode, arg });
    }

    fn on_call(&mut self, name: &str, depth: usize) {
        self.record(TraceEvent::Call {
            name: name.to_owned(),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.record(TraceEvent::Return { depth });
    }

    fn on_decode(&mut self, offset: usize, opcode: Opcode, arg: u32) {
        self.record(TraceEvent::Decode { offset, opcode, arg });
    }

    fn on_store(&mut self, event: &StoreEvent) {
        self.record(TraceEvent::Store {
            name: event.name.to_string(),
            kind: event.kind,
            position: event.position,
        });
    }

    fn on_group_open(&mut self, group: usize, size: usize) {
        self.record(TraceEvent::GroupOpen { group, size });
    }

    fn on_group_close(&mut self, group: usize, start: usize, end: usize) {
        self.record(TraceEvent::GroupClose { group, start, end });
    }

    fn on_run_end(&mut self, offset: usize, reason: RunEnd) {
        self.record(TraceEvent::RunEnd { offset, reason });
    }

    fn on_resolved(&mut self, name: &str, via: ResolverKind) {
        self.record(TraceEvent::Resolved {
            name: name.to_owned(),
            via,
        });
    }

    fn on_degraded(&mut self, error: &ScanError) {
        self.record(TraceEvent::Degraded { error: error.clone() });
    }
}
