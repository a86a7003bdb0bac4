//! Thread entity (`spec.md` §3): a growable data stack, a reusable chain
//! of `CallInfo` records, the open-upvalue list head, an error-jump chain,
//! hook state, and the `twups` (threads-with-upvalues) link.

use super::gc_header::GcHeader;
use super::ids::{ThreadId, UpvalueId};
use crate::value::LuaValue;
use crate::vm::call_info::{CallInfo, ProtectedCall};
use crate::vm::CFunction;

pub struct LuaThread {
    pub header: GcHeader,
    pub stack: Vec<LuaValue>,
    /// One past the last register written by the most recent "open"
    /// (variable-result) instruction — `CALL` with `C=0`, `VARARG` with
    /// `B=0` — consulted by whichever instruction immediately follows
    /// when *it* asks for "all available values" (`spec.md` §4.6, the
    /// multiple-results convention). Mirrors the reference's `L->top`,
    /// kept separate from any single activation's static register
    /// ceiling (`CallInfo::top`).
    pub stack_top: usize,
    pub ci_stack: Vec<CallInfo>,
    /// Head of the open-upvalue list, sorted by descending stack address
    /// (invariant 4, `spec.md` §3).
    pub open_upvalues: Option<UpvalueId>,
    pub pcall_stack: Vec<ProtectedCall>,
    pub non_yieldable_depth: u32,
    /// Instruction-count hook state (`spec.md` §5, "Cancellation/timeout").
    pub hook_count: u32,
    pub hook_count_remaining: i64,
    pub hook_fn: Option<CFunction>,
    /// Set by the collector when it walks this thread's open upvalues
    /// outside the atomic phase, so atomic re-marks them (`spec.md` §4.4
    /// traversal rule for Lua closures).
    pub touched: bool,
    /// Is this thread currently linked into the global `twups` chain?
    pub in_twups: bool,
}

impl LuaThread {
    pub fn new(header: GcHeader, stack_size: usize) -> Self {
        LuaThread {
            header,
            stack: vec![LuaValue::nil(); stack_size],
            stack_top: 0,
            ci_stack: Vec::new(),
            open_upvalues: None,
            pcall_stack: Vec::new(),
            non_yieldable_depth: 0,
            hook_count: 0,
            hook_count_remaining: 0,
            hook_fn: None,
            touched: false,
            in_twups: false,
        }
    }

    pub fn current_ci(&self) -> &CallInfo {
        self.ci_stack.last().expect("call-info stack must never be empty while executing")
    }

    pub fn current_ci_mut(&mut self) -> &mut CallInfo {
        self.ci_stack.last_mut().expect("call-info stack must never be empty while executing")
    }

    pub fn grow_stack_to(&mut self, needed: usize) {
        if self.stack.len() < needed {
            self.stack.resize(needed.max(self.stack.len() * 2), LuaValue::nil());
        }
    }
}
