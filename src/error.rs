//! Error model (`spec.md` §7): a raised Lua value propagates as a Rust
//! `Result`, not a panic. No `thiserror`/`anyhow` — `LuaError` composes by
//! hand via `Display`/`std::error::Error`, matching the teacher's
//! `lua_vm::lua_error` module (no ambient logging crate either; the only
//! diagnostics here are what the error itself carries).

use crate::value::LuaValue;

pub type LuaResult<T> = Result<T, LuaError>;

/// A single raised condition. `Runtime` carries the actual Lua value
/// passed to `error()` (often, but not always, a string); everything else
/// is a runtime-detected fault with no Lua-level value of its own yet —
/// callers needing one synthesize a string via `to_value`.
#[derive(Clone, Debug)]
pub enum LuaError {
    /// `error(v)`, or a propagated error table/value from a protected call.
    Runtime(LuaValue),
    /// A plain message, for faults raised internally before any Lua value
    /// exists to wrap (e.g. "attempt to call a nil value").
    Message(String),
    TypeError { op: &'static str, expected: &'static str, got: &'static str },
    StackOverflow,
    /// `spec.md` §4.7: event-chain lookups longer than 2000 hops.
    MetamethodChainTooLong,
    OutOfMemory,
}

impl LuaError {
    pub fn type_error(op: &'static str, expected: &'static str, got: &'static str) -> Self {
        LuaError::TypeError { op, expected, got }
    }

    pub fn message(msg: impl Into<String>) -> Self {
        LuaError::Message(msg.into())
    }

    /// Turn the error into the `LuaValue` that a protected call should
    /// hand back as its error object (`spec.md` §7 "Error values").
    pub fn into_value(self, mut intern: impl FnMut(&str) -> LuaValue) -> LuaValue {
        match self {
            LuaError::Runtime(v) => v,
            LuaError::Message(m) => intern(&m),
            LuaError::TypeError { op, expected, got } => {
                intern(&format!("attempt to {op} a {got} value (expected {expected})"))
            }
            LuaError::StackOverflow => intern("stack overflow"),
            LuaError::MetamethodChainTooLong => intern("'__index' chain too long; possible loop"),
            LuaError::OutOfMemory => intern("not enough memory"),
        }
    }
}

impl std::fmt::Display for LuaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LuaError::Runtime(_) => write!(f, "runtime error"),
            LuaError::Message(m) => write!(f, "{m}"),
            LuaError::TypeError { op, expected, got } => {
                write!(f, "attempt to {op} a {got} value (expected {expected})")
            }
            LuaError::StackOverflow => write!(f, "stack overflow"),
            LuaError::MetamethodChainTooLong => write!(f, "'__index' chain too long; possible loop"),
            LuaError::OutOfMemory => write!(f, "not enough memory"),
        }
    }
}

impl std::error::Error for LuaError {}

/// An error plus the traceback captured at the point it was raised
/// (`spec.md` §7, debug-hook formatting is out of scope — this only keeps
/// the raw frame list, not a formatted string).
#[derive(Clone, Debug)]
pub struct LuaFullError {
    pub error: LuaError,
    pub call_depth_at_raise: usize,
}

impl std::fmt::Display for LuaFullError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (depth {})", self.error, self.call_depth_at_raise)
    }
}

impl std::error::Error for LuaFullError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

pub fn type_name(tt: u8) -> &'static str {
    use crate::value::*;
    match no_variant(tt) {
        TNIL => "nil",
        TBOOLEAN => "boolean",
        TLIGHTUSERDATA => "userdata",
        TNUMBER => "number",
        TSTRING => "string",
        TTABLE => "table",
        TFUNCTION => "function",
        TUSERDATA => "userdata",
        TTHREAD => "thread",
        _ => "no value",
    }
}
