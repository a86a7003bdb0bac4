//! Call machinery and interpreter dispatch (`spec.md` §4.5, §4.6).

pub mod arithmetic;
pub mod call_info;
pub mod call_ops;
pub mod closure_ops;
pub mod comparison;
pub mod concat;
pub mod control;
pub mod interpreter;
pub mod metamethod;
pub mod opcode;
pub mod state;
pub mod table_ops;

use crate::error::LuaResult;
use crate::value::LuaValue;

/// A native function implementing part of the standard library or a host
/// binding. Takes the full argument slice, returns its results; failure is
/// a `LuaError` the interpreter turns into a Lua-level error/propagation
/// (`spec.md` §7). Out of this crate's scope is *which* functions exist —
/// only the calling convention they share with Lua closures.
pub type CFunction = fn(&mut state::GlobalState, &[LuaValue]) -> LuaResult<Vec<LuaValue>>;
