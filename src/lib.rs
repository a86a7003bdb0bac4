//! Core runtime of a Lua 5.3-dialect bytecode interpreter: the tagged value
//! model, the heap object graph, the incremental tri-color collector, the
//! closure/upvalue machinery, call machinery and the interpreter dispatch
//! loop. The lexer, parser, compiler and standard library are external
//! collaborators and are not part of this crate; `builder` provides a
//! minimal way to assemble `Prototype`s by hand for tests.

pub mod builder;
pub mod error;
pub mod gc;
pub mod object;
pub mod value;
pub mod vm;

pub use error::{LuaError, LuaFullError, LuaResult};
pub use value::LuaValue;
pub use vm::state::GlobalState;
