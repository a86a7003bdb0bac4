//! Function prototype (`spec.md` §3 & §6): the compiler's sole output and
//! this crate's only ingestion point. Immutable once built: constants,
//! bytecode, nested prototypes, upvalue descriptors, debug info, source
//! name, and a single-slot cache of the most recently instantiated Lua
//! closure sharing this prototype's upvalue bindings (invariant 5).

use super::gc_header::GcHeader;
use super::ids::{FunctionId, ProtoId};
use crate::value::LuaValue;

#[derive(Clone, Copy, Debug)]
pub struct UpvalDesc {
    pub name: Option<&'static str>,
    /// `true`: captures a local register of the *enclosing* function;
    /// `false`: forwards one of the enclosing function's own upvalues.
    pub in_stack: bool,
    pub index: u8,
}

#[derive(Clone, Debug)]
pub struct LocVar {
    pub name: String,
    pub start_pc: u32,
    pub end_pc: u32,
}

pub struct Prototype {
    pub header: GcHeader,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    pub code: Vec<u32>,
    pub constants: Vec<LuaValue>,
    pub protos: Vec<ProtoId>,
    pub upvalues: Vec<UpvalDesc>,
    pub line_info: Vec<i32>,
    pub loc_vars: Vec<LocVar>,
    pub source: String,
    /// Best-effort optimization (`spec.md` §9, Open Questions): omitting
    /// it changes nothing observable, it only avoids reallocating a
    /// closure whose upvalue bindings are unchanged from last time.
    pub cache: Option<FunctionId>,
}

impl Prototype {
    pub fn new(header: GcHeader, num_params: u8, is_vararg: bool, max_stack_size: u8, source: String) -> Self {
        Prototype {
            header,
            num_params,
            is_vararg,
            max_stack_size,
            code: Vec::new(),
            constants: Vec::new(),
            protos: Vec::new(),
            upvalues: Vec::new(),
            line_info: Vec::new(),
            loc_vars: Vec::new(),
            source,
            cache: None,
        }
    }
}
