//! Fluent assembler for hand-built `Prototype`s, standing in for the
//! lexer/parser/compiler this crate doesn't implement (`spec.md`
//! Non-goals). Mirrors the teacher's `TableBuilder` shape: collect state,
//! then materialize in one shot via [`build`](ProtoBuilder::build), which
//! needs `&mut GlobalState` only at the end for GC allocation.
//!
//! ```ignore
//! let proto = ProtoBuilder::new(0, false, 2)
//!     .constant(LuaValue::integer(1))
//!     .instr(Instruction::encode_abc(OpCode::LoadK, 0, 0, 0))
//!     .instr(Instruction::encode_abc(OpCode::Return, 0, 2, 0))
//!     .build(&mut state);
//! ```

use crate::object::ids::ProtoId;
use crate::object::proto::UpvalDesc;
use crate::value::LuaValue;
use crate::vm::opcode::Instruction;
use crate::vm::state::GlobalState;

pub struct ProtoBuilder {
    num_params: u8,
    is_vararg: bool,
    max_stack_size: u8,
    code: Vec<u32>,
    constants: Vec<LuaValue>,
    protos: Vec<ProtoId>,
    upvalues: Vec<UpvalDesc>,
    source: String,
}

impl ProtoBuilder {
    pub fn new(num_params: u8, is_vararg: bool, max_stack_size: u8) -> Self {
        ProtoBuilder {
            num_params,
            is_vararg,
            max_stack_size,
            code: Vec::new(),
            constants: Vec::new(),
            protos: Vec::new(),
            upvalues: Vec::new(),
            source: String::from("=(builder)"),
        }
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn instr(mut self, i: Instruction) -> Self {
        self.code.push(i.0);
        self
    }

    /// Appends a raw `EXTRAARG` word following `LOADKX`/`SETLIST(C=0)`.
    pub fn extra_arg(mut self, ax: u32) -> Self {
        self.code.push(ax << crate::vm::opcode::POS_A);
        self
    }

    /// Returns this constant's index, for use in a subsequent `instr` call.
    pub fn constant(&mut self, v: LuaValue) -> u32 {
        self.constants.push(v);
        (self.constants.len() - 1) as u32
    }

    /// Returns this nested prototype's index, for use in a `CLOSURE` `Bx`.
    pub fn nested_proto(&mut self, p: ProtoId) -> u32 {
        self.protos.push(p);
        (self.protos.len() - 1) as u32
    }

    pub fn upvalue(mut self, name: Option<&'static str>, in_stack: bool, index: u8) -> Self {
        self.upvalues.push(UpvalDesc { name, in_stack, index });
        self
    }

    pub fn build(self, state: &mut GlobalState) -> ProtoId {
        let id = state.new_proto(self.num_params, self.is_vararg, self.max_stack_size, self.source);
        let p = state.heap.protos.get_mut(id.0).expect("just allocated");
        p.code = self.code;
        p.constants = self.constants;
        p.protos = self.protos;
        p.upvalues = self.upvalues;
        id
    }
}
