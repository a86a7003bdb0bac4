//! Typed arena indices. Collectable payloads in `LuaValue` are one of these,
//! not a raw pointer — the arena (`Vec`-backed) may reallocate, but an index
//! stays valid across that, sidestepping the pointer-redirection dance the
//! reference VM needs for its open-upvalue stack pointers (see `spec.md` §9
//! / DESIGN.md).

macro_rules! gc_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
        #[repr(transparent)]
        pub struct $name(pub u32);

        impl $name {
            #[inline(always)]
            pub fn index(self) -> u32 {
                self.0
            }
        }
    };
}

gc_id!(StringId);
gc_id!(TableId);
gc_id!(FunctionId);
gc_id!(UpvalueId);
gc_id!(UserdataId);
gc_id!(ThreadId);
gc_id!(ProtoId);

/// Which arena a `GcId` indexes into — used by gray-list entries and the
/// intrusive `allgc`/`finobj`/`tobefnz` list links, both of which must be
/// able to name an object of any collectable kind.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GcObjectKind {
    String,
    Table,
    Function,
    Upvalue,
    Userdata,
    Thread,
    Proto,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct GcId {
    pub kind: GcObjectKind,
    pub index: u32,
}

impl GcId {
    #[inline(always)]
    pub fn new(kind: GcObjectKind, index: u32) -> Self {
        Self { kind, index }
    }
}

impl From<StringId> for GcId {
    fn from(id: StringId) -> Self {
        GcId::new(GcObjectKind::String, id.0)
    }
}
impl From<TableId> for GcId {
    fn from(id: TableId) -> Self {
        GcId::new(GcObjectKind::Table, id.0)
    }
}
impl From<FunctionId> for GcId {
    fn from(id: FunctionId) -> Self {
        GcId::new(GcObjectKind::Function, id.0)
    }
}
impl From<UpvalueId> for GcId {
    fn from(id: UpvalueId) -> Self {
        GcId::new(GcObjectKind::Upvalue, id.0)
    }
}
impl From<UserdataId> for GcId {
    fn from(id: UserdataId) -> Self {
        GcId::new(GcObjectKind::Userdata, id.0)
    }
}
impl From<ThreadId> for GcId {
    fn from(id: ThreadId) -> Self {
        GcId::new(GcObjectKind::Thread, id.0)
    }
}
impl From<ProtoId> for GcId {
    fn from(id: ProtoId) -> Self {
        GcId::new(GcObjectKind::Proto, id.0)
    }
}
