use std::hash::Hasher;

use fnv::FnvHasher;
use lox_bytecode::Chunk;
use smol_str::SmolStr;

use crate::gc::ObjRef;
use crate::table::Table;
use crate::value::Val;

/// Signature of host functions callable from scripts.
pub type NativeFn = fn(args: &[Val]) -> Val;

/// A heap-allocated object. The variant is the object's type tag.
pub enum Obj {
    String(LoxString),
    Function(Function),
    Closure(Closure),
    Upvalue(Upvalue),
    Class(Class),
    Instance(Instance),
    BoundMethod(BoundMethod),
    Native(Native),
}

/// An immutable, interned string with its hash computed once at construction.
pub struct LoxString {
    chars: Box<str>,
    hash: u64,
}

/// Hash string content the way the intern table expects (FNV-1a).
pub fn hash_str(s: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(s.as_bytes());
    hasher.finish()
}

impl LoxString {
    pub(crate) fn new(chars: Box<str>, hash: u64) -> Self {
        debug_assert_eq!(hash, hash_str(&chars));
        Self { chars, hash }
    }

    pub fn as_str(&self) -> &str {
        &self.chars
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }
}

pub struct Function {
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk<Val>,
    /// `None` for the top-level script
    pub name: Option<ObjRef>,
}

impl Function {
    pub fn new(name: Option<ObjRef>, arity: u8) -> Self {
        Self {
            arity,
            upvalue_count: 0,
            chunk: Chunk::new(),
            name,
        }
    }

    /// The top-level script function wrapping `chunk`.
    pub fn script(chunk: Chunk<Val>) -> Self {
        Self {
            arity: 0,
            upvalue_count: 0,
            chunk,
            name: None,
        }
    }
}

pub struct Closure {
    pub function: ObjRef,
    /// Upvalue captures, filled in order while the closure is being created
    pub upvalues: Vec<ObjRef>,
}

/// A captured variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Upvalue {
    /// Still living in the stack slot with this index
    Open(usize),
    /// The slot's scope has ended; the value now lives here
    Closed(Val),
}

pub struct Class {
    pub name: ObjRef,
    pub methods: Table,
}

pub struct Instance {
    pub class: ObjRef,
    pub fields: Table,
}

pub struct BoundMethod {
    pub receiver: Val,
    pub method: ObjRef,
}

pub struct Native {
    pub name: SmolStr,
    pub function: NativeFn,
}

impl Obj {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Obj::String(_) => "string",
            Obj::Function(_) => "function",
            Obj::Closure(_) => "closure",
            Obj::Upvalue(_) => "upvalue",
            Obj::Class(_) => "class",
            Obj::Instance(_) => "instance",
            Obj::BoundMethod(_) => "bound method",
            Obj::Native(_) => "native",
        }
    }

    /// Bytes owned by this object outside its fixed-size header.
    pub(crate) fn extra_size(&self) -> usize {
        use std::mem::size_of;
        match self {
            Obj::String(s) => s.len(),
            Obj::Function(f) => {
                f.chunk.code().len() * (1 + size_of::<u32>())
                    + f.chunk.constants().len() * size_of::<Val>()
            }
            Obj::Closure(c) => c.upvalues.capacity() * size_of::<ObjRef>(),
            Obj::Class(c) => c.methods.allocated_size(),
            Obj::Instance(i) => i.fields.allocated_size(),
            Obj::Upvalue(_) | Obj::BoundMethod(_) | Obj::Native(_) => 0,
        }
    }

    /// Push every object this one references.
    pub(crate) fn references(&self, out: &mut Vec<Val>) {
        match self {
            Obj::String(_) | Obj::Native(_) => {}
            Obj::Function(f) => {
                out.extend(f.name.map(Val::Obj));
                out.extend_from_slice(f.chunk.constants());
            }
            Obj::Closure(c) => {
                out.push(Val::Obj(c.function));
                out.extend(c.upvalues.iter().copied().map(Val::Obj));
            }
            Obj::Upvalue(Upvalue::Closed(v)) => out.push(*v),
            Obj::Upvalue(Upvalue::Open(_)) => {}
            Obj::Class(c) => {
                out.push(Val::Obj(c.name));
                c.methods.references(out);
            }
            Obj::Instance(i) => {
                out.push(Val::Obj(i.class));
                i.fields.references(out);
            }
            Obj::BoundMethod(b) => {
                out.push(b.receiver);
                out.push(Val::Obj(b.method));
            }
        }
    }

    pub fn as_string(&self) -> Option<&LoxString> {
        if let Self::String(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        if let Self::Function(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut Function> {
        if let Self::Function(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_closure(&self) -> Option<&Closure> {
        if let Self::Closure(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_closure_mut(&mut self) -> Option<&mut Closure> {
        if let Self::Closure(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_upvalue(&self) -> Option<&Upvalue> {
        if let Self::Upvalue(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_upvalue_mut(&mut self) -> Option<&mut Upvalue> {
        if let Self::Upvalue(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_class(&self) -> Option<&Class> {
        if let Self::Class(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_class_mut(&mut self) -> Option<&mut Class> {
        if let Self::Class(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        if let Self::Instance(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_instance_mut(&mut self) -> Option<&mut Instance> {
        if let Self::Instance(v) = self {
            Some(v)
        } else {
            None
        }
    }
}
