//! A bytecode interpreter for Lox with a mark-sweep garbage collector.

pub mod compiler;
pub mod config;
pub mod error;
pub mod gc;
pub mod native;
pub mod table;
pub mod value;
pub mod vm;

pub use compiler::Compiler;
pub use config::{DebugFlags, VmConfig};
pub use error::{CompileError, InterpretError, RuntimeError, RuntimeErrorKind};
pub use gc::{Heap, ObjRef, Trace, Tracer};
pub use value::{Obj, Val};
pub use vm::Vm;
