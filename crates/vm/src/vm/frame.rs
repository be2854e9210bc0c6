use crate::gc::{ObjRef, Trace, Tracer};
use crate::table::Table;
use crate::value::Val;

/// One in-progress function call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallFrame {
    pub closure: ObjRef,
    /// The closure's function, cached to skip one lookup per instruction
    pub function: ObjRef,
    pub ip: usize,
    /// Stack index of the frame's slot 0, which holds the callee or receiver
    pub slots: usize,
}

impl Trace for CallFrame {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        tracer.mark_object(self.closure);
        tracer.mark_object(self.function);
    }
}

/// Everything the interpreter keeps alive, plus whatever the caller of an
/// allocation is holding.
pub(crate) struct VmRoots<'a> {
    pub stack: &'a [Val],
    pub frames: &'a [CallFrame],
    /// `(stack slot, upvalue)` pairs
    pub open_upvalues: &'a [(usize, ObjRef)],
    pub globals: &'a Table,
    pub init_string: ObjRef,
    pub extra: &'a dyn Trace,
}

impl Trace for VmRoots<'_> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.stack.trace(tracer);
        self.frames.trace(tracer);
        for &(_, upvalue) in self.open_upvalues {
            tracer.mark_object(upvalue);
        }
        self.globals.trace(tracer);
        tracer.mark_object(self.init_string);
        self.extra.trace(tracer);
    }
}
