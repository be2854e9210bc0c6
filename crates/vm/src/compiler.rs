use crate::error::CompileError;
use crate::gc::ObjRef;
use crate::vm::Vm;

/// Turns source text into a top-level function the VM can run.
///
/// A collection may run whenever the compiler allocates through the VM. Objects
/// the compiler holds that are not yet reachable from a finished function (the
/// functions still being compiled, their constants) must be passed as extra
/// roots to [`Vm::alloc_rooted`] and [`Vm::intern_rooted`].
pub trait Compiler {
    fn compile(&mut self, source: &str, vm: &mut Vm) -> Result<ObjRef, CompileError>;
}

impl<F> Compiler for F
where
    F: FnMut(&str, &mut Vm) -> Result<ObjRef, CompileError>,
{
    fn compile(&mut self, source: &str, vm: &mut Vm) -> Result<ObjRef, CompileError> {
        self(source, vm)
    }
}
