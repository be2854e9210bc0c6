mod frame;

use std::borrow::Cow;
use std::io::Write;

use itertools::Itertools;
use lox_bytecode::disasm::{disassemble_chunk, disassemble_instruction};
use lox_bytecode::inst::{Inst, Operand};
use lox_bytecode::Chunk;
use smol_str::SmolStr;
use tracing::{debug, trace};

use crate::compiler::Compiler;
use crate::config::{DebugFlags, VmConfig};
use crate::error::{InterpretError, RuntimeError, RuntimeErrorKind, TraceFrame};
use crate::gc::{Heap, ObjRef, Trace};
use crate::native;
use crate::table::{Key, Table};
use crate::value::{
    format_number, BoundMethod, Class, Closure, Function, Instance, Native, NativeFn, Obj,
    Upvalue, Val, ValDisplay,
};

use self::frame::{CallFrame, VmRoots};

type Result<T, E = RuntimeErrorKind> = std::result::Result<T, E>;

fn malformed(what: impl Into<String>) -> RuntimeErrorKind {
    RuntimeErrorKind::MalformedBytecode(what.into())
}

fn function_of(heap: &Heap, function: ObjRef) -> &Function {
    heap[function]
        .as_function()
        .expect("call frame must run a function")
}

/// Build the root set from the VM's fields. A macro rather than a method so
/// that the heap can be borrowed mutably alongside.
macro_rules! roots {
    ($vm:expr, $extra:expr) => {
        VmRoots {
            stack: &$vm.stack,
            frames: &$vm.frames,
            open_upvalues: &$vm.open_upvalues,
            globals: &$vm.globals,
            init_string: $vm.init_key.obj,
            extra: $extra,
        }
    };
}

/// The interpreter: operand stack, call frames, globals and the heap they all
/// point into.
pub struct Vm {
    heap: Heap,
    stack: Vec<Val>,
    frames: Vec<CallFrame>,
    globals: Table,

    /// Upvalues still pointing into the stack, sorted by slot. The last one
    /// captures the highest slot.
    open_upvalues: Vec<(usize, ObjRef)>,

    init_key: Key,
    config: VmConfig,
    out: Box<dyn Write>,
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new(VmConfig::default())
    }
}

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        Self::with_output(config, std::io::stdout())
    }

    /// Create a VM whose `print` writes to `out`.
    pub fn with_output(config: VmConfig, out: impl Write + 'static) -> Self {
        native::start();
        let mut heap = Heap::new(&config);
        let init = heap.intern("init", &());
        let init_key = heap.key(Val::Obj(init)).expect("interned string");
        let mut vm = Vm {
            heap,
            stack: Vec::with_capacity(config.stack_max()),
            frames: Vec::with_capacity(config.frames_max),
            globals: Table::new(),
            open_upvalues: vec![],
            init_key,
            config,
            out: Box::new(out),
        };
        vm.define_native("clock", native::clock);
        vm
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn display(&self, val: Val) -> ValDisplay<'_> {
        self.heap.display(val)
    }

    pub fn alloc(&mut self, obj: Obj) -> ObjRef {
        self.alloc_rooted(obj, &())
    }

    /// Allocate while keeping `extra` alive in addition to the VM's own roots.
    pub fn alloc_rooted(&mut self, obj: Obj, extra: &dyn Trace) -> ObjRef {
        self.heap.alloc(obj, &roots!(self, extra))
    }

    pub fn intern(&mut self, s: &str) -> ObjRef {
        self.intern_rooted(s, &())
    }

    pub fn intern_rooted(&mut self, s: &str, extra: &dyn Trace) -> ObjRef {
        self.heap.intern(s, &roots!(self, extra))
    }

    pub fn intern_owned(&mut self, s: String) -> ObjRef {
        self.heap.intern_owned(s, &roots!(self, &()))
    }

    pub fn collect_garbage(&mut self) {
        self.heap.collect(&roots!(self, &()))
    }

    /// Register a host function as a global.
    pub fn define_native(&mut self, name: &str, function: NativeFn) {
        let name_ref = self.intern(name);
        let native = self.alloc_rooted(
            Obj::Native(Native {
                name: name.into(),
                function,
            }),
            &name_ref,
        );
        let key = self.key_of(name_ref);
        self.globals.set(key, Val::Obj(native));
    }

    /// Look up a global by name.
    pub fn global(&self, name: &str) -> Option<Val> {
        let key = self.heap.key(Val::Obj(self.heap.lookup(name)?))?;
        self.globals.get(key)
    }

    /// Render the bytecode of a function.
    pub fn disassemble(&self, function: ObjRef) -> Option<String> {
        let func = self.heap.get(function)?.as_function()?;
        let name = func
            .name
            .and_then(|name| self.heap.str(name))
            .unwrap_or("script");
        Some(disassemble_chunk(&func.chunk, name, &self.heap))
    }

    /// Compile `source` and run it.
    pub fn interpret(
        &mut self,
        source: &str,
        compiler: &mut impl Compiler,
    ) -> Result<Val, InterpretError> {
        let function = compiler.compile(source, self)?;
        Ok(self.interpret_function(function)?)
    }

    /// Run a chunk as the top-level script.
    pub fn interpret_chunk(&mut self, chunk: Chunk<Val>) -> Result<Val, RuntimeError> {
        let function = self.alloc(Obj::Function(Function::script(chunk)));
        self.interpret_function(function)
    }

    /// Run a compiled function as the top-level script. Returns the value of
    /// its final `Return`.
    pub fn interpret_function(&mut self, function: ObjRef) -> Result<Val, RuntimeError> {
        let result = self.start(function).and_then(|_| self.run());
        result.map_err(|kind| self.runtime_error(kind))
    }

    fn start(&mut self, function: ObjRef) -> Result<()> {
        if !matches!(self.heap.get(function), Some(Obj::Function(_))) {
            return Err(RuntimeErrorKind::NotCallable);
        }
        self.push(Val::Obj(function))?;
        let closure = self.alloc(Obj::Closure(Closure {
            function,
            upvalues: vec![],
        }));
        self.pop()?;
        self.push(Val::Obj(closure))?;
        self.call(closure, 0)
    }

    fn runtime_error(&mut self, kind: RuntimeErrorKind) -> RuntimeError {
        let error = RuntimeError {
            kind,
            backtrace: self.backtrace(),
        };
        debug!(target: "lox_vm::exec", "runtime error: {}", error);
        self.reset_stack();
        error
    }

    fn backtrace(&self) -> Vec<TraceFrame> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let function = function_of(&self.heap, frame.function);
                TraceFrame {
                    line: function.chunk.line(frame.ip.saturating_sub(1)).unwrap_or(0),
                    function: function
                        .name
                        .and_then(|name| self.heap.str(name))
                        .map(SmolStr::from),
                }
            })
            .collect()
    }

    fn reset_stack(&mut self) {
        self.close_upvalues(0);
        self.stack.clear();
        self.frames.clear();
    }

    fn push(&mut self, val: Val) -> Result<()> {
        if self.stack.len() >= self.config.stack_max() {
            return Err(RuntimeErrorKind::OperandStackOverflow);
        }
        self.stack.push(val);
        Ok(())
    }

    fn pop(&mut self) -> Result<Val> {
        self.stack
            .pop()
            .ok_or_else(|| malformed("operand stack underflow"))
    }

    fn peek(&self, distance: usize) -> Result<Val> {
        self.stack
            .len()
            .checked_sub(distance + 1)
            .map(|idx| self.stack[idx])
            .ok_or_else(|| malformed("operand stack underflow"))
    }

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("no active call frame")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("no active call frame")
    }

    fn chunk(&self) -> &Chunk<Val> {
        &function_of(&self.heap, self.frame().function).chunk
    }

    /// Decode the next instruction and its fixed operands.
    fn fetch(&mut self) -> Result<(Inst, [usize; 2])> {
        let frame = self.frames.last_mut().expect("no active call frame");
        let chunk = &function_of(&self.heap, frame.function).chunk;
        let mut reader = chunk.reader(&mut frame.ip);

        let inst = match reader.read_inst() {
            Some(Ok(inst)) => inst,
            Some(Err(byte)) => return Err(malformed(format!("unknown opcode {}", byte))),
            None => return Err(malformed("ran past the end of the chunk")),
        };
        let mut operands = [0; 2];
        for (slot, operand) in operands.iter_mut().zip(inst.operands()) {
            let value = match operand {
                Operand::Const | Operand::Slot | Operand::Count => {
                    reader.read_u8().map(usize::from)
                }
                Operand::Jump | Operand::Loop => reader.read_u16().map(usize::from),
                Operand::ConstLong => reader.read_u24().map(|idx| idx as usize),
                // read by the instruction itself
                Operand::Captures => Some(0),
            };
            *slot = value.ok_or_else(|| malformed(format!("truncated operand of {}", inst)))?;
        }
        Ok((inst, operands))
    }

    /// Read the `(is_local, index)` pairs following a `Closure` instruction.
    fn read_captures(&mut self, count: usize) -> Result<Vec<(bool, usize)>> {
        let frame = self.frames.last_mut().expect("no active call frame");
        let chunk = &function_of(&self.heap, frame.function).chunk;
        let mut reader = chunk.reader(&mut frame.ip);
        (0..count)
            .map(|_| {
                let is_local = reader.read_u8()?;
                let index = reader.read_u8()?;
                Some((is_local != 0, index as usize))
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| malformed("truncated closure captures"))
    }

    fn constant(&self, idx: usize) -> Result<Val> {
        self.chunk()
            .constant(idx)
            .copied()
            .ok_or_else(|| malformed(format!("constant {} out of range", idx)))
    }

    fn string_constant(&self, idx: usize) -> Result<Key> {
        let value = self.constant(idx)?;
        self.heap
            .key(value)
            .ok_or_else(|| malformed(format!("constant {} is not a string", idx)))
    }

    fn key_of(&self, string: ObjRef) -> Key {
        self.heap
            .key(Val::Obj(string))
            .expect("names are interned strings")
    }

    fn name_of(&self, key: Key) -> SmolStr {
        self.heap.str(key.obj).unwrap_or_default().into()
    }

    fn instance_ref(&self, v: Val) -> Option<ObjRef> {
        v.as_obj()
            .filter(|&r| matches!(self.heap.get(r), Some(Obj::Instance(_))))
    }

    fn class_ref(&self, v: Val) -> Option<ObjRef> {
        v.as_obj()
            .filter(|&r| matches!(self.heap.get(r), Some(Obj::Class(_))))
    }

    fn local(&self, slot: usize) -> Result<Val> {
        let idx = self.frame().slots + slot;
        self.stack
            .get(idx)
            .copied()
            .ok_or_else(|| malformed(format!("local slot {} out of range", slot)))
    }

    fn set_local(&mut self, slot: usize, value: Val) -> Result<()> {
        let idx = self.frame().slots + slot;
        match self.stack.get_mut(idx) {
            Some(v) => {
                *v = value;
                Ok(())
            }
            None => Err(malformed(format!("local slot {} out of range", slot))),
        }
    }

    fn upvalue(&self, idx: usize) -> Result<ObjRef> {
        let closure = self.frame().closure;
        self.heap
            .get(closure)
            .and_then(Obj::as_closure)
            .and_then(|c| c.upvalues.get(idx).copied())
            .ok_or_else(|| malformed(format!("upvalue {} out of range", idx)))
    }

    fn trace_instruction(&self) {
        let ip = self.frame().ip;
        let chunk = self.chunk();
        let stack = self
            .stack
            .iter()
            .map(|v| format!("[ {} ]", self.heap.display(*v)))
            .join("");
        trace!(target: "lox_vm::exec", "          {}", stack);
        if ip < chunk.len() {
            let (text, _) = disassemble_instruction(chunk, ip, &self.heap);
            trace!(target: "lox_vm::exec", "{}", text);
        }
    }

    fn run(&mut self) -> Result<Val> {
        let tracing = self.config.debug.contains(DebugFlags::TRACE_EXECUTION);
        loop {
            if tracing {
                self.trace_instruction();
            }

            let (inst, [a, b]) = self.fetch()?;
            match inst {
                Inst::Constant | Inst::ConstantLong => {
                    let value = self.constant(a)?;
                    self.push(value)?;
                }
                Inst::Nil => self.push(Val::Nil)?,
                Inst::True => self.push(Val::Bool(true))?,
                Inst::False => self.push(Val::Bool(false))?,
                Inst::Pop => {
                    self.pop()?;
                }

                Inst::GetLocal => {
                    let value = self.local(a)?;
                    self.push(value)?;
                }
                Inst::SetLocal => {
                    let value = self.peek(0)?;
                    self.set_local(a, value)?;
                }
                Inst::GetGlobal => {
                    let key = self.string_constant(a)?;
                    match self.globals.get(key) {
                        Some(value) => self.push(value)?,
                        None => return Err(RuntimeErrorKind::UndefinedVariable(self.name_of(key))),
                    }
                }
                Inst::DefineGlobal => {
                    let key = self.string_constant(a)?;
                    let value = self.peek(0)?;
                    self.globals.set(key, value);
                    self.pop()?;
                }
                Inst::SetGlobal => {
                    let key = self.string_constant(a)?;
                    let value = self.peek(0)?;
                    if self.globals.set(key, value) {
                        // assignment never defines
                        self.globals.delete(key);
                        return Err(RuntimeErrorKind::UndefinedVariable(self.name_of(key)));
                    }
                }
                Inst::GetUpvalue => {
                    let upvalue = self.upvalue(a)?;
                    let value = match self.heap[upvalue].as_upvalue() {
                        Some(Upvalue::Open(slot)) => self.stack.get(*slot).copied(),
                        Some(Upvalue::Closed(value)) => Some(*value),
                        None => None,
                    };
                    let value = value.ok_or_else(|| malformed("dangling upvalue"))?;
                    self.push(value)?;
                }
                Inst::SetUpvalue => {
                    let upvalue = self.upvalue(a)?;
                    let value = self.peek(0)?;
                    match self.heap[upvalue].as_upvalue_mut() {
                        Some(Upvalue::Open(slot)) => {
                            let slot = *slot;
                            *self
                                .stack
                                .get_mut(slot)
                                .ok_or_else(|| malformed("dangling upvalue"))? = value;
                        }
                        Some(Upvalue::Closed(closed)) => *closed = value,
                        None => return Err(malformed("dangling upvalue")),
                    }
                }
                Inst::GetProperty => self.get_property(a)?,
                Inst::SetProperty => self.set_property(a)?,
                Inst::GetSuper => {
                    let key = self.string_constant(a)?;
                    let superclass = self.pop()?;
                    let class = self
                        .class_ref(superclass)
                        .ok_or(RuntimeErrorKind::SuperclassMustBeClass)?;
                    self.bind_method(class, key)?;
                }

                Inst::Equal => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Val::Bool(a == b))?;
                }
                Inst::Greater => self.binary_op(|a, b| Val::Bool(a > b))?,
                Inst::Less => self.binary_op(|a, b| Val::Bool(a < b))?,
                Inst::Add => self.add()?,
                Inst::Subtract => self.binary_op(|a, b| Val::Number(a - b))?,
                Inst::Multiply => self.binary_op(|a, b| Val::Number(a * b))?,
                Inst::Divide => self.binary_op(|a, b| Val::Number(a / b))?,
                Inst::Not => {
                    let value = self.pop()?;
                    self.push(Val::Bool(value.is_falsey()))?;
                }
                Inst::Negate => match self.peek(0)? {
                    Val::Number(n) => {
                        self.pop()?;
                        self.push(Val::Number(-n))?;
                    }
                    _ => return Err(RuntimeErrorKind::OperandMustBeNumber),
                },
                Inst::Print => {
                    let value = self.pop()?;
                    writeln!(self.out, "{}", self.heap.display(value))
                        .map_err(|e| RuntimeErrorKind::Output(e.to_string()))?;
                }

                Inst::Jump => self.frame_mut().ip += a,
                Inst::JumpIfFalse => {
                    if self.peek(0)?.is_falsey() {
                        self.frame_mut().ip += a;
                    }
                }
                Inst::Loop => {
                    let frame = self.frame_mut();
                    frame.ip = frame
                        .ip
                        .checked_sub(a)
                        .ok_or_else(|| malformed("loop jumps before the chunk start"))?;
                }

                Inst::Call => {
                    let callee = self.peek(a)?;
                    self.call_value(callee, a)?;
                }
                Inst::Invoke => {
                    let key = self.string_constant(a)?;
                    self.invoke(key, b)?;
                }
                Inst::SuperInvoke => {
                    let key = self.string_constant(a)?;
                    let superclass = self.pop()?;
                    let class = self
                        .class_ref(superclass)
                        .ok_or(RuntimeErrorKind::SuperclassMustBeClass)?;
                    self.invoke_from_class(class, key, b)?;
                }
                Inst::Closure => self.make_closure(a)?,
                Inst::CloseUpvalue => {
                    let top = self
                        .stack
                        .len()
                        .checked_sub(1)
                        .ok_or_else(|| malformed("operand stack underflow"))?;
                    self.close_upvalues(top);
                    self.pop()?;
                }
                Inst::Return => {
                    let result = self.pop()?;
                    let frame = self.frames.pop().expect("no active call frame");
                    self.close_upvalues(frame.slots);
                    self.stack.truncate(frame.slots);
                    if self.frames.is_empty() {
                        return Ok(result);
                    }
                    self.push(result)?;
                }

                Inst::Class => {
                    let key = self.string_constant(a)?;
                    let class = self.alloc(Obj::Class(Class {
                        name: key.obj,
                        methods: Table::new(),
                    }));
                    self.push(Val::Obj(class))?;
                }
                Inst::Inherit => self.inherit()?,
                Inst::Method => self.define_method(a)?,
            }
        }
    }

    fn binary_op(&mut self, op: fn(f64, f64) -> Val) -> Result<()> {
        match (self.peek(1)?, self.peek(0)?) {
            (Val::Number(a), Val::Number(b)) => {
                self.pop()?;
                self.pop()?;
                self.push(op(a, b))
            }
            _ => Err(RuntimeErrorKind::OperandsMustBeNumbers),
        }
    }

    /// Numeric addition or string concatenation. A number next to a string is
    /// converted to text first.
    fn add(&mut self) -> Result<()> {
        let (a, b) = (self.peek(1)?, self.peek(0)?);
        if let (Val::Number(a), Val::Number(b)) = (a, b) {
            self.pop()?;
            self.pop()?;
            return self.push(Val::Number(a + b));
        }
        if !self.heap.is_string(a) && !self.heap.is_string(b) {
            return Err(RuntimeErrorKind::OperandsMustBeNumbersOrStrings);
        }
        let text = match (self.concat_piece(a), self.concat_piece(b)) {
            (Some(lhs), Some(rhs)) => lhs.into_owned() + rhs.as_ref(),
            _ => return Err(RuntimeErrorKind::OperandsMustBeNumbersOrStrings),
        };
        // both operands stay on the stack until the result exists
        let result = self.intern_owned(text);
        self.pop()?;
        self.pop()?;
        self.push(Val::Obj(result))
    }

    fn concat_piece(&self, v: Val) -> Option<Cow<'_, str>> {
        match v {
            Val::Number(n) => Some(Cow::Owned(format_number(n))),
            Val::Obj(r) => self.heap.str(r).map(Cow::Borrowed),
            _ => None,
        }
    }

    fn callee_slot(&self, argc: usize) -> Result<usize> {
        self.stack
            .len()
            .checked_sub(argc + 1)
            .ok_or_else(|| malformed("call with missing arguments"))
    }

    fn call_value(&mut self, callee: Val, argc: usize) -> Result<()> {
        let callee = match callee {
            Val::Obj(r) => r,
            _ => return Err(RuntimeErrorKind::NotCallable),
        };
        let slot = self.callee_slot(argc)?;
        match self.heap.get(callee) {
            Some(Obj::BoundMethod(bound)) => {
                let (receiver, method) = (bound.receiver, bound.method);
                self.stack[slot] = receiver;
                self.call(method, argc)
            }
            Some(Obj::Class(class)) => {
                let initializer = class.methods.get(self.init_key);
                let instance = self.alloc(Obj::Instance(Instance {
                    class: callee,
                    fields: Table::new(),
                }));
                self.stack[slot] = Val::Obj(instance);
                match initializer {
                    Some(Val::Obj(init)) => self.call(init, argc),
                    Some(_) => Err(malformed("initializer is not a closure")),
                    None if argc != 0 => Err(RuntimeErrorKind::ArityMismatch {
                        expected: 0,
                        got: argc,
                    }),
                    None => Ok(()),
                }
            }
            Some(Obj::Closure(_)) => self.call(callee, argc),
            Some(Obj::Native(native)) => {
                let function = native.function;
                let result = function(&self.stack[slot + 1..]);
                self.stack.truncate(slot);
                self.push(result)
            }
            _ => Err(RuntimeErrorKind::NotCallable),
        }
    }

    /// Push a frame for `closure` whose arguments are on top of the stack.
    fn call(&mut self, closure: ObjRef, argc: usize) -> Result<()> {
        let function = self
            .heap
            .get(closure)
            .and_then(Obj::as_closure)
            .map(|c| c.function)
            .ok_or(RuntimeErrorKind::NotCallable)?;
        let arity = function_of(&self.heap, function).arity as usize;
        if argc != arity {
            return Err(RuntimeErrorKind::ArityMismatch {
                expected: arity,
                got: argc,
            });
        }
        if self.frames.len() >= self.config.frames_max {
            return Err(RuntimeErrorKind::StackOverflow);
        }
        let slots = self.callee_slot(argc)?;
        self.frames.push(CallFrame {
            closure,
            function,
            ip: 0,
            slots,
        });
        Ok(())
    }

    /// Call method `name` on the receiver below the arguments. A field of the
    /// same name wins over the method.
    fn invoke(&mut self, name: Key, argc: usize) -> Result<()> {
        let receiver = self.peek(argc)?;
        let instance = self
            .instance_ref(receiver)
            .and_then(|r| self.heap[r].as_instance())
            .ok_or(RuntimeErrorKind::OnlyInstancesHaveMethods)?;
        let (field, class) = (instance.fields.get(name), instance.class);

        if let Some(value) = field {
            let slot = self.callee_slot(argc)?;
            self.stack[slot] = value;
            return self.call_value(value, argc);
        }
        self.invoke_from_class(class, name, argc)
    }

    fn invoke_from_class(&mut self, class: ObjRef, name: Key, argc: usize) -> Result<()> {
        let method = self
            .heap
            .get(class)
            .and_then(Obj::as_class)
            .and_then(|c| c.methods.get(name));
        match method {
            Some(Val::Obj(method)) => self.call(method, argc),
            _ => Err(RuntimeErrorKind::UndefinedProperty(self.name_of(name))),
        }
    }

    /// Replace the receiver on top of the stack with its method `name` bound
    /// to it.
    fn bind_method(&mut self, class: ObjRef, name: Key) -> Result<()> {
        let method = self
            .heap
            .get(class)
            .and_then(Obj::as_class)
            .and_then(|c| c.methods.get(name));
        let method = match method {
            Some(Val::Obj(method)) => method,
            _ => return Err(RuntimeErrorKind::UndefinedProperty(self.name_of(name))),
        };
        let receiver = self.peek(0)?;
        let bound = self.alloc(Obj::BoundMethod(BoundMethod { receiver, method }));
        self.pop()?;
        self.push(Val::Obj(bound))
    }

    fn get_property(&mut self, name: usize) -> Result<()> {
        let key = self.string_constant(name)?;
        let receiver = self.peek(0)?;
        let instance = self
            .instance_ref(receiver)
            .and_then(|r| self.heap[r].as_instance())
            .ok_or(RuntimeErrorKind::OnlyInstancesHaveProperties)?;
        let (field, class) = (instance.fields.get(key), instance.class);

        match field {
            Some(value) => {
                self.pop()?;
                self.push(value)
            }
            None => self.bind_method(class, key),
        }
    }

    fn set_property(&mut self, name: usize) -> Result<()> {
        let key = self.string_constant(name)?;
        let target = self.peek(1)?;
        let value = self.peek(0)?;
        let instance = self
            .instance_ref(target)
            .ok_or(RuntimeErrorKind::OnlyInstancesHaveFields)?;
        if let Some(instance) = self.heap[instance].as_instance_mut() {
            instance.fields.set(key, value);
        }
        self.heap.recharge(instance);

        self.pop()?;
        self.pop()?;
        self.push(value)
    }

    fn make_closure(&mut self, idx: usize) -> Result<()> {
        let constant = self.constant(idx)?;
        let (function, count) = constant
            .as_obj()
            .and_then(|r| {
                let f = self.heap.get(r)?.as_function()?;
                Some((r, f.upvalue_count))
            })
            .ok_or_else(|| malformed(format!("constant {} is not a function", idx)))?;
        let captures = self.read_captures(count)?;

        let closure = self.alloc(Obj::Closure(Closure {
            function,
            upvalues: Vec::with_capacity(count),
        }));
        self.push(Val::Obj(closure))?;

        for (is_local, index) in captures {
            let upvalue = if is_local {
                let slot = self.frame().slots + index;
                self.capture_upvalue(slot)
            } else {
                self.upvalue(index)?
            };
            if let Some(closure) = self.heap[closure].as_closure_mut() {
                closure.upvalues.push(upvalue);
            }
        }
        Ok(())
    }

    /// The open upvalue for `slot`, created if no closure captured it yet.
    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let pos = match self
            .open_upvalues
            .binary_search_by_key(&slot, |&(slot, _)| slot)
        {
            Ok(existing) => return self.open_upvalues[existing].1,
            Err(pos) => pos,
        };
        let upvalue = self.alloc(Obj::Upvalue(Upvalue::Open(slot)));
        self.open_upvalues.insert(pos, (slot, upvalue));
        upvalue
    }

    /// Close every open upvalue at or above stack slot `last`.
    fn close_upvalues(&mut self, last: usize) {
        while let Some(&(slot, upvalue)) = self.open_upvalues.last() {
            if slot < last {
                break;
            }
            let value = self.stack.get(slot).copied().unwrap_or_default();
            if let Some(upvalue) = self.heap.get_mut(upvalue).and_then(Obj::as_upvalue_mut) {
                *upvalue = Upvalue::Closed(value);
            }
            self.open_upvalues.pop();
        }
    }

    fn inherit(&mut self) -> Result<()> {
        let superclass = self.peek(1)?;
        let subclass = self.peek(0)?;
        let methods = self
            .class_ref(superclass)
            .and_then(|r| self.heap[r].as_class())
            .map(|c| c.methods.clone())
            .ok_or(RuntimeErrorKind::SuperclassMustBeClass)?;
        let subclass = self
            .class_ref(subclass)
            .ok_or_else(|| malformed("inheriting into a non-class"))?;

        // a one-time copy; later changes to the superclass are not seen
        if let Some(class) = self.heap[subclass].as_class_mut() {
            methods.add_all(&mut class.methods);
        }
        self.heap.recharge(subclass);
        self.pop()?;
        Ok(())
    }

    fn define_method(&mut self, name: usize) -> Result<()> {
        let key = self.string_constant(name)?;
        let method = self.peek(0)?;
        let class = self
            .class_ref(self.peek(1)?)
            .ok_or_else(|| malformed("method outside a class body"))?;
        if let Some(class) = self.heap[class].as_class_mut() {
            class.methods.set(key, method);
        }
        self.heap.recharge(class);
        self.pop()?;
        Ok(())
    }
}
