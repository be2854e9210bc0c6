mod util;

use enum_ordinalize::Ordinalize;

pub use util::*;

/// The kind of an operand following an opcode byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    /// 1-byte index into the constant pool
    Const,
    /// 3-byte big-endian index into the constant pool
    ConstLong,
    /// 1-byte stack slot or upvalue index
    Slot,
    /// 1-byte argument count
    Count,
    /// 2-byte big-endian forward jump offset
    Jump,
    /// 2-byte big-endian backward jump offset
    Loop,
    /// `(is_local, index)` byte pairs, one per upvalue of the closure's function
    Captures,
}

impl Operand {
    /// Encoded width in bytes. [`Operand::Captures`] depends on the function and
    /// reports `0` here.
    pub const fn width(self) -> usize {
        match self {
            Operand::Const | Operand::Slot | Operand::Count => 1,
            Operand::Jump | Operand::Loop => 2,
            Operand::ConstLong => 3,
            Operand::Captures => 0,
        }
    }
}

macro_rules! define_inst {
    (
        $(#[$meta:meta])*
        // type names
        $ty_vis:vis $type:ident,
        // instruction variant definition
        $(
            // metadata for this variant. Will be put inside the final enum
            $(#[$variant_meta:meta])*
            // variant name
            $name:ident
            // operands, in encoding order
            $(($($param_name:ident : $param:ident),+))?
        ),* $(,)?
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Copy, Ordinalize)]
        #[repr(u8)]
        $ty_vis enum $type {$(
            $(#[$variant_meta])*
            $name
        ),*}

        impl $type {
            /// Returns the operands following this instruction, in encoding order
            pub fn operands(self) -> &'static [Operand] {
                match self {$(
                    $type::$name => &[$($(Operand::$param),+)?]
                ),*}
            }

            /// Returns the names of the operands of this instruction
            pub fn operand_names(self) -> &'static [&'static str] {
                match self {$(
                    $type::$name => &[$($(stringify!($param_name)),+)?]
                ),*}
            }

            pub fn name(self) -> &'static str {
                match self {$(
                    $type::$name => stringify!($name)
                ),*}
            }
        }

        impl ::std::fmt::Display for $type {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(self.name())
            }
        }
    };
}

impl Inst {
    /// Decode an opcode byte.
    pub fn from_byte(byte: u8) -> Option<Inst> {
        Inst::from_ordinal(byte)
    }

    /// Encoded width of the fixed operands of this instruction, not counting
    /// the capture pairs of [`Inst::Closure`].
    pub fn operand_width(self) -> usize {
        self.operands().iter().map(|op| op.width()).sum()
    }
}

// instruction definition.
//
// Each line is an instruction followed by its operands. Stack effects are
// written as `[before] -> [after]` on the stack top.
define_inst! {
    /// The instruction set shared by code generators and the interpreter.
    pub Inst,

    // constants
    /// Push the constant at a 1-byte index. `[] -> [c]`
    Constant(idx: Const),
    /// Push the constant at a 3-byte index. `[] -> [c]`
    ConstantLong(idx: ConstLong),
    /// Push nil
    Nil,
    /// Push boolean true
    True,
    /// Push boolean false
    False,

    // stack manipulation
    /// Pop a value from stack
    Pop,

    // load/stores
    /// Push the value in the `slot`th slot of the current frame
    GetLocal(slot: Slot),
    /// Store the stack top into the `slot`th slot of the current frame, leaving it on the stack
    SetLocal(slot: Slot),
    /// Push the global named by the constant
    GetGlobal(name: Const),
    /// Define a global named by the constant with the popped value
    DefineGlobal(name: Const),
    /// Assign an existing global, leaving the value on the stack
    SetGlobal(name: Const),
    /// Push the value of the `slot`th upvalue of the current closure
    GetUpvalue(slot: Slot),
    /// Store the stack top into the `slot`th upvalue, leaving it on the stack
    SetUpvalue(slot: Slot),

    // properties
    /// `[instance] -> [value]`. Fields shadow methods; methods are bound to the receiver.
    GetProperty(name: Const),
    /// `[instance, value] -> [value]`
    SetProperty(name: Const),
    /// `[instance, superclass] -> [bound method]`
    GetSuper(name: Const),

    // comparison and arithmetic
    Equal,
    Greater,
    Less,
    /// Numbers add, strings concatenate, a string and a number concatenate
    /// with the number rendered as text
    Add,
    Subtract,
    Multiply,
    Divide,
    /// Logical negation of the truthiness of the stack top
    Not,
    /// Arithmetic negation
    Negate,

    /// Pop and print a value
    Print,

    // control flow
    /// Jump forward unconditionally
    Jump(offset: Jump),
    /// Jump forward if the stack top is _falsy_. The condition is not popped.
    JumpIfFalse(offset: Jump),
    /// Jump backward unconditionally
    Loop(offset: Loop),

    // function
    /// Call a value. The stack contains first the callee and then `argc`
    /// arguments.
    ///
    /// ```plaintext
    /// (stack bottom) ..., callee, arg0, arg1, ..., argN (stack top)
    ///                    |-----> These values are popped
    ///                    |<-- This value is pushed
    /// (stack bottom) ..., result (stack top)
    /// ```
    Call(argc: Count),
    /// Look up a method or field on the receiver below the arguments and call it.
    Invoke(name: Const, argc: Count),
    /// Call a superclass method. `[receiver, args..., superclass] -> [result]`
    SuperInvoke(name: Const, argc: Count),
    /// Create a closure over the function constant, followed by one
    /// `(is_local, index)` pair for each of its upvalues.
    Closure(function: Const, captures: Captures),
    /// Close the upvalue over the stack top, then pop it
    CloseUpvalue,

    // classes
    /// Push a new class with the given name
    Class(name: Const),
    /// `[superclass, subclass] -> [superclass]`. Copies every superclass method into the subclass.
    Inherit,
    /// `[class, closure] -> [class]`
    Method(name: Const),

    /// Return from the current function with the popped value
    Return,
}
