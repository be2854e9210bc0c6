mod object;

use std::fmt::{Display, Write};

pub use object::*;

use crate::gc::{Heap, ObjRef, Trace, Tracer};

/// A dynamically typed value. Numbers and booleans are stored inline; every
/// other value is a handle into the [`Heap`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Val {
    Nil,
    Bool(bool),
    Number(f64),
    Obj(ObjRef),
}

static_assertions::assert_eq_size!(Val, [u64; 2]);
static_assertions::assert_impl_all!(Val: Copy, Send);

impl Default for Val {
    fn default() -> Self {
        Val::Nil
    }
}

impl Val {
    /// Returns `true` if the val is [`Nil`].
    ///
    /// [`Nil`]: Val::Nil
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Returns `true` if the val is [`Bool`].
    ///
    /// [`Bool`]: Val::Bool
    pub fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(..))
    }

    pub fn as_bool(&self) -> Option<bool> {
        if let Self::Bool(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    /// Returns `true` if the val is [`Number`].
    ///
    /// [`Number`]: Val::Number
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Number(..))
    }

    pub fn as_number(&self) -> Option<f64> {
        if let Self::Number(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    pub fn is_obj(&self) -> bool {
        matches!(self, Self::Obj(..))
    }

    pub fn as_obj(&self) -> Option<ObjRef> {
        if let Self::Obj(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    /// The only falsy values are `nil` and `false`. Zero and the empty string
    /// are truthy.
    pub fn is_falsey(&self) -> bool {
        matches!(self, Val::Nil | Val::Bool(false))
    }
}

impl From<f64> for Val {
    fn from(n: f64) -> Self {
        Val::Number(n)
    }
}

impl From<bool> for Val {
    fn from(b: bool) -> Self {
        Val::Bool(b)
    }
}

impl From<ObjRef> for Val {
    fn from(r: ObjRef) -> Self {
        Val::Obj(r)
    }
}

impl Trace for Val {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        if let Val::Obj(r) = self {
            tracer.mark_object(*r)
        }
    }
}

/// Render a number like C's `%.17g`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return if n.is_sign_negative() { "-nan" } else { "nan" }.into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.into();
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0" } else { "0" }.into();
    }

    const PRECISION: i32 = 17;
    let sci = format!("{:.*e}", (PRECISION - 1) as usize, n);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);

    if exp < -4 || exp >= PRECISION {
        let mut out = strip_fraction_zeros(mantissa).to_string();
        let _ = write!(out, "e{}{:02}", if exp < 0 { '-' } else { '+' }, exp.abs());
        out
    } else {
        let decimals = (PRECISION - 1 - exp) as usize;
        strip_fraction_zeros(&format!("{:.*}", decimals, n)).to_string()
    }
}

fn strip_fraction_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// A value paired with the heap it lives in, for printing.
pub struct ValDisplay<'a> {
    pub(crate) heap: &'a Heap,
    pub(crate) val: Val,
}

impl Display for ValDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.val {
            Val::Nil => f.write_str("nil"),
            Val::Bool(b) => write!(f, "{}", b),
            Val::Number(n) => write!(f, "{}", n),
            Val::Obj(r) => match self.heap.get(r) {
                Some(obj) => self.fmt_obj(obj, f),
                None => write!(f, "<freed {:?}>", r),
            },
        }
    }
}

impl ValDisplay<'_> {
    fn fmt_obj(&self, obj: &Obj, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match obj {
            Obj::String(s) => f.write_str(s.as_str()),
            Obj::Function(func) => self.fmt_function(func, f),
            Obj::Closure(closure) => match self.heap.get(closure.function) {
                Some(Obj::Function(func)) => self.fmt_function(func, f),
                _ => f.write_str("<fn ?>"),
            },
            Obj::Upvalue(_) => f.write_str("upvalue"),
            Obj::Class(class) => f.write_str(self.heap.str(class.name).unwrap_or("?")),
            Obj::Instance(instance) => {
                let name = match self.heap.get(instance.class) {
                    Some(Obj::Class(class)) => self.heap.str(class.name),
                    _ => None,
                };
                write!(f, "{} instance", name.unwrap_or("?"))
            }
            Obj::BoundMethod(bound) => self.heap.display(Val::Obj(bound.method)).fmt(f),
            Obj::Native(_) => f.write_str("<native fn>"),
        }
    }

    fn fmt_function(&self, func: &Function, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match func.name.and_then(|name| self.heap.str(name)) {
            Some(name) => write!(f, "<fn {}>", name),
            None => f.write_str("<script>"),
        }
    }
}
