use std::fmt::Display;

use smol_str::SmolStr;

/// What went wrong during dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeErrorKind {
    OperandMustBeNumber,
    OperandsMustBeNumbers,
    OperandsMustBeNumbersOrStrings,
    UndefinedVariable(SmolStr),
    UndefinedProperty(SmolStr),
    ArityMismatch { expected: usize, got: usize },
    NotCallable,
    /// Call depth exceeded the frame limit
    StackOverflow,
    /// Operand stack exceeded its capacity
    OperandStackOverflow,
    OnlyInstancesHaveProperties,
    OnlyInstancesHaveFields,
    OnlyInstancesHaveMethods,
    SuperclassMustBeClass,
    /// The chunk does not decode to a valid instruction stream
    MalformedBytecode(String),
    /// Writing `print` output failed
    Output(String),
}

impl Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use RuntimeErrorKind::*;
        match self {
            OperandMustBeNumber => f.write_str("Operand must be a number."),
            OperandsMustBeNumbers => f.write_str("Operands must be numbers."),
            OperandsMustBeNumbersOrStrings => {
                f.write_str("Operands must be two numbers or two strings.")
            }
            UndefinedVariable(name) => write!(f, "Undefined variable '{}'.", name),
            UndefinedProperty(name) => write!(f, "Undefined property '{}'.", name),
            ArityMismatch { expected, got } => {
                write!(f, "Expected {} arguments but got {}.", expected, got)
            }
            NotCallable => f.write_str("Can only call functions and classes."),
            StackOverflow => f.write_str("Stack overflow."),
            OperandStackOverflow => f.write_str("Operand stack overflow."),
            OnlyInstancesHaveProperties => f.write_str("Only instances have properties."),
            OnlyInstancesHaveFields => f.write_str("Only instances have fields."),
            OnlyInstancesHaveMethods => f.write_str("Only instances have methods."),
            SuperclassMustBeClass => f.write_str("Superclass must be a class."),
            MalformedBytecode(what) => write!(f, "Malformed bytecode: {}.", what),
            Output(e) => write!(f, "Failed to write output: {}.", e),
        }
    }
}

/// One line of a runtime backtrace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub line: u32,
    /// `None` for the top-level script
    pub function: Option<SmolStr>,
}

impl Display for TraceFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.function {
            Some(name) => write!(f, "[line {}] in {}()", self.line, name),
            None => write!(f, "[line {}] in script", self.line),
        }
    }
}

/// A runtime error with the call frames active when it was raised, innermost
/// first.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub backtrace: Vec<TraceFrame>,
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        for frame in &self.backtrace {
            write!(f, "\n{}", frame)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: u32,
    pub message: String,
}

/// Compilation failed. Carries every diagnostic the compiler reported.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompileError {
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileError {
    pub fn new(line: u32, message: impl Into<String>) -> Self {
        Self {
            diagnostics: vec![Diagnostic {
                line,
                message: message.into(),
            }],
        }
    }
}

impl Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, d) in self.diagnostics.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "[line {}] Error: {}", d.line, d.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

#[derive(Debug, Clone, PartialEq)]
pub enum InterpretError {
    Compile(CompileError),
    Runtime(RuntimeError),
}

impl Display for InterpretError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterpretError::Compile(e) => e.fmt(f),
            InterpretError::Runtime(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for InterpretError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InterpretError::Compile(e) => Some(e),
            InterpretError::Runtime(e) => Some(e),
        }
    }
}

impl From<CompileError> for InterpretError {
    fn from(e: CompileError) -> Self {
        InterpretError::Compile(e)
    }
}

impl From<RuntimeError> for InterpretError {
    fn from(e: RuntimeError) -> Self {
        InterpretError::Runtime(e)
    }
}
