use std::fmt::Display;

use crate::inst::{Inst, InstReader};

/// Constant indices below this value use the 2-byte [`Inst::Constant`] form.
pub const SHORT_CONSTANT_LIMIT: usize = 255;

/// Largest index addressable by [`Inst::ConstantLong`].
pub const MAX_CONSTANTS: usize = 1 << 24;

/// A function's compiled bytecode plus its line-number table and constant pool.
///
/// `V` is the constant type. Slot 0 of the pool always holds `V::default()`
/// as a sentinel.
#[derive(Debug, Clone)]
pub struct Chunk<V> {
    code: Vec<u8>,
    /// One entry per byte in `code`
    lines: Vec<u32>,
    constants: Vec<V>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    TooManyConstants,
    JumpTooLarge(usize),
    LoopTooLarge(usize),
}

impl Display for ChunkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkError::TooManyConstants => f.write_str("Too many constants in one chunk."),
            ChunkError::JumpTooLarge(n) => write!(f, "Too much code to jump over ({} bytes).", n),
            ChunkError::LoopTooLarge(n) => write!(f, "Loop body too large ({} bytes).", n),
        }
    }
}

impl std::error::Error for ChunkError {}

impl<V: Default> Chunk<V> {
    pub fn new() -> Self {
        Chunk {
            code: vec![],
            lines: vec![],
            constants: vec![V::default()],
        }
    }
}

impl<V: Default> Default for Chunk<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Chunk<V> {
    pub fn write(&mut self, byte: u8, line: u32) {
        self.code.push(byte);
        self.lines.push(line);
    }

    pub fn write_inst(&mut self, inst: Inst, line: u32) -> &mut Self {
        self.write(inst as u8, line);
        self
    }

    /// Write an instruction followed by 1-byte operands.
    pub fn emit(&mut self, inst: Inst, operands: &[u8], line: u32) -> &mut Self {
        self.write_inst(inst, line);
        for &b in operands {
            self.write(b, line);
        }
        self
    }

    /// Record a constant in the pool and return its index.
    pub fn add_constant(&mut self, value: V) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    /// Add a constant and emit the instruction loading it.
    ///
    /// Indices below [`SHORT_CONSTANT_LIMIT`] use [`Inst::Constant`] with a
    /// 1-byte index, larger ones [`Inst::ConstantLong`] with 3 big-endian bytes.
    pub fn write_constant(&mut self, value: V, line: u32) -> Result<usize, ChunkError> {
        if self.constants.len() >= MAX_CONSTANTS {
            return Err(ChunkError::TooManyConstants);
        }
        let idx = self.add_constant(value);
        self.write_constant_index(idx, line)?;
        Ok(idx)
    }

    /// Emit the load instruction for an existing constant index.
    pub fn write_constant_index(&mut self, idx: usize, line: u32) -> Result<(), ChunkError> {
        if idx < SHORT_CONSTANT_LIMIT {
            self.emit(Inst::Constant, &[idx as u8], line);
        } else if idx < MAX_CONSTANTS {
            let [_, hi, mid, lo] = (idx as u32).to_be_bytes();
            self.emit(Inst::ConstantLong, &[hi, mid, lo], line);
        } else {
            return Err(ChunkError::TooManyConstants);
        }
        Ok(())
    }

    /// Emit a forward jump with a placeholder offset. Returns the offset of the
    /// placeholder, to be given to [`Self::patch_jump`].
    pub fn emit_jump(&mut self, inst: Inst, line: u32) -> usize {
        self.emit(inst, &[0xff, 0xff], line);
        self.code.len() - 2
    }

    /// Point a previously emitted jump at the current end of code.
    pub fn patch_jump(&mut self, at: usize) -> Result<(), ChunkError> {
        let jump = self.code.len() - at - 2;
        let offset = u16::try_from(jump).map_err(|_| ChunkError::JumpTooLarge(jump))?;
        self.code[at..at + 2].copy_from_slice(&offset.to_be_bytes());
        Ok(())
    }

    /// Emit a backward jump to `loop_start`.
    pub fn emit_loop(&mut self, loop_start: usize, line: u32) -> Result<(), ChunkError> {
        let jump = self.code.len() + 3 - loop_start;
        let offset = u16::try_from(jump).map_err(|_| ChunkError::LoopTooLarge(jump))?;
        let [hi, lo] = offset.to_be_bytes();
        self.emit(Inst::Loop, &[hi, lo], line);
        Ok(())
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn lines(&self) -> &[u32] {
        &self.lines
    }

    /// Source line of the byte at `offset`
    pub fn line(&self, offset: usize) -> Option<u32> {
        self.lines.get(offset).copied()
    }

    pub fn constants(&self) -> &[V] {
        &self.constants
    }

    pub fn constant(&self, idx: usize) -> Option<&V> {
        self.constants.get(idx)
    }

    /// Start reading instructions at `*ip`, advancing it as bytes are consumed.
    pub fn reader<'a>(&'a self, ip: &'a mut usize) -> InstReader<'a> {
        InstReader::new(&self.code, ip)
    }
}
