//! Human-readable listings of a [`Chunk`].

use std::fmt::{Display, Write};

use crate::chunk::Chunk;
use crate::inst::{Inst, Operand};

/// Renders constants for a listing.
pub trait ConstantFormat<V> {
    fn format_constant(&self, value: &V) -> String;

    /// Number of `(is_local, index)` pairs following an [`Inst::Closure`]
    /// that loads this constant.
    fn capture_count(&self, value: &V) -> usize;
}

/// Formats constants with their [`Display`] impl. Constants never capture.
pub struct DisplayConstants;

impl<V: Display> ConstantFormat<V> for DisplayConstants {
    fn format_constant(&self, value: &V) -> String {
        value.to_string()
    }

    fn capture_count(&self, _value: &V) -> usize {
        0
    }
}

/// Disassemble every instruction of the chunk under a `== name ==` header.
pub fn disassemble_chunk<V>(chunk: &Chunk<V>, name: &str, fmt: &impl ConstantFormat<V>) -> String {
    let mut out = format!("== {} ==\n", name);
    let mut offset = 0;
    while offset < chunk.len() {
        let (line, next) = disassemble_instruction(chunk, offset, fmt);
        out.push_str(&line);
        out.push('\n');
        offset = next;
    }
    out
}

/// Disassemble the instruction at `offset`. Returns the rendered text and the
/// offset of the next instruction.
pub fn disassemble_instruction<V>(
    chunk: &Chunk<V>,
    offset: usize,
    fmt: &impl ConstantFormat<V>,
) -> (String, usize) {
    let code = chunk.code();
    let mut out = format!("{:04} ", offset);
    match chunk.line(offset) {
        Some(line) if offset > 0 && chunk.line(offset - 1) == Some(line) => out.push_str("   | "),
        Some(line) => {
            let _ = write!(out, "{:>4} ", line);
        }
        None => out.push_str("   ? "),
    }

    let inst = match Inst::from_byte(code[offset]) {
        Some(inst) => inst,
        None => {
            let _ = write!(out, "Unknown opcode {}", code[offset]);
            return (out, offset + 1);
        }
    };
    let _ = write!(out, "{:<16}", inst);

    let mut ip = offset + 1;
    let mut captures = 0;
    for operand in inst.operands() {
        let width = operand.width();
        if ip + width > code.len() {
            out.push_str(" <truncated>");
            return (out, code.len());
        }
        let bytes = &code[ip..ip + width];
        ip += width;
        match operand {
            Operand::Const | Operand::ConstLong => {
                let idx = bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
                match chunk.constant(idx) {
                    Some(value) => {
                        captures = fmt.capture_count(value);
                        let _ = write!(out, " {:>4} '{}'", idx, fmt.format_constant(value));
                    }
                    None => {
                        let _ = write!(out, " {:>4} <bad constant>", idx);
                    }
                }
            }
            Operand::Slot | Operand::Count => {
                let _ = write!(out, " {:>4}", bytes[0]);
            }
            Operand::Jump | Operand::Loop => {
                let jump = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
                let target = if *operand == Operand::Jump {
                    ip + jump
                } else {
                    ip.wrapping_sub(jump)
                };
                let _ = write!(out, " {:>4} -> {}", offset, target);
            }
            Operand::Captures => {
                for _ in 0..captures {
                    if ip + 2 > code.len() {
                        out.push_str("\n<truncated>");
                        return (out, code.len());
                    }
                    let kind = if code[ip] != 0 { "local" } else { "upvalue" };
                    let _ = write!(out, "\n{:04}      |                     {} {}", ip, kind, code[ip + 1]);
                    ip += 2;
                }
            }
        }
    }

    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    (out, ip)
}
