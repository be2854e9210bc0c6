use bytes::Buf;

use crate::inst::Inst;

/// A cursor over a code sequence that advances an external instruction pointer.
///
/// The instruction pointer is borrowed rather than owned so that a call frame
/// can keep it while the code itself lives elsewhere.
pub struct InstReader<'a> {
    code: &'a [u8],
    ip: &'a mut usize,
}

impl<'a> InstReader<'a> {
    pub fn new(code: &'a [u8], ip: &'a mut usize) -> Self {
        Self { code, ip }
    }

    pub fn ip(&self) -> usize {
        *self.ip
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        (self.remaining() >= 1).then(|| self.get_u8())
    }

    /// Read a big-endian 2-byte operand.
    pub fn read_u16(&mut self) -> Option<u16> {
        (self.remaining() >= 2).then(|| self.get_u16())
    }

    /// Read a big-endian 3-byte operand.
    pub fn read_u24(&mut self) -> Option<u32> {
        (self.remaining() >= 3).then(|| self.get_uint(3) as u32)
    }

    /// Read an opcode byte. Returns `Err(byte)` if the byte is not an opcode.
    pub fn read_inst(&mut self) -> Option<Result<Inst, u8>> {
        self.read_u8().map(|b| Inst::from_byte(b).ok_or(b))
    }
}

impl Buf for InstReader<'_> {
    fn remaining(&self) -> usize {
        self.code.len().saturating_sub(*self.ip)
    }

    fn chunk(&self) -> &[u8] {
        &self.code[(*self.ip).min(self.code.len())..]
    }

    fn advance(&mut self, cnt: usize) {
        *self.ip += cnt
    }
}
