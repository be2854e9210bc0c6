pub mod chunk;
pub mod disasm;
pub mod inst;


pub use chunk::{Chunk, ChunkError};
pub use inst::Inst;
