//! Wire-level protocol definitions.
//!
//! Every message is an [`Instruction`]: an opcode followed by string
//! arguments, framed as length-prefixed elements.
//!
//! ```text
//! 4.size,1.0,4.1024,3.768;
//! │ │    │ │
//! │ │    │ └─ element (runes)
//! │ │    └─── rune count of the element
//! │ └──────── opcode
//! └────────── rune count of the opcode
//! ```
//!
//! Lengths count Unicode scalar values, not bytes, so `2.世界` is a valid
//! element. Elements are never escaped; the length prefix alone decides
//! where an element ends.

pub mod instruction;

pub use instruction::Instruction;

/// Largest frame (in bytes) accepted from the peer.
pub const MAX_INSTRUCTION_LENGTH: usize = 8192;

/// Opcodes used by the session layer itself.
pub mod opcode {
    pub const SELECT: &str = "select";
    pub const ARGS: &str = "args";
    pub const SIZE: &str = "size";
    pub const AUDIO: &str = "audio";
    pub const VIDEO: &str = "video";
    pub const IMAGE: &str = "image";
    pub const CONNECT: &str = "connect";
    pub const READY: &str = "ready";
    pub const NOP: &str = "nop";
    pub const DISCONNECT: &str = "disconnect";
    pub const ERROR: &str = "error";
    pub const BLOB: &str = "blob";
    pub const SYNC: &str = "sync";
    pub const MOUSE: &str = "mouse";
    pub const KEY: &str = "key";
}
