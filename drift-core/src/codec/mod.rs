//! `tokio_util` codec for framed instruction I/O.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{DriftError, ProtocolError};
use crate::protocol::instruction::{Scan, scan};
use crate::protocol::{Instruction, MAX_INSTRUCTION_LENGTH};

/// Streaming codec for `len.elem,...;` frames.
///
/// The decoder waits for more bytes while a frame is merely incomplete and
/// fails only on bytes that can never form a frame, or on a pending frame
/// that grows past [`MAX_INSTRUCTION_LENGTH`].
#[derive(Debug, Clone, Copy)]
pub struct InstructionCodec {
    max_length: usize,
}

impl InstructionCodec {
    pub fn new() -> Self {
        Self {
            max_length: MAX_INSTRUCTION_LENGTH,
        }
    }

    /// Override the frame size limit.
    pub fn with_max_length(max_length: usize) -> Self {
        Self { max_length }
    }
}

impl Default for InstructionCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for InstructionCodec {
    type Item = Instruction;
    type Error = DriftError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        match scan(src)? {
            Scan::Complete(instruction, used) => {
                if used > self.max_length {
                    return Err(too_large(used, self.max_length));
                }
                src.advance(used);
                Ok(Some(instruction))
            }
            Scan::Incomplete(_) if src.len() > self.max_length => {
                Err(too_large(src.len(), self.max_length))
            }
            Scan::Incomplete(_) => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(instruction) => Ok(Some(instruction)),
            None if src.is_empty() => Ok(None),
            // Peer hung up mid-frame.
            None => match scan(src)? {
                Scan::Incomplete(reason) => Err(reason.into()),
                Scan::Complete(..) => Ok(None),
            },
        }
    }
}

impl Encoder<Instruction> for InstructionCodec {
    type Error = DriftError;

    fn encode(&mut self, item: Instruction, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode_into(dst);
        Ok(())
    }
}

fn too_large(size: usize, max: usize) -> DriftError {
    ProtocolError::FrameTooLarge { size, max }.into()
}

// ── Tests ────────────────────────────────────────────────────────
