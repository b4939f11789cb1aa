//! The [`Instruction`] type and its text framing.

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::error::ProtocolError;

// ── Instruction ──────────────────────────────────────────────────

/// One protocol message: an opcode plus ordered arguments.
///
/// The codec validates framing only; argument count and meaning are
/// left to whoever handles the opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    opcode: String,
    args: Vec<String>,
}

impl Instruction {
    /// Build an instruction from an opcode and its arguments.
    pub fn new<O, I, A>(opcode: O, args: I) -> Self
    where
        O: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            opcode: opcode.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Build an instruction that carries no arguments.
    pub fn bare(opcode: impl Into<String>) -> Self {
        Self {
            opcode: opcode.into(),
            args: Vec::new(),
        }
    }

    pub fn opcode(&self) -> &str {
        &self.opcode
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Argument at `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    pub fn into_parts(self) -> (String, Vec<String>) {
        (self.opcode, self.args)
    }

    /// Wire form, e.g. `5.hello,2.世界,3.yes;`.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Append the wire form to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len_hint());
        write_element(dst, &self.opcode);
        for arg in &self.args {
            dst.put_u8(b',');
            write_element(dst, arg);
        }
        dst.put_u8(b';');
    }

    /// Parse exactly one frame from `raw`.
    ///
    /// Bytes after the terminating `;` are ignored. An unterminated frame
    /// is an error here; use [`InstructionCodec`](crate::codec::InstructionCodec)
    /// to wait for more bytes instead.
    pub fn decode(raw: &[u8]) -> Result<Self, ProtocolError> {
        match scan(raw)? {
            Scan::Complete(instruction, _) => Ok(instruction),
            Scan::Incomplete(reason) => Err(reason),
        }
    }

    fn encoded_len_hint(&self) -> usize {
        self.args
            .iter()
            .chain(std::iter::once(&self.opcode))
            .map(|e| e.len() + 8)
            .sum()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.opcode.chars().count(), self.opcode)?;
        for arg in &self.args {
            write!(f, ",{}.{}", arg.chars().count(), arg)?;
        }
        f.write_str(";")
    }
}

fn write_element(dst: &mut BytesMut, element: &str) {
    dst.put_slice(element.chars().count().to_string().as_bytes());
    dst.put_u8(b'.');
    dst.put_slice(element.as_bytes());
}

// ── Scanner ──────────────────────────────────────────────────────

/// Outcome of scanning a byte buffer for one frame.
#[derive(Debug)]
pub(crate) enum Scan {
    /// A full frame and the number of bytes it consumed.
    Complete(Instruction, usize),
    /// The buffer ended mid-frame; carries the error to report if no
    /// further bytes will arrive.
    Incomplete(ProtocolError),
}

/// Scan `raw` for a single `len.elem,...;` frame.
///
/// Returns `Err` only for bytes that can never become a valid frame.
pub(crate) fn scan(raw: &[u8]) -> Result<Scan, ProtocolError> {
    let mut cursor = 0;
    let mut elements = Vec::new();

    loop {
        // 1. length prefix
        let Some((length, start)) = length_prefix(raw, cursor)? else {
            return Ok(Scan::Incomplete(ProtocolError::MissingLengthDelimiter));
        };

        // 2. runes
        let Some(end) = rune_span(raw, start, length)? else {
            return Ok(Scan::Incomplete(ProtocolError::InvalidRune));
        };
        let element =
            String::from_utf8(raw[start..end].to_vec()).map_err(|_| ProtocolError::InvalidRune)?;
        elements.push(element);
        cursor = end;

        // 3. separator or terminator
        match raw.get(cursor) {
            None => return Ok(Scan::Incomplete(ProtocolError::MissingSeparator)),
            Some(b',') => cursor += 1,
            Some(b';') => {
                let mut elements = elements.into_iter();
                let opcode = elements.next().unwrap_or_default();
                let instruction = Instruction {
                    opcode,
                    args: elements.collect(),
                };
                return Ok(Scan::Complete(instruction, cursor + 1));
            }
            Some(_) => return Err(ProtocolError::MissingSeparator),
        }
    }
}

/// Parse the decimal prefix starting at `cursor`, returning the declared
/// rune count and the index of the first element byte.
fn length_prefix(raw: &[u8], cursor: usize) -> Result<Option<(usize, usize)>, ProtocolError> {
    for (i, byte) in raw.iter().enumerate().skip(cursor) {
        match byte {
            b'.' => {
                let digits = &raw[cursor..i];
                if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
                    return Err(ProtocolError::InvalidLength);
                }
                let length = std::str::from_utf8(digits)
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .ok_or(ProtocolError::InvalidLength)?;
                return Ok(Some((length, i + 1)));
            }
            b',' | b';' => return Err(ProtocolError::MissingLengthDelimiter),
            _ => {}
        }
    }
    Ok(None)
}

/// Walk `count` UTF-8 scalars from `start`; returns the end offset, or
/// `None` if the buffer runs out first.
fn rune_span(raw: &[u8], start: usize, count: usize) -> Result<Option<usize>, ProtocolError> {
    let mut cursor = start;
    for _ in 0..count {
        let Some(&lead) = raw.get(cursor) else {
            return Ok(None);
        };
        let width = utf8_width(lead).ok_or(ProtocolError::InvalidRune)?;
        if cursor + width > raw.len() {
            return Ok(None);
        }
        std::str::from_utf8(&raw[cursor..cursor + width])
            .map_err(|_| ProtocolError::InvalidRune)?;
        cursor += width;
    }
    Ok(Some(cursor))
}

/// Sequence width announced by a UTF-8 lead byte.
fn utf8_width(lead: u8) -> Option<usize> {
    match lead {
        0x00..=0x7F => Some(1),
        0xC2..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF4 => Some(4),
        _ => None,
    }
}

// ── Tests ────────────────────────────────────────────────────────
