//! Reassembly of chunked binary streams (`blob` … `end`).

use std::collections::HashMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::RgbaImage;
use tracing::trace;

use crate::error::DriftError;

/// Called once with the completed stream when it ends.
pub type OnEnd = Box<dyn FnOnce(&Stream) -> Result<(), DriftError> + Send>;

// ── Stream ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct Stream {
    id: u32,
    data: Vec<u8>,
    on_end: Option<OnEnd>,
}

impl Stream {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Replace the completion callback.
    pub fn on_end(&mut self, callback: OnEnd) {
        self.on_end = Some(callback);
    }

    /// Decode the accumulated bytes as a PNG or JPEG image.
    pub fn image(&self) -> Result<RgbaImage, DriftError> {
        Ok(image::load_from_memory(&self.data)?.to_rgba8())
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .field("on_end", &self.on_end.is_some())
            .finish()
    }
}

// ── Streams ──────────────────────────────────────────────────────

/// Open streams keyed by id.
#[derive(Debug, Default)]
pub struct Streams {
    streams: HashMap<u32, Stream>,
}

impl Streams {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stream with `id`, created if it does not exist yet.
    pub fn get(&mut self, id: u32) -> &mut Stream {
        self.streams.entry(id).or_insert_with(|| Stream::new(id))
    }

    pub fn contains(&self, id: u32) -> bool {
        self.streams.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Decode a base64 chunk and append it to stream `id`.
    pub fn append(&mut self, id: u32, encoded: &str) -> Result<(), DriftError> {
        let bytes = STANDARD.decode(encoded)?;
        trace!(stream = id, bytes = bytes.len(), "blob appended");
        self.get(id).append(&bytes);
        Ok(())
    }

    /// Remove stream `id` and run its callback. Returns `Ok(false)` when
    /// no such stream was open.
    pub fn end(&mut self, id: u32) -> Result<bool, DriftError> {
        let Some(mut stream) = self.streams.remove(&id) else {
            return Ok(false);
        };
        trace!(stream = id, bytes = stream.len(), "stream ended");
        if let Some(callback) = stream.on_end.take() {
            callback(&stream)?;
        }
        Ok(true)
    }

    /// Remove stream `id` without running its callback.
    pub fn delete(&mut self, id: u32) -> Option<Stream> {
        self.streams.remove(&id)
    }
}
