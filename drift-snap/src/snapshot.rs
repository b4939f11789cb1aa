//! Writes the remote canvas to a PNG file whenever it changes.

use std::path::{Path, PathBuf};

use drift_core::CanvasSnapshot;
use image::{ImageError, ImageFormat, ImageResult};
use tracing::debug;

pub struct SnapshotWriter {
    path: PathBuf,
    written: u64,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Timestamp of the last snapshot written, `0` if none.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Write `snapshot` unless it is empty or already on disk. The file is
    /// replaced atomically so readers never see a partial PNG.
    pub fn write_if_changed(&mut self, snapshot: &CanvasSnapshot) -> ImageResult<bool> {
        if snapshot.last_update == self.written
            || snapshot.width() == 0
            || snapshot.height() == 0
        {
            return Ok(false);
        }

        let partial = self.path.with_extension("png.partial");
        snapshot
            .image
            .save_with_format(&partial, ImageFormat::Png)?;
        std::fs::rename(&partial, &self.path).map_err(ImageError::IoError)?;

        self.written = snapshot.last_update;
        debug!(
            path = %self.path.display(),
            width = snapshot.width(),
            height = snapshot.height(),
            "snapshot written"
        );
        Ok(true)
    }
}
