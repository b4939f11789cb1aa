//! Pixel layers and the per-display layer table.
//!
//! Layer `0` is the default layer and always exists. Positive ids are
//! visible layers sized like layer `0` when first referenced; negative ids
//! are off-screen buffers that start empty and grow to fit whatever is
//! drawn into them.

use std::collections::HashMap;

use image::{Pixel, Rgba, RgbaImage, imageops};
use tracing::{trace, warn};

use crate::geom::{Rect, clamp_i32};

/// Layer id of the default layer.
pub const DEFAULT_LAYER: i32 = 0;

/// Largest width or height a layer may take.
pub const MAX_LAYER_DIMENSION: u32 = 8192;

// ── CompositeOp ──────────────────────────────────────────────────

/// How source pixels combine with destination pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositeOp {
    /// Source replaces destination, alpha included.
    Replace,
    /// Source alpha-blended over destination.
    #[default]
    Over,
}

impl CompositeOp {
    pub const MASK_REPLACE: u32 = 0xC;
    pub const MASK_OVER: u32 = 0xE;

    /// Map a wire channel mask. Unsupported masks fall back to
    /// [`CompositeOp::Over`].
    pub fn from_mask(mask: u32) -> Self {
        match mask {
            Self::MASK_REPLACE => Self::Replace,
            Self::MASK_OVER => Self::Over,
            other => {
                warn!(mask = other, "unsupported composite mask, using over");
                Self::Over
            }
        }
    }
}

// ── Layer ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Layer {
    id: i32,
    image: RgbaImage,
    autosize: bool,
    modified: Option<Rect>,
    path: Vec<Rect>,
}

impl Layer {
    /// Sizes above [`MAX_LAYER_DIMENSION`] are capped.
    pub fn new(id: i32, width: u32, height: u32) -> Self {
        Self {
            id,
            image: RgbaImage::new(
                width.min(MAX_LAYER_DIMENSION),
                height.min(MAX_LAYER_DIMENSION),
            ),
            autosize: id < 0,
            modified: None,
            path: Vec::new(),
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn bounds(&self) -> Rect {
        Rect::sized(self.image.width(), self.image.height())
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Buffers (negative ids) grow on demand and are never shown.
    pub fn is_buffer(&self) -> bool {
        self.autosize
    }

    pub fn is_modified(&self) -> bool {
        self.modified.is_some()
    }

    /// Region touched since the last [`take_modified`](Self::take_modified).
    pub fn modified(&self) -> Option<Rect> {
        self.modified
    }

    pub fn take_modified(&mut self) -> Option<Rect> {
        self.modified.take()
    }

    pub fn mark_modified(&mut self, area: Rect) {
        self.modified = Some(match self.modified {
            Some(current) => current.union(&area),
            None => area,
        });
    }

    /// Resize, keeping the overlapping pixels. Sizes above
    /// [`MAX_LAYER_DIMENSION`] are refused and leave the layer as it was.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if width == self.width() && height == self.height() {
            return true;
        }
        if width > MAX_LAYER_DIMENSION || height > MAX_LAYER_DIMENSION {
            warn!(layer = self.id, width, height, "layer size over limit, ignored");
            return false;
        }
        let before = self.bounds();
        let mut resized = RgbaImage::new(width, height);
        imageops::replace(&mut resized, &self.image, 0, 0);
        self.image = resized;
        self.mark_modified(before.union(&self.bounds()));
        trace!(layer = self.id, width, height, "layer resized");
        true
    }

    /// Grow a buffer so `rect` fits. No effect on visible layers.
    pub fn fit_rect(&mut self, rect: Rect) {
        if !self.autosize || rect.is_empty() {
            return;
        }
        let width = self.width().max(rect.right().max(0) as u32);
        let height = self.height().max(rect.bottom().max(0) as u32);
        // Over the limit the buffer keeps its size and the draw is clipped.
        self.resize(width, height);
    }

    /// Copy of the pixels under `area`, clipped to the layer. `None` when
    /// nothing of `area` lies inside the layer.
    pub fn region(&self, area: Rect) -> Option<(Rect, RgbaImage)> {
        let clipped = area.intersect(&self.bounds())?;
        let pixels = imageops::crop_imm(
            &self.image,
            clipped.x as u32,
            clipped.y as u32,
            clipped.width as u32,
            clipped.height as u32,
        )
        .to_image();
        Some((clipped, pixels))
    }

    /// Composite `source` with its top-left corner at `(x, y)`. Pixels that
    /// fall outside the layer are dropped.
    pub fn draw(&mut self, x: i32, y: i32, source: &RgbaImage, op: CompositeOp) {
        let target = Rect::new(x, y, clamp_i32(source.width()), clamp_i32(source.height()));
        self.fit_rect(target);
        let Some(touched) = target.intersect(&self.bounds()) else {
            return;
        };
        match op {
            CompositeOp::Replace => imageops::replace(&mut self.image, source, x.into(), y.into()),
            CompositeOp::Over => imageops::overlay(&mut self.image, source, x.into(), y.into()),
        }
        self.mark_modified(touched);
    }

    /// Append a rectangle to the current path.
    pub fn rect(&mut self, area: Rect) {
        self.path.push(area);
    }

    /// Fill the current path with `color`, then close it.
    pub fn fill(&mut self, color: Rgba<u8>, op: CompositeOp) {
        let path = std::mem::take(&mut self.path);
        for area in path {
            self.fit_rect(area);
            let Some(clipped) = area.intersect(&self.bounds()) else {
                continue;
            };
            for y in clipped.y..clipped.bottom() {
                for x in clipped.x..clipped.right() {
                    let pixel = self.image.get_pixel_mut(x as u32, y as u32);
                    match op {
                        CompositeOp::Replace => *pixel = color,
                        CompositeOp::Over => pixel.blend(&color),
                    }
                }
            }
            self.mark_modified(clipped);
        }
    }

    pub fn path(&self) -> &[Rect] {
        &self.path
    }
}

// ── Layers ───────────────────────────────────────────────────────

/// Every layer of one display, keyed by id.
#[derive(Debug, Clone)]
pub struct Layers {
    layers: HashMap<i32, Layer>,
}

impl Layers {
    pub fn new(width: u32, height: u32) -> Self {
        let mut layers = HashMap::new();
        layers.insert(DEFAULT_LAYER, Layer::new(DEFAULT_LAYER, width, height));
        Self { layers }
    }

    pub fn get(&self, id: i32) -> Option<&Layer> {
        self.layers.get(&id)
    }

    /// The layer with `id`, created on first reference.
    pub fn get_mut(&mut self, id: i32) -> &mut Layer {
        let (width, height) = match self.layers.get(&DEFAULT_LAYER) {
            Some(default) if id > 0 => (default.width(), default.height()),
            _ => (0, 0),
        };
        self.layers.entry(id).or_insert_with(|| {
            trace!(layer = id, width, height, "layer created");
            Layer::new(id, width, height)
        })
    }

    pub fn default_layer(&mut self) -> &mut Layer {
        self.get_mut(DEFAULT_LAYER)
    }

    pub fn contains(&self, id: i32) -> bool {
        self.layers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Remove a layer. The default layer cannot be disposed.
    pub fn dispose(&mut self, id: i32) {
        if id == DEFAULT_LAYER {
            return;
        }
        if let Some(removed) = self.layers.remove(&id) {
            self.default_layer().mark_modified(removed.bounds());
        }
    }

    /// Copy `area` of layer `src` to `(x, y)` of layer `dst`. The source
    /// rectangle is clipped first and the destination shifted to match.
    pub fn copy(&mut self, src: i32, area: Rect, dst: i32, x: i32, y: i32, op: CompositeOp) {
        let Some((clipped, pixels)) = self.get_mut(src).region(area) else {
            trace!(src, dst, ?area, "copy outside source, skipped");
            return;
        };
        let x = x.saturating_add(clipped.x.saturating_sub(area.x));
        let y = y.saturating_add(clipped.y.saturating_sub(area.y));
        self.get_mut(dst).draw(x, y, &pixels, op);
    }
}
