//! Deferred compositor and the published canvas.
//!
//! Drawing instructions become [`Operation`]s queued on the [`Display`].
//! [`Display::flush`] applies the queue in order and, when the default
//! layer changed, recomposes the touched region into the canvas together
//! with the cursor overlay. Readers take [`CanvasSnapshot`]s, which are
//! never mutated by later flushes.

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use image::{Rgba, RgbaImage, imageops};
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::geom::{Point, Rect, clamp_i32};
use crate::layer::{CompositeOp, DEFAULT_LAYER, Layer, Layers, MAX_LAYER_DIMENSION};

// ── Operation ────────────────────────────────────────────────────

/// One unit of deferred compositor work.
#[derive(Debug, Clone)]
pub enum Operation {
    Resize {
        layer: i32,
        width: u32,
        height: u32,
    },
    Copy {
        src: i32,
        area: Rect,
        dst: i32,
        x: i32,
        y: i32,
        op: CompositeOp,
    },
    Draw {
        layer: i32,
        x: i32,
        y: i32,
        image: RgbaImage,
        op: CompositeOp,
    },
    Rect {
        layer: i32,
        area: Rect,
    },
    Fill {
        layer: i32,
        color: Rgba<u8>,
        op: CompositeOp,
    },
    Dispose {
        layer: i32,
    },
    SetCursor {
        hotspot: Point,
        src: i32,
        area: Rect,
    },
    MoveCursor {
        position: Point,
    },
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Self::Resize { .. } => "resize",
            Self::Copy { .. } => "copy",
            Self::Draw { .. } => "draw",
            Self::Rect { .. } => "rect",
            Self::Fill { .. } => "fill",
            Self::Dispose { .. } => "dispose",
            Self::SetCursor { .. } => "set-cursor",
            Self::MoveCursor { .. } => "move-cursor",
        }
    }
}

// ── CanvasSnapshot ───────────────────────────────────────────────

/// The composed frame at some point in time.
#[derive(Debug, Clone)]
pub struct CanvasSnapshot {
    pub image: Arc<RgbaImage>,
    /// Monotonic nanoseconds of the last canvas change; `0` if never.
    pub last_update: u64,
}

impl CanvasSnapshot {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

// ── Internals ────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Cursor {
    image: RgbaImage,
    hotspot: Point,
    position: Point,
}

impl Cursor {
    /// Where the overlay lands on the canvas.
    fn bounds(&self) -> Rect {
        Rect::new(
            self.position.x.saturating_sub(self.hotspot.x),
            self.position.y.saturating_sub(self.hotspot.y),
            clamp_i32(self.image.width()),
            clamp_i32(self.image.height()),
        )
    }
}

struct Compositor {
    layers: Layers,
    pending: VecDeque<Operation>,
    cursor: Cursor,
}

impl Compositor {
    fn apply(&mut self, operation: Operation) {
        trace!(op = operation.name(), "applying");
        match operation {
            Operation::Resize {
                layer,
                width,
                height,
            } => {
                self.layers.get_mut(layer).resize(width, height);
            }
            Operation::Copy {
                src,
                area,
                dst,
                x,
                y,
                op,
            } => self.layers.copy(src, area, dst, x, y, op),
            Operation::Draw {
                layer,
                x,
                y,
                image,
                op,
            } => self.layers.get_mut(layer).draw(x, y, &image, op),
            Operation::Rect { layer, area } => self.layers.get_mut(layer).rect(area),
            Operation::Fill { layer, color, op } => self.layers.get_mut(layer).fill(color, op),
            Operation::Dispose { layer } => self.layers.dispose(layer),
            Operation::SetCursor { hotspot, src, area } => {
                let image = self
                    .layers
                    .get_mut(src)
                    .region(area)
                    .map(|(_, pixels)| pixels)
                    .unwrap_or_default();
                let before = self.cursor.bounds();
                self.cursor.image = image;
                self.cursor.hotspot = hotspot;
                self.invalidate_cursor(before);
            }
            Operation::MoveCursor { position } => {
                let before = self.cursor.bounds();
                self.cursor.position = position;
                self.invalidate_cursor(before);
            }
        }
    }

    fn invalidate_cursor(&mut self, before: Rect) {
        let after = self.cursor.bounds();
        let default = self.layers.default_layer();
        for area in [before, after] {
            if !area.is_empty() {
                default.mark_modified(area);
            }
        }
    }
}

struct Canvas {
    image: Arc<RgbaImage>,
    last_update: u64,
}

struct Inner {
    compositor: Mutex<Compositor>,
    canvas: RwLock<Canvas>,
}

// ── Display ──────────────────────────────────────────────────────

/// Shared handle to the layer stack and canvas. Cloning is cheap.
///
/// Locks are always taken compositor first, canvas second.
#[derive(Clone)]
pub struct Display {
    inner: Arc<Inner>,
}

impl Default for Display {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl Display {
    /// A display whose default layer is `width` × `height`, capped at
    /// [`MAX_LAYER_DIMENSION`] per side.
    pub fn new(width: u32, height: u32) -> Self {
        let width = width.min(MAX_LAYER_DIMENSION);
        let height = height.min(MAX_LAYER_DIMENSION);
        Self {
            inner: Arc::new(Inner {
                compositor: Mutex::new(Compositor {
                    layers: Layers::new(width, height),
                    pending: VecDeque::new(),
                    cursor: Cursor::default(),
                }),
                canvas: RwLock::new(Canvas {
                    image: Arc::new(RgbaImage::new(width, height)),
                    last_update: 0,
                }),
            }),
        }
    }

    /// Queue an operation for the next [`flush`](Self::flush).
    pub fn push(&self, operation: Operation) {
        self.inner.compositor.lock().pending.push_back(operation);
    }

    pub fn pending(&self) -> usize {
        self.inner.compositor.lock().pending.len()
    }

    pub fn resize(&self, layer: i32, width: u32, height: u32) {
        self.push(Operation::Resize {
            layer,
            width,
            height,
        });
    }

    pub fn copy(&self, src: i32, area: Rect, dst: i32, x: i32, y: i32, op: CompositeOp) {
        self.push(Operation::Copy {
            src,
            area,
            dst,
            x,
            y,
            op,
        });
    }

    pub fn draw(&self, layer: i32, x: i32, y: i32, image: RgbaImage, op: CompositeOp) {
        self.push(Operation::Draw {
            layer,
            x,
            y,
            image,
            op,
        });
    }

    pub fn rect(&self, layer: i32, area: Rect) {
        self.push(Operation::Rect { layer, area });
    }

    pub fn fill(&self, layer: i32, color: Rgba<u8>, op: CompositeOp) {
        self.push(Operation::Fill { layer, color, op });
    }

    pub fn dispose(&self, layer: i32) {
        self.push(Operation::Dispose { layer });
    }

    pub fn set_cursor(&self, hotspot: Point, src: i32, area: Rect) {
        self.push(Operation::SetCursor { hotspot, src, area });
    }

    pub fn move_cursor(&self, position: Point) {
        self.push(Operation::MoveCursor { position });
    }

    /// Apply every queued operation and push default-layer changes to the
    /// canvas. Returns the recomposed region, or `None` when the default
    /// layer was untouched.
    pub fn flush(&self) -> Option<Rect> {
        let mut compositor = self.inner.compositor.lock();
        let compositor = &mut *compositor;
        let applied = compositor.pending.len();
        while let Some(operation) = compositor.pending.pop_front() {
            compositor.apply(operation);
        }

        let default = compositor.layers.default_layer();
        let modified = default.take_modified()?;
        let bounds = default.bounds();

        let mut canvas = self.inner.canvas.write();
        let image = Arc::make_mut(&mut canvas.image);
        let area = if image.dimensions() != default.image().dimensions() {
            *image = RgbaImage::new(default.width(), default.height());
            Some(bounds)
        } else {
            modified.intersect(&bounds)
        };
        if let Some(area) = area {
            recompose(image, default, &compositor.cursor, area);
        }
        canvas.last_update = next_timestamp(canvas.last_update);

        let area = area.unwrap_or_default();
        trace!(applied, ?area, "display flushed");
        Some(area)
    }

    /// The current canvas. Cheap: the pixels are shared, not copied.
    pub fn canvas(&self) -> CanvasSnapshot {
        let canvas = self.inner.canvas.read();
        CanvasSnapshot {
            image: Arc::clone(&canvas.image),
            last_update: canvas.last_update,
        }
    }

    pub fn last_update(&self) -> u64 {
        self.inner.canvas.read().last_update
    }

    /// Inspect a layer as of the last flush.
    pub fn with_layer<R>(&self, id: i32, f: impl FnOnce(&Layer) -> R) -> Option<R> {
        self.inner.compositor.lock().layers.get(id).map(f)
    }

    pub fn size(&self) -> (u32, u32) {
        self.with_layer(DEFAULT_LAYER, |layer| (layer.width(), layer.height()))
            .unwrap_or_default()
    }
}

/// Copy `area` of the default layer into the canvas, then blend the
/// cursor over it.
fn recompose(canvas: &mut RgbaImage, default: &Layer, cursor: &Cursor, area: Rect) {
    let source = crop(default.image(), area);
    imageops::replace(canvas, &source, area.x.into(), area.y.into());

    let overlay = cursor.bounds();
    if let Some(visible) = overlay.intersect(&area) {
        let within = Rect::new(
            visible.x.saturating_sub(overlay.x),
            visible.y.saturating_sub(overlay.y),
            visible.width,
            visible.height,
        );
        let pixels = crop(&cursor.image, within);
        imageops::overlay(canvas, &pixels, visible.x.into(), visible.y.into());
    }
}

fn crop(image: &RgbaImage, area: Rect) -> RgbaImage {
    imageops::crop_imm(
        image,
        area.x.max(0) as u32,
        area.y.max(0) as u32,
        area.width as u32,
        area.height as u32,
    )
    .to_image()
}

fn monotonic_nanos() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let nanos = EPOCH.get_or_init(Instant::now).elapsed().as_nanos();
    u64::try_from(nanos).unwrap_or(u64::MAX)
}

/// Strictly greater than `previous`.
fn next_timestamp(previous: u64) -> u64 {
    monotonic_nanos().max(previous.saturating_add(1))
}
