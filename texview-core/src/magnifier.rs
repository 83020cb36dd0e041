use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::geometry::{PageGeometry, PointF, RectF, SizeF};
use crate::layer::{Clip, EventResponse, KeyInput, PointerEvent, PointerKind, Surface, ViewLayer};
use crate::{DocumentBackend, RenderImage, RenderRequest};

const SIZE_STEPS_PX: [f64; 5] = [200.0, 300.0, 400.0, 500.0, 600.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MagnifierShape {
    #[default]
    Circular,
    Rectangular,
}

impl MagnifierShape {
    pub fn toggled(self) -> Self {
        match self {
            MagnifierShape::Circular => MagnifierShape::Rectangular,
            MagnifierShape::Rectangular => MagnifierShape::Circular,
        }
    }
}

/// Discrete magnifier size, step 1 to 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct MagnifierSize(u8);

impl MagnifierSize {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(step: u8) -> Self {
        Self(step.clamp(Self::MIN, Self::MAX))
    }

    pub fn step(self) -> u8 {
        self.0
    }

    /// Edge length of the on-screen overlay.
    pub fn pixels(self) -> f64 {
        SIZE_STEPS_PX[usize::from(self.0 - Self::MIN)]
    }

    /// Next size, wrapping back to the smallest.
    pub fn cycled(self) -> Self {
        if self.0 >= Self::MAX {
            Self(Self::MIN)
        } else {
            Self(self.0 + 1)
        }
    }
}

impl Default for MagnifierSize {
    fn default() -> Self {
        Self(2)
    }
}

impl TryFrom<u8> for MagnifierSize {
    type Error = String;

    fn try_from(step: u8) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&step) {
            Ok(Self(step))
        } else {
            Err(format!(
                "magnifier size must be between {} and {}, got {step}",
                Self::MIN,
                Self::MAX
            ))
        }
    }
}

impl From<MagnifierSize> for u8 {
    fn from(size: MagnifierSize) -> Self {
        size.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagnifierConfig {
    pub size: MagnifierSize,
    pub shape: MagnifierShape,
    pub multiplier: f64,
}

impl Default for MagnifierConfig {
    fn default() -> Self {
        Self {
            size: MagnifierSize::default(),
            shape: MagnifierShape::default(),
            multiplier: 2.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
struct MagnifierKey {
    page_index: usize,
    scale_milli: u32,
    origin: (i64, i64),
}

/// The single cached preview.
#[derive(Debug, Clone)]
pub struct MagnifierEntry {
    key: MagnifierKey,
    pub source: RectF,
    pub image: RenderImage,
}

struct Binding {
    backend: Arc<dyn DocumentBackend>,
    page_index: usize,
    geometry: PageGeometry,
    base_scale: f64,
}

/// Zoomed preview that follows the pointer over the current page.
///
/// `base_scale` is the view's pixels-per-point; all rectangles are in
/// page-image pixels at that scale.
pub struct Magnifier {
    config: MagnifierConfig,
    binding: Option<Binding>,
    entry: Option<MagnifierEntry>,
    pointer: Option<PointF>,
    visible: bool,
}

impl Magnifier {
    pub fn new(config: MagnifierConfig) -> Self {
        Self {
            config,
            binding: None,
            entry: None,
            pointer: None,
            visible: false,
        }
    }

    pub fn config(&self) -> MagnifierConfig {
        self.config
    }

    pub fn set_config(&mut self, config: MagnifierConfig) {
        if config != self.config {
            self.config = config;
            self.invalidate();
        }
    }

    pub fn set_page(
        &mut self,
        backend: Arc<dyn DocumentBackend>,
        page_index: usize,
        geometry: PageGeometry,
        base_scale: f64,
    ) {
        self.binding = Some(Binding {
            backend,
            page_index,
            geometry,
            base_scale,
        });
        self.invalidate();
    }

    pub fn unbind(&mut self) {
        self.binding = None;
        self.invalidate();
        self.hide();
    }

    pub fn invalidate(&mut self) {
        if self.entry.take().is_some() {
            debug!("magnifier cache invalidated");
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn hide(&mut self) {
        self.visible = false;
        self.pointer = None;
    }

    pub fn entry(&self) -> Option<&MagnifierEntry> {
        self.entry.as_ref()
    }

    /// Page area sampled for a pointer at `pointer`, shifted to stay on the page.
    pub fn source_rect(&self, pointer: PointF) -> Option<RectF> {
        let binding = self.binding.as_ref()?;
        let page = binding
            .geometry
            .displayed_size()
            .scaled(binding.base_scale);
        if page.is_empty() {
            return None;
        }
        let side = self.config.size.pixels() / self.config.multiplier;
        Some(clip_to_page(pointer, SizeF::new(side, side), page))
    }

    /// Shows the magnifier at `pointer`, rendering unless the cached entry matches.
    pub fn update(&mut self, pointer: PointF) -> Result<()> {
        let Some(source) = self.source_rect(pointer) else {
            return Ok(());
        };
        let Some(binding) = self.binding.as_ref() else {
            return Ok(());
        };
        let scale = binding.base_scale * self.config.multiplier;
        let key = MagnifierKey {
            page_index: binding.page_index,
            scale_milli: quantize_scale(scale),
            origin: (source.x as i64, source.y as i64),
        };

        self.pointer = Some(pointer);
        self.visible = true;

        if self.entry.as_ref().is_some_and(|entry| entry.key == key) {
            return Ok(());
        }

        let request = RenderRequest {
            page_index: binding.page_index,
            pixels_per_point: scale,
            region: Some(source.scaled(self.config.multiplier)),
        };
        let rendered = binding.backend.render_page(request)?;
        self.entry = Some(MagnifierEntry {
            key,
            source,
            image: rendered.image,
        });
        Ok(())
    }

    /// Top-left corner of the overlay, placed so that the magnified pixel under
    /// the pointer is drawn at the pointer.
    pub fn overlay_origin(&self) -> Option<PointF> {
        let pointer = self.pointer?;
        let entry = self.entry.as_ref()?;
        let m = self.config.multiplier;
        Some(PointF::new(
            pointer.x - (pointer.x - entry.source.x) * m,
            pointer.y - (pointer.y - entry.source.y) * m,
        ))
    }
}

impl fmt::Debug for Magnifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Magnifier")
            .field("config", &self.config)
            .field("page", &self.binding.as_ref().map(|b| b.page_index))
            .field("visible", &self.visible)
            .finish()
    }
}

impl ViewLayer for Magnifier {
    fn render(&self, surface: &mut dyn Surface) {
        if !self.visible {
            return;
        }
        let (Some(origin), Some(entry)) = (self.overlay_origin(), self.entry.as_ref()) else {
            return;
        };
        let clip = match self.config.shape {
            MagnifierShape::Circular => Clip::Ellipse,
            MagnifierShape::Rectangular => Clip::None,
        };
        surface.draw_image(origin, &entry.image, clip);
        if self.config.shape == MagnifierShape::Rectangular {
            let frame = RectF::new(
                origin.x,
                origin.y,
                f64::from(entry.image.width),
                f64::from(entry.image.height),
            );
            surface.stroke_rect(frame, [96, 96, 96]);
        }
    }

    fn on_pointer_event(&mut self, event: &PointerEvent) -> EventResponse {
        match event.kind {
            PointerKind::Press | PointerKind::Move | PointerKind::DoubleClick => {
                if let Err(err) = self.update(event.position) {
                    warn!(?err, "magnifier render failed");
                    self.hide();
                }
                EventResponse::Handled
            }
            PointerKind::Release => {
                self.hide();
                EventResponse::Handled
            }
        }
    }

    fn on_key_event(&mut self, _event: &KeyInput) -> EventResponse {
        EventResponse::Ignored
    }
}

/// Places a `size` rectangle centered on `center` inside a `page`-sized area.
///
/// Near an edge the rectangle is shifted, not shrunk; it only shrinks when it
/// is larger than the page itself. The origin is snapped down to whole pixels.
pub fn clip_to_page(center: PointF, size: SizeF, page: SizeF) -> RectF {
    let width = size.width.min(page.width);
    let height = size.height.min(page.height);
    let x = (center.x - width / 2.0).clamp(0.0, page.width - width).floor();
    let y = (center.y - height / 2.0).clamp(0.0, page.height - height).floor();
    RectF::new(x, y, width, height)
}

fn quantize_scale(scale: f64) -> u32 {
    let scaled = (scale * 1000.0).round();
    if !scaled.is_finite() || scaled <= 0.0 {
        1
    } else if scaled > f64::from(u32::MAX) {
        u32::MAX
    } else {
        scaled as u32
    }
}
