//! Host-facing seams: pointer and key input, cursor and scroll requests, and
//! the drawing surface that view layers paint onto.

use crate::geometry::{PointF, RectF};
use crate::RenderImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Press,
    Release,
    Move,
    DoubleClick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointerButton {
    #[default]
    None,
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub control: bool,
    pub shift: bool,
    pub alt: bool,
}

/// A pointer event. `position` is in page-image pixels (origin at the top-left
/// of the displayed page); `screen` is in host window pixels and is unaffected
/// by scrolling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub kind: PointerKind,
    pub button: PointerButton,
    pub position: PointF,
    pub screen: PointF,
    pub modifiers: Modifiers,
}

impl PointerEvent {
    pub fn new(kind: PointerKind, button: PointerButton, position: PointF) -> Self {
        Self {
            kind,
            button,
            position,
            screen: position,
            modifiers: Modifiers::default(),
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn with_screen(mut self, screen: PointF) -> Self {
        self.screen = screen;
        self
    }
}

/// Key presses only matter to views through the modifier state they carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyInput {
    pub modifiers: Modifiers,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventResponse {
    Ignored,
    Handled,
    /// Control-click: the host should run an inverse search at `point`
    /// (native page space) on `page`.
    SyncClick { page: usize, point: PointF },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorShape {
    Arrow,
    PointingHand,
    OpenHand,
    ClosedHand,
    Magnifier,
    Sync,
}

/// Requests a view sends back to the window system hosting it.
pub trait HostWindow: Send + Sync {
    fn set_cursor(&self, cursor: CursorShape);
    /// Asks the host to bring `target` (page-image pixels) into view.
    fn scroll_to(&self, target: RectF);
    fn scroll_by(&self, dx: f64, dy: f64);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl HostWindow for NullHost {
    fn set_cursor(&self, _cursor: CursorShape) {}

    fn scroll_to(&self, _target: RectF) {}

    fn scroll_by(&self, _dx: f64, _dy: f64) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clip {
    None,
    /// Ellipse inscribed in the drawn image's bounds.
    Ellipse,
}

/// Pixel sink used by [`ViewLayer::render`]. Coordinates are page-image pixels.
pub trait Surface {
    fn draw_image(&mut self, origin: PointF, image: &RenderImage, clip: Clip);
    fn fill_rect(&mut self, rect: RectF, color: [u8; 3], alpha: f32);
    fn stroke_rect(&mut self, rect: RectF, color: [u8; 3]);
}

/// Paint and input capability shared by the page view and its overlays.
pub trait ViewLayer {
    fn render(&self, surface: &mut dyn Surface);
    fn on_pointer_event(&mut self, event: &PointerEvent) -> EventResponse;
    fn on_key_event(&mut self, event: &KeyInput) -> EventResponse;
}
