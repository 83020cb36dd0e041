//! The page view: current page, zoom state, tools and pointer handling.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ViewSettings;
use crate::error::{ViewerError, ViewerResult};
use crate::events::{EventBus, ViewEvent};
use crate::geometry::{PageGeometry, PointF, RectF, SizeF, POINTS_PER_INCH};
use crate::layer::{
    Clip, CursorShape, EventResponse, HostWindow, KeyInput, Modifiers, PointerButton,
    PointerEvent, PointerKind, Surface, ViewLayer,
};
use crate::links::{Link, LinkAction, LinkDispatcher};
use crate::magnifier::{Magnifier, MagnifierConfig};
use crate::{DocumentBackend, ExternalOpener, RenderImage, RenderRequest};

pub const MIN_SCALE: f64 = 0.125;
pub const MAX_SCALE: f64 = 20.0;

const HIGHLIGHT_COLOR: [u8; 3] = [255, 214, 0];
const HIGHLIGHT_ALPHA: f32 = 0.35;
const PLACEHOLDER_FILL: [u8; 3] = [236, 236, 236];
const PLACEHOLDER_FRAME: [u8; 3] = [176, 32, 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScaleMode {
    Fixed,
    FitWidth,
    #[default]
    FitWindow,
}

/// Argument to [`PageView::set_scale`]; only `Fixed` carries a factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scale {
    Fixed(f64),
    FitWidth,
    FitWindow,
}

impl Scale {
    pub fn mode(self) -> ScaleMode {
        match self {
            Scale::Fixed(_) => ScaleMode::Fixed,
            Scale::FitWidth => ScaleMode::FitWidth,
            Scale::FitWindow => ScaleMode::FitWindow,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SavedState {
    pub scale_factor: f64,
    pub scale_mode: ScaleMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tool {
    #[default]
    Magnifier,
    Scroll,
}

/// Regions (native page space) produced by a forward search.
#[derive(Debug, Clone, PartialEq)]
pub struct HighlightPath {
    pub page: usize,
    pub regions: Vec<RectF>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageContent {
    Empty,
    Rendered {
        page_index: usize,
        pixels_per_point: f64,
        image: RenderImage,
    },
    /// Stand-in drawn when the engine could not rasterize the page; `size` is
    /// the page-image size in pixels.
    Failed {
        page_index: usize,
        size: SizeF,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Drag {
    Magnifier,
    Scroll { last: PointF },
}

pub struct PageView {
    backend: Option<Arc<dyn DocumentBackend>>,
    page_count: usize,
    page_index: usize,
    geometry: PageGeometry,
    scale_factor: f64,
    scale_mode: ScaleMode,
    dpi: f64,
    zoom_step: f64,
    viewport: SizeF,
    saved: Option<SavedState>,
    content: PageContent,
    highlight: Option<HighlightPath>,
    magnifier: Magnifier,
    links: LinkDispatcher,
    tool: Tool,
    drag: Option<Drag>,
    pressed_link: Option<Link>,
    modifiers: Modifiers,
    last_pointer: Option<PointF>,
    host: Arc<dyn HostWindow>,
    events: EventBus,
}

impl PageView {
    pub fn new(
        settings: &ViewSettings,
        magnifier: MagnifierConfig,
        host: Arc<dyn HostWindow>,
        opener: Arc<dyn ExternalOpener>,
    ) -> Self {
        let scale_factor = match settings.scale_mode {
            ScaleMode::Fixed => settings.fixed_scale.clamp(MIN_SCALE, MAX_SCALE),
            ScaleMode::FitWidth | ScaleMode::FitWindow => 1.0,
        };
        Self {
            backend: None,
            page_count: 0,
            page_index: 0,
            geometry: PageGeometry::default(),
            scale_factor,
            scale_mode: settings.scale_mode,
            dpi: settings.dpi,
            zoom_step: settings.zoom_step,
            viewport: SizeF::default(),
            saved: None,
            content: PageContent::Empty,
            highlight: None,
            magnifier: Magnifier::new(magnifier),
            links: LinkDispatcher::new(opener),
            tool: Tool::default(),
            drag: None,
            pressed_link: None,
            modifiers: Modifiers::default(),
            last_pointer: None,
            host,
            events: EventBus::new(),
        }
    }

    /// Shows `backend` from its first page.
    pub fn set_document(&mut self, backend: Arc<dyn DocumentBackend>) {
        self.bind_document(backend, 0);
    }

    /// Swaps in a rebuilt copy of the document, staying on the current page
    /// when it still exists.
    pub fn replace_document(&mut self, backend: Arc<dyn DocumentBackend>) {
        let page = self.page_index;
        self.bind_document(backend, page);
    }

    fn bind_document(&mut self, backend: Arc<dyn DocumentBackend>, page: usize) {
        self.page_count = backend.info().page_count;
        self.page_index = page.min(self.page_count.saturating_sub(1));
        self.backend = Some(backend);
        self.highlight = None;
        self.pressed_link = None;
        self.drag = None;
        self.magnifier.hide();
        self.load_geometry();
        self.refit();
        self.reload_page();
        self.events.emit(ViewEvent::PageChanged(self.page_index));
    }

    pub fn has_document(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend(&self) -> Option<&Arc<dyn DocumentBackend>> {
        self.backend.as_ref()
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn geometry(&self) -> PageGeometry {
        self.geometry
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    pub fn scale_mode(&self) -> ScaleMode {
        self.scale_mode
    }

    pub fn dpi(&self) -> f64 {
        self.dpi
    }

    pub fn viewport(&self) -> SizeF {
        self.viewport
    }

    pub fn saved_state(&self) -> Option<SavedState> {
        self.saved
    }

    pub fn content(&self) -> &PageContent {
        &self.content
    }

    pub fn highlight(&self) -> Option<&HighlightPath> {
        self.highlight.as_ref()
    }

    pub fn magnifier(&self) -> &Magnifier {
        &self.magnifier
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn go_to_page(&mut self, index: usize) {
        if self.backend.is_none() {
            return;
        }
        self.highlight = None;
        self.navigate(index);
    }

    pub fn first_page(&mut self) {
        self.go_to_page(0);
    }

    pub fn last_page(&mut self) {
        self.go_to_page(self.page_count.saturating_sub(1));
    }

    pub fn next_page(&mut self, count: usize) {
        self.go_to_page(self.page_index.saturating_add(count.max(1)));
    }

    pub fn prev_page(&mut self, count: usize) {
        self.go_to_page(self.page_index.saturating_sub(count.max(1)));
    }

    /// Clamped page change without touching the highlight. Returns whether
    /// the page actually changed.
    fn navigate(&mut self, index: usize) -> bool {
        if self.backend.is_none() || self.page_count == 0 {
            return false;
        }
        let target = index.min(self.page_count - 1);
        if target == self.page_index {
            return false;
        }
        self.page_index = target;
        self.pressed_link = None;
        self.load_geometry();
        self.refit();
        self.reload_page();
        self.events.emit(ViewEvent::PageChanged(target));
        true
    }

    pub fn set_scale(&mut self, scale: Scale) -> ViewerResult<()> {
        let changed = match scale {
            Scale::Fixed(factor) => {
                if !(factor.is_finite() && factor > 0.0) {
                    return Err(ViewerError::InvalidScale(factor));
                }
                self.set_mode(ScaleMode::Fixed);
                self.update_factor(factor.clamp(MIN_SCALE, MAX_SCALE))
            }
            Scale::FitWidth | Scale::FitWindow => {
                self.set_mode(scale.mode());
                self.refit()
            }
        };
        if changed {
            self.reload_page();
        }
        Ok(())
    }

    pub fn actual_size(&mut self) {
        if let Err(err) = self.set_scale(Scale::Fixed(1.0)) {
            warn!(?err, "actual size rejected");
        }
    }

    pub fn zoom_in(&mut self) {
        let next = self.scale_factor * self.zoom_step;
        self.zoom_to(next);
    }

    pub fn zoom_out(&mut self) {
        let next = self.scale_factor / self.zoom_step;
        self.zoom_to(next);
    }

    fn zoom_to(&mut self, factor: f64) {
        self.set_mode(ScaleMode::Fixed);
        if self.update_factor(factor.clamp(MIN_SCALE, MAX_SCALE)) {
            self.reload_page();
        }
    }

    /// New viewport size in pixels. Fit modes recompute their factor.
    pub fn resize(&mut self, viewport: SizeF) {
        self.viewport = viewport;
        if self.refit() {
            self.reload_page();
        }
    }

    /// The window became visible again; fit modes recompute their factor
    /// against the current viewport.
    pub fn window_shown(&mut self) {
        if self.refit() {
            self.reload_page();
        }
    }

    pub fn save_state(&mut self) {
        if let Some(previous) = self.saved {
            debug!(?previous, "overwriting saved view state");
        }
        self.saved = Some(SavedState {
            scale_factor: self.scale_factor,
            scale_mode: self.scale_mode,
        });
    }

    pub fn restore_state(&mut self) {
        let Some(saved) = self.saved.take() else {
            return;
        };
        self.set_mode(saved.scale_mode);
        if self.update_factor(saved.scale_factor) {
            self.reload_page();
        }
    }

    pub fn set_resolution(&mut self, dpi: f64) -> ViewerResult<()> {
        if !(dpi.is_finite() && dpi > 0.0) {
            return Err(ViewerError::Config(format!("dpi must be positive, got {dpi}")));
        }
        self.dpi = dpi;
        self.refit();
        self.magnifier.hide();
        self.reload_page();
        Ok(())
    }

    /// Factor that fits the current page into the viewport under `mode`, or
    /// `None` for fixed mode or while the viewport or page is empty.
    pub fn fit_factor(&self, mode: ScaleMode) -> Option<f64> {
        let page = self
            .geometry
            .displayed_size()
            .scaled(self.dpi / POINTS_PER_INCH);
        if page.is_empty() || self.viewport.is_empty() {
            return None;
        }
        let width = self.viewport.width / page.width;
        let factor = match mode {
            ScaleMode::Fixed => return None,
            ScaleMode::FitWidth => width,
            ScaleMode::FitWindow => width.min(self.viewport.height / page.height),
        };
        Some(factor.clamp(MIN_SCALE, MAX_SCALE))
    }

    fn refit(&mut self) -> bool {
        match self.fit_factor(self.scale_mode) {
            Some(factor) => self.update_factor(factor),
            None => false,
        }
    }

    fn update_factor(&mut self, factor: f64) -> bool {
        if factor == self.scale_factor {
            return false;
        }
        self.scale_factor = factor;
        self.events.emit(ViewEvent::ZoomChanged(factor));
        true
    }

    fn set_mode(&mut self, mode: ScaleMode) {
        if mode != self.scale_mode {
            self.scale_mode = mode;
            self.events.emit(ViewEvent::ScaleOptionChanged(mode));
        }
    }

    pub fn pixels_per_point(&self) -> f64 {
        self.dpi / POINTS_PER_INCH * self.scale_factor
    }

    /// Size of the current page image in pixels.
    pub fn page_pixel_size(&self) -> SizeF {
        self.geometry
            .displayed_size()
            .scaled(self.pixels_per_point())
    }

    pub fn view_to_page(&self, point: PointF) -> PointF {
        self.geometry
            .to_native(point.scaled(1.0 / self.pixels_per_point()))
    }

    pub fn page_to_view(&self, point: PointF) -> PointF {
        self.geometry
            .to_displayed(point)
            .scaled(self.pixels_per_point())
    }

    pub fn page_rect_to_view(&self, rect: &RectF) -> RectF {
        self.geometry
            .rect_to_displayed(rect)
            .scaled(self.pixels_per_point())
    }

    /// Shows a forward-search hit: moves to `page`, highlights `regions` and
    /// scrolls the first one into view. Returns false when `page` does not exist.
    pub fn show_source_match(&mut self, page: usize, regions: Vec<RectF>) -> bool {
        if self.backend.is_none() || page >= self.page_count {
            return false;
        }
        self.navigate(page);
        if let Some(first) = regions.first() {
            self.host.scroll_to(self.page_rect_to_view(first));
        }
        self.highlight = Some(HighlightPath { page, regions });
        true
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
        self.drag = None;
        self.magnifier.hide();
        self.update_cursor(self.last_pointer);
    }

    pub fn set_magnifier_config(&mut self, config: MagnifierConfig) {
        self.magnifier.set_config(config);
    }

    pub fn cycle_magnifier_size(&mut self) {
        let mut config = self.magnifier.config();
        config.size = config.size.cycled();
        self.magnifier.set_config(config);
    }

    pub fn toggle_magnifier_shape(&mut self) {
        let mut config = self.magnifier.config();
        config.shape = config.shape.toggled();
        self.magnifier.set_config(config);
    }

    pub fn follow_link(&mut self, link: &Link) {
        match self.links.dispatch(link, self.page_count) {
            LinkAction::Navigate { page, target } => {
                self.go_to_page(page);
                if let Some(target) = target {
                    self.host.scroll_to(self.page_rect_to_view(&target));
                }
            }
            LinkAction::Opened | LinkAction::Ignored => {}
        }
    }

    fn link_under(&self, position: PointF) -> Option<Link> {
        let backend = self.backend.as_ref()?;
        self.links
            .link_at(backend.as_ref(), self.page_index, self.view_to_page(position))
    }

    fn load_geometry(&mut self) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        if self.page_count == 0 {
            return;
        }
        match backend.page_geometry(self.page_index) {
            Ok(geometry) => self.geometry = geometry,
            Err(err) => warn!(?err, page = self.page_index, "failed to read page geometry"),
        }
    }

    fn reload_page(&mut self) {
        let Some(backend) = self.backend.clone() else {
            self.content = PageContent::Empty;
            return;
        };
        if self.page_count == 0 {
            self.content = PageContent::Empty;
            self.magnifier.unbind();
            return;
        }
        let page_index = self.page_index;
        let pixels_per_point = self.pixels_per_point();
        let request = RenderRequest {
            page_index,
            pixels_per_point,
            region: None,
        };
        self.content = match backend.render_page(request) {
            Ok(rendered) => PageContent::Rendered {
                page_index,
                pixels_per_point,
                image: rendered.image,
            },
            Err(err) => {
                warn!(?err, page = page_index, "page render failed");
                PageContent::Failed {
                    page_index,
                    size: self.page_pixel_size(),
                    message: format!("{err:#}"),
                }
            }
        };
        self.magnifier
            .set_page(backend, page_index, self.geometry, pixels_per_point);
    }

    fn update_cursor(&self, position: Option<PointF>) {
        let shape = if self.modifiers.control {
            CursorShape::Sync
        } else if matches!(self.drag, Some(Drag::Scroll { .. })) {
            CursorShape::ClosedHand
        } else if position.and_then(|p| self.link_under(p)).is_some() {
            CursorShape::PointingHand
        } else {
            match self.tool {
                Tool::Magnifier => CursorShape::Magnifier,
                Tool::Scroll => CursorShape::OpenHand,
            }
        };
        self.host.set_cursor(shape);
    }

    fn pointer_pressed(&mut self, event: &PointerEvent) -> EventResponse {
        if event.button != PointerButton::Left {
            return EventResponse::Ignored;
        }
        if event.modifiers.control {
            return EventResponse::SyncClick {
                page: self.page_index,
                point: self.view_to_page(event.position),
            };
        }
        if let Some(link) = self.link_under(event.position) {
            self.pressed_link = Some(link);
            return EventResponse::Handled;
        }
        match self.tool {
            Tool::Magnifier => {
                self.drag = Some(Drag::Magnifier);
                self.magnifier.on_pointer_event(event);
            }
            Tool::Scroll => {
                self.drag = Some(Drag::Scroll { last: event.screen });
                self.host.set_cursor(CursorShape::ClosedHand);
            }
        }
        EventResponse::Handled
    }

    fn pointer_moved(&mut self, event: &PointerEvent) -> EventResponse {
        match self.drag {
            Some(Drag::Magnifier) => {
                self.magnifier.on_pointer_event(event);
                EventResponse::Handled
            }
            Some(Drag::Scroll { last }) => {
                self.host
                    .scroll_by(last.x - event.screen.x, last.y - event.screen.y);
                self.drag = Some(Drag::Scroll { last: event.screen });
                EventResponse::Handled
            }
            None => {
                self.update_cursor(Some(event.position));
                EventResponse::Ignored
            }
        }
    }

    fn pointer_released(&mut self, event: &PointerEvent) -> EventResponse {
        if let Some(link) = self.pressed_link.take() {
            if self.link_under(event.position).as_ref() == Some(&link) {
                self.follow_link(&link);
            }
            self.update_cursor(Some(event.position));
            return EventResponse::Handled;
        }
        match self.drag.take() {
            Some(Drag::Magnifier) => {
                self.magnifier.on_pointer_event(event);
            }
            Some(Drag::Scroll { .. }) => {}
            None => return EventResponse::Ignored,
        }
        self.update_cursor(Some(event.position));
        EventResponse::Handled
    }
}

impl fmt::Debug for PageView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageView")
            .field("page_index", &self.page_index)
            .field("page_count", &self.page_count)
            .field("scale_factor", &self.scale_factor)
            .field("scale_mode", &self.scale_mode)
            .field("tool", &self.tool)
            .finish()
    }
}

impl ViewLayer for PageView {
    fn render(&self, surface: &mut dyn Surface) {
        match &self.content {
            PageContent::Rendered { image, .. } => {
                surface.draw_image(PointF::default(), image, Clip::None)
            }
            PageContent::Failed { size, .. } => {
                let frame = RectF::new(0.0, 0.0, size.width, size.height);
                surface.fill_rect(frame, PLACEHOLDER_FILL, 1.0);
                surface.stroke_rect(frame, PLACEHOLDER_FRAME);
            }
            PageContent::Empty => {}
        }
        if let Some(highlight) = self
            .highlight
            .as_ref()
            .filter(|highlight| highlight.page == self.page_index)
        {
            for region in &highlight.regions {
                surface.fill_rect(
                    self.page_rect_to_view(region),
                    HIGHLIGHT_COLOR,
                    HIGHLIGHT_ALPHA,
                );
            }
        }
        self.magnifier.render(surface);
    }

    fn on_pointer_event(&mut self, event: &PointerEvent) -> EventResponse {
        self.modifiers = event.modifiers;
        self.last_pointer = Some(event.position);
        if self.backend.is_none() || self.page_count == 0 {
            return EventResponse::Ignored;
        }
        match event.kind {
            PointerKind::Press | PointerKind::DoubleClick => self.pointer_pressed(event),
            PointerKind::Move => self.pointer_moved(event),
            PointerKind::Release => self.pointer_released(event),
        }
    }

    fn on_key_event(&mut self, event: &KeyInput) -> EventResponse {
        if event.modifiers == self.modifiers {
            return EventResponse::Ignored;
        }
        self.modifiers = event.modifiers;
        self.update_cursor(self.last_pointer);
        EventResponse::Handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rotation;
    use crate::testing::{FakeBackend, RecordingHost, RecordingOpener};

    fn settings(dpi: f64) -> ViewSettings {
        ViewSettings {
            dpi,
            ..ViewSettings::default()
        }
    }

    fn view_with(backend: FakeBackend, dpi: f64) -> (PageView, Arc<RecordingHost>) {
        let host = Arc::new(RecordingHost::default());
        let mut view = PageView::new(
            &settings(dpi),
            MagnifierConfig::default(),
            host.clone(),
            Arc::new(RecordingOpener::default()),
        );
        view.set_document(Arc::new(backend));
        (view, host)
    }

    fn press(x: f64, y: f64) -> PointerEvent {
        PointerEvent::new(PointerKind::Press, PointerButton::Left, PointF::new(x, y))
    }

    fn release(x: f64, y: f64) -> PointerEvent {
        PointerEvent::new(PointerKind::Release, PointerButton::Left, PointF::new(x, y))
    }

    fn moved(x: f64, y: f64) -> PointerEvent {
        PointerEvent::new(PointerKind::Move, PointerButton::Left, PointF::new(x, y))
    }

    #[test]
    fn go_to_page_clamps_for_every_length() {
        for count in 1..=6 {
            let (mut view, _) = view_with(FakeBackend::new(count), 72.0);
            for index in [0, 1, 2, count - 1, count, count + 3, usize::MAX] {
                view.go_to_page(index);
                assert_eq!(view.page_index(), index.min(count - 1));
            }
        }
    }

    #[test]
    fn navigation_without_document_is_a_no_op() {
        let mut view = PageView::new(
            &settings(72.0),
            MagnifierConfig::default(),
            Arc::new(RecordingHost::default()),
            Arc::new(RecordingOpener::default()),
        );
        let log = view.events_mut().recorder();
        view.go_to_page(3);
        view.next_page(1);
        view.last_page();
        assert_eq!(view.page_index(), 0);
        assert!(log.lock().is_empty());
        assert_eq!(*view.content(), PageContent::Empty);
    }

    #[test]
    fn page_changed_fires_only_on_change() {
        let (mut view, _) = view_with(FakeBackend::new(5), 72.0);
        let log = view.events_mut().recorder();

        view.next_page(2);
        view.next_page(10);
        view.last_page();
        view.prev_page(1);
        view.first_page();
        view.first_page();

        assert_eq!(
            *log.lock(),
            vec![
                ViewEvent::PageChanged(2),
                ViewEvent::PageChanged(4),
                ViewEvent::PageChanged(3),
                ViewEvent::PageChanged(0),
            ]
        );
    }

    #[test]
    fn fit_modes_follow_the_viewport() {
        let (mut view, _) = view_with(FakeBackend::new(1), 72.0);
        view.resize(SizeF::new(800.0, 600.0));
        assert_eq!(view.scale_mode(), ScaleMode::FitWindow);
        assert!((view.scale_factor() - 600.0 / 792.0).abs() < 1e-12);

        view.set_scale(Scale::FitWidth).unwrap();
        assert!((view.scale_factor() - 800.0 / 612.0).abs() < 1e-12);
    }

    #[test]
    fn fit_accounts_for_rotation() {
        let mut backend = FakeBackend::new(1);
        backend.geometries[0].rotation = Rotation::Clockwise90;
        let (mut view, _) = view_with(backend, 72.0);
        view.set_scale(Scale::FitWidth).unwrap();
        view.resize(SizeF::new(792.0, 400.0));
        assert!((view.scale_factor() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn identical_resize_reproduces_identical_factor() {
        let (mut view, _) = view_with(FakeBackend::new(1), 96.0);
        view.resize(SizeF::new(1023.0, 701.0));
        let first = view.scale_factor();
        let log = view.events_mut().recorder();

        view.resize(SizeF::new(1023.0, 701.0));
        view.window_shown();

        assert_eq!(view.scale_factor().to_bits(), first.to_bits());
        assert_eq!(
            view.fit_factor(ScaleMode::FitWindow),
            view.fit_factor(ScaleMode::FitWindow)
        );
        assert!(log.lock().is_empty());
    }

    #[test]
    fn resize_in_fixed_mode_keeps_factor() {
        let (mut view, _) = view_with(FakeBackend::new(1), 72.0);
        view.set_scale(Scale::Fixed(1.5)).unwrap();
        view.resize(SizeF::new(300.0, 300.0));
        assert_eq!(view.scale_factor(), 1.5);
        assert_eq!(view.scale_mode(), ScaleMode::Fixed);
    }

    #[test]
    fn zoom_round_trip_forces_fixed() {
        let (mut view, _) = view_with(FakeBackend::new(1), 72.0);
        view.resize(SizeF::new(640.0, 480.0));
        let before = view.scale_factor();

        view.zoom_in();
        assert_eq!(view.scale_mode(), ScaleMode::Fixed);
        assert!((view.scale_factor() - before * 1.25).abs() < 1e-9);
        view.zoom_out();
        assert_eq!(view.scale_mode(), ScaleMode::Fixed);
        assert!((view.scale_factor() - before).abs() < 1e-9);
    }

    #[test]
    fn zoom_stays_within_limits() {
        let (mut view, _) = view_with(FakeBackend::new(1), 72.0);
        for _ in 0..100 {
            view.zoom_in();
        }
        assert_eq!(view.scale_factor(), MAX_SCALE);
        for _ in 0..100 {
            view.zoom_out();
        }
        assert_eq!(view.scale_factor(), MIN_SCALE);
    }

    #[test]
    fn fixed_scale_rejects_bad_factors() {
        let (mut view, _) = view_with(FakeBackend::new(1), 72.0);
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                view.set_scale(Scale::Fixed(bad)),
                Err(ViewerError::InvalidScale(_))
            ));
        }
        view.actual_size();
        assert_eq!(view.scale_factor(), 1.0);
        assert_eq!(view.scale_mode(), ScaleMode::Fixed);
    }

    #[test]
    fn save_then_restore_is_exact() {
        let (mut view, _) = view_with(FakeBackend::new(1), 96.0);
        view.resize(SizeF::new(777.0, 555.0));
        view.set_scale(Scale::FitWidth).unwrap();
        let factor = view.scale_factor();

        view.save_state();
        view.set_scale(Scale::FitWindow).unwrap();
        view.resize(SizeF::new(1920.0, 1080.0));
        view.zoom_in();
        view.restore_state();

        assert_eq!(view.scale_mode(), ScaleMode::FitWidth);
        assert_eq!(view.scale_factor().to_bits(), factor.to_bits());
        assert_eq!(view.saved_state(), None);

        view.zoom_in();
        let zoomed = view.scale_factor();
        view.restore_state();
        assert_eq!(view.scale_factor(), zoomed);
    }

    #[test]
    fn scale_events_report_mode_and_factor() {
        let (mut view, _) = view_with(FakeBackend::new(1), 72.0);
        let log = view.events_mut().recorder();
        view.set_scale(Scale::Fixed(2.0)).unwrap();
        view.set_scale(Scale::Fixed(2.0)).unwrap();
        assert_eq!(
            *log.lock(),
            vec![
                ViewEvent::ScaleOptionChanged(ScaleMode::Fixed),
                ViewEvent::ZoomChanged(2.0),
            ]
        );
    }

    #[test]
    fn render_failure_leaves_a_placeholder() {
        let mut backend = FakeBackend::new(3);
        backend.failing_pages.push(1);
        let (mut view, _) = view_with(backend, 72.0);

        view.go_to_page(1);
        match view.content() {
            PageContent::Failed {
                page_index, size, ..
            } => {
                assert_eq!(*page_index, 1);
                assert_eq!(*size, SizeF::new(612.0, 792.0));
            }
            other => panic!("expected placeholder, got {other:?}"),
        }

        view.go_to_page(2);
        assert!(matches!(
            view.content(),
            PageContent::Rendered { page_index: 2, .. }
        ));
    }

    #[test]
    fn control_click_requests_inverse_search() {
        let (mut view, _) = view_with(FakeBackend::new(2), 144.0);
        view.set_scale(Scale::Fixed(1.0)).unwrap();
        view.go_to_page(1);
        let click = press(200.0, 100.0).with_modifiers(Modifiers {
            control: true,
            ..Modifiers::default()
        });
        assert_eq!(
            view.on_pointer_event(&click),
            EventResponse::SyncClick {
                page: 1,
                point: PointF::new(100.0, 50.0)
            }
        );
    }

    #[test]
    fn link_click_navigates_and_scrolls() {
        let mut backend = FakeBackend::new(4);
        let target = RectF::new(72.0, 144.0, 100.0, 20.0);
        backend.links.push((
            0,
            RectF::new(10.0, 10.0, 40.0, 10.0),
            Link::GoTo {
                page: 3,
                target: Some(target),
            },
        ));
        let (mut view, host) = view_with(backend, 72.0);
        view.set_scale(Scale::Fixed(2.0)).unwrap();

        assert_eq!(
            view.on_pointer_event(&press(30.0, 30.0)),
            EventResponse::Handled
        );
        assert_eq!(view.page_index(), 0);
        view.on_pointer_event(&release(32.0, 31.0));

        assert_eq!(view.page_index(), 3);
        assert_eq!(
            host.scrolls.lock().last().copied(),
            Some(RectF::new(144.0, 288.0, 200.0, 40.0))
        );
    }

    #[test]
    fn link_released_elsewhere_is_dropped() {
        let mut backend = FakeBackend::new(4);
        backend.links.push((
            0,
            RectF::new(10.0, 10.0, 40.0, 10.0),
            Link::GoTo {
                page: 2,
                target: None,
            },
        ));
        let (mut view, _) = view_with(backend, 72.0);
        view.set_scale(Scale::Fixed(1.0)).unwrap();
        view.on_pointer_event(&press(20.0, 15.0));
        view.on_pointer_event(&release(300.0, 300.0));
        assert_eq!(view.page_index(), 0);
    }

    #[test]
    fn magnifier_tool_shows_while_pressed() {
        let (mut view, _) = view_with(FakeBackend::new(1), 72.0);
        view.set_scale(Scale::Fixed(1.0)).unwrap();

        view.on_pointer_event(&press(300.0, 300.0));
        assert!(view.magnifier().is_visible());
        view.on_pointer_event(&moved(310.0, 320.0));
        assert!(view.magnifier().is_visible());
        view.on_pointer_event(&release(310.0, 320.0));
        assert!(!view.magnifier().is_visible());
    }

    #[test]
    fn scroll_tool_drags_the_host() {
        let (mut view, host) = view_with(FakeBackend::new(1), 72.0);
        view.set_tool(Tool::Scroll);

        view.on_pointer_event(&press(100.0, 100.0));
        view.on_pointer_event(&moved(90.0, 120.0).with_screen(PointF::new(90.0, 120.0)));
        view.on_pointer_event(&release(90.0, 120.0));

        assert_eq!(*host.drags.lock(), vec![(10.0, -20.0)]);
        assert!(!view.magnifier().is_visible());
        assert_eq!(
            host.cursors.lock().last().copied(),
            Some(CursorShape::OpenHand)
        );
    }

    #[test]
    fn control_key_switches_cursor() {
        let (mut view, host) = view_with(FakeBackend::new(1), 72.0);
        let held = KeyInput {
            modifiers: Modifiers {
                control: true,
                ..Modifiers::default()
            },
        };
        assert_eq!(view.on_key_event(&held), EventResponse::Handled);
        assert_eq!(view.on_key_event(&held), EventResponse::Ignored);
        assert_eq!(host.cursors.lock().last().copied(), Some(CursorShape::Sync));
    }

    #[test]
    fn source_match_highlights_until_unrelated_navigation() {
        let (mut view, host) = view_with(FakeBackend::new(5), 72.0);
        view.set_scale(Scale::Fixed(1.0)).unwrap();
        let region = RectF::new(72.0, 300.0, 400.0, 11.0);

        assert!(view.show_source_match(2, vec![region]));
        assert_eq!(view.page_index(), 2);
        assert_eq!(host.scrolls.lock().last().copied(), Some(region));

        view.zoom_in();
        assert!(view.highlight().is_some());

        view.next_page(1);
        assert!(view.highlight().is_none());
        assert!(!view.show_source_match(9, vec![region]));
    }

    #[test]
    fn replacing_document_keeps_valid_page() {
        let (mut view, _) = view_with(FakeBackend::new(6), 72.0);
        view.go_to_page(4);
        view.replace_document(Arc::new(FakeBackend::new(8)));
        assert_eq!(view.page_index(), 4);
        view.replace_document(Arc::new(FakeBackend::new(2)));
        assert_eq!(view.page_index(), 1);
    }

    #[test]
    fn resolution_change_rerenders() {
        let backend = Arc::new(FakeBackend::new(1));
        let mut view = PageView::new(
            &settings(72.0),
            MagnifierConfig::default(),
            Arc::new(RecordingHost::default()),
            Arc::new(RecordingOpener::default()),
        );
        view.set_document(backend.clone());
        view.set_scale(Scale::Fixed(1.0)).unwrap();
        let before = backend.render_count();
        view.set_resolution(144.0).unwrap();
        assert_eq!(backend.render_count(), before + 1);
        assert_eq!(view.pixels_per_point(), 2.0);
        assert!(view.set_resolution(0.0).is_err());
    }
}
