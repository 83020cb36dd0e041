//! One open PDF: its view, its sync engine and the window-level flags.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::ViewerConfig;
use crate::error::ViewerResult;
use crate::events::ViewEvent;
use crate::geometry::{PointF, SizeF};
use crate::layer::{EventResponse, HostWindow, KeyInput, NullHost, PointerEvent, Surface, ViewLayer};
use crate::registry::WindowHandle;
use crate::sync::{
    IndexLoadExecutor, IndexReader, IndexStatus, InlineLoader, LoadOutcome, SourcePosition,
    Submission, SyncEngine, SyncOutcome, SyncRequest,
};
use crate::view::{PageView, Scale, ScaleMode};
use crate::{Command, Detached, DocumentBackend, ExternalOpener, SourceEditor};

/// Collaborators a window talks to.
#[derive(Clone)]
pub struct WindowServices {
    pub host: Arc<dyn HostWindow>,
    pub opener: Arc<dyn ExternalOpener>,
    pub editor: Arc<dyn SourceEditor>,
    pub index_reader: Arc<dyn IndexReader>,
    pub loader: Arc<dyn IndexLoadExecutor>,
}

impl WindowServices {
    /// Inline index loading, no host, and no editor or opener attached.
    pub fn new(index_reader: Arc<dyn IndexReader>) -> Self {
        Self {
            host: Arc::new(NullHost),
            opener: Arc::new(Detached),
            editor: Arc::new(Detached),
            index_reader,
            loader: Arc::new(InlineLoader),
        }
    }

    pub fn with_host(mut self, host: Arc<dyn HostWindow>) -> Self {
        self.host = host;
        self
    }

    pub fn with_opener(mut self, opener: Arc<dyn ExternalOpener>) -> Self {
        self.opener = opener;
        self
    }

    pub fn with_editor(mut self, editor: Arc<dyn SourceEditor>) -> Self {
        self.editor = editor;
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn IndexLoadExecutor>) -> Self {
        self.loader = loader;
        self
    }
}

impl fmt::Debug for WindowServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowServices").finish_non_exhaustive()
    }
}

/// Text shown at the bottom of a window, kept current from view events.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusLine {
    pub page: usize,
    pub page_count: usize,
    pub scale_factor: f64,
    pub scale_mode: ScaleMode,
    pub message: Option<String>,
}

impl StatusLine {
    fn apply(&mut self, event: &ViewEvent) {
        match *event {
            ViewEvent::PageChanged(page) => self.page = page,
            ViewEvent::ZoomChanged(factor) => self.scale_factor = factor,
            ViewEvent::ScaleOptionChanged(mode) => self.scale_mode = mode,
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.scale_mode {
            ScaleMode::Fixed => "fixed",
            ScaleMode::FitWidth => "fit width",
            ScaleMode::FitWindow => "fit window",
        };
        write!(
            f,
            "page {}/{}  {:.0}% ({})",
            self.page + 1,
            self.page_count,
            self.scale_factor * 100.0,
            mode
        )?;
        if let Some(message) = &self.message {
            write!(f, "  {message}")?;
        }
        Ok(())
    }
}

pub struct ViewerWindow {
    handle: WindowHandle,
    path: PathBuf,
    view: PageView,
    sync: SyncEngine,
    services: WindowServices,
    fullscreen: bool,
    typesetting: bool,
    status: Arc<Mutex<StatusLine>>,
    last_sync: Option<SyncOutcome>,
}

impl ViewerWindow {
    pub fn new(
        handle: WindowHandle,
        backend: Arc<dyn DocumentBackend>,
        config: &ViewerConfig,
        services: WindowServices,
    ) -> Self {
        let path = backend.info().path.clone();
        let mut view = PageView::new(
            &config.view,
            config.magnifier_config(),
            Arc::clone(&services.host),
            Arc::clone(&services.opener),
        );
        let status = Arc::new(Mutex::new(StatusLine {
            page_count: backend.info().page_count,
            scale_factor: view.scale_factor(),
            scale_mode: view.scale_mode(),
            ..StatusLine::default()
        }));
        let sink = Arc::clone(&status);
        view.events_mut().subscribe(move |event| sink.lock().apply(event));
        view.set_document(backend);

        let sync = SyncEngine::new(Arc::clone(&services.index_reader), path.clone());
        info!(path = %path.display(), %handle, "window opened");
        Self {
            handle,
            path,
            view,
            sync,
            services,
            fullscreen: false,
            typesetting: false,
            status,
            last_sync: None,
        }
    }

    pub fn handle(&self) -> WindowHandle {
        self.handle
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn view(&self) -> &PageView {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut PageView {
        &mut self.view
    }

    pub fn index_status(&self) -> IndexStatus {
        self.sync.status()
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn is_typesetting(&self) -> bool {
        self.typesetting
    }

    /// The retypeset action is offered only while no typesetting run is active.
    pub fn retypeset_enabled(&self) -> bool {
        !self.typesetting
    }

    pub fn status(&self) -> StatusLine {
        self.status.lock().clone()
    }

    pub fn status_text(&self) -> String {
        self.status.lock().to_string()
    }

    pub fn last_sync(&self) -> Option<&SyncOutcome> {
        self.last_sync.as_ref()
    }

    /// Entering fullscreen snapshots the zoom state and fits the page to the
    /// window; leaving restores the snapshot.
    pub fn toggle_fullscreen(&mut self) {
        if self.fullscreen {
            self.view.restore_state();
            self.fullscreen = false;
        } else {
            self.view.save_state();
            if let Err(err) = self.view.set_scale(Scale::FitWindow) {
                warn!(?err, "failed to fit page for fullscreen");
            }
            self.fullscreen = true;
        }
        debug!(fullscreen = self.fullscreen, "fullscreen toggled");
    }

    pub fn set_typesetting(&mut self, running: bool) {
        self.typesetting = running;
        self.status.lock().message = running.then(|| "typesetting…".to_string());
    }

    /// Handles a "rebuild complete" notification: shows the new document and
    /// replaces the correspondence index.
    #[instrument(skip(self, backend), fields(path = %self.path.display()))]
    pub fn rebuild_complete(&mut self, backend: Arc<dyn DocumentBackend>) {
        self.status.lock().page_count = backend.info().page_count;
        self.view.replace_document(backend);
        let job = self.sync.invalidate();
        if let Some(outcome) = self.services.loader.execute(job) {
            self.finish_index_load(outcome);
        }
    }

    pub fn sync_from_source(&mut self, position: SourcePosition) -> SyncOutcome {
        self.run_sync(SyncRequest::Forward(position))
    }

    pub fn sync_click(&mut self, page: usize, point: PointF) -> SyncOutcome {
        self.run_sync(SyncRequest::Inverse { page, point })
    }

    /// Installs an index loaded off-thread and runs the request that waited
    /// for it. Returns that request's outcome.
    pub fn finish_index_load(&mut self, outcome: LoadOutcome) -> Option<SyncOutcome> {
        let pending = self.sync.complete(outcome)?;
        let result = match self.sync.submit(pending) {
            Submission::Ready(request) => self.execute_sync(request),
            Submission::Unavailable(err) => SyncOutcome::IndexUnavailable(err.to_string()),
            other => {
                debug!(?other, "index still loading after completion");
                SyncOutcome::Pending
            }
        };
        Some(self.record(result))
    }

    fn run_sync(&mut self, request: SyncRequest) -> SyncOutcome {
        let outcome = match self.sync.submit(request) {
            Submission::Ready(request) => self.execute_sync(request),
            Submission::Queued => SyncOutcome::Pending,
            Submission::Load(job) => match self.services.loader.execute(job) {
                Some(loaded) => {
                    return self
                        .finish_index_load(loaded)
                        .unwrap_or(SyncOutcome::Pending)
                }
                None => SyncOutcome::Pending,
            },
            Submission::Unavailable(err) => SyncOutcome::IndexUnavailable(err.to_string()),
        };
        self.record(outcome)
    }

    fn execute_sync(&mut self, request: SyncRequest) -> SyncOutcome {
        match request {
            SyncRequest::Forward(position) => match self.sync.forward(&position) {
                Ok(Some(hit)) => {
                    if self.view.show_source_match(hit.page, hit.regions) {
                        SyncOutcome::Navigated {
                            page: hit.page,
                            line: hit.line,
                        }
                    } else {
                        warn!(page = hit.page, "sync target outside the document");
                        SyncOutcome::NoMatch
                    }
                }
                Ok(None) => SyncOutcome::NoMatch,
                Err(err) => SyncOutcome::IndexUnavailable(err.to_string()),
            },
            SyncRequest::Inverse { page, point } => match self.sync.inverse(page, point) {
                Ok(Some(location)) => match self.services.editor.open_source(&location) {
                    Ok(()) => SyncOutcome::EditorNotified(location),
                    Err(err) => {
                        warn!(?err, "editor rejected inverse search");
                        SyncOutcome::EditorFailed(format!("{err:#}"))
                    }
                },
                Ok(None) => SyncOutcome::NoMatch,
                Err(err) => SyncOutcome::IndexUnavailable(err.to_string()),
            },
        }
    }

    fn record(&mut self, outcome: SyncOutcome) -> SyncOutcome {
        debug!(%outcome, "sync finished");
        self.status.lock().message = Some(outcome.to_string());
        self.last_sync = Some(outcome.clone());
        outcome
    }

    /// Routes a pointer event to the view; control-clicks become inverse searches.
    pub fn handle_pointer(&mut self, event: &PointerEvent) -> EventResponse {
        let response = self.view.on_pointer_event(event);
        if let EventResponse::SyncClick { page, point } = response {
            self.sync_click(page, point);
        }
        response
    }

    pub fn handle_key(&mut self, event: &KeyInput) -> EventResponse {
        self.view.on_key_event(event)
    }

    pub fn render(&self, surface: &mut dyn Surface) {
        self.view.render(surface);
    }

    /// Applies a window-level command. Document switching is the session's job.
    pub fn apply(&mut self, command: Command) -> ViewerResult<()> {
        match command {
            Command::FirstPage => self.view.first_page(),
            Command::LastPage => self.view.last_page(),
            Command::NextPage { count } => self.view.next_page(count),
            Command::PrevPage { count } => self.view.prev_page(count),
            Command::GotoPage { page } => self.view.go_to_page(page),
            Command::ZoomIn => self.view.zoom_in(),
            Command::ZoomOut => self.view.zoom_out(),
            Command::ActualSize => self.view.actual_size(),
            Command::FitWidth => self.view.set_scale(Scale::FitWidth)?,
            Command::FitWindow => self.view.set_scale(Scale::FitWindow)?,
            Command::SetScale { factor } => self.view.set_scale(Scale::Fixed(factor))?,
            Command::Resize { width, height } => self.view.resize(SizeF::new(width, height)),
            Command::WindowShown => self.view.window_shown(),
            Command::ToggleFullScreen => self.toggle_fullscreen(),
            Command::SetTool { tool } => self.view.set_tool(tool),
            Command::CycleMagnifierSize => self.view.cycle_magnifier_size(),
            Command::ToggleMagnifierShape => self.view.toggle_magnifier_shape(),
            Command::SyncFromSource { position } => {
                self.sync_from_source(position);
            }
            Command::SwitchDocument { .. }
            | Command::NextDocument
            | Command::CloseDocument { .. } => {
                debug!(?command, "document command ignored by window");
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ViewerWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewerWindow")
            .field("handle", &self.handle)
            .field("path", &self.path)
            .field("view", &self.view)
            .field("sync", &self.sync)
            .field("fullscreen", &self.fullscreen)
            .finish()
    }
}
