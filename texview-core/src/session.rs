use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::config::ViewerConfig;
use crate::error::{ViewerError, ViewerResult};
use crate::registry::{DocumentRegistry, WindowHandle};
use crate::store::RecentStore;
use crate::sync::{LoadOutcome, SourcePosition, SyncOutcome};
use crate::window::{ViewerWindow, WindowServices};
use crate::{Command, DocumentProvider};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    WindowOpened(WindowHandle),
    WindowClosed(WindowHandle),
    ActiveWindowChanged(WindowHandle),
    RedrawNeeded(WindowHandle),
}

/// Every open viewer window plus the state they share.
pub struct Session {
    windows: Vec<ViewerWindow>,
    active: usize,
    registry: Arc<DocumentRegistry>,
    recent: Arc<dyn RecentStore>,
    services: WindowServices,
    config: ViewerConfig,
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl Session {
    pub fn new(
        config: ViewerConfig,
        registry: Arc<DocumentRegistry>,
        recent: Arc<dyn RecentStore>,
        services: WindowServices,
    ) -> Self {
        match recent.load() {
            Ok(paths) => registry.seed_recent(paths),
            Err(err) => warn!(?err, "failed to load recent documents"),
        }
        Self {
            windows: Vec::new(),
            active: 0,
            registry,
            recent,
            services,
            config,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Arc<Mutex<Vec<SessionEvent>>> {
        Arc::clone(&self.events)
    }

    pub fn registry(&self) -> &Arc<DocumentRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn windows(&self) -> &[ViewerWindow] {
        &self.windows
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active(&self) -> Option<&ViewerWindow> {
        self.windows.get(self.active)
    }

    pub fn active_mut(&mut self) -> Option<&mut ViewerWindow> {
        self.windows.get_mut(self.active)
    }

    pub fn window_mut(&mut self, path: &Path) -> Option<&mut ViewerWindow> {
        let index = self.find_window(path)?;
        self.windows.get_mut(index)
    }

    fn find_window(&self, path: &Path) -> Option<usize> {
        let handle = self.registry.find_document(path)?;
        self.windows.iter().position(|window| window.handle() == handle)
    }

    fn emit(&self, event: SessionEvent) {
        self.events.lock().push(event);
    }

    fn activate(&mut self, index: usize) {
        if let Some(window) = self.windows.get(index) {
            self.active = index;
            self.emit(SessionEvent::ActiveWindowChanged(window.handle()));
        }
    }

    /// Opens `path` in a new window, or raises the window already showing it.
    /// Failure to open leaves the session untouched.
    #[instrument(skip(self, provider))]
    pub async fn open_with<P: DocumentProvider + ?Sized>(
        &mut self,
        provider: &P,
        path: PathBuf,
    ) -> ViewerResult<WindowHandle> {
        if let Some(index) = self.find_window(&path) {
            debug!("document already open, raising its window");
            self.activate(index);
            self.touch(&path);
            return Ok(self.windows[index].handle());
        }

        let backend = provider
            .open(&path)
            .await
            .map_err(|source| ViewerError::DocumentLoad {
                path: path.clone(),
                source,
            })?;
        let handle = self.registry.register(&path, WindowHandle::new());
        let window = ViewerWindow::new(handle, backend, &self.config, self.services.clone());
        self.windows.push(window);
        self.emit(SessionEvent::WindowOpened(handle));
        self.activate(self.windows.len() - 1);
        self.touch(&path);
        Ok(handle)
    }

    fn touch(&self, path: &Path) {
        self.registry.touch(path);
        if let Err(err) = self.persist() {
            warn!(?err, "failed to save recent documents");
        }
    }

    pub fn apply(&mut self, command: Command) -> ViewerResult<()> {
        match command {
            Command::SwitchDocument { index } => self.activate(index),
            Command::NextDocument => {
                if self.windows.len() > 1 {
                    self.activate((self.active + 1) % self.windows.len());
                }
            }
            Command::CloseDocument { index } => {
                self.close(index);
            }
            command => {
                let Some(window) = self.windows.get_mut(self.active) else {
                    return Ok(());
                };
                window.apply(command)?;
                let handle = window.handle();
                self.emit(SessionEvent::RedrawNeeded(handle));
            }
        }
        Ok(())
    }

    /// Closes the window at `index`, releasing its registry entry.
    pub fn close(&mut self, index: usize) -> Option<WindowHandle> {
        if index >= self.windows.len() {
            return None;
        }
        let window = self.windows.remove(index);
        let handle = window.handle();
        self.registry.unregister(window.path(), handle);
        self.emit(SessionEvent::WindowClosed(handle));
        if self.windows.is_empty() {
            self.active = 0;
        } else if self.active > index || self.active >= self.windows.len() {
            self.activate(self.active.saturating_sub(1).min(self.windows.len() - 1));
        } else if self.active == index {
            self.activate(self.active);
        }
        Some(handle)
    }

    /// Hands an index loaded off-thread to the window it belongs to.
    pub fn deliver_index_load(&mut self, outcome: LoadOutcome) -> Option<SyncOutcome> {
        let Some(index) = self.find_window(&outcome.document) else {
            debug!(document = %outcome.document.display(), "index load for a closed window");
            return None;
        };
        let window = &mut self.windows[index];
        let result = window.finish_index_load(outcome);
        let handle = window.handle();
        self.emit(SessionEvent::RedrawNeeded(handle));
        result
    }

    /// Forward search requested by the editor for `document`.
    pub fn sync_from_source(
        &mut self,
        document: &Path,
        position: SourcePosition,
    ) -> Option<SyncOutcome> {
        let index = self.find_window(document)?;
        let outcome = self.windows[index].sync_from_source(position);
        self.activate(index);
        Some(outcome)
    }

    /// The editor finished typesetting `path`: reopen it and reload its index.
    #[instrument(skip(self, provider))]
    pub async fn rebuild_complete<P: DocumentProvider + ?Sized>(
        &mut self,
        provider: &P,
        path: &Path,
    ) -> ViewerResult<()> {
        let Some(index) = self.find_window(path) else {
            debug!("rebuilt document is not open");
            return Ok(());
        };
        let backend = provider
            .open(path)
            .await
            .map_err(|source| ViewerError::DocumentLoad {
                path: path.to_path_buf(),
                source,
            })?;
        let window = &mut self.windows[index];
        window.set_typesetting(false);
        window.rebuild_complete(backend);
        let handle = window.handle();
        self.emit(SessionEvent::RedrawNeeded(handle));
        Ok(())
    }

    pub fn set_typesetting(&mut self, path: &Path, running: bool) {
        if let Some(window) = self.window_mut(path) {
            window.set_typesetting(running);
            let handle = window.handle();
            self.emit(SessionEvent::RedrawNeeded(handle));
        }
    }

    pub fn persist(&self) -> anyhow::Result<()> {
        self.recent.save(&self.registry.recent())
    }
}
