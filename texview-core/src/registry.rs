//! Process-wide table of open documents and the recently-used list.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{document_id_for_path, DocumentId};

/// Identity of one viewer window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(Uuid);

impl WindowHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WindowHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Absolute form of `path` with symlinks resolved when the file exists,
/// lowercased when `fold_case` is set. Paths that do not exist are cleaned
/// lexically.
pub fn normalize_path(path: &Path, fold_case: bool) -> PathBuf {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .map(|resolved| clean(&resolved))
        .unwrap_or_else(|_| path.to_path_buf());
    if fold_case {
        PathBuf::from(resolved.to_string_lossy().to_lowercase())
    } else {
        resolved
    }
}

fn clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

pub const fn host_folds_case() -> bool {
    cfg!(any(target_os = "windows", target_os = "macos"))
}

#[derive(Debug, Default)]
struct Inner {
    open: HashMap<DocumentId, (PathBuf, WindowHandle)>,
    recent: VecDeque<(DocumentId, PathBuf)>,
}

pub struct DocumentRegistry {
    fold_case: bool,
    max_recent: usize,
    inner: Mutex<Inner>,
}

impl DocumentRegistry {
    pub fn new(max_recent: usize) -> Self {
        Self::with_case_folding(max_recent, host_folds_case())
    }

    pub fn with_case_folding(max_recent: usize, fold_case: bool) -> Self {
        Self {
            fold_case,
            max_recent: max_recent.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn folds_case(&self) -> bool {
        self.fold_case
    }

    fn key(&self, path: &Path) -> DocumentId {
        document_id_for_path(path, self.fold_case)
    }

    pub fn find_document(&self, path: &Path) -> Option<WindowHandle> {
        let key = self.key(path);
        self.inner.lock().open.get(&key).map(|(_, handle)| *handle)
    }

    /// Records `handle` as the window for `path`. If the path is already
    /// open, the existing handle is returned and the table is left alone.
    pub fn register(&self, path: &Path, handle: WindowHandle) -> WindowHandle {
        let key = self.key(path);
        let mut inner = self.inner.lock();
        if let Some((_, existing)) = inner.open.get(&key) {
            debug!(path = %path.display(), "document already registered");
            return *existing;
        }
        inner
            .open
            .insert(key, (normalize_path(path, false), handle));
        handle
    }

    /// Removes the entry for `path` if it still belongs to `handle`.
    pub fn unregister(&self, path: &Path, handle: WindowHandle) -> bool {
        let key = self.key(path);
        let mut inner = self.inner.lock();
        match inner.open.get(&key) {
            Some((_, owner)) if *owner == handle => {
                inner.open.remove(&key);
                true
            }
            Some(_) => {
                warn!(path = %path.display(), %handle, "unregister from a window that does not own the entry");
                false
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Moves `path` to the front of the recent list, evicting past the cap.
    pub fn touch(&self, path: &Path) {
        let key = self.key(path);
        let entry = normalize_path(path, false);
        let mut inner = self.inner.lock();
        inner.recent.retain(|(existing, _)| *existing != key);
        inner.recent.push_front((key, entry));
        inner.recent.truncate(self.max_recent);
    }

    pub fn recent(&self) -> Vec<PathBuf> {
        self.inner
            .lock()
            .recent
            .iter()
            .map(|(_, path)| path.clone())
            .collect()
    }

    /// Replaces the recent list, e.g. with what was persisted last run.
    pub fn seed_recent(&self, paths: Vec<PathBuf>) {
        let mut recent: VecDeque<(DocumentId, PathBuf)> = VecDeque::new();
        for path in paths {
            let key = self.key(&path);
            if recent.iter().any(|(existing, _)| *existing == key) {
                continue;
            }
            recent.push_back((key, path));
            if recent.len() == self.max_recent {
                break;
            }
        }
        self.inner.lock().recent = recent;
    }
}

impl fmt::Debug for DocumentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("DocumentRegistry")
            .field("fold_case", &self.fold_case)
            .field("open", &inner.open.len())
            .field("recent", &inner.recent.len())
            .finish()
    }
}
