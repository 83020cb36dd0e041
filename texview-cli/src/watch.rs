//! Notices when a TeX run rewrites an open PDF or its SyncTeX file.
//!
//! A typeset writes the output in several steps, so changes are collected per
//! document and reported once the files have been quiet for [`SETTLE`].

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use anyhow::Result;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use texview_synctex::pdf_for_index;
use tracing::{debug, warn};

use crate::remote::is_request;

pub const SETTLE: Duration = Duration::from_millis(300);

#[derive(Debug, Default, PartialEq, Eq)]
pub struct WatchUpdate {
    /// Documents whose files just started changing.
    pub started: Vec<PathBuf>,
    /// Documents that changed and have since settled.
    pub settled: Vec<PathBuf>,
    /// Forward-search request files that appeared in the spool directory.
    pub requests: Vec<PathBuf>,
}

#[derive(Debug, Default)]
struct ChangeTracker {
    pending: HashMap<PathBuf, Instant>,
}

impl ChangeTracker {
    /// Records a change; returns true when the document was not already pending.
    fn note(&mut self, document: PathBuf, at: Instant) -> bool {
        self.pending.insert(document, at).is_none()
    }

    fn settled(&mut self, now: Instant) -> Vec<PathBuf> {
        let ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) >= SETTLE)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &ready {
            self.pending.remove(path);
        }
        ready
    }
}

pub struct DocumentWatcher {
    watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    directories: HashSet<PathBuf>,
    spool: Option<PathBuf>,
    tracker: ChangeTracker,
}

impl DocumentWatcher {
    pub fn new() -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )?;
        Ok(Self {
            watcher,
            rx,
            directories: HashSet::new(),
            spool: None,
            tracker: ChangeTracker::default(),
        })
    }

    /// Watches the directory holding `document`, since TeX engines often
    /// replace the output file instead of writing it in place.
    pub fn watch_document(&mut self, document: &Path) -> Result<()> {
        let document = document.canonicalize()?;
        let Some(directory) = document.parent() else {
            return Ok(());
        };
        if self.directories.insert(directory.to_path_buf()) {
            self.watcher.watch(directory, RecursiveMode::NonRecursive)?;
            debug!(directory = %directory.display(), "watching for rebuilds");
        }
        Ok(())
    }

    /// Watches `spool` for forward-search requests.
    pub fn watch_requests(&mut self, spool: &Path) -> Result<()> {
        std::fs::create_dir_all(spool)?;
        let spool = spool.canonicalize()?;
        self.watcher.watch(&spool, RecursiveMode::NonRecursive)?;
        debug!(directory = %spool.display(), "watching for forward requests");
        self.spool = Some(spool);
        Ok(())
    }

    pub fn poll(&mut self, now: Instant) -> WatchUpdate {
        let mut update = WatchUpdate::default();
        while let Ok(event) = self.rx.try_recv() {
            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    warn!(?err, "file watch error");
                    continue;
                }
            };
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                continue;
            }
            for path in event.paths {
                if request_in(self.spool.as_deref(), &path) {
                    if !update.requests.contains(&path) {
                        update.requests.push(path);
                    }
                    continue;
                }
                if let Some(document) = document_for(&path) {
                    if self.tracker.note(document.clone(), now) {
                        update.started.push(document);
                    }
                }
            }
        }
        update.settled = self.tracker.settled(now);
        update
    }
}

fn request_in(spool: Option<&Path>, path: &Path) -> bool {
    spool.is_some_and(|spool| path.parent() == Some(spool)) && is_request(path)
}

/// The PDF a changed file belongs to, if it is one we care about.
fn document_for(path: &Path) -> Option<PathBuf> {
    if path.extension().is_some_and(|ext| ext == "pdf") {
        Some(path.to_path_buf())
    } else {
        pdf_for_index(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outputs_and_indexes_map_to_their_pdf() {
        assert_eq!(
            document_for(Path::new("/w/paper.pdf")),
            Some(PathBuf::from("/w/paper.pdf"))
        );
        assert_eq!(
            document_for(Path::new("/w/paper.synctex.gz")),
            Some(PathBuf::from("/w/paper.pdf"))
        );
        assert_eq!(document_for(Path::new("/w/paper.aux")), None);
    }

    #[test]
    fn requests_only_come_from_the_spool() {
        let spool = Path::new("/data/requests");
        assert!(request_in(Some(spool), Path::new("/data/requests/a.json")));
        assert!(!request_in(Some(spool), Path::new("/data/requests/.a.json.part")));
        assert!(!request_in(Some(spool), Path::new("/w/a.json")));
        assert!(!request_in(None, Path::new("/data/requests/a.json")));
    }

    #[test]
    fn changes_settle_after_a_quiet_period() {
        let mut tracker = ChangeTracker::default();
        let start = Instant::now();
        let doc = PathBuf::from("/w/paper.pdf");

        assert!(tracker.note(doc.clone(), start));
        assert!(!tracker.note(doc.clone(), start + Duration::from_millis(200)));
        assert!(tracker.settled(start + Duration::from_millis(400)).is_empty());

        let ready = tracker.settled(start + Duration::from_millis(500));
        assert_eq!(ready, vec![doc.clone()]);
        assert!(tracker.settled(start + Duration::from_secs(5)).is_empty());
        assert!(tracker.note(doc, start + Duration::from_secs(6)));
    }
}
