//! Source ↔ page synchronization on top of a correspondence index.
//!
//! The index is opaque: an [`IndexReader`] turns a file into a boxed
//! [`CorrespondenceIndex`] and the engine only ever queries it. A loaded index
//! is owned by [`LoadedIndex`] and released on drop; a rebuild notification
//! drops it and starts a fresh load instead of touching it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::IndexError;
use crate::geometry::{PointF, RectF};

/// A position in a source file. Lines are 1-based; column 0 means "any".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

/// Result of an inverse query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: u32,
    pub column: Option<u32>,
}

/// One box produced by a source query; `rect` is in native page space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceMatch {
    pub page: usize,
    pub rect: RectF,
    pub line: u32,
}

pub trait CorrespondenceIndex: Send {
    fn query_by_source(
        &self,
        file: &Path,
        line: u32,
        column: u32,
    ) -> Result<Vec<SourceMatch>, IndexError>;

    fn query_by_page(&self, page: usize, point: PointF)
        -> Result<Option<SourceLocation>, IndexError>;
}

pub trait IndexReader: Send + Sync {
    /// Where the index for `document` lives, if one exists.
    fn index_path(&self, document: &Path) -> Option<PathBuf> {
        default_index_candidates(document)
            .into_iter()
            .find(|candidate| candidate.is_file())
    }

    fn load(&self, index_path: &Path) -> Result<Box<dyn CorrespondenceIndex>, IndexError>;
}

/// `doc.pdf` → `doc.synctex.gz`, then `doc.synctex`.
pub fn default_index_candidates(document: &Path) -> Vec<PathBuf> {
    vec![
        document.with_extension("synctex.gz"),
        document.with_extension("synctex"),
    ]
}

/// An index owned for the lifetime of this value.
pub struct LoadedIndex {
    path: PathBuf,
    index: Box<dyn CorrespondenceIndex>,
}

impl LoadedIndex {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index(&self) -> &dyn CorrespondenceIndex {
        self.index.as_ref()
    }
}

impl Drop for LoadedIndex {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "released correspondence index");
    }
}

impl fmt::Debug for LoadedIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedIndex")
            .field("path", &self.path)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncRequest {
    Forward(SourcePosition),
    Inverse { page: usize, point: PointF },
}

/// A load ready to run on any thread.
pub struct LoadJob {
    reader: Arc<dyn IndexReader>,
    document: PathBuf,
    generation: u64,
}

impl LoadJob {
    pub fn document(&self) -> &Path {
        &self.document
    }

    #[instrument(skip(self), fields(document = %self.document.display(), generation = self.generation))]
    pub fn run(self) -> LoadOutcome {
        let result = match self.reader.index_path(&self.document) {
            None => Err(IndexError::NotFound(self.document.clone())),
            Some(path) => self
                .reader
                .load(&path)
                .map(|index| LoadedIndex { path, index }),
        };
        LoadOutcome {
            document: self.document,
            generation: self.generation,
            result,
        }
    }
}

impl fmt::Debug for LoadJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadJob")
            .field("document", &self.document)
            .field("generation", &self.generation)
            .finish()
    }
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub document: PathBuf,
    generation: u64,
    pub result: Result<LoadedIndex, IndexError>,
}

/// Runs index loads. Returns the outcome when the job finished inline;
/// deferred executors return `None` and deliver the outcome later.
pub trait IndexLoadExecutor: Send + Sync {
    fn execute(&self, job: LoadJob) -> Option<LoadOutcome>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InlineLoader;

impl IndexLoadExecutor for InlineLoader {
    fn execute(&self, job: LoadJob) -> Option<LoadOutcome> {
        Some(job.run())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Unloaded,
    Loading,
    Ready,
    Unavailable,
}

enum IndexSlot {
    Unloaded,
    Loading { pending: Option<SyncRequest> },
    Ready(LoadedIndex),
    Unavailable(IndexError),
}

/// What the caller must do with a submitted request.
#[derive(Debug)]
pub enum Submission {
    /// The index is loaded; run the request now.
    Ready(SyncRequest),
    /// A load is in flight and the request is parked as the latest pending one.
    Queued,
    /// A load has to start; the request is parked until it completes.
    Load(LoadJob),
    Unavailable(IndexError),
}

/// Forward-search result chosen by [`select_forward_match`].
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardHit {
    pub page: usize,
    pub line: u32,
    pub regions: Vec<RectF>,
}

/// Status reported for a sync request. None of these are fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Navigated { page: usize, line: u32 },
    EditorNotified(SourceLocation),
    Pending,
    NoMatch,
    IndexUnavailable(String),
    EditorFailed(String),
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Navigated { page, line } => {
                write!(f, "synced line {} to page {}", line, page + 1)
            }
            SyncOutcome::EditorNotified(location) => write!(
                f,
                "opened {}:{}",
                location.file.display(),
                location.line
            ),
            SyncOutcome::Pending => write!(f, "loading sync data…"),
            SyncOutcome::NoMatch => write!(f, "no sync match"),
            SyncOutcome::IndexUnavailable(reason) => write!(f, "sync unavailable: {reason}"),
            SyncOutcome::EditorFailed(reason) => write!(f, "failed to open editor: {reason}"),
        }
    }
}

pub struct SyncEngine {
    reader: Arc<dyn IndexReader>,
    document: PathBuf,
    generation: u64,
    slot: IndexSlot,
}

impl SyncEngine {
    pub fn new(reader: Arc<dyn IndexReader>, document: PathBuf) -> Self {
        Self {
            reader,
            document,
            generation: 0,
            slot: IndexSlot::Unloaded,
        }
    }

    pub fn document(&self) -> &Path {
        &self.document
    }

    pub fn status(&self) -> IndexStatus {
        match self.slot {
            IndexSlot::Unloaded => IndexStatus::Unloaded,
            IndexSlot::Loading { .. } => IndexStatus::Loading,
            IndexSlot::Ready(_) => IndexStatus::Ready,
            IndexSlot::Unavailable(_) => IndexStatus::Unavailable,
        }
    }

    pub fn submit(&mut self, request: SyncRequest) -> Submission {
        match &mut self.slot {
            IndexSlot::Ready(_) => return Submission::Ready(request),
            IndexSlot::Loading { pending } => {
                if pending.replace(request).is_some() {
                    debug!("dropped superseded pending sync request");
                }
                return Submission::Queued;
            }
            IndexSlot::Unavailable(err) => return Submission::Unavailable(err.clone()),
            IndexSlot::Unloaded => {}
        }
        Submission::Load(self.start_load(Some(request)))
    }

    /// Handles a "rebuild complete" notification: frees the current index and
    /// returns the job that loads its replacement.
    pub fn invalidate(&mut self) -> LoadJob {
        let pending = match std::mem::replace(&mut self.slot, IndexSlot::Unloaded) {
            IndexSlot::Loading { pending } => pending,
            IndexSlot::Ready(previous) => {
                drop(previous);
                None
            }
            IndexSlot::Unloaded | IndexSlot::Unavailable(_) => None,
        };
        self.start_load(pending)
    }

    /// Installs a finished load. Returns the request parked while it ran, if
    /// the outcome is current; stale outcomes are dropped.
    pub fn complete(&mut self, outcome: LoadOutcome) -> Option<SyncRequest> {
        if outcome.generation != self.generation {
            debug!(
                stale = outcome.generation,
                current = self.generation,
                "discarding superseded index load"
            );
            return None;
        }
        let IndexSlot::Loading { pending } = &mut self.slot else {
            return None;
        };
        let pending = pending.take();
        self.slot = match outcome.result {
            Ok(index) => {
                info!(path = %index.path().display(), "correspondence index loaded");
                IndexSlot::Ready(index)
            }
            Err(err) => {
                warn!(%err, "correspondence index unavailable");
                IndexSlot::Unavailable(err)
            }
        };
        pending
    }

    pub fn forward(&self, position: &SourcePosition) -> Result<Option<ForwardHit>, IndexError> {
        let index = self.loaded()?.index();
        let candidates = index.query_by_source(&position.file, position.line, position.column)?;
        Ok(select_forward_match(&candidates, position.line))
    }

    pub fn inverse(&self, page: usize, point: PointF) -> Result<Option<SourceLocation>, IndexError> {
        self.loaded()?.index().query_by_page(page, point)
    }

    fn loaded(&self) -> Result<&LoadedIndex, IndexError> {
        match &self.slot {
            IndexSlot::Ready(index) => Ok(index),
            IndexSlot::Unavailable(err) => Err(err.clone()),
            IndexSlot::Unloaded | IndexSlot::Loading { .. } => {
                Err(IndexError::NotFound(self.document.clone()))
            }
        }
    }

    fn start_load(&mut self, pending: Option<SyncRequest>) -> LoadJob {
        self.generation += 1;
        self.slot = IndexSlot::Loading { pending };
        debug!(generation = self.generation, "starting index load");
        LoadJob {
            reader: Arc::clone(&self.reader),
            document: self.document.clone(),
            generation: self.generation,
        }
    }
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("document", &self.document)
            .field("generation", &self.generation)
            .field("status", &self.status())
            .finish()
    }
}

/// Picks the boxes for a forward search.
///
/// Line choice: the requested line if any box has it; otherwise the closest
/// line before it; otherwise the closest line after it. The page is the page
/// of the first box on the chosen line, and the hit carries every box of that
/// line on that page.
pub fn select_forward_match(candidates: &[SourceMatch], line: u32) -> Option<ForwardHit> {
    let below = candidates
        .iter()
        .filter(|candidate| candidate.line <= line)
        .map(|candidate| candidate.line)
        .max();
    let chosen = below.or_else(|| {
        candidates
            .iter()
            .filter(|candidate| candidate.line > line)
            .map(|candidate| candidate.line)
            .min()
    })?;
    let page = candidates
        .iter()
        .find(|candidate| candidate.line == chosen)?
        .page;
    let regions = candidates
        .iter()
        .filter(|candidate| candidate.line == chosen && candidate.page == page)
        .map(|candidate| candidate.rect)
        .collect();
    Some(ForwardHit {
        page,
        line: chosen,
        regions,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    fn hit(page: usize, line: u32) -> SourceMatch {
        SourceMatch {
            page,
            rect: RectF::new(72.0, f64::from(line) * 12.0, 400.0, 10.0),
            line,
        }
    }

    /// Index over a fixed candidate list; counts live instances.
    pub struct FakeIndex {
        pub matches: Vec<SourceMatch>,
        pub location: Option<SourceLocation>,
        pub live: Arc<AtomicUsize>,
    }

    impl Drop for FakeIndex {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl CorrespondenceIndex for FakeIndex {
        fn query_by_source(
            &self,
            _file: &Path,
            _line: u32,
            _column: u32,
        ) -> Result<Vec<SourceMatch>, IndexError> {
            Ok(self.matches.clone())
        }

        fn query_by_page(
            &self,
            _page: usize,
            _point: PointF,
        ) -> Result<Option<SourceLocation>, IndexError> {
            Ok(self.location.clone())
        }
    }

    pub struct FakeReader {
        pub matches: Mutex<Vec<SourceMatch>>,
        pub location: Option<SourceLocation>,
        pub present: bool,
        pub loads: AtomicUsize,
        pub live: Arc<AtomicUsize>,
    }

    impl FakeReader {
        pub fn new(matches: Vec<SourceMatch>) -> Self {
            Self {
                matches: Mutex::new(matches),
                location: Some(SourceLocation {
                    file: PathBuf::from("/tmp/paper.tex"),
                    line: 42,
                    column: None,
                }),
                present: true,
                loads: AtomicUsize::new(0),
                live: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn missing() -> Self {
            Self {
                present: false,
                ..Self::new(Vec::new())
            }
        }
    }

    impl IndexReader for FakeReader {
        fn index_path(&self, document: &Path) -> Option<PathBuf> {
            self.present.then(|| document.with_extension("synctex.gz"))
        }

        fn load(&self, _index_path: &Path) -> Result<Box<dyn CorrespondenceIndex>, IndexError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeIndex {
                matches: self.matches.lock().clone(),
                location: self.location.clone(),
                live: Arc::clone(&self.live),
            }))
        }
    }

    fn forward(line: u32) -> SyncRequest {
        SyncRequest::Forward(SourcePosition {
            file: PathBuf::from("/tmp/paper.tex"),
            line,
            column: 0,
        })
    }

    #[test]
    fn tie_break_prefers_nearest_line_at_or_below() {
        let both = [hit(2, 48), hit(3, 55)];
        assert_eq!(select_forward_match(&both, 50).unwrap().line, 48);

        let below_only = [hit(2, 48), hit(1, 30)];
        assert_eq!(select_forward_match(&below_only, 50).unwrap().line, 48);

        let above_only = [hit(5, 60), hit(3, 55)];
        let chosen = select_forward_match(&above_only, 50).unwrap();
        assert_eq!(chosen.line, 55);
        assert_eq!(chosen.page, 3);

        assert_eq!(select_forward_match(&[], 50), None);
    }

    #[test]
    fn exact_line_wins_and_collects_boxes_on_first_page() {
        let candidates = [hit(4, 50), hit(2, 48), hit(4, 50), hit(5, 50)];
        let chosen = select_forward_match(&candidates, 50).unwrap();
        assert_eq!(chosen.line, 50);
        assert_eq!(chosen.page, 4);
        assert_eq!(chosen.regions.len(), 2);
    }

    #[test]
    fn first_request_starts_a_single_load() {
        let reader = Arc::new(FakeReader::new(vec![hit(0, 10)]));
        let mut engine = SyncEngine::new(reader.clone(), PathBuf::from("/tmp/paper.pdf"));

        let Submission::Load(job) = engine.submit(forward(10)) else {
            panic!("expected a load");
        };
        assert!(matches!(engine.submit(forward(11)), Submission::Queued));
        assert!(matches!(engine.submit(forward(12)), Submission::Queued));
        assert_eq!(engine.status(), IndexStatus::Loading);

        let pending = engine.complete(job.run());
        assert_eq!(pending, Some(forward(12)));
        assert_eq!(reader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(engine.status(), IndexStatus::Ready);
        assert!(matches!(engine.submit(forward(13)), Submission::Ready(_)));
    }

    #[test]
    fn rebuild_frees_old_index_and_reloads() {
        let reader = Arc::new(FakeReader::new(vec![hit(0, 10)]));
        let mut engine = SyncEngine::new(reader.clone(), PathBuf::from("/tmp/paper.pdf"));
        let Submission::Load(job) = engine.submit(forward(10)) else {
            panic!("expected a load");
        };
        engine.complete(job.run());
        assert_eq!(reader.live.load(Ordering::SeqCst), 1);

        *reader.matches.lock() = vec![hit(3, 10)];
        let job = engine.invalidate();
        assert_eq!(reader.live.load(Ordering::SeqCst), 0);
        assert_eq!(engine.status(), IndexStatus::Loading);

        assert_eq!(engine.complete(job.run()), None);
        assert_eq!(reader.live.load(Ordering::SeqCst), 1);
        let position = SourcePosition {
            file: PathBuf::from("/tmp/paper.tex"),
            line: 10,
            column: 0,
        };
        assert_eq!(engine.forward(&position).unwrap().unwrap().page, 3);
    }

    #[test]
    fn superseded_load_is_discarded() {
        let reader = Arc::new(FakeReader::new(vec![hit(0, 10)]));
        let mut engine = SyncEngine::new(reader.clone(), PathBuf::from("/tmp/paper.pdf"));
        let Submission::Load(stale) = engine.submit(forward(10)) else {
            panic!("expected a load");
        };
        let fresh = engine.invalidate();

        assert_eq!(engine.complete(stale.run()), None);
        assert_eq!(engine.status(), IndexStatus::Loading);
        assert_eq!(reader.live.load(Ordering::SeqCst), 0);

        assert_eq!(engine.complete(fresh.run()), Some(forward(10)));
        assert_eq!(engine.status(), IndexStatus::Ready);
    }

    #[test]
    fn missing_index_is_reported_not_retried() {
        let reader = Arc::new(FakeReader::missing());
        let mut engine = SyncEngine::new(reader.clone(), PathBuf::from("/tmp/paper.pdf"));
        let Submission::Load(job) = engine.submit(forward(10)) else {
            panic!("expected a load");
        };
        assert_eq!(engine.complete(job.run()), Some(forward(10)));
        assert_eq!(engine.status(), IndexStatus::Unavailable);
        assert!(matches!(
            engine.submit(forward(10)),
            Submission::Unavailable(IndexError::NotFound(_))
        ));
        assert_eq!(reader.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn inverse_query_uses_loaded_index() {
        let reader = Arc::new(FakeReader::new(Vec::new()));
        let mut engine = SyncEngine::new(reader, PathBuf::from("/tmp/paper.pdf"));
        assert!(engine.inverse(0, PointF::new(1.0, 1.0)).is_err());

        let Submission::Load(job) = engine.submit(SyncRequest::Inverse {
            page: 0,
            point: PointF::new(1.0, 1.0),
        }) else {
            panic!("expected a load");
        };
        engine.complete(job.run());
        let location = engine.inverse(0, PointF::new(1.0, 1.0)).unwrap().unwrap();
        assert_eq!(location.line, 42);
    }
}
