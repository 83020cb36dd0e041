use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod events;
pub mod geometry;
pub mod layer;
pub mod links;
pub mod magnifier;
pub mod registry;
pub mod session;
pub mod store;
pub mod sync;
pub mod view;
pub mod window;

pub use config::{
    load_config, MagnifierSettings, RecentSettings, SyncSettings, ViewSettings, ViewerConfig,
};
pub use error::{IndexError, ViewerError, ViewerResult};
pub use events::{EventBus, ViewEvent};
pub use geometry::{PageGeometry, PointF, RectF, Rotation, SizeF, POINTS_PER_INCH};
pub use layer::{
    Clip, CursorShape, EventResponse, HostWindow, KeyInput, Modifiers, NullHost, PointerButton,
    PointerEvent, PointerKind, Surface, ViewLayer,
};
pub use links::{Link, LinkAction, LinkDispatcher};
pub use magnifier::{Magnifier, MagnifierConfig, MagnifierEntry, MagnifierShape, MagnifierSize};
pub use registry::{normalize_path, DocumentRegistry, WindowHandle};
pub use session::{Session, SessionEvent};
pub use store::{FileRecentStore, MemoryRecentStore, RecentStore};
pub use sync::{
    select_forward_match, CorrespondenceIndex, ForwardHit, IndexLoadExecutor, IndexReader,
    IndexStatus, InlineLoader, LoadJob, LoadOutcome, LoadedIndex, SourceLocation, SourceMatch,
    SourcePosition, Submission, SyncEngine, SyncOutcome, SyncRequest,
};
pub use view::{HighlightPath, PageContent, PageView, SavedState, Scale, ScaleMode, Tool};
pub use window::{StatusLine, ViewerWindow, WindowServices};

pub type DocumentId = Uuid;

const DOCUMENT_NAMESPACE: Uuid = Uuid::from_u128(0x3f1d7a52_0c8e_5b6a_9d42_6e1b8c0f27d9);

/// Stable identity for a document, derived from its normalized path.
pub fn document_id_for_path(path: &Path, fold_case: bool) -> DocumentId {
    let normalized = normalize_path(path, fold_case);
    let rendered = normalized.to_string_lossy();
    Uuid::new_v5(&DOCUMENT_NAMESPACE, rendered.as_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub path: PathBuf,
    pub page_count: usize,
    pub metadata: DocumentMetadata,
}

/// A rasterization request. `region` selects a sub-rectangle of the output in
/// pixels; `None` renders the whole page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub page_index: usize,
    pub pixels_per_point: f64,
    pub region: Option<RectF>,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            page_index: 0,
            pixels_per_point: 1.0,
            region: None,
        }
    }
}

/// RGBA8 pixel buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RenderImage {
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            pixels.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            pixels,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    pub image: RenderImage,
    /// Displayed page size in points.
    pub page_size: SizeF,
}

/// Rendering engine view of one open document.
///
/// Page-space points passed to and returned from the backend are native
/// (unrotated) coordinates in PostScript points with a top-left origin.
pub trait DocumentBackend: Send + Sync {
    fn info(&self) -> &DocumentInfo;
    fn page_geometry(&self, page_index: usize) -> Result<PageGeometry>;
    fn render_page(&self, request: RenderRequest) -> Result<RenderedPage>;
    fn link_at(&self, page_index: usize, point: PointF) -> Result<Option<Link>>;
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>>;
}

/// Receives inverse-search results.
pub trait SourceEditor: Send + Sync {
    fn open_source(&self, location: &SourceLocation) -> Result<()>;
}

/// Opens URIs outside the viewer.
pub trait ExternalOpener: Send + Sync {
    fn open_external(&self, uri: &str) -> Result<()>;
}

/// Drops every request; used where no editor or opener is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct Detached;

impl SourceEditor for Detached {
    fn open_source(&self, location: &SourceLocation) -> Result<()> {
        tracing::debug!(file = %location.file.display(), line = location.line, "no editor attached");
        Ok(())
    }
}

impl ExternalOpener for Detached {
    fn open_external(&self, uri: &str) -> Result<()> {
        tracing::debug!(uri, "no external opener attached");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    FirstPage,
    LastPage,
    NextPage { count: usize },
    PrevPage { count: usize },
    GotoPage { page: usize },
    ZoomIn,
    ZoomOut,
    ActualSize,
    FitWidth,
    FitWindow,
    SetScale { factor: f64 },
    Resize { width: f64, height: f64 },
    WindowShown,
    ToggleFullScreen,
    SetTool { tool: Tool },
    CycleMagnifierSize,
    ToggleMagnifierShape,
    SyncFromSource { position: SourcePosition },
    SwitchDocument { index: usize },
    NextDocument,
    CloseDocument { index: usize },
}
