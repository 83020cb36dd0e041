use std::convert::TryFrom;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use image::DynamicImage;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use texview_core::{
    DocumentBackend, DocumentInfo, DocumentMetadata, DocumentProvider, Link, PageGeometry,
    PointF, RectF, RenderImage, RenderRequest, RenderedPage, Rotation, SizeF,
};
use tracing::{debug, instrument, warn};

/// Environment variable naming the pdfium shared library to bind.
pub const PDFIUM_LIBRARY_ENV: &str = "TEXVIEW_PDFIUM_LIBRARY_PATH";

pub struct PdfiumProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumProvider {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumProvider {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let info = build_document_info(&self.pdfium, &absolute)?;
        Ok(Arc::new(PdfiumDocument::new(
            Arc::clone(&self.pdfium),
            absolute,
            info,
        )))
    }
}

struct PdfiumDocument {
    // Declared before `pdfium` so it is dropped first.
    document: Mutex<Option<PdfDocument<'static>>>,
    pdfium: Arc<Pdfium>,
    path: PathBuf,
    info: DocumentInfo,
}

impl PdfiumDocument {
    fn new(pdfium: Arc<Pdfium>, path: PathBuf, info: DocumentInfo) -> Self {
        Self {
            document: Mutex::new(None),
            pdfium,
            path,
            info,
        }
    }

    fn open_document(&self) -> Result<PdfDocument<'static>> {
        let document = self
            .pdfium
            .load_pdf_from_file(&self.path, None)
            .with_context(|| format!("failed to open {:?}", self.path))?;
        // SAFETY: the document borrows the bindings held by `self.pdfium`. It
        // lives in `self.document`, which drops before `self.pdfium`, so the
        // borrow never outlives the bindings.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(document)
    }

    fn with_page<R, F>(&self, page_index: usize, f: F) -> Result<R>
    where
        F: FnOnce(&PdfPage<'_>) -> Result<R>,
    {
        let mut guard = self.document.lock();
        if guard.is_none() {
            *guard = Some(self.open_document()?);
        }
        let Some(document) = guard.as_ref() else {
            return Err(anyhow!("{:?} is not loaded", self.path));
        };
        let index: PdfPageIndex = page_index
            .try_into()
            .map_err(|_| anyhow!("page {} is out of supported range", page_index))?;
        let page = document
            .pages()
            .get(index)
            .with_context(|| format!("page {} out of range", page_index))?;
        f(&page)
    }

    fn render_internal(&self, page: &PdfPage<'_>, request: &RenderRequest) -> Result<RenderedPage> {
        let geometry = geometry_of(page);
        let config =
            PdfRenderConfig::new().scale_page_by_factor(request.pixels_per_point.max(0.01) as f32);
        let bitmap = page
            .render_with_config(&config)
            .with_context(|| format!("failed to render page {}", request.page_index))?;
        let full = bitmap.as_image();
        let image = match request.region {
            Some(region) => crop(&full, region)
                .with_context(|| format!("empty region on page {}", request.page_index))?,
            None => to_render_image(full),
        };
        Ok(RenderedPage {
            image,
            page_size: geometry.displayed_size(),
        })
    }

    fn link_from_pdfium(&self, link: &PdfLink<'_>) -> Link {
        if let Some(action) = link.action() {
            match action.action_type() {
                PdfActionType::GoToDestinationInSameDocument => {
                    if let Some(local) = action.as_local_destination_action() {
                        if let Ok(destination) = local.destination() {
                            if let Ok(page_index) = destination.page_index() {
                                return Link::GoTo {
                                    page: page_index as usize,
                                    target: None,
                                };
                            }
                        }
                    }
                }
                PdfActionType::Uri => {
                    if let Some(uri_action) = action.as_uri_action() {
                        if let Ok(uri) = uri_action.uri() {
                            if !uri.is_empty() {
                                return Link::Uri { uri };
                            }
                        }
                    }
                }
                other => {
                    return Link::Unsupported {
                        kind: format!("{other:?}"),
                    }
                }
            }
        }

        if let Some(destination) = link.destination() {
            if let Ok(page_index) = destination.page_index() {
                return Link::GoTo {
                    page: page_index as usize,
                    target: None,
                };
            }
        }

        Link::Unsupported {
            kind: "unresolved".into(),
        }
    }
}

impl DocumentBackend for PdfiumDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn page_geometry(&self, page_index: usize) -> Result<PageGeometry> {
        self.with_page(page_index, |page| Ok(geometry_of(page)))
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn render_page(&self, request: RenderRequest) -> Result<RenderedPage> {
        self.with_page(request.page_index, |page| self.render_internal(page, &request))
    }

    fn link_at(&self, page_index: usize, point: PointF) -> Result<Option<Link>> {
        self.with_page(page_index, |page| {
            let geometry = geometry_of(page);
            for link in page.links().iter() {
                let rect = match link.rect() {
                    Ok(rect) => rect,
                    Err(err) => {
                        warn!(
                            ?err,
                            page = page_index,
                            path = %self.path.display(),
                            "failed to resolve link rectangle"
                        );
                        continue;
                    }
                };
                let area = from_pdf_space(
                    rect.left().value,
                    rect.bottom().value,
                    rect.right().value,
                    rect.top().value,
                    geometry.size.height,
                );
                if area.contains(point) {
                    let link = self.link_from_pdfium(&link);
                    debug!(?link, page = page_index, "link hit");
                    return Ok(Some(link));
                }
            }
            Ok(None)
        })
    }
}

fn geometry_of(page: &PdfPage<'_>) -> PageGeometry {
    let rotation = match page.rotation() {
        Ok(PdfPageRenderRotation::Degrees90) => Rotation::Clockwise90,
        Ok(PdfPageRenderRotation::Degrees180) => Rotation::Clockwise180,
        Ok(PdfPageRenderRotation::Degrees270) => Rotation::Clockwise270,
        _ => Rotation::None,
    };
    let displayed = SizeF::new(
        f64::from(page.width().value),
        f64::from(page.height().value),
    );
    native_geometry(displayed, rotation)
}

/// pdfium reports page size after rotation; the core works in native size.
fn native_geometry(displayed: SizeF, rotation: Rotation) -> PageGeometry {
    let size = if rotation.swaps_axes() {
        displayed.transposed()
    } else {
        displayed
    };
    PageGeometry::new(size, rotation)
}

/// Converts a PDF user-space rectangle (bottom-left origin) to native page
/// space with a top-left origin.
fn from_pdf_space(left: f32, bottom: f32, right: f32, top: f32, page_height: f64) -> RectF {
    RectF::from_corners(
        PointF::new(f64::from(left), page_height - f64::from(top)),
        PointF::new(f64::from(right), page_height - f64::from(bottom)),
    )
}

/// Pixel bounds of `region` inside a `width` x `height` image, or `None` when
/// they do not overlap.
fn region_bounds(region: RectF, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let x0 = region.x.max(0.0).floor() as u32;
    let y0 = region.y.max(0.0).floor() as u32;
    let x1 = (region.right().round().max(0.0) as u32).min(width);
    let y1 = (region.bottom().round().max(0.0) as u32).min(height);
    (x1 > x0 && y1 > y0).then(|| (x0, y0, x1 - x0, y1 - y0))
}

fn crop(image: &DynamicImage, region: RectF) -> Option<RenderImage> {
    let (x, y, w, h) = region_bounds(region, image.width(), image.height())?;
    Some(to_render_image(image.crop_imm(x, y, w, h)))
}

fn to_render_image(image: DynamicImage) -> RenderImage {
    let rgba = image.to_rgba8();
    RenderImage {
        width: rgba.width(),
        height: rgba.height(),
        pixels: rgba.into_raw(),
    }
}

fn build_document_info(pdfium: &Pdfium, path: &Path) -> Result<DocumentInfo> {
    let document = pdfium
        .load_pdf_from_file(path, None)
        .with_context(|| format!("failed to open {:?}", path))?;
    let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
    let metadata = document.metadata();

    let title = metadata
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().to_owned());
    let author = metadata
        .get(PdfDocumentMetadataTagType::Author)
        .map(|t| t.value().to_owned());
    let keywords = metadata
        .get(PdfDocumentMetadataTagType::Keywords)
        .map(|t| t.value().split(',').map(|s| s.trim().to_owned()).collect())
        .unwrap_or_default();

    Ok(DocumentInfo {
        path: path.to_path_buf(),
        page_count,
        metadata: DocumentMetadata {
            title,
            author,
            keywords,
        },
    })
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    match std::env::var(PDFIUM_LIBRARY_ENV) {
        Ok(path) if !path.is_empty() => match Pdfium::bind_to_library(&path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!(%path, %err, "failed to load pdfium from {}", PDFIUM_LIBRARY_ENV);
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => errors.push(format!("{}: {}", cwd_path.display(), err)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; install it or set {} ({})",
                PDFIUM_LIBRARY_ENV,
                errors.join(", ")
            ))
        }
    }
}
