use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::geometry::{PointF, RectF};
use crate::{DocumentBackend, ExternalOpener};

/// A hyperlink found on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Link {
    /// Jump within the document; `target` is in the destination page's native space.
    GoTo {
        page: usize,
        target: Option<RectF>,
    },
    Uri {
        uri: String,
    },
    Unsupported {
        kind: String,
    },
}

/// What the view has to do after a link was dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkAction {
    Navigate { page: usize, target: Option<RectF> },
    Opened,
    Ignored,
}

pub struct LinkDispatcher {
    opener: Arc<dyn ExternalOpener>,
}

impl LinkDispatcher {
    pub fn new(opener: Arc<dyn ExternalOpener>) -> Self {
        Self { opener }
    }

    /// Looks up the link under `point` (native page space). Engine errors count as "no link".
    pub fn link_at(
        &self,
        backend: &dyn DocumentBackend,
        page_index: usize,
        point: PointF,
    ) -> Option<Link> {
        match backend.link_at(page_index, point) {
            Ok(link) => link,
            Err(err) => {
                debug!(?err, page = page_index, "link lookup failed");
                None
            }
        }
    }

    pub fn dispatch(&self, link: &Link, page_count: usize) -> LinkAction {
        match link {
            Link::GoTo { page, target } => {
                if *page >= page_count {
                    warn!(page, page_count, "link points past the last page");
                    return LinkAction::Ignored;
                }
                LinkAction::Navigate {
                    page: *page,
                    target: *target,
                }
            }
            Link::Uri { uri } => match self.opener.open_external(uri) {
                Ok(()) => LinkAction::Opened,
                Err(err) => {
                    warn!(?err, uri = %uri, "failed to open external link");
                    LinkAction::Ignored
                }
            },
            Link::Unsupported { kind } => {
                debug!(kind = %kind, "ignoring unsupported link");
                LinkAction::Ignored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, RecordingOpener};

    use anyhow::anyhow;

    struct FailingOpener;

    impl ExternalOpener for FailingOpener {
        fn open_external(&self, _uri: &str) -> anyhow::Result<()> {
            Err(anyhow!("no browser"))
        }
    }

    #[test]
    fn goto_within_range_navigates() {
        let dispatcher = LinkDispatcher::new(Arc::new(RecordingOpener::default()));
        let target = RectF::new(72.0, 100.0, 200.0, 12.0);
        let action = dispatcher.dispatch(
            &Link::GoTo {
                page: 4,
                target: Some(target),
            },
            10,
        );
        assert_eq!(
            action,
            LinkAction::Navigate {
                page: 4,
                target: Some(target)
            }
        );
    }

    #[test]
    fn goto_past_last_page_is_ignored() {
        let dispatcher = LinkDispatcher::new(Arc::new(RecordingOpener::default()));
        let action = dispatcher.dispatch(
            &Link::GoTo {
                page: 10,
                target: None,
            },
            10,
        );
        assert_eq!(action, LinkAction::Ignored);
    }

    #[test]
    fn uri_goes_to_the_opener() {
        let opener = Arc::new(RecordingOpener::default());
        let dispatcher = LinkDispatcher::new(opener.clone());
        let action = dispatcher.dispatch(
            &Link::Uri {
                uri: "https://ctan.org".into(),
            },
            1,
        );
        assert_eq!(action, LinkAction::Opened);
        assert_eq!(*opener.opened.lock(), vec!["https://ctan.org".to_string()]);
    }

    #[test]
    fn opener_failure_and_unknown_kinds_are_swallowed() {
        let dispatcher = LinkDispatcher::new(Arc::new(FailingOpener));
        assert_eq!(
            dispatcher.dispatch(&Link::Uri { uri: "x".into() }, 1),
            LinkAction::Ignored
        );
        assert_eq!(
            dispatcher.dispatch(
                &Link::Unsupported {
                    kind: "launch".into()
                },
                1
            ),
            LinkAction::Ignored
        );
    }

    #[test]
    fn link_lookup_hits_only_inside_the_rect() {
        let mut backend = FakeBackend::new(2);
        backend.links.push((
            1,
            RectF::new(10.0, 10.0, 50.0, 20.0),
            Link::Uri { uri: "mailto:a@b".into() },
        ));
        let dispatcher = LinkDispatcher::new(Arc::new(RecordingOpener::default()));
        assert!(dispatcher
            .link_at(&backend, 1, PointF::new(20.0, 20.0))
            .is_some());
        assert!(dispatcher
            .link_at(&backend, 1, PointF::new(80.0, 20.0))
            .is_none());
        assert!(dispatcher
            .link_at(&backend, 0, PointF::new(20.0, 20.0))
            .is_none());
    }
}
