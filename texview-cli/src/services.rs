//! Terminal-side implementations of the window services the core asks for.

use std::ffi::OsStr;
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use texview_core::{
    CursorShape, ExternalOpener, HostWindow, IndexLoadExecutor, LoadJob, LoadOutcome, PointF,
    RectF, SizeF, SourceEditor, SourceLocation,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct HostState {
    scroll: PointF,
    viewport: SizeF,
    cursor: Option<CursorShape>,
}

/// Scroll position and pointer shape of the terminal pane. The page is drawn
/// through a viewport-sized window starting at `scroll`.
#[derive(Debug, Default)]
pub struct TerminalHost {
    state: Mutex<HostState>,
}

impl TerminalHost {
    pub fn set_viewport(&self, viewport: SizeF) {
        self.state.lock().viewport = viewport;
    }

    pub fn viewport(&self) -> SizeF {
        self.state.lock().viewport
    }

    pub fn cursor(&self) -> Option<CursorShape> {
        self.state.lock().cursor
    }

    pub fn reset_scroll(&self) {
        self.state.lock().scroll = PointF::default();
    }

    /// Scrolls by a fraction of the viewport.
    pub fn pan(&self, fraction_x: f64, fraction_y: f64) {
        let viewport = self.viewport();
        self.scroll_by(fraction_x * viewport.width, fraction_y * viewport.height);
    }

    /// Keeps the scroll position inside a page of `page` pixels and returns it.
    pub fn clamp_scroll(&self, page: SizeF) -> PointF {
        let mut state = self.state.lock();
        let max_x = (page.width - state.viewport.width).max(0.0);
        let max_y = (page.height - state.viewport.height).max(0.0);
        state.scroll = PointF::new(
            state.scroll.x.clamp(0.0, max_x),
            state.scroll.y.clamp(0.0, max_y),
        );
        state.scroll
    }
}

impl HostWindow for TerminalHost {
    fn set_cursor(&self, cursor: CursorShape) {
        self.state.lock().cursor = Some(cursor);
    }

    fn scroll_to(&self, target: RectF) {
        let mut state = self.state.lock();
        let viewport = state.viewport;
        let visible = RectF::new(
            state.scroll.x,
            state.scroll.y,
            viewport.width,
            viewport.height,
        );
        if visible.contains_rect(&target) {
            return;
        }
        let center = target.center();
        state.scroll = PointF::new(
            if target.x >= visible.x && target.right() <= visible.right() {
                state.scroll.x
            } else {
                center.x - viewport.width / 2.0
            },
            if target.y >= visible.y && target.bottom() <= visible.bottom() {
                state.scroll.y
            } else {
                center.y - viewport.height / 2.0
            },
        );
        debug!(?target, scroll = ?state.scroll, "scrolled to target");
    }

    fn scroll_by(&self, dx: f64, dy: f64) {
        let mut state = self.state.lock();
        state.scroll = PointF::new(state.scroll.x + dx, state.scroll.y + dy);
    }
}

/// Runs index loads on the blocking pool and hands results back over a channel
/// drained by the UI loop.
pub struct TokioLoader {
    runtime: Handle,
    outcomes: UnboundedSender<LoadOutcome>,
}

impl TokioLoader {
    pub fn new(runtime: Handle, outcomes: UnboundedSender<LoadOutcome>) -> Self {
        Self { runtime, outcomes }
    }
}

impl IndexLoadExecutor for TokioLoader {
    fn execute(&self, job: LoadJob) -> Option<LoadOutcome> {
        let outcomes = self.outcomes.clone();
        debug!(document = %job.document().display(), "loading index in background");
        self.runtime.spawn_blocking(move || {
            if outcomes.send(job.run()).is_err() {
                debug!("viewer exited before the index finished loading");
            }
        });
        None
    }
}

/// Launches the user's editor for inverse search. `{file}`, `{line}` and
/// `{column}` in the command template are replaced per request.
#[derive(Debug, Clone)]
pub struct ShellEditor {
    template: String,
}

impl ShellEditor {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    fn command_line(&self, location: &SourceLocation) -> Vec<String> {
        let file = location.file.display().to_string();
        let line = location.line.to_string();
        let column = location.column.unwrap_or(0).to_string();
        self.template
            .split_whitespace()
            .map(|word| {
                word.replace("{file}", &file)
                    .replace("{line}", &line)
                    .replace("{column}", &column)
            })
            .collect()
    }
}

impl SourceEditor for ShellEditor {
    fn open_source(&self, location: &SourceLocation) -> Result<()> {
        let args = self.command_line(location);
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| anyhow!("editor command is empty"))?;
        let mut child = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to launch editor {program:?}"))?;
        info!(file = %location.file.display(), line = location.line, "editor launched");
        std::thread::spawn(move || {
            if let Err(err) = child.wait() {
                warn!(?err, "editor process wait failed");
            }
        });
        Ok(())
    }
}

/// Opens URIs with the desktop's default handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl ExternalOpener for SystemOpener {
    fn open_external(&self, uri: &str) -> Result<()> {
        system_open(uri)
    }
}

fn system_open<S: AsRef<OsStr>>(arg: S) -> Result<()> {
    #[cfg(target_os = "macos")]
    let status = Command::new("open").arg(arg).status()?;

    #[cfg(all(unix, not(target_os = "macos")))]
    let status = Command::new("xdg-open").arg(arg).status()?;

    #[cfg(target_os = "windows")]
    let status = Command::new("cmd")
        .args(["/C", "start", ""])
        .arg(arg)
        .status()?;

    if !status.success() {
        return Err(anyhow!("system open command failed with status {status}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;

    fn host(viewport: SizeF) -> TerminalHost {
        let host = TerminalHost::default();
        host.set_viewport(viewport);
        host
    }

    #[test]
    fn scroll_to_centres_targets_outside_the_viewport() {
        let host = host(SizeF::new(100.0, 100.0));
        host.scroll_to(RectF::new(10.0, 500.0, 20.0, 10.0));
        assert_eq!(host.clamp_scroll(SizeF::new(100.0, 1000.0)), PointF::new(0.0, 455.0));
    }

    #[test]
    fn visible_targets_do_not_scroll() {
        let host = host(SizeF::new(100.0, 100.0));
        host.scroll_by(0.0, 40.0);
        host.scroll_to(RectF::new(10.0, 60.0, 20.0, 10.0));
        assert_eq!(host.clamp_scroll(SizeF::new(100.0, 1000.0)), PointF::new(0.0, 40.0));
    }

    #[test]
    fn scroll_is_clamped_to_the_page() {
        let host = host(SizeF::new(100.0, 100.0));
        host.pan(-1.0, 30.0);
        assert_eq!(
            host.clamp_scroll(SizeF::new(80.0, 400.0)),
            PointF::new(0.0, 300.0)
        );
        host.reset_scroll();
        assert_eq!(host.clamp_scroll(SizeF::new(80.0, 400.0)), PointF::default());
    }

    #[test]
    fn host_remembers_the_last_cursor() {
        let host = TerminalHost::default();
        assert_eq!(host.cursor(), None);
        host.set_cursor(CursorShape::Sync);
        assert_eq!(host.cursor(), Some(CursorShape::Sync));
    }

    #[test]
    fn editor_template_is_expanded_per_word() {
        let editor = ShellEditor::new("code --goto {file}:{line}:{column}");
        let location = SourceLocation {
            file: PathBuf::from("/work/intro.tex"),
            line: 42,
            column: None,
        };
        assert_eq!(
            editor.command_line(&location),
            vec!["code", "--goto", "/work/intro.tex:42:0"]
        );
    }

    #[test]
    fn empty_editor_command_is_an_error() {
        let editor = ShellEditor::new("   ");
        let location = SourceLocation {
            file: PathBuf::from("a.tex"),
            line: 1,
            column: Some(3),
        };
        assert!(editor.open_source(&location).is_err());
    }
}
