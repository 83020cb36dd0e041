use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use texview_core::config::project_dirs;
use texview_core::{
    load_config, Command, DocumentRegistry, EventResponse, FileRecentStore, IndexLoadExecutor,
    InlineLoader, RecentStore, Session, SessionEvent, SizeF, SourcePosition, WindowServices,
};
use texview_render::PdfiumProvider;
use texview_synctex::SynctexCli;
use texview_tty::{
    write_status_line, Canvas, DrawParams, EventMapper, KittyRenderer, TerminalLayout, UiEvent,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

mod remote;
mod services;
mod watch;

use remote::ForwardRequest;
use services::{ShellEditor, SystemOpener, TerminalHost, TokioLoader};
use watch::DocumentWatcher;

#[derive(Debug, Parser)]
#[command(
    name = "texview",
    version,
    about = "kitty-native PDF previewer with SyncTeX source synchronization"
)]
struct Args {
    /// Page to open the active document on (1-based)
    #[arg(short = 'p', long = "page")]
    page: Option<usize>,

    /// Forward search once the documents are open
    #[arg(long = "forward", value_name = "LINE[:COLUMN]:SOURCE", value_parser = parse_forward)]
    forward: Option<SourcePosition>,

    /// Hand --forward to the viewer that is already running and exit
    #[arg(long = "remote", requires = "forward")]
    remote: bool,

    /// Inverse search command; {file}, {line} and {column} are substituted
    #[arg(short = 'e', long = "editor")]
    editor: Option<String>,

    /// Configuration file to use instead of the platform default
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// synctex executable used for source lookups
    #[arg(long = "synctex", default_value = "synctex")]
    synctex: PathBuf,

    /// Paths to PDF files to open
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, DisableMouseCapture, cursor::Show);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if args.files.is_empty() {
        return Err(anyhow!("no input files provided"));
    }

    let project_dirs =
        project_dirs().ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;
    let spool = remote::spool_dir(&project_dirs);
    if args.remote {
        return send_remote(&args, &spool);
    }
    let config = load_config(args.config.as_deref())?;

    let host = Arc::new(TerminalHost::default());
    let (load_tx, mut load_rx) = mpsc::unbounded_channel();
    let loader: Arc<dyn IndexLoadExecutor> = if config.sync.background_load {
        Arc::new(TokioLoader::new(Handle::current(), load_tx))
    } else {
        Arc::new(InlineLoader)
    };
    let mut services = WindowServices::new(Arc::new(SynctexCli::with_program(&args.synctex)))
        .with_host(host.clone())
        .with_opener(Arc::new(SystemOpener))
        .with_loader(loader);
    if let Some(command) = args.editor.clone().or(config.sync.editor_command.clone()) {
        services = services.with_editor(Arc::new(ShellEditor::new(command)));
    }

    let state_dir = project_dirs.data_local_dir().join("state");
    let store: Arc<dyn RecentStore> = Arc::new(FileRecentStore::new(state_dir)?);
    let registry = Arc::new(DocumentRegistry::new(config.recent.max_entries));
    let mut session = Session::new(config, registry, store, services);

    let provider = PdfiumProvider::new()?;
    let mut watcher = DocumentWatcher::new()?;
    for path in &args.files {
        session
            .open_with(&provider, path.clone())
            .await
            .with_context(|| format!("failed to open {:?}", path))?;
        if let Err(err) = watcher.watch_document(path) {
            warn!(?err, path = %path.display(), "rebuilds of this document will not be noticed");
        }
    }

    match remote::discard_stale(&spool) {
        Ok(0) => {}
        Ok(count) => info!(count, "discarded forward requests from an earlier run"),
        Err(err) => warn!(?err, "failed to clear old forward requests"),
    }
    if let Err(err) = watcher.watch_requests(&spool) {
        warn!(?err, "forward requests from editors will not be received");
    }

    let mut mapper = EventMapper::new();
    fit_to_terminal(&mut session, &host, &mut mapper)?;
    session.apply(Command::WindowShown)?;
    if let Some(page) = args.page {
        session.apply(Command::GotoPage {
            page: page.saturating_sub(1),
        })?;
    }
    if let Some(position) = args.forward {
        session.apply(Command::SyncFromSource { position })?;
    }

    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide, EnableMouseCapture)?;
    let mut renderer = KittyRenderer::new(stdout);
    let session_events = session.events();
    let mut dirty = true;
    let mut needs_clear = true;
    let mut shown = false;

    loop {
        while let Ok(outcome) = load_rx.try_recv() {
            if let Some(result) = session.deliver_index_load(outcome) {
                info!(%result, "deferred sync request finished");
            }
        }

        let update = watcher.poll(Instant::now());
        for path in &update.started {
            session.set_typesetting(path, true);
        }
        for path in &update.settled {
            if let Err(err) = session.rebuild_complete(&provider, path).await {
                warn!(%err, path = %path.display(), "failed to reload rebuilt document");
                session.set_typesetting(path, false);
            }
        }

        for path in &update.requests {
            match remote::take(path) {
                Ok(Some(request)) => {
                    forward_from_editor(&mut session, &provider, &mut watcher, request).await;
                }
                Ok(None) => {}
                Err(err) => warn!(?err, "ignoring forward request"),
            }
        }

        for event in session_events.lock().drain(..) {
            match event {
                SessionEvent::RedrawNeeded(_) => dirty = true,
                SessionEvent::WindowOpened(_)
                | SessionEvent::WindowClosed(_)
                | SessionEvent::ActiveWindowChanged(_) => {
                    host.reset_scroll();
                    shown = true;
                    needs_clear = true;
                    dirty = true;
                }
            }
        }
        if session.windows().is_empty() {
            break;
        }

        if shown {
            fit_to_terminal(&mut session, &host, &mut mapper)?;
            if let Err(err) = session.apply(Command::WindowShown) {
                warn!(%err, "failed to refit the shown document");
            }
            shown = false;
        }

        if dirty {
            if needs_clear {
                renderer.clear_all()?;
                needs_clear = false;
            }
            redraw(&mut renderer, &mut session, &host, &mut mapper)?;
            dirty = false;
        }

        if event::poll(Duration::from_millis(100))? {
            let ev = event::read()?;
            let ui_event = mapper.map_event(ev);
            if let Some(status) = combine_status(status_text(&session), mapper.pending_input()) {
                draw_status_line(&mut renderer, &status)?;
            }
            match handle_event(ui_event, &mut session, &host)? {
                LoopAction::ContinueRedraw => dirty = true,
                LoopAction::Clear => {
                    needs_clear = true;
                    dirty = true;
                }
                LoopAction::Continue => {}
                LoopAction::Quit => break,
            }
            if let Some(shape) = host.cursor() {
                renderer.set_pointer(shape)?;
            }
        }
    }

    renderer.clear_all()?;
    session.persist()?;
    Ok(())
}

/// Writes the `--forward` position as a request for the running viewer.
fn send_remote(args: &Args, spool: &Path) -> Result<()> {
    let position = args
        .forward
        .clone()
        .ok_or_else(|| anyhow!("--remote needs --forward"))?;
    let [document] = args.files.as_slice() else {
        return Err(anyhow!("--remote takes exactly one PDF"));
    };
    let request = ForwardRequest {
        document: absolute(document),
        position,
    };
    remote::submit(spool, &request)?;
    info!(document = %request.document.display(), line = request.position.line, "forward request sent");
    Ok(())
}

/// Raises (or opens) the requested document and runs the forward search.
async fn forward_from_editor(
    session: &mut Session,
    provider: &PdfiumProvider,
    watcher: &mut DocumentWatcher,
    request: ForwardRequest,
) {
    let ForwardRequest { document, position } = request;
    if let Err(err) = session.open_with(provider, document.clone()).await {
        warn!(%err, document = %document.display(), "forward request for a document that cannot be opened");
        return;
    }
    if let Err(err) = watcher.watch_document(&document) {
        warn!(?err, path = %document.display(), "rebuilds of this document will not be noticed");
    }
    if let Err(err) = session.apply(Command::SyncFromSource { position }) {
        warn!(%err, "forward request failed");
    }
}

enum LoopAction {
    Continue,
    ContinueRedraw,
    Clear,
    Quit,
}

fn handle_event(event: UiEvent, session: &mut Session, host: &TerminalHost) -> Result<LoopAction> {
    match event {
        UiEvent::Command(command) => {
            let resets_scroll = matches!(
                command,
                Command::FirstPage
                    | Command::LastPage
                    | Command::NextPage { .. }
                    | Command::PrevPage { .. }
                    | Command::GotoPage { .. }
            );
            if let Err(err) = session.apply(command) {
                warn!(%err, "command rejected");
                return Ok(LoopAction::Continue);
            }
            if resets_scroll {
                host.reset_scroll();
            }
            Ok(LoopAction::ContinueRedraw)
        }
        UiEvent::Pointer(pointer) => {
            let Some(window) = session.active_mut() else {
                return Ok(LoopAction::Continue);
            };
            match window.handle_pointer(&pointer) {
                EventResponse::Ignored => Ok(LoopAction::Continue),
                EventResponse::Handled | EventResponse::SyncClick { .. } => {
                    Ok(LoopAction::ContinueRedraw)
                }
            }
        }
        UiEvent::Key(input) => {
            if let Some(window) = session.active_mut() {
                window.handle_key(&input);
            }
            Ok(LoopAction::Continue)
        }
        UiEvent::Pan { delta_x, delta_y } => {
            host.pan(delta_x, delta_y);
            Ok(LoopAction::ContinueRedraw)
        }
        UiEvent::CloseActive => {
            let index = session.active_index();
            session.apply(Command::CloseDocument { index })?;
            if session.windows().is_empty() {
                Ok(LoopAction::Quit)
            } else {
                Ok(LoopAction::Clear)
            }
        }
        UiEvent::Resize => Ok(LoopAction::Clear),
        UiEvent::Quit => Ok(LoopAction::Quit),
        UiEvent::None => Ok(LoopAction::Continue),
    }
}

/// Measures the terminal, tells the host and the active view how many pixels
/// the page area has, and returns the layout with the status row excluded.
fn fit_to_terminal(
    session: &mut Session,
    host: &TerminalHost,
    mapper: &mut EventMapper,
) -> Result<(TerminalLayout, u16, u32)> {
    let window = terminal::window_size()?;
    let columns = window.columns.max(1);
    let rows = window.rows.max(1);
    let layout = TerminalLayout::from_window(columns, rows, window.width, window.height);
    let image_rows = u32::from(rows).saturating_sub(1).max(1);
    let viewport = SizeF::new(
        f64::from(columns) * layout.cell.width,
        f64::from(image_rows) * layout.cell.height,
    );
    host.set_viewport(viewport);
    let stale = session
        .active()
        .is_some_and(|window| window.view().viewport() != viewport);
    if stale {
        session.apply(Command::Resize {
            width: viewport.width,
            height: viewport.height,
        })?;
    }
    mapper.set_layout(layout);
    Ok((layout, columns, image_rows))
}

fn redraw(
    renderer: &mut KittyRenderer<io::Stdout>,
    session: &mut Session,
    host: &TerminalHost,
    mapper: &mut EventMapper,
) -> Result<()> {
    let (mut layout, columns, image_rows) = fit_to_terminal(session, host, mapper)?;
    let Some(window) = session.active() else {
        return Ok(());
    };

    let page = window.view().page_pixel_size();
    let viewport = host.viewport();
    let scroll = host.clamp_scroll(page);
    let visible = SizeF::new(
        page.width.min(viewport.width),
        page.height.min(viewport.height),
    );
    let mut canvas = Canvas::new(visible, scroll);
    window.render(&mut canvas);

    let (draw_cols, draw_rows) = layout.cells_for(visible);
    let draw_cols = draw_cols.min(u32::from(columns));
    let draw_rows = draw_rows.min(image_rows);
    let start_col = (u32::from(columns).saturating_sub(draw_cols)) / 2;
    let start_row = (image_rows.saturating_sub(draw_rows)) / 2;
    layout.origin_column = start_col as u16;
    layout.origin_row = start_row as u16;
    layout.scroll = scroll;
    mapper.set_layout(layout);

    renderer.begin_sync_update()?;
    renderer.draw(
        canvas.image(),
        DrawParams::clamped(start_col as u16, start_row as u16, draw_cols, draw_rows),
    )?;
    if let Some(status) = combine_status(status_text(session), mapper.pending_input()) {
        draw_status_line(renderer, &status)?;
    }
    renderer.end_sync_update()?;
    Ok(())
}

fn status_text(session: &Session) -> Option<String> {
    let window = session.active()?;
    let name = window
        .path()
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("<unknown>");
    let mut text = String::from(name);
    if session.windows().len() > 1 {
        text.push_str(&format!(
            " [{}/{}]",
            session.active_index() + 1,
            session.windows().len()
        ));
    }
    text.push_str("  ");
    text.push_str(&window.status_text());
    Some(text)
}

fn combine_status(base: Option<String>, pending_input: Option<String>) -> Option<String> {
    match (base, pending_input.filter(|s| !s.is_empty())) {
        (Some(mut base), Some(pending)) => {
            base.push_str(" | ");
            base.push_str(&pending);
            Some(base)
        }
        (Some(base), None) => Some(base),
        (None, Some(pending)) => Some(pending),
        (None, None) => None,
    }
}

fn draw_status_line(renderer: &mut KittyRenderer<io::Stdout>, status: &str) -> Result<()> {
    let window = terminal::window_size()?;
    let total_rows = window.rows.max(1);
    let status_row = total_rows.saturating_sub(1);
    let mut writer = renderer.writer();
    crossterm::execute!(
        &mut writer,
        cursor::MoveTo(0, status_row),
        Clear(ClearType::CurrentLine)
    )?;
    write_status_line(&mut writer, status, usize::from(window.columns.max(1)))?;
    Ok(())
}

/// `LINE[:COLUMN]:SOURCE`, e.g. `42:intro.tex` or `42:7:intro.tex`.
fn parse_forward(value: &str) -> Result<SourcePosition, String> {
    let (line, rest) = value
        .split_once(':')
        .ok_or_else(|| format!("expected LINE[:COLUMN]:SOURCE, got {value:?}"))?;
    let line: u32 = line
        .parse()
        .map_err(|_| format!("invalid line number {line:?}"))?;
    if line == 0 {
        return Err("line numbers start at 1".into());
    }
    let (column, file) = match rest.split_once(':') {
        Some((column, file))
            if !column.is_empty() && column.chars().all(|c| c.is_ascii_digit()) =>
        {
            let column = column
                .parse()
                .map_err(|_| format!("invalid column {column:?}"))?;
            (column, file)
        }
        _ => (0, rest),
    };
    if file.is_empty() {
        return Err("missing source file".into());
    }
    let file = absolute(Path::new(file));
    Ok(SourcePosition { file, line, column })
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "texview.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // The terminal belongs to the page image, so logs only go to the file.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_argument_with_and_without_column() {
        let position = parse_forward("42:/work/intro.tex").unwrap();
        assert_eq!(position.line, 42);
        assert_eq!(position.column, 0);
        assert_eq!(position.file, PathBuf::from("/work/intro.tex"));

        let position = parse_forward("42:7:/work/intro.tex").unwrap();
        assert_eq!(position.column, 7);
        assert_eq!(position.file, PathBuf::from("/work/intro.tex"));
    }

    #[test]
    fn forward_argument_resolves_relative_sources() {
        let position = parse_forward("3:chapters/a.tex").unwrap();
        assert!(position.file.is_absolute());
        assert!(position.file.ends_with("chapters/a.tex"));
    }

    #[test]
    fn malformed_forward_arguments_are_rejected() {
        assert!(parse_forward("intro.tex").is_err());
        assert!(parse_forward("x:intro.tex").is_err());
        assert!(parse_forward("0:intro.tex").is_err());
        assert!(parse_forward("5:").is_err());
    }

    #[test]
    fn status_combines_pending_input() {
        assert_eq!(
            combine_status(Some("page 1/2".into()), Some("12".into())).as_deref(),
            Some("page 1/2 | 12")
        );
        assert_eq!(combine_status(None, Some(String::new())), None);
    }

    #[test]
    fn remote_requires_a_forward_position() {
        assert!(Args::try_parse_from(["texview", "--remote", "paper.pdf"]).is_err());
        let args =
            Args::try_parse_from(["texview", "--remote", "--forward", "50:a.tex", "paper.pdf"])
                .unwrap();
        assert!(args.remote);
    }

    #[test]
    fn remote_request_lands_in_the_spool() {
        let dir = tempfile::tempdir().unwrap();
        let spool = dir.path().join("requests");
        let args = Args::try_parse_from([
            "texview",
            "--remote",
            "--forward",
            "50:/work/intro.tex",
            "/work/paper.pdf",
        ])
        .unwrap();
        send_remote(&args, &spool).unwrap();

        let path = fs::read_dir(&spool).unwrap().next().unwrap().unwrap().path();
        let request = remote::take(&path).unwrap().unwrap();
        assert_eq!(request.document, PathBuf::from("/work/paper.pdf"));
        assert_eq!(request.position.line, 50);

        let two = Args::try_parse_from([
            "texview", "--remote", "--forward", "1:a.tex", "a.pdf", "b.pdf",
        ])
        .unwrap();
        assert!(send_remote(&two, &spool).is_err());
    }

    #[test]
    fn cli_requires_a_file() {
        assert!(Args::try_parse_from(["texview"]).is_err());
        let args = Args::try_parse_from(["texview", "--forward", "10:a.tex", "paper.pdf"]).unwrap();
        assert_eq!(args.forward.map(|position| position.line), Some(10));
    }
}
