//! Correspondence index backed by the `synctex` command line utility.
//!
//! Loading only validates the index file; queries shell out to
//! `synctex view` (source to page) and `synctex edit` (page to source).

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use flate2::read::GzDecoder;
use texview_core::{
    CorrespondenceIndex, IndexError, IndexReader, PointF, RectF, SourceLocation, SourceMatch,
};
use tracing::{debug, instrument};

const PREAMBLE: &str = "SyncTeX Version:";

/// How many lines on each side of a line with no boxes are tried before a
/// forward query gives up.
pub const LINE_SEARCH_WINDOW: u32 = 25;

/// Runs the `synctex` utility with the given arguments and returns its stdout.
pub trait SynctexRunner: Send + Sync {
    fn run(&self, args: &[String]) -> Result<String, IndexError>;
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: PathBuf,
}

impl CommandRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl SynctexRunner for CommandRunner {
    fn run(&self, args: &[String]) -> Result<String, IndexError> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|err| {
                IndexError::Query(format!("failed to run {}: {err}", self.program.display()))
            })?;
        if !output.status.success() {
            return Err(IndexError::Query(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Clone)]
pub struct SynctexCli {
    runner: Arc<dyn SynctexRunner>,
}

impl SynctexCli {
    pub fn new() -> Self {
        Self::with_program("synctex")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self::with_runner(Arc::new(CommandRunner::new(program)))
    }

    pub fn with_runner(runner: Arc<dyn SynctexRunner>) -> Self {
        Self { runner }
    }
}

impl Default for SynctexCli {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexReader for SynctexCli {
    #[instrument(skip(self))]
    fn load(&self, index_path: &Path) -> Result<Box<dyn CorrespondenceIndex>, IndexError> {
        check_preamble(index_path)?;
        let pdf = pdf_for_index(index_path).ok_or_else(|| IndexError::Load {
            path: index_path.to_path_buf(),
            message: "not a .synctex or .synctex.gz file".into(),
        })?;
        debug!(pdf = %pdf.display(), "synctex index ready");
        Ok(Box::new(SynctexIndex {
            runner: Arc::clone(&self.runner),
            pdf,
        }))
    }
}

struct SynctexIndex {
    runner: Arc<dyn SynctexRunner>,
    pdf: PathBuf,
}

impl SynctexIndex {
    fn view(&self, file: &Path, line: u32, column: u32) -> Result<Vec<SourceMatch>, IndexError> {
        let stdout = self.runner.run(&[
            "view".into(),
            "-i".into(),
            format!("{}:{}:{}", line, column, file.display()),
            "-o".into(),
            self.pdf.display().to_string(),
        ])?;
        Ok(parse_view_output(&stdout, line))
    }
}

impl CorrespondenceIndex for SynctexIndex {
    fn query_by_source(
        &self,
        file: &Path,
        line: u32,
        column: u32,
    ) -> Result<Vec<SourceMatch>, IndexError> {
        let exact = self.view(file, line, column)?;
        if !exact.is_empty() {
            return Ok(exact);
        }
        // Lines without boxes (blank lines, comments) fall back to the
        // nearest typeset line, earlier lines first. Each box keeps the line
        // it was found on.
        for offset in 1..=LINE_SEARCH_WINDOW {
            let Some(earlier) = line.checked_sub(offset).filter(|earlier| *earlier > 0) else {
                break;
            };
            let found = self.view(file, earlier, 0)?;
            if !found.is_empty() {
                debug!(line, found = earlier, "forward query fell back to an earlier line");
                return Ok(found);
            }
        }
        for offset in 1..=LINE_SEARCH_WINDOW {
            let later = line.saturating_add(offset);
            let found = self.view(file, later, 0)?;
            if !found.is_empty() {
                debug!(line, found = later, "forward query fell back to a later line");
                return Ok(found);
            }
        }
        Ok(Vec::new())
    }

    fn query_by_page(
        &self,
        page: usize,
        point: PointF,
    ) -> Result<Option<SourceLocation>, IndexError> {
        let stdout = self.runner.run(&[
            "edit".into(),
            "-o".into(),
            format!("{}:{:.2}:{:.2}:{}", page + 1, point.x, point.y, self.pdf.display()),
        ])?;
        let base = self.pdf.parent().unwrap_or_else(|| Path::new("."));
        Ok(parse_edit_output(&stdout, base))
    }
}

/// `doc.synctex.gz` or `doc.synctex` → `doc.pdf`.
pub fn pdf_for_index(index_path: &Path) -> Option<PathBuf> {
    let name = index_path.file_name()?.to_str()?;
    let stem = name
        .strip_suffix(".synctex.gz")
        .or_else(|| name.strip_suffix(".synctex"))?;
    Some(index_path.with_file_name(format!("{stem}.pdf")))
}

fn check_preamble(index_path: &Path) -> Result<(), IndexError> {
    let load_error = |message: String| IndexError::Load {
        path: index_path.to_path_buf(),
        message,
    };
    let file = File::open(index_path).map_err(|err| load_error(err.to_string()))?;
    let reader: Box<dyn Read> = if index_path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut first = String::new();
    BufReader::new(reader)
        .read_line(&mut first)
        .map_err(|err| load_error(err.to_string()))?;
    if first.starts_with(PREAMBLE) {
        Ok(())
    } else {
        Err(load_error("missing SyncTeX preamble".into()))
    }
}

/// Parses `synctex view` records for a query on `line`; every box is tagged
/// with that line. Pages become 0-based and boxes run from the baseline `v`
/// up by the box height `H`.
pub fn parse_view_output(stdout: &str, line: u32) -> Vec<SourceMatch> {
    #[derive(Default)]
    struct Record {
        page: Option<usize>,
        h: Option<f64>,
        v: Option<f64>,
        width: Option<f64>,
        height: Option<f64>,
    }

    impl Record {
        fn finish(self, line: u32) -> Option<SourceMatch> {
            let page = self.page?.checked_sub(1)?;
            let (h, v) = (self.h?, self.v?);
            let width = self.width.unwrap_or(0.0).abs();
            let height = self.height.unwrap_or(0.0).abs();
            Some(SourceMatch {
                page,
                rect: RectF::new(h, v - height, width, height),
                line,
            })
        }
    }

    let mut matches = Vec::new();
    let mut current: Option<Record> = None;
    for raw in stdout.lines() {
        let Some((key, value)) = raw.trim().split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "Page" => {
                if let Some(done) = current.take().and_then(|record| record.finish(line)) {
                    matches.push(done);
                }
                current = Some(Record {
                    page: value.parse().ok(),
                    ..Record::default()
                });
            }
            "h" | "v" | "W" | "H" => {
                let Some(record) = current.as_mut() else {
                    continue;
                };
                let parsed = value.parse().ok();
                match key {
                    "h" => record.h = parsed,
                    "v" => record.v = parsed,
                    "W" => record.width = parsed,
                    _ => record.height = parsed,
                }
            }
            _ => {}
        }
    }
    if let Some(done) = current.and_then(|record| record.finish(line)) {
        matches.push(done);
    }
    matches
}

/// Parses `synctex edit` output. Relative input paths resolve against `base`.
pub fn parse_edit_output(stdout: &str, base: &Path) -> Option<SourceLocation> {
    let mut file = None;
    let mut line = None;
    let mut column = None;
    for raw in stdout.lines() {
        let Some((key, value)) = raw.trim().split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "Input" if file.is_none() => file = Some(PathBuf::from(value)),
            "Line" if line.is_none() => line = value.parse::<i64>().ok(),
            "Column" if column.is_none() => column = value.parse::<i64>().ok(),
            _ => {}
        }
    }
    let file = file?;
    let line = u32::try_from(line?).ok().filter(|line| *line > 0)?;
    let file = if file.is_absolute() {
        file
    } else {
        base.join(file)
    };
    Some(SourceLocation {
        file,
        line,
        column: column.and_then(|column| u32::try_from(column).ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::fs;
    use std::io::Write;

    use parking_lot::Mutex;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::tempdir;

    const VIEW: &str = "\
This is SyncTeX command line utility, version 1.5
SyncTeX result begin
Output:/work/paper.pdf
Page:2
x:133.77
y:134.10
h:133.768356
v:136.097839
W:343.711060
H:9.962640
before:
offset:0
middle:
after:
Output:/work/paper.pdf
Page:2
h:72.0
v:160.0
W:100.0
H:10.0
SyncTeX result end
";

    #[test]
    fn view_records_become_top_left_boxes() {
        let matches = parse_view_output(VIEW, 17);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].page, 1);
        assert_eq!(matches[0].line, 17);
        assert!((matches[0].rect.y - (136.097839 - 9.962640)).abs() < 1e-9);
        assert_eq!(matches[1].rect, RectF::new(72.0, 150.0, 100.0, 10.0));
    }

    #[test]
    fn view_without_records_is_empty() {
        assert!(parse_view_output("SyncTeX result begin\nSyncTeX result end\n", 3).is_empty());
        assert!(parse_view_output("Page:0\nh:1\nv:1\n", 3).is_empty());
    }

    /// Answers `view` queries from a table of line → stdout and records the
    /// lines asked for.
    #[derive(Default)]
    struct ScriptedRunner {
        views: HashMap<u32, String>,
        asked: Mutex<Vec<u32>>,
    }

    impl ScriptedRunner {
        fn with_lines(lines: &[u32]) -> Self {
            let views = lines
                .iter()
                .map(|line| {
                    let record = format!("Page:3\nh:72.0\nv:{}\nW:200.0\nH:10.0\n", line * 12);
                    (*line, record)
                })
                .collect();
            Self {
                views,
                asked: Mutex::new(Vec::new()),
            }
        }
    }

    impl SynctexRunner for ScriptedRunner {
        fn run(&self, args: &[String]) -> Result<String, IndexError> {
            let input = args
                .iter()
                .skip_while(|arg| *arg != "-i")
                .nth(1)
                .ok_or_else(|| IndexError::Query("missing -i".into()))?;
            let line: u32 = input
                .split(':')
                .next()
                .and_then(|line| line.parse().ok())
                .ok_or_else(|| IndexError::Query(format!("bad input {input}")))?;
            self.asked.lock().push(line);
            Ok(self.views.get(&line).cloned().unwrap_or_default())
        }
    }

    fn index_over(runner: Arc<ScriptedRunner>) -> SynctexIndex {
        SynctexIndex {
            runner,
            pdf: PathBuf::from("/work/paper.pdf"),
        }
    }

    #[test]
    fn missing_line_falls_back_to_the_nearest_earlier_line() {
        let runner = Arc::new(ScriptedRunner::with_lines(&[48, 55]));
        let index = index_over(Arc::clone(&runner));

        let matches = index
            .query_by_source(Path::new("/work/paper.tex"), 50, 0)
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].line, 48);
        assert_eq!(matches[0].page, 2);
        assert_eq!(*runner.asked.lock(), vec![50, 49, 48]);

        let hit = texview_core::select_forward_match(&matches, 50).unwrap();
        assert_eq!(hit.line, 48);
    }

    #[test]
    fn missing_line_uses_a_later_line_when_nothing_precedes() {
        let runner = Arc::new(ScriptedRunner::with_lines(&[55]));
        let index = index_over(runner);

        let matches = index
            .query_by_source(Path::new("/work/paper.tex"), 40, 0)
            .unwrap();
        assert_eq!(matches.iter().map(|m| m.line).collect::<Vec<_>>(), vec![55]);
    }

    #[test]
    fn exact_line_is_queried_once() {
        let runner = Arc::new(ScriptedRunner::with_lines(&[48, 50]));
        let index = index_over(Arc::clone(&runner));

        let matches = index
            .query_by_source(Path::new("/work/paper.tex"), 50, 4)
            .unwrap();
        assert_eq!(matches[0].line, 50);
        assert_eq!(*runner.asked.lock(), vec![50]);
    }

    #[test]
    fn nothing_within_the_window_is_no_match() {
        let far = 50 + LINE_SEARCH_WINDOW + 1;
        let runner = Arc::new(ScriptedRunner::with_lines(&[far]));
        let index = index_over(Arc::clone(&runner));

        let matches = index
            .query_by_source(Path::new("/work/paper.tex"), 50, 0)
            .unwrap();
        assert!(matches.is_empty());
        assert_eq!(runner.asked.lock().len(), 1 + 2 * LINE_SEARCH_WINDOW as usize);
    }

    #[test]
    fn edit_output_resolves_relative_inputs() {
        let stdout = "SyncTeX result begin\nOutput:paper.pdf\nInput:./chapters/intro.tex\nLine:42\nColumn:-1\nOffset:0\nContext:\nSyncTeX result end\n";
        let location = parse_edit_output(stdout, Path::new("/work")).unwrap();
        assert_eq!(location.file, PathBuf::from("/work/./chapters/intro.tex"));
        assert_eq!(location.line, 42);
        assert_eq!(location.column, None);
    }

    #[test]
    fn edit_without_line_is_no_match() {
        assert_eq!(
            parse_edit_output("Input:/a.tex\nLine:0\n", Path::new("/")),
            None
        );
        assert_eq!(parse_edit_output("SyncTeX result end\n", Path::new("/")), None);
    }

    #[test]
    fn index_names_map_to_the_pdf() {
        assert_eq!(
            pdf_for_index(Path::new("/w/paper.synctex.gz")),
            Some(PathBuf::from("/w/paper.pdf"))
        );
        assert_eq!(
            pdf_for_index(Path::new("/w/paper.synctex")),
            Some(PathBuf::from("/w/paper.pdf"))
        );
        assert_eq!(pdf_for_index(Path::new("/w/paper.log")), None);
    }

    #[test]
    fn load_checks_the_preamble() {
        let dir = tempdir().unwrap();
        let gz = dir.path().join("paper.synctex.gz");
        let mut encoder = GzEncoder::new(fs::File::create(&gz).unwrap(), Compression::default());
        encoder
            .write_all(b"SyncTeX Version:1\nInput:1:/work/paper.tex\n")
            .unwrap();
        encoder.finish().unwrap();

        let plain = dir.path().join("other.synctex");
        fs::write(&plain, "garbage\n").unwrap();

        let reader = SynctexCli::new();
        assert!(reader.load(&gz).is_ok());
        assert!(matches!(
            reader.load(&plain),
            Err(IndexError::Load { .. })
        ));
        assert!(matches!(
            reader.load(&dir.path().join("missing.synctex")),
            Err(IndexError::Load { .. })
        ));
    }

    #[test]
    fn default_lookup_prefers_the_compressed_index() {
        let dir = tempdir().unwrap();
        let pdf = dir.path().join("paper.pdf");
        fs::write(dir.path().join("paper.synctex"), "SyncTeX Version:1\n").unwrap();
        let reader = SynctexCli::new();
        assert_eq!(reader.index_path(&pdf), Some(dir.path().join("paper.synctex")));

        fs::write(dir.path().join("paper.synctex.gz"), b"").unwrap();
        assert_eq!(
            reader.index_path(&pdf),
            Some(dir.path().join("paper.synctex.gz"))
        );
    }
}
