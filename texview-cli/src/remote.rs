//! Forward-search requests from editors to a viewer that is already running.
//!
//! `texview --remote --forward LINE:SOURCE doc.pdf` drops a small JSON file
//! into the spool directory and exits; the running viewer watches that
//! directory and consumes each request once.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use texview_core::SourcePosition;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRequest {
    pub document: PathBuf,
    pub position: SourcePosition,
}

pub fn spool_dir(dirs: &ProjectDirs) -> PathBuf {
    dirs.data_local_dir().join("requests")
}

/// Whether `path` names a finished request. Requests are written under a
/// dotted temporary name and renamed into place.
pub fn is_request(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    !name.starts_with('.') && path.extension().is_some_and(|ext| ext == "json")
}

pub fn submit(spool: &Path, request: &ForwardRequest) -> Result<PathBuf> {
    fs::create_dir_all(spool)
        .with_context(|| format!("failed to create request directory {}", spool.display()))?;
    let name = format!("{}.json", Uuid::new_v4());
    let partial = spool.join(format!(".{name}.part"));
    fs::write(&partial, serde_json::to_vec(request)?)?;
    let target = spool.join(name);
    fs::rename(&partial, &target)?;
    debug!(path = %target.display(), "forward request queued");
    Ok(target)
}

/// Reads and removes a request. `None` when it was already consumed.
pub fn take(path: &Path) -> Result<Option<ForwardRequest>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    fs::remove_file(path)?;
    let request = serde_json::from_slice(&bytes)
        .with_context(|| format!("malformed forward request {}", path.display()))?;
    Ok(Some(request))
}

/// Removes requests left behind by a previous run.
pub fn discard_stale(spool: &Path) -> Result<usize> {
    let entries = match fs::read_dir(spool) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };
    let mut removed = 0;
    for entry in entries {
        let path = entry?.path();
        if path.is_file() {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
