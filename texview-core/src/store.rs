//! Persistence for the recently-opened document list.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub trait RecentStore: Send + Sync {
    fn load(&self) -> Result<Vec<PathBuf>>;
    fn save(&self, paths: &[PathBuf]) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RecentFile {
    files: Vec<PathBuf>,
}

/// Stores the list as `recent.json` under `root`, replaced atomically on save.
#[derive(Debug)]
pub struct FileRecentStore {
    root: PathBuf,
}

impl FileRecentStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create state directory at {:?}", root))?;
        Ok(Self { root })
    }

    pub fn path(&self) -> PathBuf {
        self.root.join("recent.json")
    }
}

impl RecentStore for FileRecentStore {
    fn load(&self) -> Result<Vec<PathBuf>> {
        let path = self.path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut file =
            File::open(&path).with_context(|| format!("failed to open recent list {:?}", path))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let recent: RecentFile = serde_json::from_str(&buf)
            .with_context(|| format!("failed to decode recent list {:?}", path))?;
        Ok(recent.files)
    }

    fn save(&self, paths: &[PathBuf]) -> Result<()> {
        let path = self.path();
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(&RecentFile {
            files: paths.to_vec(),
        })?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp recent list {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to replace recent list {:?}", path))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryRecentStore {
    inner: Mutex<Vec<PathBuf>>,
}

impl MemoryRecentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_paths<P: AsRef<Path>>(paths: &[P]) -> Self {
        Self {
            inner: Mutex::new(paths.iter().map(|p| p.as_ref().to_path_buf()).collect()),
        }
    }
}

impl RecentStore for MemoryRecentStore {
    fn load(&self) -> Result<Vec<PathBuf>> {
        Ok(self.inner.lock().clone())
    }

    fn save(&self, paths: &[PathBuf]) -> Result<()> {
        *self.inner.lock() = paths.to_vec();
        Ok(())
    }
}
