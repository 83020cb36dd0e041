//! Viewer configuration, read from `config.toml` in the platform config dir.
//!
//! Every section and key is optional; missing entries take their defaults.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ViewerError, ViewerResult};
use crate::magnifier::{MagnifierConfig, MagnifierShape, MagnifierSize};
use crate::view::ScaleMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ViewerConfig {
    pub view: ViewSettings,
    pub magnifier: MagnifierSettings,
    pub sync: SyncSettings,
    pub recent: RecentSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ViewSettings {
    /// Screen resolution used to turn points into pixels.
    pub dpi: f64,
    pub scale_mode: ScaleMode,
    /// Factor used when `scale_mode` is `fixed`.
    pub fixed_scale: f64,
    pub zoom_step: f64,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            dpi: 96.0,
            scale_mode: ScaleMode::FitWindow,
            fixed_scale: 1.0,
            zoom_step: 1.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MagnifierSettings {
    pub size: MagnifierSize,
    pub shape: MagnifierShape,
    pub multiplier: f64,
}

impl Default for MagnifierSettings {
    fn default() -> Self {
        let defaults = MagnifierConfig::default();
        Self {
            size: defaults.size,
            shape: defaults.shape,
            multiplier: defaults.multiplier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SyncSettings {
    /// Command run for inverse search; `{file}` and `{line}` are substituted.
    pub editor_command: Option<String>,
    /// Load correspondence indexes on a worker thread.
    pub background_load: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            editor_command: None,
            background_load: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RecentSettings {
    pub max_entries: usize,
}

impl Default for RecentSettings {
    fn default() -> Self {
        Self { max_entries: 10 }
    }
}

impl ViewerConfig {
    pub fn validate(&self) -> ViewerResult<()> {
        let view = &self.view;
        if !(view.dpi.is_finite() && view.dpi > 0.0) {
            return Err(ViewerError::Config(format!("dpi must be positive, got {}", view.dpi)));
        }
        if !(view.fixed_scale.is_finite() && view.fixed_scale > 0.0) {
            return Err(ViewerError::Config(format!(
                "fixed-scale must be positive, got {}",
                view.fixed_scale
            )));
        }
        if !(view.zoom_step.is_finite() && view.zoom_step > 1.0) {
            return Err(ViewerError::Config(format!(
                "zoom-step must be greater than 1, got {}",
                view.zoom_step
            )));
        }
        if !(self.magnifier.multiplier.is_finite() && self.magnifier.multiplier >= 1.0) {
            return Err(ViewerError::Config(format!(
                "magnifier multiplier must be at least 1, got {}",
                self.magnifier.multiplier
            )));
        }
        if self.recent.max_entries == 0 {
            return Err(ViewerError::Config(
                "recent max-entries must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn magnifier_config(&self) -> MagnifierConfig {
        MagnifierConfig {
            size: self.magnifier.size,
            shape: self.magnifier.shape,
            multiplier: self.magnifier.multiplier,
        }
    }
}

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "texview", "texview")
}

pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

pub fn parse_config(text: &str) -> Result<ViewerConfig> {
    let config: ViewerConfig = toml::from_str(text).context("failed to parse configuration")?;
    config.validate()?;
    Ok(config)
}

/// Loads `path`, or the default location when `path` is `None`. A missing
/// file yields the defaults; an unreadable or invalid one is an error.
pub fn load_config(path: Option<&Path>) -> Result<ViewerConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) => path,
            None => return Ok(ViewerConfig::default()),
        },
    };
    if !path.exists() {
        debug!(path = %path.display(), "no configuration file, using defaults");
        return Ok(ViewerConfig::default());
    }
    let text = fs::read_to_string(&path)
        .with_context(|| format!("failed to read configuration {:?}", path))?;
    parse_config(&text).with_context(|| format!("invalid configuration {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn empty_file_yields_defaults() {
        assert_eq!(parse_config("").unwrap(), ViewerConfig::default());
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = parse_config(
            r#"
            [view]
            scale-mode = "fit-width"
            zoom-step = 1.5

            [magnifier]
            size = 4
            shape = "rectangular"

            [sync]
            editor-command = "nvim +{line} {file}"
            "#,
        )
        .unwrap();

        assert_eq!(config.view.scale_mode, ScaleMode::FitWidth);
        assert_eq!(config.view.zoom_step, 1.5);
        assert_eq!(config.view.dpi, 96.0);
        assert_eq!(config.magnifier.size.step(), 4);
        assert_eq!(config.magnifier.shape, MagnifierShape::Rectangular);
        assert_eq!(config.magnifier.multiplier, 2.0);
        assert_eq!(
            config.sync.editor_command.as_deref(),
            Some("nvim +{line} {file}")
        );
        assert!(config.sync.background_load);
        assert_eq!(config.recent.max_entries, 10);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(parse_config("[view]\nzoom-step = 1.0").is_err());
        assert!(parse_config("[view]\ndpi = -3.0").is_err());
        assert!(parse_config("[magnifier]\nsize = 9").is_err());
        assert!(parse_config("[recent]\nmax-entries = 0").is_err());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, ViewerConfig::default());
    }

    #[test]
    fn file_on_disk_is_loaded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[recent]\nmax-entries = 3\n").unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().recent.max_entries, 3);
    }
}
