use crate::error::{DedupError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_ROOT: &str = "config/devices";

/// Contents of the optional settings file (`.paramdedup.toml`).
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileSettings {
    pub root: Option<PathBuf>,
    pub master_template: Option<PathBuf>,
    pub fuzzy_threshold: Option<f64>,
    pub follow_up: Option<PathBuf>,
    pub exclude: Vec<String>,
}

impl FileSettings {
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no settings file");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|source| DedupError::Settings {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Values given on the command line; these win over the settings file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub root: Option<PathBuf>,
    pub master_template: Option<PathBuf>,
    pub fuzzy_threshold: Option<f64>,
    pub follow_up: Option<PathBuf>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub root: PathBuf,
    pub folder: String,
    pub template_name: String,
    pub master_template: Option<PathBuf>,
    pub fuzzy_threshold: Option<f64>,
    pub follow_up: Option<PathBuf>,
    pub exclude: Vec<String>,
}

impl Settings {
    pub fn resolve(
        folder: &str,
        template_name: &str,
        overrides: Overrides,
        file: FileSettings,
    ) -> Result<Self> {
        let fuzzy_threshold = overrides.fuzzy_threshold.or(file.fuzzy_threshold);
        if let Some(t) = fuzzy_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(DedupError::InvalidThreshold(t));
            }
        }

        let mut exclude = file.exclude;
        exclude.extend(overrides.exclude);

        Ok(Self {
            root: overrides
                .root
                .or(file.root)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT)),
            folder: folder.to_string(),
            template_name: template_name.to_string(),
            master_template: overrides.master_template.or(file.master_template),
            fuzzy_threshold,
            follow_up: overrides.follow_up.or(file.follow_up),
            exclude,
        })
    }

    pub fn folder_dir(&self) -> PathBuf {
        self.root.join(&self.folder)
    }

    pub fn exclude_set(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.exclude {
            builder.add(Glob::new(pattern)?);
        }
        Ok(builder.build()?)
    }
}
