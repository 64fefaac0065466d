use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Syntax(#[from] serde_json::Error),

    #[error("unterminated block comment starting at offset {0}")]
    UnterminatedComment(usize),

    #[error("device folder not found: {}", .0.display())]
    MissingFolder(PathBuf),

    #[error("template {} must be a JSON object", .0.display())]
    TemplateNotObject(PathBuf),

    #[error("fuzzy threshold must be between 0.0 and 1.0, got {0}")]
    InvalidThreshold(f64),

    #[error("invalid settings file {}: {source}", path.display())]
    Settings {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid exclude pattern: {0}")]
    Glob(#[from] globset::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DedupError>;
