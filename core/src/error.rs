use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconError {
    #[error("No file matching '{pattern}' found in {dir}")]
    NotFound { dir: String, pattern: String },

    #[error("Missing required columns in {file} file: {}", missing.join(", "))]
    MissingColumns { file: String, missing: Vec<String> },

    #[error("Empty {file} file: no header line")]
    EmptyFile { file: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification used to decide how a stage terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Expected file absent. Reported, not fatal to the schedule.
    NotFound,
    /// Required columns missing or no header at all.
    Schema,
    /// Remote or database connectivity, including mid-stream decode failures.
    Transport,
    /// Anything else that aborts a stage.
    Data,
}

impl ReconError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconError::NotFound { .. } => ErrorKind::NotFound,
            ReconError::MissingColumns { .. } | ReconError::EmptyFile { .. } => ErrorKind::Schema,
            ReconError::Database(_) | ReconError::Io(_) | ReconError::Decode(_) => {
                ErrorKind::Transport
            }
            ReconError::Serialization(_) | ReconError::Config(_) | ReconError::Other(_) => {
                ErrorKind::Data
            }
        }
    }
}

pub type ReconResult<T> = Result<T, ReconError>;
