use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Reading or copying the source image failed.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The provider upload failed. Fatal for the image being processed.
    #[error("submission to {provider} failed: {reason}")]
    Submit { provider: String, reason: String },

    /// Fetching a matched page for tags failed. Recoverable per match.
    #[error("fetching {url} failed: {reason}")]
    Fetch { url: String, reason: String },

    /// The results page no longer looks like the dialect we parse.
    #[error("malformed results page: {0}")]
    MalformedPage(String),

    #[error("bot challenge on {url} could not be solved")]
    Challenge { url: String },

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("thumbnail generation failed for {path:?}: {source}")]
    Thumbnail {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),

    /// A batch stopped on the first failing file.
    #[error("processing {path:?} failed: {source}")]
    Item {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors that should be recorded against a single match and skipped.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Fetch { .. } | Error::Challenge { .. })
    }
}
