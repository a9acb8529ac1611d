use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, LoaderError>;

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unreadable archive {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("backend unavailable: {0}")]
    Backend(String),

    #[error("compilation failed: {0}")]
    Compilation(String),
}

impl LoaderError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<r2d2::Error> for LoaderError {
    fn from(err: r2d2::Error) -> Self {
        Self::Backend(format!("connection pool: {err}"))
    }
}

impl From<rusqlite::Error> for LoaderError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Backend(format!("sqlite: {err}"))
    }
}
