//! Pipeline error type.
//!
//! Errors are `Clone` so a single failed operation can hand the same
//! outcome to every caller waiting on it.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The source transfer failed or timed out.
    #[error("download failed: {message}")]
    DownloadFailed { message: String },

    /// ffprobe could not produce a usable track listing.
    #[error("probe failed: {message}")]
    ProbeFailed { message: String },

    /// A transcoding subprocess exited abnormally.
    #[error("packaging failed (exit code {exit_code:?})")]
    PackagingFailed {
        exit_code: Option<i32>,
        /// Tail of the subprocess log, for diagnostics.
        log: String,
    },

    /// Local filesystem operation failed.
    #[error("filesystem error: {message}")]
    FilesystemFailed { message: String },
}

impl Error {
    pub fn download(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
        }
    }

    pub fn probe(message: impl Into<String>) -> Self {
        Self::ProbeFailed {
            message: message.into(),
        }
    }

    pub fn packaging(exit_code: Option<i32>, log: impl Into<String>) -> Self {
        Self::PackagingFailed {
            exit_code,
            log: log.into(),
        }
    }

    /// Stable short name for logs and job records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DownloadFailed { .. } => "download",
            Self::ProbeFailed { .. } => "probe",
            Self::PackagingFailed { .. } => "packaging",
            Self::FilesystemFailed { .. } => "filesystem",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::FilesystemFailed {
            message: e.to_string(),
        }
    }
}
