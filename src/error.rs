use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the annotation subsystem
#[derive(Error, Debug)]
pub enum AnnotatorError {
    #[error("{collaborator} call failed: {message}")]
    Transport {
        collaborator: &'static str,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Sidecar record is unreadable: {path}")]
    CacheCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("File I/O error: {path}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot read image: {path}")]
    ImageUnreadable {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Box index {index} is out of range ({len} boxes on page)")]
    InvalidBoxIndex { index: usize, len: usize },

    #[error("Edit refers to a box that is no longer rendered")]
    StaleEdit,

    #[error("Coordinates out of range: {message}")]
    InvalidCoordinates { message: String },

    #[error("Malformed {what} response: {message}")]
    MalformedResponse { what: &'static str, message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("No page is active")]
    NoActivePage,

    #[error("General error: {0}")]
    General(#[from] anyhow::Error),
}

impl AnnotatorError {
    /// Create a transport error without an underlying source
    pub fn transport(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Transport {
            collaborator,
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error with source
    pub fn transport_with_source(
        collaborator: &'static str,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            collaborator,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a file I/O error
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn malformed(what: &'static str, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            what,
            message: message.into(),
        }
    }

    /// Check if error is recoverable (the in-memory state stays usable)
    pub fn is_recoverable(&self) -> bool {
        match self {
            AnnotatorError::Configuration { .. } => false,
            AnnotatorError::General(_) => false,
            _ => true,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            AnnotatorError::Transport { collaborator, .. } => {
                format!("The {} service did not answer. Try again later.", collaborator)
            }
            AnnotatorError::Persistence { path, .. } => {
                format!(
                    "Could not write {}. Check file permissions and disk space.",
                    path.display()
                )
            }
            AnnotatorError::InvalidBoxIndex { .. } | AnnotatorError::StaleEdit => {
                "The box was changed in the meantime. The view has been refreshed.".to_string()
            }
            AnnotatorError::MalformedResponse { what, .. } => {
                format!("The {} answer could not be understood.", what)
            }
            AnnotatorError::NoActivePage => "Open a folder with scans first.".to_string(),
            _ => "Something went wrong. Check the logs for details.".to_string(),
        }
    }
}

/// Result type alias for convenience
pub type AnnotatorResult<T> = Result<T, AnnotatorError>;

/// Error context for turning foreign errors into transport failures
pub trait ErrorContext<T> {
    fn with_collaborator(self, collaborator: &'static str) -> AnnotatorResult<T>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_collaborator(self, collaborator: &'static str) -> AnnotatorResult<T> {
        self.map_err(|e| AnnotatorError::transport_with_source(collaborator, e.to_string(), e))
    }
}
