use crate::context::ContextError;
use thiserror::Error;

/// Errors that can occur while resolving, fetching or installing modules
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Invalid module locator '{locator}': {reason}")]
    InvalidLocator { locator: String, reason: String },

    #[error("The relative path to file is empty for '{0}'")]
    EmptyFilePath(String),

    #[error("'{path}' doesn't exist in the package '{package}'")]
    PathNotFound { path: String, package: String },

    #[error("An error occurred while loading the module '{0}'")]
    NotFound(String),

    #[error("Module '{0}' already exists on disk, not overwriting")]
    AlreadyExists(String),

    #[error(
        "Error in cloning git repository '{url}': {error}. This usually indicates a typo in the package or author name; or an authorization issue."
    )]
    CloneFailed { url: String, error: String },

    #[error("Invalid module archive for '{locator}': {reason}")]
    InvalidArchive { locator: String, reason: String },

    #[error("I/O error during {operation} on '{path}': {error}")]
    Io {
        operation: String,
        path: String,
        #[source]
        error: std::io::Error,
    },

    #[error("Module fetch interrupted: {0}")]
    Interrupted(#[from] ContextError),
}

impl ModuleError {
    pub fn io(operation: &str, path: impl AsRef<std::path::Path>, error: std::io::Error) -> Self {
        ModuleError::Io {
            operation: operation.to_string(),
            path: path.as_ref().display().to_string(),
            error,
        }
    }

    pub fn invalid_locator(locator: &str, reason: impl Into<String>) -> Self {
        ModuleError::InvalidLocator {
            locator: locator.to_string(),
            reason: reason.into(),
        }
    }
}
