use std::path::PathBuf;

use thiserror::Error;

use crate::types::DbError;

/// Failure of an administrative command.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Admin commands never create a database.
    #[error("database directory not found: {}", .0.display())]
    MissingDatabase(PathBuf),
    /// The path exists but is a regular file.
    #[error("not a database directory: {}", .0.display())]
    NotADirectory(PathBuf),
    /// Engine error while opening or inspecting the database.
    #[error(transparent)]
    Core(#[from] DbError),
    /// Directory listing or metadata lookup failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias for admin commands.
pub type Result<T> = std::result::Result<T, AdminError>;
