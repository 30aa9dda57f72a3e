//! Convenience result type alias.

use crate::error::AppError;

/// A specialized `Result` type for charge point operations.
pub type AppResult<T> = Result<T, AppError>;
