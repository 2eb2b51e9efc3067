//! Error types for value parsing in groendus-types.

use thiserror::Error;

/// Errors that can occur when parsing portal values.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A sort specification was not of the form `field:ASC|DESC`.
    #[error("Invalid sort specification: {0}")]
    InvalidSort(String),
}
