//! Error types for the solver library

use thiserror::Error;

/// Errors that can occur when parsing positions or handling opening books
#[derive(Error, Debug)]
pub enum Error {
    /// A move sequence contained an out of range, full or game-ending column
    #[error("Invalid move {ply} \"{sequence}\"")]
    InvalidMove { ply: usize, sequence: String },

    /// Reading or writing an opening book failed
    #[error("Opening book I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An opening book file does not match this build or is malformed
    #[error("Invalid opening book: {0}")]
    InvalidBook(String),
}

/// Result type alias for solver operations
pub type Result<T> = std::result::Result<T, Error>;
