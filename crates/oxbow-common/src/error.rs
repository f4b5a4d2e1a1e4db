//! Error types for OxbowDB.

use crate::page::{FileId, PageNo};
use thiserror::Error;

/// Result type alias using OxbowError.
pub type Result<T> = std::result::Result<T, OxbowError>;

/// Errors that can occur in OxbowDB operations.
#[derive(Debug, Error)]
pub enum OxbowError {
    // I/O and file errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file already exists: {0}")]
    FileExists(String),

    #[error("invalid page {page_no} in file {file_id}")]
    InvalidPage { file_id: FileId, page_no: PageNo },

    // Buffer pool errors
    #[error("buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("page {page_no} is not pinned")]
    PageNotPinned { page_no: PageNo },

    // Relation file errors
    #[error("record of {size} bytes does not fit in a page")]
    InsufficientSpace { size: usize },

    // Index errors
    #[error("index meta page does not match caller parameters: {0}")]
    BadIndexInfo(String),

    #[error("low operator must be GT or GTE and high operator must be LT or LTE")]
    BadOpcodes,

    #[error("scan range low value exceeds high value")]
    BadScanrange,

    #[error("no key found in the scan range")]
    NoSuchKeyFound,

    #[error("no scan is in progress")]
    ScanNotInitialized,

    #[error("index scan completed")]
    IndexScanCompleted,

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}
