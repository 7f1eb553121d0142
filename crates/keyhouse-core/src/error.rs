//! Error Types for KeyHouse
//!
//! This module defines the error taxonomy shared by the store and its
//! HTTP wrapper.
//!
//! ## Error Categories
//!
//! ### Lookup
//! - `NotFound`: the key is absent, or masked by a tombstone. Returned
//!   verbatim to callers and never logged as an error.
//!
//! ### Data Integrity
//! - `CorruptRecord`: the self-describing length framing of a record did
//!   not hold up during decode. Fails the operation; during recovery it
//!   can fail the open.
//!
//! ### I/O
//! - `Io`: an underlying filesystem error, surfaced to the caller and
//!   never retried silently.
//!
//! ## Usage
//! All store-facing functions return `Result<T>`, aliased to
//! `Result<T, Error>`, so `?` propagates errors upward.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("record does not exist")]
    NotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}

pub type Result<T> = std::result::Result<T, Error>;
