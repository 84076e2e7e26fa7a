//! Error types for the add-in runtime.
//!
//! Internal code propagates [`Error`] with `?`. Anything the host calls into
//! (the RTD server methods, the worksheet functions) converts to a status
//! code with [`Error::hresult`] or to an [`XlError`] cell value instead, so no
//! Rust error or panic ever crosses the host boundary.

use std::fmt;

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// COM success status.
pub const S_OK: i32 = 0;
/// Unspecified failure.
pub const E_FAIL: i32 = 0x8000_4005_u32 as i32;
/// Allocation failure.
pub const E_OUTOFMEMORY: i32 = 0x8007_000E_u32 as i32;
/// An argument was invalid.
pub const E_INVALIDARG: i32 = 0x8007_0057_u32 as i32;

/// Errors raised by the RTD server, the registries and the host boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// The host tried to connect a topic id that is already live.
    #[error("topic {0} is already connected")]
    DuplicateTopic(i32),

    /// The host referred to a topic id that is not in the table.
    #[error("topic {0} is not connected")]
    UnknownTopic(i32),

    /// A topic named a function the dispatch registry does not know.
    #[error("no RTD function registered under {0:?}")]
    UnknownFunction(String),

    /// A topic arrived without any parameters, so there is no function name.
    #[error("topic {0} carries no function name")]
    MissingFunctionName(i32),

    /// Allocation failed while building a topic.
    #[error("out of memory")]
    OutOfMemory,

    /// An argument was present but unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The host returned a non-success code.
    #[error("host call failed with code {0}")]
    Host(i32),

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The OS refused to start a thread.
    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(String),
}

impl Error {
    /// Status code reported to the host for this error.
    pub fn hresult(&self) -> i32 {
        match self {
            Error::OutOfMemory => E_OUTOFMEMORY,
            Error::InvalidArgument(_) => E_INVALIDARG,
            Error::DuplicateTopic(_)
            | Error::UnknownTopic(_)
            | Error::UnknownFunction(_)
            | Error::MissingFunctionName(_)
            | Error::Host(_)
            | Error::Config(_)
            | Error::ThreadSpawn(_) => E_FAIL,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<smallvec::CollectionAllocErr> for Error {
    fn from(_: smallvec::CollectionAllocErr) -> Self {
        Error::OutOfMemory
    }
}

/// Collapse a `Result<()>` into the status code the host expects.
pub fn to_hresult(result: Result<()>) -> i32 {
    match result {
        Ok(()) => S_OK,
        Err(err) => err.hresult(),
    }
}

/// Spreadsheet error values, as shown in a cell.
///
/// Names are CamelCase while `Display` renders them exactly as the host
/// does (`#REF!`, `#N/A`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XlError {
    Null,
    Div0,
    Value,
    Ref,
    Name,
    Num,
    Na,
    GettingData,
}

impl XlError {
    /// Numeric code used in the raw host value.
    pub fn code(self) -> i32 {
        match self {
            XlError::Null => 0,
            XlError::Div0 => 7,
            XlError::Value => 15,
            XlError::Ref => 23,
            XlError::Name => 29,
            XlError::Num => 36,
            XlError::Na => 42,
            XlError::GettingData => 43,
        }
    }

    /// Map a raw host error code back to a known error.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => XlError::Null,
            7 => XlError::Div0,
            15 => XlError::Value,
            23 => XlError::Ref,
            29 => XlError::Name,
            36 => XlError::Num,
            42 => XlError::Na,
            43 => XlError::GettingData,
            _ => return None,
        })
    }
}

impl fmt::Display for XlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            XlError::Null => "#NULL!",
            XlError::Div0 => "#DIV/0!",
            XlError::Value => "#VALUE!",
            XlError::Ref => "#REF!",
            XlError::Name => "#NAME?",
            XlError::Num => "#NUM!",
            XlError::Na => "#N/A",
            XlError::GettingData => "#GETTING_DATA",
        })
    }
}
