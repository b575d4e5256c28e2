//! Error types for decoding and rendering.

use thiserror::Error;

/// Errors produced by the descriptor reader, graph builder, proxy decoder and
/// renderer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Truncated or inconsistent binary input.
    #[error("malformed descriptor at offset {offset:#x}: {message}")]
    MalformedDescriptor { offset: usize, message: String },

    /// A recognized record whose tag, version or variant is not implemented.
    #[error("unsupported layout: {0}")]
    UnsupportedLayout(String),

    /// An NDR procedure or type format the proxy decoder does not handle.
    #[error("unsupported procedure format at offset {offset:#x}: {message}")]
    UnsupportedProcedureFormat { offset: usize, message: String },

    /// A type reference that does not resolve within the graph.
    #[error("dangling type reference: {0}")]
    DanglingReference(String),

    /// Rendering was requested for a node whose parse did not complete.
    #[error("`{0}` has not been parsed; enable best-effort rendering to format it anyway")]
    NotParsed(String),
}

impl Error {
    pub(crate) fn malformed(offset: usize, message: impl Into<String>) -> Self {
        Error::MalformedDescriptor {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn unsupported_proc(offset: usize, message: impl Into<String>) -> Self {
        Error::UnsupportedProcedureFormat {
            offset,
            message: message.into(),
        }
    }
}

/// Result type for decoding and rendering operations.
pub type Result<T> = std::result::Result<T, Error>;
