//! Error types for the ocidiff library.
//!
//! All fallible operations return a [`Result<T>`], an alias for
//! `Result<T, DiffError>`.
//!
//! # Error Categories
//!
//! - **Availability**: [`Unavailable`]: a descriptor cannot be resolved in
//!   the content store, or lacks blobs for the requested platform.
//! - **Bounds**: [`OverLimit`]: a blob or descriptor list exceeds one of the
//!   hard limits.
//! - **Decoding**: [`Parse`]: a JSON blob does not decode into the expected
//!   shape.
//! - **Shape**: [`Unsupported`]: e.g. a manifest compared against an index
//!   in the wrong order.
//! - **System**: [`Io`], [`Canceled`].
//!
//! [`Unavailable`]: DiffError::Unavailable
//! [`OverLimit`]: DiffError::OverLimit
//! [`Parse`]: DiffError::Parse
//! [`Unsupported`]: DiffError::Unsupported
//! [`Io`]: DiffError::Io
//! [`Canceled`]: DiffError::Canceled
//!
//! # Error accumulation
//!
//! The walker collects non-fatal errors (a failing event handler, a cleanup
//! miss) per node and joins them with [`join_errors`]; fatal errors
//! short-circuit the current subtree but still let siblings proceed. The
//! joined form is [`DiffError::Join`].

use std::fmt;

/// Result type alias for operations that may return a [`DiffError`].
pub type Result<T> = std::result::Result<T, DiffError>;

/// Error type for image diffing operations.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// Content referenced by a descriptor is not available in the store.
    #[error("content not available: {0}")]
    Unavailable(String),

    /// A blob or list exceeds a configured bound.
    #[error("over limit: {0}")]
    OverLimit(String),

    /// A JSON blob could not be decoded into the expected shape.
    #[error("failed to parse {what}: {source}")]
    Parse {
        /// What was being parsed (e.g. "index", "manifest").
        what: String,
        #[source]
        source: serde_json::Error,
    },

    /// The pair of inputs has a shape the walker does not support.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// An event handler returned an error.
    #[error("event handler: {0}")]
    Handler(String),

    /// The operation was canceled via the caller's token.
    #[error("operation canceled")]
    Canceled,

    /// An error attributed to a named composite field.
    #[error("field {field:?}: {source}")]
    Field {
        field: String,
        #[source]
        source: Box<DiffError>,
    },

    /// I/O error during blob, tar, or report operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Multiple accumulated errors.
    #[error("{}", JoinDisplay(.0))]
    Join(Vec<DiffError>),
}

struct JoinDisplay<'a>(&'a [DiffError]);

impl fmt::Display for JoinDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

/// Join accumulated errors into a single error.
///
/// Returns `None` for an empty list, the sole error for a single-element
/// list, and [`DiffError::Join`] otherwise. Nested joins are flattened.
pub fn join_errors(errs: Vec<DiffError>) -> Option<DiffError> {
    let mut flat = Vec::new();
    for err in errs {
        match err {
            DiffError::Join(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }
    match flat.len() {
        0 => None,
        1 => flat.pop(),
        _ => Some(DiffError::Join(flat)),
    }
}

impl DiffError {
    /// True when this error (or any joined member) is a cancellation.
    pub fn is_canceled(&self) -> bool {
        match self {
            DiffError::Canceled => true,
            DiffError::Join(errs) => errs.iter().any(|e| e.is_canceled()),
            DiffError::Field { source, .. } => source.is_canceled(),
            _ => false,
        }
    }

    /// Attribute this error to a named composite field.
    pub(crate) fn in_field(self, field: impl Into<String>) -> DiffError {
        DiffError::Field {
            field: field.into(),
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_empty() {
        assert!(join_errors(Vec::new()).is_none());
    }

    #[test]
    fn test_join_single_is_transparent() {
        let err = join_errors(vec![DiffError::Canceled]).unwrap();
        assert!(matches!(err, DiffError::Canceled));
    }

    #[test]
    fn test_join_flattens_nested() {
        let inner = DiffError::Join(vec![
            DiffError::Canceled,
            DiffError::Unavailable("x".into()),
        ]);
        let err = join_errors(vec![inner, DiffError::Unsupported("y".into())]).unwrap();
        match err {
            DiffError::Join(errs) => assert_eq!(errs.len(), 3),
            other => panic!("expected Join, got {other:?}"),
        }
    }

    #[test]
    fn test_join_display() {
        let err = join_errors(vec![
            DiffError::Unavailable("a".into()),
            DiffError::Unsupported("b".into()),
        ])
        .unwrap();
        assert_eq!(err.to_string(), "content not available: a; unsupported: b");
    }
}
