use std::fmt;

/// Errors surfaced to callers of the naming facade.
///
/// Both variants indicate caller misuse; there is no retry or recovery.
/// Failing to find a name is not an error: it resolves to [`crate::SENTINEL`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    /// The requested destructure count was negative. Raised at construction,
    /// before any frame is inspected.
    Usage { count: i64 },
    /// More than one simple target was bound in the deciding scope. Raised on
    /// first read of the name and cached.
    Conflict { names: Vec<String> },
}

impl fmt::Display for NameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usage { count } => {
                write!(f, "expected a non-negative destructure count, got {count}")
            }
            Self::Conflict { names } => {
                write!(f, "cannot assign multiple names to the same object: {}", names.join(", "))
            }
        }
    }
}

impl std::error::Error for NameError {}
