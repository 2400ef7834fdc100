use alloc::string::String;

use super::fatal::FatalErrorKind;

#[derive(thiserror::Error, Debug)]
pub enum ResolveErrorKind {
    #[error("Registration not found: {name}")]
    NotFound { name: String },
    #[error("Expected {implementor} to implement {target}")]
    CapabilityMismatch { implementor: String, target: String },
    #[error("Type '{name}' has no zero-value constructor, it can only be registered as an instance")]
    NotConstructible { name: String },
    #[error("Incorrect instance type. Actual: {actual}, expected: {expected}")]
    IncorrectType { expected: String, actual: String },
    #[error("Cyclic resolution of '{name}': it's resolved again while its instance is being constructed")]
    CyclicResolution { name: String },
    #[error("Initializer failed for '{type_name}': {error}")]
    Initializer { type_name: String, error: anyhow::Error },
    #[error(transparent)]
    Fatal(#[from] FatalErrorKind),
}

impl ResolveErrorKind {
    /// Returns `true` if the caller is expected to abort instead of handling the error.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}
