use alloc::string::String;

use super::fatal::FatalErrorKind;

#[derive(thiserror::Error, Debug)]
pub enum RegisterErrorKind {
    #[error("Expected {implementor} to implement {target}")]
    CapabilityMismatch { implementor: String, target: String },
    #[error(transparent)]
    Fatal(#[from] FatalErrorKind),
}

impl RegisterErrorKind {
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}
