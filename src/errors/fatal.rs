use alloc::string::String;

/// Conditions the caller can't meaningfully recover from.
///
/// These indicate a configuration ordering bug or an instance that could not be fully initialized,
/// so the resolution chain must be aborted instead of retried.
#[derive(thiserror::Error, Debug)]
pub enum FatalErrorKind {
    #[error("Can't find type '{name}', did you forget to register it?")]
    UninitializedTypeReference { name: String },
    #[error("Error initializing '{implementor}' (registered for target '{target}'): {error}")]
    InitializationFailure {
        implementor: String,
        target: String,
        error: anyhow::Error,
    },
    #[error("Expected {implementor} to implement {target}")]
    CapabilityMismatch { implementor: String, target: String },
}
