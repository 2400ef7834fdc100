/// Config for an injector
/// ## Fields
/// - `capability_mismatch`:
///   How a registration whose implementor doesn't satisfy the target is reported.
///
///   With [`MismatchPolicy::Recoverable`] the caller gets a `CapabilityMismatch` error it may handle.
///   With [`MismatchPolicy::Fatal`] the same condition is reported as a fatal error.
///   By-name bindings are checked on their first resolution and follow the same policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Config {
    pub capability_mismatch: MismatchPolicy,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MismatchPolicy {
    #[default]
    Recoverable,
    Fatal,
}
