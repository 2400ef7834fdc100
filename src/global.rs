//! Process-wide default injector.
//!
//! The free functions delegate to [`global`], and through it to its current scope.
//! Pushing and popping scopes on the default injector from several threads makes the current scope
//! of every caller change under it, so such callers must coordinate the scope lifecycle themselves.

use alloc::sync::Arc;
use std::sync::OnceLock;

use crate::{
    any::SharedInstance,
    binding::InitOutcome,
    catalog::TypeEntry,
    errors::{CatalogErrorKind, RegisterErrorKind, ResolveErrorKind},
    initializer::InstanceInitializer,
    injector::Injector,
    scope::Scope,
    token::RegistrationToken,
};

static GLOBAL: OnceLock<Injector> = OnceLock::new();

/// Returns the process-wide injector, creating it with the default config on first use.
#[inline]
#[must_use]
pub fn global() -> &'static Injector {
    GLOBAL.get_or_init(Injector::new)
}

/// # Errors
/// Returns [`CatalogErrorKind::DuplicateRegistration`] if the canonical name is already registered.
#[inline]
pub fn register<T: ?Sized>(entry: TypeEntry<T>) -> Result<(), CatalogErrorKind> {
    global().register(entry)
}

/// # Errors
/// Returns a capability mismatch if `T` isn't declared to implement `I`.
#[inline]
pub fn register_instance<I, T>(instance: T) -> Result<RegistrationToken, RegisterErrorKind>
where
    I: ?Sized + 'static,
    T: Send + Sync + 'static,
{
    global().register_instance::<I, T>(instance)
}

/// # Errors
/// Returns a capability mismatch if `T` isn't declared to implement `I`.
#[inline]
pub fn register_shared_instance<I, T>(instance: Arc<T>) -> Result<RegistrationToken, RegisterErrorKind>
where
    I: ?Sized + 'static,
    T: Send + Sync + 'static,
{
    global().register_shared_instance::<I, T>(instance)
}

/// # Errors
/// Returns a capability mismatch if `T` isn't declared to implement `I`.
#[inline]
pub fn register_implementation<I, T>(cached: bool) -> Result<RegistrationToken, RegisterErrorKind>
where
    I: ?Sized + 'static,
    T: Default + Send + Sync + 'static,
{
    global().register_implementation::<I, T>(cached)
}

/// # Errors
/// Returns a capability mismatch if `T` isn't declared to implement `I`.
#[inline]
pub fn register_implementation_with_init<I, T, F>(cached: bool, init: F) -> Result<RegistrationToken, RegisterErrorKind>
where
    I: ?Sized + 'static,
    T: Default + Send + Sync + 'static,
    F: Fn(&mut T) -> InitOutcome + Send + Sync + 'static,
{
    global().register_implementation_with_init::<I, T, F>(cached, init)
}

#[inline]
pub fn register_by_name(target: &str, implementor: &str, cached: bool) -> RegistrationToken {
    global().register_by_name(target, implementor, cached)
}

#[inline]
pub fn register_instance_initializer<Init>(initializer: Init)
where
    Init: InstanceInitializer + 'static,
{
    global().register_instance_initializer(initializer);
}

/// # Errors
/// See [`Scope::resolve`].
#[inline]
pub fn resolve<I: ?Sized + 'static>() -> Result<Arc<I>, ResolveErrorKind> {
    global().resolve::<I>()
}

/// # Errors
/// See [`Scope::resolve`].
#[inline]
pub fn resolve_by_name(target: &str) -> Result<SharedInstance, ResolveErrorKind> {
    global().resolve_by_name(target)
}

#[inline]
#[must_use]
pub fn create_scope(push: bool) -> Scope {
    global().create_scope(push)
}

/// Clears the default injector. Intended for tests.
#[inline]
pub fn reset() {
    global().reset();
}
