use alloc::string::String;
use core::fmt::{self, Debug, Formatter};
use parking_lot::RwLock;

use crate::{
    any::{canonical_name, type_name_of},
    catalog::{TypeCatalog, TypeHandle},
    errors::FatalErrorKind,
};

/// Lazily resolvable handle to a type.
///
/// A descriptor is identified by its canonical name. One built by name only is resolved
/// through the catalog on first access, and the association is kept for its lifetime.
pub struct TypeDescriptor {
    name: String,
    resolved: RwLock<Option<TypeHandle>>,
}

impl TypeDescriptor {
    #[inline]
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: canonical_name(name),
            resolved: RwLock::new(None),
        }
    }

    #[inline]
    #[must_use]
    pub fn resolved(handle: TypeHandle) -> Self {
        Self {
            name: String::from(handle.name()),
            resolved: RwLock::new(Some(handle)),
        }
    }

    /// Descriptor of `T` that still resolves through the catalog.
    #[inline]
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            name: type_name_of::<T>(),
            resolved: RwLock::new(None),
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved.read().is_some()
    }

    /// Returns the type handle, resolving it through the catalog on first access.
    ///
    /// # Errors
    /// Returns [`FatalErrorKind::UninitializedTypeReference`] if the name was never registered in the catalog.
    pub fn handle(&self, catalog: &TypeCatalog) -> Result<TypeHandle, FatalErrorKind> {
        if let Some(handle) = self.resolved.read().as_ref() {
            return Ok(handle.clone());
        }

        let mut resolved = self.resolved.write();
        if let Some(handle) = resolved.as_ref() {
            return Ok(handle.clone());
        }
        let handle = catalog.resolve_by_name(&self.name)?;
        *resolved = Some(handle.clone());
        Ok(handle)
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for TypeDescriptor {}

impl Debug for TypeDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
