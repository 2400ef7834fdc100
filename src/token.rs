use alloc::sync::{Arc, Weak};
use core::fmt::{self, Debug, Formatter};
use tracing::debug;

use crate::{
    binding::Binding,
    scope::{Scope, ScopeInner},
};

/// Allows the caller to revoke exactly the registration it was returned for.
///
/// Dropping the token keeps the registration alive, only [`Self::close`] removes it.
pub struct RegistrationToken {
    scope: Weak<ScopeInner>,
    binding: Option<Arc<Binding>>,
}

impl RegistrationToken {
    #[inline]
    #[must_use]
    pub(crate) fn new(scope: &Scope, binding: Arc<Binding>) -> Self {
        Self {
            scope: Arc::downgrade(&scope.inner),
            binding: Some(binding),
        }
    }

    /// Token of a registration that was never added.
    #[inline]
    #[must_use]
    pub(crate) fn closed() -> Self {
        Self {
            scope: Weak::new(),
            binding: None,
        }
    }

    /// Removes the registration from the scope that created it.
    ///
    /// Closing twice, or after the scope is gone, is a no-op.
    pub fn close(&mut self) {
        let Some(binding) = self.binding.take() else {
            return;
        };
        match self.scope.upgrade() {
            Some(inner) => {
                Scope { inner }.remove_binding(&binding);
            }
            None => debug!(id = binding.id, "Scope already dropped"),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.binding.is_none()
    }

    #[inline]
    #[must_use]
    pub fn binding_id(&self) -> Option<u64> {
        self.binding.as_ref().map(|binding| binding.id)
    }
}

impl Debug for RegistrationToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationToken")
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}
