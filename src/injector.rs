use alloc::{
    boxed::Box,
    sync::{Arc, Weak},
    vec::Vec,
};
use core::fmt::{self, Debug, Formatter};
use parking_lot::RwLock;
use tracing::debug;

use crate::{
    any::SharedInstance,
    binding::InitOutcome,
    catalog::{TypeCatalog, TypeEntry},
    config::Config,
    errors::{CatalogErrorKind, RegisterErrorKind, ResolveErrorKind},
    initializer::InstanceInitializer,
    scope::{Scope, ScopeEnv},
    token::RegistrationToken,
};

/// Root context of a scope tree: the type catalog, the root scope and the current scope.
///
/// Registrations and resolutions made through the injector go to the current scope.
/// The handle is cheap to clone, and all clones share the same tree.
///
/// # Examples
/// ```rust
/// use tether::{implements, Injector};
///
/// trait Greeter: Send + Sync {
///     fn greet(&self) -> &'static str;
/// }
///
/// #[derive(Default)]
/// struct English;
///
/// impl Greeter for English {
///     fn greet(&self) -> &'static str {
///         "hello"
///     }
/// }
///
/// #[derive(Default)]
/// struct French;
///
/// impl Greeter for French {
///     fn greet(&self) -> &'static str {
///         "bonjour"
///     }
/// }
///
/// let injector = Injector::new();
/// injector.register(implements!(English => dyn Greeter)).unwrap();
/// injector.register(implements!(French => dyn Greeter)).unwrap();
/// injector.register_implementation::<dyn Greeter, English>(true).unwrap();
///
/// let scope = injector.create_scope(true);
/// injector.register_implementation::<dyn Greeter, French>(true).unwrap();
/// assert_eq!(injector.resolve::<dyn Greeter>().unwrap().greet(), "bonjour");
///
/// scope.close();
/// assert_eq!(injector.resolve::<dyn Greeter>().unwrap().greet(), "hello");
/// ```
#[derive(Clone)]
pub struct Injector {
    inner: Arc<InjectorInner>,
}

struct InjectorInner {
    env: Arc<ScopeEnv>,
    root: Scope,
    /// Pushed scopes that are still open, the last one is current.
    pushed: RwLock<Vec<Scope>>,
}

/// Non-owning handle to an [`Injector`].
#[derive(Clone)]
pub struct WeakInjector(Weak<InjectorInner>);

impl WeakInjector {
    #[inline]
    #[must_use]
    pub fn upgrade(&self) -> Option<Injector> {
        self.0.upgrade().map(|inner| Injector { inner })
    }
}

impl Injector {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    #[must_use]
    pub fn with_config(config: Config) -> Self {
        let env = Arc::new(ScopeEnv {
            catalog: TypeCatalog::new(),
            config,
        });
        let root = Scope::root(env.clone());
        debug!(?config, "Injector created");

        Self {
            inner: Arc::new(InjectorInner {
                env,
                root,
                pushed: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Registers a type declaration into the catalog.
    ///
    /// # Errors
    /// Returns [`CatalogErrorKind::DuplicateRegistration`] if the canonical name is already registered.
    #[inline]
    pub fn register<T: ?Sized>(&self, entry: TypeEntry<T>) -> Result<(), CatalogErrorKind> {
        self.inner.env.catalog.register(entry)
    }

    #[inline]
    #[must_use]
    pub fn catalog(&self) -> &TypeCatalog {
        &self.inner.env.catalog
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> Config {
        self.inner.env.config
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> &Scope {
        &self.inner.root
    }

    #[inline]
    #[must_use]
    pub fn current(&self) -> Scope {
        self.inner.pushed.read().last().unwrap_or(&self.inner.root).clone()
    }

    #[inline]
    #[must_use]
    pub fn downgrade(&self) -> WeakInjector {
        WeakInjector(Arc::downgrade(&self.inner))
    }

    /// Creates a child of the current scope.
    ///
    /// With `push`, the child becomes the current scope until it's closed,
    /// then the current scope falls back to the innermost pushed scope that's still open.
    #[must_use]
    pub fn create_scope(&self, push: bool) -> Scope {
        let mut pushed = self.inner.pushed.write();
        let current = pushed.last().unwrap_or(&self.inner.root);
        if !push {
            return current.create_scope();
        }

        let injector = self.downgrade();
        let scope = current.create_scope_with(Box::new(move |closing: &Scope| {
            if let Some(injector) = injector.upgrade() {
                injector.pop(closing);
            }
        }));
        pushed.push(scope.clone());
        debug!(depth = scope.depth(), "Scope pushed");

        scope
    }

    /// Forgets a closing pushed scope, wherever it is in the push order.
    fn pop(&self, closing: &Scope) {
        let mut pushed = self.inner.pushed.write();
        let Some(index) = pushed.iter().rposition(|scope| scope.ptr_eq(closing)) else {
            return;
        };
        pushed.remove(index);
        debug!(
            depth = closing.depth(),
            current = pushed.last().map_or(0, Scope::depth),
            "Scope popped",
        );
    }

    /// Clears the catalog and the root scope, and makes the root scope current again.
    ///
    /// Scopes created before the reset stay usable, but resolve nothing registered by name
    /// until the referenced types are registered again.
    pub fn reset(&self) {
        let mut pushed = self.inner.pushed.write();
        self.inner.env.catalog.clear();
        self.inner.root.reset();
        pushed.clear();
        debug!("Injector reset");
    }

    /// See [`Scope::register_by_name`].
    #[inline]
    pub fn register_by_name(&self, target: &str, implementor: &str, cached: bool) -> RegistrationToken {
        self.current().register_by_name(target, implementor, cached)
    }

    /// See [`Scope::register_instance`].
    ///
    /// # Errors
    /// Returns a capability mismatch if `T` isn't declared to implement `I`.
    #[inline]
    pub fn register_instance<I, T>(&self, instance: T) -> Result<RegistrationToken, RegisterErrorKind>
    where
        I: ?Sized + 'static,
        T: Send + Sync + 'static,
    {
        self.current().register_instance::<I, T>(instance)
    }

    /// See [`Scope::register_shared_instance`].
    ///
    /// # Errors
    /// Returns a capability mismatch if `T` isn't declared to implement `I`.
    #[inline]
    pub fn register_shared_instance<I, T>(&self, instance: Arc<T>) -> Result<RegistrationToken, RegisterErrorKind>
    where
        I: ?Sized + 'static,
        T: Send + Sync + 'static,
    {
        self.current().register_shared_instance::<I, T>(instance)
    }

    /// See [`Scope::register_implementation`].
    ///
    /// # Errors
    /// Returns a capability mismatch if `T` isn't declared to implement `I`.
    #[inline]
    pub fn register_implementation<I, T>(&self, cached: bool) -> Result<RegistrationToken, RegisterErrorKind>
    where
        I: ?Sized + 'static,
        T: Default + Send + Sync + 'static,
    {
        self.current().register_implementation::<I, T>(cached)
    }

    /// See [`Scope::register_implementation_with_init`].
    ///
    /// # Errors
    /// Returns a capability mismatch if `T` isn't declared to implement `I`.
    #[inline]
    pub fn register_implementation_with_init<I, T, F>(&self, cached: bool, init: F) -> Result<RegistrationToken, RegisterErrorKind>
    where
        I: ?Sized + 'static,
        T: Default + Send + Sync + 'static,
        F: Fn(&mut T) -> InitOutcome + Send + Sync + 'static,
    {
        self.current().register_implementation_with_init::<I, T, F>(cached, init)
    }

    #[inline]
    pub fn register_instance_initializer<Init>(&self, initializer: Init)
    where
        Init: InstanceInitializer + 'static,
    {
        self.current().register_instance_initializer(initializer);
    }

    /// See [`Scope::resolve`].
    ///
    /// # Errors
    /// See [`Scope::resolve`].
    #[inline]
    pub fn resolve<I: ?Sized + 'static>(&self) -> Result<Arc<I>, ResolveErrorKind> {
        self.current().resolve::<I>()
    }

    /// See [`Scope::resolve_by_name`].
    ///
    /// # Errors
    /// See [`Scope::resolve`].
    #[inline]
    pub fn resolve_by_name(&self, target: &str) -> Result<SharedInstance, ResolveErrorKind> {
        self.current().resolve_by_name(target)
    }
}

impl Default for Injector {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Injector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injector")
            .field("config", &self.inner.env.config)
            .field("types", &self.inner.env.catalog.len())
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}
