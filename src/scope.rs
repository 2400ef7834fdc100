use alloc::{
    boxed::Box,
    collections::BTreeMap,
    string::{String, ToString as _},
    sync::Arc,
    vec::Vec,
};
use core::{
    any::{Any, TypeId},
    fmt::{self, Debug, Formatter},
    sync::atomic::{AtomicBool, Ordering},
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info_span, warn};

use crate::{
    any::{canonical_name, type_name_of, Instance, SharedInstance},
    binding::{Binding, InitCallback, InitOutcome},
    catalog::{TypeCatalog, TypeHandle},
    config::{Config, MismatchPolicy},
    descriptor::TypeDescriptor,
    errors::{FatalErrorKind, RegisterErrorKind, ResolveErrorKind},
    initializer::InstanceInitializer,
    token::RegistrationToken,
};

pub(crate) type CloseHandler = Box<dyn FnOnce(&Scope) + Send + Sync>;

/// State shared by every scope of one tree.
pub(crate) struct ScopeEnv {
    pub(crate) catalog: TypeCatalog,
    pub(crate) config: Config,
}

/// Bindings of one target name.
///
/// Slots are append-only and the newest live binding is the head.
/// Removal leaves a tombstone, trailing tombstones are popped so the head is always the last slot.
#[derive(Default)]
struct BindingSlots {
    slots: Vec<Option<Arc<Binding>>>,
}

impl BindingSlots {
    #[inline]
    fn push(&mut self, binding: Arc<Binding>) {
        self.slots.push(Some(binding));
    }

    #[inline]
    fn head(&self) -> Option<&Arc<Binding>> {
        self.slots.last().and_then(Option::as_ref)
    }

    fn remove(&mut self, id: u64) -> bool {
        let Some(slot) = self
            .slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|binding| binding.id == id))
        else {
            return false;
        };
        *slot = None;

        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        true
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[derive(Default)]
struct ScopeState {
    bindings: BTreeMap<String, BindingSlots>,
    initializers: Vec<Arc<dyn InstanceInitializer>>,
}

/// Node of the registration tree.
///
/// Lookups of bindings and initializers fall back to the parent only when this scope has no match,
/// so a binding in a child always shadows the same target in its ancestors.
#[derive(Clone)]
pub struct Scope {
    pub(crate) inner: Arc<ScopeInner>,
}

pub(crate) struct ScopeInner {
    env: Arc<ScopeEnv>,
    depth: usize,
    state: RwLock<ScopeState>,
    parent: RwLock<Option<Scope>>,
    on_close: Mutex<Option<CloseHandler>>,
    closed: AtomicBool,
}

impl Scope {
    #[must_use]
    pub(crate) fn root(env: Arc<ScopeEnv>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                env,
                depth: 0,
                state: RwLock::new(ScopeState::default()),
                parent: RwLock::new(None),
                on_close: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    fn child(&self, on_close: Option<CloseHandler>) -> Self {
        let child = Self {
            inner: Arc::new(ScopeInner {
                env: self.inner.env.clone(),
                depth: self.inner.depth + 1,
                state: RwLock::new(ScopeState::default()),
                parent: RwLock::new(Some(self.clone())),
                on_close: Mutex::new(on_close),
                closed: AtomicBool::new(false),
            }),
        };
        debug!(depth = child.inner.depth, "Scope created");
        child
    }

    /// Creates a child scope. Its registrations are only visible through it and its descendants.
    #[inline]
    #[must_use]
    pub fn create_scope(&self) -> Scope {
        self.child(None)
    }

    #[inline]
    #[must_use]
    pub(crate) fn create_scope_with(&self, on_close: CloseHandler) -> Scope {
        self.child(Some(on_close))
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
    pub fn parent(&self) -> Option<Scope> {
        self.inner.parent.read().clone()
    }

    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.inner.depth == 0
    }

    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns `true` if this scope itself, not its ancestors, has an active binding for the target name.
    #[must_use]
    pub fn contains(&self, target: &str) -> bool {
        self.find_binding(&canonical_name(target)).is_some()
    }

    /// Registers a binding by names, resolved through the catalog once the types are known.
    ///
    /// This always succeeds, the types and their capability are checked on the first resolution.
    pub fn register_by_name(&self, target: &str, implementor: &str, cached: bool) -> RegistrationToken {
        self.add_binding(Binding::new(
            TypeDescriptor::named(target),
            TypeDescriptor::named(implementor),
            cached,
            None,
            false,
        ))
    }

    /// Registers an already constructed instance as the implementor of `I`.
    ///
    /// # Errors
    /// Returns a capability mismatch if `T` isn't declared to implement `I`.
    pub fn register_instance<I, T>(&self, instance: T) -> Result<RegistrationToken, RegisterErrorKind>
    where
        I: ?Sized + 'static,
        T: Send + Sync + 'static,
    {
        self.register_shared_instance::<I, T>(Arc::new(instance))
    }

    /// Same as [`Self::register_instance`], but for an instance that is already shared.
    ///
    /// # Errors
    /// Returns a capability mismatch if `T` isn't declared to implement `I`.
    pub fn register_shared_instance<I, T>(&self, instance: Arc<T>) -> Result<RegistrationToken, RegisterErrorKind>
    where
        I: ?Sized + 'static,
        T: Send + Sync + 'static,
    {
        let implementor = self.implementor_handle::<T>(TypeHandle::of_value::<T>);
        let target = self.target_handle::<I>();
        self.ensure_implementor(&implementor, &target)?;

        Ok(self.add_binding(Binding::with_instance(
            TypeDescriptor::resolved(target),
            TypeDescriptor::resolved(implementor),
            instance,
        )))
    }

    /// Registers `T` to be lazily constructed from its zero value as the implementor of `I`.
    /// With `cached`, the same instance is returned to every caller.
    ///
    /// Capabilities and self-initialization come from the catalog entry of `T`.
    /// Without an entry, `T` only satisfies itself and [`crate::Initializable::init`] isn't called.
    ///
    /// # Errors
    /// Returns a capability mismatch if `T` isn't declared to implement `I`.
    pub fn register_implementation<I, T>(&self, cached: bool) -> Result<RegistrationToken, RegisterErrorKind>
    where
        I: ?Sized + 'static,
        T: Default + Send + Sync + 'static,
    {
        self.register_implementation_core::<I, T>(cached, None)
    }

    /// Same as [`Self::register_implementation`], with a callback invoked on every fresh instance
    /// before any other initialization.
    ///
    /// # Errors
    /// Returns a capability mismatch if `T` isn't declared to implement `I`.
    pub fn register_implementation_with_init<I, T, F>(&self, cached: bool, init: F) -> Result<RegistrationToken, RegisterErrorKind>
    where
        I: ?Sized + 'static,
        T: Default + Send + Sync + 'static,
        F: Fn(&mut T) -> InitOutcome + Send + Sync + 'static,
    {
        let callback: InitCallback = Arc::new(move |instance: &mut (dyn Any + Send + Sync)| match instance.downcast_mut::<T>() {
            Some(instance) => init(instance),
            None => InitOutcome::Continue,
        });
        self.register_implementation_core::<I, T>(cached, Some(callback))
    }

    /// Appends an initializer to this scope's chain.
    pub fn register_instance_initializer<Init>(&self, initializer: Init)
    where
        Init: InstanceInitializer + 'static,
    {
        self.inner.state.write().initializers.push(Arc::new(initializer));
        debug!(scope = self.inner.depth, "Initializer registered");
    }

    /// Resolves an instance of `I` from this scope or its ancestors.
    ///
    /// # Errors
    /// - Returns [`ResolveErrorKind::NotFound`] if no scope in the chain has a binding for `I`
    /// - Returns [`ResolveErrorKind::IncorrectType`] if the resolved instance can't be viewed as `I`
    /// - Returns a fatal error if a by-name binding references an unregistered type or a mandatory
    ///   initialization step fails
    pub fn resolve<I: ?Sized + 'static>(&self) -> Result<Arc<I>, ResolveErrorKind> {
        let name = type_name_of::<I>();
        let span = info_span!("resolve", target = name.as_str(), scope = self.inner.depth);
        let _guard = span.enter();

        let (instance, binding) = self.resolve_core(&name)?;
        self.cast::<I>(instance, &binding)
    }

    /// Resolves an instance by its canonical target name, like `package.Type`.
    ///
    /// # Errors
    /// Same as [`Self::resolve`], except that no cast is performed.
    pub fn resolve_by_name(&self, target: &str) -> Result<SharedInstance, ResolveErrorKind> {
        let name = canonical_name(target);
        let span = info_span!("resolve", target = name.as_str(), scope = self.inner.depth);
        let _guard = span.enter();

        self.resolve_core(&name).map(|(instance, _)| instance)
    }

    /// Tears the scope down: calls the close handler, detaches from the parent and clears the scope.
    ///
    /// The root scope is never destroyed, closing it only clears it.
    /// Closing twice is a no-op.
    pub fn close(&self) {
        if self.is_root() {
            self.reset();
            return;
        }
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let on_close = self.inner.on_close.lock().take();
        if let Some(on_close) = on_close {
            on_close(self);
        }
        *self.inner.parent.write() = None;
        self.reset();

        debug!(depth = self.inner.depth, "Scope closed");
    }

    /// Clears the bindings and initializers of this scope without detaching it from its parent.
    pub fn reset(&self) {
        let mut state = self.inner.state.write();
        state.bindings.clear();
        state.initializers.clear();
        debug!(depth = self.inner.depth, "Scope reset");
    }
}

impl Scope {
    fn register_implementation_core<I, T>(
        &self,
        cached: bool,
        callback: Option<InitCallback>,
    ) -> Result<RegistrationToken, RegisterErrorKind>
    where
        I: ?Sized + 'static,
        T: Default + Send + Sync + 'static,
    {
        let implementor = self.implementor_handle::<T>(TypeHandle::of_concrete::<T>);
        let target = self.target_handle::<I>();
        self.ensure_implementor(&implementor, &target)?;

        Ok(self.add_binding(Binding::new(
            TypeDescriptor::resolved(target),
            TypeDescriptor::resolved(implementor),
            cached,
            callback,
            true,
        )))
    }

    /// The catalog entry of `T` carries its declared capabilities.
    /// Without one, `T` only satisfies itself.
    fn implementor_handle<T: 'static>(&self, fallback: impl FnOnce() -> TypeHandle) -> TypeHandle {
        if let Some(handle) = self.inner.env.catalog.get_by_id(TypeId::of::<T>()) {
            return handle;
        }

        let handle = fallback();
        debug!(
            implementor = handle.name(),
            "Implementor isn't in the catalog, it only satisfies itself and isn't self-initialized",
        );
        handle
    }

    fn target_handle<I: ?Sized + 'static>(&self) -> TypeHandle {
        self.inner
            .env
            .catalog
            .get_by_id(TypeId::of::<I>())
            .unwrap_or_else(TypeHandle::of_interface::<I>)
    }

    fn ensure_implementor(&self, implementor: &TypeHandle, target: &TypeHandle) -> Result<(), RegisterErrorKind> {
        if implementor.satisfies(target.id()) {
            return Ok(());
        }

        let implementor = implementor.name().to_string();
        let target = target.name().to_string();
        let err = match self.inner.env.config.capability_mismatch {
            MismatchPolicy::Recoverable => RegisterErrorKind::CapabilityMismatch { implementor, target },
            MismatchPolicy::Fatal => FatalErrorKind::CapabilityMismatch { implementor, target }.into(),
        };
        error!("{}", err);
        Err(err)
    }

    fn add_binding(&self, binding: Binding) -> RegistrationToken {
        let binding = Arc::new(binding);
        {
            let mut state = self.inner.state.write();
            if self.is_closed() {
                warn!(
                    target = binding.target.name(),
                    scope = self.inner.depth,
                    "Scope is closed, registration ignored",
                );
                return RegistrationToken::closed();
            }
            state
                .bindings
                .entry(binding.target.name().to_string())
                .or_default()
                .push(binding.clone());
        }

        debug!(
            id = binding.id,
            target = binding.target.name(),
            implementor = binding.implementor.name(),
            cached = binding.cached,
            scope = self.inner.depth,
            "Registered",
        );
        RegistrationToken::new(self, binding)
    }

    pub(crate) fn remove_binding(&self, binding: &Binding) -> bool {
        let mut state = self.inner.state.write();
        let name = binding.target.name();
        let Some(slots) = state.bindings.get_mut(name) else {
            return false;
        };

        let removed = slots.remove(binding.id);
        if slots.is_empty() {
            state.bindings.remove(name);
        }
        if removed {
            debug!(id = binding.id, target = name, scope = self.inner.depth, "Registration removed");
        }
        removed
    }

    fn find_binding(&self, name: &str) -> Option<Arc<Binding>> {
        self.inner.state.read().bindings.get(name).and_then(BindingSlots::head).cloned()
    }

    fn resolve_core(&self, name: &str) -> Result<(SharedInstance, Arc<Binding>), ResolveErrorKind> {
        let mut scope = self.clone();
        loop {
            if let Some(binding) = scope.find_binding(name) {
                let env = &scope.inner.env;
                let materialized = binding.realize(&env.catalog, env.config.capability_mismatch, |instance, implementor| {
                    scope.initialize_instance(instance, &binding, implementor)
                })?;
                debug!(id = binding.id, fresh = materialized.fresh, owner = scope.inner.depth, "Resolved");
                return Ok((materialized.instance, binding));
            }

            match scope.parent() {
                Some(parent) => scope = parent,
                None => break,
            }
        }

        let err = ResolveErrorKind::NotFound { name: name.to_string() };
        error!("{}", err);
        Err(err)
    }

    /// Upcasts through the capabilities of the instance's actual type,
    /// which may differ from the implementor if an initializer replaced the instance.
    fn cast<I: ?Sized + 'static>(&self, instance: SharedInstance, binding: &Binding) -> Result<Arc<I>, ResolveErrorKind> {
        let catalog = &self.inner.env.catalog;
        let id = (*instance).type_id();

        let handle = binding
            .implementor
            .handle(catalog)
            .ok()
            .filter(|handle| handle.id() == id)
            .or_else(|| catalog.get_by_id(id));
        let actual = handle
            .as_ref()
            .map_or_else(|| String::from("<unregistered>"), |handle| handle.name().to_string());

        match handle.and_then(|handle| handle.cast::<I>(instance)) {
            Some(instance) => Ok(instance),
            None => {
                let err = ResolveErrorKind::IncorrectType {
                    expected: type_name_of::<I>(),
                    actual,
                };
                error!("{}", err);
                Err(err)
            }
        }
    }

    /// Runs, in order: the binding's callback, the instance's self-initialization and the initializer chain.
    /// Each step may stop the ones after it.
    fn initialize_instance(&self, mut instance: Instance, binding: &Binding, implementor: &TypeHandle) -> Result<Instance, ResolveErrorKind> {
        if let Some(callback) = &binding.callback {
            match callback(&mut *instance) {
                InitOutcome::Continue => {}
                InitOutcome::Complete => {
                    debug!("Initialized by callback");
                    return Ok(instance);
                }
                InitOutcome::Recoverable(err) => {
                    warn!(error = %err, implementor = implementor.name(), "Init callback failed, continuing");
                }
                InitOutcome::Failed(err) => return Err(Self::initialization_failure(binding, implementor, err)),
            }
        }

        if let Some(self_init) = implementor.self_init() {
            if let Err(err) = self_init(&mut *instance) {
                return Err(Self::initialization_failure(binding, implementor, err));
            }
        }

        self.run_initializers(instance, implementor.name())
    }

    fn run_initializers(&self, instance: Instance, type_name: &str) -> Result<Instance, ResolveErrorKind> {
        let mut scope = self.clone();
        loop {
            let initializers = scope.inner.state.read().initializers.clone();
            if let Some(initializer) = initializers
                .iter()
                .find(|initializer| initializer.can_initialize(&*instance, type_name))
            {
                debug!(type_name, scope = scope.inner.depth, "Initializer matched");
                return initializer.initialize(instance, type_name).map_err(|error| {
                    let err = ResolveErrorKind::Initializer {
                        type_name: type_name.to_string(),
                        error,
                    };
                    error!("{}", err);
                    err
                });
            }

            match scope.parent() {
                Some(parent) => scope = parent,
                None => return Ok(instance),
            }
        }
    }

    fn initialization_failure(binding: &Binding, implementor: &TypeHandle, error: anyhow::Error) -> ResolveErrorKind {
        let err = FatalErrorKind::InitializationFailure {
            implementor: implementor.name().to_string(),
            target: binding.target.name().to_string(),
            error,
        };
        error!("{}", err);
        err.into()
    }
}

impl Debug for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("depth", &self.inner.depth)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[allow(dead_code)]
#[cfg(test)]
mod tests {
    extern crate std;

    use super::{Scope, ScopeEnv};
    use crate::{
        any::{Instance, SharedInstance},
        implements, Config, FatalErrorKind, InitOutcome, Initializable, InstanceInitializer, MismatchPolicy, RegisterErrorKind,
        ResolveErrorKind, TypeCatalog, TypeEntry,
    };

    use alloc::{
        boxed::Box,
        format,
        string::{String, ToString as _},
        sync::Arc,
        vec::Vec,
    };
    use core::{
        any::Any,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use std::sync::Barrier;
    use tracing_test::traced_test;

    trait I1: Send + Sync {
        fn f1(&self) -> String;
    }

    trait I2: Send + Sync {}

    #[derive(Default)]
    struct T1 {
        s: String,
    }

    impl I1 for T1 {
        fn f1(&self) -> String {
            self.s.clone()
        }
    }

    #[derive(Default)]
    struct T2;

    impl I1 for T2 {
        fn f1(&self) -> String {
            "t2".to_string()
        }
    }

    #[derive(Default)]
    struct Unlisted;

    #[derive(Default)]
    struct Greeting {
        initialized: bool,
        text: String,
    }

    impl Initializable for Greeting {
        fn init(&mut self) -> Result<(), anyhow::Error> {
            self.initialized = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Broken;

    impl Initializable for Broken {
        fn init(&mut self) -> Result<(), anyhow::Error> {
            Err(anyhow::anyhow!("broken on purpose"))
        }
    }

    #[derive(Default)]
    struct UnlistedGreeting {
        initialized: bool,
    }

    impl Initializable for UnlistedGreeting {
        fn init(&mut self) -> Result<(), anyhow::Error> {
            self.initialized = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Ping;

    #[derive(Default)]
    struct Pong;

    /// Resolves the other side of the `Ping`/`Pong` pair while initializing.
    struct Cycle {
        scope: Scope,
    }

    impl InstanceInitializer for Cycle {
        fn can_initialize(&self, instance: &(dyn Any + Send + Sync), _type_name: &str) -> bool {
            instance.is::<Ping>() || instance.is::<Pong>()
        }

        fn initialize(&self, instance: Instance, _type_name: &str) -> Result<Instance, anyhow::Error> {
            if instance.is::<Ping>() {
                self.scope.resolve::<Pong>()?;
            } else {
                self.scope.resolve::<Ping>()?;
            }
            Ok(instance)
        }
    }

    /// Writes its tag into fresh `T1` instances.
    struct Tag(&'static str);

    impl InstanceInitializer for Tag {
        fn can_initialize(&self, _instance: &(dyn Any + Send + Sync), type_name: &str) -> bool {
            type_name == "tests.T1"
        }

        fn initialize(&self, mut instance: Instance, _type_name: &str) -> Result<Instance, anyhow::Error> {
            if let Some(t1) = instance.downcast_mut::<T1>() {
                t1.s = self.0.to_string();
            }
            Ok(instance)
        }
    }

    /// Replaces fresh `T1` instances with `T2`.
    struct Replace;

    impl InstanceInitializer for Replace {
        fn can_initialize(&self, instance: &(dyn Any + Send + Sync), _type_name: &str) -> bool {
            instance.is::<T1>()
        }

        fn initialize(&self, _instance: Instance, _type_name: &str) -> Result<Instance, anyhow::Error> {
            Ok(Box::new(T2))
        }
    }

    struct Failing;

    impl InstanceInitializer for Failing {
        fn can_initialize(&self, _instance: &(dyn Any + Send + Sync), _type_name: &str) -> bool {
            true
        }

        fn initialize(&self, _instance: Instance, _type_name: &str) -> Result<Instance, anyhow::Error> {
            Err(anyhow::anyhow!("failing on purpose"))
        }
    }

    fn root_with(config: Config) -> Scope {
        let catalog = TypeCatalog::new();
        catalog.register(TypeEntry::<dyn I1>::interface()).unwrap();
        catalog.register(TypeEntry::<dyn I2>::interface()).unwrap();
        catalog.register(implements!(T1 => dyn I1)).unwrap();
        catalog.register(implements!(T2 => dyn I1)).unwrap();
        catalog.register(TypeEntry::<Greeting>::concrete().initializable()).unwrap();
        catalog.register(TypeEntry::<Broken>::concrete().initializable()).unwrap();
        Scope::root(Arc::new(ScopeEnv { catalog, config }))
    }

    fn root() -> Scope {
        root_with(Config::default())
    }

    fn t1(s: &str) -> T1 {
        T1 { s: s.to_string() }
    }

    fn resolve_err<I: ?Sized + 'static>(scope: &Scope) -> ResolveErrorKind {
        match scope.resolve::<I>() {
            Ok(_) => panic!("Expected resolution of {} to fail", crate::any::type_name_of::<I>()),
            Err(err) => err,
        }
    }

    fn same<A: ?Sized, B: ?Sized>(a: &Arc<A>, b: &Arc<B>) -> bool {
        Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
    }

    #[test]
    #[traced_test]
    fn test_resolve_instance() {
        let root = root();

        let mut token = root.register_instance::<dyn I1, _>(t1("foobarx")).unwrap();
        assert_eq!(root.resolve::<dyn I1>().unwrap().f1(), "foobarx");

        token.close();
        assert!(token.is_closed());
        assert!(matches!(
            root.resolve::<dyn I1>(),
            Err(ResolveErrorKind::NotFound { name }) if name == "tests.I1"
        ));
    }

    #[test]
    #[traced_test]
    fn test_resolve_unregistered_target() {
        let root = root();
        root.register_instance::<dyn I1, _>(t1("foobarx")).unwrap();

        assert!(matches!(root.resolve::<dyn I2>(), Err(ResolveErrorKind::NotFound { .. })));
    }

    #[test]
    #[traced_test]
    fn test_resolve_override() {
        let root = root();

        let mut token_a = root.register_instance::<dyn I1, _>(t1("a")).unwrap();
        let mut token_b = root.register_instance::<dyn I1, _>(t1("b")).unwrap();
        assert_eq!(root.resolve::<dyn I1>().unwrap().f1(), "b");

        token_b.close();
        assert_eq!(root.resolve::<dyn I1>().unwrap().f1(), "a");

        token_a.close();
        assert!(matches!(root.resolve::<dyn I1>(), Err(ResolveErrorKind::NotFound { .. })));
    }

    #[test]
    #[traced_test]
    fn test_remove_by_id_not_position() {
        let root = root();

        let mut token_a = root.register_instance::<dyn I1, _>(t1("a")).unwrap();
        let mut token_b = root.register_instance::<dyn I1, _>(t1("b")).unwrap();
        let mut token_c = root.register_instance::<dyn I1, _>(t1("c")).unwrap();

        token_b.close();
        assert_eq!(root.resolve::<dyn I1>().unwrap().f1(), "c");

        token_c.close();
        assert_eq!(root.resolve::<dyn I1>().unwrap().f1(), "a");

        token_a.close();
        token_a.close();
        assert!(!root.contains("tests.I1"));
    }

    #[test]
    #[traced_test]
    fn test_cached_and_transient() {
        let root = root();

        let mut cached = root.register_implementation::<dyn I1, T1>(true).unwrap();
        let first = root.resolve::<dyn I1>().unwrap();
        let second = root.resolve::<dyn I1>().unwrap();
        assert!(same(&first, &second));
        cached.close();

        root.register_implementation::<dyn I1, T1>(false).unwrap();
        let first = root.resolve::<dyn I1>().unwrap();
        let second = root.resolve::<dyn I1>().unwrap();
        assert!(!same(&first, &second));
        assert_eq!(first.f1(), "");
    }

    #[test]
    #[traced_test]
    fn test_resolve_self() {
        let root = root();
        root.register_instance::<Unlisted, _>(Unlisted).unwrap();
        root.register_implementation::<T2, T2>(true).unwrap();

        assert!(root.resolve::<Unlisted>().is_ok());
        assert_eq!(root.resolve::<T2>().unwrap().f1(), "t2");
    }

    #[test]
    #[traced_test]
    fn test_parent_fallback() {
        let root = root();
        root.register_implementation::<dyn I1, T1>(true).unwrap();
        let child = root.create_scope();
        let grandchild = child.create_scope();

        let from_root = root.resolve::<dyn I1>().unwrap();
        let from_grandchild = grandchild.resolve::<dyn I1>().unwrap();
        assert!(same(&from_root, &from_grandchild));
        assert!(!grandchild.contains("tests.I1"));
    }

    #[test]
    #[traced_test]
    fn test_child_shadows_parent() {
        let root = root();
        let child = root.create_scope();

        child.register_instance::<dyn I1, _>(t1("child")).unwrap();
        root.register_instance::<dyn I1, _>(t1("root")).unwrap();

        assert_eq!(child.resolve::<dyn I1>().unwrap().f1(), "child");
        assert_eq!(root.resolve::<dyn I1>().unwrap().f1(), "root");
    }

    #[test]
    #[traced_test]
    fn test_capability_mismatch() {
        let root = root();

        assert!(matches!(
            root.register_implementation::<dyn I2, T1>(false),
            Err(RegisterErrorKind::CapabilityMismatch { implementor, target })
                if implementor == "tests.T1" && target == "tests.I2"
        ));
        assert!(matches!(
            root.register_instance::<dyn I1, _>(Unlisted),
            Err(RegisterErrorKind::CapabilityMismatch { .. })
        ));
        assert!(!root.contains("tests.I1"));
        assert!(!root.contains("tests.I2"));
    }

    #[test]
    #[traced_test]
    fn test_capability_mismatch_fatal() {
        let root = root_with(Config {
            capability_mismatch: MismatchPolicy::Fatal,
        });

        let err = root.register_implementation::<dyn I2, T1>(false).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, RegisterErrorKind::Fatal(FatalErrorKind::CapabilityMismatch { .. })));
        assert!(!root.contains("tests.I2"));
    }

    #[test]
    #[traced_test]
    fn test_by_name_pending() {
        let root = Scope::root(Arc::new(ScopeEnv {
            catalog: TypeCatalog::new(),
            config: Config::default(),
        }));
        root.register_by_name("tests.I1", "*tests.T2", false);
        root.catalog().register(TypeEntry::<dyn I1>::interface()).unwrap();

        let err = resolve_err::<dyn I1>(&root);
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            ResolveErrorKind::Fatal(FatalErrorKind::UninitializedTypeReference { name }) if name == "tests.T2"
        ));

        root.catalog().register(implements!(T2 => dyn I1)).unwrap();
        assert_eq!(root.resolve::<dyn I1>().unwrap().f1(), "t2");
        assert!(root.resolve_by_name("tests.I1").unwrap().is::<T2>());
    }

    #[test]
    #[traced_test]
    fn test_by_name_mismatch() {
        let root = root();
        root.register_by_name("tests.I2", "tests.T1", true);

        assert!(matches!(
            root.resolve_by_name("tests.I2"),
            Err(ResolveErrorKind::CapabilityMismatch { .. })
        ));
    }

    #[test]
    #[traced_test]
    fn test_instance_initializer() {
        let root = root();
        root.register_instance_initializer(Tag("hodor"));
        root.register_implementation::<dyn I1, T1>(false).unwrap();

        assert_eq!(root.resolve::<dyn I1>().unwrap().f1(), "hodor");
    }

    #[test]
    #[traced_test]
    fn test_initializers_in_registration_order() {
        let root = root();
        root.register_instance_initializer(Tag("first"));
        root.register_instance_initializer(Tag("second"));
        root.register_implementation::<dyn I1, T1>(false).unwrap();

        assert_eq!(root.resolve::<dyn I1>().unwrap().f1(), "first");
    }

    #[test]
    #[traced_test]
    fn test_initializers_fall_back_to_parent() {
        let root = root();
        root.register_instance_initializer(Tag("root"));
        let child = root.create_scope();
        child.register_implementation::<dyn I1, T1>(false).unwrap();

        assert_eq!(child.resolve::<dyn I1>().unwrap().f1(), "root");

        child.register_instance_initializer(Tag("child"));
        assert_eq!(child.resolve::<dyn I1>().unwrap().f1(), "child");
    }

    #[test]
    #[traced_test]
    fn test_initializers_run_from_owning_scope() {
        let root = root();
        root.register_implementation::<dyn I1, T1>(false).unwrap();
        let child = root.create_scope();
        child.register_instance_initializer(Tag("child"));

        assert_eq!(child.resolve::<dyn I1>().unwrap().f1(), "");
    }

    #[test]
    #[traced_test]
    fn test_initializers_skip_cached_and_supplied() {
        let root = root();
        let initialize_call_count = Arc::new(AtomicUsize::new(0));
        root.register_instance_initializer(Tag("tagged"));

        root.register_instance::<dyn I1, _>(t1("supplied")).unwrap();
        assert_eq!(root.resolve::<dyn I1>().unwrap().f1(), "supplied");

        let child = root.create_scope();
        child
            .register_implementation_with_init::<dyn I1, T1, _>(true, {
                let initialize_call_count = initialize_call_count.clone();
                move |_| {
                    initialize_call_count.fetch_add(1, Ordering::SeqCst);
                    InitOutcome::Continue
                }
            })
            .unwrap();
        child.resolve::<dyn I1>().unwrap();
        child.resolve::<dyn I1>().unwrap();
        assert_eq!(initialize_call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[traced_test]
    fn test_initializer_replaces_instance() {
        let root = root();
        root.register_instance_initializer(Replace);
        root.register_implementation::<dyn I1, T1>(true).unwrap();

        assert_eq!(root.resolve::<dyn I1>().unwrap().f1(), "t2");
        assert!(root.resolve_by_name("tests.I1").unwrap().is::<T2>());
    }

    #[test]
    #[traced_test]
    fn test_initializer_error_is_recoverable() {
        let root = root();
        root.register_instance_initializer(Failing);
        root.register_implementation::<dyn I1, T1>(false).unwrap();

        let err = resolve_err::<dyn I1>(&root);
        assert!(matches!(err, ResolveErrorKind::Initializer { ref type_name, .. } if type_name == "tests.T1"));
        assert!(!err.is_fatal());
    }

    #[test]
    #[traced_test]
    fn test_callback_outcomes() {
        let root = root();
        root.register_instance_initializer(Tag("tagged"));

        let mut complete = root
            .register_implementation_with_init::<dyn I1, T1, _>(false, |t1| {
                t1.s = "callback".to_string();
                InitOutcome::Complete
            })
            .unwrap();
        assert_eq!(root.resolve::<dyn I1>().unwrap().f1(), "callback");
        complete.close();

        let mut recoverable = root
            .register_implementation_with_init::<dyn I1, T1, _>(false, |_| InitOutcome::Recoverable(anyhow::anyhow!("ignored")))
            .unwrap();
        assert_eq!(root.resolve::<dyn I1>().unwrap().f1(), "tagged");
        recoverable.close();

        root.register_implementation_with_init::<dyn I1, T1, _>(false, |_| InitOutcome::Failed(anyhow::anyhow!("mandatory")))
            .unwrap();
        let err = resolve_err::<dyn I1>(&root);
        assert!(matches!(
            err,
            ResolveErrorKind::Fatal(FatalErrorKind::InitializationFailure { ref implementor, ref target, .. })
                if implementor == "tests.T1" && target == "tests.I1"
        ));
    }

    #[test]
    #[traced_test]
    fn test_self_initialization() {
        let root = root();
        root.register_implementation_with_init::<Greeting, Greeting, _>(false, |greeting| {
            greeting.text = "hello".to_string();
            InitOutcome::Continue
        })
        .unwrap();

        let greeting = root.resolve::<Greeting>().unwrap();
        assert!(greeting.initialized);
        assert_eq!(greeting.text, "hello");
    }

    #[test]
    #[traced_test]
    fn test_self_initialization_failure_is_fatal() {
        let root = root();
        let token = root.register_implementation::<Broken, Broken>(true).unwrap();

        let err = resolve_err::<Broken>(&root);
        assert!(err.is_fatal());
        assert!(logs_contain("broken on purpose"));

        // Nothing half-initialized was cached
        assert!(resolve_err::<Broken>(&root).is_fatal());
        drop(token);
    }

    #[test]
    #[traced_test]
    fn test_uncatalogued_initializable_isnt_self_initialized() {
        let root = root();
        root.register_implementation::<UnlistedGreeting, UnlistedGreeting>(false).unwrap();

        assert!(!root.resolve::<UnlistedGreeting>().unwrap().initialized);
        assert!(logs_contain("isn't self-initialized"));
    }

    #[test]
    #[traced_test]
    fn test_cyclic_resolution() {
        let root = root();
        root.register_implementation::<Ping, Ping>(true).unwrap();
        root.register_implementation::<Pong, Pong>(true).unwrap();
        root.register_instance_initializer(Cycle { scope: root.clone() });

        let err = resolve_err::<Ping>(&root);
        assert!(matches!(err, ResolveErrorKind::Initializer { ref type_name, .. } if type_name == "tests.Ping"));
        assert!(!err.is_fatal());
        assert!(logs_contain("Cyclic resolution of 'tests.Ping'"));

        // Nothing stays marked as constructing
        assert!(matches!(resolve_err::<Pong>(&root), ResolveErrorKind::Initializer { .. }));
        assert!(logs_contain("Cyclic resolution of 'tests.Pong'"));

        root.reset();
    }

    #[test]
    #[traced_test]
    fn test_register_into_closed_scope() {
        let root = root();
        let child = root.create_scope();
        child.close();

        let token = child.register_instance::<dyn I1, _>(t1("late")).unwrap();
        assert!(token.is_closed());
        assert!(!child.contains("tests.I1"));
        assert!(logs_contain("Scope is closed, registration ignored"));
    }

    #[test]
    #[traced_test]
    fn test_close() {
        let root = root();
        let child = root.create_scope();
        let mut token = child.register_instance::<dyn I1, _>(t1("child")).unwrap();
        child.register_instance_initializer(Tag("child"));

        child.close();
        assert!(child.is_closed());
        assert!(child.parent().is_none());
        assert!(!child.contains("tests.I1"));

        child.close();
        token.close();
        assert!(token.is_closed());
    }

    #[test]
    #[traced_test]
    fn test_close_root_only_clears() {
        let root = root();
        root.register_instance::<dyn I1, _>(t1("root")).unwrap();

        root.close();
        assert!(!root.is_closed());
        assert!(!root.contains("tests.I1"));
        root.register_instance::<dyn I1, _>(t1("again")).unwrap();
        assert_eq!(root.resolve::<dyn I1>().unwrap().f1(), "again");
    }

    #[test]
    #[traced_test]
    fn test_reset_keeps_parent() {
        let root = root();
        root.register_instance::<dyn I1, _>(t1("root")).unwrap();
        let child = root.create_scope();
        child.register_instance::<dyn I1, _>(t1("child")).unwrap();

        child.reset();
        assert!(child.parent().is_some_and(|parent| parent.ptr_eq(&root)));
        assert_eq!(child.resolve::<dyn I1>().unwrap().f1(), "root");
    }

    #[test]
    #[traced_test]
    fn test_token_after_scope_dropped() {
        let mut token = {
            let root = root();
            let child = root.create_scope();
            child.register_instance::<dyn I1, _>(t1("child")).unwrap()
        };

        token.close();
        assert!(token.is_closed());
    }

    static SLOW_CONSTRUCTED: AtomicUsize = AtomicUsize::new(0);

    struct Slow;

    impl Default for Slow {
        fn default() -> Self {
            SLOW_CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(10));
            Self
        }
    }

    impl I2 for Slow {}

    #[test]
    #[traced_test]
    fn test_concurrent_resolve() {
        const THREADS: usize = 12;

        let root = root();
        root.catalog().register(implements!(Slow => dyn I2)).unwrap();
        root.register_implementation::<dyn I2, Slow>(true).unwrap();
        let child = root.create_scope();
        let barrier = Barrier::new(THREADS);

        let instances: Vec<Arc<dyn I2>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        child.resolve::<dyn I2>().unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        assert_eq!(SLOW_CONSTRUCTED.load(Ordering::SeqCst), 1);
        assert!(instances.iter().all(|instance| same(instance, &instances[0])));
    }

    #[test]
    fn test_thread_safe() {
        fn impl_bounds<T: Send + Sync + 'static>() {}

        impl_bounds::<(Scope, SharedInstance, crate::RegistrationToken)>();
    }
}
