use alloc::{string::ToString as _, sync::Arc};
use core::{
    any::Any,
    cell::Cell,
    fmt::{self, Debug, Formatter},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};
use parking_lot::{ReentrantMutex, RwLock};
use tracing::{debug, error};

use crate::{
    any::{Instance, SharedInstance},
    catalog::{TypeCatalog, TypeHandle},
    config::MismatchPolicy,
    descriptor::TypeDescriptor,
    errors::{FatalErrorKind, ResolveErrorKind},
};

static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(1);

/// Result of a per-binding initialization callback.
#[derive(Debug)]
pub enum InitOutcome {
    /// Proceed with self-initialization and the registered initializers.
    Continue,
    /// The instance is fully initialized, skip the rest of the chain.
    Complete,
    /// The callback failed, but the rest of the chain may still initialize the instance.
    Recoverable(anyhow::Error),
    /// The callback failed and nothing else can initialize the instance. This is fatal.
    Failed(anyhow::Error),
}

pub(crate) type InitCallback = Arc<dyn Fn(&mut (dyn Any + Send + Sync)) -> InitOutcome + Send + Sync>;

pub(crate) struct Materialized {
    pub(crate) instance: SharedInstance,
    pub(crate) fresh: bool,
}

/// Registered association between a target and an implementor.
pub(crate) struct Binding {
    pub(crate) id: u64,
    pub(crate) target: TypeDescriptor,
    pub(crate) implementor: TypeDescriptor,
    pub(crate) cached: bool,
    pub(crate) callback: Option<InitCallback>,
    instance: RwLock<Option<SharedInstance>>,
    /// Held by the thread constructing the cached instance. The flag is set while it's constructing.
    construction: ReentrantMutex<Cell<bool>>,
    verified: AtomicBool,
}

impl Binding {
    #[must_use]
    pub(crate) fn new(
        target: TypeDescriptor,
        implementor: TypeDescriptor,
        cached: bool,
        callback: Option<InitCallback>,
        verified: bool,
    ) -> Self {
        Self {
            id: NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed),
            target,
            implementor,
            cached,
            callback,
            instance: RwLock::new(None),
            construction: ReentrantMutex::new(Cell::new(false)),
            verified: AtomicBool::new(verified),
        }
    }

    /// Permanently cached binding around an already constructed instance.
    #[must_use]
    pub(crate) fn with_instance(target: TypeDescriptor, implementor: TypeDescriptor, instance: SharedInstance) -> Self {
        let binding = Self::new(target, implementor, true, None, true);
        *binding.instance.write() = Some(instance);
        binding
    }

    /// Returns the instance of this binding, constructing it if required.
    ///
    /// `initialize` runs only for freshly constructed instances.
    /// For cached bindings exactly one caller constructs the instance, the others wait for it
    /// and observe it fully initialized. A caller that resolves the binding again from its own
    /// `initialize` gets [`ResolveErrorKind::CyclicResolution`].
    pub(crate) fn realize<F>(&self, catalog: &TypeCatalog, policy: MismatchPolicy, initialize: F) -> Result<Materialized, ResolveErrorKind>
    where
        F: FnOnce(Instance, &TypeHandle) -> Result<Instance, ResolveErrorKind>,
    {
        if !self.cached {
            let (instance, implementor) = self.construct(catalog, policy)?;
            let instance = initialize(instance, &implementor)?;
            debug!("Constructed");
            return Ok(Materialized {
                instance: Arc::from(instance),
                fresh: true,
            });
        }

        if let Some(instance) = self.instance.read().clone() {
            debug!("Found in cache");
            return Ok(Materialized { instance, fresh: false });
        }

        let construction = self.construction.lock();
        if construction.get() {
            let err = ResolveErrorKind::CyclicResolution {
                name: self.target.name().to_string(),
            };
            error!("{}", err);
            return Err(err);
        }
        if let Some(instance) = self.instance.read().clone() {
            debug!("Constructed by another caller");
            return Ok(Materialized { instance, fresh: false });
        }

        construction.set(true);
        let constructed = self
            .construct(catalog, policy)
            .and_then(|(instance, implementor)| initialize(instance, &implementor));
        construction.set(false);

        let instance: SharedInstance = Arc::from(constructed?);
        *self.instance.write() = Some(instance.clone());
        debug!("Constructed and cached");

        Ok(Materialized { instance, fresh: true })
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn cached_instance(&self) -> Option<SharedInstance> {
        self.instance.read().clone()
    }

    fn construct(&self, catalog: &TypeCatalog, policy: MismatchPolicy) -> Result<(Instance, TypeHandle), ResolveErrorKind> {
        let implementor = self.implementor.handle(catalog)?;
        self.verify(catalog, policy, &implementor)?;

        match implementor.construct() {
            Some(instance) => Ok((instance, implementor)),
            None => {
                let err = ResolveErrorKind::NotConstructible {
                    name: implementor.name().to_string(),
                };
                error!("{}", err);
                Err(err)
            }
        }
    }

    /// Checks the capability of by-name bindings. Typed bindings are checked on registration.
    fn verify(&self, catalog: &TypeCatalog, policy: MismatchPolicy, implementor: &TypeHandle) -> Result<(), ResolveErrorKind> {
        if self.verified.load(Ordering::Acquire) {
            return Ok(());
        }

        let target = self.target.handle(catalog)?;
        if !implementor.satisfies(target.id()) {
            let implementor = implementor.name().to_string();
            let target = target.name().to_string();
            let err = match policy {
                MismatchPolicy::Recoverable => ResolveErrorKind::CapabilityMismatch { implementor, target },
                MismatchPolicy::Fatal => FatalErrorKind::CapabilityMismatch { implementor, target }.into(),
            };
            error!("{}", err);
            return Err(err);
        }

        self.verified.store(true, Ordering::Release);
        Ok(())
    }
}

impl Debug for Binding {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("implementor", &self.implementor)
            .field("cached", &self.cached)
            .field("has_callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}
