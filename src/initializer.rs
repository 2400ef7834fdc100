use alloc::{collections::BTreeMap, string::String, sync::Arc};
use core::any::Any;
use tracing::debug;

use crate::{
    any::{type_name_of, Instance},
    injector::{Injector, WeakInjector},
};

/// Allows post-create access to instances constructed by the injector.
///
/// Initializers are asked in registration order, starting in the scope that owns the binding
/// and falling back to its ancestors. The first one that answers [`Self::can_initialize`] wins,
/// and its result is returned without consulting any other initializer.
pub trait InstanceInitializer: Send + Sync {
    fn can_initialize(&self, instance: &(dyn Any + Send + Sync), type_name: &str) -> bool;

    /// # Errors
    /// Returned errors are reported to the resolving caller as recoverable initializer failures.
    fn initialize(&self, instance: Instance, type_name: &str) -> Result<Instance, anyhow::Error>;
}

/// Self-initialization of a freshly constructed instance.
///
/// Declared for a type with [`crate::TypeEntry::initializable`]. Implementing the trait alone
/// isn't enough: a type registered without that catalog entry is never self-initialized.
/// A failure is fatal: the instance is never handed out half-initialized.
pub trait Initializable {
    /// # Errors
    /// Any error aborts the resolution with a fatal initialization failure.
    fn init(&mut self) -> Result<(), anyhow::Error>;
}

type Populator = Arc<dyn Fn(&mut (dyn Any + Send + Sync), &Injector) -> Result<(), anyhow::Error> + Send + Sync>;

/// Initializer that populates fields of fresh instances from other registrations.
///
/// Dependencies are resolved through the current scope of the injector it was created for.
/// Only a weak handle is kept, so registering it into the same injector doesn't leak.
///
/// ```rust
/// use std::sync::Arc;
/// use tether::{implements, InjectInitializer, Injector, TypeEntry};
///
/// trait Clock: Send + Sync {
///     fn now(&self) -> u64;
/// }
///
/// #[derive(Default)]
/// struct FixedClock;
///
/// impl Clock for FixedClock {
///     fn now(&self) -> u64 {
///         42
///     }
/// }
///
/// #[derive(Default)]
/// struct Scheduler {
///     clock: Option<Arc<dyn Clock>>,
/// }
///
/// let injector = Injector::new();
/// injector.register(implements!(FixedClock => dyn Clock)).unwrap();
/// injector.register(TypeEntry::<Scheduler>::concrete()).unwrap();
/// injector.register_implementation::<dyn Clock, FixedClock>(true).unwrap();
/// injector.register_implementation::<Scheduler, Scheduler>(false).unwrap();
///
/// let initializer = InjectInitializer::new(&injector).with(|scheduler: &mut Scheduler, injector| {
///     scheduler.clock = Some(injector.resolve::<dyn Clock>()?);
///     Ok(())
/// });
/// injector.register_instance_initializer(initializer);
///
/// let scheduler = injector.resolve::<Scheduler>().unwrap();
/// assert_eq!(scheduler.clock.as_ref().unwrap().now(), 42);
/// ```
pub struct InjectInitializer {
    injector: WeakInjector,
    populators: BTreeMap<String, Populator>,
}

impl InjectInitializer {
    #[inline]
    #[must_use]
    pub fn new(injector: &Injector) -> Self {
        Self {
            injector: injector.downgrade(),
            populators: BTreeMap::new(),
        }
    }

    /// Adds a populator for instances of `T`.
    /// A later populator for the same type replaces the earlier one.
    #[must_use]
    pub fn with<T, F>(mut self, populate: F) -> Self
    where
        T: 'static,
        F: Fn(&mut T, &Injector) -> Result<(), anyhow::Error> + Send + Sync + 'static,
    {
        let populator: Populator = Arc::new(move |instance: &mut (dyn Any + Send + Sync), injector: &Injector| {
            match instance.downcast_mut::<T>() {
                Some(instance) => populate(instance, injector),
                None => Err(anyhow::anyhow!("Instance isn't a {}", type_name_of::<T>())),
            }
        });
        self.populators.insert(type_name_of::<T>(), populator);
        self
    }
}

impl InstanceInitializer for InjectInitializer {
    fn can_initialize(&self, _instance: &(dyn Any + Send + Sync), type_name: &str) -> bool {
        self.populators.contains_key(type_name)
    }

    fn initialize(&self, mut instance: Instance, type_name: &str) -> Result<Instance, anyhow::Error> {
        let Some(populate) = self.populators.get(type_name) else {
            return Ok(instance);
        };
        let Some(injector) = self.injector.upgrade() else {
            return Err(anyhow::anyhow!("Injector dropped before '{type_name}' was populated"));
        };

        populate(instance.as_mut(), &injector)?;
        debug!(type_name, "Populated");

        Ok(instance)
    }
}
