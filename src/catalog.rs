use alloc::{
    borrow::ToOwned as _,
    boxed::Box,
    collections::BTreeMap,
    string::{String, ToString as _},
    sync::Arc,
};
use core::{
    any::{Any, TypeId},
    fmt::{self, Debug, Formatter},
    marker::PhantomData,
};
use parking_lot::RwLock;
use tracing::{debug, error};

use crate::{
    any::{canonical_name, Instance, SharedInstance, TypeInfo},
    errors::{CatalogErrorKind, FatalErrorKind},
    initializer::Initializable,
};

pub(crate) type Caster = Arc<dyn Fn(SharedInstance) -> Option<Box<dyn Any>> + Send + Sync>;
pub(crate) type Constructor = fn() -> Instance;
pub(crate) type SelfInit = fn(&mut (dyn Any + Send + Sync)) -> Result<(), anyhow::Error>;

/// Declaration of a type and its capabilities, registered into a [`TypeCatalog`].
///
/// # Examples
/// ```rust
/// use tether::TypeEntry;
///
/// trait Animal: Send + Sync {}
///
/// #[derive(Default)]
/// struct Hippo;
///
/// impl Animal for Hippo {}
///
/// let interface = TypeEntry::<dyn Animal>::interface();
/// let hippo = TypeEntry::<Hippo>::concrete().implements::<dyn Animal>(|it| it);
/// ```
pub struct TypeEntry<T: ?Sized> {
    info: TypeInfo,
    interface: bool,
    construct: Option<Constructor>,
    self_init: Option<SelfInit>,
    casts: BTreeMap<TypeId, Caster>,
    _marker: PhantomData<fn() -> Box<T>>,
}

impl<T: ?Sized + 'static> TypeEntry<T> {
    /// Abstract capability set, usually a `dyn Trait`. It's never constructed.
    #[inline]
    #[must_use]
    pub fn interface() -> Self {
        Self {
            info: TypeInfo::of::<T>(),
            interface: true,
            construct: None,
            self_init: None,
            casts: BTreeMap::new(),
            _marker: PhantomData,
        }
    }
}

impl<T: Send + Sync + 'static> TypeEntry<T> {
    /// Concrete type without a zero-value constructor.
    /// It can only be supplied with an already constructed instance.
    #[inline]
    #[must_use]
    pub fn value() -> Self {
        Self {
            info: TypeInfo::of::<T>(),
            interface: false,
            construct: None,
            self_init: None,
            casts: BTreeMap::new(),
            _marker: PhantomData,
        }
        .implements::<T>(|it| it)
    }

    /// Declares that `T` satisfies the capability set `I`.
    /// The `upcast` is almost always `|it| it`, letting the compiler check the conformance.
    #[must_use]
    pub fn implements<I: ?Sized + 'static>(mut self, upcast: impl Fn(Arc<T>) -> Arc<I> + Send + Sync + 'static) -> Self {
        let caster: Caster = Arc::new(move |instance: SharedInstance| {
            instance
                .downcast::<T>()
                .ok()
                .map(|instance| Box::new(upcast(instance)) as Box<dyn Any>)
        });
        self.casts.insert(TypeId::of::<I>(), caster);
        self
    }

    /// Marks `T` as self-initializing: [`Initializable::init`] runs on every fresh instance.
    #[must_use]
    pub fn initializable(mut self) -> Self
    where
        T: Initializable,
    {
        let self_init: SelfInit = |instance| match instance.downcast_mut::<T>() {
            Some(instance) => instance.init(),
            None => Ok(()),
        };
        self.self_init = Some(self_init);
        self
    }
}

impl<T: Default + Send + Sync + 'static> TypeEntry<T> {
    /// Concrete type constructed from its [`Default`] (zero) value.
    #[inline]
    #[must_use]
    pub fn concrete() -> Self {
        let construct: Constructor = || Box::new(T::default()) as Instance;
        let mut entry = Self::value();
        entry.construct = Some(construct);
        entry
    }
}

/// Resolved, shareable form of a [`TypeEntry`].
#[derive(Clone)]
pub struct TypeHandle {
    inner: Arc<TypeHandleInner>,
}

struct TypeHandleInner {
    info: TypeInfo,
    name: String,
    interface: bool,
    construct: Option<Constructor>,
    self_init: Option<SelfInit>,
    casts: BTreeMap<TypeId, Caster>,
}

impl<T: ?Sized> From<TypeEntry<T>> for TypeHandle {
    fn from(
        TypeEntry {
            info,
            interface,
            construct,
            self_init,
            casts,
            ..
        }: TypeEntry<T>,
    ) -> Self {
        Self {
            inner: Arc::new(TypeHandleInner {
                name: info.canonical_name(),
                info,
                interface,
                construct,
                self_init,
                casts,
            }),
        }
    }
}

impl TypeHandle {
    #[inline]
    #[must_use]
    pub(crate) fn of_interface<T: ?Sized + 'static>() -> Self {
        TypeEntry::<T>::interface().into()
    }

    #[inline]
    #[must_use]
    pub(crate) fn of_value<T: Send + Sync + 'static>() -> Self {
        TypeEntry::<T>::value().into()
    }

    #[inline]
    #[must_use]
    pub(crate) fn of_concrete<T: Default + Send + Sync + 'static>() -> Self {
        TypeEntry::<T>::concrete().into()
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[inline]
    #[must_use]
    pub fn info(&self) -> TypeInfo {
        self.inner.info
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> TypeId {
        self.inner.info.id
    }

    #[inline]
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.inner.interface
    }

    #[inline]
    #[must_use]
    pub fn is_constructible(&self) -> bool {
        self.inner.construct.is_some()
    }

    /// Returns `true` if instances of this type satisfy the capability set identified by `target`.
    #[inline]
    #[must_use]
    pub fn satisfies(&self, target: TypeId) -> bool {
        self.inner.casts.contains_key(&target)
    }

    #[inline]
    #[must_use]
    pub(crate) fn construct(&self) -> Option<Instance> {
        self.inner.construct.map(|construct| construct())
    }

    #[inline]
    #[must_use]
    pub(crate) fn self_init(&self) -> Option<SelfInit> {
        self.inner.self_init
    }

    #[must_use]
    pub(crate) fn cast<I: ?Sized + 'static>(&self, instance: SharedInstance) -> Option<Arc<I>> {
        let caster = self.inner.casts.get(&TypeId::of::<I>())?;
        caster(instance)?.downcast::<Arc<I>>().ok().map(|instance| *instance)
    }
}

impl Debug for TypeHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeHandle")
            .field("name", &self.inner.name)
            .field("interface", &self.inner.interface)
            .field("constructible", &self.is_constructible())
            .finish_non_exhaustive()
    }
}

/// Maps canonical type names to type handles.
///
/// Each name can be registered once. By-name bindings are resolved through the catalog,
/// so every referenced type must be registered before such a binding is resolved.
#[derive(Clone, Default)]
pub struct TypeCatalog {
    inner: Arc<RwLock<CatalogInner>>,
}

#[derive(Default)]
struct CatalogInner {
    by_name: BTreeMap<String, TypeHandle>,
    by_id: BTreeMap<TypeId, TypeHandle>,
}

impl TypeCatalog {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns [`CatalogErrorKind::DuplicateRegistration`] if the canonical name is already registered.
    pub fn register<T: ?Sized>(&self, entry: TypeEntry<T>) -> Result<(), CatalogErrorKind> {
        let handle = TypeHandle::from(entry);

        let mut inner = self.inner.write();
        if inner.by_name.contains_key(handle.name()) {
            let err = CatalogErrorKind::DuplicateRegistration {
                name: handle.name().to_owned(),
            };
            error!("{}", err);
            return Err(err);
        }
        inner.by_id.insert(handle.id(), handle.clone());
        inner.by_name.insert(handle.name().to_owned(), handle.clone());

        debug!(name = handle.name(), interface = handle.is_interface(), "Type registered");
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<TypeHandle> {
        self.inner.read().by_name.get(&canonical_name(name)).cloned()
    }

    #[must_use]
    pub fn get_by_id(&self, id: TypeId) -> Option<TypeHandle> {
        self.inner.read().by_id.get(&id).cloned()
    }

    /// # Errors
    /// Returns [`FatalErrorKind::UninitializedTypeReference`] if the name was never registered.
    pub fn resolve_by_name(&self, name: &str) -> Result<TypeHandle, FatalErrorKind> {
        self.get(name).ok_or_else(|| {
            let err = FatalErrorKind::UninitializedTypeReference { name: name.to_string() };
            error!("{}", err);
            err
        })
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().by_name.contains_key(&canonical_name(name))
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().by_name.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every registered type.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.by_name.clear();
        inner.by_id.clear();
        debug!("Catalog cleared");
    }
}

/// Creates a concrete [`TypeEntry`] that implements the listed capability sets.
///
/// # Syntax
/// ```text
/// implements!(Type => dyn Trait1 [, dyn Trait2 ...])
/// ```
///
/// # Examples
/// ```rust
/// use tether::{implements, TypeCatalog};
///
/// trait Animal: Send + Sync {}
/// trait Swimmer: Send + Sync {}
///
/// #[derive(Default)]
/// struct Hippo;
///
/// impl Animal for Hippo {}
/// impl Swimmer for Hippo {}
///
/// let catalog = TypeCatalog::new();
/// catalog.register(implements!(Hippo => dyn Animal, dyn Swimmer)).unwrap();
/// assert_eq!(catalog.len(), 1);
/// ```
#[macro_export]
macro_rules! implements {
    ($ty:ty => $($target:ty),+ $(,)?) => {
        $crate::TypeEntry::<$ty>::concrete()$(.implements::<$target>(|it| it))+
    };
}
