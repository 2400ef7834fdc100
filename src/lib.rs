#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub(crate) mod any;
pub(crate) mod binding;
pub(crate) mod catalog;
pub(crate) mod config;
pub(crate) mod descriptor;
pub(crate) mod errors;
pub(crate) mod initializer;
pub(crate) mod injector;
pub(crate) mod scope;
pub(crate) mod token;

#[cfg(feature = "std")]
pub(crate) mod global;

pub use any::{canonical_name, type_name_of, Instance, SharedInstance, TypeInfo};
pub use binding::InitOutcome;
pub use catalog::{TypeCatalog, TypeEntry, TypeHandle};
pub use config::{Config, MismatchPolicy};
pub use descriptor::TypeDescriptor;
pub use errors::{CatalogErrorKind, FatalErrorKind, RegisterErrorKind, ResolveErrorKind};
pub use initializer::{Initializable, InjectInitializer, InstanceInitializer};
pub use injector::{Injector, WeakInjector};
pub use scope::Scope;
pub use token::RegistrationToken;

#[cfg(feature = "std")]
pub use global::{
    create_scope, global, register, register_by_name, register_implementation, register_implementation_with_init, register_instance,
    register_instance_initializer, register_shared_instance, reset, resolve, resolve_by_name,
};
