mod catalog;
mod fatal;
mod register;
mod resolve;

pub use catalog::CatalogErrorKind;
pub use fatal::FatalErrorKind;
pub use register::RegisterErrorKind;
pub use resolve::ResolveErrorKind;
