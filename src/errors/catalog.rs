use alloc::string::String;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogErrorKind {
    #[error("Already registered: {name}")]
    DuplicateRegistration { name: String },
}
