use alloc::{boxed::Box, format, string::String, sync::Arc};
use core::{
    any::{type_name, Any, TypeId},
    cmp::Ordering,
};

/// A freshly constructed instance, still exclusively owned and mutable by initializers.
pub type Instance = Box<dyn Any + Send + Sync>;

/// An instance handed out by resolution.
pub type SharedInstance = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct TypeInfo {
    pub name: &'static str,
    pub id: TypeId,
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeInfo {}

impl PartialOrd for TypeInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl TypeInfo {
    #[inline]
    #[must_use]
    pub fn of<T>() -> Self
    where
        T: ?Sized + 'static,
    {
        Self {
            name: type_name::<T>(),
            id: TypeId::of::<T>(),
        }
    }

    #[inline]
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit_once("::").map_or(self.name, |(_, name)| name)
    }

    /// Name in the `<namespace>.<Type>` form used for by-name registration.
    #[inline]
    #[must_use]
    pub fn canonical_name(&self) -> String {
        canonical_name(self.name)
    }
}

/// Returns the canonical `<namespace>.<Type>` name of `T`.
///
/// ```rust
/// mod list {
///     pub struct List;
/// }
///
/// assert_eq!(tether::type_name_of::<list::List>(), "list.List");
/// ```
#[inline]
#[must_use]
pub fn type_name_of<T: ?Sized + 'static>() -> String {
    canonical_name(type_name::<T>())
}

/// Normalizes a Rust type path or an already canonical name.
///
/// Reference, pointer and `dyn` decorations are removed, as are trailing `+ Bound` lists.
/// A Rust path keeps only its last two segments, joined by a dot. Generic arguments are kept verbatim.
#[must_use]
pub fn canonical_name(raw: &str) -> String {
    let mut name = raw.trim();
    loop {
        let stripped = ["&mut ", "&", "*const ", "*mut ", "*", "dyn "]
            .iter()
            .find_map(|prefix| name.strip_prefix(prefix));
        match stripped {
            Some(rest) => name = rest.trim_start(),
            None => break,
        }
    }
    if let Some((head, _)) = name.split_once(" + ") {
        name = head;
    }

    let (path, generics) = name.split_at(name.find('<').unwrap_or(name.len()));
    if !path.contains("::") {
        return path.replace(['*', '&'], "") + generics;
    }

    let mut segments = path.rsplit("::");
    let leaf = segments.next().unwrap_or(path);
    match segments.next() {
        Some(namespace) => format!("{namespace}.{leaf}{generics}"),
        None => format!("{leaf}{generics}"),
    }
}
