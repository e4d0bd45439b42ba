use std::{
    any::{type_name, Any, TypeId},
    cmp::Ordering,
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
    sync::Arc,
};

/// Shared, type-erased instance stored in injector tables
pub type Value = Arc<dyn Any + Send + Sync>;

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

impl Hash for TypeInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Display for TypeInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
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

    /// Type name without its module path.
    /// Generic arguments are kept, so `Vec<alloc::string::String>` becomes `String>`.
    #[inline]
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit_once("::").map_or(self.name, |(_, name)| name)
    }
}

/// Id of the concrete type behind a [`Value`], not of the `Arc` holding it
#[inline]
#[must_use]
pub(crate) fn value_type_id(value: &Value) -> TypeId {
    (**value).type_id()
}

#[cfg(test)]
mod tests {
    use super::{value_type_id, TypeInfo, Value};

    use std::{any::TypeId, sync::Arc};
    use tracing_test::traced_test;

    mod nested {
        pub struct Service;
    }

    #[test]
    #[traced_test]
    fn test_short_name() {
        assert_eq!(TypeInfo::of::<nested::Service>().short_name(), "Service");
        assert_eq!(TypeInfo::of::<u8>().short_name(), "u8");
    }

    #[test]
    #[traced_test]
    fn test_value_type_id() {
        let value: Value = Arc::new(5u32);

        assert_eq!(value_type_id(&value), TypeId::of::<u32>());
        assert_ne!(value_type_id(&value), TypeId::of::<Value>());
    }
}
