use parking_lot::Mutex;
use std::{
    any::Any,
    borrow::Cow,
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Display, Formatter},
    sync::{Arc, OnceLock},
};
use tracing::{debug, error};

use crate::{
    annotation::{
        Annotation, AnnotationArgs, AnnotationKey, AnnotationRecord, Discriminant, Inject, Member, Signature, CONSTRUCTOR, INJECT,
    },
    any::TypeInfo,
    class::{Class, ClassDeclaration},
    errors::AnnotationErrorKind,
    token::Token,
};

static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();

/// Registry-assigned identity of a declared annotation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AnnotationId {
    pub uid: u64,
    pub name: &'static str,
}

impl Display for AnnotationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "@{}#{}", self.name, self.uid)
    }
}

/// Property injection derived from an [`INJECT`] record
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PropertyInjection {
    pub(crate) key: Cow<'static, str>,
    pub(crate) token: Token,
    pub(crate) is_mutable: bool,
}

type LookupKey = (AnnotationKey, TypeInfo, Discriminant, Cow<'static, str>, Option<usize>);

#[derive(Default)]
struct RegistryInner {
    declarations: BTreeMap<TypeInfo, Arc<ClassDeclaration>>,
    attached: BTreeMap<TypeInfo, Vec<AnnotationRecord>>,
    annotations: BTreeMap<AnnotationKey, AnnotationId>,
    merged: BTreeMap<TypeInfo, Arc<[AnnotationRecord]>>,
    lookups: BTreeMap<LookupKey, Option<AnnotationRecord>>,
}

impl RegistryInner {
    fn declare_annotation(&mut self, annotation: &Annotation) -> AnnotationId {
        let uid = self.annotations.len() as u64;
        *self.annotations.entry(annotation.key()).or_insert(AnnotationId {
            uid,
            name: annotation.name(),
        })
    }

    fn invalidate(&mut self) {
        self.merged.clear();
        self.lookups.clear();
    }
}

/// Process-wide store of class declarations and their annotation records.
///
/// Declarations are collected lazily on the first lookup of a class
/// and merged along the inheritance chain, most-derived class first.
/// Merged lists and getter results are cached until the registry changes.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry shared by injectors that weren't given one
    #[must_use]
    pub fn global() -> Arc<Self> {
        GLOBAL.get_or_init(|| Arc::new(Self::new())).clone()
    }

    /// Forgets every declaration, attached record and declared kind
    pub fn clear(&self) {
        *self.inner.lock() = RegistryInner::default();

        debug!("Registry cleared");
    }

    /// Declares a kind explicitly, records declared through classes declare their kinds implicitly
    pub fn declare_annotation(&self, annotation: &Annotation) -> AnnotationId {
        self.inner.lock().declare_annotation(annotation)
    }

    /// # Errors
    /// Returns [`AnnotationErrorKind::InvalidAnnotation`] if the kind was never declared in this registry
    pub fn annotation_id(&self, annotation: &Annotation) -> Result<AnnotationId, AnnotationErrorKind> {
        self.inner
            .lock()
            .annotations
            .get(&annotation.key())
            .copied()
            .ok_or(AnnotationErrorKind::InvalidAnnotation {
                name: annotation.name(),
            })
    }

    /// Attaches a record to `class` at runtime, after its static declarations
    ///
    /// # Errors
    /// Returns an error if `annotation` doesn't target `member` or the class can't be declared
    pub fn attach<A>(&self, class: &Class, annotation: &Annotation, member: Member, args: A) -> Result<(), AnnotationErrorKind>
    where
        A: Any + Send + Sync,
    {
        let declaration = self.declaration(class)?;
        let record = declaration.record(annotation, member, AnnotationArgs::new(args))?;

        let mut inner = self.inner.lock();
        inner.declare_annotation(annotation);
        inner.attached.entry(class.type_info()).or_default().push(record);
        inner.invalidate();

        debug!(class = class.name(), annotation = annotation.name(), "Record attached");

        Ok(())
    }

    fn declaration(&self, class: &Class) -> Result<Arc<ClassDeclaration>, AnnotationErrorKind> {
        if let Some(declaration) = self.inner.lock().declarations.get(&class.type_info()) {
            return Ok(declaration.clone());
        }

        // `declare` may look up other classes, so it runs without the lock
        let declaration = Arc::new((class.declare)()?);

        let mut inner = self.inner.lock();
        for record in &declaration.records {
            inner.declare_annotation(&record.annotation);
        }
        Ok(inner.declarations.entry(class.type_info()).or_insert(declaration).clone())
    }

    fn chain(&self, class: &Class) -> Result<Vec<Arc<ClassDeclaration>>, AnnotationErrorKind> {
        let mut chain: Vec<Arc<ClassDeclaration>> = Vec::new();
        let mut current = Some(*class);

        while let Some(class) = current {
            if chain.iter().any(|declaration| declaration.type_info == class.type_info()) {
                let err = AnnotationErrorKind::CyclicInheritance {
                    class: chain[0].type_info,
                };
                error!("{}", err);
                return Err(err);
            }

            let declaration = self.declaration(&class)?;
            current = declaration.parent;
            chain.push(declaration);
        }
        Ok(chain)
    }

    /// Every record of `class`, its own and inherited ones.
    ///
    /// Records of the most-derived class come first.
    /// An inherited record is skipped if a subclass already has one
    /// of the same kind on the same member and parameter index.
    ///
    /// # Errors
    /// Returns an error if a class of the chain can't be declared
    pub fn all_metadata(&self, class: &Class) -> Result<Arc<[AnnotationRecord]>, AnnotationErrorKind> {
        if let Some(records) = self.inner.lock().merged.get(&class.type_info()) {
            return Ok(records.clone());
        }

        let chain = self.chain(class)?;
        let attached = self.inner.lock().attached.clone();

        let mut records = Vec::new();
        let mut inherited = BTreeSet::new();
        for declaration in &chain {
            let level = declaration.ordered_records(attached.get(&declaration.type_info).map_or(&[][..], Vec::as_slice));
            let identities: Vec<_> = level.iter().map(AnnotationRecord::identity).collect();

            records.extend(level.into_iter().filter(|record| !inherited.contains(&record.identity())));
            inherited.extend(identities);
        }

        let records: Arc<[AnnotationRecord]> = records.into();
        self.inner.lock().merged.insert(class.type_info(), records.clone());

        debug!(class = class.name(), records = records.len(), "Metadata merged");

        Ok(records)
    }

    /// # Errors
    /// Returns an error if a class of the chain can't be declared
    pub fn has_annotation(&self, class: &Class, annotation: &Annotation) -> Result<bool, AnnotationErrorKind> {
        Ok(self.all_metadata(class)?.iter().any(|record| record.annotation == *annotation))
    }

    fn lookup(
        &self,
        annotation: &Annotation,
        class: &Class,
        discriminant: Discriminant,
        key: &str,
        index: Option<usize>,
    ) -> Result<Option<AnnotationRecord>, AnnotationErrorKind> {
        if !annotation.target().accepts(discriminant) {
            let err = AnnotationErrorKind::KindMismatch {
                name: annotation.name(),
                requested: discriminant,
                getter: annotation.target().getter(),
            };
            error!("{}", err);
            return Err(err);
        }

        let lookup_key = (
            annotation.key(),
            class.type_info(),
            discriminant,
            Cow::Owned(key.to_owned()),
            index,
        );
        if let Some(found) = self.inner.lock().lookups.get(&lookup_key) {
            debug!("Found in cache");
            return Ok(found.clone());
        }

        // Last writer wins among records of one member
        let found = self
            .all_metadata(class)?
            .iter()
            .rev()
            .find(|record| {
                record.annotation == *annotation
                    && record.discriminant == discriminant
                    && record.property_key == key
                    && record.param_index == index
            })
            .cloned();

        self.inner.lock().lookups.insert(lookup_key, found.clone());
        Ok(found)
    }

    /// # Errors
    /// Returns [`AnnotationErrorKind::KindMismatch`] if `annotation` isn't a class annotation
    pub fn class_metadata(&self, annotation: &Annotation, class: &Class) -> Result<Option<AnnotationRecord>, AnnotationErrorKind> {
        self.lookup(annotation, class, Discriminant::Constructor, CONSTRUCTOR, None)
    }

    /// # Errors
    /// Returns [`AnnotationErrorKind::KindMismatch`] if `annotation` isn't a property annotation
    pub fn property_metadata(&self, annotation: &Annotation, class: &Class, key: &str) -> Result<Option<AnnotationRecord>, AnnotationErrorKind> {
        self.lookup(annotation, class, Discriminant::Property, key, None)
    }

    /// Parameter `index` of the method `key`, use [`CONSTRUCTOR`] for constructor parameters
    ///
    /// # Errors
    /// Returns [`AnnotationErrorKind::KindMismatch`] if `annotation` isn't a parameter annotation
    pub fn parameter_metadata(
        &self,
        annotation: &Annotation,
        class: &Class,
        key: &str,
        index: usize,
    ) -> Result<Option<AnnotationRecord>, AnnotationErrorKind> {
        self.lookup(annotation, class, Discriminant::Parameter, key, Some(index))
    }

    /// # Errors
    /// Returns [`AnnotationErrorKind::KindMismatch`] if `annotation` isn't a method annotation
    pub fn method_metadata(&self, annotation: &Annotation, class: &Class, key: &str) -> Result<Option<AnnotationRecord>, AnnotationErrorKind> {
        self.lookup(annotation, class, Discriminant::Method, key, None)
    }

    /// Declared signature of `method`, the most-derived declaration wins
    ///
    /// # Errors
    /// Returns an error if a class of the chain can't be declared
    pub fn signature(&self, class: &Class, method: &str) -> Result<Option<Signature>, AnnotationErrorKind> {
        Ok(self
            .chain(class)?
            .iter()
            .find_map(|declaration| declaration.signatures.get(method).cloned()))
    }

    /// Tokens of the constructor parameters, in order
    pub(crate) fn constructor_tokens(&self, class: &Class) -> Result<Vec<Token>, AnnotationErrorKind> {
        let mut tokens = BTreeMap::new();
        for record in self.all_metadata(class)?.iter() {
            if record.annotation == INJECT && record.is_constructor_parameter() {
                tokens.insert(record.param_index.unwrap_or_default(), record.inject_token());
            }
        }

        let Some(last) = tokens.keys().next_back().copied() else {
            return Ok(Vec::new());
        };
        (0..=last)
            .map(|index| {
                tokens
                    .get(&index)
                    .cloned()
                    .flatten()
                    .ok_or(AnnotationErrorKind::UnresolvableParameter {
                        class: class.type_info(),
                        index,
                    })
            })
            .collect()
    }

    /// Injected properties, in declaration order
    pub(crate) fn injected_properties(&self, class: &Class) -> Result<Vec<PropertyInjection>, AnnotationErrorKind> {
        let mut injections: Vec<PropertyInjection> = Vec::new();
        for record in self.all_metadata(class)?.iter() {
            if record.annotation != INJECT || record.discriminant != Discriminant::Property {
                continue;
            }

            let token = record.inject_token().ok_or_else(|| AnnotationErrorKind::UnresolvableProperty {
                class: class.type_info(),
                key: record.property_key.clone(),
            })?;
            let injection = PropertyInjection {
                key: record.property_key.clone(),
                token,
                is_mutable: record.args.get::<Inject>().is_some_and(|inject| inject.is_mutable),
            };

            match injections.iter_mut().find(|existing| existing.key == injection.key) {
                Some(existing) => *existing = injection,
                None => injections.push(injection),
            }
        }
        Ok(injections)
    }

    /// Interceptor records grouped by method, in declaration order
    pub(crate) fn intercepted_methods(&self, class: &Class) -> Result<Vec<(Cow<'static, str>, Vec<AnnotationRecord>)>, AnnotationErrorKind> {
        let mut methods: Vec<(Cow<'static, str>, Vec<AnnotationRecord>)> = Vec::new();
        for record in self.all_metadata(class)?.iter() {
            if record.discriminant != Discriminant::Method || !record.annotation.is_interceptor() {
                continue;
            }

            match methods.iter_mut().find(|(method, _)| *method == record.property_key) {
                Some((_, records)) => records.push(record.clone()),
                None => methods.push((record.property_key.clone(), vec![record.clone()])),
            }
        }
        Ok(methods)
    }
}

#[cfg(test)]
mod tests {
    use super::{PropertyInjection, Registry};
    use crate::{
        annotation::{Annotation, Inject, Member, Signature, CONSTRUCTOR, INJECT},
        class::{Arguments, Class, ClassBuilder, Injectable},
        errors::{AnnotationErrorKind, InstantiateErrorKind, InvokeErrorKind},
        interceptor::{Interceptor, Method},
        outcome::Outcome,
        token::Token,
    };

    use std::{
        borrow::Cow,
        sync::atomic::{AtomicU8, Ordering},
    };
    use tracing_test::traced_test;

    struct Orm;
    struct Http;

    const ENTITY: Annotation = Annotation::class::<Orm>("Entity");
    const COLUMN: Annotation = Annotation::property::<Orm>("Column");
    const ROUTE: Annotation = Annotation::method::<Http>("Route");
    const NEVER_USED: Annotation = Annotation::method::<Http>("NeverUsed");

    static COUNTED_DECLARATIONS: AtomicU8 = AtomicU8::new(0);

    struct Logger;
    struct Config;

    struct Base;

    impl Injectable for Base {
        fn declare(class: &mut ClassBuilder<Self>) -> Result<(), AnnotationErrorKind> {
            class
                .constructor([Token::of::<Logger>(), Token::of::<Config>()])
                .annotate(&ENTITY, "base")?
                .property("id", Token::of::<u64>(), &COLUMN, "id")?
                .method("list", &ROUTE, "/base")?
                .method("show", &ROUTE, "/show")?;
            Ok(())
        }

        fn construct(_: Arguments) -> Result<Self, InstantiateErrorKind> {
            Ok(Self)
        }
    }

    struct Derived;

    struct Counted;

    impl Injectable for Counted {
        fn declare(class: &mut ClassBuilder<Self>) -> Result<(), AnnotationErrorKind> {
            COUNTED_DECLARATIONS.fetch_add(1, Ordering::SeqCst);

            class.extends::<Base>();
            Ok(())
        }

        fn construct(_: Arguments) -> Result<Self, InstantiateErrorKind> {
            Ok(Self)
        }
    }

    impl Injectable for Derived {
        fn declare(class: &mut ClassBuilder<Self>) -> Result<(), AnnotationErrorKind> {
            class
                .extends::<Base>()
                .method("list", &ROUTE, "/derived")?
                .inject_property("name", Token::of::<String>(), Inject::token("name"))?;
            Ok(())
        }

        fn construct(_: Arguments) -> Result<Self, InstantiateErrorKind> {
            Ok(Self)
        }
    }

    #[test]
    #[traced_test]
    fn test_all_metadata_order() {
        let registry = Registry::new();
        let records = registry.all_metadata(&Class::of::<Derived>()).unwrap();

        let summary: Vec<_> = records
            .iter()
            .map(|record| (record.annotation.name(), record.target.short_name(), record.property_key.clone()))
            .collect();
        assert_eq!(
            summary,
            [
                ("Route", "Derived", Cow::Borrowed("list")),
                ("Inject", "Derived", Cow::Borrowed("name")),
                ("Inject", "Base", Cow::Borrowed(CONSTRUCTOR)),
                ("Inject", "Base", Cow::Borrowed(CONSTRUCTOR)),
                ("Entity", "Base", Cow::Borrowed(CONSTRUCTOR)),
                ("Column", "Base", Cow::Borrowed("id")),
                ("Route", "Base", Cow::Borrowed("show")),
            ]
        );
        assert!(records[2].is_synthetic);
        assert_eq!(records[2].declared_type, Some(Token::of::<Logger>()));
        assert_eq!(records[5].declared_type, Some(Token::of::<u64>()));
    }

    #[test]
    #[traced_test]
    fn test_declared_once() {
        let registry = Registry::new();
        let counted = Class::of::<Counted>();

        registry.all_metadata(&counted).unwrap();
        registry.class_metadata(&ENTITY, &counted).unwrap();
        registry.method_metadata(&ROUTE, &counted, "list").unwrap();

        assert_eq!(COUNTED_DECLARATIONS.load(Ordering::SeqCst), 1);

        registry.clear();
        registry.all_metadata(&counted).unwrap();

        assert_eq!(COUNTED_DECLARATIONS.load(Ordering::SeqCst), 2);
    }

    #[test]
    #[traced_test]
    fn test_getters() {
        let registry = Registry::new();
        let derived = Class::of::<Derived>();

        let route = registry.method_metadata(&ROUTE, &derived, "list").unwrap().unwrap();
        assert_eq!(route.args.get::<&str>(), Some(&"/derived"));

        let show = registry.method_metadata(&ROUTE, &derived, "show").unwrap().unwrap();
        assert_eq!(show.target.short_name(), "Base");

        let entity = registry.class_metadata(&ENTITY, &derived).unwrap().unwrap();
        assert_eq!(entity.args.get::<&str>(), Some(&"base"));

        let logger = registry.parameter_metadata(&INJECT, &derived, CONSTRUCTOR, 0).unwrap().unwrap();
        assert_eq!(logger.inject_token(), Some(Token::of::<Logger>()));

        assert!(registry.property_metadata(&COLUMN, &derived, "name").unwrap().is_none());
        assert!(registry.has_annotation(&derived, &COLUMN).unwrap());
    }

    #[test]
    #[traced_test]
    fn test_kind_mismatch() {
        let registry = Registry::new();
        let err = registry.class_metadata(&ROUTE, &Class::of::<Base>()).unwrap_err();

        assert!(matches!(
            err,
            AnnotationErrorKind::KindMismatch {
                name: "Route",
                getter: "method_metadata",
                ..
            }
        ));
    }

    #[test]
    #[traced_test]
    fn test_annotation_id() {
        let registry = Registry::new();

        assert!(matches!(
            registry.annotation_id(&ENTITY),
            Err(AnnotationErrorKind::InvalidAnnotation { name: "Entity" })
        ));

        registry.all_metadata(&Class::of::<Base>()).unwrap();
        let id = registry.annotation_id(&ENTITY).unwrap();
        assert_eq!(registry.annotation_id(&ENTITY).unwrap(), id);
        assert!(registry.annotation_id(&NEVER_USED).is_err());

        registry.clear();
        assert!(registry.annotation_id(&ENTITY).is_err());
    }

    #[test]
    #[traced_test]
    fn test_attach_invalidates_cache() {
        let registry = Registry::new();
        let base = Class::of::<Base>();

        assert!(registry.method_metadata(&NEVER_USED, &base, "list").unwrap().is_none());

        registry.attach(&base, &NEVER_USED, Member::Method("list".into()), ()).unwrap();
        assert!(registry.method_metadata(&NEVER_USED, &base, "list").unwrap().is_some());
        assert!(registry.has_annotation(&Class::of::<Derived>(), &NEVER_USED).unwrap());

        assert!(matches!(
            registry.attach(&base, &NEVER_USED, Member::Class, ()),
            Err(AnnotationErrorKind::NotApplicable { .. })
        ));
    }

    #[test]
    #[traced_test]
    fn test_tokens() {
        let registry = Registry::new();
        let derived = Class::of::<Derived>();

        assert_eq!(
            registry.constructor_tokens(&derived).unwrap(),
            [Token::of::<Logger>(), Token::of::<Config>()]
        );
        assert_eq!(
            registry.injected_properties(&derived).unwrap(),
            [PropertyInjection {
                key: "name".into(),
                token: Token::from("name"),
                is_mutable: false,
            }]
        );
        assert!(registry.intercepted_methods(&derived).unwrap().is_empty());
        assert_eq!(registry.signature(&derived, "list").unwrap(), None::<Signature>);
    }

    struct AuditLog;
    struct TraceLog;

    impl Injectable for AuditLog {
        fn construct(_: Arguments) -> Result<Self, InstantiateErrorKind> {
            Ok(Self)
        }
    }

    impl Interceptor for AuditLog {
        fn invoke(&self, method: Method) -> Outcome<(), InvokeErrorKind> {
            method.invoke().map(|_| ())
        }
    }

    impl Injectable for TraceLog {
        fn construct(_: Arguments) -> Result<Self, InstantiateErrorKind> {
            Ok(Self)
        }
    }

    impl Interceptor for TraceLog {
        fn invoke(&self, method: Method) -> Outcome<(), InvokeErrorKind> {
            method.invoke().map(|_| ())
        }
    }

    const AUDIT_LOG: Annotation = Annotation::interceptor::<AuditLog>("Log");
    const TRACE_LOG: Annotation = Annotation::interceptor::<TraceLog>("Log");

    struct Audited;

    impl Injectable for Audited {
        fn declare(class: &mut ClassBuilder<Self>) -> Result<(), AnnotationErrorKind> {
            class.method("run", &TRACE_LOG, "trace")?;
            Ok(())
        }

        fn construct(_: Arguments) -> Result<Self, InstantiateErrorKind> {
            Ok(Self)
        }
    }

    struct ReAudited;

    impl Injectable for ReAudited {
        fn declare(class: &mut ClassBuilder<Self>) -> Result<(), AnnotationErrorKind> {
            class.extends::<Audited>().method("run", &AUDIT_LOG, "audit")?;
            Ok(())
        }

        fn construct(_: Arguments) -> Result<Self, InstantiateErrorKind> {
            Ok(Self)
        }
    }

    #[test]
    #[traced_test]
    fn test_same_named_kinds_stay_distinct() {
        let registry = Registry::new();
        let audited = Class::of::<Audited>();

        assert_ne!(AUDIT_LOG, TRACE_LOG);
        assert!(registry.method_metadata(&AUDIT_LOG, &audited, "run").unwrap().is_none());
        assert!(!registry.has_annotation(&audited, &AUDIT_LOG).unwrap());

        let record = registry.method_metadata(&TRACE_LOG, &audited, "run").unwrap().unwrap();
        assert_eq!(record.args.get::<&str>(), Some(&"trace"));

        assert!(registry.annotation_id(&AUDIT_LOG).is_err());
        assert_ne!(registry.declare_annotation(&AUDIT_LOG), registry.annotation_id(&TRACE_LOG).unwrap());

        // The inherited kind isn't shadowed by a same-named kind of the subclass
        let methods = registry.intercepted_methods(&Class::of::<ReAudited>()).unwrap();
        assert_eq!(methods.len(), 1);
        let args: Vec<_> = methods[0].1.iter().map(|record| *record.args.get::<&str>().unwrap()).collect();
        assert_eq!(args, ["audit", "trace"]);
    }
}
