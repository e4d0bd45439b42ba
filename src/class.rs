use std::{
    any::Any,
    borrow::Cow,
    cmp::Ordering,
    collections::BTreeMap,
    fmt::{self, Debug, Formatter},
    marker::PhantomData,
    sync::Arc,
};
use tracing::debug;

use crate::{
    annotation::{Annotation, AnnotationArgs, AnnotationRecord, Discriminant, Inject, Member, Signature, CONSTRUCTOR, INJECT},
    any::{TypeInfo, Value},
    errors::{AnnotationErrorKind, InstantiateErrorKind},
    interceptor::Interceptors,
    outcome::Outcome,
    token::Token,
};

/// Type the injector knows how to build.
///
/// Only `construct` is required. Everything else describes the class to the registry
/// or hooks into its lifecycle:
/// 1. `construct` receives the resolved constructor arguments
/// 2. `inject_property` is called for every injected property
/// 3. `install_interceptors` receives the interceptor chains of annotated methods
/// 4. `after_construct` runs once the instance is registered
pub trait Injectable: Sized + Send + Sync + 'static {
    /// Declares the class metadata: constructor tokens, annotations and method signatures.
    /// Called at most once per registry.
    ///
    /// # Errors
    /// Returns an error if an annotation is applied to a position it doesn't target
    #[allow(unused_variables)]
    fn declare(class: &mut ClassBuilder<Self>) -> Result<(), AnnotationErrorKind> {
        Ok(())
    }

    /// # Errors
    /// Returns an error if the instance can't be created from the arguments
    fn construct(args: Arguments) -> Result<Self, InstantiateErrorKind>;

    /// # Errors
    /// Returns an error if the property isn't known to the class
    fn inject_property(&mut self, property: Property) -> Result<(), InstantiateErrorKind> {
        Err(InstantiateErrorKind::UnknownProperty {
            class: TypeInfo::of::<Self>(),
            key: property.key,
        })
    }

    #[allow(unused_variables)]
    fn install_interceptors(&mut self, interceptors: Interceptors) {}

    /// Lifecycle hook. A pending outcome is awaited by async resolution
    /// and driven to completion by blocking resolution.
    fn after_construct(self: Arc<Self>) -> Outcome<(), InstantiateErrorKind> {
        Outcome::ok(())
    }
}

/// Type-erased handle of an [`Injectable`] type
#[derive(Clone, Copy)]
pub struct Class {
    type_info: TypeInfo,
    pub(crate) declare: fn() -> Result<ClassDeclaration, AnnotationErrorKind>,
    pub(crate) instantiate: fn(Instantiation) -> Result<Value, InstantiateErrorKind>,
    pub(crate) after_construct: fn(Value) -> Outcome<(), InstantiateErrorKind>,
}

impl Class {
    #[inline]
    #[must_use]
    pub fn of<T: Injectable>() -> Self {
        Self {
            type_info: TypeInfo::of::<T>(),
            declare: declare_class::<T>,
            instantiate: instantiate_class::<T>,
            after_construct: after_construct_class::<T>,
        }
    }

    #[inline]
    #[must_use]
    pub const fn type_info(&self) -> TypeInfo {
        self.type_info
    }

    #[inline]
    #[must_use]
    pub const fn token(&self) -> Token {
        Token::Type(self.type_info)
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.type_info.short_name()
    }
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        self.type_info == other.type_info
    }
}

impl Eq for Class {}

impl PartialOrd for Class {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Class {
    fn cmp(&self, other: &Self) -> Ordering {
        self.type_info.cmp(&other.type_info)
    }
}

impl Debug for Class {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Class").field(&self.type_info.name).finish()
    }
}

impl From<Class> for Token {
    fn from(class: Class) -> Self {
        class.token()
    }
}

fn declare_class<T: Injectable>() -> Result<ClassDeclaration, AnnotationErrorKind> {
    let mut builder = ClassBuilder::<T> {
        declaration: ClassDeclaration::new(TypeInfo::of::<T>()),
        _marker: PhantomData,
    };
    T::declare(&mut builder)?;

    debug!(
        class = builder.declaration.type_info.short_name(),
        records = builder.declaration.records.len(),
        "Class declared"
    );

    Ok(builder.declaration)
}

fn instantiate_class<T: Injectable>(instantiation: Instantiation) -> Result<Value, InstantiateErrorKind> {
    let Instantiation {
        args,
        properties,
        interceptors,
    } = instantiation;

    let mut instance = T::construct(args)?;
    for property in properties {
        instance.inject_property(property)?;
    }
    instance.install_interceptors(interceptors);

    Ok(Arc::new(instance))
}

fn after_construct_class<T: Injectable>(value: Value) -> Outcome<(), InstantiateErrorKind> {
    match value.downcast::<T>() {
        Ok(instance) => instance.after_construct(),
        Err(_) => Outcome::err(InstantiateErrorKind::IncorrectInstance {
            expected: TypeInfo::of::<T>(),
        }),
    }
}

/// Static description of one class, produced by [`Injectable::declare`]
#[derive(Clone)]
pub(crate) struct ClassDeclaration {
    pub(crate) type_info: TypeInfo,
    pub(crate) parent: Option<Class>,
    pub(crate) constructor: Vec<Token>,
    pub(crate) records: Vec<AnnotationRecord>,
    pub(crate) property_types: BTreeMap<Cow<'static, str>, Token>,
    pub(crate) signatures: BTreeMap<Cow<'static, str>, Signature>,
}

impl ClassDeclaration {
    pub(crate) fn new(type_info: TypeInfo) -> Self {
        Self {
            type_info,
            parent: None,
            constructor: Vec::new(),
            records: Vec::new(),
            property_types: BTreeMap::new(),
            signatures: BTreeMap::new(),
        }
    }

    /// # Errors
    /// Returns [`AnnotationErrorKind::NotApplicable`] if the kind doesn't target the member
    pub(crate) fn record(
        &self,
        annotation: &Annotation,
        member: Member,
        args: AnnotationArgs,
    ) -> Result<AnnotationRecord, AnnotationErrorKind> {
        let discriminant = member.discriminant();
        if !annotation.target().accepts(discriminant) {
            return Err(AnnotationErrorKind::NotApplicable {
                name: annotation.name(),
                discriminant,
                class: self.type_info,
            });
        }
        Ok(AnnotationRecord::new(*annotation, self.type_info, member, args))
    }

    /// Records of this class in lookup order:
    /// constructor parameters by index, then class records,
    /// then member records grouped by the member's first declaration.
    ///
    /// `attached` holds records added at runtime, they follow the declared ones.
    pub(crate) fn ordered_records(&self, attached: &[AnnotationRecord]) -> Vec<AnnotationRecord> {
        let mut records: Vec<AnnotationRecord> = self
            .records
            .iter()
            .chain(attached)
            .cloned()
            .map(|record| self.complete(record))
            .collect();

        for (index, token) in self.constructor.iter().enumerate() {
            let is_explicit = records
                .iter()
                .any(|record| record.annotation == INJECT && record.is_constructor_parameter() && record.param_index == Some(index));
            if is_explicit {
                continue;
            }

            let mut record = AnnotationRecord::new(
                INJECT,
                self.type_info,
                Member::constructor_parameter(index),
                AnnotationArgs::new(Inject::declared()),
            );
            record.declared_type = Some(token.clone());
            record.is_synthetic = true;
            records.push(record);
        }

        let mut members: Vec<Cow<'static, str>> = Vec::new();
        for record in &records {
            let is_member = !record.is_constructor_parameter() && record.discriminant != Discriminant::Constructor;
            if is_member && !members.contains(&record.property_key) {
                members.push(record.property_key.clone());
            }
        }

        // Stable, so records of one position keep their declaration order
        records.sort_by_key(|record| {
            if record.is_constructor_parameter() {
                (0, record.param_index.unwrap_or_default())
            } else if record.discriminant == Discriminant::Constructor {
                (1, 0)
            } else {
                let position = members
                    .iter()
                    .position(|key| *key == record.property_key)
                    .unwrap_or(members.len());
                (2, position)
            }
        });
        records
    }

    /// Fills the types known from the declaration into a record
    fn complete(&self, mut record: AnnotationRecord) -> AnnotationRecord {
        match (&record.member(), record.param_index) {
            (Member::Parameter { key, .. }, Some(index)) if key == CONSTRUCTOR => {
                if record.declared_type.is_none() {
                    record.declared_type = self.constructor.get(index).cloned();
                }
            }
            (Member::Parameter { key, .. }, Some(index)) => {
                if record.declared_type.is_none() {
                    record.declared_type = self
                        .signatures
                        .get(key)
                        .and_then(|signature| signature.params.get(index))
                        .cloned();
                }
            }
            (Member::Property(key), _) => {
                if record.declared_type.is_none() {
                    record.declared_type = self.property_types.get(key).cloned();
                }
            }
            (Member::Method(key), _) => {
                if let Some(signature) = self.signatures.get(key) {
                    record.param_types.clone_from(&signature.params);
                    record.return_type.clone_from(&signature.returns);
                }
            }
            _ => {}
        }
        record
    }
}

/// Collects the metadata of `T` inside [`Injectable::declare`]
pub struct ClassBuilder<T> {
    declaration: ClassDeclaration,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Injectable> ClassBuilder<T> {
    /// Inherits the records of `P` that `T` doesn't override
    pub fn extends<P: Injectable>(&mut self) -> &mut Self {
        self.declaration.parent = Some(Class::of::<P>());
        self
    }

    /// Declared constructor parameter types, in order
    pub fn constructor(&mut self, params: impl IntoIterator<Item = Token>) -> &mut Self {
        self.declaration.constructor = params.into_iter().collect();
        self
    }

    /// Declared method shape, read by interceptor chains and method records
    pub fn signature(&mut self, method: impl Into<Cow<'static, str>>, signature: Signature) -> &mut Self {
        self.declaration.signatures.insert(method.into(), signature);
        self
    }

    /// # Errors
    /// Returns an error if `annotation` doesn't target `member`
    pub fn annotate_member<A>(&mut self, annotation: &Annotation, member: Member, args: A) -> Result<&mut Self, AnnotationErrorKind>
    where
        A: Any + Send + Sync,
    {
        let record = self.declaration.record(annotation, member, AnnotationArgs::new(args))?;
        self.declaration.records.push(record);
        Ok(self)
    }

    /// # Errors
    /// Returns an error if `annotation` isn't a class annotation
    pub fn annotate<A>(&mut self, annotation: &Annotation, args: A) -> Result<&mut Self, AnnotationErrorKind>
    where
        A: Any + Send + Sync,
    {
        self.annotate_member(annotation, Member::Class, args)
    }

    /// Annotates constructor parameter `index`
    ///
    /// # Errors
    /// Returns an error if `annotation` isn't a parameter annotation
    pub fn parameter<A>(&mut self, index: usize, annotation: &Annotation, args: A) -> Result<&mut Self, AnnotationErrorKind>
    where
        A: Any + Send + Sync,
    {
        self.annotate_member(annotation, Member::constructor_parameter(index), args)
    }

    /// Annotates parameter `index` of `method`
    ///
    /// # Errors
    /// Returns an error if `annotation` isn't a parameter annotation
    pub fn method_parameter<A>(
        &mut self,
        method: impl Into<Cow<'static, str>>,
        index: usize,
        annotation: &Annotation,
        args: A,
    ) -> Result<&mut Self, AnnotationErrorKind>
    where
        A: Any + Send + Sync,
    {
        let member = Member::Parameter {
            key: method.into(),
            index,
        };
        self.annotate_member(annotation, member, args)
    }

    /// Annotates the property `key` of the declared type `declared`
    ///
    /// # Errors
    /// Returns an error if `annotation` isn't a property annotation
    pub fn property<A>(
        &mut self,
        key: impl Into<Cow<'static, str>>,
        declared: Token,
        annotation: &Annotation,
        args: A,
    ) -> Result<&mut Self, AnnotationErrorKind>
    where
        A: Any + Send + Sync,
    {
        let key = key.into();
        self.declaration.property_types.insert(key.clone(), declared);
        self.annotate_member(annotation, Member::Property(key), args)
    }

    /// # Errors
    /// Returns an error if `annotation` isn't a method annotation
    pub fn method<A>(&mut self, key: impl Into<Cow<'static, str>>, annotation: &Annotation, args: A) -> Result<&mut Self, AnnotationErrorKind>
    where
        A: Any + Send + Sync,
    {
        self.annotate_member(annotation, Member::Method(key.into()), args)
    }

    /// Overrides the token of constructor parameter `index`
    ///
    /// # Errors
    /// Never fails for the built-in kind, kept fallible to chain with other declarations
    pub fn inject_parameter(&mut self, index: usize, inject: Inject) -> Result<&mut Self, AnnotationErrorKind> {
        self.parameter(index, &INJECT, inject)
    }

    /// Injects the property `key` after construction
    ///
    /// # Errors
    /// Never fails for the built-in kind, kept fallible to chain with other declarations
    pub fn inject_property(&mut self, key: impl Into<Cow<'static, str>>, declared: Token, inject: Inject) -> Result<&mut Self, AnnotationErrorKind> {
        self.property(key, declared, &INJECT, inject)
    }
}

/// Resolved constructor or factory arguments, in declaration order
#[derive(Clone, Default)]
pub struct Arguments {
    values: Vec<Value>,
    tokens: Vec<Token>,
}

impl Arguments {
    #[inline]
    #[must_use]
    pub(crate) fn new(values: Vec<Value>, tokens: Vec<Token>) -> Self {
        Self { values, tokens }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn token(&self, index: usize) -> Option<&Token> {
        self.tokens.get(index)
    }

    /// # Errors
    /// Returns [`InstantiateErrorKind::MissingArgument`] if there is no argument at `index`
    pub fn value(&self, index: usize) -> Result<Value, InstantiateErrorKind> {
        self.values
            .get(index)
            .cloned()
            .ok_or(InstantiateErrorKind::MissingArgument { index })
    }

    /// # Errors
    /// Returns an error if the argument is missing or isn't a `T`
    pub fn get<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>, InstantiateErrorKind> {
        self.value(index)?
            .downcast::<T>()
            .map_err(|_| InstantiateErrorKind::IncorrectArgument {
                index,
                expected: TypeInfo::of::<T>(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }
}

impl Debug for Arguments {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arguments").field("tokens", &self.tokens).finish_non_exhaustive()
    }
}

/// Value injected into a property after construction
#[derive(Clone)]
pub struct Property {
    pub key: Cow<'static, str>,
    pub token: Token,
    pub value: Value,
    pub is_mutable: bool,
}

impl Property {
    /// # Errors
    /// Returns [`InstantiateErrorKind::IncorrectInstance`] if the value isn't a `T`
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, InstantiateErrorKind> {
        self.value
            .clone()
            .downcast::<T>()
            .map_err(|_| InstantiateErrorKind::IncorrectInstance {
                expected: TypeInfo::of::<T>(),
            })
    }
}

impl Debug for Property {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("is_mutable", &self.is_mutable)
            .finish_non_exhaustive()
    }
}

pub(crate) struct Instantiation {
    pub(crate) args: Arguments,
    pub(crate) properties: Vec<Property>,
    pub(crate) interceptors: Interceptors,
}
