use std::{
    any::Any,
    borrow::Cow,
    fmt::{self, Debug, Display, Formatter},
    sync::Arc,
};

use crate::{
    any::{TypeInfo, Value},
    class::{Class, Injectable},
    interceptor::Interceptor,
    token::Token,
};

/// Member key of constructor-level records
pub const CONSTRUCTOR: &str = "constructor";

/// Built-in kind that overrides the token injected into a parameter or property.
/// Its arguments are [`Inject`].
pub const INJECT: Annotation = Annotation::parameter_and_property::<Inject>("Inject");

/// Syntactic position a record was declared on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Discriminant {
    Constructor,
    Property,
    Parameter,
    Method,
}

impl Display for Discriminant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Constructor => "class",
            Self::Property => "property",
            Self::Parameter => "parameter",
            Self::Method => "method",
        })
    }
}

/// Positions an annotation kind may be declared on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Target {
    Class,
    Property,
    Parameter,
    Method,
    ParameterAndProperty,
}

impl Target {
    #[inline]
    #[must_use]
    pub const fn accepts(self, discriminant: Discriminant) -> bool {
        matches!(
            (self, discriminant),
            (Self::Class, Discriminant::Constructor)
                | (Self::Property | Self::ParameterAndProperty, Discriminant::Property)
                | (Self::Parameter | Self::ParameterAndProperty, Discriminant::Parameter)
                | (Self::Method, Discriminant::Method)
        )
    }

    /// Name of the registry getter that reads records of this target
    pub(crate) const fn getter(self) -> &'static str {
        match self {
            Self::Class => "class_metadata",
            Self::Property => "property_metadata",
            Self::Parameter => "parameter_metadata",
            Self::Method => "method_metadata",
            Self::ParameterAndProperty => "parameter_metadata` or `property_metadata",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct AnnotationKey {
    origin: TypeInfo,
    name: &'static str,
    target: Target,
}

/// Ties an interceptor kind to the class implementing it
#[derive(Clone, Copy)]
pub(crate) struct InterceptorBinding {
    pub(crate) class: fn() -> Class,
    pub(crate) cast: fn(Value) -> Option<Arc<dyn Interceptor>>,
}

/// Annotation kind.
///
/// Kinds are plain constants, identified by the type that owns them, their name and target.
/// Kinds of different owners never collide, even under the same name:
/// ```
/// use injex::Annotation;
///
/// struct Http;
/// struct Rpc;
///
/// const CONTROLLER: Annotation = Annotation::class::<Http>("Controller");
/// const ROUTE: Annotation = Annotation::method::<Http>("Route");
/// const RPC_ROUTE: Annotation = Annotation::method::<Rpc>("Route");
///
/// assert_ne!(CONTROLLER, ROUTE);
/// assert_ne!(ROUTE, RPC_ROUTE);
/// ```
#[derive(Clone, Copy)]
pub struct Annotation {
    origin: fn() -> TypeInfo,
    name: &'static str,
    target: Target,
    interceptor: Option<InterceptorBinding>,
}

impl Annotation {
    #[inline]
    #[must_use]
    const fn new<O: ?Sized + 'static>(name: &'static str, target: Target) -> Self {
        Self {
            origin: TypeInfo::of::<O>,
            name,
            target,
            interceptor: None,
        }
    }

    /// Class kind owned by `O`
    #[inline]
    #[must_use]
    pub const fn class<O: ?Sized + 'static>(name: &'static str) -> Self {
        Self::new::<O>(name, Target::Class)
    }

    #[inline]
    #[must_use]
    pub const fn property<O: ?Sized + 'static>(name: &'static str) -> Self {
        Self::new::<O>(name, Target::Property)
    }

    #[inline]
    #[must_use]
    pub const fn parameter<O: ?Sized + 'static>(name: &'static str) -> Self {
        Self::new::<O>(name, Target::Parameter)
    }

    #[inline]
    #[must_use]
    pub const fn method<O: ?Sized + 'static>(name: &'static str) -> Self {
        Self::new::<O>(name, Target::Method)
    }

    #[inline]
    #[must_use]
    pub const fn parameter_and_property<O: ?Sized + 'static>(name: &'static str) -> Self {
        Self::new::<O>(name, Target::ParameterAndProperty)
    }

    /// Method kind whose records wrap the method with an `I` instance.
    /// The kind is owned by `I` and `I` is resolved in the injector that owns the intercepted instance.
    #[inline]
    #[must_use]
    pub const fn interceptor<I>(name: &'static str) -> Self
    where
        I: Interceptor + Injectable,
    {
        Self {
            origin: TypeInfo::of::<I>,
            name,
            target: Target::Method,
            interceptor: Some(InterceptorBinding {
                class: Class::of::<I>,
                cast: cast_interceptor::<I>,
            }),
        }
    }

    /// Type owning the kind
    #[inline]
    #[must_use]
    pub fn origin(&self) -> TypeInfo {
        (self.origin)()
    }

    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    #[must_use]
    pub const fn target(&self) -> Target {
        self.target
    }

    #[inline]
    #[must_use]
    pub const fn is_interceptor(&self) -> bool {
        self.interceptor.is_some()
    }

    #[inline]
    pub(crate) const fn binding(&self) -> Option<InterceptorBinding> {
        self.interceptor
    }

    #[inline]
    pub(crate) fn key(&self) -> AnnotationKey {
        AnnotationKey {
            origin: self.origin(),
            name: self.name,
            target: self.target,
        }
    }
}

impl PartialEq for Annotation {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Annotation {}

impl Debug for Annotation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "@{}({:?}) of {}", self.name, self.target, self.origin())
    }
}

fn cast_interceptor<I: Interceptor>(value: Value) -> Option<Arc<dyn Interceptor>> {
    value.downcast::<I>().ok().map(|interceptor| interceptor as Arc<dyn Interceptor>)
}

/// Arguments attached to a record, opaque to the registry
#[derive(Clone, Default)]
pub struct AnnotationArgs(Option<Value>);

impl AnnotationArgs {
    #[inline]
    #[must_use]
    pub fn new<T: Any + Send + Sync>(args: T) -> Self {
        Self(Some(Arc::new(args)))
    }

    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self(None)
    }

    #[inline]
    #[must_use]
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|args| args.downcast_ref())
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

impl Debug for AnnotationArgs {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_empty() { "AnnotationArgs(None)" } else { "AnnotationArgs(..)" })
    }
}

/// Arguments of [`INJECT`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inject {
    /// Token to inject instead of the declared type
    pub token: Option<Token>,
    /// Whether the injected provider may be registered again
    pub is_mutable: bool,
}

impl Inject {
    #[inline]
    #[must_use]
    pub fn token(token: impl Into<Token>) -> Self {
        Self {
            token: Some(token.into()),
            is_mutable: false,
        }
    }

    /// Injects the declared type of the member
    #[inline]
    #[must_use]
    pub fn declared() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn mutable(mut self) -> Self {
        self.is_mutable = true;
        self
    }
}

/// Declared shape of a method
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Token>,
    pub returns: Option<Token>,
    pub is_async: bool,
}

impl Signature {
    #[inline]
    #[must_use]
    pub fn new(params: impl IntoIterator<Item = Token>) -> Self {
        Self {
            params: params.into_iter().collect(),
            returns: None,
            is_async: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn returning(mut self, token: impl Into<Token>) -> Self {
        self.returns = Some(token.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }
}

/// Member a record is attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Member {
    Class,
    Property(Cow<'static, str>),
    /// Parameter `index` of the method `key`, [`CONSTRUCTOR`] for constructor parameters
    Parameter { key: Cow<'static, str>, index: usize },
    Method(Cow<'static, str>),
}

impl Member {
    #[inline]
    #[must_use]
    pub fn constructor_parameter(index: usize) -> Self {
        Self::Parameter {
            key: Cow::Borrowed(CONSTRUCTOR),
            index,
        }
    }

    #[inline]
    #[must_use]
    pub const fn discriminant(&self) -> Discriminant {
        match self {
            Self::Class => Discriminant::Constructor,
            Self::Property(_) => Discriminant::Property,
            Self::Parameter { .. } => Discriminant::Parameter,
            Self::Method(_) => Discriminant::Method,
        }
    }
}

/// One annotation application, as stored by the registry
#[derive(Clone)]
pub struct AnnotationRecord {
    pub annotation: Annotation,
    /// Class the record was declared on, an ancestor for inherited records
    pub target: TypeInfo,
    pub discriminant: Discriminant,
    pub property_key: Cow<'static, str>,
    pub param_index: Option<usize>,
    pub args: AnnotationArgs,
    pub declared_type: Option<Token>,
    pub param_types: Vec<Token>,
    pub return_type: Option<Token>,
    /// Synthesized from the declared constructor instead of an explicit annotation
    pub is_synthetic: bool,
}

pub(crate) type RecordIdentity = (AnnotationKey, Discriminant, Cow<'static, str>, Option<usize>);

impl AnnotationRecord {
    pub(crate) fn new(annotation: Annotation, target: TypeInfo, member: Member, args: AnnotationArgs) -> Self {
        let discriminant = member.discriminant();
        let (property_key, param_index) = match member {
            Member::Class => (Cow::Borrowed(CONSTRUCTOR), None),
            Member::Property(key) | Member::Method(key) => (key, None),
            Member::Parameter { key, index } => (key, Some(index)),
        };
        Self {
            annotation,
            target,
            discriminant,
            property_key,
            param_index,
            args,
            declared_type: None,
            param_types: Vec::new(),
            return_type: None,
            is_synthetic: false,
        }
    }

    #[must_use]
    pub fn member(&self) -> Member {
        match (self.discriminant, self.param_index) {
            (Discriminant::Constructor, _) => Member::Class,
            (Discriminant::Property, _) => Member::Property(self.property_key.clone()),
            (Discriminant::Method, _) => Member::Method(self.property_key.clone()),
            (Discriminant::Parameter, index) => Member::Parameter {
                key: self.property_key.clone(),
                index: index.unwrap_or_default(),
            },
        }
    }

    #[inline]
    pub(crate) fn identity(&self) -> RecordIdentity {
        (
            self.annotation.key(),
            self.discriminant,
            self.property_key.clone(),
            self.param_index,
        )
    }

    #[inline]
    pub(crate) fn is_constructor_parameter(&self) -> bool {
        self.discriminant == Discriminant::Parameter && self.property_key == CONSTRUCTOR
    }

    /// Token to inject for an [`INJECT`] record, explicit token first
    #[must_use]
    pub fn inject_token(&self) -> Option<Token> {
        self.args
            .get::<Inject>()
            .and_then(|inject| inject.token.clone())
            .or_else(|| self.declared_type.clone())
    }
}

impl Debug for AnnotationRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotationRecord")
            .field("annotation", &self.annotation)
            .field("target", &self.target.short_name())
            .field("discriminant", &self.discriminant)
            .field("property_key", &self.property_key)
            .field("param_index", &self.param_index)
            .field("declared_type", &self.declared_type)
            .field("is_synthetic", &self.is_synthetic)
            .finish_non_exhaustive()
    }
}
