#[macro_use]
pub(crate) mod macros;

pub(crate) mod annotation;
pub(crate) mod any;
pub(crate) mod class;
pub(crate) mod config;
pub(crate) mod errors;
pub(crate) mod injector;
pub(crate) mod interceptor;
pub(crate) mod module;
pub(crate) mod outcome;
pub(crate) mod provider;
pub(crate) mod registry;
pub(crate) mod strategy;
pub(crate) mod token;

pub use annotation::{Annotation, AnnotationArgs, AnnotationRecord, Discriminant, Inject, Member, Signature, Target, CONSTRUCTOR, INJECT};
pub use any::{TypeInfo, Value};
pub use class::{Arguments, Class, ClassBuilder, Injectable, Property};
pub use config::Config;
pub use errors::{
    AnnotationErrorKind, InjectorErrorKind, InstantiateErrorKind, InstantiatorErrorKind, InvokeErrorKind, ModuleErrorKind,
    ResolveErrorKind,
};
pub use injector::Injector;
pub use interceptor::{Args, Interceptor, Interceptors, Method};
pub use module::{ModuleComposer, ModuleDeclaration, ModuleGraph, MODULE};
pub use outcome::Outcome;
pub use provider::{
    merge_favoring_left, merge_favoring_right, normalize_provider, normalize_providers, same_provider, Factory, ProviderKind,
    ProviderRecord,
};
pub use registry::{AnnotationId, Registry};
pub use strategy::{Awaiting, Blocking, Strategy};
pub use token::{Symbol, Token};
