use injex::{
    AnnotationErrorKind, Arguments, ClassBuilder, Config, Inject, Injectable, Injector, InstantiateErrorKind, Outcome,
    Property, ProviderRecord, Registry, ResolveErrorKind, Token,
};

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing_test::traced_test;

struct AService;

impl Injectable for AService {
    fn construct(_: Arguments) -> Result<Self, InstantiateErrorKind> {
        Ok(Self)
    }
}

struct BService {
    a: Arc<AService>,
    value: Arc<&'static str>,
}

impl Injectable for BService {
    fn declare(class: &mut ClassBuilder<Self>) -> Result<(), AnnotationErrorKind> {
        class.constructor([Token::of::<AService>(), Token::of::<&'static str>()]);
        class.inject_parameter(1, Inject::token("value"))?;
        Ok(())
    }

    fn construct(args: Arguments) -> Result<Self, InstantiateErrorKind> {
        Ok(Self {
            a: args.get(0)?,
            value: args.get(1)?,
        })
    }
}

struct Repository {
    table: Option<Arc<String>>,
    ready: AtomicBool,
}

impl Injectable for Repository {
    fn declare(class: &mut ClassBuilder<Self>) -> Result<(), AnnotationErrorKind> {
        class.inject_property("table", Token::of::<String>(), Inject::token("table").mutable())?;
        Ok(())
    }

    fn construct(_: Arguments) -> Result<Self, InstantiateErrorKind> {
        Ok(Self {
            table: None,
            ready: AtomicBool::new(false),
        })
    }

    fn inject_property(&mut self, property: Property) -> Result<(), InstantiateErrorKind> {
        match &*property.key {
            "table" => {
                assert!(property.is_mutable);
                self.table = Some(property.get()?);
                Ok(())
            }
            _ => Err(InstantiateErrorKind::UnknownProperty {
                class: injex::TypeInfo::of::<Self>(),
                key: property.key,
            }),
        }
    }

    fn after_construct(self: Arc<Self>) -> Outcome<(), InstantiateErrorKind> {
        assert!(self.table.is_some());
        self.ready.store(true, Ordering::SeqCst);
        Outcome::ok(())
    }
}

struct Warmed {
    warm: AtomicBool,
}

impl Injectable for Warmed {
    fn construct(_: Arguments) -> Result<Self, InstantiateErrorKind> {
        Ok(Self {
            warm: AtomicBool::new(false),
        })
    }

    fn after_construct(self: Arc<Self>) -> Outcome<(), InstantiateErrorKind> {
        Outcome::pending(async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            self.warm.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

struct Failing;

impl Injectable for Failing {
    fn construct(_: Arguments) -> Result<Self, InstantiateErrorKind> {
        Err(anyhow::anyhow!("Connection refused").into())
    }
}

fn isolated() -> Injector {
    Injector::new_with_config(Arc::new(Registry::new()), Config::default())
}

#[test]
#[traced_test]
fn test_constructor_injection() {
    let injector = Injector::create_and_resolve(
        ProviderRecord::class::<BService>(),
        vec![ProviderRecord::class::<AService>(), ProviderRecord::value("value", "fancy")],
    )
    .unwrap();

    let b = injector.get_type::<BService>().unwrap();
    assert!(Arc::ptr_eq(&b.a, &injector.get_type::<AService>().unwrap()));
    assert_eq!(*b.value, "fancy");
    assert_eq!(injector.name(), Some(Token::of::<BService>()));
}

#[test]
#[traced_test]
fn test_idempotent_resolution() {
    let injector = isolated();

    let first = injector.resolve(ProviderRecord::class::<AService>(), Vec::new()).unwrap();
    let second = injector.resolve(ProviderRecord::class::<AService>(), Vec::new()).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
#[traced_test]
fn test_hierarchical_lookup() {
    let parent = isolated();
    parent.resolve(ProviderRecord::class::<AService>(), Vec::new()).unwrap();

    let child = Injector::create_and_resolve_child(&parent, ProviderRecord::value("value", "child"), Vec::new()).unwrap();

    assert!(Arc::ptr_eq(
        &child.get_type::<AService>().unwrap(),
        &parent.get_type::<AService>().unwrap()
    ));
    assert!(parent.get(&Token::from("value"), None).is_err());
    assert_eq!(parent.children(), [child]);
}

#[test]
#[traced_test]
fn test_child_constructs_with_parent_dependencies() {
    let parent = isolated();
    parent.resolve(ProviderRecord::class::<AService>(), Vec::new()).unwrap();

    let child = parent.child();
    child
        .resolve(
            ProviderRecord::class::<BService>(),
            vec![ProviderRecord::value("value", "nested")],
        )
        .unwrap();

    let b = child.get_type::<BService>().unwrap();
    assert!(Arc::ptr_eq(&b.a, &parent.get_type::<AService>().unwrap()));
    assert!(!parent.has(&Token::of::<BService>()));
}

#[test]
#[traced_test]
fn test_missing_dependency() {
    let injector = isolated();
    injector.set_name(Token::from("app")).unwrap();

    let err = injector
        .resolve(ProviderRecord::class::<BService>(), vec![ProviderRecord::class::<AService>()])
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "No provider for \"value\". Requested by BService in injector \"app\""
    );
    // Siblings resolved before the failure stay registered
    assert!(injector.has(&Token::of::<AService>()));
    assert!(!injector.has(&Token::of::<BService>()));
}

#[test]
#[traced_test]
fn test_property_injection_and_hook() {
    let injector = isolated();

    injector
        .resolve(
            ProviderRecord::class::<Repository>(),
            vec![ProviderRecord::value("table", String::from("users"))],
        )
        .unwrap();

    let repository = injector.get_type::<Repository>().unwrap();
    assert_eq!(repository.table.as_deref().map(String::as_str), Some("users"));
    assert!(repository.ready.load(Ordering::SeqCst));
}

#[test]
#[traced_test]
fn test_construct_failure() {
    let injector = isolated();

    let err = injector.resolve(ProviderRecord::class::<Failing>(), Vec::new()).unwrap_err();

    assert!(matches!(
        err,
        ResolveErrorKind::Instantiator(injex::InstantiatorErrorKind::Factory(InstantiateErrorKind::Custom(_)))
    ));
    assert_eq!(err.to_string(), "Connection refused");
    assert!(!injector.has(&Token::of::<Failing>()));
}

#[tokio::test]
#[traced_test]
async fn test_async_hook() {
    let injector = Injector::create_and_resolve_async(ProviderRecord::class::<Warmed>(), Vec::new())
        .await
        .unwrap();

    assert!(injector.get_type::<Warmed>().unwrap().warm.load(Ordering::SeqCst));
}

#[test]
#[traced_test]
fn test_blocking_drives_async_factories() {
    let injector = isolated();

    let value = injector
        .resolve(
            ProviderRecord::async_factory("answer", [], |_| async { Ok::<_, InstantiateErrorKind>(42u8) }),
            Vec::new(),
        )
        .unwrap();

    assert_eq!(*value.downcast::<u8>().unwrap(), 42);
}

#[test]
#[traced_test]
fn test_destroy_is_idempotent() {
    let parent = isolated();
    let child = parent.child();
    child.resolve(ProviderRecord::class::<AService>(), Vec::new()).unwrap();

    child.destroy();
    assert!(child.parent().is_none());
    child.destroy();
    assert!(child.parent().is_none());

    assert!(!child.has(&Token::of::<AService>()));
    assert!(parent.children().is_empty());
}
