#![allow(dead_code)]

use criterion::{criterion_group, criterion_main, Criterion};
use injex::{Arguments, ClassBuilder, Injectable, Injector, InstantiateErrorKind, ProviderRecord, Token};
use std::sync::Arc;

struct A(Arc<B>, Arc<C>);
struct B(Arc<i32>);
struct C(Arc<CA>);
struct CA(Arc<CAA>);
struct CAA;

impl Injectable for A {
    fn declare(class: &mut ClassBuilder<Self>) -> Result<(), injex::AnnotationErrorKind> {
        class.constructor([Token::of::<B>(), Token::of::<C>()]);
        Ok(())
    }

    fn construct(args: Arguments) -> Result<Self, InstantiateErrorKind> {
        Ok(Self(args.get(0)?, args.get(1)?))
    }
}

impl Injectable for B {
    fn declare(class: &mut ClassBuilder<Self>) -> Result<(), injex::AnnotationErrorKind> {
        class.constructor([Token::name("answer")]);
        Ok(())
    }

    fn construct(args: Arguments) -> Result<Self, InstantiateErrorKind> {
        Ok(Self(args.get(0)?))
    }
}

impl Injectable for C {
    fn declare(class: &mut ClassBuilder<Self>) -> Result<(), injex::AnnotationErrorKind> {
        class.constructor([Token::of::<CA>()]);
        Ok(())
    }

    fn construct(args: Arguments) -> Result<Self, InstantiateErrorKind> {
        Ok(Self(args.get(0)?))
    }
}

impl Injectable for CA {
    fn declare(class: &mut ClassBuilder<Self>) -> Result<(), injex::AnnotationErrorKind> {
        class.constructor([Token::of::<CAA>()]);
        Ok(())
    }

    fn construct(args: Arguments) -> Result<Self, InstantiateErrorKind> {
        Ok(Self(args.get(0)?))
    }
}

impl Injectable for CAA {
    fn construct(_: Arguments) -> Result<Self, InstantiateErrorKind> {
        Ok(Self)
    }
}

#[inline]
fn providers() -> Vec<ProviderRecord> {
    vec![
        ProviderRecord::value("answer", 42i32),
        ProviderRecord::class::<CAA>(),
        ProviderRecord::class::<CA>(),
        ProviderRecord::class::<C>(),
        ProviderRecord::class::<B>(),
    ]
}

#[inline]
fn injector_create_and_resolve() {
    let _ = Injector::create_and_resolve(ProviderRecord::class::<A>(), providers()).unwrap();
}

#[inline]
fn injector_child_hierarchy(root: &Injector) {
    let child = root.child();
    let grandchild = child.child();
    let _ = grandchild.get_type::<A>().unwrap();
    grandchild.destroy();
    child.destroy();
}

#[inline]
fn injector_get(injector: &Injector) {
    let _ = injector.get_type::<A>().unwrap();
}

fn criterion_benchmark(c: &mut Criterion) {
    let root = Injector::create_and_resolve(ProviderRecord::class::<A>(), providers()).unwrap();
    let leaf = root.child().child().child();

    c.bench_function("injector_create_and_resolve", |b| b.iter(injector_create_and_resolve))
        .bench_function("injector_child_hierarchy", |b| b.iter(|| injector_child_hierarchy(&root)))
        .bench_function("injector_get", |b| b.iter(|| injector_get(&root)))
        .bench_function("injector_get_from_leaf", |b| b.iter(|| injector_get(&leaf)));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
