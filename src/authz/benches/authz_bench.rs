//! Authorization engine benchmarks
//!
//! Cached checks, cold loads through the in-memory store, and raw
//! settling of rule chains of growing size.

use std::collections::BTreeSet;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use wikisec_authz::{
    AuthorizationConfig, AuthorizationManager, AuthorizationSettler, DefaultAuthorizationSettler,
    InMemorySecurityStore, RuleSource, SecurityRule, StandardRight,
};
use wikisec_core::{EntityReference, SecurityReference, UserSecurityReference};

fn setup(rules_per_level: usize) -> (AuthorizationManager, Arc<InMemorySecurityStore>) {
    let store = Arc::new(InMemorySecurityStore::new());
    let manager = AuthorizationManager::with_store(AuthorizationConfig::default(), store.clone()).unwrap();

    let document = entity(&manager, "dev:Projects.Rust.Roadmap");
    let edit = manager.registry().standard(StandardRight::Edit);
    for level in document.chain() {
        for i in 0..rules_per_level {
            let other = user(&manager, &format!("xwiki:XWiki.User{}", i));
            let rule = if i % 2 == 0 {
                SecurityRule::allow([edit.clone()])
            } else {
                SecurityRule::deny([edit.clone()])
            };
            store.add_rules(&level, rule.for_user(other));
        }
    }

    (manager, store)
}

fn entity(manager: &AuthorizationManager, raw: &str) -> SecurityReference {
    let raw: EntityReference = raw.parse().unwrap();
    manager.factory().new_entity_reference(Some(&raw)).unwrap()
}

fn user(manager: &AuthorizationManager, raw: &str) -> UserSecurityReference {
    UserSecurityReference::new(entity(manager, raw)).unwrap()
}

fn bench_cached_check(c: &mut Criterion) {
    let (manager, _store) = setup(10);
    let edit = manager.registry().standard(StandardRight::Edit);
    let alice = user(&manager, "xwiki:XWiki.Alice");
    let document = entity(&manager, "dev:Projects.Rust.Roadmap");
    manager.has_security_access(&edit, &alice, &document).unwrap();

    c.bench_function("cached_check", |b| {
        b.iter(|| {
            manager
                .has_security_access(black_box(&edit), black_box(&alice), black_box(&document))
                .unwrap()
        })
    });
}

fn bench_cold_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("cold_check");

    for rules in [1, 10, 100] {
        group.bench_with_input(BenchmarkId::new("rules_per_level", rules), &rules, |b, &rules| {
            let (manager, _store) = setup(rules);
            let edit = manager.registry().standard(StandardRight::Edit);
            let alice = user(&manager, "xwiki:XWiki.Alice");
            let document = entity(&manager, "dev:Projects.Rust.Roadmap");

            b.iter(|| {
                manager.invalidator().invalidate_all();
                manager.has_security_access(&edit, &alice, &document).unwrap()
            })
        });
    }

    group.finish();
}

fn bench_settle(c: &mut Criterion) {
    let mut group = c.benchmark_group("settle");

    for rules in [1, 10, 100] {
        let (manager, store) = setup(rules);
        let document = entity(&manager, "dev:Projects.Rust.Roadmap");
        let chain: Vec<_> = document
            .chain()
            .iter()
            .map(|level| Arc::new(store.read_rules(level).unwrap()))
            .collect();
        let settler = DefaultAuthorizationSettler::new(manager.registry().clone());
        let subject = user(&manager, "xwiki:XWiki.User3");
        let groups = BTreeSet::new();

        group.bench_with_input(BenchmarkId::new("rules_per_level", rules), &chain, |b, chain| {
            b.iter(|| settler.settle(black_box(&subject), &groups, black_box(chain)))
        });
    }

    group.finish();
}

fn bench_parallel_checks(c: &mut Criterion) {
    let (manager, _store) = setup(10);
    let manager = Arc::new(manager);
    let view = manager.registry().standard(StandardRight::View);
    let users: Vec<_> = (0..8)
        .map(|i| user(&manager, &format!("xwiki:XWiki.User{}", i)))
        .collect();
    let document = entity(&manager, "dev:Projects.Rust.Roadmap");

    c.bench_function("parallel_checks_8_threads", |b| {
        b.iter(|| {
            std::thread::scope(|scope| {
                for user in &users {
                    let manager = &manager;
                    let view = &view;
                    let document = &document;
                    scope.spawn(move || {
                        for _ in 0..100 {
                            manager.has_security_access(view, user, document).unwrap();
                        }
                    });
                }
            })
        })
    });
}

criterion_group!(
    benches,
    bench_cached_check,
    bench_cold_check,
    bench_settle,
    bench_parallel_checks
);
criterion_main!(benches);
