//! Integration tests
//!
//! Configuration files, JSON fixtures, metrics export and concurrent use
//! of one manager from many threads and tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use tracing_subscriber::EnvFilter;

use wikisec_authz::{
    AuthorizationConfig, AuthorizationManager, InMemorySecurityStore, Right, SecurityRule,
    StandardRight,
};
use wikisec_core::EntityReference;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn doc(raw: &str) -> EntityReference {
    raw.parse().unwrap()
}

fn seeded(config: AuthorizationConfig, json: &str) -> (Arc<AuthorizationManager>, Arc<InMemorySecurityStore>) {
    init_tracing();
    let store = Arc::new(InMemorySecurityStore::new());
    let manager = AuthorizationManager::with_store(config, store.clone()).unwrap();
    store
        .load_json(json, manager.factory(), manager.registry())
        .unwrap();
    (Arc::new(manager), store)
}

const FIXTURE: &str = r#"{
    "rules": [
        {
            "entity": { "wiki": "xwiki", "spaces": ["Private"] },
            "state": "deny",
            "rights": ["view"],
            "groups": ["xwiki:XWiki.XWikiAllGroup"]
        },
        {
            "entity": { "wiki": "xwiki", "spaces": ["Private"] },
            "state": "allow",
            "rights": ["view", "edit"],
            "groups": ["xwiki:XWiki.Board"]
        },
        {
            "entity": { "wiki": "xwiki", "spaces": ["Private"], "document": "Minutes" },
            "state": "allow",
            "rights": ["view"],
            "users": ["xwiki:XWiki.Carol"]
        }
    ],
    "groups": [
        { "group": "xwiki:XWiki.XWikiAllGroup", "users": ["xwiki:XWiki.Alice", "xwiki:XWiki.Carol", "xwiki:XWiki.Dave"] },
        { "group": "xwiki:XWiki.Board", "users": ["xwiki:XWiki.Bob", "xwiki:XWiki.Dave"] }
    ],
    "owners": [{ "wiki": "team", "owner": "xwiki:XWiki.Alice" }],
    "needs_authentication": ["comment"]
}"#;

// ============================================================================
// FIXTURES AND CONFIGURATION
// ============================================================================

#[test]
fn test_json_fixture_end_to_end() {
    let (manager, _store) = seeded(AuthorizationConfig::default(), FIXTURE);
    let view = manager.right("view");
    let edit = manager.right("edit");
    let check = |right: &Right, user: &str, document: &str| {
        manager
            .has_access(right, Some(&doc(user)), Some(&doc(document)))
            .unwrap()
    };

    assert!(!check(&view, "xwiki:XWiki.Alice", "Private.Budget"));
    assert!(check(&view, "xwiki:XWiki.Bob", "Private.Budget"));
    assert!(check(&edit, "xwiki:XWiki.Bob", "Private.Budget"));
    // Allow and deny through groups at the same level: view ties to deny
    assert!(!check(&view, "xwiki:XWiki.Dave", "Private.Budget"));
    assert!(check(&edit, "xwiki:XWiki.Dave", "Private.Budget"));
    // A document rule settles before the space deny
    assert!(check(&view, "xwiki:XWiki.Carol", "Private.Minutes"));
    assert!(!check(&view, "xwiki:XWiki.Carol", "Private.Budget"));

    assert!(check(&manager.right("admin"), "xwiki:XWiki.Alice", "team:Main.WebHome"));
    assert!(!manager
        .has_access(&manager.right("comment"), None, Some(&doc("Main.WebHome")))
        .unwrap());
}

#[test]
fn test_manager_from_config_file() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[engine]
main_wiki = "main"
superadmin_name = "root"
superadmin_excluded_rights = ["programming"]

[cache]
capacity = 128

[metrics]
enabled = false

[[rights]]
name = "approve"
default_state = "deny"
tie_resolution_policy = "deny"
inheritance_override_policy = true
targeted_entity_types = ["wiki", "space", "document"]
implied_by = ["admin"]
"#
    )
    .unwrap();

    let config = AuthorizationConfig::load(file.path()).unwrap();
    let (manager, store) = seeded(
        config,
        r#"{ "owners": [{ "wiki": "ops", "owner": "main:XWiki.Dana" }] }"#,
    );

    let approve = manager.right("approve");
    assert!(!approve.is_illegal());
    assert_eq!(manager.factory().main_wiki(), "main");
    assert_eq!(manager.cache().capacity(), 128);

    let dana = doc("main:XWiki.Dana");
    assert!(manager.has_access(&approve, Some(&dana), Some(&doc("ops:Runbooks.Deploy"))).unwrap());
    assert!(!manager.has_access(&approve, Some(&dana), Some(&doc("main:Runbooks.Deploy"))).unwrap());

    let root = doc("main:XWiki.root");
    assert!(manager.has_access(&approve, Some(&root), None).unwrap());
    assert!(!manager
        .has_access(&manager.right("programming"), Some(&root), None)
        .unwrap());

    // Metrics disabled in the file
    assert_eq!(manager.metrics().snapshot().total_checks, 0);
    assert!(store.read_count() > 0);
}

#[test]
fn test_invalid_configuration_is_rejected() {
    let mut config = AuthorizationConfig::from_toml_str(
        r#"
[[rights]]
name = "approve"
default_state = "deny"
tie_resolution_policy = "deny"
inheritance_override_policy = true
implied_by = ["no-such-right"]
"#,
    )
    .unwrap();
    assert!(AuthorizationManager::with_store(config.clone(), Arc::new(InMemorySecurityStore::new())).is_err());

    config.rights.clear();
    config.cache.capacity = 0;
    assert!(AuthorizationManager::with_store(config, Arc::new(InMemorySecurityStore::new())).is_err());
}

#[test]
fn test_metrics_export() {
    let (manager, _store) = seeded(AuthorizationConfig::default(), FIXTURE);
    let view = manager.right("view");
    for _ in 0..3 {
        manager
            .has_access(&view, Some(&doc("xwiki:XWiki.Alice")), Some(&doc("Private.Budget")))
            .unwrap();
    }

    let snapshot = manager.metrics().snapshot();
    assert_eq!(snapshot.total_checks, 3);
    assert_eq!(snapshot.denied_decisions, 3);
    assert_eq!(snapshot.cache_hits, 2);

    let text = manager.metrics().export_prometheus();
    assert!(text.contains("wikisec_checks_total 3"));
    assert!(text.contains("wikisec_cache_misses_total 1"));
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_concurrent_checks_with_invalidation() {
    let (manager, store) = seeded(AuthorizationConfig::default(), FIXTURE);
    let script = manager.registry().standard(StandardRight::Script);
    let space = manager
        .factory()
        .new_entity_reference(Some(&EntityReference::space("xwiki", ["Sandbox"])))
        .unwrap();
    let alice = manager
        .factory()
        .new_user_reference(Some(&doc("xwiki:XWiki.Alice")))
        .unwrap();
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        for worker in 0..8 {
            let manager = &manager;
            let script = &script;
            let done = &done;
            scope.spawn(move || {
                let mut i = 0;
                while !done.load(Ordering::SeqCst) {
                    let page = doc(&format!("Sandbox.Page{}", (worker + i) % 5));
                    manager
                        .has_access(script, Some(&doc("xwiki:XWiki.Alice")), Some(&page))
                        .unwrap();
                    i += 1;
                }
            });
        }

        for round in 0..50 {
            if round % 2 == 0 {
                store.set_rules(&space, vec![SecurityRule::allow([script.clone()]).for_user(alice.clone())]);
            } else {
                store.clear_rules(&space);
            }
            manager.invalidator().rules_changed(&space);
        }
        done.store(true, Ordering::SeqCst);
    });

    // Round 49 cleared the rules; no stale allow may survive
    for page in 0..5 {
        assert!(!manager
            .has_access(&script, Some(&doc("xwiki:XWiki.Alice")), Some(&doc(&format!("Sandbox.Page{}", page))))
            .unwrap());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_checks_from_async_tasks() {
    let (manager, _store) = seeded(AuthorizationConfig::default(), FIXTURE);

    let mut handles = Vec::new();
    for i in 0..32 {
        let manager = manager.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let user = if i % 2 == 0 { "xwiki:XWiki.Bob" } else { "xwiki:XWiki.Alice" };
            let allowed = manager
                .has_access(&manager.right("view"), Some(&doc(user)), Some(&doc("Private.Budget")))
                .unwrap();
            (i, allowed)
        }));
    }

    for handle in handles {
        let (i, allowed) = handle.await.unwrap();
        assert_eq!(allowed, i % 2 == 0);
    }

    let stats = manager.cache().stats();
    assert!(stats.hits + stats.misses >= 32);
}

#[test]
fn test_blocking_check_inside_runtime() {
    let (manager, _store) = seeded(AuthorizationConfig::default(), FIXTURE);

    let allowed = tokio_test::block_on(async move {
        tokio::task::spawn_blocking(move || {
            manager
                .has_access(&manager.right("edit"), Some(&doc("xwiki:XWiki.Bob")), Some(&doc("Private.Notes")))
                .unwrap()
        })
        .await
        .unwrap()
    });

    assert!(allowed);
}
