//! # wikisec authorization engine
//!
//! Decides whether a user may exercise a right on a wiki entity, following
//! rules attached to every level of the farm → wiki → space → document
//! hierarchy and the user's (transitive) group memberships.
//!
//! ## Features
//!
//! - **Extensible rights** with implication, tie and inheritance policies
//! - **Pure settling** of a rule chain into a set of allowed rights
//! - **Dependency-tracking cache**: invalidating a group, a space or a wiki
//!   drops every settled access that relied on it
//! - **Synchronous, thread-safe** API; collaborators are plain traits
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use wikisec_authz::{AuthorizationConfig, AuthorizationManager, InMemorySecurityStore, SecurityRule};
//! use wikisec_core::EntityReference;
//!
//! let store = Arc::new(InMemorySecurityStore::new());
//! let manager = AuthorizationManager::with_store(AuthorizationConfig::default(), store.clone())?;
//!
//! let alice: EntityReference = "XWiki.Alice".parse()?;
//! let page: EntityReference = "Sandbox.WebHome".parse()?;
//! let script = manager.right("script");
//!
//! assert!(!manager.has_access(&script, Some(&alice), Some(&page))?);
//!
//! let space = manager.factory().new_entity_reference(Some(&EntityReference::space("xwiki", ["Sandbox"])))?;
//! let user = manager.factory().new_user_reference(Some(&alice))?;
//! store.add_rules(&space, SecurityRule::allow([script.clone()]).for_user(user));
//! manager.invalidator().rules_changed(&space);
//!
//! assert!(manager.has_access(&script, Some(&alice), Some(&page))?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bridge;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod invalidator;
pub mod loader;
pub mod rights;
pub mod rules;
pub mod settler;
pub mod store;

// Re-export commonly used types
pub use bridge::{DefaultDeploymentPolicy, DeploymentPolicy, GroupMembership, RuleSource};
pub use cache::{CacheConfig, CacheStats, SecurityCache};
pub use config::AuthorizationConfig;
pub use engine::{AuthorizationManager, AuthorizationMetrics, EngineMetrics};
pub use error::{AuthzError, CacheError, CollaboratorError, Result};
pub use invalidator::SecurityCacheRulesInvalidator;
pub use loader::SecurityCacheLoader;
pub use rights::{Right, RightDescription, RightRegistry, RightSet, RuleState, StandardRight};
pub use rules::{RuleSubject, SecurityAccessEntry, SecurityRule, SecurityRuleEntry};
pub use settler::{AuthorizationSettler, DefaultAuthorizationSettler, SettlerOptions};
pub use store::InMemorySecurityStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
