//! # wikisec Core
//!
//! Shared reference types and error handling for the wikisec authorization
//! engine.
//!
//! - [`EntityReference`]: raw `wiki:Space.Page` references as callers pass them
//! - [`SecurityReference`]: canonical farm → wiki → space(s) → document chains
//! - [`UserSecurityReference`] / [`GroupSecurityReference`]: subjects
//! - [`SecurityReferenceFactory`]: resolves and interns references

pub mod error;
pub mod factory;
pub mod types;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use factory::{InternStats, SecurityReferenceFactory};
pub use types::{
    EntityReference, EntityType, GroupSecurityReference, SecurityReference,
    UserSecurityReference,
};
