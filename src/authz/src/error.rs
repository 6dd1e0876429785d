//! Error types for the authorization engine

use thiserror::Error;

/// Failure reported by an external collaborator (rule source, group
/// membership lookup)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// The backing store could not be reached or read
    #[error("Rule source unavailable: {0}")]
    Unavailable(String),

    /// The stored data could not be interpreted
    #[error("Malformed security data: {0}")]
    Malformed(String),
}

/// Result type for collaborator calls
pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Why a cache insertion was refused
///
/// Both cases mean the caller's view of the cache went stale while it was
/// loading; the loader retries the whole load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CacheError {
    /// A parent the new entry depends on is not (or no longer) cached
    #[error("Parent entry evicted")]
    ParentEntryEvicted,

    /// Another entry occupies the slot, or the insertion evicted itself
    #[error("Conflicting insertion")]
    ConflictingInsertion,
}

/// Result type for cache insertions
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Authorization engine errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Expected outcome of `check_access` when the answer is deny
    #[error("Access denied: right '{right}' for user '{user}' on '{entity}'")]
    AccessDenied {
        right: String,
        user: String,
        entity: String,
    },

    /// Attempt to unregister a built-in or read-only right
    #[error("Right '{0}' is protected and cannot be unregistered")]
    ProtectedRight(String),

    /// Registration would make the implied-rights graph cyclic
    #[error("Implied rights cycle detected: {0}")]
    ImpliedRightsCycle(String),

    /// Right description is not acceptable
    #[error("Invalid right: {0}")]
    InvalidRight(String),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Rule source or group membership failure; never treated as allow
    #[error("Collaborator failure: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// Invalid entity or subject reference
    #[error("Reference error: {0}")]
    Reference(#[from] wikisec_core::CoreError),

    /// The cache could not be populated consistently
    #[error("Cache load failed: {0}")]
    CacheLoad(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    /// Whether this error is the expected deny outcome of a check
    pub fn is_access_denied(&self) -> bool {
        matches!(self, AuthzError::AccessDenied { .. })
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        AuthzError::Configuration(msg.into())
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
