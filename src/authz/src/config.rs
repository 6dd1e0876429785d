//! Engine configuration loading and validation

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AuthzError, Result};
use crate::rights::RightDescription;

/// Complete engine configuration
///
/// Every section is optional; an empty file yields the defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AuthorizationConfig {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub metrics: MetricsSection,

    /// Rights registered on top of the built-in ones
    #[serde(default)]
    pub rights: Vec<RightConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineSection {
    /// Name of the main wiki, which also stands for the farm
    #[serde(default = "default_main_wiki")]
    pub main_wiki: String,
    /// Document name of the superadmin account in the main wiki
    #[serde(default = "default_superadmin_name")]
    pub superadmin_name: String,
    /// Rights even the superadmin does not get
    #[serde(default)]
    pub superadmin_excluded_rights: Vec<String>,
    /// Deny by default a right other subjects were explicitly allowed
    #[serde(default)]
    pub exclusive_allow: bool,
    /// Cache load attempts before giving up
    #[serde(default = "default_max_load_retries")]
    pub max_load_retries: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheSection {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MetricsSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// A right to register at startup
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RightConfig {
    #[serde(flatten)]
    pub description: RightDescription,
    /// Already registered rights that will imply this one
    #[serde(default)]
    pub implied_by: Vec<String>,
}

fn default_true() -> bool { true }
fn default_main_wiki() -> String { "xwiki".to_string() }
fn default_superadmin_name() -> String { "superadmin".to_string() }
fn default_max_load_retries() -> usize { 5 }
fn default_cache_capacity() -> usize { 10_000 }

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            main_wiki: default_main_wiki(),
            superadmin_name: default_superadmin_name(),
            superadmin_excluded_rights: Vec::new(),
            exclusive_allow: false,
            max_load_retries: default_max_load_retries(),
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

impl AuthorizationConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| AuthzError::configuration(format!("failed to parse configuration: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.engine.main_wiki.trim().is_empty() {
            return Err(AuthzError::configuration("main wiki name must not be empty"));
        }
        if self.engine.superadmin_name.trim().is_empty() {
            return Err(AuthzError::configuration("superadmin name must not be empty"));
        }
        if self.cache.capacity == 0 {
            return Err(AuthzError::configuration("cache capacity must be greater than 0"));
        }
        if self.engine.max_load_retries == 0 {
            return Err(AuthzError::configuration("max load retries must be greater than 0"));
        }
        for right in &self.rights {
            if right.description.name.trim().is_empty() {
                return Err(AuthzError::InvalidRight("right name must not be empty".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rights::RuleState;
    use std::io::Write;
    use wikisec_core::EntityType;

    #[test]
    fn test_defaults() {
        let config = AuthorizationConfig::from_toml_str("").unwrap();
        assert_eq!(config, AuthorizationConfig::default());
        assert_eq!(config.engine.main_wiki, "xwiki");
        assert_eq!(config.cache.capacity, 10_000);
        assert_eq!(config.engine.max_load_retries, 5);
        assert!(!config.engine.exclusive_allow);
        assert!(config.metrics.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[engine]
main_wiki = "main"
superadmin_excluded_rights = ["programming"]
exclusive_allow = true

[cache]
capacity = 64

[[rights]]
name = "approve"
default_state = "deny"
tie_resolution_policy = "deny"
inheritance_override_policy = true
implied_rights = ["view"]
targeted_entity_types = ["space", "document"]
implied_by = ["admin"]
"#
        )
        .unwrap();

        let config = AuthorizationConfig::load(file.path()).unwrap();
        assert_eq!(config.engine.main_wiki, "main");
        assert_eq!(config.engine.superadmin_excluded_rights, vec!["programming"]);
        assert!(config.engine.exclusive_allow);
        assert_eq!(config.cache.capacity, 64);

        let right = &config.rights[0];
        assert_eq!(right.description.name, "approve");
        assert_eq!(right.description.default_state, RuleState::Deny);
        assert!(right.description.targeted_entity_types.contains(&EntityType::Space));
        assert_eq!(right.implied_by, vec!["admin"]);
    }

    #[test]
    fn test_validation() {
        let mut config = AuthorizationConfig::default();
        config.cache.capacity = 0;
        assert!(matches!(config.validate(), Err(AuthzError::Configuration(_))));

        let mut config = AuthorizationConfig::default();
        config.engine.max_load_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_and_bad_toml() {
        assert!(matches!(
            AuthorizationConfig::load("/nonexistent/wikisec.toml"),
            Err(AuthzError::Io(_))
        ));
        assert!(matches!(
            AuthorizationConfig::from_toml_str("[cache]\ncapacity = \"lots\""),
            Err(AuthzError::Configuration(_))
        ));
    }
}
