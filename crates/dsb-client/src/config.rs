use serde::{Deserialize, Serialize};

use dsb_types::{DatastoreError, DatastoreResult};

/// Environment variables consulted for the project ID, in order.
pub const PROJECT_ID_VARS: [&str; 2] = ["DATASTORE_PROJECT_ID", "GOOGLE_CLOUD_PROJECT"];

/// Environment variable for the default namespace.
pub const NAMESPACE_VAR: &str = "DATASTORE_NAMESPACE";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub project_id: String,
    /// Namespace stamped on keys built through the client.
    pub namespace: Option<String>,
    /// Attempts made by `run_in_transaction` before giving up on conflicts.
    pub max_transaction_attempts: u32,
    /// When false, every call bypasses the cache layers.
    pub cache_enabled: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            namespace: None,
            max_transaction_attempts: 3,
            cache_enabled: true,
        }
    }
}

impl ClientConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(project_id) = PROJECT_ID_VARS.iter().find_map(|&name| non_empty(name)) {
            config.project_id = project_id;
        }
        if let Some(namespace) = non_empty(NAMESPACE_VAR) {
            config.namespace = Some(namespace);
        }
        config
    }

    /// Parse a TOML document; absent fields keep their defaults.
    pub fn from_toml_str(s: &str) -> DatastoreResult<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| DatastoreError::InvalidArgument(format!("client config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DatastoreResult<()> {
        if self.max_transaction_attempts == 0 {
            return Err(DatastoreError::InvalidArgument(
                "max_transaction_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
