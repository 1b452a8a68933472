//! Model profiles used for enrichment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::warn;

use crate::errors::{DigestError, Result};

/// One OpenAI-compatible model endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Stable id.
    #[serde(default)]
    pub id: String,
    /// Profile name tasks refer to.
    pub name: String,
    /// Model name sent to the endpoint.
    pub model_name: String,
    /// Base URL, e.g. `https://api.example.com/v1`.
    pub api_base: String,
    /// Bearer token.
    #[serde(default)]
    pub api_key: String,
}

impl fmt::Debug for ModelProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelProfile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("model_name", &self.model_name)
            .field("api_base", &self.api_base)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// The `{"models": [...]}` file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCatalog {
    /// Configured profiles, in file order.
    #[serde(default)]
    pub models: Vec<ModelProfile>,
}

impl ModelCatalog {
    /// Creates a catalog from profiles.
    #[must_use]
    pub fn new(models: Vec<ModelProfile>) -> Self {
        Self { models }
    }

    /// Loads a catalog file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DigestError::Config(format!("cannot read model file {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Returns true if no profile is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Profile names, in file order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name.as_str()).collect()
    }

    /// Looks a profile up by name.
    pub fn find(&self, name: &str) -> Result<&ModelProfile> {
        self.models
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| DigestError::UnknownProfile {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    /// Resolves a profile by name, else by index, else the first one.
    ///
    /// An out-of-range index falls back to the first profile.
    pub fn resolve(&self, name: Option<&str>, index: Option<usize>) -> Result<&ModelProfile> {
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            return self.find(name);
        }
        let first = self
            .models
            .first()
            .ok_or_else(|| DigestError::Config("no models configured".to_string()))?;
        let index = index.unwrap_or(0);
        Ok(self.models.get(index).unwrap_or_else(|| {
            warn!(index, "Model index out of range, using the first model");
            first
        }))
    }
}
