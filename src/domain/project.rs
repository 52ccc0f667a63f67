use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::{BridgeError, Result};

/// Validated project identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectName(String);

impl ProjectName {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let name = raw.into();
        let reason = if name.is_empty() {
            Some("cannot be empty")
        } else if name.starts_with('.') {
            Some("cannot start with '.'")
        } else if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            Some("only ASCII letters, digits, '.', '_' and '-' are allowed")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(BridgeError::InvalidProjectName { name, reason }),
            None => Ok(Self(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProjectName {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ProjectName> for String {
    fn from(value: ProjectName) -> Self {
        value.0
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered repository. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: ProjectName,

    /// Root of the main checkout
    pub root: PathBuf,

    /// Engine used when neither the request nor the session picks one
    #[serde(default)]
    pub default_engine: Option<String>,

    pub registered_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: ProjectName, root: PathBuf) -> Self {
        Self {
            name,
            root,
            default_engine: None,
            registered_at: Utc::now(),
        }
    }

    pub fn with_default_engine(mut self, engine: impl Into<String>) -> Self {
        self.default_engine = Some(engine.into());
        self
    }
}
