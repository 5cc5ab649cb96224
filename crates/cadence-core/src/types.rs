use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one scheduled job slot.
///
/// Unique within an engine's registry: registering a job under a key that is
/// already present replaces the previous registration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl JobKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: None,
        }
    }

    pub fn with_group(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: Some(group.into()),
        }
    }

    /// True when the name is empty or whitespace-only.
    pub fn is_blank(&self) -> bool {
        self.name.trim().is_empty()
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group {
            Some(group) => write!(f, "{}.{}", group, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl From<&str> for JobKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for JobKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Identifies one trigger. A trigger key belongs to exactly one job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TriggerKey {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl TriggerKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: None,
        }
    }

    pub fn with_group(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: Some(group.into()),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.name.trim().is_empty()
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group {
            Some(group) => write!(f, "{}.{}", group, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl From<&str> for TriggerKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TriggerKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
