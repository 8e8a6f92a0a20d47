use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::GraphError;
use crate::crypto;

/// Length of generated location names
const RANDOM_LOCATION_LEN: usize = 32;

/// A `/`-separated path in the graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Location(String);

impl Location {
    pub fn new(path: impl Into<String>) -> Result<Self, GraphError> {
        let path = path.into();
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() || trimmed.split('/').any(str::is_empty) {
            return Err(GraphError::InvalidPath(path));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// A fresh top-level location with a random name
    pub fn random() -> Result<Self, GraphError> {
        let name = crypto::random_string(RANDOM_LOCATION_LEN).map_err(anyhow::Error::from)?;
        Ok(Self(name))
    }

    pub fn child(&self, segment: impl AsRef<str>) -> Self {
        Self(format!("{}/{}", self.0, segment.as_ref()))
    }

    pub fn parent(&self) -> Option<Self> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| Self(parent.to_string()))
    }

    /// The last path segment
    pub fn key(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Location {
    type Err = GraphError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Location {
    type Error = GraphError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Location> for String {
    fn from(location: Location) -> Self {
        location.0
    }
}
