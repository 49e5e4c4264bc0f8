// ABOUTME: Validated node names used as lifecycle keys.
// ABOUTME: Rejects empty names, whitespace, and characters that break deploying URLs.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeNameError {
    #[error("node name cannot be empty")]
    Empty,

    #[error("node name cannot contain whitespace")]
    Whitespace,

    #[error("invalid character in node name: '{0}'")]
    InvalidChar(char),
}

/// Name of a node as announced by the remote side at registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeName(String);

impl NodeName {
    pub fn new(value: &str) -> Result<Self, NodeNameError> {
        if value.is_empty() {
            return Err(NodeNameError::Empty);
        }

        for c in value.chars() {
            if c.is_whitespace() {
                return Err(NodeNameError::Whitespace);
            }
            // '/' separates the source from the name inside a deploying URL
            if c == '/' || c.is_control() {
                return Err(NodeNameError::InvalidChar(c));
            }
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for NodeName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NodeName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NodeName::new(&s).map_err(serde::de::Error::custom)
    }
}
