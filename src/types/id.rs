// ABOUTME: Phantom-typed identifiers for compile-time type safety.
// ABOUTME: Keeps deploying node URLs and batch job IDs from being swapped.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use super::NodeName;

/// Marker types for phantom type parameters.
/// Using empty enums prevents instantiation and requires no trait bounds.
pub enum DeployingMarker {}
pub enum JobMarker {}

/// Scheme prefix of every deploying node URL.
pub const DEPLOYING_SCHEME: &str = "deploying://";

/// A type-safe identifier that prevents accidental mixing of different ID types.
///
/// A `JobId` handed out by a batch scheduler can never be passed where a
/// `DeployingNodeUrl` is expected.
#[must_use = "IDs reference tracked nodes and should not be ignored"]
pub struct Id<T> {
    value: String,
    _marker: PhantomData<T>,
}

impl<T> Id<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn into_inner(self) -> String {
        self.value
    }
}

impl Id<DeployingMarker> {
    /// Build the URL under which a deploying node is tracked.
    pub fn for_node(source: &str, name: &NodeName) -> Self {
        Self::new(format!("{DEPLOYING_SCHEME}{source}/{name}"))
    }

    /// Node name component of the URL, if the URL is well formed.
    pub fn node_name(&self) -> Option<&str> {
        self.value
            .strip_prefix(DEPLOYING_SCHEME)
            .and_then(|rest| rest.rsplit_once('/'))
            .map(|(_, name)| name)
    }
}

// Manual trait implementations that don't require T to implement the trait.

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Id").field("value", &self.value).finish()
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

pub type DeployingNodeUrl = Id<DeployingMarker>;
pub type JobId = Id<JobMarker>;
