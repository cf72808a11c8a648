//! Strongly-typed identifiers.
//!
//! Every identifier is a thin wrapper around a UUID with a phantom marker
//! type, so a `PoolId` can never be passed where a `ResourceId` is
//! expected even though both share the same representation.
//!
//! # Examples
//!
//! ```
//! use reservoir_core::id::{PoolId, ResourceId};
//! use std::str::FromStr;
//!
//! let pool_id = PoolId::new();
//! let resource_id = ResourceId::new();
//! assert_ne!(pool_id.to_string(), resource_id.to_string());
//!
//! let id = ResourceId::from_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
//! assert_eq!(id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use uuid::Uuid;

/// A type-safe identifier based on UUID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Id<T> {
    uuid: Uuid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T> Id<T> {
    /// Create a new random identifier.
    pub fn new() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Create an identifier from a specific UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            _marker: PhantomData,
        }
    }

    /// Get the underlying UUID.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// First eight hex digits, for compact log lines.
    pub fn short(&self) -> String {
        let mut s = self.uuid.simple().to_string();
        s.truncate(8);
        s
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

impl<T> FromStr for Id<T> {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_uuid(Uuid::parse_str(s)?))
    }
}

/// Marker type for pooled resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ResourceMarker;
/// Identifier assigned to each resource a pool creates.
pub type ResourceId = Id<ResourceMarker>;

/// Marker type for pools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PoolMarker;
/// Identifier of a resource pool instance.
pub type PoolId = Id<PoolMarker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_new_is_unique() {
        let id1 = ResourceId::new();
        let id2 = ResourceId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_id_from_uuid() {
        let uuid = Uuid::new_v4();
        let id = PoolId::from_uuid(uuid);
        assert_eq!(id.uuid(), uuid);
    }

    #[test]
    fn test_id_short() {
        let id = ResourceId::from_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(id.short(), "550e8400");
    }

    #[test]
    fn test_id_serde() {
        let id = ResourceId::new();
        let serialized = serde_json::to_string(&id).unwrap();
        let deserialized: ResourceId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(id, deserialized);
    }
}
