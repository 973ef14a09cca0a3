use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Arena handle of a container node. Only meaningful within the document
/// that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic issuer of [`NodeId`]s. Ids are never reused, so a detached node
/// keeps a handle that cannot alias a newer node.
#[derive(Debug, Clone)]
pub struct IdArena {
    next: u64,
}

impl IdArena {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn issue(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }

    /// Number of ids handed out so far
    pub fn issued(&self) -> u64 {
        self.next - 1
    }
}

impl Default for IdArena {
    fn default() -> Self {
        Self::new()
    }
}

/// Seed for replica-scoped ids, derived from the replica name with CRC32
pub fn replica_seed(replica: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(replica.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Sequential generator for stable ids (shape ids, unit ids) that stay
/// unique across replicas
#[derive(Debug, Clone)]
pub struct IdGenerator {
    seed: String,
    count: u64,
}

impl IdGenerator {
    pub fn new(replica: &str) -> Self {
        Self {
            seed: replica_seed(replica),
            count: 0,
        }
    }

    pub fn from_seed(seed: String) -> Self {
        Self { seed, count: 0 }
    }

    /// Generate next sequential ID
    pub fn new_id(&mut self) -> String {
        self.count += 1;
        format!("{}-{}", self.seed, self.count)
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }
}
