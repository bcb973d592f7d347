//! Instance identity
//!
//! Every coordinator gets an explicit, totally ordered identity so peers can
//! break ties. Ordering compares the process-local sequence first, then the
//! random salt, so within one process an id allocated earlier always sorts
//! lower. Coordinators allocate theirs at construction, not at initialize.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Comparable identity of one running instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId {
    seq: u64,
    salt: Uuid,
}

impl InstanceId {
    /// Allocate the next identity for this process
    pub fn generate() -> Self {
        Self {
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            salt: Uuid::now_v7(),
        }
    }

    /// Build an identity from explicit parts
    pub fn from_parts(seq: u64, salt: Uuid) -> Self {
        Self { seq, salt }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn salt(&self) -> Uuid {
        self.salt
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let salt = self.salt.simple().to_string();
        write!(f, "{}-{}", self.seq, &salt[salt.len() - 8..])
    }
}
