use std::fmt;

use serde::{Deserialize, Serialize};

/// Group identity. Integer and string ids never collide: `1` and `"1"` are
/// different groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupId {
    Int(i64),
    Name(String),
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupId::Int(id) => write!(f, "{}", id),
            GroupId::Name(name) => f.write_str(name),
        }
    }
}

impl From<i64> for GroupId {
    fn from(id: i64) -> Self {
        GroupId::Int(id)
    }
}

impl From<i32> for GroupId {
    fn from(id: i32) -> Self {
        GroupId::Int(i64::from(id))
    }
}

impl From<u32> for GroupId {
    fn from(id: u32) -> Self {
        GroupId::Int(i64::from(id))
    }
}

impl From<String> for GroupId {
    fn from(name: String) -> Self {
        GroupId::Name(name)
    }
}

impl From<&str> for GroupId {
    fn from(name: &str) -> Self {
        GroupId::Name(name.to_string())
    }
}

impl From<&GroupId> for GroupId {
    fn from(id: &GroupId) -> Self {
        id.clone()
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Members the message was written to
    pub delivered: usize,
    /// Members that were not alive when the broadcast started
    pub skipped: usize,
    /// Members whose send failed
    pub failed: usize,
}

impl BroadcastReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupStats {
    pub groups: usize,
    pub memberships: usize,
}
