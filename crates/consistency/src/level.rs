use serde::{Deserialize, Serialize};

/// Read/write policy selectable per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    /// Writes and reads require acknowledgement from a majority of known
    /// healthy peers. A counting approximation, not consensus.
    Strong,

    /// Writes return immediately; replication happens in the background.
    Eventual,

    /// Monotonic reads from this node: a read never observes an older
    /// version than a previous read of the same key.
    Session,

    /// Reads are rejected (treated as a miss) once the local entry is
    /// older than the configured staleness bound.
    BoundedStaleness,

    /// No guarantee; returns whatever is locally present.
    Weak,
}

impl std::fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConsistencyLevel::Strong => "strong",
            ConsistencyLevel::Eventual => "eventual",
            ConsistencyLevel::Session => "session",
            ConsistencyLevel::BoundedStaleness => "bounded_staleness",
            ConsistencyLevel::Weak => "weak",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&ConsistencyLevel::BoundedStaleness).unwrap();
        assert_eq!(json, "\"bounded_staleness\"");
        let level: ConsistencyLevel = serde_json::from_str("\"strong\"").unwrap();
        assert_eq!(level, ConsistencyLevel::Strong);
    }
}
