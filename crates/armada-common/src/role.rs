use serde::{Deserialize, Serialize};

/// Role a node plays in a deployment. Ordered so role sets serialize stably.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Coordinator,
    Compute,
    Storage,
    Edge,
    /// Only valid as the sole role of the sole node.
    Standalone,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Coordinator => "coordinator",
            Role::Compute => "compute",
            Role::Storage => "storage",
            Role::Edge => "edge",
            Role::Standalone => "standalone",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
