//! Per-key outcome of a commit.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::object::ObjectKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceState {
    Created,
    Updated,
    Deleted,
    Unchanged,
    AlreadyExists,
    Failed,
    ChangePending,
}

impl ResourceState {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceState::Created => "created",
            ResourceState::Updated => "updated",
            ResourceState::Deleted => "deleted",
            ResourceState::Unchanged => "unchanged",
            ResourceState::AlreadyExists => "alreadyExists",
            ResourceState::Failed => "failed",
            ResourceState::ChangePending => "changePending",
        }
    }

    /// Whether the state asks for a cluster write.
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            ResourceState::Created | ResourceState::Updated | ResourceState::Deleted
        )
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(ResourceState::Created),
            "updated" => Some(ResourceState::Updated),
            "deleted" => Some(ResourceState::Deleted),
            "unchanged" => Some(ResourceState::Unchanged),
            "alreadyExists" => Some(ResourceState::AlreadyExists),
            "failed" => Some(ResourceState::Failed),
            "changePending" => Some(ResourceState::ChangePending),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub state: ResourceState,
    pub applied: bool,
    pub error: Option<String>,
}

impl Change {
    pub fn new(state: ResourceState) -> Self {
        Self {
            state,
            applied: false,
            error: None,
        }
    }

    /// The state recorded in the owner's status: a mutation that has not
    /// landed yet is reported as pending.
    pub fn status_state(&self) -> ResourceState {
        if self.state.is_mutation() && !self.applied {
            ResourceState::ChangePending
        } else {
            self.state
        }
    }
}

pub type ChangeSet = BTreeMap<ObjectKey, Change>;

/// Whether any change in the set requires a write.
pub fn has_mutations(changes: &ChangeSet) -> bool {
    changes.values().any(|c| c.state.is_mutation())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unapplied_mutations_report_pending() {
        let mut change = Change::new(ResourceState::Created);
        assert_eq!(change.status_state(), ResourceState::ChangePending);

        change.applied = true;
        assert_eq!(change.status_state(), ResourceState::Created);

        let unchanged = Change::new(ResourceState::Unchanged);
        assert_eq!(unchanged.status_state(), ResourceState::Unchanged);
    }

    #[test]
    fn states_round_trip_through_status_strings() {
        for state in [
            ResourceState::Created,
            ResourceState::AlreadyExists,
            ResourceState::ChangePending,
        ] {
            assert_eq!(ResourceState::parse(state.as_str()), Some(state));
        }
        assert_eq!(ResourceState::parse("bogus"), None);
    }
}
