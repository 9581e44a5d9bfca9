//! Snapshot histories and reconciliation.
//!
//! Histories are ordered oldest first, exactly as the store returns them.
//! Nothing here re-sorts them.

use crate::error::ReplicationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One point-in-time snapshot of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub dataset: String,
    pub snapshot: String,
}

impl SnapshotEntry {
    pub fn new(dataset: impl Into<String>, snapshot: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            snapshot: snapshot.into(),
        }
    }

    /// Parse a `dataset@snapshot` name.
    pub fn parse(name: &str) -> Option<Self> {
        let (dataset, snapshot) = name.split_once('@')?;
        if dataset.is_empty() || snapshot.is_empty() {
            return None;
        }
        Some(Self::new(dataset, snapshot))
    }
}

impl fmt::Display for SnapshotEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.dataset, self.snapshot)
    }
}

/// Newest snapshot present in both histories.
///
/// Local history is scanned newest to oldest; for each local name the remote
/// history is scanned newest to oldest for an exact name match. The remote
/// entry of the first match is returned.
pub fn latest_common<'a>(
    remote: &'a [SnapshotEntry],
    local: &[SnapshotEntry],
) -> Option<&'a SnapshotEntry> {
    for ours in local.iter().rev() {
        if let Some(theirs) = remote.iter().rev().find(|r| r.snapshot == ours.snapshot) {
            return Some(theirs);
        }
    }
    None
}

/// What a replication run has to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendPlan {
    /// Snapshot the destination should end up at.
    pub target: SnapshotEntry,
    /// Common snapshot to send incrementally from; `None` means a full stream.
    pub base: Option<SnapshotEntry>,
}

impl SendPlan {
    /// Destination already holds the target snapshot.
    pub fn is_noop(&self) -> bool {
        self.base
            .as_ref()
            .is_some_and(|base| base.snapshot == self.target.snapshot)
    }

    pub fn is_incremental(&self) -> bool {
        self.base.is_some()
    }
}

/// Choose the target snapshot and the incremental base.
///
/// The target is the newest local snapshot, or `pinned` when given. Only
/// local history up to and including the target takes part in
/// reconciliation.
pub fn plan(
    dataset: &str,
    local: &[SnapshotEntry],
    remote: &[SnapshotEntry],
    pinned: Option<&str>,
) -> Result<SendPlan, ReplicationError> {
    let cut = match pinned {
        Some(name) => {
            local
                .iter()
                .position(|s| s.snapshot == name)
                .ok_or_else(|| ReplicationError::SnapshotNotFound(format!("{dataset}@{name}")))?
                + 1
        }
        None => local.len(),
    };

    let history = &local[..cut];
    let target = history
        .last()
        .cloned()
        .ok_or_else(|| ReplicationError::NoSnapshots(dataset.to_string()))?;

    Ok(SendPlan {
        target,
        base: latest_common(remote, history).cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn history(dataset: &str, names: &[&str]) -> Vec<SnapshotEntry> {
        names
            .iter()
            .map(|n| SnapshotEntry::new(dataset, *n))
            .collect()
    }

    #[test]
    fn test_parse_entry() {
        let entry = SnapshotEntry::parse("tank/data@daily-1").unwrap();
        assert_eq!(entry.dataset, "tank/data");
        assert_eq!(entry.snapshot, "daily-1");
        assert_eq!(entry.to_string(), "tank/data@daily-1");

        assert!(SnapshotEntry::parse("tank/data").is_none());
        assert!(SnapshotEntry::parse("@snap").is_none());
        assert!(SnapshotEntry::parse("tank@").is_none());
    }

    #[test]
    fn test_latest_common_picks_newest_shared() {
        let local = history("tank", &["a", "b", "c"]);
        let remote = history("backup", &["a", "b"]);

        let common = latest_common(&remote, &local).unwrap();
        assert_eq!(common.snapshot, "b");
        // The remote's entry is returned, not ours.
        assert_eq!(common.dataset, "backup");
    }

    #[test]
    fn test_latest_common_none() {
        let local = history("tank", &["a", "b"]);
        let remote = history("tank", &["x", "y"]);
        assert!(latest_common(&remote, &local).is_none());
        assert!(latest_common(&[], &local).is_none());
        assert!(latest_common(&remote, &[]).is_none());
    }

    #[test]
    fn test_latest_common_prefers_newest_local_over_remote_order() {
        // Remote has "a" as its newest, but "b" is newer locally.
        let local = history("tank", &["a", "b", "c"]);
        let remote = history("tank", &["b", "a"]);
        assert_eq!(latest_common(&remote, &local).unwrap().snapshot, "b");
    }

    #[test]
    fn test_latest_common_returns_newest_remote_duplicate() {
        let local = history("tank", &["a"]);
        let remote = vec![
            SnapshotEntry::new("old", "a"),
            SnapshotEntry::new("new", "a"),
        ];
        assert_eq!(latest_common(&remote, &local).unwrap().dataset, "new");
    }

    #[test]
    fn test_plan_incremental() {
        let local = history("tank", &["a", "b", "c"]);
        let remote = history("tank", &["a", "b"]);
        let plan = plan("tank", &local, &remote, None).unwrap();
        assert_eq!(plan.target.snapshot, "c");
        assert_eq!(plan.base.as_ref().unwrap().snapshot, "b");
        assert!(plan.is_incremental());
        assert!(!plan.is_noop());
    }

    #[test]
    fn test_plan_full_when_nothing_shared() {
        let local = history("tank", &["a", "b"]);
        let plan = plan("tank", &local, &[], None).unwrap();
        assert_eq!(plan.target.snapshot, "b");
        assert!(plan.base.is_none());
        assert!(!plan.is_noop());
    }

    #[test]
    fn test_plan_noop_when_in_sync() {
        let local = history("tank", &["a"]);
        let remote = history("tank", &["a"]);
        assert!(plan("tank", &local, &remote, None).unwrap().is_noop());
    }

    #[test]
    fn test_plan_pinned_snapshot() {
        let local = history("tank", &["a", "b", "c", "d"]);
        let remote = history("tank", &["a", "c"]);

        // Pinning "b" ignores the newer "c" the remote already has.
        let plan = plan("tank", &local, &remote, Some("b")).unwrap();
        assert_eq!(plan.target.snapshot, "b");
        assert_eq!(plan.base.unwrap().snapshot, "a");
    }

    #[test]
    fn test_plan_errors() {
        let err = plan("tank", &[], &[], None).unwrap_err();
        assert!(matches!(err, ReplicationError::NoSnapshots(_)));

        let local = history("tank", &["a"]);
        let err = plan("tank", &local, &[], Some("zz")).unwrap_err();
        assert!(matches!(err, ReplicationError::SnapshotNotFound(ref s) if s == "tank@zz"));
    }

    proptest! {
        #[test]
        fn prop_latest_common_is_newest_shared_local_name(
            local in prop::collection::vec("[a-f]", 0..12),
            remote in prop::collection::vec("[a-f]", 0..12),
        ) {
            let local_h: Vec<_> = local.iter().map(|n| SnapshotEntry::new("l", n.as_str())).collect();
            let remote_h: Vec<_> = remote.iter().map(|n| SnapshotEntry::new("r", n.as_str())).collect();

            let expected = local.iter().rev().find(|n| remote.contains(n));
            let got = latest_common(&remote_h, &local_h).map(|e| e.snapshot.clone());

            prop_assert_eq!(got.as_ref(), expected);
            if let Some(name) = got {
                prop_assert!(local.contains(&name));
            }
        }
    }
}
