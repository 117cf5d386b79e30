//! Group expansion and target deduplication

use std::collections::BTreeSet;
use tracing::warn;

use crate::inventory::Inventory;

/// Deduplicate target ids into sorted order
///
/// Sorting makes the result, and therefore every batch position, a pure
/// function of the input set.
pub fn dedup_targets<I, S>(targets: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    targets
        .into_iter()
        .map(Into::into)
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}

/// Result of merging explicit targets with expanded groups
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpandedTargets {
    /// Deduplicated, sorted union of explicit targets and group members
    pub target_ids: Vec<String>,
    /// Deduplicated, sorted members contributed by groups
    pub group_members: Vec<String>,
    /// Group ids that resolved
    pub resolved_groups: Vec<String>,
    /// Group ids that were unknown or failed to resolve
    pub unresolved_groups: Vec<String>,
}

/// Expand `group_ids` through `inventory` and union with `target_ids`
///
/// Unknown groups and inventory failures are logged and skipped.
pub async fn expand_targets(
    inventory: &dyn Inventory,
    target_ids: &[String],
    group_ids: &[String],
) -> ExpandedTargets {
    let mut members = BTreeSet::new();
    let mut resolved_groups = Vec::new();
    let mut unresolved_groups = Vec::new();

    for group_id in dedup_targets(group_ids.iter().cloned()) {
        match inventory.expand_group(&group_id).await {
            Ok(Some(group_members)) => {
                members.extend(group_members);
                resolved_groups.push(group_id);
            }
            Ok(None) => {
                warn!(group_id = %group_id, "Group not found in inventory, skipping");
                unresolved_groups.push(group_id);
            }
            Err(e) => {
                warn!(group_id = %group_id, error = %e, "Group expansion failed, skipping");
                unresolved_groups.push(group_id);
            }
        }
    }

    let group_members: Vec<String> = members.iter().cloned().collect();
    members.extend(target_ids.iter().cloned());

    ExpandedTargets {
        target_ids: members.into_iter().collect(),
        group_members,
        resolved_groups,
        unresolved_groups,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{StaticInventory, Target, Transport};
    use pretty_assertions::assert_eq;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dedup_sorts_and_removes_duplicates() {
        assert_eq!(
            dedup_targets(["web-2", "db-1", "web-2", "web-1"]),
            strings(&["db-1", "web-1", "web-2"])
        );
        assert!(dedup_targets(Vec::<String>::new()).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_group_is_skipped() {
        let inventory = StaticInventory::new()
            .with_target(Target::new("web-1", "web-1", Transport::Ssh))
            .with_target(Target::new("web-2", "web-2", Transport::Ssh))
            .with_target(Target::new("db-1", "db-1", Transport::Ssh))
            .with_group("web", ["web-2", "web-1"]);

        let expanded = expand_targets(
            &inventory,
            &strings(&["db-1", "web-1"]),
            &strings(&["web", "ghost", "web"]),
        )
        .await;

        assert_eq!(
            expanded,
            ExpandedTargets {
                target_ids: strings(&["db-1", "web-1", "web-2"]),
                group_members: strings(&["web-1", "web-2"]),
                resolved_groups: strings(&["web"]),
                unresolved_groups: strings(&["ghost"]),
            }
        );
    }
}
