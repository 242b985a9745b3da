//! Key-set difference computation
//!
//! The same diff drives every registry backend: the EPP backend diffs DNSKEY
//! records, the REST backend diffs the DS records derived from them. The
//! function is pure and order-independent, so re-running a synchronization
//! against a registry that already holds the desired set always yields an
//! empty plan.

/// The minimal set of changes turning `current` into `desired`. Removals are
/// always applied before additions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan<R> {
    pub to_remove: Vec<R>,
    pub to_add: Vec<R>,
}

impl<R> UpdatePlan<R> {
    /// An empty plan means the registry already matches the desired state
    /// and no registry call may be issued.
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }
}

impl<R> Default for UpdatePlan<R> {
    fn default() -> Self {
        Self {
            to_remove: Vec::new(),
            to_add: Vec::new(),
        }
    }
}

/// Compute `current ∖ desired` (to remove) and `desired ∖ current` (to add)
/// under structural equality. Inputs are never mutated; duplicates on either
/// side are folded into one occurrence in the plan.
///
/// The sets in play are small (a handful of KSKs per zone), so the quadratic
/// scan is fine and keeps the record type free of any hashing requirement.
pub fn diff<R: PartialEq + Clone>(current: &[R], desired: &[R]) -> UpdatePlan<R> {
    let mut plan = UpdatePlan::default();
    for record in current {
        if !desired.contains(record) && !plan.to_remove.contains(record) {
            plan.to_remove.push(record.clone());
        }
    }
    for record in desired {
        if !current.contains(record) && !plan.to_add.contains(record) {
            plan.to_add.push(record.clone());
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyset::KeyRecord;

    fn ksk(seed: u8) -> KeyRecord {
        KeyRecord::new(257, 3, 8, vec![seed; 16])
    }

    #[test]
    fn test_diff_identical_sets_is_empty() {
        let set = vec![ksk(1), ksk(2)];
        let plan = diff(&set, &set);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_diff_partitions_correctly() {
        let current = vec![ksk(1), ksk(2)];
        let desired = vec![ksk(2), ksk(3)];
        let plan = diff(&current, &desired);
        assert_eq!(plan.to_remove, vec![ksk(1)]);
        assert_eq!(plan.to_add, vec![ksk(3)]);
    }

    #[test]
    fn test_diff_order_independent() {
        let current = vec![ksk(1), ksk(2), ksk(3)];
        let shuffled = vec![ksk(3), ksk(1), ksk(2)];
        assert!(diff(&current, &shuffled).is_empty());
    }

    #[test]
    fn test_diff_from_empty_adds_everything() {
        let desired = vec![ksk(1), ksk(2)];
        let plan = diff(&[], &desired);
        assert!(plan.to_remove.is_empty());
        assert_eq!(plan.to_add.len(), 2);
    }

    #[test]
    fn test_diff_to_empty_removes_everything() {
        let current = vec![ksk(1), ksk(2)];
        let plan = diff(&current, &[]);
        assert_eq!(plan.to_remove.len(), 2);
        assert!(plan.to_add.is_empty());
    }

    #[test]
    fn test_diff_never_lists_record_on_both_sides() {
        let current = vec![ksk(1), ksk(2)];
        let desired = vec![ksk(2), ksk(3)];
        let plan = diff(&current, &desired);
        for record in &plan.to_remove {
            assert!(!plan.to_add.contains(record));
        }
    }

    #[test]
    fn test_diff_folds_duplicates() {
        let current = vec![ksk(1), ksk(1)];
        let plan = diff(&current, &[]);
        assert_eq!(plan.to_remove.len(), 1);
    }
}
