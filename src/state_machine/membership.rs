use crate::storage::{ConfChange, ConfChangeType, ConfState};

/// Membership after applying `change` to `current`. Both change types are idempotent.
pub fn apply_conf_change(current: &ConfState, change: &ConfChange) -> ConfState {
    let mut next = current.clone();

    match change.change_type {
        ConfChangeType::AddNode => {
            next.learners.remove(&change.node_id);
            next.voters.insert(change.node_id);
        }
        ConfChangeType::RemoveNode => {
            next.voters.remove(&change.node_id);
            next.learners.remove(&change.node_id);
        }
    }

    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn change(change_type: ConfChangeType, node_id: u64) -> ConfChange {
        ConfChange {
            change_type,
            node_id,
            context: Bytes::new(),
        }
    }

    #[test]
    fn add_and_remove_voters() {
        let start = ConfState::with_voters(vec![1]);

        let added = apply_conf_change(&start, &change(ConfChangeType::AddNode, 2));
        assert_eq!(added, ConfState::with_voters(vec![1, 2]));
        assert_eq!(apply_conf_change(&added, &change(ConfChangeType::AddNode, 2)), added);

        let removed = apply_conf_change(&added, &change(ConfChangeType::RemoveNode, 1));
        assert_eq!(removed, ConfState::with_voters(vec![2]));
        assert_eq!(apply_conf_change(&removed, &change(ConfChangeType::RemoveNode, 1)), removed);
    }

    #[test]
    fn promotes_learner() {
        let mut start = ConfState::with_voters(vec![1]);
        start.learners.insert(3);

        let promoted = apply_conf_change(&start, &change(ConfChangeType::AddNode, 3));
        assert_eq!(promoted, ConfState::with_voters(vec![1, 3]));
    }
}
