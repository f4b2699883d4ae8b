//! Group-tree level maintenance and orphan collection.
//!
//! The group array is a flattened tree: the parent of a group is the
//! nearest preceding group whose level is one less. Two invariants keep
//! that lookup well-defined: the first group sits at level 0, and no
//! group's level exceeds its predecessor's by more than one.

use log::warn;

use super::PwDatabase;

impl PwDatabase {
    /// Clamps group levels so the flattened tree stays well-formed.
    ///
    /// The first group is forced to level 0; any later group deeper than
    /// its predecessor plus one is pulled up to that depth.
    pub fn fix_group_tree(&mut self) {
        let Some(first) = self.groups.first_mut() else {
            return;
        };
        first.level = 0;

        let mut last_level = 0u16;
        for group in &mut self.groups {
            if group.level > last_level + 1 {
                group.level = last_level + 1;
            }
            last_level = group.level;
        }
    }

    /// Deletes every entry whose group id no longer resolves.
    ///
    /// Returns the number of entries removed. The load path expects zero;
    /// merge tolerates any count.
    pub fn delete_lost_entries(&mut self) -> usize {
        let mut deleted = 0;
        let mut i = 0;
        while i < self.entries.len() {
            if self.group_index_by_id(self.entries[i].group_id).is_none() {
                warn!(
                    "dropping orphaned entry referencing group {}",
                    self.entries[i].group_id
                );
                // Removal zeroizes the entry on drop.
                self.entries.remove(i);
                deleted += 1;
            } else {
                i += 1;
            }
        }
        deleted
    }

    /// Collects the ancestor chain of the group with the given id.
    ///
    /// Returns the indices of the group and its ancestors ordered from
    /// the root down, so the result has `level + 1` elements. Returns
    /// `None` for an unknown id or a malformed tree.
    #[must_use]
    pub fn get_group_tree(&self, group_id: u32) -> Option<Vec<usize>> {
        let position = self.group_index_by_id(group_id)?;

        let mut chain = vec![0usize; usize::from(self.groups[position].level) + 1];
        let mut wanted_level = i32::from(self.groups[position].level);
        let mut i = position;
        loop {
            if i32::from(self.groups[i].level) == wanted_level {
                chain[usize::try_from(wanted_level).ok()?] = i;
                if wanted_level == 0 {
                    break;
                }
                wanted_level -= 1;
            }
            if i == 0 {
                // No ancestor at the required level; the tree is broken.
                return None;
            }
            i -= 1;
        }

        Some(chain)
    }

    /// Index of the last group in the contiguous subtree under the group
    /// at `parent_index`; `parent_index` itself when it has no children.
    #[must_use]
    pub fn get_last_child_group(&self, parent_index: usize) -> Option<usize> {
        if self.groups.is_empty() {
            return None;
        }
        if self.groups.len() == 1 {
            return Some(0);
        }
        if parent_index >= self.groups.len() {
            return None;
        }
        if parent_index == self.groups.len() - 1 {
            return Some(parent_index);
        }

        let parent_level = self.groups[parent_index].level;
        for i in parent_index + 1..self.groups.len() {
            if self.groups[i].level <= parent_level {
                return Some(i - 1);
            }
        }
        Some(self.groups.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{add_test_group, test_db};
    use crate::types::PwEntry;

    #[test]
    fn test_fix_group_tree_clamps_jumps() {
        let mut db = test_db();
        add_test_group(&mut db, "root", 3); // must become 0
        add_test_group(&mut db, "child", 5); // must become 1
        add_test_group(&mut db, "grand", 2); // allowed
        add_test_group(&mut db, "back", 0); // allowed

        db.fix_group_tree();
        let levels: Vec<u16> = db.groups().iter().map(|g| g.level).collect();
        assert_eq!(levels, [0, 1, 2, 0]);

        // Invariant holds afterwards.
        for w in levels.windows(2) {
            assert!(w[1] <= w[0] + 1);
        }
    }

    #[test]
    fn test_fix_group_tree_empty_database() {
        let mut db = test_db();
        db.fix_group_tree();
        assert_eq!(db.num_groups(), 0);
    }

    #[test]
    fn test_delete_lost_entries_counts() {
        let mut db = test_db();
        let gid = add_test_group(&mut db, "G", 0);
        db.add_entry(&PwEntry::template(gid, "kept", "", "p")).unwrap();
        db.add_entry(&PwEntry::template(gid, "lost1", "", "p")).unwrap();
        db.add_entry(&PwEntry::template(gid, "lost2", "", "p")).unwrap();
        db.entries[1].group_id = 0xBAD1;
        db.entries[2].group_id = 0xBAD2;

        assert_eq!(db.delete_lost_entries(), 2);
        assert_eq!(db.num_entries(), 1);
        assert_eq!(db.entry(0).unwrap().title, "kept");
        assert_eq!(db.delete_lost_entries(), 0);
    }

    #[test]
    fn test_get_group_tree_walks_ancestors() {
        let mut db = test_db();
        let _root = add_test_group(&mut db, "root", 0);
        let _mid = add_test_group(&mut db, "mid", 1);
        let leaf = add_test_group(&mut db, "leaf", 2);
        let _sibling = add_test_group(&mut db, "sibling", 1);

        let chain = db.get_group_tree(leaf).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(db.groups()[chain[0]].name, "root");
        assert_eq!(db.groups()[chain[1]].name, "mid");
        assert_eq!(db.groups()[chain[2]].name, "leaf");
    }

    #[test]
    fn test_get_group_tree_root_is_itself() {
        let mut db = test_db();
        let root = add_test_group(&mut db, "root", 0);
        assert_eq!(db.get_group_tree(root).unwrap(), vec![0]);
        assert!(db.get_group_tree(0xDEAD).is_none());
    }

    #[test]
    fn test_get_last_child_group() {
        let mut db = test_db();
        add_test_group(&mut db, "a", 0); // 0
        add_test_group(&mut db, "a1", 1); // 1
        add_test_group(&mut db, "a2", 1); // 2
        add_test_group(&mut db, "b", 0); // 3
        add_test_group(&mut db, "b1", 1); // 4

        // Subtree of "a" ends at index 2.
        assert_eq!(db.get_last_child_group(0), Some(2));
        // Leaf group with no children.
        assert_eq!(db.get_last_child_group(1), Some(1));
        // Subtree of "b" runs to the end of the array.
        assert_eq!(db.get_last_child_group(3), Some(4));
        // Last group maps to itself.
        assert_eq!(db.get_last_child_group(4), Some(4));
        // Out of range.
        assert_eq!(db.get_last_child_group(9), None);
    }
}
