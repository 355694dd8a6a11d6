//! Ordered multiset over `(score, member)` with O(log n) ranked range
//! queries: a member → score index next to an AVL tree carrying subtree
//! sizes.

mod avl;

use std::collections::HashMap;

use avl::AvlTree;

/// Sorted set. Every index entry has exactly one tree node with the same
/// score; ranks are 0-based positions in `(score asc, member asc)` order.
#[derive(Debug, Default)]
pub struct SortedSet {
    index: HashMap<Vec<u8>, f64>,
    tree: AvlTree,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[inline]
    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.index.get(member).copied()
    }

    /// Inserts a member or updates its score (delete + re-insert under the
    /// new key). Returns true iff the member was newly added. Callers reject
    /// NaN scores before they get here.
    pub fn insert(&mut self, member: &[u8], score: f64) -> bool {
        debug_assert!(!score.is_nan());
        if let Some(&old) = self.index.get(member) {
            if old.total_cmp(&score).is_eq() {
                return false;
            }
            self.tree.remove(old, member);
            self.tree.insert(score, member);
            self.index.insert(member.to_vec(), score);
            return false;
        }
        self.tree.insert(score, member);
        self.index.insert(member.to_vec(), score);
        true
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.index.remove(member) {
            Some(score) => {
                self.tree.remove(score, member);
                true
            }
            None => false,
        }
    }

    /// Members with rank in `[start, stop]`, inclusive, where negative ranks
    /// count from the tail (-1 is the last member). Out-of-range bounds are
    /// clamped after normalization; an inverted window is empty.
    pub fn range(&self, start: i64, stop: i64) -> Vec<&[u8]> {
        let n = self.len() as i64;
        if n == 0 {
            return Vec::new();
        }
        let start = if start < 0 { start + n } else { start }.max(0);
        let stop = if stop < 0 { stop + n } else { stop }.min(n - 1);
        if start > stop {
            return Vec::new();
        }
        let mut out = Vec::with_capacity((stop - start + 1) as usize);
        self.tree.range_into(start, stop, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;

    fn set_of(pairs: &[(&str, f64)]) -> SortedSet {
        let mut zs = SortedSet::new();
        for (member, score) in pairs {
            zs.insert(member.as_bytes(), *score);
        }
        zs
    }

    fn members(zs: &SortedSet, start: i64, stop: i64) -> Vec<String> {
        zs.range(start, stop)
            .into_iter()
            .map(|m| String::from_utf8(m.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn orders_by_score_then_member() {
        let zs = set_of(&[("UserA", 100.0), ("UserB", 50.0), ("UserC", 150.0), ("UserD", 50.0)]);
        assert_eq!(members(&zs, 0, -1), ["UserB", "UserD", "UserA", "UserC"]);
    }

    #[test]
    fn insert_reports_newness_and_updates_score() {
        let mut zs = SortedSet::new();
        assert!(zs.insert(b"m", 1.0));
        assert!(!zs.insert(b"m", 1.0));
        assert!(!zs.insert(b"m", 9.0));
        assert_eq!(zs.score(b"m"), Some(9.0));
        assert_eq!(zs.len(), 1);

        zs.insert(b"other", 5.0);
        assert_eq!(members(&zs, 0, -1), ["other", "m"]);
    }

    #[test]
    fn remove_unlinks_index_and_tree() {
        let mut zs = set_of(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert!(zs.remove(b"b"));
        assert!(!zs.remove(b"b"));
        assert_eq!(zs.score(b"b"), None);
        assert_eq!(members(&zs, 0, -1), ["a", "c"]);
    }

    #[test]
    fn range_normalization() {
        let zs = set_of(&[("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0), ("e", 5.0)]);
        assert_eq!(members(&zs, 1, 3), ["b", "c", "d"]);
        assert_eq!(members(&zs, -2, -1), ["d", "e"]);
        assert_eq!(members(&zs, -100, 100), ["a", "b", "c", "d", "e"]);
        assert_eq!(members(&zs, 3, 1), Vec::<String>::new());
        assert_eq!(members(&zs, 4, -1), ["e"]);
        assert!(SortedSet::new().range(0, -1).is_empty());
    }

    #[test]
    fn randomized_mutations_keep_avl_invariants() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut zs = SortedSet::new();
        let mut model: Vec<(Vec<u8>, f64)> = Vec::new();

        for step in 0..4_000 {
            let member = format!("m{:03}", rng.random_range(0..400)).into_bytes();
            if rng.random_bool(0.7) {
                let score = f64::from(rng.random_range(-500..500_i32)) / 4.0;
                let added = zs.insert(&member, score);
                let existing = model.iter_mut().find(|(m, _)| *m == member);
                assert_eq!(added, existing.is_none());
                match existing {
                    Some(slot) => slot.1 = score,
                    None => model.push((member, score)),
                }
            } else {
                let removed = zs.remove(&member);
                let had = model.iter().position(|(m, _)| *m == member);
                assert_eq!(removed, had.is_some());
                if let Some(i) = had {
                    model.remove(i);
                }
            }

            if step % 128 == 0 {
                zs.tree.assert_well_formed();
            }
        }

        zs.tree.assert_well_formed();
        assert_eq!(zs.len(), model.len());

        model.sort_by(|(am, asc), (bm, bsc)| asc.total_cmp(bsc).then_with(|| am.cmp(bm)));
        let expect: Vec<&[u8]> = model.iter().map(|(m, _)| m.as_slice()).collect();
        assert_eq!(zs.range(0, -1), expect);
        for (member, score) in &model {
            assert_eq!(zs.score(member), Some(*score));
        }
    }
}
