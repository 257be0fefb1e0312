//! Loser-tree tournament over the in-memory workspace.

use crate::record::Record;

/// Logical run tag carried by every in-tree record.
pub type RunId = u64;

/// Tag marking an empty workspace slot.
pub const SENTINEL_RUN: RunId = RunId::MAX;

/// A workspace record tagged with the logical run it belongs to.
///
/// Keys compare lexicographically by `(run, value)`: a record tagged with a
/// later run can never win over an earlier-run record, which is what makes
/// the tree segregate runs during replacement selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunNode<T> {
    /// The record itself.
    pub value: T,
    /// Logical output run the record is destined for.
    pub run: RunId,
}

impl<T: Record> RunNode<T> {
    fn sentinel() -> Self {
        RunNode {
            value: T::max_record(),
            run: SENTINEL_RUN,
        }
    }

    /// Whether this node marks an empty slot.
    pub fn is_sentinel(&self) -> bool {
        self.run == SENTINEL_RUN
    }

    // Loss ordering for the minimum tournament: the larger key loses. Equal
    // keys do not swap; the incumbent stays the loser.
    fn loses_to(&self, other: &RunNode<T>) -> bool {
        if self.run != other.run {
            return self.run > other.run;
        }
        self.value > other.value
    }
}

/// Tournament tree over `k` leaves that stores the loser of each interior
/// match and the overall winner at the root.
///
/// `leaves[k]` is a permanent sentinel; interior nodes point at it while the
/// tree is being built, which is what terminates Knuth's bubble-up
/// construction. Replacing the winner replays only the root path, O(log k).
pub struct LoserTree<T: Record> {
    /// `tree[0]` is the winner's leaf index; `tree[1..k]` hold losers.
    tree: Vec<usize>,
    /// `k` competition slots plus the sentinel at index `k`.
    leaves: Vec<RunNode<T>>,
    k: usize,
}

impl<T: Record> LoserTree<T> {
    /// Creates a tree with `k` competition slots, all empty.
    pub fn new(k: usize) -> Self {
        assert!(k > 0, "tournament size must be positive");
        LoserTree {
            tree: vec![k; k],
            leaves: vec![RunNode::sentinel(); k + 1],
            k,
        }
    }

    /// Fills the leaves with `initial` records (all tagged run 1), pads the
    /// rest with sentinels and builds the tournament.
    pub fn initialize(&mut self, initial: &[T]) {
        debug_assert!(initial.len() <= self.k);

        for i in 0..self.k {
            self.leaves[i] = match initial.get(i) {
                Some(&value) => RunNode { value, run: 1 },
                None => RunNode::sentinel(),
            };
        }
        self.leaves[self.k] = RunNode::sentinel();

        // interior nodes point at the sentinel: "empty" during construction
        for slot in self.tree.iter_mut() {
            *slot = self.k;
        }

        for i in (0..self.k).rev() {
            let mut current = i;
            let mut parent = (i + self.k) / 2;
            while parent > 0 {
                if self.tree[parent] == self.k {
                    // first visitor waits here for an opponent
                    self.tree[parent] = current;
                    break;
                }
                // second visitor plays the match; the loser stays
                let other = self.tree[parent];
                if self.leaves[current].loses_to(&self.leaves[other]) {
                    self.tree[parent] = current;
                    current = other;
                }
                parent /= 2;
            }
            if parent == 0 {
                self.tree[0] = current;
            }
        }
    }

    /// The current `(run, value)`-minimum of the workspace.
    pub fn winner(&self) -> RunNode<T> {
        self.leaves[self.tree[0]]
    }

    /// Overwrites the winner's slot with a new record and replays its path.
    pub fn replace_winner(&mut self, value: T, run: RunId) {
        let leaf = self.tree[0];
        self.leaves[leaf] = RunNode { value, run };
        self.replay(leaf);
    }

    /// Marks the winner's slot as empty and replays its path.
    pub fn seal_winner(&mut self) {
        let leaf = self.tree[0];
        self.leaves[leaf] = RunNode::sentinel();
        self.replay(leaf);
    }

    fn replay(&mut self, leaf: usize) {
        let mut winner = leaf;
        let mut parent = (leaf + self.k) / 2;
        while parent > 0 {
            if self.leaves[winner].loses_to(&self.leaves[self.tree[parent]]) {
                std::mem::swap(&mut winner, &mut self.tree[parent]);
            }
            parent /= 2;
        }
        self.tree[0] = winner;
    }
}

#[cfg(test)]
mod test {
    use rand::prelude::*;
    use rstest::*;

    use super::{LoserTree, RunId, RunNode};

    /// Reference model: the winner must be the `(run, value)` minimum of the
    /// current leaves.
    fn model_min(model: &[(RunId, i32)]) -> (RunId, i32) {
        *model.iter().min().unwrap()
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(5)]
    #[case(16)]
    fn test_winner_is_minimum_under_random_replacements(#[case] k: usize) {
        let mut rng = StdRng::seed_from_u64(7 + k as u64);
        let initial: Vec<i32> = (0..k).map(|_| rng.gen_range(-100..100)).collect();

        let mut tree = LoserTree::new(k);
        tree.initialize(&initial);
        let mut model: Vec<(RunId, i32)> = initial.iter().map(|&v| (1, v)).collect();

        for _ in 0..500 {
            let winner = tree.winner();
            let expected = model_min(&model);
            assert_eq!((winner.run, winner.value), expected);

            let slot = model.iter().position(|&key| key == expected).unwrap();
            let value = rng.gen_range(-100..100);
            let run = rng.gen_range(1..4);
            tree.replace_winner(value, run);
            model[slot] = (run, value);
        }
    }

    #[rstest]
    fn test_draining_yields_sorted_sequence() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut values: Vec<i32> = (0..32).collect();
        values.shuffle(&mut rng);

        let mut tree = LoserTree::new(values.len());
        tree.initialize(&values);

        let mut drained = Vec::new();
        loop {
            let winner = tree.winner();
            if winner.is_sentinel() {
                break;
            }
            drained.push(winner.value);
            tree.seal_winner();
        }

        values.sort();
        assert_eq!(drained, values);
    }

    #[rstest]
    fn test_sentinel_absorbency() {
        let mut tree = LoserTree::<i32>::new(4);
        tree.initialize(&[3, 1, 2]);

        for _ in 0..3 {
            assert!(!tree.winner().is_sentinel());
            tree.seal_winner();
        }
        // once empty, the tree stays empty no matter how often it is sealed
        for _ in 0..4 {
            assert!(tree.winner().is_sentinel());
            tree.seal_winner();
        }
    }

    #[rstest]
    fn test_winner_sequence_is_deterministic() {
        let collect_sequence = || {
            let mut rng = StdRng::seed_from_u64(99);
            let initial: Vec<i32> = (0..8).map(|_| rng.gen_range(0..10)).collect();
            let mut tree = LoserTree::new(8);
            tree.initialize(&initial);

            let mut sequence = Vec::new();
            for _ in 0..200 {
                let winner = tree.winner();
                sequence.push((winner.run, winner.value));
                let value = rng.gen_range(0..10);
                tree.replace_winner(value, winner.run + (value % 2) as u64);
            }
            sequence
        };

        assert_eq!(collect_sequence(), collect_sequence());
    }

    #[rstest]
    fn test_later_run_never_beats_earlier_run() {
        let mut tree = LoserTree::<i32>::new(4);
        tree.initialize(&[10, 20, 30, 40]);

        // retag the winner with run 2 and a tiny value; run-1 records must
        // still surface first
        tree.replace_winner(-1000, 2);
        let winner = tree.winner();
        assert_eq!(winner.run, 1);
        assert_eq!(winner.value, 20);
    }

    #[rstest]
    fn test_under_filled_workspace() {
        let mut tree = LoserTree::<i32>::new(8);
        tree.initialize(&[5]);

        let RunNode { value, run } = tree.winner();
        assert_eq!((value, run), (5, 1));
        tree.seal_winner();
        assert!(tree.winner().is_sentinel());
    }
}
