//! Rank functions and their enumeration.
//!
//! A rank function maps the states of a macrostate to bounded non-negative
//! integers and witnesses that the input automaton has no accepting run
//! over the remaining word. Enumeration of candidate rank functions is the
//! hottest loop of the tight part, so it is written as an explicit
//! backtracking iterator over per-state choice lists, with the pruning
//! rules (simulation back-relations, reachability ceilings, tightness and
//! max-rank feasibility) applied to partial assignments as early as
//! possible.
//!
//! Enumeration order is lexicographic in state order over the choice
//! lists, which makes every enumeration deterministic and restartable;
//! the rank cache relies on this.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::complement::sim::BackRel;
use crate::{Rank, StateId, StateSet};

/// A rank function: a total map from the states of a macrostate to ranks.
///
/// Stored as a dense sorted list of `(state, rank)` pairs with the maximum
/// rank cached. Equality, ordering and hashing follow the entry list.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RankFunc {
    entries: SmallVec<[(StateId, Rank); 8]>,
    max: Rank,
}

impl RankFunc {
    /// Builds a rank function from pairs sorted by ascending state id.
    pub fn from_sorted(entries: SmallVec<[(StateId, Rank); 8]>) -> Self {
        debug_assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
        let max = entries.iter().map(|&(_, r)| r).max().unwrap_or(0);
        RankFunc { entries, max }
    }

    /// Builds a rank function over `states` by evaluating `rank` on each.
    pub fn from_fn(states: &StateSet, rank: impl Fn(StateId) -> Rank) -> Self {
        Self::from_sorted(states.iter().map(|q| (q, rank(q))).collect())
    }

    /// Returns the rank of `state`, if it is in the domain.
    pub fn get(&self, state: StateId) -> Option<Rank> {
        self.entries
            .binary_search_by_key(&state, |&(q, _)| q)
            .ok()
            .map(|i| self.entries[i].1)
    }

    /// Returns the maximum rank, or 0 for the empty function.
    pub fn max_rank(&self) -> Rank {
        self.max
    }

    /// Returns `true` if the domain is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(state, rank)` pairs in ascending state order.
    pub fn iter(&self) -> impl Iterator<Item = (StateId, Rank)> + '_ {
        self.entries.iter().copied()
    }

    /// Returns the states with an odd rank.
    pub fn odd_states(&self) -> StateSet {
        self.entries
            .iter()
            .filter(|&&(_, r)| r % 2 == 1)
            .map(|&(q, _)| q)
            .collect()
    }

    /// Returns the states with rank exactly `rank`.
    pub fn inverse_rank(&self, rank: Rank) -> StateSet {
        self.entries
            .iter()
            .filter(|&&(_, r)| r == rank)
            .map(|&(q, _)| q)
            .collect()
    }

    /// A rank function is tight iff its maximum is odd and every odd value
    /// up to the maximum is attained.
    pub fn is_tight(&self) -> bool {
        if self.max % 2 == 0 {
            return false;
        }
        let mut attained = vec![false; self.max as usize + 1];
        for &(_, r) in &self.entries {
            attained[r as usize] = true;
        }
        (1..=self.max).step_by(2).all(|o| attained[o as usize])
    }

    /// Returns `true` if this function is pointwise at most `other` on the
    /// shared domain.
    pub fn is_all_leq(&self, other: &RankFunc) -> bool {
        self.entries
            .iter()
            .all(|&(q, r)| other.get(q).map_or(true, |o| r <= o))
    }

    /// Successor validity: every odd rank of the parent must be inherited
    /// by some successor. `succ` maps the parent's non-accepting states to
    /// their successor sets; this function is the candidate successor
    /// rank.
    pub fn is_succ_valid(&self, parent: &RankFunc, succ: &BTreeMap<StateId, StateSet>) -> bool {
        for (&p, dsts) in succ {
            let Some(rp) = parent.get(p) else { continue };
            if rp % 2 == 0 {
                continue;
            }
            if !dsts.iter().any(|d| self.get(d) == Some(rp)) {
                return false;
            }
        }
        true
    }

    /// Returns `true` if the maximum rank is attainable under the given
    /// per-state ceilings (before the even-decrement on accepting states).
    pub fn is_max_rank_valid(&self, ceilings: &[Rank]) -> bool {
        self.max <= ceilings.iter().copied().max().unwrap_or(0)
    }

    /// Decrements the rank of `state` by one. The state must be in the
    /// domain with a positive rank.
    pub fn decrement(&mut self, state: StateId) {
        let i = self
            .entries
            .binary_search_by_key(&state, |&(q, _)| q)
            .expect("state not in rank function domain");
        self.entries[i].1 -= 1;
        self.max = self.entries.iter().map(|&(_, r)| r).max().unwrap_or(0);
    }
}

impl std::fmt::Display for RankFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (q, r)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", q, r)?;
        }
        write!(f, "}}")
    }
}

/// Per-state lists of admissible rank values, ordered by ascending state
/// id with ascending values.
#[derive(Clone, Debug, Default)]
pub struct RankConstraint {
    choices: Vec<(StateId, SmallVec<[Rank; 8]>)>,
}

impl RankConstraint {
    /// Builds the standard constraint over `states`: every value from 0 to
    /// the state's ceiling, stepping by 2 on accepting states so they only
    /// receive even ranks.
    pub fn stepped(states: &StateSet, finals: &StateSet, ceiling: impl Fn(StateId) -> Rank) -> Self {
        let mut choices = Vec::with_capacity(states.len());
        for q in states.iter() {
            let step = if finals.contains(q) { 2 } else { 1 };
            let values: SmallVec<[Rank; 8]> = (0..=ceiling(q)).step_by(step).collect();
            choices.push((q, values));
        }
        RankConstraint { choices }
    }

    /// Returns the number of constrained states.
    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// Enumerates every total rank function selecting one admissible value
    /// per state.
    pub fn all(&self) -> RankGen<'_> {
        RankGen::new(self, Prune::default())
    }

    /// Enumerates the tight rank functions, pruned by the simulation
    /// back-relations and reachability ceilings.
    pub fn tight<'a>(
        &'a self,
        dir: &'a BackRel,
        odd: &'a BackRel,
        reach_cons: &'a [usize],
        reach_max: usize,
    ) -> RankGen<'a> {
        RankGen::new(
            self,
            Prune {
                dir: Some(dir),
                odd: Some(odd),
                reach: Some((reach_cons, reach_max)),
                require_tight: true,
                require_max: None,
            },
        )
    }

    /// Enumerates the tight rank functions whose maximum equals the
    /// parent's maximum rank, with the same prunings as [`Self::tight`].
    pub fn tight_succ<'a>(
        &'a self,
        dir: &'a BackRel,
        odd: &'a BackRel,
        parent_max: Rank,
        reach_cons: &'a [usize],
        reach_max: usize,
    ) -> RankGen<'a> {
        RankGen::new(
            self,
            Prune {
                dir: Some(dir),
                odd: Some(odd),
                reach: Some((reach_cons, reach_max)),
                require_tight: true,
                require_max: Some(parent_max),
            },
        )
    }
}

#[derive(Clone, Copy, Default)]
struct Prune<'a> {
    dir: Option<&'a BackRel>,
    odd: Option<&'a BackRel>,
    reach: Option<(&'a [usize], usize)>,
    require_tight: bool,
    require_max: Option<Rank>,
}

/// Backtracking enumerator over a [`RankConstraint`].
///
/// Iteration is lexicographic: positions follow state order, values are
/// tried in ascending order. All pruning happens against the already
/// assigned prefix, so a rejected partial assignment cuts the whole
/// subtree.
pub struct RankGen<'a> {
    constr: &'a RankConstraint,
    prune: Prune<'a>,
    // stack[i] is the index of the value chosen at position i; values and
    // maxes mirror it with the chosen rank and the prefix maximum.
    stack: Vec<usize>,
    values: Vec<Rank>,
    maxes: Vec<Rank>,
    attained: Vec<u32>,
    // suffix_max[i]: largest value offered at any position >= i.
    suffix_max: Vec<Rank>,
    // avail_last[v]: greatest position offering value v, or -1.
    avail_last: Vec<i64>,
    started: bool,
    done: bool,
}

impl<'a> RankGen<'a> {
    fn new(constr: &'a RankConstraint, prune: Prune<'a>) -> Self {
        let len = constr.choices.len();
        let top = constr
            .choices
            .iter()
            .flat_map(|(_, vs)| vs.iter().copied())
            .max()
            .unwrap_or(0) as usize;

        let mut suffix_max = vec![0; len + 1];
        for i in (0..len).rev() {
            let here = constr.choices[i].1.iter().copied().max().unwrap_or(0);
            suffix_max[i] = here.max(suffix_max[i + 1]);
        }
        let mut avail_last = vec![-1i64; top + 2];
        for (i, (_, vs)) in constr.choices.iter().enumerate() {
            for &v in vs {
                avail_last[v as usize] = avail_last[v as usize].max(i as i64);
            }
        }

        RankGen {
            constr,
            prune,
            stack: Vec::with_capacity(len),
            values: Vec::with_capacity(len),
            maxes: Vec::with_capacity(len),
            attained: vec![0; top + 2],
            suffix_max,
            avail_last,
            started: false,
            done: false,
        }
    }

    fn position_of(&self, state: StateId) -> Option<usize> {
        self.constr
            .choices
            .binary_search_by_key(&state, |&(q, _)| q)
            .ok()
    }

    /// Checks whether value `v` may be placed at position `pos` given the
    /// assigned prefix.
    fn admissible(&self, pos: usize, v: Rank) -> bool {
        let state = self.constr.choices[pos].0;

        if let Some((reach_cons, reach_max)) = self.prune.reach {
            // A state that must keep reach_cons states alive within a run
            // that handles at most reach_max leaves reach_max - reach_cons
            // slots for the odd ranks below its own.
            let slack = reach_max as i64 - reach_cons[state] as i64;
            if v as i64 > 2 * slack + 1 {
                return false;
            }
        }
        if let Some(dir) = self.prune.dir {
            for &(partner, flip) in dir.row(state) {
                if let Some(p) = self.position_of(partner) {
                    if p < pos {
                        let rp = self.values[p];
                        // flip=false: r(partner) <= v; flip=true: v <= r(partner).
                        if (!flip && rp > v) || (flip && v > rp) {
                            return false;
                        }
                    }
                }
            }
        }
        if let Some(odd) = self.prune.odd {
            if v % 2 == 1 {
                for &(partner, flip) in odd.row(state) {
                    if let Some(p) = self.position_of(partner) {
                        if p < pos {
                            let rp = self.values[p];
                            if rp % 2 == 1 && ((!flip && rp > v) || (flip && v > rp)) {
                                return false;
                            }
                        }
                    }
                }
            }
        }

        let prefix_max = self.maxes.last().copied().unwrap_or(0);
        let cur_max = prefix_max.max(v);
        if let Some(m) = self.prune.require_max {
            if v > m {
                return false;
            }
            if cur_max < m && self.suffix_max[pos + 1] < m {
                return false;
            }
        }
        if self.prune.require_tight {
            // Every odd value below the running maximum must already be
            // attained or still on offer at a later position.
            for o in (1..cur_max).step_by(2) {
                let hit = self.attained[o as usize] > 0 || o == v;
                if !hit && self.avail_last[o as usize] <= pos as i64 {
                    return false;
                }
            }
        }
        true
    }

    /// Finds the first admissible value index at `pos`, starting at
    /// `from`.
    fn place(&self, pos: usize, from: usize) -> Option<usize> {
        let values = &self.constr.choices[pos].1;
        (from..values.len()).find(|&i| self.admissible(pos, values[i]))
    }

    fn push(&mut self, pos: usize, idx: usize) {
        let v = self.constr.choices[pos].1[idx];
        let prefix_max = self.maxes.last().copied().unwrap_or(0);
        self.stack.push(idx);
        self.values.push(v);
        self.maxes.push(prefix_max.max(v));
        self.attained[v as usize] += 1;
    }

    fn pop(&mut self) -> usize {
        let idx = self.stack.pop().expect("pop on empty assignment");
        let v = self.values.pop().expect("values out of sync");
        self.maxes.pop();
        self.attained[v as usize] -= 1;
        idx
    }

    fn accepts_complete(&self) -> bool {
        let max = self.maxes.last().copied().unwrap_or(0);
        if let Some(m) = self.prune.require_max {
            if max != m {
                return false;
            }
        }
        if self.prune.require_tight {
            if max % 2 == 0 {
                return false;
            }
            if !(1..=max).step_by(2).all(|o| self.attained[o as usize] > 0) {
                return false;
            }
        }
        true
    }

    fn build(&self) -> RankFunc {
        RankFunc::from_sorted(
            self.constr
                .choices
                .iter()
                .zip(&self.values)
                .map(|(&(q, _), &v)| (q, v))
                .collect(),
        )
    }
}

impl<'a> Iterator for RankGen<'a> {
    type Item = RankFunc;

    fn next(&mut self) -> Option<RankFunc> {
        if self.done {
            return None;
        }
        let len = self.constr.choices.len();
        if len == 0 {
            self.done = true;
            // The empty function is the sole selection; it is never tight.
            if self.prune.require_tight || self.prune.require_max.map_or(false, |m| m != 0) {
                return None;
            }
            return Some(RankFunc::default());
        }

        // After a yield the assignment is full and must be advanced first.
        let mut backtrack = self.started;
        self.started = true;

        loop {
            if backtrack {
                loop {
                    if self.stack.is_empty() {
                        self.done = true;
                        return None;
                    }
                    let pos = self.stack.len() - 1;
                    let idx = self.pop();
                    if let Some(next) = self.place(pos, idx + 1) {
                        self.push(pos, next);
                        break;
                    }
                }
                backtrack = false;
            }
            while self.stack.len() < len {
                let pos = self.stack.len();
                match self.place(pos, 0) {
                    Some(idx) => self.push(pos, idx),
                    None => {
                        backtrack = true;
                        break;
                    }
                }
            }
            if backtrack {
                continue;
            }
            if self.accepts_complete() {
                return Some(self.build());
            }
            backtrack = true;
        }
    }
}

/// Generates the reduced-outdegree family of tight rank functions over a
/// macrostate: for every admissible maximum `2k-1` up to the given bound,
/// the functions that pin each odd value below the maximum to one distinct
/// non-accepting state and push every other state to its largest
/// admissible rank.
pub fn reduced_outdegree_ranks(bound: Rank, states: &StateSet, finals: &StateSet) -> Vec<RankFunc> {
    use itertools::Itertools;

    let non_acc: Vec<StateId> = states.difference(finals).iter().collect();
    let mut out = Vec::new();
    for k in 1..=bound as usize {
        // Maximum 2k-1 needs k-1 states pinned to 1,3,..,2k-3 and at least
        // one more non-accepting state carrying the maximum itself.
        if non_acc.len() < k {
            break;
        }
        let m = 2 * k as Rank - 1;
        for picked in non_acc.iter().copied().permutations(k - 1) {
            let func = RankFunc::from_fn(states, |q| {
                if let Some(j) = picked.iter().position(|&p| p == q) {
                    2 * j as Rank + 1
                } else if finals.contains(q) {
                    m - 1
                } else {
                    m
                }
            });
            debug_assert!(func.is_tight());
            out.push(func);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complement::sim::BackRel;

    fn set(states: &[StateId]) -> StateSet {
        states.iter().copied().collect()
    }

    fn no_rel() -> BackRel {
        BackRel::new(8, &[])
    }

    #[test]
    fn test_all_enumerates_product() {
        let constr = RankConstraint::stepped(&set(&[0, 1]), &set(&[]), |_| 2);
        let ranks: Vec<_> = constr.all().collect();
        assert_eq!(ranks.len(), 9);
        // Lexicographic order: first function is all-zero, last all-two.
        assert_eq!(ranks[0], RankFunc::from_fn(&set(&[0, 1]), |_| 0));
        assert_eq!(ranks[8], RankFunc::from_fn(&set(&[0, 1]), |_| 2));
    }

    #[test]
    fn test_accepting_states_only_get_even_ranks() {
        let constr = RankConstraint::stepped(&set(&[0, 1]), &set(&[1]), |_| 2);
        for r in constr.all() {
            assert_eq!(r.get(1).unwrap() % 2, 0);
        }
        assert_eq!(constr.all().count(), 6);
    }

    #[test]
    fn test_tight_requires_odd_max_and_attained_odds() {
        let states = set(&[0, 1]);
        let constr = RankConstraint::stepped(&states, &set(&[]), |_| 1);
        let dir = no_rel();
        let odd = no_rel();
        let reach = vec![0usize; 8];
        let tight: Vec<_> = constr.tight(&dir, &odd, &reach, 8).collect();
        // (0,1), (1,0), (1,1): max 1 and odd attained.
        assert_eq!(tight.len(), 3);
        assert!(tight.iter().all(|r| r.is_tight()));

        let constr3 = RankConstraint::stepped(&states, &set(&[]), |_| 3);
        for r in constr3.tight(&dir, &odd, &reach, 8) {
            // Max 3 requires both 1 and 3 attained.
            if r.max_rank() == 3 {
                assert!(!r.inverse_rank(1).is_empty());
            }
        }
    }

    #[test]
    fn test_direct_simulation_prunes() {
        // Pair (0,1): state 1 simulates state 0, so r(0) <= r(1).
        let states = set(&[0, 1]);
        let constr = RankConstraint::stepped(&states, &set(&[]), |_| 1);
        let dir = BackRel::new(2, &[(0, 1)]);
        let odd = no_rel();
        let reach = vec![0usize; 2];
        let tight: Vec<_> = constr.tight(&dir, &odd, &reach, 8).collect();
        // (1,0) violates the relation; (0,1) and (1,1) remain.
        assert_eq!(tight.len(), 2);
        assert!(tight.iter().all(|r| r.get(0).unwrap() <= r.get(1).unwrap()));
    }

    #[test]
    fn test_odd_simulation_only_constrains_odd_pairs() {
        let states = set(&[0, 1]);
        let constr = RankConstraint::stepped(&states, &set(&[]), |_| 3);
        let dir = no_rel();
        let reach = vec![0usize; 2];

        // Unconstrained: (0,1), (1,0), (1,1), (1,3), (3,1).
        let odd_free = no_rel();
        assert_eq!(constr.tight(&dir, &odd_free, &reach, 8).count(), 5);

        // Pair (1,0): r(1) <= r(0) whenever both are odd. Only (1,3) has
        // two odd ranks in the wrong order; even ranks stay unconstrained.
        let odd = BackRel::new(2, &[(1, 0)]);
        let tight: Vec<_> = constr.tight(&dir, &odd, &reach, 8).collect();
        assert_eq!(tight.len(), 4);
        assert!(tight
            .iter()
            .all(|r| !(r.get(0).unwrap() == 1 && r.get(1).unwrap() == 3)));
    }

    #[test]
    fn test_reach_ceiling_prunes() {
        let states = set(&[0, 1]);
        let constr = RankConstraint::stepped(&states, &set(&[]), |_| 3);
        let dir = no_rel();
        let odd = no_rel();
        // State 1 always keeps as many states alive as the run handles:
        // no slack, so its rank is capped at 1.
        let reach = vec![0usize, 3];
        let pruned: Vec<_> = constr.tight(&dir, &odd, &reach, 3).collect();
        assert!(!pruned.is_empty());
        for r in pruned {
            assert!(r.get(1).unwrap() <= 1);
        }
    }

    #[test]
    fn test_tight_succ_pins_parent_max() {
        let states = set(&[0, 1]);
        let constr = RankConstraint::stepped(&states, &set(&[]), |_| 3);
        let dir = no_rel();
        let odd = no_rel();
        let reach = vec![0usize; 2];
        let succ: Vec<_> = constr.tight_succ(&dir, &odd, 3, &reach, 8).collect();
        assert!(!succ.is_empty());
        assert!(succ.iter().all(|r| r.max_rank() == 3 && r.is_tight()));
    }

    #[test]
    fn test_succ_validity_inherits_odd_ranks() {
        let parent = RankFunc::from_sorted([(0, 1), (1, 2)].into_iter().collect());
        let mut succ = BTreeMap::new();
        succ.insert(0, set(&[2, 3]));

        let keeps = RankFunc::from_sorted([(2, 1), (3, 0)].into_iter().collect());
        let drops = RankFunc::from_sorted([(2, 0), (3, 0)].into_iter().collect());
        assert!(keeps.is_succ_valid(&parent, &succ));
        assert!(!drops.is_succ_valid(&parent, &succ));
    }

    #[test]
    fn test_all_leq_and_max_rank_valid() {
        let small = RankFunc::from_sorted([(0, 1), (1, 0)].into_iter().collect());
        let large = RankFunc::from_sorted([(0, 1), (1, 2)].into_iter().collect());
        assert!(small.is_all_leq(&large));
        assert!(!large.is_all_leq(&small));
        assert!(large.is_max_rank_valid(&[2, 1]));
        assert!(!large.is_max_rank_valid(&[1, 1]));
    }

    #[test]
    fn test_reduced_outdegree_ranks() {
        let states = set(&[0, 1, 2]);
        let finals = set(&[2]);
        let ranks = reduced_outdegree_ranks(2, &states, &finals);
        // k=1: both non-accepting states at 1, accepting at 0.
        // k=2: one of {0,1} pinned to 1, the other at 3, accepting at 2.
        assert_eq!(ranks.len(), 3);
        assert!(ranks.iter().all(|r| r.is_tight()));
        assert!(ranks.iter().all(|r| r.get(2).unwrap() % 2 == 0));
    }

    #[test]
    fn test_empty_domain_yields_single_empty_function() {
        let constr = RankConstraint::default();
        let all: Vec<_> = constr.all().collect();
        assert_eq!(all, vec![RankFunc::default()]);
    }

    #[test]
    fn test_enumeration_is_deterministic() {
        let states = set(&[0, 1, 2]);
        let constr = RankConstraint::stepped(&states, &set(&[1]), |q| 2 + q as Rank);
        let a: Vec<_> = constr.all().collect();
        let b: Vec<_> = constr.all().collect();
        assert_eq!(a, b);
    }
}
