//! The Büchi automaton model.
//!
//! A Büchi automaton is a finite automaton over infinite words; a run is
//! accepting iff it visits an accepting state infinitely often. The type is
//! generic over the state key so that the same representation serves the
//! dense input automaton (`Q = StateId`) and the macrostate automata built
//! by the complementation constructions. All containers are ordered, so
//! iteration and everything derived from it, including the generated
//! complement, is deterministic.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::Bound::Included;

use crate::graph;
use crate::{StateId, StateSet, SymbolId};

pub mod dot;
pub mod parse;

/// A nondeterministic Büchi automaton with states of type `Q`.
///
/// Symbols are dense identifiers in `0..alphabet_len`; the names they were
/// parsed from live in [`parse::AutomatonNames`]. States are added
/// implicitly when transitions, initial states or accepting states mention
/// them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuchiAutomaton<Q: Ord + Clone> {
    alphabet_len: usize,
    states: BTreeSet<Q>,
    initials: BTreeSet<Q>,
    finals: BTreeSet<Q>,
    transitions: BTreeMap<(Q, SymbolId), BTreeSet<Q>>,
}

impl<Q: Ord + Clone> BuchiAutomaton<Q> {
    /// Creates an empty automaton over an alphabet of the given size.
    pub fn new(alphabet_len: usize) -> Self {
        BuchiAutomaton {
            alphabet_len,
            states: BTreeSet::new(),
            initials: BTreeSet::new(),
            finals: BTreeSet::new(),
            transitions: BTreeMap::new(),
        }
    }

    /// Returns the number of alphabet symbols.
    pub fn alphabet_len(&self) -> usize {
        self.alphabet_len
    }

    /// Iterates over the alphabet symbols in ascending order.
    pub fn symbols(&self) -> impl Iterator<Item = SymbolId> {
        0..self.alphabet_len
    }

    /// Adds a state without any transitions.
    pub fn add_state(&mut self, state: Q) {
        self.states.insert(state);
    }

    /// Adds a state to the initial set.
    pub fn add_initial(&mut self, state: Q) {
        self.states.insert(state.clone());
        self.initials.insert(state);
    }

    /// Adds a state to the accepting set.
    pub fn add_final(&mut self, state: Q) {
        self.states.insert(state.clone());
        self.finals.insert(state);
    }

    /// Adds a transition from `src` to `dst` on `symbol`.
    pub fn add_transition(&mut self, src: Q, symbol: SymbolId, dst: Q) {
        debug_assert!(symbol < self.alphabet_len);
        self.states.insert(src.clone());
        self.states.insert(dst.clone());
        self.transitions
            .entry((src, symbol))
            .or_default()
            .insert(dst);
    }

    /// Returns the number of states.
    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    /// Returns the number of transitions, counting each `(src, symbol,
    /// dst)` triple once.
    pub fn num_transitions(&self) -> usize {
        self.transitions.values().map(|dsts| dsts.len()).sum()
    }

    /// Iterates over the states in ascending order.
    pub fn states(&self) -> impl Iterator<Item = &Q> {
        self.states.iter()
    }

    /// Returns the set of initial states.
    pub fn initials(&self) -> &BTreeSet<Q> {
        &self.initials
    }

    /// Returns the set of accepting states.
    pub fn finals(&self) -> &BTreeSet<Q> {
        &self.finals
    }

    /// Returns `true` if the given state is accepting.
    pub fn is_final(&self, state: &Q) -> bool {
        self.finals.contains(state)
    }

    /// Returns the successors of `state` on `symbol`, if any transition
    /// exists.
    pub fn successors(&self, state: &Q, symbol: SymbolId) -> Option<&BTreeSet<Q>> {
        self.transitions.get(&(state.clone(), symbol))
    }

    /// Iterates over all transitions as `(src, symbol, dst)` triples in
    /// ascending order.
    pub fn transitions(&self) -> impl Iterator<Item = (&Q, SymbolId, &Q)> {
        self.transitions
            .iter()
            .flat_map(|((src, sym), dsts)| dsts.iter().map(move |dst| (src, *sym, dst)))
    }

    /// Iterates over the outgoing transitions of one state.
    pub fn edges_from(&self, state: &Q) -> impl Iterator<Item = (SymbolId, &BTreeSet<Q>)> {
        self.transitions
            .range((
                Included((state.clone(), 0)),
                Included((state.clone(), SymbolId::MAX)),
            ))
            .map(|((_, sym), dsts)| (*sym, dsts))
    }

    /// Returns the symbols on which `state` has a transition back to
    /// itself, in ascending order.
    pub fn self_loop_symbols(&self, state: &Q) -> Vec<SymbolId> {
        self.edges_from(state)
            .filter(|(_, dsts)| dsts.contains(state))
            .map(|(sym, _)| sym)
            .collect()
    }

    /// Renames the states to dense integers in the automaton's state
    /// order. Returns the renamed automaton together with the state table
    /// mapping new ids back to the original states.
    pub fn rename(&self) -> (BuchiAutomaton<StateId>, Vec<Q>) {
        let table: Vec<Q> = self.states.iter().cloned().collect();
        let id_of: BTreeMap<Q, StateId> = table
            .iter()
            .enumerate()
            .map(|(i, q)| (q.clone(), i))
            .collect();

        let mut out = BuchiAutomaton::new(self.alphabet_len);
        for q in &self.states {
            out.add_state(id_of[q]);
        }
        for q in &self.initials {
            out.add_initial(id_of[q]);
        }
        for q in &self.finals {
            out.add_final(id_of[q]);
        }
        for ((src, sym), dsts) in &self.transitions {
            for dst in dsts {
                out.add_transition(id_of[src], *sym, id_of[dst]);
            }
        }
        (out, table)
    }
}

/// Operations on dense automata, whose states are exactly `0..num_states`.
impl BuchiAutomaton<StateId> {
    /// Returns the set of all successors of the states in `set` on
    /// `symbol`.
    pub fn succ_set(&self, set: &StateSet, symbol: SymbolId) -> StateSet {
        let mut ret = StateSet::new();
        for q in set.iter() {
            if let Some(dsts) = self.successors(&q, symbol) {
                ret.extend(dsts.iter().copied());
            }
        }
        ret
    }

    /// Returns the initial states as a [`StateSet`].
    pub fn initial_set(&self) -> StateSet {
        self.initials.iter().copied().collect()
    }

    /// Returns the accepting states as a [`StateSet`].
    pub fn final_set(&self) -> StateSet {
        self.finals.iter().copied().collect()
    }

    fn adjacency(&self, q: StateId) -> Vec<StateId> {
        let mut succs = BTreeSet::new();
        for (_, dsts) in self.edges_from(&q) {
            succs.extend(dsts.iter().copied());
        }
        succs.into_iter().collect()
    }

    /// Returns `true` if the automaton is semideterministic: every state
    /// reachable from an accepting state has at most one successor per
    /// symbol.
    pub fn is_semi_deterministic(&self) -> bool {
        let mut queue: VecDeque<StateId> = self.finals.iter().copied().collect();
        let mut seen: BTreeSet<StateId> = self.finals.iter().copied().collect();
        while let Some(q) = queue.pop_front() {
            for (_, dsts) in self.edges_from(&q) {
                if dsts.len() > 1 {
                    return false;
                }
                for &dst in dsts {
                    if seen.insert(dst) {
                        queue.push_back(dst);
                    }
                }
            }
        }
        true
    }

    /// Removes states that are unreachable from the initial states or
    /// cannot reach an accepting state lying on a cycle, and renumbers the
    /// survivors densely. The language is preserved.
    pub fn remove_useless(&self) -> BuchiAutomaton<StateId> {
        let n = self.num_states();

        // Forward reachability from the initial states.
        let mut reachable = vec![false; n];
        let mut queue: VecDeque<StateId> = VecDeque::new();
        for &q in &self.initials {
            if !reachable[q] {
                reachable[q] = true;
                queue.push_back(q);
            }
        }
        while let Some(q) = queue.pop_front() {
            for succ in self.adjacency(q) {
                if !reachable[succ] {
                    reachable[succ] = true;
                    queue.push_back(succ);
                }
            }
        }

        // Backward reachability from accepting states on cycles; only
        // those can anchor an accepting run.
        let cyclic = graph::on_cycle(n, |q| self.adjacency(q));
        let mut preds: Vec<Vec<StateId>> = vec![Vec::new(); n];
        for (src, _, dst) in self.transitions() {
            preds[*dst].push(*src);
        }
        let mut useful = vec![false; n];
        for &q in &self.finals {
            if cyclic[q] && !useful[q] {
                useful[q] = true;
                queue.push_back(q);
            }
        }
        while let Some(q) = queue.pop_front() {
            for &p in &preds[q] {
                if !useful[p] {
                    useful[p] = true;
                    queue.push_back(p);
                }
            }
        }

        let keep: Vec<StateId> = (0..n).filter(|&q| reachable[q] && useful[q]).collect();
        let new_id: BTreeMap<StateId, StateId> =
            keep.iter().enumerate().map(|(i, &q)| (q, i)).collect();

        let mut out = BuchiAutomaton::new(self.alphabet_len);
        for &q in &keep {
            out.add_state(new_id[&q]);
            if self.initials.contains(&q) {
                out.add_initial(new_id[&q]);
            }
            if self.finals.contains(&q) {
                out.add_final(new_id[&q]);
            }
            for (sym, dsts) in self.edges_from(&q) {
                for dst in dsts {
                    if let Some(&d) = new_id.get(dst) {
                        out.add_transition(new_id[&q], sym, d);
                    }
                }
            }
        }
        out
    }

    /// Decides whether the automaton accepts the ultimately periodic word
    /// `prefix · cycle^ω`.
    ///
    /// This is a decision procedure on the product of the automaton with
    /// the lasso; it is intended as a test oracle on small automata, not
    /// as a model checker.
    pub fn accepts_ultimately_periodic(&self, prefix: &[SymbolId], cycle: &[SymbolId]) -> bool {
        if cycle.is_empty() {
            return false;
        }
        let n = self.num_states();
        let m = cycle.len();

        // States reachable after reading the prefix.
        let mut current = self.initial_set();
        for &a in prefix {
            current = self.succ_set(&current, a);
        }

        // Product of the automaton with the cycle positions. Node q*m + i
        // reads cycle[i] next.
        let adj = |node: usize| -> Vec<usize> {
            let (q, i) = (node / m, node % m);
            match self.successors(&q, cycle[i]) {
                Some(dsts) => dsts.iter().map(|&d| d * m + (i + 1) % m).collect(),
                None => Vec::new(),
            }
        };

        let mut reachable = vec![false; n * m];
        let mut queue: VecDeque<usize> = VecDeque::new();
        for q in current.iter() {
            let node = q * m;
            if !reachable[node] {
                reachable[node] = true;
                queue.push_back(node);
            }
        }
        while let Some(node) = queue.pop_front() {
            for succ in adj(node) {
                if !reachable[succ] {
                    reachable[succ] = true;
                    queue.push_back(succ);
                }
            }
        }

        let cyclic = graph::on_cycle(n * m, adj);
        (0..n * m).any(|node| reachable[node] && cyclic[node] && self.finals.contains(&(node / m)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// -> q0 --a--> q0, q0 --a--> q1*, q1 --a--> q1
    fn eventually_stuck() -> BuchiAutomaton<StateId> {
        let mut aut = BuchiAutomaton::new(1);
        aut.add_initial(0);
        aut.add_final(1);
        aut.add_transition(0, 0, 0);
        aut.add_transition(0, 0, 1);
        aut.add_transition(1, 0, 1);
        aut
    }

    #[test]
    fn test_succ_set_unions_successors() {
        let aut = eventually_stuck();
        let s: StateSet = [0].into_iter().collect();
        assert_eq!(aut.succ_set(&s, 0).iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_accepts_ultimately_periodic() {
        let aut = eventually_stuck();
        assert!(aut.accepts_ultimately_periodic(&[], &[0]));

        // a-loop on a non-accepting state only.
        let mut rejecting = BuchiAutomaton::new(1);
        rejecting.add_initial(0);
        rejecting.add_transition(0, 0, 0);
        assert!(!rejecting.accepts_ultimately_periodic(&[], &[0]));
    }

    #[test]
    fn test_accepts_respects_cycle_position() {
        // Accepting state only on the "b" step of an (ab)^ω loop.
        let mut aut = BuchiAutomaton::new(2);
        aut.add_initial(0);
        aut.add_final(1);
        aut.add_transition(0, 0, 1);
        aut.add_transition(1, 1, 0);
        assert!(aut.accepts_ultimately_periodic(&[], &[0, 1]));
        assert!(!aut.accepts_ultimately_periodic(&[], &[0]));
        assert!(!aut.accepts_ultimately_periodic(&[1], &[0, 1]));
    }

    #[test]
    fn test_semi_deterministic() {
        assert!(eventually_stuck().is_semi_deterministic());

        let mut aut = eventually_stuck();
        aut.add_transition(1, 0, 0);
        // Now q1 is accepting with two a-successors.
        assert!(!aut.is_semi_deterministic());
    }

    #[test]
    fn test_remove_useless_drops_dead_branch() {
        let mut aut = eventually_stuck();
        // A reachable dead end and an unreachable accepting loop.
        aut.add_transition(0, 0, 2);
        aut.add_final(3);
        aut.add_transition(3, 0, 3);
        let trimmed = aut.remove_useless();
        assert_eq!(trimmed.num_states(), 2);
        assert!(trimmed.accepts_ultimately_periodic(&[], &[0]));
    }

    #[test]
    fn test_rename_round_trips_structure() {
        let mut aut: BuchiAutomaton<String> = BuchiAutomaton::new(1);
        aut.add_initial("start".to_string());
        aut.add_final("loop".to_string());
        aut.add_transition("start".to_string(), 0, "loop".to_string());
        aut.add_transition("loop".to_string(), 0, "loop".to_string());

        let (dense, table) = aut.rename();
        assert_eq!(dense.num_states(), 2);
        assert_eq!(table.len(), 2);
        assert_eq!(dense.num_transitions(), 2);
        assert!(dense.accepts_ultimately_periodic(&[], &[0]));
    }
}
