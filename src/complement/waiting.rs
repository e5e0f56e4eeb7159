//! The waiting part: a subset construction over the input automaton.
//!
//! The waiting part is the non-tight prefix of the Schewe construction:
//! the reachable powerset component with subset transitions. Because the
//! transition function is extended to sets, the waiting part is
//! deterministic with exactly one successor per macrostate and symbol,
//! which the analyses exploit by treating it as a plain index graph.

use std::collections::VecDeque;

use indexmap::IndexMap;

use crate::buchi::BuchiAutomaton;
use crate::graph;
use crate::{StateId, StateSet, SymbolId};

/// The reachable subset-construction graph of an automaton.
#[derive(Debug, Clone, Default)]
pub struct WaitingPart {
    index: IndexMap<StateSet, usize>,
    succ: Vec<Vec<usize>>,
    alphabet_len: usize,
}

impl WaitingPart {
    /// Builds the waiting part reachable from `start`.
    pub fn build(aut: &BuchiAutomaton<StateId>, start: StateSet) -> WaitingPart {
        let alphabet_len = aut.alphabet_len();
        let mut part = WaitingPart {
            index: IndexMap::new(),
            succ: Vec::new(),
            alphabet_len,
        };
        let mut queue: VecDeque<usize> = VecDeque::new();

        part.index.insert(start, 0);
        part.succ.push(vec![usize::MAX; alphabet_len]);
        queue.push_back(0);

        while let Some(id) = queue.pop_front() {
            for symbol in 0..alphabet_len {
                let current = part.index.get_index(id).unwrap().0.clone();
                let next = aut.succ_set(&current, symbol);
                let next_id = match part.index.get(&next) {
                    Some(&existing) => existing,
                    None => {
                        let new_id = part.index.len();
                        part.index.insert(next, new_id);
                        part.succ.push(vec![usize::MAX; alphabet_len]);
                        queue.push_back(new_id);
                        new_id
                    }
                };
                part.succ[id][symbol] = next_id;
            }
        }
        part
    }

    /// Returns the number of macrostates.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns the alphabet size the graph was built over.
    pub fn alphabet_len(&self) -> usize {
        self.alphabet_len
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns the macrostate with the given id.
    pub fn set(&self, id: usize) -> &StateSet {
        self.index.get_index(id).unwrap().0
    }

    /// Returns the id of a macrostate, if it is part of the graph.
    pub fn id_of(&self, set: &StateSet) -> Option<usize> {
        self.index.get(set).copied()
    }

    /// Returns the successor macrostate id on `symbol`.
    pub fn succ(&self, id: usize, symbol: SymbolId) -> usize {
        self.succ[id][symbol]
    }

    /// Iterates over all macrostate ids.
    pub fn ids(&self) -> impl Iterator<Item = usize> {
        0..self.index.len()
    }

    /// Returns for every macrostate its predecessors as `(id, symbol)`
    /// pairs.
    pub fn predecessors(&self) -> Vec<Vec<(usize, SymbolId)>> {
        let mut preds = vec![Vec::new(); self.len()];
        for id in self.ids() {
            for symbol in 0..self.alphabet_len {
                preds[self.succ[id][symbol]].push((id, symbol));
            }
        }
        preds
    }

    /// Returns the symbols on which the macrostate loops back to itself.
    pub fn self_loop_symbols(&self, id: usize) -> Vec<SymbolId> {
        (0..self.alphabet_len)
            .filter(|&a| self.succ[id][a] == id)
            .collect()
    }

    fn adjacency(&self, id: usize) -> Vec<usize> {
        let mut succs: Vec<usize> = self.succ[id].clone();
        succs.sort_unstable();
        succs.dedup();
        succs
    }

    /// Fixed-point label propagation: each macrostate's label shrinks to
    /// the maximum over its successors' labels, where the self-successor
    /// is skipped for macrostates in `sl_ignore`. Labels never grow.
    pub fn propagate_values(&self, init: Vec<i64>, sl_ignore: &[bool]) -> Vec<i64> {
        debug_assert_eq!(init.len(), self.len());
        let mut labels = init;
        let mut changed = true;
        while changed {
            changed = false;
            for id in self.ids() {
                let mut m = 0i64;
                for &t in &self.succ[id] {
                    if t == id && sl_ignore[id] {
                        continue;
                    }
                    m = m.max(labels[t]);
                }
                let updated = labels[id].min(m);
                if updated != labels[id] {
                    labels[id] = updated;
                    changed = true;
                }
            }
        }
        labels
    }

    /// Returns for every macrostate whether some cycle passes through it,
    /// where self loops at macrostates in `sl_ignore` do not count.
    pub fn cycle_closing(&self, sl_ignore: &[bool]) -> Vec<bool> {
        let mut closing = vec![false; self.len()];
        for component in graph::tarjan_scc(self.len(), |id| self.adjacency(id)) {
            let nontrivial = component.len() > 1;
            for &id in &component {
                closing[id] =
                    nontrivial || (!sl_ignore[id] && !self.self_loop_symbols(id).is_empty());
            }
        }
        closing
    }

    /// Returns for every macrostate whether some infinite run passes
    /// through it: it can reach a cyclic component. In a graph with total
    /// transitions this covers every macrostate.
    pub fn eventually_reachable(&self) -> Vec<bool> {
        let cyclic = graph::on_cycle(self.len(), |id| self.adjacency(id));
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); self.len()];
        for id in self.ids() {
            for &t in &self.succ[id] {
                preds[t].push(id);
            }
        }
        let mut eventual = cyclic;
        let mut queue: VecDeque<usize> = self.ids().filter(|&id| eventual[id]).collect();
        while let Some(id) = queue.pop_front() {
            for &p in &preds[id] {
                if !eventual[p] {
                    eventual[p] = true;
                    queue.push_back(p);
                }
            }
        }
        eventual
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// -> q0 --a--> {q0,q1}, q0 --b--> q0, q1 --a/b--> q1 (q1 accepting)
    fn eventually_a() -> BuchiAutomaton<StateId> {
        let mut aut = BuchiAutomaton::new(2);
        aut.add_initial(0);
        aut.add_final(1);
        aut.add_transition(0, 0, 0);
        aut.add_transition(0, 0, 1);
        aut.add_transition(0, 1, 0);
        aut.add_transition(1, 0, 1);
        aut.add_transition(1, 1, 1);
        aut
    }

    #[test]
    fn test_build_reaches_all_subsets() {
        let aut = eventually_a();
        let part = WaitingPart::build(&aut, aut.initial_set());
        // {0} --a--> {0,1} --a/b--> {0,1}; {0} --b--> {0}.
        assert_eq!(part.len(), 2);
        let q0 = part.id_of(&[0].into_iter().collect()).unwrap();
        let q01 = part.id_of(&[0, 1].into_iter().collect()).unwrap();
        assert_eq!(part.succ(q0, 0), q01);
        assert_eq!(part.succ(q0, 1), q0);
        assert_eq!(part.succ(q01, 0), q01);
    }

    #[test]
    fn test_empty_set_self_loops() {
        let mut aut = BuchiAutomaton::new(1);
        aut.add_initial(0);
        aut.add_state(0);
        // No transitions at all: {0} --a--> {} --a--> {}.
        let part = WaitingPart::build(&aut, aut.initial_set());
        assert_eq!(part.len(), 2);
        let empty = part.id_of(&StateSet::new()).unwrap();
        assert_eq!(part.succ(empty, 0), empty);
        assert_eq!(part.self_loop_symbols(empty), vec![0]);
    }

    #[test]
    fn test_cycle_closing_ignores_marked_self_loops() {
        let aut = eventually_a();
        let part = WaitingPart::build(&aut, aut.initial_set());
        let q0 = part.id_of(&[0].into_iter().collect()).unwrap();

        let closing = part.cycle_closing(&vec![false; part.len()]);
        assert!(closing.iter().all(|&c| c));

        let mut ignore = vec![false; part.len()];
        ignore[q0] = true;
        let closing = part.cycle_closing(&ignore);
        assert!(!closing[q0]);
    }

    #[test]
    fn test_propagate_values_shrinks_to_successor_max() {
        let aut = eventually_a();
        let part = WaitingPart::build(&aut, aut.initial_set());
        let q0 = part.id_of(&[0].into_iter().collect()).unwrap();
        let q01 = part.id_of(&[0, 1].into_iter().collect()).unwrap();

        let mut init = vec![0i64; part.len()];
        init[q0] = 5;
        init[q01] = 1;
        let labels = part.propagate_values(init, &vec![false; part.len()]);
        // q0 sees itself (5) and q01 (1); its own label caps at 5.
        assert_eq!(labels[q01], 1);
        assert_eq!(labels[q0], 5);

        // Ignoring q0's self loop caps it at the q01 label.
        let mut init = vec![0i64; part.len()];
        init[q0] = 5;
        init[q01] = 1;
        let mut ignore = vec![false; part.len()];
        ignore[q0] = true;
        let labels = part.propagate_values(init, &ignore);
        assert_eq!(labels[q0], 1);
    }

    #[test]
    fn test_eventually_reachable_covers_cycles_and_beyond() {
        let aut = eventually_a();
        let part = WaitingPart::build(&aut, aut.initial_set());
        assert!(part.eventually_reachable().iter().all(|&b| b));
    }
}
