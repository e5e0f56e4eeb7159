//! The Kupferman–Vardi rank construction.
//!
//! Macrostates are triples `⟨S, O, f⟩` with ranks bounded by `2n`. The
//! construction enumerates every admissible rank function without any
//! tightness requirement, which makes it simple and exponentially
//! wasteful; it mainly serves as a reference point for the Schewe
//! variants.

use std::collections::BTreeSet;

use tracing::debug;

use crate::buchi::BuchiAutomaton;
use crate::complement::rank::{RankConstraint, RankFunc};
use crate::complement::{ComplementError, Options};
use crate::{Rank, StateId, StateSet, SymbolId};

/// A KV macrostate `⟨S, O, f⟩`. Accepting iff `O` is empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KvState {
    pub states: StateSet,
    pub pending: StateSet,
    pub rank: RankFunc,
}

impl std::fmt::Display for KvState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.states, self.pending, self.rank)
    }
}

fn kv_succs(
    aut: &BuchiAutomaton<StateId>,
    finals: &StateSet,
    state: &KvState,
    symbol: SymbolId,
) -> Vec<KvState> {
    let bound = 2 * aut.num_states() as Rank;
    let mut sprime = StateSet::new();
    let mut ceil = std::collections::BTreeMap::new();

    for p in state.states.iter() {
        let rp = state.rank.get(p).unwrap();
        if let Some(dsts) = aut.successors(&p, symbol) {
            for &d in dsts {
                let entry = ceil.entry(d).or_insert(bound);
                *entry = (*entry).min(rp);
            }
            sprime.extend(dsts.iter().copied());
        }
    }
    for (&q, c) in ceil.iter_mut() {
        if finals.contains(q) && *c % 2 != 0 {
            *c -= 1;
        }
    }

    let pending_base = if state.pending.is_empty() {
        sprime.clone()
    } else {
        aut.succ_set(&state.pending, symbol)
    };

    let constr = RankConstraint::stepped(&sprime, finals, |q| ceil[&q]);
    constr
        .all()
        .map(|rank| {
            let pending = pending_base.difference(&rank.odd_states());
            KvState {
                states: sprime.clone(),
                pending,
                rank,
            }
        })
        .collect()
}

/// Complements the automaton with the KV construction.
pub fn complement_kv(
    aut: &BuchiAutomaton<StateId>,
    opts: &Options,
) -> Result<BuchiAutomaton<KvState>, ComplementError> {
    let finals = aut.final_set();
    let initial = aut.initial_set();
    let bound = 2 * aut.num_states() as Rank;

    let mut out = BuchiAutomaton::new(aut.alphabet_len());
    let mut explored: BTreeSet<KvState> = BTreeSet::new();
    let mut stack: Vec<KvState> = Vec::new();

    let init_constr = RankConstraint::stepped(&initial, &finals, |_| bound);
    for rank in init_constr.all() {
        let state = KvState {
            states: initial.clone(),
            pending: StateSet::new(),
            rank,
        };
        out.add_initial(state.clone());
        if explored.insert(state.clone()) {
            stack.push(state);
        }
    }

    while let Some(state) = stack.pop() {
        if let Some(limit) = opts.max_states {
            if explored.len() > limit {
                return Err(ComplementError::CapacityExceeded { limit });
            }
        }
        if state.pending.is_empty() {
            out.add_final(state.clone());
        }
        for symbol in aut.symbols() {
            for succ in kv_succs(aut, &finals, &state, symbol) {
                out.add_transition(state.clone(), symbol, succ.clone());
                if explored.insert(succ.clone()) {
                    stack.push(succ);
                }
            }
        }
    }

    debug!(
        states = out.num_states(),
        transitions = out.num_transitions(),
        "KV construction finished"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complement::Options;

    /// -> q0 --a--> q0 (accepting): L = a^ω.
    fn a_omega() -> BuchiAutomaton<StateId> {
        let mut aut = BuchiAutomaton::new(1);
        aut.add_initial(0);
        aut.add_final(0);
        aut.add_transition(0, 0, 0);
        aut
    }

    #[test]
    fn test_kv_complement_of_universal_is_empty() {
        let aut = a_omega();
        let comp = complement_kv(&aut, &Options::default()).unwrap();
        let (dense, _) = comp.rename();
        assert!(!dense.accepts_ultimately_periodic(&[], &[0]));
    }

    #[test]
    fn test_kv_initial_ranks_are_even_on_accepting_states() {
        let aut = a_omega();
        let comp = complement_kv(&aut, &Options::default()).unwrap();
        for st in comp.initials() {
            assert_eq!(st.rank.get(0).unwrap() % 2, 0);
        }
    }

    #[test]
    fn test_kv_capacity_guard() {
        let aut = a_omega();
        let opts = Options {
            max_states: Some(1),
            ..Options::default()
        };
        let err = complement_kv(&aut, &opts).unwrap_err();
        assert!(matches!(err, ComplementError::CapacityExceeded { .. }));
    }
}
