//! Simulation relations as consumed by the rank enumeration.
//!
//! Computing simulations is not the engine's business; callers hand over
//! the relations as plain pair lists. The engine converts each relation
//! into a back-relation indexed by the larger state id, so that during
//! lexicographic rank enumeration every constraint partner of the state
//! being assigned has already received its rank.

use smallvec::SmallVec;

use crate::StateId;

/// Pre-computed simulation relations over the input automaton.
///
/// A pair `(p, q)` states that `q` simulates `p`; sound rank functions
/// then satisfy `r(p) <= r(q)` (for the odd-rank relation only when both
/// ranks are odd).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationRelations {
    pub direct: Vec<(StateId, StateId)>,
    pub odd_rank: Vec<(StateId, StateId)>,
}

impl SimulationRelations {
    /// The trivial (identity) relations: sound for every automaton, they
    /// simply disable the simulation prunings.
    pub fn identity(_num_states: usize) -> Self {
        SimulationRelations::default()
    }

    /// Returns `true` if every mentioned state id is below `num_states`.
    pub fn is_valid_for(&self, num_states: usize) -> bool {
        self.direct
            .iter()
            .chain(self.odd_rank.iter())
            .all(|&(p, q)| p < num_states && q < num_states)
    }
}

/// A relation re-indexed for enumeration: `row(s)` lists the partners of
/// `s` with smaller id, tagged with the constraint direction.
///
/// For a pair `(p, q)` meaning `r(p) <= r(q)`:
/// - if `p < q`, the entry `(p, false)` on row `q` demands
///   `r(p) <= r(q)`;
/// - if `p > q`, the entry `(q, true)` on row `p` demands
///   `r(p) <= r(q)`.
///
/// Reflexive pairs impose nothing and are dropped.
#[derive(Debug, Clone, Default)]
pub struct BackRel {
    rows: Vec<SmallVec<[(StateId, bool); 4]>>,
}

impl BackRel {
    pub fn new(num_states: usize, pairs: &[(StateId, StateId)]) -> Self {
        let mut rows: Vec<SmallVec<[(StateId, bool); 4]>> = vec![SmallVec::new(); num_states];
        for &(p, q) in pairs {
            if p == q {
                continue;
            }
            if p < q {
                rows[q].push((p, false));
            } else {
                rows[p].push((q, true));
            }
        }
        for row in &mut rows {
            row.sort_unstable();
        }
        BackRel { rows }
    }

    /// Returns the constraint partners of `state` with smaller id.
    pub fn row(&self, state: StateId) -> &[(StateId, bool)] {
        self.rows.get(state).map_or(&[], |r| r.as_slice())
    }
}

/// Counts the equivalence classes of the relation restricted to `subset`,
/// where two states are equivalent iff they simulate each other.
pub fn equivalence_classes(
    subset: &crate::StateSet,
    pairs: &[(StateId, StateId)],
) -> usize {
    use std::collections::HashSet;

    let members: Vec<StateId> = subset.iter().collect();
    let rel: HashSet<(StateId, StateId)> = pairs.iter().copied().collect();
    let equiv = |a: StateId, b: StateId| {
        a == b || (rel.contains(&(a, b)) && rel.contains(&(b, a)))
    };

    let mut representatives: Vec<StateId> = Vec::new();
    for &q in &members {
        if !representatives.iter().any(|&r| equiv(q, r)) {
            representatives.push(q);
        }
    }
    representatives.len()
}
