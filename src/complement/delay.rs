//! Delayed entry into the tight part.
//!
//! By default the construction branches into the tight part on every edge
//! reaching a cycle-closing macrostate. Delayed entry thins this out: a
//! depth-first search of the waiting graph marks exactly its back edges as
//! permitted entry edges. Every cycle contains a back edge, so each lasso
//! of the waiting part still finds an entry point, but most edges no
//! longer spawn tight copies. The scoring policy orders the successor
//! visits of the search and thereby steers which edges end up as back
//! edges: cheap macrostates (small, low rank bound) are visited last, so
//! cycles tend to close at them.

use std::collections::BTreeSet;

use tracing::debug;

use crate::complement::waiting::WaitingPart;
use crate::SymbolId;

/// Scoring variants for delayed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DelayVersion {
    /// Blend of macrostate size and rank bound.
    #[default]
    SizeRank,
    /// Blend of macrostate size and the number of non-accepting states.
    NonAccepting,
}

/// The delayed-entry policy: a scoring variant and the weight blending
/// macrostate size against the variant's second component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayPolicy {
    pub weight: f64,
    pub version: DelayVersion,
}

impl Default for DelayPolicy {
    fn default() -> Self {
        DelayPolicy {
            weight: 0.5,
            version: DelayVersion::SizeRank,
        }
    }
}

/// Per-macrostate ingredients of the entry score.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayLabel {
    pub size: usize,
    pub bound: i64,
    pub non_acc: usize,
}

impl DelayPolicy {
    /// The score of a macrostate; lower scores close cycles.
    pub fn score(&self, label: &DelayLabel) -> f64 {
        let second = match self.version {
            DelayVersion::SizeRank => label.bound as f64,
            DelayVersion::NonAccepting => label.non_acc as f64,
        };
        self.weight * label.size as f64 + (1.0 - self.weight) * second
    }
}

/// The permitted entry edges, indexed by source macrostate.
#[derive(Debug, Clone, Default)]
pub struct DelayedEntries {
    /// `permitted[id]` holds the symbols on which the edge leaving `id`
    /// may branch into the tight part.
    pub permitted: Vec<BTreeSet<SymbolId>>,
    /// The macrostates some permitted edge leads to; these need tight
    /// entry states.
    pub targets: BTreeSet<usize>,
}

/// Computes the permitted entry edges as the back edges of a scored
/// depth-first search over the waiting graph. Self loops at macrostates
/// in `sl_ignore` are skipped, exactly as in cycle-closing detection.
pub fn permitted_entries(
    waiting: &WaitingPart,
    labels: &[DelayLabel],
    policy: &DelayPolicy,
    sl_ignore: &[bool],
) -> DelayedEntries {
    const UNSEEN: u8 = 0;
    const ACTIVE: u8 = 1;
    const DONE: u8 = 2;

    let n = waiting.len();
    let mut colour = vec![UNSEEN; n];
    let mut entries = DelayedEntries {
        permitted: vec![BTreeSet::new(); n],
        targets: BTreeSet::new(),
    };

    // Successors ordered by descending score, so low-scored macrostates
    // are explored last and collect the back edges.
    let ordered = |id: usize| -> Vec<SymbolId> {
        let mut syms: Vec<SymbolId> = (0..waiting.alphabet_len()).collect();
        syms.sort_by(|&a, &b| {
            let sa = policy.score(&labels[waiting.succ(id, a)]);
            let sb = policy.score(&labels[waiting.succ(id, b)]);
            sb.total_cmp(&sa).then(a.cmp(&b))
        });
        syms
    };

    for root in 0..n {
        if colour[root] != UNSEEN {
            continue;
        }
        let mut stack: Vec<(usize, Vec<SymbolId>, usize)> = vec![(root, ordered(root), 0)];
        colour[root] = ACTIVE;
        while !stack.is_empty() {
            let (id, symbol) = {
                let frame = stack.last_mut().unwrap();
                if frame.2 >= frame.1.len() {
                    (frame.0, None)
                } else {
                    let s = frame.1[frame.2];
                    frame.2 += 1;
                    (frame.0, Some(s))
                }
            };
            let Some(symbol) = symbol else {
                colour[id] = DONE;
                stack.pop();
                continue;
            };
            let target = waiting.succ(id, symbol);
            if target == id && sl_ignore[id] {
                continue;
            }
            match colour[target] {
                ACTIVE => {
                    // A back edge: every cycle through it may enter the
                    // tight part here.
                    entries.permitted[id].insert(symbol);
                    entries.targets.insert(target);
                }
                UNSEEN => {
                    colour[target] = ACTIVE;
                    stack.push((target, ordered(target), 0));
                }
                _ => {}
            }
        }
    }

    debug!(
        targets = entries.targets.len(),
        edges = entries.permitted.iter().map(|p| p.len()).sum::<usize>(),
        "delayed entry edges"
    );
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buchi::BuchiAutomaton;
    use crate::StateId;

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
    fn test_every_cycle_keeps_an_entry() {
        let aut = eventually_a();
        let part = WaitingPart::build(&aut, aut.initial_set());
        let labels: Vec<DelayLabel> = part
            .ids()
            .map(|id| DelayLabel {
                size: part.set(id).len(),
                bound: part.set(id).len() as i64,
                non_acc: part.set(id).len(),
            })
            .collect();
        let entries = permitted_entries(
            &part,
            &labels,
            &DelayPolicy::default(),
            &vec![false; part.len()],
        );

        // Both self loops ({0} on b, {0,1} on a and b) must keep a back
        // edge; every target of a permitted edge is recorded.
        assert!(!entries.targets.is_empty());
        for id in part.ids() {
            for &sym in &entries.permitted[id] {
                assert!(entries.targets.contains(&part.succ(id, sym)));
            }
        }
        let q0 = part.id_of(&[0].into_iter().collect()).unwrap();
        let q01 = part.id_of(&[0, 1].into_iter().collect()).unwrap();
        assert!(entries.permitted[q0].contains(&1));
        assert!(!entries.permitted[q01].is_empty());
    }

    #[test]
    fn test_ignored_self_loops_grant_no_entry() {
        let mut aut = BuchiAutomaton::new(1);
        aut.add_initial(0);
        aut.add_final(0);
        aut.add_transition(0, 0, 0);
        let part = WaitingPart::build(&aut, aut.initial_set());
        let labels = vec![DelayLabel::default(); part.len()];
        let mut ignore = vec![false; part.len()];
        let q0 = part.id_of(&[0].into_iter().collect()).unwrap();
        ignore[q0] = true;
        let entries = permitted_entries(&part, &labels, &DelayPolicy::default(), &ignore);
        assert!(entries.permitted[q0].is_empty());
    }
}
