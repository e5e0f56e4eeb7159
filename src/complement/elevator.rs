//! Elevator-automaton analysis: SCC classification and rank assignment.
//!
//! An elevator automaton is one whose SCCs are each fully deterministic or
//! fully non-accepting; such automata admit a small rank bound read off
//! the component structure. The analysis classifies the SCCs of the input
//! automaton, merges adjacent compatible components, and assigns even
//! ranks to deterministic-accepting partitions and odd ranks to
//! nondeterministic ones, increasing from the sinks upward. Macrostates
//! wholly inside the classified region then cap their rank bound by the
//! largest member rank.

use std::collections::BTreeMap;

use tracing::debug;

use crate::buchi::BuchiAutomaton;
use crate::complement::waiting::WaitingPart;
use crate::graph;
use crate::{StateId, StateSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SccKind {
    /// Deterministic with an accepting state.
    Det,
    /// Nondeterministic without accepting states.
    Nondet,
    /// Deterministic without accepting states; merges either way.
    Both,
    /// Everything else; no elevator rank exists.
    Bad,
}

fn classify(
    aut: &BuchiAutomaton<StateId>,
    finals: &StateSet,
    component: &[StateId],
) -> SccKind {
    let inside = |q: StateId| component.contains(&q);
    let det = component.iter().all(|&q| {
        aut.symbols().all(|a| {
            aut.successors(&q, a)
                .map_or(0, |dsts| dsts.iter().filter(|&&d| inside(d)).count())
                <= 1
        })
    });
    let accepting = component.iter().any(|&q| finals.contains(q));
    match (det, accepting) {
        (true, true) => SccKind::Det,
        (false, false) => SccKind::Nondet,
        (true, false) => SccKind::Both,
        (false, true) => SccKind::Bad,
    }
}

/// Checks that the transitions of `component` into `component ∪ absorbed`
/// are deterministic, the side condition for merging into a deterministic
/// partition.
fn cross_deterministic(
    aut: &BuchiAutomaton<StateId>,
    component: &[StateId],
    absorbed: &StateSet,
) -> bool {
    component.iter().all(|&q| {
        aut.symbols().all(|a| {
            aut.successors(&q, a)
                .map_or(0, |dsts| {
                    dsts.iter()
                        .filter(|&&d| component.contains(&d) || absorbed.contains(d))
                        .count()
                })
                <= 1
        })
    })
}

/// Assigns an elevator rank to every state in the non-`Bad` region.
/// States whose component is (or is poisoned by) a `Bad` component get no
/// rank.
pub fn elevator_ranks(aut: &BuchiAutomaton<StateId>) -> BTreeMap<StateId, i64> {
    let n = aut.num_states();
    let finals = aut.final_set();
    let components = graph::scc_topological(n, |q| {
        let mut succs: Vec<StateId> = Vec::new();
        for a in aut.symbols() {
            if let Some(dsts) = aut.successors(&q, a) {
                succs.extend(dsts.iter().copied());
            }
        }
        succs.sort_unstable();
        succs.dedup();
        succs
    });

    let mut kinds: Vec<SccKind> = components
        .iter()
        .map(|c| classify(aut, &finals, c))
        .collect();

    // A component that can reach a Bad component is itself unusable;
    // components are in topological order, so everything before the last
    // Bad component is poisoned.
    if let Some(last_bad) = kinds.iter().rposition(|&k| k == SccKind::Bad) {
        for kind in kinds.iter_mut().take(last_bad) {
            *kind = SccKind::Bad;
        }
    }

    // Merge consecutive compatible components, sink side first. The rules
    // are: ND∪ND and BOTH∪ND give ND; D∪D and BOTH∪D give D when the
    // involved transitions stay deterministic; BOTH∪BOTH stays BOTH under
    // the same condition.
    let mut partition: Vec<(StateSet, SccKind)> = Vec::new();
    let mut acc: Option<(StateSet, SccKind)> = None;
    for (component, &kind) in components.iter().zip(&kinds).rev() {
        if kind == SccKind::Bad {
            break;
        }
        match acc.take() {
            None => {
                acc = Some((component.iter().copied().collect(), kind));
            }
            Some((states, acc_kind)) => {
                let merged = match (acc_kind, kind) {
                    (SccKind::Nondet, SccKind::Nondet)
                    | (SccKind::Nondet, SccKind::Both)
                    | (SccKind::Both, SccKind::Nondet) => Some(SccKind::Nondet),
                    (SccKind::Det, SccKind::Det)
                    | (SccKind::Det, SccKind::Both)
                    | (SccKind::Both, SccKind::Det)
                        if cross_deterministic(aut, component, &states) =>
                    {
                        Some(SccKind::Det)
                    }
                    (SccKind::Both, SccKind::Both)
                        if cross_deterministic(aut, component, &states) =>
                    {
                        Some(SccKind::Both)
                    }
                    _ => None,
                };
                match merged {
                    Some(joined_kind) => {
                        let mut joined = states;
                        joined.extend(component.iter().copied());
                        acc = Some((joined, joined_kind));
                    }
                    None => {
                        partition.push((states, acc_kind));
                        acc = Some((component.iter().copied().collect(), kind));
                    }
                }
            }
        }
    }
    if let Some(last) = acc {
        partition.push(last);
    }

    // Ranks increase from the sinks upward: even for deterministic
    // partitions, odd for nondeterministic ones.
    let mut ranks = BTreeMap::new();
    let mut rank: i64 = 2;
    for (states, kind) in &partition {
        match kind {
            SccKind::Det if rank % 2 == 1 => rank += 1,
            SccKind::Nondet if rank % 2 == 0 => rank += 1,
            _ => {}
        }
        for q in states.iter() {
            ranks.insert(q, rank);
        }
        rank += 1;
    }
    debug!(ranked = ranks.len(), partitions = partition.len(), "elevator ranks");
    ranks
}

/// Caps each waiting macrostate's rank bound by the largest elevator rank
/// among its members. Macrostates containing an unranked state keep their
/// bound.
pub fn refine_bounds(
    bounds: &mut [i64],
    waiting: &WaitingPart,
    ranks: &BTreeMap<StateId, i64>,
) {
    for id in waiting.ids() {
        let s = waiting.set(id);
        if s.is_empty() {
            continue;
        }
        let mut max = 0i64;
        let mut ranked = true;
        for q in s.iter() {
            match ranks.get(&q) {
                Some(&r) => max = max.max(r),
                None => {
                    ranked = false;
                    break;
                }
            }
        }
        if ranked && bounds[id] > max {
            debug!(id, old = bounds[id], new = max, "elevator bound update");
            bounds[id] = max;
        }
    }
}
