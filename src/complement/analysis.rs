//! Structural analyses feeding the reduced Schewe construction.
//!
//! All of these are computed once per complementation call, before the
//! tight part is explored: reachability tables bounding how many states a
//! run must keep alive, the per-macrostate rank upper bound, and the
//! classification of waiting-part self loops.

use tracing::debug;

use crate::buchi::BuchiAutomaton;
use crate::complement::sim;
use crate::complement::waiting::WaitingPart;
use crate::{StateId, StateSet, SymbolId};

const INF: i64 = i64::MAX / 2;

/// Classification of single-symbol self loops in the waiting part.
#[derive(Debug, Clone, Default)]
pub struct SelfLoops {
    /// Macrostates whose single-symbol self loop already witnesses an
    /// accepting run of the input; their loops are ignored by the
    /// analyses and by cycle-closing detection.
    pub accepting: Vec<bool>,
    /// Macrostates with a single-symbol self loop witnessing no accepting
    /// run, as `(waiting id, symbol)`. These receive a dedicated
    /// accepting sink instead of a tight-part exploration.
    pub non_accepting: Vec<(usize, SymbolId)>,
}

/// Decides whether looping at `set` forever on each of the given symbols
/// is accepting for the input automaton: for each symbol, some accepting
/// state of `set` must lie on a cycle labelled with that symbol.
pub fn accept_sl(aut: &BuchiAutomaton<StateId>, set: &StateSet, symbols: &[SymbolId]) -> bool {
    if set.is_empty() {
        return false;
    }
    let finals = aut.final_set();
    let rel = set.intersection(&finals);
    if rel.is_empty() {
        return false;
    }

    symbols.iter().all(|&a| {
        rel.iter().any(|st| {
            // Search the powerset graph from {st} on the single symbol for
            // a set containing st again.
            let mut stack = vec![aut.succ_set(&StateSet::singleton(st), a)];
            let mut seen = std::collections::BTreeSet::new();
            seen.insert(stack[0].clone());
            while let Some(current) = stack.pop() {
                if current.contains(st) {
                    return true;
                }
                let next = aut.succ_set(&current, a);
                if seen.insert(next.clone()) {
                    stack.push(next);
                }
            }
            false
        })
    })
}

/// Classifies the single-symbol self loops of the waiting part.
pub fn classify_self_loops(aut: &BuchiAutomaton<StateId>, waiting: &WaitingPart) -> SelfLoops {
    let mut loops = SelfLoops {
        accepting: vec![false; waiting.len()],
        non_accepting: Vec::new(),
    };
    for id in waiting.ids() {
        let symbols = waiting.self_loop_symbols(id);
        if symbols.len() != 1 {
            continue;
        }
        if accept_sl(aut, waiting.set(id), &symbols) {
            loops.accepting[id] = true;
        } else {
            loops.non_accepting.push((id, symbols[0]));
        }
    }
    loops
}

/// Computes `minReach(q)` for every state: the smallest macrostate size
/// the subset construction started at `{q}` can recur in. States that can
/// die (reach the empty macrostate) get 0.
pub fn min_reach(aut: &BuchiAutomaton<StateId>) -> Vec<usize> {
    let n = aut.num_states();
    let mut ret = vec![n; n];
    for q in 0..n {
        let part = WaitingPart::build(aut, StateSet::singleton(q));
        let loops = classify_self_loops(aut, &part);
        let init: Vec<i64> = part.ids().map(|id| part.set(id).len() as i64).collect();
        let labels = part.propagate_values(init, &loops.accepting);
        let eventual = part.eventually_reachable();

        let mut val = n as i64;
        for id in part.ids() {
            if eventual[id] {
                val = val.min(labels[id]);
            }
        }
        ret[q] = val.max(0) as usize;
    }
    debug!(?ret, "computed min-reach table");
    ret
}

/// Computes `maxReach(S)` for every waiting macrostate: a bound on the
/// macrostate sizes a run through `S` must eventually handle. Self loops
/// at accepting-self-loop macrostates are excluded.
pub fn max_reach(waiting: &WaitingPart, sl_accepting: &[bool]) -> Vec<i64> {
    let init: Vec<i64> = waiting
        .ids()
        .map(|id| waiting.set(id).len() as i64)
        .collect();
    waiting.propagate_values(init, sl_accepting)
}

/// Computes the rank upper bound table: for every waiting macrostate `S`,
/// a bound `k` such that every tight rank function reachable through `S`
/// has maximum rank at most `2k - 1`.
///
/// The per-macrostate seed combines the number of non-accepting states,
/// a counting bound from the reachability tables, the odd-rank-simulation
/// equivalence classes, and (for semideterministic inputs) the constant
/// clamp of 3. The seed is then propagated through the waiting graph:
/// whatever bound the successors admit also bounds the source.
pub fn rank_bound(
    aut: &BuchiAutomaton<StateId>,
    odd_sim: &[(StateId, StateId)],
    waiting: &WaitingPart,
    sl_ignore: &[bool],
    max_reach: &[i64],
    min_reach: &[usize],
    semidet_clamp: bool,
) -> Vec<i64> {
    let finals = aut.final_set();
    let semidet = semidet_clamp && aut.is_semi_deterministic();

    let init: Vec<i64> = waiting
        .ids()
        .map(|id| {
            let s = waiting.set(id);
            let mut classes = sim::equivalence_classes(s, odd_sim) as i64;
            if semidet {
                classes = classes.min(3);
            }
            seed_bound(s, &finals, max_reach[id], min_reach, classes)
        })
        .collect();

    let bounds = waiting.propagate_values(init, sl_ignore);
    debug!(max = bounds.iter().max().copied().unwrap_or(0), "rank bounds");
    bounds
}

fn seed_bound(
    s: &StateSet,
    finals: &StateSet,
    max_reach: i64,
    min_reach: &[usize],
    classes: i64,
) -> i64 {
    let non_acc = s.difference(finals);

    // An accepting state that always recurs at the maximal reach size
    // forces every run into acceptance; no rank is needed at all.
    for st in s.iter() {
        if finals.contains(st) && min_reach[st] as i64 == max_reach {
            return 0;
        }
    }

    let mut max_cnt = 0i64;
    let mut min_min = INF;
    let mut rech_count = vec![0i64; (max_reach.max(0) as usize) + 1];
    for st in non_acc.iter() {
        let mr = min_reach[st] as i64;
        if mr == max_reach {
            max_cnt += 1;
        }
        min_min = min_min.min(mr);
        if mr <= max_reach {
            rech_count[mr as usize] += 1;
        }
    }

    // If many states must each keep at least `i` states alive, they crowd
    // each other out of distinct odd ranks.
    let mut crowd = INF;
    for (i, &cnt) in rech_count.iter().enumerate() {
        if cnt > max_reach - i as i64 {
            crowd = crowd.min(non_acc.len() as i64 - cnt + max_reach - i as i64 + 1);
        }
    }

    let mut rank = (non_acc.len() as i64).min(crowd);
    if max_cnt > 2 {
        rank = rank.min(non_acc.len() as i64 - max_cnt + 1);
    }
    if min_min != INF {
        rank = rank.min(max_reach - min_min + 1).max(0);
    }
    rank.min(classes)
}
