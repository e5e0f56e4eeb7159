//! The complementation engine.
//!
//! The driver stitches the pieces together: build the waiting part, run
//! the structural analyses, classify self loops, determine the tight-part
//! entry points, explore the tight part, and union everything into the
//! output automaton. Every stage is deterministic; for a fixed input and
//! option record the generated automaton is identical across runs.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::buchi::BuchiAutomaton;
use crate::{Rank, StateId};

pub mod analysis;
pub mod delay;
pub mod elevator;
pub mod kv;
pub mod rank;
pub mod sim;
pub mod tight;
pub mod waiting;

pub use delay::{DelayPolicy, DelayVersion};
pub use kv::KvState;
pub use rank::RankFunc;
pub use sim::SimulationRelations;
pub use tight::{RankCache, SchState, TightState};

use analysis::{classify_self_loops, max_reach, min_reach, rank_bound};
use delay::DelayLabel;
use sim::BackRel;
use tight::TightContext;
use waiting::WaitingPart;

/// Which construction to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// Kupferman–Vardi ranks, no tightness.
    KupfermanVardi,
    /// Schewe's tight construction without the pruning analyses.
    Schewe,
    /// Schewe with rank bounds, reachability ceilings, rank cache,
    /// elevator refinement and self-loop handling.
    #[default]
    ScheweReduced,
}

/// Option record of the engine. The defaults mirror the tool's standard
/// configuration; every field is an independent toggle.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub algorithm: Algorithm,
    /// Track the pending set through the rank's inverse image (breakpoint
    /// construction) instead of the odd-complement.
    pub cut_point: bool,
    /// Enable rank-cache hits by pointwise domination for the successor
    /// emptiness check.
    pub succ_empty_check: bool,
    /// Minimum macrostate size for the reduced-outdegree entry
    /// enumerator.
    pub ro_min_state: usize,
    /// Minimum entry rank ceiling for the same.
    pub ro_min_rank: i64,
    /// Cache successor enumerations only for macrostates up to this size.
    pub cache_max_state: usize,
    /// ... and parent max ranks up to this value.
    pub cache_max_rank: Rank,
    /// Clamp rank bounds to 3 on semideterministic inputs.
    pub semidet_opt: bool,
    /// Refine rank bounds through the elevator-SCC analysis.
    pub elevator_rank: bool,
    /// Skip pending-decrement successors whose macrostate contains no
    /// accepting state.
    pub eta4: bool,
    /// Delayed tight entry, if set.
    pub delay: Option<DelayPolicy>,
    /// Abort with [`ComplementError::CapacityExceeded`] when the number
    /// of generated macrostates exceeds this limit.
    pub max_states: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            algorithm: Algorithm::ScheweReduced,
            cut_point: true,
            succ_empty_check: true,
            ro_min_state: 8,
            ro_min_rank: 6,
            cache_max_state: 6,
            cache_max_rank: 8,
            semidet_opt: true,
            elevator_rank: true,
            eta4: false,
            delay: None,
            max_states: None,
        }
    }
}

/// Failures of a complementation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComplementError {
    /// The construction exceeded the configured macrostate limit. No
    /// partial output is retained.
    CapacityExceeded { limit: usize },
    /// A simulation relation mentions states outside the automaton.
    InvalidSimulation,
}

impl Display for ComplementError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ComplementError::CapacityExceeded { limit } => {
                write!(f, "complementation exceeded the limit of {} states", limit)
            }
            ComplementError::InvalidSimulation => {
                write!(f, "simulation relation mentions unknown states")
            }
        }
    }
}

impl Error for ComplementError {}

/// Per-stage statistics of one complementation call.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub generated_states: usize,
    pub generated_transitions: usize,
    pub final_states: usize,
    pub final_transitions: usize,
    pub waiting_part: Duration,
    pub rank_bound: Duration,
    pub elevator: Duration,
    pub cycle_closing: Duration,
    pub simulations: Duration,
    pub tight_part: Duration,
    pub total: Duration,
}

/// The complement automaton, renamed to dense states and stripped of
/// useless states, together with the construction statistics.
#[derive(Debug, Clone)]
pub struct Complemented {
    pub automaton: BuchiAutomaton<StateId>,
    pub stats: Stats,
}

/// Complements `aut` with the configured construction.
pub fn complement(
    aut: &BuchiAutomaton<StateId>,
    sims: &SimulationRelations,
    opts: &Options,
) -> Result<Complemented, ComplementError> {
    if !sims.is_valid_for(aut.num_states()) {
        return Err(ComplementError::InvalidSimulation);
    }
    let start = Instant::now();
    let mut stats = Stats::default();

    let (renamed, generated_states, generated_transitions) = match opts.algorithm {
        Algorithm::KupfermanVardi => {
            let comp = kv::complement_kv(aut, opts)?;
            let (renamed, _) = comp.rename();
            (renamed, comp.num_states(), comp.num_transitions())
        }
        Algorithm::Schewe => {
            let comp = complement_schewe(aut, sims, opts)?;
            let (renamed, _) = comp.rename();
            (renamed, comp.num_states(), comp.num_transitions())
        }
        Algorithm::ScheweReduced => {
            let comp = complement_schewe_reduced(aut, sims, opts, &mut stats)?;
            let (renamed, _) = comp.rename();
            (renamed, comp.num_states(), comp.num_transitions())
        }
    };

    let trimmed = renamed.remove_useless();
    stats.generated_states = generated_states;
    stats.generated_transitions = generated_transitions;
    stats.final_states = trimmed.num_states();
    stats.final_transitions = trimmed.num_transitions();
    stats.total = start.elapsed();
    info!(
        generated = stats.generated_states,
        kept = stats.final_states,
        elapsed_ms = stats.total.as_millis() as u64,
        "complementation finished"
    );
    Ok(Complemented {
        automaton: trimmed,
        stats,
    })
}

fn check_capacity<Q: Ord + Clone>(
    out: &BuchiAutomaton<Q>,
    opts: &Options,
) -> Result<(), ComplementError> {
    if let Some(limit) = opts.max_states {
        if out.num_states() > limit {
            return Err(ComplementError::CapacityExceeded { limit });
        }
    }
    Ok(())
}

/// Schewe's construction without the pruning analyses: waiting part,
/// tight entry at every cycle-closing macrostate, full tight-rank
/// enumeration for successors.
pub fn complement_schewe(
    aut: &BuchiAutomaton<StateId>,
    sims: &SimulationRelations,
    opts: &Options,
) -> Result<BuchiAutomaton<SchState>, ComplementError> {
    let waiting = WaitingPart::build(aut, aut.initial_set());
    let no_ignore = vec![false; waiting.len()];

    let reach_cons = min_reach(aut);
    let max_reach = max_reach(&waiting, &no_ignore);
    let ctx = TightContext {
        aut,
        finals: aut.final_set(),
        waiting: &waiting,
        // The baseline never consults rank bounds; keep them inert.
        rank_bound: vec![i64::MAX / 4; waiting.len()],
        max_reach,
        reach_cons,
        dir: BackRel::new(aut.num_states(), &sims.direct),
        odd: BackRel::new(aut.num_states(), &sims.odd_rank),
        opts,
        cache: RankCache::default(),
    };

    let mut out = waiting_skeleton(&waiting, aut);
    let preds = waiting.predecessors();
    let closing = waiting.cycle_closing(&no_ignore);

    let mut stack: Vec<TightState> = Vec::new();
    let mut explored: std::collections::BTreeSet<TightState> = std::collections::BTreeSet::new();
    for wid in waiting.ids() {
        if !closing[wid] || waiting.set(wid).is_empty() {
            continue;
        }
        let entries = ctx.entry_states(wid);
        for (pid, symbol) in &preds[wid] {
            for entry in &entries {
                out.add_transition(
                    SchState::Waiting(waiting.set(*pid).clone()),
                    *symbol,
                    SchState::Tight(entry.clone()),
                );
            }
        }
        for entry in entries {
            if explored.insert(entry.clone()) {
                stack.push(entry);
            }
        }
    }

    while let Some(state) = stack.pop() {
        check_capacity(&out, opts)?;
        if state.pending.is_empty() {
            out.add_final(SchState::Tight(state.clone()));
        }
        for symbol in aut.symbols() {
            for succ in ctx.tight_succs(&state, symbol) {
                out.add_transition(
                    SchState::Tight(state.clone()),
                    symbol,
                    SchState::Tight(succ.clone()),
                );
                if explored.insert(succ.clone()) {
                    stack.push(succ);
                }
            }
        }
    }
    Ok(out)
}

/// The reduced construction: all five optimisation layers, optional
/// delayed entry.
pub fn complement_schewe_reduced(
    aut: &BuchiAutomaton<StateId>,
    sims: &SimulationRelations,
    opts: &Options,
    stats: &mut Stats,
) -> Result<BuchiAutomaton<SchState>, ComplementError> {
    let t = Instant::now();
    let waiting = WaitingPart::build(aut, aut.initial_set());
    let preds = waiting.predecessors();
    stats.waiting_part = t.elapsed();

    let finals = aut.final_set();
    let loops = classify_self_loops(aut, &waiting);
    // Sink sources join the accepting self loops in the ignore set for
    // bound propagation and cycle detection.
    let mut ignore_all = loops.accepting.clone();
    for &(wid, _) in &loops.non_accepting {
        ignore_all[wid] = true;
    }

    let reach_cons = min_reach(aut);
    let max_reach_tbl = max_reach(&waiting, &loops.accepting);

    let mut out = waiting_skeleton(&waiting, aut);
    for (serial, &(wid, symbol)) in loops.non_accepting.iter().enumerate() {
        let sink = SchState::Sink(serial);
        out.add_transition(
            SchState::Waiting(waiting.set(wid).clone()),
            symbol,
            sink.clone(),
        );
        out.add_transition(sink.clone(), symbol, sink.clone());
        out.add_final(sink);
    }

    let t = Instant::now();
    let mut bounds = rank_bound(
        aut,
        &sims.odd_rank,
        &waiting,
        &ignore_all,
        &max_reach_tbl,
        &reach_cons,
        opts.semidet_opt,
    );
    stats.rank_bound = t.elapsed();

    if opts.elevator_rank {
        let t = Instant::now();
        let ranks = elevator::elevator_ranks(aut);
        elevator::refine_bounds(&mut bounds, &waiting, &ranks);
        stats.elevator = t.elapsed();
    }

    let t = Instant::now();
    let (targets, permitted) = match &opts.delay {
        Some(policy) => {
            let labels: Vec<DelayLabel> = waiting
                .ids()
                .map(|id| DelayLabel {
                    size: waiting.set(id).len(),
                    bound: bounds[id],
                    non_acc: waiting.set(id).difference(&finals).len(),
                })
                .collect();
            let entries = delay::permitted_entries(&waiting, &labels, policy, &ignore_all);
            (
                entries.targets.into_iter().collect::<Vec<_>>(),
                Some(entries.permitted),
            )
        }
        None => {
            let closing = waiting.cycle_closing(&ignore_all);
            (
                waiting.ids().filter(|&id| closing[id]).collect::<Vec<_>>(),
                None,
            )
        }
    };
    stats.cycle_closing = t.elapsed();

    let t = Instant::now();
    let mut ctx = TightContext {
        aut,
        finals: finals.clone(),
        waiting: &waiting,
        rank_bound: bounds,
        max_reach: max_reach_tbl,
        reach_cons,
        dir: BackRel::new(aut.num_states(), &sims.direct),
        odd: BackRel::new(aut.num_states(), &sims.odd_rank),
        opts,
        cache: RankCache::default(),
    };
    stats.simulations = t.elapsed();

    let t = Instant::now();
    let mut stack: Vec<TightState> = Vec::new();
    let mut explored: std::collections::BTreeSet<TightState> = std::collections::BTreeSet::new();
    for &wid in &targets {
        if waiting.set(wid).is_empty() {
            continue;
        }
        let entries = ctx.entry_states_reduced(wid);
        for (pid, symbol) in &preds[wid] {
            let allowed = match &permitted {
                Some(permitted) => permitted[*pid].contains(symbol),
                None => true,
            };
            if !allowed {
                continue;
            }
            for entry in &entries {
                out.add_transition(
                    SchState::Waiting(waiting.set(*pid).clone()),
                    *symbol,
                    SchState::Tight(entry.clone()),
                );
            }
        }
        for entry in entries {
            if explored.insert(entry.clone()) {
                stack.push(entry);
            }
        }
    }

    while let Some(state) = stack.pop() {
        check_capacity(&out, opts)?;
        if state.pending.is_empty() {
            out.add_final(SchState::Tight(state.clone()));
        }
        for symbol in aut.symbols() {
            for succ in ctx.tight_succs_reduced(&state, symbol) {
                out.add_transition(
                    SchState::Tight(state.clone()),
                    symbol,
                    SchState::Tight(succ.clone()),
                );
                if explored.insert(succ.clone()) {
                    stack.push(succ);
                }
            }
        }
    }
    stats.tight_part = t.elapsed();
    debug!(
        waiting = waiting.len(),
        tight = explored.len(),
        cache_keys = ctx.cache.len(),
        "reduced construction finished"
    );
    Ok(out)
}

/// The waiting part as a macrostate automaton: all subset states, their
/// transitions, the initial macrostate, and acceptance for the empty
/// macrostate (the input automaton has died).
fn waiting_skeleton(
    waiting: &WaitingPart,
    aut: &BuchiAutomaton<StateId>,
) -> BuchiAutomaton<SchState> {
    let mut out = BuchiAutomaton::new(aut.alphabet_len());
    out.add_initial(SchState::Waiting(aut.initial_set()));
    for id in waiting.ids() {
        let state = SchState::Waiting(waiting.set(id).clone());
        out.add_state(state.clone());
        if state.is_accepting() {
            out.add_final(state.clone());
        }
        for symbol in 0..waiting.alphabet_len() {
            let succ = SchState::Waiting(waiting.set(waiting.succ(id, symbol)).clone());
            out.add_transition(state.clone(), symbol, succ);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(algorithm: Algorithm) -> Options {
        Options {
            algorithm,
            ..Options::default()
        }
    }

    /// -> q0 --a--> q0 (accepting): L = a^ω.
    fn a_omega() -> BuchiAutomaton<StateId> {
        let mut aut = BuchiAutomaton::new(1);
        aut.add_initial(0);
        aut.add_final(0);
        aut.add_transition(0, 0, 0);
        aut
    }

    /// L = "eventually a" over {a, b}; complement is b^ω.
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

    fn lassos(alphabet: usize, max_len: usize) -> Vec<(Vec<usize>, Vec<usize>)> {
        // All (prefix, cycle) pairs over the alphabet up to the length
        // bound; a small but systematic sample of ultimately periodic
        // words.
        let mut words: Vec<Vec<usize>> = vec![vec![]];
        let mut frontier: Vec<Vec<usize>> = vec![vec![]];
        for _ in 0..max_len {
            let mut next = Vec::new();
            for w in &frontier {
                for a in 0..alphabet {
                    let mut w = w.clone();
                    w.push(a);
                    next.push(w);
                }
            }
            words.extend(next.iter().cloned());
            frontier = next;
        }
        let mut out = Vec::new();
        for prefix in &words {
            for cycle in &words {
                if !cycle.is_empty() {
                    out.push((prefix.clone(), cycle.clone()));
                }
            }
        }
        out
    }

    fn assert_complements(aut: &BuchiAutomaton<StateId>, opts: &Options, max_len: usize) {
        let sims = SimulationRelations::identity(aut.num_states());
        let result = complement(aut, &sims, opts).unwrap();
        for (prefix, cycle) in lassos(aut.alphabet_len(), max_len) {
            let in_original = aut.accepts_ultimately_periodic(&prefix, &cycle);
            let in_complement = result
                .automaton
                .accepts_ultimately_periodic(&prefix, &cycle);
            assert!(
                in_original != in_complement,
                "word {:?}({:?})^ω in original: {}, in complement: {} ({:?})",
                prefix,
                cycle,
                in_original,
                in_complement,
                opts.algorithm,
            );
        }
    }

    #[test]
    fn test_complement_universal_language_is_empty() {
        for algorithm in [
            Algorithm::KupfermanVardi,
            Algorithm::Schewe,
            Algorithm::ScheweReduced,
        ] {
            assert_complements(&a_omega(), &options(algorithm), 3);
        }
    }

    #[test]
    fn test_complement_eventually_a_is_b_omega() {
        for algorithm in [
            Algorithm::KupfermanVardi,
            Algorithm::Schewe,
            Algorithm::ScheweReduced,
        ] {
            assert_complements(&eventually_a(), &options(algorithm), 2);
        }
        let result = complement(
            &eventually_a(),
            &SimulationRelations::identity(2),
            &Options::default(),
        )
        .unwrap();
        assert!(result.automaton.accepts_ultimately_periodic(&[], &[1]));
        assert!(!result.automaton.accepts_ultimately_periodic(&[], &[0]));
        assert!(!result.automaton.accepts_ultimately_periodic(&[1], &[0, 1]));
    }

    #[test]
    fn test_complement_dying_automaton_accepts_everything() {
        // q0 --a--> q1, q1 stuck: the original accepts nothing.
        let mut aut = BuchiAutomaton::new(1);
        aut.add_initial(0);
        aut.add_final(1);
        aut.add_transition(0, 0, 1);
        for algorithm in [
            Algorithm::KupfermanVardi,
            Algorithm::Schewe,
            Algorithm::ScheweReduced,
        ] {
            assert_complements(&aut, &options(algorithm), 3);
        }
    }

    #[test]
    fn test_complement_with_options_variations() {
        let variations = [
            Options {
                cut_point: false,
                ..Options::default()
            },
            Options {
                succ_empty_check: false,
                ..Options::default()
            },
            Options {
                elevator_rank: false,
                semidet_opt: false,
                ..Options::default()
            },
            Options {
                eta4: true,
                ..Options::default()
            },
            Options {
                delay: Some(DelayPolicy::default()),
                ..Options::default()
            },
            Options {
                delay: Some(DelayPolicy {
                    weight: 1.0,
                    version: DelayVersion::NonAccepting,
                }),
                ..Options::default()
            },
            Options {
                ro_min_state: 0,
                ro_min_rank: 0,
                ..Options::default()
            },
        ];
        for opts in &variations {
            assert_complements(&eventually_a(), opts, 2);
            assert_complements(&a_omega(), opts, 3);
        }
    }

    #[test]
    fn test_determinism_across_runs() {
        let aut = eventually_a();
        let sims = SimulationRelations::identity(2);
        let first = complement(&aut, &sims, &Options::default()).unwrap();
        let second = complement(&aut, &sims, &Options::default()).unwrap();
        let names = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            crate::buchi::parse::write_ba(&first.automaton, &names),
            crate::buchi::parse::write_ba(&second.automaton, &names),
        );
    }

    #[test]
    fn test_double_complementation_restores_language() {
        let aut = eventually_a();
        let sims = SimulationRelations::identity(aut.num_states());
        let once = complement(&aut, &sims, &Options::default()).unwrap();
        let sims2 = SimulationRelations::identity(once.automaton.num_states());
        let twice = complement(&once.automaton, &sims2, &Options::default()).unwrap();
        for (prefix, cycle) in lassos(2, 2) {
            assert_eq!(
                aut.accepts_ultimately_periodic(&prefix, &cycle),
                twice.automaton.accepts_ultimately_periodic(&prefix, &cycle),
            );
        }
    }

    #[test]
    fn test_capacity_guard_reports_exhaustion() {
        let opts = Options {
            max_states: Some(1),
            ..Options::default()
        };
        let err = complement(&eventually_a(), &SimulationRelations::identity(2), &opts);
        assert!(matches!(
            err,
            Err(ComplementError::CapacityExceeded { limit: 1 })
        ));
    }

    #[test]
    fn test_invalid_simulation_is_rejected() {
        let sims = SimulationRelations {
            direct: vec![(0, 7)],
            odd_rank: vec![],
        };
        let err = complement(&eventually_a(), &sims, &Options::default());
        assert_eq!(err.unwrap_err(), ComplementError::InvalidSimulation);
    }

    #[test]
    fn test_rank_invariants_on_reachable_tight_states() {
        let aut = eventually_a();
        let sims = SimulationRelations::identity(2);
        let mut stats = Stats::default();
        let comp =
            complement_schewe_reduced(&aut, &sims, &Options::default(), &mut stats).unwrap();
        let finals = aut.final_set();
        let mut tight_seen = 0;
        for state in comp.states() {
            let SchState::Tight(t) = state else { continue };
            tight_seen += 1;
            assert!(t.rank.is_tight());
            assert_eq!(t.rank.max_rank() % 2, 1);
            assert_eq!(t.cut % 2, 0);
            assert!(t.cut < t.rank.max_rank());
            for q in t.states.iter() {
                if finals.contains(q) {
                    assert_eq!(t.rank.get(q).unwrap() % 2, 0);
                }
            }
            assert!(t.pending.is_subset(&t.states));
            // Under the breakpoint semantics the pending states sit at
            // the current breakpoint index.
            assert!(t.pending.is_subset(&t.rank.inverse_rank(t.cut)));
        }
        assert!(tight_seen > 0);
    }

    #[test]
    fn test_monotonicity_along_tight_transitions() {
        let aut = eventually_a();
        let sims = SimulationRelations::identity(2);
        let mut stats = Stats::default();
        let comp =
            complement_schewe_reduced(&aut, &sims, &Options::default(), &mut stats).unwrap();
        for (src, symbol, dst) in comp.transitions() {
            let (SchState::Tight(parent), SchState::Tight(child)) = (src, dst) else {
                continue;
            };
            for p in parent.states.iter() {
                let Some(dsts) = aut.successors(&p, symbol) else { continue };
                for &q in dsts {
                    if child.states.contains(q) {
                        assert!(child.rank.get(q).unwrap() <= parent.rank.get(p).unwrap());
                    }
                }
            }
        }
    }

    #[test]
    fn test_semidet_bound_caps_tight_ranks() {
        // Semideterministic: two accepting deterministic sinks.
        let mut aut = BuchiAutomaton::new(2);
        aut.add_initial(0);
        aut.add_final(1);
        aut.add_final(2);
        aut.add_transition(0, 0, 0);
        aut.add_transition(0, 1, 0);
        aut.add_transition(0, 0, 1);
        aut.add_transition(0, 1, 2);
        aut.add_transition(1, 0, 1);
        aut.add_transition(2, 1, 2);
        assert!(aut.is_semi_deterministic());

        let sims = SimulationRelations::identity(aut.num_states());
        let mut stats = Stats::default();
        let opts = Options::default();
        let comp = complement_schewe_reduced(&aut, &sims, &opts, &mut stats).unwrap();
        for state in comp.states() {
            if let SchState::Tight(t) = state {
                // Bound 3 admits the odd ranks 1, 3, 5 at most.
                assert!(t.rank.max_rank() <= 5);
            }
        }
        assert_complements(&aut, &opts, 2);
    }
}
