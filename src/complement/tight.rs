//! Tight macrostates and their successor generation.
//!
//! The tight part annotates every macrostate with a tight rank function, a
//! breakpoint index and the set of pending states awaiting an even-rank
//! witness. Successor generation is where the optimisations of the
//! reduced construction concentrate: rank-bound cut-offs, the cache of
//! previously enumerated successor ranks keyed by pointwise domination,
//! and the collapse onto the pointwise-maximal successor rank.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::buchi::BuchiAutomaton;
use crate::complement::rank::{reduced_outdegree_ranks, RankConstraint, RankFunc};
use crate::complement::sim::BackRel;
use crate::complement::waiting::WaitingPart;
use crate::complement::Options;
use crate::{Rank, StateId, StateSet, SymbolId};

/// A tight macrostate `⟨S, O, f, i⟩`: the tracked states, the pending
/// subset, a tight rank function over `S`, and the breakpoint index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TightState {
    pub states: StateSet,
    pub pending: StateSet,
    pub rank: RankFunc,
    pub cut: Rank,
}

/// A macrostate of the Schewe construction. The waiting and tight parts
/// have genuinely different shapes, so they are separate variants rather
/// than a flag; sinks installed for non-accepting self loops are a third,
/// always-accepting shape.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SchState {
    /// A subset-construction macrostate of the waiting part.
    Waiting(StateSet),
    /// A rank-annotated macrostate of the tight part.
    Tight(TightState),
    /// An accepting sink replacing a single-symbol non-accepting self
    /// loop, identified by a serial number.
    Sink(usize),
}

impl SchState {
    /// A waiting macrostate accepts iff the input automaton has died; a
    /// tight macrostate accepts at its breakpoints, when no state is
    /// pending; sinks always accept.
    pub fn is_accepting(&self) -> bool {
        match self {
            SchState::Waiting(s) => s.is_empty(),
            SchState::Tight(t) => t.pending.is_empty(),
            SchState::Sink(_) => true,
        }
    }
}

impl std::fmt::Display for SchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchState::Waiting(s) => write!(f, "W{}", s),
            SchState::Tight(t) => write!(
                f,
                "T({}, {}, {}, {})",
                t.states, t.pending, t.rank, t.cut
            ),
            SchState::Sink(k) => write!(f, "sink{}", k),
        }
    }
}

/// Cache of enumerated successor rank lists, keyed by `(S, symbol,
/// parent max rank)`.
///
/// Each key holds a list of `(parent rank, successor ranks)` entries; a
/// lookup hits when a stored parent rank dominates the queried one
/// pointwise, in which case the stored successor list applies (filtered
/// by the caller against the fresh per-state ceilings).
#[derive(Debug, Default)]
pub struct RankCache {
    entries: HashMap<(StateSet, SymbolId, Rank), Vec<(RankFunc, Vec<RankFunc>)>>,
}

impl RankCache {
    /// Returns the successor list of the first entry whose parent rank
    /// dominates `parent`.
    pub fn lookup(
        &self,
        states: &StateSet,
        symbol: SymbolId,
        max: Rank,
        parent: &RankFunc,
    ) -> Option<&[RankFunc]> {
        let bucket = self.entries.get(&(states.clone(), symbol, max))?;
        bucket
            .iter()
            .find(|(cached, _)| parent.is_all_leq(cached))
            .map(|(_, succs)| succs.as_slice())
    }

    /// Appends a freshly enumerated entry.
    pub fn insert(
        &mut self,
        states: StateSet,
        symbol: SymbolId,
        max: Rank,
        parent: RankFunc,
        succs: Vec<RankFunc>,
    ) {
        self.entries
            .entry((states, symbol, max))
            .or_default()
            .push((parent, succs));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything the tight-part exploration needs, owned for the duration of
/// one complementation call.
pub struct TightContext<'a> {
    pub aut: &'a BuchiAutomaton<StateId>,
    pub finals: StateSet,
    pub waiting: &'a WaitingPart,
    pub rank_bound: Vec<i64>,
    pub max_reach: Vec<i64>,
    pub reach_cons: Vec<usize>,
    pub dir: BackRel,
    pub odd: BackRel,
    pub opts: &'a Options,
    pub cache: RankCache,
}

impl<'a> TightContext<'a> {
    /// Entry states of the tight part for a cycle-closing waiting
    /// macrostate, baseline construction: every tight rank function over
    /// `S` below the ceiling `2·|S \ F| - 1`.
    pub fn entry_states(&self, wid: usize) -> Vec<TightState> {
        let s = self.waiting.set(wid);
        let non_acc = s.difference(&self.finals);
        if non_acc.is_empty() {
            return Vec::new();
        }
        let m = 2 * non_acc.len() as i64 - 1;
        self.enumerate_entries(s, m)
    }

    /// Entry states, reduced construction: the ceiling additionally
    /// respects the macrostate's rank bound, large macrostates switch to
    /// the reduced-outdegree generator, and dominated rank functions are
    /// dropped.
    pub fn entry_states_reduced(&self, wid: usize) -> Vec<TightState> {
        let s = self.waiting.set(wid);
        let non_acc = s.difference(&self.finals);
        let m = (2 * non_acc.len() as i64 - 1).min(2 * self.rank_bound[wid] - 1);
        if m < 1 {
            return Vec::new();
        }

        if s.len() >= self.opts.ro_min_state && m >= self.opts.ro_min_rank {
            let k = ((m + 1) / 2) as Rank;
            return reduced_outdegree_ranks(k, s, &self.finals)
                .into_iter()
                .map(|rank| TightState {
                    states: s.clone(),
                    pending: StateSet::new(),
                    rank,
                    cut: 0,
                })
                .collect();
        }

        let all = self.enumerate_entries(s, m);
        // Keep only maximal rank functions: a function dominated pointwise
        // by another one with the same maximum is redundant as an entry.
        let mut kept = Vec::with_capacity(all.len());
        for candidate in &all {
            let dominated = all.iter().any(|other| {
                other.rank != candidate.rank
                    && other.rank.max_rank() == candidate.rank.max_rank()
                    && candidate.rank.is_all_leq(&other.rank)
            });
            if !dominated {
                kept.push(candidate.clone());
            }
        }
        kept
    }

    fn enumerate_entries(&self, s: &StateSet, m: i64) -> Vec<TightState> {
        if m < 1 {
            return Vec::new();
        }
        let ceiling = |q: StateId| {
            if self.finals.contains(q) && m % 2 != 0 {
                (m - 1) as Rank
            } else {
                m as Rank
            }
        };
        let constr = RankConstraint::stepped(s, &self.finals, ceiling);
        // The S-component of every entry is a waiting macrostate by
        // construction.
        let wid = self.waiting.id_of(s).unwrap();
        let reach_max = self.max_reach[wid].max(0) as usize;
        constr
            .tight(&self.dir, &self.odd, &self.reach_cons, reach_max)
            .map(|rank| TightState {
                states: s.clone(),
                pending: StateSet::new(),
                rank,
                cut: 0,
            })
            .collect()
    }

    /// Common prefix of both tight successor computations: the successor
    /// set, the per-successor rank ceilings, the successor map of
    /// non-accepting states, and the early rejections.
    #[allow(clippy::type_complexity)]
    fn successor_frame(
        &self,
        state: &TightState,
        symbol: SymbolId,
    ) -> Option<(StateSet, BTreeMap<StateId, Rank>, BTreeMap<StateId, StateSet>)> {
        let parent_max = state.rank.max_rank();
        let mut sprime = StateSet::new();
        let mut ceil: BTreeMap<StateId, Rank> = BTreeMap::new();
        let mut succ_map: BTreeMap<StateId, StateSet> = BTreeMap::new();

        for p in state.states.iter() {
            let rp = state.rank.get(p).unwrap();
            let dsts: StateSet = match self.aut.successors(&p, symbol) {
                Some(dsts) => dsts.iter().copied().collect(),
                None => StateSet::new(),
            };
            // A state without successors must have discharged its rank,
            // and a zero-ranked state must be allowed to die.
            if dsts.is_empty() && rp != 0 {
                return None;
            }
            if rp == 0 && self.reach_cons[p] > 0 {
                return None;
            }
            for d in dsts.iter() {
                let entry = ceil.entry(d).or_insert(parent_max);
                *entry = (*entry).min(rp);
            }
            sprime.union_with(&dsts);
            if !self.finals.contains(p) {
                succ_map.insert(p, dsts);
            }
        }
        Some((sprime, ceil, succ_map))
    }

    fn decrement_final_ceilings(&self, ceil: &mut BTreeMap<StateId, Rank>) {
        for (&q, c) in ceil.iter_mut() {
            if self.finals.contains(q) && *c % 2 != 0 {
                *c -= 1;
            }
        }
    }

    fn advance_breakpoint(
        &self,
        state: &TightState,
        symbol: SymbolId,
    ) -> (Rank, Option<StateSet>) {
        if state.pending.is_empty() {
            ((state.cut + 2) % (state.rank.max_rank() + 1), None)
        } else {
            (state.cut, Some(self.aut.succ_set(&state.pending, symbol)))
        }
    }

    /// Tight successors, baseline construction: one successor per
    /// admissible tight rank function with the parent's maximum.
    pub fn tight_succs(&self, state: &TightState, symbol: SymbolId) -> Vec<TightState> {
        let parent_max = state.rank.max_rank();
        let Some((sprime, mut ceil, succ_map)) = self.successor_frame(state, symbol) else {
            return Vec::new();
        };
        let rnk_bnd: Vec<Rank> = sprime.iter().map(|q| ceil[&q]).collect();
        self.decrement_final_ceilings(&mut ceil);
        let (cut, pending_base) = self.advance_breakpoint(state, symbol);

        let spid = self.waiting.id_of(&sprime).unwrap();
        let reach_max = self.max_reach[spid].max(0) as usize;
        let constr = RankConstraint::stepped(&sprime, &self.finals, |q| ceil[&q]);

        let mut ret = Vec::new();
        for rank in constr.tight_succ(
            &self.dir,
            &self.odd,
            parent_max,
            &self.reach_cons,
            reach_max,
        ) {
            if !rank.is_succ_valid(&state.rank, &succ_map) || !rank.is_max_rank_valid(&rnk_bnd) {
                continue;
            }
            let inverse = rank.inverse_rank(cut);
            let pending = match &pending_base {
                None => inverse,
                Some(base) => base.intersection(&inverse),
            };
            ret.push(TightState {
                states: sprime.clone(),
                pending,
                rank,
                cut,
            });
        }
        ret
    }

    /// Tight successors, reduced construction: at most the
    /// pointwise-maximal successor rank survives, with the cache-backed
    /// emptiness check deciding whether any successor exists at all, plus
    /// the pending-decrement variants that empty `O` faster.
    pub fn tight_succs_reduced(&mut self, state: &TightState, symbol: SymbolId) -> Vec<TightState> {
        let parent_max = state.rank.max_rank();
        let Some((sprime, mut ceil, _succ_map)) = self.successor_frame(state, symbol) else {
            return Vec::new();
        };

        // The S-components of tight states are waiting macrostates.
        let swid = self.waiting.id_of(&state.states).unwrap();
        let spid = self.waiting.id_of(&sprime).unwrap();
        if 2 * self.rank_bound[swid] - 1 < parent_max as i64
            || 2 * self.rank_bound[spid] - 1 < parent_max as i64
        {
            return Vec::new();
        }

        let rnk_bnd: Vec<Rank> = sprime.iter().map(|q| ceil[&q]).collect();
        self.decrement_final_ceilings(&mut ceil);
        let (cut, pending_base) = self.advance_breakpoint(state, symbol);

        let reach_max = self.max_reach[spid].max(0) as usize;
        let max_ranks =
            self.reduced_rank_for(state, symbol, &sprime, &ceil, &rnk_bnd, reach_max);

        let mut ret = Vec::new();
        for rank in max_ranks {
            let (pending, cut) = if self.opts.cut_point {
                let inverse = rank.inverse_rank(cut);
                let pending = match &pending_base {
                    None => inverse,
                    Some(base) => base.intersection(&inverse),
                };
                (pending, cut)
            } else {
                let odd = rank.odd_states();
                let pending = match &pending_base {
                    None => sprime.difference(&odd),
                    Some(base) => base.difference(&odd),
                };
                (pending, 0)
            };
            ret.push(TightState {
                states: sprime.clone(),
                pending,
                rank,
                cut,
            });
        }

        let mut all: BTreeSet<TightState> = ret.iter().cloned().collect();
        for succ in &ret {
            if self.opts.eta4 && !succ.states.intersects(&self.finals) {
                continue;
            }
            if state.pending.is_empty() {
                continue;
            }
            if self.opts.cut_point && succ.cut == 0 && !succ.pending.is_empty() {
                continue;
            }
            // Decrement the still-pending states to an odd rank so the
            // breakpoint empties earlier; states that cannot be lowered
            // stay pending.
            let mut rank = succ.rank.clone();
            let mut pending = StateSet::new();
            for o in succ.pending.iter() {
                if rank.get(o).unwrap_or(0) > 0 && !self.finals.contains(o) {
                    rank.decrement(o);
                } else {
                    pending.insert(o);
                }
            }
            all.insert(TightState {
                states: succ.states.clone(),
                pending,
                rank,
                cut: succ.cut,
            });
        }
        all.into_iter().collect()
    }

    /// The reduced construction's rank selection: the pointwise-maximal
    /// rank function under the ceilings, emitted only when it is tight,
    /// keeps the parent's maximum, and (when the cache-backed check is
    /// enabled) the full successor enumeration is non-empty.
    fn reduced_rank_for(
        &mut self,
        state: &TightState,
        symbol: SymbolId,
        sprime: &StateSet,
        ceil: &BTreeMap<StateId, Rank>,
        rnk_bnd: &[Rank],
        reach_max: usize,
    ) -> Vec<RankFunc> {
        let parent_max = state.rank.max_rank();
        let mut rank_set_size = 1usize;

        if self.opts.succ_empty_check
            && state.states.len() <= self.opts.cache_max_state
            && parent_max <= self.opts.cache_max_rank
        {
            let cached = self
                .cache
                .lookup(&state.states, symbol, parent_max, &state.rank)
                .map(|succs| succs.to_vec());
            match cached {
                Some(succs) => {
                    rank_set_size = succs
                        .iter()
                        .filter(|r| r.is_max_rank_valid(rnk_bnd))
                        .count();
                }
                None => {
                    let constr = RankConstraint::stepped(sprime, &self.finals, |q| ceil[&q]);
                    let fresh: Vec<RankFunc> = constr
                        .tight_succ(
                            &self.dir,
                            &self.odd,
                            parent_max,
                            &self.reach_cons,
                            reach_max,
                        )
                        .collect();
                    rank_set_size = fresh.len();
                    self.cache.insert(
                        state.states.clone(),
                        symbol,
                        parent_max,
                        state.rank.clone(),
                        fresh,
                    );
                }
            }
        }

        let sng = RankFunc::from_fn(sprime, |q| ceil[&q]);
        if sng.is_tight() && sng.max_rank() == parent_max && rank_set_size > 0 {
            vec![sng]
        } else {
            Vec::new()
        }
    }
}
