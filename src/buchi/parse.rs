//! Parsing and printing of the line-oriented BA format.
//!
//! The format lists the initial state on the first non-empty line, one
//! transition `SYMBOL,SOURCE->DEST` per line, and one accepting state per
//! trailing line. State and symbol names are arbitrary identifiers; they
//! are renamed to dense integers before complementation and the complement
//! is printed with fresh integer state names and the original symbol
//! names.

use std::collections::HashMap;
use std::error::Error;
use std::fmt::{self, Display, Formatter, Write as _};

use crate::buchi::BuchiAutomaton;
use crate::StateId;

/// Errors raised while reading a BA-format automaton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The input contains no states at all.
    MissingInitial,
    /// A line containing `->` does not have the shape `SYMBOL,SOURCE->DEST`.
    BadTransition { line: usize, text: String },
    /// An accepting state does not occur as an initial state or in any
    /// transition. Such inputs are rejected before construction begins.
    UndeclaredAcceptingState { name: String },
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingInitial => write!(f, "input declares no initial state"),
            ParseError::BadTransition { line, text } => {
                write!(f, "line {}: malformed transition '{}'", line, text)
            }
            ParseError::UndeclaredAcceptingState { name } => {
                write!(f, "accepting state '{}' does not occur in the automaton", name)
            }
        }
    }
}

impl Error for ParseError {}

/// An automaton as read from a BA file, with its original state and symbol
/// names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawAutomaton {
    /// Initial state names, in file order.
    pub initials: Vec<String>,
    /// Transitions as `(symbol, source, dest)` triples, in file order.
    pub transitions: Vec<(String, String, String)>,
    /// Accepting state names, in file order.
    pub finals: Vec<String>,
}

/// Name tables produced when a [`RawAutomaton`] is renamed to dense
/// integers: index `i` holds the original name of state/symbol `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutomatonNames {
    pub states: Vec<String>,
    pub symbols: Vec<String>,
}

/// Parses a BA-format automaton.
///
/// The first non-empty line names the initial state; any further line
/// without `->` names an accepting state.
pub fn parse_ba(input: &str) -> Result<RawAutomaton, ParseError> {
    let mut raw = RawAutomaton::default();
    let mut seen_any = false;

    for (idx, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((lhs, dst)) = line.split_once("->") {
            let (symbol, src) = lhs
                .split_once(',')
                .ok_or_else(|| ParseError::BadTransition {
                    line: idx + 1,
                    text: line.to_string(),
                })?;
            let (symbol, src, dst) = (symbol.trim(), src.trim(), dst.trim());
            if symbol.is_empty() || src.is_empty() || dst.is_empty() {
                return Err(ParseError::BadTransition {
                    line: idx + 1,
                    text: line.to_string(),
                });
            }
            raw.transitions
                .push((symbol.to_string(), src.to_string(), dst.to_string()));
        } else if !seen_any {
            raw.initials.push(line.to_string());
        } else {
            raw.finals.push(line.to_string());
        }
        seen_any = true;
    }

    if raw.initials.is_empty() {
        return Err(ParseError::MissingInitial);
    }
    Ok(raw)
}

impl RawAutomaton {
    /// Renames states and symbols to dense integers, in order of first
    /// occurrence, and builds the dense automaton.
    pub fn into_dense(self) -> Result<(BuchiAutomaton<StateId>, AutomatonNames), ParseError> {
        let mut names = AutomatonNames::default();
        let mut state_ids: HashMap<String, StateId> = HashMap::new();
        let mut symbol_ids: HashMap<String, usize> = HashMap::new();

        let mut state_id = |name: &str, names: &mut AutomatonNames| -> StateId {
            *state_ids.entry(name.to_string()).or_insert_with(|| {
                names.states.push(name.to_string());
                names.states.len() - 1
            })
        };
        for init in &self.initials {
            state_id(init, &mut names);
        }
        for (symbol, src, dst) in &self.transitions {
            symbol_ids.entry(symbol.clone()).or_insert_with(|| {
                names.symbols.push(symbol.clone());
                names.symbols.len() - 1
            });
            state_id(src, &mut names);
            state_id(dst, &mut names);
        }
        for name in &self.finals {
            if !state_ids.contains_key(name.as_str()) {
                return Err(ParseError::UndeclaredAcceptingState { name: name.clone() });
            }
        }

        let mut aut = BuchiAutomaton::new(names.symbols.len());
        for q in 0..names.states.len() {
            aut.add_state(q);
        }
        for init in &self.initials {
            aut.add_initial(state_ids[init.as_str()]);
        }
        for (symbol, src, dst) in &self.transitions {
            aut.add_transition(
                state_ids[src.as_str()],
                symbol_ids[symbol.as_str()],
                state_ids[dst.as_str()],
            );
        }
        for name in &self.finals {
            aut.add_final(state_ids[name.as_str()]);
        }
        Ok((aut, names))
    }
}

impl Display for RawAutomaton {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for init in &self.initials {
            writeln!(f, "{}", init)?;
        }
        for (symbol, src, dst) in &self.transitions {
            writeln!(f, "{},{}->{}", symbol, src, dst)?;
        }
        for name in &self.finals {
            writeln!(f, "{}", name)?;
        }
        Ok(())
    }
}

/// Prints a dense automaton in the BA format, naming states by their
/// integer id and symbols through the given name table.
pub fn write_ba(aut: &BuchiAutomaton<StateId>, symbol_names: &[String]) -> String {
    let mut out = String::new();
    for init in aut.initials() {
        let _ = writeln!(out, "{}", init);
    }
    for (src, sym, dst) in aut.transitions() {
        let _ = writeln!(out, "{},{}->{}", symbol_names[sym], src, dst);
    }
    for fin in aut.finals() {
        let _ = writeln!(out, "{}", fin);
    }
    out
}
