//! Facilities to generate a DOT representation of a Büchi automaton.

use crate::buchi::BuchiAutomaton;
use crate::{StateId, SymbolId};

extern crate dot as dotlib;

/// A dense automaton paired with its symbol names, renderable through the
/// `dot` crate.
pub struct DotView<'a> {
    aut: &'a BuchiAutomaton<StateId>,
    symbols: &'a [String],
}

impl<'a> DotView<'a> {
    pub fn new(aut: &'a BuchiAutomaton<StateId>, symbols: &'a [String]) -> Self {
        DotView { aut, symbols }
    }

    /// Renders the automaton in the DOT format.
    pub fn render(&self) -> Option<String> {
        let mut buf = Vec::new();
        dotlib::render(self, &mut buf).ok()?;
        String::from_utf8(buf).ok()
    }
}

type Edge = (StateId, SymbolId, StateId);

impl<'a> dotlib::Labeller<'a, StateId, Edge> for DotView<'a> {
    fn graph_id(&'a self) -> dotlib::Id<'a> {
        dotlib::Id::new("automaton").unwrap()
    }

    fn node_id(&'a self, n: &StateId) -> dotlib::Id<'a> {
        dotlib::Id::new(format!("q{}", n)).unwrap()
    }

    fn node_shape(&'a self, node: &StateId) -> Option<dotlib::LabelText<'a>> {
        if self.aut.is_final(node) {
            return Some(dotlib::LabelText::LabelStr("doublecircle".into()));
        }
        None
    }

    fn node_label(&'a self, n: &StateId) -> dotlib::LabelText<'a> {
        if self.aut.initials().contains(n) {
            return dotlib::LabelText::LabelStr(format!("q{} (Init)", n).into());
        }
        dotlib::LabelText::LabelStr(format!("q{}", n).into())
    }

    fn edge_label(&'a self, e: &Edge) -> dotlib::LabelText<'a> {
        dotlib::LabelText::LabelStr(self.symbols[e.1].clone().into())
    }

    fn kind(&self) -> dotlib::Kind {
        dotlib::Kind::Digraph
    }
}

impl<'a> dotlib::GraphWalk<'a, StateId, Edge> for DotView<'a> {
    fn nodes(&'a self) -> dotlib::Nodes<'a, StateId> {
        self.aut.states().copied().collect::<Vec<_>>().into()
    }

    fn edges(&'a self) -> dotlib::Edges<'a, Edge> {
        self.aut
            .transitions()
            .map(|(src, sym, dst)| (*src, sym, *dst))
            .collect::<Vec<_>>()
            .into()
    }

    fn source(&'a self, edge: &Edge) -> StateId {
        edge.0
    }

    fn target(&'a self, edge: &Edge) -> StateId {
        edge.2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_mentions_states_and_symbols() {
        let mut aut = BuchiAutomaton::new(1);
        aut.add_initial(0);
        aut.add_final(1);
        aut.add_transition(0, 0, 1);
        let symbols = vec!["a".to_string()];
        let rendered = DotView::new(&aut, &symbols).render().unwrap();
        assert!(rendered.contains("digraph"));
        assert!(rendered.contains("q0"));
        assert!(rendered.contains("q1"));
        assert!(rendered.contains('a'));
    }
}
