// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Parent-linked export tree handed to planners and encoders.
use crate::action_graph::Sentinels;
use crate::grammar::{Grammar, GrammarError, NodeBody, NodeKind};
use crate::ident::NodeId;

/// Node tag in an [`ExportTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExportKind {
    /// Weighted alternatives.
    Choice,
    /// Ordered composition.
    Sequence,
    /// Executable leaf.
    Primitive,
}

impl From<NodeKind> for ExportKind {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Primitive => Self::Primitive,
            NodeKind::Sequence => Self::Sequence,
            NodeKind::Choice => Self::Choice,
        }
    }
}

/// One node of the export tree, addressed by its preorder index.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExportNode {
    /// Preorder index; the root is `0`.
    pub index: usize,
    /// Parent index, `None` for the root.
    pub parent: Option<usize>,
    /// Node tag.
    pub kind: ExportKind,
    /// Display name carried over from the grammar.
    pub name: String,
    /// Clean action label for primitives.
    pub action: Option<String>,
    /// Set on primitives executing a boundary action.
    pub sentinel: bool,
    /// Child indices in order.
    pub children: Vec<usize>,
    /// Choice weights exactly as stored in the grammar; empty otherwise.
    pub weights: Vec<f64>,
}

/// Flat, parent-linked copy of a finished grammar.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExportTree {
    /// Nodes in preorder.
    pub nodes: Vec<ExportNode>,
}

impl ExportTree {
    /// Converts the subtree at `root` without recursion.
    pub fn from_grammar(
        grammar: &Grammar,
        root: NodeId,
        sentinels: &Sentinels,
    ) -> Result<Self, GrammarError> {
        let mut nodes: Vec<ExportNode> = Vec::new();
        let mut stack: Vec<(NodeId, Option<usize>)> = vec![(root, None)];
        while let Some((id, parent)) = stack.pop() {
            let node = grammar.node(id)?;
            let index = nodes.len();
            let (action, weights) = match node.body() {
                NodeBody::Primitive { action } => (Some(action.clone()), Vec::new()),
                NodeBody::Sequence { .. } => (None, Vec::new()),
                NodeBody::Choice { weights, .. } => (None, weights.clone()),
            };
            let sentinel = action
                .as_deref()
                .is_some_and(|a| sentinels.is_sentinel_action(a));
            if let Some(p) = parent.and_then(|p| nodes.get_mut(p)) {
                p.children.push(index);
            }
            nodes.push(ExportNode {
                index,
                parent,
                kind: node.kind().into(),
                name: node.name().to_owned(),
                action,
                sentinel,
                children: Vec::new(),
                weights,
            });
            stack.extend(node.children().iter().rev().map(|c| (*c, Some(index))));
        }
        Ok(Self { nodes })
    }

    /// Root node, `None` for an empty tree.
    pub fn root(&self) -> Option<&ExportNode> {
        self.nodes.first()
    }

    /// Node count.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node at preorder `index`.
    pub fn get(&self, index: usize) -> Option<&ExportNode> {
        self.nodes.get(index)
    }

    /// Non-boundary primitive actions in preorder.
    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .iter()
            .filter(|n| !n.sentinel)
            .filter_map(|n| n.action.as_deref())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn preorder_indices_and_parent_links() {
        let mut g = Grammar::new();
        let init = g.add_primitive("0 - init_action", "init_action", "", "");
        let a = g.add_primitive("1 - a", "a", "", "");
        let b = g.add_primitive("2 - b", "b", "", "");
        let term = g.add_primitive("3 - term_action", "term_action", "", "");
        let ch = g.add_choice("C0", vec![a, b], vec![2.0, 1.0], "", "").unwrap();
        let root = g.add_sequence("S0", vec![init, ch, term], "", "").unwrap();

        let tree = ExportTree::from_grammar(&g, root, &Sentinels::default()).unwrap();
        assert_eq!(tree.len(), 6);
        let names: Vec<_> = tree.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(
            names,
            ["S0", "0 - init_action", "C0", "1 - a", "2 - b", "3 - term_action"]
        );
        let root = tree.root().unwrap();
        assert_eq!(root.parent, None);
        assert_eq!(root.children, vec![1, 2, 5]);
        let choice = tree.get(2).unwrap();
        assert_eq!(choice.kind, ExportKind::Choice);
        assert_eq!(choice.weights, vec![2.0, 1.0]);
        assert_eq!(choice.children, vec![3, 4]);
        assert_eq!(tree.get(4).unwrap().parent, Some(2));
        assert_eq!(tree.get(3).unwrap().action.as_deref(), Some("a"));
        assert!(tree.get(1).unwrap().sentinel);
        assert!(!tree.get(3).unwrap().sentinel);
        let actions: Vec<_> = tree.actions().collect();
        assert_eq!(actions, ["a", "b"]);
    }
}
