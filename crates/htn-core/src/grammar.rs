// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Grammar node model: Primitive/Sequence/Choice nodes held in an arena.
use std::fmt;

use thiserror::Error;

use crate::ident::NodeId;

/// Discriminant of a [`GrammarNode`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum NodeKind {
    /// Leaf wrapping one action.
    Primitive,
    /// Ordered AND-composition of children.
    Sequence,
    /// Weighted OR-composition of children.
    Choice,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primitive => "primitive",
            Self::Sequence => "sequence",
            Self::Choice => "choice",
        })
    }
}

/// Variant payload of a grammar node.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeBody {
    /// Leaf carrying the action label it executes.
    Primitive {
        /// Clean action label (no display decoration).
        action: String,
    },
    /// Children executed in order.
    Sequence {
        /// Ordered child handles.
        children: Vec<NodeId>,
    },
    /// Exactly one child executed, selected by weight.
    Choice {
        /// Alternative child handles.
        children: Vec<NodeId>,
        /// Non-negative weights parallel to `children`; not necessarily normalized.
        weights: Vec<f64>,
    },
}

/// Errors raised by structural operations on the grammar model.
#[derive(Debug, Error, PartialEq)]
pub enum GrammarError {
    /// The handle does not address a node in this arena.
    #[error("unknown grammar node {0}")]
    UnknownNode(NodeId),
    /// Primitive nodes are leaves.
    #[error("primitive node {0} cannot hold children")]
    PrimitiveHasNoChildren(NodeId),
    /// The operation only applies to another node kind.
    #[error("node {id} is a {found}, expected a {expected}")]
    WrongKind {
        /// Node the operation targeted.
        id: NodeId,
        /// Kind the operation requires.
        expected: NodeKind,
        /// Kind actually stored.
        found: NodeKind,
    },
    /// The referenced child is not attached to the parent.
    #[error("node {child} is not a child of {parent}")]
    NotAChild {
        /// Parent node.
        parent: NodeId,
        /// Missing child.
        child: NodeId,
    },
    /// Choice weights must be parallel to children.
    #[error("choice {id} has {children} children but {weights} weights")]
    WeightMismatch {
        /// Offending choice.
        id: NodeId,
        /// Child count.
        children: usize,
        /// Weight count.
        weights: usize,
    },
    /// Weights must be finite and non-negative.
    #[error("invalid choice weight {0}")]
    InvalidWeight(f64),
}

/// One node of the hierarchical task grammar.
#[derive(Clone, Debug, PartialEq)]
pub struct GrammarNode {
    id: NodeId,
    name: String,
    prestate: String,
    poststate: String,
    body: NodeBody,
}

impl GrammarNode {
    /// Arena handle of this node.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// World state expected before the node executes.
    pub fn prestate(&self) -> &str {
        &self.prestate
    }

    /// World state produced after the node executes.
    pub fn poststate(&self) -> &str {
        &self.poststate
    }

    /// Overwrites the pre-state.
    pub fn set_prestate(&mut self, state: impl Into<String>) {
        self.prestate = state.into();
    }

    /// Overwrites the post-state.
    pub fn set_poststate(&mut self, state: impl Into<String>) {
        self.poststate = state.into();
    }

    /// Variant payload.
    pub fn body(&self) -> &NodeBody {
        &self.body
    }

    /// Node discriminant.
    pub fn kind(&self) -> NodeKind {
        match self.body {
            NodeBody::Primitive { .. } => NodeKind::Primitive,
            NodeBody::Sequence { .. } => NodeKind::Sequence,
            NodeBody::Choice { .. } => NodeKind::Choice,
        }
    }

    /// Action label for Primitive nodes.
    pub fn action(&self) -> Option<&str> {
        match &self.body {
            NodeBody::Primitive { action } => Some(action),
            _ => None,
        }
    }

    /// Child handles in order; empty for Primitive nodes.
    pub fn children(&self) -> &[NodeId] {
        match &self.body {
            NodeBody::Primitive { .. } => &[],
            NodeBody::Sequence { children } | NodeBody::Choice { children, .. } => children,
        }
    }

    /// Raw Choice weights, `None` for other kinds.
    pub fn weights(&self) -> Option<&[f64]> {
        match &self.body {
            NodeBody::Choice { weights, .. } => Some(weights),
            _ => None,
        }
    }

    /// Appends a child. Choice children added this way receive weight `1.0`.
    pub fn add_child(&mut self, child: NodeId) -> Result<(), GrammarError> {
        match &mut self.body {
            NodeBody::Primitive { .. } => Err(GrammarError::PrimitiveHasNoChildren(self.id)),
            NodeBody::Sequence { children } => {
                children.push(child);
                Ok(())
            }
            NodeBody::Choice { children, weights } => {
                children.push(child);
                weights.push(1.0);
                Ok(())
            }
        }
    }

    /// Appends a weighted alternative to a Choice.
    pub fn add_weighted_child(&mut self, child: NodeId, weight: f64) -> Result<(), GrammarError> {
        check_weight(weight)?;
        let id = self.id;
        let found = self.kind();
        match &mut self.body {
            NodeBody::Choice { children, weights } => {
                children.push(child);
                weights.push(weight);
                Ok(())
            }
            NodeBody::Primitive { .. } => Err(GrammarError::PrimitiveHasNoChildren(id)),
            NodeBody::Sequence { .. } => Err(GrammarError::WrongKind {
                id,
                expected: NodeKind::Choice,
                found,
            }),
        }
    }

    /// Inserts a child at the front of a Sequence.
    pub fn prepend_child(&mut self, child: NodeId) -> Result<(), GrammarError> {
        let id = self.id;
        let found = self.kind();
        match &mut self.body {
            NodeBody::Sequence { children } => {
                children.insert(0, child);
                Ok(())
            }
            NodeBody::Primitive { .. } => Err(GrammarError::PrimitiveHasNoChildren(id)),
            NodeBody::Choice { .. } => Err(GrammarError::WrongKind {
                id,
                expected: NodeKind::Sequence,
                found,
            }),
        }
    }

    /// Detaches the first occurrence of `child`, returning its former index.
    ///
    /// A Choice drops the weight paired with the removed child.
    pub fn remove_child(&mut self, child: NodeId) -> Result<usize, GrammarError> {
        let parent = self.id;
        match &mut self.body {
            NodeBody::Primitive { .. } => Err(GrammarError::PrimitiveHasNoChildren(parent)),
            NodeBody::Sequence { children } => {
                let at = position(children, parent, child)?;
                children.remove(at);
                Ok(at)
            }
            NodeBody::Choice { children, weights } => {
                let at = position(children, parent, child)?;
                children.remove(at);
                if at < weights.len() {
                    weights.remove(at);
                }
                Ok(at)
            }
        }
    }

    /// Swaps `old` for `new` in place; position and weight are kept.
    pub fn replace_child(&mut self, old: NodeId, new: NodeId) -> Result<(), GrammarError> {
        let parent = self.id;
        match &mut self.body {
            NodeBody::Primitive { .. } => Err(GrammarError::PrimitiveHasNoChildren(parent)),
            NodeBody::Sequence { children } | NodeBody::Choice { children, .. } => {
                let at = position(children, parent, old)?;
                children[at] = new;
                Ok(())
            }
        }
    }

    /// Scales every Choice weight by `factor`. No-op for other kinds.
    pub(crate) fn scale_weights(&mut self, factor: f64) {
        if let NodeBody::Choice { weights, .. } = &mut self.body {
            for w in weights.iter_mut() {
                *w *= factor;
            }
        }
    }

    /// Rewrites Choice weights so they sum to one.
    ///
    /// Degenerate totals (zero, negative, non-finite) fall back to uniform.
    /// Other kinds are left untouched.
    pub fn normalize_weights(&mut self) {
        if let NodeBody::Choice { children, weights } = &mut self.body {
            *weights = normalized(weights, children.len());
        }
    }

    /// Normalized selection probabilities, one per child.
    ///
    /// Missing, mis-sized or degenerate weight vectors yield a uniform
    /// distribution; Sequence and Primitive nodes return an empty vector.
    pub fn selection_weights(&self) -> Vec<f64> {
        match &self.body {
            NodeBody::Choice { children, weights } => normalized(weights, children.len()),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for GrammarNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            NodeBody::Primitive { action } => write!(f, "{} [{}]", self.name, action),
            _ => write!(f, "{} ({})", self.name, self.kind()),
        }
    }
}

fn position(children: &[NodeId], parent: NodeId, child: NodeId) -> Result<usize, GrammarError> {
    children
        .iter()
        .position(|c| *c == child)
        .ok_or(GrammarError::NotAChild { parent, child })
}

fn check_weight(weight: f64) -> Result<(), GrammarError> {
    if weight.is_finite() && weight >= 0.0 {
        Ok(())
    } else {
        Err(GrammarError::InvalidWeight(weight))
    }
}

fn normalized(weights: &[f64], len: usize) -> Vec<f64> {
    if len == 0 {
        return Vec::new();
    }
    let uniform = || vec![1.0 / len as f64; len];
    if weights.len() != len || weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return uniform();
    }
    let total: f64 = weights.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return uniform();
    }
    weights.iter().map(|w| w / total).collect()
}

/// Arena owning every grammar node created during one learning run.
///
/// Nodes are never freed; detached subtrees simply become unreachable from
/// the final root.
#[derive(Clone, Debug, Default)]
pub struct Grammar {
    nodes: Vec<GrammarNode>,
}

impl Grammar {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of allocated nodes, reachable or not.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node has been allocated.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates all allocated nodes in handle order.
    pub fn iter(&self) -> impl Iterator<Item = &GrammarNode> {
        self.nodes.iter()
    }

    fn next_id(&self) -> NodeId {
        NodeId(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX))
    }

    fn push(
        &mut self,
        name: String,
        prestate: String,
        poststate: String,
        body: NodeBody,
    ) -> NodeId {
        let id = self.next_id();
        self.nodes.push(GrammarNode {
            id,
            name,
            prestate,
            poststate,
            body,
        });
        id
    }

    fn ensure_all(&self, ids: &[NodeId]) -> Result<(), GrammarError> {
        ids.iter().try_for_each(|id| self.node(*id).map(|_| ()))
    }

    /// Allocates a Primitive leaf.
    pub fn add_primitive(
        &mut self,
        name: impl Into<String>,
        action: impl Into<String>,
        prestate: impl Into<String>,
        poststate: impl Into<String>,
    ) -> NodeId {
        self.push(
            name.into(),
            prestate.into(),
            poststate.into(),
            NodeBody::Primitive {
                action: action.into(),
            },
        )
    }

    /// Allocates a Sequence over existing nodes.
    pub fn add_sequence(
        &mut self,
        name: impl Into<String>,
        children: Vec<NodeId>,
        prestate: impl Into<String>,
        poststate: impl Into<String>,
    ) -> Result<NodeId, GrammarError> {
        self.ensure_all(&children)?;
        Ok(self.push(
            name.into(),
            prestate.into(),
            poststate.into(),
            NodeBody::Sequence { children },
        ))
    }

    /// Allocates a Choice over existing nodes with parallel weights.
    pub fn add_choice(
        &mut self,
        name: impl Into<String>,
        children: Vec<NodeId>,
        weights: Vec<f64>,
        prestate: impl Into<String>,
        poststate: impl Into<String>,
    ) -> Result<NodeId, GrammarError> {
        self.ensure_all(&children)?;
        if children.len() != weights.len() {
            return Err(GrammarError::WeightMismatch {
                id: self.next_id(),
                children: children.len(),
                weights: weights.len(),
            });
        }
        weights.iter().try_for_each(|w| check_weight(*w))?;
        Ok(self.push(
            name.into(),
            prestate.into(),
            poststate.into(),
            NodeBody::Choice { children, weights },
        ))
    }

    /// Shared access to a node.
    pub fn node(&self, id: NodeId) -> Result<&GrammarNode, GrammarError> {
        self.nodes
            .get(id.index())
            .ok_or(GrammarError::UnknownNode(id))
    }

    /// Exclusive access to a node.
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut GrammarNode, GrammarError> {
        self.nodes
            .get_mut(id.index())
            .ok_or(GrammarError::UnknownNode(id))
    }

    /// Attaches `child` to `parent` after checking both exist.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), GrammarError> {
        self.node(child)?;
        self.node_mut(parent)?.add_child(child)
    }

    /// Attaches a weighted alternative to a Choice after checking both exist.
    pub fn add_weighted_child(
        &mut self,
        parent: NodeId,
        child: NodeId,
        weight: f64,
    ) -> Result<(), GrammarError> {
        self.node(child)?;
        self.node_mut(parent)?.add_weighted_child(child, weight)
    }

    /// Preorder listing of the subtree rooted at `root`.
    pub fn preorder(&self, root: NodeId) -> Result<Vec<NodeId>, GrammarError> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = self.node(id)?;
            out.push(id);
            stack.extend(node.children().iter().rev().copied());
        }
        Ok(out)
    }

    /// Postorder listing of the subtree rooted at `root` (children first).
    pub fn postorder(&self, root: NodeId) -> Result<Vec<NodeId>, GrammarError> {
        let mut out = Vec::new();
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                out.push(id);
                continue;
            }
            let node = self.node(id)?;
            stack.push((id, true));
            stack.extend(node.children().iter().rev().map(|c| (*c, false)));
        }
        Ok(out)
    }

    /// Copies the subtree rooted at `root`, appending `suffix` to every name.
    ///
    /// Returns the handle of the copied root. States, actions and weights
    /// are carried over unchanged.
    pub fn deep_copy(&mut self, root: NodeId, suffix: &str) -> Result<NodeId, GrammarError> {
        let order = self.postorder(root)?;
        let mut copied: Vec<NodeId> = Vec::with_capacity(order.len());
        // Postorder guarantees each child copy precedes its parent; children
        // are popped in reverse from the tail of `copied`.
        for id in order {
            let src = self.node(id)?.clone();
            let arity = src.children().len();
            let split = copied.len().saturating_sub(arity);
            let kids = copied.split_off(split);
            let body = match src.body {
                NodeBody::Primitive { action } => NodeBody::Primitive { action },
                NodeBody::Sequence { .. } => NodeBody::Sequence { children: kids },
                NodeBody::Choice { weights, .. } => NodeBody::Choice {
                    children: kids,
                    weights,
                },
            };
            let new_id = self.push(
                format!("{}{}", src.name, suffix),
                src.prestate,
                src.poststate,
                body,
            );
            copied.push(new_id);
        }
        copied
            .pop()
            .ok_or(GrammarError::UnknownNode(root))
    }

    /// Indented text rendering of the subtree rooted at `root`.
    ///
    /// Sequence children are prefixed with `=> `, Choice children with `<: `,
    /// and each nesting level indents by two spaces.
    pub fn render(&self, root: NodeId) -> Result<String, GrammarError> {
        let mut lines = Vec::new();
        let mut stack: Vec<(NodeId, usize, Option<NodeKind>)> = vec![(root, 0, None)];
        while let Some((id, level, parent)) = stack.pop() {
            let node = self.node(id)?;
            let prefix = match parent {
                Some(NodeKind::Sequence) => "=> ",
                Some(NodeKind::Choice) => "<: ",
                _ => "",
            };
            lines.push(format!("{}{}{}", "  ".repeat(level), prefix, node));
            let kind = node.kind();
            stack.extend(
                node.children()
                    .iter()
                    .rev()
                    .map(|c| (*c, level + 1, Some(kind))),
            );
        }
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn leaf(g: &mut Grammar, action: &str) -> NodeId {
        g.add_primitive(action, action, "s", "s")
    }

    #[test]
    fn primitive_rejects_children() {
        let mut g = Grammar::new();
        let a = leaf(&mut g, "a");
        let b = leaf(&mut g, "b");
        assert_eq!(
            g.add_child(a, b),
            Err(GrammarError::PrimitiveHasNoChildren(a))
        );
        let node = g.node_mut(a).unwrap();
        assert!(node.prepend_child(b).is_err());
        assert!(node.remove_child(b).is_err());
    }

    #[test]
    fn choice_remove_drops_paired_weight() {
        let mut g = Grammar::new();
        let a = leaf(&mut g, "a");
        let b = leaf(&mut g, "b");
        let c = leaf(&mut g, "c");
        let ch = g
            .add_choice("C0", vec![a, b, c], vec![0.2, 0.3, 0.5], "s", "s")
            .unwrap();
        let at = g.node_mut(ch).unwrap().remove_child(b).unwrap();
        assert_eq!(at, 1);
        let node = g.node(ch).unwrap();
        assert_eq!(node.children(), &[a, c]);
        assert_eq!(node.weights().unwrap(), &[0.2, 0.5]);
    }

    #[test]
    fn replace_keeps_position_and_weight() {
        let mut g = Grammar::new();
        let a = leaf(&mut g, "a");
        let b = leaf(&mut g, "b");
        let z = leaf(&mut g, "z");
        let ch = g
            .add_choice("C0", vec![a, b], vec![0.25, 0.75], "s", "s")
            .unwrap();
        g.node_mut(ch).unwrap().replace_child(a, z).unwrap();
        let node = g.node(ch).unwrap();
        assert_eq!(node.children(), &[z, b]);
        assert_eq!(node.weights().unwrap(), &[0.25, 0.75]);
        assert_eq!(
            g.node_mut(ch).unwrap().replace_child(a, b),
            Err(GrammarError::NotAChild {
                parent: ch,
                child: a
            })
        );
    }

    #[test]
    fn normalize_handles_degenerate_totals() {
        let mut g = Grammar::new();
        let a = leaf(&mut g, "a");
        let b = leaf(&mut g, "b");
        let ch = g
            .add_choice("C0", vec![a, b], vec![0.0, 0.0], "s", "s")
            .unwrap();
        g.node_mut(ch).unwrap().normalize_weights();
        assert_eq!(g.node(ch).unwrap().weights().unwrap(), &[0.5, 0.5]);

        let ch2 = g
            .add_choice("C1", vec![a, b], vec![1.0, 3.0], "s", "s")
            .unwrap();
        g.node_mut(ch2).unwrap().normalize_weights();
        assert_eq!(g.node(ch2).unwrap().weights().unwrap(), &[0.25, 0.75]);
    }

    #[test]
    fn add_choice_validates_weights() {
        let mut g = Grammar::new();
        let a = leaf(&mut g, "a");
        assert!(matches!(
            g.add_choice("C0", vec![a], vec![], "s", "s"),
            Err(GrammarError::WeightMismatch { .. })
        ));
        assert!(matches!(
            g.add_choice("C0", vec![a], vec![-1.0], "s", "s"),
            Err(GrammarError::InvalidWeight(_))
        ));
        assert_eq!(
            g.add_sequence("S0", vec![NodeId(99)], "s", "s"),
            Err(GrammarError::UnknownNode(NodeId(99)))
        );
    }

    #[test]
    fn sequence_prepend_and_wrong_kind() {
        let mut g = Grammar::new();
        let a = leaf(&mut g, "a");
        let b = leaf(&mut g, "b");
        let s = g.add_sequence("S0", vec![b], "s", "s").unwrap();
        g.node_mut(s).unwrap().prepend_child(a).unwrap();
        assert_eq!(g.node(s).unwrap().children(), &[a, b]);
        assert!(matches!(
            g.add_weighted_child(s, a, 1.0),
            Err(GrammarError::WrongKind {
                expected: NodeKind::Choice,
                found: NodeKind::Sequence,
                ..
            })
        ));
    }

    #[test]
    fn deep_copy_suffixes_whole_subtree() {
        let mut g = Grammar::new();
        let a = leaf(&mut g, "a");
        let b = leaf(&mut g, "b");
        let c = leaf(&mut g, "c");
        let ch = g
            .add_choice("C0", vec![b, c], vec![1.0, 2.0], "s", "s")
            .unwrap();
        let s = g.add_sequence("S0", vec![a, ch], "s", "t").unwrap();
        let before = g.len();
        let copy = g.deep_copy(s, "-2").unwrap();
        assert_eq!(g.len(), before + 5);
        let root = g.node(copy).unwrap();
        assert_eq!(root.name(), "S0-2");
        assert_eq!(root.poststate(), "t");
        let kids = root.children().to_vec();
        assert_eq!(g.node(kids[0]).unwrap().name(), "a-2");
        assert_eq!(g.node(kids[0]).unwrap().action(), Some("a"));
        let inner = g.node(kids[1]).unwrap();
        assert_eq!(inner.name(), "C0-2");
        assert_eq!(inner.weights().unwrap(), &[1.0, 2.0]);
        let names: Vec<_> = inner
            .children()
            .iter()
            .map(|k| g.node(*k).unwrap().name().to_owned())
            .collect();
        assert_eq!(names, ["b-2", "c-2"]);
        // The source subtree is untouched.
        assert_eq!(g.node(s).unwrap().children(), &[a, ch]);
    }

    #[test]
    fn render_uses_prefixes_and_indentation() {
        let mut g = Grammar::new();
        let a = g.add_primitive("0 - a", "a", "s0", "s1");
        let b = g.add_primitive("1 - b", "b", "s1", "s2");
        let c = g.add_primitive("2 - c", "c", "s1", "s2");
        let ch = g
            .add_choice("C0", vec![b, c], vec![0.5, 0.5], "s1", "s2")
            .unwrap();
        let s = g.add_sequence("S0", vec![a, ch], "s0", "s2").unwrap();
        let text = g.render(s).unwrap();
        let expected = "S0 (sequence)\n  => 0 - a [a]\n  => C0 (choice)\n    <: 1 - b [b]\n    <: 2 - c [c]";
        assert_eq!(text, expected);
    }
}
