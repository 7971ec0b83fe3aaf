// SPDX-License-Identifier: CC0-1.0

//! Taproot script trees
//!
//! The optional second argument of `tr(...)` is a brace-nested binary tree:
//! `{left,right}` groups or a single leaf. A leaf is either an x-only public
//! key in hex (at least 64 characters, no parentheses) or a script
//! sub-descriptor parsed with taproot context. Key leaves stand for opaque
//! branch hashes; script leaves are compiled and committed at their brace
//! depth through [`TaprootBuilder`].

use std::collections::BTreeMap;

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::taproot::{TapNodeHash, TaprootBuilder};
use bitcoin::{ScriptBuf, XOnlyPublicKey};

use crate::compile::MiniscriptParser;
use crate::node::{DescriptorNode, NodeKind, ScriptForm};
use crate::reference::TaprootReference;
use crate::Error;

/// Shape of a parsed script tree, with leaves kept by their canonical text.
#[derive(Debug, Clone)]
pub(crate) enum TapTreeExpr {
    Leaf(String),
    Branch(Box<TapTreeExpr>, Box<TapTreeExpr>),
}

enum LeafScript {
    Script(ScriptBuf),
    Hidden(TapNodeHash),
}

/// Parses the brace grammar of a `tr` tree argument.
pub(crate) fn parse_tap_tree(tree: &str) -> Result<TapTreeExpr, Error> {
    let (expr, rest) = parse_branch(tree.trim())?;
    if !rest.is_empty() {
        return Err(Error::Taproot(format!("trailing characters '{}' after script tree", rest)));
    }
    Ok(expr)
}

fn parse_branch(tree: &str) -> Result<(TapTreeExpr, &str), Error> {
    if let Some(rest) = tree.strip_prefix('{') {
        let (left, rest) = parse_branch(rest)?;
        let rest = rest
            .strip_prefix(',')
            .ok_or_else(|| Error::Taproot("expected ',' in script tree".to_owned()))?;
        let (right, rest) = parse_branch(rest)?;
        let rest = rest
            .strip_prefix('}')
            .ok_or_else(|| Error::Taproot("expected '}' in script tree".to_owned()))?;
        Ok((TapTreeExpr::Branch(Box::new(left), Box::new(right)), rest))
    } else {
        let mut depth = 0i64;
        let mut end = tree.len();
        for (idx, ch) in tree.bytes().enumerate() {
            match ch {
                b'(' => depth += 1,
                b')' => depth -= 1,
                b',' | b'}' if depth == 0 => {
                    end = idx;
                    break;
                }
                _ => {}
            }
        }
        let leaf = tree[..end].trim();
        if leaf.is_empty() {
            return Err(Error::Taproot("empty script tree leaf".to_owned()));
        }
        Ok((TapTreeExpr::Leaf(leaf.to_owned()), &tree[end..]))
    }
}

fn collect_leaves<'e>(expr: &'e TapTreeExpr, out: &mut Vec<&'e str>) {
    match expr {
        TapTreeExpr::Leaf(leaf) => out.push(leaf),
        TapTreeExpr::Branch(left, right) => {
            collect_leaves(left, out);
            collect_leaves(right, out);
        }
    }
}

impl DescriptorNode {
    /// Analyzes the tree argument of `tr`: parses the brace grammar and
    /// analyzes every distinct leaf as a key or sub-descriptor node.
    pub(crate) fn analyze_script_tree(
        &mut self,
        ms: &dyn MiniscriptParser,
    ) -> Result<(), Error> {
        let shape = parse_tap_tree(&self.value)?;
        let mut leaves = Vec::new();
        collect_leaves(&shape, &mut leaves);

        for leaf in leaves {
            if self.tree_nodes.contains_key(leaf) {
                // identical leaves share one node and one materialization
                continue;
            }
            let mut node = DescriptorNode::new(self.network);
            node.parent_kind = Some(ScriptForm::Tr);
            if leaf.contains('(') {
                node.node_kind = NodeKind::Script;
                node.scan_expression(leaf, 2)?;
            } else {
                if leaf.len() < 64 {
                    return Err(Error::Taproot(format!(
                        "script tree leaf '{}' is neither a script nor an x-only key",
                        leaf
                    )));
                }
                node.node_kind = NodeKind::Key;
                node.value = leaf.to_owned();
                node.depth = 1;
            }
            node.analyze(Some(ScriptForm::Tr), ms)?;
            self.tree_nodes.insert(leaf.to_owned(), node.clone());
            self.children.push(node);
        }
        self.tap_shape = Some(shape);
        Ok(())
    }

    /// Materializes the script tree: resolves each distinct leaf once, in
    /// left-to-right order, and commits the shape into a taproot output for
    /// `internal`.
    pub(crate) fn tap_reference(
        &self,
        internal: XOnlyPublicKey,
        args: &mut Vec<String>,
        ms: &dyn MiniscriptParser,
    ) -> Result<TaprootReference, Error> {
        let shape = self
            .tap_shape
            .as_ref()
            .ok_or_else(|| Error::Taproot("script tree was not analyzed".to_owned()))?;

        // resolve each distinct leaf once, keyed by its canonical text and
        // visited in left-to-right shape order so arguments line up
        let mut leaf_names = Vec::new();
        collect_leaves(shape, &mut leaf_names);
        let mut resolved: BTreeMap<&str, LeafScript> = BTreeMap::new();
        for leaf in leaf_names {
            if resolved.contains_key(leaf) {
                continue;
            }
            let node = self
                .tree_nodes
                .get(leaf)
                .ok_or_else(|| Error::Taproot("script tree leaf was not resolved".to_owned()))?;
            let entry = if node.node_kind == NodeKind::Key {
                let reference = node.key_reference(args)?;
                LeafScript::Hidden(TapNodeHash::from_byte_array(
                    reference.x_only_pubkey().serialize(),
                ))
            } else {
                let reference = node.reference(args, None, ms)?;
                let script = reference
                    .redeem_script()
                    .cloned()
                    .unwrap_or_else(|| reference.locking_script().clone());
                LeafScript::Script(script)
            };
            resolved.insert(leaf, entry);
        }

        let mut leaves = Vec::new();
        let builder = add_shape(TaprootBuilder::new(), shape, 0, &resolved, &mut leaves)?;
        let secp = Secp256k1::verification_only();
        let spend_info = builder
            .finalize(&secp, internal)
            .map_err(|_| Error::Taproot("failed to assemble the script tree".to_owned()))?;
        Ok(TaprootReference::new(
            internal,
            spend_info.output_key().to_x_only_public_key(),
            spend_info.merkle_root(),
            leaves,
        ))
    }
}

fn add_shape(
    builder: TaprootBuilder,
    expr: &TapTreeExpr,
    depth: u8,
    resolved: &BTreeMap<&str, LeafScript>,
    leaves: &mut Vec<ScriptBuf>,
) -> Result<TaprootBuilder, Error> {
    match expr {
        TapTreeExpr::Leaf(name) => {
            let leaf = resolved
                .get(name.as_str())
                .ok_or_else(|| Error::Taproot("script tree leaf was not resolved".to_owned()))?;
            match leaf {
                LeafScript::Script(script) => {
                    leaves.push(script.clone());
                    builder.add_leaf(depth, script.clone())
                }
                LeafScript::Hidden(hash) => builder.add_hidden_node(depth, *hash),
            }
            .map_err(|e| Error::Taproot(e.to_string()))
        }
        TapTreeExpr::Branch(left, right) => {
            let next = depth
                .checked_add(1)
                .ok_or_else(|| Error::Taproot("script tree is too deep".to_owned()))?;
            let builder = add_shape(builder, left, next, resolved, leaves)?;
            add_shape(builder, right, next, resolved, leaves)
        }
    }
}
