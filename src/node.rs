// SPDX-License-Identifier: CC0-1.0

//! Descriptor AST
//!
//! [`DescriptorNode`] is one node of the parsed descriptor tree. Parsing is
//! a three-stage pipeline performed eagerly by [`DescriptorNode::parse`]:
//!
//! 1. a single-pass character scan builds the raw tree and splits off the
//!    checksum,
//! 2. structural analysis enforces the per-form placement and arity rules,
//!    resolving key literals and delegating unknown names to miniscript,
//! 3. a probe materialization with `"0"` arguments proves the tree can
//!    produce scripts.
//!
//! After parsing, nodes are immutable. Materialization consumes a
//! caller-owned argument list (one entry per wildcard, in left-to-right tree
//! order) and returns [`ScriptReference`]s.

use std::collections::BTreeMap;
use std::str::FromStr;

use bitcoin::address::NetworkUnchecked;
use bitcoin::bip32::{ChildNumber, Xpub};
use bitcoin::key::TapTweak;
use bitcoin::opcodes::all::{OP_CHECKMULTISIG, OP_CHECKSIG};
use bitcoin::script::Builder;
use bitcoin::secp256k1::{Parity, Secp256k1};
use bitcoin::{Address, Network, PublicKey, ScriptBuf, XOnlyPublicKey};

use crate::compile::{MiniscriptContext, MiniscriptParser};
use crate::key::{self, Bip32Format, KeyData, KeyKind};
use crate::reference::{KeyReference, ScriptReference, TaprootReference};
use crate::taptree::TapTreeExpr;
use crate::{checksum, Error, BASE_EXTKEY_ARGUMENT};

pub(crate) const MAX_REDEEM_SCRIPT_SIZE: usize = 520;
pub(crate) const MAX_SCRIPT_SIZE: usize = 10_000;
const MAX_MULTISIG_PUBKEY_NUM: usize = 16;
const MAX_WITNESS_MULTISIG_PUBKEY_NUM: usize = 20;

/// Kind of a descriptor AST node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// A script expression `name(...)`.
    Script,
    /// A key expression.
    Key,
    /// An integer literal (multisig threshold).
    Number,
}

/// The script forms of the descriptor language.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScriptForm {
    /// `sh(...)`: pay-to-script-hash.
    Sh,
    /// `wsh(...)`: pay-to-witness-script-hash.
    Wsh,
    /// `pk(KEY)`: bare pay-to-pubkey.
    Pk,
    /// `pkh(KEY)`: pay-to-pubkey-hash.
    Pkh,
    /// `wpkh(KEY)`: pay-to-witness-pubkey-hash.
    Wpkh,
    /// `combo(KEY)`: the standard scripts derivable from one key.
    Combo,
    /// `multi(k,KEY,...)`: bare multisig.
    Multi,
    /// `sortedmulti(k,KEY,...)`: multisig with BIP-67 key ordering.
    SortedMulti,
    /// `addr(ADDRESS)`: a literal address.
    Addr,
    /// `raw(HEX)`: a literal script.
    Raw,
    /// `tr(KEY)` / `tr(KEY,TREE)`: taproot.
    Tr,
    /// A delegated miniscript expression.
    Miniscript,
}

impl ScriptForm {
    /// Looks a script form up by its descriptor name.
    ///
    /// `miniscript` is not a named form; unknown names fall back to the
    /// miniscript parser depending on context.
    pub fn from_name(name: &str) -> Option<ScriptForm> {
        match name {
            "sh" => Some(ScriptForm::Sh),
            "wsh" => Some(ScriptForm::Wsh),
            "pk" => Some(ScriptForm::Pk),
            "pkh" => Some(ScriptForm::Pkh),
            "wpkh" => Some(ScriptForm::Wpkh),
            "combo" => Some(ScriptForm::Combo),
            "multi" => Some(ScriptForm::Multi),
            "sortedmulti" => Some(ScriptForm::SortedMulti),
            "addr" => Some(ScriptForm::Addr),
            "raw" => Some(ScriptForm::Raw),
            "tr" => Some(ScriptForm::Tr),
            _ => None,
        }
    }

    /// The descriptor name of the form.
    pub fn name(self) -> &'static str {
        match self {
            ScriptForm::Sh => "sh",
            ScriptForm::Wsh => "wsh",
            ScriptForm::Pk => "pk",
            ScriptForm::Pkh => "pkh",
            ScriptForm::Wpkh => "wpkh",
            ScriptForm::Combo => "combo",
            ScriptForm::Multi => "multi",
            ScriptForm::SortedMulti => "sortedmulti",
            ScriptForm::Addr => "addr",
            ScriptForm::Raw => "raw",
            ScriptForm::Tr => "tr",
            ScriptForm::Miniscript => "miniscript",
        }
    }

    /// Whether the form may only appear at the top level.
    pub fn top_only(self) -> bool {
        matches!(
            self,
            ScriptForm::Sh | ScriptForm::Combo | ScriptForm::Addr | ScriptForm::Raw | ScriptForm::Tr
        )
    }

    /// Whether the form takes child expressions.
    pub fn has_children(self) -> bool {
        !matches!(self, ScriptForm::Addr | ScriptForm::Raw | ScriptForm::Miniscript)
    }

    /// Whether the form is a multisig form.
    pub fn is_multisig(self) -> bool {
        matches!(self, ScriptForm::Multi | ScriptForm::SortedMulti)
    }
}

/// A node of the parsed descriptor tree.
#[derive(Debug, Clone)]
pub struct DescriptorNode {
    pub(crate) name: String,
    pub(crate) value: String,
    pub(crate) key_info: String,
    pub(crate) origin_info: String,
    pub(crate) is_uncompressed_key: bool,
    pub(crate) base_extkey: String,
    pub(crate) tweak_sum: String,
    pub(crate) path_template: String,
    pub(crate) number: u32,
    pub(crate) children: Vec<DescriptorNode>,
    pub(crate) tree_nodes: BTreeMap<String, DescriptorNode>,
    pub(crate) tap_shape: Option<TapTreeExpr>,
    pub(crate) checksum: String,
    pub(crate) depth: u32,
    pub(crate) need_arg_num: u32,
    pub(crate) node_kind: NodeKind,
    pub(crate) script_form: Option<ScriptForm>,
    pub(crate) key_kind: Option<KeyKind>,
    pub(crate) parent_kind: Option<ScriptForm>,
    pub(crate) network: Network,
}

impl DescriptorNode {
    pub(crate) fn new(network: Network) -> Self {
        DescriptorNode {
            name: String::new(),
            value: String::new(),
            key_info: String::new(),
            origin_info: String::new(),
            is_uncompressed_key: false,
            base_extkey: String::new(),
            tweak_sum: String::new(),
            path_template: String::new(),
            number: 0,
            children: Vec::new(),
            tree_nodes: BTreeMap::new(),
            tap_shape: None,
            checksum: String::new(),
            depth: 0,
            need_arg_num: 0,
            node_kind: NodeKind::Script,
            script_form: None,
            key_kind: None,
            parent_kind: None,
            network,
        }
    }

    /// Parses a descriptor into an analyzed, immutable tree.
    ///
    /// The tree is validated structurally and then probe-materialized with
    /// `"0"` arguments, so a returned node is guaranteed to produce scripts.
    pub fn parse(
        descriptor: &str,
        network: Network,
        ms: &dyn MiniscriptParser,
    ) -> Result<DescriptorNode, Error> {
        let mut node = DescriptorNode::new(network);
        node.node_kind = NodeKind::Script;
        node.scan_expression(descriptor, 0)?;
        node.analyze(None, ms)?;
        let mut probe = vec!["0".to_owned(); node.need_argument_num() as usize];
        node.references(&mut probe, None, ms)?;
        Ok(node)
    }

    pub(crate) fn scan_expression(&mut self, descriptor: &str, depth: u32) -> Result<(), Error> {
        if !descriptor.is_ascii() {
            return Err(Error::Structure("descriptor contains non-ascii characters".to_owned()));
        }
        log::trace!("scanning expression: {}", descriptor);
        self.depth = depth;
        let mut is_terminate = false;
        let mut offset = 0usize;
        let mut depth_work = depth as i64;
        let mut exist_child_node = false;
        let mut checksummed_body: Option<String> = None;

        let bytes = descriptor.as_bytes();
        for (idx, &ch) in bytes.iter().enumerate() {
            match ch {
                b'#' => {
                    if !is_terminate {
                        return Err(Error::BadChecksum(
                            "'#' before the end of the expression".to_owned(),
                        ));
                    }
                    if checksummed_body.is_none() {
                        let found = &descriptor[idx + 1..];
                        if found.contains('#') {
                            return Err(Error::BadChecksum("multiple '#' symbols".to_owned()));
                        }
                        self.checksum = found.to_owned();
                        checksummed_body = Some(descriptor[..idx].to_owned());
                    }
                }
                b',' => {
                    if exist_child_node {
                        // belongs to a nested expression
                    } else if self.name == "multi" || self.name == "sortedmulti" {
                        let mut node = DescriptorNode::new(self.network);
                        node.value = descriptor[offset..idx].to_owned();
                        if self.children.is_empty() {
                            node.node_kind = NodeKind::Number;
                            node.number = node.value.parse().unwrap_or(0);
                        } else {
                            node.node_kind = NodeKind::Key;
                        }
                        node.depth = depth + 1;
                        node.parent_kind = self.parent_kind;
                        self.children.push(node);
                        offset = idx + 1;
                    } else if self.name == "tr" && self.children.is_empty() {
                        let mut node = DescriptorNode::new(self.network);
                        node.value = descriptor[offset..idx].to_owned();
                        node.node_kind = NodeKind::Key;
                        node.depth = depth + 1;
                        node.parent_kind = self.parent_kind;
                        self.children.push(node);
                        offset = idx + 1;
                    }
                    // any other comma belongs to a miniscript body
                }
                b' ' => offset += 1,
                b'(' => {
                    if depth_work == depth as i64 {
                        self.name = descriptor[offset..idx].to_owned();
                        offset = idx + 1;
                    } else {
                        exist_child_node = true;
                    }
                    depth_work += 1;
                }
                b')' => {
                    depth_work -= 1;
                    if depth_work < depth as i64 {
                        return Err(Error::Structure("unbalanced parentheses".to_owned()));
                    }
                    if depth_work == depth as i64 {
                        self.value = descriptor[offset..idx].to_owned();
                        is_terminate = true;
                        offset = idx + 1;
                        if self.name == "addr" || self.name == "raw" {
                            // literal body, no child nodes
                        } else {
                            let mut node = DescriptorNode::new(self.network);
                            if self.name == "tr" {
                                node.node_kind = NodeKind::Script;
                                node.value = self.value.clone();
                                node.depth = depth + 1;
                                exist_child_node = false;
                            } else if exist_child_node {
                                node.node_kind = NodeKind::Script;
                                let inner = self.value.clone();
                                node.scan_expression(&inner, depth + 1)?;
                                exist_child_node = false;
                            } else {
                                node.node_kind = NodeKind::Key;
                                node.value = self.value.clone();
                                node.depth = depth + 1;
                            }
                            node.parent_kind = self.parent_kind;
                            self.children.push(node);
                        }
                    }
                }
                _ => {}
            }
        }

        if self.name.is_empty() || self.name == "addr" || self.name == "raw" {
            // nothing required at scan time
        } else if self.children.is_empty() {
            log::warn!("expression without children: {}", descriptor);
            return Err(Error::Structure("expression has no children".to_owned()));
        }

        if let Some(body) = checksummed_body {
            self.check_checksum(&body)?;
        }
        Ok(())
    }

    fn check_checksum(&self, body: &str) -> Result<(), Error> {
        if self.checksum.len() != 8 {
            log::warn!("expected 8 character checksum, not {}", self.checksum.len());
            return Err(Error::BadChecksum(format!(
                "expected 8 character checksum, not {} characters",
                self.checksum.len()
            )));
        }
        let expected = checksum::desc_checksum(body)?;
        if self.checksum != expected {
            log::warn!(
                "provided checksum '{}' does not match computed checksum '{}'",
                self.checksum,
                expected
            );
            return Err(Error::ChecksumMismatch { expected, found: self.checksum.clone() });
        }
        Ok(())
    }

    pub(crate) fn analyze(
        &mut self,
        parent: Option<ScriptForm>,
        ms: &dyn MiniscriptParser,
    ) -> Result<(), Error> {
        match self.node_kind {
            NodeKind::Number => return Ok(()),
            NodeKind::Key => return self.analyze_key(),
            NodeKind::Script => {}
        }
        if self.name.is_empty() {
            return Err(Error::Structure("failed to analyze descriptor".to_owned()));
        }

        let form = match ScriptForm::from_name(&self.name) {
            Some(form) => form,
            None => {
                let delegate = matches!(
                    parent,
                    Some(ScriptForm::Wsh) | Some(ScriptForm::Sh) | Some(ScriptForm::Tr)
                );
                if !delegate {
                    log::warn!("unknown script form: {}", self.name);
                    return Err(Error::Structure(format!("unknown script form '{}'", self.name)));
                }
                let expr = format!("{}({})", self.name, self.value);
                let ctx = if parent == Some(ScriptForm::Tr) {
                    MiniscriptContext::Tapscript
                } else {
                    MiniscriptContext::WitnessScript
                };
                let max_size = if parent == Some(ScriptForm::Sh) {
                    MAX_REDEEM_SCRIPT_SIZE
                } else {
                    MAX_SCRIPT_SIZE
                };
                let script = ms.parse_miniscript(&expr, 0, ctx).map_err(|e| {
                    log::warn!("failed to parse miniscript '{}': {}", expr, e);
                    Error::Miniscript("failed to parse miniscript".to_owned())
                })?;
                if script.len() > max_size {
                    return Err(Error::ScriptSize(format!(
                        "miniscript compiles to {} bytes",
                        script.len()
                    )));
                }
                self.script_form = Some(ScriptForm::Miniscript);
                self.number = script.len() as u32;
                self.need_arg_num = u32::from(expr.contains('*'));
                self.value = expr;
                self.name = "miniscript".to_owned();
                self.children.clear();
                return Ok(());
            }
        };

        if form.top_only() && self.depth != 0 {
            log::warn!("'{}' can only appear at the top level", self.name);
            return Err(Error::Structure(format!(
                "'{}' can only appear at the top level",
                self.name
            )));
        }
        if form.has_children() {
            if self.children.is_empty() {
                return Err(Error::Structure("expression has no children".to_owned()));
            }
        } else if !self.children.is_empty() {
            return Err(Error::Structure(format!(
                "'{}' takes no child expressions",
                self.name
            )));
        }

        if form.is_multisig() {
            if self.parent_kind == Some(ScriptForm::Tr) {
                return Err(Error::Taproot("multisig is not available in taproot".to_owned()));
            }
            if self.children.len() < 2 {
                return Err(Error::Structure("multisig requires a threshold and keys".to_owned()));
            }
            let pubkey_num = self.children.len() - 1;
            let req_num = self.children[0].number as usize;
            if req_num == 0 || pubkey_num < req_num {
                log::warn!("invalid multisig threshold: {}", req_num);
                return Err(Error::Structure(format!(
                    "invalid multisig threshold {} of {}",
                    req_num, pubkey_num
                )));
            }
            let max_pubkey_num = if parent == Some(ScriptForm::Wsh) {
                MAX_WITNESS_MULTISIG_PUBKEY_NUM
            } else {
                MAX_MULTISIG_PUBKEY_NUM
            };
            if pubkey_num > max_pubkey_num {
                return Err(Error::ScriptSize(format!(
                    "multisig takes at most {} keys, found {}",
                    max_pubkey_num, pubkey_num
                )));
            }
            for child in &mut self.children {
                child.analyze(Some(form), ms)?;
            }
            if parent == Some(ScriptForm::Sh) {
                self.script_form = Some(form);
                let mut probe = vec!["0".to_owned(); self.need_argument_num() as usize];
                let reference = self.reference(&mut probe, parent, ms)?;
                let script_size = reference.locking_script().len();
                if script_size + 3 > MAX_REDEEM_SCRIPT_SIZE {
                    log::warn!("redeem script size over: {}", script_size);
                    return Err(Error::ScriptSize(format!(
                        "redeem script is {} bytes",
                        script_size
                    )));
                }
            } else if parent == Some(ScriptForm::Wsh) {
                for child in &self.children {
                    if child.node_kind == NodeKind::Number {
                        continue;
                    }
                    let mut probe = vec!["0".to_owned()];
                    if !child.key_reference(&mut probe)?.pubkey().compressed {
                        return Err(Error::UncompressedKey(
                            "multisig inside wsh requires compressed keys".to_owned(),
                        ));
                    }
                }
            }
        } else if form == ScriptForm::Addr {
            self.value
                .parse::<Address<NetworkUnchecked>>()
                .map_err(|e| Error::Address(e.to_string()))?;
        } else if form == ScriptForm::Raw {
            hex::decode(&self.value)
                .map_err(|_| Error::Structure("raw script body must be hex".to_owned()))?;
        } else if form == ScriptForm::Tr {
            if self.children.len() != 1 && self.children.len() != 2 {
                return Err(Error::Structure(format!(
                    "tr takes one or two arguments, found {}",
                    self.children.len()
                )));
            }
            self.children[0].node_kind = NodeKind::Key;
            self.children[0].parent_kind = Some(ScriptForm::Tr);
            self.children[0].analyze(Some(form), ms)?;

            let mut probe = vec!["0".to_owned()];
            let internal = self.children[0].key_reference(&mut probe)?;
            if !internal.pubkey().compressed {
                return Err(Error::UncompressedKey(
                    "taproot requires a compressed key".to_owned(),
                ));
            }
            if self.children.len() == 2 {
                self.children[1].parent_kind = Some(ScriptForm::Tr);
                self.children[1].analyze_script_tree(ms)?;
                let mut probe =
                    vec!["0".to_owned(); self.children[1].need_argument_num() as usize];
                self.children[1].tap_reference(internal.x_only_pubkey(), &mut probe, ms)?;
            }
        } else {
            if self.children.len() != 1 {
                return Err(Error::Structure(format!(
                    "'{}' takes exactly one argument, found {}",
                    self.name,
                    self.children.len()
                )));
            }
            let wrapping = form == ScriptForm::Sh || form == ScriptForm::Wsh;
            if (form == ScriptForm::Wsh || form == ScriptForm::Wpkh)
                && !(parent.is_none() || parent == Some(ScriptForm::Sh))
            {
                return Err(Error::Structure(format!(
                    "'{}' may only appear at the top level or inside sh",
                    self.name
                )));
            }
            if wrapping && self.children[0].node_kind != NodeKind::Script {
                return Err(Error::Structure(format!(
                    "'{}' wraps a script expression",
                    self.name
                )));
            }
            if !wrapping && self.children[0].node_kind != NodeKind::Key {
                return Err(Error::Structure(format!(
                    "'{}' takes a key expression",
                    self.name
                )));
            }
            if parent == Some(ScriptForm::Tr) && form == ScriptForm::Pkh {
                return Err(Error::Taproot("pkh is not available in taproot".to_owned()));
            }
            self.children[0].parent_kind = self.parent_kind;
            self.children[0].analyze(Some(form), ms)?;

            if (form == ScriptForm::Wpkh || form == ScriptForm::Wsh)
                && self.exist_uncompressed_key()
            {
                log::warn!("uncompressed pubkey inside a witness expression");
                return Err(Error::UncompressedKey(
                    "witness expressions require compressed keys".to_owned(),
                ));
            }
        }
        self.script_form = Some(form);
        Ok(())
    }

    fn analyze_key(&mut self) -> Result<(), Error> {
        let in_taproot = self.parent_kind == Some(ScriptForm::Tr);
        let parsed = key::analyze_key_literal(&self.value, in_taproot)?;
        self.key_kind = Some(parsed.kind);
        self.key_info = parsed.key_info;
        self.origin_info = parsed.origin_info;
        self.base_extkey = parsed.base_extkey;
        self.tweak_sum = parsed.tweak_sum;
        self.path_template = parsed.path_template;
        self.need_arg_num = u32::from(parsed.needs_arg);
        self.is_uncompressed_key = parsed.is_uncompressed;
        Ok(())
    }

    fn exist_uncompressed_key(&self) -> bool {
        self.is_uncompressed_key || self.children.iter().any(DescriptorNode::exist_uncompressed_key)
    }

    /// Total number of arguments a materialization call must supply.
    pub fn need_argument_num(&self) -> u32 {
        self.need_arg_num + self.children.iter().map(DescriptorNode::need_argument_num).sum::<u32>()
    }

    /// Materializes the node, returning the first reference.
    pub(crate) fn reference(
        &self,
        args: &mut Vec<String>,
        parent: Option<ScriptForm>,
        ms: &dyn MiniscriptParser,
    ) -> Result<ScriptReference, Error> {
        self.references(args, parent, ms)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Structure("expression produced no reference".to_owned()))
    }

    /// Materializes the node with an argument list.
    ///
    /// The list is reversed once at the root so arguments are consumed in
    /// left-to-right tree order by popping from the back. Ordinarily one
    /// reference is returned; `combo` yields up to four.
    pub(crate) fn references(
        &self,
        args: &mut Vec<String>,
        parent: Option<ScriptForm>,
        ms: &dyn MiniscriptParser,
    ) -> Result<Vec<ScriptReference>, Error> {
        if self.depth == 0 && args.len() > 1 {
            args.reverse();
        }
        if self.node_kind != NodeKind::Script {
            return Err(Error::Structure(
                "reference generation requires a script expression".to_owned(),
            ));
        }
        let form = self
            .script_form
            .ok_or_else(|| Error::Structure("descriptor node was not analyzed".to_owned()))?;

        let mut result = Vec::new();
        match form {
            ScriptForm::Miniscript => {
                let mut child_num = 0u32;
                if self.need_arg_num != 0 {
                    if args.is_empty() {
                        return Err(Error::Argument(
                            "missing argument for wildcard miniscript".to_owned(),
                        ));
                    } else if args[0] == BASE_EXTKEY_ARGUMENT {
                        // the base key is used as-is, index stays zero
                    } else {
                        let arg = args.pop().expect("checked non-empty");
                        if arg.contains('/') {
                            return Err(Error::Argument(
                                "miniscript takes a single child index".to_owned(),
                            ));
                        }
                        child_num = arg.parse().map_err(|_| {
                            Error::Argument("child index must be a number".to_owned())
                        })?;
                    }
                }
                let ctx = if self.parent_kind == Some(ScriptForm::Tr) {
                    MiniscriptContext::Tapscript
                } else {
                    MiniscriptContext::WitnessScript
                };
                let script = ms.parse_miniscript(&self.value, child_num, ctx).map_err(|e| {
                    log::warn!("failed to parse miniscript: {}", e);
                    Error::Miniscript("failed to parse miniscript".to_owned())
                })?;
                result.push(ScriptReference::from_script(
                    ScriptBuf::from_bytes(script),
                    form,
                    self.network,
                ));
            }
            ScriptForm::Raw => {
                let bytes = hex::decode(&self.value)
                    .map_err(|_| Error::Structure("raw script body must be hex".to_owned()))?;
                result.push(ScriptReference::from_script(
                    ScriptBuf::from_bytes(bytes),
                    form,
                    self.network,
                ));
            }
            ScriptForm::Addr => {
                let address: Address<NetworkUnchecked> = self
                    .value
                    .parse()
                    .map_err(|e: bitcoin::address::ParseError| Error::Address(e.to_string()))?;
                result.push(ScriptReference::from_address(address, self.network));
            }
            ScriptForm::Multi | ScriptForm::SortedMulti => {
                let req_num = self.children[0].number;
                let mut keys = Vec::new();
                for child in &self.children[1..] {
                    keys.push(child.key_reference(args)?);
                }
                let mut pubkeys: Vec<PublicKey> = keys.iter().map(KeyReference::pubkey).collect();
                if form == ScriptForm::SortedMulti {
                    // BIP-67: ascending order over the serialized keys
                    pubkeys.sort_by(|a, b| a.to_bytes().cmp(&b.to_bytes()));
                }
                let locking = multisig_script(req_num, &pubkeys);
                result.push(ScriptReference::with_keys(
                    locking,
                    form,
                    keys,
                    req_num,
                    self.network,
                ));
            }
            ScriptForm::Sh | ScriptForm::Wsh => {
                let child = self.children[0].reference(args, Some(form), ms)?;
                let locking = if form == ScriptForm::Wsh {
                    ScriptBuf::new_p2wsh(&child.locking_script().wscript_hash())
                } else {
                    ScriptBuf::new_p2sh(&child.locking_script().script_hash())
                };
                result.push(ScriptReference::wrapped(locking, form, child, self.network));
            }
            ScriptForm::Tr => {
                let key_ref = self.children[0].key_reference(args)?;
                let internal = key_ref.x_only_pubkey();
                let secp = Secp256k1::verification_only();
                let (locking, taproot) = if self.children.len() >= 2 {
                    let tap = self.children[1].tap_reference(internal, args, ms)?;
                    let locking = ScriptBuf::new_p2tr(&secp, internal, tap.merkle_root());
                    (locking, tap)
                } else {
                    // key-path-only output, BIP-86 tweak over an empty tree
                    let (output, _) = internal.tap_tweak(&secp, None);
                    let locking = ScriptBuf::new_p2tr(&secp, internal, None);
                    (
                        locking,
                        TaprootReference::new(
                            internal,
                            output.to_x_only_public_key(),
                            None,
                            Vec::new(),
                        ),
                    )
                };
                result.push(ScriptReference::with_taproot(
                    locking,
                    vec![key_ref],
                    taproot,
                    self.network,
                ));
            }
            ScriptForm::Pk | ScriptForm::Pkh | ScriptForm::Wpkh | ScriptForm::Combo => {
                let key_ref = self.children[0].key_reference(args)?;
                let format = key_ref.bip32_format();
                let pubkey = key_ref.pubkey();
                match form {
                    ScriptForm::Combo => {
                        let keys = vec![key_ref];
                        if pubkey.compressed {
                            let hash = pubkey.wpubkey_hash().map_err(|e| {
                                Error::UncompressedKey(e.to_string())
                            })?;
                            let wpkh_script = ScriptBuf::new_p2wpkh(&hash);
                            if format != Bip32Format::Bip49 {
                                result.push(ScriptReference::with_keys(
                                    wpkh_script.clone(),
                                    form,
                                    keys.clone(),
                                    0,
                                    self.network,
                                ));
                            }
                            if format != Bip32Format::Bip84 {
                                let child = ScriptReference::with_keys(
                                    wpkh_script.clone(),
                                    ScriptForm::Wpkh,
                                    keys.clone(),
                                    0,
                                    self.network,
                                );
                                let locking = ScriptBuf::new_p2sh(&wpkh_script.script_hash());
                                result.push(ScriptReference::wrapped(
                                    locking,
                                    form,
                                    child,
                                    self.network,
                                ));
                            }
                        }
                        if format == Bip32Format::Unmarked {
                            result.push(ScriptReference::with_keys(
                                ScriptBuf::new_p2pkh(&pubkey.pubkey_hash()),
                                form,
                                keys.clone(),
                                0,
                                self.network,
                            ));
                            let p2pk = Builder::new()
                                .push_key(&pubkey)
                                .push_opcode(OP_CHECKSIG)
                                .into_script();
                            result.push(ScriptReference::with_keys(
                                p2pk,
                                form,
                                keys,
                                0,
                                self.network,
                            ));
                        }
                    }
                    ScriptForm::Pkh => {
                        if format != Bip32Format::Unmarked {
                            return Err(Error::Bip32Format(
                                "pkh does not take bip49 or bip84 keys".to_owned(),
                            ));
                        }
                        result.push(ScriptReference::with_keys(
                            ScriptBuf::new_p2pkh(&pubkey.pubkey_hash()),
                            form,
                            vec![key_ref],
                            0,
                            self.network,
                        ));
                    }
                    ScriptForm::Wpkh => {
                        if format == Bip32Format::Bip49 && parent != Some(ScriptForm::Sh) {
                            return Err(Error::Bip32Format(
                                "bip49 keys belong in sh(wpkh(...))".to_owned(),
                            ));
                        }
                        if format == Bip32Format::Bip84 && parent.is_some() {
                            return Err(Error::Bip32Format(
                                "bip84 keys belong in a top-level wpkh".to_owned(),
                            ));
                        }
                        let hash = pubkey
                            .wpubkey_hash()
                            .map_err(|e| Error::UncompressedKey(e.to_string()))?;
                        result.push(ScriptReference::with_keys(
                            ScriptBuf::new_p2wpkh(&hash),
                            form,
                            vec![key_ref],
                            0,
                            self.network,
                        ));
                    }
                    ScriptForm::Pk => {
                        if format != Bip32Format::Unmarked {
                            return Err(Error::Bip32Format(
                                "pk does not take bip49 or bip84 keys".to_owned(),
                            ));
                        }
                        let script = if self.parent_kind == Some(ScriptForm::Tr) {
                            Builder::new()
                                .push_slice(key_ref.x_only_pubkey().serialize())
                                .push_opcode(OP_CHECKSIG)
                                .into_script()
                        } else {
                            Builder::new().push_key(&pubkey).push_opcode(OP_CHECKSIG).into_script()
                        };
                        result.push(ScriptReference::with_keys(
                            script,
                            form,
                            vec![key_ref],
                            0,
                            self.network,
                        ));
                    }
                    _ => unreachable!("outer match restricts the form"),
                }
            }
        }
        Ok(result)
    }

    /// Resolves the key expression of this node, consuming an argument when
    /// the expression carries a wildcard.
    pub(crate) fn key_reference(&self, args: &mut Vec<String>) -> Result<KeyReference, Error> {
        let kind = self
            .key_kind
            .ok_or_else(|| Error::Structure("key reference on a non-key node".to_owned()))?;
        match kind {
            KeyKind::Single => {
                let pubkey = PublicKey::from_str(&self.key_info)
                    .map_err(|e| Error::Key(e.to_string()))?;
                let (x_only, _) = pubkey.inner.x_only_public_key();
                let origin = key::parse_origin(&self.origin_info)?;
                let key_data = KeyData::new(
                    origin,
                    pubkey,
                    None,
                    None,
                    None,
                    self.key_info.clone(),
                );
                Ok(KeyReference::new(
                    kind,
                    pubkey,
                    x_only,
                    None,
                    None,
                    Bip32Format::Unmarked,
                    None,
                    Some(key_data),
                ))
            }
            KeyKind::Schnorr => {
                let x_only = XOnlyPublicKey::from_str(&self.key_info)
                    .map_err(|e| Error::Key(e.to_string()))?;
                let pubkey = PublicKey::new(bitcoin::secp256k1::PublicKey::from_x_only_public_key(
                    x_only,
                    Parity::Even,
                ));
                let origin = key::parse_origin(&self.origin_info)?;
                let key_data = KeyData::new(
                    origin,
                    pubkey,
                    Some(x_only),
                    None,
                    None,
                    self.key_info.clone(),
                );
                Ok(KeyReference::new(
                    kind,
                    pubkey,
                    x_only,
                    None,
                    None,
                    Bip32Format::Unmarked,
                    None,
                    Some(key_data),
                ))
            }
            KeyKind::Bip32 | KeyKind::Bip32Priv => self.bip32_key_reference(kind, args),
        }
    }

    fn bip32_key_reference(
        &self,
        kind: KeyKind,
        args: &mut Vec<String>,
    ) -> Result<KeyReference, Error> {
        let mut using_key = self.key_info.as_str();
        let mut need = self.need_arg_num;
        let mut has_base = false;
        let mut argument: Option<String> = None;
        if need == 0 {
            // fixed key, fully derived at parse time
        } else if args.is_empty() {
            log::warn!("missing argument for wildcard derivation");
            return Err(Error::Argument(
                "missing argument for wildcard derivation".to_owned(),
            ));
        } else if args[0] == BASE_EXTKEY_ARGUMENT {
            using_key = self.base_extkey.as_str();
            need = 0;
            has_base = true;
        } else {
            argument = Some(args.pop().expect("checked non-empty"));
        }

        let (xpub, xprv, format) = if kind == KeyKind::Bip32Priv {
            let (base, format) = key::parse_xprv(using_key)?;
            let derived = match argument.as_deref() {
                Some(arg) if need != 0 => {
                    let secp = Secp256k1::new();
                    let path = key::parse_path(arg)?;
                    base.derive_priv(&secp, &path)
                        .map_err(|e| Error::Derivation(e.to_string()))?
                }
                _ => base,
            };
            let secp = Secp256k1::new();
            (Xpub::from_priv(&secp, &derived), Some(derived), format)
        } else {
            let (base, format) = key::parse_xpub(using_key)?;
            let derived = match argument.as_deref() {
                Some(arg) if need != 0 => {
                    let secp = Secp256k1::verification_only();
                    let path = key::parse_path(arg)?;
                    base.derive_pub(&secp, &path)
                        .map_err(|e| Error::Derivation(e.to_string()))?
                }
                _ => base,
            };
            (derived, None, format)
        };

        let pubkey = PublicKey::new(xpub.public_key);
        let (x_only, _) = xpub.public_key.x_only_public_key();

        let plain_argument = argument.as_deref().map_or(true, |arg| !arg.contains('/'));
        let key_data = if (need == 0 && !has_base) || (argument.is_some() && plain_argument) {
            let origin = self.key_data_origin(xpub.child_number)?;
            let key_string = match (&xprv, kind) {
                (Some(derived), KeyKind::Bip32Priv) => key::xprv_to_string(derived, format),
                _ => key::xpub_to_string(&xpub, format),
            };
            Some(KeyData::new(origin, pubkey, None, Some(xpub), xprv, key_string))
        } else {
            None
        };

        Ok(KeyReference::new(
            kind,
            pubkey,
            x_only,
            Some(xpub),
            xprv,
            format,
            argument,
            key_data,
        ))
    }

    /// Combines the origin path with the key's own path suffix, substituting
    /// the resolved child number for the wildcard.
    fn key_data_origin(
        &self,
        child: ChildNumber,
    ) -> Result<Option<(bitcoin::bip32::Fingerprint, bitcoin::bip32::DerivationPath)>, Error> {
        let origin = match key::parse_origin(&self.origin_info)? {
            Some(origin) => origin,
            None => return Ok(None),
        };
        if self.path_template.is_empty() {
            return Ok(Some(origin));
        }
        let mut segments: Vec<String> = self
            .path_template
            .split('/')
            .map(str::to_owned)
            .collect();
        if let Some(last) = segments.last_mut() {
            if last == "*" || last == "*'" || last == "*h" {
                *last = child.to_string();
            }
        }
        let suffix = key::parse_path(&segments.join("/"))?;
        let (fingerprint, path) = origin;
        Ok(Some((fingerprint, path.extend(&suffix))))
    }

    /// Regenerates the canonical descriptor text of this node.
    ///
    /// At the root, `append_checksum` controls whether the freshly computed
    /// checksum is appended after a `#`.
    pub fn to_string(&self, append_checksum: bool) -> String {
        let mut result = if self.name.is_empty() || self.name == "miniscript" {
            self.value.clone()
        } else if self.children.is_empty() {
            format!("{}({})", self.name, self.value)
        } else {
            let children: Vec<String> =
                self.children.iter().map(|c| c.to_string(append_checksum)).collect();
            format!("{}({})", self.name, children.join(","))
        };
        if self.depth == 0 && append_checksum {
            if let Ok(checksum) = checksum::desc_checksum(&result) {
                result.push('#');
                result.push_str(&checksum);
            }
        }
        result
    }

    /// The kind of this node.
    pub fn node_kind(&self) -> NodeKind {
        self.node_kind
    }

    /// The script form, for analyzed script nodes.
    pub fn script_form(&self) -> Option<ScriptForm> {
        self.script_form
    }

    /// The kind of key, for analyzed key nodes.
    pub fn key_kind(&self) -> Option<KeyKind> {
        self.key_kind
    }

    /// The expression name (script form name), empty for non-script nodes.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw text between the parentheses, or the key/number literal.
    pub fn raw_value(&self) -> &str {
        &self.value
    }

    /// The resolved key text after origin stripping and fixed derivation.
    pub fn key_info(&self) -> &str {
        &self.key_info
    }

    /// The `[fingerprint/path]` origin prefix, empty when absent.
    pub fn origin_info(&self) -> &str {
        &self.origin_info
    }

    /// The un-derived base extended key, preserved verbatim.
    pub fn base_extkey(&self) -> &str {
        &self.base_extkey
    }

    /// Accumulated BIP32 tweak over the parse-time derivation steps.
    pub fn tweak_sum(&self) -> &str {
        &self.tweak_sum
    }

    /// The path suffix after the extended key, wildcard included.
    pub fn path_template(&self) -> &str {
        &self.path_template
    }

    /// The integer value of a `Number` node (multisig threshold).
    pub fn number_value(&self) -> u32 {
        self.number
    }

    /// Child nodes, in descriptor order.
    pub fn children(&self) -> &[DescriptorNode] {
        &self.children
    }

    /// Distinct taproot tree leaves by their canonical text, for the tree
    /// argument node of `tr`.
    pub fn tapscript_map(&self) -> &BTreeMap<String, DescriptorNode> {
        &self.tree_nodes
    }

    /// Nesting depth; zero for the root.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// The checksum attached to the parsed text, empty when absent.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// The network the descriptor was parsed for.
    pub fn network(&self) -> Network {
        self.network
    }
}

fn multisig_script(req_num: u32, pubkeys: &[PublicKey]) -> ScriptBuf {
    let mut builder = Builder::new().push_int(req_num as i64);
    for pubkey in pubkeys {
        builder = builder.push_key(pubkey);
    }
    builder.push_int(pubkeys.len() as i64).push_opcode(OP_CHECKMULTISIG).into_script()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::DefaultMiniscriptParser;

    fn parse(descriptor: &str) -> Result<DescriptorNode, Error> {
        DescriptorNode::parse(descriptor, Network::Bitcoin, &DefaultMiniscriptParser)
    }

    const PK_G: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
    const PK_2G: &str = "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";
    const PK_3G: &str = "02f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9";

    #[test]
    fn scan_splits_children() {
        let node = parse(&format!("sh(multi(2,{},{}))", PK_G, PK_2G)).unwrap();
        assert_eq!(node.name(), "sh");
        assert_eq!(node.children().len(), 1);
        let multi = &node.children()[0];
        assert_eq!(multi.name(), "multi");
        assert_eq!(multi.children().len(), 3);
        assert_eq!(multi.children()[0].node_kind(), NodeKind::Number);
        assert_eq!(multi.children()[0].number_value(), 2);
        assert_eq!(multi.children()[1].node_kind(), NodeKind::Key);
    }

    #[test]
    fn top_only_forms_do_not_nest() {
        assert!(matches!(
            parse(&format!("sh(sh(pkh({})))", PK_G)),
            Err(Error::Structure(_))
        ));
        assert!(matches!(
            parse(&format!("wsh(combo({}))", PK_G)),
            Err(Error::Structure(_))
        ));
    }

    #[test]
    fn wsh_only_at_top_or_inside_sh() {
        assert!(parse(&format!("sh(wsh(pkh({})))", PK_G)).is_ok());
        assert!(matches!(
            parse(&format!("wsh(wsh(pkh({})))", PK_G)),
            Err(Error::Structure(_))
        ));
    }

    #[test]
    fn multisig_limits() {
        // threshold of zero
        assert!(matches!(
            parse(&format!("multi(0,{})", PK_G)),
            Err(Error::Structure(_))
        ));
        // threshold above the key count
        assert!(matches!(
            parse(&format!("multi(3,{},{})", PK_G, PK_2G)),
            Err(Error::Structure(_))
        ));
        // bare multisig takes at most 16 keys
        let keys = vec![PK_G; 17].join(",");
        assert!(matches!(
            parse(&format!("multi(1,{})", keys)),
            Err(Error::ScriptSize(_))
        ));
    }

    #[test]
    fn sortedmulti_orders_keys() {
        let desc = parse(&format!("sortedmulti(1,{},{})", PK_3G, PK_2G)).unwrap();
        let mut args = Vec::new();
        let reference = desc
            .reference(&mut args, None, &DefaultMiniscriptParser)
            .unwrap();
        let script = reference.locking_script().as_bytes();
        // 2G sorts before 3G regardless of descriptor order
        let first_key = &script[2..35];
        assert_eq!(first_key, hex::decode(PK_2G).unwrap().as_slice());
    }

    #[test]
    fn number_children_are_rejected_as_keys() {
        assert!(parse("multi(1,2,3)").is_err());
    }

    #[test]
    fn unknown_form_without_script_parent() {
        assert!(matches!(
            parse(&format!("frob({})", PK_G)),
            Err(Error::Structure(_))
        ));
    }

    #[test]
    fn to_string_round_trips() {
        let text = format!("sh(multi(2,{},{},{}))", PK_G, PK_2G, PK_3G);
        let node = parse(&text).unwrap();
        assert_eq!(node.to_string(false), text);
        let with_checksum = node.to_string(true);
        let node2 = parse(&with_checksum).unwrap();
        assert_eq!(node2.to_string(true), with_checksum);
    }

    #[test]
    fn checksum_is_validated_during_scan() {
        let text = format!("pkh({})", PK_G);
        let node = parse(&text).unwrap();
        let canonical = node.to_string(true);
        assert!(parse(&canonical).is_ok());
        // flip the final checksum character
        let mut broken = canonical.clone();
        let last = if broken.ends_with('q') { 'p' } else { 'q' };
        broken.pop();
        broken.push(last);
        assert!(matches!(parse(&broken), Err(Error::ChecksumMismatch { .. })));
        // short checksum
        assert!(matches!(
            parse(&format!("{}#abcd", text)),
            Err(Error::BadChecksum(_))
        ));
        // second '#'
        assert!(matches!(
            parse(&format!("{}#abcd#efg", text)),
            Err(Error::BadChecksum(_))
        ));
    }

    #[test]
    fn unbalanced_parens() {
        assert!(parse(&format!("pkh({}))", PK_G)).is_err());
        assert!(parse(&format!("sh(pkh({})", PK_G)).is_err());
    }
}
