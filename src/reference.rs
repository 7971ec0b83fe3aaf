// SPDX-License-Identifier: CC0-1.0

//! Materialization outputs
//!
//! Materializing a parsed descriptor produces a tree of references that
//! parallels the AST: each [`ScriptReference`] carries the locking script of
//! its node, the child reference for wrapping forms (`sh`, `wsh`), the
//! resolved keys and, for `tr`, the taproot commitment data. References are
//! self-contained; rendering addresses needs nothing but a network.

use bitcoin::address::NetworkUnchecked;
use bitcoin::bip32::{Xpriv, Xpub};
use bitcoin::taproot::TapNodeHash;
use bitcoin::{Address, Network, PublicKey, ScriptBuf, XOnlyPublicKey};

use crate::key::{Bip32Format, KeyData, KeyKind};
use crate::node::ScriptForm;
use crate::Error;

/// Address-level classification of a materialized script.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AddressClass {
    /// Pay-to-pubkey-hash.
    P2pkh,
    /// Pay-to-script-hash.
    P2sh,
    /// Native segwit v0 pubkey hash.
    P2wpkh,
    /// Native segwit v0 script hash.
    P2wsh,
    /// Taproot output.
    P2tr,
    /// P2WPKH nested in P2SH.
    ShWpkh,
    /// P2WSH nested in P2SH.
    ShWsh,
}

/// A key resolved during materialization.
#[derive(Debug, Clone)]
pub struct KeyReference {
    key_kind: KeyKind,
    pubkey: PublicKey,
    x_only: XOnlyPublicKey,
    xpub: Option<Xpub>,
    xprv: Option<Xpriv>,
    format: Bip32Format,
    argument: Option<String>,
    key_data: Option<KeyData>,
}

impl KeyReference {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        key_kind: KeyKind,
        pubkey: PublicKey,
        x_only: XOnlyPublicKey,
        xpub: Option<Xpub>,
        xprv: Option<Xpriv>,
        format: Bip32Format,
        argument: Option<String>,
        key_data: Option<KeyData>,
    ) -> Self {
        KeyReference { key_kind, pubkey, x_only, xpub, xprv, format, argument, key_data }
    }

    /// The kind of key expression this reference was resolved from.
    pub fn key_kind(&self) -> KeyKind {
        self.key_kind
    }

    /// The resolved public key.
    pub fn pubkey(&self) -> PublicKey {
        self.pubkey
    }

    /// The x-only form of the resolved key.
    pub fn x_only_pubkey(&self) -> XOnlyPublicKey {
        self.x_only
    }

    /// The derived extended public key, for BIP32 key expressions.
    pub fn ext_pubkey(&self) -> Option<&Xpub> {
        self.xpub.as_ref()
    }

    /// The derived extended private key, for `xprv` key expressions.
    pub fn ext_privkey(&self) -> Option<&Xpriv> {
        self.xprv.as_ref()
    }

    /// SLIP-132 marker of the key expression, if it was an extended key.
    pub fn bip32_format(&self) -> Bip32Format {
        self.format
    }

    /// The materialization argument consumed for this key, if any.
    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }

    /// The origin-preserving key data.
    pub fn key_data(&self) -> Option<&KeyData> {
        self.key_data.as_ref()
    }
}

/// Taproot commitment data attached to a `tr` reference.
#[derive(Debug, Clone)]
pub struct TaprootReference {
    internal_key: XOnlyPublicKey,
    output_key: XOnlyPublicKey,
    merkle_root: Option<TapNodeHash>,
    leaves: Vec<ScriptBuf>,
}

impl TaprootReference {
    pub(crate) fn new(
        internal_key: XOnlyPublicKey,
        output_key: XOnlyPublicKey,
        merkle_root: Option<TapNodeHash>,
        leaves: Vec<ScriptBuf>,
    ) -> Self {
        TaprootReference { internal_key, output_key, merkle_root, leaves }
    }

    /// The un-tweaked internal key.
    pub fn internal_key(&self) -> XOnlyPublicKey {
        self.internal_key
    }

    /// The tweaked output key committed in the locking script.
    pub fn output_key(&self) -> XOnlyPublicKey {
        self.output_key
    }

    /// Root of the script tree, absent for key-path-only outputs.
    pub fn merkle_root(&self) -> Option<TapNodeHash> {
        self.merkle_root
    }

    /// The materialized leaf scripts, in left-to-right tree order.
    pub fn leaf_scripts(&self) -> &[ScriptBuf] {
        &self.leaves
    }

    /// Whether the output commits to a script tree.
    pub fn has_script_tree(&self) -> bool {
        self.merkle_root.is_some()
    }
}

/// A materialized script node.
#[derive(Debug, Clone)]
pub struct ScriptReference {
    script_form: ScriptForm,
    locking_script: ScriptBuf,
    child: Option<Box<ScriptReference>>,
    address: Option<Address<NetworkUnchecked>>,
    keys: Vec<KeyReference>,
    req_num: u32,
    taproot: Option<TaprootReference>,
    network: Network,
}

impl ScriptReference {
    pub(crate) fn from_script(
        locking_script: ScriptBuf,
        script_form: ScriptForm,
        network: Network,
    ) -> Self {
        ScriptReference {
            script_form,
            locking_script,
            child: None,
            address: None,
            keys: Vec::new(),
            req_num: 0,
            taproot: None,
            network,
        }
    }

    pub(crate) fn wrapped(
        locking_script: ScriptBuf,
        script_form: ScriptForm,
        child: ScriptReference,
        network: Network,
    ) -> Self {
        ScriptReference {
            script_form,
            locking_script,
            child: Some(Box::new(child)),
            address: None,
            keys: Vec::new(),
            req_num: 0,
            taproot: None,
            network,
        }
    }

    pub(crate) fn with_keys(
        locking_script: ScriptBuf,
        script_form: ScriptForm,
        keys: Vec<KeyReference>,
        req_num: u32,
        network: Network,
    ) -> Self {
        ScriptReference {
            script_form,
            locking_script,
            child: None,
            address: None,
            keys,
            req_num,
            taproot: None,
            network,
        }
    }

    pub(crate) fn from_address(address: Address<NetworkUnchecked>, network: Network) -> Self {
        let locking_script = address.clone().assume_checked().script_pubkey();
        ScriptReference {
            script_form: ScriptForm::Addr,
            locking_script,
            child: None,
            address: Some(address),
            keys: Vec::new(),
            req_num: 0,
            taproot: None,
            network,
        }
    }

    pub(crate) fn with_taproot(
        locking_script: ScriptBuf,
        keys: Vec<KeyReference>,
        taproot: TaprootReference,
        network: Network,
    ) -> Self {
        ScriptReference {
            script_form: ScriptForm::Tr,
            locking_script,
            child: None,
            address: None,
            keys,
            req_num: 0,
            taproot: Some(taproot),
            network,
        }
    }

    /// The locking script of this node.
    pub fn locking_script(&self) -> &ScriptBuf {
        &self.locking_script
    }

    /// The script form this reference was materialized from.
    pub fn script_form(&self) -> ScriptForm {
        self.script_form
    }

    /// Whether a redeem script (the child's locking script) exists.
    pub fn has_redeem_script(&self) -> bool {
        self.child.is_some()
    }

    /// The redeem script, for wrapping forms.
    pub fn redeem_script(&self) -> Option<&ScriptBuf> {
        self.child.as_ref().map(|c| &c.locking_script)
    }

    /// Whether this reference wraps a child reference.
    pub fn has_child(&self) -> bool {
        self.child.is_some()
    }

    /// The wrapped child reference, for `sh` and `wsh`.
    pub fn child(&self) -> Option<&ScriptReference> {
        self.child.as_deref()
    }

    /// Whether a multisig signature requirement is attached.
    pub fn has_req_num(&self) -> bool {
        self.script_form.is_multisig() && self.req_num > 0
    }

    /// The multisig threshold, when [`Self::has_req_num`] holds.
    pub fn req_num(&self) -> Option<u32> {
        if self.has_req_num() {
            Some(self.req_num)
        } else {
            None
        }
    }

    /// Whether any keys were resolved for this node.
    pub fn has_key(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Number of resolved keys.
    pub fn key_num(&self) -> usize {
        self.keys.len()
    }

    /// The resolved keys, in descriptor order.
    pub fn key_list(&self) -> &[KeyReference] {
        &self.keys
    }

    /// Taproot commitment data, for `tr` references.
    pub fn taproot(&self) -> Option<&TaprootReference> {
        self.taproot.as_ref()
    }

    /// The network the descriptor was parsed for.
    pub fn network(&self) -> Network {
        self.network
    }

    /// Whether an address can be generated from this reference.
    pub fn has_address(&self) -> bool {
        if self.script_form == ScriptForm::Raw || self.script_form == ScriptForm::Miniscript {
            let s = &self.locking_script;
            return s.is_p2pkh() || s.is_p2sh() || s.is_p2wpkh() || s.is_p2wsh() || s.is_p2tr();
        }
        true
    }

    /// Generates the address of this reference for `network`.
    ///
    /// For `addr(...)` descriptors the requested network must match the
    /// parsed address; every other form renders its script for the requested
    /// network directly.
    pub fn generate_address(&self, network: Network) -> Result<Address, Error> {
        match self.script_form {
            ScriptForm::Raw | ScriptForm::Miniscript => {
                Address::from_script(&self.locking_script, network)
                    .map_err(|e| Error::Address(e.to_string()))
            }
            ScriptForm::Addr => {
                let address = self.address.clone().expect("addr reference holds an address");
                address.require_network(network).map_err(|e| {
                    log::warn!("address network mismatch: {}", e);
                    Error::Address("address does not match the requested network".to_owned())
                })
            }
            ScriptForm::Wpkh => Ok(Address::p2wpkh(&self.compressed_key()?, network)),
            ScriptForm::Pk
            | ScriptForm::Pkh
            | ScriptForm::Multi
            | ScriptForm::SortedMulti => Ok(Address::p2pkh(self.first_key()?.pubkey_hash(), network)),
            ScriptForm::Combo => {
                if self.locking_script.is_p2sh() {
                    let redeem = self.redeem_script().expect("sh-wrapped combo has a child");
                    Address::p2sh(redeem, network).map_err(|e| Error::Address(e.to_string()))
                } else if self.locking_script.is_p2wpkh() {
                    Ok(Address::p2wpkh(&self.compressed_key()?, network))
                } else {
                    Ok(Address::p2pkh(self.first_key()?.pubkey_hash(), network))
                }
            }
            ScriptForm::Wsh => {
                let redeem = self
                    .redeem_script()
                    .ok_or_else(|| Error::Address("wsh reference without a child".to_owned()))?;
                Ok(Address::p2wsh(redeem, network))
            }
            ScriptForm::Sh => {
                let redeem = self
                    .redeem_script()
                    .ok_or_else(|| Error::Address("sh reference without a child".to_owned()))?;
                Address::p2sh(redeem, network).map_err(|e| Error::Address(e.to_string()))
            }
            ScriptForm::Tr => {
                let taproot = self
                    .taproot
                    .as_ref()
                    .ok_or_else(|| Error::Address("taproot data missing".to_owned()))?;
                let secp = bitcoin::secp256k1::Secp256k1::verification_only();
                Ok(Address::p2tr(
                    &secp,
                    taproot.internal_key(),
                    taproot.merkle_root(),
                    network,
                ))
            }
        }
    }

    /// Generates the address list of this reference.
    ///
    /// Bare multisig yields one P2PKH address per key; every other form
    /// yields the single address of [`Self::generate_address`].
    pub fn generate_addresses(&self, network: Network) -> Result<Vec<Address>, Error> {
        if self.script_form.is_multisig() {
            Ok(self
                .keys
                .iter()
                .map(|key| Address::p2pkh(key.pubkey().pubkey_hash(), network))
                .collect())
        } else {
            Ok(vec![self.generate_address(network)?])
        }
    }

    /// Classifies the reference by the shape of its locking script.
    pub fn address_class(&self) -> Result<AddressClass, Error> {
        let script = &self.locking_script;
        if script.is_p2sh() {
            return Ok(match self.redeem_script() {
                Some(redeem) if redeem.is_p2wpkh() => AddressClass::ShWpkh,
                Some(redeem) if redeem.is_p2wsh() => AddressClass::ShWsh,
                _ => AddressClass::P2sh,
            });
        }
        if script.is_p2wpkh() {
            return Ok(AddressClass::P2wpkh);
        }
        if script.is_p2wsh() {
            return Ok(AddressClass::P2wsh);
        }
        if script.is_p2tr() {
            return Ok(AddressClass::P2tr);
        }
        if script.is_p2pkh() {
            return Ok(AddressClass::P2pkh);
        }
        if script.is_p2pk() || is_bare_multisig(script) {
            // bare pubkey scripts have no address form of their own
            return Ok(AddressClass::P2sh);
        }
        Err(Error::Address("unknown address type".to_owned()))
    }

    fn first_key(&self) -> Result<PublicKey, Error> {
        self.keys
            .first()
            .map(|k| k.pubkey())
            .ok_or_else(|| Error::Address("no key available for address generation".to_owned()))
    }

    fn compressed_key(&self) -> Result<bitcoin::CompressedPublicKey, Error> {
        let pubkey = self.first_key()?;
        if !pubkey.compressed {
            return Err(Error::UncompressedKey(
                "witness addresses require a compressed key".to_owned(),
            ));
        }
        Ok(bitcoin::CompressedPublicKey(pubkey.inner))
    }
}

fn is_bare_multisig(script: &ScriptBuf) -> bool {
    script.as_bytes().last()
        == Some(&bitcoin::opcodes::all::OP_CHECKMULTISIG.to_u8())
}
