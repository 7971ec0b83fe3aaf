// SPDX-License-Identifier: CC0-1.0

//! Descriptor key expressions
//!
//! A key expression is an optional `[fingerprint/path]` origin prefix
//! followed by one of: a 33- or 65-byte public key in hex, a 32-byte x-only
//! public key (taproot context only), a WIF-encoded private key, or a BIP32
//! extended key with a derivation path that may end in a wildcard.
//!
//! Extended keys are accepted both in the standard `xpub`/`tpub` encodings
//! and in the SLIP-132 `ypub`/`zpub`/`upub`/`vpub` families, whose version
//! bytes additionally mark the intended script form (BIP49 or BIP84); the
//! marker is preserved when keys are re-encoded and is enforced during
//! materialization.

use std::fmt;
use std::str::FromStr;

use bitcoin::base58;
use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, Xpriv, Xpub};
use bitcoin::hashes::{sha512, Hash, HashEngine, Hmac, HmacEngine};
use bitcoin::secp256k1::{Scalar, Secp256k1, SecretKey};
use bitcoin::{NetworkKind, PrivateKey, PublicKey, XOnlyPublicKey};

use crate::Error;

/// Kind of key held by a descriptor key expression.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KeyKind {
    /// A single public key (possibly recovered from a WIF private key).
    Single,
    /// A BIP32 extended public key.
    Bip32,
    /// A BIP32 extended private key.
    Bip32Priv,
    /// A 32-byte x-only key, as used by taproot.
    Schnorr,
}

/// Script-form marker carried by an extended key's version bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Bip32Format {
    /// Standard `xpub`/`xprv` (or testnet `tpub`/`tprv`) version bytes.
    #[default]
    Unmarked,
    /// SLIP-132 `ypub` family: the key is intended for `sh(wpkh(...))`.
    Bip49,
    /// SLIP-132 `zpub` family: the key is intended for `wpkh(...)`.
    Bip84,
}

const VERSION_XPUB: u32 = 0x0488_b21e;
const VERSION_XPRV: u32 = 0x0488_ade4;
const VERSION_TPUB: u32 = 0x0435_87cf;
const VERSION_TPRV: u32 = 0x0435_8394;
const VERSION_YPUB: u32 = 0x049d_7cb2;
const VERSION_YPRV: u32 = 0x049d_7878;
const VERSION_ZPUB: u32 = 0x04b2_4746;
const VERSION_ZPRV: u32 = 0x04b2_430c;
const VERSION_UPUB: u32 = 0x044a_5262;
const VERSION_UPRV: u32 = 0x044a_4e28;
const VERSION_VPUB: u32 = 0x045f_1cf6;
const VERSION_VPRV: u32 = 0x045f_18bc;

fn swap_version(mut data: Vec<u8>, version: u32) -> Vec<u8> {
    data[..4].copy_from_slice(&version.to_be_bytes());
    data
}

/// Decodes an extended public key, accepting SLIP-132 version bytes.
pub(crate) fn parse_xpub(s: &str) -> Result<(Xpub, Bip32Format), Error> {
    if let Ok(xpub) = Xpub::from_str(s) {
        return Ok((xpub, Bip32Format::Unmarked));
    }
    let data = base58::decode_check(s).map_err(|e| Error::Key(e.to_string()))?;
    if data.len() != 78 {
        return Err(Error::Key("invalid extended key length".to_owned()));
    }
    let version = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let (standard, format) = match version {
        VERSION_YPUB => (VERSION_XPUB, Bip32Format::Bip49),
        VERSION_ZPUB => (VERSION_XPUB, Bip32Format::Bip84),
        VERSION_UPUB => (VERSION_TPUB, Bip32Format::Bip49),
        VERSION_VPUB => (VERSION_TPUB, Bip32Format::Bip84),
        _ => return Err(Error::Key("unknown extended pubkey version".to_owned())),
    };
    let xpub =
        Xpub::decode(&swap_version(data, standard)).map_err(|e| Error::Key(e.to_string()))?;
    Ok((xpub, format))
}

/// Decodes an extended private key, accepting SLIP-132 version bytes.
pub(crate) fn parse_xprv(s: &str) -> Result<(Xpriv, Bip32Format), Error> {
    if let Ok(xprv) = Xpriv::from_str(s) {
        return Ok((xprv, Bip32Format::Unmarked));
    }
    let data = base58::decode_check(s).map_err(|e| Error::Key(e.to_string()))?;
    if data.len() != 78 {
        return Err(Error::Key("invalid extended key length".to_owned()));
    }
    let version = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let (standard, format) = match version {
        VERSION_YPRV => (VERSION_XPRV, Bip32Format::Bip49),
        VERSION_ZPRV => (VERSION_XPRV, Bip32Format::Bip84),
        VERSION_UPRV => (VERSION_TPRV, Bip32Format::Bip49),
        VERSION_VPRV => (VERSION_TPRV, Bip32Format::Bip84),
        _ => return Err(Error::Key("unknown extended privkey version".to_owned())),
    };
    let xprv =
        Xpriv::decode(&swap_version(data, standard)).map_err(|e| Error::Key(e.to_string()))?;
    Ok((xprv, format))
}

/// Re-encodes an extended public key, restoring SLIP-132 version bytes.
pub(crate) fn xpub_to_string(xpub: &Xpub, format: Bip32Format) -> String {
    if format == Bip32Format::Unmarked {
        return xpub.to_string();
    }
    let version = match (format, xpub.network) {
        (Bip32Format::Bip49, NetworkKind::Main) => VERSION_YPUB,
        (Bip32Format::Bip84, NetworkKind::Main) => VERSION_ZPUB,
        (Bip32Format::Bip49, NetworkKind::Test) => VERSION_UPUB,
        (Bip32Format::Bip84, NetworkKind::Test) => VERSION_VPUB,
        (Bip32Format::Unmarked, _) => unreachable!("handled above"),
    };
    base58::encode_check(&swap_version(xpub.encode().to_vec(), version))
}

/// Re-encodes an extended private key, restoring SLIP-132 version bytes.
pub(crate) fn xprv_to_string(xprv: &Xpriv, format: Bip32Format) -> String {
    if format == Bip32Format::Unmarked {
        return xprv.to_string();
    }
    let version = match (format, xprv.network) {
        (Bip32Format::Bip49, NetworkKind::Main) => VERSION_YPRV,
        (Bip32Format::Bip84, NetworkKind::Main) => VERSION_ZPRV,
        (Bip32Format::Bip49, NetworkKind::Test) => VERSION_UPRV,
        (Bip32Format::Bip84, NetworkKind::Test) => VERSION_VPRV,
        (Bip32Format::Unmarked, _) => unreachable!("handled above"),
    };
    base58::encode_check(&swap_version(xprv.encode().to_vec(), version))
}

/// Parses a derivation path that never carries an `m/` prefix, e.g. `44'/0`.
pub(crate) fn parse_path(path: &str) -> Result<DerivationPath, Error> {
    let mut numbers = Vec::new();
    for segment in path.split('/') {
        if segment.is_empty() {
            return Err(Error::Derivation("empty derivation path element".to_owned()));
        }
        numbers
            .push(ChildNumber::from_str(segment).map_err(|e| Error::Derivation(e.to_string()))?);
    }
    Ok(DerivationPath::from(numbers))
}

fn accumulate_tweak(
    acc: Option<SecretKey>,
    digest: &[u8],
) -> Result<Option<SecretKey>, Error> {
    let step = SecretKey::from_slice(&digest[..32])
        .map_err(|e| Error::Derivation(e.to_string()))?;
    let sum = match acc {
        None => step,
        Some(prev) => prev
            .add_tweak(&Scalar::from(step))
            .map_err(|e| Error::Derivation(e.to_string()))?,
    };
    Ok(Some(sum))
}

fn tweak_hex(acc: Option<SecretKey>) -> String {
    let bytes = match acc {
        Some(key) => key.secret_bytes(),
        None => [0u8; 32],
    };
    hex::encode(bytes)
}

/// Derives an extended public key along `path`, accumulating the scalar
/// tweak (the left half of each step's HMAC-SHA512) so that derivation can
/// be continued from the result.
pub(crate) fn derive_pub_tracked(
    xpub: &Xpub,
    path: &DerivationPath,
) -> Result<(Xpub, String), Error> {
    let secp = Secp256k1::verification_only();
    let mut key = *xpub;
    let mut acc: Option<SecretKey> = None;
    for child in path {
        let chain_code: &[u8] = key.chain_code.as_ref();
        let mut engine = HmacEngine::<sha512::Hash>::new(chain_code);
        engine.input(&key.public_key.serialize());
        engine.input(&u32::from(*child).to_be_bytes());
        let digest = Hmac::<sha512::Hash>::from_engine(engine).to_byte_array();
        acc = accumulate_tweak(acc, &digest)?;
        key = key
            .derive_pub(&secp, &[*child])
            .map_err(|e| Error::Derivation(e.to_string()))?;
    }
    Ok((key, tweak_hex(acc)))
}

/// Private-key counterpart of [`derive_pub_tracked`].
pub(crate) fn derive_priv_tracked(
    xprv: &Xpriv,
    path: &DerivationPath,
) -> Result<(Xpriv, String), Error> {
    let secp = Secp256k1::new();
    let mut key = *xprv;
    let mut acc: Option<SecretKey> = None;
    for child in path {
        let chain_code: &[u8] = key.chain_code.as_ref();
        let mut engine = HmacEngine::<sha512::Hash>::new(chain_code);
        if child.is_normal() {
            let pubkey =
                bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &key.private_key);
            engine.input(&pubkey.serialize());
        } else {
            engine.input(&[0u8]);
            engine.input(&key.private_key.secret_bytes());
        }
        engine.input(&u32::from(*child).to_be_bytes());
        let digest = Hmac::<sha512::Hash>::from_engine(engine).to_byte_array();
        acc = accumulate_tweak(acc, &digest)?;
        key = key
            .derive_priv(&secp, &[*child])
            .map_err(|e| Error::Derivation(e.to_string()))?;
    }
    Ok((key, tweak_hex(acc)))
}

/// Outcome of analyzing a key literal.
pub(crate) struct ParsedKey {
    pub kind: KeyKind,
    pub key_info: String,
    pub origin_info: String,
    pub base_extkey: String,
    pub tweak_sum: String,
    pub path_template: String,
    pub needs_arg: bool,
    pub is_uncompressed: bool,
}

/// Analyzes the literal text of a key expression.
///
/// Performs parse-time derivation of any fixed path suffix; the wildcard, if
/// present, is left for materialization. `in_taproot` switches on x-only key
/// recognition and rejects 33/65-byte public keys.
pub(crate) fn analyze_key_literal(value: &str, in_taproot: bool) -> Result<ParsedKey, Error> {
    if value.is_empty() || !value.is_ascii() {
        return Err(Error::Key("empty or non-ascii key literal".to_owned()));
    }
    let mut key_info = value;
    let mut origin_info = "";
    if value.starts_with('[') {
        if let Some(pos) = value.find(']') {
            origin_info = &value[..=pos];
            key_info = &value[pos + 1..];
        }
    }
    log::trace!("analyzing key expression: {}", key_info);

    let hdkey_top = if key_info.len() > 4 { &key_info[1..4] } else { "" };
    if hdkey_top == "pub" || hdkey_top == "prv" {
        let mut segments = key_info.split('/');
        let base = segments.next().expect("split yields at least one element");
        let suffix: Vec<&str> = segments.collect();

        let needs_arg = !suffix.is_empty() && key_info.contains('*');
        let mut hardened_wildcard = false;
        let mut fixed = Vec::new();
        let mut wildcard_at = None;
        for (index, segment) in suffix.iter().enumerate() {
            if *segment == "*" {
                wildcard_at = Some(index);
                break;
            }
            if *segment == "*'" || *segment == "*h" {
                hardened_wildcard = true;
                wildcard_at = Some(index);
                break;
            }
            fixed.push(*segment);
        }
        if let Some(index) = wildcard_at {
            if index + 1 < suffix.len() {
                log::warn!("wildcard not at the tail of the path: {}", key_info);
                return Err(Error::Derivation(
                    "a wildcard may only be the last path element".to_owned(),
                ));
            }
        }
        let path = if fixed.is_empty() {
            DerivationPath::master()
        } else {
            parse_path(&fixed.join("/"))?
        };
        let path_template = suffix.join("/");

        if hdkey_top == "prv" {
            let (xprv, format) = parse_xprv(base)?;
            let (derived, tweak_sum) = derive_priv_tracked(&xprv, &path)?;
            Ok(ParsedKey {
                kind: KeyKind::Bip32Priv,
                key_info: xprv_to_string(&derived, format),
                origin_info: origin_info.to_owned(),
                base_extkey: base.to_owned(),
                tweak_sum,
                path_template,
                needs_arg,
                is_uncompressed: false,
            })
        } else {
            if hardened_wildcard {
                return Err(Error::Derivation(
                    "hardened derivation requires an extended private key".to_owned(),
                ));
            }
            let (xpub, format) = parse_xpub(base)?;
            let (derived, tweak_sum) = derive_pub_tracked(&xpub, &path)?;
            Ok(ParsedKey {
                kind: KeyKind::Bip32,
                key_info: xpub_to_string(&derived, format),
                origin_info: origin_info.to_owned(),
                base_extkey: base.to_owned(),
                tweak_sum,
                path_template,
                needs_arg,
                is_uncompressed: false,
            })
        }
    } else {
        let single = |kind, key_info: String, is_uncompressed| ParsedKey {
            kind,
            key_info,
            origin_info: origin_info.to_owned(),
            base_extkey: String::new(),
            tweak_sum: String::new(),
            path_template: String::new(),
            needs_arg: false,
            is_uncompressed,
        };
        match hex::decode(key_info) {
            Ok(bytes) if bytes.len() == 33 || bytes.len() == 65 => {
                if in_taproot {
                    return Err(Error::Taproot("taproot keys must be x-only".to_owned()));
                }
                let pubkey =
                    PublicKey::from_slice(&bytes).map_err(|e| Error::Key(e.to_string()))?;
                Ok(single(KeyKind::Single, pubkey.to_string(), !pubkey.compressed))
            }
            Ok(bytes) if in_taproot && bytes.len() == 32 => {
                let xonly =
                    XOnlyPublicKey::from_slice(&bytes).map_err(|e| Error::Key(e.to_string()))?;
                Ok(single(KeyKind::Schnorr, xonly.to_string(), false))
            }
            _ => {
                // Not hex of a usable length; the remaining possibility is a
                // WIF private key (mainnet or testnet encodings both pass).
                let privkey = PrivateKey::from_wif(key_info)
                    .map_err(|_| Error::Key(format!("unparseable key literal '{}'", key_info)))?;
                let secp = Secp256k1::new();
                let pubkey = privkey.public_key(&secp);
                Ok(single(KeyKind::Single, pubkey.to_string(), !privkey.compressed))
            }
        }
    }
}

/// Parses an origin prefix of the form `[fingerprint/derivation-path]`.
pub(crate) fn parse_origin(
    origin_info: &str,
) -> Result<Option<(Fingerprint, DerivationPath)>, Error> {
    if origin_info.is_empty() {
        return Ok(None);
    }
    let inner = origin_info
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| Error::Key("malformed key origin".to_owned()))?;
    let (fingerprint, path) = match inner.split_once('/') {
        Some((fpr, path)) => (fpr, Some(path)),
        None => (inner, None),
    };
    let fingerprint =
        Fingerprint::from_str(fingerprint).map_err(|e| Error::Key(e.to_string()))?;
    let path = match path {
        Some(p) if !p.is_empty() => parse_path(p)?,
        _ => DerivationPath::master(),
    };
    Ok(Some((fingerprint, path)))
}

/// A resolved key together with its preserved origin information.
///
/// Produced during materialization; collected by the key-data walks of the
/// public facade.
#[derive(Debug, Clone)]
pub struct KeyData {
    origin: Option<(Fingerprint, DerivationPath)>,
    pubkey: PublicKey,
    x_only: Option<XOnlyPublicKey>,
    xpub: Option<Xpub>,
    xprv: Option<Xpriv>,
    key_string: String,
}

impl KeyData {
    pub(crate) fn new(
        origin: Option<(Fingerprint, DerivationPath)>,
        pubkey: PublicKey,
        x_only: Option<XOnlyPublicKey>,
        xpub: Option<Xpub>,
        xprv: Option<Xpriv>,
        key_string: String,
    ) -> Self {
        KeyData { origin, pubkey, x_only, xpub, xprv, key_string }
    }

    /// The key's origin: master fingerprint and full derivation path.
    pub fn origin(&self) -> Option<&(Fingerprint, DerivationPath)> {
        self.origin.as_ref()
    }

    /// The resolved public key.
    pub fn pubkey(&self) -> PublicKey {
        self.pubkey
    }

    /// The x-only form, when the key came from a taproot context.
    pub fn x_only_pubkey(&self) -> Option<XOnlyPublicKey> {
        self.x_only
    }

    /// The derived extended public key, for BIP32 expressions.
    pub fn ext_pubkey(&self) -> Option<&Xpub> {
        self.xpub.as_ref()
    }

    /// The derived extended private key, for `xprv` expressions.
    pub fn ext_privkey(&self) -> Option<&Xpriv> {
        self.xprv.as_ref()
    }
}

impl fmt::Display for KeyData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some((fingerprint, path)) = &self.origin {
            write!(f, "[{}", fingerprint)?;
            for child in path {
                write!(f, "/{}", child)?;
            }
            write!(f, "]")?;
        }
        f.write_str(&self.key_string)
    }
}

/// Key information used to assemble a descriptor string.
///
/// The building-block counterpart of parsing: `create_descriptor` renders a
/// list of these into the key section of the generated expression.
#[derive(Debug, Clone)]
pub struct DescriptorKeyInfo {
    key_type: KeyKind,
    parent_info: String,
    body: String,
}

impl DescriptorKeyInfo {
    /// Builds key information from a key literal, validating it.
    pub fn from_string(key: &str, parent_key_information: &str) -> Result<Self, Error> {
        let parsed = analyze_key_literal(key, false)?;
        Ok(DescriptorKeyInfo {
            key_type: parsed.kind,
            parent_info: parent_key_information.to_owned(),
            body: key.to_owned(),
        })
    }

    /// Builds key information from a public key.
    pub fn from_pubkey(pubkey: PublicKey, parent_key_information: &str) -> Self {
        DescriptorKeyInfo {
            key_type: KeyKind::Single,
            parent_info: parent_key_information.to_owned(),
            body: pubkey.to_string(),
        }
    }

    /// Builds key information from an x-only public key.
    pub fn from_x_only(pubkey: XOnlyPublicKey, parent_key_information: &str) -> Self {
        DescriptorKeyInfo {
            key_type: KeyKind::Schnorr,
            parent_info: parent_key_information.to_owned(),
            body: pubkey.to_string(),
        }
    }

    /// Builds key information from a private key, rendered as WIF.
    pub fn from_privkey(privkey: PrivateKey, parent_key_information: &str) -> Self {
        DescriptorKeyInfo {
            key_type: KeyKind::Single,
            parent_info: parent_key_information.to_owned(),
            body: privkey.to_wif(),
        }
    }

    /// Builds key information from an extended public key and a child path.
    pub fn from_xpub(xpub: &Xpub, parent_key_information: &str, path: &str) -> Self {
        DescriptorKeyInfo {
            key_type: KeyKind::Bip32,
            parent_info: parent_key_information.to_owned(),
            body: format!("{}{}", xpub, normalize_child_path(path)),
        }
    }

    /// Builds key information from an extended private key and a child path.
    pub fn from_xprv(xprv: &Xpriv, parent_key_information: &str, path: &str) -> Self {
        DescriptorKeyInfo {
            key_type: KeyKind::Bip32Priv,
            parent_info: parent_key_information.to_owned(),
            body: format!("{}{}", xprv, normalize_child_path(path)),
        }
    }

    /// Renders an origin prefix `[fingerprint/child-path]` for a key with
    /// the given master fingerprint.
    pub fn origin_information(fingerprint: Fingerprint, child_path: &str) -> String {
        let trimmed = child_path
            .strip_prefix('m')
            .or_else(|| child_path.strip_prefix('M'))
            .unwrap_or(child_path);
        if trimmed.is_empty() {
            format!("[{}]", fingerprint)
        } else {
            format!("[{}{}]", fingerprint, normalize_child_path(trimmed))
        }
    }

    /// The kind of key this information wraps.
    pub fn key_type(&self) -> KeyKind {
        self.key_type
    }
}

fn normalize_child_path(path: &str) -> String {
    if path.is_empty() || path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{}", path)
    }
}

impl fmt::Display for DescriptorKeyInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.parent_info, self.body)
    }
}
