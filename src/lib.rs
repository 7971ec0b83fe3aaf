// SPDX-License-Identifier: CC0-1.0

//! # Output Descriptors
//!
//! Parsing, validation and materialization of Bitcoin Output Descriptors:
//! a textual language describing the spending conditions of transaction
//! outputs, defined in BIP-380 through BIP-386.
//!
//! A descriptor is parsed into a [`Descriptor`], which owns an immutable
//! [`DescriptorNode`] tree. Materializing the tree with a list of wildcard
//! arguments yields [`ScriptReference`]s carrying the locking script, the
//! resolved keys and enough information to render addresses for any network.
//!
//! ```rust
//! use descriptor_core::Descriptor;
//! use bitcoin::Network;
//!
//! let desc = Descriptor::parse(
//!     "wpkh(0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798)",
//!     Network::Bitcoin,
//! ).unwrap();
//! let spk = desc.locking_script().unwrap();
//! assert!(spk.is_p2wpkh());
//! ```
//!
//! Miniscript expressions nested inside `wsh`/`sh`/`tr` are delegated to a
//! [`MiniscriptParser`], whose default implementation drives the
//! [`miniscript`] crate. The hook can be replaced, e.g. with a stub in unit
//! tests, through [`Descriptor::parse_with`].

use std::{error, fmt};

pub mod checksum;
pub mod compile;
mod descriptor;
pub mod key;
mod node;
mod reference;
mod taptree;

pub use crate::compile::{DefaultMiniscriptParser, MiniscriptContext, MiniscriptParser};
pub use crate::descriptor::Descriptor;
pub use crate::key::{Bip32Format, DescriptorKeyInfo, KeyData, KeyKind};
pub use crate::node::{DescriptorNode, NodeKind, ScriptForm};
pub use crate::reference::{AddressClass, KeyReference, ScriptReference, TaprootReference};

/// Sentinel materialization argument selecting the un-derived base extended
/// key instead of a dynamically derived child.
pub const BASE_EXTKEY_ARGUMENT: &str = "base";

/// Descriptor engine error.
///
/// Every failure mode surfaces through this single type; the variants follow
/// the rejection taxonomy of the descriptor language (checksum, structure,
/// keys, derivation, sizes, witness hygiene, taproot, key formats, arguments,
/// addresses, miniscript).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed checksum: wrong length, repeated `#`, or a character
    /// outside the descriptor character set.
    BadChecksum(String),
    /// The computed checksum does not match the one attached to the
    /// descriptor.
    ChecksumMismatch {
        /// Checksum computed over the descriptor body.
        expected: String,
        /// Checksum found after the `#` separator.
        found: String,
    },
    /// Structural rule violation: a top-level-only form nested, wrong child
    /// count or child kind, unknown script form.
    Structure(String),
    /// Unparseable key literal.
    Key(String),
    /// BIP32 derivation failure, including misplaced wildcards and hardened
    /// derivation from an extended public key.
    Derivation(String),
    /// A script size limit was exceeded.
    ScriptSize(String),
    /// An uncompressed public key appeared in a witness or taproot context.
    UncompressedKey(String),
    /// Taproot-specific restriction violated.
    Taproot(String),
    /// A SLIP-132 extended key was used with an incompatible script form.
    Bip32Format(String),
    /// Missing or malformed materialization argument.
    Argument(String),
    /// Address parse failure or network mismatch.
    Address(String),
    /// Miniscript delegation failed.
    Miniscript(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::BadChecksum(ref s) => write!(f, "invalid checksum: {}", s),
            Error::ChecksumMismatch { ref expected, ref found } => write!(
                f,
                "provided checksum '{}' does not match computed checksum '{}'",
                found, expected
            ),
            Error::Structure(ref s) => write!(f, "invalid descriptor structure: {}", s),
            Error::Key(ref s) => write!(f, "invalid key: {}", s),
            Error::Derivation(ref s) => write!(f, "derivation error: {}", s),
            Error::ScriptSize(ref s) => write!(f, "script size limit exceeded: {}", s),
            Error::UncompressedKey(ref s) => write!(f, "uncompressed public key: {}", s),
            Error::Taproot(ref s) => write!(f, "taproot error: {}", s),
            Error::Bip32Format(ref s) => write!(f, "bip32 format error: {}", s),
            Error::Argument(ref s) => write!(f, "argument error: {}", s),
            Error::Address(ref s) => write!(f, "address error: {}", s),
            Error::Miniscript(ref s) => write!(f, "miniscript error: {}", s),
        }
    }
}

impl error::Error for Error {}
