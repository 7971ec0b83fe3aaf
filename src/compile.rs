// SPDX-License-Identifier: CC0-1.0

//! Miniscript delegation
//!
//! Script expressions whose name is not one of the descriptor forms are
//! handed to a miniscript compiler when they appear inside `wsh`, `sh` or
//! `tr`. The engine only needs a single entry point (parse an expression at
//! a child index in a given script context, return the compiled bytecode),
//! which is modeled as the [`MiniscriptParser`] trait so the
//! compiler can be swapped out (e.g. stubbed in unit tests).
//!
//! [`DefaultMiniscriptParser`] drives the [`miniscript`] crate.

use std::str::FromStr;

use miniscript::descriptor::ConversionError;
use miniscript::{
    DescriptorPublicKey, Miniscript, MiniscriptKey, Segwitv0, Tap, ToPublicKey, TranslatePk,
    Translator,
};

use crate::Error;

/// Script context a miniscript expression is compiled for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MiniscriptContext {
    /// Compiling a witness script (also used for legacy `sh` bodies).
    WitnessScript,
    /// Compiling a tapscript leaf.
    Tapscript,
}

/// The single entry point through which miniscript expressions are parsed
/// and compiled.
///
/// Structural analysis invokes this with `child_index = 0` as a validity
/// probe; materialization passes the caller's actual index.
pub trait MiniscriptParser: Send + Sync {
    /// Parses `expr` and compiles it to script bytes, deriving any wildcard
    /// keys at `child_index`.
    fn parse_miniscript(
        &self,
        expr: &str,
        child_index: u32,
        ctx: MiniscriptContext,
    ) -> Result<Vec<u8>, Error>;
}

/// Miniscript compiler backed by the [`miniscript`] crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMiniscriptParser;

impl MiniscriptParser for DefaultMiniscriptParser {
    fn parse_miniscript(
        &self,
        expr: &str,
        child_index: u32,
        ctx: MiniscriptContext,
    ) -> Result<Vec<u8>, Error> {
        match ctx {
            MiniscriptContext::WitnessScript => compile::<Segwitv0>(expr, child_index),
            MiniscriptContext::Tapscript => compile::<Tap>(expr, child_index),
        }
    }
}

/// Translates every key to its concrete public key at one derivation index.
struct Derivator(u32);

impl Translator<DescriptorPublicKey, bitcoin::PublicKey, ConversionError> for Derivator {
    fn pk(&mut self, pk: &DescriptorPublicKey) -> Result<bitcoin::PublicKey, ConversionError> {
        pk.clone()
            .at_derivation_index(self.0)
            .map(|key| key.to_public_key())
    }

    fn sha256(
        &mut self,
        hash: &<DescriptorPublicKey as MiniscriptKey>::Sha256,
    ) -> Result<<bitcoin::PublicKey as MiniscriptKey>::Sha256, ConversionError> {
        Ok(*hash)
    }

    fn hash256(
        &mut self,
        hash: &<DescriptorPublicKey as MiniscriptKey>::Hash256,
    ) -> Result<<bitcoin::PublicKey as MiniscriptKey>::Hash256, ConversionError> {
        Ok(*hash)
    }

    fn ripemd160(
        &mut self,
        hash: &<DescriptorPublicKey as MiniscriptKey>::Ripemd160,
    ) -> Result<<bitcoin::PublicKey as MiniscriptKey>::Ripemd160, ConversionError> {
        Ok(*hash)
    }

    fn hash160(
        &mut self,
        hash: &<DescriptorPublicKey as MiniscriptKey>::Hash160,
    ) -> Result<<bitcoin::PublicKey as MiniscriptKey>::Hash160, ConversionError> {
        Ok(*hash)
    }
}

fn compile<Ctx: miniscript::ScriptContext>(expr: &str, child_index: u32) -> Result<Vec<u8>, Error> {
    let ms = Miniscript::<DescriptorPublicKey, Ctx>::from_str(expr)
        .map_err(|e| Error::Miniscript(e.to_string()))?;
    let concrete = ms
        .translate_pk(&mut Derivator(child_index))
        .map_err(|e| e.expect_translator_err("concrete keys cannot fail context checks"))
        .map_err(|e| Error::Miniscript(e.to_string()))?;
    Ok(concrete.encode().into_bytes())
}
