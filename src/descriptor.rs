// SPDX-License-Identifier: CC0-1.0

//! Public descriptor interface
//!
//! [`Descriptor`] wraps an analyzed [`DescriptorNode`] tree together with
//! the miniscript hook it was parsed with, and offers the stable operations:
//! parse, assemble, stringify, derive locking scripts, enumerate keys and
//! produce references.

use std::fmt;
use std::sync::Arc;

use bitcoin::{Network, ScriptBuf};

use crate::compile::{DefaultMiniscriptParser, MiniscriptParser};
use crate::key::{DescriptorKeyInfo, KeyData};
use crate::node::{DescriptorNode, ScriptForm};
use crate::reference::ScriptReference;
use crate::Error;

/// A parsed output descriptor.
///
/// Immutable once constructed; materialization never mutates the tree, so a
/// descriptor can be shared freely across threads and materialized
/// concurrently with independent argument lists.
#[derive(Clone)]
pub struct Descriptor {
    root: DescriptorNode,
    miniscript: Arc<dyn MiniscriptParser>,
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Descriptor").field(&self.root.to_string(false)).finish()
    }
}

impl fmt::Display for Descriptor {
    /// Writes the canonical descriptor text with its checksum; the
    /// alternate flag (`{:#}`) omits the checksum.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.root.to_string(!f.alternate()))
    }
}

impl Descriptor {
    /// Parses and fully validates a descriptor.
    pub fn parse(descriptor: &str, network: Network) -> Result<Descriptor, Error> {
        Descriptor::parse_with(descriptor, network, Arc::new(DefaultMiniscriptParser))
    }

    /// Parses a descriptor with a caller-supplied miniscript hook.
    pub fn parse_with(
        descriptor: &str,
        network: Network,
        miniscript: Arc<dyn MiniscriptParser>,
    ) -> Result<Descriptor, Error> {
        let root = DescriptorNode::parse(descriptor, network, miniscript.as_ref())?;
        Ok(Descriptor { root, miniscript })
    }

    /// Assembles a descriptor from script forms and key information.
    ///
    /// Forms wrap from the outermost to the innermost, so
    /// `[Sh, Wsh, Multi]` produces `sh(wsh(multi(k,...)))`. The assembled
    /// text is re-parsed, so the result is fully validated.
    pub fn create_descriptor(
        forms: &[ScriptForm],
        keys: &[DescriptorKeyInfo],
        require_num: u32,
        network: Network,
    ) -> Result<Descriptor, Error> {
        if forms.is_empty() {
            return Err(Error::Structure("script form list is empty".to_owned()));
        }
        let mut output = String::new();
        for form in forms.iter().rev() {
            let key_text = if output.is_empty() {
                keys.iter().map(DescriptorKeyInfo::to_string).collect::<Vec<_>>().join(",")
            } else {
                String::new()
            };
            match form {
                ScriptForm::Pk
                | ScriptForm::Pkh
                | ScriptForm::Wpkh
                | ScriptForm::Combo
                | ScriptForm::Multi
                | ScriptForm::SortedMulti => {
                    if !output.is_empty() {
                        return Err(Error::Structure(
                            "key forms are innermost only".to_owned(),
                        ));
                    }
                    if key_text.is_empty() {
                        return Err(Error::Structure("key list is empty".to_owned()));
                    }
                    if !form.is_multisig() && keys.len() > 1 {
                        return Err(Error::Structure(
                            "multiple keys are only valid for multisig".to_owned(),
                        ));
                    }
                }
                ScriptForm::Sh | ScriptForm::Wsh => {
                    if output.is_empty() {
                        return Err(Error::Structure(
                            "script-hash forms wrap a script expression".to_owned(),
                        ));
                    }
                }
                ScriptForm::Tr
                | ScriptForm::Addr
                | ScriptForm::Raw
                | ScriptForm::Miniscript => {
                    return Err(Error::Structure(format!(
                        "'{}' is not supported for descriptor assembly",
                        form.name()
                    )));
                }
            }
            output = if key_text.is_empty() {
                format!("{}({})", form.name(), output)
            } else if form.is_multisig() {
                format!("{}({},{})", form.name(), require_num, key_text)
            } else {
                format!("{}({})", form.name(), key_text)
            };
        }
        Descriptor::parse(&output, network)
    }

    /// Whether the root form is `combo`.
    pub fn is_combo_script(&self) -> bool {
        self.root.script_form() == Some(ScriptForm::Combo)
    }

    /// Number of arguments a materialization call must supply.
    pub fn need_argument_num(&self) -> u32 {
        self.root.need_argument_num()
    }

    /// The locking script of a descriptor without wildcards.
    pub fn locking_script(&self) -> Result<ScriptBuf, Error> {
        if self.need_argument_num() != 0 {
            return Err(Error::Argument(
                "descriptor requires derivation arguments".to_owned(),
            ));
        }
        self.locking_script_from(&[])
    }

    /// The locking script, replicating one argument for every wildcard.
    pub fn locking_script_with(&self, argument: &str) -> Result<ScriptBuf, Error> {
        let args = vec![argument.to_owned(); self.need_argument_num() as usize];
        self.locking_script_from(&args)
    }

    /// The locking script for an explicit argument list.
    pub fn locking_script_from(&self, args: &[String]) -> Result<ScriptBuf, Error> {
        let mut scripts = self.locking_scripts(args)?;
        if scripts.is_empty() {
            return Err(Error::Structure("descriptor produced no scripts".to_owned()));
        }
        Ok(scripts.swap_remove(0))
    }

    /// All locking scripts; ordinarily one, up to four for `combo`.
    pub fn locking_scripts(&self, args: &[String]) -> Result<Vec<ScriptBuf>, Error> {
        Ok(self
            .references(args)?
            .iter()
            .map(|r| r.locking_script().clone())
            .collect())
    }

    /// Materializes the descriptor into its first reference.
    pub fn reference(&self, args: &[String]) -> Result<ScriptReference, Error> {
        let mut references = self.references(args)?;
        if references.is_empty() {
            return Err(Error::Structure("descriptor produced no references".to_owned()));
        }
        Ok(references.swap_remove(0))
    }

    /// Materializes the descriptor into its full reference list.
    pub fn references(&self, args: &[String]) -> Result<Vec<ScriptReference>, Error> {
        let mut list = args.to_vec();
        self.root.references(&mut list, None, self.miniscript.as_ref())
    }

    /// Key data of a descriptor without wildcards, if any key is present.
    pub fn key_data(&self) -> Result<Option<KeyData>, Error> {
        if self.need_argument_num() != 0 {
            return Err(Error::Argument(
                "descriptor requires derivation arguments".to_owned(),
            ));
        }
        Ok(self.key_data_all(&[])?.into_iter().next())
    }

    /// Key data, replicating one argument for every wildcard.
    pub fn key_data_with(&self, argument: &str) -> Result<Option<KeyData>, Error> {
        let args = vec![argument.to_owned(); self.need_argument_num() as usize];
        Ok(self.key_data_all(&args)?.into_iter().next())
    }

    /// Key data for an explicit argument list.
    pub fn key_data_from(&self, args: &[String]) -> Result<Option<KeyData>, Error> {
        Ok(self.key_data_all(args)?.into_iter().next())
    }

    /// Every valid [`KeyData`] reachable from the reference tree.
    pub fn key_data_all(&self, args: &[String]) -> Result<Vec<KeyData>, Error> {
        let references = self.references(args)?;
        let mut result = Vec::new();
        for reference in &references {
            let mut current = Some(reference);
            while let Some(node) = current {
                for key in node.key_list() {
                    if let Some(key_data) = key.key_data() {
                        result.push(key_data.clone());
                    }
                }
                current = node.child();
            }
        }
        Ok(result)
    }

    /// The canonical descriptor text, optionally with its checksum.
    pub fn to_canonical_string(&self, append_checksum: bool) -> String {
        self.root.to_string(append_checksum)
    }

    /// The root of the parsed tree.
    pub fn node(&self) -> &DescriptorNode {
        &self.root
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Descriptor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Descriptor {
    /// Deserializes from the canonical string form; the descriptor is
    /// parsed for mainnet.
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;
        let text = String::deserialize(deserializer)?;
        Descriptor::parse(&text, Network::Bitcoin).map_err(D::Error::custom)
    }
}
