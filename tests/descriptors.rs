// SPDX-License-Identifier: CC0-1.0

//! Descriptor engine integration tests
//!
//! End-to-end coverage over the public interface: parsing, rejection of
//! malformed descriptors, materialization with wildcard arguments, address
//! generation and key enumeration.

use bitcoin::Network;
use descriptor_core::{AddressClass, Descriptor, Error, KeyKind, NodeKind, ScriptForm};

/// The secp256k1 generator point, compressed.
const PK_G: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
/// The generator point, uncompressed.
const PK_G_UNCOMPRESSED: &str = "0479be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8";
const PK_2G: &str = "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";
const PK_3G: &str = "02f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9";

const TPUB: &str = "tpubD6NzVbkrYhZ4XHndKkuB8FifXm8r5FQHwrN6oZuWCz13qb93rtgKvD4PQsqC4HP4yhV3tA2fqr2RbY5mNXfM7RxXUoeABoDtsFUq2zJq6YK";
const XPUB_A: &str = "xpub6ERApfZwUNrhLCkDtcHTcxd75RbzS1ed54G1LkBUHQVHQKqhMkhgbmJbZRkrgZw4koxb5JaHWkY4ALHY2grBGRjaDMzQLcgJvLJuZZvRcEL";
const XPUB_B: &str = "xpub68NZiKmJWnxxS6aaHmn81bvJeTESw724CRDs6HbuccFQN9Ku14VQrADWgqbhhTHBaohPX4CjNLf9fq9MYo6oDaPPLPxSb7gwQN3ih19Zm4Y";

fn mainnet(descriptor: &str) -> Result<Descriptor, Error> {
    Descriptor::parse(descriptor, Network::Bitcoin)
}

fn x_only(compressed: &str) -> &str {
    &compressed[2..]
}

#[test]
fn pkh_descriptor() {
    let desc = mainnet(&format!("pkh({})", PK_2G)).unwrap();
    assert_eq!(desc.need_argument_num(), 0);
    assert!(!desc.is_combo_script());
    let script = desc.locking_script().unwrap();
    assert!(script.is_p2pkh());
    assert_eq!(script.len(), 25);
    let bytes = script.as_bytes();
    assert_eq!(&bytes[..3], &[0x76, 0xa9, 0x14]);
    assert_eq!(&bytes[23..], &[0x88, 0xac]);
    let reference = desc.reference(&[]).unwrap();
    assert_eq!(reference.address_class().unwrap(), AddressClass::P2pkh);
    assert_eq!(reference.key_list().len(), 1);
}

#[test]
fn generator_point_vectors() {
    // BIP-173 example key: HASH160 = 751e76e8199196d454941c45d1b3a323f1433bd6
    let desc = mainnet(&format!("wpkh({})", PK_G)).unwrap();
    let script = desc.locking_script().unwrap();
    assert_eq!(
        script.as_bytes(),
        hex::decode("0014751e76e8199196d454941c45d1b3a323f1433bd6")
            .unwrap()
            .as_slice()
    );
    let address = desc
        .reference(&[])
        .unwrap()
        .generate_address(Network::Bitcoin)
        .unwrap();
    assert_eq!(address.to_string(), "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4");

    let desc = mainnet(&format!("pkh({})", PK_G)).unwrap();
    let address = desc
        .reference(&[])
        .unwrap()
        .generate_address(Network::Bitcoin)
        .unwrap();
    assert_eq!(address.to_string(), "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH");

    // P2PK is the raw push of the key
    let desc = mainnet(&format!("pk({})", PK_G)).unwrap();
    let script = desc.locking_script().unwrap();
    assert_eq!(
        script.as_bytes(),
        hex::decode(format!("21{}ac", PK_G)).unwrap().as_slice()
    );
}

#[test]
fn wsh_of_pk_vector() {
    // BIP-173 P2WSH example: SHA256 of `<key> OP_CHECKSIG`
    let desc = mainnet(&format!("wsh(pk({}))", PK_G)).unwrap();
    let script = desc.locking_script().unwrap();
    assert!(script.is_p2wsh());
    assert_eq!(
        script.as_bytes(),
        hex::decode("00201863143c14c5166804bd19203356da136c985678cd4d27a1b8c6329604903262")
            .unwrap()
            .as_slice()
    );
    let address = desc
        .reference(&[])
        .unwrap()
        .generate_address(Network::Bitcoin)
        .unwrap();
    assert_eq!(
        address.to_string(),
        "bc1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3qccfmv2"
    );
}

#[test]
fn sh_multi_descriptor() {
    let desc = mainnet(&format!("sh(multi(2,{},{},{}))", PK_G, PK_2G, PK_3G)).unwrap();
    let reference = desc.reference(&[]).unwrap();
    assert!(reference.locking_script().is_p2sh());
    assert_eq!(reference.address_class().unwrap(), AddressClass::P2sh);
    assert!(reference.has_child());
    let child = reference.child().unwrap();
    assert_eq!(child.req_num(), Some(2));
    assert_eq!(child.key_num(), 3);
    // three key data entries, collected through the wrap
    assert_eq!(desc.key_data_all(&[]).unwrap().len(), 3);
    // bare multisig yields one P2PKH address per key
    let addresses = child.generate_addresses(Network::Bitcoin).unwrap();
    assert_eq!(addresses.len(), 3);
}

#[test]
fn sh_wsh_multi_nesting() {
    // the xprv/xpub below encode the same node, so mixing them is legal
    const XPRV_B: &str = "xprv9uPDJpEQgRQfDcW7BkF7eTya6RPxXeJCqCJGHuCJ4GiRVLzkTXBAJMu2qaMWPrS7AANYqdq6vcBcBUdJCVVFceUvJFjaPdGZ2y9WACViL4L";
    let desc = mainnet(&format!("sh(wsh(multi(1,{}/0,{}/1)))", XPRV_B, XPUB_B)).unwrap();
    let reference = desc.reference(&[]).unwrap();
    assert!(reference.locking_script().is_p2sh());
    assert_eq!(reference.address_class().unwrap(), AddressClass::ShWsh);
    let wsh = reference.child().unwrap();
    assert!(wsh.locking_script().is_p2wsh());
    let multi = wsh.child().unwrap();
    assert_eq!(multi.req_num(), Some(1));
    assert_eq!(multi.key_num(), 2);
    // the xprv side resolves both the private and public extended key
    let key = &multi.key_list()[0];
    assert!(key.ext_privkey().is_some());
    assert!(key.ext_pubkey().is_some());
    assert_eq!(desc.key_data_all(&[]).unwrap().len(), 2);
}

#[test]
fn checksummed_multisig_fixture_round_trips() {
    // parse, regenerate and verify the canonical checksum of a fixture with
    // origin information and parse-time derivation
    let body = "sh(multi(2,[00000000/111'/222]xprvA1RpRA33e1JQ7ifknakTFpgNXPmW2YvmhqLQYMmrj4xJXXWYpDPS3xz7iAxn8L39njGVyuoseXzU6rcxFLJ8HFsTjSyQbLYnMpCqE2VbFWc,xprv9uPDJpEQgRQfDcW7BkF7eTya6RPxXeJCqCJGHuCJ4GiRVLzkTXBAJMu2qaMWPrS7AANYqdq6vcBcBUdJCVVFceUvJFjaPdGZ2y9WACViL4L/0))";
    let desc = mainnet(body).unwrap();
    assert_eq!(desc.to_canonical_string(false), body);
    assert_eq!(desc.to_canonical_string(true), format!("{}#ggrsrxfy", body));
    // and the checksummed form parses again
    let desc2 = mainnet(&format!("{}#ggrsrxfy", body)).unwrap();
    assert_eq!(desc2.to_canonical_string(true), desc.to_canonical_string(true));
}

#[test]
fn checksum_mismatch_is_fatal() {
    let body = format!("pkh({})", PK_G);
    assert!(matches!(
        mainnet(&format!("{}#00000000", body)),
        Err(Error::ChecksumMismatch { .. })
    ));
}

#[test]
fn wildcard_derivation() {
    let desc = Descriptor::parse(&format!("wpkh({}/1/*)", TPUB), Network::Testnet).unwrap();
    assert_eq!(desc.need_argument_num(), 1);

    // an explicit child index equals the fixed path
    let derived = desc.locking_script_with("5").unwrap();
    let fixed = Descriptor::parse(&format!("wpkh({}/1/5)", TPUB), Network::Testnet)
        .unwrap()
        .locking_script()
        .unwrap();
    assert_eq!(derived, fixed);

    // missing argument
    assert!(matches!(desc.locking_script(), Err(Error::Argument(_))));
    assert!(matches!(
        desc.locking_script_from(&[]),
        Err(Error::Argument(_))
    ));

    // a multi-segment argument derives the remaining path
    let deep = desc.locking_script_with("5/6").unwrap();
    let fixed = Descriptor::parse(&format!("wpkh({}/1/5/6)", TPUB), Network::Testnet)
        .unwrap()
        .locking_script()
        .unwrap();
    assert_eq!(deep, fixed);
}

#[test]
fn base_extkey_sentinel() {
    let desc = Descriptor::parse(&format!("wpkh({}/1/*)", TPUB), Network::Testnet).unwrap();
    let base = desc.locking_script_with("base").unwrap();
    let underived = Descriptor::parse(&format!("wpkh({})", TPUB), Network::Testnet)
        .unwrap()
        .locking_script()
        .unwrap();
    assert_eq!(base, underived);
}

#[test]
fn origin_information_flows_into_key_data() {
    let desc = Descriptor::parse(
        &format!("wpkh([d34db33f/44'/0'/0']{}/1/*)", TPUB),
        Network::Testnet,
    )
    .unwrap();
    let key_data = desc.key_data_with("5").unwrap().unwrap();
    let (fingerprint, path) = key_data.origin().unwrap();
    assert_eq!(fingerprint.to_string(), "d34db33f");
    let children: &[bitcoin::bip32::ChildNumber] = path.as_ref();
    assert_eq!(children.len(), 5);
    assert_eq!(children[0], bitcoin::bip32::ChildNumber::from_hardened_idx(44).unwrap());
    assert_eq!(children[3], bitcoin::bip32::ChildNumber::from_normal_idx(1).unwrap());
    assert_eq!(children[4], bitcoin::bip32::ChildNumber::from_normal_idx(5).unwrap());
    assert!(key_data.ext_pubkey().is_some());
    let rendered = key_data.to_string();
    assert!(rendered.starts_with("[d34db33f/"));
    assert!(rendered.contains("]tpub"));
}

#[test]
fn two_wildcards_consume_left_to_right() {
    let desc = mainnet(&format!("wsh(multi(1,{}/0/*,{}/1/*))", XPUB_A, XPUB_B)).unwrap();
    assert_eq!(desc.need_argument_num(), 2);
    let scripts =
        desc.locking_scripts(&["2".to_owned(), "3".to_owned()]).unwrap();
    assert_eq!(scripts.len(), 1);
    let fixed = mainnet(&format!("wsh(multi(1,{}/0/2,{}/1/3))", XPUB_A, XPUB_B))
        .unwrap()
        .locking_script()
        .unwrap();
    assert_eq!(scripts[0], fixed);
    // one argument short
    assert!(matches!(
        desc.locking_scripts(&["2".to_owned()]),
        Err(Error::Argument(_))
    ));
}

#[test]
fn taproot_key_path() {
    let desc = mainnet(&format!("tr({})", x_only(PK_G))).unwrap();
    let script = desc.locking_script().unwrap();
    assert!(script.is_p2tr());
    assert_eq!(script.len(), 34);
    // OP_PUSHNUM_1 <32-byte tweaked key>
    assert_eq!(script.as_bytes()[0], 0x51);
    assert_eq!(script.as_bytes()[1], 0x20);

    let reference = desc.reference(&[]).unwrap();
    assert_eq!(reference.address_class().unwrap(), AddressClass::P2tr);
    let taproot = reference.taproot().unwrap();
    assert_eq!(taproot.internal_key().to_string(), x_only(PK_G));
    assert!(!taproot.has_script_tree());
    assert_eq!(
        &script.as_bytes()[2..],
        taproot.output_key().serialize().as_slice()
    );
    // the address commits to the same output key
    let address = reference.generate_address(Network::Bitcoin).unwrap();
    assert_eq!(address.script_pubkey(), script);
}

#[test]
fn taproot_wildcard_internal_key() {
    // derivation fixture: child 0/0 of this key is well known
    let desc = mainnet(
        "tr(xpub6BgBgsespWvERF3LHQu6CnqdvfEvtMcQjYrcRzx53QJjSxarj2afYWcLteoGVky7D3UKDP9QyrLprQ3VCECoY49yfdDEHGCtMMj92pReUsQ/0/*)",
    )
    .unwrap();
    assert_eq!(desc.need_argument_num(), 1);
    let reference = desc.reference(&["0".to_owned()]).unwrap();
    assert_eq!(
        reference.key_list()[0].pubkey().to_string(),
        "03cc8a4bc64d897bddc5fbc2f670f7a8ba0b386779106cf1223c6fc5d7cd6fc115"
    );
}

#[test]
fn taproot_script_tree() {
    let text = format!(
        "tr({},{{pk({}),pk({})}})",
        x_only(PK_G),
        x_only(PK_2G),
        x_only(PK_3G)
    );
    let desc = mainnet(&text).unwrap();
    assert_eq!(desc.to_canonical_string(false), text);
    let reference = desc.reference(&[]).unwrap();
    let taproot = reference.taproot().unwrap();
    assert!(taproot.has_script_tree());
    assert_eq!(taproot.leaf_scripts().len(), 2);
    // tapscript pk: 32-byte push plus OP_CHECKSIG
    assert_eq!(taproot.leaf_scripts()[0].len(), 34);
    assert!(reference.locking_script().is_p2tr());
    // a script-path commitment differs from the key-path-only output
    let key_path = mainnet(&format!("tr({})", x_only(PK_G)))
        .unwrap()
        .locking_script()
        .unwrap();
    assert_ne!(*reference.locking_script(), key_path);
}

#[test]
fn taproot_single_and_hidden_leaves() {
    // single script leaf without braces
    let desc = mainnet(&format!("tr({},pk({}))", x_only(PK_G), x_only(PK_2G))).unwrap();
    let reference = desc.reference(&[]).unwrap();
    assert_eq!(reference.taproot().unwrap().leaf_scripts().len(), 1);

    // a bare x-only key leaf is committed as an opaque node
    let desc = mainnet(&format!("tr({},{})", x_only(PK_G), x_only(PK_2G))).unwrap();
    let reference = desc.reference(&[]).unwrap();
    let taproot = reference.taproot().unwrap();
    assert!(taproot.has_script_tree());
    assert!(taproot.leaf_scripts().is_empty());
}

#[test]
fn combo_reference_order() {
    let desc = mainnet(&format!("combo({})", PK_G)).unwrap();
    assert!(desc.is_combo_script());
    let references = desc.references(&[]).unwrap();
    assert_eq!(references.len(), 4);
    assert!(references[0].locking_script().is_p2wpkh());
    assert!(references[1].locking_script().is_p2sh());
    assert_eq!(references[1].address_class().unwrap(), AddressClass::ShWpkh);
    assert!(references[2].locking_script().is_p2pkh());
    assert!(references[3].locking_script().is_p2pk());

    // an uncompressed key keeps only the legacy scripts
    let desc = mainnet(&format!("combo({})", PK_G_UNCOMPRESSED)).unwrap();
    let references = desc.references(&[]).unwrap();
    assert_eq!(references.len(), 2);
    assert!(references[0].locking_script().is_p2pkh());
    assert!(references[1].locking_script().is_p2pk());
}

#[test]
fn addr_and_raw_descriptors() {
    let desc = mainnet("addr(bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4)").unwrap();
    let reference = desc.reference(&[]).unwrap();
    assert!(reference.locking_script().is_p2wpkh());
    assert_eq!(
        reference
            .generate_address(Network::Bitcoin)
            .unwrap()
            .to_string(),
        "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"
    );
    // requesting the wrong network is rejected
    assert!(matches!(
        reference.generate_address(Network::Testnet),
        Err(Error::Address(_))
    ));

    let desc = mainnet("raw(76a914751e76e8199196d454941c45d1b3a323f1433bd688ac)").unwrap();
    let reference = desc.reference(&[]).unwrap();
    assert!(reference.locking_script().is_p2pkh());
    assert!(reference.has_address());
    assert_eq!(
        reference
            .generate_address(Network::Bitcoin)
            .unwrap()
            .to_string(),
        "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH"
    );
    // a raw opcode soup has no address form
    let desc = mainnet("raw(6a)").unwrap();
    assert!(!desc.reference(&[]).unwrap().has_address());
}

#[test]
fn structural_rejection_catalogue() {
    let cases: Vec<(String, fn(&Error) -> bool)> = vec![
        // top-only form nested
        (format!("wsh(sh(pkh({})))", PK_G), |e| matches!(e, Error::Structure(_))),
        // wpkh below wsh
        (format!("wsh(wpkh({}))", PK_G), |e| matches!(e, Error::Structure(_))),
        // script where a key belongs
        (format!("pkh(pkh({}))", PK_G), |e| matches!(e, Error::Structure(_))),
        // key where a script belongs
        (format!("sh({})", PK_G), |e| matches!(e, Error::Structure(_))),
        // unknown form without a delegating parent
        ("frob(abc)".to_owned(), |e| matches!(e, Error::Structure(_))),
        // uncompressed keys in witness scopes
        (format!("wpkh({})", PK_G_UNCOMPRESSED), |e| {
            matches!(e, Error::UncompressedKey(_))
        }),
        (format!("wsh(pk({}))", PK_G_UNCOMPRESSED), |e| {
            matches!(e, Error::UncompressedKey(_))
        }),
        (format!("sh(wsh(multi(1,{})))", PK_G_UNCOMPRESSED), |e| {
            matches!(e, Error::UncompressedKey(_))
        }),
        // taproot restrictions
        (format!("tr({})", PK_G), |e| matches!(e, Error::Taproot(_))),
        (format!("tr({},pkh({}))", x_only(PK_G), x_only(PK_2G)), |e| {
            matches!(e, Error::Taproot(_))
        }),
        (format!("tr({},multi(1,{}))", x_only(PK_G), x_only(PK_2G)), |e| {
            matches!(e, Error::Taproot(_))
        }),
        // wildcard placement and hardened derivation
        (format!("pkh({}/*/1)", XPUB_A), |e| matches!(e, Error::Derivation(_))),
        (format!("pkh({}/1/*')", XPUB_A), |e| matches!(e, Error::Derivation(_))),
        (format!("pkh({}/1'/2)", XPUB_A), |e| matches!(e, Error::Derivation(_))),
        // malformed keys
        ("pkh(02abc)".to_owned(), |e| matches!(e, Error::Key(_))),
        // malformed address body
        ("addr(notanaddress)".to_owned(), |e| matches!(e, Error::Address(_))),
        // miniscript fallback failure
        ("wsh(frob(abc))".to_owned(), |e| matches!(e, Error::Miniscript(_))),
    ];
    for (descriptor, check) in &cases {
        match mainnet(descriptor) {
            Err(e) => {
                assert!(check(&e), "unexpected error {:?} for {}", e, descriptor);
                assert!(!e.to_string().is_empty());
            }
            Ok(_) => panic!("false positive: {}", descriptor),
        }
    }
}

#[test]
fn oversized_multisig_is_rejected() {
    let keys = vec![PK_G; 21].join(",");
    assert!(matches!(
        mainnet(&format!("wsh(multi(1,{}))", keys)),
        Err(Error::ScriptSize(_))
    ));
    let keys = vec![PK_G; 17].join(",");
    assert!(matches!(
        mainnet(&format!("sh(multi(1,{}))", keys)),
        Err(Error::ScriptSize(_))
    ));
}

#[test]
fn sh_multi_wildcards_are_allowed() {
    // wildcards under sh(multi(...)) still pass the redeem-size probe
    let desc = mainnet(&format!("sh(multi(1,{}/0/*))", XPUB_A)).unwrap();
    assert_eq!(desc.need_argument_num(), 1);
    assert!(desc.locking_script_with("3").unwrap().is_p2sh());
}

#[test]
fn sortedmulti_is_deterministic() {
    let forward = mainnet(&format!("sortedmulti(1,{},{})", PK_2G, PK_3G)).unwrap();
    let backward = mainnet(&format!("sortedmulti(1,{},{})", PK_3G, PK_2G)).unwrap();
    assert_eq!(
        forward.locking_script().unwrap(),
        backward.locking_script().unwrap()
    );
    // plain multi keeps the descriptor order
    let multi_fwd = mainnet(&format!("multi(1,{},{})", PK_2G, PK_3G)).unwrap();
    let multi_bwd = mainnet(&format!("multi(1,{},{})", PK_3G, PK_2G)).unwrap();
    assert_ne!(
        multi_fwd.locking_script().unwrap(),
        multi_bwd.locking_script().unwrap()
    );
}

#[test]
fn materialization_is_deterministic() {
    let text = format!("wsh(multi(1,{}/0/*,{}/1/*))", XPUB_A, XPUB_B);
    let args = ["7".to_owned(), "9".to_owned()];
    let a = mainnet(&text).unwrap().locking_scripts(&args).unwrap();
    let b = mainnet(&text).unwrap().locking_scripts(&args).unwrap();
    assert_eq!(a, b);
}

#[test]
fn node_accessors_expose_the_tree() {
    let desc = Descriptor::parse(
        &format!("wpkh([d34db33f/44'/0'/0']{}/1/*)", TPUB),
        Network::Testnet,
    )
    .unwrap();
    let root = desc.node();
    assert_eq!(root.node_kind(), NodeKind::Script);
    assert_eq!(root.script_form(), Some(ScriptForm::Wpkh));
    assert_eq!(root.name(), "wpkh");
    assert_eq!(root.depth(), 0);
    let key = &root.children()[0];
    assert_eq!(key.node_kind(), NodeKind::Key);
    assert_eq!(key.key_kind(), Some(KeyKind::Bip32));
    assert_eq!(key.origin_info(), "[d34db33f/44'/0'/0']");
    assert_eq!(key.base_extkey(), TPUB);
    assert_eq!(key.path_template(), "1/*");
    // one fixed step was derived at parse time
    assert_ne!(key.tweak_sum(), "0".repeat(64));
    assert!(key.key_info().starts_with("tpub"));
    assert_ne!(key.key_info(), TPUB);
}

#[test]
fn wif_private_keys_resolve_to_their_pubkey() {
    // the Bitcoin wiki example key, uncompressed WIF encoding
    const WIF: &str = "5HueCGU8rMjxEXxiPuD5BDku4MkFqeZyd4dZ1jvhTVqvbTLvyTJ";
    let desc = mainnet(&format!("pkh({})", WIF)).unwrap();
    let reference = desc.reference(&[]).unwrap();
    let key = &reference.key_list()[0];
    assert_eq!(key.key_kind(), KeyKind::Single);
    assert!(!key.pubkey().compressed);
    // the node stores the recovered public key, not the WIF text
    assert!(desc.node().children()[0].key_info().starts_with("04"));
    // but stringification keeps the original literal
    assert_eq!(desc.to_canonical_string(false), format!("pkh({})", WIF));

    // an uncompressed key cannot enter a witness scope
    assert!(matches!(
        mainnet(&format!("wpkh({})", WIF)),
        Err(Error::UncompressedKey(_))
    ));
}

/// Re-encodes an extended key with SLIP-132 version bytes for the tests.
fn slip132(extkey: &str, version: u32) -> String {
    let mut data = bitcoin::base58::decode_check(extkey).unwrap();
    data[..4].copy_from_slice(&version.to_be_bytes());
    bitcoin::base58::encode_check(&data)
}

#[test]
fn slip132_formats_gate_script_forms() {
    let upub = slip132(TPUB, 0x044a_5262);
    let vpub = slip132(TPUB, 0x045f_1cf6);
    assert!(upub.starts_with("upub"));
    assert!(vpub.starts_with("vpub"));

    // BIP49 keys only work under sh
    let sh_wpkh =
        Descriptor::parse(&format!("sh(wpkh({}/0/*))", upub), Network::Testnet).unwrap();
    assert!(sh_wpkh.locking_script_with("1").unwrap().is_p2sh());
    assert!(matches!(
        Descriptor::parse(&format!("wpkh({}/0/*)", upub), Network::Testnet),
        Err(Error::Bip32Format(_))
    ));
    assert!(matches!(
        Descriptor::parse(&format!("pkh({}/0/*)", upub), Network::Testnet),
        Err(Error::Bip32Format(_))
    ));

    // BIP84 keys only work standalone
    let wpkh = Descriptor::parse(&format!("wpkh({}/0/*)", vpub), Network::Testnet).unwrap();
    assert!(wpkh.locking_script_with("1").unwrap().is_p2wpkh());
    assert!(matches!(
        Descriptor::parse(&format!("sh(wpkh({}/0/*))", vpub), Network::Testnet),
        Err(Error::Bip32Format(_))
    ));

    // the marker survives stringification
    assert!(wpkh.node().children()[0].key_info().starts_with("vpub"));
}

#[test]
fn combo_respects_slip132_markers() {
    let upub = slip132(TPUB, 0x044a_5262);
    let vpub = slip132(TPUB, 0x045f_1cf6);

    let bip49 = Descriptor::parse(&format!("combo({})", upub), Network::Testnet).unwrap();
    let references = bip49.references(&[]).unwrap();
    assert_eq!(references.len(), 1);
    assert!(references[0].locking_script().is_p2sh());

    let bip84 = Descriptor::parse(&format!("combo({})", vpub), Network::Testnet).unwrap();
    let references = bip84.references(&[]).unwrap();
    assert_eq!(references.len(), 1);
    assert!(references[0].locking_script().is_p2wpkh());

    let unmarked = Descriptor::parse(&format!("combo({})", TPUB), Network::Testnet).unwrap();
    assert_eq!(unmarked.references(&[]).unwrap().len(), 4);
}

#[test]
fn round_trip_with_checksum() {
    for text in [
        format!("pkh({})", PK_G),
        format!("sh(wsh(pkh({})))", PK_G),
        format!("wsh(multi(1,{}/0/*,{}/1/*))", XPUB_A, XPUB_B),
        format!("tr({})", x_only(PK_G)),
        "raw(deadbeef)".to_owned(),
    ] {
        let desc = mainnet(&text).unwrap();
        let canonical = desc.to_canonical_string(true);
        assert!(canonical.starts_with(&text));
        let reparsed = mainnet(&canonical).unwrap();
        assert_eq!(reparsed.to_canonical_string(true), canonical);
    }
}
