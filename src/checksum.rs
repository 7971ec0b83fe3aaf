// SPDX-License-Identifier: CC0-1.0

//! Descriptor checksum
//!
//! The 8-character checksum appended to descriptors after a `#` separator,
//! as specified in [BIP-380]. It is a BCH-style code over a 40-bit state:
//! every input character contributes its position within a group of 32, and
//! every third character additionally contributes the accumulated group
//! numbers, so that single-character errors within a group as well as
//! cross-group case errors each disturb exactly one checksum symbol.
//!
//! [BIP-380]: <https://github.com/bitcoin/bips/blob/master/bip-0380.mediawiki>

use crate::Error;

/// Allowed characters in a descriptor body, ordered so that the most common
/// unprotected characters (hex digits, key path punctuation) occupy the
/// first group of 32 and case errors land a multiple of 32 apart.
pub const INPUT_CHARSET: &str = "0123456789()[],'/*abcdefgh@:$%{}IJKLMNOPQRSTUVWXYZ&+-.;<=>?!^_|~ijklmnopqrstuvwxyzABCDEFGH`#\"\\ ";

/// The character set of the checksum itself (the Bech32 alphabet).
const CHECKSUM_CHARSET: &[u8] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

fn poly_mod(c: u64, val: u64) -> u64 {
    let c0 = c >> 35;
    let mut c = ((c & 0x7ffffffff) << 5) ^ val;
    if c0 & 1 != 0 {
        c ^= 0xf5dee51989;
    }
    if c0 & 2 != 0 {
        c ^= 0xa9fdca3312;
    }
    if c0 & 4 != 0 {
        c ^= 0x1bab10e32d;
    }
    if c0 & 8 != 0 {
        c ^= 0x3706b1677a;
    }
    if c0 & 16 != 0 {
        c ^= 0x644d626ffd;
    }
    c
}

/// Computes the checksum of a descriptor body (everything before the `#`).
///
/// Does not check that the body is a syntactically valid descriptor; it only
/// folds the characters through the checksum polynomial. Errors if any
/// character lies outside [`INPUT_CHARSET`].
pub fn desc_checksum(desc: &str) -> Result<String, Error> {
    let mut c = 1u64;
    let mut cls = 0u64;
    let mut clscount = 0;

    for ch in desc.chars() {
        let pos = INPUT_CHARSET
            .find(ch)
            .ok_or_else(|| Error::BadChecksum(format!("invalid character '{}' in payload", ch)))?
            as u64;
        c = poly_mod(c, pos & 31);
        cls = cls * 3 + (pos >> 5);
        clscount += 1;
        if clscount == 3 {
            c = poly_mod(c, cls);
            cls = 0;
            clscount = 0;
        }
    }
    if clscount > 0 {
        c = poly_mod(c, cls);
    }
    (0..8).for_each(|_| c = poly_mod(c, 0));
    c ^= 1;

    let checksum = (0..8)
        .map(|j| CHECKSUM_CHARSET[((c >> (5 * (7 - j))) & 31) as usize] as char)
        .collect();
    Ok(checksum)
}

/// Verifies the checksum of a full descriptor string, if one is attached,
/// and returns the body without it.
pub fn verify_checksum(desc: &str) -> Result<&str, Error> {
    let mut parts = desc.splitn(2, '#');
    let body = parts.next().expect("splitn always yields at least one part");
    if let Some(found) = parts.next() {
        if found.contains('#') {
            return Err(Error::BadChecksum("multiple '#' symbols".to_owned()));
        }
        if found.len() != 8 {
            return Err(Error::BadChecksum(format!(
                "expected 8 character checksum, not {} characters",
                found.len()
            )));
        }
        let expected = desc_checksum(body)?;
        if found != expected {
            return Err(Error::ChecksumMismatch { expected, found: found.to_owned() });
        }
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! check_expected {
        ($desc: expr, $checksum: expr) => {
            assert_eq!(desc_checksum($desc).unwrap(), $checksum);
        };
    }

    #[test]
    fn valid_descriptor_checksum() {
        check_expected!(
            "wpkh(tprv8ZgxMBicQKsPdpkqS7Eair4YxjcuuvDPNYmKX3sCniCf16tHEVrjjiSXEkFRnUH77yXc6ZcwHHcLNfjdi5qUvw3VDfgYiH5mNsj5izuiu2N/1/2/*)",
            "tqz0nc62"
        );
        check_expected!(
            "pkh(tpubD6NzVbkrYhZ4XHndKkuB8FifXm8r5FQHwrN6oZuWCz13qb93rtgKvD4PQsqC4HP4yhV3tA2fqr2RbY5mNXfM7RxXUoeABoDtsFUq2zJq6YK/44'/1'/0'/0/*)",
            "lasegmfs"
        );
        check_expected!(
            "sh(multi(2,[00000000/111'/222]xprvA1RpRA33e1JQ7ifknakTFpgNXPmW2YvmhqLQYMmrj4xJXXWYpDPS3xz7iAxn8L39njGVyuoseXzU6rcxFLJ8HFsTjSyQbLYnMpCqE2VbFWc,xprv9uPDJpEQgRQfDcW7BkF7eTya6RPxXeJCqCJGHuCJ4GiRVLzkTXBAJMu2qaMWPrS7AANYqdq6vcBcBUdJCVVFceUvJFjaPdGZ2y9WACViL4L/0))",
            "ggrsrxfy"
        );
        check_expected!(
            "sh(multi(2,[00000000/111'/222]xpub6ERApfZwUNrhLCkDtcHTcxd75RbzS1ed54G1LkBUHQVHQKqhMkhgbmJbZRkrgZw4koxb5JaHWkY4ALHY2grBGRjaDMzQLcgJvLJuZZvRcEL,xpub68NZiKmJWnxxS6aaHmn81bvJeTESw724CRDs6HbuccFQN9Ku14VQrADWgqbhhTHBaohPX4CjNLf9fq9MYo6oDaPPLPxSb7gwQN3ih19Zm4Y/0))",
            "tjg09x5t"
        );
        // reference vector for the compressed generator-point key
        check_expected!(
            "pk(0379be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798)",
            "axav5m0j"
        );
    }

    #[test]
    fn invalid_character() {
        let desc = "pkh(03\u{1f496})";
        assert!(matches!(desc_checksum(desc), Err(Error::BadChecksum(_))));
    }

    #[test]
    fn bip_380_vectors_valid() {
        let tcs = ["raw(deadbeef)#89f8spxm", "raw(deadbeef)"];
        for tc in tcs {
            if verify_checksum(tc).is_err() {
                panic!("false negative: {}", tc)
            }
        }
    }

    #[test]
    fn bip_380_vectors_invalid() {
        let tcs = [
            "raw(deadbeef)#",          // Missing checksum.
            "raw(deadbeef)#89f8spxmx", // Too long checksum.
            "raw(deadbeef)#89f8spx",   // Too short checksum.
            "raw(dedbeef)#89f8spxm",   // Error in payload.
            "raw(deadbeef)##9f8spxm",  // Error in checksum.
            "raw(\u{dc})#00000000",    // Invalid characters in payload.
        ];
        for tc in tcs {
            if verify_checksum(tc).is_ok() {
                panic!("false positive: {}", tc)
            }
        }
    }

    #[test]
    fn substitutions_are_detected() {
        // Within-group substitutions feed a different per-character symbol,
        // cross-group case errors a different group symbol; both must move
        // the checksum.
        let base = desc_checksum("pkh(abcd)").unwrap();
        assert_ne!(base, desc_checksum("pkh(abce)").unwrap());
        assert_ne!(base, desc_checksum("pkh(aBcd)").unwrap());
    }

    #[test]
    fn checksum_is_pure() {
        let body = "wsh(sortedmulti(2,03acd484e2f0c7f65309ad178a9f559abde09796974c57e714c35f110dfc27ccbe,022f01e5e15cca351daff3843fb70f3c2f0a1bdd05e5af888a67784ef3e10a2a01))";
        assert_eq!(desc_checksum(body).unwrap(), desc_checksum(body).unwrap());
    }
}
