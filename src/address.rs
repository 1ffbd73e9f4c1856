//! Output-script classification and address encoding.
//!
//! Recognised standard forms (P2PKH, P2SH, P2PK) encode to base58check with
//! the mainnet version bytes. Anything else gets no address here; the loader
//! falls back to keying the balance by the hex of the raw script bytes, so
//! two outputs share one balance bucket exactly when their non-standard
//! scripts are identical.

use ripemd160::{Digest as RipemdDigest, Ripemd160};
use sha2::{Digest, Sha256};

const VERSION_P2PKH: u8 = 0x00;
const VERSION_P2SH: u8 = 0x05;

/// Derive a base58 address from an output script, or `None` when the script
/// is not a recognised standard form.
pub fn address_from_script(script: &[u8]) -> Option<String> {
    // P2PKH: OP_DUP OP_HASH160 PUSH20 <hash> OP_EQUALVERIFY OP_CHECKSIG
    if script.len() == 25
        && script[0] == 0x76
        && script[1] == 0xa9
        && script[2] == 0x14
        && script[23] == 0x88
        && script[24] == 0xac
    {
        return Some(encode_base58check(&script[3..23], VERSION_P2PKH));
    }

    // P2SH: OP_HASH160 PUSH20 <hash> OP_EQUAL
    if script.len() == 23 && script[0] == 0xa9 && script[1] == 0x14 && script[22] == 0x87 {
        return Some(encode_base58check(&script[2..22], VERSION_P2SH));
    }

    // P2PK, compressed: PUSH33 <pubkey> OP_CHECKSIG
    if script.len() == 35 && script[0] == 0x21 && script[34] == 0xac {
        return Some(encode_base58check(&hash160(&script[1..34]), VERSION_P2PKH));
    }

    // P2PK, uncompressed: PUSH65 <pubkey> OP_CHECKSIG
    if script.len() == 67 && script[0] == 0x41 && script[66] == 0xac {
        return Some(encode_base58check(&hash160(&script[1..66]), VERSION_P2PKH));
    }

    None
}

/// Balance key for an output whose script has no standard form: the raw
/// script bytes, hex-encoded. The encoding is byte-preserving, so distinct
/// scripts never collide into one key.
pub fn script_fallback_address(script: &[u8]) -> String {
    hex::encode(script)
}

fn hash160(data: &[u8]) -> Vec<u8> {
    let sha_hash = Sha256::digest(data);
    Ripemd160::digest(&sha_hash).to_vec()
}

/// version byte + payload + first 4 bytes of sha256d checksum, base58-encoded.
fn encode_base58check(payload: &[u8], version: u8) -> String {
    let mut data = Vec::with_capacity(25);
    data.push(version);
    data.extend_from_slice(payload);

    let first_hash = Sha256::digest(&data);
    let second_hash = Sha256::digest(&first_hash);
    data.extend_from_slice(&second_hash[..4]);

    bs58::encode(&data).into_string()
}
