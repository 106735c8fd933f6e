//! Script-to-address derivation (standard P2PKH/P2SH only — Radiant does
//! not carry PIVX's cold-staking/Sapling/Zerocoin script kinds).

use ripemd160::{Digest as RipemdDigest, Ripemd160};
use sha2::{Digest, Sha256};

const P2PKH_VERSION: u8 = 0x00;
const P2SH_VERSION: u8 = 0x05;

fn sha256d(data: &[u8]) -> Vec<u8> {
    let first = Sha256::digest(data);
    Sha256::digest(&first).to_vec()
}

pub fn hash_address(hash: &[u8], version: u8) -> String {
    let mut extended = vec![version];
    extended.extend_from_slice(hash);
    let checksum = sha256d(&extended);
    extended.extend_from_slice(&checksum[0..4]);
    bs58::encode(extended).into_string()
}

fn p2pkh_address(script: &[u8]) -> Option<String> {
    if script.len() == 25
        && script[0] == 0x76
        && script[1] == 0xa9
        && script[2] == 0x14
        && script[23] == 0x88
        && script[24] == 0xac
    {
        Some(hash_address(&script[3..23], P2PKH_VERSION))
    } else {
        None
    }
}

fn p2sh_address(script: &[u8]) -> Option<String> {
    if script.len() == 23 && script[0] == 0xa9 && script[1] == 0x14 && script[22] == 0x87 {
        Some(hash_address(&script[2..22], P2SH_VERSION))
    } else {
        None
    }
}

/// Derives an address from a scriptPubKey. Non-standard scripts yield
/// `None`, matching spec §4.4's "non-standard scripts yield `address=null`".
pub fn scriptpubkey_to_address(script: &[u8]) -> Option<String> {
    p2pkh_address(script).or_else(|| p2sh_address(script))
}

pub fn hash160(data: &[u8]) -> Vec<u8> {
    Ripemd160::digest(Sha256::digest(data)).to_vec()
}
