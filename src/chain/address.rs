//! Address normalization
//!
//! The same wallet can show up in explorer data under more than one
//! encoding. Lookups try every candidate form:
//! - Bitcoin Cash: CashAddr (with and without `bitcoincash:`) and legacy base58
//! - EVM chains: as given and lowercased
//! - everything else: as given

use sha2::{Digest, Sha256};

use crate::core_types::Blockchain;

const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const BCH_PREFIX: &str = "bitcoincash";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    P2pkh,
    P2sh,
}

impl AddressKind {
    fn cash_type(self) -> u8 {
        match self {
            AddressKind::P2pkh => 0,
            AddressKind::P2sh => 1,
        }
    }

    fn legacy_version(self) -> u8 {
        match self {
            AddressKind::P2pkh => 0x00,
            AddressKind::P2sh => 0x05,
        }
    }
}

/// All encodings under which `address` may appear on `chain`
pub fn candidate_addresses(chain: Blockchain, address: &str) -> Vec<String> {
    let mut out = vec![address.to_string()];

    if chain == Blockchain::BitcoinCash {
        let decoded = decode_cashaddr(address).or_else(|| decode_legacy(address));
        if let Some((kind, hash)) = decoded {
            if let Some(cash) = encode_cashaddr(kind, &hash) {
                let short = cash.trim_start_matches("bitcoincash:").to_string();
                out.push(cash);
                out.push(short);
            }
            out.push(encode_legacy(kind, &hash));
        }
    } else if chain.is_evm() {
        out.push(address.to_lowercase());
    }

    let mut seen = Vec::with_capacity(out.len());
    out.retain(|a| {
        if seen.contains(a) {
            false
        } else {
            seen.push(a.clone());
            true
        }
    });
    out
}

pub fn decode_cashaddr(address: &str) -> Option<(AddressKind, [u8; 20])> {
    let lower = address.to_lowercase();
    let (prefix, payload) = match lower.split_once(':') {
        Some((prefix, payload)) => (prefix, payload),
        None => (BCH_PREFIX, lower.as_str()),
    };
    if prefix != BCH_PREFIX {
        return None;
    }

    let data: Vec<u8> = payload
        .bytes()
        .map(|c| CHARSET.iter().position(|&x| x == c).map(|p| p as u8))
        .collect::<Option<_>>()?;
    if data.len() <= 8 {
        return None;
    }

    let mut check = prefix_data(prefix);
    check.extend_from_slice(&data);
    if polymod(&check) != 0 {
        return None;
    }

    let bytes = convert_bits(&data[..data.len() - 8], 5, 8, false)?;
    if bytes.len() != 21 || bytes[0] & 0x07 != 0 {
        return None;
    }
    let kind = match bytes[0] >> 3 {
        0 => AddressKind::P2pkh,
        1 => AddressKind::P2sh,
        _ => return None,
    };

    let mut hash = [0u8; 20];
    hash.copy_from_slice(&bytes[1..]);
    Some((kind, hash))
}

pub fn encode_cashaddr(kind: AddressKind, hash: &[u8; 20]) -> Option<String> {
    let mut versioned = Vec::with_capacity(21);
    versioned.push(kind.cash_type() << 3);
    versioned.extend_from_slice(hash);
    let payload = convert_bits(&versioned, 8, 5, true)?;

    let mut check = prefix_data(BCH_PREFIX);
    check.extend_from_slice(&payload);
    check.extend_from_slice(&[0u8; 8]);
    let checksum = polymod(&check);

    let mut out = String::with_capacity(BCH_PREFIX.len() + 1 + payload.len() + 8);
    out.push_str(BCH_PREFIX);
    out.push(':');
    for d in payload {
        out.push(CHARSET[d as usize] as char);
    }
    for i in 0..8 {
        out.push(CHARSET[((checksum >> (5 * (7 - i))) & 0x1f) as usize] as char);
    }
    Some(out)
}

pub fn decode_legacy(address: &str) -> Option<(AddressKind, [u8; 20])> {
    let bytes = bs58::decode(address).into_vec().ok()?;
    if bytes.len() != 25 {
        return None;
    }
    let (body, checksum) = bytes.split_at(21);
    let digest = Sha256::digest(Sha256::digest(body));
    if &digest[..4] != checksum {
        return None;
    }
    let kind = match body[0] {
        0x00 => AddressKind::P2pkh,
        0x05 => AddressKind::P2sh,
        _ => return None,
    };

    let mut hash = [0u8; 20];
    hash.copy_from_slice(&body[1..]);
    Some((kind, hash))
}

pub fn encode_legacy(kind: AddressKind, hash: &[u8; 20]) -> String {
    let mut full = Vec::with_capacity(25);
    full.push(kind.legacy_version());
    full.extend_from_slice(hash);
    let digest = Sha256::digest(Sha256::digest(&full));
    full.extend_from_slice(&digest[..4]);
    bs58::encode(full).into_string()
}

fn prefix_data(prefix: &str) -> Vec<u8> {
    let mut out: Vec<u8> = prefix.bytes().map(|b| b & 0x1f).collect();
    out.push(0);
    out
}

fn polymod(values: &[u8]) -> u64 {
    let mut c: u64 = 1;
    for &d in values {
        let c0 = (c >> 35) as u8;
        c = ((c & 0x07_ffff_ffff) << 5) ^ u64::from(d);
        if c0 & 0x01 != 0 {
            c ^= 0x98_f2bc_8e61;
        }
        if c0 & 0x02 != 0 {
            c ^= 0x79_b76d_99e2;
        }
        if c0 & 0x04 != 0 {
            c ^= 0xf3_3e5f_b3c4;
        }
        if c0 & 0x08 != 0 {
            c ^= 0xae_2eab_e2a8;
        }
        if c0 & 0x10 != 0 {
            c ^= 0x1e_4f43_e470;
        }
    }
    c ^ 1
}

fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Option<Vec<u8>> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let maxv: u32 = (1 << to) - 1;
    let max_acc: u32 = (1 << (from + to - 1)) - 1;
    let mut out = Vec::with_capacity(data.len() * from as usize / to as usize + 1);

    for &value in data {
        let v = u32::from(value);
        if v >> from != 0 {
            return None;
        }
        acc = ((acc << from) | v) & max_acc;
        bits += from;
        while bits >= to {
            bits -= to;
            out.push(((acc >> bits) & maxv) as u8);
        }
    }

    if pad {
        if bits > 0 {
            out.push(((acc << (to - bits)) & maxv) as u8);
        }
    } else if bits >= from || ((acc << (to - bits)) & maxv) != 0 {
        return None;
    }
    Some(out)
}
