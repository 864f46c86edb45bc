//! Byte-packing primitives matching EVM calldata conventions, plus the hex helpers used for
//! JSON-RPC payloads.
//!
//! Raw concatenation packs an address at 20 bytes and a `uintN` at exactly `N / 8` bytes,
//! big-endian, with no length prefixes. Values wider than their declared width are rejected,
//! never truncated.

use crate::error::{Error, Result};
use ethers::types::{Address, Bytes, H256, U256};

pub const WORD: usize = 32;

/// Left-pads `value` with zeros to `width` bytes.
pub fn pad_left(value: &[u8], width: usize) -> Result<Vec<u8>> {
    if value.len() > width {
        return Err(Error::Encoding(format!(
            "value of {} bytes does not fit in {width} bytes",
            value.len()
        )));
    }
    let mut out = vec![0u8; width - value.len()];
    out.extend_from_slice(value);
    Ok(out)
}

pub fn concat(chunks: &[&[u8]]) -> Vec<u8> {
    let len = chunks.iter().map(|c| c.len()).sum();
    let mut out = Vec::with_capacity(len);
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out
}

/// Big-endian encoding of `value` in exactly `width` bytes (`1..=32`).
pub fn fixed_width_be(value: U256, width: usize) -> Result<Vec<u8>> {
    if width == 0 || width > WORD {
        return Err(Error::Encoding(format!("unsupported integer width {width}")));
    }
    if value.bits() > width * 8 {
        return Err(Error::Encoding(format!(
            "value {value} exceeds uint{}",
            width * 8
        )));
    }
    let mut word = [0u8; WORD];
    value.to_big_endian(&mut word);
    Ok(word[WORD - width..].to_vec())
}

pub fn u256_word(value: U256) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    value.to_big_endian(&mut word);
    word
}

/// An address right-aligned in a 32-byte ABI word.
pub fn address_word(addr: Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(addr.as_bytes());
    word
}

/// Packs two 128-bit values into one word: `hi ‖ lo`, 16 bytes each.
///
/// Used for `accountGasLimits` (verification, call), `gasFees` (priority, max) and the
/// paymaster gas word (verification, postOp).
pub fn pack_u128_pair(hi: U256, lo: U256) -> Result<H256> {
    let hi = fixed_width_be(hi, 16)?;
    let lo = fixed_width_be(lo, 16)?;
    Ok(H256::from_slice(&concat(&[&hi, &lo])))
}

/// Splits a word produced by [`pack_u128_pair`].
pub fn unpack_u128_pair(word: H256) -> (U256, U256) {
    let bytes = word.as_bytes();
    (
        U256::from_big_endian(&bytes[..16]),
        U256::from_big_endian(&bytes[16..]),
    )
}

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &[u8]) -> String {
    format!("0x{}", hex::encode(b))
}

pub fn parse_u256_quantity(s: &str) -> Result<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(s, 16)
        .map_err(|e| Error::Encoding(format!("invalid hex quantity 0x{s}: {e}")))
}

pub fn parse_bytes(s: &str) -> Result<Bytes> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).map_err(|e| Error::Encoding(format!("invalid hex: {e}")))?;
    Ok(Bytes::from(bytes))
}

pub fn parse_h256(s: &str) -> Result<H256> {
    let bytes = parse_bytes(s)?;
    if bytes.len() != WORD {
        return Err(Error::Encoding(format!(
            "expected 32-byte hex, got {} bytes",
            bytes.len()
        )));
    }
    Ok(H256::from_slice(&bytes))
}

pub fn parse_address(s: &str) -> Result<Address> {
    let bytes = parse_bytes(s)?;
    if bytes.len() != 20 {
        return Err(Error::Encoding(format!(
            "expected 20-byte address, got {} bytes",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes))
}
