//! Repay / sponsor token descriptors and their self-describing blob encoding.
//!
//! Layout: one leading count byte, then each element's fields concatenated in declaration
//! order (address: 20 bytes, uint256: 32 bytes). The paymaster verifier walks this layout
//! field by field, so order and widths are fixed.

use crate::encoding::{concat, parse_address, u256_word, WORD};
use crate::error::{Error, Result};
use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

const ADDRESS_LEN: usize = 20;

/// Funds locked in a vault on `chain_id` that will repay the sponsor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepayTokenInfo {
    #[serde(with = "crate::invoice::serde_checksum")]
    pub vault: Address,
    #[serde(with = "crate::invoice::serde_dec")]
    pub amount: U256,
    #[serde(with = "crate::invoice::serde_dec")]
    pub chain_id: U256,
}

/// A token the paymaster lends `spender` on the sponsoring chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SponsorTokenInfo {
    pub token: Address,
    pub spender: Address,
    pub amount: U256,
}

/// The pair of blobs carried in paymaster data and folded into the sponsorship hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBlobs {
    pub repay: Bytes,
    pub sponsor: Bytes,
}

impl TokenBlobs {
    pub fn encode(repay: &[RepayTokenInfo], sponsor: &[SponsorTokenInfo]) -> Result<Self> {
        Ok(Self {
            repay: encode_repay_tokens(repay)?,
            sponsor: encode_sponsor_tokens(sponsor)?,
        })
    }
}

fn count_byte(len: usize) -> Result<u8> {
    u8::try_from(len).map_err(|_| {
        Error::Encoding(format!("token list of {len} elements exceeds the 255 element limit"))
    })
}

pub fn encode_repay_tokens(list: &[RepayTokenInfo]) -> Result<Bytes> {
    let mut out = vec![count_byte(list.len())?];
    for info in list {
        out.extend(concat(&[
            info.vault.as_bytes(),
            &u256_word(info.amount),
            &u256_word(info.chain_id),
        ]));
    }
    Ok(Bytes::from(out))
}

pub fn encode_sponsor_tokens(list: &[SponsorTokenInfo]) -> Result<Bytes> {
    let mut out = vec![count_byte(list.len())?];
    for info in list {
        out.extend(concat(&[
            info.token.as_bytes(),
            info.spender.as_bytes(),
            &u256_word(info.amount),
        ]));
    }
    Ok(Bytes::from(out))
}

/// Sequential reader over a token blob; every read is bounds-checked.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let chunk = self.buf.get(self.pos..end).ok_or_else(|| {
            Error::Encoding(format!(
                "token blob truncated: need {end} bytes, have {}",
                self.buf.len()
            ))
        })?;
        self.pos = end;
        Ok(chunk)
    }

    fn address(&mut self) -> Result<Address> {
        Ok(Address::from_slice(self.take(ADDRESS_LEN)?))
    }

    fn uint(&mut self) -> Result<U256> {
        Ok(U256::from_big_endian(self.take(WORD)?))
    }

    fn finish(self) -> Result<()> {
        if self.pos != self.buf.len() {
            return Err(Error::Encoding(format!(
                "{} trailing bytes after token list",
                self.buf.len() - self.pos
            )));
        }
        Ok(())
    }
}

fn decode_list<T>(
    blob: &[u8],
    mut element: impl FnMut(&mut Cursor<'_>) -> Result<T>,
) -> Result<Vec<T>> {
    let mut cursor = Cursor { buf: blob, pos: 0 };
    let count = cursor.take(1)?[0] as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(element(&mut cursor)?);
    }
    cursor.finish()?;
    Ok(out)
}

pub fn decode_repay_tokens(blob: &[u8]) -> Result<Vec<RepayTokenInfo>> {
    decode_list(blob, |c| {
        Ok(RepayTokenInfo {
            vault: c.address()?,
            amount: c.uint()?,
            chain_id: c.uint()?,
        })
    })
}

pub fn decode_sponsor_tokens(blob: &[u8]) -> Result<Vec<SponsorTokenInfo>> {
    decode_list(blob, |c| {
        Ok(SponsorTokenInfo {
            token: c.address()?,
            spender: c.address()?,
            amount: c.uint()?,
        })
    })
}

/// Parses `0x…` addresses for fixtures and CLI flags.
pub fn repay_token(vault: &str, amount: u64, chain_id: u64) -> Result<RepayTokenInfo> {
    Ok(RepayTokenInfo {
        vault: parse_address(vault)?,
        amount: U256::from(amount),
        chain_id: U256::from(chain_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VAULT: &str = "0x8e2048c85Eae2a4443408C284221B33e61906463";
    const TOKEN: &str = "0xfF3311cd15aB091B00421B23BcB60df02EFD8db7";
    const SPENDER: &str = "0x499E26E7A97cB8F89bE5668770Fb022fdDbCa40d";

    fn sponsor() -> SponsorTokenInfo {
        SponsorTokenInfo {
            token: parse_address(TOKEN).unwrap(),
            spender: parse_address(SPENDER).unwrap(),
            amount: U256::from(500u64),
        }
    }

    #[test]
    fn repay_blob_layout() {
        let blob = encode_repay_tokens(&[repay_token(VAULT, 500, 11155420).unwrap()]).unwrap();
        assert_eq!(blob.len(), 1 + 20 + 32 + 32);
        assert_eq!(
            hex::encode(&blob),
            concat!(
                "01",
                "8e2048c85eae2a4443408c284221b33e61906463",
                "00000000000000000000000000000000000000000000000000000000000001f4",
                "0000000000000000000000000000000000000000000000000000000000aa37dc",
            )
        );
    }

    #[test]
    fn sponsor_blob_layout() {
        let blob = encode_sponsor_tokens(&[sponsor()]).unwrap();
        assert_eq!(
            hex::encode(&blob),
            concat!(
                "01",
                "ff3311cd15ab091b00421b23bcb60df02efd8db7",
                "499e26e7a97cb8f89be5668770fb022fddbca40d",
                "00000000000000000000000000000000000000000000000000000000000001f4",
            )
        );
    }

    #[test]
    fn empty_and_single_lists_decode_back() {
        let empty = encode_repay_tokens(&[]).unwrap();
        assert_eq!(empty.as_ref(), &[0u8]);
        assert!(decode_repay_tokens(&empty).unwrap().is_empty());
        assert!(decode_sponsor_tokens(&encode_sponsor_tokens(&[]).unwrap())
            .unwrap()
            .is_empty());

        let repay = vec![repay_token(VAULT, 500, 11155420).unwrap()];
        assert_eq!(
            decode_repay_tokens(&encode_repay_tokens(&repay).unwrap()).unwrap(),
            repay
        );
        let sponsors = vec![sponsor()];
        assert_eq!(
            decode_sponsor_tokens(&encode_sponsor_tokens(&sponsors).unwrap()).unwrap(),
            sponsors
        );
    }

    #[test]
    fn multi_element_lists_keep_caller_order() {
        let repay = vec![
            repay_token(VAULT, 1, 10).unwrap(),
            repay_token(TOKEN, 2, 137).unwrap(),
        ];
        let blob = encode_repay_tokens(&repay).unwrap();
        assert_eq!(blob[0], 2);
        assert_eq!(decode_repay_tokens(&blob).unwrap(), repay);
    }

    #[test]
    fn malformed_blobs_are_rejected() {
        let blob = encode_repay_tokens(&[repay_token(VAULT, 500, 1).unwrap()]).unwrap();
        assert!(decode_repay_tokens(&blob[..blob.len() - 1]).is_err());

        let mut trailing = blob.to_vec();
        trailing.push(0);
        assert!(decode_repay_tokens(&trailing).is_err());

        assert!(decode_sponsor_tokens(&[]).is_err());
    }

    #[test]
    fn oversized_lists_fail_to_encode() {
        let list = vec![sponsor(); 256];
        assert!(matches!(
            encode_sponsor_tokens(&list),
            Err(Error::Encoding(_))
        ));
    }
}
